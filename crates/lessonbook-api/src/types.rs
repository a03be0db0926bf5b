//! Status enums, roles and request context

use chrono::{DateTime, Duration, Utc};
use lessonbook_util::{ParseError, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reservation lifecycle.
///
/// ```text
/// PENDING_APPROVAL -> APPROVED -> CONFIRMED -> COMPLETED
///        \               |            |
///         +--------------+------------+--> CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    PendingApproval,
    Approved,
    Confirmed,
    Completed,
    Canceled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::PendingApproval => "PENDING_APPROVAL",
            ReservationStatus::Approved => "APPROVED",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Canceled => "CANCELED",
        }
    }

    /// Holds slot capacity and blocks overlapping bookings
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReservationStatus::PendingApproval
                | ReservationStatus::Approved
                | ReservationStatus::Confirmed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed | ReservationStatus::Canceled
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_APPROVAL" => Ok(ReservationStatus::PendingApproval),
            "APPROVED" => Ok(ReservationStatus::Approved),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "COMPLETED" => Ok(ReservationStatus::Completed),
            "CANCELED" => Ok(ReservationStatus::Canceled),
            other => Err(ParseError::unknown("reservation status", other)),
        }
    }
}

/// Payment side-channel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Record exists, no payment method attached yet
    Pending,
    /// Reusable payment method attached, no funds moved
    SetupCompleted,
    Charged,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::SetupCompleted => "SETUP_COMPLETED",
            PaymentStatus::Charged => "CHARGED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SETUP_COMPLETED" => Ok(PaymentStatus::SetupCompleted),
            "CHARGED" => Ok(PaymentStatus::Charged),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(ParseError::unknown("payment status", other)),
        }
    }
}

/// Lesson session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(SessionStatus::Scheduled),
            "IN_PROGRESS" => Ok(SessionStatus::InProgress),
            "COMPLETED" => Ok(SessionStatus::Completed),
            "CANCELED" => Ok(SessionStatus::Canceled),
            other => Err(ParseError::unknown("session status", other)),
        }
    }
}

/// Why a reservation was canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    StudentRequest,
    MentorRequest,
    Emergency,
    SystemError,
    AdminAction,
}

impl CancelReason {
    pub const ALL: [CancelReason; 5] = [
        CancelReason::StudentRequest,
        CancelReason::MentorRequest,
        CancelReason::Emergency,
        CancelReason::SystemError,
        CancelReason::AdminAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::StudentRequest => "STUDENT_REQUEST",
            CancelReason::MentorRequest => "MENTOR_REQUEST",
            CancelReason::Emergency => "EMERGENCY",
            CancelReason::SystemError => "SYSTEM_ERROR",
            CancelReason::AdminAction => "ADMIN_ACTION",
        }
    }

    /// Emergency and system-error cancellations ignore role deadlines and fees
    pub fn bypasses_deadline(&self) -> bool {
        matches!(self, CancelReason::Emergency | CancelReason::SystemError)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancelReason {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CancelReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ParseError::unknown("cancel reason", s))
    }
}

/// Role of the actor performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Student,
    Mentor,
    Admin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Student => "student",
            ActorRole::Mentor => "mentor",
            ActorRole::Admin => "admin",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(ActorRole::Student),
            "mentor" => Ok(ActorRole::Mentor),
            "admin" => Ok(ActorRole::Admin),
            other => Err(ParseError::unknown("actor role", other)),
        }
    }
}

/// Authenticated caller of an operation.
///
/// Built by the transport layer for each request and passed explicitly; the
/// engine never looks up who is calling on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor_id: UserId,
    pub role: ActorRole,
}

impl RequestContext {
    pub fn new(actor_id: impl Into<UserId>, role: ActorRole) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }

    pub fn student(actor_id: impl Into<UserId>) -> Self {
        Self::new(actor_id, ActorRole::Student)
    }

    pub fn mentor(actor_id: impl Into<UserId>) -> Self {
        Self::new(actor_id, ActorRole::Mentor)
    }

    pub fn admin(actor_id: impl Into<UserId>) -> Self {
        Self::new(actor_id, ActorRole::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Returns `None` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}
