//! Validated settings structures

use chrono::{DateTime, Utc};
use lessonbook_util::{
    GATEWAY_TIMEOUT_SECS, MENTOR_CANCEL_HOURS, STUDENT_CANCEL_HOURS, charge_lead_time,
    data_dir_without_env, default_policy_cutover, grace_period, parse_timestamp,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::{
    RawCancellationConfig, RawChargingConfig, RawConfig, RawGatewayConfig, RawServiceConfig,
};

/// Default scheduler trigger interval
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Validated settings ready for use by the engine and the daemon
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub service: ServiceConfig,
    pub charging: ChargingPolicy,
    pub cancellation: CancellationWindows,
    pub gateway: GatewayConfig,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            charging: ChargingPolicy::from_raw(raw.charging),
            cancellation: CancellationWindows::from_raw(raw.cancellation),
            gateway: GatewayConfig::from_raw(raw.gateway),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            sweep_interval: Duration::from_secs(
                raw.sweep_interval_seconds
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// When and how deferred charges run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargingPolicy {
    pub lead_time: chrono::Duration,
    pub grace_period: chrono::Duration,
    pub timeout: Duration,
    pub policy_cutover: DateTime<Utc>,
}

impl ChargingPolicy {
    fn from_raw(raw: RawChargingConfig) -> Self {
        let policy_cutover = raw
            .policy_cutover
            .as_deref()
            .and_then(|s| parse_timestamp(s).ok())
            .unwrap_or_else(default_policy_cutover);

        // Out-of-range values are rejected by validation; fall back here too
        let lead_time = raw
            .lead_time_minutes
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or_else(charge_lead_time);
        let grace = raw
            .grace_period_minutes
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or_else(grace_period);

        Self {
            lead_time,
            grace_period: grace,
            timeout: Duration::from_secs(raw.timeout_seconds.unwrap_or(GATEWAY_TIMEOUT_SECS)),
            policy_cutover,
        }
    }
}

impl Default for ChargingPolicy {
    fn default() -> Self {
        Self::from_raw(RawChargingConfig::default())
    }
}

/// Free-cancellation deadlines per role, in hours before the lesson
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationWindows {
    pub student_deadline_hours: i64,
    pub mentor_deadline_hours: i64,
}

impl CancellationWindows {
    fn from_raw(raw: RawCancellationConfig) -> Self {
        Self {
            student_deadline_hours: raw.student_deadline_hours.unwrap_or(STUDENT_CANCEL_HOURS),
            mentor_deadline_hours: raw.mentor_deadline_hours.unwrap_or(MENTOR_CANCEL_HOURS),
        }
    }
}

impl Default for CancellationWindows {
    fn default() -> Self {
        Self {
            student_deadline_hours: STUDENT_CANCEL_HOURS,
            mentor_deadline_hours: MENTOR_CANCEL_HOURS,
        }
    }
}

/// Which gateway implementation the daemon wires in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayMode {
    #[default]
    Sandbox,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Sandbox => "sandbox",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub decline_customers: Vec<String>,
}

impl GatewayConfig {
    fn from_raw(raw: RawGatewayConfig) -> Self {
        Self {
            // validation only admits "sandbox"
            mode: GatewayMode::Sandbox,
            decline_customers: raw.decline_customers,
        }
    }
}
