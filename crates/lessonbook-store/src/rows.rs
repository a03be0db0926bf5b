//! Column lists and row mappers shared by the SQLite queries
//!
//! Timestamps are stored as RFC 3339 UTC with fixed millisecond precision, so
//! lexical order in SQL equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use lessonbook_api::{Approval, Cancellation, LessonSession, LessonSlot, Payment, Reservation};
use lessonbook_util::{UserId, parse_timestamp};
use rusqlite::Row;
use rusqlite::types::Type;
use std::str::FromStr;

pub(crate) const SLOT_COLUMNS: &str = "s.id, s.teacher_id, s.start_time, s.end_time, \
     s.hourly_rate, s.currency, s.min_hours, s.max_hours, s.is_available, s.created_at";

pub(crate) const RESERVATION_COLUMNS: &str = "r.id, r.slot_id, r.student_id, \
     r.booked_start_time, r.booked_end_time, r.total_amount, r.currency, r.status, \
     r.payment_id, r.notes, r.approved_at, r.approved_by, r.canceled_at, r.canceled_by, \
     r.cancel_reason, r.cancellation_fee, r.cancel_notes, r.created_at, r.updated_at";

pub(crate) const RESERVATION_COLUMN_COUNT: usize = 19;

pub(crate) const PAYMENT_COLUMNS: &str = "p.id, p.reservation_id, p.amount, p.currency, \
     p.status, p.payment_method_ref, p.charge_executed_at, p.gateway_charge_ref, \
     p.failure_reason, p.refund_amount, p.refunded_at, p.created_at, p.updated_at";

pub(crate) const SESSION_COLUMNS: &str = "l.id, l.reservation_id, l.scheduled_start, \
     l.scheduled_end, l.actual_start, l.actual_end, l.status, l.notes, l.feedback";

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn col_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_timestamp(&s).map_err(|e| conversion_error(idx, e))
}

fn col_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_timestamp(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn col_parse<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, e))
}

fn col_opt_parse<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<LessonSlot> {
    Ok(LessonSlot {
        id: col_parse(row, 0)?,
        teacher_id: UserId::new(row.get::<_, String>(1)?),
        start_time: col_ts(row, 2)?,
        end_time: col_ts(row, 3)?,
        hourly_rate: row.get(4)?,
        currency: row.get(5)?,
        min_hours: row.get(6)?,
        max_hours: row.get(7)?,
        is_available: row.get(8)?,
        created_at: col_ts(row, 9)?,
    })
}

/// Reads [`RESERVATION_COLUMNS`] starting at column `base`
pub(crate) fn reservation_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Reservation> {
    let approved_at = col_opt_ts(row, base + 10)?;
    let approved_by: Option<String> = row.get(base + 11)?;
    let approval = match (approved_at, approved_by) {
        (Some(approved_at), Some(by)) => Some(Approval {
            approved_at,
            approved_by: UserId::new(by),
        }),
        _ => None,
    };

    let canceled_at = col_opt_ts(row, base + 12)?;
    let canceled_by: Option<String> = row.get(base + 13)?;
    let cancel_reason = col_opt_parse(row, base + 14)?;
    let cancellation_fee: Option<i64> = row.get(base + 15)?;
    let cancel_notes: Option<String> = row.get(base + 16)?;
    let cancellation = match (canceled_at, canceled_by, cancel_reason) {
        (Some(canceled_at), Some(by), Some(reason)) => Some(Cancellation {
            canceled_at,
            canceled_by: UserId::new(by),
            reason,
            fee: cancellation_fee.unwrap_or(0),
            notes: cancel_notes,
        }),
        _ => None,
    };

    Ok(Reservation {
        id: col_parse(row, base)?,
        slot_id: col_parse(row, base + 1)?,
        student_id: UserId::new(row.get::<_, String>(base + 2)?),
        booked_start_time: col_ts(row, base + 3)?,
        booked_end_time: col_ts(row, base + 4)?,
        total_amount: row.get(base + 5)?,
        currency: row.get(base + 6)?,
        status: col_parse(row, base + 7)?,
        payment_id: col_opt_parse(row, base + 8)?,
        notes: row.get(base + 9)?,
        approval,
        cancellation,
        created_at: col_ts(row, base + 17)?,
        updated_at: col_ts(row, base + 18)?,
    })
}

/// Reads [`PAYMENT_COLUMNS`] starting at column `base`
pub(crate) fn payment_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: col_parse(row, base)?,
        reservation_id: col_parse(row, base + 1)?,
        amount: row.get(base + 2)?,
        currency: row.get(base + 3)?,
        status: col_parse(row, base + 4)?,
        payment_method_ref: row.get(base + 5)?,
        charge_executed_at: col_opt_ts(row, base + 6)?,
        gateway_charge_ref: row.get(base + 7)?,
        failure_reason: row.get(base + 8)?,
        refund_amount: row.get(base + 9)?,
        refunded_at: col_opt_ts(row, base + 10)?,
        created_at: col_ts(row, base + 11)?,
        updated_at: col_ts(row, base + 12)?,
    })
}

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<LessonSession> {
    Ok(LessonSession {
        id: col_parse(row, 0)?,
        reservation_id: col_parse(row, 1)?,
        scheduled_start: col_ts(row, 2)?,
        scheduled_end: col_ts(row, 3)?,
        actual_start: col_opt_ts(row, 4)?,
        actual_end: col_opt_ts(row, 5)?,
        status: col_parse(row, 6)?,
        notes: row.get(7)?,
        feedback: row.get(8)?,
    })
}
