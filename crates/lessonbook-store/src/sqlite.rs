//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use lessonbook_api::{
    Approval, Cancellation, LessonSession, LessonSlot, Payment, Reservation, ReservationStatus,
    TimeRange,
};
use lessonbook_util::{ChargeWindow, PaymentId, ReservationId, SlotId, UserId, parse_timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::rows::{
    PAYMENT_COLUMNS, RESERVATION_COLUMN_COUNT, RESERVATION_COLUMNS, SESSION_COLUMNS, SLOT_COLUMNS,
    opt_ts, payment_from_row, reservation_from_row, session_from_row, slot_from_row, ts,
};
use crate::{AuditEvent, ChargeCandidate, ChargeCommit, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS slots (
                id TEXT PRIMARY KEY,
                teacher_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                hourly_rate INTEGER NOT NULL,
                currency TEXT NOT NULL,
                min_hours INTEGER NOT NULL,
                max_hours INTEGER NOT NULL,
                is_available INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            -- Never deleted; CANCELED rows stay for the audit trail
            CREATE TABLE IF NOT EXISTS reservations (
                id TEXT PRIMARY KEY,
                slot_id TEXT NOT NULL REFERENCES slots(id),
                student_id TEXT NOT NULL,
                booked_start_time TEXT NOT NULL,
                booked_end_time TEXT NOT NULL,
                total_amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_id TEXT,
                notes TEXT,
                approved_at TEXT,
                approved_by TEXT,
                canceled_at TEXT,
                canceled_by TEXT,
                cancel_reason TEXT,
                cancellation_fee INTEGER,
                cancel_notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                reservation_id TEXT NOT NULL UNIQUE REFERENCES reservations(id),
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_method_ref TEXT,
                charge_executed_at TEXT,
                gateway_charge_ref TEXT,
                failure_reason TEXT,
                refund_amount INTEGER,
                refunded_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lesson_sessions (
                id TEXT PRIMARY KEY,
                reservation_id TEXT NOT NULL UNIQUE REFERENCES reservations(id),
                scheduled_start TEXT NOT NULL,
                scheduled_end TEXT NOT NULL,
                actual_start TEXT,
                actual_end TEXT,
                status TEXT NOT NULL,
                notes TEXT,
                feedback TEXT
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_reservations_slot ON reservations(slot_id, status);
            CREATE INDEX IF NOT EXISTS idx_reservations_student ON reservations(student_id, status);
            CREATE INDEX IF NOT EXISTS idx_reservations_start ON reservations(status, booked_start_time);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn query_reservations(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Reservation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| reservation_from_row(row, 0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![ts(&event.timestamp), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = parse_timestamp(&timestamp_str)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn insert_slot(&self, slot: &LessonSlot) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO slots (id, teacher_id, start_time, end_time, hourly_rate, currency,
                               min_hours, max_hours, is_available, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                slot.id.to_string(),
                slot.teacher_id.as_str(),
                ts(&slot.start_time),
                ts(&slot.end_time),
                slot.hourly_rate,
                slot.currency,
                slot.min_hours,
                slot.max_hours,
                slot.is_available,
                ts(&slot.created_at),
            ],
        )?;

        debug!(slot_id = %slot.id, teacher_id = %slot.teacher_id, "Slot inserted");
        Ok(())
    }

    fn get_slot(&self, id: &SlotId) -> StoreResult<Option<LessonSlot>> {
        let conn = self.conn()?;
        let slot = conn
            .query_row(
                &format!("SELECT {SLOT_COLUMNS} FROM slots s WHERE s.id = ?1"),
                [id.to_string()],
                slot_from_row,
            )
            .optional()?;
        Ok(slot)
    }

    fn set_slot_available(&self, id: &SlotId, available: bool) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE slots SET is_available = ?1 WHERE id = ?2",
            params![available, id.to_string()],
        )?;
        Ok(changed == 1)
    }

    fn insert_reservation_if_free(&self, reservation: &Reservation) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let overlapping: i64 = tx.query_row(
            r#"
            SELECT COUNT(*) FROM reservations
            WHERE slot_id = ?1
              AND status != 'CANCELED'
              AND booked_start_time < ?3
              AND booked_end_time > ?2
            "#,
            params![
                reservation.slot_id.to_string(),
                ts(&reservation.booked_start_time),
                ts(&reservation.booked_end_time),
            ],
            |row| row.get(0),
        )?;

        if overlapping > 0 {
            debug!(
                slot_id = %reservation.slot_id,
                overlapping,
                "Reservation overlaps an existing booking"
            );
            return Ok(false);
        }

        tx.execute(
            r#"
            INSERT INTO reservations (id, slot_id, student_id, booked_start_time, booked_end_time,
                                      total_amount, currency, status, payment_id, notes,
                                      created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                reservation.id.to_string(),
                reservation.slot_id.to_string(),
                reservation.student_id.as_str(),
                ts(&reservation.booked_start_time),
                ts(&reservation.booked_end_time),
                reservation.total_amount,
                reservation.currency,
                reservation.status.as_str(),
                reservation.payment_id.as_ref().map(|p| p.to_string()),
                reservation.notes,
                ts(&reservation.created_at),
                ts(&reservation.updated_at),
            ],
        )?;
        tx.commit()?;

        debug!(reservation_id = %reservation.id, "Reservation inserted");
        Ok(true)
    }

    fn get_reservation(&self, id: &ReservationId) -> StoreResult<Option<Reservation>> {
        let conn = self.conn()?;
        let reservation = conn
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations r WHERE r.id = ?1"),
                [id.to_string()],
                |row| reservation_from_row(row, 0),
            )
            .optional()?;
        Ok(reservation)
    }

    fn active_reservations_for_slot(&self, slot_id: &SlotId) -> StoreResult<Vec<Reservation>> {
        self.query_reservations(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations r \
                 WHERE r.slot_id = ?1 \
                   AND r.status IN ('PENDING_APPROVAL', 'APPROVED', 'CONFIRMED') \
                 ORDER BY r.booked_start_time"
            ),
            [slot_id.to_string()],
        )
    }

    fn find_student_conflicts(
        &self,
        student_id: &UserId,
        range: &TimeRange,
        exclude: &ReservationId,
    ) -> StoreResult<Vec<Reservation>> {
        self.query_reservations(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations r \
                 WHERE r.student_id = ?1 \
                   AND r.id != ?2 \
                   AND r.status IN ('APPROVED', 'CONFIRMED') \
                   AND r.booked_start_time < ?4 \
                   AND r.booked_end_time > ?3 \
                 ORDER BY r.booked_start_time"
            ),
            params![
                student_id.as_str(),
                exclude.to_string(),
                ts(&range.start),
                ts(&range.end),
            ],
        )
    }

    fn approve_reservation(
        &self,
        id: &ReservationId,
        payment_id: &PaymentId,
        payment_method_ref: &str,
        approval: &Approval,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let at = ts(&approval.approved_at);

        let approved = tx.execute(
            r#"
            UPDATE reservations
            SET status = 'APPROVED', approved_at = ?1, approved_by = ?2, updated_at = ?1
            WHERE id = ?3 AND status = 'PENDING_APPROVAL'
            "#,
            params![at, approval.approved_by.as_str(), id.to_string()],
        )?;
        if approved == 0 {
            return Ok(false);
        }

        let setup = tx.execute(
            r#"
            UPDATE payments
            SET status = 'SETUP_COMPLETED', payment_method_ref = ?1, updated_at = ?2
            WHERE id = ?3 AND reservation_id = ?4 AND status = 'PENDING'
            "#,
            params![payment_method_ref, at, payment_id.to_string(), id.to_string()],
        )?;
        if setup == 0 {
            warn!(reservation_id = %id, payment_id = %payment_id, "Payment not pending, approval rolled back");
            return Ok(false);
        }

        tx.commit()?;
        debug!(reservation_id = %id, "Reservation approved");
        Ok(true)
    }

    fn cancel_reservation(
        &self,
        id: &ReservationId,
        expected: ReservationStatus,
        cancellation: &Cancellation,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let at = ts(&cancellation.canceled_at);

        let canceled = tx.execute(
            r#"
            UPDATE reservations
            SET status = 'CANCELED', canceled_at = ?1, canceled_by = ?2, cancel_reason = ?3,
                cancellation_fee = ?4, cancel_notes = ?5, updated_at = ?1
            WHERE id = ?6 AND status = ?7
            "#,
            params![
                at,
                cancellation.canceled_by.as_str(),
                cancellation.reason.as_str(),
                cancellation.fee,
                cancellation.notes,
                id.to_string(),
                expected.as_str(),
            ],
        )?;
        if canceled == 0 {
            return Ok(false);
        }

        tx.execute(
            r#"
            UPDATE lesson_sessions SET status = 'CANCELED'
            WHERE reservation_id = ?1 AND status IN ('SCHEDULED', 'IN_PROGRESS')
            "#,
            [id.to_string()],
        )?;

        tx.commit()?;
        debug!(reservation_id = %id, from = %expected, "Reservation canceled");
        Ok(true)
    }

    fn complete_reservation(&self, id: &ReservationId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let at = ts(&at);

        let completed = tx.execute(
            r#"
            UPDATE reservations SET status = 'COMPLETED', updated_at = ?1
            WHERE id = ?2 AND status = 'CONFIRMED'
            "#,
            params![at, id.to_string()],
        )?;
        if completed == 0 {
            return Ok(false);
        }

        tx.execute(
            r#"
            UPDATE lesson_sessions SET status = 'COMPLETED', actual_end = ?1
            WHERE reservation_id = ?2 AND status IN ('SCHEDULED', 'IN_PROGRESS')
            "#,
            params![at, id.to_string()],
        )?;

        tx.commit()?;
        debug!(reservation_id = %id, "Reservation completed");
        Ok(true)
    }

    fn find_finished_reservations(&self, now: DateTime<Utc>) -> StoreResult<Vec<ReservationId>> {
        Ok(self
            .query_reservations(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations r \
                     WHERE r.status = 'CONFIRMED' AND r.booked_end_time <= ?1 \
                     ORDER BY r.booked_end_time"
                ),
                [ts(&now)],
            )?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    fn insert_payment(&self, payment: &Payment) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r#"
            INSERT INTO payments (id, reservation_id, amount, currency, status, payment_method_ref,
                                  charge_executed_at, gateway_charge_ref, failure_reason,
                                  refund_amount, refunded_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(reservation_id) DO NOTHING
            "#,
            params![
                payment.id.to_string(),
                payment.reservation_id.to_string(),
                payment.amount,
                payment.currency,
                payment.status.as_str(),
                payment.payment_method_ref,
                opt_ts(&payment.charge_executed_at),
                payment.gateway_charge_ref,
                payment.failure_reason,
                payment.refund_amount,
                opt_ts(&payment.refunded_at),
                ts(&payment.created_at),
                ts(&payment.updated_at),
            ],
        )?;
        if inserted == 0 {
            debug!(reservation_id = %payment.reservation_id, "Payment already exists");
            return Ok(false);
        }

        let linked = tx.execute(
            "UPDATE reservations SET payment_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                payment.id.to_string(),
                ts(&payment.created_at),
                payment.reservation_id.to_string(),
            ],
        )?;
        if linked == 0 {
            return Err(StoreError::NotFound(format!(
                "reservation {}",
                payment.reservation_id
            )));
        }

        tx.commit()?;
        debug!(payment_id = %payment.id, reservation_id = %payment.reservation_id, "Payment inserted");
        Ok(true)
    }

    fn get_payment(&self, id: &PaymentId) -> StoreResult<Option<Payment>> {
        let conn = self.conn()?;
        let payment = conn
            .query_row(
                &format!("SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.id = ?1"),
                [id.to_string()],
                |row| payment_from_row(row, 0),
            )
            .optional()?;
        Ok(payment)
    }

    fn get_payment_for_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> StoreResult<Option<Payment>> {
        let conn = self.conn()?;
        let payment = conn
            .query_row(
                &format!("SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.reservation_id = ?1"),
                [reservation_id.to_string()],
                |row| payment_from_row(row, 0),
            )
            .optional()?;
        Ok(payment)
    }

    fn find_charge_candidates(&self, window: &ChargeWindow) -> StoreResult<Vec<ChargeCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}, {PAYMENT_COLUMNS}
            FROM reservations r
            JOIN payments p ON p.reservation_id = r.id
            WHERE r.status = 'APPROVED'
              AND p.status = 'SETUP_COMPLETED'
              AND p.charge_executed_at IS NULL
              AND r.booked_start_time >= ?1
              AND r.booked_start_time <= ?2
            ORDER BY r.booked_start_time
            "#
        ))?;

        let rows = stmt.query_map(params![ts(&window.start), ts(&window.end)], |row| {
            Ok(ChargeCandidate {
                reservation: reservation_from_row(row, 0)?,
                payment: payment_from_row(row, RESERVATION_COLUMN_COUNT)?,
            })
        })?;

        let candidates = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(
            window_start = %window.start,
            window_end = %window.end,
            count = candidates.len(),
            "Charge candidates scanned"
        );
        Ok(candidates)
    }

    fn claim_charge(&self, payment_id: &PaymentId, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn()?;
        let claimed = conn.execute(
            r#"
            UPDATE payments
            SET charge_executed_at = ?1, updated_at = ?1
            WHERE id = ?2
              AND charge_executed_at IS NULL
              AND status = 'SETUP_COMPLETED'
              AND EXISTS (
                  SELECT 1 FROM reservations r
                  WHERE r.id = payments.reservation_id AND r.status = 'APPROVED'
              )
            "#,
            params![ts(&at), payment_id.to_string()],
        )?;

        debug!(payment_id = %payment_id, claimed = claimed == 1, "Charge claim attempted");
        Ok(claimed == 1)
    }

    fn complete_charge(
        &self,
        payment_id: &PaymentId,
        charge_ref: &str,
        session: &LessonSession,
        at: DateTime<Utc>,
    ) -> StoreResult<ChargeCommit> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let at = ts(&at);

        let charged = tx.execute(
            r#"
            UPDATE payments
            SET status = 'CHARGED', gateway_charge_ref = ?1, updated_at = ?2
            WHERE id = ?3 AND reservation_id = ?4
              AND status = 'SETUP_COMPLETED'
              AND charge_executed_at IS NOT NULL
            "#,
            params![
                charge_ref,
                at,
                payment_id.to_string(),
                session.reservation_id.to_string(),
            ],
        )?;
        if charged == 0 {
            return Ok(ChargeCommit::NotClaimed);
        }

        let confirmed = tx.execute(
            r#"
            UPDATE reservations SET status = 'CONFIRMED', updated_at = ?1
            WHERE id = ?2 AND status = 'APPROVED'
            "#,
            params![at, session.reservation_id.to_string()],
        )?;
        if confirmed == 0 {
            tx.commit()?;
            return Ok(ChargeCommit::ReservationNotApproved);
        }

        tx.execute(
            r#"
            INSERT INTO lesson_sessions (id, reservation_id, scheduled_start, scheduled_end,
                                         actual_start, actual_end, status, notes, feedback)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(reservation_id) DO NOTHING
            "#,
            params![
                session.id.to_string(),
                session.reservation_id.to_string(),
                ts(&session.scheduled_start),
                ts(&session.scheduled_end),
                opt_ts(&session.actual_start),
                opt_ts(&session.actual_end),
                session.status.as_str(),
                session.notes,
                session.feedback,
            ],
        )?;

        tx.commit()?;
        debug!(payment_id = %payment_id, reservation_id = %session.reservation_id, "Charge committed");
        Ok(ChargeCommit::Confirmed)
    }

    fn fail_charge(
        &self,
        payment_id: &PaymentId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let failed = conn.execute(
            r#"
            UPDATE payments
            SET status = 'FAILED', failure_reason = ?1, updated_at = ?2
            WHERE id = ?3 AND status = 'SETUP_COMPLETED' AND charge_executed_at IS NOT NULL
            "#,
            params![reason, ts(&at), payment_id.to_string()],
        )?;
        Ok(failed == 1)
    }

    fn record_refund(
        &self,
        payment_id: &PaymentId,
        amount: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let at = ts(&at);
        let refunded = conn.execute(
            r#"
            UPDATE payments
            SET status = 'REFUNDED', refund_amount = ?1, refunded_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status = 'CHARGED'
            "#,
            params![amount, at, payment_id.to_string()],
        )?;
        Ok(refunded == 1)
    }

    fn get_session_for_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> StoreResult<Option<LessonSession>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM lesson_sessions l WHERE l.reservation_id = ?1"
                ),
                [reservation_id.to_string()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn start_session(
        &self,
        reservation_id: &ReservationId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let started = conn.execute(
            r#"
            UPDATE lesson_sessions SET status = 'IN_PROGRESS', actual_start = ?1
            WHERE reservation_id = ?2 AND status = 'SCHEDULED'
            "#,
            params![ts(&at), reservation_id.to_string()],
        )?;
        Ok(started == 1)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::{Duration, TimeZone};
    use lessonbook_api::{CancelReason, PaymentStatus, SessionStatus};

    fn t(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, h, m, 0).unwrap()
    }

    fn make_slot(store: &SqliteStore) -> LessonSlot {
        let slot = LessonSlot {
            id: SlotId::new(),
            teacher_id: UserId::new("mentor-1"),
            start_time: t(1, 9, 0),
            end_time: t(1, 13, 0),
            hourly_rate: 5000,
            currency: "JPY".into(),
            min_hours: 1,
            max_hours: 3,
            is_available: true,
            created_at: t(1, 0, 0) - Duration::days(20),
        };
        store.insert_slot(&slot).unwrap();
        slot
    }

    fn make_reservation(slot: &LessonSlot, student: &str, start: DateTime<Utc>) -> Reservation {
        let created = t(1, 0, 0) - Duration::days(15);
        Reservation {
            id: ReservationId::new(),
            slot_id: slot.id.clone(),
            student_id: UserId::new(student),
            booked_start_time: start,
            booked_end_time: start + Duration::hours(1),
            total_amount: 5000,
            currency: "JPY".into(),
            status: ReservationStatus::PendingApproval,
            payment_id: None,
            notes: None,
            approval: None,
            cancellation: None,
            created_at: created,
            updated_at: created,
        }
    }

    /// Books and approves a reservation, returning it with its payment
    fn approved(store: &SqliteStore, slot: &LessonSlot, start: DateTime<Utc>) -> (Reservation, Payment) {
        let reservation = make_reservation(slot, "student-1", start);
        assert!(store.insert_reservation_if_free(&reservation).unwrap());

        let payment = Payment::pending_for(&reservation, t(1, 0, 0) - Duration::days(9));
        assert!(store.insert_payment(&payment).unwrap());

        let approval = Approval {
            approved_at: t(1, 0, 0) - Duration::days(9),
            approved_by: slot.teacher_id.clone(),
        };
        assert!(store
            .approve_reservation(&reservation.id, &payment.id, "pm_test", &approval)
            .unwrap());

        (
            store.get_reservation(&reservation.id).unwrap().unwrap(),
            store.get_payment(&payment.id).unwrap().unwrap(),
        )
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::at(AuditEventType::ServiceStarted, t(1, 0, 0)))
            .unwrap();
        store
            .append_audit(AuditEvent::at(AuditEventType::ServiceStopped, t(1, 1, 0)))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, AuditEventType::ServiceStopped));
        assert_eq!(events[1].timestamp, t(1, 0, 0));
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessonbook.db");

        let slot_id = {
            let store = SqliteStore::open(&path).unwrap();
            make_slot(&store).id
        };

        let store = SqliteStore::open(&path).unwrap();
        let slot = store.get_slot(&slot_id).unwrap().unwrap();
        assert_eq!(slot.hourly_rate, 5000);
        assert!(slot.is_available);
    }

    #[test]
    fn test_overlapping_reservation_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);

        let first = make_reservation(&slot, "student-1", t(1, 10, 0));
        assert!(store.insert_reservation_if_free(&first).unwrap());

        let overlapping = make_reservation(&slot, "student-2", t(1, 10, 30));
        assert!(!store.insert_reservation_if_free(&overlapping).unwrap());
        assert!(store.get_reservation(&overlapping.id).unwrap().is_none());

        // Back-to-back is fine
        let adjacent = make_reservation(&slot, "student-2", t(1, 11, 0));
        assert!(store.insert_reservation_if_free(&adjacent).unwrap());

        let active = store.active_reservations_for_slot(&slot.id).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, first.id);
    }

    #[test]
    fn test_canceled_reservation_releases_range() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);

        let first = make_reservation(&slot, "student-1", t(1, 10, 0));
        store.insert_reservation_if_free(&first).unwrap();

        let cancellation = Cancellation {
            canceled_at: t(1, 0, 0) - Duration::days(3),
            canceled_by: UserId::new("student-1"),
            reason: CancelReason::StudentRequest,
            fee: 0,
            notes: Some("schedule change".into()),
        };
        assert!(store
            .cancel_reservation(&first.id, ReservationStatus::PendingApproval, &cancellation)
            .unwrap());

        let stored = store.get_reservation(&first.id).unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Canceled);
        assert_eq!(stored.cancellation, Some(cancellation.clone()));

        // Expected status no longer matches
        assert!(!store
            .cancel_reservation(&first.id, ReservationStatus::PendingApproval, &cancellation)
            .unwrap());

        let again = make_reservation(&slot, "student-2", t(1, 10, 0));
        assert!(store.insert_reservation_if_free(&again).unwrap());
    }

    #[test]
    fn test_second_payment_for_reservation_is_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let reservation = make_reservation(&slot, "student-1", t(1, 10, 0));
        assert!(store.insert_reservation_if_free(&reservation).unwrap());

        let first = Payment::pending_for(&reservation, t(1, 0, 0));
        let second = Payment::pending_for(&reservation, t(1, 0, 0));
        assert!(store.insert_payment(&first).unwrap());
        assert!(!store.insert_payment(&second).unwrap());

        let stored = store.get_payment_for_reservation(&reservation.id).unwrap().unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(
            store.get_reservation(&reservation.id).unwrap().unwrap().payment_id,
            Some(first.id)
        );
    }

    #[test]
    fn test_approval_is_conditional() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (reservation, payment) = approved(&store, &slot, t(1, 10, 0));

        assert_eq!(reservation.status, ReservationStatus::Approved);
        assert_eq!(reservation.payment_id, Some(payment.id.clone()));
        assert_eq!(payment.status, PaymentStatus::SetupCompleted);
        assert_eq!(payment.payment_method_ref.as_deref(), Some("pm_test"));

        let approval = reservation.approval.clone().unwrap();
        assert!(!store
            .approve_reservation(&reservation.id, &payment.id, "pm_other", &approval)
            .unwrap());
    }

    #[test]
    fn test_student_conflicts() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let other_slot = make_slot(&store);
        let (held, _) = approved(&store, &slot, t(1, 10, 0));

        let candidate = make_reservation(&other_slot, "student-1", t(1, 10, 30));
        let conflicts = store
            .find_student_conflicts(&candidate.student_id, &candidate.booked_range(), &candidate.id)
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, held.id);

        // Excluding the held reservation itself
        let conflicts = store
            .find_student_conflicts(&held.student_id, &held.booked_range(), &held.id)
            .unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_charge_candidates_respect_window() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (reservation, _) = approved(&store, &slot, t(1, 10, 0));

        let early = ChargeWindow::around(t(1, 7, 59), Duration::minutes(120), Duration::minutes(5));
        assert!(store.find_charge_candidates(&early).unwrap().is_empty());

        let due = ChargeWindow::around(t(1, 9, 0), Duration::minutes(120), Duration::minutes(5));
        let candidates = store.find_charge_candidates(&due).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reservation.id, reservation.id);

        let late = ChargeWindow::around(t(1, 10, 6), Duration::minutes(120), Duration::minutes(5));
        assert!(store.find_charge_candidates(&late).unwrap().is_empty());
    }

    #[test]
    fn test_claim_is_write_once() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (_, payment) = approved(&store, &slot, t(1, 10, 0));

        assert!(store.claim_charge(&payment.id, t(1, 9, 0)).unwrap());
        assert!(!store.claim_charge(&payment.id, t(1, 9, 1)).unwrap());

        let stored = store.get_payment(&payment.id).unwrap().unwrap();
        assert_eq!(stored.charge_executed_at, Some(t(1, 9, 0)));

        let window = ChargeWindow::around(t(1, 9, 5), Duration::minutes(120), Duration::minutes(5));
        assert!(store.find_charge_candidates(&window).unwrap().is_empty());
    }

    #[test]
    fn test_claim_requires_approved_reservation() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (reservation, payment) = approved(&store, &slot, t(1, 10, 0));

        let cancellation = Cancellation {
            canceled_at: t(1, 8, 0),
            canceled_by: UserId::new("admin"),
            reason: CancelReason::AdminAction,
            fee: 0,
            notes: None,
        };
        store
            .cancel_reservation(&reservation.id, ReservationStatus::Approved, &cancellation)
            .unwrap();

        assert!(!store.claim_charge(&payment.id, t(1, 9, 0)).unwrap());
    }

    #[test]
    fn test_complete_charge_confirms_and_schedules_session() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (reservation, payment) = approved(&store, &slot, t(1, 10, 0));
        let session = LessonSession::scheduled_for(&reservation);

        // Unclaimed payments cannot be completed
        assert_eq!(
            store.complete_charge(&payment.id, "ch_1", &session, t(1, 9, 0)).unwrap(),
            ChargeCommit::NotClaimed
        );

        store.claim_charge(&payment.id, t(1, 9, 0)).unwrap();
        assert_eq!(
            store.complete_charge(&payment.id, "ch_1", &session, t(1, 9, 0)).unwrap(),
            ChargeCommit::Confirmed
        );

        let reservation = store.get_reservation(&reservation.id).unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        let payment = store.get_payment(&payment.id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Charged);
        assert_eq!(payment.gateway_charge_ref.as_deref(), Some("ch_1"));

        let stored_session = store.get_session_for_reservation(&reservation.id).unwrap().unwrap();
        assert_eq!(stored_session.status, SessionStatus::Scheduled);

        assert!(store.start_session(&reservation.id, t(1, 10, 2)).unwrap());
        assert!(!store.start_session(&reservation.id, t(1, 10, 3)).unwrap());

        assert!(store.find_finished_reservations(t(1, 10, 59)).unwrap().is_empty());
        assert_eq!(store.find_finished_reservations(t(1, 11, 0)).unwrap(), vec![reservation.id.clone()]);

        assert!(store.complete_reservation(&reservation.id, t(1, 11, 0)).unwrap());
        let finished = store.get_session_for_reservation(&reservation.id).unwrap().unwrap();
        assert_eq!(finished.status, SessionStatus::Completed);
        assert_eq!(finished.actual_start, Some(t(1, 10, 2)));
        assert_eq!(finished.actual_end, Some(t(1, 11, 0)));
    }

    #[test]
    fn test_charge_after_cancellation_keeps_reservation_canceled() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (reservation, payment) = approved(&store, &slot, t(1, 10, 0));

        store.claim_charge(&payment.id, t(1, 9, 0)).unwrap();
        let cancellation = Cancellation {
            canceled_at: t(1, 9, 0),
            canceled_by: UserId::new("mentor-1"),
            reason: CancelReason::Emergency,
            fee: 0,
            notes: None,
        };
        store
            .cancel_reservation(&reservation.id, ReservationStatus::Approved, &cancellation)
            .unwrap();

        let session = LessonSession::scheduled_for(&reservation);
        assert_eq!(
            store.complete_charge(&payment.id, "ch_2", &session, t(1, 9, 0)).unwrap(),
            ChargeCommit::ReservationNotApproved
        );

        let reservation = store.get_reservation(&reservation.id).unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Canceled);
        assert_eq!(
            store.get_payment(&payment.id).unwrap().unwrap().status,
            PaymentStatus::Charged
        );
        assert!(store.get_session_for_reservation(&reservation.id).unwrap().is_none());

        assert!(store.record_refund(&payment.id, 5000, t(1, 12, 0)).unwrap());
        let refunded = store.get_payment(&payment.id).unwrap().unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(refunded.refund_amount, Some(5000));
        assert!(!store.record_refund(&payment.id, 5000, t(1, 12, 0)).unwrap());
    }

    #[test]
    fn test_failed_charge_keeps_claim() {
        let store = SqliteStore::in_memory().unwrap();
        let slot = make_slot(&store);
        let (reservation, payment) = approved(&store, &slot, t(1, 10, 0));

        // Only claimed payments can fail
        assert!(!store.fail_charge(&payment.id, "declined", t(1, 9, 0)).unwrap());

        store.claim_charge(&payment.id, t(1, 9, 0)).unwrap();
        assert!(store.fail_charge(&payment.id, "declined", t(1, 9, 0)).unwrap());

        let payment = store.get_payment(&payment.id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("declined"));
        assert!(payment.charge_executed_at.is_some());
        assert_eq!(
            store.get_reservation(&reservation.id).unwrap().unwrap().status,
            ReservationStatus::Approved
        );
    }
}
