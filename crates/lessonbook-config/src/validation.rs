//! Configuration validation

use crate::schema::RawConfig;
use lessonbook_util::{
    CHARGE_LEAD_TIME_MINUTES, GRACE_PERIOD_MINUTES, MAX_DEADLINE_HOURS, MAX_WINDOW_MINUTES,
    MENTOR_CANCEL_HOURS, STUDENT_CANCEL_HOURS, parse_timestamp,
};
use thiserror::Error;

/// Gateway modes this build can construct
pub const SUPPORTED_GATEWAY_MODES: &[&str] = &["sandbox"];

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("Invalid timestamp '{value}': {message}")]
    InvalidTimestamp { value: String, message: String },

    #[error("Grace period {grace}m must be shorter than lead time {lead}m")]
    GraceExceedsLead { grace: i64, lead: i64 },

    #[error("Mentor deadline {mentor}h exceeds student deadline {student}h")]
    MentorDeadlineExceedsStudent { mentor: i64, student: i64 },

    #[error("Unknown gateway mode: {0}")]
    UnknownGatewayMode(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.service.sweep_interval_seconds == Some(0) {
        errors.push(ValidationError::InvalidValue {
            field: "service.sweep_interval_seconds",
            message: "must be greater than zero".into(),
        });
    }

    let charging = &config.charging;
    let lead = charging.lead_time_minutes.unwrap_or(CHARGE_LEAD_TIME_MINUTES);
    let grace = charging.grace_period_minutes.unwrap_or(GRACE_PERIOD_MINUTES);

    if lead <= 0 {
        errors.push(ValidationError::InvalidValue {
            field: "charging.lead_time_minutes",
            message: "must be greater than zero".into(),
        });
    }
    if grace < 0 {
        errors.push(ValidationError::InvalidValue {
            field: "charging.grace_period_minutes",
            message: "cannot be negative".into(),
        });
    }
    if lead > MAX_WINDOW_MINUTES {
        errors.push(too_large("charging.lead_time_minutes", MAX_WINDOW_MINUTES));
    }
    if grace > MAX_WINDOW_MINUTES {
        errors.push(too_large("charging.grace_period_minutes", MAX_WINDOW_MINUTES));
    }
    if lead > 0 && grace >= lead {
        errors.push(ValidationError::GraceExceedsLead { grace, lead });
    }

    if charging.timeout_seconds == Some(0) {
        errors.push(ValidationError::InvalidValue {
            field: "charging.timeout_seconds",
            message: "must be greater than zero".into(),
        });
    }

    if let Some(cutover) = &charging.policy_cutover
        && let Err(e) = parse_timestamp(cutover)
    {
        errors.push(ValidationError::InvalidTimestamp {
            value: cutover.clone(),
            message: e.to_string(),
        });
    }

    let student = config
        .cancellation
        .student_deadline_hours
        .unwrap_or(STUDENT_CANCEL_HOURS);
    let mentor = config
        .cancellation
        .mentor_deadline_hours
        .unwrap_or(MENTOR_CANCEL_HOURS);

    if student < 0 {
        errors.push(ValidationError::InvalidValue {
            field: "cancellation.student_deadline_hours",
            message: "cannot be negative".into(),
        });
    }
    if mentor < 0 {
        errors.push(ValidationError::InvalidValue {
            field: "cancellation.mentor_deadline_hours",
            message: "cannot be negative".into(),
        });
    }
    if student > MAX_DEADLINE_HOURS {
        errors.push(too_large("cancellation.student_deadline_hours", MAX_DEADLINE_HOURS));
    }
    if mentor > MAX_DEADLINE_HOURS {
        errors.push(too_large("cancellation.mentor_deadline_hours", MAX_DEADLINE_HOURS));
    }
    if mentor > student {
        errors.push(ValidationError::MentorDeadlineExceedsStudent { mentor, student });
    }

    if let Some(mode) = &config.gateway.mode
        && !SUPPORTED_GATEWAY_MODES.contains(&mode.as_str())
    {
        errors.push(ValidationError::UnknownGatewayMode(mode.clone()));
    }

    errors
}

fn too_large(field: &'static str, max: i64) -> ValidationError {
    ValidationError::InvalidValue {
        field,
        message: format!("cannot exceed {}", max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_str: &str) -> RawConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let errors = validate_config(&raw("config_version = 1"));
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn zero_interval_rejected() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [service]
            sweep_interval_seconds = 0
            "#,
        ));
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidValue { field: "service.sweep_interval_seconds", .. }]
        ));
    }

    #[test]
    fn grace_must_be_shorter_than_lead() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [charging]
            lead_time_minutes = 10
            grace_period_minutes = 10
            "#,
        ));
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::GraceExceedsLead { grace: 10, lead: 10 }]
        ));
    }

    #[test]
    fn bad_cutover_rejected() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [charging]
            policy_cutover = "2025-06-03"
            "#,
        ));
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidTimestamp { .. }]
        ));
    }

    #[test]
    fn mentor_deadline_cannot_exceed_student() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [cancellation]
            student_deadline_hours = 12
            mentor_deadline_hours = 48
            "#,
        ));
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::MentorDeadlineExceedsStudent { mentor: 48, student: 12 }]
        ));
    }

    #[test]
    fn oversized_windows_rejected() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [charging]
            lead_time_minutes = 9223372036854775807
            [cancellation]
            student_deadline_hours = 1000000
            "#,
        ));
        assert!(matches!(
            errors.as_slice(),
            [
                ValidationError::InvalidValue { field: "charging.lead_time_minutes", .. },
                ValidationError::InvalidValue { field: "cancellation.student_deadline_hours", .. },
            ]
        ));
    }

    #[test]
    fn unknown_gateway_rejected() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [gateway]
            mode = "stripe"
            "#,
        ));
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::UnknownGatewayMode(mode)] if mode == "stripe"
        ));
    }

    #[test]
    fn errors_accumulate() {
        let errors = validate_config(&raw(
            r#"
            config_version = 1
            [service]
            sweep_interval_seconds = 0
            [charging]
            timeout_seconds = 0
            [gateway]
            mode = "paypal"
            "#,
        ));
        assert_eq!(errors.len(), 3);
    }
}
