//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub charging: RawChargingConfig,

    #[serde(default)]
    pub cancellation: RawCancellationConfig,

    #[serde(default)]
    pub gateway: RawGatewayConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// How often the scheduler trigger fires
    pub sweep_interval_seconds: Option<u64>,
}

/// Deferred charge settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawChargingConfig {
    pub lead_time_minutes: Option<i64>,
    pub grace_period_minutes: Option<i64>,

    /// Bound on a single gateway call
    pub timeout_seconds: Option<u64>,

    /// RFC 3339 instant separating the legacy and deferred flows
    pub policy_cutover: Option<String>,
}

/// Role deadlines for free cancellation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCancellationConfig {
    pub student_deadline_hours: Option<i64>,
    pub mentor_deadline_hours: Option<i64>,
}

/// Payment gateway selection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGatewayConfig {
    /// Only "sandbox" is built in
    pub mode: Option<String>,

    /// Sandbox: customer refs whose charges are declined
    #[serde(default)]
    pub decline_customers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            config_version = 1

            [service]
            data_dir = "/var/lib/lessonbookd"
            sweep_interval_seconds = 60

            [charging]
            lead_time_minutes = 120
            grace_period_minutes = 5
            timeout_seconds = 10
            policy_cutover = "2025-06-02T15:00:00Z"

            [cancellation]
            student_deadline_hours = 24
            mentor_deadline_hours = 2

            [gateway]
            mode = "sandbox"
            decline_customers = ["student-broke"]
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service.sweep_interval_seconds, Some(60));
        assert_eq!(config.charging.lead_time_minutes, Some(120));
        assert_eq!(config.cancellation.mentor_deadline_hours, Some(2));
        assert_eq!(config.gateway.decline_customers, vec!["student-broke"]);
    }

    #[test]
    fn sections_are_optional() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.service.data_dir.is_none());
        assert!(config.charging.policy_cutover.is_none());
        assert!(config.gateway.mode.is_none());
    }
}
