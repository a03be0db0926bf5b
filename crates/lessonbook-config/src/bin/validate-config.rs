//! Config validation CLI tool
//!
//! Validates a lessonbookd configuration file and reports any errors.

use lessonbook_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a lessonbookd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match lessonbook_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", lessonbook_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", settings.service.data_dir.display());
            println!("  Sweep interval: {}s", settings.service.sweep_interval.as_secs());
            println!(
                "  Charge window: {}m ahead, {}m grace",
                settings.charging.lead_time.num_minutes(),
                settings.charging.grace_period.num_minutes()
            );
            println!("  Gateway timeout: {}s", settings.charging.timeout.as_secs());
            println!("  Policy cutover: {}", settings.charging.policy_cutover.to_rfc3339());
            println!(
                "  Free cancellation: student {}h, mentor {}h",
                settings.cancellation.student_deadline_hours,
                settings.cancellation.mentor_deadline_hours
            );
            println!("  Gateway: {}", settings.gateway.mode.as_str());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                lessonbook_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                lessonbook_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                lessonbook_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                lessonbook_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        lessonbook_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
