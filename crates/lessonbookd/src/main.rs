//! lessonbookd - The lessonbook background service
//!
//! This is the main entry point for the lessonbook service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Payment gateway and notifier
//! - Reservation engine
//! - The periodic deferred charge sweep

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lessonbook_api::ActorRole;
use lessonbook_config::{GatewayMode, Settings, load_config};
use lessonbook_core::{CancellationPolicy, ReservationEngine};
use lessonbook_gateway_api::{LogNotifier, PaymentGateway, SandboxGateway};
use lessonbook_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use lessonbook_util::{
    DATABASE_FILENAME, default_config_path, is_mock_time_active, parse_timestamp,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// lessonbookd - Lesson reservations with deferred payment capture
#[derive(Parser, Debug)]
#[command(name = "lessonbookd")]
#[command(about = "Lesson reservations with deferred payment capture", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/lessonbook/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set LESSONBOOK_DATA_DIR env var)
    #[arg(short, long, env = "LESSONBOOK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service loop (default)
    Run,

    /// Run a single deferred charge sweep and exit
    Sweep {
        /// Sweep as of this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Print recent audit events as JSON lines, newest first
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the cancellation rules for every role
    Policy,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Main service state
struct Service {
    engine: Arc<ReservationEngine>,
    store: Arc<dyn Store>,
    sweep_interval: Duration,
}

impl Service {
    fn new(args: &Args, settings: &Settings) -> Result<Self> {
        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let gateway: Arc<dyn PaymentGateway> = match settings.gateway.mode {
            GatewayMode::Sandbox => {
                warn!("Sandbox gateway in use; no real funds move");
                Arc::new(SandboxGateway::with_declines(
                    settings.gateway.decline_customers.iter().cloned(),
                ))
            }
        };

        let engine = ReservationEngine::new(settings, store.clone(), gateway, Arc::new(LogNotifier));

        Ok(Self {
            engine: Arc::new(engine),
            store,
            sweep_interval: settings.service.sweep_interval,
        })
    }

    async fn run(self) -> Result<()> {
        self.store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
                sweep_interval_secs: self.sweep_interval.as_secs(),
            }));

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        // First tick fires immediately
        let mut sweep_timer = tokio::time::interval(self.sweep_interval);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Service running"
        );

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                // Sweeps run inline, so two never overlap in this process
                _ = sweep_timer.tick() => {
                    self.tick().await;
                }
            }
        }

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped));
        info!("Service stopped");

        Ok(())
    }

    async fn tick(&self) {
        if !self.store.is_healthy() {
            error!("Store unhealthy, skipping sweep");
            return;
        }

        let now = lessonbook_util::now();
        match self.engine.run_deferred_charge_sweep(now).await {
            Ok(report) if report.failed > 0 || report.errors > 0 => {
                warn!(
                    failed = report.failed,
                    errors = report.errors,
                    "Sweep finished with charges needing operator attention"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, kind = ?e.kind(), "Deferred charge sweep failed"),
        }

        if let Err(e) = self.engine.complete_finished_lessons(now) {
            error!(error = %e, "Lesson completion pass failed");
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_settings(args: &Args) -> Result<Settings> {
    if !args.config.exists() {
        warn!(
            config_path = %args.config.display(),
            "Config file not found, using defaults"
        );
        return Ok(Settings::default());
    }

    let settings = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    info!(
        config_path = %args.config.display(),
        policy_cutover = %settings.charging.policy_cutover,
        "Configuration loaded"
    );
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "lessonbookd starting");
    if is_mock_time_active() {
        warn!(now = %lessonbook_util::now(), "Mock time is active");
    }

    let settings = load_settings(&args)?;

    match args.command {
        None | Some(Command::Run) => {
            let service = Service::new(&args, &settings)?;
            service.run().await
        }
        Some(Command::Sweep { ref at }) => {
            let now = match at {
                Some(at) => parse_timestamp(at).context("Invalid --at timestamp")?,
                None => lessonbook_util::now(),
            };
            let service = Service::new(&args, &settings)?;
            let report = service
                .engine
                .run_deferred_charge_sweep(now)
                .await
                .context("Sweep failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Command::Audit { limit }) => {
            let service = Service::new(&args, &settings)?;
            for event in service.store.get_recent_audits(limit)? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Some(Command::Policy) => {
            let policy = CancellationPolicy::new(settings.cancellation);
            let details: Vec<_> = [ActorRole::Student, ActorRole::Mentor, ActorRole::Admin]
                .into_iter()
                .map(|role| policy.policy_details(role))
                .collect();
            println!("{}", serde_json::to_string_pretty(&details)?);
            println!(
                "Lessons starting after {} use deferred charging",
                settings.charging.policy_cutover
            );
            Ok(())
        }
    }
}
