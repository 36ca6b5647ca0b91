//! focusd - focus session scheduler and background monitor
//!
//! One binary, two execution contexts that only meet in the session store:
//! - `monitor` / `wake`: the background monitor, promoting and expiring
//!   sessions and driving the enforcer
//! - `schedule` / `cancel` / `stop` / `status`: the foreground controller

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use focus_api::{AppSet, SessionView};
use focus_config::{FocusConfig, load_config_if_present};
use focus_core::{
    AdmissionGuard, BackgroundMonitor, EnforcementOutcome, FocusError, ForegroundController,
    SessionRequest, WakeReport,
};
use focus_host_api::{Enforcer, PolicyFileEnforcer};
use focus_store::{SessionStore, SqliteStore};
use focus_util::{AppId, SessionId, default_config_path, format_datetime_full, format_duration};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Policy file name used when the config does not name one
const DEFAULT_POLICY_FILENAME: &str = "blocklist.json";

/// Log file name inside the configured log directory
const LOG_FILENAME: &str = "focusd.log";

/// focusd - Timed application blocking
#[derive(Parser, Debug)]
#[command(name = "focusd")]
#[command(about = "Schedule focus sessions and enforce their block lists", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/focusd/config.toml)
    #[arg(short, long, env = "FOCUS_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set FOCUS_DATA_DIR env var)
    #[arg(short, long, env = "FOCUS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Append logs to focusd.log in the configured log directory instead of stderr
    #[arg(long)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background monitor until SIGTERM/SIGINT; SIGHUP or SIGUSR1
    /// trigger an immediate wake
    Monitor,

    /// Run a single monitor wake and exit (for cron or systemd timers)
    Wake,

    /// Schedule a new focus session
    Schedule {
        /// Start time as RFC 3339 (default: now)
        #[arg(long, value_parser = parse_start, conflicts_with = "start_in")]
        at: Option<DateTime<Local>>,

        /// Start this many seconds from now
        #[arg(long)]
        start_in: Option<u64>,

        /// Session length in seconds
        #[arg(long)]
        duration: u64,

        /// Application to block (repeatable)
        #[arg(long = "app", required = true)]
        apps: Vec<String>,
    },

    /// Cancel a scheduled session
    Cancel {
        id: SessionId,
    },

    /// Stop the active session (or the given one, failing if it is not active)
    Stop {
        id: Option<SessionId>,
    },

    /// Show scheduled and active sessions
    Status {
        /// Print the session documents as JSON
        #[arg(long)]
        json: bool,

        /// Also show this many recent audit events
        #[arg(long, default_value_t = 0)]
        audit: usize,
    },
}

fn parse_start(s: &str) -> Result<DateTime<Local>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

/// Shared wiring for both execution contexts
struct Service {
    config: FocusConfig,
    store: Arc<dyn SessionStore>,
    enforcer: Arc<dyn Enforcer>,
}

impl Service {
    fn new(args: &Args, mut config: FocusConfig) -> Result<Self> {
        if let Some(data_dir) = &args.data_dir {
            config.service.data_dir = data_dir.clone();
        }

        let data_dir = config.service.data_dir.clone();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = config.service.store_path();
        let store: Arc<dyn SessionStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let policy_path = config
            .enforcement
            .policy_file
            .clone()
            .unwrap_or_else(|| data_dir.join(DEFAULT_POLICY_FILENAME));
        let enforcer: Arc<dyn Enforcer> = Arc::new(PolicyFileEnforcer::new(&policy_path));

        info!(policy_path = %policy_path.display(), "Enforcer initialized");

        Ok(Self {
            config,
            store,
            enforcer,
        })
    }

    fn monitor(&self) -> BackgroundMonitor {
        BackgroundMonitor::new(self.store.clone(), self.enforcer.clone())
    }

    fn controller(&self) -> ForegroundController {
        let guard =
            AdmissionGuard::with_store_quota(self.store.clone(), self.config.admission.clone());
        ForegroundController::new(
            self.store.clone(),
            guard,
            self.enforcer.clone(),
            &self.config.controller,
        )
    }

    async fn run_monitor(&self) -> Result<()> {
        let monitor = self.monitor();
        monitor.announce_started();

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).context("Failed to create SIGUSR1 handler")?;

        let wake_interval = self.config.monitor.wake_interval;
        let mut timer = tokio::time::interval(wake_interval);
        // Ticks missed while suspended collapse into one wake
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            wake_interval_secs = wake_interval.as_secs(),
            "Monitor running"
        );

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, waking");
                    wake_once(&monitor).await;
                }
                _ = sigusr1.recv() => {
                    info!("Received SIGUSR1, waking");
                    wake_once(&monitor).await;
                }
                _ = timer.tick() => {
                    wake_once(&monitor).await;
                }
            }
        }

        monitor.announce_stopped();
        info!("Shutdown complete");
        Ok(())
    }
}

/// Run one wake inside the long-running loop; errors are logged and the
/// next tick tries again.
async fn wake_once(monitor: &BackgroundMonitor) {
    match monitor.on_wake(focus_util::now()).await {
        Ok(report) => log_report(&report),
        Err(e) => error!(error = %e, "Wake failed"),
    }
}

fn log_report(report: &WakeReport) {
    if report.is_noop() {
        return;
    }
    info!(
        expired = ?report.expired,
        promoted = ?report.promoted,
        deferred = report.deferred.len(),
        enforcement = ?report.enforcement,
        "Wake complete"
    );
}

fn print_view(view: &SessionView, now: DateTime<Local>) {
    match &view.active {
        Some(active) => println!(
            "Active:    {}  blocking {}  ({} remaining, ends {})",
            active.id,
            join_apps(&active.blocked_app_set),
            format_duration(active.time_remaining(now)),
            format_datetime_full(&active.ends_at()),
        ),
        None => println!("Active:    none"),
    }

    if view.scheduled.is_empty() {
        println!("Scheduled: none");
    }
    for session in &view.scheduled {
        println!(
            "Scheduled: {}  blocking {}  at {} for {}",
            session.id,
            join_apps(&session.blocked_app_set),
            format_datetime_full(&session.scheduled_start_time),
            format_duration(session.duration),
        );
    }
}

fn join_apps(apps: &AppSet) -> String {
    apps.iter().map(AppId::as_str).collect::<Vec<_>>().join(", ")
}

fn print_enforcement(outcome: &EnforcementOutcome) {
    if let EnforcementOutcome::Failed(e) = outcome {
        warn!(error = %e, "Block list not released yet; the monitor will retry");
        println!("Warning: block list release failed ({}); will retry", e);
    }
}

async fn run(args: Args, config: FocusConfig) -> Result<()> {
    let service = Service::new(&args, config)?;
    let now = focus_util::now();

    match args.command {
        Command::Monitor => service.run_monitor().await?,

        Command::Wake => {
            let report = service
                .monitor()
                .on_wake(now)
                .await
                .context("Wake failed")?;
            log_report(&report);
            if let Some(id) = report.expired {
                println!("Expired {}", id);
            }
            if let Some(id) = report.promoted {
                println!("Started {}", id);
            }
        }

        Command::Schedule {
            at,
            start_in,
            duration,
            apps,
        } => {
            let start = match (at, start_in) {
                (Some(at), _) => at,
                (None, Some(secs)) => focus_util::add_duration(now, Duration::from_secs(secs)),
                (None, None) => now,
            };
            let request = SessionRequest {
                start,
                duration: Duration::from_secs(duration),
                apps: apps.into_iter().map(AppId::new).collect(),
            };

            match service.controller().create_session(request, now) {
                Ok(session) => println!(
                    "Scheduled {} at {}",
                    session.id,
                    format_datetime_full(&session.scheduled_start_time)
                ),
                Err(FocusError::AdmissionDenied(reasons)) => {
                    for reason in &reasons {
                        println!("Denied: {}", reason);
                    }
                    bail!("session not admitted");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Command::Cancel { id } => {
            service
                .controller()
                .cancel_session(&id, now)
                .with_context(|| format!("Failed to cancel {}", id))?;
            println!("Cancelled {}", id);
        }

        Command::Stop { id } => {
            let mut controller = service.controller();
            let id = match id {
                Some(id) => id,
                None => match &controller.reload(now)?.active {
                    Some(active) => active.id,
                    None => bail!("no session is active"),
                },
            };

            let report = controller
                .stop_session(&id, now)
                .await
                .with_context(|| format!("Failed to stop {}", id))?;
            println!("Stopped {}", report.ended.session.id);
            print_enforcement(&report.enforcement);
        }

        Command::Status { json, audit } => {
            let mut controller = service.controller();
            let view = controller.on_foreground(now)?;

            if json {
                let snapshot = focus_api::SessionSnapshot {
                    scheduled: view.scheduled.clone(),
                    active: view.active.clone(),
                };
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_view(view, now);
            }

            if audit > 0 {
                for event in service.store.recent_audits(audit)? {
                    println!(
                        "{}  {}",
                        format_datetime_full(&event.timestamp),
                        serde_json::to_string(&event.event)?
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Args, log_dir: &Path) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let writer = if args.log_to_file {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
        let path = log_dir.join(LOG_FILENAME);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        BoxMakeWriter::new(Mutex::new(file))
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(!args.log_to_file)
            .with_writer(writer)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = load_config_if_present(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    let defaulted = loaded.is_none();
    let config = loaded.unwrap_or_default();

    // Fallback is reported once logging is up
    init_logging(&args, &config.service.log_dir)?;

    info!(version = env!("CARGO_PKG_VERSION"), "focusd starting");
    if defaulted {
        info!(path = %args.config.display(), "No config file, using defaults");
    }
    if focus_util::is_mock_time_active() {
        warn!(now = %focus_util::now(), "Mock time active");
    }

    run(args, config).await
}
