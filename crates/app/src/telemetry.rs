use std::{
    fmt::Write as _,
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{counter, describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
    EnvFilter,
};

use therapy_log_core::types::UserRole;
use therapy_log_util::{AppConfig, Environment};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to install prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

const COUNTERS: &[(&str, &str)] = &[
    ("auth_login_total", "Login attempts by role and result"),
    ("accounts_registered_total", "Accounts created by role and origin"),
    ("children_created_total", "Child profiles created by doctors"),
    ("therapy_logs_created_total", "Therapy sessions recorded"),
    ("reports_generated_total", "Progress reports generated by kind"),
    ("mailer_messages_total", "Outgoing messages by kind and delivery result"),
];

static TRACING_READY: OnceLock<()> = OnceLock::new();
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_INSTALL: Mutex<()> = Mutex::new(());
static PROCESS_START: OnceLock<Instant> = OnceLock::new();

fn git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Installs the global subscriber: JSON lines in production, pretty output
/// elsewhere. `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_READY.get().is_some() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::rfc_3339());
    let registry = tracing_subscriber::registry().with(filter);
    if config.environment == Environment::Production {
        registry.with(layer.json()).try_init()?;
    } else {
        registry.with(layer.pretty()).try_init()?;
    }
    TRACING_READY.get_or_init(|| ());

    tracing::info!(
        stage = "telemetry",
        env = config.environment.as_str(),
        version = VERSION,
        git_sha = git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let _install = METRICS_INSTALL
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_gauge!("app_build_info", "Version and git revision of the running binary");
    describe_gauge!("app_uptime_seconds", "Seconds since metrics were installed");
    for &(name, help) in COUNTERS {
        describe_counter!(name, help);
    }
    PROCESS_START.get_or_init(Instant::now);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Recorder output followed by the build info and uptime gauges.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    let uptime = PROCESS_START
        .get()
        .map_or(0.0, |start| start.elapsed().as_secs_f64());
    let _ = writeln!(body, "# TYPE app_build_info gauge");
    let _ = writeln!(
        body,
        "app_build_info{{version=\"{}\",git_sha=\"{}\"}} 1",
        VERSION,
        git_sha()
    );
    let _ = writeln!(body, "# TYPE app_uptime_seconds gauge");
    let _ = writeln!(body, "app_uptime_seconds {uptime}");
    body
}

pub fn record_login(role: UserRole, result: &'static str) {
    counter!("auth_login_total", "role" => role.as_str(), "result" => result).increment(1);
}

pub fn record_registration(role: UserRole, origin: &'static str) {
    counter!("accounts_registered_total", "role" => role.as_str(), "origin" => origin)
        .increment(1);
}

pub fn record_child_created() {
    counter!("children_created_total").increment(1);
}

pub fn record_therapy_log() {
    counter!("therapy_logs_created_total").increment(1);
}

pub fn record_report(kind: &'static str) {
    counter!("reports_generated_total", "kind" => kind).increment(1);
}

pub fn record_mail(kind: &'static str, result: &'static str) {
    counter!("mailer_messages_total", "kind" => kind, "result" => result).increment(1);
}
