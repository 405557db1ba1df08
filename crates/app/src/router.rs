use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use therapy_log_storage::Database;

use crate::auth::{PasswordHasher, TokenIssuer};
use crate::mailer::{LogMailer, Mailer};
use crate::{accounts, child, doctor, parent, reports, telemetry, therapy};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    tokens: TokenIssuer,
    passwords: PasswordHasher,
    mailer: Arc<dyn Mailer>,
    clock: Clock,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        tokens: TokenIssuer,
        passwords: PasswordHasher,
    ) -> Self {
        Self {
            metrics,
            storage,
            tokens,
            passwords,
            mailer: Arc::new(LogMailer),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn passwords(&self) -> &PasswordHasher {
        &self.passwords
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/login", post(accounts::login))
        .route("/auth/register/doctor", post(accounts::register_doctor))
        .route("/auth/register/parent", post(accounts::register_parent))
        .route("/doctor/create-child", post(doctor::create_child))
        .route("/doctor/children", get(doctor::children))
        .route("/doctor/dashboard-stats", get(doctor::dashboard_stats))
        .route("/doctor/profile", get(doctor::profile))
        .route("/therapy/add-log", post(therapy::add_log))
        .route("/therapy/session/:session_id", get(therapy::session))
        .route("/therapy/logs/:child_id", get(therapy::logs))
        .route("/reports/weekly/:child_id", get(reports::weekly))
        .route("/reports/weekly/:child_id/notify", post(reports::notify_weekly))
        .route("/reports/monthly/:child_id", get(reports::monthly))
        .route("/parent/children", get(parent::children))
        .route("/parent/dashboard-stats", get(parent::dashboard_stats))
        .route("/parent/profile", get(parent::profile))
        .route("/parent/link-child", post(parent::link_child))
        .route("/child/verify-code", post(child::verify_code))
        .route("/child/:child_id", get(child::details));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .nest("/api", api)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
