mod accounts;
mod auth;
mod child;
mod doctor;
mod mailer;
mod parent;
mod problem;
mod reports;
mod router;
mod telemetry;
#[cfg(test)]
mod test_support;
mod therapy;

use std::net::SocketAddr;

use tracing::info;
use therapy_log_storage::Database;
use therapy_log_util::{load_env_file, AppConfig};

use crate::auth::{PasswordHasher, TokenIssuer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;
    if let Some(path) = env_file {
        info!(stage = "app", path = %path.display(), "loaded environment file");
    }

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "app", database = %config.database_url, "database ready");

    let state = router::AppState::new(
        metrics,
        database,
        TokenIssuer::new(&config.jwt_secret, config.token_ttl_minutes),
        PasswordHasher::new(config.bcrypt_cost),
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
