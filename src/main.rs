use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use curio_auth::config::{AuthConfig, Environment};
use curio_auth::services::{AuthStore, Database, EmailService};
use curio_auth::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AuthConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    init_tracing(&config);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting"
    );

    if config.token_encryption_key.is_none() {
        // validate() already refuses this in prod; dev gets a loud warning.
        tracing::warn!(
            "TOKEN_ENCRYPTION_KEY not set; provider tokens will be stored in clear text"
        );
    }

    let database = Database::connect(&config.database_url).await?;
    let store: Arc<dyn AuthStore> = Arc::new(database);
    let email = Arc::new(EmailService::new(&config.smtp)?);

    let port = config.port;
    let sweep = config.sweep.clone();
    let state = AppState::build(config, Arc::clone(&store), email)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tokio::spawn(sweep_loop(Arc::clone(&store), sweep));

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

fn init_tracing(config: &AuthConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.environment == Environment::Prod {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Periodic cleanup: dead reset tokens and attempt rows past retention.
async fn sweep_loop(store: Arc<dyn AuthStore>, config: curio_auth::config::SweepConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let now = Utc::now();

        match store.delete_dead_reset_tokens(now).await {
            Ok(n) if n > 0 => tracing::info!(deleted = n, "Swept dead reset tokens"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Reset token sweep failed"),
        }

        let cutoff = now - chrono::Duration::days(config.attempt_retention_days);
        match store.delete_attempts_before(cutoff).await {
            Ok(n) if n > 0 => tracing::info!(deleted = n, "Swept old login attempts"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Login attempt sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
