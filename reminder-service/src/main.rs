use reminder_service::config::ReminderConfig;
use reminder_service::observability::init_tracing;
use reminder_service::services::providers::{EmailProvider, MockEmailProvider, SmtpProvider};
use reminder_service::services::{create_send_pacer, init_metrics, Database};
use reminder_service::startup::{build_router, spawn_sweep_loop, AppState, Stores};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing("info");
    init_metrics();

    let config = ReminderConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to connect to PostgreSQL: {}", e);
        std::io::Error::other(format!("Database connection error: {}", e))
    })?;

    db.run_migrations().await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        std::io::Error::other(format!("Database migration error: {}", e))
    })?;

    let email_provider: Arc<dyn EmailProvider> = if config.smtp.enabled {
        match SmtpProvider::new(config.smtp.clone()) {
            Ok(provider) => {
                tracing::info!("SMTP email provider initialized");
                Arc::new(provider)
            }
            Err(e) => {
                tracing::warn!("Failed to initialize SMTP provider: {}. Using mock.", e);
                Arc::new(MockEmailProvider::new(true))
            }
        }
    } else {
        tracing::info!("SMTP provider disabled, using mock email provider");
        Arc::new(MockEmailProvider::new(true))
    };

    let pacer = create_send_pacer(config.dispatch.sends_per_minute);
    let stores = Stores::from_database(Arc::new(db.clone()));
    let state = AppState::build(
        Some(db),
        stores,
        email_provider,
        pacer,
        config.dispatch.free_plan_reminder_cap,
        config.scheduler.secret.clone(),
    );

    let sweep_handle = if config.scheduler.sweep_interval_secs > 0 {
        tracing::info!(
            interval_secs = config.scheduler.sweep_interval_secs,
            "Background reminder sweep enabled"
        );
        Some(spawn_sweep_loop(
            state.dispatcher.clone(),
            config.scheduler.sweep_interval_secs,
        ))
    } else {
        tracing::info!("Background reminder sweep disabled");
        None
    };

    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;
    tracing::info!("reminder-service listening on port {}", config.common.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweep_handle {
        handle.abort();
    }

    Ok(())
}
