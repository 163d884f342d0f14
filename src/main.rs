//! Auth service entry point

use auth_service::{
    config::AppConfig, db, handlers::health, middleware::AppState, routes, telemetry,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("auth-service {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // Production sets real environment variables; .env files are a development convenience.
    if let Ok(name) = std::env::var("AUTH_ENV") {
        dotenv::from_filename(format!(".env.{}", name)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Auth service starting...");

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    let addr = config.listen_addr();
    let shutdown_timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    let purge_interval = Duration::from_secs(config.http.token_purge_interval_secs);

    let metrics_handle = telemetry::init_metrics()?;
    let app_state = Arc::new(AppState::new(config, db_pool)?.with_metrics(metrics_handle));
    let purge_task = spawn_purge_task(app_state.clone(), purge_interval);

    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&addr).await?;
    let port = listener.local_addr()?.port();

    tracing::info!(addr = %addr, "✅ Auth service running on port {}", port);

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stopping_tx.send(true);
    })
    .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = stopping_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        }
    }

    purge_task.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Periodically delete expired refresh tokens and login events past retention
fn spawn_purge_task(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match state.auth_service.purge_expired_tokens().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired refresh tokens"),
                Err(e) => tracing::warn!(error = %e, "Refresh token purge failed"),
            }
            match state.auth_service.purge_old_login_events().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged old login events"),
                Err(e) => tracing::warn!(error = %e, "Login event purge failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

fn print_help() {
    println!("auth-service {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: auth-service [OPTION]");
    println!();
    println!("Options:");
    println!("  --version     Print version information and exit");
    println!("  --help        Print this help and exit");
    println!();
    println!("Environment:");
    println!("  PORT                       Listen port (default 5001)");
    println!("  DATABASE_URL               PostgreSQL connection URL");
    println!("  AUTH_SECURITY__JWT_SECRET  Token signing secret, required (min 32 chars)");
    println!("  AUTH_SECURITY__TRUST_PROXY Take client IP from X-Forwarded-For (default false)");
    println!("  AUTH_HTTP__ALLOWED_ORIGINS Comma separated CORS origins (default: any)");
    println!("  AUTH_ENV                   Load .env.<AUTH_ENV> instead of .env");
    println!("  RUST_LOG                   Log filter override");
}
