//! craftrelay binary entrypoint wiring the ingress listener, console pool and admin surface.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use craftrelay::{
    config::AppConfig,
    dao::file_store::YamlDirStore,
    routes,
    state::{AppState, SharedState},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = AppConfig::load();
    let store = Arc::new(YamlDirStore::new(settings.data_dir.clone()));
    let (state, events) = AppState::bootstrap(settings.clone(), store)
        .await
        .context("loading configuration")?;

    let flusher = state.cache().clone().spawn_flusher(settings.flush_interval);
    let ingress = state.config().current().ingress.clone();
    state
        .registry()
        .start(&ingress)
        .await
        .context("starting ingress listener")?;
    let dispatcher = state.notifier().clone().spawn(events);

    let app = build_router(state.clone());
    info!(addr = %settings.admin_addr, "starting admin server");
    let listener = TcpListener::bind(settings.admin_addr)
        .await
        .context("binding admin server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    shutdown(&state, flusher, dispatcher).await;
    Ok(())
}

/// Stop accepting game servers, drop console links and persist everything queued.
async fn shutdown(state: &SharedState, flusher: JoinHandle<()>, dispatcher: JoinHandle<()>) {
    info!("shutting down");
    state.registry().stop().await;
    state.pool().disconnect_all().await;
    flusher.abort();
    dispatcher.abort();

    let report = state.cache().force_flush().await;
    if report.failed > 0 {
        warn!(failed = report.failed, "some files could not be written on shutdown");
    }
    info!(written = report.written, "shutdown complete");
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
