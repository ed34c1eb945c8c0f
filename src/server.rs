//! `/metrics` listener. Each request runs one blocking scrape pass.

use crate::client::HomesApi;
use crate::emit::render_down;
use crate::exporter::Exporter;
use crate::exposition::{CONTENT_TYPE, encode};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct AppState<A> {
    pub exporter: Arc<Exporter<A>>,
    pub scrape_timeout: Duration,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        AppState {
            exporter: Arc::clone(&self.exporter),
            scrape_timeout: self.scrape_timeout,
        }
    }
}

pub fn router<A>(state: AppState<A>) -> Router
where
    A: HomesApi + Send + Sync + 'static,
{
    Router::new()
        .route("/metrics", get(metrics::<A>))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve<A, F>(listener: TcpListener, state: AppState<A>, shutdown: F) -> std::io::Result<()>
where
    A: HomesApi + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Serving metrics on http://{}/metrics", addr);
    }
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

fn exposition(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

fn down(status: StatusCode) -> Response {
    match encode(&render_down()) {
        Ok(body) => exposition(status, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn metrics<A>(State(state): State<AppState<A>>) -> Response
where
    A: HomesApi + Send + Sync + 'static,
{
    let exporter = Arc::clone(&state.exporter);
    let wait = state.scrape_timeout;
    let pass = tokio::task::spawn_blocking(move || exporter.try_scrape_text(Utc::now(), wait));

    match tokio::time::timeout(state.scrape_timeout, pass).await {
        Ok(Ok(Some(Ok(body)))) => exposition(StatusCode::OK, body),
        Ok(Ok(Some(Err(e)))) => {
            error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Ok(Ok(None)) => {
            warn!("Previous scrape still running after {}s; skipping this one", wait.as_secs());
            down(StatusCode::OK)
        }
        Ok(Err(e)) => {
            error!("Scrape task failed: {}", e);
            down(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_) => {
            // The pass keeps running and holds the cache until it finishes;
            // later passes wait for it at most one timeout.
            warn!("Scrape exceeded {}s timeout", wait.as_secs());
            down(StatusCode::OK)
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}
