//! picosense Device Server
//! Minimal HTTP surface for triggering and watching updates, plus the poll
//! loop that runs a scheduled update when it is due.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::config::ServerConfig;
use crate::engine::updater::{HttpClient, UpdateScheduler};

/// The single scheduler handle. Held for a whole update run, so requests
/// wait while an update is in progress.
pub type SharedScheduler<C> = Arc<Mutex<UpdateScheduler<C>>>;

pub struct ServerState<C> {
    pub scheduler: SharedScheduler<C>,
}

impl<C> Clone for ServerState<C> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
        }
    }
}

pub fn create_router<C>(state: ServerState<C>) -> Router
where
    C: HttpClient + 'static,
{
    Router::new()
        .route("/update", get(request_update::<C>))
        .route("/update/status", get(update_status::<C>))
        .route("/health", get(health_check::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    format: Option<String>,
}

async fn request_update<C: HttpClient + 'static>(State(state): State<ServerState<C>>) -> String {
    let mut scheduler = state.scheduler.lock().await;
    scheduler.request_update().await.to_string()
}

async fn update_status<C: HttpClient + 'static>(
    State(state): State<ServerState<C>>,
    Query(params): Query<StatusParams>,
) -> Response {
    let snapshot = state.scheduler.lock().await.get_status();
    if params.format.as_deref() == Some("json") {
        Json(snapshot).into_response()
    } else {
        snapshot.to_string().into_response()
    }
}

async fn health_check<C: HttpClient + 'static>(State(state): State<ServerState<C>>) -> String {
    let snapshot = state.scheduler.lock().await.get_status();
    format!("ok\nversion: {}\n", snapshot.current_version)
}

/// Run a due update on every tick
pub async fn poll_loop<C: HttpClient>(scheduler: SharedScheduler<C>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        scheduler.lock().await.poll_scheduled().await;
    }
}

/// Serve HTTP and poll the scheduler on the current task until the listener fails
pub async fn run<C>(
    config: &ServerConfig,
    scheduler: SharedScheduler<C>,
    poll_interval: Duration,
) -> std::io::Result<()>
where
    C: HttpClient + 'static,
{
    let app = create_router(ServerState {
        scheduler: scheduler.clone(),
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Device server listening");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => result,
        _ = poll_loop(scheduler, poll_interval) => Ok(()),
    }
}
