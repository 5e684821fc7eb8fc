//! HTTP boundary.
//!
//! Every storage route builds its work through the [`Orchestrator`] and
//! hands the resulting task to one response writer. With `?async` the
//! writer answers `202 Accepted` with the queued task; otherwise it waits up
//! to the configured response timeout and answers with the task's result,
//! its error, or `408 Request Timeout` with the still-running task.
//!
//! | Method   | Path                              | Operation                       |
//! |----------|-----------------------------------|---------------------------------|
//! | `GET`    | `/services`                       | describe services               |
//! | `GET`    | `/services/{service}`             | describe one service            |
//! | `GET`    | `/tasks`                          | list tasks                      |
//! | `GET`    | `/tasks/{id}`                     | inspect a task                  |
//! | `GET`    | `/volumes`                        | volumes of every service        |
//! | `POST`   | `/volumes?detach`                 | detach the caller everywhere    |
//! | `GET`    | `/volumes/{service}`              | volumes of one service          |
//! | `POST`   | `/volumes/{service}`              | create a volume                 |
//! | `POST`   | `/volumes/{service}?detach`       | detach the caller from all      |
//! | `GET`    | `/volumes/{service}/{id}`         | inspect (`?byName` for names)   |
//! | `DELETE` | `/volumes/{service}/{id}`         | remove (`?force`)               |
//! | `POST`   | `/volumes/{service}/{id}?attach`  | attach, also `copy`/`snapshot`/`detach` |
//! | `GET`    | `/snapshots`                      | snapshots of every service      |
//! | `GET`    | `/snapshots/{service}`            | snapshots of one service        |
//! | `GET`    | `/snapshots/{service}/{id}`       | inspect a snapshot              |
//! | `DELETE` | `/snapshots/{service}/{id}`       | remove a snapshot               |
//! | `POST`   | `/snapshots/{service}/{id}?create`| create a volume, also `copy`    |
//!
//! The caller's identity travels in headers: [`USER_HEADER`] names the user,
//! [`INSTANCE_ID_HEADER`] carries `service=instance-id` pairs and
//! [`LOCAL_DEVICES_HEADER`] lists the devices on the caller's instance.

mod handlers;
mod request;
mod response;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;

pub use request::{INSTANCE_ID_HEADER, LOCAL_DEVICES_HEADER, USER_HEADER};

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// How long a synchronous request waits for its task
    pub response_timeout: Duration,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, response_timeout: Duration) -> Self {
        Self {
            orchestrator,
            response_timeout,
        }
    }
}

/// Builds the router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/services", get(handlers::services))
        .route("/services/{service}", get(handlers::service_inspect))
        .route("/tasks", get(handlers::tasks))
        .route("/tasks/{id}", get(handlers::task_inspect))
        .route(
            "/volumes",
            get(handlers::volumes).post(handlers::volumes_action),
        )
        .route(
            "/volumes/{service}",
            get(handlers::volumes_for_service).post(handlers::service_volumes_action),
        )
        .route(
            "/volumes/{service}/{id}",
            get(handlers::volume_inspect)
                .delete(handlers::volume_remove)
                .post(handlers::volume_action),
        )
        .route("/snapshots", get(handlers::snapshots))
        .route(
            "/snapshots/{service}",
            get(handlers::snapshots_for_service),
        )
        .route(
            "/snapshots/{service}/{id}",
            get(handlers::snapshot_inspect)
                .delete(handlers::snapshot_remove)
                .post(handlers::snapshot_action),
        )
        .layer(ServiceBuilder::new().layer(middleware::from_fn(trace_request)))
        .with_state(state)
}

async fn trace_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "handled request"
    );
    response
}

/// Serves `orchestrator` on `config.listen` until Ctrl+C.
pub async fn serve(orchestrator: Orchestrator, config: &ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::new(orchestrator, config.response_timeout()));
    let app = router(state);

    let listener = TcpListener::bind(config.listen.as_str())
        .await
        .with_context(|| format!("cannot listen on {}", config.listen))?;
    tracing::info!(name = %config.name, addr = %listener.local_addr()?, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
