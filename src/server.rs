use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::Instrument;

use crate::terraform::{InvokeError, Operation, Workspace};

#[derive(Clone)]
pub struct AppState {
    workspace: Workspace,
}

impl AppState {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for InvokeError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// Routes:
/// - `POST /api/terraform/init`
/// - `POST /api/terraform/apply`
/// - `POST /api/terraform/destroy`
/// - `GET  /healthz`
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/terraform", terraform_router())
        .route("/healthz", get(healthz_handler))
        .layer(middleware::from_fn(request_tracing))
        .with_state(state)
}

fn terraform_router() -> Router<AppState> {
    Router::new()
        .route("/init", post(init_handler))
        .route("/apply", post(apply_handler))
        .route("/destroy", post(destroy_handler))
}

async fn init_handler(State(state): State<AppState>) -> Response {
    run_operation(&state, Operation::Init).await
}

async fn apply_handler(State(state): State<AppState>) -> Response {
    run_operation(&state, Operation::Apply).await
}

async fn destroy_handler(State(state): State<AppState>) -> Response {
    run_operation(&state, Operation::Destroy).await
}

/// Output of a successful run is logged by the workspace and never sent back.
async fn run_operation(state: &AppState, op: Operation) -> Response {
    match state.workspace.invoke(op).await {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageBody {
                message: op.success_message(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn request_tracing(request: Request<Body>, next: Next) -> Response {
    let span = tracing::info_span!(
        "http.request",
        method = %request.method(),
        route = %request.uri().path(),
    );
    async move {
        let response = next.run(request).await;
        tracing::info!(status = response.status().as_u16(), "request finished");
        response
    }
    .instrument(span)
    .await
}

pub async fn serve(bind: SocketAddr, workspace: Workspace) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!(
        dir = %workspace.dir().display(),
        binary = workspace.binary(),
        "terraform-manager listening on {}",
        bind
    );
    axum::serve(listener, build_router(AppState::new(workspace)))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server failed")
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received, draining requests");
}
