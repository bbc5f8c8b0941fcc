//! HTTP API: credential issuance and admin actions, plus health and metrics.
//!
//! Authentication failures are answered with 200 and `{success:false,error}`;
//! only authorization failures (non-admin token on an admin route) get 403.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::session::Session;
use crate::auth::{AuthError, AuthService};
use crate::metrics::Metrics;
use crate::world::WorldHandle;

/// Reason sent to every client kicked by a nuke
pub const NUKE_REASON: &str = "World reset by admin";

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub world: WorldHandle,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub invite: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn session(session: &Session) -> Self {
        Self {
            success: true,
            token: Some(session.token.to_string()),
            name: Some(session.name.clone()),
            color: Some(session.color.clone()),
            ..Default::default()
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = if self.is_authorization() {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::OK
        };
        (status, Json(ApiResponse::error(self.to_string()))).into_response()
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .route("/metrics/json", get(metrics_json))
        .route("/api/login", post(login))
        .route("/api/join", post(join))
        .route("/api/generate-invite", post(generate_invite))
        .route("/api/nuke", post(nuke))
        .with_state(state)
}

/// Serve the API on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on http://{}", addr);
    }
    axum::serve(listener, router(state)).await
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse>, AuthError> {
    let session = state.auth.login(&req.password, &req.name).await?;
    Ok(Json(ApiResponse::session(&session)))
}

async fn join(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<ApiResponse>, AuthError> {
    let session = state.auth.join(req.invite.trim(), &req.name)?;
    Ok(Json(ApiResponse::session(&session)))
}

async fn generate_invite(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<ApiResponse>, AuthError> {
    let code = state.auth.generate_invite(&req.token)?;
    Ok(Json(ApiResponse {
        success: true,
        code: Some(code),
        ..Default::default()
    }))
}

async fn nuke(State(state): State<AppState>, Json(req): Json<TokenRequest>) -> Response {
    let summary = match state.auth.nuke(&req.token) {
        Ok(summary) => summary,
        Err(e) => return e.into_response(),
    };

    match state.world.reset(NUKE_REASON).await {
        Ok(kicked) => {
            info!(
                "World reset: {} connections closed, {} invites cleared",
                kicked, summary.invites_cleared
            );
            Json(ApiResponse::ok()).into_response()
        }
        Err(e) => {
            warn!("Nuke could not reset the world: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("World unavailable")),
            )
                .into_response()
        }
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.metrics.uptime_seconds(),
    }))
}

async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

async fn metrics_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
