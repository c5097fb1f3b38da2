//! Axum handlers for the four core endpoints (spec §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::application::ports::ContainerEngine;
use crate::application::session_engine::{self, RunParams, StartSessionParams};
use crate::error::{Result, SandboxError};
use crate::http::schemas::{
    HealthResponse, RunRequest, RunResponse, RunResultDto, StartSessionRequest, StartSessionResponse,
    VersionResponse,
};
use crate::infra::bollard_engine::BollardEngine;

pub struct AppState {
    pub engine: BollardEngine,
    pub config: crate::config::Settings,
}

/// Rejects requests whose `X-API-Key` header does not match the configured
/// secret. Applied as middleware ahead of every `/api/v1/*` route.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    if provided == Some(state.config.api_key.as_str()) {
        next.run(request).await
    } else {
        SandboxError::Unauthorized.into_response()
    }
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartSessionRequest>,
) -> Result<impl IntoResponse> {
    let params = StartSessionParams {
        base_image: body.base_image,
        extract_patch: body.extract_patch,
        ephemeral: body.ephemeral,
        network_enabled: body.network_enabled,
        environment: body.environment.into_iter().collect(),
        memory_bytes: body.memory_bytes,
        cpus: body.cpus,
    };
    let session_id = session_engine::start_session(&state.engine, &state.config, params).await?;
    Ok(Json(StartSessionResponse { session_id }))
}

pub async fn run_on_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<RunRequest>,
) -> Result<impl IntoResponse> {
    let archive = body
        .archive
        .map(|encoded| {
            BASE64
                .decode(encoded)
                .map_err(|e| SandboxError::InvalidInput(format!("archive is not valid base64: {e}")))
        })
        .transpose()?;

    let params = RunParams { commands: body.commands, archive, fail_fast: body.fail_fast, workdir: body.workdir };

    let outcome = session_engine::run_on_session(&state.engine, &state.config, &session_id, params).await?;

    let results = outcome
        .results
        .into_iter()
        .map(|r| RunResultDto { command: r.command, output: r.output, exit_code: r.exit_code })
        .collect();
    let patch = outcome.patch.map(|bytes| BASE64.encode(bytes));

    Ok(Json(RunResponse { results, patch }))
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse> {
    session_engine::close_session(&state.engine, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.engine.ping().await {
        (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
    } else {
        SandboxError::EngineUnavailable.into_response()
    }
}

pub async fn version() -> impl IntoResponse {
    Json(VersionResponse { version: env!("CARGO_PKG_VERSION") })
}
