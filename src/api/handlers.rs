//! Request handlers.

use super::errors::ApiError;
use super::models::*;
use crate::engine::DuelEngine;
use crate::types::{PlayerId, SessionStatus};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DuelEngine>,
}

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let request_id = request_id();
    let stats = state
        .engine
        .stats()
        .map_err(|e| ApiError::from_engine(request_id, e))?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        live_sessions: state.engine.live_sessions(),
        stats,
    }))
}

pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let request_id = request_id();
    if request.player.is_empty() {
        return Err(ApiError::bad_request(
            request_id,
            "player must not be empty".to_string(),
        ));
    }

    let created = state
        .engine
        .create_session(PlayerId::new(request.player), request.entry_fee, request.mode)
        .await
        .map_err(|e| ApiError::from_engine(request_id, e))?;

    Ok(Json(CreateSessionResponse {
        session_id: created.session_id,
        invite_code: created.invite_code,
    }))
}

pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse {
        sessions: state.engine.list_sessions().await,
    })
}

pub async fn join_session_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinSessionRequest>,
) -> Result<Json<JoinSessionResponse>, ApiError> {
    let request_id = request_id();
    let joined = state
        .engine
        .join_session(PlayerId::new(request.player), &request.session)
        .await
        .map_err(|e| ApiError::from_engine(request_id, e))?;

    Ok(Json(JoinSessionResponse {
        session_id: joined.session_id,
        opponent: joined.opponent.to_string(),
        deadline: joined.deadline,
    }))
}

pub async fn submit_pick_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<SubmitPickRequest>,
) -> Result<Json<SubmitPickResponse>, ApiError> {
    let request_id = request_id();
    state
        .engine
        .submit_pick(PlayerId::new(request.player), &session_id, request.number)
        .await
        .map_err(|e| ApiError::from_engine(request_id, e))?;

    Ok(Json(SubmitPickResponse { accepted: true }))
}

pub async fn session_status_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    let request_id = request_id();
    let status = state
        .engine
        .session_status(&session_id)
        .await
        .map_err(|e| ApiError::from_engine(request_id, e))?;

    Ok(Json(status))
}

pub async fn recent_settlements_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentSettlementsQuery>,
) -> Result<Json<Value>, ApiError> {
    let request_id = request_id();
    let limit = query.limit.unwrap_or(20).min(100);
    let (records, next_cursor) = state
        .engine
        .recent_settlements(query.cursor.as_deref(), limit)
        .map_err(|e| ApiError::from_engine(request_id, e))?;

    Ok(Json(json!({
        "settlements": records,
        "next_cursor": next_cursor,
    })))
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.engine.metrics().render()
}
