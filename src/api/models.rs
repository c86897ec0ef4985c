//! Wire models for the HTTP surface.

use crate::audit::EngineStats;
use crate::types::{Mode, SessionSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub player: String,
    /// Entry fee in minor units (lamports).
    pub entry_fee: u64,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinSessionRequest {
    pub player: String,
    /// Session id for public sessions, invite code for private ones.
    pub session: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinSessionResponse {
    pub session_id: String,
    pub opponent: String,
    /// Selection deadline, UNIX milliseconds.
    pub deadline: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPickRequest {
    pub player: String,
    pub number: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitPickResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub live_sessions: usize,
    pub stats: EngineStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentSettlementsQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}
