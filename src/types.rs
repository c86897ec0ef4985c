//! Core domain types shared across the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Minor units per whole settlement token (lamports per SOL).
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Minimum entry fee: 0.015 SOL in lamports.
pub const MIN_ENTRY_FEE: u64 = 15_000_000;

/// Maximum entry fee: 100 SOL in lamports.
pub const MAX_ENTRY_FEE: u64 = 100_000_000_000;

/// Picks and targets are integers in [1, 100].
pub const MIN_PICK: u8 = 1;
pub const MAX_PICK: u8 = 100;

/// Winner share of the prize pool, in basis points (98%).
pub const PAYOUT_BPS: u64 = 9_800;

/// Opaque wallet address identifying a player. The engine never owns or
/// derives these; they arrive from the wallet layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Duel visibility mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Public,
    Private,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Public => write!(f, "public"),
            Mode::Private => write!(f, "private"),
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Full,
    Resolving,
    Settled,
    Expired,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Settled | SessionState::Expired | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Open => "open",
            SessionState::Full => "full",
            SessionState::Resolving => "resolving",
            SessionState::Settled => "settled",
            SessionState::Expired => "expired",
            SessionState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Settlement outcome of a duel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "player", rename_all = "lowercase")]
pub enum Winner {
    Player(PlayerId),
    Draw,
}

/// VRF bundle proving how a target was drawn. Hex-encoded so records stay
/// printable in JSON and auditable by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetProof {
    /// Hex-encoded VRF output (32 bytes).
    pub vrf_output: String,
    /// Hex-encoded VRF proof (64-byte schnorrkel signature).
    pub vrf_proof: String,
    /// Hex-encoded public key (32 bytes).
    pub public_key: String,
    /// Input message the proof commits to.
    pub input_message: String,
}

/// A single refund issued during settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Refund {
    pub player: PlayerId,
    pub amount: u64,
}

/// Exact-integer breakdown of where the staked funds went. For every
/// settled duel, `winner_payout + platform_fee + sum(refunds) == pool`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementAmounts {
    /// Total staked funds, in minor units.
    pub pool: u64,
    pub winner_payout: u64,
    pub platform_fee: u64,
    pub refunds: Vec<Refund>,
}

impl SettlementAmounts {
    pub fn total_distributed(&self) -> u64 {
        self.winner_payout
            + self.platform_fee
            + self.refunds.iter().map(|r| r.amount).sum::<u64>()
    }
}

/// Lobby listing entry for an open session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub entry_fee: u64,
    pub mode: Mode,
    pub player_count: usize,
    pub created_at: i64,
}

/// Full session status exposed to the presentation layer. `target`,
/// `winner` and `amounts` stay unset until resolution begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub mode: Mode,
    pub entry_fee: u64,
    pub players: Vec<PlayerId>,
    pub picks: HashMap<String, u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amounts: Option<SettlementAmounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

/// Current UNIX time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
