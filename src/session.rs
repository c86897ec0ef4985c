//! Per-duel state machine.
//!
//! A `DuelSession` is pure state plus transition checks; serialization of
//! concurrent mutation is the registry's job (every session sits behind its
//! own lock). Resolution side effects live in the settlement module.

use crate::errors::{EngineError, EngineResult};
use crate::types::{
    Mode, PlayerId, SessionState, SessionStatus, SessionSummary, SettlementAmounts, TargetProof,
    Winner, MAX_PICK, MIN_PICK,
};
use std::collections::HashMap;

/// Outcome of comparing committed picks against the drawn target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Both players picked; one was strictly closer to the target.
    Decided { winner: PlayerId, loser: PlayerId },
    /// Both players picked at equal distance.
    Draw,
    /// Exactly one player picked before the deadline; the other forfeits.
    Forfeit { winner: PlayerId, absent: PlayerId },
    /// Neither player engaged before the deadline.
    NobodyEngaged,
}

#[derive(Debug)]
pub struct DuelSession {
    pub id: String,
    pub mode: Mode,
    /// Entry fee in minor units; identical for both players, fixed at creation.
    pub entry_fee: u64,
    /// Ordered participants, creator first. Never more than two.
    pub players: Vec<PlayerId>,
    pub picks: HashMap<PlayerId, u8>,
    pub invite_code: Option<String>,
    pub created_at: i64,
    /// Set when the session fills: fill time + selection window.
    pub deadline: Option<i64>,
    pub state: SessionState,
    pub target: Option<u8>,
    pub target_proof: Option<TargetProof>,
    pub winner: Option<Winner>,
    pub amounts: Option<SettlementAmounts>,
    pub resolved_at: Option<i64>,
    pub terminal_at: Option<i64>,

    // Resolution bookkeeping. `resolution_started` is the idempotency
    // marker: set before any side effect, checked by every entrant.
    pub resolution_started: bool,
    pub payout_issued: bool,
    /// True while the settlement record still needs a durable audit write.
    pub audit_pending: bool,
    pub audit_attempts: u32,
    pub next_audit_retry: Option<i64>,
    /// Terminal state to apply once the audit write lands.
    pub pending_final_state: Option<SessionState>,
}

impl DuelSession {
    pub fn new(
        id: String,
        creator: PlayerId,
        entry_fee: u64,
        mode: Mode,
        invite_code: Option<String>,
        now: i64,
    ) -> Self {
        Self {
            id,
            mode,
            entry_fee,
            players: vec![creator],
            picks: HashMap::new(),
            invite_code,
            created_at: now,
            deadline: None,
            state: SessionState::Open,
            target: None,
            target_proof: None,
            winner: None,
            amounts: None,
            resolved_at: None,
            terminal_at: None,
            resolution_started: false,
            payout_issued: false,
            audit_pending: false,
            audit_attempts: 0,
            next_audit_retry: None,
            pending_final_state: None,
        }
    }

    pub fn creator(&self) -> &PlayerId {
        &self.players[0]
    }

    pub fn is_participant(&self, player: &PlayerId) -> bool {
        self.players.iter().any(|p| p == player)
    }

    /// Attach the second player and start the selection clock.
    /// Caller must hold the session lock; the OPEN check here is the
    /// check-and-set that makes concurrent joins lose cleanly.
    pub fn add_opponent(
        &mut self,
        player: PlayerId,
        now: i64,
        selection_window_ms: i64,
    ) -> EngineResult<()> {
        if self.is_participant(&player) {
            return Err(EngineError::SelfJoin);
        }
        if self.state != SessionState::Open || self.players.len() >= 2 {
            return Err(EngineError::Full);
        }

        self.players.push(player);
        self.state = SessionState::Full;
        self.deadline = Some(now + selection_window_ms);
        Ok(())
    }

    /// Record a pick. Returns true when both players now have picks and
    /// resolution should begin immediately.
    pub fn record_pick(&mut self, player: &PlayerId, number: u8, now: i64) -> EngineResult<bool> {
        if !(MIN_PICK..=MAX_PICK).contains(&number) {
            return Err(EngineError::Validation(format!(
                "Pick must be between {} and {}",
                MIN_PICK, MAX_PICK
            )));
        }
        if !self.is_participant(player) {
            return Err(EngineError::NotInSession);
        }
        match self.state {
            SessionState::Open | SessionState::Full => {}
            _ => return Err(EngineError::TooLate),
        }
        if self.picks.contains_key(player) {
            return Err(EngineError::Immutable);
        }
        if self.deadline_passed(now) {
            return Err(EngineError::TooLate);
        }

        self.picks.insert(player.clone(), number);
        Ok(self.players.len() == 2 && self.picks.len() == 2)
    }

    pub fn deadline_passed(&self, now: i64) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// True for OPEN sessions nobody joined within the lobby idle timeout.
    pub fn idle_expired(&self, now: i64, lobby_idle_timeout_ms: i64) -> bool {
        self.state == SessionState::Open && now >= self.created_at + lobby_idle_timeout_ms
    }

    /// True once a terminal session has outlived its retention window and
    /// its settlement record is durable.
    pub fn evictable(&self, now: i64, retention_window_ms: i64) -> bool {
        if !self.state.is_terminal() || self.audit_pending {
            return false;
        }
        self.terminal_at
            .map(|t| now >= t + retention_window_ms)
            .unwrap_or(false)
    }

    /// Canonical description of the committed picks, bound into the VRF
    /// input so the draw cannot precede the commitments.
    pub fn pick_commitments(&self) -> String {
        self.players
            .iter()
            .map(|p| match self.picks.get(p) {
                Some(n) => format!("{}={}", p, n),
                None => format!("{}=none", p),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Compare committed picks against the target. A missing pick is a
    /// forfeit, never a default value.
    pub fn compute_outcome(&self, target: u8) -> ResolutionOutcome {
        let submitted: Vec<(&PlayerId, u8)> = self
            .players
            .iter()
            .filter_map(|p| self.picks.get(p).map(|n| (p, *n)))
            .collect();

        match submitted.len() {
            0 => ResolutionOutcome::NobodyEngaged,
            1 => {
                let winner = submitted[0].0.clone();
                let absent = self
                    .players
                    .iter()
                    .find(|p| **p != winner)
                    .cloned()
                    .unwrap_or_else(|| winner.clone());
                ResolutionOutcome::Forfeit { winner, absent }
            }
            _ => {
                let d1 = submitted[0].1.abs_diff(target);
                let d2 = submitted[1].1.abs_diff(target);
                if d1 == d2 {
                    ResolutionOutcome::Draw
                } else if d1 < d2 {
                    ResolutionOutcome::Decided {
                        winner: submitted[0].0.clone(),
                        loser: submitted[1].0.clone(),
                    }
                } else {
                    ResolutionOutcome::Decided {
                        winner: submitted[1].0.clone(),
                        loser: submitted[0].0.clone(),
                    }
                }
            }
        }
    }

    /// Split the prize pool: 98% to the winner, remainder (including any
    /// rounding dust) to the platform. Returns (winner_payout, platform_fee).
    pub fn split_pool(entry_fee: u64) -> (u64, u64) {
        let pool = entry_fee * 2;
        let winner_payout = pool * crate::types::PAYOUT_BPS / 10_000;
        (winner_payout, pool - winner_payout)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            entry_fee: self.entry_fee,
            mode: self.mode,
            player_count: self.players.len(),
            created_at: self.created_at,
        }
    }

    pub fn status(&self) -> SessionStatus {
        // Picks stay hidden until resolution begins so a polling client
        // can never see the opponent's number while its own is unlocked.
        let reveal = matches!(
            self.state,
            SessionState::Resolving
                | SessionState::Settled
                | SessionState::Expired
                | SessionState::Cancelled
        );
        let picks = if reveal {
            self.picks
                .iter()
                .map(|(p, n)| (p.to_string(), *n))
                .collect()
        } else {
            HashMap::new()
        };

        SessionStatus {
            session_id: self.id.clone(),
            state: self.state,
            mode: self.mode,
            entry_fee: self.entry_fee,
            players: self.players.clone(),
            picks,
            deadline: self.deadline,
            target: self.target,
            winner: self.winner.clone(),
            amounts: self.amounts.clone(),
            resolved_at: self.resolved_at,
        }
    }
}
