//! Pairs wagering players into duel sessions.
//!
//! Creation validates the entry fee and escrows the creator's stake before
//! the session becomes visible; joining escrows the joiner's stake under
//! the session lock so the last open slot is filled exactly once.

use crate::config::DuelConfig;
use crate::errors::{EngineError, EngineResult};
use crate::escrow::EscrowLedger;
use crate::registry::SessionRegistry;
use crate::session::DuelSession;
use crate::types::{now_ms, Mode, PlayerId, SessionSummary, MAX_ENTRY_FEE, MIN_ENTRY_FEE};
use rand::Rng;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const INVITE_CODE_LEN: usize = 6;
const INVITE_CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_CODE_ATTEMPTS: usize = 100;

/// Result of creating a session.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    pub invite_code: Option<String>,
}

/// Result of joining a session.
#[derive(Debug, Clone)]
pub struct JoinedSession {
    pub session_id: String,
    pub opponent: PlayerId,
    pub deadline: i64,
    pub entry_fee: u64,
}

pub struct DuelMatcher {
    registry: Arc<SessionRegistry>,
    escrow: Arc<dyn EscrowLedger>,
    config: DuelConfig,
}

impl DuelMatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        escrow: Arc<dyn EscrowLedger>,
        config: DuelConfig,
    ) -> Self {
        Self {
            registry,
            escrow,
            config,
        }
    }

    /// Create a session with the creator's stake already in escrow.
    pub async fn create_session(
        &self,
        creator: PlayerId,
        entry_fee: u64,
        mode: Mode,
    ) -> EngineResult<CreatedSession> {
        if !(MIN_ENTRY_FEE..=MAX_ENTRY_FEE).contains(&entry_fee) {
            return Err(EngineError::Validation(format!(
                "Entry fee must be between {} and {} lamports",
                MIN_ENTRY_FEE, MAX_ENTRY_FEE
            )));
        }

        let invite_code = match mode {
            Mode::Public => None,
            Mode::Private => Some(self.allocate_invite_code()?),
        };

        // Stake first: a session is never visible without its creator's
        // fee locked.
        self.escrow.deposit(&creator, entry_fee).await?;

        let session_id = Uuid::new_v4().to_string();
        let session = DuelSession::new(
            session_id.clone(),
            creator.clone(),
            entry_fee,
            mode,
            invite_code.clone(),
            now_ms(),
        );
        self.registry.insert(session);

        info!(
            session_id = %session_id,
            creator = %creator,
            entry_fee,
            mode = %mode,
            "Session created"
        );

        Ok(CreatedSession {
            session_id,
            invite_code,
        })
    }

    /// Open public sessions with a free slot, most recent first.
    pub async fn list_open_sessions(&self) -> Vec<SessionSummary> {
        self.registry.list_open_public().await
    }

    /// Join by session id or invite code. Private sessions only match
    /// their invite code; their ids are never a join handle.
    pub async fn join_session(
        &self,
        player: PlayerId,
        session_id_or_code: &str,
    ) -> EngineResult<JoinedSession> {
        let slot = self
            .registry
            .resolve(session_id_or_code)
            .ok_or_else(|| EngineError::NotFound(session_id_or_code.to_string()))?;

        let mut session = slot.session.lock().await;

        if session.mode == Mode::Private
            && session.invite_code.as_deref() != Some(session_id_or_code)
        {
            return Err(EngineError::NotFound(session_id_or_code.to_string()));
        }
        if session.is_participant(&player) {
            return Err(EngineError::SelfJoin);
        }
        match session.state {
            crate::types::SessionState::Open => {}
            crate::types::SessionState::Full => return Err(EngineError::Full),
            _ => return Err(EngineError::NotFound(session_id_or_code.to_string())),
        }

        // Deposit while holding the lock: a losing concurrent join never
        // has its stake taken.
        self.escrow.deposit(&player, session.entry_fee).await?;

        let now = now_ms();
        if let Err(e) = session.add_opponent(player.clone(), now, self.config.selection_window_ms) {
            // The checks above make this unreachable while the lock is
            // held; return the stake if it ever fires.
            let _ = self.escrow.refund(&player, session.entry_fee).await;
            return Err(e);
        }

        let deadline = session.deadline.unwrap_or(now);
        info!(
            session_id = %session.id,
            player = %player,
            deadline,
            "Session filled"
        );

        Ok(JoinedSession {
            session_id: session.id.clone(),
            opponent: session.creator().clone(),
            deadline,
            entry_fee: session.entry_fee,
        })
    }

    fn allocate_invite_code(&self) -> EngineResult<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..INVITE_CODE_ATTEMPTS {
            let code: String = (0..INVITE_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..INVITE_CODE_CHARSET.len());
                    INVITE_CODE_CHARSET[idx] as char
                })
                .collect();
            if !self.registry.invite_code_active(&code) {
                return Ok(code);
            }
        }
        Err(EngineError::Validation(
            "Could not allocate a unique invite code".to_string(),
        ))
    }
}
