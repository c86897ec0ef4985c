//! Engine facade and background sweep.
//!
//! `DuelEngine` wires the matcher, registry, settler and audit log behind
//! the five operations the presentation layer consumes. The `SweepWorker`
//! drives deadline expiry, lobby timeouts, parked audit retries and
//! eviction on a fixed interval, independent of request traffic.

use crate::audit::{self, EngineStats, SettlementRecord};
use crate::config::EngineConfig;
use crate::entropy::TargetSource;
use crate::errors::{EngineError, EngineResult};
use crate::escrow::EscrowLedger;
use crate::matcher::{CreatedSession, DuelMatcher, JoinedSession};
use crate::metrics::EngineMetrics;
use crate::registry::SessionRegistry;
use crate::session::DuelSession;
use crate::settlement::Settler;
use crate::storage::DuelStorage;
use crate::types::{now_ms, Mode, PlayerId, SessionState, SessionStatus, SessionSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct DuelEngine {
    config: EngineConfig,
    registry: Arc<SessionRegistry>,
    matcher: DuelMatcher,
    settler: Settler,
    storage: Arc<DuelStorage>,
    metrics: Arc<EngineMetrics>,
}

impl DuelEngine {
    pub fn new(
        config: EngineConfig,
        escrow: Arc<dyn EscrowLedger>,
        entropy: Arc<dyn TargetSource>,
        storage: Arc<DuelStorage>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let metrics = Arc::new(EngineMetrics::new());

        let matcher = DuelMatcher::new(registry.clone(), escrow.clone(), config.duel.clone());
        let settler = Settler::new(
            escrow,
            entropy,
            storage.clone(),
            metrics.clone(),
            PlayerId::new(config.duel.platform_account.clone()),
            config.storage.audit_retry_limit,
            config.storage.audit_retry_backoff_ms,
        );

        Arc::new(Self {
            config,
            registry,
            matcher,
            settler,
            storage,
            metrics,
        })
    }

    pub async fn create_session(
        &self,
        creator: PlayerId,
        entry_fee: u64,
        mode: Mode,
    ) -> EngineResult<CreatedSession> {
        let created = self.matcher.create_session(creator, entry_fee, mode).await?;
        self.metrics.sessions_created.inc();
        self.metrics.lamports_wagered.inc_by(entry_fee);
        Ok(created)
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.matcher.list_open_sessions().await
    }

    pub async fn join_session(
        &self,
        player: PlayerId,
        session_id_or_code: &str,
    ) -> EngineResult<JoinedSession> {
        let joined = self.matcher.join_session(player, session_id_or_code).await?;
        self.metrics.lamports_wagered.inc_by(joined.entry_fee);
        Ok(joined)
    }

    /// Submit a pick. Resolution fires immediately when this is the second
    /// pick; a submission past the deadline triggers the timeout transition
    /// and still reports `TooLate` to the caller.
    pub async fn submit_pick(
        &self,
        player: PlayerId,
        session_id: &str,
        number: u8,
    ) -> EngineResult<()> {
        let slot = self
            .registry
            .get(session_id)
            .ok_or_else(|| EngineError::NotFound(session_id.to_string()))?;

        let mut session = slot.session.lock().await;
        let now = now_ms();

        match session.record_pick(&player, number, now) {
            Ok(both_committed) => {
                if both_committed {
                    self.settler.resolve(&mut session, now).await;
                }
                Ok(())
            }
            Err(EngineError::TooLate) => {
                if session.state == SessionState::Full && session.deadline_passed(now) {
                    self.settler.resolve(&mut session, now).await;
                }
                Err(EngineError::TooLate)
            }
            Err(e) => Err(e),
        }
    }

    /// Session status for polling clients. Evicted sessions fall back to
    /// their audit record so results stay queryable past retention.
    pub async fn session_status(&self, session_id: &str) -> EngineResult<SessionStatus> {
        if let Some(slot) = self.registry.get(session_id) {
            let session = slot.session.lock().await;
            return Ok(session.status());
        }

        match audit::load_record(&self.storage, session_id)? {
            Some(record) => Ok(status_from_record(record)),
            None => Err(EngineError::NotFound(session_id.to_string())),
        }
    }

    /// One sweep pass: expire idle lobbies, resolve overdue duels, retry
    /// parked audit writes, evict terminal sessions past retention.
    pub async fn sweep_once(&self) {
        let now = now_ms();
        let mut evict = Vec::new();

        for (session_id, slot) in self.registry.slots() {
            let mut session = slot.session.lock().await;

            if session.idle_expired(now, self.config.duel.lobby_idle_timeout_ms) {
                self.settler.expire_open(&mut session, now).await;
            } else if session.state == SessionState::Full && session.deadline_passed(now) {
                self.settler.resolve(&mut session, now).await;
            } else if session.state == SessionState::Resolving && session.audit_pending {
                self.settler.retry_audit(&mut session, now).await;
            }

            if session.evictable(now, self.config.duel.retention_window_ms) {
                evict.push((session_id, session.invite_code.clone()));
            }
        }

        for (session_id, invite_code) in evict {
            debug!(session_id = %session_id, "Evicting terminal session");
            self.registry.remove(&session_id, invite_code.as_deref());
        }
    }

    pub fn stats(&self) -> EngineResult<EngineStats> {
        audit::load_stats(&self.storage)
    }

    pub fn recent_settlements(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<SettlementRecord>, Option<String>)> {
        audit::load_recent(&self.storage, cursor, limit)
    }

    pub fn live_sessions(&self) -> usize {
        self.registry.len()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn status_from_record(record: SettlementRecord) -> SessionStatus {
    SessionStatus {
        session_id: record.session_id,
        state: record.final_state,
        mode: record.mode,
        entry_fee: record.entry_fee,
        players: record.players,
        picks: record.picks,
        deadline: None,
        target: record.target,
        winner: record.winner,
        amounts: Some(record.amounts),
        resolved_at: Some(record.resolved_at),
    }
}

/// Background worker driving the sweep on a fixed interval.
pub struct SweepWorker {
    running: Arc<AtomicBool>,
}

impl SweepWorker {
    pub fn spawn(engine: Arc<DuelEngine>) -> Arc<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let worker = Arc::new(Self {
            running: running.clone(),
        });

        let interval_ms = engine.config.duel.sweep_interval_ms;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            while running.load(Ordering::SeqCst) {
                tick.tick().await;
                engine.sweep_once().await;
            }
        });

        worker
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// A session's view with its lock: exposed for integration tests that need
/// to inspect internal state mid-flow.
pub async fn inspect_session<F, T>(engine: &DuelEngine, session_id: &str, f: F) -> Option<T>
where
    F: FnOnce(&DuelSession) -> T,
{
    let slot = engine.registry.get(session_id)?;
    let session = slot.session.lock().await;
    Some(f(&session))
}
