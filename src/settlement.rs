//! Resolution driver.
//!
//! Runs the settlement pipeline for a single session: idempotency guard,
//! target draw, winner computation, escrow transfers, audit write. Callers
//! must hold the session's lock; the guard makes a second entrant (sweep vs
//! request path) a silent no-op, never a double payout.

use crate::audit::{self, SettlementRecord};
use crate::entropy::TargetSource;
use crate::escrow::EscrowLedger;
use crate::metrics::EngineMetrics;
use crate::session::{DuelSession, ResolutionOutcome};
use crate::storage::DuelStorage;
use crate::types::{PlayerId, Refund, SessionState, SettlementAmounts, Winner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct Settler {
    escrow: Arc<dyn EscrowLedger>,
    entropy: Arc<dyn TargetSource>,
    storage: Arc<DuelStorage>,
    metrics: Arc<EngineMetrics>,
    platform_account: PlayerId,
    audit_retry_limit: u32,
    audit_retry_backoff_ms: i64,
}

impl Settler {
    pub fn new(
        escrow: Arc<dyn EscrowLedger>,
        entropy: Arc<dyn TargetSource>,
        storage: Arc<DuelStorage>,
        metrics: Arc<EngineMetrics>,
        platform_account: PlayerId,
        audit_retry_limit: u32,
        audit_retry_backoff_ms: i64,
    ) -> Self {
        Self {
            escrow,
            entropy,
            storage,
            metrics,
            platform_account,
            audit_retry_limit: audit_retry_limit.max(1),
            audit_retry_backoff_ms,
        }
    }

    /// Resolve a FULL session: both picks are in, or its deadline passed.
    /// Safe to call any number of times; only the first call settles.
    pub async fn resolve(&self, session: &mut DuelSession, now: i64) {
        if session.state.is_terminal() {
            return;
        }
        if session.resolution_started {
            // Second entrant: either the audit write is still owed, or
            // there is nothing left to do.
            if session.audit_pending {
                self.retry_audit(session, now).await;
            }
            return;
        }

        session.resolution_started = true;
        session.state = SessionState::Resolving;
        session.resolved_at = Some(now);

        if session.picks.is_empty() {
            // Neither player engaged: no draw, no stakes forfeited.
            debug!(session_id = %session.id, "No picks at deadline, cancelling with refunds");
            let amounts = self.refund_all(session).await;
            self.finish(session, SessionState::Cancelled, None, amounts, now)
                .await;
            return;
        }

        let draw = match self
            .entropy
            .draw(&session.id, now, &session.pick_commitments())
        {
            Ok(draw) => draw,
            Err(e) => {
                // Fail closed: an unavailable entropy source cancels the
                // duel with full refunds, never a defaulted target.
                warn!(session_id = %session.id, error = %e, "Target draw failed, cancelling");
                let amounts = self.refund_all(session).await;
                self.finish(session, SessionState::Cancelled, None, amounts, now)
                    .await;
                return;
            }
        };

        session.target = Some(draw.target);
        session.target_proof = Some(draw.proof);

        match session.compute_outcome(draw.target) {
            ResolutionOutcome::Draw => {
                debug!(session_id = %session.id, target = draw.target, "Duel drawn, refunding stakes");
                self.metrics.draws.inc();
                let amounts = self.refund_all(session).await;
                self.finish(session, SessionState::Settled, Some(Winner::Draw), amounts, now)
                    .await;
            }
            ResolutionOutcome::Decided { winner, loser } => {
                info!(
                    session_id = %session.id,
                    target = draw.target,
                    winner = %winner,
                    loser = %loser,
                    "Duel decided"
                );
                self.pay_winner(session, winner, now).await;
            }
            ResolutionOutcome::Forfeit { winner, absent } => {
                info!(
                    session_id = %session.id,
                    winner = %winner,
                    absent = %absent,
                    "Duel won by forfeit"
                );
                self.metrics.forfeits.inc();
                self.pay_winner(session, winner, now).await;
            }
            ResolutionOutcome::NobodyEngaged => {
                // Unreachable with picks present; kept total.
                let amounts = self.refund_all(session).await;
                self.finish(session, SessionState::Cancelled, None, amounts, now)
                    .await;
            }
        }
    }

    /// Expire an OPEN session nobody joined: refund the creator's stake.
    pub async fn expire_open(&self, session: &mut DuelSession, now: i64) {
        if session.state != SessionState::Open || session.resolution_started {
            return;
        }
        session.resolution_started = true;
        session.state = SessionState::Resolving;
        session.resolved_at = Some(now);

        debug!(session_id = %session.id, "Lobby idle timeout, expiring session");
        let amounts = self.refund_all(session).await;
        self.finish(session, SessionState::Expired, None, amounts, now)
            .await;
    }

    /// Pay out the full pool: 98% to the winner, remainder to the platform.
    async fn pay_winner(&self, session: &mut DuelSession, winner: PlayerId, now: i64) {
        let (winner_payout, platform_fee) = DuelSession::split_pool(session.entry_fee);
        let pool = session.entry_fee * 2;

        // Marker set before the transfer: a retry after a crash between
        // these two lines must not re-issue the payout.
        session.payout_issued = true;

        if let Err(e) = self.escrow.payout(&winner, winner_payout).await {
            warn!(session_id = %session.id, error = %e, "Winner payout failed, cancelling with refunds");
            session.payout_issued = false;
            let amounts = self.refund_all(session).await;
            self.finish(session, SessionState::Cancelled, None, amounts, now)
                .await;
            return;
        }

        if let Err(e) = self.escrow.payout(&self.platform_account, platform_fee).await {
            // The winner is already paid; this cannot be rolled back.
            // The fee transfer is left to operator reconciliation.
            error!(session_id = %session.id, error = %e, "Platform fee transfer failed after winner payout");
        }

        self.metrics.lamports_paid_out.inc_by(winner_payout);

        let amounts = SettlementAmounts {
            pool,
            winner_payout,
            platform_fee,
            refunds: vec![],
        };
        self.finish(
            session,
            SessionState::Settled,
            Some(Winner::Player(winner)),
            amounts,
            now,
        )
        .await;
    }

    /// Refund every participant's stake. Individual refund failures are
    /// logged and surfaced for reconciliation; they never abort the others.
    async fn refund_all(&self, session: &DuelSession) -> SettlementAmounts {
        let mut refunds = Vec::with_capacity(session.players.len());
        for player in &session.players {
            match self.escrow.refund(player, session.entry_fee).await {
                Ok(()) => refunds.push(Refund {
                    player: player.clone(),
                    amount: session.entry_fee,
                }),
                Err(e) => {
                    error!(
                        session_id = %session.id,
                        player = %player,
                        error = %e,
                        "Refund failed; stake requires manual reconciliation"
                    );
                }
            }
        }

        SettlementAmounts {
            pool: session.entry_fee * session.players.len() as u64,
            winner_payout: 0,
            platform_fee: 0,
            refunds,
        }
    }

    /// Record the outcome and drive the session terminal. The audit write
    /// must land before the terminal state is applied; on persistent
    /// failure the session parks in RESOLVING and the sweeper retries.
    async fn finish(
        &self,
        session: &mut DuelSession,
        final_state: SessionState,
        winner: Option<Winner>,
        amounts: SettlementAmounts,
        now: i64,
    ) {
        session.winner = winner;
        session.amounts = Some(amounts);
        session.pending_final_state = Some(final_state);

        for attempt in 1..=self.audit_retry_limit {
            session.audit_attempts += 1;
            match audit::append_record(&self.storage, &self.build_record(session, final_state)) {
                Ok(()) => {
                    self.apply_terminal(session, final_state, now);
                    return;
                }
                Err(e) => {
                    warn!(
                        session_id = %session.id,
                        attempt,
                        error = %e,
                        "Audit write failed"
                    );
                    if attempt < self.audit_retry_limit {
                        tokio::time::sleep(Duration::from_millis(
                            self.audit_retry_backoff_ms.max(0) as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        // Park in RESOLVING: the settlement record must not be lost, and
        // the payout must not be re-issued when the sweeper retries.
        session.audit_pending = true;
        session.next_audit_retry = Some(now + self.audit_retry_backoff_ms);
        error!(
            session_id = %session.id,
            attempts = session.audit_attempts,
            "Audit write exhausted retries; holding session in resolving"
        );
    }

    /// Retry a parked audit write. No escrow calls happen here.
    pub async fn retry_audit(&self, session: &mut DuelSession, now: i64) {
        if !session.audit_pending {
            return;
        }
        if session.next_audit_retry.map(|t| now < t).unwrap_or(false) {
            return;
        }
        let Some(final_state) = session.pending_final_state else {
            return;
        };

        session.audit_attempts += 1;
        match audit::append_record(&self.storage, &self.build_record(session, final_state)) {
            Ok(()) => {
                session.audit_pending = false;
                session.next_audit_retry = None;
                self.apply_terminal(session, final_state, now);
            }
            Err(e) => {
                session.next_audit_retry = Some(now + self.audit_retry_backoff_ms);
                warn!(session_id = %session.id, error = %e, "Audit retry failed");
            }
        }
    }

    fn apply_terminal(&self, session: &mut DuelSession, final_state: SessionState, now: i64) {
        session.state = final_state;
        session.terminal_at = Some(now);
        session.audit_pending = false;

        match final_state {
            SessionState::Settled => self.metrics.sessions_settled.inc(),
            SessionState::Cancelled => self.metrics.sessions_cancelled.inc(),
            SessionState::Expired => self.metrics.sessions_expired.inc(),
            _ => {}
        }

        info!(
            session_id = %session.id,
            state = %final_state,
            winner = ?session.winner,
            "Session reached terminal state"
        );
    }

    fn build_record(&self, session: &DuelSession, final_state: SessionState) -> SettlementRecord {
        SettlementRecord {
            session_id: session.id.clone(),
            mode: session.mode,
            players: session.players.clone(),
            picks: session
                .picks
                .iter()
                .map(|(p, n)| (p.to_string(), *n))
                .collect(),
            target: session.target,
            winner: session.winner.clone(),
            entry_fee: session.entry_fee,
            amounts: session.amounts.clone().unwrap_or(SettlementAmounts {
                pool: 0,
                winner_payout: 0,
                platform_fee: 0,
                refunds: vec![],
            }),
            final_state,
            resolved_at: session.resolved_at.unwrap_or(session.created_at),
            target_proof: session.target_proof.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::{EntropyError, FixedTargetSource, TargetDraw};
    use crate::escrow::{InMemoryLedger, TransferKind};
    use crate::types::Mode;

    struct FailingTargetSource;

    impl TargetSource for FailingTargetSource {
        fn draw(&self, _: &str, _: i64, _: &str) -> Result<TargetDraw, EntropyError> {
            Err(EntropyError::Unavailable("hsm offline".to_string()))
        }
    }

    const FEE: u64 = 20_000_000;

    fn full_session(ledger: &InMemoryLedger) -> DuelSession {
        let alice = PlayerId::new("alice");
        let bob = PlayerId::new("bob");
        ledger.credit(&alice, FEE);
        ledger.credit(&bob, FEE);

        let mut session = DuelSession::new(
            "s1".to_string(),
            alice,
            FEE,
            Mode::Public,
            None,
            1_000,
        );
        session.add_opponent(bob, 2_000, 25_000).unwrap();
        session
    }

    fn settler(ledger: Arc<InMemoryLedger>, entropy: Arc<dyn TargetSource>) -> (Settler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(DuelStorage::open(dir.path()).unwrap());
        let settler = Settler::new(
            ledger,
            entropy,
            storage,
            Arc::new(EngineMetrics::new()),
            PlayerId::new("treasury"),
            3,
            10,
        );
        (settler, dir)
    }

    async fn escrow_both(ledger: &InMemoryLedger, session: &DuelSession) {
        for p in &session.players {
            ledger.deposit(p, FEE).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_decided_duel_pays_winner_and_platform() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;
        session.record_pick(&PlayerId::new("alice"), 40, 3_000).unwrap();
        session.record_pick(&PlayerId::new("bob"), 60, 4_000).unwrap();

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 45 }));
        settler.resolve(&mut session, 5_000).await;

        assert_eq!(session.state, SessionState::Settled);
        assert_eq!(session.winner, Some(Winner::Player(PlayerId::new("alice"))));
        assert_eq!(ledger.balance(&PlayerId::new("alice")), 39_200_000);
        assert_eq!(ledger.balance(&PlayerId::new("treasury")), 800_000);
        assert_eq!(ledger.escrowed(), 0);
    }

    #[tokio::test]
    async fn test_draw_refunds_both_with_zero_fee() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;
        session.record_pick(&PlayerId::new("alice"), 30, 3_000).unwrap();
        session.record_pick(&PlayerId::new("bob"), 70, 4_000).unwrap();

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 50 }));
        settler.resolve(&mut session, 5_000).await;

        assert_eq!(session.state, SessionState::Settled);
        assert_eq!(session.winner, Some(Winner::Draw));
        let amounts = session.amounts.as_ref().unwrap();
        assert_eq!(amounts.platform_fee, 0);
        assert_eq!(amounts.refunds.len(), 2);
        assert_eq!(ledger.balance(&PlayerId::new("alice")), FEE);
        assert_eq!(ledger.balance(&PlayerId::new("bob")), FEE);
        assert_eq!(ledger.balance(&PlayerId::new("treasury")), 0);
    }

    #[tokio::test]
    async fn test_forfeit_pays_sole_submitter() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;
        session.record_pick(&PlayerId::new("alice"), 99, 3_000).unwrap();

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 1 }));
        // Deadline path: bob never picked.
        settler.resolve(&mut session, 30_000).await;

        assert_eq!(session.state, SessionState::Settled);
        assert_eq!(session.winner, Some(Winner::Player(PlayerId::new("alice"))));
        assert_eq!(ledger.balance(&PlayerId::new("alice")), 39_200_000);
        assert_eq!(ledger.balance(&PlayerId::new("bob")), 0);
    }

    #[tokio::test]
    async fn test_nobody_engaged_cancels_with_full_refunds() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 50 }));
        settler.resolve(&mut session, 30_000).await;

        assert_eq!(session.state, SessionState::Cancelled);
        assert_eq!(session.winner, None);
        assert_eq!(session.target, None);
        assert_eq!(ledger.balance(&PlayerId::new("alice")), FEE);
        assert_eq!(ledger.balance(&PlayerId::new("bob")), FEE);
    }

    #[tokio::test]
    async fn test_entropy_failure_fails_closed() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;
        session.record_pick(&PlayerId::new("alice"), 40, 3_000).unwrap();
        session.record_pick(&PlayerId::new("bob"), 60, 4_000).unwrap();

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FailingTargetSource));
        settler.resolve(&mut session, 5_000).await;

        assert_eq!(session.state, SessionState::Cancelled);
        assert_eq!(session.target, None);
        assert_eq!(ledger.balance(&PlayerId::new("alice")), FEE);
        assert_eq!(ledger.balance(&PlayerId::new("bob")), FEE);
        assert_eq!(ledger.count_of(TransferKind::Payout), 0);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;
        session.record_pick(&PlayerId::new("alice"), 40, 3_000).unwrap();
        session.record_pick(&PlayerId::new("bob"), 60, 4_000).unwrap();

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 45 }));
        settler.resolve(&mut session, 5_000).await;
        let transfers_after_first = ledger.transfers().len();

        // Sweep racing a completed resolution must be a no-op.
        settler.resolve(&mut session, 6_000).await;
        settler.resolve(&mut session, 7_000).await;

        assert_eq!(ledger.transfers().len(), transfers_after_first);
        assert_eq!(ledger.count_of(TransferKind::Payout), 2); // winner + platform
    }

    #[tokio::test]
    async fn test_expire_open_refunds_creator() {
        let ledger = Arc::new(InMemoryLedger::new());
        let alice = PlayerId::new("alice");
        ledger.credit(&alice, FEE);
        ledger.deposit(&alice, FEE).await.unwrap();

        let mut session = DuelSession::new(
            "s1".to_string(),
            alice.clone(),
            FEE,
            Mode::Public,
            None,
            1_000,
        );

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 50 }));
        settler.expire_open(&mut session, 400_000).await;

        assert_eq!(session.state, SessionState::Expired);
        assert_eq!(ledger.balance(&alice), FEE);
        assert_eq!(ledger.escrowed(), 0);
    }

    #[tokio::test]
    async fn test_conservation_of_funds() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut session = full_session(&ledger);
        escrow_both(&ledger, &session).await;
        session.record_pick(&PlayerId::new("alice"), 10, 3_000).unwrap();
        session.record_pick(&PlayerId::new("bob"), 90, 4_000).unwrap();

        let (settler, _dir) = settler(ledger.clone(), Arc::new(FixedTargetSource { target: 33 }));
        settler.resolve(&mut session, 5_000).await;

        let amounts = session.amounts.as_ref().unwrap();
        assert_eq!(amounts.total_distributed(), amounts.pool);
        assert_eq!(amounts.pool, FEE * 2);
    }
}
