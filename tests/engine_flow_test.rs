//! End-to-end engine tests: the duel lifecycle, settlement math, timeout
//! handling, idempotency and the concurrent-join race.

use fartduel::config::EngineConfig;
use fartduel::engine::{inspect_session, DuelEngine};
use fartduel::entropy::{FixedTargetSource, TargetSource, VrfTargetSource};
use fartduel::errors::EngineError;
use fartduel::escrow::{InMemoryLedger, TransferKind};
use fartduel::storage::DuelStorage;
use fartduel::types::{Mode, PlayerId, SessionState, Winner, LAMPORTS_PER_SOL};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FEE: u64 = 20_000_000; // 0.02 SOL

struct TestHarness {
    engine: Arc<DuelEngine>,
    ledger: Arc<InMemoryLedger>,
    _dir: TempDir,
}

fn harness_with(target: Arc<dyn TargetSource>, configure: impl FnOnce(&mut EngineConfig)) -> TestHarness {
    let mut config = EngineConfig::default();
    config.duel.platform_account = "treasury".to_string();
    configure(&mut config);

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(DuelStorage::open(dir.path()).unwrap());
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = DuelEngine::new(config, ledger.clone(), target, storage);

    TestHarness {
        engine,
        ledger,
        _dir: dir,
    }
}

fn harness(target: u8) -> TestHarness {
    harness_with(Arc::new(FixedTargetSource { target }), |_| {})
}

fn fund(ledger: &InMemoryLedger, name: &str) -> PlayerId {
    let player = PlayerId::new(name);
    ledger.credit(&player, LAMPORTS_PER_SOL);
    player
}

async fn filled_session(h: &TestHarness, alice: &PlayerId, bob: &PlayerId) -> String {
    let created = h
        .engine
        .create_session(alice.clone(), FEE, Mode::Public)
        .await
        .unwrap();
    h.engine
        .join_session(bob.clone(), &created.session_id)
        .await
        .unwrap();
    created.session_id
}

#[tokio::test]
async fn scenario_a_closest_pick_wins_exact_payout() {
    let h = harness(45);
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice.clone(), &session_id, 40).await.unwrap();
    h.engine.submit_pick(bob.clone(), &session_id, 60).await.unwrap();

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Settled);
    assert_eq!(status.target, Some(45));
    assert_eq!(status.winner, Some(Winner::Player(alice.clone())));

    // 0.02 * 2 * 0.98 = 0.0392 SOL to the winner, 0.0008 platform fee.
    let amounts = status.amounts.unwrap();
    assert_eq!(amounts.pool, 40_000_000);
    assert_eq!(amounts.winner_payout, 39_200_000);
    assert_eq!(amounts.platform_fee, 800_000);

    assert_eq!(h.ledger.balance(&alice), LAMPORTS_PER_SOL - FEE + 39_200_000);
    assert_eq!(h.ledger.balance(&bob), LAMPORTS_PER_SOL - FEE);
    assert_eq!(h.ledger.balance(&PlayerId::new("treasury")), 800_000);
    assert_eq!(h.ledger.escrowed(), 0);
}

#[tokio::test]
async fn scenario_b_sole_submitter_wins_by_forfeit() {
    let h = harness_with(Arc::new(FixedTargetSource { target: 1 }), |c| {
        c.duel.selection_window_ms = 150;
    });
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    // Alice's pick is maximally far from the target; distance is
    // irrelevant for a forfeit.
    h.engine.submit_pick(alice.clone(), &session_id, 100).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.engine.sweep_once().await;

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Settled);
    assert_eq!(status.winner, Some(Winner::Player(alice.clone())));

    // The non-submitter's stake goes into the pool: winner takes all.
    assert_eq!(h.ledger.balance(&alice), LAMPORTS_PER_SOL - FEE + 39_200_000);
    assert_eq!(h.ledger.balance(&bob), LAMPORTS_PER_SOL - FEE);
}

#[tokio::test]
async fn scenario_c_nobody_engaged_cancels_with_full_refunds() {
    let h = harness_with(Arc::new(FixedTargetSource { target: 50 }), |c| {
        c.duel.selection_window_ms = 150;
    });
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.engine.sweep_once().await;

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Cancelled);
    assert_eq!(status.winner, None);
    assert_eq!(status.target, None);

    assert_eq!(h.ledger.balance(&alice), LAMPORTS_PER_SOL);
    assert_eq!(h.ledger.balance(&bob), LAMPORTS_PER_SOL);
    assert_eq!(h.ledger.balance(&PlayerId::new("treasury")), 0);
}

#[tokio::test]
async fn scenario_d_equal_distance_is_a_draw() {
    let h = harness(50);
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice.clone(), &session_id, 30).await.unwrap();
    h.engine.submit_pick(bob.clone(), &session_id, 70).await.unwrap();

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Settled);
    assert_eq!(status.winner, Some(Winner::Draw));

    let amounts = status.amounts.unwrap();
    assert_eq!(amounts.platform_fee, 0);
    assert_eq!(amounts.total_distributed(), amounts.pool);

    assert_eq!(h.ledger.balance(&alice), LAMPORTS_PER_SOL);
    assert_eq!(h.ledger.balance(&bob), LAMPORTS_PER_SOL);
}

#[tokio::test]
async fn resolution_is_idempotent_across_repeated_sweeps() {
    let h = harness(45);
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice, &session_id, 40).await.unwrap();
    h.engine.submit_pick(bob, &session_id, 60).await.unwrap();

    let transfers = h.ledger.transfers().len();
    for _ in 0..5 {
        h.engine.sweep_once().await;
    }

    assert_eq!(h.ledger.transfers().len(), transfers);
    assert_eq!(h.ledger.count_of(TransferKind::Payout), 2); // winner + platform
}

#[tokio::test]
async fn concurrent_joins_fill_exactly_one_slot() {
    let h = harness(45);
    let alice = fund(&h.ledger, "alice");
    let created = h
        .engine
        .create_session(alice, FEE, Mode::Public)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = h.engine.clone();
        let player = fund(&h.ledger, &format!("joiner-{}", i));
        let session_id = created.session_id.clone();
        handles.push(tokio::spawn(async move {
            engine.join_session(player, &session_id).await
        }));
    }

    let mut successes = 0;
    let mut full_errors = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::Full) => full_errors += 1,
            Err(other) => panic!("Unexpected join error: {:?}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(full_errors, 7);
    // Only the winning joiner's stake is escrowed alongside the creator's.
    assert_eq!(h.ledger.escrowed(), FEE * 2);
}

#[tokio::test]
async fn open_session_expires_and_refunds_creator() {
    let h = harness_with(Arc::new(FixedTargetSource { target: 50 }), |c| {
        c.duel.lobby_idle_timeout_ms = 150;
    });
    let alice = fund(&h.ledger, "alice");
    let created = h
        .engine
        .create_session(alice.clone(), FEE, Mode::Public)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.engine.sweep_once().await;

    let status = h.engine.session_status(&created.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Expired);
    assert_eq!(h.ledger.balance(&alice), LAMPORTS_PER_SOL);

    // Expired lobbies disappear from the listing immediately.
    assert!(h.engine.list_sessions().await.is_empty());
}

#[tokio::test]
async fn terminal_sessions_survive_eviction_via_audit_log() {
    let h = harness_with(Arc::new(FixedTargetSource { target: 45 }), |c| {
        c.duel.retention_window_ms = 0;
    });
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice.clone(), &session_id, 40).await.unwrap();
    h.engine.submit_pick(bob, &session_id, 60).await.unwrap();

    h.engine.sweep_once().await;
    assert_eq!(h.engine.live_sessions(), 0);

    // The audit record still answers status queries after eviction.
    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Settled);
    assert_eq!(status.winner, Some(Winner::Player(alice)));
    assert_eq!(status.target, Some(45));

    let (records, _) = h.engine.recent_settlements(None, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].session_id, session_id);
}

#[tokio::test]
async fn pick_past_deadline_resolves_and_reports_too_late() {
    let h = harness_with(Arc::new(FixedTargetSource { target: 10 }), |c| {
        c.duel.selection_window_ms = 150;
    });
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice.clone(), &session_id, 15).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The late submission is rejected but triggers the timeout transition.
    let err = h.engine.submit_pick(bob, &session_id, 11).await.unwrap_err();
    assert!(matches!(err, EngineError::TooLate));

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Settled);
    assert_eq!(status.winner, Some(Winner::Player(alice)));
}

#[tokio::test]
async fn vrf_settlement_end_to_end_conserves_funds() {
    let h = harness_with(Arc::new(VrfTargetSource::new_random()), |_| {});
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice.clone(), &session_id, 25).await.unwrap();
    h.engine.submit_pick(bob.clone(), &session_id, 75).await.unwrap();

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Settled);
    assert!(status.target.is_some());

    let amounts = status.amounts.unwrap();
    assert_eq!(amounts.total_distributed(), amounts.pool);
    assert_eq!(h.ledger.escrowed(), 0);

    // Every minor unit is accounted for across all accounts.
    let total = h.ledger.balance(&alice)
        + h.ledger.balance(&bob)
        + h.ledger.balance(&PlayerId::new("treasury"));
    assert_eq!(total, 2 * LAMPORTS_PER_SOL);

    // The settlement record carries a verifiable fairness proof.
    let proof = inspect_session(&h.engine, &session_id, |s| s.target_proof.clone())
        .await
        .flatten()
        .expect("settled session keeps its proof");
    let valid =
        VrfTargetSource::verify_target_proof(&proof, &proof.input_message.clone()).unwrap();
    assert!(valid);
}

#[tokio::test]
async fn status_hides_target_and_picks_before_resolution() {
    let h = harness(45);
    let alice = fund(&h.ledger, "alice");
    let bob = fund(&h.ledger, "bob");
    let session_id = filled_session(&h, &alice, &bob).await;

    h.engine.submit_pick(alice, &session_id, 40).await.unwrap();

    let status = h.engine.session_status(&session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Full);
    assert!(status.target.is_none());
    assert!(status.winner.is_none());
    assert!(status.picks.is_empty());
    assert!(status.deadline.is_some());
}
