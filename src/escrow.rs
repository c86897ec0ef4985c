//! Escrow ledger boundary.
//!
//! The engine consumes an escrow capability but never implements real money
//! movement; the blockchain/ledger layer behind this trait is an external
//! collaborator. All amounts are integer minor units of the settlement
//! asset.

use crate::types::PlayerId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EscrowError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Transfer failed: {0}")]
    TransferFailed(String),
}

/// Receipt returned for a successful deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub receipt_id: String,
    pub player: PlayerId,
    pub amount: u64,
}

/// Staked-funds ledger: deposits lock a stake, refunds return it, payouts
/// transfer the prize. Calls may block on ledger latency; callers must not
/// let one session's transfer stall unrelated sessions.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    async fn deposit(&self, player: &PlayerId, amount: u64) -> Result<DepositReceipt, EscrowError>;

    async fn refund(&self, player: &PlayerId, amount: u64) -> Result<(), EscrowError>;

    async fn payout(&self, recipient: &PlayerId, amount: u64) -> Result<(), EscrowError>;
}

/// Kind of transfer recorded by the in-memory ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Deposit,
    Refund,
    Payout,
}

/// One ledger movement, retained for inspection.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub kind: TransferKind,
    pub player: PlayerId,
    pub amount: u64,
}

/// In-memory escrow ledger used by tests and local development. Tracks
/// per-player balances and the escrow float, and logs every transfer so
/// exactly-once behavior can be asserted.
pub struct InMemoryLedger {
    balances: DashMap<PlayerId, u64>,
    escrowed: AtomicU64,
    receipt_counter: AtomicU64,
    transfers: Mutex<Vec<TransferRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            escrowed: AtomicU64::new(0),
            receipt_counter: AtomicU64::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }

    /// Credit a player's spendable balance.
    pub fn credit(&self, player: &PlayerId, amount: u64) {
        *self.balances.entry(player.clone()).or_insert(0) += amount;
    }

    pub fn balance(&self, player: &PlayerId) -> u64 {
        self.balances.get(player).map(|b| *b).unwrap_or(0)
    }

    /// Funds currently held in escrow.
    pub fn escrowed(&self) -> u64 {
        self.escrowed.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.transfers.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, kind: TransferKind) -> usize {
        self.transfers
            .lock()
            .map(|t| t.iter().filter(|r| r.kind == kind).count())
            .unwrap_or(0)
    }

    fn record(&self, kind: TransferKind, player: &PlayerId, amount: u64) {
        if let Ok(mut log) = self.transfers.lock() {
            log.push(TransferRecord {
                kind,
                player: player.clone(),
                amount,
            });
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EscrowLedger for InMemoryLedger {
    async fn deposit(&self, player: &PlayerId, amount: u64) -> Result<DepositReceipt, EscrowError> {
        let mut balance = self
            .balances
            .get_mut(player)
            .ok_or(EscrowError::InsufficientFunds)?;
        if *balance < amount {
            return Err(EscrowError::InsufficientFunds);
        }
        *balance -= amount;
        drop(balance);

        self.escrowed.fetch_add(amount, Ordering::SeqCst);
        self.record(TransferKind::Deposit, player, amount);

        let receipt_id = self.receipt_counter.fetch_add(1, Ordering::SeqCst);
        Ok(DepositReceipt {
            receipt_id: format!("receipt-{}", receipt_id),
            player: player.clone(),
            amount,
        })
    }

    async fn refund(&self, player: &PlayerId, amount: u64) -> Result<(), EscrowError> {
        let held = self.escrowed.load(Ordering::SeqCst);
        if held < amount {
            return Err(EscrowError::TransferFailed(
                "Refund exceeds escrowed funds".to_string(),
            ));
        }
        self.escrowed.fetch_sub(amount, Ordering::SeqCst);
        *self.balances.entry(player.clone()).or_insert(0) += amount;
        self.record(TransferKind::Refund, player, amount);
        Ok(())
    }

    async fn payout(&self, recipient: &PlayerId, amount: u64) -> Result<(), EscrowError> {
        let held = self.escrowed.load(Ordering::SeqCst);
        if held < amount {
            return Err(EscrowError::TransferFailed(
                "Payout exceeds escrowed funds".to_string(),
            ));
        }
        self.escrowed.fetch_sub(amount, Ordering::SeqCst);
        *self.balances.entry(recipient.clone()).or_insert(0) += amount;
        self.record(TransferKind::Payout, recipient, amount);
        Ok(())
    }
}
