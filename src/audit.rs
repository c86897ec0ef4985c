//! Append-only settlement audit log.
//!
//! One record per session that reaches a terminal state, written before the
//! session is evicted from the registry. Records carry the VRF proof so a
//! dispute can be resolved from the log alone.

use crate::errors::{EngineError, EngineResult};
use crate::storage::DuelStorage;
use crate::types::{Mode, PlayerId, SessionState, SettlementAmounts, TargetProof, Winner};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const RECORD_PREFIX: &str = "duel:record:";
const RECENT_INDEX_PREFIX: &[u8] = b"duel:index:recent:";
const ENGINE_STATS_KEY: &[u8] = b"duel:stats";

/// Durable record of one settled, cancelled or expired duel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub session_id: String,
    pub mode: Mode,
    pub players: Vec<PlayerId>,
    /// Committed picks keyed by wallet address.
    pub picks: HashMap<String, u8>,
    pub target: Option<u8>,
    pub winner: Option<Winner>,
    pub entry_fee: u64,
    pub amounts: SettlementAmounts,
    pub final_state: SessionState,
    pub resolved_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_proof: Option<TargetProof>,
}

fn record_key(session_id: &str) -> Vec<u8> {
    format!("{}{}", RECORD_PREFIX, session_id).into_bytes()
}

fn recent_index_key(resolved_at_ms: i64, session_id: &str) -> Vec<u8> {
    // Newest-first scans: invert the timestamp as the primary sort key.
    // Key layout: prefix | inv_ts(be) | session_id
    let inv_ts = u64::MAX - resolved_at_ms.max(0) as u64;
    let mut key = Vec::with_capacity(RECENT_INDEX_PREFIX.len() + 8 + session_id.len());
    key.extend_from_slice(RECENT_INDEX_PREFIX);
    key.extend_from_slice(&inv_ts.to_be_bytes());
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// Append a settlement record. Idempotent per session id: a retried write
/// lands on the same keys and the stats update is skipped for rewrites.
pub fn append_record(storage: &DuelStorage, record: &SettlementRecord) -> EngineResult<()> {
    let key = record_key(&record.session_id);
    let first_write = storage.get(&key).is_none();

    let bytes = serde_json::to_vec(record)?;
    let index_key = recent_index_key(record.resolved_at, &record.session_id);

    let items: Vec<(Vec<u8>, Vec<u8>)> = vec![(key, bytes), (index_key, Vec::new())];
    storage
        .batch_write(&items)
        .map_err(|e| EngineError::Storage(format!("Audit write failed: {}", e)))?;

    if first_write {
        update_stats(storage, record)?;
    }

    tracing::debug!(
        session_id = %record.session_id,
        state = %record.final_state,
        "Settlement record persisted"
    );
    Ok(())
}

pub fn load_record(storage: &DuelStorage, session_id: &str) -> EngineResult<Option<SettlementRecord>> {
    let Some(bytes) = storage.get(&record_key(session_id)) else {
        return Ok(None);
    };

    let record: SettlementRecord = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Storage(format!(
            "Failed to decode settlement record for {}: {}",
            session_id, e
        ))
    })?;
    Ok(Some(record))
}

/// Page through settlement records, newest first. Returns records plus a
/// hex cursor for the next page when more may exist.
pub fn load_recent(
    storage: &DuelStorage,
    cursor_hex: Option<&str>,
    limit: usize,
) -> EngineResult<(Vec<SettlementRecord>, Option<String>)> {
    let cursor_bytes = match cursor_hex {
        Some(c) => Some(
            hex::decode(c)
                .map_err(|e| EngineError::Storage(format!("Invalid cursor hex: {}", e)))?,
        ),
        None => None,
    };

    let rows = storage.scan_prefix(RECENT_INDEX_PREFIX, cursor_bytes.as_deref(), limit.max(1));

    let mut records = Vec::with_capacity(rows.len());
    let mut next_cursor = None;

    for (key, _value) in rows {
        if key.len() <= RECENT_INDEX_PREFIX.len() + 8 {
            continue;
        }
        let session_id = String::from_utf8_lossy(&key[RECENT_INDEX_PREFIX.len() + 8..]).to_string();
        match load_record(storage, &session_id)? {
            Some(record) => records.push(record),
            None => {
                tracing::warn!(session_id = %session_id, "Audit index entry without record");
            }
        }
        next_cursor = Some(hex::encode(&key));
    }

    let final_cursor = if records.len() >= limit {
        next_cursor
    } else {
        None
    };
    Ok((records, final_cursor))
}

/// Engine-wide settlement totals, in minor units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_wagered: u64,
    pub total_paid_out: u64,
    pub total_refunded: u64,
    pub total_platform_fees: u64,
    pub duel_count: u64,
    pub draw_count: u64,
    pub cancelled_count: u64,
    pub expired_count: u64,
}

pub fn load_stats(storage: &DuelStorage) -> EngineResult<EngineStats> {
    match storage.get(ENGINE_STATS_KEY) {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Storage(format!("Failed to decode engine stats: {}", e))),
        None => Ok(EngineStats::default()),
    }
}

fn update_stats(storage: &DuelStorage, record: &SettlementRecord) -> EngineResult<()> {
    let mut stats = load_stats(storage)?;

    stats.total_wagered += record.amounts.pool;
    stats.total_paid_out += record.amounts.winner_payout;
    stats.total_platform_fees += record.amounts.platform_fee;
    stats.total_refunded += record.amounts.refunds.iter().map(|r| r.amount).sum::<u64>();
    stats.duel_count += 1;

    match record.final_state {
        SessionState::Cancelled => stats.cancelled_count += 1,
        SessionState::Expired => stats.expired_count += 1,
        _ => {}
    }
    if record.winner == Some(Winner::Draw) {
        stats.draw_count += 1;
    }

    let bytes = serde_json::to_vec(&stats)?;
    storage
        .put(ENGINE_STATS_KEY, &bytes)
        .map_err(|e| EngineError::Storage(format!("Failed to persist engine stats: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, resolved_at: i64) -> SettlementRecord {
        let p1 = PlayerId::new("alice");
        let p2 = PlayerId::new("bob");
        SettlementRecord {
            session_id: session_id.to_string(),
            mode: Mode::Public,
            players: vec![p1.clone(), p2],
            picks: HashMap::from([("alice".to_string(), 40), ("bob".to_string(), 60)]),
            target: Some(45),
            winner: Some(Winner::Player(p1)),
            entry_fee: 20_000_000,
            amounts: SettlementAmounts {
                pool: 40_000_000,
                winner_payout: 39_200_000,
                platform_fee: 800_000,
                refunds: vec![],
            },
            final_state: SessionState::Settled,
            resolved_at,
            target_proof: None,
        }
    }

    #[test]
    fn test_append_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DuelStorage::open(dir.path()).unwrap();

        append_record(&storage, &record("s1", 1_000)).unwrap();
        let loaded = load_record(&storage, "s1").unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.target, Some(45));
        assert!(load_record(&storage, "missing").unwrap().is_none());
    }

    #[test]
    fn test_recent_is_newest_first_with_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DuelStorage::open(dir.path()).unwrap();

        for i in 0..5 {
            append_record(&storage, &record(&format!("s{}", i), 1_000 + i)).unwrap();
        }

        let (page, cursor) = load_recent(&storage, None, 3).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].session_id, "s4");
        assert_eq!(page[2].session_id, "s2");
        let cursor = cursor.expect("more pages expected");

        let (rest, _) = load_recent(&storage, Some(&cursor), 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].session_id, "s1");
        assert_eq!(rest[1].session_id, "s0");
    }

    #[test]
    fn test_rewrite_does_not_double_count_stats() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DuelStorage::open(dir.path()).unwrap();

        let r = record("s1", 1_000);
        append_record(&storage, &r).unwrap();
        append_record(&storage, &r).unwrap();

        let stats = load_stats(&storage).unwrap();
        assert_eq!(stats.duel_count, 1);
        assert_eq!(stats.total_wagered, 40_000_000);
        assert_eq!(stats.total_paid_out, 39_200_000);
        assert_eq!(stats.total_platform_fees, 800_000);
    }
}
