//! Process-wide session store.
//!
//! Sessions live behind per-session locks inside a concurrent map, so
//! unrelated duels progress independently while each duel's mutations stay
//! serialized. Private sessions are additionally indexed by invite code.

use crate::session::DuelSession;
use crate::types::{Mode, SessionState, SessionSummary};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A registered session behind its mutation lock.
pub struct SessionSlot {
    pub session: Mutex<DuelSession>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionSlot>>,
    /// invite code -> session id, active private sessions only.
    invite_index: DashMap<String, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            invite_index: DashMap::new(),
        }
    }

    pub fn insert(&self, session: DuelSession) -> Arc<SessionSlot> {
        let id = session.id.clone();
        if let Some(code) = session.invite_code.clone() {
            self.invite_index.insert(code, id.clone());
        }
        let slot = Arc::new(SessionSlot {
            session: Mutex::new(session),
        });
        self.sessions.insert(id, slot.clone());
        slot
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Look up by session id first, then by invite code.
    pub fn resolve(&self, key: &str) -> Option<Arc<SessionSlot>> {
        if let Some(slot) = self.get(key) {
            return Some(slot);
        }
        let session_id = self.invite_index.get(key).map(|entry| entry.value().clone())?;
        self.get(&session_id)
    }

    pub fn invite_code_active(&self, code: &str) -> bool {
        self.invite_index.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all slots, for the sweeper.
    pub fn slots(&self) -> Vec<(String, Arc<SessionSlot>)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Open public sessions with a free slot, most recent first.
    /// Snapshots the slots first so no map shard stays locked across an
    /// await on a busy session.
    pub async fn list_open_public(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for (_, slot) in self.slots() {
            let session = slot.session.lock().await;
            if session.mode == Mode::Public
                && session.state == SessionState::Open
                && session.players.len() < 2
            {
                summaries.push(session.summary());
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Drop a session and its invite index entry.
    pub fn remove(&self, session_id: &str, invite_code: Option<&str>) {
        self.sessions.remove(session_id);
        if let Some(code) = invite_code {
            self.invite_index.remove(code);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
