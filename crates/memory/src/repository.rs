//! JSON-file-backed implementation of the Memory Store.
//!
//! All state for every user lives in one `memory.json` under the configured
//! state path, guarded by a single `RwLock` and flushed to disk after every
//! mutation. This mirrors the gateway's session-store pattern: load once at
//! startup, hold the working copy in memory, persist on every write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sa_domain::error::{Error, Result};
use sa_domain::trace::TraceEvent;
use sa_domain::user::{
    ChartKind, ChartLock, EpisodicItem, MemoryRecord, MessageRole, SessionSummary, StoredMessage,
    User, UserFactsPartial,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    user_id: String,
    created_at: chrono::DateTime<Utc>,
    last_active_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    users: HashMap<String, User>,
    sessions: HashMap<String, SessionMeta>,
    messages: HashMap<String, Vec<StoredMessage>>,
    chart_locks: HashMap<String, ChartLock>,
    memory: HashMap<String, MemoryRecord>,
}

fn chart_lock_key(user_id: &str, kind: ChartKind) -> String {
    format!("{}::{}", user_id, kind.as_str())
}

/// Gateway-owned, JSON-file-backed store for every piece of durable state
/// the core needs: users, sessions, message history, chart locks, and the
/// three-layer memory record.
pub struct JsonRepository {
    path: PathBuf,
    state: RwLock<State>,
}

impl JsonRepository {
    /// Load or create the repository at `state_path/memory.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("memory.json");

        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            State::default()
        };

        tracing::info!(
            users = state.users.len(),
            sessions = state.sessions.len(),
            path = %path.display(),
            "memory repository loaded"
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn flush(&self, state: &State) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Other(format!("serializing memory store: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)
    }

    // ── Users ───────────────────────────────────────────────────────

    pub fn read_user(&self, user_id: &str) -> User {
        self.state
            .read()
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| User::new(user_id))
    }

    pub fn write_user_facts(&self, user_id: &str, partial: UserFactsPartial) -> Result<User> {
        let mut state = self.state.write();
        let user = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id));
        user.apply_partial(partial);
        let updated = user.clone();
        self.flush(&state)?;
        Ok(updated)
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Resolve an existing session or create a new one. Returns `(session_id, is_new)`.
    pub fn resolve_or_create_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<(String, bool)> {
        let mut state = self.state.write();

        if let Some(id) = session_id {
            if let Some(meta) = state.sessions.get_mut(id) {
                meta.last_active_at = Utc::now();
                let id = id.to_string();
                self.flush(&state)?;
                return Ok((id, false));
            }
        }

        let new_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        state.sessions.insert(
            new_id.clone(),
            SessionMeta {
                session_id: new_id.clone(),
                user_id: user_id.to_string(),
                created_at: now,
                last_active_at: now,
            },
        );
        TraceEvent::SessionResolved {
            user_id: user_id.to_string(),
            session_id: new_id.clone(),
            is_new: true,
        }
        .emit();
        self.flush(&state)?;
        Ok((new_id, true))
    }

    pub fn list_sessions(&self, user_id: &str) -> Vec<SessionSummary> {
        let state = self.state.read();
        state
            .sessions
            .values()
            .filter(|m| m.user_id == user_id)
            .map(|m| SessionSummary {
                session_id: m.session_id.clone(),
                user_id: m.user_id.clone(),
                created_at: m.created_at,
                last_active_at: m.last_active_at,
                message_count: state
                    .messages
                    .get(&m.session_id)
                    .map(|v| v.len())
                    .unwrap_or(0),
            })
            .collect()
    }

    /// The user id that owns `session_id`, if the session exists.
    pub fn session_owner(&self, session_id: &str) -> Option<String> {
        self.state.read().sessions.get(session_id).map(|m| m.user_id.clone())
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.sessions.remove(session_id);
        state.messages.remove(session_id);
        self.flush(&state)
    }

    // ── Messages ────────────────────────────────────────────────────

    pub fn append_message(&self, message: StoredMessage) -> Result<()> {
        let mut state = self.state.write();
        let session_id = message.session_id.clone();
        let user_id = state.sessions.get(&session_id).map(|m| m.user_id.clone());
        if let Some(meta) = state.sessions.get_mut(&session_id) {
            meta.last_active_at = Utc::now();
        }
        if let Some(user_id) = user_id {
            let entry = state.memory.entry(user_id).or_default();
            entry.episodic.push(EpisodicItem {
                role: message.role,
                content: message.content.clone(),
                created_at: message.created_at,
            });
        }
        state
            .messages
            .entry(session_id)
            .or_default()
            .push(message);
        self.flush(&state)
    }

    pub fn read_recent(&self, session_id: &str, limit: usize) -> Vec<StoredMessage> {
        let state = self.state.read();
        match state.messages.get(session_id) {
            Some(all) => {
                let start = all.len().saturating_sub(limit);
                all[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// The full message log for a session, in append order. Used by the
    /// auxiliary "read messages" endpoint; the orchestration loop itself
    /// only ever needs `read_recent`.
    pub fn read_messages(&self, session_id: &str) -> Vec<StoredMessage> {
        self.state
            .read()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Attach a feedback rating to a previously-persisted message. Returns
    /// `Ok(false)` if the message id wasn't found in that session.
    pub fn rate_message(&self, session_id: &str, message_id: &str, rating: i8) -> Result<bool> {
        let mut state = self.state.write();
        let found = match state.messages.get_mut(session_id) {
            Some(all) => match all.iter_mut().find(|m| m.id == message_id) {
                Some(m) => {
                    m.rating = Some(rating);
                    true
                }
                None => false,
            },
            None => false,
        };
        if found {
            self.flush(&state)?;
        }
        Ok(found)
    }

    // ── Chart locks ─────────────────────────────────────────────────

    pub fn read_chart_lock(&self, user_id: &str, kind: ChartKind) -> Option<ChartLock> {
        self.state
            .read()
            .chart_locks
            .get(&chart_lock_key(user_id, kind))
            .cloned()
    }

    pub fn write_chart_lock(
        &self,
        user_id: &str,
        kind: ChartKind,
        payload: serde_json::Value,
    ) -> Result<ChartLock> {
        let mut state = self.state.write();
        let lock = ChartLock {
            user_id: user_id.to_string(),
            kind,
            payload,
            created_at: Utc::now(),
        };
        state
            .chart_locks
            .insert(chart_lock_key(user_id, kind), lock.clone());
        self.flush(&state)?;
        Ok(lock)
    }

    // ── Memory (episodic / summaries / profile) ────────────────────
    // Keyed by user_id, not session_id: the Memory Record is a per-user
    // fact, carried across every session that user has (spec.md's "Memory
    // Record (per user)").

    pub fn read_memory(&self, user_id: &str) -> MemoryRecord {
        self.state
            .read()
            .memory
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the episodic window and append a new summary — the write
    /// made by the Auto-Summariser after compacting the oldest messages.
    pub fn write_summary(
        &self,
        user_id: &str,
        summary: sa_domain::user::MemorySummary,
        remaining_episodic: Vec<EpisodicItem>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let record = state.memory.entry(user_id.to_string()).or_default();
        record.summaries.push(summary.clone());
        record.episodic = remaining_episodic;
        TraceEvent::MemoryCompacted {
            user_id: user_id.to_string(),
            messages_compacted: summary.message_count,
        }
        .emit();
        self.flush(&state)
    }

    pub fn write_profile_fact(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.write();
        let record = state.memory.entry(user_id.to_string()).or_default();
        record.profile.insert(key.to_string(), value.to_string());
        self.flush(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> JsonRepository {
        let dir = tempfile::tempdir().unwrap();
        JsonRepository::new(dir.path()).unwrap()
    }

    #[test]
    fn creates_and_resolves_session() {
        let repo = repo();
        let (id, is_new) = repo.resolve_or_create_session("u1", None).unwrap();
        assert!(is_new);
        let (id2, is_new2) = repo.resolve_or_create_session("u1", Some(&id)).unwrap();
        assert_eq!(id, id2);
        assert!(!is_new2);
    }

    #[test]
    fn appends_and_reads_recent_messages() {
        let repo = repo();
        let (session_id, _) = repo.resolve_or_create_session("u1", None).unwrap();
        for i in 0..5 {
            repo.append_message(StoredMessage {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.clone(),
                role: MessageRole::User,
                content: format!("message {i}"),
                widget: None,
                citations: vec![],
                tool_calls: vec![],
                rating: None,
                created_at: Utc::now(),
            })
            .unwrap();
        }
        let recent = repo.read_recent(&session_id, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent.last().unwrap().content, "message 4");
    }

    #[test]
    fn chart_lock_is_keyed_per_user_and_kind() {
        let repo = repo();
        repo.write_chart_lock("u1", ChartKind::Bazi, serde_json::json!({"a": 1}))
            .unwrap();
        let lock = repo.read_chart_lock("u1", ChartKind::Bazi).unwrap();
        assert_eq!(lock.payload["a"], 1);
        assert!(repo.read_chart_lock("u1", ChartKind::Tarot).is_none());
    }

    #[test]
    fn writing_a_new_chart_lock_supersedes_the_previous_one() {
        let repo = repo();
        repo.write_chart_lock("u1", ChartKind::Bazi, serde_json::json!({"v": 1}))
            .unwrap();
        repo.write_chart_lock("u1", ChartKind::Bazi, serde_json::json!({"v": 2}))
            .unwrap();
        let lock = repo.read_chart_lock("u1", ChartKind::Bazi).unwrap();
        assert_eq!(lock.payload["v"], 2);
    }

    #[test]
    fn user_facts_partial_update_only_changes_present_fields() {
        let repo = repo();
        repo.write_user_facts(
            "u1",
            UserFactsPartial {
                birth_date: Some("1990-01-01".into()),
                ..Default::default()
            },
        )
        .unwrap();
        repo.write_user_facts(
            "u1",
            UserFactsPartial {
                birth_time: Some("08:30".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let user = repo.read_user("u1");
        assert_eq!(user.birth_date.as_deref(), Some("1990-01-01"));
        assert_eq!(user.birth_time.as_deref(), Some("08:30"));
    }
}
