//! Shared application state, injected into every handler and runtime task.
//!
//! Everything here is a constructor-injected collaborator rather than a
//! global — `AppState` is built once in `main` and cloned cheaply (each
//! field is an `Arc`) into the axum router and into each spawned turn task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sa_domain::config::Config;
use sa_memory::JsonRepository;
use sa_providers::ProviderRegistry;
use sa_tools::ToolRegistry;
use tokio::sync::Semaphore;

use crate::runtime::cancel::CancelMap;

/// Per-session exclusivity. A second turn request for a session that
/// already has one in flight is rejected with 429 rather than queued.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock for `session_id`. Returns `None` if a turn is
    /// already running for this session.
    pub fn try_acquire(&self, session_id: &str) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let sem = self
            .inner
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        sem.try_acquire_owned().ok()
    }
}

/// Shared application state passed to every API handler and turn task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub memory: Arc<JsonRepository>,
    pub tools: Arc<ToolRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub cancel_map: Arc<CancelMap>,
    pub session_locks: SessionLocks,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        memory: Arc<JsonRepository>,
        tools: Arc<ToolRegistry>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            config,
            memory,
            tools,
            providers,
            cancel_map: Arc::new(CancelMap::new()),
            session_locks: SessionLocks::new(),
        }
    }
}
