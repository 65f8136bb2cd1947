use serde::Serialize;

/// Structured trace events emitted across the workspace. Each is logged as
/// a single `tracing::info!` record carrying the serialised event as a
/// field, so log pipelines can filter/aggregate on `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    SessionResolved {
        user_id: String,
        session_id: String,
        is_new: bool,
    },
    TurnStarted {
        user_id: String,
        session_id: String,
    },
    TurnCompleted {
        user_id: String,
        session_id: String,
        tool_iterations: usize,
        fuse_triggered: bool,
        duration_ms: u64,
    },
    SafetyShortCircuit {
        user_id: String,
        category: String,
    },
    ToolInvoked {
        name: String,
        ok: bool,
        duration_ms: u64,
    },
    MemoryCompacted {
        user_id: String,
        messages_compacted: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
