//! The Auto-Summariser — condenses the oldest episodic messages into a
//! durable summary once the episodic window grows past `window_threshold`,
//! keeping only the latest `episodic_k` messages in the live window.
//!
//! A failed summarisation is non-fatal: the episodic window is simply left
//! to grow and compaction is retried on the next turn.

use chrono::Utc;
use sa_domain::config::OrchestrationConfig;
use sa_domain::error::Result;
use sa_domain::tool::Message;
use sa_domain::user::{EpisodicItem, MemorySummary};
use sa_providers::traits::ChatRequest;
use sa_providers::LlmProvider;
use sa_memory::JsonRepository;

/// Whether the episodic window has grown past the trigger threshold.
pub fn should_compact(episodic_len: usize, window_threshold: usize) -> bool {
    episodic_len > window_threshold
}

/// Split the episodic window into `(to_compact, to_keep)`, keeping the most
/// recent `keep_k` items live.
pub fn split_for_compaction(
    episodic: &[EpisodicItem],
    keep_k: usize,
) -> (&[EpisodicItem], &[EpisodicItem]) {
    let total = episodic.len();
    if total <= keep_k {
        return (&episodic[0..0], episodic);
    }
    let cut = total - keep_k;
    (&episodic[..cut], &episodic[cut..])
}

fn build_conversation_text(items: &[EpisodicItem]) -> String {
    let mut buf = String::new();
    for item in items {
        buf.push_str(&format!("{:?}: {}\n", item.role, item.content));
    }
    buf
}

/// Summarise `items` into a neutral, third-person recap of at most ~250
/// words, via the Strong model tier (long-synthesis role).
pub async fn generate_summary(provider: &dyn LlmProvider, items: &[EpisodicItem]) -> Result<String> {
    let conversation = build_conversation_text(items);
    let prompt = format!(
        "Summarise the following conversation between a user and an advisory \
         assistant into a neutral, third-person recap of at most 250 words. \
         Preserve concrete facts (dates, names, places, prior results) and the \
         topics discussed; omit greetings and small talk.\n\nCONVERSATION:\n{conversation}"
    );

    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        tools: vec![],
        temperature: Some(0.2),
        max_tokens: Some(600),
        json_mode: false,
        model: None,
    };

    let resp = provider.chat(&req).await?;
    Ok(resp.content)
}

fn build_summary_record(text: String, items: &[EpisodicItem]) -> MemorySummary {
    let range_start = items.first().map(|i| i.created_at).unwrap_or_else(Utc::now);
    let range_end = items.last().map(|i| i.created_at).unwrap_or_else(Utc::now);
    MemorySummary {
        text,
        range_start,
        range_end,
        message_count: items.len(),
        created_at: Utc::now(),
    }
}

/// Run the full compaction flow for one user's memory record: check → split
/// → summarise → persist. Returns `Ok(None)` when compaction was not due.
/// `session_id` is only carried through for log context — the Memory
/// Record itself is keyed by `user_id` and spans every session that user
/// has.
pub async fn run_compaction(
    provider: &dyn LlmProvider,
    repo: &JsonRepository,
    user_id: &str,
    session_id: &str,
    config: &OrchestrationConfig,
) -> Result<Option<MemorySummary>> {
    let memory = repo.read_memory(user_id);
    if !should_compact(memory.episodic.len(), config.window_threshold) {
        return Ok(None);
    }

    let (to_compact, to_keep) = split_for_compaction(&memory.episodic, config.episodic_k);
    if to_compact.is_empty() {
        return Ok(None);
    }

    let text = generate_summary(provider, to_compact).await?;
    let summary = build_summary_record(text, to_compact);
    repo.write_summary(user_id, summary.clone(), to_keep.to_vec())?;

    tracing::info!(
        session_id,
        user_id,
        messages_compacted = summary.message_count,
        "auto-summariser compacted episodic window"
    );

    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::user::MessageRole;

    fn item(content: &str) -> EpisodicItem {
        EpisodicItem {
            role: MessageRole::User,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn should_compact_respects_threshold() {
        assert!(!should_compact(30, 30));
        assert!(should_compact(31, 30));
    }

    #[test]
    fn split_keeps_last_k_items() {
        let items: Vec<_> = (0..35).map(|i| item(&format!("msg {i}"))).collect();
        let (to_compact, to_keep) = split_for_compaction(&items, 20);
        assert_eq!(to_compact.len(), 15);
        assert_eq!(to_keep.len(), 20);
        assert_eq!(to_compact[0].content, "msg 0");
        assert_eq!(to_keep[0].content, "msg 15");
        assert_eq!(to_keep.last().unwrap().content, "msg 34");
    }

    #[test]
    fn split_is_noop_when_under_keep_threshold() {
        let items: Vec<_> = (0..10).map(|i| item(&format!("msg {i}"))).collect();
        let (to_compact, to_keep) = split_for_compaction(&items, 20);
        assert!(to_compact.is_empty());
        assert_eq!(to_keep.len(), 10);
    }

    #[test]
    fn summary_record_spans_first_to_last_item() {
        let items: Vec<_> = (0..5).map(|i| item(&format!("msg {i}"))).collect();
        let record = build_summary_record("recap".into(), &items);
        assert_eq!(record.message_count, 5);
        assert_eq!(record.text, "recap");
    }
}
