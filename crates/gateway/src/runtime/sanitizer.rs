//! The Stream Sanitiser: a buffered transformer sitting between the LM's
//! raw text stream and the client's `text` events.
//!
//! Two responsibilities:
//! 1. Strip tool-call leakage — text that looks like a model narrating its
//!    own tool call (a fenced code block containing `default_api.X(...)`)
//!    is suppressed from the user-visible stream. If it parses as a tool
//!    call it is forwarded to the orchestrator as one; otherwise it is
//!    dropped silently.
//! 2. Strip characters outside the target-language allow-set (CJK +
//!    ASCII + common punctuation for the default Traditional Chinese
//!    target) before they ever reach the client.
//!
//! Buffers roughly a `WINDOW_CHARS`-character window and emits at
//! window-fill, sentence-terminator, or stream-end — never per-token,
//! so leakage spanning a chunk boundary is still caught.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const WINDOW_CHARS: usize = 60;
const FENCE: &str = "```";
const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?', '\n'];

fn tool_call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)default_api\.(\w+)\((\{.*\})\)").expect("static regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum SanitizedEvent {
    /// Clean text ready to emit as a `text` event.
    Text(String),
    /// A tool call recovered from leaked narration text.
    ParsedToolCall { name: String, arguments: Value },
}

pub struct StreamSanitizer {
    cjk_mode: bool,
    /// Raw text received but not yet classified as plain or fenced.
    carry: String,
    /// Filtered plain text awaiting a window-fill or terminator to flush.
    pending: String,
    in_fence: bool,
}

impl StreamSanitizer {
    pub fn new(target_language: &str) -> Self {
        Self {
            cjk_mode: target_language.starts_with("zh"),
            carry: String::new(),
            pending: String::new(),
            in_fence: false,
        }
    }

    /// Feed a chunk of raw LM output; returns zero or more ready events.
    pub fn push(&mut self, token: &str) -> Vec<SanitizedEvent> {
        self.carry.push_str(token);
        let mut events = Vec::new();
        self.drain_carry(&mut events);
        events
    }

    /// Signal end of stream; flushes any remaining buffered text. An
    /// unterminated fence at stream end is leakage with nowhere to
    /// resolve to, so its content is dropped rather than surfaced.
    pub fn finish(&mut self) -> Vec<SanitizedEvent> {
        let mut events = Vec::new();
        if !self.in_fence {
            let remainder = std::mem::take(&mut self.carry);
            self.buffer_plain_text(&remainder, &mut events);
        } else {
            self.carry.clear();
        }
        if !self.pending.is_empty() {
            events.push(SanitizedEvent::Text(std::mem::take(&mut self.pending)));
        }
        events
    }

    fn drain_carry(&mut self, events: &mut Vec<SanitizedEvent>) {
        loop {
            if self.in_fence {
                match self.carry.find(FENCE) {
                    Some(end) => {
                        let body: String = self.carry.drain(..end).collect();
                        self.carry.drain(..FENCE.len());
                        self.in_fence = false;
                        self.handle_fence_body(&body, events);
                    }
                    None => break,
                }
            } else {
                match self.carry.find(FENCE) {
                    Some(start) => {
                        let plain: String = self.carry.drain(..start).collect();
                        self.carry.drain(..FENCE.len());
                        self.in_fence = true;
                        self.buffer_plain_text(&plain, events);
                    }
                    None => {
                        let hold = trailing_backtick_len(&self.carry);
                        let take = self.carry.len() - hold;
                        let plain: String = self.carry.drain(..take).collect();
                        self.buffer_plain_text(&plain, events);
                        break;
                    }
                }
            }
        }
    }

    fn handle_fence_body(&mut self, body: &str, events: &mut Vec<SanitizedEvent>) {
        let body = body.strip_prefix("tool_code").unwrap_or(body);
        if let Some(caps) = tool_call_pattern().captures(body) {
            let name = caps[1].to_string();
            if let Ok(arguments) = serde_json::from_str::<Value>(&caps[2]) {
                events.push(SanitizedEvent::ParsedToolCall { name, arguments });
                return;
            }
        }
        tracing::debug!("stream sanitiser dropped unparseable fenced content");
    }

    fn buffer_plain_text(&mut self, text: &str, events: &mut Vec<SanitizedEvent>) {
        for ch in text.chars() {
            if allowed_char(ch, self.cjk_mode) {
                self.pending.push(ch);
            }
        }
        self.flush_ready(events);
    }

    fn flush_ready(&mut self, events: &mut Vec<SanitizedEvent>) {
        loop {
            if self.pending.is_empty() {
                break;
            }
            let term_idx = self
                .pending
                .char_indices()
                .find(|(_, c)| SENTENCE_TERMINATORS.contains(c))
                .map(|(i, c)| i + c.len_utf8());
            let char_count = self.pending.chars().count();

            if let Some(idx) = term_idx {
                let chunk: String = self.pending.drain(..idx).collect();
                events.push(SanitizedEvent::Text(chunk));
            } else if char_count >= WINDOW_CHARS {
                let byte_idx = self
                    .pending
                    .char_indices()
                    .nth(WINDOW_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(self.pending.len());
                let chunk: String = self.pending.drain(..byte_idx).collect();
                events.push(SanitizedEvent::Text(chunk));
            } else {
                break;
            }
        }
    }
}

fn trailing_backtick_len(s: &str) -> usize {
    s.chars().rev().take_while(|&c| c == '`').count().min(2)
}

fn allowed_char(c: char, cjk_mode: bool) -> bool {
    if !cjk_mode {
        return true;
    }
    c.is_ascii()
        || c.is_whitespace()
        || (0x4E00..=0x9FFF).contains(&(c as u32)) // CJK unified ideographs
        || (0x3000..=0x303F).contains(&(c as u32)) // CJK punctuation
        || (0xFF00..=0xFFEF).contains(&(c as u32)) // fullwidth forms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_text(events: &[SanitizedEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                SanitizedEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_passes_through_unmodified() {
        let mut s = StreamSanitizer::new("zh-Hant");
        let mut events = s.push("你好，今天過得好嗎？");
        events.extend(s.finish());
        assert_eq!(collect_text(&events), "你好，今天過得好嗎？");
    }

    #[test]
    fn strips_non_target_language_characters() {
        let mut s = StreamSanitizer::new("zh-Hant");
        let mut events = s.push("你好мир世界");
        events.extend(s.finish());
        let text = collect_text(&events);
        assert!(!text.contains('м'));
        assert!(text.contains("你好"));
        assert!(text.contains("世界"));
    }

    #[test]
    fn emits_on_sentence_terminator_before_window_fills() {
        let mut s = StreamSanitizer::new("zh-Hant");
        let events = s.push("你好。");
        assert_eq!(events, vec![SanitizedEvent::Text("你好。".to_string())]);
    }

    #[test]
    fn suppresses_fenced_tool_call_leakage_split_across_chunks() {
        let mut s = StreamSanitizer::new("zh-Hant");
        let mut events = Vec::new();
        events.extend(s.push("好的，讓我計算一下 ``"));
        events.extend(s.push(
            "`tool_code\nprint(default_api.western_astrology({\"birthDate\": \"1990-07-22\", \"birthTime\": \"14:15\", \"gender\": \"male\"}))\n```",
        ));
        events.extend(s.finish());

        let text = collect_text(&events);
        assert!(!text.contains("tool_code"));
        assert!(!text.contains("default_api"));

        let parsed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SanitizedEvent::ParsedToolCall { .. }))
            .collect();
        assert_eq!(parsed.len(), 1);
        if let SanitizedEvent::ParsedToolCall { name, arguments } = parsed[0] {
            assert_eq!(name, "western_astrology");
            assert_eq!(arguments["birthDate"], "1990-07-22");
        }
    }

    #[test]
    fn unterminated_fence_is_dropped_at_stream_end() {
        let mut s = StreamSanitizer::new("zh-Hant");
        let mut events = s.push("前言 ```tool_code\nprint(default_api.foo({}))");
        events.extend(s.finish());
        assert!(!collect_text(&events).contains("tool_code"));
        assert!(events
            .iter()
            .all(|e| !matches!(e, SanitizedEvent::ParsedToolCall { .. })));
    }

    #[test]
    fn long_text_without_terminators_flushes_at_window() {
        let mut s = StreamSanitizer::new("zh-Hant");
        let long = "字".repeat(100);
        let mut events = s.push(&long);
        events.extend(s.finish());
        assert!(events.len() >= 2);
        assert_eq!(collect_text(&events).chars().count(), 100);
    }
}
