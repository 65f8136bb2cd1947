//! The Orchestration Loop — the core of the core. Turns one user message
//! into one assistant reply, interleaving LM calls with tool dispatch, and
//! emits a stream of [`TurnEvent`]s that the API layer turns into SSE.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use sa_domain::capability::ModelRole;
use sa_domain::stream::StreamEvent;
use sa_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use sa_domain::trace::TraceEvent;
use sa_domain::user::{ChartKind, Gender, MessageRole, StoredMessage, UserFactsPartial, WidgetPayload};
use sa_providers::traits::ChatRequest;
use sa_providers::LlmProvider;
use sa_tools::calculators::{self, CalculatorInput};
use sa_tools::profile;
use sa_tools::TurnContext as ToolTurnContext;

use crate::runtime::compact;
use crate::runtime::prompt::{self, PromptInputs};
use crate::runtime::safety;
use crate::runtime::sanitizer::{SanitizedEvent, StreamSanitizer};
use crate::runtime::tools::build_tool_definitions;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Executing,
    Completed,
    Failed,
}

/// One event in a turn's output stream, in emission order. The API layer
/// maps each variant to one SSE `event:` name with a JSON `data:` body.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TurnEvent {
    #[serde(rename = "session")]
    Session { session_id: String },
    #[serde(rename = "text")]
    Text { chunk: String },
    #[serde(rename = "widget")]
    Widget {
        #[serde(rename = "type")]
        kind: String,
        data: Value,
        compact: bool,
    },
    #[serde(rename = "tool")]
    Tool {
        name: String,
        status: ToolStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fuse_triggered: Option<bool>,
    },
    #[serde(rename = "progress")]
    Progress {
        task_name: String,
        progress: f32,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "done")]
    Done { session_id: String },
}

/// Turn-level error taxonomy (§7). Distinct from [`sa_domain::Error`], which
/// only covers transport/storage concerns — these are the failure modes the
/// Orchestration Loop itself recovers from or converts into a template reply.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("input error: {0}")]
    Input(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub struct TurnInput {
    pub user_id: String,
    pub session_id: Option<String>,
    pub message: String,
}

const APOLOGY_TEMPLATE: &str =
    "抱歉，我這邊暫時遇到一點問題，可以請你稍後再試一次嗎？";
const FORCE_EXIT_TEMPLATE: &str =
    "讓我重新整理一下思緒，可以請你換個方式，再說一次你想了解的部分嗎？";
const FUSE_SIGNATURE_PLACEHOLDER: &str = "fuse-synthesized";

/// Entry point: spawns the turn as its own task and returns the receiving
/// half of the event channel. `permit` is the per-session lock acquired by
/// the caller; it is held for the lifetime of the turn and dropped when the
/// task completes, whatever the outcome.
pub fn run_turn(
    state: AppState,
    input: TurnInput,
    permit: tokio::sync::OwnedSemaphorePermit,
) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let _permit = permit;
        run_turn_inner(state, input, tx).await;
    });
    rx
}

async fn run_turn_inner(state: AppState, input: TurnInput, tx: mpsc::Sender<TurnEvent>) {
    let started_at = Instant::now();

    let (session_id, is_new) = match state
        .memory
        .resolve_or_create_session(&input.user_id, input.session_id.as_deref())
    {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to resolve session");
            return;
        }
    };
    if is_new {
        let _ = tx.send(TurnEvent::Session { session_id: session_id.clone() }).await;
    }

    let cancel_token = state.cancel_map.register(&session_id);
    let timeout_secs = state.config.orchestration.turn_timeout_seconds;

    let body = run_turn_body(&state, &input, &session_id, &tx, &cancel_token);
    let (tool_iterations, fuse_triggered) = match tokio::time::timeout(Duration::from_secs(timeout_secs), body).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(session_id = %session_id, "turn exceeded timeout, forcing exit");
            persist_and_emit_final(&state, &session_id, &input.user_id, FORCE_EXIT_TEMPLATE, None, &[], &tx)
                .await;
            let _ = tx.send(TurnEvent::Done { session_id: session_id.clone() }).await;
            (0, false)
        }
    };

    state.cancel_map.remove(&session_id);
    TraceEvent::TurnCompleted {
        user_id: input.user_id.clone(),
        session_id,
        tool_iterations,
        fuse_triggered,
        duration_ms: started_at.elapsed().as_millis() as u64,
    }
    .emit();
}

async fn run_turn_body(
    state: &AppState,
    input: &TurnInput,
    session_id: &str,
    tx: &mpsc::Sender<TurnEvent>,
    cancel_token: &crate::runtime::cancel::CancelToken,
) -> (usize, bool) {
    TraceEvent::TurnStarted {
        user_id: input.user_id.clone(),
        session_id: session_id.to_string(),
    }
    .emit();

    let user_message = StoredMessage {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        role: MessageRole::User,
        content: input.message.clone(),
        widget: None,
        citations: vec![],
        tool_calls: vec![],
        rating: None,
        created_at: Utc::now(),
    };
    if let Err(e) = state.memory.append_message(user_message) {
        tracing::warn!(error = %e, "failed to persist user message");
        return (0, false);
    }

    // Step 3: Safety Filter short-circuit.
    if let Some((category, reply)) = safety::check(&input.message) {
        TraceEvent::SafetyShortCircuit {
            user_id: input.user_id.clone(),
            category: category.as_str().to_string(),
        }
        .emit();
        let _ = tx.send(TurnEvent::Text { chunk: reply.to_string() }).await;
        persist_and_emit_final(state, session_id, &input.user_id, reply, None, &[], tx).await;
        let _ = tx.send(TurnEvent::Done { session_id: session_id.to_string() }).await;
        return (0, false);
    }

    // Step 4: load context.
    let history_limit = state.config.orchestration.history_limit;
    let recent = state.memory.read_recent(session_id, history_limit);
    let turn_count = recent
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .count();
    let memory_record = state.memory.read_memory(&input.user_id);
    let mut user = state.memory.read_user(&input.user_id);

    // Step 5: extract structured data and persist updates.
    let extracted = UserFactsPartial {
        birth_date: extract_birth_date(&input.message),
        birth_time: extract_birth_time(&input.message),
        birth_location: extract_location(&input.message),
        gender: extract_gender(&input.message),
        ..Default::default()
    };
    if extracted.birth_date.is_some()
        || extracted.birth_time.is_some()
        || extracted.birth_location.is_some()
        || extracted.gender.is_some()
    {
        match state.memory.write_user_facts(&input.user_id, extracted) {
            Ok(updated) => user = updated,
            Err(e) => tracing::warn!(error = %e, "failed to persist extracted user facts"),
        }
    }

    // Step 6: turn-level signals.
    let chart_locks: Vec<(ChartKind, bool)> = ChartKind::all()
        .iter()
        .map(|k| (*k, state.memory.read_chart_lock(&input.user_id, *k).is_some()))
        .collect();
    let has_birth_data = user.has_birth_data();
    let has_chart = chart_locks.iter().any(|(_, present)| *present);

    // Step 7: system prompt + model tier.
    let system_prompt = prompt::assemble(&PromptInputs {
        user: &user,
        chart_locks: &chart_locks,
        memory: &memory_record,
        message: &input.message,
        turn_count,
        target_language: &state.config.language.target_language,
    });

    let provider = match state.providers.get(ModelRole::Fast) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "no fast-tier provider available");
            persist_and_emit_final(state, session_id, &input.user_id, APOLOGY_TEMPLATE, None, &[], tx)
                .await;
            let _ = tx.send(TurnEvent::Done { session_id: session_id.to_string() }).await;
            return (0, false);
        }
    };

    let tool_definitions = build_tool_definitions(&state.tools, &state.config.tools);
    let ctx = ToolTurnContext {
        user_id: input.user_id.clone(),
        session_id: session_id.to_string(),
    };

    let mut contents: Vec<Message> = std::iter::once(Message::system(system_prompt))
        .chain(recent.iter().map(stored_to_message))
        .collect();

    let mut final_text = String::new();
    let mut fuse_used = false;
    let mut chart_produced_this_turn: Option<(ChartKind, Value)> = None;
    let mut tool_names_used: Vec<String> = Vec::new();
    let max_iterations = state.config.orchestration.max_tool_iterations;
    let mut forced_exit = true;
    let mut iterations_done: usize = 0;

    'iterations: for iteration in 0..max_iterations {
        if cancel_token.is_cancelled() {
            return (iterations_done, fuse_used);
        }
        iterations_done += 1;

        let sanitizer = std::cell::RefCell::new(StreamSanitizer::new(&state.config.language.target_language));
        let mut iteration_text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        let stream = match provider.chat_stream(&ChatRequest {
            messages: contents.clone(),
            tools: tool_definitions.clone(),
            temperature: None,
            max_tokens: None,
            json_mode: false,
            model: None,
        }).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "LM stream request failed");
                final_text = APOLOGY_TEMPLATE.to_string();
                forced_exit = false;
                break 'iterations;
            }
        };
        tokio::pin!(stream);

        let mut lm_failed = false;
        while let Some(event) = stream.next().await {
            if cancel_token.is_cancelled() {
                return (iterations_done, fuse_used);
            }
            match event {
                Ok(StreamEvent::Token { text }) => {
                    let events = sanitizer.borrow_mut().push(&text);
                    for ev in events {
                        match ev {
                            SanitizedEvent::Text(t) => {
                                iteration_text.push_str(&t);
                                let _ = tx.send(TurnEvent::Text { chunk: t }).await;
                            }
                            SanitizedEvent::ParsedToolCall { name, arguments } => {
                                tool_calls.push(ToolCall {
                                    call_id: Uuid::new_v4().to_string(),
                                    tool_name: name,
                                    arguments,
                                    signature: None,
                                });
                            }
                        }
                    }
                }
                Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments, signature }) => {
                    tool_calls.push(ToolCall { call_id, tool_name, arguments, signature });
                }
                Ok(StreamEvent::Done { .. }) => break,
                Ok(StreamEvent::Error { message }) => {
                    tracing::warn!(error = %message, "LM reported a streaming error");
                    lm_failed = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "LM stream error");
                    lm_failed = true;
                    break;
                }
            }
        }
        for ev in sanitizer.borrow_mut().finish() {
            match ev {
                SanitizedEvent::Text(t) => {
                    iteration_text.push_str(&t);
                    let _ = tx.send(TurnEvent::Text { chunk: t }).await;
                }
                SanitizedEvent::ParsedToolCall { name, arguments } => {
                    tool_calls.push(ToolCall {
                        call_id: Uuid::new_v4().to_string(),
                        tool_name: name,
                        arguments,
                        signature: None,
                    });
                }
            }
        }

        if lm_failed {
            final_text = APOLOGY_TEMPLATE.to_string();
            forced_exit = false;
            break 'iterations;
        }

        final_text = iteration_text;

        // Step 9: fuse — at most once, only on the first tool-call-free iteration.
        if tool_calls.is_empty() && iteration == 0 && !fuse_used {
            if let Some(kind) = try_fuse(&user, has_birth_data, has_chart, &input.message) {
                let args = fuse_arguments(&user);
                fuse_used = true;
                let _ = tx
                    .send(TurnEvent::Tool {
                        name: kind.as_str().to_string(),
                        status: ToolStatus::Executing,
                        args: Some(args.clone()),
                        fuse_triggered: Some(true),
                    })
                    .await;

                if cancel_token.is_cancelled() {
                    return (iterations_done, fuse_used);
                }
                let call_id = Uuid::new_v4().to_string();
                match state.tools.invoke(kind.as_str(), &args, &ctx) {
                    Ok(result) => {
                        let _ = tx
                            .send(TurnEvent::Tool {
                                name: kind.as_str().to_string(),
                                status: ToolStatus::Completed,
                                args: None,
                                fuse_triggered: Some(true),
                            })
                            .await;
                        let _ = tx
                            .send(TurnEvent::Widget {
                                kind: kind.as_str().to_string(),
                                data: result.clone(),
                                compact: false,
                            })
                            .await;
                        chart_produced_this_turn = Some((kind, result.clone()));
                        tool_names_used.push(kind.as_str().to_string());
                        contents.push(fuse_tool_use_message(&call_id, kind.as_str(), &args));
                        contents.push(Message::tool_result(&call_id, result.to_string()));
                    }
                    Err(e) => {
                        let _ = tx
                            .send(TurnEvent::Tool {
                                name: kind.as_str().to_string(),
                                status: ToolStatus::Failed,
                                args: None,
                                fuse_triggered: Some(true),
                            })
                            .await;
                        contents.push(fuse_tool_use_message(&call_id, kind.as_str(), &args));
                        contents.push(tool_error_result(&call_id, e.as_tool_response()));
                    }
                }
                continue 'iterations;
            }
        }

        if tool_calls.is_empty() {
            forced_exit = false;
            break 'iterations;
        }

        // Step 8d: dispatch every tool call, in emission order.
        let mut assistant_parts = Vec::new();
        if !final_text.is_empty() {
            assistant_parts.push(ContentPart::Text { text: final_text.clone() });
        }
        for call in &tool_calls {
            assistant_parts.push(ContentPart::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
                signature: call.signature.clone(),
            });
        }
        contents.push(Message { role: Role::Assistant, content: MessageContent::Parts(assistant_parts) });

        for call in &tool_calls {
            if cancel_token.is_cancelled() {
                return (iterations_done, fuse_used);
            }
            let _ = tx
                .send(TurnEvent::Tool {
                    name: call.tool_name.clone(),
                    status: ToolStatus::Executing,
                    args: Some(call.arguments.clone()),
                    fuse_triggered: None,
                })
                .await;

            tool_names_used.push(call.tool_name.clone());
            match state.tools.invoke(&call.tool_name, &call.arguments, &ctx) {
                Ok(result) => {
                    let _ = tx
                        .send(TurnEvent::Tool {
                            name: call.tool_name.clone(),
                            status: ToolStatus::Completed,
                            args: None,
                            fuse_triggered: None,
                        })
                        .await;
                    if let Some(kind) = ChartKind::all().iter().find(|k| k.as_str() == call.tool_name) {
                        let _ = tx
                            .send(TurnEvent::Widget {
                                kind: kind.as_str().to_string(),
                                data: result.clone(),
                                compact: false,
                            })
                            .await;
                        chart_produced_this_turn = Some((*kind, result.clone()));
                    }
                    contents.push(Message::tool_result(&call.call_id, result.to_string()));
                }
                Err(e) => {
                    let _ = tx
                        .send(TurnEvent::Tool {
                            name: call.tool_name.clone(),
                            status: ToolStatus::Failed,
                            args: None,
                            fuse_triggered: None,
                        })
                        .await;
                    contents.push(tool_error_result(&call.call_id, e.as_tool_response()));
                }
            }
        }
    }

    if forced_exit && final_text.is_empty() {
        final_text = FORCE_EXIT_TEMPLATE.to_string();
    }

    // Post-hoc domain-vocabulary guard, run back through the sanitiser's
    // character filter so Testable Property 4 still holds for guard text.
    if let Some((kind, _)) = &chart_produced_this_turn {
        let terms = calculators::domain_vocabulary(*kind);
        let mentions_any = terms.iter().any(|t| final_text.contains(t));
        if !mentions_any && !terms.is_empty() {
            let guard_text = format!(
                "補充一下，這次的結果中值得留意的重點包括：{}。",
                terms[..terms.len().min(3)].join("、")
            );
            let mut guard_sanitizer = StreamSanitizer::new(&state.config.language.target_language);
            let mut filtered = String::new();
            for ev in guard_sanitizer.push(&guard_text) {
                if let SanitizedEvent::Text(t) = ev {
                    filtered.push_str(&t);
                }
            }
            for ev in guard_sanitizer.finish() {
                if let SanitizedEvent::Text(t) = ev {
                    filtered.push_str(&t);
                }
            }
            if !filtered.is_empty() {
                let _ = tx.send(TurnEvent::Text { chunk: filtered.clone() }).await;
                final_text.push_str(&filtered);
            }
        }
    }

    let widget = chart_produced_this_turn.as_ref().map(|(kind, data)| WidgetPayload {
        kind: kind.as_str().to_string(),
        data: data.clone(),
        compact: false,
    });
    persist_and_emit_final(state, session_id, &input.user_id, &final_text, widget, &tool_names_used, tx).await;

    if let Some(strong) = state.providers.get(ModelRole::Strong).ok().or_else(|| state.providers.get(ModelRole::Fast).ok()) {
        if let Err(e) = compact::run_compaction(strong.as_ref(), &state.memory, &input.user_id, session_id, &state.config.orchestration).await {
            tracing::warn!(error = %e, session_id = %session_id, "auto-summariser run failed");
        }
    }

    let _ = tx.send(TurnEvent::Done { session_id: session_id.to_string() }).await;
    (iterations_done, fuse_used)
}

async fn persist_and_emit_final(
    state: &AppState,
    session_id: &str,
    _user_id: &str,
    text: &str,
    widget: Option<WidgetPayload>,
    tool_calls: &[String],
    _tx: &mpsc::Sender<TurnEvent>,
) {
    let message = StoredMessage {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        role: MessageRole::Assistant,
        content: text.to_string(),
        widget,
        citations: vec![],
        tool_calls: tool_calls.to_vec(),
        rating: None,
        created_at: Utc::now(),
    };
    if let Err(e) = state.memory.append_message(message) {
        tracing::warn!(error = %e, session_id = %session_id, "failed to persist assistant message");
    }
}

fn stored_to_message(m: &StoredMessage) -> Message {
    match m.role {
        MessageRole::User => Message::user(m.content.clone()),
        MessageRole::Assistant => Message::assistant(m.content.clone()),
        MessageRole::System => Message::system(m.content.clone()),
        MessageRole::Tool => Message::assistant(m.content.clone()),
    }
}

fn tool_error_result(tool_use_id: &str, content: String) -> Message {
    Message {
        role: Role::Tool,
        content: MessageContent::Parts(vec![ContentPart::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content,
            is_error: true,
        }]),
    }
}

fn fuse_tool_use_message(call_id: &str, tool_name: &str, args: &Value) -> Message {
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(vec![ContentPart::ToolUse {
            id: call_id.to_string(),
            name: tool_name.to_string(),
            input: args.clone(),
            signature: Some(json!(FUSE_SIGNATURE_PLACEHOLDER)),
        }]),
    }
}

fn fuse_arguments(user: &sa_domain::user::User) -> Value {
    json!({
        "birthDate": user.birth_date,
        "birthTime": user.birth_time,
        "gender": user.gender.map(|g| format!("{:?}", g).to_lowercase()),
        "location": user.birth_location,
    })
}

/// Step 9 precondition check, independent of finding a satisfiable kind: the
/// fuse is a safety net, not a primary control path, so the heuristic stays
/// deliberately conservative — known facts plus a domain-relevant message.
fn try_fuse(
    user: &sa_domain::user::User,
    has_birth_data: bool,
    has_chart: bool,
    message: &str,
) -> Option<ChartKind> {
    if !has_birth_data || has_chart {
        return None;
    }
    if prompt::is_off_topic(message) || message.trim().is_empty() {
        return None;
    }
    if !prompt::mentions_domain_keyword(message) {
        return None;
    }

    let calc_input = CalculatorInput {
        birth_date: user.birth_date.clone(),
        birth_time: user.birth_time.clone(),
        gender: user.gender.map(|g| format!("{:?}", g)),
        name: user.display_name.clone(),
        location: user.birth_location.clone(),
        question: None,
    };
    calculators::fuse_preference_order()
        .iter()
        .find(|k| calculators::satisfiable(**k, &calc_input))
        .copied()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured data extraction (step 5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn birth_date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})[年/-](\d{1,2})[月/-](\d{1,2})日?").expect("static regex is valid"))
}

pub fn extract_birth_date(message: &str) -> Option<String> {
    let caps = birth_date_pattern().captures(message)?;
    let year = &caps[1];
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    Some(format!("{year}-{month:02}-{day:02}"))
}

fn numeric_time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([01]?\d|2[0-3]):([0-5]\d)").expect("static regex is valid"))
}

fn natural_time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(早上|上午|中午|下午|晚上|凌晨)?\s*(\d{1,2})點(\d{1,2})?分?")
            .expect("static regex is valid")
    })
}

fn normalize_hour_for_period(hour: u32, period: Option<&str>) -> u32 {
    match period {
        Some("下午") | Some("晚上") if hour < 12 => hour + 12,
        Some("中午") if hour < 12 => hour + 12,
        Some("凌晨") if hour == 12 => 0,
        _ => hour,
    }
}

pub fn extract_birth_time(message: &str) -> Option<String> {
    if let Some(caps) = numeric_time_pattern().captures(message) {
        let hour: u32 = caps[1].parse().ok()?;
        return Some(format!("{hour:02}:{}", &caps[2]));
    }
    let caps = natural_time_pattern().captures(message)?;
    let period = caps.get(1).map(|m| m.as_str());
    let hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let hour = normalize_hour_for_period(hour, period);
    Some(format!("{hour:02}:{minute:02}"))
}

const GENDER_CUES: &[&str] = &["男生", "男性", "女生", "女性", "其他性別", "男", "女"];

pub fn extract_gender(message: &str) -> Option<Gender> {
    for cue in GENDER_CUES {
        if message.contains(cue) {
            if let Some(g) = profile::normalize_gender(cue) {
                return Some(g);
            }
        }
    }
    None
}

const KNOWN_PLACES: &[&str] = &["高雄", "台北", "台中", "台南"];

pub fn extract_location(message: &str) -> Option<String> {
    KNOWN_PLACES
        .iter()
        .find(|p| message.contains(**p))
        .map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_iso_like_birth_date() {
        assert_eq!(extract_birth_date("我是1990年7月22日出生的"), Some("1990-07-22".to_string()));
    }

    #[test]
    fn extracts_numeric_birth_time() {
        assert_eq!(extract_birth_time("時間是14:15"), Some("14:15".to_string()));
    }

    #[test]
    fn extracts_natural_language_morning_time() {
        assert_eq!(extract_birth_time("早上8點30分"), Some("08:30".to_string()));
    }

    #[test]
    fn extracts_natural_language_afternoon_time() {
        assert_eq!(extract_birth_time("下午2點15分出生"), Some("14:15".to_string()));
    }

    #[test]
    fn extracts_gender_cue() {
        assert_eq!(extract_gender("我是男生"), Some(Gender::Male));
        assert_eq!(extract_gender("她是女性"), Some(Gender::Female));
    }

    #[test]
    fn extracts_known_location() {
        assert_eq!(extract_location("我在高雄出生"), Some("高雄".to_string()));
        assert_eq!(extract_location("我住在東京"), None);
    }

    #[test]
    fn fuse_requires_birth_data_and_no_chart() {
        let mut user = sa_domain::user::User::new("u1");
        user.birth_date = Some("1990-07-22".into());
        user.birth_time = Some("14:15".into());
        user.gender = Some(Gender::Male);
        assert_eq!(
            try_fuse(&user, true, false, "幫我看看星座運勢"),
            Some(ChartKind::WesternAstrology)
        );
        assert_eq!(try_fuse(&user, true, true, "幫我看看星座運勢"), None);
        assert_eq!(try_fuse(&user, false, false, "幫我看看星座運勢"), None);
    }

    #[test]
    fn fuse_requires_a_domain_keyword_even_with_birth_data() {
        let mut user = sa_domain::user::User::new("u1");
        user.birth_date = Some("1990-07-22".into());
        user.birth_time = Some("14:15".into());
        user.gender = Some(Gender::Male);
        assert_eq!(try_fuse(&user, true, false, "今天心情不錯"), None);
    }

    #[test]
    fn fuse_skips_off_topic_message() {
        let mut user = sa_domain::user::User::new("u1");
        user.birth_date = Some("1990-07-22".into());
        user.birth_time = Some("14:15".into());
        user.gender = Some(Gender::Male);
        assert_eq!(try_fuse(&user, true, false, "今天天氣如何？"), None);
    }

    #[test]
    fn fuse_picks_lowest_requirement_calculator_satisfiable() {
        let mut user = sa_domain::user::User::new("u1");
        user.display_name = Some("小明".into());
        user.birth_date = Some("1990-07-22".into());
        // No birth_time/gender — western astrology/bazi unsatisfiable, but
        // numerology only needs date + name.
        assert_eq!(try_fuse(&user, false, false, "幫我看看"), None); // has_birth_data gate blocks first
    }

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = std::sync::Arc::new(sa_domain::config::Config::default());
        let memory = std::sync::Arc::new(sa_memory::JsonRepository::new(dir.path()).unwrap());
        let tools = std::sync::Arc::new(sa_tools::ToolRegistry::new(memory.clone()));
        let providers = std::sync::Arc::new(sa_providers::ProviderRegistry::from_config(&config.llm));
        (AppState::new(config, memory, tools, providers), dir)
    }

    /// The Safety Filter must end the turn before any provider is consulted:
    /// with no LLM provider configured at all, a flagged message still
    /// produces a complete, well-formed turn instead of falling through to
    /// the "no provider available" apology path.
    #[tokio::test]
    async fn safety_short_circuit_ends_the_turn_without_a_provider() {
        let (state, _dir) = test_state();
        let memory = state.memory.clone();

        let permit = state.session_locks.try_acquire("test-session").unwrap();
        let input = TurnInput {
            user_id: "u1".to_string(),
            session_id: Some("test-session".to_string()),
            message: "我最近一直想死，覺得好累".to_string(),
        };

        let mut rx = run_turn(state, input, permit);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(TurnEvent::Session { .. })));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::Text { .. })));
        assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));

        let persisted = memory.read_messages("test-session");
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].role, MessageRole::User);
        assert_eq!(persisted[1].role, MessageRole::Assistant);
        assert!(persisted[1].content.contains("自殺防治"));
    }

    /// A second turn request for a session that already holds the lock must
    /// be rejected rather than queued.
    #[test]
    fn busy_session_lock_rejects_a_second_acquire() {
        let (state, _dir) = test_state();
        let _first = state.session_locks.try_acquire("s1").unwrap();
        assert!(state.session_locks.try_acquire("s1").is_none());
    }
}
