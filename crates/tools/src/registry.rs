//! The Tool Registry: a closed, enumerated catalogue of tools with a
//! validated calling contract. Every tool name the LM can invoke is listed
//! here; nothing else is dispatchable.

use std::sync::Arc;

use sa_domain::tool::ToolDefinition;
use sa_domain::user::ChartKind;
use sa_memory::JsonRepository;
use serde_json::{json, Value};

use crate::calculators::{self, CalculatorInput};
use crate::profile;

/// Everything the registry needs to know about the caller but must never
/// accept from the LM itself.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub user_id: String,
    pub session_id: String,
}

/// A tool invocation failure. Validation failures are returned to the LM as
/// a tool response so it can retry with corrected arguments; execution
/// failures surface as [`ToolError::Execution`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required parameter: {0}")]
    MissingParameter(String),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    /// Render as a tool-result payload the LM can see and react to.
    pub fn as_tool_response(&self) -> String {
        self.to_string()
    }
}

pub struct ToolRegistry {
    pub(crate) repo: Arc<JsonRepository>,
}

impl ToolRegistry {
    pub fn new(repo: Arc<JsonRepository>) -> Self {
        Self { repo }
    }

    /// The full catalogue, in deterministic (declaration) order.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for kind in ChartKind::all() {
            defs.push(calculator_definition(*kind));
        }
        defs.push(ToolDefinition {
            name: "getUserProfile".into(),
            description: "Return the known facts recorded for this user.".into(),
            parameters: json!({
                "type": "object",
                "properties": {},
            }),
        });
        defs.push(ToolDefinition {
            name: "saveUserInsight".into(),
            description: "Persist a single key/value fact learned about the user.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "value": {"type": "string"},
                },
                "required": ["key", "value"],
            }),
        });
        defs.push(ToolDefinition {
            name: "searchConversationHistory".into(),
            description: "Search this user's past messages for a keyword.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "keyword": {"type": "string"},
                },
                "required": ["keyword"],
            }),
        });
        defs.push(ToolDefinition {
            name: "getLocation".into(),
            description: "Resolve a free-text place name to coordinates and timezone.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "place": {"type": "string"},
                },
                "required": ["place"],
            }),
        });
        defs
    }

    /// Validate, normalise, and execute a tool call. `user_id` is always
    /// taken from `ctx`, never from `args` — the schema never exposes a
    /// user-id field for the LM to fill in.
    pub fn invoke(
        &self,
        name: &str,
        args: &Value,
        ctx: &TurnContext,
    ) -> Result<Value, ToolError> {
        if let Some(kind) = chart_kind_from_tool_name(name) {
            return self.invoke_calculator(kind, args, ctx);
        }

        match name {
            "getUserProfile" => Ok(profile::get_user_profile(&self.repo, &ctx.user_id)),
            "saveUserInsight" => {
                let key = require_str(args, "key")?;
                let value = require_str(args, "value")?;
                profile::save_user_insight(&self.repo, &ctx.user_id, key, value)
                    .map_err(|e| ToolError::Execution(e.to_string()))
            }
            "searchConversationHistory" => {
                let keyword = require_str(args, "keyword")?;
                Ok(profile::search_conversation_history(
                    &self.repo,
                    &ctx.session_id,
                    keyword,
                    200,
                ))
            }
            "getLocation" => {
                let place = require_str(args, "place")?;
                profile::get_location(place).map_err(|e| ToolError::Execution(e.to_string()))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    fn invoke_calculator(
        &self,
        kind: ChartKind,
        args: &Value,
        ctx: &TurnContext,
    ) -> Result<Value, ToolError> {
        let input = calculator_input_from_args(kind, args)?;
        let payload = calculators::invoke(kind, &input)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        self.repo
            .write_chart_lock(&ctx.user_id, kind, payload.clone())
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(payload)
    }
}

fn chart_kind_from_tool_name(name: &str) -> Option<ChartKind> {
    ChartKind::all()
        .iter()
        .copied()
        .find(|k| k.as_str() == name)
}

fn calculator_definition(kind: ChartKind) -> ToolDefinition {
    let (description, required) = match kind {
        ChartKind::WesternAstrology | ChartKind::Bazi => (
            "Compute a chart for this domain from birth date, time, and gender.",
            vec!["birthDate", "birthTime", "gender"],
        ),
        ChartKind::Numerology => (
            "Compute numerology numbers from birth date and name.",
            vec!["birthDate", "name"],
        ),
        ChartKind::Tarot => (
            "Draw a tarot spread in answer to a question.",
            vec!["question"],
        ),
        ChartKind::Palmistry => (
            "Describe palm lines for the given gender.",
            vec!["gender"],
        ),
        ChartKind::IChing => (
            "Cast an I-Ching hexagram in answer to a question.",
            vec!["question"],
        ),
    };
    ToolDefinition {
        name: kind.as_str().to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "birthDate": {"type": "string"},
                "birthTime": {"type": "string"},
                "gender": {"type": "string"},
                "name": {"type": "string"},
                "location": {"type": "string"},
                "question": {"type": "string"},
            },
            "required": required,
        }),
    }
}

fn calculator_input_from_args(kind: ChartKind, args: &Value) -> Result<CalculatorInput, ToolError> {
    let input = CalculatorInput {
        birth_date: optional_str(args, "birthDate"),
        birth_time: optional_str(args, "birthTime"),
        gender: optional_str(args, "gender").and_then(|g| {
            profile::normalize_gender(&g).map(|g| format!("{:?}", g).to_lowercase())
        }),
        name: optional_str(args, "name"),
        location: optional_str(args, "location"),
        question: optional_str(args, "question"),
    };

    match kind {
        ChartKind::WesternAstrology | ChartKind::Bazi => {
            require_str(args, "birthDate")?;
            require_str(args, "birthTime")?;
            require_str(args, "gender")?;
        }
        ChartKind::Numerology => {
            require_str(args, "birthDate")?;
            require_str(args, "name")?;
        }
        ChartKind::Tarot | ChartKind::IChing => {
            require_str(args, "question")?;
        }
        ChartKind::Palmistry => {
            require_str(args, "gender")?;
        }
    }

    Ok(input)
}

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .ok_or_else(|| ToolError::MissingParameter(field.to_string()))?
        .as_str()
        .ok_or_else(|| ToolError::InvalidParameter {
            name: field.to_string(),
            reason: "expected a string".into(),
        })
}

fn optional_str(args: &Value, field: &str) -> Option<String> {
    args.get(field).and_then(|v| v.as_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> ToolRegistry {
        let dir = tempfile::tempdir().unwrap();
        ToolRegistry::new(Arc::new(JsonRepository::new(dir.path()).unwrap()))
    }

    fn ctx() -> TurnContext {
        TurnContext {
            user_id: "u1".into(),
            session_id: "s1".into(),
        }
    }

    #[test]
    fn list_is_deterministic_and_non_empty() {
        let reg = registry();
        let names: Vec<_> = reg.list().into_iter().map(|d| d.name).collect();
        let names2: Vec<_> = reg.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, names2);
        assert!(names.contains(&"western_astrology".to_string()));
        assert!(names.contains(&"getUserProfile".to_string()));
    }

    #[test]
    fn unknown_tool_rejected() {
        let reg = registry();
        let err = reg.invoke("doesNotExist", &json!({}), &ctx()).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[test]
    fn missing_required_parameter_rejected() {
        let reg = registry();
        let err = reg
            .invoke("western_astrology", &json!({}), &ctx())
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter(_)));
    }

    #[test]
    fn calculator_call_writes_a_chart_lock() {
        let reg = registry();
        let result = reg
            .invoke(
                "western_astrology",
                &json!({"birthDate": "1990-07-22", "birthTime": "14:15", "gender": "男"}),
                &ctx(),
            )
            .unwrap();
        assert_eq!(result["kind"], "western_astrology");
        let lock = reg
            .repo
            .read_chart_lock("u1", ChartKind::WesternAstrology)
            .unwrap();
        assert_eq!(lock.payload["kind"], "western_astrology");
    }

    #[test]
    fn user_id_is_never_taken_from_args() {
        let reg = registry();
        // Even if the caller tries to smuggle a userId in args, invoke()
        // only ever reads ctx.user_id.
        let result = reg
            .invoke(
                "getUserProfile",
                &json!({"userId": "someone-else"}),
                &ctx(),
            )
            .unwrap();
        assert_eq!(result["userId"], "u1");
    }
}
