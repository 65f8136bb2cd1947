//! Thin adapter between the orchestration loop and the Tool Registry: applies
//! the per-tool enable/disable overrides from configuration before the
//! catalogue is shown to the LM, and renders [`ToolError`] into the
//! string + `is_error` shape the LM-facing tool-result message needs.

use sa_domain::config::ToolsConfig;
use sa_domain::tool::ToolDefinition;
use sa_tools::{ToolError, ToolRegistry, TurnContext};
use serde_json::Value;

/// The tool catalogue filtered by configuration overrides. A tool absent
/// from the overrides map is enabled by default.
pub fn build_tool_definitions(registry: &ToolRegistry, tools_config: &ToolsConfig) -> Vec<ToolDefinition> {
    registry
        .list()
        .into_iter()
        .filter(|def| tools_config.is_enabled(&def.name))
        .collect()
}

/// Invoke a tool call, returning `(content, is_error)` ready to embed in a
/// tool-result message. Validation and execution failures both become a
/// textual response the LM can see and react to — they never abort the
/// orchestration loop.
pub fn dispatch(
    registry: &ToolRegistry,
    name: &str,
    args: &Value,
    ctx: &TurnContext,
) -> (String, bool) {
    match registry.invoke(name, args, ctx) {
        Ok(result) => (result.to_string(), false),
        Err(err) => (render_error(&err), true),
    }
}

fn render_error(err: &ToolError) -> String {
    err.as_tool_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry() -> ToolRegistry {
        let dir = tempfile::tempdir().unwrap();
        ToolRegistry::new(Arc::new(sa_memory::JsonRepository::new(dir.path()).unwrap()))
    }

    #[test]
    fn disabled_tool_is_excluded_from_definitions() {
        let reg = registry();
        let mut overrides = HashMap::new();
        overrides.insert("tarot".to_string(), false);
        let config = ToolsConfig { overrides };

        let defs = build_tool_definitions(&reg, &config);
        assert!(!defs.iter().any(|d| d.name == "tarot"));
        assert!(defs.iter().any(|d| d.name == "western_astrology"));
    }

    #[test]
    fn dispatch_reports_validation_errors_as_tool_result_text() {
        let reg = registry();
        let ctx = TurnContext {
            user_id: "u1".into(),
            session_id: "s1".into(),
        };
        let (content, is_error) = dispatch(&reg, "western_astrology", &serde_json::json!({}), &ctx);
        assert!(is_error);
        assert!(content.contains("missing required parameter"));
    }

    #[test]
    fn dispatch_returns_ok_payload_on_success() {
        let reg = registry();
        let ctx = TurnContext {
            user_id: "u1".into(),
            session_id: "s1".into(),
        };
        let (content, is_error) = dispatch(
            &reg,
            "getUserProfile",
            &serde_json::json!({}),
            &ctx,
        );
        assert!(!is_error);
        assert!(content.contains("userId"));
    }
}
