use serde::{Deserialize, Serialize};

/// Top-level configuration. Every field carries a default so a missing or
/// partial config file never prevents boot — only the fields present in the
/// file override the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub language: LanguageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            orchestration: OrchestrationConfig::default(),
            language: LanguageConfig::default(),
            tools: ToolsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: CorsConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// One model tier's provider identity and call tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_max_retries() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ModelEntry {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: "claude-3-5-sonnet-latest".into(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// How the API key for a provider is resolved. Precedence, in order:
/// plaintext `key`, OS keychain (`service`+`account`), environment variable
/// (`env`), then the keychain's headless-fallback env var
/// (`{SERVICE}_{ACCOUNT}` uppercased).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default = "default_env_var")]
    pub env: Option<String>,
}

fn default_env_var() -> Option<String> {
    Some("ADVISOR_LM_API_KEY".into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    Auto,
    Keychain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub fast: ModelEntry,
    #[serde(default)]
    pub strong: ModelEntry,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            fast: ModelEntry::default(),
            strong: ModelEntry {
                model: "claude-3-5-sonnet-latest".into(),
                ..ModelEntry::default()
            },
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_window_threshold")]
    pub window_threshold: usize,
    #[serde(default = "default_episodic_k")]
    pub episodic_k: usize,
    #[serde(default = "default_turn_timeout_seconds")]
    pub turn_timeout_seconds: u64,
}

fn default_max_tool_iterations() -> u32 {
    5
}
fn default_history_limit() -> usize {
    12
}
fn default_window_threshold() -> usize {
    30
}
fn default_episodic_k() -> usize {
    20
}
fn default_turn_timeout_seconds() -> u64 {
    180
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            history_limit: default_history_limit(),
            window_threshold: default_window_threshold(),
            episodic_k: default_episodic_k(),
            turn_timeout_seconds: default_turn_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
        }
    }
}

fn default_target_language() -> String {
    "zh-Hant".into()
}

/// Per-tool enable/disable overrides, keyed by tool name. A tool absent
/// from this map is enabled by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub overrides: std::collections::HashMap<String, bool>,
}

impl ToolsConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.overrides.get(name).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

fn default_state_path() -> String {
    "./state".into()
}
