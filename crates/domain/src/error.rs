/// Transport/storage-level errors shared by every crate in the workspace.
///
/// Turn-level recovery semantics (safety short-circuit, tool validation,
/// LM retry exhaustion, ...) live in `sa_gateway::runtime::CoreError`
/// instead — this enum only covers the substrate every crate needs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
