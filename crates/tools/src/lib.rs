//! `sa-tools` — the Tool Registry and its handlers: the six domain
//! calculators plus the profile/memory-facing tools (`getUserProfile`,
//! `saveUserInsight`, `searchConversationHistory`, `getLocation`).

pub mod calculators;
pub mod profile;
pub mod registry;

pub use registry::{ToolError, ToolRegistry, TurnContext};
