//! Data model for users, sessions, messages, chart locks, and the
//! three-layer memory record. Owned by the Memory Store; the orchestration
//! core reads and writes these types but never invents facts on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Known facts about a user. Any subset may be present; fields are only
/// ever written from a user-authored message or an explicit profile-update
/// tool call — never invented by the LM.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Gregorian birth date, `YYYY-MM-DD`.
    #[serde(default)]
    pub birth_date: Option<String>,
    /// Birth time, 24h `HH:MM`.
    #[serde(default)]
    pub birth_time: Option<String>,
    #[serde(default)]
    pub birth_location: Option<String>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Whether the minimal calculator-feeding facts are present.
    pub fn has_birth_data(&self) -> bool {
        self.birth_date.is_some() && self.birth_time.is_some() && self.gender.is_some()
    }

    /// Apply a partial update; `None` fields are left untouched.
    pub fn apply_partial(&mut self, partial: UserFactsPartial) {
        if let Some(v) = partial.display_name {
            self.display_name = Some(v);
        }
        if let Some(v) = partial.birth_date {
            self.birth_date = Some(v);
        }
        if let Some(v) = partial.birth_time {
            self.birth_time = Some(v);
        }
        if let Some(v) = partial.birth_location {
            self.birth_location = Some(v);
        }
        if let Some(v) = partial.longitude {
            self.longitude = Some(v);
        }
        if let Some(v) = partial.latitude {
            self.latitude = Some(v);
        }
        if let Some(v) = partial.gender {
            self.gender = Some(v);
        }
    }
}

/// A partial update to a [`User`]'s known facts — only present fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFactsPartial {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub birth_time: Option<String>,
    #[serde(default)]
    pub birth_location: Option<String>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub gender: Option<Gender>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session / Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A single immutable message in a session's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub widget: Option<WidgetPayload>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub tool_calls: Vec<String>,
    /// User-submitted feedback rating for this message, if any (e.g. 1/-1
    /// for thumbs up/down). Set after the fact via the feedback endpoint,
    /// never by the orchestration loop itself.
    #[serde(default)]
    pub rating: Option<i8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub compact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub excerpt: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chart Lock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed enumeration of supported domain calculators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    WesternAstrology,
    Bazi,
    Tarot,
    Numerology,
    Palmistry,
    IChing,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::WesternAstrology => "western_astrology",
            ChartKind::Bazi => "bazi",
            ChartKind::Tarot => "tarot",
            ChartKind::Numerology => "numerology",
            ChartKind::Palmistry => "palmistry",
            ChartKind::IChing => "i_ching",
        }
    }

    pub fn all() -> &'static [ChartKind] {
        &[
            ChartKind::WesternAstrology,
            ChartKind::Bazi,
            ChartKind::Tarot,
            ChartKind::Numerology,
            ChartKind::Palmistry,
            ChartKind::IChing,
        ]
    }
}

/// A cached structured result of a calculator for (user, kind). At most one
/// lock exists per (user, kind); writing a new one supersedes the previous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartLock {
    pub user_id: String,
    pub kind: ChartKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory record (episodic / summaries / profile)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One condensed recap produced by the Auto-Summariser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub text: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A lightweight episodic item — just enough to render the memory block and
/// to know what's been consumed by compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicItem {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The three memory layers for one user.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryRecord {
    #[serde(default)]
    pub episodic: Vec<EpisodicItem>,
    #[serde(default)]
    pub summaries: Vec<MemorySummary>,
    #[serde(default)]
    pub profile: std::collections::HashMap<String, String>,
}
