//! The Safety Filter: a rule-based classifier that runs before any LM call.
//!
//! If the incoming message matches a triggered category, the turn never
//! reaches the LM or the Tool Registry — a pre-composed safe reply is
//! persisted as the assistant message and the turn ends immediately.

/// The category a message was flagged under, used only for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyCategory {
    SelfHarm,
    Violence,
}

impl SafetyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyCategory::SelfHarm => "self_harm",
            SafetyCategory::Violence => "violence",
        }
    }
}

const SELF_HARM_CUES: &[&str] = &[
    "自殺", "自殘", "不想活", "想死", "結束生命", "傷害自己", "割腕",
];

const VIOLENCE_CUES: &[&str] = &["殺人", "傷害別人", "炸彈", "做炸藥"];

/// Pre-composed safe replies, one per category — never synthesised by the
/// LM, so they cannot drift or be coaxed into something unsafe.
fn safe_reply(category: SafetyCategory) -> &'static str {
    match category {
        SafetyCategory::SelfHarm => {
            "聽到你這麼說，我很擔心你。我沒有辦法取代專業的協助，但你並不孤單。\
             請考慮立即聯繫當地的自殺防治專線，或找一位你信任的人談談，現在的感受是可以被好好照顧的。"
        }
        SafetyCategory::Violence => {
            "我沒辦法協助任何可能傷害他人的事。如果你正處於衝突或危險之中，\
             請考慮聯繫當地警方或相關單位尋求協助。"
        }
    }
}

/// Classify `message`; `Some(category)` means the turn must short-circuit.
pub fn classify(message: &str) -> Option<SafetyCategory> {
    if SELF_HARM_CUES.iter().any(|cue| message.contains(cue)) {
        return Some(SafetyCategory::SelfHarm);
    }
    if VIOLENCE_CUES.iter().any(|cue| message.contains(cue)) {
        return Some(SafetyCategory::Violence);
    }
    None
}

/// Run the filter; if triggered, returns the reply text to persist and emit.
pub fn check(message: &str) -> Option<(SafetyCategory, &'static str)> {
    classify(message).map(|c| (c, safe_reply(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_self_harm_cue() {
        let result = check("我最近一直想死，覺得好累");
        assert!(matches!(result, Some((SafetyCategory::SelfHarm, _))));
    }

    #[test]
    fn flags_violence_cue() {
        let result = check("我想知道怎麼做炸彈");
        assert!(matches!(result, Some((SafetyCategory::Violence, _))));
    }

    #[test]
    fn ordinary_message_passes() {
        assert!(check("我是1990年7月22日出生的，想看看星座運勢").is_none());
    }

    #[test]
    fn safe_reply_is_non_empty_for_every_category() {
        assert!(!safe_reply(SafetyCategory::SelfHarm).is_empty());
        assert!(!safe_reply(SafetyCategory::Violence).is_empty());
    }
}
