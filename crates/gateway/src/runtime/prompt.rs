//! The Prompt Assembler: builds the system prompt for each turn from known
//! user facts, the chart-lock summary, the memory snapshot, and a handful
//! of per-turn signals, plus the stage state machine that drives which
//! directive the prompt leads with.

use sa_domain::user::{ChartKind, MemoryRecord, User};

/// Conversation stage. Never persisted — recomputed from observable facts
/// on every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FirstMeet,
    DataCollection,
    DeepConsult,
    Closing,
}

const CLOSING_KEYWORDS: &[&str] = &["謝謝", "再見", "先這樣", "掰掰", "不用了"];

/// Determine the conversation stage from the facts the orchestration loop
/// already has in hand. `has_chart` means at least one chart lock exists.
pub fn determine_stage(
    turn_count: usize,
    has_birth_data: bool,
    has_chart: bool,
    message: &str,
) -> Stage {
    if CLOSING_KEYWORDS.iter().any(|kw| message.contains(kw)) {
        return Stage::Closing;
    }
    if turn_count == 0 {
        return Stage::FirstMeet;
    }
    if !has_birth_data {
        return Stage::DataCollection;
    }
    if has_birth_data && !has_chart {
        return Stage::DataCollection;
    }
    Stage::DeepConsult
}

fn stage_directive(stage: Stage) -> &'static str {
    match stage {
        Stage::FirstMeet => {
            "這是你們第一次對話。先簡短自我介紹，並溫和地詢問對方希望了解哪方面的主題。"
        }
        Stage::DataCollection => {
            "目前還缺少進行分析所需的基本資料。請自然地詢問出生日期、出生時間與性別等必要資訊，\
             一旦取得完整資料就立刻呼叫對應的計算工具，不要只是口頭描述。"
        }
        Stage::DeepConsult => {
            "基本資料與圖表都已齊備，進入深入諮詢階段。根據已有的圖表內容回應使用者的提問，\
             必要時可引用先前產生的結果，不需要重新計算。"
        }
        Stage::Closing => "對話正在收尾，給予溫暖而簡短的總結與道別，不要開啟新的話題。",
    }
}

const EMOTIONAL_KEYWORDS: &[(&str, &str)] = &[
    ("難過", "使用者似乎心情低落，請語氣更溫柔、先給予情緒支持再回應問題。"),
    ("焦慮", "使用者顯得焦慮，請先安撫情緒，語速放緩，避免資訊過載。"),
    ("生氣", "使用者語氣帶有不滿，請保持耐心與同理心回應。"),
    ("開心", "使用者心情不錯，可以用稍微輕鬆的語氣回應。"),
];

fn emotional_hint(message: &str) -> Option<&'static str> {
    EMOTIONAL_KEYWORDS
        .iter()
        .find(|(kw, _)| message.contains(kw))
        .map(|(_, hint)| *hint)
}

const OFF_TOPIC_CUES: &[&str] = &["天氣", "股票", "政治", "球賽", "新聞"];
const DOMAIN_CUES: &[&str] = &[
    "星座", "八字", "塔羅", "靈數", "手相", "易經", "運勢", "出生",
];

/// Whether the message is likely off the advisory domain entirely — no
/// domain cue present, but an off-topic cue is.
pub fn is_off_topic(message: &str) -> bool {
    let has_off_topic_cue = OFF_TOPIC_CUES.iter().any(|c| message.contains(c));
    let has_domain_cue = DOMAIN_CUES.iter().any(|c| message.contains(c));
    has_off_topic_cue && !has_domain_cue
}

/// Whether `message` names the advisory domain explicitly. Used by the
/// orchestration loop's fuse heuristic alongside `has_birth_data`/`has_chart`.
pub fn mentions_domain_keyword(message: &str) -> bool {
    DOMAIN_CUES.iter().any(|c| message.contains(c))
}

fn persona_core() -> &'static str {
    "你是一位溫暖、專業的命理顧問，擅長西洋占星、八字、塔羅、生命靈數、手相與易經。\
     你的回應必須親切自然，像是在與朋友對話,而不是條列式的報告。"
}

fn tool_use_guidelines() -> &'static str {
    "工具使用原則：\n\
     - 當使用者已經提供出生日期、出生時間與性別，且目前還沒有對應的圖表時，請立即呼叫對應的計算工具，不要用文字描述計算過程。\n\
     - 每次工具呼叫只處理一項計算，再根據結果組織回覆。\n\
     - 如果使用者已經有某個種類的圖表，除非使用者要求重新計算，否則直接引用既有結果，不要重複呼叫工具。"
}

fn language_discipline(target_language: &str) -> String {
    format!(
        "語言規則：你的所有回覆都必須使用{target_language}撰寫，不可以出現其他語言的文字或工具呼叫的程式碼片段。",
        target_language = target_language
    )
}

fn known_facts_block(user: &User) -> String {
    let mut lines = Vec::new();
    if let Some(d) = &user.birth_date {
        lines.push(format!("出生日期：{d}"));
    }
    if let Some(t) = &user.birth_time {
        lines.push(format!("出生時間：{t}"));
    }
    if let Some(l) = &user.birth_location {
        lines.push(format!("出生地點：{l}"));
    }
    if let Some(g) = &user.gender {
        lines.push(format!("性別：{g:?}"));
    }
    if lines.is_empty() {
        "已知使用者資料：目前尚無任何已知資料。".to_string()
    } else {
        format!("已知使用者資料：\n{}", lines.join("\n"))
    }
}

fn chart_summary_block(locks: &[(ChartKind, bool)]) -> String {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for (kind, has_lock) in locks {
        if *has_lock {
            present.push(kind.as_str());
        } else {
            missing.push(kind.as_str());
        }
    }
    let mut block = String::from("圖表狀態：\n");
    if present.is_empty() {
        block.push_str("- 尚未產生任何圖表。\n");
    } else {
        block.push_str(&format!("- 已產生：{}\n", present.join("、")));
    }
    if !missing.is_empty() {
        block.push_str(&format!(
            "- 尚未產生（若使用者詢問且資料齊備，請呼叫對應工具）：{}\n",
            missing.join("、")
        ));
    }
    block
}

const MEMORY_CHAR_BUDGET: usize = 1200;

fn memory_block(memory: &MemoryRecord) -> String {
    let mut text = String::from("記憶摘要：\n");
    if let Some(latest) = memory.summaries.last() {
        text.push_str(&format!("先前對話摘要：{}\n", latest.text));
    }
    if !memory.episodic.is_empty() {
        text.push_str("近期對話片段：\n");
        for item in &memory.episodic {
            text.push_str(&format!("- {:?}: {}\n", item.role, item.content));
        }
    }
    if text.chars().count() > MEMORY_CHAR_BUDGET {
        let truncated: String = text.chars().take(MEMORY_CHAR_BUDGET).collect();
        truncated + "…（已截斷）"
    } else {
        text
    }
}

/// All the per-turn inputs the Prompt Assembler needs.
pub struct PromptInputs<'a> {
    pub user: &'a User,
    pub chart_locks: &'a [(ChartKind, bool)],
    pub memory: &'a MemoryRecord,
    pub message: &'a str,
    pub turn_count: usize,
    pub target_language: &'a str,
}

/// Assemble the 9-part system prompt, in order.
pub fn assemble(inputs: &PromptInputs) -> String {
    let has_birth_data = inputs.user.has_birth_data();
    let has_chart = inputs.chart_locks.iter().any(|(_, present)| *present);
    let stage = determine_stage(inputs.turn_count, has_birth_data, has_chart, inputs.message);
    let off_topic = is_off_topic(inputs.message);

    let mut parts = vec![
        persona_core().to_string(),
        stage_directive(stage).to_string(),
        tool_use_guidelines().to_string(),
        language_discipline(inputs.target_language),
        known_facts_block(inputs.user),
        chart_summary_block(inputs.chart_locks),
        memory_block(inputs.memory),
    ];

    if let Some(hint) = emotional_hint(inputs.message) {
        parts.push(format!("情緒與策略提示：{hint}"));
    }

    if off_topic {
        parts.push(
            "離題提醒：使用者目前的訊息似乎與命理諮詢無關，請溫和地將話題帶回你能協助的領域。"
                .to_string(),
        );
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sa_domain::user::{Gender, MessageRole};

    fn user_with_birth_data() -> User {
        User {
            user_id: "u1".into(),
            birth_date: Some("1990-07-22".into()),
            birth_time: Some("14:15".into()),
            gender: Some(Gender::Male),
            ..Default::default()
        }
    }

    #[test]
    fn first_turn_is_first_meet() {
        let stage = determine_stage(0, false, false, "你好");
        assert_eq!(stage, Stage::FirstMeet);
    }

    #[test]
    fn missing_birth_data_is_data_collection() {
        let stage = determine_stage(2, false, false, "我想看星座");
        assert_eq!(stage, Stage::DataCollection);
    }

    #[test]
    fn birth_data_without_chart_stays_data_collection() {
        let stage = determine_stage(2, true, false, "幫我看看");
        assert_eq!(stage, Stage::DataCollection);
    }

    #[test]
    fn chart_present_is_deep_consult() {
        let stage = determine_stage(3, true, true, "這代表什麼意思？");
        assert_eq!(stage, Stage::DeepConsult);
    }

    #[test]
    fn closing_keyword_overrides_everything() {
        let stage = determine_stage(5, true, true, "謝謝你，先這樣，掰掰");
        assert_eq!(stage, Stage::Closing);
    }

    #[test]
    fn off_topic_detects_unrelated_cue_without_domain_cue() {
        assert!(is_off_topic("今天天氣如何？"));
        assert!(!is_off_topic("今天天氣不好，我想問問我的星座運勢"));
    }

    #[test]
    fn assemble_includes_known_facts_and_chart_status() {
        let user = user_with_birth_data();
        let locks = [
            (ChartKind::WesternAstrology, false),
            (ChartKind::Bazi, true),
        ];
        let memory = MemoryRecord::default();
        let prompt = assemble(&PromptInputs {
            user: &user,
            chart_locks: &locks,
            memory: &memory,
            message: "幫我看看星座",
            turn_count: 2,
            target_language: "zh-Hant",
        });
        assert!(prompt.contains("1990-07-22"));
        assert!(prompt.contains("已產生：八字"));
        assert!(prompt.contains("尚未產生"));
    }

    #[test]
    fn assemble_caps_memory_block_to_char_budget() {
        let user = User::new("u1");
        let locks: Vec<(ChartKind, bool)> = vec![];
        let mut memory = MemoryRecord::default();
        for i in 0..500 {
            memory.episodic.push(sa_domain::user::EpisodicItem {
                role: MessageRole::User,
                content: format!("訊息編號 {i} 重複內容用於撐大記憶區塊長度測試"),
                created_at: Utc::now(),
            });
        }
        let prompt = assemble(&PromptInputs {
            user: &user,
            chart_locks: &locks,
            memory: &memory,
            message: "你好",
            turn_count: 1,
            target_language: "zh-Hant",
        });
        assert!(prompt.contains("已截斷"));
    }
}
