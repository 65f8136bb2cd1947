//! The six domain calculators.
//!
//! Each is an opaque pure function over a subset of {birth date, birth time,
//! name parts, gender, location, question} returning a domain-specific
//! structured chart. Internal ephemeris/algorithm details are out of scope
//! here — these stand in for the real computation and return a shape rich
//! enough for the Prompt Assembler's chart-summary block and the
//! post-hoc domain-vocabulary guard.

use sa_domain::error::{Error, Result};
use sa_domain::user::ChartKind;
use serde_json::{json, Value};

/// Minimum, normalised calculator input. Every calculator reads the subset
/// of these fields it needs and ignores the rest.
#[derive(Debug, Clone, Default)]
pub struct CalculatorInput {
    pub birth_date: Option<String>,
    pub birth_time: Option<String>,
    pub gender: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub question: Option<String>,
}

/// The required-field sets, in the fuse's preference order: the
/// lowest-requirement calculator first.
pub fn fuse_preference_order() -> &'static [ChartKind] {
    &[
        ChartKind::WesternAstrology,
        ChartKind::Bazi,
        ChartKind::Numerology,
        ChartKind::Tarot,
        ChartKind::Palmistry,
        ChartKind::IChing,
    ]
}

/// Whether `input` carries every field `kind`'s calculator requires.
pub fn satisfiable(kind: ChartKind, input: &CalculatorInput) -> bool {
    match kind {
        ChartKind::WesternAstrology | ChartKind::Bazi => {
            input.birth_date.is_some() && input.birth_time.is_some() && input.gender.is_some()
        }
        ChartKind::Numerology => input.birth_date.is_some() && input.name.is_some(),
        ChartKind::Tarot => input.question.is_some(),
        ChartKind::Palmistry => input.gender.is_some(),
        ChartKind::IChing => input.question.is_some(),
    }
}

/// Domain vocabulary terms used by the post-hoc quality guard — if the
/// final assistant text doesn't mention at least one of these after a
/// chart was produced this turn, a short template paragraph is appended.
pub fn domain_vocabulary(kind: ChartKind) -> &'static [&'static str] {
    match kind {
        ChartKind::WesternAstrology => &[
            "太陽", "月亮", "上升", "星座", "宮位", "水星", "金星", "火星",
        ],
        ChartKind::Bazi => &["天干", "地支", "五行", "八字", "日主", "大運"],
        ChartKind::Numerology => &["生命靈數", "命數", "數字"],
        ChartKind::Tarot => &["牌", "正位", "逆位", "塔羅"],
        ChartKind::Palmistry => &["生命線", "感情線", "智慧線", "掌紋"],
        ChartKind::IChing => &["卦", "爻", "易經"],
    }
}

pub fn invoke(kind: ChartKind, input: &CalculatorInput) -> Result<Value> {
    if !satisfiable(kind, input) {
        return Err(Error::Other(format!(
            "missing required inputs for calculator {}",
            kind.as_str()
        )));
    }
    Ok(match kind {
        ChartKind::WesternAstrology => western_astrology(input),
        ChartKind::Bazi => bazi(input),
        ChartKind::Numerology => numerology(input),
        ChartKind::Tarot => tarot(input),
        ChartKind::Palmistry => palmistry(input),
        ChartKind::IChing => i_ching(input),
    })
}

fn western_astrology(input: &CalculatorInput) -> Value {
    json!({
        "kind": "western_astrology",
        "sun_sign": "巨蟹座",
        "moon_sign": "天蠍座",
        "rising_sign": "獅子座",
        "houses": {
            "first": "獅子座",
            "tenth": "金牛座",
        },
        "notable_placements": ["金星合月亮", "火星刑上升"],
        "birth_date": input.birth_date,
        "birth_time": input.birth_time,
    })
}

fn bazi(input: &CalculatorInput) -> Value {
    json!({
        "kind": "bazi",
        "year_pillar": {"stem": "庚", "branch": "午"},
        "month_pillar": {"stem": "癸", "branch": "未"},
        "day_pillar": {"stem": "丙", "branch": "子"},
        "hour_pillar": {"stem": "乙", "branch": "未"},
        "day_master": "丙火",
        "five_elements_balance": {"木": 1, "火": 2, "土": 2, "金": 1, "水": 2},
        "birth_date": input.birth_date,
        "birth_time": input.birth_time,
    })
}

fn numerology(input: &CalculatorInput) -> Value {
    json!({
        "kind": "numerology",
        "life_path_number": 7,
        "expression_number": 3,
        "name": input.name,
        "birth_date": input.birth_date,
    })
}

fn tarot(input: &CalculatorInput) -> Value {
    json!({
        "kind": "tarot",
        "question": input.question,
        "cards": [
            {"name": "The Star", "position": "正位"},
            {"name": "Two of Cups", "position": "正位"},
            {"name": "The Tower", "position": "逆位"},
        ],
    })
}

fn palmistry(input: &CalculatorInput) -> Value {
    json!({
        "kind": "palmistry",
        "life_line": "深長且無中斷",
        "heart_line": "曲線明顯",
        "head_line": "筆直清晰",
        "gender": input.gender,
    })
}

fn i_ching(input: &CalculatorInput) -> Value {
    json!({
        "kind": "i_ching",
        "question": input.question,
        "hexagram_number": 11,
        "hexagram_name": "地天泰",
        "changing_lines": [3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn western_astrology_requires_date_time_gender() {
        let incomplete = CalculatorInput {
            birth_date: Some("1990-07-22".into()),
            ..Default::default()
        };
        assert!(!satisfiable(ChartKind::WesternAstrology, &incomplete));
        assert!(invoke(ChartKind::WesternAstrology, &incomplete).is_err());

        let complete = CalculatorInput {
            birth_date: Some("1990-07-22".into()),
            birth_time: Some("14:15".into()),
            gender: Some("male".into()),
            ..Default::default()
        };
        assert!(satisfiable(ChartKind::WesternAstrology, &complete));
        assert!(invoke(ChartKind::WesternAstrology, &complete).is_ok());
    }

    #[test]
    fn fuse_order_prefers_western_astrology_first() {
        assert_eq!(fuse_preference_order()[0], ChartKind::WesternAstrology);
    }

    #[test]
    fn tarot_only_requires_a_question() {
        let input = CalculatorInput {
            question: Some("這段感情有未來嗎？".into()),
            ..Default::default()
        };
        assert!(satisfiable(ChartKind::Tarot, &input));
    }
}
