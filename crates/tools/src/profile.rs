//! Profile and memory-facing tool handlers: `getUserProfile`,
//! `saveUserInsight`, `searchConversationHistory`, `getLocation`.

use sa_domain::error::{Error, Result};
use sa_domain::user::UserFactsPartial;
use sa_memory::JsonRepository;
use serde_json::{json, Value};

pub fn get_user_profile(repo: &JsonRepository, user_id: &str) -> Value {
    let user = repo.read_user(user_id);
    json!({
        "userId": user.user_id,
        "displayName": user.display_name,
        "birthDate": user.birth_date,
        "birthTime": user.birth_time,
        "birthLocation": user.birth_location,
        "gender": user.gender,
    })
}

pub fn save_user_insight(
    repo: &JsonRepository,
    user_id: &str,
    key: &str,
    value: &str,
) -> Result<Value> {
    repo.write_profile_fact(user_id, key, value)?;
    Ok(json!({ "acknowledged": true, "key": key }))
}

/// A small, free-text keyword search over a session's stored messages.
/// `limit` bounds how many recent messages are scanned; the spec treats
/// this as a best-effort recall aid, not a ranked search index.
pub fn search_conversation_history(
    repo: &JsonRepository,
    session_id: &str,
    keyword: &str,
    scan_limit: usize,
) -> Value {
    let needle = keyword.to_lowercase();
    let matches: Vec<Value> = repo
        .read_recent(session_id, scan_limit)
        .into_iter()
        .filter(|m| m.content.to_lowercase().contains(&needle))
        .map(|m| json!({ "content": m.content, "createdAt": m.created_at }))
        .collect();
    json!({ "matches": matches })
}

/// Resolve a free-text place name to coordinates + timezone. Stands in for
/// a geocoding lookup — deterministic for testing, not a real gazetteer.
pub fn get_location(place: &str) -> Result<Value> {
    let known: &[(&str, f64, f64, &str)] = &[
        ("高雄", 22.6273, 120.3014, "Asia/Taipei"),
        ("台北", 25.0330, 121.5654, "Asia/Taipei"),
        ("台中", 24.1477, 120.6736, "Asia/Taipei"),
        ("台南", 22.9998, 120.2269, "Asia/Taipei"),
    ];
    known
        .iter()
        .find(|(name, ..)| place.contains(name))
        .map(|(name, lat, lon, tz)| {
            json!({
                "place": name,
                "latitude": lat,
                "longitude": lon,
                "timezone": tz,
            })
        })
        .ok_or_else(|| Error::Other(format!("unknown location: {place}")))
}

pub fn partial_from_calculator_input(
    birth_date: Option<String>,
    birth_time: Option<String>,
    birth_location: Option<String>,
    gender: Option<String>,
) -> UserFactsPartial {
    UserFactsPartial {
        birth_date,
        birth_time,
        birth_location,
        gender: gender.and_then(|g| normalize_gender(&g)),
        ..Default::default()
    }
}

/// Normalise gender synonyms the LM or user might use into the canonical
/// enum — part of the Tool Registry's input-normalisation responsibility.
pub fn normalize_gender(raw: &str) -> Option<sa_domain::user::Gender> {
    use sa_domain::user::Gender;
    match raw.trim().to_lowercase().as_str() {
        "male" | "男" | "男生" | "男性" | "m" => Some(Gender::Male),
        "female" | "女" | "女生" | "女性" | "f" => Some(Gender::Female),
        "other" | "其他" => Some(Gender::Other),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_gender_synonyms() {
        assert_eq!(
            normalize_gender("男生"),
            Some(sa_domain::user::Gender::Male)
        );
        assert_eq!(
            normalize_gender("female"),
            Some(sa_domain::user::Gender::Female)
        );
        assert_eq!(normalize_gender("unknown"), None);
    }

    #[test]
    fn resolves_known_location() {
        let loc = get_location("高雄市").unwrap();
        assert_eq!(loc["timezone"], "Asia/Taipei");
    }

    #[test]
    fn unknown_location_errors() {
        assert!(get_location("Atlantis").is_err());
    }
}
