use serde_json::Value;

pub const ENHANCED_PROMPT_KEYS: &[&str] = &[
    "enhancedprompt",
    "enhanced",
    "promptenhanced",
    "prompt",
    "promptvariation",
    "promptvariations",
    "variations",
];

/// Lowercases and strips everything but alphanumerics, so that
/// `"prompt variations"` and `"Prompt-Variations"` compare equal.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn extract_enhanced_prompt(response: &Value, original: &str) -> String {
    find_enhanced_prompt(response).unwrap_or_else(|| original.to_string())
}

pub fn find_enhanced_prompt(response: &Value) -> Option<String> {
    let obj = response.as_object()?;

    for (key, value) in obj {
        if !ENHANCED_PROMPT_KEYS.contains(&normalize_key(key).as_str()) {
            continue;
        }
        let candidate = match value {
            Value::String(text) => Some(text.as_str()),
            Value::Array(rows) => rows.first().and_then(Value::as_str),
            _ => None,
        };
        if let Some(text) = candidate.filter(|text| !text.is_empty()) {
            return Some(text.to_string());
        }
    }

    obj.values()
        .filter_map(Value::as_str)
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_enhanced_prompt, normalize_key};

    #[test]
    fn key_normalization_drops_punctuation_and_case() {
        assert_eq!(normalize_key("prompt variations"), "promptvariations");
        assert_eq!(normalize_key("Prompt-Variations"), "promptvariations");
        assert_eq!(normalize_key("enhanced_prompt"), "enhancedprompt");
    }

    #[test]
    fn alias_with_spaces_is_matched() {
        let response = json!({ "prompt variations": "Enhanced text" });
        assert_eq!(extract_enhanced_prompt(&response, "orig"), "Enhanced text");
    }

    #[test]
    fn list_alias_takes_first_element() {
        let response = json!({ "variations": ["first take", "second take"] });
        assert_eq!(extract_enhanced_prompt(&response, "orig"), "first take");
    }

    #[test]
    fn alias_order_follows_response_order() {
        let response = json!({
            "request_id": 7,
            "prompt-variations": ["from list"],
            "enhanced prompt": "from string",
        });
        assert_eq!(extract_enhanced_prompt(&response, "orig"), "from list");
    }

    #[test]
    fn empty_alias_values_are_skipped() {
        let response = json!({
            "enhanced_prompt": "",
            "variations": [],
            "prompt": "usable",
        });
        assert_eq!(extract_enhanced_prompt(&response, "orig"), "usable");
    }

    #[test]
    fn falls_back_to_first_non_blank_string() {
        let response = json!({ "status": "  ", "text": "a brighter scene", "id": 3 });
        assert_eq!(
            extract_enhanced_prompt(&response, "orig"),
            "a brighter scene"
        );
    }

    #[test]
    fn returns_original_without_string_values() {
        assert_eq!(
            extract_enhanced_prompt(&json!({ "count": 2, "ok": true }), "orig"),
            "orig"
        );
        assert_eq!(extract_enhanced_prompt(&json!(["x"]), "orig"), "orig");
        assert_eq!(extract_enhanced_prompt(&json!(null), "orig"), "orig");
    }
}
