use serde::de::DeserializeOwned;

/// Removes a surrounding Markdown code fence (```json … ```), if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parses JSON that a model may have wrapped in a code fence.
pub fn parse_lenient<T>(raw: &str) -> serde_json::Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_str(strip_code_fence(raw))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn fenced_and_bare_documents_parse_the_same() {
        let bare: Value = parse_lenient(r#"{"a":1}"#).unwrap();
        let fenced: Value = parse_lenient("```json\n{\"a\":1}\n```").unwrap();
        let plain_fence: Value = parse_lenient("```\n{\"a\":1}```").unwrap();

        assert_eq!(bare, json!({"a": 1}));
        assert_eq!(fenced, bare);
        assert_eq!(plain_fence, bare);
    }
}
