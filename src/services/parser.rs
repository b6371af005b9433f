//! Structured-output extraction from free-form model text.
//!
//! Models wrap JSON in a markdown fence or put a sentence in front of it often
//! enough that a bare `serde_json::from_str` is not usable. This module only
//! strips one fence and skips to the first `{` or `[`; it never tries to fix
//! the JSON itself.

use serde::de::DeserializeOwned;

use crate::core::error::ParseError;

/// Removes one leading fence marker (with optional language tag) and one
/// trailing fence marker.
pub fn strip_code_fence(s: &str) -> &str {
    let mut s = s.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '+'))
            .unwrap_or(rest.len());
        s = rest[tag_len..].trim_start();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end();
    }
    s
}

pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let body = strip_code_fence(raw);
    let start = body
        .find(|c: char| c == '{' || c == '[')
        .ok_or(ParseError::NoStructuralToken)?;

    serde_json::from_str(&body[start..]).map_err(ParseError::MalformedJson)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Flashcard, QuizQuestion};
    use serde_json::Value;

    fn fence_wrap(json: &str) -> String {
        format!("```json\n{}\n```", json)
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("json"), "json");
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  ```json  \n  {}  \n  ```  "), "{}");
        assert_eq!(strip_code_fence("```[1]```"), "[1]");
    }

    #[test]
    fn test_fenced_and_bare_payloads_parse_identically() {
        let payloads = [
            r#"{"a": 1, "b": [true, null]}"#,
            r#"[{"term": "ATP", "definition": "energy currency"}]"#,
            "[]",
            r#"{"nested": {"x": "```"}}"#,
        ];
        for json in payloads {
            let bare: Value = parse_structured(json).unwrap();
            let fenced: Value = parse_structured(&fence_wrap(json)).unwrap();
            assert_eq!(bare, fenced, "payload {}", json);
        }
    }

    #[test]
    fn test_commentary_before_json_is_discarded() {
        let raw = "Sure! Here are your flashcards:\n[{\"term\": \"Cell\", \"definition\": \"Unit of life\"}]";
        let cards: Vec<Flashcard> = parse_structured(raw).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].term, "Cell");
    }

    #[test]
    fn test_typed_quiz_parse() {
        let raw = fence_wrap(
            r#"[{"question": "2+2?", "options": ["3", "4", "5", "6"], "correctAnswer": "4"}]"#,
        );
        let quiz: Vec<QuizQuestion> = parse_structured(&raw).unwrap();
        assert_eq!(quiz[0].correct_answer, "4");
    }

    #[test]
    fn test_empty_response() {
        assert!(matches!(parse_structured::<Value>(""), Err(ParseError::EmptyResponse)));
        assert!(matches!(parse_structured::<Value>("  \n "), Err(ParseError::EmptyResponse)));
    }

    #[test]
    fn test_no_structural_token() {
        assert!(matches!(
            parse_structured::<Value>("I cannot help with that."),
            Err(ParseError::NoStructuralToken)
        ));
        assert!(matches!(
            parse_structured::<Value>("```json\n```"),
            Err(ParseError::NoStructuralToken)
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse_structured::<Value>("{bad json"),
            Err(ParseError::MalformedJson(_))
        ));
        // Truncated arrays are not repaired.
        assert!(matches!(
            parse_structured::<Value>(r#"[{"a": 1}, {"a": 2"#),
            Err(ParseError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_is_malformed() {
        let result = parse_structured::<Vec<Flashcard>>(r#"{"term": "x"}"#);
        assert!(matches!(result, Err(ParseError::MalformedJson(_))));
    }
}
