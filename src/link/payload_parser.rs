//! Tolerant parsing of interpretation payloads.
//!
//! The interpretation backend routes through a language model, so the
//! structured payload may arrive as literal JSON, wrapped in a fenced code
//! block, or buried inside prose. Each encoding is tried in order; the first
//! success wins.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::interpreter::Interpretation;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not a JSON object or string")]
    UnsupportedShape,
    #[error("no JSON object found in payload text")]
    NoJsonFound,
    #[error("payload JSON did not match the interpretation schema: {0}")]
    SchemaMismatch(#[from] serde_json::Error),
}

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex must compile")
    })
}

/// Parse an interpretation out of a response payload value.
///
/// Objects are deserialized directly; strings go through the three-tier
/// text fallback.
pub fn parse_interpretation(payload: &serde_json::Value) -> Result<Interpretation, ParseError> {
    match payload {
        serde_json::Value::Object(_) => Ok(serde_json::from_value(payload.clone())?),
        serde_json::Value::String(text) => parse_interpretation_text(text),
        _ => Err(ParseError::UnsupportedShape),
    }
}

/// Three-tier text parse: literal JSON, fenced-block JSON, JSON embedded in
/// prose.
pub fn parse_interpretation_text(text: &str) -> Result<Interpretation, ParseError> {
    // Tier 1: the whole payload is the JSON document.
    if let Ok(parsed) = serde_json::from_str::<Interpretation>(text.trim()) {
        return Ok(parsed);
    }

    // Tier 2: JSON wrapped in a fenced code block.
    if let Some(captures) = fenced_block_regex().captures(text) {
        if let Ok(parsed) = serde_json::from_str::<Interpretation>(&captures[1]) {
            return Ok(parsed);
        }
    }

    // Tier 3: first balanced JSON object embedded in prose.
    let candidate = extract_balanced_object(text).ok_or(ParseError::NoJsonFound)?;
    Ok(serde_json::from_str(candidate)?)
}

/// Find the first brace-balanced object in `text`, honoring string literals
/// so braces inside quoted values do not confuse the depth counter.
fn extract_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "styleText": "techno, punchy drums",
        "weightedStyles": [{"text": "techno, punchy drums", "weight": 1.0}],
        "generationConfig": {
            "bpm": 132,
            "density": 0.7,
            "brightness": 0.8,
            "temperature": 1.2,
            "guidance": 4.0
        },
        "magnitude": 0.8,
        "hasTransition": false,
        "timestamp": 1700000000000
    }"#;

    #[test]
    fn test_all_three_encodings_parse_identically() {
        let literal = parse_interpretation_text(PAYLOAD).unwrap();

        let fenced = format!("Here is the result:\n```json\n{}\n```\nEnjoy!", PAYLOAD);
        let fenced = parse_interpretation_text(&fenced).unwrap();

        let prose = format!(
            "The motion suggests high energy. {} That concludes the analysis.",
            PAYLOAD
        );
        let prose = parse_interpretation_text(&prose).unwrap();

        assert_eq!(literal, fenced);
        assert_eq!(literal, prose);
        assert_eq!(literal.generation_config.bpm, 132);
    }

    #[test]
    fn test_fenced_block_without_language_tag() {
        let wrapped = format!("```\n{}\n```", PAYLOAD);
        let parsed = parse_interpretation_text(&wrapped).unwrap();
        assert_eq!(parsed.style_text, "techno, punchy drums");
    }

    #[test]
    fn test_object_payload_parses_directly() {
        let value: serde_json::Value = serde_json::from_str(PAYLOAD).unwrap();
        let parsed = parse_interpretation(&value).unwrap();
        assert_eq!(parsed.generation_config.bpm, 132);
    }

    #[test]
    fn test_string_payload_routes_through_fallback() {
        let value = serde_json::Value::String(format!("blah {} blah", PAYLOAD));
        let parsed = parse_interpretation(&value).unwrap();
        assert_eq!(parsed.magnitude, 0.8);
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_balancing() {
        let tricky = PAYLOAD.replace(
            "techno, punchy drums\", \"weight",
            "techno {loud}, punchy drums\", \"weight",
        );
        let tricky = tricky.replace(
            "\"styleText\": \"techno, punchy drums\"",
            "\"styleText\": \"techno {loud}, punchy drums\"",
        );
        let prose = format!("note: {} end", tricky);
        let parsed = parse_interpretation_text(&prose).unwrap();
        assert!(parsed.style_text.contains("{loud}"));
    }

    #[test]
    fn test_no_json_is_a_typed_failure() {
        let result = parse_interpretation_text("no structured payload here at all");
        assert!(matches!(result, Err(ParseError::NoJsonFound)));
    }

    #[test]
    fn test_wrong_schema_is_a_typed_failure() {
        let result = parse_interpretation_text(r#"prose {"unrelated": true} prose"#);
        assert!(matches!(result, Err(ParseError::SchemaMismatch(_))));
    }

    #[test]
    fn test_non_object_value_rejected() {
        let result = parse_interpretation(&serde_json::Value::Number(42.into()));
        assert!(matches!(result, Err(ParseError::UnsupportedShape)));
    }
}
