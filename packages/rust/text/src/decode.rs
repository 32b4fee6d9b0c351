//! Structured response decoder for AI text output.
//!
//! Models reply with JSON that is often wrapped in Markdown code fences or
//! surrounded by prose. [`decode_json`] strips the wrapper and reports either
//! the parsed value or a parse error that keeps the raw text.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use coursebuilder_shared::{CourseBuilderError, Result};

/// Outcome of decoding a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Parsed(T),
    ParseError { message: String, raw: String },
}

impl<T> Decoded<T> {
    /// Convert into the crate-wide result type.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Parsed(value) => Ok(value),
            Self::ParseError { message, raw } => {
                Err(CourseBuilderError::response_parse(message, raw))
            }
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Return the body of a fenced reply, or the trimmed input.
pub fn strip_code_fences(raw: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
    });

    let trimmed = raw.trim();

    // Whole reply fenced: cut the opening line and the last fence so that
    // fences inside code examples survive.
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
        let body = body.trim_end();
        return body.strip_suffix("```").unwrap_or(body).trim();
    }

    match FENCE_RE.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim(),
        None => trimmed,
    }
}

/// Decode a JSON value of type `T` from model output.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
    let body = strip_code_fences(raw);

    match serde_json::from_str::<T>(body) {
        Ok(value) => Decoded::Parsed(value),
        Err(first_err) => {
            // Prose around a bare object: retry on the outermost braces.
            if let Some(inner) = outermost_object(body) {
                if inner.len() != body.len() {
                    if let Ok(value) = serde_json::from_str::<T>(inner) {
                        return Decoded::Parsed(value);
                    }
                }
            }
            Decoded::ParseError {
                message: first_err.to_string(),
                raw: raw.to_string(),
            }
        }
    }
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        lessons: Vec<String>,
    }

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"lessons\": [\"a\"]}\n```";
        assert_eq!(strip_code_fences(raw), "{\"lessons\": [\"a\"]}");
    }

    #[test]
    fn strips_bare_fence() {
        let raw = "```\n{\"lessons\": []}\n```\n";
        assert_eq!(strip_code_fences(raw), "{\"lessons\": []}");
    }

    #[test]
    fn unfenced_text_is_trimmed() {
        assert_eq!(strip_code_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn decodes_fenced_payload() {
        let decoded: Decoded<Payload> = decode_json("```json\n{\"lessons\": [\"x\", \"y\"]}\n```");
        assert_eq!(
            decoded,
            Decoded::Parsed(Payload {
                lessons: vec!["x".into(), "y".into()]
            })
        );
    }

    #[test]
    fn decodes_object_wrapped_in_prose() {
        let decoded: Decoded<Payload> =
            decode_json("İşte içerik: {\"lessons\": [\"x\"]} umarım yardımcı olur");
        assert!(decoded.is_parsed());
    }

    #[test]
    fn parse_error_keeps_raw_text() {
        let raw = "Üzgünüm, bu isteği yerine getiremem.";
        let decoded: Decoded<Payload> = decode_json(raw);
        match decoded {
            Decoded::ParseError { raw: kept, .. } => assert_eq!(kept, raw),
            Decoded::Parsed(_) => panic!("expected parse error"),
        }
    }

    #[test]
    fn missing_array_is_a_parse_error() {
        let err = decode_json::<Payload>("{\"chapters\": []}")
            .into_result()
            .unwrap_err();
        assert!(matches!(err, CourseBuilderError::ResponseParse { .. }));
        assert!(err.to_string().contains("JSON parse hatası"));
    }
}
