//! Extraction of the index mapping from free-form model output.
//!
//! Models are asked for a bare JSON object, but replies routinely arrive wrapped
//! in markdown fences or surrounded by prose. Only the first balanced `{...}`
//! span is decoded.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*").expect("valid fence pattern"));

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoObject,

    #[error("unbalanced braces in response")]
    Unbalanced,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("top-level value is not an object")]
    NotAnObject,
}

/// Ordered index lists keyed by lane, as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingResponse {
    indices: HashMap<String, Vec<i64>>,
}

impl RankingResponse {
    /// Indices for `key`; empty when the model gave none or an unusable value.
    pub fn indices(&self, key: &str) -> &[i64] {
        self.indices.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Vec<i64>)> for RankingResponse {
    fn from_iter<I: IntoIterator<Item = (String, Vec<i64>)>>(iter: I) -> Self {
        Self {
            indices: iter.into_iter().collect(),
        }
    }
}

pub fn strip_code_fences(text: &str) -> String {
    let stripped = CODE_FENCE.replace_all(text, "");
    stripped.trim().trim_end_matches('`').to_string()
}

/// The span from the first `{` to its matching `}`, counted by depth.
pub fn extract_object(text: &str) -> Result<&str, ParseError> {
    let start = text.find('{').ok_or(ParseError::NoObject)?;
    let mut depth = 0usize;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    Err(ParseError::Unbalanced)
}

/// Integer view of one array element. Floats are truncated; strings may carry
/// the lane's letter prefix (`"N3"`). Anything else is rejected.
pub fn coerce_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .parse()
            .ok(),
        _ => None,
    }
}

pub fn parse_ranking(text: &str) -> Result<RankingResponse, ParseError> {
    let cleaned = strip_code_fences(text);
    let object = extract_object(&cleaned)?;
    let Value::Object(fields) = serde_json::from_str::<Value>(object)? else {
        return Err(ParseError::NotAnObject);
    };

    Ok(fields
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Array(items) => {
                Some((key, items.iter().filter_map(coerce_index).collect::<Vec<_>>()))
            }
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod strip_code_fences_tests {
        use super::*;

        #[test]
        fn test_strips_json_fence() {
            let text = "```json\n{\"news\": [1]}\n```";
            assert_eq!(strip_code_fences(text), "{\"news\": [1]}");
        }

        #[test]
        fn test_strips_bare_fence() {
            assert_eq!(strip_code_fences("```{\"a\": []}```"), "{\"a\": []}");
        }

        #[test]
        fn test_plain_text_untouched() {
            assert_eq!(strip_code_fences("  {\"a\": [1]}  "), "{\"a\": [1]}");
        }
    }

    mod extract_object_tests {
        use super::*;

        #[test]
        fn test_object_surrounded_by_prose() {
            let text = "Here you go: {\"news\": [2, 0]} hope that helps";
            assert_eq!(extract_object(text).unwrap(), "{\"news\": [2, 0]}");
        }

        #[test]
        fn test_nested_object_kept_whole() {
            let text = "{\"a\": {\"b\": [1]}, \"c\": [2]} trailing {\"d\": 1}";
            assert_eq!(extract_object(text).unwrap(), "{\"a\": {\"b\": [1]}, \"c\": [2]}");
        }

        #[test]
        fn test_missing_closing_brace() {
            assert!(matches!(
                extract_object("{\"news\": [1, 2]"),
                Err(ParseError::Unbalanced)
            ));
        }

        #[test]
        fn test_prose_only() {
            assert!(matches!(
                extract_object("I could not rank these items."),
                Err(ParseError::NoObject)
            ));
        }
    }

    mod coerce_index_tests {
        use super::*;

        #[test]
        fn test_integers_and_floats() {
            assert_eq!(coerce_index(&json!(3)), Some(3));
            assert_eq!(coerce_index(&json!(-1)), Some(-1));
            assert_eq!(coerce_index(&json!(2.0)), Some(2));
            assert_eq!(coerce_index(&json!(2.7)), Some(2));
        }

        #[test]
        fn test_strings_with_and_without_prefix() {
            assert_eq!(coerce_index(&json!("4")), Some(4));
            assert_eq!(coerce_index(&json!(" N3 ")), Some(3));
            assert_eq!(coerce_index(&json!("G12")), Some(12));
        }

        #[test]
        fn test_non_coercible_values() {
            assert_eq!(coerce_index(&json!("first")), None);
            assert_eq!(coerce_index(&json!(true)), None);
            assert_eq!(coerce_index(&json!(null)), None);
            assert_eq!(coerce_index(&json!([1])), None);
            assert_eq!(coerce_index(&json!({"i": 1})), None);
        }
    }

    mod parse_ranking_tests {
        use super::*;

        #[test]
        fn test_fenced_response() {
            let text = "```json\n{\"news\": [0, 2, 1], \"hn\": [3, 1, 0]}\n```";
            let parsed = parse_ranking(text).unwrap();
            assert_eq!(parsed.indices("news"), &[0, 2, 1]);
            assert_eq!(parsed.indices("hn"), &[3, 1, 0]);
        }

        #[test]
        fn test_non_array_value_yields_empty_lane() {
            let parsed = parse_ranking("{\"news\": \"0,1\", \"hn\": [1]}").unwrap();
            assert!(parsed.indices("news").is_empty());
            assert_eq!(parsed.indices("hn"), &[1]);
        }

        #[test]
        fn test_bad_elements_dropped_silently() {
            let parsed = parse_ranking("{\"arxiv\": [1, \"x\", null, \"A4\", 2.0]}").unwrap();
            assert_eq!(parsed.indices("arxiv"), &[1, 4, 2]);
        }

        #[test]
        fn test_missing_key_is_empty() {
            let parsed = parse_ranking("{\"news\": [1]}").unwrap();
            assert!(parsed.indices("github").is_empty());
        }

        #[test]
        fn test_missing_closing_brace_is_error() {
            assert!(parse_ranking("{\"news\": [1, 2]").is_err());
        }

        #[test]
        fn test_prose_only_is_error() {
            assert!(matches!(parse_ranking("No ranking today."), Err(ParseError::NoObject)));
        }

        #[test]
        fn test_invalid_json_inside_braces() {
            assert!(matches!(parse_ranking("{news: [1]}"), Err(ParseError::Json(_))));
        }
    }
}
