//! Strict parsing of model output into candidate test cases and rules.
//!
//! Parsing is total: every input yields either candidates or a
//! [`ParseError`], never a panic. Accepted shapes are a bare JSON array or
//! an object wrapping the array under a known key, optionally inside a
//! Markdown code fence or surrounded by prose.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Model output did not have an accepted shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,
    #[error("response contains no JSON")]
    NoJson,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("unexpected shape: {0}")]
    UnexpectedShape(String),
}

impl From<ParseError> for caseforge_core::Error {
    fn from(e: ParseError) -> Self {
        caseforge_core::Error::Parse(e.to_string())
    }
}

/// A test case as the model described it, before enum validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateTestCase {
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub expected_result: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub severity: Option<String>,
    pub persona: Option<String>,
    /// Raw confidence; clamping happens during assembly.
    pub confidence: Option<f64>,
}

/// A rule as the model described it, with the context labels it cites.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCandidate {
    pub rule: String,
    pub citations: Vec<String>,
}

const TEST_CASE_KEYS: &[&str] = &["test_cases", "testCases", "tests", "cases"];
const RULE_KEYS: &[&str] = &["rules", "business_rules", "businessRules"];

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").expect("valid regex"))
}

fn step_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•]|step\s*\d+[:.)])\s*").expect("valid regex"))
}

/// Locate and decode the JSON value in a model response.
pub fn extract_json(text: &str) -> Result<Value, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(caps) = fence_regex().captures(text) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !inner.is_empty() {
            return decode_embedded(inner);
        }
    }
    decode_embedded(text)
}

/// Decode `text` directly, or the outermost `[...]` / `{...}` span inside it.
fn decode_embedded(text: &str) -> Result<Value, ParseError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let start = text
        .find(['[', '{'])
        .ok_or(ParseError::NoJson)?;
    let close = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(close).ok_or(ParseError::NoJson)?;
    if end <= start {
        return Err(ParseError::NoJson);
    }

    serde_json::from_str::<Value>(&text[start..=end])
        .map_err(|e| ParseError::InvalidJson(e.to_string()))
}

/// Pull the item array out of a bare array or a wrapping object.
fn unwrap_items(value: Value, keys: &[&str]) -> Result<Vec<Value>, ParseError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            for key in keys {
                match obj.remove(*key) {
                    Some(Value::Array(items)) => return Ok(items),
                    Some(other) => {
                        return Err(ParseError::UnexpectedShape(format!(
                            "'{}' is {} instead of an array",
                            key,
                            type_name(&other)
                        )))
                    }
                    None => {}
                }
            }
            Err(ParseError::UnexpectedShape(format!(
                "object without any of {:?}",
                keys
            )))
        }
        other => Err(ParseError::UnexpectedShape(format!(
            "top-level {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// First present, non-null field among `names`.
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| obj.get(*n))
        .find(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text given as a scalar, or as an array of lines joined with newlines.
fn text_field(obj: &Map<String, Value>, names: &[&str]) -> String {
    match field(obj, names) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(scalar_text)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => scalar_text(other).unwrap_or_default(),
        None => String::new(),
    }
}

fn optional_text(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(obj, names)
        .and_then(scalar_text)
        .filter(|s| !s.is_empty())
}

/// A list given as an array, or as one string split on `separator`.
fn list_field(obj: &Map<String, Value>, names: &[&str], separator: char) -> Vec<String> {
    let items: Vec<String> = match field(obj, names) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(step) => optional_text(step, &["action", "step", "description"]),
                other => scalar_text(other),
            })
            .collect(),
        Some(Value::String(s)) => s.split(separator).map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

fn confidence_field(obj: &Map<String, Value>) -> Option<f64> {
    match field(obj, &["confidence", "confidence_score", "confidenceScore"])? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn candidate_from_object(obj: &Map<String, Value>) -> CandidateTestCase {
    let steps = list_field(obj, &["steps", "test_steps", "testSteps"], '\n')
        .into_iter()
        .map(|s| step_prefix_regex().replace(&s, "").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    CandidateTestCase {
        title: text_field(obj, &["title", "name"]),
        description: text_field(obj, &["description", "summary"]),
        steps,
        expected_result: text_field(
            obj,
            &[
                "expected_result",
                "expectedResult",
                "expectedResults",
                "expected_results",
                "expected",
            ],
        ),
        tags: list_field(obj, &["tags", "labels"], ','),
        category: optional_text(obj, &["category", "type"]),
        priority: optional_text(obj, &["priority"]),
        severity: optional_text(obj, &["severity"]),
        persona: optional_text(obj, &["persona", "actor", "role"]),
        confidence: confidence_field(obj),
    }
}

/// Parse a generation response into candidates.
///
/// Every array item must be an object; anything else fails the whole
/// response.
pub fn parse_candidates(text: &str) -> Result<Vec<CandidateTestCase>, ParseError> {
    let items = unwrap_items(extract_json(text)?, TEST_CASE_KEYS)?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(obj) => Ok(candidate_from_object(obj)),
            other => Err(ParseError::UnexpectedShape(format!(
                "item {} is {}",
                i,
                type_name(other)
            ))),
        })
        .collect()
}

/// Parse a validation response into rules with their cited labels.
///
/// A rule given as a bare string is kept with no citations.
pub fn parse_rules(text: &str) -> Result<Vec<RuleCandidate>, ParseError> {
    let items = unwrap_items(extract_json(text)?, RULE_KEYS)?;
    let mut rules = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let rule = match item {
            Value::String(s) => RuleCandidate {
                rule: s.trim().to_string(),
                citations: Vec::new(),
            },
            Value::Object(obj) => RuleCandidate {
                rule: text_field(obj, &["rule", "text", "description"]),
                citations: list_field(
                    obj,
                    &["sources", "citations", "chunks", "source", "supporting_chunks"],
                    ',',
                ),
            },
            other => {
                return Err(ParseError::UnexpectedShape(format!(
                    "rule {} is {}",
                    i,
                    type_name(other)
                )))
            }
        };
        if !rule.rule.is_empty() {
            rules.push(rule);
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_array() {
        let cases = parse_candidates(
            r#"[{"title":"Submit form","steps":["Open page","Click submit"],"expected_result":"Saved","category":"functional"}]"#,
        )
        .unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].title, "Submit form");
        assert_eq!(cases[0].steps, vec!["Open page", "Click submit"]);
        assert_eq!(cases[0].category.as_deref(), Some("functional"));
    }

    #[test]
    fn test_wrapped_object_and_camel_case_aliases() {
        let cases = parse_candidates(
            r#"{"testCases":[{"title":"A","expectedResults":"Shown","confidenceScore":0.93}]}"#,
        )
        .unwrap();
        assert_eq!(cases[0].expected_result, "Shown");
        assert_eq!(cases[0].confidence, Some(0.93));
    }

    #[test]
    fn test_expected_results_as_array_are_joined() {
        let cases = parse_candidates(
            r#"[{"title":"A","expectedResults":["Refund is approved", " ", "Audit entry is written"]}]"#,
        )
        .unwrap();
        assert_eq!(
            cases[0].expected_result,
            "Refund is approved\nAudit entry is written"
        );
    }

    #[test]
    fn test_code_fence_with_prose() {
        let text = "Here are the tests:\n```json\n{\"test_cases\": [{\"title\": \"A\"}]}\n```\nLet me know!";
        let cases = parse_candidates(text).unwrap();
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn test_json_embedded_in_prose_without_fence() {
        let text = "Sure! [{\"title\": \"A\"}, {\"title\": \"B\"}] Hope this helps.";
        assert_eq!(parse_candidates(text).unwrap().len(), 2);
    }

    #[test]
    fn test_steps_as_numbered_string() {
        let cases =
            parse_candidates(r#"[{"title":"A","steps":"1. Log in\n2) Open settings\n- Save"}]"#)
                .unwrap();
        assert_eq!(cases[0].steps, vec!["Log in", "Open settings", "Save"]);
    }

    #[test]
    fn test_tags_as_comma_string() {
        let cases = parse_candidates(r#"[{"title":"A","tags":"refund, policy ,"}]"#).unwrap();
        assert_eq!(cases[0].tags, vec!["refund", "policy"]);
    }

    #[test]
    fn test_confidence_as_string() {
        let cases = parse_candidates(r#"[{"title":"A","confidence":"0.5"}]"#).unwrap();
        assert_eq!(cases[0].confidence, Some(0.5));
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(parse_candidates("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_prose_only() {
        assert_eq!(
            parse_candidates("I cannot help with that."),
            Err(ParseError::NoJson)
        );
    }

    #[test]
    fn test_truncated_json() {
        assert!(matches!(
            parse_candidates(r#"[{"title": "A"}, {"title": }]"#),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_object_without_known_key() {
        assert!(matches!(
            parse_candidates(r#"{"results": []}"#),
            Err(ParseError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_non_object_item_fails_whole_response() {
        assert!(matches!(
            parse_candidates(r#"[{"title":"A"}, "B"]"#),
            Err(ParseError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_scalar_top_level() {
        assert!(matches!(
            parse_candidates("42"),
            Err(ParseError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_parse_rules_with_citations() {
        let rules = parse_rules(
            r#"{"rules":[{"rule":"Refunds within 30 days","sources":["C1","C3"]},"Bare rule",{"rule":""}]}"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].citations, vec!["C1", "C3"]);
        assert!(rules[1].citations.is_empty());
    }

    #[test]
    fn test_parse_rules_citation_string() {
        let rules = parse_rules(r#"[{"text":"R","citations":"C2, C4"}]"#).unwrap();
        assert_eq!(rules[0].citations, vec!["C2", "C4"]);
    }

    #[test]
    fn test_parse_error_converts_to_core_error() {
        let err: caseforge_core::Error = ParseError::NoJson.into();
        assert!(matches!(err, caseforge_core::Error::Parse(_)));
    }
}
