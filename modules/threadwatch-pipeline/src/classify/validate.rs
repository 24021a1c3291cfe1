//! Structural validation of a model reply, with local sanitization.
//!
//! Every field is checked on its own. A field that fails is replaced with
//! its safe default and the problem is recorded; the result is always a
//! complete set of label fields.

use serde_json::{Map, Value};

use threadwatch_common::{Category, Intent, Sentiment, Target};

pub const MAX_SUMMARY_CHARS: usize = 500;
pub const CANNED_SUMMARY: &str = "No summary available.";
pub const FALLBACK_KEY_ISSUE: &str = "unspecified";

const REQUIRED_KEYS: [&str; 6] = ["intent", "target", "sentiment", "category", "summary", "key_issues"];

/// Label fields that are known to be structurally valid.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelFields {
    pub intent: Intent,
    pub target: Target,
    pub sentiment: Sentiment,
    pub category: Category,
    pub summary: String,
    pub key_issues: Vec<String>,
}

impl LabelFields {
    /// What an item gets when no usable model reply exists.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Comment,
            target: Target::Other,
            sentiment: Sentiment::Neu,
            category: Category::Other,
            summary: CANNED_SUMMARY.to_string(),
            key_issues: vec![FALLBACK_KEY_ISSUE.to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validated {
    pub fields: LabelFields,
    /// One entry per corrected field; empty when the reply was valid as-is.
    pub problems: Vec<String>,
}

impl Validated {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Parse raw model text into a JSON object. Anything else fails the attempt.
pub fn parse_reply(text: &str) -> anyhow::Result<Map<String, Value>> {
    let stripped = ai_client::strip_code_blocks(text);
    match serde_json::from_str::<Value>(stripped)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, got {}", kind_of(&other)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lowercase, trim, and treat spaces and hyphens as underscores.
fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn enum_field<T: Copy>(
    obj: &Map<String, Value>,
    key: &str,
    parse: fn(&str) -> Option<T>,
    default: T,
    problems: &mut Vec<String>,
) -> T {
    match obj.get(key) {
        None | Some(Value::Null) => {
            problems.push(format!("{key} missing"));
            default
        }
        Some(Value::String(s)) => parse(&normalize_token(s)).unwrap_or_else(|| {
            problems.push(format!("{key} has invalid value {s:?}"));
            default
        }),
        Some(other) => {
            problems.push(format!("{key} is {}", kind_of(other)));
            default
        }
    }
}

fn summary_field(obj: &Map<String, Value>, problems: &mut Vec<String>) -> String {
    match obj.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() && s.chars().count() <= MAX_SUMMARY_CHARS => {
            s.trim().to_string()
        }
        Some(Value::String(s)) if !s.trim().is_empty() => {
            problems.push(format!("summary exceeds {MAX_SUMMARY_CHARS} characters"));
            CANNED_SUMMARY.to_string()
        }
        Some(Value::String(_)) => {
            problems.push("summary is empty".to_string());
            CANNED_SUMMARY.to_string()
        }
        None | Some(Value::Null) => {
            problems.push("summary missing".to_string());
            CANNED_SUMMARY.to_string()
        }
        Some(other) => {
            problems.push(format!("summary is {}", kind_of(other)));
            CANNED_SUMMARY.to_string()
        }
    }
}

fn key_issues_field(obj: &Map<String, Value>, problems: &mut Vec<String>) -> Vec<String> {
    match obj.get("key_issues") {
        Some(Value::Array(items)) => {
            let strings: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if strings.len() != items.len() {
                problems.push(format!(
                    "key_issues had {} non-string entries",
                    items.len() - strings.len()
                ));
            }
            strings
        }
        None | Some(Value::Null) => {
            problems.push("key_issues missing".to_string());
            vec![FALLBACK_KEY_ISSUE.to_string()]
        }
        Some(other) => {
            problems.push(format!("key_issues is {}", kind_of(other)));
            vec![FALLBACK_KEY_ISSUE.to_string()]
        }
    }
}

/// Check every field and sanitize what fails. Never errors.
pub fn validate(obj: &Map<String, Value>) -> Validated {
    let mut problems = Vec::new();

    let extra: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !REQUIRED_KEYS.contains(k))
        .collect();
    if !extra.is_empty() {
        problems.push(format!("unexpected keys {extra:?}"));
    }

    let fields = LabelFields {
        intent: enum_field(obj, "intent", Intent::parse, Intent::Comment, &mut problems),
        target: enum_field(obj, "target", Target::parse, Target::Other, &mut problems),
        sentiment: enum_field(obj, "sentiment", Sentiment::parse, Sentiment::Neu, &mut problems),
        category: enum_field(obj, "category", Category::parse, Category::Other, &mut problems),
        summary: summary_field(obj, &mut problems),
        key_issues: key_issues_field(obj, &mut problems),
    };

    Validated { fields, problems }
}
