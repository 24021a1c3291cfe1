use schemars::JsonSchema;
use serde::Deserialize;

use threadwatch_common::{Category, ContentItem, Intent, Sentiment, Target};

/// Appended to a body cut at the character limit.
pub const TRUNCATION_MARKER: &str = "...";

/// The object the model is asked to return. Only used to render the schema
/// into the instruction; replies are validated field by field, not through serde.
#[allow(dead_code)]
#[derive(Debug, Deserialize, JsonSchema)]
struct ClassificationReply {
    /// "help" when the author wants assistance, "comment" otherwise
    intent: Intent,
    /// "platform" when the text is about the platform itself
    target: Target,
    sentiment: Sentiment,
    category: Category,
    /// One or two sentences, at most 500 characters
    summary: String,
    /// Short phrases naming the concrete problems raised, most important first
    key_issues: Vec<String>,
}

fn joined<T: Copy>(values: &[T], name: fn(&T) -> &'static str) -> String {
    values.iter().map(|v| format!("\"{}\"", name(v))).collect::<Vec<_>>().join(", ")
}

/// The fixed instruction: allowed values for every field, the category
/// glossary, worked examples and the JSON schema.
pub fn system_prompt() -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| format!("- {}: {}", c.as_str(), c.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(ClassificationReply))
        .unwrap_or_default();

    format!(
        r#"You classify posts and replies from an online community about a platform.

Return ONLY a JSON object with exactly these six keys and nothing else:
intent, target, sentiment, category, summary, key_issues.

## Allowed values
- intent: one of {intents}
- target: one of {targets}
- sentiment: one of {sentiments}
- category: exactly one of the values below
- summary: a plain string, at most 500 characters
- key_issues: a JSON array of short strings (may be empty)

## Categories
{categories}

## Examples
Text: "I was charged twice this month and support hasn't answered in a week. How do I get my money back?"
{{"intent": "help", "target": "platform", "sentiment": "neg", "category": "refunds", "summary": "User was double charged and wants a refund; support has not replied.", "key_issues": ["double charge", "slow support response"]}}

Text: "The new dark mode looks great, thanks team!"
{{"intent": "comment", "target": "platform", "sentiment": "pos", "category": "ui_ux", "summary": "User praises the new dark mode.", "key_issues": []}}

Text: "Anyone watching the game tonight?"
{{"intent": "comment", "target": "other", "sentiment": "neu", "category": "other", "summary": "Off-topic question about a sports game.", "key_issues": []}}

## JSON schema
{schema}"#,
        intents = joined(Intent::ALL, Intent::as_str),
        targets = joined(Target::ALL, Target::as_str),
        sentiments = joined(Sentiment::ALL, Sentiment::as_str),
    )
}

/// Cut `body` to at most `max_chars` characters, marking the cut.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &body[..cut]),
        None => body.to_string(),
    }
}

/// The per-item message. Replies carry the title of their thread when known.
pub fn user_prompt(item: &ContentItem, thread_title: Option<&str>, max_body_chars: usize) -> String {
    let mut out = String::new();
    if item.is_post() {
        out.push_str("Kind: post\n");
        if let Some(title) = item.title.as_deref() {
            out.push_str(&format!("Title: {title}\n"));
        }
        if let Some(flair) = item.flair.as_deref() {
            out.push_str(&format!("Flair: {flair}\n"));
        }
    } else {
        out.push_str("Kind: reply\n");
        if let Some(title) = thread_title {
            out.push_str(&format!("In thread: {title}\n"));
        }
    }
    out.push_str("\n---\n\n");
    out.push_str(&truncate_body(&item.body, max_body_chars));
    out
}
