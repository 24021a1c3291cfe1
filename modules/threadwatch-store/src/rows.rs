// Row shapes as they come back from Postgres, and their conversion into
// domain types. Conversion is the only place stored text becomes an enum.

use chrono::{DateTime, Utc};
use threadwatch_common::{
    Category, ContentItem, Intent, ItemKind, Label, Sentiment, StaffResponse, StaffStats, Target,
};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: String,
    pub kind: String,
    pub parent_id: Option<String>,
    pub created_at: i64,
    pub title: Option<String>,
    pub body: String,
    pub author: String,
    pub flair: Option<String>,
    pub permalink: Option<String>,
    pub score: i64,
    pub upvote_ratio: Option<f64>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub num_replies: i64,
    pub is_staff: bool,
    pub analyzed: bool,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ItemRow> for ContentItem {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self> {
        let kind = ItemKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Decode(format!("item {} has kind {:?}", row.id, row.kind)))?;
        Ok(ContentItem {
            id: row.id,
            kind,
            parent_id: row.parent_id,
            created_at: row.created_at,
            title: row.title,
            body: row.body,
            author: row.author,
            flair: row.flair,
            permalink: row.permalink,
            score: row.score,
            upvote_ratio: row.upvote_ratio,
            upvotes: row.upvotes,
            downvotes: row.downvotes,
            num_replies: row.num_replies,
            is_staff: row.is_staff,
            analyzed: row.analyzed,
            analyzed_at: row.analyzed_at,
        })
    }
}

pub(crate) fn items(rows: Vec<ItemRow>) -> Result<Vec<ContentItem>> {
    rows.into_iter().map(ContentItem::try_from).collect()
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LabelRow {
    pub item_id: String,
    pub intent: Option<String>,
    pub target: Option<String>,
    pub sentiment: Option<String>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub key_issues: Option<serde_json::Value>,
    pub model_name: String,
    pub tokens_in: i32,
    pub tokens_out: i32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// Decode a required enum column; a null or unknown value is a decode error.
fn column<T>(item_id: &str, name: &str, value: Option<String>, parse: fn(&str) -> Option<T>) -> Result<T> {
    let raw = value.ok_or_else(|| StoreError::Decode(format!("label {item_id}: {name} is null")))?;
    parse(&raw).ok_or_else(|| StoreError::Decode(format!("label {item_id}: {name} = {raw:?}")))
}

impl TryFrom<LabelRow> for Label {
    type Error = StoreError;

    fn try_from(row: LabelRow) -> Result<Self> {
        let id = row.item_id.as_str();
        let intent = column(id, "intent", row.intent, Intent::parse)?;
        let target = column(id, "target", row.target, Target::parse)?;
        let sentiment = column(id, "sentiment", row.sentiment, Sentiment::parse)?;
        let category = column(id, "category", row.category, Category::parse)?;
        let summary = row
            .summary
            .ok_or_else(|| StoreError::Decode(format!("label {id}: summary is null")))?;
        let key_issues: Vec<String> = match row.key_issues {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Decode(format!("label {id}: key_issues: {e}")))?,
            None => return Err(StoreError::Decode(format!("label {id}: key_issues is null"))),
        };

        Ok(Label {
            item_id: row.item_id,
            intent,
            target,
            sentiment,
            category,
            summary,
            key_issues,
            model_name: row.model_name,
            tokens_in: row.tokens_in,
            tokens_out: row.tokens_out,
            cost_usd: row.cost_usd,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct StaffResponseRow {
    pub post_id: String,
    pub reply_id: String,
    pub staff_username: String,
    pub response_time_seconds: i64,
    pub post_created_at: i64,
    pub reply_created_at: i64,
    pub is_first_response: bool,
}

impl From<StaffResponseRow> for StaffResponse {
    fn from(row: StaffResponseRow) -> Self {
        StaffResponse {
            post_id: row.post_id,
            reply_id: row.reply_id,
            staff_username: row.staff_username,
            response_time_seconds: row.response_time_seconds,
            post_created_at: row.post_created_at,
            reply_created_at: row.reply_created_at,
            is_first_response: row.is_first_response,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct StaffStatsRow {
    pub username: String,
    pub total_responses: i64,
    pub avg_response_time_seconds: f64,
    pub fastest_response_seconds: i64,
    pub slowest_response_seconds: i64,
    pub first_responses: i64,
    pub last_updated: DateTime<Utc>,
}

impl From<StaffStatsRow> for StaffStats {
    fn from(row: StaffStatsRow) -> Self {
        StaffStats {
            username: row.username,
            total_responses: row.total_responses,
            avg_response_time_seconds: row.avg_response_time_seconds,
            fastest_response_seconds: row.fastest_response_seconds,
            slowest_response_seconds: row.slowest_response_seconds,
            first_responses: row.first_responses,
            last_updated: row.last_updated,
        }
    }
}
