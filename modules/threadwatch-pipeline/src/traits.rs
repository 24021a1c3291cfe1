// Trait seams for the batch jobs.
//
// ThreadSource: paginated read of posts and their replies from the community.
// ItemStore: every read and write the jobs make against persistence.
// Classifier: one single-turn completion against a remote model.
//
// Production impls live next to each trait; in-memory doubles live in
// `testing` so every job can run without network or database.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ai_client::Completion;
use threadwatch_common::{
    ContentItem, JobRun, Label, LabelGap, PostPage, SourceReply, StaffResponse, StaffStats,
    TimeWindow,
};
use threadwatch_store::PgStore;

// ---------------------------------------------------------------------------
// ThreadSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ThreadSource: Send + Sync {
    /// One page of posts for `window`. Pass the previous page's `next` to continue.
    async fn fetch_page(&self, window: TimeWindow, cursor: Option<&str>) -> Result<PostPage>;

    /// Up to `limit` replies of a post, in no particular order.
    async fn fetch_replies(&self, post_id: &str, limit: u32) -> Result<Vec<SourceReply>>;
}

// ---------------------------------------------------------------------------
// ItemStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ItemStore: Send + Sync {
    // --- Content items ---

    /// The subset of `ids` already stored.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Insert or refresh volatile fields. True when newly inserted.
    async fn upsert_item(&self, item: &ContentItem) -> Result<bool>;

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>>;

    /// A post's replies ordered by `created_at` ascending, then id.
    async fn replies_for_post(&self, post_id: &str) -> Result<Vec<ContentItem>>;

    /// Post ids with a staff-authored reply or existing response facts.
    async fn posts_with_staff_replies(&self) -> Result<Vec<String>>;

    // --- Classification ---

    /// Unanalyzed or incompletely labeled items, newest first.
    async fn items_needing_analysis(&self, limit: usize) -> Result<Vec<ContentItem>>;

    async fn items_with_label_gap(&self, gap: LabelGap, limit: usize) -> Result<Vec<ContentItem>>;

    async fn upsert_label(&self, label: &Label) -> Result<()>;

    /// Set `analyzed`. Returns false when the write did not apply.
    async fn mark_analyzed(&self, item_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn is_analyzed(&self, item_id: &str) -> Result<bool>;

    // --- Staff responses ---

    /// Make a post's response facts equal to `responses` as one atomic write.
    /// Returns the number of facts removed.
    async fn replace_staff_responses(&self, post_id: &str, responses: &[StaffResponse]) -> Result<u64>;

    async fn all_staff_responses(&self) -> Result<Vec<StaffResponse>>;

    /// Replace the stats table wholesale. Returns rows removed.
    async fn replace_staff_stats(&self, stats: &[StaffStats]) -> Result<u64>;

    // --- Job log ---

    async fn record_run(&self, run: &JobRun) -> Result<()>;
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl ItemStore for PgStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        Ok(PgStore::existing_ids(self, ids).await?)
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<bool> {
        Ok(PgStore::upsert_item(self, item).await?)
    }

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(PgStore::get_item(self, id).await?)
    }

    async fn replies_for_post(&self, post_id: &str) -> Result<Vec<ContentItem>> {
        Ok(PgStore::replies_for_post(self, post_id).await?)
    }

    async fn posts_with_staff_replies(&self) -> Result<Vec<String>> {
        Ok(PgStore::posts_with_staff_replies(self).await?)
    }

    async fn items_needing_analysis(&self, limit: usize) -> Result<Vec<ContentItem>> {
        Ok(PgStore::items_needing_analysis(self, sql_limit(limit)).await?)
    }

    async fn items_with_label_gap(&self, gap: LabelGap, limit: usize) -> Result<Vec<ContentItem>> {
        Ok(PgStore::items_with_label_gap(self, gap, sql_limit(limit)).await?)
    }

    async fn upsert_label(&self, label: &Label) -> Result<()> {
        Ok(PgStore::upsert_label(self, label).await?)
    }

    async fn mark_analyzed(&self, item_id: &str, at: DateTime<Utc>) -> Result<bool> {
        Ok(PgStore::mark_analyzed(self, item_id, at).await? > 0)
    }

    async fn is_analyzed(&self, item_id: &str) -> Result<bool> {
        Ok(PgStore::is_analyzed(self, item_id).await?)
    }

    async fn replace_staff_responses(&self, post_id: &str, responses: &[StaffResponse]) -> Result<u64> {
        Ok(PgStore::replace_staff_responses(self, post_id, responses).await?)
    }

    async fn all_staff_responses(&self) -> Result<Vec<StaffResponse>> {
        Ok(PgStore::all_staff_responses(self).await?)
    }

    async fn replace_staff_stats(&self, stats: &[StaffStats]) -> Result<u64> {
        Ok(PgStore::replace_staff_stats(self, stats).await?)
    }

    async fn record_run(&self, run: &JobRun) -> Result<()> {
        Ok(PgStore::record_run(self, run).await?)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model identifier recorded on labels produced by this classifier.
    fn model_name(&self) -> &str;

    /// One system instruction plus one user message; returns raw text and usage.
    async fn complete(&self, system: &str, user: &str) -> Result<Completion>;
}

#[async_trait]
impl Classifier for ai_client::Claude {
    fn model_name(&self) -> &str {
        self.model()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        Ok(self.chat_completion(system, user).await?)
    }
}

#[async_trait]
impl Classifier for ai_client::OpenAi {
    fn model_name(&self) -> &str {
        self.model()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        Ok(self.chat_completion(system, user).await?)
    }
}
