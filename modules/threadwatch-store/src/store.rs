use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use threadwatch_common::{
    ContentItem, JobRun, Label, LabelGap, StaffResponse, StaffStats,
};
use tracing::{debug, info};

use crate::error::Result;
use crate::rows::{self, ItemRow, LabelRow, StaffResponseRow, StaffStatsRow};

const ITEM_COLUMNS: &str = "c.id, c.kind, c.parent_id, c.created_at, c.title, c.body, c.author, \
     c.flair, c.permalink, c.score, c.upvote_ratio, c.upvotes, c.downvotes, c.num_replies, \
     c.is_staff, c.analyzed, c.analyzed_at";

/// The single owner of the connection pool. Every other component receives a
/// reference to this store instead of touching the pool directly.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a bounded pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- Content items ----

    /// The subset of `ids` already stored.
    pub async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found = sqlx::query_scalar::<_, String>(
            "SELECT id FROM content_items WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(found.into_iter().collect())
    }

    /// Insert an item, or refresh only its volatile counters when it exists.
    /// Returns true when the row was newly inserted.
    pub async fn upsert_item(&self, item: &ContentItem) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO content_items
                (id, kind, parent_id, created_at, title, body, author, flair, permalink,
                 score, upvote_ratio, upvotes, downvotes, num_replies, is_staff,
                 analyzed, analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                score        = EXCLUDED.score,
                upvote_ratio = EXCLUDED.upvote_ratio,
                upvotes      = EXCLUDED.upvotes,
                downvotes    = EXCLUDED.downvotes,
                num_replies  = EXCLUDED.num_replies,
                is_staff     = EXCLUDED.is_staff
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&item.id)
        .bind(item.kind.as_str())
        .bind(&item.parent_id)
        .bind(item.created_at)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.author)
        .bind(&item.flair)
        .bind(&item.permalink)
        .bind(item.score)
        .bind(item.upvote_ratio)
        .bind(item.upvotes)
        .bind(item.downvotes)
        .bind(item.num_replies)
        .bind(item.is_staff)
        .bind(item.analyzed)
        .bind(item.analyzed_at)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = %item.id, inserted, "Upserted content item");
        Ok(inserted)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_items c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ContentItem::try_from).transpose()
    }

    /// Replies of a thread, oldest first, ties by id.
    pub async fn replies_for_post(&self, post_id: &str) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM content_items c
            WHERE c.parent_id = $1 AND c.kind = 'reply'
            ORDER BY c.created_at ASC, c.id ASC
            "#
        ))
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        rows::items(rows)
    }

    /// Posts with at least one staff-authored reply, plus posts that still
    /// carry staff response facts (so stale facts can be pruned).
    pub async fn posts_with_staff_replies(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT parent_id FROM content_items
            WHERE kind = 'reply' AND is_staff AND parent_id IS NOT NULL
            UNION
            SELECT post_id FROM staff_responses
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn count_items(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM content_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    // ---- Classification selection ----

    /// Unanalyzed items, or items whose label lacks a required field.
    /// Newest first, at most `limit`.
    pub async fn items_needing_analysis(&self, limit: i64) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM content_items c
            LEFT JOIN labels l ON l.item_id = c.id
            WHERE NOT c.analyzed
               OR (l.item_id IS NOT NULL AND (
                       l.intent IS NULL OR l.target IS NULL OR l.sentiment IS NULL
                    OR l.category IS NULL OR l.summary IS NULL OR l.key_issues IS NULL))
            ORDER BY c.created_at DESC, c.id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows::items(rows)
    }

    /// Items whose stored label has the given hole.
    pub async fn items_with_label_gap(&self, gap: LabelGap, limit: i64) -> Result<Vec<ContentItem>> {
        let predicate = match gap {
            LabelGap::SentimentOrIntent => "l.sentiment IS NULL OR l.intent IS NULL",
            LabelGap::Intent => "l.intent IS NULL",
        };
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM content_items c
            JOIN labels l ON l.item_id = c.id
            WHERE {predicate}
            ORDER BY c.created_at DESC, c.id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows::items(rows)
    }

    // ---- Labels ----

    /// Write the label for an item, replacing any previous one in place.
    pub async fn upsert_label(&self, label: &Label) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO labels
                (item_id, intent, target, sentiment, category, summary, key_issues,
                 model_name, tokens_in, tokens_out, cost_usd, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (item_id) DO UPDATE SET
                intent     = EXCLUDED.intent,
                target     = EXCLUDED.target,
                sentiment  = EXCLUDED.sentiment,
                category   = EXCLUDED.category,
                summary    = EXCLUDED.summary,
                key_issues = EXCLUDED.key_issues,
                model_name = EXCLUDED.model_name,
                tokens_in  = EXCLUDED.tokens_in,
                tokens_out = EXCLUDED.tokens_out,
                cost_usd   = EXCLUDED.cost_usd,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&label.item_id)
        .bind(label.intent.as_str())
        .bind(label.target.as_str())
        .bind(label.sentiment.as_str())
        .bind(label.category.as_str())
        .bind(&label.summary)
        .bind(serde_json::json!(label.key_issues))
        .bind(&label.model_name)
        .bind(label.tokens_in)
        .bind(label.tokens_out)
        .bind(label.cost_usd)
        .bind(label.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_label(&self, item_id: &str) -> Result<Option<Label>> {
        let row = sqlx::query_as::<_, LabelRow>("SELECT * FROM labels WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Label::try_from).transpose()
    }

    pub async fn count_labels(&self, item_id: &str) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM labels WHERE item_id = $1")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Flag an item analyzed. Only takes effect when its label exists, so
    /// `analyzed` never gets ahead of the label. Returns rows affected.
    pub async fn mark_analyzed(&self, item_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE content_items SET analyzed = TRUE, analyzed_at = $2
            WHERE id = $1 AND EXISTS (SELECT 1 FROM labels WHERE item_id = $1)
            "#,
        )
        .bind(item_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn is_analyzed(&self, item_id: &str) -> Result<bool> {
        let flag = sqlx::query_scalar::<_, bool>("SELECT analyzed FROM content_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(flag.unwrap_or(false))
    }

    // ---- Staff responses ----

    /// Make a post's response facts equal to `responses` in one transaction:
    /// drop facts for replies not listed, clear the post's first-response
    /// flag, then upsert every row. Returns the number of facts removed.
    pub async fn replace_staff_responses(
        &self,
        post_id: &str,
        responses: &[StaffResponse],
    ) -> Result<u64> {
        let keep: Vec<&str> = responses.iter().map(|r| r.reply_id.as_str()).collect();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM staff_responses WHERE post_id = $1 AND NOT (reply_id = ANY($2))",
        )
        .bind(post_id)
        .bind(&keep)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // The partial unique index on first responses is checked per
        // statement, so the old flag has to go before the new one lands.
        sqlx::query(
            "UPDATE staff_responses SET is_first_response = FALSE \
             WHERE post_id = $1 AND is_first_response",
        )
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

        for response in responses {
            sqlx::query(
                r#"
                INSERT INTO staff_responses
                    (post_id, reply_id, staff_username, response_time_seconds,
                     post_created_at, reply_created_at, is_first_response)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (post_id, reply_id) DO UPDATE SET
                    staff_username        = EXCLUDED.staff_username,
                    response_time_seconds = EXCLUDED.response_time_seconds,
                    post_created_at       = EXCLUDED.post_created_at,
                    reply_created_at      = EXCLUDED.reply_created_at,
                    is_first_response     = EXCLUDED.is_first_response
                "#,
            )
            .bind(post_id)
            .bind(&response.reply_id)
            .bind(&response.staff_username)
            .bind(response.response_time_seconds)
            .bind(response.post_created_at)
            .bind(response.reply_created_at)
            .bind(response.is_first_response)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(post_id, stored = responses.len(), removed, "Staff responses replaced");
        Ok(removed)
    }

    pub async fn staff_responses_for_post(&self, post_id: &str) -> Result<Vec<StaffResponse>> {
        let rows = sqlx::query_as::<_, StaffResponseRow>(
            "SELECT * FROM staff_responses WHERE post_id = $1 ORDER BY reply_created_at, reply_id",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn all_staff_responses(&self) -> Result<Vec<StaffResponse>> {
        let rows = sqlx::query_as::<_, StaffResponseRow>(
            "SELECT * FROM staff_responses ORDER BY post_id, reply_created_at, reply_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ---- Staff stats ----

    /// Make `staff_stats` equal to `stats`: upsert every row and delete rows
    /// for usernames not present. Runs in one transaction. Returns the number
    /// of rows removed.
    pub async fn replace_staff_stats(&self, stats: &[StaffStats]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for s in stats {
            sqlx::query(
                r#"
                INSERT INTO staff_stats
                    (username, total_responses, avg_response_time_seconds,
                     fastest_response_seconds, slowest_response_seconds,
                     first_responses, last_updated)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (username) DO UPDATE SET
                    total_responses           = EXCLUDED.total_responses,
                    avg_response_time_seconds = EXCLUDED.avg_response_time_seconds,
                    fastest_response_seconds  = EXCLUDED.fastest_response_seconds,
                    slowest_response_seconds  = EXCLUDED.slowest_response_seconds,
                    first_responses           = EXCLUDED.first_responses,
                    last_updated              = EXCLUDED.last_updated
                "#,
            )
            .bind(&s.username)
            .bind(s.total_responses)
            .bind(s.avg_response_time_seconds)
            .bind(s.fastest_response_seconds)
            .bind(s.slowest_response_seconds)
            .bind(s.first_responses)
            .bind(s.last_updated)
            .execute(&mut *tx)
            .await?;
        }

        let keep: Vec<String> = stats.iter().map(|s| s.username.clone()).collect();
        let removed = sqlx::query("DELETE FROM staff_stats WHERE NOT (username = ANY($1))")
            .bind(&keep)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    pub async fn all_staff_stats(&self) -> Result<Vec<StaffStats>> {
        let rows = sqlx::query_as::<_, StaffStatsRow>("SELECT * FROM staff_stats ORDER BY username")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ---- Job runs ----

    pub async fn record_run(&self, run: &JobRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (id, job, started_at, finished_at, stats, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id)
        .bind(run.job.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.stats)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<(String, DateTime<Utc>, serde_json::Value)>> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>, serde_json::Value)>(
            "SELECT job, started_at, stats FROM job_runs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
