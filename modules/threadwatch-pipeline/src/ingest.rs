//! Ingestion coordinator.
//!
//! Walks the source one calendar-month window at a time, strictly in
//! sequence. Per window: fetch a page, filter each post, store admitted posts
//! and their top replies, sleep between items, and sleep again between
//! windows. Per-item failures are counted and skipped; a failed page fetch
//! aborts the run and propagates.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use threadwatch_common::{
    ContentItem, IngestConfig, ItemKind, SourcePost, SourceReply, TimeWindow, DELETED_AUTHOR,
};

use crate::filter::{self, Candidate, KeywordGate};
use crate::traits::{ItemStore, ThreadSource};

// ---------------------------------------------------------------------------
// Staff roster
// ---------------------------------------------------------------------------

/// The authoritative set of staff usernames. Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct StaffRoster {
    names: HashSet<String>,
}

impl StaffRoster {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, author: &str) -> bool {
        author != DELETED_AUTHOR && self.names.contains(&author.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Fixed pauses between items and between windows.
#[derive(Debug, Clone, Copy)]
pub struct IngestSchedule {
    pub per_item_delay: Duration,
    pub per_window_delay: Duration,
}

impl IngestSchedule {
    pub fn none() -> Self {
        Self {
            per_item_delay: Duration::ZERO,
            per_window_delay: Duration::ZERO,
        }
    }

    async fn after_item(&self) {
        pause(self.per_item_delay).await;
    }

    async fn between_windows(&self) {
        pause(self.per_window_delay).await;
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Options and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub schedule: IngestSchedule,
    pub gate: KeywordGate,
    pub roster: StaffRoster,
    pub max_pages_per_window: u32,
    pub max_replies_fetched: u32,
    pub top_replies_kept: usize,
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig, roster: StaffRoster) -> Self {
        Self {
            schedule: IngestSchedule {
                per_item_delay: Duration::from_millis(config.per_item_delay_ms),
                per_window_delay: Duration::from_millis(config.per_window_delay_ms),
            },
            gate: KeywordGate::new(&config.include_keywords, &config.exclude_keywords),
            roster,
            max_pages_per_window: config.max_pages_per_window,
            max_replies_fetched: config.max_replies_fetched,
            top_replies_kept: config.top_replies_kept,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub windows: u32,
    pub pages: u32,
    pub posts_stored: u32,
    pub replies_stored: u32,
    pub posts_skipped: u32,
    pub replies_skipped: u32,
    pub errors: u32,
    /// Windows cut short by `max_pages_per_window` before reaching their start.
    pub page_cap_hits: u32,
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Ingest Complete ===")?;
        writeln!(f, "Windows:          {}", self.windows)?;
        writeln!(f, "Pages fetched:    {}", self.pages)?;
        writeln!(f, "Posts stored:     {}", self.posts_stored)?;
        writeln!(f, "Posts skipped:    {}", self.posts_skipped)?;
        writeln!(f, "Replies stored:   {}", self.replies_stored)?;
        writeln!(f, "Replies skipped:  {}", self.replies_skipped)?;
        writeln!(f, "Page cap hits:    {}", self.page_cap_hits)?;
        write!(f, "Errors:           {}", self.errors)
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

pub struct Ingestor<'a> {
    source: &'a dyn ThreadSource,
    store: &'a dyn ItemStore,
    options: IngestOptions,
}

impl<'a> Ingestor<'a> {
    pub fn new(source: &'a dyn ThreadSource, store: &'a dyn ItemStore, options: IngestOptions) -> Self {
        Self {
            source,
            store,
            options,
        }
    }

    /// Ingest `[from, to)` month by month, newest month first. Each window
    /// picks up the listing where the newer one stopped, so a page is read
    /// at most twice per range. Stats accumulate into `stats` so partial
    /// progress is visible even when a window fails.
    pub async fn ingest_range(&self, from: NaiveDate, to: NaiveDate, stats: &mut IngestStats) -> Result<()> {
        let windows = TimeWindow::months(from, to);
        info!(%from, %to, windows = windows.len(), "Starting ingestion");

        let mut resume: Option<String> = None;
        for (i, window) in windows.iter().rev().enumerate() {
            resume = self.walk_window(*window, resume.take(), stats).await?;
            if i + 1 < windows.len() {
                self.options.schedule.between_windows().await;
            }
        }
        Ok(())
    }

    /// Ingest a single window, starting from the top of the listing.
    pub async fn ingest_window(&self, window: TimeWindow, stats: &mut IngestStats) -> Result<()> {
        self.walk_window(window, None, stats).await.map(|_| ())
    }

    /// Page through `window` from `start`. Returns the cursor an older window
    /// should continue from: the last page read when the listing crossed the
    /// window start, or the unread cursor when the page cap was hit.
    async fn walk_window(
        &self,
        window: TimeWindow,
        start: Option<String>,
        stats: &mut IngestStats,
    ) -> Result<Option<String>> {
        info!(%window, "Ingesting window");
        stats.windows += 1;

        let mut cursor = start;
        for page_no in 0..self.options.max_pages_per_window {
            let page = self
                .source
                .fetch_page(window, cursor.as_deref())
                .await
                .with_context(|| format!("fetching page {} of window {window}", page_no + 1))?;
            stats.pages += 1;

            let ids: Vec<String> = page.posts.iter().map(|p| p.id.clone()).collect();
            let existing = self
                .store
                .existing_ids(&ids)
                .await
                .context("looking up existing post ids")?;

            for post in &page.posts {
                let decision = filter::should_admit(
                    &Candidate::from(post),
                    window,
                    &existing,
                    &self.options.gate,
                );
                if !decision.admit {
                    debug!(post_id = %post.id, reason = %decision.reason, "Post skipped");
                    stats.posts_skipped += 1;
                    continue;
                }

                match self.ingest_post(post, stats).await {
                    Ok(()) => info!(post_id = %post.id, "Post ingested"),
                    Err(e) => {
                        warn!(post_id = %post.id, error = %e, "Post ingestion failed");
                        stats.errors += 1;
                    }
                }
                self.options.schedule.after_item().await;
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(cursor),
            }
        }

        warn!(
            %window,
            max_pages = self.options.max_pages_per_window,
            "Page cap reached before window start"
        );
        stats.page_cap_hits += 1;
        Ok(cursor)
    }

    async fn ingest_post(&self, post: &SourcePost, stats: &mut IngestStats) -> Result<()> {
        let item = normalize_post(post, &self.options.roster);
        if self.store.upsert_item(&item).await? {
            stats.posts_stored += 1;
        }

        let fetched = self
            .source
            .fetch_replies(&post.id, self.options.max_replies_fetched)
            .await?;
        let replies = top_replies(fetched, self.options.top_replies_kept);

        let ids: Vec<String> = replies.iter().map(|r| r.id.clone()).collect();
        let existing = self.store.existing_ids(&ids).await?;

        for reply in &replies {
            let decision = filter::should_admit_reply(&Candidate::from(reply), &existing);
            if !decision.admit {
                stats.replies_skipped += 1;
                continue;
            }
            let item = normalize_reply(reply, &post.id, &self.options.roster);
            if self.store.upsert_item(&item).await? {
                stats.replies_stored += 1;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Drop removed/deleted replies, then keep the `n` highest-scoring.
/// Equal scores keep the earlier reply first.
pub fn top_replies(mut replies: Vec<SourceReply>, n: usize) -> Vec<SourceReply> {
    replies.retain(|r| !is_gone(r.body.as_deref()));
    replies.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    replies.truncate(n);
    replies
}

fn is_gone(body: Option<&str>) -> bool {
    match body.map(str::trim) {
        None | Some("") | Some("[deleted]") | Some("[removed]") => true,
        Some(_) => false,
    }
}

fn clean_body(body: Option<&str>) -> String {
    if is_gone(body) {
        String::new()
    } else {
        body.unwrap_or_default().to_string()
    }
}

fn clean_author(author: Option<&str>) -> String {
    match author.map(str::trim) {
        None | Some("") => DELETED_AUTHOR.to_string(),
        Some(name) => name.to_string(),
    }
}

/// Approximate up/down votes from the net score and the upvote ratio.
///
/// With `u` up and `d` down: `score = u - d` and `ratio = u / (u + d)`, so
/// `u = score * ratio / (2 * ratio - 1)`. At ratio 0.5 (or no usable ratio)
/// the split is unknowable and the score is taken as upvotes.
pub fn vote_split(score: i64, ratio: Option<f64>) -> (i64, i64) {
    let usable = ratio.filter(|r| r.is_finite() && (0.0..=1.0).contains(r) && (r - 0.5).abs() > 1e-9);
    match usable {
        Some(r) => {
            let up = (score as f64 * r / (2.0 * r - 1.0)).round() as i64;
            let down = up - score;
            (up.max(0), down.max(0))
        }
        None => (score.max(0), 0),
    }
}

fn staff_flag(author: &str, distinguished: Option<&str>, id: &str, roster: &StaffRoster) -> bool {
    let is_staff = roster.contains(author);
    if distinguished.is_some() && !is_staff {
        debug!(id, author, "Source marks author as distinguished but roster does not list them");
    }
    is_staff
}

pub fn normalize_post(post: &SourcePost, roster: &StaffRoster) -> ContentItem {
    let author = clean_author(post.author.as_deref());
    let (upvotes, downvotes) = vote_split(post.score, post.upvote_ratio);
    ContentItem {
        id: post.id.clone(),
        kind: ItemKind::Post,
        parent_id: None,
        created_at: post.created_at,
        title: Some(post.title.clone()),
        body: clean_body(post.body.as_deref()),
        is_staff: staff_flag(&author, post.distinguished.as_deref(), &post.id, roster),
        author,
        flair: post.flair.clone(),
        permalink: post.permalink.clone(),
        score: post.score,
        upvote_ratio: post.upvote_ratio,
        upvotes,
        downvotes,
        num_replies: post.num_replies.max(0),
        analyzed: false,
        analyzed_at: None,
    }
}

/// `post_id` is the thread the reply was fetched under; it wins over
/// whatever the payload claims.
pub fn normalize_reply(reply: &SourceReply, post_id: &str, roster: &StaffRoster) -> ContentItem {
    let author = clean_author(reply.author.as_deref());
    ContentItem {
        id: reply.id.clone(),
        kind: ItemKind::Reply,
        parent_id: Some(post_id.to_string()),
        created_at: reply.created_at,
        title: None,
        body: clean_body(reply.body.as_deref()),
        is_staff: staff_flag(&author, reply.distinguished.as_deref(), &reply.id, roster),
        author,
        flair: None,
        permalink: None,
        score: reply.score,
        upvote_ratio: None,
        upvotes: reply.score.max(0),
        downvotes: 0,
        num_replies: 0,
        analyzed: false,
        analyzed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(id: &str, score: i64, body: Option<&str>) -> SourceReply {
        SourceReply {
            id: id.to_string(),
            post_id: "t3_a".to_string(),
            created_at: 100,
            author: Some("user".to_string()),
            body: body.map(str::to_string),
            score,
            distinguished: None,
        }
    }

    #[test]
    fn vote_split_recovers_counts() {
        // 75 up, 25 down: score 50, ratio 0.75
        assert_eq!(vote_split(50, Some(0.75)), (75, 25));
        assert_eq!(vote_split(10, Some(1.0)), (10, 0));
    }

    #[test]
    fn vote_split_degenerate_ratios() {
        assert_eq!(vote_split(7, Some(0.5)), (7, 0));
        assert_eq!(vote_split(7, None), (7, 0));
        assert_eq!(vote_split(-3, None), (0, 0));
        assert_eq!(vote_split(7, Some(f64::NAN)), (7, 0));
        assert_eq!(vote_split(7, Some(1.5)), (7, 0));
    }

    #[test]
    fn vote_split_never_negative() {
        let (up, down) = vote_split(5, Some(0.1));
        assert!(up >= 0 && down >= 0);
    }

    #[test]
    fn top_replies_drops_removed_and_keeps_highest() {
        let replies = vec![
            reply("t1_a", 1, Some("low")),
            reply("t1_b", 50, Some("[removed]")),
            reply("t1_c", 9, Some("high")),
            reply("t1_d", 5, None),
            reply("t1_e", 4, Some("mid")),
        ];
        let kept = top_replies(replies, 2);
        let ids: Vec<_> = kept.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t1_c", "t1_e"]);
    }

    #[test]
    fn missing_author_becomes_sentinel() {
        let post = SourcePost {
            id: "t3_a".to_string(),
            created_at: 0,
            title: "t".to_string(),
            body: Some("[deleted]".to_string()),
            author: None,
            score: 3,
            upvote_ratio: None,
            flair: None,
            num_replies: -1,
            permalink: None,
            distinguished: None,
        };
        let item = normalize_post(&post, &StaffRoster::default());
        assert_eq!(item.author, DELETED_AUTHOR);
        assert_eq!(item.body, "");
        assert_eq!(item.num_replies, 0);
        assert!(!item.is_staff);
    }

    #[test]
    fn roster_is_authoritative_over_source_marker() {
        let roster = StaffRoster::new(["Mod_Alice"]);
        let mut r = reply("t1_a", 1, Some("hi"));
        r.author = Some("mod_alice".to_string());
        assert!(normalize_reply(&r, "t3_a", &roster).is_staff);

        let mut r = reply("t1_b", 1, Some("hi"));
        r.author = Some("random_mod".to_string());
        r.distinguished = Some("moderator".to_string());
        assert!(!normalize_reply(&r, "t3_a", &roster).is_staff);
    }

    #[test]
    fn deleted_author_is_never_staff() {
        let roster = StaffRoster::new([DELETED_AUTHOR]);
        assert!(!roster.contains(DELETED_AUTHOR));
    }
}
