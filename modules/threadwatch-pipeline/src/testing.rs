// Test doubles for the batch jobs.
//
// Three doubles matching the three trait boundaries:
// - MockSource (ThreadSource): scripted pages and per-post replies
// - MemoryStore (ItemStore): stateful in-memory tables
// - ScriptedClassifier (Classifier): queued replies and failures
//
// Plus builders for source posts/replies and canned model replies.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ai_client::{Completion, Usage};
use threadwatch_common::{
    ContentItem, JobRun, Label, LabelGap, PostPage, SourcePost, SourceReply, StaffResponse,
    StaffStats, TimeWindow,
};

use crate::traits::{Classifier, ItemStore, ThreadSource};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn source_post(id: &str, created_at: i64) -> SourcePost {
    SourcePost {
        id: id.to_string(),
        created_at,
        title: format!("Post {id}"),
        body: Some("Something about the platform".to_string()),
        author: Some("poster".to_string()),
        score: 10,
        upvote_ratio: Some(0.9),
        flair: None,
        num_replies: 0,
        permalink: None,
        distinguished: None,
    }
}

pub fn source_reply(id: &str, post_id: &str, created_at: i64, author: &str, score: i64) -> SourceReply {
    SourceReply {
        id: id.to_string(),
        post_id: post_id.to_string(),
        created_at,
        author: Some(author.to_string()),
        body: Some(format!("reply {id}")),
        score,
        distinguished: None,
    }
}

/// A well-formed model reply with the given category.
pub fn reply_json(category: &str) -> String {
    serde_json::json!({
        "intent": "help",
        "target": "platform",
        "sentiment": "neg",
        "category": category,
        "summary": "User reports a problem.",
        "key_issues": ["problem"]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Serves the same scripted pages for every window; the cursor is the page
/// index. Unregistered posts have no replies.
#[derive(Default)]
pub struct MockSource {
    pages: Vec<Vec<SourcePost>>,
    replies: HashMap<String, Vec<SourceReply>>,
    failing_replies: HashSet<String>,
    fail_pages: bool,
    page_calls: AtomicU32,
    reply_calls: AtomicU32,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, posts: Vec<SourcePost>) -> Self {
        self.pages.push(posts);
        self
    }

    pub fn replies(mut self, post_id: &str, replies: Vec<SourceReply>) -> Self {
        self.replies.insert(post_id.to_string(), replies);
        self
    }

    /// Reply fetches for this post fail.
    pub fn failing_replies(mut self, post_id: &str) -> Self {
        self.failing_replies.insert(post_id.to_string());
        self
    }

    /// Every page fetch fails.
    pub fn failing_pages(mut self) -> Self {
        self.fail_pages = true;
        self
    }

    pub fn page_calls(&self) -> u32 {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn reply_calls(&self) -> u32 {
        self.reply_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThreadSource for MockSource {
    async fn fetch_page(&self, _window: TimeWindow, cursor: Option<&str>) -> Result<PostPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pages {
            bail!("MockSource: page fetch failed");
        }
        let index: usize = match cursor {
            Some(c) => c.parse()?,
            None => 0,
        };
        let posts = self.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(PostPage { posts, next })
    }

    async fn fetch_replies(&self, post_id: &str, limit: u32) -> Result<Vec<SourceReply>> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_replies.contains(post_id) {
            bail!("MockSource: replies for {post_id} failed");
        }
        let mut replies = self.replies.get(post_id).cloned().unwrap_or_default();
        replies.truncate(limit as usize);
        Ok(replies)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    items: BTreeMap<String, ContentItem>,
    labels: HashMap<String, Label>,
    /// Simulated NULL columns on stored labels: (sentiment, intent).
    label_holes: HashMap<String, (bool, bool)>,
    responses: BTreeMap<(String, String), StaffResponse>,
    stats: BTreeMap<String, StaffStats>,
    runs: Vec<JobRun>,
    dropped_analyzed_writes: u32,
    failing_label_writes: HashSet<String>,
    failing_response_writes: HashSet<String>,
}

/// In-memory ItemStore with the same ordering and upsert rules as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, item: ContentItem) {
        self.lock().items.insert(item.id.clone(), item);
    }

    pub fn item(&self, id: &str) -> Option<ContentItem> {
        self.lock().items.get(id).cloned()
    }

    pub fn items(&self) -> Vec<ContentItem> {
        self.lock().items.values().cloned().collect()
    }

    pub fn label(&self, item_id: &str) -> Option<Label> {
        self.lock().labels.get(item_id).cloned()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.lock().labels.values().cloned().collect()
    }

    pub fn responses(&self) -> Vec<StaffResponse> {
        self.lock().responses.values().cloned().collect()
    }

    pub fn stats(&self) -> Vec<StaffStats> {
        self.lock().stats.values().cloned().collect()
    }

    pub fn runs(&self) -> Vec<JobRun> {
        self.lock().runs.clone()
    }

    /// Pretend an older schema left these label columns NULL.
    pub fn punch_label_holes(&self, item_id: &str, sentiment: bool, intent: bool) {
        self.lock().label_holes.insert(item_id.to_string(), (sentiment, intent));
    }

    /// The next `n` analyzed-flag writes report success but change nothing.
    pub fn drop_analyzed_writes(&self, n: u32) {
        self.lock().dropped_analyzed_writes = n;
    }

    /// Label writes for this item fail.
    pub fn fail_label_writes(&self, item_id: &str) {
        self.lock().failing_label_writes.insert(item_id.to_string());
    }

    /// Response-fact writes for this post fail without changing anything.
    pub fn fail_response_writes(&self, post_id: &str) {
        self.lock().failing_response_writes.insert(post_id.to_string());
    }

    /// Let response-fact writes for this post through again.
    pub fn heal_response_writes(&self, post_id: &str) {
        self.lock().failing_response_writes.remove(post_id);
    }
}

fn has_hole(tables: &Tables, item_id: &str, gap: Option<LabelGap>) -> bool {
    let Some(&(sentiment, intent)) = tables.label_holes.get(item_id) else {
        return false;
    };
    match gap {
        None | Some(LabelGap::SentimentOrIntent) => sentiment || intent,
        Some(LabelGap::Intent) => intent,
    }
}

fn newest_first(mut items: Vec<ContentItem>, limit: usize) -> Vec<ContentItem> {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    items.truncate(limit);
    items
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let tables = self.lock();
        Ok(ids.iter().filter(|id| tables.items.contains_key(*id)).cloned().collect())
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<bool> {
        let mut tables = self.lock();
        match tables.items.get_mut(&item.id) {
            Some(existing) => {
                existing.score = item.score;
                existing.upvote_ratio = item.upvote_ratio;
                existing.upvotes = item.upvotes;
                existing.downvotes = item.downvotes;
                existing.num_replies = item.num_replies;
                existing.is_staff = item.is_staff;
                Ok(false)
            }
            None => {
                tables.items.insert(item.id.clone(), item.clone());
                Ok(true)
            }
        }
    }

    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(self.item(id))
    }

    async fn replies_for_post(&self, post_id: &str) -> Result<Vec<ContentItem>> {
        let tables = self.lock();
        let mut replies: Vec<ContentItem> = tables
            .items
            .values()
            .filter(|i| !i.is_post() && i.parent_id.as_deref() == Some(post_id))
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(replies)
    }

    async fn posts_with_staff_replies(&self) -> Result<Vec<String>> {
        let tables = self.lock();
        let mut posts: Vec<String> = tables
            .items
            .values()
            .filter(|i| !i.is_post() && i.is_staff)
            .filter_map(|i| i.parent_id.clone())
            .chain(tables.responses.keys().map(|(post, _)| post.clone()))
            .collect();
        posts.sort();
        posts.dedup();
        Ok(posts)
    }

    async fn items_needing_analysis(&self, limit: usize) -> Result<Vec<ContentItem>> {
        let tables = self.lock();
        let items = tables
            .items
            .values()
            .filter(|i| !i.analyzed || has_hole(&tables, &i.id, None))
            .cloned()
            .collect();
        Ok(newest_first(items, limit))
    }

    async fn items_with_label_gap(&self, gap: LabelGap, limit: usize) -> Result<Vec<ContentItem>> {
        let tables = self.lock();
        let items = tables
            .items
            .values()
            .filter(|i| tables.labels.contains_key(&i.id) && has_hole(&tables, &i.id, Some(gap)))
            .cloned()
            .collect();
        Ok(newest_first(items, limit))
    }

    async fn upsert_label(&self, label: &Label) -> Result<()> {
        let mut tables = self.lock();
        if tables.failing_label_writes.contains(&label.item_id) {
            bail!("MemoryStore: label write for {} failed", label.item_id);
        }
        tables.labels.insert(label.item_id.clone(), label.clone());
        tables.label_holes.remove(&label.item_id);
        Ok(())
    }

    async fn mark_analyzed(&self, item_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.lock();
        if !tables.labels.contains_key(item_id) {
            return Ok(false);
        }
        if tables.dropped_analyzed_writes > 0 {
            tables.dropped_analyzed_writes -= 1;
            return Ok(true);
        }
        let item = tables
            .items
            .get_mut(item_id)
            .ok_or_else(|| anyhow!("MemoryStore: no item {item_id}"))?;
        item.analyzed = true;
        item.analyzed_at = Some(at);
        Ok(true)
    }

    async fn is_analyzed(&self, item_id: &str) -> Result<bool> {
        Ok(self.item(item_id).map(|i| i.analyzed).unwrap_or(false))
    }

    async fn replace_staff_responses(&self, post_id: &str, responses: &[StaffResponse]) -> Result<u64> {
        let mut tables = self.lock();
        if tables.failing_response_writes.contains(post_id) {
            bail!("MemoryStore: response write for {post_id} failed");
        }
        let keep: HashSet<&str> = responses.iter().map(|r| r.reply_id.as_str()).collect();
        let removed = tables
            .responses
            .keys()
            .filter(|(post, reply)| post == post_id && !keep.contains(reply.as_str()))
            .count();
        tables.responses.retain(|(post, _), _| post != post_id);
        for response in responses {
            tables.responses.insert(
                (post_id.to_string(), response.reply_id.clone()),
                response.clone(),
            );
        }
        Ok(removed as u64)
    }

    async fn all_staff_responses(&self) -> Result<Vec<StaffResponse>> {
        Ok(self.responses())
    }

    async fn replace_staff_stats(&self, stats: &[StaffStats]) -> Result<u64> {
        let mut tables = self.lock();
        let before: HashSet<String> = tables.stats.keys().cloned().collect();
        tables.stats = stats.iter().map(|s| (s.username.clone(), s.clone())).collect();
        Ok(before.iter().filter(|u| !tables.stats.contains_key(*u)).count() as u64)
    }

    async fn record_run(&self, run: &JobRun) -> Result<()> {
        self.lock().runs.push(run.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedClassifier
// ---------------------------------------------------------------------------

/// Returns queued replies in order; once the queue is empty every call gets
/// the fallback (or fails when there is none). Records each user prompt.
pub struct ScriptedClassifier {
    model: String,
    queue: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every call returns `text` once the queue is drained.
    pub fn always(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn then_fail(self, error: impl Into<String>) -> Self {
        self.push(Err(error.into()));
        self
    }

    fn push(&self, entry: std::result::Result<String, String>) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(entry);
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<Completion> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(user.to_string());

        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(error)) => bail!("ScriptedClassifier: {error}"),
            None => match &self.fallback {
                Some(text) => text.clone(),
                None => bail!("ScriptedClassifier: no reply scripted"),
            },
        };

        Ok(Completion {
            model: self.model.clone(),
            text,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
        })
    }
}
