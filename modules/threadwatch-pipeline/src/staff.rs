//! Staff-response detection.
//!
//! For each post, walk its replies oldest first, turn every staff-authored
//! reply into a response fact, and flag the earliest one. Aggregates per
//! staff member are rebuilt from all facts on every run.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use threadwatch_common::{ContentItem, StaffResponse, StaffStats};

use crate::traits::ItemStore;

#[derive(Debug, Default, Clone, Serialize)]
pub struct StaffRunStats {
    pub posts_scanned: u32,
    pub responses_found: u32,
    pub post_errors: u32,
    pub staff_count: u32,
    pub stale_stats_removed: u64,
}

impl fmt::Display for StaffRunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Staff responses: {} posts scanned, {} responses found, {} post errors, \
             {} staff members, {} stale stats removed",
            self.posts_scanned,
            self.responses_found,
            self.post_errors,
            self.staff_count,
            self.stale_stats_removed,
        )
    }
}

/// Response facts for one post. Staff replies are taken in `(created_at, id)`
/// order; a reply older than its post is logged and left out; the earliest
/// remaining one is the first response.
pub fn responses_for(post: &ContentItem, replies: &[ContentItem]) -> Vec<StaffResponse> {
    let mut staff: Vec<&ContentItem> = replies.iter().filter(|r| r.is_staff).collect();
    staff.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut out: Vec<StaffResponse> = Vec::with_capacity(staff.len());
    for reply in staff {
        let response_time = reply.created_at - post.created_at;
        if response_time < 0 {
            warn!(
                post_id = %post.id,
                reply_id = %reply.id,
                response_time,
                "Staff reply predates its post, skipping"
            );
            continue;
        }
        out.push(StaffResponse {
            post_id: post.id.clone(),
            reply_id: reply.id.clone(),
            staff_username: reply.author.clone(),
            response_time_seconds: response_time,
            post_created_at: post.created_at,
            reply_created_at: reply.created_at,
            is_first_response: out.is_empty(),
        });
    }
    out
}

/// Full aggregation of response facts by staff member, ordered by username.
pub fn aggregate(responses: &[StaffResponse], now: DateTime<Utc>) -> Vec<StaffStats> {
    let mut by_user: BTreeMap<&str, Vec<&StaffResponse>> = BTreeMap::new();
    for r in responses {
        by_user.entry(r.staff_username.as_str()).or_default().push(r);
    }

    by_user
        .into_iter()
        .map(|(username, rows)| {
            let times: Vec<i64> = rows.iter().map(|r| r.response_time_seconds).collect();
            let total = times.len() as i64;
            StaffStats {
                username: username.to_string(),
                total_responses: total,
                avg_response_time_seconds: times.iter().sum::<i64>() as f64 / total as f64,
                fastest_response_seconds: times.iter().copied().min().unwrap_or(0),
                slowest_response_seconds: times.iter().copied().max().unwrap_or(0),
                first_responses: rows.iter().filter(|r| r.is_first_response).count() as i64,
                last_updated: now,
            }
        })
        .collect()
}

pub struct StaffDetector<'a> {
    store: &'a dyn ItemStore,
}

impl<'a> StaffDetector<'a> {
    pub fn new(store: &'a dyn ItemStore) -> Self {
        Self { store }
    }

    /// Recompute a post's response facts and drop any that no longer apply.
    /// Returns the number of facts stored.
    pub async fn detect_for_post(&self, post_id: &str) -> Result<usize> {
        let Some(post) = self.store.get_item(post_id).await? else {
            let pruned = self.store.replace_staff_responses(post_id, &[]).await?;
            warn!(post_id, pruned, "Post not found, cleared its response facts");
            return Ok(0);
        };

        let replies = self
            .store
            .replies_for_post(post_id)
            .await
            .with_context(|| format!("loading replies of {post_id}"))?;
        let responses = responses_for(&post, &replies);

        let pruned = self
            .store
            .replace_staff_responses(post_id, &responses)
            .await
            .with_context(|| format!("writing response facts of {post_id}"))?;
        if pruned > 0 {
            info!(post_id, pruned, "Removed stale staff responses");
        }

        Ok(responses.len())
    }

    /// Run detection over every post with a staff reply, then rebuild stats.
    pub async fn detect_all(&self, stats: &mut StaffRunStats) -> Result<()> {
        let posts = self
            .store
            .posts_with_staff_replies()
            .await
            .context("listing posts with staff replies")?;
        info!(posts = posts.len(), "Detecting staff responses");

        for post_id in &posts {
            stats.posts_scanned += 1;
            match self.detect_for_post(post_id).await {
                Ok(found) => stats.responses_found += found as u32,
                Err(e) => {
                    warn!(post_id = %post_id, error = %format!("{e:#}"), "Staff detection failed");
                    stats.post_errors += 1;
                }
            }
        }

        let (staff_count, removed) = self.recompute_stats().await?;
        stats.staff_count = staff_count as u32;
        stats.stale_stats_removed = removed;
        Ok(())
    }

    /// Replace every StaffStats row from the current response facts.
    /// Returns the number of staff members and the number of rows removed.
    pub async fn recompute_stats(&self) -> Result<(usize, u64)> {
        let responses = self.store.all_staff_responses().await?;
        let stats = aggregate(&responses, Utc::now());
        let removed = self.store.replace_staff_stats(&stats).await?;
        info!(staff = stats.len(), removed, "Staff stats recomputed");
        Ok((stats.len(), removed))
    }
}
