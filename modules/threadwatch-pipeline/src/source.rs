// Reddit as a ThreadSource: turns wire listings into SourcePost/SourceReply.
// Nothing past this file sees a reddit-client type.

use anyhow::{Context, Result};
use async_trait::async_trait;

use reddit_client::{RedditClient, RedditComment, RedditLink};
use threadwatch_common::{PostPage, SourcePost, SourceReply, TimeWindow};

use crate::traits::ThreadSource;

pub struct RedditSource {
    client: RedditClient,
    subreddit: String,
    page_size: u32,
}

impl RedditSource {
    pub fn new(client: RedditClient, subreddit: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            subreddit: subreddit.into(),
            page_size,
        }
    }
}

#[async_trait]
impl ThreadSource for RedditSource {
    /// Walks `/new`, newest first. Posts newer than the window are dropped;
    /// the first post older than the window ends pagination.
    async fn fetch_page(&self, window: TimeWindow, cursor: Option<&str>) -> Result<PostPage> {
        let listing = self
            .client
            .new_posts(&self.subreddit, self.page_size, cursor)
            .await
            .with_context(|| format!("listing r/{}", self.subreddit))?;

        let mut reached_start = false;
        let mut posts = Vec::new();
        for thing in listing.data.children {
            let post = post_from_link(thing.data);
            if post.created_at < window.start {
                reached_start = true;
                continue;
            }
            if window.contains(post.created_at) {
                posts.push(post);
            }
        }

        let next = if reached_start { None } else { listing.data.after };
        Ok(PostPage { posts, next })
    }

    async fn fetch_replies(&self, post_id: &str, limit: u32) -> Result<Vec<SourceReply>> {
        let comments = self
            .client
            .comments(post_id, limit)
            .await
            .with_context(|| format!("comments of {post_id}"))?;
        Ok(comments
            .into_iter()
            .take(limit as usize)
            .map(reply_from_comment)
            .collect())
    }
}

/// Map a submission onto the source boundary type. Ids become fullnames.
pub fn post_from_link(link: RedditLink) -> SourcePost {
    SourcePost {
        id: fullname("t3_", &link.id),
        created_at: link.created_utc as i64,
        title: link.title,
        body: link.selftext,
        author: link.author,
        score: link.score,
        upvote_ratio: link.upvote_ratio,
        flair: link.link_flair_text,
        num_replies: link.num_comments.unwrap_or(0),
        permalink: link.permalink,
        distinguished: link.distinguished,
    }
}

pub fn reply_from_comment(comment: RedditComment) -> SourceReply {
    SourceReply {
        id: fullname("t1_", &comment.id),
        post_id: comment.link_id,
        created_at: comment.created_utc as i64,
        author: comment.author,
        body: comment.body,
        score: comment.score,
        distinguished: comment.distinguished,
    }
}

fn fullname(prefix: &str, id: &str) -> String {
    if id.starts_with(prefix) {
        id.to_string()
    } else {
        format!("{prefix}{id}")
    }
}
