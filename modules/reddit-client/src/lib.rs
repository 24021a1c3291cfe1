pub mod error;
pub mod types;

pub use error::{RedditError, Result};
pub use types::{
    flatten_comments, CommentThing, LinkThing, Listing, ListingData, RedditComment, RedditLink,
};

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use types::AccessTokenResponse;

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_URL: &str = "https://oauth.reddit.com";

/// Reddit caps listing pages at 100 children.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Refresh the token this long before Reddit says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct RedditClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: String,
    api_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl RedditClient {
    /// Build a client for app-only (client credentials) access. Every request
    /// carries `user_agent` and fails after `timeout`.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: AUTH_URL.to_string(),
            api_url: API_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point the client at another host (used against local fakes).
    pub fn with_base_urls(mut self, auth_url: &str, api_url: &str) -> Self {
        self.auth_url = auth_url.to_string();
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    /// Return a cached bearer token, fetching a new one when missing or stale.
    async fn access_token(&self) -> Result<String> {
        {
            let cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(ref t) = *cached {
                if Instant::now() < t.expires_at {
                    return Ok(t.token.clone());
                }
            }
        }

        tracing::debug!("Requesting Reddit access token");

        let resp = self
            .client
            .post(&self.auth_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Auth(format!("status {}: {}", status.as_u16(), body)));
        }

        let body = resp.text().await?;
        let parsed: AccessTokenResponse = serde_json::from_str(&body)?;
        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);

        let mut cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *cached = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(parsed.access_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_url, path);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        log_rate_limit(path, resp.headers());

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RedditError::RateLimited {
                retry_after_secs: retry_after(resp.headers()),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; drop it so the next call re-authenticates.
            *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// One page of a subreddit's newest submissions, newest first.
    /// Pass the previous page's `after` cursor to continue.
    pub async fn new_posts(
        &self,
        subreddit: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<Listing<LinkThing>> {
        tracing::info!(subreddit, limit, after, "Fetching subreddit page");

        let mut query = vec![
            ("limit", limit.min(MAX_PAGE_SIZE).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(cursor) = after {
            query.push(("after", cursor.to_string()));
        }

        self.get_json(&format!("/r/{}/new", subreddit), &query).await
    }

    /// All comments of a submission, flattened depth-first. `limit` bounds how
    /// many comments Reddit expands; "load more" stubs are dropped.
    pub async fn comments(&self, post_id: &str, limit: u32) -> Result<Vec<RedditComment>> {
        let id = post_id.trim_start_matches("t3_");
        tracing::debug!(post_id = id, limit, "Fetching comment tree");

        let query = vec![
            ("limit", limit.to_string()),
            ("sort", "top".to_string()),
            ("raw_json", "1".to_string()),
        ];
        let (_post, comments): (Listing<LinkThing>, Listing<CommentThing>) =
            self.get_json(&format!("/comments/{}", id), &query).await?;

        let flat = flatten_comments(comments.data.children);
        tracing::debug!(post_id = id, count = flat.len(), "Fetched comments");
        Ok(flat)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .or_else(|| headers.get("x-ratelimit-reset"))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|secs| secs.ceil() as u64)
}

fn log_rate_limit(path: &str, headers: &HeaderMap) {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok());
    if let Some(remaining) = remaining {
        tracing::debug!(path, remaining, "Reddit rate limit");
    }
}
