use serde::Deserialize;

// --- OAuth ---

/// Response from the app-only `client_credentials` grant.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

// --- Listings ---

/// A paginated Reddit listing. `after` is the cursor for the next page.
#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData<T> {
    pub after: Option<String>,
    #[serde(default = "Vec::new")]
    pub children: Vec<T>,
}

/// A `t3` thing wrapping a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkThing {
    pub kind: String,
    pub data: RedditLink,
}

/// A submission (thread-starting post) as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditLink {
    /// Base-36 id without the `t3_` prefix.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Epoch seconds; Reddit serializes it as a float.
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(default)]
    pub permalink: Option<String>,
    /// "moderator" / "admin" when the author chose to distinguish the post.
    #[serde(default)]
    pub distinguished: Option<String>,
    #[serde(default)]
    pub removed_by_category: Option<String>,
}

/// Children of a comment listing: real comments or "load more" stubs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum CommentThing {
    #[serde(rename = "t1")]
    Comment(RedditComment),
    #[serde(rename = "more")]
    More(MoreChildren),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditComment {
    /// Base-36 id without the `t1_` prefix.
    pub id: String,
    /// Fullname of the parent: `t3_...` for top-level, `t1_...` for nested.
    pub parent_id: String,
    /// Fullname of the submission this comment belongs to.
    pub link_id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub distinguished: Option<String>,
    #[serde(default)]
    pub replies: Replies,
}

/// Reddit sends `""` when a comment has no replies, a listing otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Replies {
    Listing(Box<Listing<CommentThing>>),
    Empty(String),
}

impl Default for Replies {
    fn default() -> Self {
        Replies::Empty(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoreChildren {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Flatten a comment tree depth-first, dropping "load more" stubs.
/// Nested `replies` are detached from each returned comment.
pub fn flatten_comments(things: Vec<CommentThing>) -> Vec<RedditComment> {
    let mut out = Vec::new();
    let mut stack: Vec<CommentThing> = things.into_iter().rev().collect();
    while let Some(thing) = stack.pop() {
        let CommentThing::Comment(mut comment) = thing else {
            continue;
        };
        let replies = std::mem::take(&mut comment.replies);
        if let Replies::Listing(listing) = replies {
            stack.extend(listing.data.children.into_iter().rev());
        }
        out.push(comment);
    }
    out
}
