use std::fmt;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author recorded when the source no longer reports one.
pub const DELETED_AUTHOR: &str = "[deleted]";

// --- Closed label vocabularies ---

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }

            /// Exact match against the stored/wire spelling.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s).ok_or_else(|| format!("invalid {} value: {s}", stringify!($name)))
            }
        }
    };
}

closed_enum! {
    /// Whether the author is asking for help or just commenting.
    Intent {
        Help => "help",
        Comment => "comment",
    }
}

closed_enum! {
    /// Whether the content is about the platform itself.
    Target {
        Platform => "platform",
        Other => "other",
    }
}

closed_enum! {
    Sentiment {
        Pos => "pos",
        Neg => "neg",
        Neu => "neu",
    }
}

closed_enum! {
    /// Fixed topic taxonomy. `Other` is the catch-all and the sanitize default.
    Category {
        AccountAccess => "account_access",
        Billing => "billing",
        Refunds => "refunds",
        Payments => "payments",
        Subscription => "subscription",
        Pricing => "pricing",
        BugReport => "bug_report",
        Performance => "performance",
        Outage => "outage",
        DataLoss => "data_loss",
        Security => "security",
        Privacy => "privacy",
        FeatureRequest => "feature_request",
        UiUx => "ui_ux",
        MobileApp => "mobile_app",
        Integrations => "integrations",
        Api => "api",
        Documentation => "documentation",
        Onboarding => "onboarding",
        CustomerSupport => "customer_support",
        Moderation => "moderation",
        Community => "community",
        Policy => "policy",
        Announcement => "announcement",
        GeneralFeedback => "general_feedback",
        Other => "other",
    }
}

impl Category {
    /// One-line gloss used when enumerating the taxonomy for the model.
    pub fn description(&self) -> &'static str {
        match self {
            Category::AccountAccess => "login, password reset, locked or suspended accounts",
            Category::Billing => "invoices, charges, billing errors",
            Category::Refunds => "refund requests and refund status",
            Category::Payments => "payment methods, failed or pending payments, payouts",
            Category::Subscription => "plan changes, renewals, cancellations",
            Category::Pricing => "price levels, fees, price changes",
            Category::BugReport => "something in the product is broken",
            Category::Performance => "slowness, lag, timeouts",
            Category::Outage => "the service is down or unreachable",
            Category::DataLoss => "missing or corrupted user data",
            Category::Security => "hacked accounts, phishing, vulnerabilities",
            Category::Privacy => "personal data handling, tracking, data requests",
            Category::FeatureRequest => "asks for new functionality",
            Category::UiUx => "layout, design, usability complaints",
            Category::MobileApp => "issues specific to the mobile apps",
            Category::Integrations => "third-party integrations and connected services",
            Category::Api => "developer API, webhooks, rate limits",
            Category::Documentation => "help articles, guides, missing docs",
            Category::Onboarding => "signing up and getting started",
            Category::CustomerSupport => "experience with the support team or tickets",
            Category::Moderation => "community rules, removals, bans",
            Category::Community => "meta discussion about the community itself",
            Category::Policy => "terms of service, platform rules, compliance",
            Category::Announcement => "official news, releases, changelogs",
            Category::GeneralFeedback => "broad praise or criticism of the platform",
            Category::Other => "anything that fits none of the above",
        }
    }
}

// --- Content ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Reply,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Post => "post",
            ItemKind::Reply => "reply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post" => Some(ItemKind::Post),
            "reply" => Some(ItemKind::Reply),
            _ => None,
        }
    }
}

/// A post or reply as persisted. `created_at` is epoch seconds and is the
/// ordering key everywhere; it never changes after the first insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub kind: ItemKind,
    /// For replies, the id of the thread's post. `None` for posts.
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

impl ContentItem {
    pub fn is_post(&self) -> bool {
        self.kind == ItemKind::Post
    }
}

// --- Labels ---

/// Structured classification of one content item. Always complete: every
/// enum field holds a member of its closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub item_id: String,
    pub intent: Intent,
    pub target: Target,
    pub sentiment: Sentiment,
    pub category: Category,
    pub summary: String,
    pub key_issues: Vec<String>,
    pub model_name: String,
    pub tokens_in: i32,
    pub tokens_out: i32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// Which stored-label hole a correction pass is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelGap {
    SentimentOrIntent,
    Intent,
}

// --- Staff response facts ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffResponse {
    pub post_id: String,
    pub reply_id: String,
    pub staff_username: String,
    pub response_time_seconds: i64,
    pub post_created_at: i64,
    pub reply_created_at: i64,
    pub is_first_response: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffStats {
    pub username: String,
    pub total_responses: i64,
    pub avg_response_time_seconds: f64,
    pub fastest_response_seconds: i64,
    pub slowest_response_seconds: i64,
    pub first_responses: i64,
    pub last_updated: DateTime<Utc>,
}

// --- Source boundary types ---

/// A submission as delivered by the source, already parsed out of the wire
/// format but not yet trusted or normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePost {
    pub id: String,
    pub created_at: i64,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<String>,
    pub score: i64,
    pub upvote_ratio: Option<f64>,
    pub flair: Option<String>,
    pub num_replies: i64,
    pub permalink: Option<String>,
    /// The source's own moderator marker. Informational only; the staff
    /// roster decides who is staff.
    pub distinguished: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReply {
    pub id: String,
    pub post_id: String,
    pub created_at: i64,
    pub author: Option<String>,
    pub body: Option<String>,
    pub score: i64,
    pub distinguished: Option<String>,
}

/// One page of posts plus the cursor for the next page (`None` when the
/// window is exhausted).
#[derive(Debug, Clone, Default)]
pub struct PostPage {
    pub posts: Vec<SourcePost>,
    pub next: Option<String>,
}

// --- Time windows ---

/// Half-open interval `[start, end)` in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Partition `[from, to)` into calendar-month windows. The first and last
    /// windows are clipped to the range.
    pub fn months(from: NaiveDate, to: NaiveDate) -> Vec<TimeWindow> {
        let mut windows = Vec::new();
        let mut cursor = from;
        while cursor < to {
            let next_month = cursor
                .with_day0(0)
                .and_then(|first| first.checked_add_months(Months::new(1)));
            let end = match next_month {
                Some(d) if d < to => d,
                _ => to,
            };
            windows.push(TimeWindow::new(day_start(cursor), day_start(end)));
            cursor = end;
        }
        windows
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |ts: i64| {
            DateTime::<Utc>::from_timestamp(ts, 0)
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| ts.to_string())
        };
        write!(f, "[{}, {})", show(self.start), show(self.end))
    }
}

fn day_start(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

// --- Job runs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Classify,
    Staff,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Classify => "classify",
            JobKind::Staff => "staff",
        }
    }
}

/// One completed batch job with its aggregate counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: serde_json::Value,
    pub error: Option<String>,
}

impl JobRun {
    pub fn new(
        job: JobKind,
        started_at: DateTime<Utc>,
        stats: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            started_at,
            finished_at: Utc::now(),
            stats,
            error,
        }
    }
}
