//! Ingestion coordinator against MockSource and MemoryStore.

use chrono::NaiveDate;

use threadwatch_common::{TimeWindow, DELETED_AUTHOR};
use threadwatch_pipeline::filter::KeywordGate;
use threadwatch_pipeline::ingest::{IngestOptions, IngestSchedule, IngestStats, Ingestor, StaffRoster};
use threadwatch_pipeline::testing::{source_post, source_reply, MemoryStore, MockSource};

const JAN_1: i64 = 1_704_067_200;
const FEB_1: i64 = 1_706_745_600;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn january() -> TimeWindow {
    TimeWindow::new(JAN_1, FEB_1)
}

fn options(staff: &[&str]) -> IngestOptions {
    IngestOptions {
        schedule: IngestSchedule::none(),
        gate: KeywordGate::default(),
        roster: StaffRoster::new(staff),
        max_pages_per_window: 10,
        max_replies_fetched: 100,
        top_replies_kept: 2,
    }
}

#[tokio::test]
async fn stores_posts_and_top_replies() {
    let source = MockSource::new()
        .page(vec![source_post("t3_a", JAN_1 + 10), source_post("t3_b", JAN_1 + 20)])
        .replies(
            "t3_a",
            vec![
                source_reply("t1_low", "t3_a", JAN_1 + 30, "user1", 1),
                source_reply("t1_mod", "t3_a", JAN_1 + 40, "Mod_Alice", 5),
                source_reply("t1_top", "t3_a", JAN_1 + 50, "user2", 9),
            ],
        );
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&["mod_alice"]));

    let mut stats = IngestStats::default();
    ingestor.ingest_window(january(), &mut stats).await.unwrap();

    assert_eq!(stats.posts_stored, 2);
    assert_eq!(stats.replies_stored, 2);
    assert_eq!(stats.errors, 0);

    assert!(store.item("t1_low").is_none(), "lowest-scoring reply should be cut");
    let staff_reply = store.item("t1_mod").unwrap();
    assert!(staff_reply.is_staff);
    assert_eq!(staff_reply.parent_id.as_deref(), Some("t3_a"));
    assert!(!store.item("t1_top").unwrap().is_staff);
}

#[tokio::test]
async fn second_run_over_same_window_stores_nothing() {
    let source = MockSource::new()
        .page(vec![source_post("t3_a", JAN_1 + 10), source_post("t3_b", JAN_1 + 20)])
        .replies("t3_a", vec![source_reply("t1_x", "t3_a", JAN_1 + 30, "u", 1)]);
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut first = IngestStats::default();
    ingestor.ingest_window(january(), &mut first).await.unwrap();
    let rows_after_first = store.items().len();

    let mut second = IngestStats::default();
    ingestor.ingest_window(january(), &mut second).await.unwrap();

    assert_eq!(store.items().len(), rows_after_first);
    assert_eq!(second.posts_stored, 0);
    assert_eq!(second.replies_stored, 0);
    assert_eq!(second.posts_skipped, first.posts_stored);
}

#[tokio::test]
async fn range_walks_calendar_months_and_respects_windows() {
    let source = MockSource::new().page(vec![
        source_post("t3_feb", FEB_1 + 100),
        source_post("t3_jan", JAN_1 + 100),
    ]);
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut stats = IngestStats::default();
    ingestor
        .ingest_range(date(2024, 1, 1), date(2024, 3, 1), &mut stats)
        .await
        .unwrap();

    assert_eq!(stats.windows, 2);
    assert_eq!(stats.posts_stored, 2);
    // Each window sees the other month's post and rejects it.
    assert_eq!(stats.posts_skipped, 2);
}

#[tokio::test]
async fn follows_cursor_across_pages() {
    let source = MockSource::new()
        .page(vec![source_post("t3_a", JAN_1 + 10)])
        .page(vec![source_post("t3_b", JAN_1 + 5)]);
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut stats = IngestStats::default();
    ingestor.ingest_window(january(), &mut stats).await.unwrap();

    assert_eq!(source.page_calls(), 2);
    assert_eq!(stats.pages, 2);
    assert_eq!(stats.posts_stored, 2);
    assert_eq!(stats.page_cap_hits, 0);
}

#[tokio::test]
async fn page_cap_limits_fetches() {
    let source = MockSource::new()
        .page(vec![source_post("t3_a", JAN_1 + 10)])
        .page(vec![source_post("t3_b", JAN_1 + 5)]);
    let store = MemoryStore::new();
    let mut opts = options(&[]);
    opts.max_pages_per_window = 1;
    let ingestor = Ingestor::new(&source, &store, opts);

    let mut stats = IngestStats::default();
    ingestor.ingest_window(january(), &mut stats).await.unwrap();

    assert_eq!(source.page_calls(), 1);
    assert!(store.item("t3_b").is_none());
    assert_eq!(stats.page_cap_hits, 1);
}

#[tokio::test]
async fn older_window_continues_where_newer_one_stopped() {
    let source = MockSource::new()
        .page(vec![source_post("t3_feb", FEB_1 + 100)])
        .page(vec![source_post("t3_jan", JAN_1 + 100)]);
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut stats = IngestStats::default();
    ingestor
        .ingest_range(date(2024, 1, 1), date(2024, 3, 1), &mut stats)
        .await
        .unwrap();

    // February reads both pages; January re-reads only the last one.
    assert_eq!(source.page_calls(), 3);
    assert_eq!(stats.posts_stored, 2);
    assert!(store.item("t3_feb").is_some());
    assert!(store.item("t3_jan").is_some());
    assert_eq!(stats.page_cap_hits, 0);
}

#[tokio::test]
async fn capped_window_hands_its_cursor_to_the_next_one() {
    let source = MockSource::new()
        .page(vec![source_post("t3_feb_late", FEB_1 + 200)])
        .page(vec![source_post("t3_feb_early", FEB_1 + 100)])
        .page(vec![source_post("t3_jan", JAN_1 + 100)]);
    let store = MemoryStore::new();
    let mut opts = options(&[]);
    opts.max_pages_per_window = 1;
    let ingestor = Ingestor::new(&source, &store, opts);

    let mut stats = IngestStats::default();
    ingestor
        .ingest_range(date(2024, 1, 1), date(2024, 3, 1), &mut stats)
        .await
        .unwrap();

    assert_eq!(stats.page_cap_hits, 2);
    assert_eq!(source.page_calls(), 2);
    assert!(store.item("t3_feb_late").is_some());
    assert!(store.item("t3_feb_early").is_none());
}

#[tokio::test]
async fn reply_failure_is_counted_and_does_not_stop_the_window() {
    let source = MockSource::new()
        .page(vec![source_post("t3_bad", JAN_1 + 20), source_post("t3_ok", JAN_1 + 10)])
        .failing_replies("t3_bad")
        .replies("t3_ok", vec![source_reply("t1_r", "t3_ok", JAN_1 + 30, "u", 1)]);
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut stats = IngestStats::default();
    ingestor.ingest_window(january(), &mut stats).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert!(store.item("t3_bad").is_some(), "post stored before the reply fetch stays");
    assert!(store.item("t1_r").is_some());
}

#[tokio::test]
async fn page_failure_propagates() {
    let source = MockSource::new().failing_pages();
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut stats = IngestStats::default();
    let err = ingestor.ingest_window(january(), &mut stats).await.unwrap_err();

    assert!(format!("{err:#}").contains("page fetch failed"));
    assert!(store.items().is_empty());
}

#[tokio::test]
async fn keyword_gate_excludes_before_including() {
    let mut spam = source_post("t3_spam", JAN_1 + 10);
    spam.body = Some("refund scam spam link".to_string());
    let mut refund = source_post("t3_refund", JAN_1 + 20);
    refund.body = Some("Where is my refund?".to_string());
    let other = source_post("t3_other", JAN_1 + 30);

    let source = MockSource::new().page(vec![spam, refund, other]);
    let store = MemoryStore::new();
    let mut opts = options(&[]);
    opts.gate = KeywordGate::new(&["refund".to_string()], &["spam".to_string()]);
    let ingestor = Ingestor::new(&source, &store, opts);

    let mut stats = IngestStats::default();
    ingestor.ingest_window(january(), &mut stats).await.unwrap();

    assert_eq!(stats.posts_stored, 1);
    assert_eq!(stats.posts_skipped, 2);
    assert!(store.item("t3_refund").is_some());
    assert_eq!(source.reply_calls(), 1);
}

#[tokio::test]
async fn deleted_author_and_vote_split_are_normalized() {
    let mut post = source_post("t3_a", JAN_1 + 10);
    post.author = None;
    post.score = 50;
    post.upvote_ratio = Some(0.75);
    let source = MockSource::new().page(vec![post]);
    let store = MemoryStore::new();
    let ingestor = Ingestor::new(&source, &store, options(&[]));

    let mut stats = IngestStats::default();
    ingestor.ingest_window(january(), &mut stats).await.unwrap();

    let stored = store.item("t3_a").unwrap();
    assert_eq!(stored.author, DELETED_AUTHOR);
    assert_eq!((stored.upvotes, stored.downvotes), (75, 25));
    assert!(!stored.analyzed);
}
