//! Classification pipeline against ScriptedClassifier and MemoryStore.

use std::time::Duration;

use threadwatch_common::{Category, ContentItem, Intent, ItemKind, Sentiment, Target};
use threadwatch_pipeline::classify::validate::{CANNED_SUMMARY, FALLBACK_KEY_ISSUE};
use threadwatch_pipeline::classify::{
    ClassifyOptions, ClassifyPipeline, ClassifyStats, Outcome, Pricing, RetryPolicy,
    DEFAULT_MODEL_NAME,
};
use threadwatch_pipeline::testing::{reply_json, MemoryStore, ScriptedClassifier};

fn options(max_attempts: u32) -> ClassifyOptions {
    ClassifyOptions {
        batch_size: 50,
        max_body_chars: 200,
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
        },
        pricing: Pricing {
            input_per_mtok: 1.0,
            output_per_mtok: 5.0,
        },
    }
}

fn item(id: &str, kind: ItemKind, created_at: i64) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        kind,
        parent_id: None,
        created_at,
        title: (kind == ItemKind::Post).then(|| format!("Title of {id}")),
        body: format!("Body of {id}"),
        author: "someone".to_string(),
        flair: None,
        permalink: None,
        score: 1,
        upvote_ratio: None,
        upvotes: 1,
        downvotes: 0,
        num_replies: 0,
        is_staff: false,
        analyzed: false,
        analyzed_at: None,
    }
}

fn post(id: &str, created_at: i64) -> ContentItem {
    item(id, ItemKind::Post, created_at)
}

#[tokio::test]
async fn valid_reply_becomes_model_label() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    let classifier = ScriptedClassifier::new("test-model").always(reply_json("billing"));
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(3));

    let mut stats = ClassifyStats::default();
    pipeline.run(&mut stats).await.unwrap();

    let label = store.label("t3_a").unwrap();
    assert_eq!(label.category, Category::Billing);
    assert_eq!(label.intent, Intent::Help);
    assert_eq!(label.model_name, "test-model");
    assert_eq!((label.tokens_in, label.tokens_out), (100, 20));
    assert!((label.cost_usd - 0.0002).abs() < 1e-12);
    assert!(store.item("t3_a").unwrap().analyzed);
    assert_eq!(stats.model, 1);
}

#[tokio::test]
async fn exhausted_retries_write_default_label() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    let classifier = ScriptedClassifier::new("test-model");
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(3));

    let mut stats = ClassifyStats::default();
    pipeline.run(&mut stats).await.unwrap();

    assert_eq!(classifier.calls(), 3);
    let label = store.label("t3_a").unwrap();
    assert_eq!(label.model_name, DEFAULT_MODEL_NAME);
    assert_eq!(label.intent, Intent::Comment);
    assert_eq!(label.target, Target::Other);
    assert_eq!(label.sentiment, Sentiment::Neu);
    assert_eq!(label.category, Category::Other);
    assert_eq!(label.summary, CANNED_SUMMARY);
    assert_eq!(label.key_issues, vec![FALLBACK_KEY_ISSUE]);
    assert_eq!(label.cost_usd, 0.0);
    assert!(store.item("t3_a").unwrap().analyzed);
    assert_eq!(stats.defaulted, 1);
}

#[tokio::test]
async fn unknown_category_is_sanitized_not_retried() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    let classifier = ScriptedClassifier::new("test-model").then_reply(reply_json("unknown_value"));
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(3));

    let classification = pipeline.classify(&post("t3_a", 100), None).await;

    assert_eq!(classifier.calls(), 1);
    assert_eq!(classification.outcome, Outcome::Sanitized);
    assert_eq!(classification.label.category, Category::Other);
    assert_eq!(classification.label.intent, Intent::Help);
    assert_eq!(classification.label.sentiment, Sentiment::Neg);
    assert_eq!(classification.label.model_name, "test-model");
}

#[tokio::test]
async fn unparseable_reply_is_retried() {
    let store = MemoryStore::new();
    let classifier = ScriptedClassifier::new("test-model")
        .then_reply("Sure! Here is the classification you asked for.")
        .then_fail("503 from provider")
        .then_reply(reply_json("outage"));
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(3));

    let classification = pipeline.classify(&post("t3_a", 100), None).await;

    assert_eq!(classifier.calls(), 3);
    assert_eq!(classification.outcome, Outcome::Model);
    assert_eq!(classification.label.category, Category::Outage);
}

#[tokio::test]
async fn reclassifying_replaces_the_label() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));

    let first = ScriptedClassifier::new("m1").always(reply_json("billing"));
    ClassifyPipeline::new(&first, &store, options(1))
        .run(&mut ClassifyStats::default())
        .await
        .unwrap();

    // Simulate a legacy hole so the item is selected again.
    store.punch_label_holes("t3_a", true, false);
    let second = ScriptedClassifier::new("m2").always(reply_json("refunds"));
    ClassifyPipeline::new(&second, &store, options(1))
        .run(&mut ClassifyStats::default())
        .await
        .unwrap();

    assert_eq!(store.labels().len(), 1);
    let label = store.label("t3_a").unwrap();
    assert_eq!(label.category, Category::Refunds);
    assert_eq!(label.model_name, "m2");
}

#[tokio::test]
async fn selection_is_newest_first_and_bounded() {
    let store = MemoryStore::new();
    store.insert(post("t3_old", 100));
    store.insert(post("t3_mid", 200));
    store.insert(post("t3_new", 300));
    let classifier = ScriptedClassifier::new("m").always(reply_json("other"));
    let mut opts = options(1);
    opts.batch_size = 2;
    let pipeline = ClassifyPipeline::new(&classifier, &store, opts);

    let mut stats = ClassifyStats::default();
    pipeline.run(&mut stats).await.unwrap();

    assert_eq!(stats.selected, 2);
    assert!(store.item("t3_new").unwrap().analyzed);
    assert!(store.item("t3_mid").unwrap().analyzed);
    assert!(!store.item("t3_old").unwrap().analyzed);
    assert!(classifier.prompts()[0].contains("Body of t3_new"));
}

#[tokio::test]
async fn correction_passes_repair_incomplete_labels() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    store.insert(post("t3_b", 200));
    let classifier = ScriptedClassifier::new("m").always(reply_json("api"));

    ClassifyPipeline::new(&classifier, &store, options(1))
        .run(&mut ClassifyStats::default())
        .await
        .unwrap();
    store.punch_label_holes("t3_a", true, false);
    store.punch_label_holes("t3_b", false, true);
    store.insert(post("t3_c", 300));

    // A batch of one is used up by the fresh item, so the holes are left to
    // the correction passes, which take the newest holed label each.
    let mut opts = options(1);
    opts.batch_size = 1;
    let mut stats = ClassifyStats::default();
    ClassifyPipeline::new(&classifier, &store, opts.clone())
        .run(&mut stats)
        .await
        .unwrap();

    assert_eq!(stats.selected, 1);
    assert_eq!(stats.corrected, 1);
    assert!(store.item("t3_c").unwrap().analyzed);
    let before = classifier.calls();

    // t3_b was repaired; t3_a is picked up by the next run.
    let mut rerun = ClassifyStats::default();
    ClassifyPipeline::new(&classifier, &store, opts.clone())
        .run(&mut rerun)
        .await
        .unwrap();
    assert_eq!(rerun.selected + rerun.corrected, 1);
    assert_eq!(classifier.calls(), before + 1);

    let mut idle = ClassifyStats::default();
    ClassifyPipeline::new(&classifier, &store, opts)
        .run(&mut idle)
        .await
        .unwrap();
    assert_eq!(idle.selected + idle.corrected, 0);
}

#[tokio::test]
async fn lost_analyzed_write_is_retried_once() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    store.drop_analyzed_writes(1);
    let classifier = ScriptedClassifier::new("m").always(reply_json("other"));
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(1));

    let mut stats = ClassifyStats::default();
    pipeline.run(&mut stats).await.unwrap();

    assert!(store.item("t3_a").unwrap().analyzed);
    assert_eq!(stats.persist_failed, 0);
}

#[tokio::test]
async fn persistent_lost_writes_leave_item_unanalyzed() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    store.drop_analyzed_writes(2);
    let classifier = ScriptedClassifier::new("m").always(reply_json("other"));
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(1));

    let mut stats = ClassifyStats::default();
    pipeline.run(&mut stats).await.unwrap();

    assert!(!store.item("t3_a").unwrap().analyzed);
    assert_eq!(stats.persist_failed, 1);
}

#[tokio::test]
async fn label_write_failure_isolated_to_one_item() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    store.insert(post("t3_b", 200));
    store.fail_label_writes("t3_b");
    let classifier = ScriptedClassifier::new("m").always(reply_json("other"));
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(1));

    let mut stats = ClassifyStats::default();
    pipeline.run(&mut stats).await.unwrap();

    assert_eq!(stats.persist_failed, 1);
    assert!(store.item("t3_a").unwrap().analyzed);
    assert!(!store.item("t3_b").unwrap().analyzed);
    assert!(store.label("t3_b").is_none());
}

#[tokio::test]
async fn reply_prompt_includes_thread_title() {
    let store = MemoryStore::new();
    store.insert(post("t3_a", 100));
    let mut reply = item("t1_r", ItemKind::Reply, 150);
    reply.parent_id = Some("t3_a".to_string());
    store.insert(reply);

    let classifier = ScriptedClassifier::new("m").always(reply_json("other"));
    ClassifyPipeline::new(&classifier, &store, options(1))
        .run(&mut ClassifyStats::default())
        .await
        .unwrap();

    let prompts = classifier.prompts();
    let reply_prompt = prompts.iter().find(|p| p.contains("Body of t1_r")).unwrap();
    assert!(reply_prompt.contains("In thread: Title of t3_a"));
}

#[tokio::test]
async fn every_label_stays_in_the_closed_sets() {
    let store = MemoryStore::new();
    for i in 0..4 {
        store.insert(post(&format!("t3_{i}"), i));
    }
    let classifier = ScriptedClassifier::new("m")
        .then_reply(r#"{"intent": "rant", "target": 7, "sentiment": null, "category": "weather", "summary": [], "key_issues": {}}"#)
        .then_reply(reply_json("security"))
        .then_fail("boom");
    let pipeline = ClassifyPipeline::new(&classifier, &store, options(1));

    pipeline.run(&mut ClassifyStats::default()).await.unwrap();

    for label in store.labels() {
        assert!(Intent::ALL.contains(&label.intent));
        assert!(Target::ALL.contains(&label.target));
        assert!(Sentiment::ALL.contains(&label.sentiment));
        assert!(Category::ALL.contains(&label.category));
    }
    assert!(store.items().iter().all(|i| i.analyzed));
}
