use std::collections::{HashMap, HashSet};
use std::fmt;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use ai_client::{truncate_to_char_boundary, Usage};
use threadwatch_common::{ClassifierConfig, ContentItem, Label, LabelGap};

use super::prompt;
use super::retry::{self, RetryOutcome, RetryPolicy};
use super::validate::{self, LabelFields};
use crate::traits::{Classifier, ItemStore};

/// Model name recorded on labels that carry no model output.
pub const DEFAULT_MODEL_NAME: &str = "default";

/// How a label's fields were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The model reply was valid as returned.
    Model,
    /// The model replied but some fields were corrected locally.
    Sanitized,
    /// Every attempt failed; the label holds the documented defaults.
    Default,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub label: Label,
    pub outcome: Outcome,
}

/// Per-million-token prices used to cost each label.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn cost(&self, usage: Usage) -> f64 {
        usage.input_tokens as f64 * self.input_per_mtok / 1e6
            + usage.output_tokens as f64 * self.output_per_mtok / 1e6
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub batch_size: usize,
    pub max_body_chars: usize,
    pub retry: RetryPolicy,
    pub pricing: Pricing,
}

impl ClassifyOptions {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_body_chars: config.max_body_chars,
            retry: RetryPolicy::from_config(config),
            pricing: Pricing {
                input_per_mtok: config.input_cost_per_mtok,
                output_per_mtok: config.output_cost_per_mtok,
            },
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ClassifyStats {
    pub selected: u32,
    pub model: u32,
    pub sanitized: u32,
    pub defaulted: u32,
    pub persist_failed: u32,
    pub corrected: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

impl ClassifyStats {
    fn record(&mut self, classification: &Classification) {
        match classification.outcome {
            Outcome::Model => self.model += 1,
            Outcome::Sanitized => self.sanitized += 1,
            Outcome::Default => self.defaulted += 1,
        }
        self.tokens_in += classification.label.tokens_in.max(0) as u64;
        self.tokens_out += classification.label.tokens_out.max(0) as u64;
        self.cost_usd += classification.label.cost_usd;
    }
}

impl fmt::Display for ClassifyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Classification Complete ===")?;
        writeln!(f, "Items selected:     {}", self.selected)?;
        writeln!(f, "Model labels:       {}", self.model)?;
        writeln!(f, "Sanitized labels:   {}", self.sanitized)?;
        writeln!(f, "Default labels:     {}", self.defaulted)?;
        writeln!(f, "Corrections:        {}", self.corrected)?;
        writeln!(f, "Persist failures:   {}", self.persist_failed)?;
        writeln!(f, "Tokens in/out:      {}/{}", self.tokens_in, self.tokens_out)?;
        write!(f, "Cost:               ${:.4}", self.cost_usd)
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Main,
    Correction(LabelGap),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct ClassifyPipeline<'a> {
    classifier: &'a dyn Classifier,
    store: &'a dyn ItemStore,
    options: ClassifyOptions,
    system_prompt: String,
}

impl<'a> ClassifyPipeline<'a> {
    pub fn new(classifier: &'a dyn Classifier, store: &'a dyn ItemStore, options: ClassifyOptions) -> Self {
        Self {
            classifier,
            store,
            options,
            system_prompt: prompt::system_prompt(),
        }
    }

    /// One batch: the main selection, then the two correction passes for
    /// labels missing sentiment/intent and intent alone.
    pub async fn run(&self, stats: &mut ClassifyStats) -> Result<()> {
        let mut attempted = HashSet::new();

        let items = self
            .store
            .items_needing_analysis(self.options.batch_size)
            .await
            .context("selecting items for classification")?;
        info!(count = items.len(), "Selected items for classification");
        self.process(items, Pass::Main, &mut attempted, stats).await;

        for gap in [LabelGap::SentimentOrIntent, LabelGap::Intent] {
            let items = self
                .store
                .items_with_label_gap(gap, self.options.batch_size)
                .await
                .with_context(|| format!("selecting labels with gap {gap:?}"))?;
            if !items.is_empty() {
                info!(?gap, count = items.len(), "Correcting incomplete labels");
            }
            self.process(items, Pass::Correction(gap), &mut attempted, stats).await;
        }

        Ok(())
    }

    async fn process(
        &self,
        items: Vec<ContentItem>,
        pass: Pass,
        attempted: &mut HashSet<String>,
        stats: &mut ClassifyStats,
    ) {
        let mut titles: HashMap<String, Option<String>> = HashMap::new();

        for item in items {
            if !attempted.insert(item.id.clone()) {
                continue;
            }
            match pass {
                Pass::Main => stats.selected += 1,
                Pass::Correction(_) => stats.corrected += 1,
            }

            let title = self.thread_title(&item, &mut titles).await;
            let classification = self.classify(&item, title.as_deref()).await;
            stats.record(&classification);

            match self.persist(&classification.label).await {
                Ok(()) => info!(
                    item_id = %item.id,
                    outcome = ?classification.outcome,
                    category = %classification.label.category,
                    "Item classified"
                ),
                Err(e) => {
                    warn!(item_id = %item.id, error = %format!("{e:#}"), "Failed to persist label");
                    stats.persist_failed += 1;
                }
            }
        }
    }

    /// Title of a reply's thread post, looked up once per batch.
    async fn thread_title(
        &self,
        item: &ContentItem,
        cache: &mut HashMap<String, Option<String>>,
    ) -> Option<String> {
        let parent = item.parent_id.as_deref()?;
        if let Some(title) = cache.get(parent) {
            return title.clone();
        }
        let title = match self.store.get_item(parent).await {
            Ok(post) => post.and_then(|p| p.title),
            Err(e) => {
                warn!(item_id = %item.id, parent, error = %e, "Thread lookup failed");
                None
            }
        };
        cache.insert(parent.to_string(), title.clone());
        title
    }

    /// Prompt, call with retry, validate and sanitize. Never fails: the worst
    /// case is a default label.
    pub async fn classify(&self, item: &ContentItem, thread_title: Option<&str>) -> Classification {
        let user = prompt::user_prompt(item, thread_title, self.options.max_body_chars);

        let outcome = retry::run(&self.options.retry, |attempt| {
            let user = &user;
            async move {
                let completion = self.classifier.complete(&self.system_prompt, user).await?;
                let reply = validate::parse_reply(&completion.text).with_context(|| {
                    format!(
                        "unparseable reply on attempt {}: {:?}",
                        attempt + 1,
                        truncate_to_char_boundary(&completion.text, 200)
                    )
                })?;
                Ok((completion, reply))
            }
        })
        .await;

        match outcome {
            RetryOutcome::Success {
                value: (completion, reply),
                attempts,
            } => {
                let checked = validate::validate(&reply);
                let outcome = if checked.is_clean() {
                    Outcome::Model
                } else {
                    debug!(item_id = %item.id, problems = ?checked.problems, "Sanitized model reply");
                    Outcome::Sanitized
                };
                let model_name = if completion.model.is_empty() {
                    self.classifier.model_name().to_string()
                } else {
                    completion.model.clone()
                };
                debug!(item_id = %item.id, attempts, "Model reply accepted");
                Classification {
                    label: self.label(item, checked.fields, model_name, completion.usage),
                    outcome,
                }
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                warn!(item_id = %item.id, attempts, error = %last_error, "Classifier exhausted, using defaults");
                Classification {
                    label: self.label(
                        item,
                        LabelFields::fallback(),
                        DEFAULT_MODEL_NAME.to_string(),
                        Usage::default(),
                    ),
                    outcome: Outcome::Default,
                }
            }
        }
    }

    fn label(&self, item: &ContentItem, fields: LabelFields, model_name: String, usage: Usage) -> Label {
        Label {
            item_id: item.id.clone(),
            intent: fields.intent,
            target: fields.target,
            sentiment: fields.sentiment,
            category: fields.category,
            summary: fields.summary,
            key_issues: fields.key_issues,
            model_name,
            tokens_in: i32::try_from(usage.input_tokens).unwrap_or(i32::MAX),
            tokens_out: i32::try_from(usage.output_tokens).unwrap_or(i32::MAX),
            cost_usd: self.options.pricing.cost(usage),
            created_at: Utc::now(),
        }
    }

    /// Upsert the label, flag the item, read the flag back and retry the flag
    /// write once if it did not take.
    async fn persist(&self, label: &Label) -> Result<()> {
        self.store.upsert_label(label).await.context("writing label")?;

        let now = Utc::now();
        self.store.mark_analyzed(&label.item_id, now).await.context("marking analyzed")?;
        if self.store.is_analyzed(&label.item_id).await? {
            return Ok(());
        }

        warn!(item_id = %label.item_id, "Analyzed flag did not stick, retrying");
        self.store.mark_analyzed(&label.item_id, now).await.context("marking analyzed")?;
        if self.store.is_analyzed(&label.item_id).await? {
            return Ok(());
        }
        bail!("analyzed flag still unset for {} after retry", label.item_id)
    }
}
