use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ThreadwatchError;

const DEFAULT_CONFIG_PATH: &str = "threadwatch.toml";

/// Runtime configuration: secrets from the environment, tunables from a TOML file.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    // Source credentials (required only for ingestion)
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,

    // Classifier keys (one required for classification)
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,

    pub file: FileConfig,
}

impl Config {
    /// Load `.env` (if present), then the process environment, then the TOML
    /// file named by `THREADWATCH_CONFIG`.
    pub fn load() -> Result<Self, ThreadwatchError> {
        dotenvy::dotenv().ok();

        let path = std::env::var("THREADWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let file = FileConfig::from_path(&path)?;

        Self::from_parts(|key| std::env::var(key).ok(), file)
    }

    /// Assemble a config from an environment lookup and an already-parsed file.
    pub fn from_parts(
        env: impl Fn(&str) -> Option<String>,
        file: FileConfig,
    ) -> Result<Self, ThreadwatchError> {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let database_url = non_empty("DATABASE_URL").ok_or_else(|| {
            ThreadwatchError::Config("DATABASE_URL environment variable is required".into())
        })?;

        Ok(Self {
            database_url,
            reddit_client_id: non_empty("REDDIT_CLIENT_ID"),
            reddit_client_secret: non_empty("REDDIT_CLIENT_SECRET"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            file,
        })
    }

    /// Source credentials, or a fatal config error when either is missing.
    pub fn reddit_credentials(&self) -> Result<(&str, &str), ThreadwatchError> {
        match (&self.reddit_client_id, &self.reddit_client_secret) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(ThreadwatchError::Config(
                "REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET are required for ingestion".into(),
            )),
        }
    }

    /// API key for the configured classifier provider.
    pub fn classifier_api_key(&self) -> Result<&str, ThreadwatchError> {
        let (key, var) = match self.file.classifier.provider {
            Provider::Anthropic => (&self.anthropic_api_key, "ANTHROPIC_API_KEY"),
            Provider::OpenAi => (&self.openai_api_key, "OPENAI_API_KEY"),
        };
        key.as_deref().ok_or_else(|| {
            ThreadwatchError::Config(format!("{var} is required for classification"))
        })
    }

    /// Log which settings are active. Secrets are shown as a short prefix only.
    pub fn log_redacted(&self) {
        tracing::info!(
            database_url = %redact(&self.database_url),
            reddit_client_id = %self.reddit_client_id.as_deref().map(redact).unwrap_or_default(),
            anthropic_api_key = %self.anthropic_api_key.as_deref().map(redact).unwrap_or_default(),
            openai_api_key = %self.openai_api_key.as_deref().map(redact).unwrap_or_default(),
            subreddit = %self.file.community.subreddit,
            provider = ?self.file.classifier.provider,
            model = %self.file.classifier.model,
            staff = self.file.staff.usernames.len(),
            "Configuration loaded"
        );
    }
}

fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}***")
}

// ---- TOML file ----

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub community: CommunityConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub staff: StaffConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ThreadwatchError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ThreadwatchError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ThreadwatchError> {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| ThreadwatchError::Config(format!("invalid config file: {e}")))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ThreadwatchError> {
        if self.community.subreddit.trim().is_empty() {
            return Err(ThreadwatchError::Validation("community.subreddit must not be empty".into()));
        }
        if self.classifier.max_attempts == 0 {
            return Err(ThreadwatchError::Validation("classifier.max_attempts must be at least 1".into()));
        }
        if self.classifier.batch_size == 0 {
            return Err(ThreadwatchError::Validation("classifier.batch_size must be at least 1".into()));
        }
        if self.ingest.page_size == 0 {
            return Err(ThreadwatchError::Validation("ingest.page_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommunityConfig {
    pub subreddit: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IngestConfig {
    pub per_item_delay_ms: u64,
    pub per_window_delay_ms: u64,
    pub page_size: u32,
    pub max_pages_per_window: u32,
    pub max_replies_fetched: u32,
    pub top_replies_kept: usize,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            per_item_delay_ms: 1_000,
            per_window_delay_ms: 5_000,
            page_size: 100,
            max_pages_per_window: 10,
            max_replies_fetched: 500,
            top_replies_kept: 20,
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClassifierConfig {
    pub provider: Provider,
    pub model: String,
    pub batch_size: usize,
    pub max_body_chars: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_secs: u64,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            model: "claude-haiku-4-5-20251001".to_string(),
            batch_size: 50,
            max_body_chars: 4_000,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            call_timeout_secs: 60,
            input_cost_per_mtok: 1.0,
            output_cost_per_mtok: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StaffConfig {
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

fn default_user_agent() -> String {
    concat!("threadwatch/", env!("CARGO_PKG_VERSION")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal_file() -> FileConfig {
        FileConfig::parse("[community]\nsubreddit = \"example\"\n").unwrap()
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let file = minimal_file();
        assert_eq!(file.community.subreddit, "example");
        assert!(file.community.user_agent.starts_with("threadwatch/"));
        assert_eq!(file.ingest.top_replies_kept, 20);
        assert_eq!(file.classifier.max_attempts, 3);
        assert_eq!(file.classifier.provider, Provider::Anthropic);
        assert!(file.staff.usernames.is_empty());
        assert_eq!(file.database.max_connections, 5);
    }

    #[test]
    fn full_file_parses() {
        let file = FileConfig::parse(
            r#"
            [community]
            subreddit = "example"
            user_agent = "bot/1.0"

            [ingest]
            per_item_delay_ms = 0
            include_keywords = ["refund"]
            exclude_keywords = ["spam"]

            [classifier]
            provider = "openai"
            model = "gpt-4o-mini"
            batch_size = 10

            [staff]
            usernames = ["mod_alice", "mod_bob"]
            "#,
        )
        .unwrap();
        assert_eq!(file.ingest.per_item_delay_ms, 0);
        assert_eq!(file.ingest.page_size, 100);
        assert_eq!(file.ingest.exclude_keywords, vec!["spam"]);
        assert_eq!(file.classifier.provider, Provider::OpenAi);
        assert_eq!(file.classifier.batch_size, 10);
        assert_eq!(file.staff.usernames.len(), 2);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = FileConfig::parse("[community]\nsubreddit = \"x\"\nsubredit = \"y\"\n").unwrap_err();
        assert!(matches!(err, ThreadwatchError::Config(_)));
    }

    #[test]
    fn missing_subreddit_rejected() {
        assert!(FileConfig::parse("[ingest]\npage_size = 10\n").is_err());
        assert!(FileConfig::parse("[community]\nsubreddit = \"  \"\n").is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = FileConfig::parse(
            "[community]\nsubreddit = \"x\"\n[classifier]\nmax_attempts = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_parts(env_of(&[]), minimal_file()).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn empty_env_values_count_as_missing() {
        let config = Config::from_parts(
            env_of(&[("DATABASE_URL", "postgres://x"), ("REDDIT_CLIENT_ID", " ")]),
            minimal_file(),
        )
        .unwrap();
        assert!(config.reddit_client_id.is_none());
        assert!(config.reddit_credentials().is_err());
    }

    #[test]
    fn classifier_key_follows_provider() {
        let config = Config::from_parts(
            env_of(&[("DATABASE_URL", "postgres://x"), ("OPENAI_API_KEY", "sk-test")]),
            minimal_file(),
        )
        .unwrap();
        assert!(config.classifier_api_key().is_err());

        let mut config = config;
        config.file.classifier.provider = Provider::OpenAi;
        assert_eq!(config.classifier_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn redact_keeps_short_prefix() {
        assert_eq!(redact("sk-ant-secret"), "sk-a***");
    }
}
