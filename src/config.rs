// The `config` module loads the TOML file that drives a chatterbox run.

use crate::ack::{DEFAULT_BODY_TEMPLATE, DEFAULT_SUBJECT_TEMPLATE};
use crate::llm::{RetryConfig, RetryStrategy};
use crate::mail::gmail::DEFAULT_USER_ID;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "chatterbox.toml";
pub const DEFAULT_PROMPT_TEMPLATE: &str = "{{title}}\n\n{{body}}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration. Every section and field has a default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub gmail: GmailConfig,
    pub poll: PollConfig,
    pub ack: AckConfig,
    pub llm: LlmConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Holds the cursor and poll counter files.
    pub data_dir: PathBuf,
    /// Root of the conversation tree.
    pub interactions_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            interactions_dir: PathBuf::from("./interactions"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GmailConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub user_id: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("./tmp/credential.json"),
            token_path: PathBuf::from("./tmp/token.json"),
            user_id: DEFAULT_USER_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    #[serde(deserialize_with = "parse_duration")]
    pub interval: Duration,
    /// Total wall-clock budget; `None` runs until Ctrl-C.
    #[serde(deserialize_with = "parse_optional_duration")]
    pub run_duration: Option<Duration>,
    /// Poll immediately on start instead of after the first interval.
    pub hot_start: bool,
    /// Consecutive failed cycles after which a message is skipped.
    pub max_message_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            run_duration: None,
            hot_start: true,
            max_message_failures: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AckConfig {
    pub enabled: bool,
    pub subject: String,
    pub body: String,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subject: DEFAULT_SUBJECT_TEMPLATE.to_string(),
            body: DEFAULT_BODY_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub preamble: String,
    /// Handlebars template over `title`, `subject`, `body`, `sender`,
    /// `conversation_id` and `turn`.
    pub prompt: String,
    pub max_attempts: usize,
    #[serde(deserialize_with = "parse_duration")]
    pub base_delay: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Disabled,
            model: "gemini-2.0-flash-lite".to_string(),
            preamble: "You are a helpful assistant answering questions sent by email. \
                       Answer in plain text."
                .to_string(),
            prompt: DEFAULT_PROMPT_TEMPLATE.to_string(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl LlmConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts,
            self.base_delay,
            RetryStrategy::ExponentialBackoffWithJitter,
        )
    }
}

fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn parse_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) => humantime::parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.paths.data_dir, PathBuf::from("./data"));
        assert_eq!(config.gmail.user_id, "me");
        assert_eq!(config.poll.interval, Duration::from_secs(120));
        assert_eq!(config.poll.run_duration, None);
        assert!(config.poll.hot_start);
        assert!(config.ack.enabled);
        assert_eq!(config.llm.provider, LlmProvider::Disabled);
    }

    #[test]
    fn sections_override_defaults() {
        let text = r#"
            [paths]
            interactions_dir = "/srv/chatterbox"

            [poll]
            interval = "30s"
            run_duration = "1h 30m"
            hot_start = false
            max_message_failures = 2

            [ack]
            enabled = false

            [llm]
            provider = "gemini"
            max_attempts = 5
            base_delay = "250ms"
        "#;

        let config = Config::from_toml_str(text).unwrap();

        assert_eq!(config.paths.interactions_dir, PathBuf::from("/srv/chatterbox"));
        assert_eq!(config.paths.data_dir, PathBuf::from("./data"));
        assert_eq!(config.poll.interval, Duration::from_secs(30));
        assert_eq!(config.poll.run_duration, Some(Duration::from_secs(5400)));
        assert!(!config.poll.hot_start);
        assert_eq!(config.poll.max_message_failures, 2);
        assert!(!config.ack.enabled);
        assert_eq!(config.ack.subject, DEFAULT_SUBJECT_TEMPLATE);
        assert_eq!(config.llm.provider, LlmProvider::Gemini);

        let retry = config.llm.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn bad_durations_and_unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("[poll]\ninterval = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[poll]\nintervall = \"2m\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_from_disk_and_reports_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gmail]\nuser_id = \"bot@example.com\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.gmail.user_id, "bot@example.com");

        let missing = Config::load("/definitely/not/here.toml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
