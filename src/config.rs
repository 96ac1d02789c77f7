//! Configuration loader and validator for the submission → spreadsheet syncer.
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub schedule: Schedule,
    pub sheets: Sheets,
    #[serde(default)]
    pub alert: Alert,
    #[serde(default)]
    pub mail: Mail,
    #[serde(default)]
    pub code_counting: CodeCounting,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    pub claim_lease_seconds: u64,
}

/// Working-hours window used to decide whether only priority submissions
/// are eligible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub utc_offset_hours: i32,
    pub working_hours_start: u32,
    pub working_hours_end: u32,
}

/// Spreadsheet store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheets {
    pub access_token: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Last header column scanned by the reconciler, in A1 letters.
    pub max_column: String,
    pub data_scan_rows: u32,
    pub request_timeout_seconds: u64,
}

/// Operator alerting. Without a Telegram chat, alerts go to the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<i64>,
}

/// Mail relay for answer-level messages. Without an endpoint, mails go to the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mail {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_mail_sender")]
    pub sender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeCounting {
    pub question_type: String,
    pub scan_rows: u32,
}

impl Default for CodeCounting {
    fn default() -> Self {
        Self {
            question_type: "counting_code".into(),
            scan_rows: 1000,
        }
    }
}

fn default_mail_sender() -> String {
    "noreply@localhost".into()
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Schedule {
    pub fn offset(&self) -> FixedOffset {
        // validate() bounds the hours, so the UTC fallback only covers unvalidated configs
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/sheetsync.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
/// Upper bound for scan windows; a Google sheet holds at most 10M cells.
pub const MAX_SCAN_ROWS: u32 = 1_000_000;

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.claim_lease_seconds == 0 {
        return Err(ConfigError::Invalid("app.claim_lease_seconds must be > 0"));
    }

    if !(-12..=14).contains(&cfg.schedule.utc_offset_hours) {
        return Err(ConfigError::Invalid(
            "schedule.utc_offset_hours must be within -12..=14",
        ));
    }
    if cfg.schedule.working_hours_start > 24 || cfg.schedule.working_hours_end > 24 {
        return Err(ConfigError::Invalid("schedule working hours must be within 0..=24"));
    }
    if cfg.schedule.working_hours_start > cfg.schedule.working_hours_end {
        return Err(ConfigError::Invalid(
            "schedule.working_hours_start must not be after working_hours_end",
        ));
    }

    if cfg.sheets.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.access_token must be non-empty"));
    }
    if crate::sheets::column_index(&cfg.sheets.max_column).is_none() {
        return Err(ConfigError::Invalid("sheets.max_column must be A1 column letters"));
    }
    if cfg.sheets.data_scan_rows == 0 {
        return Err(ConfigError::Invalid("sheets.data_scan_rows must be > 0"));
    }
    if cfg.sheets.data_scan_rows > MAX_SCAN_ROWS {
        return Err(ConfigError::Invalid("sheets.data_scan_rows must be <= 1000000"));
    }
    if cfg.sheets.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("sheets.request_timeout_seconds must be > 0"));
    }

    if cfg.alert.telegram_bot_token.is_some() != cfg.alert.telegram_chat_id.is_some() {
        return Err(ConfigError::Invalid(
            "alert.telegram_bot_token and alert.telegram_chat_id must be set together",
        ));
    }

    if cfg.code_counting.question_type.trim().is_empty() {
        return Err(ConfigError::Invalid("code_counting.question_type must be non-empty"));
    }
    if cfg.code_counting.scan_rows == 0 {
        return Err(ConfigError::Invalid("code_counting.scan_rows must be > 0"));
    }
    if cfg.code_counting.scan_rows > MAX_SCAN_ROWS {
        return Err(ConfigError::Invalid("code_counting.scan_rows must be <= 1000000"));
    }

    Ok(())
}

/// Returns a complete example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 5000
  max_backoff_seconds: 3600
  claim_lease_seconds: 900

schedule:
  utc_offset_hours: 7
  working_hours_start: 7
  working_hours_end: 17

sheets:
  access_token: "YOUR_GOOGLE_OAUTH_ACCESS_TOKEN"
  max_column: "ZZ"
  data_scan_rows: 5000
  request_timeout_seconds: 30

alert:
  telegram_bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  telegram_chat_id: -100123456789

mail:
  endpoint: "https://mail-relay.example.org/send"
  api_key: "YOUR_MAIL_RELAY_KEY"
  sender: "school-forms@example.org"

code_counting:
  question_type: "counting_code"
  scan_rows: 1000
"#
}
