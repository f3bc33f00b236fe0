//! Process configuration, loaded from the environment by figment.

use std::path::PathBuf;
use std::time::Duration;

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};

use crate::sync::cache::CachePolicy;

/// Application configuration.
///
/// Every field maps to an upper-case environment variable of the same name.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_url: String,
    /// Grace period for services to stop after a shutdown signal.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    pub google_client_id: String,
    pub google_client_secret: String,
    /// Where Google sends the user back after consent (`/auth/callback`).
    pub google_redirect_uri: String,
    #[serde(default = "default_google_auth_url")]
    pub google_auth_url: String,
    #[serde(default = "default_google_token_url")]
    pub google_token_url: String,
    #[serde(default = "default_gmail_api_base")]
    pub gmail_api_base: String,
    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    /// IANA zone name used for calendar events.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Gmail search expression selecting timetable mail.
    #[serde(default = "default_mail_query")]
    pub mail_query: String,
    #[serde(default = "default_mail_max_results")]
    pub mail_max_results: u32,
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default = "default_extractor_command")]
    pub extractor_command: PathBuf,

    #[serde(
        default = "default_poll_idle_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_idle_interval: Duration,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(default = "default_sync_concurrency")]
    pub sync_concurrency: usize,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    #[serde(
        default = "default_extract_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub extract_timeout: Duration,
    /// Budget for mirroring a whole timetable to the calendar, which takes
    /// one request per stale and per new event.
    #[serde(
        default = "default_calendar_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub calendar_timeout: Duration,
}

/// The subset of configuration each sync component is built from.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_results: u32,
    pub attachment_dir: PathBuf,
    pub cache_policy: CachePolicy,
    pub request_timeout: Duration,
    pub extract_timeout: Duration,
    pub calendar_timeout: Duration,
}

impl Config {
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            max_results: self.mail_max_results,
            attachment_dir: self.attachment_dir.clone(),
            cache_policy: self.cache_policy,
            request_timeout: self.request_timeout,
            extract_timeout: self.extract_timeout,
            calendar_timeout: self.calendar_timeout,
        }
    }

    /// Parsed [`Config::timezone`].
    pub fn tz(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid TIMEZONE '{}': {e}", self.timezone))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

fn default_calendar_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_mail_query() -> String {
    "has:attachment subject:timetable".to_string()
}

fn default_mail_max_results() -> u32 {
    10
}

fn default_attachment_dir() -> PathBuf {
    PathBuf::from("attachments")
}

fn default_extractor_command() -> PathBuf {
    PathBuf::from("ttsync-extract")
}

fn default_poll_idle_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_sync_concurrency() -> usize {
    1
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_extract_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_calendar_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Parse a human duration such as `90s`, `15m`, `1h30m`, or a bare number of
/// seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ]);

    let trimmed = raw.trim();
    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        // Split compound values like "1h30m" into "1h" + "30m".
        let unit_end = rest
            .char_indices()
            .skip_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .skip_while(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, _)| i)
            .next()
            .unwrap_or(rest.len());
        let (part, tail) = rest.split_at(unit_end);
        let parsed = parser
            .parse(part)
            .map_err(|e| format!("invalid duration '{trimmed}': {e}"))?;
        let part: Duration = parsed
            .try_into()
            .map_err(|e| format!("invalid duration '{trimmed}': {e}"))?;
        total += part;
        rest = tail.trim_start();
    }

    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    Ok(total)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
