use crate::config_store::LoadPolicy;
use crate::report_cache::CachePolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct Settings {
    pub http_addr: String,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub settings_file: PathBuf,
    pub last_report_file: PathBuf,
    pub report_cache: CachePolicy,
    pub config_load_policy: LoadPolicy,
    pub textgen: TextGenSettings,
    pub report_marker: Option<String>,
    pub report_history: usize,
    pub notify_url: Option<String>,
    pub notify_chat_id: Option<String>,
    pub notify_timeout: Duration,
    pub export_url: Option<String>,
    pub export_timeout: Duration,
}

#[derive(Clone)]
pub struct TextGenSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

// Keeps the API key out of startup logs.
impl std::fmt::Debug for TextGenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextGenSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| ".".to_string()));
        let in_data_dir = |key: &str, default: &str| {
            data_dir.join(get(key).unwrap_or_else(|| default.to_string()))
        };

        let report_cache = parse_or(get("REPORT_CACHE"), "REPORT_CACHE", CachePolicy::Global);
        let default_cache_file = match report_cache {
            CachePolicy::Global => "last_report.txt",
            CachePolicy::PerDevice => "last_reports.json",
        };

        Self {
            http_addr: get("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            log_file: in_data_dir("LOG_FILE", "log.csv"),
            settings_file: in_data_dir("SETTINGS_FILE", "settings.json"),
            last_report_file: in_data_dir("LAST_REPORT_FILE", default_cache_file),
            report_cache,
            config_load_policy: parse_or(
                get("CONFIG_LOAD_POLICY"),
                "CONFIG_LOAD_POLICY",
                LoadPolicy::Strict,
            ),
            textgen: TextGenSettings {
                url: get("TEXTGEN_URL").unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
                api_key: get("TEXTGEN_API_KEY").or_else(|| get("OPENAI_API_KEY")),
                model: get("TEXTGEN_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
                timeout: secs(get("TEXTGEN_TIMEOUT_SECS"), "TEXTGEN_TIMEOUT_SECS", 8),
            },
            report_marker: get("REPORT_MARKER"),
            report_history: parse_or(get("REPORT_HISTORY"), "REPORT_HISTORY", 5),
            notify_url: get("NOTIFY_URL"),
            notify_chat_id: get("NOTIFY_CHAT_ID"),
            notify_timeout: secs(get("NOTIFY_TIMEOUT_SECS"), "NOTIFY_TIMEOUT_SECS", 3),
            export_url: get("EXPORT_URL"),
            export_timeout: secs(get("EXPORT_TIMEOUT_SECS"), "EXPORT_TIMEOUT_SECS", 3),
            data_dir,
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Ignoring invalid {}='{}': {}", key, raw, e);
            default
        }),
    }
}

fn secs(value: Option<String>, key: &str, default: u64) -> Duration {
    Duration::from_secs(parse_or(value, key, default))
}
