use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_DATA_DIR: &str = ".thumbsmith";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

const API_KEY_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Process-level settings for a studio session.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub data_dir: PathBuf,
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub request_timeout_s: f64,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            text_model: None,
            image_model: None,
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = API_KEY_VARS.iter().find_map(|key| lookup(key));
        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let data_dir = lookup("THUMBSMITH_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let request_timeout_s = clamp_timeout(
            lookup("THUMBSMITH_REQUEST_TIMEOUT").and_then(|value| value.parse::<f64>().ok()),
        );
        Self {
            data_dir,
            text_model: None,
            image_model: None,
            api_key,
            api_base,
            request_timeout_s,
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout_s = clamp_timeout(Some(seconds));
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }
}

fn clamp_timeout(value: Option<f64>) -> f64 {
    match value {
        Some(seconds) if seconds.is_finite() => {
            seconds.clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S)
        }
        _ => DEFAULT_REQUEST_TIMEOUT_S,
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
