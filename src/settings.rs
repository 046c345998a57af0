//! Application settings
//!
//! Stored as JSON in the app data directory. The API key is resolved from the
//! `ANTHROPIC_API_KEY` environment variable first, then from the settings file.
//! Settings are loaded once and handed to the components that need them; there
//! is no process-wide mutable settings state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    /// Override for the database file location (default: app data dir)
    #[serde(default)]
    pub custom_db_path: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Seconds before the analysis API call is abandoned as a network error
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Extra attempts after a transient network failure (0 = single attempt)
    #[serde(default = "default_max_retries")]
    pub analysis_max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub analysis_backoff_ms: u64,
    /// Direct extraction shorter than this falls back to OCR
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1500
}

fn default_min_text_chars() -> usize {
    50
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_ocr_dpi() -> u32 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            custom_db_path: None,
            model: default_model(),
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
            analysis_max_retries: default_max_retries(),
            analysis_backoff_ms: default_backoff_ms(),
            min_text_chars: default_min_text_chars(),
            ocr_language: default_ocr_language(),
            ocr_dpi: default_ocr_dpi(),
        }
    }
}

impl Settings {
    /// Load settings from disk or fall back to defaults.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Settings::default(),
            }
        } else {
            Settings::default()
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
    }

    /// Resolve the API key: environment variable wins over the settings file.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }
        self.anthropic_api_key.clone().filter(|k| !k.trim().is_empty())
    }

    pub fn db_path(&self) -> PathBuf {
        if let Some(custom) = &self.custom_db_path {
            return PathBuf::from(custom);
        }
        app_data_dir().join("quotedesk.db")
    }
}

/// Directory holding the settings file, database and logs.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("com.quotedesk.app"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

pub fn settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_survive_empty_json() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.min_text_chars, 50);
        assert_eq!(settings.ocr_language, "eng");
        assert_eq!(settings.ocr_dpi, 300);
        assert_eq!(settings.analysis_max_retries, 2);
        assert!(settings.anthropic_api_key.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"ocr_language": "chi_sim", "min_text_chars": 10}"#).unwrap();
        assert_eq!(settings.ocr_language, "chi_sim");
        assert_eq!(settings.min_text_chars, 10);
        assert_eq!(settings.ocr_dpi, 300);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let settings = Settings::load(Path::new("/nonexistent/settings.json"));
        assert_eq!(settings.model, default_model());
    }
}
