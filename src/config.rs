// Process-wide configuration, resolved once at startup and passed by
// reference to the HTTP clients. Credentials are never re-read per call.

use std::env;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://www.googleapis.com/customsearch/v1";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key. Absence is a fatal configuration error for any chat
    /// request, surfaced when the LLM is actually called.
    pub google_api_key: Option<String>,
    /// Custom Search credentials. Absence degrades search to empty results
    /// rather than failing the chat flow.
    pub search_api_key: Option<String>,
    pub search_engine_id: Option<String>,
    pub gemini_base_url: String,
    pub search_base_url: String,
    pub model: String,
    /// Path of the static instructions dataset (JSON), read once at startup.
    pub data_path: String,
    /// Directory backing the file key-value store for workspaces.
    pub storage_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            google_api_key: non_empty_var("GOOGLE_API_KEY"),
            search_api_key: non_empty_var("GOOGLE_SEARCH_API_KEY"),
            search_engine_id: non_empty_var("GOOGLE_SEARCH_ENGINE_ID"),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
            search_base_url: env::var("SEARCH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_SEARCH_BASE_URL.to_string()),
            model: env::var("SCOUT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            data_path: env::var("SCOUT_DATA_PATH").unwrap_or_else(|_| "data.json".to_string()),
            storage_dir: env::var("SCOUT_STORAGE_DIR").unwrap_or_else(|_| ".scout".to_string()),
        }
    }
}

// Treat empty-string variables the same as unset ones so that an `.env`
// template with blank values does not look like a configured credential.
fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}
