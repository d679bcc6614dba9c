use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::{GenerationConfig, DEFAULT_API_URL, DEFAULT_MODEL};

/// Application configuration loaded from environment variables.
/// Fails at startup on malformed values; credentials may be absent.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means chat history lives in memory only.
    pub database_url: Option<String>,
    /// JSON array of resume rows served when there is no database.
    pub resumes_file: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub reveal_tick_ms: u64,
    /// Idle, unobserved conversations are dropped from memory after this long.
    pub conversation_idle_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            resumes_file: optional_env("RESUMES_FILE"),
            llm_api_key: optional_env("LLM_API_KEY"),
            llm_api_url: optional_env("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            llm_model: optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_temperature: optional_env("LLM_TEMPERATURE")
                .unwrap_or_else(|| "0.7".to_string())
                .parse::<f32>()
                .context("LLM_TEMPERATURE must be a number")?,
            reveal_tick_ms: optional_env("REVEAL_TICK_MS")
                .unwrap_or_else(|| "15".to_string())
                .parse::<u64>()
                .context("REVEAL_TICK_MS must be a whole number of milliseconds")?,
            conversation_idle_secs: optional_env("CONVERSATION_IDLE_SECS")
                .unwrap_or_else(|| "1800".to_string())
                .parse::<u64>()
                .context("CONVERSATION_IDLE_SECS must be a whole number of seconds")?,
            port: optional_env("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The single source of truth handed to the generation client.
    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            api_key: self.llm_api_key.clone(),
            api_url: self.llm_api_url.clone(),
            model: self.llm_model.clone(),
            temperature: self.llm_temperature,
        }
    }

    pub fn reveal_tick(&self) -> Duration {
        Duration::from_millis(self.reveal_tick_ms.max(1))
    }

    pub fn conversation_idle(&self) -> Duration {
        Duration::from_secs(self.conversation_idle_secs.max(1))
    }
}

/// Blank values count as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
