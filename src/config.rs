//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//!
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. `.sql-assistant.toml` in current directory
//! 4. `~/.config/sql-assistant/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//! cors_origins = ["http://localhost:3000"]   # empty or absent allows any
//!
//! [database]
//! path = "sql-assistant.db"
//! statement_timeout_ms = 30000
//!
//! [llm]
//! provider = "gemini"          # gemini, openai, anthropic, ollama
//! model = "gemini-pro-latest"
//! api_key = "..."              # or use LLM_API_KEY / GEMINI_API_KEY
//!
//! [speech]
//! api_key = "sk-..."           # or use SPEECH_API_KEY
//! ffmpeg = "ffmpeg"            # empty string forwards audio untouched
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `LLM_API_KEY` | API key for the language model provider |
//! | `GEMINI_API_KEY` | Gemini API key, used when `LLM_API_KEY` is unset |
//! | `LLM_PROVIDER` | Provider name |
//! | `LLM_MODEL` | Model identifier |
//! | `OLLAMA_URL` | Ollama base URL |
//! | `LLM_API_URL` | Base URL replacing the hosted provider endpoint |
//! | `CORS_ORIGINS` | Comma-separated browser origins |
//! | `DATABASE_PATH` | SQLite database file |
//! | `HOST` / `PORT` | Listen address |
//! | `SPEECH_API_KEY` | API key for the transcription service |
//! | `SPEECH_API_URL` | Base URL of the transcription service |

use std::{env, fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    error::{AppResult, config_error},
    speech::{DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_TRANSCRIPTION_URL}
};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server:   ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm:      LlmConfig,
    #[serde(default)]
    pub speech:   SpeechConfig
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host:             String,
    pub port:             u16,
    /// Largest accepted request body (schema or audio upload)
    pub max_upload_bytes: usize,
    /// Origins allowed to call the API from a browser; empty allows any
    pub cors_origins:     Vec<String>
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host:             String::from("0.0.0.0"),
            port:             8000,
            max_upload_bytes: 25 * 1024 * 1024,
            cors_origins:     Vec::new()
        }
    }
}

/// Live database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path:                 PathBuf,
    pub statement_timeout_ms: u64,
    pub busy_timeout_ms:      u64
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path:                 PathBuf::from("sql-assistant.db"),
            statement_timeout_ms: 30_000,
            busy_timeout_ms:      5_000
        }
    }
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider:     Option<String>,
    pub api_key:      Option<String>,
    pub model:        Option<String>,
    pub ollama_url:   Option<String>,
    /// Base URL replacing the hosted provider's endpoint
    pub api_url:      Option<String>,
    pub timeout_secs: u64
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider:     None,
            api_key:      None,
            model:        None,
            ollama_url:   Some(String::from("http://localhost:11434")),
            api_url:      None,
            timeout_secs: 60
        }
    }
}

/// Transcription service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub api_url:      String,
    pub api_key:      Option<String>,
    pub model:        String,
    pub language:     Option<String>,
    /// ffmpeg executable; empty disables transcoding
    pub ffmpeg:       String,
    pub timeout_secs: u64
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_url:      String::from(DEFAULT_TRANSCRIPTION_URL),
            api_key:      None,
            model:        String::from(DEFAULT_TRANSCRIPTION_MODEL),
            language:     None,
            ffmpeg:       String::from("ffmpeg"),
            timeout_secs: 60
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (.sql-assistant.toml)
    /// 3. Config file in home directory (~/.config/sql-assistant/config.toml)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("sql-assistant")
                .join("config.toml");
            if home_config.exists() {
                config = Self::from_file(&home_config)?;
            }
        }

        // Current directory config overrides home config
        let local_config = PathBuf::from(".sql-assistant.toml");
        if local_config.exists() {
            config = Self::from_file(&local_config)?;
        }

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| config_error(format!("Invalid config file: {}", e)))
    }

    /// Override fields from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>
    {
        if let Some(api_key) = lookup("LLM_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.llm.api_key = Some(api_key);
        }
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = Some(provider);
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.ollama_url = Some(url);
        }
        if let Some(url) = lookup("LLM_API_URL") {
            self.llm.api_url = Some(url);
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| config_error(format!("Invalid PORT '{}': {}", port, e)))?;
        }
        if let Some(key) = lookup("SPEECH_API_KEY") {
            self.speech.api_key = Some(key);
        }
        if let Some(url) = lookup("SPEECH_API_URL") {
            self.speech.api_url = url;
        }
        Ok(())
    }
}
