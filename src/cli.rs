use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// SQL Query Assistant - Ask questions about your database in plain language
#[derive(Parser, Debug)]
#[command(name = "sql-query-assistant")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Listen address
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        common: CommonArgs
    },
    /// Answer a single question and print the result as JSON
    Ask {
        /// Question in natural language
        question: String,

        /// Upload this schema file before answering
        #[arg(short, long)]
        schema: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs
    }
}

/// Options shared by all commands
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// SQLite database file
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// LLM provider to use
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// API key for the LLM provider
    #[arg(short, long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Ollama base URL
    #[arg(long)]
    pub ollama_url: Option<String>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Gemini,
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
    Ollama
}

impl Provider {
    /// Get default model for provider
    pub fn default_model(&self) -> &str {
        match self {
            Self::Gemini => "gemini-pro-latest",
            Self::OpenAI => "gpt-4",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Ollama => "llama3.2"
        }
    }

    /// Whether the provider needs an API key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}
