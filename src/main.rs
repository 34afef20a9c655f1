//! # SQL Query Assistant
//!
//! Ask questions about a database in plain language, typed or spoken.
//!
//! `sql-query-assistant` is a small HTTP service. Upload a schema as DDL, then
//! send questions; each question is turned into a single SQL statement by a
//! language model, executed against a SQLite database built from the schema,
//! and returned with its rows (or the number of rows it changed).
//!
//! # Architecture
//!
//! A request flows through four stages:
//!
//! 1. **Schema** - the active DDL and the live database built from it
//! 2. **Translation** - prompt construction and output cleanup around a
//!    language model (Gemini, OpenAI, Anthropic or Ollama)
//! 3. **Execution** - one statement, one transaction, with a time limit
//! 4. **Normalization** - rows or an affected-row count plus a message
//!
//! Spoken questions are transcoded with `ffmpeg` and transcribed by an
//! OpenAI-compatible transcription endpoint before entering the same flow.
//!
//! # Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY="..."
//! sql-query-assistant serve --port 8000
//!
//! curl -F file=@schema.sql http://localhost:8000/api/schema
//! curl -H 'content-type: application/json' \
//!      -d '{"query": "how many users signed up today"}' \
//!      http://localhost:8000/api/text-query
//!
//! # One-off question without the server
//! sql-query-assistant ask "list all tables" --schema schema.sql
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of precedence):
//!
//! 1. Command-line arguments
//! 2. Environment variables (`LLM_API_KEY`, `GEMINI_API_KEY`, `PORT`, etc.)
//! 3. `.sql-assistant.toml` in current directory
//! 4. `~/.config/sql-assistant/config.toml`
//!
//! Logging is controlled with `RUST_LOG` (default `info`).
//!
//! # Exit Codes
//!
//! - `0` - Success
//! - `1` - Configuration, startup or query failure

use std::process;

use clap::Parser;
use sql_query_assistant::{
    app::{apply_cli_overrides, run_ask, run_serve},
    cli::{Cli, Commands},
    config::Config,
    error::{AppResult, server_error}
};
use tokio::main;
use tracing_subscriber::EnvFilter;

#[main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            common
        } => {
            apply_cli_overrides(&mut config, &common);
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_serve(config).await
        }
        Commands::Ask {
            question,
            schema,
            common
        } => {
            apply_cli_overrides(&mut config, &common);
            let answer = run_ask(config, &question, schema.as_deref()).await?;
            let json = serde_json::to_string_pretty(&answer)
                .map_err(|e| server_error(format!("Failed to encode answer: {}", e)))?;
            println!("{}", json);
            Ok(())
        }
    }
}
