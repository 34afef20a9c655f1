//! Application wiring for the SQL Query Assistant binary.
//!
//! Turns CLI arguments and [`Config`] into a running service. Kept apart from
//! `main` so that every step can be exercised from tests.

use std::{fs::read_to_string, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::ValueEnum;
use tracing::{debug, info, warn};

use crate::{
    cli::{CommonArgs, Provider},
    config::Config,
    error::{AppResult, config_error, file_read_error},
    executor::SqlExecutor,
    llm::{LanguageModel, LlmClient, LlmProvider, UnconfiguredModel},
    pipeline::{QueryAnswer, QueryPipeline},
    schema::SchemaStore,
    server::{AppState, cors_layer, create_router, serve},
    speech::{
        AudioTranscoder, SpeechRecognizer, Transcriber, UnconfiguredTranscriber,
        WhisperTranscriber
    },
    translator::QueryTranslator
};

/// Apply command-line overrides on top of loaded configuration
pub fn apply_cli_overrides(config: &mut Config, args: &CommonArgs) {
    if let Some(path) = &args.database {
        config.database.path = path.clone();
    }
    if let Some(provider) = args.provider {
        config.llm.provider = provider
            .to_possible_value()
            .map(|value| value.get_name().to_string());
    }
    if let Some(key) = &args.api_key {
        config.llm.api_key = Some(key.clone());
    }
    if let Some(model) = &args.model {
        config.llm.model = Some(model.clone());
    }
    if let Some(url) = &args.ollama_url {
        config.llm.ollama_url = Some(url.clone());
    }
}

/// Resolve the configured provider name, defaulting to Gemini
pub fn resolve_provider(name: Option<&str>) -> AppResult<Provider> {
    match name {
        None => Ok(Provider::Gemini),
        Some(name) => Provider::from_str(name.trim(), true).map_err(|_| {
            config_error(format!(
                "Unknown LLM provider '{}' (expected gemini, openai, anthropic or ollama)",
                name
            ))
        })
    }
}

/// Build LLM provider from configuration.
///
/// Returns `None` when the provider needs an API key and none is set.
pub fn build_llm_provider(config: &Config) -> AppResult<Option<LlmProvider>> {
    let provider = resolve_provider(config.llm.provider.as_deref())?;
    let model = config
        .llm
        .model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());
    let api_key = config.llm.api_key.clone().filter(|k| !k.trim().is_empty());
    if provider.requires_api_key() && api_key.is_none() {
        return Ok(None);
    }
    let api_key = api_key.unwrap_or_default();
    Ok(Some(match provider {
        Provider::Gemini => LlmProvider::Gemini {
            api_key,
            model
        },
        Provider::OpenAI => LlmProvider::OpenAI {
            api_key,
            model
        },
        Provider::Anthropic => LlmProvider::Anthropic {
            api_key,
            model
        },
        Provider::Ollama => LlmProvider::Ollama {
            base_url: config
                .llm
                .ollama_url
                .clone()
                .unwrap_or_else(|| String::from("http://localhost:11434")),
            model
        }
    }))
}

/// Language model for the configured provider, or a stand-in that reports
/// the missing credential
pub fn build_language_model(config: &Config) -> AppResult<Arc<dyn LanguageModel>> {
    match build_llm_provider(config)? {
        Some(provider) => {
            info!(
                provider = provider.name(),
                model = provider.model(),
                "language model configured"
            );
            Ok(Arc::new(
                LlmClient::new(provider).with_api_base(config.llm.api_url.clone())
            ))
        }
        None => {
            warn!("no LLM API key configured; text and speech queries will fail");
            Ok(Arc::new(UnconfiguredModel::new("LLM_API_KEY")))
        }
    }
}

/// Speech recognizer from configuration
pub fn build_speech(config: &Config) -> SpeechRecognizer {
    let speech = &config.speech;
    let timeout = Duration::from_secs(speech.timeout_secs);
    let transcriber: Arc<dyn Transcriber> = match &speech.api_key {
        Some(key) if !key.trim().is_empty() => Arc::new(
            WhisperTranscriber::new(&speech.api_url, Some(key.clone()), &speech.model, timeout)
                .with_language(speech.language.clone())
        ),
        _ => {
            warn!("no SPEECH_API_KEY configured; speech queries will fail");
            Arc::new(UnconfiguredTranscriber)
        }
    };
    let recognizer = SpeechRecognizer::new(transcriber);
    if speech.ffmpeg.trim().is_empty() {
        recognizer
    } else {
        recognizer.with_transcoder(AudioTranscoder::new(speech.ffmpeg.trim(), timeout))
    }
}

/// Build the query pipeline around an already opened store
pub fn build_pipeline(
    config: &Config,
    store: Arc<SchemaStore>,
    model: Arc<dyn LanguageModel>
) -> QueryPipeline {
    let translator =
        QueryTranslator::with_timeout(model, Duration::from_secs(config.llm.timeout_secs));
    let executor = SqlExecutor::new(config.database.statement_timeout());
    debug!(
        statement_timeout_ms = executor.timeout().as_millis() as u64,
        generation_timeout_secs = config.llm.timeout_secs,
        "query pipeline ready"
    );
    QueryPipeline::new(store, translator, executor)
}

/// Open the store and assemble all request-handling state
pub fn build_state(config: &Config) -> AppResult<AppState> {
    let store = Arc::new(SchemaStore::open(
        &config.database.path,
        config.database.busy_timeout()
    )?);
    let model = build_language_model(config)?;
    let pipeline = build_pipeline(config, store, model);
    Ok(AppState::new(pipeline, build_speech(config)))
}

/// Run the HTTP service
pub async fn run_serve(config: Config) -> AppResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| config_error(format!("Invalid listen address: {}", e)))?;
    let cors = cors_layer(&config.server.cors_origins)?;
    let state = build_state(&config)?;
    info!(
        database = %state.store.path().display(),
        schema_loaded = state.store.has_schema().await,
        "database ready"
    );
    let router = create_router(state, config.server.max_upload_bytes, cors);
    serve(addr, router).await
}

/// Answer one question from the command line
pub async fn run_ask(
    config: Config,
    question: &str,
    schema: Option<&Path>
) -> AppResult<QueryAnswer> {
    let state = build_state(&config)?;
    if let Some(path) = schema {
        let display = path.display().to_string();
        let ddl = read_to_string(path).map_err(|e| file_read_error(&display, e))?;
        state.store.replace_schema(&ddl).await?;
    }
    Ok(state.pipeline.answer(question).await?)
}
