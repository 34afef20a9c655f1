//! HTTP surface.
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | POST | `/api/schema` | multipart `file` | `{message}` |
//! | POST | `/api/text-query` | `{"query": ...}` | `{query, sql_query, result, message}` |
//! | POST | `/api/speech-query` | multipart `audio_file` | same as text query |
//! | GET | `/api/health` | | `{status, schema_loaded}` |
//!
//! Failures, including bodies the extractors reject, are rendered as
//! `{"detail": ...}` with the status code of the corresponding [`QueryError`].
//! Browser clients on other origins are allowed through a CORS layer.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::Field,
        multipart::MultipartRejection,
        rejection::JsonRejection
    },
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post}
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::{
    error::{AppResult, QueryError, config_error, server_error},
    executor::Row,
    pipeline::{QueryAnswer, QueryPipeline},
    schema::SchemaStore,
    speech::{AudioClip, SpeechRecognizer}
};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store:    Arc<SchemaStore>,
    pub pipeline: Arc<QueryPipeline>,
    pub speech:   Arc<SpeechRecognizer>
}

impl AppState {
    pub fn new(pipeline: QueryPipeline, speech: SpeechRecognizer) -> Self {
        Self {
            store:    pipeline.store().clone(),
            pipeline: Arc::new(pipeline),
            speech:   Arc::new(speech)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TextQuery {
    pub query: String
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String
}

/// Wire shape of an answered question
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query:     String,
    pub sql_query: String,
    pub result:    Vec<Row>,
    pub message:   String
}

impl From<QueryAnswer> for QueryResponse {
    fn from(answer: QueryAnswer) -> Self {
        let message = answer.result.message.clone();
        Self {
            query: answer.query,
            sql_query: answer.sql_query,
            result: answer.result.into_rows(),
            message
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status:        String,
    pub schema_loaded: bool
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();
        if self.is_client_error() {
            warn!(%status, %detail, "request rejected");
        } else {
            error!(%status, %detail, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                detail
            })
        )
            .into_response()
    }
}

/// CORS policy for the given origins; an empty list allows any origin
pub fn cors_layer(origins: &[String]) -> AppResult<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|e| config_error(format!("Invalid CORS origin '{}': {}", origin, e)))
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Build the router with the upload size limit and CORS policy applied
pub fn create_router(state: AppState, max_upload_bytes: usize, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/schema", post(upload_schema))
        .route("/api/text-query", post(text_query))
        .route("/api/speech-query", post(speech_query))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(addr: SocketAddr, router: Router) -> AppResult<()> {
    info!(%addr, "listening");
    axum::Server::try_bind(&addr)
        .map_err(|e| server_error(format!("Failed to bind {}: {}", addr, e)))?
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| server_error(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status:        String::from("ok"),
        schema_loaded: state.store.has_schema().await
    })
}

async fn upload_schema(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>
) -> Result<Json<MessageResponse>, QueryError> {
    let (_, bytes) = read_upload(multipart.map_err(invalid_request)?, "file").await?;
    let ddl = String::from_utf8(bytes)
        .map_err(|_| QueryError::Schema("schema file is not valid UTF-8".into()))?;
    state.store.replace_schema(&ddl).await?;
    Ok(Json(MessageResponse {
        message: String::from("Schema uploaded and database reset successfully")
    }))
}

async fn text_query(
    State(state): State<AppState>,
    body: Result<Json<TextQuery>, JsonRejection>
) -> Result<Json<QueryResponse>, QueryError> {
    let Json(body) = body.map_err(invalid_request)?;
    let answer = state.pipeline.answer(&body.query).await?;
    Ok(Json(answer.into()))
}

async fn speech_query(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>
) -> Result<Json<QueryResponse>, QueryError> {
    let (file_name, bytes) =
        read_upload(multipart.map_err(invalid_request)?, "audio_file").await?;
    let clip = AudioClip::from_upload(bytes, file_name.as_deref());
    let question = state.speech.recognize(clip).await?;
    let answer = state.pipeline.answer(&question).await?;
    Ok(Json(answer.into()))
}

fn invalid_request(rejection: impl std::fmt::Display) -> QueryError {
    QueryError::InvalidRequest(rejection.to_string())
}

/// Read the named file field, falling back to the first field with a file name.
async fn read_upload(
    mut multipart: Multipart,
    field_name: &str
) -> Result<(Option<String>, Vec<u8>), QueryError> {
    let mut fallback = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| QueryError::InvalidRequest(e.to_string()))?
    {
        let is_named = field.name() == Some(field_name);
        if is_named || (fallback.is_none() && field.file_name().is_some()) {
            let upload = read_field(field).await?;
            if is_named {
                return Ok(upload);
            }
            fallback = Some(upload);
        }
    }
    fallback.ok_or_else(|| QueryError::InvalidRequest(format!("missing '{}' file field", field_name)))
}

async fn read_field(field: Field<'_>) -> Result<(Option<String>, Vec<u8>), QueryError> {
    let file_name = field.file_name().map(String::from);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| QueryError::InvalidRequest(e.to_string()))?;
    Ok((file_name, bytes.to_vec()))
}
