//! Speech input: audio transcoding and transcription.
//!
//! Uploaded audio arrives in whatever container the browser recorded
//! (webm, ogg, mp3, m4a, ...). [`SpeechRecognizer`] converts it to 16 kHz
//! mono WAV with `ffmpeg` and hands the result to a [`Transcriber`]. Two
//! failure kinds are kept apart: [`QueryError::NotUnderstood`] when the audio
//! itself is the problem, and [`QueryError::TranscriptionUnavailable`] when
//! the tooling or the remote service is.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::Duration
};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

use crate::error::{QueryError, describe_http_error};

/// Default OpenAI-compatible transcription endpoint
pub const DEFAULT_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1";

/// Default transcription model
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Uploaded or transcoded audio payload.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes:  Vec<u8>,
    /// Container format hint, usually the upload's file extension
    pub format: Option<String>
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, format: Option<String>) -> Self {
        Self {
            bytes,
            format
        }
    }

    /// Derive the format hint from a file name such as `recording.webm`
    pub fn from_upload(bytes: Vec<u8>, file_name: Option<&str>) -> Self {
        let format = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty());
        Self::new(bytes, format)
    }

    fn file_name(&self) -> String {
        format!("audio.{}", self.format.as_deref().unwrap_or("wav"))
    }
}

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Return the recognized text.
    ///
    /// Implementations return [`QueryError::NotUnderstood`] when no speech
    /// was recognized and [`QueryError::TranscriptionUnavailable`] when the
    /// service could not be used.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, QueryError>;
}

/// Stand-in used when no transcription credentials are configured.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredTranscriber;

#[async_trait]
impl Transcriber for UnconfiguredTranscriber {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, QueryError> {
        Err(QueryError::TranscriptionUnavailable(
            "speech recognition is not configured on the server".into()
        ))
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String
}

/// Client for OpenAI-compatible `/audio/transcriptions` endpoints.
pub struct WhisperTranscriber {
    client:   reqwest::Client,
    base_url: String,
    api_key:  Option<String>,
    model:    String,
    language: Option<String>
}

impl WhisperTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            language: None
        }
    }

    /// Hint the spoken language (ISO-639-1)
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, QueryError> {
        let part = Part::bytes(clip.bytes.clone()).file_name(clip.file_name());
        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| QueryError::TranscriptionUnavailable(describe_http_error(&e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // 4xx on a well-formed request means the service rejected the audio
            if status.as_u16() == 400 || status.as_u16() == 422 {
                debug!(%status, body = %text, "transcription service rejected audio");
                return Err(QueryError::NotUnderstood);
            }
            return Err(QueryError::TranscriptionUnavailable(format!(
                "transcription API error {}: {}",
                status, text
            )));
        }
        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| QueryError::TranscriptionUnavailable(describe_http_error(&e)))?;
        let text = result.text.trim();
        if text.is_empty() {
            return Err(QueryError::NotUnderstood);
        }
        Ok(text.to_string())
    }
}

/// Converts uploaded audio into the waveform the transcriber expects.
#[derive(Debug, Clone)]
pub struct AudioTranscoder {
    ffmpeg:  PathBuf,
    timeout: Duration
}

impl AudioTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout
        }
    }

    /// Transcode `clip` to 16 kHz mono 16-bit PCM WAV.
    ///
    /// # Errors
    ///
    /// - [`QueryError::TranscriptionUnavailable`] if ffmpeg cannot be run or
    ///   exceeds the time limit
    /// - [`QueryError::NotUnderstood`] if ffmpeg cannot decode the audio
    pub async fn to_wav(&self, clip: &AudioClip) -> Result<AudioClip, QueryError> {
        let mut command = Command::new(&self.ffmpeg);
        command.args(["-hide_banner", "-loglevel", "error"]);
        if let Some(format) = clip.format.as_deref().and_then(demuxer_for) {
            command.args(["-f", format]);
        }
        command
            .args(["-i", "pipe:0", "-ac", "1", "-ar", "16000", "-f", "wav", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| {
            QueryError::TranscriptionUnavailable(format!(
                "failed to start '{}': {}",
                self.ffmpeg.display(),
                e
            ))
        })?;
        let mut stdin = child.stdin.take().ok_or_else(|| {
            QueryError::TranscriptionUnavailable("ffmpeg stdin unavailable".into())
        })?;
        let input = clip.bytes.clone();
        let writer = tokio::spawn(async move {
            // ffmpeg may stop reading early on bad input; the exit status reports that
            let _ = stdin.write_all(&input).await;
            let _ = stdin.shutdown().await;
        });
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                QueryError::TranscriptionUnavailable(format!(
                    "audio transcoding exceeded {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| QueryError::TranscriptionUnavailable(format!("ffmpeg failed: {}", e)))?;
        let _ = writer.await;
        if !output.status.success() || output.stdout.is_empty() {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ffmpeg could not decode audio"
            );
            return Err(QueryError::NotUnderstood);
        }
        Ok(AudioClip::new(output.stdout, Some("wav".into())))
    }
}

/// Container formats whose demuxer name differs from the extension or that
/// ffmpeg cannot probe reliably from a pipe.
fn demuxer_for(extension: &str) -> Option<&'static str> {
    match extension {
        "webm" | "mkv" => Some("matroska"),
        "m4a" | "mp4" | "aac" => Some("mov"),
        "oga" | "ogg" | "opus" => Some("ogg"),
        "mp3" => Some("mp3"),
        "wav" => Some("wav"),
        "flac" => Some("flac"),
        _ => None
    }
}

/// Audio → text: optional transcoding followed by transcription.
#[derive(Clone)]
pub struct SpeechRecognizer {
    transcoder:  Option<AudioTranscoder>,
    transcriber: Arc<dyn Transcriber>
}

impl SpeechRecognizer {
    /// Recognizer that forwards audio as uploaded
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcoder: None,
            transcriber
        }
    }

    pub fn with_transcoder(mut self, transcoder: AudioTranscoder) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Turn an uploaded clip into a question
    pub async fn recognize(&self, clip: AudioClip) -> Result<String, QueryError> {
        if clip.bytes.is_empty() {
            return Err(QueryError::InvalidRequest("No audio file provided".into()));
        }
        let clip = match &self.transcoder {
            Some(transcoder) => transcoder.to_wav(&clip).await?,
            None => clip
        };
        let text = self.transcriber.transcribe(&clip).await?;
        debug!(%text, "audio transcribed");
        Ok(text)
    }
}
