//! Narration: text in, MP3 on disk out.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::constants::TTS_MAX_CHUNK_CHARS;
use crate::error::PixtaleError;
use crate::storage::{RequestId, UploadStore};

/// A text-to-speech backend.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// MP3 bytes for `text`.
    async fn speak(&self, text: &str) -> Result<Vec<u8>, PixtaleError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// The hosted Google Translate speech endpoint, the same one gTTS uses.
#[derive(Clone, Debug)]
pub struct TranslateSpeech {
    client: reqwest::Client,
    endpoint: Url,
    language: String,
}

impl TranslateSpeech {
    /// Builds an engine from the service configuration.
    pub fn from_config(config: &Config) -> Result<Self, PixtaleError> {
        let base = config.tts_base_url.trim_end_matches('/');
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: Url::parse(&format!("{base}/translate_tts"))?,
            language: config.tts_language.clone(),
        })
    }

    fn chunk_url(&self, chunk: &str, index: usize, total: usize) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("ie", "UTF-8")
            .append_pair("q", chunk)
            .append_pair("tl", &self.language)
            .append_pair("total", &total.to_string())
            .append_pair("idx", &index.to_string())
            .append_pair("textlen", &chunk.chars().count().to_string())
            .append_pair("client", "tw-ob")
            .append_pair("ttsspeed", "1");
        url
    }
}

#[async_trait]
impl SpeechEngine for TranslateSpeech {
    async fn speak(&self, text: &str) -> Result<Vec<u8>, PixtaleError> {
        let chunks = split_text(text, TTS_MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(PixtaleError::Provider("no text to speak".to_string()));
        }

        let mut audio = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            debug!(
                "Speech chunk {}/{}: {} chars",
                index + 1,
                chunks.len(),
                chunk.len()
            );
            let resp = self
                .client
                .get(self.chunk_url(chunk, index, chunks.len()))
                .send()
                .await
                .map_err(|err| PixtaleError::Provider(format!("speech request failed: {err}")))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(PixtaleError::Provider(format!(
                    "speech service returned {status}: {body}"
                )));
            }
            let bytes = resp.bytes().await.map_err(|err| {
                PixtaleError::Provider(format!("failed reading speech body: {err}"))
            })?;
            audio.extend_from_slice(&bytes);
        }
        Ok(audio)
    }

    fn name(&self) -> &str {
        "google-translate-tts"
    }
}

/// Splits text into pieces of at most `max_chars` characters, breaking after
/// sentence punctuation, then between words, then inside over-long words.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        for piece in split_word(word, max_chars) {
            let piece_len = piece.chars().count();
            if current_len > 0 && current_len + 1 + piece_len > max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(piece);
            current_len += piece_len;

            if piece.ends_with(['.', '!', '?']) {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_word(word: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in word.char_indices() {
        if count == max_chars {
            pieces.push(&word[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&word[start..]);
    pieces
}

/// Turns story text into `story-<id>.mp3` in the upload directory.
#[derive(Clone)]
pub struct Synthesizer {
    engine: Arc<dyn SpeechEngine>,
    store: UploadStore,
}

impl Synthesizer {
    /// Pairs an engine with the directory its output goes to.
    pub fn new(engine: Arc<dyn SpeechEngine>, store: UploadStore) -> Self {
        Self { engine, store }
    }

    /// Narrates `text` and writes it under the name derived from `id`.
    pub async fn synthesize(&self, text: &str, id: RequestId) -> Result<PathBuf, PixtaleError> {
        self.store.ensure_dir().await?;
        info!("Synthesizing speech with {}", self.engine.name());
        let audio = self.engine.speak(text).await?;
        if audio.is_empty() {
            return Err(PixtaleError::Provider(format!(
                "{} returned no audio",
                self.engine.name()
            )));
        }
        self.store.write_audio(id, &audio).await
    }
}
