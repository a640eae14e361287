//! Shared constants/setters for things
//!

use std::num::NonZeroU16;

/// Default listener port.
pub const DEFAULT_PORT: NonZeroU16 = match NonZeroU16::new(3000) {
    Some(port) => port,
    None => NonZeroU16::MIN,
};

/// Default OpenAI-compatible endpoint for the story model.
pub const DEFAULT_API_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "meta/llama-3.2-11b-vision-instruct";

/// Default speech service, the one gTTS talks to.
pub const DEFAULT_TTS_BASE_URL: &str = "https://translate.google.com";

/// Narration language.
pub const DEFAULT_TTS_LANGUAGE: &str = "en";

/// The frontend dev server.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

/// Longest side of the image we send to the model.
pub const DEFAULT_MAX_DIMENSION: u32 = 600;

/// JPEG quality of the image we send to the model.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Uploads larger than this are rejected.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Base64 payloads above this many KB risk the provider's token ceiling.
pub const PAYLOAD_WARN_KB: f64 = 500.0;

/// Content types accepted by the upload endpoints.
pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// MIME type of the normalized image payload.
pub const PAYLOAD_MIME: &str = "image/jpeg";

/// Filename prefix of stored uploads.
pub const IMAGE_PREFIX: &str = "image-";

/// Filename prefix of generated narration.
pub const AUDIO_PREFIX: &str = "story-";

/// Extension of generated narration.
pub const AUDIO_EXTENSION: &str = "mp3";

/// Filename prefix of debug test uploads.
pub const TEST_UPLOAD_PREFIX: &str = "test-";

/// Public mount point of the upload directory.
pub const UPLOADS_ROUTE: &str = "/uploads";

/// How many recent files `/api/debug` lists per kind.
pub const RECENT_FILE_LIMIT: usize = 5;

/// Sampling temperature for story generation.
pub const STORY_TEMPERATURE: f32 = 0.7;

/// Output token ceiling for story generation.
pub const STORY_MAX_TOKENS: u32 = 1024;

/// Word count the prompt asks for. Advisory only.
pub const STORY_WORD_LIMIT: usize = 100;

/// System instruction for the story model.
pub const STORY_SYSTEM_PROMPT: &str = "You are a creative storyteller that creates imaginative, \
engaging, and family-friendly short stories based on images. Create a whimsical, positive \
narrative that captures the essence of the image. Your stories should have a clear beginning, \
middle, and end, with vivid descriptions. Avoid any adult, violent, political, or controversial \
themes. Keep the story under 100 words.";

/// Instruction sent alongside the image.
pub const STORY_USER_PROMPT: &str = "Generate a creative short story based on this image:";

/// The speech service rejects longer query strings.
pub const TTS_MAX_CHUNK_CHARS: usize = 100;
