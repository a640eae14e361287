//! CLI parser
use clap::Parser;
use std::num::NonZeroU16;
use std::path::PathBuf;

use crate::config::{Config, Environment};
use crate::constants::{
    DEFAULT_ALLOWED_ORIGIN, DEFAULT_API_BASE_URL, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION,
    DEFAULT_MODEL, DEFAULT_TTS_BASE_URL, DEFAULT_TTS_LANGUAGE,
};

#[derive(Parser, Debug, Clone)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "PIXTALE_DEBUG")]
    /// Enable debug logging. Env: PIXTALE_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "3000", env = "PIXTALE_PORT")]
    /// http listener, defaults to `3000`.
    /// Env: PIXTALE_PORT
    pub port: NonZeroU16,
    #[clap(long, short, default_value = "0.0.0.0", env = "PIXTALE_LISTEN_ADDRESS")]
    /// Listen address, defaults to `0.0.0.0`.
    /// Env: PIXTALE_LISTEN_ADDRESS
    pub listen_address: String,
    #[clap(long, short, default_value = "./uploads", env = "PIXTALE_UPLOAD_DIR")]
    /// Where uploaded images and generated audio live.
    /// Env: PIXTALE_UPLOAD_DIR
    pub upload_dir: PathBuf,

    #[clap(long, env = "NVIDIA_API_KEY", hide_env_values = true)]
    /// Credential for the story model. Env: NVIDIA_API_KEY
    pub api_key: Option<String>,
    #[clap(long, default_value = DEFAULT_API_BASE_URL, env = "PIXTALE_API_BASE_URL")]
    /// OpenAI-compatible base URL for the story model.
    /// Env: PIXTALE_API_BASE_URL
    pub api_base_url: String,
    #[clap(long, default_value = DEFAULT_MODEL, env = "PIXTALE_MODEL")]
    /// Vision model used to write stories. Env: PIXTALE_MODEL
    pub model: String,

    #[clap(long, default_value = DEFAULT_TTS_BASE_URL, env = "PIXTALE_TTS_BASE_URL")]
    /// Base URL of the speech service. Env: PIXTALE_TTS_BASE_URL
    pub tts_base_url: String,
    #[clap(long, default_value = DEFAULT_TTS_LANGUAGE, env = "PIXTALE_TTS_LANGUAGE")]
    /// Narration language. Env: PIXTALE_TTS_LANGUAGE
    pub tts_language: String,

    #[clap(
        long,
        default_value = DEFAULT_ALLOWED_ORIGIN,
        env = "PIXTALE_ALLOWED_ORIGINS",
        value_delimiter = ','
    )]
    /// Origins allowed to call the API, comma separated.
    /// Env: PIXTALE_ALLOWED_ORIGINS
    pub allowed_origins: Vec<String>,
    #[clap(long, value_enum, default_value = "production", env = "PIXTALE_ENV")]
    /// `development` exposes error detail to callers. Env: PIXTALE_ENV
    pub mode: Environment,

    #[clap(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "PIXTALE_MAX_DIMENSION")]
    /// Longest side (pixels) of the image sent to the model.
    /// Env: PIXTALE_MAX_DIMENSION
    pub max_dimension: u32,
    #[clap(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "PIXTALE_JPEG_QUALITY")]
    /// JPEG quality for the model payload. Env: PIXTALE_JPEG_QUALITY
    pub quality: u8,
}

impl CliOptions {
    /// Builds the runtime configuration from parsed options.
    pub fn to_config(&self) -> Config {
        let mut config = Config::new(self.upload_dir.clone());
        config.listen_address = self.listen_address.clone();
        config.port = self.port;
        config.api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        config.api_base_url = self.api_base_url.clone();
        config.model = self.model.clone();
        config.tts_base_url = self.tts_base_url.clone();
        config.tts_language = self.tts_language.clone();
        config.allowed_origins = self
            .allowed_origins
            .iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        config.environment = self.mode;
        config.max_dimension = self.max_dimension;
        config.quality = self.quality;
        config
    }
}
