//! Config handling

use std::num::NonZeroU16;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::Serialize;
use tracing::log::LevelFilter;

use crate::constants::{
    DEFAULT_ALLOWED_ORIGIN, DEFAULT_API_BASE_URL, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION,
    DEFAULT_MODEL, DEFAULT_PORT, DEFAULT_TTS_BASE_URL, DEFAULT_TTS_LANGUAGE, MAX_UPLOAD_BYTES,
};

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// Which way the service faces; controls how much error detail callers see.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Internal error detail is returned to callers.
    Development,
    /// Callers only get a generic message.
    #[default]
    Production,
}

impl Environment {
    /// True when error detail may be shown to the caller.
    pub fn exposes_errors(self) -> bool {
        self == Environment::Development
    }
}

/// Everything the components need, built once at startup and handed down explicitly.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub listen_address: String,
    /// Port the HTTP listener binds to.
    pub port: NonZeroU16,
    /// Shared directory for uploaded images and generated audio.
    pub upload_dir: PathBuf,
    /// Story model credential; `None` means story requests fail fast.
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL, eg `https://integrate.api.nvidia.com/v1`.
    pub api_base_url: String,
    /// Vision model name.
    pub model: String,
    /// Speech service base URL.
    pub tts_base_url: String,
    /// Speech language code.
    pub tts_language: String,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Development or production.
    pub environment: Environment,
    /// Longest side of the image payload, in pixels.
    pub max_dimension: u32,
    /// JPEG quality of the image payload.
    pub quality: u8,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Defaults for everything except the upload directory.
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            upload_dir: upload_dir.into(),
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            tts_base_url: DEFAULT_TTS_BASE_URL.to_string(),
            tts_language: DEFAULT_TTS_LANGUAGE.to_string(),
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            environment: Environment::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_JPEG_QUALITY,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }

    /// True when a story model credential is present.
    pub fn api_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
