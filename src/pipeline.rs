//! One upload, start to finish: save, ask for a story, narrate it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::PixtaleError;
use crate::normalize::normalize;
use crate::speech::{SpeechEngine, Synthesizer};
use crate::storage::{RequestId, UploadStore, UploadedImage, public_url};
use crate::story::StoryTeller;

/// Where a request got to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestStage {
    /// Multipart body parsed
    Received,
    /// Image written to the upload directory
    Saved,
    /// Story returned by the model
    StoryRequested,
    /// Narration written to the upload directory
    AudioSynthesized,
    /// Result handed back to the caller
    Responded,
}

impl RequestStage {
    /// Logs that request `id` has reached this stage.
    pub fn reached(self, id: RequestId) {
        debug!("Request {} reached {:?}", id, self);
    }
}

/// A request that made it all the way through.
#[derive(Clone, Debug)]
pub struct GeneratedStory {
    /// Shared by the stored image and the narration
    pub id: RequestId,
    /// The stored upload
    pub image_path: PathBuf,
    /// What the model wrote
    pub story: String,
    /// The narration on disk
    pub audio_path: PathBuf,
    /// Public URL of the narration
    pub audio_url: String,
}

/// A request that stopped early. Anything already written stays on disk.
#[derive(Debug)]
pub struct PipelineFailure {
    /// The stage that was being attempted when it failed
    pub stage: RequestStage,
    /// Why
    pub error: PixtaleError,
    /// The stored upload, when we got that far
    pub image_path: Option<PathBuf>,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed at {:?}: {}", self.stage, self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Wires the store, the story model and the speech engine together.
#[derive(Clone)]
pub struct StoryPipeline {
    store: UploadStore,
    teller: Arc<dyn StoryTeller>,
    synthesizer: Synthesizer,
    max_dimension: u32,
    quality: u8,
}

impl StoryPipeline {
    /// Builds a pipeline writing into `config.upload_dir`.
    pub fn new(
        config: &Config,
        teller: Arc<dyn StoryTeller>,
        speech: Arc<dyn SpeechEngine>,
    ) -> Self {
        let store = UploadStore::new(config.upload_dir.clone());
        Self {
            synthesizer: Synthesizer::new(speech, store.clone()),
            store,
            teller,
            max_dimension: config.max_dimension,
            quality: config.quality,
        }
    }

    /// The upload directory.
    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    /// Normalizes a stored image and asks the model about it.
    pub async fn request_story(&self, image_path: PathBuf) -> Result<String, PixtaleError> {
        let (max_dimension, quality) = (self.max_dimension, self.quality);
        let payload =
            tokio::task::spawn_blocking(move || normalize(&image_path, max_dimension, quality))
                .await??;
        info!(
            "Sending {}x{} image ({:.2} KB) to {}",
            payload.width,
            payload.height,
            payload.payload_kb(),
            self.teller.name()
        );
        self.teller.tell_story(&payload).await
    }

    /// Runs one upload through every stage.
    pub async fn run(&self, upload: &UploadedImage) -> Result<GeneratedStory, PipelineFailure> {
        debug!(
            "{:?} {} bytes of {}",
            RequestStage::Received,
            upload.bytes.len(),
            upload.content_type
        );
        let stored = self.store.save_image(upload).await.map_err(|error| {
            error!("Failed to save upload: {error}");
            PipelineFailure {
                stage: RequestStage::Saved,
                error,
                image_path: None,
            }
        })?;
        RequestStage::Saved.reached(stored.id);

        let fail = |stage: RequestStage| {
            let image_path = stored.path.clone();
            move |error: PixtaleError| {
                error!("Request {} failed at {:?}: {}", stored.id, stage, error);
                PipelineFailure {
                    stage,
                    error,
                    image_path: Some(image_path),
                }
            }
        };

        let story = self
            .request_story(stored.path.clone())
            .await
            .map_err(fail(RequestStage::StoryRequested))?;
        RequestStage::StoryRequested.reached(stored.id);

        let audio_path = self
            .synthesizer
            .synthesize(&story, stored.id)
            .await
            .map_err(fail(RequestStage::AudioSynthesized))?;
        RequestStage::AudioSynthesized.reached(stored.id);

        let audio_url = public_url(&audio_path);
        info!("Request {} produced {}", stored.id, audio_url);
        Ok(GeneratedStory {
            id: stored.id,
            image_path: stored.path,
            story,
            audio_path,
            audio_url,
        })
    }
}
