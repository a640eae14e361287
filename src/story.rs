//! Asks a hosted vision model for a story about an image.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{
    STORY_MAX_TOKENS, STORY_SYSTEM_PROMPT, STORY_TEMPERATURE, STORY_USER_PROMPT, STORY_WORD_LIMIT,
};
use crate::error::PixtaleError;
use crate::normalize::NormalizedImage;

/// Something that can turn a picture into a story.
#[async_trait]
pub trait StoryTeller: Send + Sync {
    /// Returns the story text, unvalidated beyond being non-empty.
    async fn tell_story(&self, image: &NormalizedImage) -> Result<String, PixtaleError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Talks to any OpenAI-compatible `/chat/completions` endpoint that accepts
/// `image_url` content parts.
#[derive(Clone, Debug)]
pub struct ChatStoryTeller {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatStoryTeller {
    /// Builds a teller from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn request_body(&self, image: &NormalizedImage) -> Value {
        json!({
            "model": self.model,
            "temperature": STORY_TEMPERATURE,
            "max_tokens": STORY_MAX_TOKENS,
            "messages": [
                {"role": "system", "content": STORY_SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": STORY_USER_PROMPT},
                    {"type": "image_url", "image_url": {"url": image.data_uri()}}
                ]}
            ]
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl StoryTeller for ChatStoryTeller {
    async fn tell_story(&self, image: &NormalizedImage) -> Result<String, PixtaleError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(PixtaleError::Configuration(
                "missing NVIDIA_API_KEY, set it in the environment".to_string(),
            ));
        };

        info!("Requesting story from {} ({})", self.base_url, self.model);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(|err| PixtaleError::Provider(format!("story request failed: {err}")))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| PixtaleError::Provider(format!("failed reading story body: {err}")))?;
        if !status.is_success() {
            return Err(PixtaleError::Provider(format!(
                "story model returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        let parsed: ChatCompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|err| PixtaleError::Provider(format!("malformed story response: {err}")))?;
        if let Some(err) = parsed.error {
            return Err(PixtaleError::Provider(format!(
                "story model returned error: {err}"
            )));
        }

        let story = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| PixtaleError::Provider("story response had no content".to_string()))?;

        let words = story.split_whitespace().count();
        debug!("Received story of {} words", words);
        if words > STORY_WORD_LIMIT {
            warn!(
                "Story is {} words, over the requested {}; passing it through",
                words, STORY_WORD_LIMIT
            );
        }
        Ok(story)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
