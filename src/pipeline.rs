//! The three model-backed stages of the listing pipeline.
//!
//! Each stage translates whatever the model layer throws into the pipeline's
//! error taxonomy before handing control back to the wizard:
//! refinement never fails (it falls back to the caller's draft), image editing
//! fails with a classified error, and video failures are always
//! `PipelineError::Video` or `PipelineError::Cancelled`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::gemini::GeminiClient;
use crate::media;
use crate::models::{Language, ProductDraft, VideoAsset};
use crate::prompt::{self, IDENTITY_PRESERVATION, VIDEO_PROMPT};
use crate::retry::with_backoff;

pub const REFINED_TAG_COUNT: usize = 5;
pub const VIDEO_RESOLUTION: &str = "720p";
pub const VIDEO_ASPECT_RATIO: &str = "16:9";

#[derive(Debug, Clone, PartialEq)]
pub struct RefineRequest {
    pub model: String,
    pub image_base64: String,
    pub mime_type: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageEditRequest {
    pub model: String,
    pub image_base64: String,
    pub mime_type: String,
    pub identity_instruction: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub model: String,
    pub image_base64: String,
    pub mime_type: String,
    pub prompt: String,
    pub resolution: String,
    pub aspect_ratio: String,
}

/// Handle of a long-running video generation.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
    pub error: Option<String>,
}

/// Model calls the stages depend on. `GeminiClient` talks to the real API; tests use `FakeModel`.
#[async_trait]
pub trait MediaModel: Send + Sync {
    /// Raw JSON text produced by the copywriting model, `None` when it returned no text.
    async fn refine_copy(&self, request: &RefineRequest) -> Result<Option<String>, PipelineError>;

    /// Base64 image produced by the image-editing model, `None` when the response had no image.
    async fn edit_image(&self, request: &ImageEditRequest) -> Result<Option<String>, PipelineError>;

    async fn submit_video(&self, request: &VideoRequest) -> Result<VideoOperation, PipelineError>;

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, PipelineError>;

    async fn fetch_video(&self, uri: &str) -> Result<VideoAsset, PipelineError>;
}

pub struct Pipeline {
    config: PipelineConfig,
    model: Arc<dyn MediaModel>,
}

impl Pipeline {
    /// Validates the credential once; stages never look at the environment again.
    pub fn new(config: PipelineConfig, model: Arc<dyn MediaModel>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, model })
    }

    /// Pipeline over the live Gemini API.
    pub fn gemini(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = Arc::new(GeminiClient::new(&config));
        Self::new(config, client)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// AI rewrite of title, description, category and tags. Returns `draft` unchanged on any failure.
    pub async fn refine_product_details(&self, image_base64: &str, draft: &ProductDraft, lang: Language) -> ProductDraft {
        let request = RefineRequest {
            model: self.config.refine_model.clone(),
            image_base64: image_base64.to_string(),
            mime_type: media::sniff_base64_mime(image_base64).to_string(),
            prompt: prompt::build_refine_prompt(draft, lang),
        };
        let model = &self.model;
        let request = &request;
        let result = with_backoff(self.config.refine_retry, "refine", move || model.refine_copy(request)).await;

        match result {
            Ok(Some(text)) => match parse_refined(&text, draft) {
                Ok(refined) => {
                    info!("✨ Refined draft '{}' -> '{}'", draft.title, refined.title);
                    refined
                }
                Err(e) => {
                    warn!("Failed to parse refinement, keeping manual input: {}", e);
                    draft.clone()
                }
            },
            Ok(None) => {
                warn!("Refinement returned no text, keeping manual input");
                draft.clone()
            }
            Err(e) => {
                warn!("Refinement failed, keeping manual input: {}", e);
                draft.clone()
            }
        }
    }

    /// Re-stages the product photo according to `prompt`, keeping the product itself intact.
    pub async fn edit_product_image(&self, image_base64: &str, prompt: &str) -> Result<String, PipelineError> {
        let request = ImageEditRequest {
            model: self.config.image_model.clone(),
            image_base64: image_base64.to_string(),
            mime_type: media::sniff_base64_mime(image_base64).to_string(),
            identity_instruction: IDENTITY_PRESERVATION.to_string(),
            prompt: prompt.to_string(),
        };
        info!("🎯 Generating image with prompt: {}", prompt.chars().take(100).collect::<String>());
        let model = &self.model;
        let request = &request;
        let image = with_backoff(self.config.image_retry, "image edit", move || model.edit_image(request)).await;

        match image {
            Ok(Some(data)) => {
                info!("✅ Successfully generated image: {}", media::preview(&data));
                Ok(data)
            }
            Ok(None) => {
                error!("❌ Image model returned no image payload");
                Err(PipelineError::NoContent)
            }
            Err(e) => {
                error!("❌ Failed to generate image: {}", e);
                Err(e)
            }
        }
    }

    /// Submits a video job for the generated image and polls it until done or `cancel` fires.
    pub async fn generate_product_video(&self, image_base64: &str, cancel: &CancellationToken) -> Result<VideoAsset, PipelineError> {
        match self.run_video(image_base64, cancel).await {
            Ok(asset) => Ok(asset),
            Err(PipelineError::Cancelled) => {
                info!("🛑 Video generation cancelled");
                Err(PipelineError::Cancelled)
            }
            Err(PipelineError::Video(msg)) => {
                error!("❌ Video generation failed: {}", msg);
                Err(PipelineError::Video(msg))
            }
            Err(e) => {
                error!("❌ Video generation failed: {}", e);
                Err(PipelineError::Video(e.to_string()))
            }
        }
    }

    async fn run_video(&self, image_base64: &str, cancel: &CancellationToken) -> Result<VideoAsset, PipelineError> {
        let request = VideoRequest {
            model: self.config.video_model.clone(),
            image_base64: image_base64.to_string(),
            mime_type: media::sniff_base64_mime(image_base64).to_string(),
            prompt: VIDEO_PROMPT.to_string(),
            resolution: VIDEO_RESOLUTION.to_string(),
            aspect_ratio: VIDEO_ASPECT_RATIO.to_string(),
        };

        let mut operation = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            op = self.model.submit_video(&request) => op?,
        };
        info!("🎬 Video operation {} submitted", operation.name);

        while !operation.done {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(self.config.video_poll_interval) => {}
            }
            operation = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                op = self.model.poll_video(&operation) => op?,
            };
        }

        if let Some(err) = operation.error {
            return Err(PipelineError::Video(err));
        }
        let uri = operation
            .video_uri
            .ok_or_else(|| PipelineError::Video("operation finished without a video".into()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            asset = self.model.fetch_video(&uri) => asset,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefinedCopy {
    title: String,
    description: String,
    category: String,
    tags: Vec<String>,
}

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Merges the model's JSON into `draft`. Price and anything else the model does not own stay untouched.
pub fn parse_refined(text: &str, draft: &ProductDraft) -> Result<ProductDraft, PipelineError> {
    let copy: RefinedCopy = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| PipelineError::Parse(e.to_string()))?;

    let title = copy.title.trim();
    if title.is_empty() {
        return Err(PipelineError::Parse("refined title is empty".into()));
    }

    let mut tags: Vec<String> = Vec::with_capacity(REFINED_TAG_COUNT);
    for tag in copy.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|existing| existing.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }
    if tags.len() < REFINED_TAG_COUNT {
        return Err(PipelineError::Parse(format!("expected {} tags, got {}", REFINED_TAG_COUNT, tags.len())));
    }
    tags.truncate(REFINED_TAG_COUNT);

    let category = copy.category.trim();
    Ok(ProductDraft {
        title: title.to_string(),
        description: copy.description.trim().to_string(),
        category: if category.is_empty() { draft.category.clone() } else { category.to_string() },
        tags,
        ..draft.clone()
    })
}
