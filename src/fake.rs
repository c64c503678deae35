//! Fake media model for tests and offline runs.
//!
//! Responses are scripted up front with the `with_*` builders and every call is
//! recorded, so tests can assert on what the stages sent without network access.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::PipelineError;
use crate::models::VideoAsset;
use crate::pipeline::{ImageEditRequest, MediaModel, RefineRequest, VideoOperation, VideoRequest};

type ErrorFactory = Box<dyn Fn() -> PipelineError + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    Refine(RefineRequest),
    Image(ImageEditRequest),
    SubmitVideo(VideoRequest),
    PollVideo(String),
    FetchVideo(String),
}

enum VideoScript {
    Unavailable,
    DoneAfter { polls: u32, uri: String },
    Fails(String),
}

pub struct FakeModel {
    refine_text: Option<String>,
    refine_error: Option<ErrorFactory>,
    images: Mutex<Vec<String>>,
    image_error: Option<ErrorFactory>,
    rate_limited_images: Mutex<u32>,
    image_delay: Duration,
    video: VideoScript,
    calls: Mutex<Vec<FakeCall>>,
}

impl Default for FakeModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeModel {
    /// No scripted output: refinement returns no text, image edits return no image, video is unavailable.
    pub fn new() -> Self {
        Self {
            refine_text: None,
            refine_error: None,
            images: Mutex::new(Vec::new()),
            image_error: None,
            rate_limited_images: Mutex::new(0),
            image_delay: Duration::ZERO,
            video: VideoScript::Unavailable,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refine_text(mut self, text: impl Into<String>) -> Self {
        self.refine_text = Some(text.into());
        self
    }

    pub fn with_refine_error(mut self, error: impl Fn() -> PipelineError + Send + Sync + 'static) -> Self {
        self.refine_error = Some(Box::new(error));
        self
    }

    /// Queues an image; the last queued image keeps being returned once the queue is down to one.
    pub fn with_image(self, image_base64: impl Into<String>) -> Self {
        self.images.lock().push(image_base64.into());
        self
    }

    pub fn with_image_error(mut self, error: impl Fn() -> PipelineError + Send + Sync + 'static) -> Self {
        self.image_error = Some(Box::new(error));
        self
    }

    /// The first `n` image edits fail with a 429 before the scripted images are returned.
    pub fn with_rate_limited_images(self, n: u32) -> Self {
        *self.rate_limited_images.lock() = n;
        self
    }

    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = delay;
        self
    }

    pub fn with_video_after_polls(mut self, polls: u32, uri: impl Into<String>) -> Self {
        self.video = VideoScript::DoneAfter { polls, uri: uri.into() };
        self
    }

    pub fn with_video_failure(mut self, message: impl Into<String>) -> Self {
        self.video = VideoScript::Fails(message.into());
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    pub fn refine_calls(&self) -> usize {
        self.count(|c| matches!(c, FakeCall::Refine(_)))
    }

    pub fn image_calls(&self) -> usize {
        self.count(|c| matches!(c, FakeCall::Image(_)))
    }

    pub fn poll_calls(&self) -> usize {
        self.count(|c| matches!(c, FakeCall::PollVideo(_)))
    }

    pub fn last_image_request(&self) -> Option<ImageEditRequest> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            FakeCall::Image(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn last_video_request(&self) -> Option<VideoRequest> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            FakeCall::SubmitVideo(r) => Some(r.clone()),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&FakeCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }

    fn operation(&self, name: &str, polls_seen: u32) -> VideoOperation {
        match &self.video {
            VideoScript::DoneAfter { polls, uri } if polls_seen >= *polls => VideoOperation {
                name: name.to_string(),
                done: true,
                video_uri: Some(uri.clone()),
                error: None,
            },
            VideoScript::Fails(message) if polls_seen >= 1 => VideoOperation {
                name: name.to_string(),
                done: true,
                video_uri: None,
                error: Some(message.clone()),
            },
            _ => VideoOperation { name: name.to_string(), done: false, video_uri: None, error: None },
        }
    }
}

#[async_trait]
impl MediaModel for FakeModel {
    async fn refine_copy(&self, request: &RefineRequest) -> Result<Option<String>, PipelineError> {
        self.record(FakeCall::Refine(request.clone()));
        if let Some(error) = &self.refine_error {
            return Err(error());
        }
        Ok(self.refine_text.clone())
    }

    async fn edit_image(&self, request: &ImageEditRequest) -> Result<Option<String>, PipelineError> {
        self.record(FakeCall::Image(request.clone()));
        if !self.image_delay.is_zero() {
            tokio::time::sleep(self.image_delay).await;
        }
        {
            let mut remaining = self.rate_limited_images.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PipelineError::RateLimited("429 RESOURCE_EXHAUSTED".into()));
            }
        }
        if let Some(error) = &self.image_error {
            return Err(error());
        }
        let mut images = self.images.lock();
        Ok(if images.len() > 1 { Some(images.remove(0)) } else { images.first().cloned() })
    }

    async fn submit_video(&self, request: &VideoRequest) -> Result<VideoOperation, PipelineError> {
        self.record(FakeCall::SubmitVideo(request.clone()));
        match &self.video {
            VideoScript::Unavailable => Err(PipelineError::Upstream { status: 404, message: "video model unavailable".into() }),
            _ => Ok(self.operation("operations/fake-video", 0)),
        }
    }

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, PipelineError> {
        self.record(FakeCall::PollVideo(operation.name.clone()));
        let polls = self.poll_calls() as u32;
        Ok(self.operation(&operation.name, polls))
    }

    async fn fetch_video(&self, uri: &str) -> Result<VideoAsset, PipelineError> {
        self.record(FakeCall::FetchVideo(uri.to_string()));
        Ok(VideoAsset {
            source_uri: uri.to_string(),
            mime_type: "video/mp4".to_string(),
            bytes: Bytes::from_static(b"fake-mp4"),
        })
    }
}
