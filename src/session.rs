//! Upload wizard state machine.
//!
//! `WizardSession` only holds state and applies transitions; it never awaits.
//! Every async stage is bracketed by a `begin_*` transition that hands out a job
//! and a `finish_*` transition that takes the job's result back. A result whose
//! job id no longer matches the session is stale and gets dropped.
//!
//! ```text
//! upload_form -> refine -> style -> generating -> review -> publishing -> done
//!                            ^           |           |
//!                            +-----------+-----------+   (failure / try another style)
//! ```

use std::time::Duration;

use serde::Serialize;
use serde_with::skip_serializing_none;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::media;
use crate::models::{GeneratedAsset, Language, Listing, Organization, ProductDraft, Seller, StyleSelection, VideoAsset};
use crate::prompt::construct_gen_prompt;

pub const MISSING_FIELDS: &str = "Please fill in the required fields and upload an image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    UploadForm,
    Refine,
    Style,
    Generating,
    Review,
    Publishing,
    Done,
}

impl WizardStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStep::UploadForm => "upload_form",
            WizardStep::Refine => "refine",
            WizardStep::Style => "style",
            WizardStep::Generating => "generating",
            WizardStep::Review => "review",
            WizardStep::Publishing => "publishing",
            WizardStep::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefineJob {
    pub id: u64,
    pub image_base64: String,
    pub draft: ProductDraft,
    pub language: Language,
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: u64,
    pub image_base64: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct VideoJob {
    pub id: u64,
    pub generation: u64,
    pub image_base64: String,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct PublishJob {
    pub id: u64,
    pub seller: Seller,
    pub organization: Option<Organization>,
    pub draft: ProductDraft,
    pub image_base64: String,
    pub video: Option<VideoAsset>,
}

impl PublishJob {
    /// Organization name when publishing for one, the seller's own name otherwise.
    pub fn seller_name(&self) -> String {
        self.organization
            .as_ref()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| self.seller.name.clone())
    }
}

#[derive(Debug)]
pub struct WizardSession {
    pub id: Uuid,
    pub seller: Seller,
    pub organization: Option<Organization>,
    pub language: Language,
    last_active: Instant,
    step: WizardStep,
    draft: ProductDraft,
    original_image: Option<String>,
    selection: StyleSelection,
    generated: Option<GeneratedAsset>,
    error: Option<String>,
    notice: Option<String>,
    listing: Option<Listing>,
    next_job: u64,
    pending: Option<u64>,
    video: Option<VideoJob>,
    closed: bool,
}

/// Serializable view of a session for clients.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub step: WizardStep,
    pub language: Language,
    pub seller_name: String,
    pub draft: ProductDraft,
    pub selection: StyleSelection,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub has_image: bool,
    pub has_generated_image: bool,
    pub has_video: bool,
    pub video_in_progress: bool,
    pub prompt: Option<String>,
    pub listing_id: Option<Uuid>,
}

impl WizardSession {
    pub fn new(seller: Seller, organization: Option<Organization>, language: Language) -> Self {
        Self {
            id: Uuid::new_v4(),
            seller,
            organization,
            language,
            last_active: Instant::now(),
            step: WizardStep::UploadForm,
            draft: ProductDraft { category: "Other".into(), ..Default::default() },
            original_image: None,
            selection: StyleSelection::default(),
            generated: None,
            error: None,
            notice: None,
            listing: None,
            next_job: 0,
            pending: None,
            video: None,
            closed: false,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &ProductDraft {
        &self.draft
    }

    pub fn selection(&self) -> &StyleSelection {
        &self.selection
    }

    pub fn generated(&self) -> Option<&GeneratedAsset> {
        self.generated.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn listing(&self) -> Option<&Listing> {
        self.listing.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn video_in_progress(&self) -> bool {
        self.video.is_some()
    }

    /// Marks the seller as still around; idle expiry counts from the last touch.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            step: self.step,
            language: self.language,
            seller_name: self
                .organization
                .as_ref()
                .map(|o| o.name.clone())
                .unwrap_or_else(|| self.seller.name.clone()),
            draft: self.draft.clone(),
            selection: self.selection.clone(),
            error: self.error.clone(),
            notice: self.notice.clone(),
            has_image: self.original_image.is_some(),
            has_generated_image: self.generated.is_some(),
            has_video: self.generated.as_ref().is_some_and(|g| g.video.is_some()),
            video_in_progress: self.video.is_some(),
            prompt: self.generated.as_ref().map(|g| g.prompt.clone()),
            listing_id: self.listing.as_ref().map(|l| l.id),
        }
    }

    fn invalid(&self, action: &'static str) -> PipelineError {
        PipelineError::InvalidTransition { step: self.step.as_str(), action }
    }

    fn next_job_id(&mut self) -> u64 {
        self.next_job += 1;
        self.next_job
    }

    fn cancel_video(&mut self) {
        if let Some(job) = self.video.take() {
            info!("🛑 Cancelling video job {} for session {}", job.id, self.id);
            job.cancel.cancel();
        }
    }

    // --- upload_form ---

    pub fn set_image(&mut self, image: &str) -> Result<(), PipelineError> {
        match self.step {
            WizardStep::UploadForm => {
                self.original_image = Some(media::normalize_upload(image)?);
                Ok(())
            }
            _ => Err(self.invalid("set_image")),
        }
    }

    pub fn edit_draft(&mut self, draft: ProductDraft) -> Result<(), PipelineError> {
        match self.step {
            WizardStep::UploadForm => {
                self.draft = draft;
                Ok(())
            }
            _ => Err(self.invalid("edit_draft")),
        }
    }

    /// Guarded `upload_form -> refine`. On a missing field the session stays put with a visible error.
    pub fn submit_form(&mut self) -> Result<RefineJob, PipelineError> {
        if self.step != WizardStep::UploadForm {
            return Err(self.invalid("submit_form"));
        }
        let price_ok = self.draft.price.is_finite() && self.draft.price > 0.0;
        let image = match &self.original_image {
            Some(image) if !self.draft.title.trim().is_empty() && price_ok => image.clone(),
            _ => {
                self.error = Some(MISSING_FIELDS.to_string());
                return Err(PipelineError::Validation(MISSING_FIELDS.to_string()));
            }
        };
        let id = self.next_job_id();
        self.step = WizardStep::Refine;
        self.error = None;
        self.pending = Some(id);
        Ok(RefineJob { id, image_base64: image, draft: self.draft.clone(), language: self.language })
    }

    // --- refine ---

    /// Settles the refine step. Always lands in `style` unless the seller already skipped ahead.
    pub fn finish_refine(&mut self, job_id: u64, refined: ProductDraft) -> bool {
        if self.step != WizardStep::Refine || self.pending != Some(job_id) {
            info!("Discarding late refinement {} for session {}", job_id, self.id);
            return false;
        }
        self.draft = refined;
        self.pending = None;
        self.step = WizardStep::Style;
        true
    }

    pub fn skip_refine(&mut self) -> Result<(), PipelineError> {
        match self.step {
            WizardStep::Refine => {
                self.pending = None;
                self.step = WizardStep::Style;
                Ok(())
            }
            _ => Err(self.invalid("skip_refine")),
        }
    }

    // --- style ---

    /// `style -> generating`. Any earlier generation (and its video) is discarded here.
    pub fn begin_generation(&mut self, selection: StyleSelection) -> Result<GenerationJob, PipelineError> {
        if self.step != WizardStep::Style {
            return Err(self.invalid("generate"));
        }
        let image = self
            .original_image
            .clone()
            .ok_or_else(|| PipelineError::Validation(MISSING_FIELDS.to_string()))?;

        self.cancel_video();
        self.generated = None;
        self.notice = None;
        self.error = None;

        let subject = if self.draft.description.trim().is_empty() { &self.draft.title } else { &self.draft.description };
        let prompt = construct_gen_prompt(subject, selection.style, &selection.modifier);
        self.selection = selection;

        let id = self.next_job_id();
        self.pending = Some(id);
        self.step = WizardStep::Generating;
        Ok(GenerationJob { id, image_base64: image, prompt })
    }

    // --- generating ---

    pub fn finish_generation(&mut self, job: &GenerationJob, result: Result<String, PipelineError>) -> bool {
        if self.step != WizardStep::Generating || self.pending != Some(job.id) {
            info!("Discarding stale generation {} for session {}", job.id, self.id);
            return false;
        }
        self.pending = None;
        match result {
            Ok(image_base64) => {
                self.generated = Some(GeneratedAsset {
                    generation: job.id,
                    image_base64,
                    prompt: job.prompt.clone(),
                    video: None,
                });
                self.step = WizardStep::Review;
            }
            Err(e) => {
                warn!("Image generation failed for session {}: {}", self.id, e);
                self.error = Some(e.user_message());
                self.step = WizardStep::Style;
            }
        }
        true
    }

    // --- review ---

    pub fn back_to_style(&mut self) -> Result<(), PipelineError> {
        match self.step {
            WizardStep::Review => {
                self.cancel_video();
                self.error = None;
                self.step = WizardStep::Style;
                Ok(())
            }
            _ => Err(self.invalid("back_to_style")),
        }
    }

    pub fn begin_video(&mut self) -> Result<VideoJob, PipelineError> {
        if self.step != WizardStep::Review {
            return Err(self.invalid("generate_video"));
        }
        if self.video.is_some() {
            return Err(PipelineError::Validation("A video is already being generated.".into()));
        }
        let generated = self.generated.as_ref().ok_or_else(|| self.invalid("generate_video"))?;
        if generated.video.is_some() {
            return Err(PipelineError::Validation("This image already has a video.".into()));
        }
        let job = VideoJob {
            id: self.next_job + 1,
            generation: generated.generation,
            image_base64: generated.image_base64.clone(),
            cancel: CancellationToken::new(),
        };
        self.next_job = job.id;
        self.notice = None;
        self.video = Some(job.clone());
        Ok(job)
    }

    /// Video results never move the step; failures only leave a notice.
    pub fn finish_video(&mut self, job: &VideoJob, result: Result<VideoAsset, PipelineError>) -> bool {
        if self.video.as_ref().map(|v| v.id) == Some(job.id) {
            self.video = None;
        }
        match result {
            Ok(asset) => match self.generated.as_mut() {
                Some(generated) if generated.generation == job.generation && self.step == WizardStep::Review => {
                    generated.video = Some(asset);
                    true
                }
                _ => {
                    info!("Discarding video {} for an image no longer under review", job.id);
                    false
                }
            },
            Err(PipelineError::Cancelled) => false,
            Err(e) => {
                warn!("Video generation failed for session {}: {}", self.id, e);
                if self.step == WizardStep::Review {
                    self.notice = Some(e.user_message());
                }
                false
            }
        }
    }

    /// `review -> publishing`. A render still in flight is cancelled; publishing never waits on it.
    pub fn begin_publish(&mut self) -> Result<PublishJob, PipelineError> {
        if self.step != WizardStep::Review {
            return Err(self.invalid("publish"));
        }
        let generated = self.generated.clone().ok_or_else(|| self.invalid("publish"))?;
        self.cancel_video();
        let id = self.next_job_id();
        self.pending = Some(id);
        self.error = None;
        self.step = WizardStep::Publishing;
        Ok(PublishJob {
            id,
            seller: self.seller.clone(),
            organization: self.organization.clone(),
            draft: self.draft.clone(),
            image_base64: generated.image_base64,
            video: generated.video,
        })
    }

    // --- publishing ---

    pub fn finish_publish(&mut self, job: &PublishJob, result: Result<Listing, PipelineError>) -> bool {
        if self.step != WizardStep::Publishing || self.pending != Some(job.id) {
            return false;
        }
        self.pending = None;
        match result {
            Ok(listing) => {
                info!("🚀 Session {} published listing {}", self.id, listing.id);
                self.listing = Some(listing);
                self.step = WizardStep::Done;
            }
            Err(e) => {
                warn!("Publishing failed for session {}: {}", self.id, e);
                self.error = Some(e.user_message());
                self.step = WizardStep::Review;
            }
        }
        true
    }

    // --- any step ---

    pub fn close(&mut self) {
        self.cancel_video();
        self.pending = None;
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Style;
    use bytes::Bytes;

    fn seller() -> Seller {
        Seller { id: "u1".into(), name: "Amira".into(), email: None }
    }

    fn ready_session() -> WizardSession {
        let mut session = WizardSession::new(seller(), None, Language::En);
        session.set_image("data:image/jpeg;base64,/9j/AAAA").unwrap();
        session
            .edit_draft(ProductDraft { title: "Lamp".into(), price: 50.0, ..Default::default() })
            .unwrap();
        session
    }

    fn in_review() -> WizardSession {
        let mut session = ready_session();
        let refine = session.submit_form().unwrap();
        session.finish_refine(refine.id, refine.draft.clone());
        let job = session.begin_generation(StyleSelection { style: Style::Studio, modifier: String::new() }).unwrap();
        session.finish_generation(&job, Ok("IMG".into()));
        session
    }

    fn video(uri: &str) -> VideoAsset {
        VideoAsset { source_uri: uri.into(), mime_type: "video/mp4".into(), bytes: Bytes::from_static(b"v") }
    }

    #[test]
    fn submit_requires_image_title_and_price() {
        let mut session = WizardSession::new(seller(), None, Language::En);
        session.edit_draft(ProductDraft { title: "Lamp".into(), price: 50.0, ..Default::default() }).unwrap();
        assert!(matches!(session.submit_form(), Err(PipelineError::Validation(_))));
        assert_eq!(session.step(), WizardStep::UploadForm);
        assert_eq!(session.error(), Some(MISSING_FIELDS));

        session.set_image("/9j/AAAA").unwrap();
        session.edit_draft(ProductDraft { title: "  ".into(), price: 50.0, ..Default::default() }).unwrap();
        assert!(session.submit_form().is_err());

        session.edit_draft(ProductDraft { title: "Lamp".into(), price: 0.0, ..Default::default() }).unwrap();
        assert!(session.submit_form().is_err());
        assert_eq!(session.step(), WizardStep::UploadForm);
    }

    #[test]
    fn refine_always_lands_in_style() {
        let mut session = ready_session();
        let job = session.submit_form().unwrap();
        assert_eq!(session.step(), WizardStep::Refine);
        assert!(session.error().is_none());
        assert!(session.finish_refine(job.id, job.draft.clone()));
        assert_eq!(session.step(), WizardStep::Style);
        assert_eq!(session.draft().title, "Lamp");
    }

    #[test]
    fn late_refinement_after_skip_is_discarded() {
        let mut session = ready_session();
        let job = session.submit_form().unwrap();
        session.skip_refine().unwrap();
        let refined = ProductDraft { title: "Shiny Lamp".into(), ..job.draft.clone() };
        assert!(!session.finish_refine(job.id, refined));
        assert_eq!(session.step(), WizardStep::Style);
        assert_eq!(session.draft().title, "Lamp");
    }

    #[test]
    fn generation_failure_returns_to_style_with_message() {
        let mut session = ready_session();
        let refine = session.submit_form().unwrap();
        session.finish_refine(refine.id, refine.draft.clone());
        let job = session.begin_generation(StyleSelection { style: Style::Luxury, modifier: String::new() }).unwrap();
        assert_eq!(session.step(), WizardStep::Generating);
        assert!(session.begin_generation(StyleSelection::default()).is_err());

        session.finish_generation(&job, Err(PipelineError::RateLimited("429".into())));
        assert_eq!(session.step(), WizardStep::Style);
        assert!(session.error().unwrap().contains("rate limit"));
        assert!(session.generated().is_none());
    }

    #[test]
    fn regeneration_discards_previous_asset() {
        let mut session = in_review();
        let old = session.generated().unwrap().generation;
        session.back_to_style().unwrap();
        let job = session.begin_generation(StyleSelection { style: Style::Outdoor, modifier: "at dusk".into() }).unwrap();
        assert!(session.generated().is_none());
        assert!(job.prompt.contains("at dusk"));

        let stale = GenerationJob { id: old, image_base64: String::new(), prompt: String::new() };
        assert!(!session.finish_generation(&stale, Ok("OLD".into())));
        assert!(session.finish_generation(&job, Ok("NEW".into())));
        assert_eq!(session.generated().unwrap().image_base64, "NEW");
    }

    #[test]
    fn video_failure_leaves_notice_but_keeps_review() {
        let mut session = in_review();
        let job = session.begin_video().unwrap();
        assert!(session.video_in_progress());
        assert!(session.begin_video().is_err());
        session.finish_video(&job, Err(PipelineError::Video("boom".into())));
        assert_eq!(session.step(), WizardStep::Review);
        assert!(session.notice().is_some());
        assert!(!session.video_in_progress());
        assert!(session.begin_publish().is_ok());
    }

    #[test]
    fn video_for_replaced_image_is_dropped() {
        let mut session = in_review();
        let job = session.begin_video().unwrap();
        session.back_to_style().unwrap();
        assert!(job.cancel.is_cancelled());
        let regen = session.begin_generation(StyleSelection::default()).unwrap();
        session.finish_generation(&regen, Ok("IMG2".into()));
        assert!(!session.finish_video(&job, Ok(video("https://v"))));
        assert!(session.generated().unwrap().video.is_none());
    }

    #[test]
    fn publish_cancels_running_video() {
        let mut session = in_review();
        let video_job = session.begin_video().unwrap();
        let publish = session.begin_publish().unwrap();
        assert!(video_job.cancel.is_cancelled());
        assert!(publish.video.is_none());
        assert_eq!(session.step(), WizardStep::Publishing);
        assert_eq!(publish.seller_name(), "Amira");
    }

    #[test]
    fn failed_publish_returns_to_review() {
        let mut session = in_review();
        let job = session.begin_publish().unwrap();
        session.finish_publish(&job, Err(PipelineError::Persistence("insert failed".into())));
        assert_eq!(session.step(), WizardStep::Review);
        assert!(session.error().unwrap().contains("insert failed"));
    }

    #[test]
    fn actions_outside_their_step_are_rejected() {
        let mut session = ready_session();
        assert!(matches!(session.skip_refine(), Err(PipelineError::InvalidTransition { step: "upload_form", .. })));
        assert!(session.begin_generation(StyleSelection::default()).is_err());
        assert!(session.begin_publish().is_err());
        assert!(session.back_to_style().is_err());
    }
}
