use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::media;
use crate::models::{GeneratedAsset, Language, Listing, NewListing, ProductDraft, Seller, StyleSelection, VideoAsset};
use crate::pipeline::Pipeline;
use crate::session::{PublishJob, SessionView, WizardSession, WizardStep};
use crate::store::ListingStore;

pub type SessionHandle = Arc<Mutex<WizardSession>>;

/// Runs a stage to completion on its own task. The task owns the session handle and applies the
/// `finish_*` transition itself, so a caller that goes away mid-stage cannot strand the session.
async fn settle<F>(stage: F) -> Result<SessionView, PipelineError>
where
    F: Future<Output = SessionView> + Send + 'static,
{
    tokio::spawn(stage).await.map_err(|e| PipelineError::Task(e.to_string()))
}

/// Runs wizard sessions: applies transitions under a short lock and awaits stages outside it.
#[derive(Clone)]
pub struct UploadWizard {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn ListingStore>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl UploadWizard {
    pub fn new(pipeline: Arc<Pipeline>, store: Arc<dyn ListingStore>) -> Self {
        Self { pipeline, store, sessions: Arc::default() }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<dyn ListingStore> {
        &self.store
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub async fn create_session(&self, seller: Seller, language: Language, organization_id: Option<Uuid>) -> Result<SessionView, PipelineError> {
        let organization = match organization_id {
            Some(org_id) => Some(
                self.store
                    .organizations(&seller.id)
                    .await?
                    .into_iter()
                    .find(|o| o.id == org_id)
                    .ok_or_else(|| PipelineError::Validation(format!("organization {org_id} does not belong to {}", seller.id)))?,
            ),
            None => None,
        };
        let session = WizardSession::new(seller, organization, language);
        let view = session.view();
        info!("🧭 Session {} started for seller {}", view.id, session.seller.id);
        self.sessions.write().insert(view.id, Arc::new(Mutex::new(session)));
        Ok(view)
    }

    /// Looks a session up and counts the lookup as seller activity.
    pub fn session(&self, id: Uuid) -> Result<SessionHandle, PipelineError> {
        let handle = self
            .sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::SessionNotFound(id.to_string()))?;
        handle.lock().touch();
        Ok(handle)
    }

    pub fn view(&self, id: Uuid) -> Result<SessionView, PipelineError> {
        Ok(self.session(id)?.lock().view())
    }

    pub fn update_form(&self, id: Uuid, image: Option<&str>, draft: Option<ProductDraft>) -> Result<SessionView, PipelineError> {
        let handle = self.session(id)?;
        let mut session = handle.lock();
        if let Some(image) = image {
            session.set_image(image)?;
        }
        if let Some(draft) = draft {
            session.edit_draft(draft)?;
        }
        Ok(session.view())
    }

    /// `upload_form -> refine -> style`. The refine stage cannot fail, so this always ends in `style`
    /// (or wherever a concurrent skip already moved the session).
    pub async fn submit_form(&self, id: Uuid) -> Result<SessionView, PipelineError> {
        let handle = self.session(id)?;
        let job = handle.lock().submit_form()?;

        let pipeline = self.pipeline.clone();
        settle(async move {
            let refined = pipeline.refine_product_details(&job.image_base64, &job.draft, job.language).await;
            let mut session = handle.lock();
            session.finish_refine(job.id, refined);
            session.view()
        })
        .await
    }

    pub fn skip_refine(&self, id: Uuid) -> Result<SessionView, PipelineError> {
        let handle = self.session(id)?;
        let mut session = handle.lock();
        session.skip_refine()?;
        Ok(session.view())
    }

    /// `style -> generating -> review`, or back to `style` with a visible error.
    pub async fn generate_image(&self, id: Uuid, selection: StyleSelection) -> Result<SessionView, PipelineError> {
        let handle = self.session(id)?;
        let job = handle.lock().begin_generation(selection)?;

        let pipeline = self.pipeline.clone();
        settle(async move {
            let result = pipeline.edit_product_image(&job.image_base64, &job.prompt).await;
            let mut session = handle.lock();
            session.finish_generation(&job, result);
            session.view()
        })
        .await
    }

    pub fn back_to_style(&self, id: Uuid) -> Result<SessionView, PipelineError> {
        let handle = self.session(id)?;
        let mut session = handle.lock();
        session.back_to_style()?;
        Ok(session.view())
    }

    /// Renders the promo video and waits for it. Failures only show up as the session notice.
    pub async fn generate_video(&self, id: Uuid) -> Result<SessionView, PipelineError> {
        let (_, task) = self.start_video(id)?;
        task.await.map_err(|e| PipelineError::Task(e.to_string()))?;
        self.view(id)
    }

    /// Starts the video render in the background and returns right away.
    pub fn start_video(&self, id: Uuid) -> Result<(SessionView, JoinHandle<()>), PipelineError> {
        let handle = self.session(id)?;
        let (job, view) = {
            let mut session = handle.lock();
            let job = session.begin_video()?;
            (job, session.view())
        };

        let pipeline = self.pipeline.clone();
        let task = tokio::spawn(async move {
            let result = pipeline.generate_product_video(&job.image_base64, &job.cancel).await;
            handle.lock().finish_video(&job, result);
        });
        Ok((view, task))
    }

    /// `review -> publishing -> done`; on failure back to `review` with the error shown.
    pub async fn publish(&self, id: Uuid) -> Result<SessionView, PipelineError> {
        let handle = self.session(id)?;
        let job = handle.lock().begin_publish()?;

        let wizard = self.clone();
        settle(async move {
            let result = wizard.persist(&job).await;
            let view = {
                let mut session = handle.lock();
                session.finish_publish(&job, result);
                session.view()
            };
            if view.step == WizardStep::Done {
                wizard.schedule_close(id);
            }
            view
        })
        .await
    }

    async fn persist(&self, job: &PublishJob) -> Result<Listing, PipelineError> {
        let stamp = Utc::now().timestamp_millis();
        let image = media::decode(&job.image_base64)?;
        let image_mime = media::sniff_image_mime(&image);
        let image_path = format!("{}/{}_img.{}", job.seller.id, stamp, media::extension_for(image_mime));
        let image_url = self
            .store
            .upload_media(&image_path, image, image_mime)
            .await
            .map_err(|e| PipelineError::Persistence(format!("Image upload failed: {}", e)))?;

        let video_url = match &job.video {
            Some(video) => {
                let video_path = format!("{}/{}_vid.{}", job.seller.id, stamp, media::extension_for(&video.mime_type));
                match self.store.upload_media(&video_path, video.bytes.clone(), &video.mime_type).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!("Video upload failed, publishing without video: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let listing = NewListing {
            seller_id: job.seller.id.clone(),
            seller_name: job.seller_name(),
            organization_id: job.organization.as_ref().map(|o| o.id),
            title: job.draft.title.clone(),
            description: job.draft.description.clone(),
            price: job.draft.price,
            currency: self.pipeline.config().currency.clone(),
            category: job.draft.category.clone(),
            tags: job.draft.tags.clone(),
            image_url,
            video_url,
        };
        self.store
            .create_listing(listing)
            .await
            .map_err(|e| PipelineError::Persistence(format!("Database insert failed: {}", e)))
    }

    /// The done view stays up for the configured delay, then the session is dropped.
    fn schedule_close(&self, id: Uuid) {
        let wizard = self.clone();
        let delay = self.pipeline.config().close_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            wizard.close(id);
        });
    }

    /// Closes every session idle for at least `session_ttl`. Returns how many were closed.
    pub fn reap_idle(&self) -> usize {
        let ttl = self.pipeline.config().session_ttl;
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, handle)| handle.lock().idle_for(now) >= ttl)
            .map(|(id, _)| *id)
            .collect();
        let closed = stale.into_iter().filter(|id| self.close(*id)).count();
        if closed > 0 {
            info!("🧹 Reaped {} idle sessions", closed);
        }
        closed
    }

    /// Periodically closes sessions abandoned without a `close`, e.g. a seller who left the page.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let wizard = self.clone();
        let every = self.pipeline.config().session_ttl.min(Duration::from_secs(60));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                wizard.reap_idle();
            }
        })
    }

    pub fn close(&self, id: Uuid) -> bool {
        match self.sessions.write().remove(&id) {
            Some(handle) => {
                handle.lock().close();
                info!("👋 Session {} closed", id);
                true
            }
            None => false,
        }
    }

    pub fn generated_asset(&self, id: Uuid) -> Result<Option<GeneratedAsset>, PipelineError> {
        Ok(self.session(id)?.lock().generated().cloned())
    }

    pub fn video(&self, id: Uuid) -> Result<Option<VideoAsset>, PipelineError> {
        Ok(self.session(id)?.lock().generated().and_then(|g| g.video.clone()))
    }
}
