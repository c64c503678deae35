use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Listing, NewListing, Organization};

/// Persistence collaborator: listings, organizations and public media storage.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Stores `data` under `path` and returns its public URL.
    async fn upload_media(&self, path: &str, data: Bytes, content_type: &str) -> Result<String, PipelineError>;

    async fn create_listing(&self, listing: NewListing) -> Result<Listing, PipelineError>;

    /// Newest first.
    async fn list_listings(&self) -> Result<Vec<Listing>, PipelineError>;

    async fn seller_listings(&self, seller_id: &str) -> Result<Vec<Listing>, PipelineError>;

    async fn delete_listing(&self, id: Uuid) -> Result<(), PipelineError>;

    async fn organizations(&self, owner_id: &str) -> Result<Vec<Organization>, PipelineError>;

    async fn create_organization(&self, name: &str, owner_id: &str) -> Result<Organization, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub content_type: String,
    pub data: Bytes,
}

/// In-process store backing the binary and the tests.
#[derive(Default)]
pub struct MemoryStore {
    public_base: String,
    listings: RwLock<HashMap<Uuid, Listing>>,
    organizations: RwLock<Vec<Organization>>,
    media: RwLock<HashMap<String, StoredMedia>>,
    failing_suffixes: RwLock<Vec<String>>,
}

impl MemoryStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self { public_base: public_base.into().trim_end_matches('/').to_string(), ..Default::default() }
    }

    /// Uploads whose path ends with `suffix` fail, for exercising partial publish failures.
    pub fn fail_uploads_ending_with(&self, suffix: &str) {
        self.failing_suffixes.write().push(suffix.to_string());
    }

    pub fn media(&self, path: &str) -> Option<StoredMedia> {
        self.media.read().get(path).cloned()
    }

    pub fn media_count(&self) -> usize {
        self.media.read().len()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn upload_media(&self, path: &str, data: Bytes, content_type: &str) -> Result<String, PipelineError> {
        if self.failing_suffixes.read().iter().any(|s| path.ends_with(s.as_str())) {
            return Err(PipelineError::Persistence(format!("upload of {path} rejected")));
        }
        info!("📦 Stored {} ({} bytes, {})", path, data.len(), content_type);
        self.media.write().insert(path.to_string(), StoredMedia { content_type: content_type.to_string(), data });
        Ok(format!("{}/{}", self.public_base, path))
    }

    async fn create_listing(&self, listing: NewListing) -> Result<Listing, PipelineError> {
        if listing.title.trim().is_empty() {
            return Err(PipelineError::Persistence("listing title is required".into()));
        }
        let listing = Listing::from_new(listing);
        self.listings.write().insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, PipelineError> {
        let mut all: Vec<Listing> = self.listings.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn seller_listings(&self, seller_id: &str) -> Result<Vec<Listing>, PipelineError> {
        let mut mine: Vec<Listing> = self.list_listings().await?;
        mine.retain(|l| l.seller_id == seller_id);
        Ok(mine)
    }

    async fn delete_listing(&self, id: Uuid) -> Result<(), PipelineError> {
        self.listings
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PipelineError::Persistence(format!("listing {id} not found")))
    }

    async fn organizations(&self, owner_id: &str) -> Result<Vec<Organization>, PipelineError> {
        Ok(self.organizations.read().iter().filter(|o| o.owner_id == owner_id).cloned().collect())
    }

    async fn create_organization(&self, name: &str, owner_id: &str) -> Result<Organization, PipelineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::Validation("organization name is required".into()));
        }
        let org = Organization {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            logo_url: Some(format!("https://ui-avatars.com/api/?name={}&background=random", name.replace(' ', "+"))),
        };
        self.organizations.write().push(org.clone());
        Ok(org)
    }
}
