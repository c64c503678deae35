use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ProductDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_category() -> String {
    "Other".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Ar,
}

impl Language {
    /// Output-language clause for the copywriting prompt.
    pub fn instruction(&self) -> &'static str {
        match self {
            Language::En => "in English",
            Language::Fr => "in French",
            Language::Ar => "in Tunisian Arabic (Derja)",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Studio,
    Lifestyle,
    Outdoor,
    Luxury,
    Custom,
}

impl Style {
    pub const ALL: [Style; 5] = [Style::Studio, Style::Lifestyle, Style::Outdoor, Style::Luxury, Style::Custom];

    pub fn key(&self) -> &'static str {
        match self {
            Style::Studio => "studio",
            Style::Lifestyle => "lifestyle",
            Style::Outdoor => "outdoor",
            Style::Luxury => "luxury",
            Style::Custom => "custom",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Style {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Style::ALL
            .into_iter()
            .find(|style| style.key() == key)
            .ok_or_else(|| PipelineError::Validation(format!("unknown style `{s}`")))
    }
}

/// Style preset plus the seller's free-text modifier. Only feeds prompt construction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct StyleSelection {
    pub style: Style,
    #[serde(default)]
    pub modifier: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoAsset {
    pub source_uri: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// Output of the generation stages, owned by one wizard session until publish.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAsset {
    /// Generation request this image answers; stale results are matched against it.
    pub generation: u64,
    pub image_base64: String,
    pub prompt: String,
    pub video: Option<VideoAsset>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Seller {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub logo_url: Option<String>,
}

/// Everything the store needs to create a listing on publish.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewListing {
    pub seller_id: String,
    pub seller_name: String,
    pub organization_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub category: String,
    pub tags: Vec<String>,
    pub image_url: String,
    pub video_url: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: String,
    pub seller_name: String,
    pub organization_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub category: String,
    pub tags: Vec<String>,
    pub image_url: String,
    pub video_url: Option<String>,
    pub views: u64,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn from_new(listing: NewListing) -> Self {
        Self {
            id: Uuid::new_v4(),
            seller_id: listing.seller_id,
            seller_name: listing.seller_name,
            organization_id: listing.organization_id,
            title: listing.title,
            description: listing.description,
            price: listing.price,
            currency: listing.currency,
            category: listing.category,
            tags: listing.tags,
            image_url: listing.image_url,
            video_url: listing.video_url,
            views: 0,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_keys_round_trip_through_from_str() {
        for style in Style::ALL {
            assert_eq!(style.key().parse::<Style>().unwrap(), style);
        }
        assert_eq!(" Luxury ".parse::<Style>().unwrap(), Style::Luxury);
        assert!(matches!("vintage".parse::<Style>(), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn draft_defaults_category() {
        let draft: ProductDraft = serde_json::from_str(r#"{"title":"Lamp","price":50}"#).unwrap();
        assert_eq!(draft.category, "Other");
        assert!(draft.tags.is_empty());
    }
}
