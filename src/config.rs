use std::time::Duration;

use crate::error::PipelineError;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Values that ship in templates and `.env.example` files and must never reach the API.
const PLACEHOLDER_KEYS: &[&str] = &["DEMO_KEY", "PLACEHOLDER_API_KEY", "your-api-key", "changeme"];

/// Everything the pipeline needs, resolved once at startup and passed into each stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_key: String,
    pub base_url: String,
    pub refine_model: String,
    pub image_model: String,
    pub video_model: String,
    pub refine_retry: RetryPolicy,
    pub image_retry: RetryPolicy,
    pub video_poll_interval: Duration,
    pub close_delay: Duration,
    /// Sessions untouched for this long are closed by the reaper.
    pub session_ttl: Duration,
    pub currency: String,
}

impl PipelineConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            refine_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            video_model: "veo-3.1-fast-generate-preview".to_string(),
            refine_retry: RetryPolicy::new(3, Duration::from_secs(1)),
            image_retry: RetryPolicy::new(5, Duration::from_secs(2)),
            video_poll_interval: Duration::from_secs(5),
            close_delay: Duration::from_secs(2),
            session_ttl: Duration::from_secs(30 * 60),
            currency: "TND".to_string(),
        }
    }

    /// Reads the process environment. A missing key is kept empty here and rejected by `validate`.
    pub fn from_env() -> Self {
        let mut config = Self::new(std::env::var("GEMINI_API_KEY").unwrap_or_default());
        if let Ok(base) = std::env::var("GEMINI_API_BASE") {
            config.base_url = base.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("REFINE_MODEL") {
            config.refine_model = model;
        }
        if let Ok(model) = std::env::var("IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Ok(model) = std::env::var("VIDEO_MODEL") {
            config.video_model = model;
        }
        if let Ok(currency) = std::env::var("LISTING_CURRENCY") {
            config.currency = currency;
        }
        if let Some(secs) = std::env::var("SESSION_TTL_SECS").ok().and_then(|v| v.parse::<u64>().ok()) {
            config.session_ttl = Duration::from_secs(secs);
        }
        config
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(PipelineError::Configuration(
                "GEMINI_API_KEY is not set; add it to the environment or .env file".into(),
            ));
        }
        if PLACEHOLDER_KEYS.iter().any(|p| p.eq_ignore_ascii_case(key)) {
            return Err(PipelineError::Configuration(format!(
                "GEMINI_API_KEY is a placeholder value ({key}); replace it with a real key"
            )));
        }
        if self.session_ttl.is_zero() {
            return Err(PipelineError::Configuration("SESSION_TTL_SECS must be greater than zero".into()));
        }
        if self.base_url.is_empty() {
            return Err(PipelineError::Configuration("GEMINI_API_BASE is empty".into()));
        }
        Ok(())
    }

    /// Key preview safe for logs.
    pub fn redacted_key(&self) -> String {
        let visible: String = self.api_key.chars().take(4).collect();
        format!("{visible}***")
    }
}
