pub mod config;
pub mod error;
pub mod fake;
pub mod gemini;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod routes;
pub mod session;
pub mod store;
pub mod wizard;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{MediaModel, Pipeline};
pub use session::{SessionView, WizardSession, WizardStep};
pub use store::{ListingStore, MemoryStore};
pub use wizard::UploadWizard;
