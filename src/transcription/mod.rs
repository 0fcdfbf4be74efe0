pub mod capabilities;
pub mod error;
pub mod ingest;
pub mod providers;
pub mod registry;
pub mod service;

pub use capabilities::{Feature, FeatureSet};
pub use error::TranscriptionError;
pub use providers::{
    JobState, JobStatus, TranscribeOptions, TranscriptionProvider, TranscriptionResult,
};
pub use registry::ProviderRegistry;
pub use service::{TranscribeOverrides, TranscriptionService, WebhookOutcome};
