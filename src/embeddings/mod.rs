//! Embedding acquisition.
//!
//! Turns text batches into vectors through a hosted API, degrading to the
//! same model run locally when the API is unreliable.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │    Matcher::run  │
//! └────────┬─────────┘
//!          │ items
//!          ▼
//! ┌──────────────────┐
//! │  BatchScheduler  │  ← bounded worker pool, ordered fan-in
//! └────────┬─────────┘
//!          │ batch
//!          ▼
//! ┌──────────────────────┐
//! │ ResilienceController │  ← circuit breaker
//! └────────┬─────────────┘
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐ ┌─────────┐
//! │ Remote │ │  Local  │
//! └────────┘ └─────────┘
//!   HTTPS     fastembed /
//!  DeepInfra   Model2Vec
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use itemmatch::config::MatchSettings;
//! use itemmatch::embeddings::{create_controller, run_batches, silent};
//!
//! let settings = MatchSettings::resolve()?;
//! let controller = Arc::new(create_controller(&settings)?);
//! controller.check_ready()?;
//!
//! let items: Arc<[String]> = vec!["apple juice".to_string()].into();
//! let matrix = run_batches(items, settings.batch_plan(), controller, silent(), "Embedding").await?;
//! println!("{} rows x {} dims", matrix.len(), matrix.dimensions());
//! ```

pub mod backend;
pub mod factory;
pub mod local;
pub mod prepare;
pub mod progress;
pub mod remote;
pub mod resilience;
pub mod scheduler;
pub mod types;

pub use backend::{BoxedBackend, EmbeddingBackend};
pub use factory::{create_controller, create_local_backend, create_remote_backend};
pub use local::LocalBackend;
pub use prepare::{CleanMode, prepare};
pub use progress::{NoticeLevel, ProgressEvent, ProgressSink, SharedProgress, silent};
pub use remote::{RemoteBackend, RemoteOptions, RetryPolicy};
pub use resilience::{ResilienceController, ResilienceSnapshot, ResilienceState};
pub use scheduler::{BatchPlan, EmbeddingMatrix, run_batches};
pub use types::{BackendInfo, BackendKind, OperatingMode};
