pub mod cache;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod job;
pub mod store;

pub use cache::{CachedModel, ModelAsset, ModelCache};
pub use config::RelayConfig;
pub use delivery::{Delivered, ResultDelivery};
pub use engine::{ApplioEngine, ConversionCall, EngineHandle, VoiceEngine};
pub use error::{EngineError, ErrorKind, JobError, StoreError};
pub use job::{ConversionOutput, ConversionParams, ConversionResult, F0Method, JobOrchestrator};
pub use store::{ObjectStore, Stores};
