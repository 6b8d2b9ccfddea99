//! Job orchestration: validate, stage temp files, resolve the model, convert,
//! deliver, clean up.

mod orchestrator;
mod request;
mod result;
mod scope;


pub use orchestrator::JobOrchestrator;
pub use request::{ConversionInput, ConversionParams, ConversionRequest, F0Method, DEFAULT_MODEL_ID};
pub use result::{ConversionFailure, ConversionOutput, ConversionResult};
pub use scope::{ConversionJob, ScopedFiles};
