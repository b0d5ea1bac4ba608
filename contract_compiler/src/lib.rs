// Internal modules
pub mod batch;
pub mod config;
pub mod contract;
pub mod dependency;
#[macro_use]
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod render;
pub mod secrets;
pub mod validation;

// Re-export key types for library consumers
pub use batch::{BatchConfig, BatchError};
pub use contract::{RenderTarget, ResolvedContract, ServiceContract};
pub use pipeline::{compile, CompileReport, CompileRequest, PipelineError, TargetOutcome, TargetStatus};
pub use render::{BackendRenderer, RenderedArtifact};
