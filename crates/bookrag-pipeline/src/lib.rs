//! BookRag Pipeline — orchestration, validation, and the query surface.

pub mod orchestrator;
pub mod report;
pub mod retrieve;
pub mod validator;

pub use orchestrator::Pipeline;
pub use report::{FailureRecord, RunReport, RunStage};
pub use retrieve::{RetrievedPassage, Retriever};
pub use validator::{ProbeResult, ValidationProbe, ValidationSummary, Validator};
