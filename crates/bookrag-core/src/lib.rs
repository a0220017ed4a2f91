//! BookRag Core — configuration, error taxonomy, retry policy, cancellation.

pub mod cancel;
pub mod config;
pub mod error;
pub mod retry;

pub use cancel::CancelFlag;
pub use config::PipelineConfig;
pub use error::{Error, FailureKind, Result};
pub use retry::RetryPolicy;
