//! Error types for sandboxing.

use cohost_env::{EnvError, Thrown};
use cohost_router::RouterError;
use thiserror::Error;

/// Errors that can occur while sandboxing a guest.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The shared environment rejected an operation.
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    /// Route state could not be set up or torn down.
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// A URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<SandboxError> for Thrown {
    fn from(e: SandboxError) -> Self {
        Thrown::new(e.to_string())
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
