//! Error types for the virtual router.

use cohost_env::{EnvError, Thrown};
use thiserror::Error;

/// Errors that can occur while routing guests.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The shared environment rejected an operation.
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    /// A URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No route state exists for the guest.
    #[error("no route state for app '{0}'")]
    UnknownApp(String),

    /// Host-side navigation of a guest that is not active.
    #[error("navigation failed: app '{0}' is not active")]
    NotActive(String),

    /// A guest tried to change its history state to another origin.
    #[error("SecurityError: app '{app}' cannot move history from '{from}' to '{to}'")]
    CrossOrigin { app: String, from: String, to: String },
}

impl From<RouterError> for Thrown {
    fn from(e: RouterError) -> Self {
        Thrown::new(e.to_string())
    }
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
