//! Error types for the lifecycle engine.

use cohost_env::{EnvError, Thrown};
use cohost_router::RouterError;
use cohost_sandbox::SandboxError;
use thiserror::Error;

use crate::loader::LoadError;

/// Errors surfaced to host code.
///
/// Failures inside guest code never reach the host as `Err`; they are logged
/// as [`Error::Hook`] and swallowed. This type exists so the host can still
/// inspect what happened.
#[derive(Debug, Error)]
pub enum Error {
    /// A guest's sources could not be fetched or parsed.
    #[error("failed to load app '{app}': {source}")]
    Load {
        app: String,
        #[source]
        source: LoadError,
    },

    /// A guest-supplied hook threw.
    #[error("{hook} hook of app '{app}' threw: {message}")]
    Hook { app: String, hook: String, message: String },

    /// Missing or invalid registration configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A guest with this name is already running.
    #[error("app name conflict: an app named '{name}' with url '{url}' is running")]
    NameConflict { name: String, url: String },

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid options: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn hook(app: &str, hook: &str, thrown: &Thrown) -> Self {
        Error::Hook {
            app: app.to_string(),
            hook: hook.to_string(),
            message: thrown.message.clone(),
        }
    }
}

impl From<Error> for Thrown {
    fn from(e: Error) -> Self {
        Thrown::new(e.to_string())
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, Error>;
