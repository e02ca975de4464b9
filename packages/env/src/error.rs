//! Error types for the shared environment.

use thiserror::Error;

use crate::dom::NodeId;

/// Errors raised by operations on the shared environment.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Assignment to a property whose descriptor is not writable.
    #[error("cannot assign to read-only property '{0}'")]
    ReadOnly(String),

    /// Redefinition or deletion of a non-configurable property.
    #[error("cannot redefine non-configurable property '{0}'")]
    NotConfigurable(String),

    /// A URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A history operation tried to leave the current origin.
    #[error("history state url '{to}' is not same-origin with '{from}'")]
    CrossOrigin { from: String, to: String },

    /// A node id does not refer to a live node.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A selector could not be parsed.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// Tried to append a node into itself or one of its descendants.
    #[error("node {child} cannot be inserted under {parent}")]
    Hierarchy { parent: NodeId, child: NodeId },
}

/// A value thrown by guest code.
///
/// Guest failures are carried as values so the host can log and swallow
/// them without unwinding.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct Thrown {
    pub message: String,
}

impl Thrown {
    /// Create a thrown value carrying a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<EnvError> for Thrown {
    fn from(e: EnvError) -> Self {
        Thrown::new(e.to_string())
    }
}

/// Result type alias for environment operations.
pub type Result<T> = std::result::Result<T, EnvError>;
