//! Topology Error Types

use thiserror::Error;

/// Errors raised while loading or validating cluster topology configuration
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Configuration file could not be read
    #[error("Config I/O error: {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Configuration could not be parsed
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration parsed but failed validation
    #[error("Config validation error: {message}")]
    Validation { message: String },

    /// A role name in the configuration is not a known role
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// A peer lookup found no matching directory entry
    #[error("Unknown peer: {role} instance {instance}")]
    UnknownPeer { role: crate::Role, instance: u32 },
}

/// Result type alias for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;

impl TopologyError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an I/O error with the offending path
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
