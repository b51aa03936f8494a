//! Layered error definitions
//!
//! Categorized by source: config / marshalling / transport / execution

use thiserror::Error;

/// Unified error type for the collaborator contracts
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Marshalling Errors =====
    /// Command or response could not be encoded
    #[error("cannot marshal {type_name}: {message}")]
    Marshal { type_name: String, message: String },

    /// Bytes could not be decoded into a command or response
    #[error("cannot unmarshal {type_name}: {message}")]
    Unmarshal { type_name: String, message: String },

    // ===== Transport Errors =====
    /// Transport refused or failed to send
    #[error("transport error: {message}")]
    Transport { message: String },

    // ===== Execution Errors =====
    /// Command execution failed on the local node
    #[error("execution of {command} failed: {message}")]
    Execution { command: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create marshal error
    pub fn marshal(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Marshal {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Create unmarshal error
    pub fn unmarshal(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unmarshal {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create execution error
    pub fn execution(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            message: message.into(),
        }
    }
}
