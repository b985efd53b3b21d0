use crate::policy::AccessMode;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TablesError {
    #[error("validation: {reason}")]
    Validation { reason: String },

    #[error(
        "policy: {} operations are not allowed in {} queries: {}",
        .mode.forbidden_label(),
        .mode,
        join_operations(.disallowed)
    )]
    Policy {
        mode: AccessMode,
        disallowed: BTreeSet<String>,
    },

    #[error("policy: operation '{operation}' not permitted: server is configured in read-only mode")]
    WriteDisabled { operation: String },

    #[error("connection: {message}")]
    Connection { message: String },

    #[error("execution: {message}")]
    Execution { message: String },

    #[error("unsupported: {message}")]
    Unsupported { message: String },

    #[error("config: {message}")]
    Config { message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("format: {message}")]
    Format { message: String },
}

impl TablesError {
    /// Short category tag used in the JSON error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            TablesError::Validation { .. } => "validation",
            TablesError::Policy { .. } | TablesError::WriteDisabled { .. } => "policy",
            TablesError::Connection { .. } => "connection",
            TablesError::Execution { .. } => "execution",
            TablesError::Unsupported { .. } => "unsupported",
            TablesError::Config { .. } => "config",
            TablesError::Io(_) => "io",
            TablesError::Format { .. } => "format",
        }
    }

    /// The message without its category prefix, for embedding in result messages.
    pub fn detail(&self) -> String {
        match self {
            TablesError::Validation { reason } => reason.clone(),
            TablesError::Connection { message }
            | TablesError::Execution { message }
            | TablesError::Unsupported { message }
            | TablesError::Config { message }
            | TablesError::Format { message } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        TablesError::Validation {
            reason: reason.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        TablesError::Connection {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        TablesError::Execution {
            message: message.into(),
        }
    }
}

fn join_operations(ops: &BTreeSet<String>) -> String {
    ops.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
