//! Error types for alchemical.
//!
//! This module defines all error types using `thiserror`. Driver failures are
//! carried untranslated in [`Error::Driver`] so callers can match on the
//! original `sqlx::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Conflict for entity '{entity}': {message}")]
    Conflict { entity: String, message: String },

    #[error("Database instance is not initialized. Call initialize() before using it.")]
    NotInitialized,

    #[error("Entity '{entity}' is not registered")]
    NotRegistered { entity: String },

    #[error("No engine is configured for {target}")]
    Unbound { target: String },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Bridge error: {message}")]
    Bridge { message: String },

    /// Driver failure, passed through unchanged.
    #[error(transparent)]
    Driver(#[from] sqlx::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a registration conflict error.
    pub fn conflict(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create an entity-not-registered error.
    pub fn not_registered(entity: impl Into<String>) -> Self {
        Self::NotRegistered {
            entity: entity.into(),
        }
    }

    /// Create an error for a statement target that resolves to no engine.
    pub fn unbound(target: impl Into<String>) -> Self {
        Self::Unbound {
            target: target.into(),
        }
    }

    /// Create a permission error.
    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a bridge error.
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    /// Get the underlying driver error, if this is one.
    pub fn as_driver(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }

    /// Check whether the driver reported a missing table.
    pub fn is_missing_table(&self) -> bool {
        match self {
            Self::Driver(sqlx::Error::Database(db_err)) => {
                let message = db_err.message().to_lowercase();
                message.contains("no such table")
                    || message.contains("does not exist")
                    || message.contains("doesn't exist")
            }
            _ => false,
        }
    }
}

/// Result type alias for alchemical operations.
pub type Result<T> = std::result::Result<T, Error>;
