//! Custom error types for the application.
//!
//! This module defines the primary error type, `ActionError`, for the whole crate, along with
//! `TriggerError`, the narrower error a trigger may raise while interpreting a data point.
//!
//! ## Error Hierarchy
//!
//! `ActionError` consolidates the failure sources of a pipeline run:
//!
//! - **`Config`** / **`Configuration`**: figment extraction failures and semantic validation
//!   failures of the configuration file.
//! - **`Store`**: failures reported by the collaborator data store.
//! - **`Io`** / **`Serialization`** / **`Http`**: wrapped library errors.
//! - **`Trigger`**: a trigger raised something other than "no data yet". This kills the
//!   processor worker that called it.
//! - **`NotStarted`**, **`AlreadyStarted`**, **`Ended`**, **`Stopped`**, **`PushTimeout`**:
//!   processor lifecycle conditions. `Stopped` carries the worker's terminal error so every later caller sees the
//!   same cause; `PushTimeout` is the backpressure signal and is deliberately a separate variant.
//!
//! "No data for this trigger yet" is not an error at all; see
//! [`Extracted::NoData`](crate::pipeline::trigger::Extracted).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ActionError>;

/// Errors raised by a trigger's `matches`/`extract`.
#[derive(Error, Debug)]
pub enum TriggerError {
    /// The data point's payload has a shape this trigger cannot interpret.
    #[error("Incompatible data for trigger: {0}")]
    Incompatible(String),

    /// Any other defect while evaluating the trigger.
    #[error("Trigger failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl TriggerError {
    /// True for the "value cannot be derived from this point" family of errors.
    pub fn is_not_derivable(&self) -> bool {
        matches!(self, TriggerError::Incompatible(_))
    }
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("Processor '{0}' was used before start() was awaited")]
    NotStarted(String),

    #[error("Processor '{0}' was already started")]
    AlreadyStarted(String),

    #[error("Processor '{0}' has been ended")]
    Ended(String),

    #[error("Processor '{name}' has stopped processing")]
    Stopped {
        name: String,
        #[source]
        cause: Option<Arc<ActionError>>,
    },

    #[error("Processor '{name}' did not accept a data point within {timeout:?}")]
    PushTimeout { name: String, timeout: Duration },

    #[error("Processor worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(String),
}

impl ActionError {
    /// True if this error is the backpressure timeout rather than a failure.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, ActionError::PushTimeout { .. })
    }

    /// The terminal error of a stopped worker, if there was one.
    pub fn stopped_cause(&self) -> Option<&ActionError> {
        match self {
            ActionError::Stopped { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}
