//! Message handlers
//!
//! A handler receives the frames whose topic matched its configured pattern
//! and performs one side effect per frame. Handler kinds form a closed table
//! resolved by name at configuration time:
//!
//! | kind      | effect                                                   |
//! |-----------|----------------------------------------------------------|
//! | `dirq`    | enqueue the body into a directory-backed queue           |
//! | `passive` | submit the body as a passive check result                |
//! | `log`     | log the body                                             |

use crate::config::{ConfigError, HandlerParams};
use crate::error::HandlerError;
use crate::transport::Frame;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub mod dirq;
pub mod log;
pub mod passive;

pub use dirq::DirQueueHandler;
pub use log::LogHandler;
pub use passive::PassiveResultHandler;

/// Result of handling one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// Extra detail, logged only in verbose mode
    pub notes: Vec<String>,
}

impl HandlerOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            notes: Vec::new(),
        }
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert into a typed result, naming the handler on failure
    pub fn into_result(self, handler: &str) -> Result<Vec<String>, HandlerError> {
        if self.success {
            Ok(self.notes)
        } else {
            Err(HandlerError {
                handler: handler.to_string(),
                message: self
                    .error
                    .unwrap_or_else(|| "handler reported failure".to_string()),
                notes: self.notes,
            })
        }
    }
}

/// Handler capability used by the dispatch loop
#[async_trait]
pub trait Handler: Send + Sync {
    /// Kind identifier as used in configuration
    fn kind(&self) -> &str;

    /// Process one frame; failures are reported, never raised
    async fn handle_message(&self, frame: &Frame) -> HandlerOutcome;
}

/// Constructs handlers from a kind identifier and parameters
pub trait HandlerFactory: Send + Sync {
    fn build(&self, kind: &str, params: &HandlerParams) -> Result<Arc<dyn Handler>, ConfigError>;
}

/// The closed table of built-in handler kinds
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinHandlers;

impl BuiltinHandlers {
    pub const KINDS: [&'static str; 3] = [dirq::KIND, passive::KIND, log::KIND];
}

impl HandlerFactory for BuiltinHandlers {
    fn build(&self, kind: &str, params: &HandlerParams) -> Result<Arc<dyn Handler>, ConfigError> {
        match kind {
            dirq::KIND => Ok(Arc::new(DirQueueHandler::from_params(params)?)),
            passive::KIND => Ok(Arc::new(PassiveResultHandler::from_params(params)?)),
            log::KIND => Ok(Arc::new(LogHandler::from_params(params)?)),
            other => Err(ConfigError::UnknownHandler(other.to_string())),
        }
    }
}

/// Required string parameter
pub(crate) fn required_str(
    params: &HandlerParams,
    handler: &str,
    key: &str,
) -> Result<String, ConfigError> {
    match params.get(key) {
        Some(serde_json::Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(_) => Err(ConfigError::invalid_params(
            handler,
            format!("'{key}' must be a non-empty string"),
        )),
        None => Err(ConfigError::invalid_params(
            handler,
            format!("missing required parameter '{key}'"),
        )),
    }
}

/// Optional string parameter
pub(crate) fn optional_str(
    params: &HandlerParams,
    handler: &str,
    key: &str,
) -> Result<Option<String>, ConfigError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ConfigError::invalid_params(
            handler,
            format!("'{key}' must be a string"),
        )),
    }
}

pub(crate) fn required_path(
    params: &HandlerParams,
    handler: &str,
    key: &str,
) -> Result<PathBuf, ConfigError> {
    required_str(params, handler, key).map(PathBuf::from)
}
