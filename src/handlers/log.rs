//! Logging handler, mostly for diagnostics

use super::{optional_str, Handler, HandlerOutcome};
use crate::config::{ConfigError, HandlerParams};
use crate::transport::Frame;
use async_trait::async_trait;
use tracing::info;

pub const KIND: &str = "log";

#[derive(Debug, Clone, Default)]
pub struct LogHandler {
    label: Option<String>,
}

impl LogHandler {
    pub fn from_params(params: &HandlerParams) -> Result<Self, ConfigError> {
        Ok(Self {
            label: optional_str(params, KIND, "label")?,
        })
    }
}

#[async_trait]
impl Handler for LogHandler {
    fn kind(&self) -> &str {
        KIND
    }

    async fn handle_message(&self, frame: &Frame) -> HandlerOutcome {
        info!(
            topic = %frame.topic,
            label = self.label.as_deref().unwrap_or(KIND),
            bytes = frame.body.len(),
            body = %String::from_utf8_lossy(&frame.body),
            "Received message"
        );
        HandlerOutcome::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_fails_on_binary_body() {
        let handler = LogHandler::default();
        let outcome = handler
            .handle_message(&Frame::new("a.b", vec![0xff, 0x00, 0xfe]))
            .await;
        assert!(outcome.success);
    }
}
