//! Directory queue handler

use super::{required_path, Handler, HandlerOutcome};
use crate::config::{ConfigError, HandlerParams};
use crate::queue::DirQueue;
use crate::transport::Frame;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;

pub const KIND: &str = "dirq";

/// Enqueues every frame body into a directory queue
#[derive(Debug, Clone)]
pub struct DirQueueHandler {
    queue: DirQueue,
}

impl DirQueueHandler {
    pub fn new(queue: DirQueue) -> Self {
        Self { queue }
    }

    pub fn from_params(params: &HandlerParams) -> Result<Self, ConfigError> {
        let path = required_path(params, KIND, "dirq")?;
        let queue =
            DirQueue::open(&path).map_err(|e| ConfigError::handler_init(KIND, e.to_string()))?;
        Ok(Self::new(queue))
    }

    pub fn queue(&self) -> &DirQueue {
        &self.queue
    }
}

#[async_trait]
impl Handler for DirQueueHandler {
    fn kind(&self) -> &str {
        KIND
    }

    async fn handle_message(&self, frame: &Frame) -> HandlerOutcome {
        let mut headers = BTreeMap::new();
        headers.insert("topic".to_string(), frame.topic.clone());
        headers.insert("received_at".to_string(), Utc::now().to_rfc3339());

        let queue = self.queue.clone();
        let body = frame.body.clone();
        let result = tokio::task::spawn_blocking(move || queue.enqueue(&body, &headers)).await;

        match result {
            Ok(Ok(name)) => HandlerOutcome::ok().with_note(format!(
                "queued {} as {name}",
                self.queue.path().display()
            )),
            Ok(Err(e)) => HandlerOutcome::failed(e.to_string()),
            Err(e) => HandlerOutcome::failed(format!("enqueue task failed: {e}")),
        }
    }
}
