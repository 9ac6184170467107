//! Passive check result handler
//!
//! Turns metric-output bodies into passive check results and submits them to
//! the monitoring system. With a buffer directory, every body goes through a
//! local queue first and is only removed once the sink accepted it, so a
//! monitoring system restart does not lose results.

use super::{optional_str, required_path, Handler, HandlerOutcome};
use crate::config::{ConfigError, HandlerParams};
use crate::metric::{CommandFileSink, MetricOutput, PassiveResult, PassiveSink};
use crate::queue::{DirQueue, QueueError};
use crate::transport::Frame;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const KIND: &str = "passive";

/// How results are mapped onto monitored hosts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostNaming {
    /// Appended to every host name not already carrying it
    pub suffix: Option<String>,
    /// Used when the message names no host at all
    pub default_host: Option<String>,
}

impl HostNaming {
    /// Resolve the monitored host for a metric (pure function)
    pub fn resolve(&self, metric: &MetricOutput) -> Option<String> {
        let host = metric.host().or_else(|| self.default_host.clone())?;
        match &self.suffix {
            Some(suffix) if !suffix.is_empty() && !host.ends_with(suffix.as_str()) => {
                Some(format!("{host}{suffix}"))
            }
            _ => Some(host),
        }
    }
}

/// Build a passive result from a metric body (pure function)
pub fn to_passive_result(body: &[u8], naming: &HostNaming) -> Result<PassiveResult, String> {
    let metric = MetricOutput::from_wire(body).map_err(|e| e.to_string())?;
    let host = naming
        .resolve(&metric)
        .ok_or_else(|| format!("metric '{}' names no host", metric.metric_name))?;

    let output = if metric.details.is_empty() {
        metric.summary.clone()
    } else {
        format!("{}\n{}", metric.summary, metric.details)
    };

    Ok(PassiveResult {
        host,
        service: metric.service().to_string(),
        status: metric.status,
        output,
        timestamp: metric.timestamp.unwrap_or_else(Utc::now),
    })
}

/// Submits metric bodies to a passive sink
pub struct PassiveResultHandler {
    sink: Arc<dyn PassiveSink>,
    buffer: Option<DirQueue>,
    naming: HostNaming,
}

impl PassiveResultHandler {
    pub fn new(sink: Arc<dyn PassiveSink>, naming: HostNaming) -> Self {
        Self {
            sink,
            buffer: None,
            naming,
        }
    }

    pub fn with_buffer(mut self, buffer: DirQueue) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn from_params(params: &HandlerParams) -> Result<Self, ConfigError> {
        let command_file = required_path(params, KIND, "command_file")?;
        let naming = HostNaming {
            suffix: optional_str(params, KIND, "host_suffix")?,
            default_host: optional_str(params, KIND, "default_host")?,
        };

        let mut handler = Self::new(Arc::new(CommandFileSink::new(command_file)), naming);
        if let Some(buffer_dir) = optional_str(params, KIND, "buffer_dir")? {
            let queue = DirQueue::open(&buffer_dir)
                .map_err(|e| ConfigError::handler_init(KIND, e.to_string()))?;
            handler = handler.with_buffer(queue);
        }
        Ok(handler)
    }

    async fn submit_direct(&self, body: &[u8]) -> HandlerOutcome {
        let result = match to_passive_result(body, &self.naming) {
            Ok(result) => result,
            Err(e) => return HandlerOutcome::failed(format!("unusable metric message: {e}")),
        };

        match self.sink.submit(&result).await {
            Ok(()) => HandlerOutcome::ok()
                .with_note(format!("submitted {}/{}", result.host, result.service)),
            Err(e) => HandlerOutcome::failed(e.to_string()),
        }
    }

    async fn submit_buffered(&self, queue: &DirQueue, frame: &Frame) -> HandlerOutcome {
        let mut headers = BTreeMap::new();
        headers.insert("topic".to_string(), frame.topic.clone());
        let body = frame.body.clone();
        if let Err(e) = on_queue(queue, move |q| q.enqueue(&body, &headers)).await {
            return HandlerOutcome::failed(format!("failed to buffer message: {e}"));
        }

        let mut notes = Vec::new();
        let mut submitted = 0usize;

        loop {
            let message = match on_queue(queue, |q| q.oldest()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    return HandlerOutcome {
                        success: false,
                        error: Some(format!("failed to read buffer: {e}")),
                        notes,
                    }
                }
            };

            match to_passive_result(&message.body, &self.naming) {
                Ok(result) => {
                    if let Err(e) = self.sink.submit(&result).await {
                        let pending = on_queue(queue, |q| q.len()).await.unwrap_or_default();
                        notes.push(format!("submitted {submitted}, {pending} left buffered"));
                        return HandlerOutcome {
                            success: false,
                            error: Some(e.to_string()),
                            notes,
                        };
                    }
                    submitted += 1;
                }
                Err(e) => {
                    warn!(message = %message.name, error = %e, "Dropping unusable buffered metric");
                    notes.push(format!("dropped {}: {e}", message.name));
                }
            }

            let name = message.name.clone();
            if let Err(e) = on_queue(queue, move |q| q.ack(&name)).await {
                return HandlerOutcome {
                    success: false,
                    error: Some(format!("failed to remove {}: {e}", message.name)),
                    notes,
                };
            }
        }

        match on_queue(queue, |q| q.purge_if_small()).await {
            Ok(removed) if removed > 0 => debug!(removed, "Purged stale buffer files"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Buffer maintenance failed"),
        }

        notes.push(format!("submitted {submitted} buffered result(s)"));
        HandlerOutcome {
            success: true,
            error: None,
            notes,
        }
    }
}

/// Run one buffer operation on the blocking pool
async fn on_queue<T, F>(queue: &DirQueue, op: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&DirQueue) -> Result<T, QueueError> + Send + 'static,
{
    let queue = queue.clone();
    match tokio::task::spawn_blocking(move || op(&queue)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("buffer task failed: {e}")),
    }
}

#[async_trait]
impl Handler for PassiveResultHandler {
    fn kind(&self) -> &str {
        KIND
    }

    async fn handle_message(&self, frame: &Frame) -> HandlerOutcome {
        match &self.buffer {
            Some(queue) => self.submit_buffered(queue, frame).await,
            None => self.submit_direct(&frame.body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricStatus, SinkError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        submitted: Mutex<Vec<PassiveResult>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl PassiveSink for RecordingSink {
        async fn submit(&self, result: &PassiveResult) -> Result<(), SinkError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SinkError::Write {
                    path: "/var/run/cmd".into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no reader"),
                });
            }
            self.submitted.lock().await.push(result.clone());
            Ok(())
        }
    }

    fn body(host: &str, status: MetricStatus) -> Vec<u8> {
        let mut metric = MetricOutput::new("org.example.Ping", status);
        metric.hostname = Some(host.to_string());
        metric.summary = "summary".to_string();
        metric.to_wire().into_bytes()
    }

    #[test]
    fn test_host_naming() {
        let mut metric = MetricOutput::new("m", MetricStatus::Ok);
        let naming = HostNaming {
            suffix: Some(".example.org".to_string()),
            default_host: Some("fallback".to_string()),
        };
        assert_eq!(naming.resolve(&metric).as_deref(), Some("fallback.example.org"));

        metric.hostname = Some("ce01.example.org".to_string());
        assert_eq!(naming.resolve(&metric).as_deref(), Some("ce01.example.org"));

        assert_eq!(HostNaming::default().resolve(&MetricOutput::new("m", MetricStatus::Ok)), None);
    }

    #[test]
    fn test_output_joins_summary_and_details() {
        let mut metric = MetricOutput::new("m", MetricStatus::Warning);
        metric.hostname = Some("h".to_string());
        metric.summary = "slow".to_string();
        metric.details = "took 40s".to_string();

        let result = to_passive_result(metric.to_wire().as_bytes(), &HostNaming::default()).unwrap();
        assert_eq!(result.output, "slow\ntook 40s");
        assert_eq!(result.status, MetricStatus::Warning);
        assert_eq!(result.service, "m");
    }

    #[tokio::test]
    async fn test_direct_submission() {
        let sink = Arc::new(RecordingSink::default());
        let handler = PassiveResultHandler::new(sink.clone(), HostNaming::default());

        let outcome = handler
            .handle_message(&Frame::new("t", body("h1", MetricStatus::Ok)))
            .await;
        assert!(outcome.success);
        assert_eq!(sink.submitted.lock().await[0].host, "h1");

        let garbage = handler.handle_message(&Frame::new("t", "not a metric")).await;
        assert!(!garbage.success);
    }

    #[tokio::test]
    async fn test_buffer_keeps_results_until_sink_recovers() {
        let dir = TempDir::new().unwrap();
        let queue = DirQueue::open(dir.path()).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let handler = PassiveResultHandler::new(sink.clone(), HostNaming::default())
            .with_buffer(queue.clone());

        sink.failing.store(true, Ordering::SeqCst);
        let first = handler
            .handle_message(&Frame::new("t", body("h1", MetricStatus::Ok)))
            .await;
        assert!(!first.success);
        assert_eq!(queue.len().unwrap(), 1);

        sink.failing.store(false, Ordering::SeqCst);
        let second = handler
            .handle_message(&Frame::new("t", body("h2", MetricStatus::Critical)))
            .await;
        assert!(second.success, "{second:?}");
        assert!(queue.is_empty().unwrap());

        let hosts: Vec<String> = sink
            .submitted
            .lock()
            .await
            .iter()
            .map(|r| r.host.clone())
            .collect();
        assert_eq!(hosts, vec!["h1", "h2"]);
    }

    #[test]
    fn test_from_params_requires_command_file() {
        assert!(matches!(
            PassiveResultHandler::from_params(&HandlerParams::new()),
            Err(ConfigError::InvalidHandlerParams { .. })
        ));
    }
}
