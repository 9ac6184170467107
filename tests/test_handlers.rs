//! Built-in handlers constructed the way the daemon constructs them:
//! from configuration parameters through the handler factory.

use msg2handler::config::HandlerConfig;
use msg2handler::handlers::{BuiltinHandlers, HandlerFactory};
use msg2handler::metric::{MetricOutput, MetricStatus};
use msg2handler::queue::DirQueue;
use msg2handler::transport::Frame;
use std::fs;
use tempfile::TempDir;

fn metric_body(host: &str, service: &str, status: MetricStatus) -> Vec<u8> {
    let mut metric = MetricOutput::new(service, status);
    metric.hostname = Some(host.to_string());
    metric.summary = "OK - all fine".to_string();
    metric.to_wire().into_bytes()
}

#[tokio::test]
async fn test_dirq_handler_queues_every_body() {
    let dir = TempDir::new().unwrap();
    let queue_dir = dir.path().join("outgoing");
    let config = HandlerConfig::new("grid.probe.*", "dirq")
        .with_param("dirq", queue_dir.display().to_string());

    let handler = BuiltinHandlers.build(&config.handler, &config.params).unwrap();
    for body in ["first", "second"] {
        let outcome = handler
            .handle_message(&Frame::new("grid.probe.x", body))
            .await;
        assert!(outcome.success, "{outcome:?}");
    }

    let queue = DirQueue::open(&queue_dir).unwrap();
    assert_eq!(queue.len().unwrap(), 2);
    let oldest = queue.oldest().unwrap().unwrap();
    assert_eq!(oldest.body, b"first");
}

#[tokio::test]
async fn test_passive_handler_writes_command_line() {
    let dir = TempDir::new().unwrap();
    let command_file = dir.path().join("nagios.cmd");
    fs::write(&command_file, "").unwrap();

    let config = HandlerConfig::new("grid.probe.metricOutput.EGEE.*", "passive")
        .with_param("command_file", command_file.display().to_string())
        .with_param("host_suffix", ".example.org");
    let handler = BuiltinHandlers.build(&config.handler, &config.params).unwrap();

    let outcome = handler
        .handle_message(&Frame::new(
            "grid.probe.metricOutput.EGEE.ops",
            metric_body("ce01", "org.example.Ping", MetricStatus::Critical),
        ))
        .await;
    assert!(outcome.success, "{outcome:?}");

    let written = fs::read_to_string(&command_file).unwrap();
    assert!(
        written.contains("PROCESS_SERVICE_CHECK_RESULT;ce01.example.org;org.example.Ping;2;OK - all fine"),
        "unexpected command: {written}"
    );
}

#[tokio::test]
async fn test_passive_handler_buffers_while_command_file_is_missing() {
    let dir = TempDir::new().unwrap();
    let command_file = dir.path().join("nagios.cmd");
    let buffer_dir = dir.path().join("buffer");

    let config = HandlerConfig::new("grid.probe.*", "passive")
        .with_param("command_file", command_file.display().to_string())
        .with_param("buffer_dir", buffer_dir.display().to_string());
    let handler = BuiltinHandlers.build(&config.handler, &config.params).unwrap();

    let first = handler
        .handle_message(&Frame::new(
            "grid.probe.a",
            metric_body("h1", "svc", MetricStatus::Ok),
        ))
        .await;
    assert!(!first.success);
    assert_eq!(DirQueue::open(&buffer_dir).unwrap().len().unwrap(), 1);

    // The monitoring system comes back
    fs::write(&command_file, "").unwrap();
    let second = handler
        .handle_message(&Frame::new(
            "grid.probe.b",
            metric_body("h2", "svc", MetricStatus::Warning),
        ))
        .await;
    assert!(second.success, "{second:?}");

    let written = fs::read_to_string(&command_file).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(";h1;svc;0;"));
    assert!(lines[1].contains(";h2;svc;1;"));
    assert!(DirQueue::open(&buffer_dir).unwrap().is_empty().unwrap());
}

#[tokio::test]
async fn test_log_handler_never_fails() {
    let handler = BuiltinHandlers
        .build("log", &HandlerConfig::new("a", "log").params)
        .unwrap();
    let outcome = handler
        .handle_message(&Frame::new("a", vec![0xff, 0xfe, 0x00]))
        .await;
    assert!(outcome.success);
}
