//! Metric output messages and the passive-result sink
//!
//! A metric output message is the text body probes publish on the bus:
//!
//! ```text
//! serviceURI: ce01.example.org
//! hostName: ce01.example.org
//! metricName: org.sam.CE-JobSubmit
//! metricStatus: WARNING
//! timestamp: 2024-03-01T12:00:00Z
//! summaryData: Job submission slow
//! detailsData: first line
//! second line
//! EOT
//! ```
//!
//! `detailsData` is always last and runs until the `EOT` line.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const END_OF_MESSAGE: &str = "EOT";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Check status with monitoring-system return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl MetricStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "OK" => Some(MetricStatus::Ok),
            "WARNING" => Some(MetricStatus::Warning),
            "CRITICAL" => Some(MetricStatus::Critical),
            "UNKNOWN" => Some(MetricStatus::Unknown),
            _ => None,
        }
    }

    pub fn return_code(self) -> u8 {
        match self {
            MetricStatus::Ok => 0,
            MetricStatus::Warning => 1,
            MetricStatus::Critical => 2,
            MetricStatus::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricStatus::Ok => "OK",
            MetricStatus::Warning => "WARNING",
            MetricStatus::Critical => "CRITICAL",
            MetricStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric output parse errors
#[derive(Debug, Error, PartialEq)]
pub enum MetricParseError {
    #[error("Message body is not valid UTF-8")]
    NotUtf8,
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid metric status '{0}'")]
    InvalidStatus(String),
    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Structured check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOutput {
    pub service_uri: Option<String>,
    pub hostname: Option<String>,
    pub metric_name: String,
    pub status: MetricStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub summary: String,
    pub details: String,
    /// Remaining fields such as `siteName`, `voName`, `nagiosName`
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl MetricOutput {
    pub fn new<N: Into<String>>(metric_name: N, status: MetricStatus) -> Self {
        Self {
            service_uri: None,
            hostname: None,
            metric_name: metric_name.into(),
            status,
            timestamp: None,
            summary: String::new(),
            details: String::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse a bus message body
    pub fn from_wire(body: &[u8]) -> Result<Self, MetricParseError> {
        let text = std::str::from_utf8(body).map_err(|_| MetricParseError::NotUtf8)?;

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        let mut details: Option<Vec<&str>> = None;

        for line in text.lines() {
            if let Some(lines) = details.as_mut() {
                if line.trim_end() == END_OF_MESSAGE {
                    break;
                }
                lines.push(line);
                continue;
            }
            if line.trim_end() == END_OF_MESSAGE {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.strip_prefix(' ').unwrap_or(value);
            if key == "detailsData" {
                details = Some(vec![value]);
            } else {
                fields.insert(key.trim().to_string(), value.trim_end().to_string());
            }
        }

        let metric_name = fields
            .remove("metricName")
            .ok_or(MetricParseError::MissingField("metricName"))?;
        let status_text = fields
            .remove("metricStatus")
            .ok_or(MetricParseError::MissingField("metricStatus"))?;
        let status = MetricStatus::parse(&status_text)
            .ok_or(MetricParseError::InvalidStatus(status_text))?;
        let timestamp = match fields.remove("timestamp") {
            Some(raw) => match NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT) {
                Ok(naive) => Some(Utc.from_utc_datetime(&naive)),
                Err(_) => return Err(MetricParseError::InvalidTimestamp(raw)),
            },
            None => None,
        };

        Ok(Self {
            service_uri: fields.remove("serviceURI"),
            hostname: fields.remove("hostName"),
            metric_name,
            status,
            timestamp,
            summary: fields.remove("summaryData").unwrap_or_default(),
            details: details.map(|lines| lines.join("\n")).unwrap_or_default(),
            extra: fields,
        })
    }

    /// Format as a bus message body
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(uri) = &self.service_uri {
            out.push_str(&format!("serviceURI: {uri}\n"));
        }
        if let Some(host) = &self.hostname {
            out.push_str(&format!("hostName: {host}\n"));
        }
        out.push_str(&format!("metricName: {}\n", self.metric_name));
        out.push_str(&format!("metricStatus: {}\n", self.status));
        if let Some(ts) = &self.timestamp {
            out.push_str(&format!("timestamp: {}\n", ts.format(TIMESTAMP_FORMAT)));
        }
        for (key, value) in &self.extra {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push_str(&format!("summaryData: {}\n", self.summary));
        out.push_str(&format!("detailsData: {}\n", self.details));
        out.push_str(END_OF_MESSAGE);
        out.push('\n');
        out
    }

    /// Host the result belongs to: `hostName`, else the host part of `serviceURI`
    pub fn host(&self) -> Option<String> {
        if let Some(host) = self.hostname.as_ref().filter(|h| !h.is_empty()) {
            return Some(host.clone());
        }
        let uri = self.service_uri.as_ref()?;
        let without_scheme = uri.split_once("://").map_or(uri.as_str(), |(_, rest)| rest);
        let host = without_scheme
            .split(['/', ':'])
            .next()
            .filter(|h| !h.is_empty())?;
        Some(host.to_string())
    }

    /// Service description: `nagiosName` when present, else the metric name
    pub fn service(&self) -> &str {
        self.extra
            .get("nagiosName")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.metric_name)
    }

    pub fn site(&self) -> Option<&str> {
        self.extra.get("siteName").map(String::as_str)
    }
}

/// A passive check result ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct PassiveResult {
    pub host: String,
    pub service: String,
    pub status: MetricStatus,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl PassiveResult {
    /// External command line understood by the monitoring system
    pub fn to_command(&self) -> String {
        let output = self.output.replace('\n', "\\n").replace(';', ",");
        format!(
            "[{}] PROCESS_SERVICE_CHECK_RESULT;{};{};{};{}\n",
            self.timestamp.timestamp(),
            self.host,
            self.service,
            self.status.return_code(),
            output
        )
    }
}

/// Passive sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write to command file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Accepts formatted passive results
#[async_trait::async_trait]
pub trait PassiveSink: Send + Sync {
    async fn submit(&self, result: &PassiveResult) -> Result<(), SinkError>;
}

/// Appends external commands to the monitoring system's command file
#[derive(Debug, Clone)]
pub struct CommandFileSink {
    path: PathBuf,
}

impl CommandFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl PassiveSink for CommandFileSink {
    async fn submit(&self, result: &PassiveResult) -> Result<(), SinkError> {
        let write_error = |source| SinkError::Write {
            path: self.path.clone(),
            source,
        };

        // The command file is usually a named pipe owned by the monitoring system
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_error)?;
        file.write_all(result.to_command().as_bytes())
            .await
            .map_err(write_error)?;
        file.flush().await.map_err(write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "serviceURI: https://ce01.example.org:8443/ce\n\
hostName: ce01.example.org\n\
metricName: org.sam.CE-JobSubmit\n\
metricStatus: WARNING\n\
timestamp: 2024-03-01T12:00:00Z\n\
siteName: EXAMPLE-SITE\n\
summaryData: Job submission slow\n\
detailsData: first line\n\
second line: with colon\n\
EOT\n";

    #[test]
    fn test_parse_sample_message() {
        let metric = MetricOutput::from_wire(SAMPLE.as_bytes()).unwrap();
        assert_eq!(metric.metric_name, "org.sam.CE-JobSubmit");
        assert_eq!(metric.status, MetricStatus::Warning);
        assert_eq!(metric.hostname.as_deref(), Some("ce01.example.org"));
        assert_eq!(metric.summary, "Job submission slow");
        assert_eq!(metric.details, "first line\nsecond line: with colon");
        assert_eq!(metric.site(), Some("EXAMPLE-SITE"));
        assert_eq!(
            metric.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_formatted_message_parses_back() {
        let mut metric = MetricOutput::new("org.example.Ping", MetricStatus::Critical);
        metric.hostname = Some("host.example.org".to_string());
        metric.summary = "unreachable".to_string();
        metric.details = "100% loss\nafter 5 probes".to_string();
        metric
            .extra
            .insert("voName".to_string(), "ops".to_string());

        let wire = metric.to_wire();
        assert!(wire.ends_with("EOT\n"));
        assert_eq!(MetricOutput::from_wire(wire.as_bytes()).unwrap(), metric);
    }

    #[test]
    fn test_missing_status_is_rejected() {
        let result = MetricOutput::from_wire(b"metricName: x\nEOT\n");
        assert_eq!(result, Err(MetricParseError::MissingField("metricStatus")));
    }

    #[test]
    fn test_invalid_status_and_timestamp() {
        assert_eq!(
            MetricOutput::from_wire(b"metricName: x\nmetricStatus: BAD\n"),
            Err(MetricParseError::InvalidStatus("BAD".to_string()))
        );
        assert_eq!(
            MetricOutput::from_wire(b"metricName: x\nmetricStatus: OK\ntimestamp: yesterday\n"),
            Err(MetricParseError::InvalidTimestamp("yesterday".to_string()))
        );
    }

    #[test]
    fn test_host_falls_back_to_service_uri() {
        let mut metric = MetricOutput::new("m", MetricStatus::Ok);
        metric.service_uri = Some("https://se.example.org:8446/srm".to_string());
        assert_eq!(metric.host().as_deref(), Some("se.example.org"));

        metric.service_uri = Some("bare.example.org".to_string());
        assert_eq!(metric.host().as_deref(), Some("bare.example.org"));

        metric.service_uri = None;
        assert_eq!(metric.host(), None);
    }

    #[test]
    fn test_service_prefers_nagios_name() {
        let mut metric = MetricOutput::new("org.sam.CE-JobSubmit", MetricStatus::Ok);
        assert_eq!(metric.service(), "org.sam.CE-JobSubmit");
        metric
            .extra
            .insert("nagiosName".to_string(), "org.sam.CE-JobSubmit-/ops".to_string());
        assert_eq!(metric.service(), "org.sam.CE-JobSubmit-/ops");
    }

    #[test]
    fn test_status_return_codes() {
        assert_eq!(MetricStatus::Ok.return_code(), 0);
        assert_eq!(MetricStatus::Warning.return_code(), 1);
        assert_eq!(MetricStatus::Critical.return_code(), 2);
        assert_eq!(MetricStatus::Unknown.return_code(), 3);
        assert_eq!(MetricStatus::parse(" critical "), Some(MetricStatus::Critical));
        assert_eq!(MetricStatus::parse("fine"), None);
    }

    #[test]
    fn test_passive_command_escapes_output() {
        let result = PassiveResult {
            host: "h".to_string(),
            service: "s".to_string(),
            status: MetricStatus::Critical,
            output: "summary; more\ndetails".to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        assert_eq!(
            result.to_command(),
            "[1700000000] PROCESS_SERVICE_CHECK_RESULT;h;s;2;summary, more\\ndetails\n"
        );
    }

    #[tokio::test]
    async fn test_command_file_sink_appends() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = CommandFileSink::new(file.path());
        let result = PassiveResult {
            host: "h".to_string(),
            service: "s".to_string(),
            status: MetricStatus::Ok,
            output: "fine".to_string(),
            timestamp: Utc.timestamp_opt(10, 0).unwrap(),
        };

        sink.submit(&result).await.unwrap();
        sink.submit(&result).await.unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("[10] PROCESS_SERVICE_CHECK_RESULT;h;s;0;fine"));
    }

    #[tokio::test]
    async fn test_command_file_sink_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = CommandFileSink::new(dir.path().join("absent.cmd"));
        let result = PassiveResult {
            host: "h".to_string(),
            service: "s".to_string(),
            status: MetricStatus::Ok,
            output: String::new(),
            timestamp: Utc::now(),
        };
        assert!(matches!(
            sink.submit(&result).await,
            Err(SinkError::Write { .. })
        ));
    }
}
