//! Broker endpoint resolution
//!
//! The daemon may be given a broker URI, a cache file of candidate broker
//! URIs, or both. The explicit URI comes first, followed by the cache entries
//! in file order. Each connect attempt takes the next candidate, wrapping
//! around, so one dead broker cannot pin the daemon.

use crate::config::{BrokerSection, ConfigError};
use std::fmt;
use std::path::Path;
use tracing::warn;
use url::Url;

/// An already-resolved broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    url: Url,
}

impl BrokerEndpoint {
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBrokerUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(uri.trim()).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "mqtt" | "mqtts" | "tcp" | "ssl" => {}
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }

        Ok(Self { url })
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.url.scheme(), "mqtts" | "ssl")
    }

    pub fn port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or(if self.is_tls() { 8883 } else { 1883 })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port())
    }
}

/// Round-robin over candidate brokers
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    candidates: Vec<BrokerEndpoint>,
    next: usize,
}

impl EndpointResolver {
    pub fn new(candidates: Vec<BrokerEndpoint>) -> Result<Self, ConfigError> {
        if candidates.is_empty() {
            return Err(ConfigError::NoBrokerEndpoint);
        }
        Ok(Self {
            candidates,
            next: 0,
        })
    }

    pub fn single(uri: &str) -> Result<Self, ConfigError> {
        Self::new(vec![BrokerEndpoint::parse(uri)?])
    }

    /// Build the candidate list from the broker section
    pub fn from_config(broker: &BrokerSection) -> Result<Self, ConfigError> {
        let mut candidates = Vec::new();

        if let Some(uri) = &broker.uri {
            candidates.push(BrokerEndpoint::parse(uri)?);
        }

        if let Some(cache_file) = &broker.cache_file {
            for endpoint in Self::read_cache_file(cache_file)? {
                if !candidates.contains(&endpoint) {
                    candidates.push(endpoint);
                }
            }
        }

        Self::new(candidates)
    }

    /// Read candidate URIs, one per line; blank lines and `#` comments are skipped
    pub fn read_cache_file(path: &Path) -> Result<Vec<BrokerEndpoint>, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse_cache(&content))
    }

    /// Parse cache file content, skipping entries that are not valid URIs (pure apart from logging)
    fn parse_cache(content: &str) -> Vec<BrokerEndpoint> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match BrokerEndpoint::parse(line) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!(entry = %line, error = %e, "Skipping invalid broker cache entry");
                    None
                }
            })
            .collect()
    }

    /// Endpoint for the next connect attempt
    pub fn next_endpoint(&mut self) -> BrokerEndpoint {
        let endpoint = self.candidates[self.next % self.candidates.len()].clone();
        self.next = (self.next + 1) % self.candidates.len();
        endpoint
    }

    pub fn candidates(&self) -> &[BrokerEndpoint] {
        &self.candidates
    }
}
