//! Handler registry
//!
//! Maps configured topic patterns to handler instances. Loading tolerates
//! partial failure: an entry whose pattern or handler cannot be built is
//! reported and dropped, and the rest of the registry is still usable.
//!
//! The registry itself is immutable. Live reconfiguration builds a new one
//! and publishes it through [`SharedRegistry`]; readers always see either the
//! old or the new snapshot, never a mixture.

use super::pattern::TopicPattern;
use crate::config::{ConfigError, HandlerConfig, HandlerParams};
use crate::handlers::{Handler, HandlerFactory};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

/// One configured topic-to-handler binding
#[derive(Clone)]
pub struct HandlerEntry {
    pub key: String,
    pub pattern: TopicPattern,
    pub kind: String,
    pub params: HandlerParams,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("key", &self.key)
            .field("pattern", &self.pattern.as_str())
            .field("kind", &self.kind)
            .finish()
    }
}

/// A configuration entry that could not be loaded
#[derive(Debug)]
pub struct LoadFailure {
    pub topic: String,
    pub kind: String,
    pub error: ConfigError,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Registry has no handlers")]
    Empty,
}

/// Ordered set of handler entries
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration, skipping entries that fail
    pub fn load(
        specs: &[HandlerConfig],
        factory: &dyn HandlerFactory,
    ) -> (Self, Vec<LoadFailure>) {
        let mut registry = Self::new();
        let mut failures = Vec::new();

        for config in specs {
            if let Err(e) = registry.register(config, factory) {
                error!(
                    topic = %config.topic,
                    handler = %config.handler,
                    error = %e,
                    "Failed to load handler, entry skipped"
                );
                failures.push(LoadFailure {
                    topic: config.topic.clone(),
                    kind: config.handler.clone(),
                    error: e,
                });
            }
        }

        info!(
            loaded = registry.len(),
            failed = failures.len(),
            "Handler registry loaded"
        );
        (registry, failures)
    }

    /// Compile and construct one entry; nothing is inserted on failure
    pub fn register(
        &mut self,
        config: &HandlerConfig,
        factory: &dyn HandlerFactory,
    ) -> Result<&HandlerEntry, ConfigError> {
        let pattern = TopicPattern::compile(&config.topic)?;
        let handler = factory.build(&config.handler, &config.params)?;

        let key = self.unique_key(&config.topic);
        self.entries.push(HandlerEntry {
            key,
            pattern,
            kind: config.handler.clone(),
            params: config.params.clone(),
            handler,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Registration key: the topic, suffixed until it is unused
    fn unique_key(&self, topic: &str) -> String {
        let taken = |key: &str| self.entries.iter().any(|entry| entry.key == key);
        if !taken(topic) {
            return topic.to_string();
        }
        (2..)
            .map(|n| format!("{topic}#{n}"))
            .find(|key| !taken(key.as_str()))
            .unwrap_or_else(|| topic.to_string())
    }

    /// Every entry whose pattern matches the topic, in registration order
    pub fn resolve(&self, topic: &str) -> Vec<&HandlerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.pattern.matches(topic))
            .collect()
    }

    /// Subscription destinations, deduplicated, in registration order
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let topic = entry.pattern.as_str();
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        topics
    }

    pub fn get(&self, key: &str) -> Option<&HandlerEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn entries(&self) -> &[HandlerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot-swapped registry shared between the dispatch loop and reloads
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    tx: Arc<watch::Sender<Arc<HandlerRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: HandlerRegistry) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(registry));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<HandlerRegistry> {
        self.tx.borrow().clone()
    }

    /// Publish a replacement; an empty registry is rejected and the old one kept
    pub fn replace(&self, registry: HandlerRegistry) -> Result<(), RegistryError> {
        if registry.is_empty() {
            return Err(RegistryError::Empty);
        }
        self.tx.send_replace(Arc::new(registry));
        Ok(())
    }

    /// Receiver notified on every replacement
    pub fn subscribe(&self) -> watch::Receiver<Arc<HandlerRegistry>> {
        self.tx.subscribe()
    }
}
