//! Directory-backed message queue
//!
//! Messages are stored one per file in a single directory. A message is
//! written to a temporary name and renamed into place, so readers never see
//! partial files. Names are zero-padded timestamps plus a sequence number,
//! which makes lexical order equal to enqueue order.
//!
//! File layout: `key: value` header lines, one blank line, then the body.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const MESSAGE_EXT: &str = "msg";
const TEMP_EXT: &str = "tmp";

/// Temp files older than this are considered abandoned
const STALE_TEMP_AGE: Duration = Duration::from_secs(300);

/// Queue at or below this size is compacted on request
const SMALL_QUEUE: usize = 100;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Directory queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed queue message {name}: {reason}")]
    Malformed { name: String, reason: String },
}

impl QueueError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A message read back from the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub name: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Directory-backed queue of opaque messages
#[derive(Debug, Clone)]
pub struct DirQueue {
    root: PathBuf,
}

impl DirQueue {
    /// Open the queue, creating the directory if needed
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, QueueError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| QueueError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Next chronologically sortable message name
    fn next_name() -> String {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!("{micros:020}-{:010}-{seq:010}", std::process::id())
    }

    /// Serialize headers and body into the on-disk format (pure function)
    fn encode(headers: &BTreeMap<String, String>, body: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(body.len() + 64);
        for (key, value) in headers {
            let value = value.replace('\n', " ");
            buffer.extend_from_slice(format!("{key}: {value}\n").as_bytes());
        }
        buffer.push(b'\n');
        buffer.extend_from_slice(body);
        buffer
    }

    /// Parse the on-disk format (pure function)
    fn decode(name: &str, raw: &[u8]) -> Result<QueuedMessage, QueueError> {
        let mut headers = BTreeMap::new();
        let mut offset = 0;

        loop {
            let rest = &raw[offset..];
            let line_end = rest.iter().position(|&b| b == b'\n').ok_or_else(|| {
                QueueError::Malformed {
                    name: name.to_string(),
                    reason: "missing header terminator".to_string(),
                }
            })?;
            let line = &rest[..line_end];
            offset += line_end + 1;

            if line.is_empty() {
                break;
            }

            let line = String::from_utf8_lossy(line);
            let (key, value) = line.split_once(": ").ok_or_else(|| QueueError::Malformed {
                name: name.to_string(),
                reason: format!("invalid header line '{line}'"),
            })?;
            headers.insert(key.to_string(), value.to_string());
        }

        Ok(QueuedMessage {
            name: name.to_string(),
            headers,
            body: raw[offset..].to_vec(),
        })
    }

    /// Append a message, returning its name
    pub fn enqueue(
        &self,
        body: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<String, QueueError> {
        let name = Self::next_name();
        let temp_path = self.root.join(format!("{name}.{TEMP_EXT}"));
        let final_path = self.root.join(format!("{name}.{MESSAGE_EXT}"));

        let mut file = fs::File::create(&temp_path).map_err(|e| QueueError::io(&temp_path, e))?;
        file.write_all(&Self::encode(headers, body))
            .and_then(|_| file.sync_all())
            .map_err(|e| QueueError::io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path).map_err(|e| QueueError::io(&final_path, e))?;

        Ok(name)
    }

    /// Message names in enqueue order
    pub fn names(&self) -> Result<Vec<String>, QueueError> {
        let entries = fs::read_dir(&self.root).map_err(|e| QueueError::io(&self.root, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(MESSAGE_EXT) {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.names()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Read a message by name without removing it
    pub fn get(&self, name: &str) -> Result<QueuedMessage, QueueError> {
        let path = self.root.join(format!("{name}.{MESSAGE_EXT}"));
        let raw = fs::read(&path).map_err(|e| QueueError::io(&path, e))?;
        Self::decode(name, &raw)
    }

    /// Oldest message still in the queue
    pub fn oldest(&self) -> Result<Option<QueuedMessage>, QueueError> {
        match self.names()?.first() {
            Some(name) => self.get(name).map(Some),
            None => Ok(None),
        }
    }

    /// Remove a processed message
    pub fn ack(&self, name: &str) -> Result<(), QueueError> {
        let path = self.root.join(format!("{name}.{MESSAGE_EXT}"));
        fs::remove_file(&path).map_err(|e| QueueError::io(&path, e))
    }

    /// Remove abandoned temp files when the queue is small
    ///
    /// Returns the number of files removed.
    pub fn purge_if_small(&self) -> Result<usize, QueueError> {
        if self.len()? > SMALL_QUEUE {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.root).map_err(|e| QueueError::io(&self.root, e))?;
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMP_EXT) {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| {
                    now.duration_since(modified).unwrap_or_default() >= STALE_TEMP_AGE
                })
                .unwrap_or(false);
            if stale && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}
