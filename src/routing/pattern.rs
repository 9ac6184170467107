//! Topic glob compilation and matching
//!
//! Topics are dot-separated. A pattern segment consisting of exactly `*`
//! matches any single non-empty segment; every other segment is compared
//! literally. There is no multi-level wildcard, so a pattern only ever
//! matches topics with the same number of segments.

use regex::Regex;
use std::fmt;
use thiserror::Error;

const SEPARATOR: char = '.';
const WILDCARD: &str = "*";

/// Pattern compilation errors
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Topic pattern cannot be empty")]
    Empty,
    #[error("Topic pattern '{pattern}' could not be compiled")]
    Compile {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One segment of a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

/// Compiled, immutable topic pattern
#[derive(Debug, Clone)]
pub struct TopicPattern {
    source: String,
    segments: Vec<Segment>,
    regex: Regex,
}

impl TopicPattern {
    /// Compile a dot-separated glob
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let segments: Vec<Segment> = pattern
            .split(SEPARATOR)
            .map(|segment| {
                if segment == WILDCARD {
                    Segment::Wildcard
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();

        let body = segments
            .iter()
            .map(|segment| match segment {
                Segment::Wildcard => "[^.]+".to_string(),
                Segment::Literal(text) => regex::escape(text),
            })
            .collect::<Vec<_>>()
            .join(r"\.");

        let regex = Regex::new(&format!("^{body}$")).map_err(|source| PatternError::Compile {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_string(),
            segments,
            regex,
        })
    }

    /// Whether `topic` matches this pattern (pure, deterministic)
    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }

    /// The pattern text as configured
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&Segment::Wildcard)
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for TopicPattern {}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
