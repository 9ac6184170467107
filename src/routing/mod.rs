//! Topic routing
//!
//! [`pattern`] compiles single-level topic globs; [`registry`] binds them to
//! handler instances and resolves incoming topics.

pub mod pattern;
pub mod registry;

pub use pattern::{PatternError, Segment, TopicPattern};
pub use registry::{HandlerEntry, HandlerRegistry, LoadFailure, RegistryError, SharedRegistry};
