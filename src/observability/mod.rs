//! Observability: structured logging and in-process counters

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, HandlerStats, MetricsCollector, MetricsSnapshot};

pub use logging::{frame_span, session_span};
