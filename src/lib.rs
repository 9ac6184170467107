//! msg2handler - route message-bus topics to local monitoring handlers
//!
//! The daemon subscribes to a set of topics on an MQTT broker, matches every
//! received frame's topic against configured single-level glob patterns and
//! hands the body to each matching handler, for example a directory queue or
//! a passive check result sink. It reconnects forever on broker failure and
//! treats handler failures as log lines, never as reasons to stop.
//!
//! # Layout
//!
//! - [`routing`] - topic patterns and the handler registry
//! - [`transport`] - broker session traits, endpoint resolution, MQTT session
//! - [`dispatch`] - the receive/dispatch state machine
//! - [`handlers`] - built-in handler kinds
//! - [`lifecycle`] - signals, shutdown, live reload, pid file
//! - [`queue`], [`metric`] - directory queue and metric output collaborators
//!
//! # Quick Start
//!
//! ```rust
//! use msg2handler::config::HandlerConfig;
//! use msg2handler::handlers::BuiltinHandlers;
//! use msg2handler::routing::HandlerRegistry;
//!
//! let specs = vec![
//!     HandlerConfig::new("grid.probe.*.EGEE", "log"),
//!     HandlerConfig::new("grid.other", "no-such-handler"),
//! ];
//! let (registry, failures) = HandlerRegistry::load(&specs, &BuiltinHandlers);
//!
//! assert_eq!(registry.len(), 1);
//! assert_eq!(failures.len(), 1);
//! assert_eq!(registry.resolve("grid.probe.metricOutput.EGEE").len(), 1);
//! assert!(registry.resolve("grid.probe.EGEE").is_empty());
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod metric;
pub mod observability;
pub mod queue;
pub mod routing;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DaemonConfig, HandlerConfig};
pub use dispatch::{DispatchLoop, DispatchOptions, DispatchReport, DispatchState};
pub use error::{ConnectError, DaemonError, HandlerError, ReceiveError, SubscribeError};
pub use handlers::{BuiltinHandlers, Handler, HandlerFactory, HandlerOutcome};
pub use lifecycle::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use routing::{HandlerRegistry, SharedRegistry, TopicPattern};
pub use transport::{BrokerSession, EndpointResolver, Frame, SessionFactory};
