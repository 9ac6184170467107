//! Broker transport abstraction
//!
//! The dispatch loop talks to the bus through two traits: a
//! [`SessionFactory`] that opens a fresh connection for every (re)connect,
//! and the [`BrokerSession`] it returns. Sessions are never reused across
//! reconnects, so no partial state survives a disconnect.

use crate::error::{ConnectError, ReceiveError, SubscribeError, TeardownError};
use bytes::Bytes;

pub mod endpoint;
pub mod mqtt;

pub use endpoint::{BrokerEndpoint, EndpointResolver};

/// One unit of data received from the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub body: Bytes,
}

impl Frame {
    pub fn new<T: Into<String>, B: Into<Bytes>>(topic: T, body: B) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

/// Opens broker sessions
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrokerSession;

    /// Establish the transport connection to an already-resolved endpoint
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Self::Session, ConnectError>;
}

/// One live connection to the bus
#[async_trait::async_trait]
pub trait BrokerSession: Send {
    /// Subscribe one destination
    async fn subscribe(&mut self, topic: &str) -> Result<(), SubscribeError>;

    /// Block until the next frame arrives or the session fails
    async fn receive_next(&mut self) -> Result<Frame, ReceiveError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SubscribeError>;

    async fn disconnect(&mut self) -> Result<(), TeardownError>;
}
