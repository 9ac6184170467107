//! MQTT broker session (impure I/O)
//!
//! One [`MqttSession`] owns one `rumqttc` client and its event loop. The
//! event loop is only polled from the dispatch loop's task, so the session
//! needs no locking.
//!
//! Patterns are subscribed as MQTT filters (see [`super::topic`]). Distinct
//! patterns can share one filter, so filters are reference counted and only
//! unsubscribed when the last pattern using them goes away.

use super::connection::configure_mqtt_options;
use super::message_handler::{EventRoute, MessageHandler};
use super::topic::subscription_filter;
use crate::config::BrokerSection;
use crate::error::{ConnectError, ReceiveError, SubscribeError, TeardownError};
use crate::transport::{BrokerEndpoint, BrokerSession, Frame, SessionFactory};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for flushing the DISCONNECT packet during teardown
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens MQTT sessions with the configured broker options
#[derive(Debug, Clone)]
pub struct MqttSessionFactory {
    broker: BrokerSection,
}

impl MqttSessionFactory {
    pub fn new(broker: BrokerSection) -> Self {
        Self { broker }
    }

    /// Poll until the broker acknowledges the connection
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ConnectError> {
        loop {
            let event = event_loop.poll().await.map_err(classify_connect_error)?;
            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged { accepted: true, .. } => return Ok(()),
                EventRoute::ConnectionAcknowledged {
                    accepted: false,
                    code,
                } => return Err(ConnectError::Refused(code)),
                other => debug!(?other, "Event before ConnAck"),
            }
        }
    }
}

#[async_trait]
impl SessionFactory for MqttSessionFactory {
    type Session = MqttSession;

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<MqttSession, ConnectError> {
        let options = configure_mqtt_options(endpoint, &self.broker);
        let (client, mut event_loop) = AsyncClient::new(options, self.broker.request_capacity);

        let timeout = self.broker.connect_timeout();
        tokio::time::timeout(timeout, Self::wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;

        Ok(MqttSession {
            client,
            event_loop,
            filters: HashMap::new(),
        })
    }
}

/// Map connection-phase failures (pure function)
fn classify_connect_error(error: ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectError::Refused(format!("{code:?}")),
        other => ConnectError::Transport(Box::new(other)),
    }
}

/// Map receive-phase failures, keeping transport resets distinguishable (pure function)
fn classify_receive_error(error: ConnectionError) -> ReceiveError {
    match error {
        ConnectionError::Io(e) => ReceiveError::from_io(e),
        other => ReceiveError::Transport(Box::new(other)),
    }
}

/// One live MQTT connection
pub struct MqttSession {
    client: AsyncClient,
    event_loop: EventLoop,
    /// Subscribed filter to the number of patterns it serves
    filters: HashMap<String, usize>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn subscribe(&mut self, topic: &str) -> Result<(), SubscribeError> {
        let filter = subscription_filter(topic);
        if let Some(count) = self.filters.get_mut(&filter) {
            *count += 1;
            debug!(topic, filter = %filter, "Filter already subscribed");
            return Ok(());
        }

        self.client
            .try_subscribe(filter.as_str(), QoS::AtLeastOnce)
            .map_err(|e| SubscribeError::new(topic, e.to_string()))?;
        debug!(topic, filter = %filter, "Subscribing filter");
        self.filters.insert(filter, 1);
        Ok(())
    }

    async fn receive_next(&mut self) -> Result<Frame, ReceiveError> {
        loop {
            let event = self
                .event_loop
                .poll()
                .await
                .map_err(classify_receive_error)?;

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::MessageReceived(frame) => return Ok(frame),
                EventRoute::Disconnected(reason) => {
                    return Err(ReceiveError::Disconnected(reason))
                }
                EventRoute::SubscriptionRejected { packet_id, reasons } => {
                    warn!(
                        event = "subscribe_failed",
                        packet_id,
                        reasons = ?reasons,
                        "Broker rejected subscription"
                    );
                }
                EventRoute::ConnectionAcknowledged { .. }
                | EventRoute::InfrastructureEvent
                | EventRoute::OutgoingEvent => {}
            }
        }
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SubscribeError> {
        let filter = subscription_filter(topic);
        match self.filters.get_mut(&filter) {
            Some(count) if *count > 1 => {
                *count -= 1;
                return Ok(());
            }
            Some(_) => {}
            None => return Err(SubscribeError::new(topic, "not subscribed")),
        }

        self.client
            .try_unsubscribe(filter.as_str())
            .map_err(|e| SubscribeError::new(topic, e.to_string()))?;
        self.filters.remove(&filter);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TeardownError> {
        self.client
            .try_disconnect()
            .map_err(|e| TeardownError::new("disconnect", e.to_string()))?;

        // Drive the event loop until the queued requests and DISCONNECT are written
        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(rumqttc::v5::Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                        return Ok(())
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TeardownError::new("disconnect", e.to_string())),
            Err(_) => Err(TeardownError::new(
                "disconnect",
                format!("not flushed within {DISCONNECT_FLUSH_TIMEOUT:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_receive_io_errors_are_classified() {
        let reset = classify_receive_error(ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset by peer",
        )));
        assert!(reset.is_broken_pipe());

        let other = classify_receive_error(ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        )));
        assert!(!other.is_broken_pipe());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let broker = BrokerSection {
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let factory = MqttSessionFactory::new(broker);
        let endpoint = BrokerEndpoint::parse("mqtt://127.0.0.1:1").unwrap();

        let result = factory.connect(&endpoint).await;
        assert!(result.is_err());
    }
}
