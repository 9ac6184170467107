//! Pure routing of MQTT event loop events

use super::topic::bus_topic;
use crate::transport::Frame;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::Event;

/// What the session should do with one event loop event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck received
    ConnectionAcknowledged { accepted: bool, code: String },
    /// Application message for the dispatch loop
    MessageReceived(Frame),
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// SubAck carrying at least one failure reason code
    SubscriptionRejected { packet_id: u16, reasons: Vec<String> },
    /// Keep-alive, acks and other protocol traffic
    InfrastructureEvent,
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the session action (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    accepted: connack.code == ConnectReturnCode::Success,
                    code: format!("{:?}", connack.code),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(Frame::new(
                    bus_topic(&String::from_utf8_lossy(&publish.topic)),
                    publish.payload.clone(),
                )),
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                Packet::SubAck(suback) => {
                    let reasons = Self::rejected_reasons(&suback.return_codes);
                    if reasons.is_empty() {
                        EventRoute::InfrastructureEvent
                    } else {
                        EventRoute::SubscriptionRejected {
                            packet_id: suback.pkid,
                            reasons,
                        }
                    }
                }
                _ => EventRoute::InfrastructureEvent,
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Failure reason codes of a SubAck (pure function)
    pub fn rejected_reasons(codes: &[SubscribeReasonCode]) -> Vec<String> {
        codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .map(|code| format!("{code:?}"))
            .collect()
    }
}
