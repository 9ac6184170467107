//! MQTT v5 broker session built on `rumqttc`
//!
//! - [`connection`] - pure option building
//! - [`message_handler`] - pure event routing
//! - [`session`] - the impure session and its factory
//! - [`topic`] - dotted topics to MQTT levels and filters

pub mod connection;
pub mod message_handler;
pub mod session;
pub mod topic;

pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};
pub use session::{MqttSession, MqttSessionFactory};
pub use topic::{bus_topic, mqtt_topic, subscription_filter};
