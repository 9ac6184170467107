//! Pure connection configuration for MQTT sessions

use crate::config::BrokerSection;
use crate::transport::BrokerEndpoint;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum incoming packet size; metric bodies with long details exceed the 10KB default
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Unique client identifier for one connect attempt (pure function)
///
/// Every attempt gets a fresh id so a half-dead previous session cannot make
/// the broker kick the new one.
pub fn build_client_id(prefix: &str, pid: u32, millis: u128) -> String {
    format!("{prefix}-{pid}-{millis}")
}

/// Build client options for one endpoint
pub fn configure_mqtt_options(endpoint: &BrokerEndpoint, broker: &BrokerSection) -> MqttOptions {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let client_id = build_client_id(&broker.client_id_prefix, std::process::id(), millis);

    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host(), endpoint.port());

    if endpoint.is_tls() {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = resolve_credentials(broker) {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(broker.keep_alive());
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    mqtt_options
}

/// Credentials named by the broker section, read from the environment
pub fn resolve_credentials(broker: &BrokerSection) -> Option<(String, String)> {
    let username = std::env::var(broker.username_env.as_ref()?).ok()?;
    let password = broker
        .password_env
        .as_ref()
        .and_then(|env_name| std::env::var(env_name).ok())
        .unwrap_or_default();
    Some((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_format() {
        assert_eq!(
            build_client_id("msg-to-handler", 4242, 1_700_000_000_123),
            "msg-to-handler-4242-1700000000123"
        );
    }

    #[test]
    fn test_configure_mqtt_options() {
        let endpoint = BrokerEndpoint::parse("mqtt://broker.example.org:1884").unwrap();
        let broker = BrokerSection {
            keep_alive_secs: 30,
            ..Default::default()
        };

        let options = configure_mqtt_options(&endpoint, &broker);
        assert_eq!(
            options.broker_address(),
            ("broker.example.org".to_string(), 1884)
        );
        assert_eq!(options.keep_alive().as_secs(), 30);
        assert!(options.client_id().starts_with("msg-to-handler-"));
    }

    #[test]
    fn test_credentials_from_environment() {
        std::env::set_var("MSG2HANDLER_TEST_USER", "nagios");
        std::env::set_var("MSG2HANDLER_TEST_PASS", "secret");

        let broker = BrokerSection {
            username_env: Some("MSG2HANDLER_TEST_USER".to_string()),
            password_env: Some("MSG2HANDLER_TEST_PASS".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_credentials(&broker),
            Some(("nagios".to_string(), "secret".to_string()))
        );

        let unset = BrokerSection {
            username_env: Some("MSG2HANDLER_TEST_UNSET".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_credentials(&unset), None);
        assert_eq!(resolve_credentials(&BrokerSection::default()), None);
    }
}
