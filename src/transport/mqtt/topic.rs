//! Translation between dotted bus topics and MQTT topic levels
//!
//! Bus topics separate segments with `.`; MQTT separates levels with `/`
//! and uses `+` as its single-level wildcard. A configured pattern is
//! subscribed as a filter that covers every topic it matches, and frames
//! are translated back before local matching decides the handlers.

const BUS_SEPARATOR: char = '.';
const MQTT_SEPARATOR: char = '/';
const BUS_WILDCARD: &str = "*";
const MQTT_SINGLE_LEVEL: &str = "+";

/// Broker subscription filter covering a dotted pattern (pure function)
///
/// `*` segments become `+`. Literal segments holding an MQTT wildcard
/// character cannot be expressed in a filter and are widened to `+` as
/// well; local matching drops whatever the wider filter lets through.
pub fn subscription_filter(pattern: &str) -> String {
    pattern
        .split(BUS_SEPARATOR)
        .map(|segment| {
            if segment == BUS_WILDCARD || segment.contains(['+', '#']) {
                MQTT_SINGLE_LEVEL
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// MQTT topic name for a dotted bus topic
pub fn mqtt_topic(bus_topic: &str) -> String {
    bus_topic.replace(BUS_SEPARATOR, "/")
}

/// Dotted bus topic for a received MQTT topic name
pub fn bus_topic(mqtt_topic: &str) -> String {
    mqtt_topic.replace(MQTT_SEPARATOR, ".")
}
