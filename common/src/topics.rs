pub const TOPIC_BRIDGE_STATUS: &str = "homekit/sensor/status";
pub const TOPIC_BRIDGE_ACCESSORIES: &str = "homekit/sensor/accessories";

/// Subscription filter for identify requests, one level per accessory id.
pub const TOPIC_IDENTIFY_FILTER: &str = "homekit/sensor/identify/+";

const TOPIC_CHARACTERISTIC_PREFIX: &str = "homekit/sensor/characteristic";
const TOPIC_IDENTIFY_PREFIX: &str = "homekit/sensor/identify";

pub fn characteristic_topic(aid: u64, iid: u64) -> String {
    format!("{TOPIC_CHARACTERISTIC_PREFIX}/{aid}/{iid}")
}

pub fn identify_topic(aid: u64) -> String {
    format!("{TOPIC_IDENTIFY_PREFIX}/{aid}")
}

/// Accessory id addressed by an identify topic, if `topic` is one.
pub fn parse_identify_topic(topic: &str) -> Option<u64> {
    topic
        .strip_prefix(TOPIC_IDENTIFY_PREFIX)?
        .strip_prefix('/')?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_topic_is_addressed_by_aid_and_iid() {
        assert_eq!(
            characteristic_topic(3, 9),
            "homekit/sensor/characteristic/3/9"
        );
    }

    #[test]
    fn identify_topic_carries_accessory_id() {
        assert_eq!(identify_topic(2), "homekit/sensor/identify/2");
        assert_eq!(parse_identify_topic(&identify_topic(2)), Some(2));
        assert_eq!(parse_identify_topic("homekit/sensor/identify/"), None);
        assert_eq!(parse_identify_topic("homekit/sensor/identify/bridge"), None);
        assert_eq!(parse_identify_topic("homekit/sensor/identifyx/2"), None);
        assert_eq!(parse_identify_topic("homekit/sensor/status"), None);
    }
}
