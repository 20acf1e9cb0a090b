//! Management session topics

/// Upstream topic for all template records
pub const UPSTREAM: &str = "s/us";

/// Bootstrap: device publishes an empty message here to request credentials
pub const CREDENTIAL_REQUEST: &str = "s/ucr";

/// Bootstrap: platform pushes the `70` credentials record here
pub const CREDENTIAL_RESPONSE: &str = "s/dcr";

/// Topics delivering JSON operations
pub const OPERATION_TOPICS: &[&str] = &["devicecontrol/notifications", "notification/operations"];

/// Everything the management session subscribes to
pub const SUBSCRIPTIONS: &[&str] = &[
    "s/dt",
    "s/e",
    "s/dc/#",
    "error",
    "notification/operations",
    "devicecontrol/notifications",
    "notification/realtime",
];

/// Whether messages on `topic` carry JSON operations
pub fn is_operation_topic(topic: &str) -> bool {
    OPERATION_TOPICS.contains(&topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_topics_are_subscribed() {
        for topic in OPERATION_TOPICS {
            assert!(SUBSCRIPTIONS.contains(topic));
        }
    }

    #[test]
    fn test_is_operation_topic() {
        assert!(is_operation_topic("devicecontrol/notifications"));
        assert!(!is_operation_topic("s/e"));
    }
}
