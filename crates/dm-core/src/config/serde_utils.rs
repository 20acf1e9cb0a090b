//! Serde helpers shared by the configuration types

/// `Duration` stored as a number of seconds
///
/// Serializes whole seconds. Deserializes integers or fractional seconds, so
/// hand-edited files may say `"keep_alive": 0.5`.
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(format!("{} is not a valid number of seconds", secs))
        })
    }
}
