//! Lenient serde helpers for platform payloads
//!
//! The platform is not consistent about numeric fields: ids, ports and line
//! counts arrive either as JSON numbers or as numeric strings.

/// Deserialize a string that may have been sent as a JSON number
pub mod string_or_number {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected string or number, got {}",
                other
            ))),
        }
    }
}

/// Deserialize an unsigned integer that may have been sent as a string
pub mod lenient_uint {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
    {
        let raw = match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| serde::de::Error::custom(format!("{} is not an unsigned integer", n)))?,
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| serde::de::Error::custom(format!("{:?} is not an unsigned integer", s)))?,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected integer, got {}",
                    other
                )))
            }
        };
        T::try_from(raw).map_err(|_| serde::de::Error::custom(format!("{} is out of range", raw)))
    }
}
