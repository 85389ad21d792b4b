//! Serialization utilities for durations
//!
//! The remote API expresses some durations as integer milliseconds
//! (`session_start_limit.reset_after`) and others as fractional seconds
//! (`retry_after` in rate-limit bodies). Configuration files use
//! milliseconds throughout.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Custom serialization module for Duration as milliseconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use conduit_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Custom serialization module for Duration as fractional seconds
pub mod duration_secs_f64 {
    use super::*;

    /// Serialize a Duration as fractional seconds (f64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize fractional seconds into a Duration, rejecting negative or
    /// non-finite values
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Limits {
        #[serde(with = "duration_millis")]
        reset_after: Duration,
        #[serde(with = "duration_secs_f64")]
        retry_after: Duration,
    }

    /// Tests that Duration serializes to milliseconds and fractional seconds
    #[test]
    fn test_durations_serialize_in_wire_units() {
        let data = Limits {
            reset_after: Duration::from_millis(14_400_000),
            retry_after: Duration::from_millis(1500),
        };

        let json = serde_json::to_string(&data).expect("Should serialize valid struct");
        assert!(json.contains("14400000"), "Should contain milliseconds value");
        assert!(json.contains("1.5"), "Should contain fractional seconds");
    }

    /// Tests that wire values deserialize to Duration
    #[test]
    fn test_durations_deserialize_from_wire_units() {
        let json = r#"{"reset_after":2500,"retry_after":0.25}"#;
        let data: Limits = serde_json::from_str(json).expect("Should deserialize valid JSON");

        assert_eq!(data.reset_after, Duration::from_millis(2500));
        assert_eq!(data.retry_after, Duration::from_millis(250));
    }

    #[test]
    fn test_negative_seconds_are_rejected() {
        let json = r#"{"reset_after":0,"retry_after":-1.0}"#;
        let result: Result<Limits, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_duration_millis_deserialize_invalid_json() {
        let invalid_json = r#"{"reset_after":"not_a_number","retry_after":1.0}"#;
        let result: Result<Limits, _> = serde_json::from_str(invalid_json);
        assert!(result.is_err());
    }
}
