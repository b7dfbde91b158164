use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

/// A helper struct to serialize a timestamp as milliseconds since the epoch
/// and deserialize both second and millisecond precision timestamps.
pub(crate) struct Timestamp;

impl<'de> DeserializeAs<'de, DateTime<Utc>> for Timestamp {
    fn deserialize_as<D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let timestamp = i64::deserialize(deserializer)?;

        // Convert from seconds to milliseconds when the timestamp is small
        // enough. Repodata produced before 2018 stored seconds.
        let timestamp = if timestamp < 253_402_300_799 {
            timestamp * 1_000
        } else {
            timestamp
        };

        DateTime::from_timestamp_millis(timestamp)
            .ok_or_else(|| serde::de::Error::custom("invalid timestamp"))
    }
}

impl SerializeAs<DateTime<Utc>> for Timestamp {
    fn serialize_as<S>(source: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        source.timestamp_millis().serialize(serializer)
    }
}

/// Serializes a map sorted alphabetically by key so that the output is stable
/// across runs.
pub(crate) fn sort_map_alphabetically<T: Serialize, S: Serializer>(
    value: &FxHashMap<String, T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .iter()
        .collect::<BTreeMap<_, _>>()
        .serialize(serializer)
}
