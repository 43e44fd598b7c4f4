/**
 * DURATION - Codec serde des durées de heartbeat
 *
 * RÔLE : Les durées voyagent en nanosecondes entières, comme les publishers
 * existants les émettent. Le décodage accepte aussi les chaînes humantime
 * (`"15s"`, `"1m 30s"`). Les valeurs négatives sont refusées.
 */

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let nanos = i64::try_from(value.as_nanos())
        .map_err(|_| serde::ser::Error::custom("duration overflows i64 nanoseconds"))?;
    serializer.serialize_i64(nanos)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative duration as integer nanoseconds or a humantime string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        if v < 0 {
            return Err(E::custom(format!("duration cannot be negative, got {v}ns")));
        }
        Ok(Duration::from_nanos(v as u64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_nanos(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        let v = v.trim();
        if v.starts_with('-') {
            return Err(E::custom(format!("duration cannot be negative, got {v:?}")));
        }
        humantime::parse_duration(v).map_err(E::custom)
    }
}

/// Same codec for `Option<Duration>` fields; `null` decodes to `None`.
pub mod option {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapped(#[serde(with = "super")] Duration);

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}
