//! Wire contract for the room endpoint shared by coin jar clients.
//!
//! Every resource travels as a flat JSON object: the resource's own fields
//! plus `updatedAt`. The same shape is used for local persisted blobs, so a
//! local snapshot and a remote snapshot are interchangeable.
//!
//! ```text
//! GET /rooms/{roomCode}/{resource}  -> 200 VersionedPayload | 404
//! PUT /rooms/{roomCode}/{resource}  -> 200 {"ok": true, "updatedAt": "..."}
//! ```

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const BEARER_PREFIX: &str = "Bearer ";

// ═══════════════════════════════════════════════════════════════════════════════
// Resources
// ═══════════════════════════════════════════════════════════════════════════════

/// One of the independently versioned buckets synchronized per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    State,
    Archives,
    Settings,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::State, Resource::Archives, Resource::Settings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::State => "state",
            Resource::Archives => "archives",
            Resource::Settings => "settings",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "state" => Some(Resource::State),
            "archives" => Some(Resource::Archives),
            "settings" => Some(Resource::Settings),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Timestamps
// ═══════════════════════════════════════════════════════════════════════════════

/// The version that never wins a merge.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Formats a version the way it travels on the wire (`2026-01-30T12:00:00.000Z`).
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 instant, normalizing to UTC millisecond precision.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(3))
}

/// Reads `updatedAt` from an incoming value; missing or unparsable is epoch-0.
pub fn timestamp_or_epoch(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(epoch)
}

/// Produces a fresh local version strictly after `previous`.
///
/// Wall-clock time normally wins; if the clock is behind the last version
/// (clock skew, or two writes in the same millisecond) the version is bumped
/// by one millisecond instead.
pub fn next_version(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(3);
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

mod wire_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(timestamp_or_epoch(raw.as_ref()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Versioned payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// A resource snapshot with the instant it was produced.
///
/// Serializes flat: `{ ...payload fields, "updatedAt": "..." }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedPayload<T> {
    #[serde(flatten)]
    pub payload: T,
    #[serde(
        rename = "updatedAt",
        with = "wire_timestamp",
        default = "epoch"
    )]
    pub updated_at: DateTime<Utc>,
}

impl<T> VersionedPayload<T> {
    pub fn new(payload: T, updated_at: DateTime<Utc>) -> Self {
        Self { payload, updated_at }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VersionedPayload<U> {
        VersionedPayload {
            payload: f(self.payload),
            updated_at: self.updated_at,
        }
    }

    /// Strict LWW comparison: equal versions are not newer.
    pub fn is_newer_than(&self, version: DateTime<Utc>) -> bool {
        self.updated_at > version
    }
}

impl VersionedPayload<Value> {
    /// Splits a raw JSON object into payload fields and version.
    ///
    /// Returns `None` for anything that is not a JSON object. The payload keeps
    /// every field except `updatedAt`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let updated_at = timestamp_or_epoch(fields.get(UPDATED_AT_FIELD));
        fields.remove(UPDATED_AT_FIELD);
        Some(Self {
            payload: Value::Object(fields),
            updated_at,
        })
    }

    /// Parses a persisted or received JSON document.
    pub fn from_json_str(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw).ok().and_then(Self::from_value)
    }

    /// Recombines payload and version into the flat wire object.
    pub fn to_value(&self) -> Value {
        let mut fields = match &self.payload {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        fields.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        Value::Object(fields)
    }

    /// Field accessor on the payload object.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Server responses
// ═══════════════════════════════════════════════════════════════════════════════

/// Acknowledgement returned by a successful PUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutAck {
    pub ok: bool,
    #[serde(
        rename = "updatedAt",
        with = "wire_timestamp",
        default = "epoch"
    )]
    pub updated_at: DateTime<Utc>,
}

impl PutAck {
    pub fn accepted(updated_at: DateTime<Utc>) -> Self {
        Self { ok: true, updated_at }
    }
}

/// Version a server records for a PUT body: the body's own `updatedAt` when it
/// parses, otherwise the receipt time.
pub fn extract_updated_at(body: &Value, received_at: DateTime<Utc>) -> DateTime<Utc> {
    body.get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(|| received_at.trunc_subsecs(3))
}

/// Shared-secret check. An unset secret disables the check.
pub fn authorize_bearer(header: Option<&str>, shared_token: Option<&str>) -> bool {
    let Some(expected) = shared_token.filter(|token| !token.is_empty()) else {
        return true;
    };
    match header.and_then(|value| value.strip_prefix(BEARER_PREFIX)) {
        Some(token) => token == expected,
        None => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lenient field readers
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads a non-negative integer, rounding finite numbers; anything else is `None`.
pub fn read_count(value: Option<&Value>) -> Option<u32> {
    let number = value?.as_f64()?;
    if !number.is_finite() {
        return None;
    }
    Some(number.round().clamp(0.0, u32::MAX as f64) as u32)
}

/// Reads a finite number.
pub fn read_number(value: Option<&Value>) -> Option<f64> {
    value?.as_f64().filter(|number| number.is_finite())
}

/// Reads a string field.
pub fn read_string(value: Option<&Value>) -> Option<String> {
    value?.as_str().map(str::to_string)
}
