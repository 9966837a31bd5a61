//! Core types shared by every layer of the OCPP-J engine
//!
//! - `ErrorCode`: standard CallError codes and their wire strings
//! - `Role`: which side of the connection an engine instance plays
//! - `Timestamp`: the fixed ISO-8601 profile used inside payloads

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Identifier of one logical connection (a charge point identity)
pub type EndpointId = String;

// ============================================================================
// Error codes
// ============================================================================

/// Standard OCPP-J CallError codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    /// OCPP 1.6 spells this code `OccurenceConstraintViolation`
    OccurrenceConstraintViolationV2,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 11] = [
        ErrorCode::NotImplemented,
        ErrorCode::NotSupported,
        ErrorCode::InternalError,
        ErrorCode::ProtocolError,
        ErrorCode::SecurityError,
        ErrorCode::FormationViolation,
        ErrorCode::PropertyConstraintViolation,
        ErrorCode::OccurrenceConstraintViolation,
        ErrorCode::OccurrenceConstraintViolationV2,
        ErrorCode::TypeConstraintViolation,
        ErrorCode::GenericError,
    ];

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::OccurrenceConstraintViolationV2 => "OccurenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error code: {0}")]
pub struct UnknownErrorCode(pub String);

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownErrorCode(s.to_string()))
    }
}

// ============================================================================
// Roles
// ============================================================================

/// The side of an OCPP-J connection an engine instance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepts connections from charge points
    CentralSystem,
    /// Initiates a single connection to its central system
    ChargePoint,
}

impl Role {
    /// The role on the other end of the connection
    pub fn peer(self) -> Role {
        match self {
            Role::CentralSystem => Role::ChargePoint,
            Role::ChargePoint => Role::CentralSystem,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::CentralSystem => write!(f, "central system"),
            Role::ChargePoint => write!(f, "charge point"),
        }
    }
}

// ============================================================================
// Timestamps
// ============================================================================

const MILLIS_UTC: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const MILLIS_OFFSET: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timestamp {input:?}: {reason}")]
pub struct TimestampError {
    pub input: String,
    pub reason: String,
}

/// Payload timestamp with millisecond precision and an explicit zone offset.
///
/// Rendered as `2024-01-01T00:00:00.000Z` for UTC and
/// `2024-01-01T02:00:00.000+02:00` otherwise. Any RFC 3339 instant with an
/// explicit offset is accepted on parse; sub-millisecond digits are dropped.
/// The zone spelling is kept, so `+00:00` stays `+00:00` and `Z` stays `Z`,
/// and `parse(render(t)) == t` always holds.
///
/// Equality compares the instant, the offset and the zone spelling; use
/// `same_instant` to compare only the point in time.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    datetime: DateTime<FixedOffset>,
    zulu: bool,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap any zoned datetime, truncating to milliseconds.
    ///
    /// A zero offset renders as `Z`.
    pub fn from_datetime<Tz: TimeZone>(datetime: DateTime<Tz>) -> Self {
        let fixed = datetime.fixed_offset();
        let zulu = fixed.offset().local_minus_utc() == 0;
        Self::truncated(fixed, zulu)
    }

    fn truncated(fixed: DateTime<FixedOffset>, zulu: bool) -> Self {
        let millis = fixed.nanosecond() / 1_000_000 * 1_000_000;
        Self {
            datetime: fixed.with_nanosecond(millis).unwrap_or(fixed),
            zulu,
        }
    }

    pub fn parse(input: &str) -> Result<Self, TimestampError> {
        let zulu = input.ends_with(['Z', 'z']);
        DateTime::parse_from_rfc3339(input)
            .map(|fixed| Self::truncated(fixed, zulu))
            .map_err(|e| TimestampError {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.datetime
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        self.datetime.with_timezone(&Utc)
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.datetime.timestamp_millis()
    }

    /// True if both denote the same point in time, whatever their offsets
    pub fn same_instant(&self, other: &Timestamp) -> bool {
        self.datetime == other.datetime
    }

    fn offset_seconds(&self) -> i32 {
        self.datetime.offset().local_minus_utc()
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    /// Chronological, then by offset and zone spelling
    fn cmp(&self, other: &Self) -> Ordering {
        self.datetime
            .cmp(&other.datetime)
            .then_with(|| self.offset_seconds().cmp(&other.offset_seconds()))
            .then_with(|| self.zulu.cmp(&other.zulu))
    }
}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.datetime.timestamp_millis().hash(state);
        self.offset_seconds().hash(state);
        self.zulu.hash(state);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = if self.zulu { MILLIS_UTC } else { MILLIS_OFFSET };
        write!(f, "{}", self.datetime.format(format))
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Timestamp::from_datetime(datetime)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}
