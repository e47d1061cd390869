//! Instants, the end-of-time sentinel and version-correction pairs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A point on either time axis.
pub type Instant = DateTime<Utc>;

/// Stored value for an open interval end (`+∞`).
pub const END_OF_TIME: i64 = i64::MAX;

const LATEST: &str = "LATEST";

/// Microseconds since the epoch, the storage representation of an instant.
#[must_use]
pub fn to_micros(instant: Instant) -> i64 {
    instant.timestamp_micros()
}

/// Inverse of [`to_micros`].
///
/// # Errors
/// Returns [`Error::Parse`] if the value is outside the representable range.
pub fn from_micros(micros: i64) -> Result<Instant> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Parse(format!("instant out of range: {micros}")))
}

/// Stored form of an interval end where `None` is `+∞`.
#[must_use]
pub fn bound_to_micros(bound: Option<Instant>) -> i64 {
    bound.map_or(END_OF_TIME, to_micros)
}

/// Inverse of [`bound_to_micros`].
///
/// # Errors
/// Returns [`Error::Parse`] if a finite value is out of range.
pub fn micros_to_bound(micros: i64) -> Result<Option<Instant>> {
    if micros == END_OF_TIME {
        Ok(None)
    } else {
        from_micros(micros).map(Some)
    }
}

/// The pair of instants a read is resolved at.
///
/// `None` on either axis means "latest": it is fixed to the current instant
/// when the read runs, which makes such requests uncacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionCorrection {
    version_as_of: Option<Instant>,
    corrected_to: Option<Instant>,
}

impl VersionCorrection {
    pub const LATEST: Self = Self {
        version_as_of: None,
        corrected_to: None,
    };

    #[must_use]
    pub fn of(version_as_of: Option<Instant>, corrected_to: Option<Instant>) -> Self {
        Self {
            version_as_of,
            corrected_to,
        }
    }

    /// Both axes fixed at the same instant.
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self::of(Some(instant), Some(instant))
    }

    /// Fixed version instant, latest correction.
    #[must_use]
    pub fn version_as_of(instant: Instant) -> Self {
        Self::of(Some(instant), None)
    }

    #[must_use]
    pub fn version(&self) -> Option<Instant> {
        self.version_as_of
    }

    #[must_use]
    pub fn correction(&self) -> Option<Instant> {
        self.corrected_to
    }

    #[must_use]
    pub fn contains_latest(&self) -> bool {
        self.version_as_of.is_none() || self.corrected_to.is_none()
    }

    /// Replace any "latest" axis with `now`.
    #[must_use]
    pub fn with_latest_fixed(&self, now: Instant) -> Self {
        Self::of(
            Some(self.version_as_of.unwrap_or(now)),
            Some(self.corrected_to.unwrap_or(now)),
        )
    }

    /// Storage form, `(version, correction)` in micros. Latest axes use `now`.
    #[must_use]
    pub fn resolve(&self, now: Instant) -> (i64, i64) {
        let fixed = self.with_latest_fixed(now);
        (
            bound_to_micros(fixed.version_as_of),
            bound_to_micros(fixed.corrected_to),
        )
    }
}

fn format_axis(f: &mut fmt::Formatter<'_>, axis: Option<Instant>) -> fmt::Result {
    match axis {
        Some(instant) => write!(f, "{}", instant.to_rfc3339_opts(SecondsFormat::Micros, true)),
        None => write!(f, "{LATEST}"),
    }
}

fn parse_axis(text: &str, original: &str) -> Result<Option<Instant>> {
    if text == LATEST {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| Error::Parse(format!("invalid version-correction '{original}': {e}")))
}

impl fmt::Display for VersionCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V")?;
        format_axis(f, self.version_as_of)?;
        write!(f, ".C")?;
        format_axis(f, self.corrected_to)
    }
}

impl FromStr for VersionCorrection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('V')
            .ok_or_else(|| Error::Parse(format!("invalid version-correction '{s}'")))?;
        let split = body
            .find(".C")
            .ok_or_else(|| Error::Parse(format!("invalid version-correction '{s}'")))?;
        let (version, correction) = (&body[..split], &body[split + 2..]);
        Ok(Self::of(parse_axis(version, s)?, parse_axis(correction, s)?))
    }
}
