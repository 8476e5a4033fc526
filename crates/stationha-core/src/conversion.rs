//! Named value conversions.
//!
//! Sensor definitions reference conversions by name. The set is closed:
//! unknown names are rejected when the tables are loaded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, LocalResult, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConversionError;
use crate::packet::PacketValue;
use crate::tables::EnumMaps;
use crate::units::UnitSystem;

pub const CARDINAL_DIRECTIONS: &str = "cardinal_directions";
pub const BEAUFORT_SCALE: &str = "beaufort_scale";

/// Station-level context a conversion may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationContext {
    pub time_zone: Tz,
}

impl Default for StationContext {
    fn default() -> Self {
        Self { time_zone: Tz::UTC }
    }
}

/// A named value conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Wind force number -> Beaufort label
    BeaufortScaleMap,
    /// Compass degrees -> 16-point cardinal label
    DegreesToCardinal,
    /// Station-local epoch seconds -> UTC ISO-8601
    LocaltimeToUtcTimestamp,
    /// Unit system code -> symbolic name
    UnitSystemToString,
}

impl Conversion {
    pub const ALL: [Conversion; 4] = [
        Self::BeaufortScaleMap,
        Self::DegreesToCardinal,
        Self::LocaltimeToUtcTimestamp,
        Self::UnitSystemToString,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::BeaufortScaleMap => "beaufort_scale_map",
            Self::DegreesToCardinal => "degrees_to_cardinal",
            Self::LocaltimeToUtcTimestamp => "localtime_to_utc_timestamp",
            Self::UnitSystemToString => "unit_system_to_string",
        }
    }

    /// Apply the conversion to a raw packet value.
    pub fn apply(
        self,
        value: &PacketValue,
        ctx: &StationContext,
        enums: &EnumMaps,
    ) -> Result<PacketValue, ConversionError> {
        let number = value.as_f64().ok_or_else(|| ConversionError::NotNumeric {
            conversion: self.name(),
            value: value.to_string(),
        })?;
        if !number.is_finite() {
            return Err(ConversionError::NotFinite {
                conversion: self.name(),
                value: number,
            });
        }

        let converted = match self {
            Self::BeaufortScaleMap => beaufort_label(number, enums),
            Self::DegreesToCardinal => degrees_to_cardinal(number, enums)?,
            Self::LocaltimeToUtcTimestamp => localtime_to_utc(number, ctx.time_zone)?,
            Self::UnitSystemToString => unit_system_name(number)?,
        };
        Ok(PacketValue::Text(converted))
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Conversion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown conversion '{}'", s))
    }
}

impl Serialize for Conversion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Conversion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Index into the 16-point compass for `degrees`, wrapping past 360.
/// `None` for NaN or infinite bearings.
pub fn cardinal_index(degrees: f64) -> Option<u32> {
    if !degrees.is_finite() {
        return None;
    }
    Some(((degrees + 11.25) / 22.5).floor().rem_euclid(16.0) as u32)
}

/// 16-point cardinal label for a compass bearing.
pub fn degrees_to_cardinal(degrees: f64, enums: &EnumMaps) -> Result<String, ConversionError> {
    let index = cardinal_index(degrees).ok_or(ConversionError::NotFinite {
        conversion: Conversion::DegreesToCardinal.name(),
        value: degrees,
    })?;
    let map = enums
        .get(CARDINAL_DIRECTIONS)
        .ok_or(ConversionError::MissingEnum(CARDINAL_DIRECTIONS))?;
    map.get(&index)
        .cloned()
        .ok_or(ConversionError::MissingEnum(CARDINAL_DIRECTIONS))
}

/// Unit system name for an integral code such as `17.0`.
pub fn unit_system_name(code: f64) -> Result<String, ConversionError> {
    if code.fract() != 0.0 || !code.is_finite() {
        return Err(ConversionError::UnknownUnitSystem(code));
    }
    UnitSystem::from_code(code as i64)
        .map(|system| system.name().to_string())
        .ok_or(ConversionError::UnknownUnitSystem(code))
}

/// Beaufort label, or `"<n> - Unknown"` outside the scale.
pub fn beaufort_label(force: f64, enums: &EnumMaps) -> String {
    let n = force.trunc() as i64;
    u32::try_from(n)
        .ok()
        .and_then(|ordinal| enums.label(BEAUFORT_SCALE, ordinal))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} - Unknown", n))
}

/// Interpret `seconds` as a wall-clock time in `tz` and render it in UTC.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
/// Local times skipped by a DST jump are shifted forward by an hour.
pub fn localtime_to_utc(seconds: f64, tz: Tz) -> Result<String, ConversionError> {
    let secs = seconds.floor();
    let nanos = ((seconds - secs) * 1e9).round().min(999_999_999.0) as u32;
    if !secs.is_finite() || secs.abs() > i64::MAX as f64 {
        return Err(ConversionError::TimestampOutOfRange(seconds));
    }
    let wall = DateTime::from_timestamp(secs as i64, nanos)
        .ok_or(ConversionError::TimestampOutOfRange(seconds))?
        .naive_utc();

    let local = match tz.from_local_datetime(&wall) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = wall + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .ok_or(ConversionError::TimestampOutOfRange(seconds))?
        }
    };

    Ok(local
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::AutoSi, false))
}
