//! Unit systems and unit conversion.
//!
//! The station host expresses every packet in one of three unit systems.
//! [`UnitConverter`] models the host's unit facility: classify a measurement
//! key into a unit group and convert a whole packet to a target system.
//! [`StandardUnits`] is the built-in implementation used when the host does
//! not supply one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::packet::{Packet, PacketValue, UNIT_SYSTEM_KEY};

/// Unit system a packet is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnitSystem {
    /// US customary
    Us,
    /// Metric, rain in cm and wind in km/h
    Metric,
    /// Metric, rain in mm and wind in m/s
    #[default]
    MetricWx,
}

impl UnitSystem {
    pub const ALL: [UnitSystem; 3] = [Self::Us, Self::Metric, Self::MetricWx];

    /// Integer code used by the host.
    pub fn code(self) -> i64 {
        match self {
            Self::Us => 0x01,
            Self::Metric => 0x10,
            Self::MetricWx => 0x11,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Metric => "METRIC",
            Self::MetricWx => "METRICWX",
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sys| sys.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown unit system '{}', expected US, METRIC or METRICWX", s))
    }
}

impl Serialize for UnitSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for UnitSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Unit and unit group of a measurement in a given unit system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitType {
    pub unit: Option<String>,
    pub group: Option<String>,
}

/// The host's unit facility.
pub trait UnitConverter: Send + Sync {
    /// Classify `key` in `system`. Both parts are `None` for unknown keys.
    fn standard_unit_type(&self, system: UnitSystem, key: &str) -> UnitType;

    /// Convert every value of `packet` into `target`.
    fn to_std_system(&self, packet: &Packet, target: UnitSystem) -> Packet;
}

/// Observation key -> unit group.
const OBS_GROUPS: &[(&str, &str)] = &[
    ("altimeter", "group_pressure"),
    ("appTemp", "group_temperature"),
    ("barometer", "group_pressure"),
    ("barometerRate", "group_pressurerate"),
    ("beaufort", "group_count"),
    ("cloudbase", "group_altitude"),
    ("co2", "group_fraction"),
    ("consBatteryVoltage", "group_volt"),
    ("cooldeg", "group_degree_day"),
    ("dateTime", "group_time"),
    ("dewpoint", "group_temperature"),
    ("ET", "group_rain"),
    ("hail", "group_rain"),
    ("hailRate", "group_rainrate"),
    ("heatdeg", "group_degree_day"),
    ("heatindex", "group_temperature"),
    ("heatingTemp", "group_temperature"),
    ("heatingVoltage", "group_volt"),
    ("hourRain", "group_rain"),
    ("humidex", "group_temperature"),
    ("inDewpoint", "group_temperature"),
    ("inHumidity", "group_percent"),
    ("inTemp", "group_temperature"),
    ("interval", "group_interval"),
    ("lightning_distance", "group_distance"),
    ("lightning_strike_count", "group_count"),
    ("maxSolarRad", "group_radiation"),
    ("monthRain", "group_rain"),
    ("noise", "group_db"),
    ("outHumidity", "group_percent"),
    ("outTemp", "group_temperature"),
    ("pm1_0", "group_concentration"),
    ("pm2_5", "group_concentration"),
    ("pm10_0", "group_concentration"),
    ("pressure", "group_pressure"),
    ("radiation", "group_radiation"),
    ("rain", "group_rain"),
    ("rain24", "group_rain"),
    ("rainRate", "group_rainrate"),
    ("dayRain", "group_rain"),
    ("referenceVoltage", "group_volt"),
    ("rxCheckPercent", "group_percent"),
    ("snow", "group_rain"),
    ("snowRate", "group_rainrate"),
    ("stormRain", "group_rain"),
    ("supplyVoltage", "group_volt"),
    ("THSW", "group_temperature"),
    ("UV", "group_uv"),
    ("windchill", "group_temperature"),
    ("windDir", "group_direction"),
    ("windGust", "group_speed"),
    ("windGustDir", "group_direction"),
    ("windrun", "group_distance"),
    ("windSpeed", "group_speed"),
    ("windSpeed10", "group_speed"),
    ("yearRain", "group_rain"),
];

/// Families of numbered channel observations (`extraTemp1`, `soilMoist3`, ...).
const NUMBERED_GROUPS: &[(&str, &str)] = &[
    ("extraHumid", "group_percent"),
    ("extraTemp", "group_temperature"),
    ("leafTemp", "group_temperature"),
    ("leafWet", "group_count"),
    ("soilMoist", "group_moisture"),
    ("soilTemp", "group_temperature"),
];

/// Unit group -> (US, METRIC, METRICWX) unit.
const GROUP_UNITS: &[(&str, [&str; 3])] = &[
    ("group_altitude", ["foot", "meter", "meter"]),
    ("group_amp", ["amp", "amp", "amp"]),
    ("group_boolean", ["boolean", "boolean", "boolean"]),
    ("group_concentration", ["microgram_per_meter_cubed"; 3]),
    ("group_count", ["count", "count", "count"]),
    ("group_data", ["byte", "byte", "byte"]),
    ("group_db", ["dB", "dB", "dB"]),
    ("group_degree_day", ["degree_F_day", "degree_C_day", "degree_C_day"]),
    ("group_direction", ["degree_compass"; 3]),
    ("group_distance", ["mile", "km", "km"]),
    ("group_elapsed", ["second", "second", "second"]),
    ("group_energy", ["watt_hour", "watt_hour", "watt_hour"]),
    ("group_fraction", ["ppm", "ppm", "ppm"]),
    ("group_frequency", ["hertz", "hertz", "hertz"]),
    ("group_illuminance", ["lux", "lux", "lux"]),
    ("group_interval", ["minute", "minute", "minute"]),
    ("group_length", ["inch", "cm", "cm"]),
    ("group_moisture", ["centibar", "centibar", "centibar"]),
    ("group_percent", ["percent", "percent", "percent"]),
    ("group_power", ["watt", "watt", "watt"]),
    ("group_pressure", ["inHg", "mbar", "mbar"]),
    ("group_pressurerate", ["inHg_per_hour", "mbar_per_hour", "mbar_per_hour"]),
    ("group_radiation", ["watt_per_meter_squared"; 3]),
    ("group_rain", ["inch", "cm", "mm"]),
    ("group_rainrate", ["inch_per_hour", "cm_per_hour", "mm_per_hour"]),
    ("group_speed", ["mile_per_hour", "km_per_hour", "meter_per_second"]),
    ("group_speed2", ["mile_per_hour2", "km_per_hour2", "meter_per_second2"]),
    ("group_temperature", ["degree_F", "degree_C", "degree_C"]),
    ("group_time", ["unix_epoch", "unix_epoch", "unix_epoch"]),
    ("group_uv", ["uv_index", "uv_index", "uv_index"]),
    ("group_volt", ["volt", "volt", "volt"]),
    ("group_volume", ["gallon", "liter", "liter"]),
];

/// Linear conversions `to = from * scale + offset`. Reverse direction is derived.
const LINEAR: &[(&str, &str, f64, f64)] = &[
    ("degree_F", "degree_C", 5.0 / 9.0, -160.0 / 9.0),
    ("degree_F_day", "degree_C_day", 5.0 / 9.0, 0.0),
    ("inHg", "mbar", 33.863_886_666_7, 0.0),
    ("inHg_per_hour", "mbar_per_hour", 33.863_886_666_7, 0.0),
    ("inch", "cm", 2.54, 0.0),
    ("inch", "mm", 25.4, 0.0),
    ("cm", "mm", 10.0, 0.0),
    ("inch_per_hour", "cm_per_hour", 2.54, 0.0),
    ("inch_per_hour", "mm_per_hour", 25.4, 0.0),
    ("cm_per_hour", "mm_per_hour", 10.0, 0.0),
    ("mile_per_hour", "km_per_hour", 1.609_344, 0.0),
    ("mile_per_hour", "meter_per_second", 0.447_04, 0.0),
    ("km_per_hour", "meter_per_second", 1.0 / 3.6, 0.0),
    ("mile_per_hour2", "km_per_hour2", 1.609_344, 0.0),
    ("mile_per_hour2", "meter_per_second2", 0.447_04, 0.0),
    ("km_per_hour2", "meter_per_second2", 1.0 / 3.6, 0.0),
    ("mile", "km", 1.609_344, 0.0),
    ("foot", "meter", 0.3048, 0.0),
    ("gallon", "liter", 3.785_411_784, 0.0),
];

/// Convert `value` between two units, `None` when no conversion is known.
pub fn convert_value(value: f64, from: &str, to: &str) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    LINEAR.iter().find_map(|&(a, b, scale, offset)| {
        if a == from && b == to {
            Some(value * scale + offset)
        } else if a == to && b == from {
            Some((value - offset) / scale)
        } else {
            None
        }
    })
}

/// Built-in unit tables for weather station observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardUnits;

impl StandardUnits {
    pub fn new() -> Self {
        Self
    }

    /// Unit group of an observation key.
    pub fn group_of(key: &str) -> Option<&'static str> {
        if let Some((_, group)) = OBS_GROUPS.iter().find(|(k, _)| *k == key) {
            return Some(*group);
        }
        let base = key.trim_end_matches(|c: char| c.is_ascii_digit());
        if base.len() == key.len() {
            return None;
        }
        NUMBERED_GROUPS
            .iter()
            .find(|(k, _)| *k == base)
            .map(|(_, group)| *group)
    }

    /// Unit used for `group` in `system`.
    pub fn unit_for_group(group: &str, system: UnitSystem) -> Option<&'static str> {
        let index = match system {
            UnitSystem::Us => 0,
            UnitSystem::Metric => 1,
            UnitSystem::MetricWx => 2,
        };
        GROUP_UNITS
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, units)| units[index])
    }
}

impl UnitConverter for StandardUnits {
    fn standard_unit_type(&self, system: UnitSystem, key: &str) -> UnitType {
        match Self::group_of(key) {
            Some(group) => UnitType {
                unit: Self::unit_for_group(group, system).map(str::to_string),
                group: Some(group.to_string()),
            },
            None => UnitType::default(),
        }
    }

    fn to_std_system(&self, packet: &Packet, target: UnitSystem) -> Packet {
        let Some(source) = packet.unit_system() else {
            tracing::debug!("Packet has no unit system, passing through unconverted");
            return packet.clone();
        };
        if source == target {
            return packet.clone();
        }

        let mut converted = Packet::new();
        for (key, value) in packet.iter() {
            if key == UNIT_SYSTEM_KEY {
                converted.insert(key, PacketValue::Number(target.code() as f64));
                continue;
            }
            let value = match (value, Self::group_of(key)) {
                (PacketValue::Number(n), Some(group)) => {
                    let from = Self::unit_for_group(group, source);
                    let to = Self::unit_for_group(group, target);
                    match (from, to) {
                        (Some(from), Some(to)) => match convert_value(*n, from, to) {
                            Some(v) => PacketValue::Number(v),
                            None => {
                                tracing::debug!(key, from, to, "No conversion between units");
                                value.clone()
                            }
                        },
                        _ => value.clone(),
                    }
                }
                _ => value.clone(),
            };
            converted.insert(key, value);
        }
        converted
    }
}
