// Telemetry data domain models
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_GEAR: i8 = -1;
pub const MAX_GEAR: i8 = 8;

/// One instant of car telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Milliseconds, monotonic within a session.
    pub timestamp: u64,
    /// km/h
    pub speed: f64,
    /// Percent, 0-100
    pub throttle: f64,
    /// Percent, 0-100
    pub brake: f64,
    /// -1 is reverse, 0 is neutral
    pub gear: i8,
    pub rpm: f64,
    pub drs: bool,
}

impl TelemetrySample {
    pub fn new(
        timestamp: u64,
        speed: f64,
        throttle: f64,
        brake: f64,
        gear: i8,
        rpm: f64,
        drs: bool,
    ) -> Self {
        Self {
            timestamp,
            speed,
            throttle,
            brake,
            gear,
            rpm,
            drs,
        }
    }

    /// Numeric view of a single field, used for sorting, filtering and charting.
    pub fn value(&self, field: TelemetryField) -> f64 {
        match field {
            TelemetryField::Timestamp => self.timestamp as f64,
            TelemetryField::Speed => self.speed,
            TelemetryField::Throttle => self.throttle,
            TelemetryField::Brake => self.brake,
            TelemetryField::Gear => f64::from(self.gear),
            TelemetryField::Rpm => self.rpm,
            TelemetryField::Drs => {
                if self.drs {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryField {
    Timestamp,
    Speed,
    Throttle,
    Brake,
    Gear,
    Rpm,
    Drs,
}

impl TelemetryField {
    pub const ALL: [TelemetryField; 7] = [
        TelemetryField::Timestamp,
        TelemetryField::Speed,
        TelemetryField::Throttle,
        TelemetryField::Brake,
        TelemetryField::Gear,
        TelemetryField::Rpm,
        TelemetryField::Drs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryField::Timestamp => "timestamp",
            TelemetryField::Speed => "speed",
            TelemetryField::Throttle => "throttle",
            TelemetryField::Brake => "brake",
            TelemetryField::Gear => "gear",
            TelemetryField::Rpm => "rpm",
            TelemetryField::Drs => "drs",
        }
    }
}

impl fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TelemetryField::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown telemetry field '{}'", s))
    }
}

/// Track position of one car.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverPosition {
    pub timestamp: u64,
    pub driver_number: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Track-side weather reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: u64,
    pub air_temperature: f64,
    pub track_temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub rainfall: bool,
}

/// A value whose numeric fields can be blended by the queue's aggregation
/// strategies. Non-numeric fields (flags, identifiers, timestamps) are always
/// taken from the most recent value in a batch.
pub trait NumericFields: Clone + Send + 'static {
    fn timestamp(&self) -> u64;

    fn numeric_values(&self) -> Vec<f64>;

    /// Rebuild a value from blended numeric fields, in `numeric_values` order.
    fn with_numeric_values(&self, values: &[f64]) -> Self;
}

impl NumericFields for TelemetrySample {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn numeric_values(&self) -> Vec<f64> {
        vec![
            self.speed,
            self.throttle,
            self.brake,
            f64::from(self.gear),
            self.rpm,
        ]
    }

    fn with_numeric_values(&self, values: &[f64]) -> Self {
        let get = |i: usize, fallback: f64| values.get(i).copied().unwrap_or(fallback);
        Self {
            timestamp: self.timestamp,
            speed: get(0, self.speed).max(0.0),
            throttle: get(1, self.throttle).clamp(0.0, 100.0),
            brake: get(2, self.brake).clamp(0.0, 100.0),
            gear: get(3, f64::from(self.gear))
                .round()
                .clamp(f64::from(MIN_GEAR), f64::from(MAX_GEAR)) as i8,
            rpm: get(4, self.rpm).max(0.0),
            drs: self.drs,
        }
    }
}

impl NumericFields for DriverPosition {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn numeric_values(&self) -> Vec<f64> {
        vec![self.x, self.y, self.z]
    }

    fn with_numeric_values(&self, values: &[f64]) -> Self {
        let get = |i: usize, fallback: f64| values.get(i).copied().unwrap_or(fallback);
        Self {
            timestamp: self.timestamp,
            driver_number: self.driver_number,
            x: get(0, self.x),
            y: get(1, self.y),
            z: get(2, self.z),
        }
    }
}

impl NumericFields for WeatherSample {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn numeric_values(&self) -> Vec<f64> {
        vec![
            self.air_temperature,
            self.track_temperature,
            self.humidity,
            self.pressure,
            self.wind_speed,
        ]
    }

    fn with_numeric_values(&self, values: &[f64]) -> Self {
        let get = |i: usize, fallback: f64| values.get(i).copied().unwrap_or(fallback);
        Self {
            timestamp: self.timestamp,
            air_temperature: get(0, self.air_temperature),
            track_temperature: get(1, self.track_temperature),
            humidity: get(2, self.humidity).clamp(0.0, 100.0),
            pressure: get(3, self.pressure),
            wind_speed: get(4, self.wind_speed).max(0.0),
            rainfall: self.rainfall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_parsing() {
        assert_eq!("speed".parse::<TelemetryField>().unwrap(), TelemetryField::Speed);
        assert_eq!(" RPM ".parse::<TelemetryField>().unwrap(), TelemetryField::Rpm);
        assert!("lap_time".parse::<TelemetryField>().is_err());
    }

    #[test]
    fn test_blended_gear_is_rounded_and_clamped() {
        let sample = TelemetrySample::new(10, 200.0, 80.0, 0.0, 6, 11000.0, true);
        let blended = sample.with_numeric_values(&[210.0, 120.0, -3.0, 6.6, 11500.0]);

        assert_eq!(blended.gear, 7);
        assert_eq!(blended.throttle, 100.0);
        assert_eq!(blended.brake, 0.0);
        assert!(blended.drs);
        assert_eq!(blended.timestamp, 10);
    }

    #[test]
    fn test_drs_value_is_numeric() {
        let sample = TelemetrySample::new(0, 0.0, 0.0, 0.0, 0, 0.0, true);
        assert_eq!(sample.value(TelemetryField::Drs), 1.0);
        assert_eq!(sample.value(TelemetryField::Gear), 0.0);
    }
}
