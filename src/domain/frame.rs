// Inbound frame parsing - the single validation boundary for upstream payloads
use crate::domain::telemetry::{DriverPosition, TelemetrySample, WeatherSample, MAX_GEAR, MIN_GEAR};
use serde::Deserialize;
use thiserror::Error;

/// DRS status codes at or above this value mean the flap is open.
const DRS_OPEN_CODE: i64 = 10;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A validated upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Telemetry {
        driver_number: Option<u32>,
        sample: TelemetrySample,
    },
    Position(DriverPosition),
    Weather(WeatherSample),
    /// Liveness only, never delivered downstream.
    Heartbeat,
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Telemetry { .. } => "telemetry",
            InboundFrame::Position(_) => "position",
            InboundFrame::Weather(_) => "weather",
            InboundFrame::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawFrame {
    Telemetry(RawTelemetry),
    Position(RawPosition),
    Weather(RawWeather),
    #[serde(alias = "pong", alias = "ping")]
    Heartbeat,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDrs {
    Flag(bool),
    Code(i64),
}

#[derive(Debug, Deserialize)]
struct RawTelemetry {
    #[serde(alias = "date")]
    timestamp: Option<RawTimestamp>,
    #[serde(default)]
    driver_number: Option<u32>,
    speed: Option<f64>,
    #[serde(default)]
    throttle: Option<f64>,
    #[serde(default)]
    brake: Option<f64>,
    #[serde(default, alias = "n_gear")]
    gear: Option<i64>,
    #[serde(default)]
    rpm: Option<f64>,
    #[serde(default)]
    drs: Option<RawDrs>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(alias = "date")]
    timestamp: Option<RawTimestamp>,
    driver_number: Option<u32>,
    x: Option<f64>,
    y: Option<f64>,
    #[serde(default)]
    z: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawWeather {
    #[serde(alias = "date")]
    timestamp: Option<RawTimestamp>,
    air_temperature: Option<f64>,
    track_temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    pressure: Option<f64>,
    #[serde(default)]
    wind_speed: Option<f64>,
    #[serde(default)]
    rainfall: Option<RawDrs>,
}

/// Parse and validate one text frame from the streaming source.
pub fn parse_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    match raw {
        RawFrame::Telemetry(raw) => {
            let driver_number = raw.driver_number;
            Ok(InboundFrame::Telemetry {
                driver_number,
                sample: raw.validate()?,
            })
        }
        RawFrame::Position(raw) => Ok(InboundFrame::Position(raw.validate()?)),
        RawFrame::Weather(raw) => Ok(InboundFrame::Weather(raw.validate()?)),
        RawFrame::Heartbeat => Ok(InboundFrame::Heartbeat),
    }
}

/// Parse a historical row, which carries telemetry fields without a `type` tag.
pub fn parse_telemetry_row(row: &serde_json::Value) -> Result<TelemetrySample, FrameError> {
    let raw = RawTelemetry::deserialize(row)?;
    raw.validate()
}

impl RawTelemetry {
    fn validate(self) -> Result<TelemetrySample, FrameError> {
        let timestamp = required_timestamp(self.timestamp)?;
        let speed = non_negative("speed", self.speed.ok_or(FrameError::MissingField("speed"))?)?;
        let throttle = percentage("throttle", self.throttle.unwrap_or(0.0))?;
        let brake = percentage("brake", self.brake.unwrap_or(0.0))?;
        let rpm = non_negative("rpm", self.rpm.unwrap_or(0.0))?;

        let gear = self.gear.unwrap_or(0);
        if gear < i64::from(MIN_GEAR) || gear > i64::from(MAX_GEAR) {
            return Err(FrameError::OutOfRange {
                field: "gear",
                value: gear as f64,
            });
        }

        Ok(TelemetrySample::new(
            timestamp,
            speed,
            throttle,
            brake,
            gear as i8,
            rpm,
            self.drs.map(RawDrs::is_set).unwrap_or(false),
        ))
    }
}

impl RawPosition {
    fn validate(self) -> Result<DriverPosition, FrameError> {
        Ok(DriverPosition {
            timestamp: required_timestamp(self.timestamp)?,
            driver_number: self
                .driver_number
                .ok_or(FrameError::MissingField("driver_number"))?,
            x: finite("x", self.x.ok_or(FrameError::MissingField("x"))?)?,
            y: finite("y", self.y.ok_or(FrameError::MissingField("y"))?)?,
            z: finite("z", self.z.unwrap_or(0.0))?,
        })
    }
}

impl RawWeather {
    fn validate(self) -> Result<WeatherSample, FrameError> {
        Ok(WeatherSample {
            timestamp: required_timestamp(self.timestamp)?,
            air_temperature: finite(
                "air_temperature",
                self.air_temperature
                    .ok_or(FrameError::MissingField("air_temperature"))?,
            )?,
            track_temperature: finite(
                "track_temperature",
                self.track_temperature
                    .ok_or(FrameError::MissingField("track_temperature"))?,
            )?,
            humidity: percentage("humidity", self.humidity.unwrap_or(0.0))?,
            pressure: non_negative("pressure", self.pressure.unwrap_or(0.0))?,
            wind_speed: non_negative("wind_speed", self.wind_speed.unwrap_or(0.0))?,
            rainfall: self.rainfall.map(|r| r.is_truthy()).unwrap_or(false),
        })
    }
}

impl RawDrs {
    fn is_set(self) -> bool {
        match self {
            RawDrs::Flag(flag) => flag,
            RawDrs::Code(code) => code >= DRS_OPEN_CODE,
        }
    }

    fn is_truthy(self) -> bool {
        match self {
            RawDrs::Flag(flag) => flag,
            RawDrs::Code(code) => code != 0,
        }
    }
}

fn required_timestamp(raw: Option<RawTimestamp>) -> Result<u64, FrameError> {
    match raw.ok_or(FrameError::MissingField("timestamp"))? {
        RawTimestamp::Millis(ms) => {
            u64::try_from(ms).map_err(|_| FrameError::InvalidTimestamp(ms.to_string()))
        }
        RawTimestamp::Fractional(ms) => {
            if ms.is_finite() && ms >= 0.0 {
                Ok(ms.round() as u64)
            } else {
                Err(FrameError::InvalidTimestamp(ms.to_string()))
            }
        }
        RawTimestamp::Text(text) => {
            let parsed = chrono::DateTime::parse_from_rfc3339(&text)
                .map_err(|_| FrameError::InvalidTimestamp(text.clone()))?;
            u64::try_from(parsed.timestamp_millis()).map_err(|_| FrameError::InvalidTimestamp(text))
        }
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, FrameError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FrameError::OutOfRange { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, FrameError> {
    let value = finite(field, value)?;
    if value < 0.0 {
        return Err(FrameError::OutOfRange { field, value });
    }
    Ok(value)
}

fn percentage(field: &'static str, value: f64) -> Result<f64, FrameError> {
    let value = finite(field, value)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(FrameError::OutOfRange { field, value });
    }
    Ok(value)
}
