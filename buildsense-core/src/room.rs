use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RoomId = String;
pub type DeviceId = String;

/// Scenario flags that put a room into an emergency.
pub const EMERGENCY_SCENARIOS: &[&str] = &[
    "emergency",
    "fire",
    "fire_alarm",
    "smoke",
    "gas_leak",
    "evacuation",
];

/// Scenario flags announcing that an empty room is about to be used.
pub const UPCOMING_USE_SCENARIOS: &[&str] = &["upcoming_use", "meeting_soon", "booking_upcoming"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Co2,
    Occupancy,
    LightLevel,
    Humidity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl SensorReading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            observed_at: None,
        }
    }

    pub fn observed(value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            observed_at: Some(observed_at),
        }
    }
}

/// Latest sensor values for one room. Every reading is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SensorReadings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<SensorReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co2: Option<SensorReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<SensorReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_level: Option<SensorReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<SensorReading>,
}

impl SensorReadings {
    pub fn get(&self, kind: SensorKind) -> Option<&SensorReading> {
        match kind {
            SensorKind::Temperature => self.temperature.as_ref(),
            SensorKind::Co2 => self.co2.as_ref(),
            SensorKind::Occupancy => self.occupancy.as_ref(),
            SensorKind::LightLevel => self.light_level.as_ref(),
            SensorKind::Humidity => self.humidity.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: SensorKind) -> &mut Option<SensorReading> {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Co2 => &mut self.co2,
            SensorKind::Occupancy => &mut self.occupancy,
            SensorKind::LightLevel => &mut self.light_level,
            SensorKind::Humidity => &mut self.humidity,
        }
    }

    pub fn set(&mut self, kind: SensorKind, reading: SensorReading) {
        *self.slot_mut(kind) = Some(reading);
    }

    pub fn value(&self, kind: SensorKind) -> Option<f64> {
        self.get(kind)
            .map(|reading| reading.value)
            .filter(|value| value.is_finite())
    }

    /// Drop readings observed more than `max_age` before `now`. Readings
    /// without a timestamp are kept. Returns the kinds that were dropped.
    pub fn prune_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> Vec<SensorKind> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut dropped = Vec::new();
        for kind in [
            SensorKind::Temperature,
            SensorKind::Co2,
            SensorKind::Occupancy,
            SensorKind::LightLevel,
            SensorKind::Humidity,
        ] {
            let slot = self.slot_mut(kind);
            let stale = matches!(
                slot,
                Some(SensorReading {
                    observed_at: Some(at),
                    ..
                }) if now.signed_duration_since(*at) > max_age
            );
            if stale {
                *slot = None;
                dropped.push(kind);
            }
        }
        dropped
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Lighting,
    Hvac,
    AirFlow,
    Security,
    Camera,
    Emergency,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceState {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub is_on: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl DeviceState {
    pub fn new(id: impl Into<DeviceId>, kind: DeviceKind, is_on: bool) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            is_on,
            capabilities: Vec::new(),
        }
    }
}

/// A service level objective as applied to one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SloTarget {
    pub name: String,
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default = "default_slo_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Metric-specific parameters such as `min_temp` or `max_co2`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
}

fn default_slo_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl SloTarget {
    pub fn new(name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            target_value: None,
            weight: default_slo_weight(),
            active: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }
}

/// Everything an agent may look at for one arbitration round. Built once by
/// the assembling layer and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub sensors: SensorReadings,
    #[serde(default)]
    pub devices: Vec<DeviceState>,
    #[serde(default)]
    pub slos: Vec<SloTarget>,
    #[serde(default)]
    pub scenarios: BTreeSet<String>,
}

impl RoomSnapshot {
    pub fn new(room_id: impl Into<RoomId>, captured_at: DateTime<Utc>) -> Self {
        Self {
            room_id: room_id.into(),
            captured_at,
            ..Self::default()
        }
    }

    pub fn sensor(&self, kind: SensorKind) -> Option<f64> {
        self.sensors.value(kind)
    }

    /// Occupancy as a head count, `None` when no usable reading exists.
    pub fn occupancy(&self) -> Option<u32> {
        self.sensor(SensorKind::Occupancy)
            .map(|count| count.max(0.0).round() as u32)
    }

    pub fn device(&self, id: &str) -> Option<&DeviceState> {
        self.devices.iter().find(|device| device.id == id)
    }

    pub fn devices_of(&self, kind: DeviceKind) -> impl Iterator<Item = &DeviceState> {
        self.devices.iter().filter(move |device| device.kind == kind)
    }

    /// Device identifiers in stable (sorted, deduplicated) order.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let ids: BTreeSet<&DeviceId> = self.devices.iter().map(|device| &device.id).collect();
        ids.into_iter().cloned().collect()
    }

    pub fn active_slos(&self) -> impl Iterator<Item = &SloTarget> {
        self.slos.iter().filter(|slo| slo.active)
    }

    pub fn slo_for_metric(&self, metric: &str) -> Option<&SloTarget> {
        self.active_slos().find(|slo| slo.metric == metric)
    }

    pub fn has_scenario(&self, flag: &str) -> bool {
        self.scenarios
            .iter()
            .any(|scenario| scenario.eq_ignore_ascii_case(flag))
    }

    pub fn emergency_flags(&self) -> Vec<&str> {
        self.scenarios
            .iter()
            .filter(|scenario| {
                EMERGENCY_SCENARIOS
                    .iter()
                    .any(|flag| scenario.eq_ignore_ascii_case(flag))
            })
            .map(String::as_str)
            .collect()
    }

    pub fn has_upcoming_use(&self) -> bool {
        UPCOMING_USE_SCENARIOS
            .iter()
            .any(|flag| self.has_scenario(flag))
    }
}
