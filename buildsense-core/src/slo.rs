use serde::{Deserialize, Serialize};

use crate::room::{DeviceKind, RoomSnapshot, SensorKind, SloTarget};

pub const METRIC_TEMPERATURE_COMFORT: &str = "temperature_comfort";
pub const METRIC_HUMIDITY_CONTROL: &str = "humidity_control";
pub const METRIC_AIR_QUALITY_CO2: &str = "air_quality_co2";
pub const METRIC_SECURITY_LIGHTING: &str = "security_lighting";
pub const METRIC_ENERGY_EFFICIENCY: &str = "energy_efficiency";
pub const METRIC_EMERGENCY_READINESS: &str = "emergency_readiness";
pub const METRIC_OCCUPANCY_OPTIMIZATION: &str = "occupancy_optimization";

/// Compliance below this counts as a violation.
pub const VIOLATION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn for_compliance(compliance: f64) -> Option<Self> {
        if compliance < 0.3 {
            Some(Self::Critical)
        } else if compliance < 0.6 {
            Some(Self::High)
        } else if compliance < VIOLATION_THRESHOLD {
            Some(Self::Medium)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SloEvaluation {
    pub name: String,
    pub metric: String,
    pub weight: f64,
    /// `None` when the room has no usable reading for the metric.
    pub compliance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// Compliance of a room against its active SLOs at the time of a round.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SloReport {
    pub overall_compliance: f64,
    pub evaluations: Vec<SloEvaluation>,
}

impl SloReport {
    pub fn violations(&self) -> impl Iterator<Item = &SloEvaluation> {
        self.evaluations.iter().filter(|eval| eval.severity.is_some())
    }
}

pub fn evaluate_slos(snapshot: &RoomSnapshot) -> SloReport {
    let mut evaluations = Vec::new();
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for slo in snapshot.active_slos() {
        let compliance = evaluate_one(slo, snapshot).map(|score| score.clamp(0.0, 1.0));
        if let Some(score) = compliance {
            weighted += score * slo.weight;
            total_weight += slo.weight;
        }
        evaluations.push(SloEvaluation {
            name: slo.name.clone(),
            metric: slo.metric.clone(),
            weight: slo.weight,
            compliance,
            severity: compliance.and_then(Severity::for_compliance),
        });
    }

    let overall_compliance = if total_weight > 0.0 {
        weighted / total_weight
    } else {
        1.0
    };

    SloReport {
        overall_compliance,
        evaluations,
    }
}

fn evaluate_one(slo: &SloTarget, snapshot: &RoomSnapshot) -> Option<f64> {
    match slo.metric.as_str() {
        METRIC_TEMPERATURE_COMFORT => {
            let current = snapshot.sensor(SensorKind::Temperature)?;
            Some(band_compliance(
                current,
                slo.param("min_temp", 22.0),
                slo.param("max_temp", 24.0),
                5.0,
            ))
        }
        METRIC_HUMIDITY_CONTROL => {
            let current = snapshot.sensor(SensorKind::Humidity)?;
            Some(band_compliance(
                current,
                slo.param("min_humidity", 40.0),
                slo.param("max_humidity", 60.0),
                30.0,
            ))
        }
        METRIC_AIR_QUALITY_CO2 => {
            let current = snapshot.sensor(SensorKind::Co2)?;
            let max_co2 = slo.param("max_co2", 800.0);
            if current <= max_co2 {
                Some(1.0)
            } else {
                Some(1.0 - ((current - max_co2) / 1000.0).powf(1.5))
            }
        }
        METRIC_SECURITY_LIGHTING => {
            let required = slo.param("min_lights", 1.0);
            let lights_on = snapshot
                .devices_of(DeviceKind::Lighting)
                .filter(|device| device.is_on)
                .count() as f64;
            Some(ratio_compliance(lights_on, required))
        }
        METRIC_ENERGY_EFFICIENCY => {
            let occupancy = snapshot.occupancy().unwrap_or(0);
            let total = snapshot.devices.len() as f64;
            let on = snapshot.devices.iter().filter(|device| device.is_on).count() as f64;
            if total == 0.0 {
                return Some(1.0);
            }
            if occupancy == 0 {
                let allowed = slo.param("max_devices_unoccupied", 1.0);
                if on <= allowed {
                    Some(1.0)
                } else {
                    Some(1.0 - (on - allowed) / total)
                }
            } else {
                let expected = (f64::from(occupancy) / 5.0).min(1.0);
                let actual = on / total;
                if actual <= expected + 0.2 {
                    Some(1.0)
                } else {
                    Some(1.0 - (actual - expected))
                }
            }
        }
        METRIC_OCCUPANCY_OPTIMIZATION => {
            let hvac_on = snapshot
                .devices_of(DeviceKind::Hvac)
                .filter(|device| device.is_on)
                .count() as f64;
            let lights_on = snapshot
                .devices_of(DeviceKind::Lighting)
                .filter(|device| device.is_on)
                .count() as f64;
            match snapshot.occupancy().unwrap_or(0) {
                0 => {
                    let hvac = if hvac_on <= slo.param("max_hvac_unoccupied", 0.0) {
                        1.0
                    } else {
                        0.5
                    };
                    let lights = if lights_on <= slo.param("max_lights_unoccupied", 1.0) {
                        1.0
                    } else {
                        0.7
                    };
                    Some((hvac + lights) / 2.0)
                }
                occupancy => {
                    let expected = f64::from(occupancy.min(5)) / 5.0;
                    let systems = snapshot
                        .devices
                        .iter()
                        .filter(|device| matches!(device.kind, DeviceKind::Hvac | DeviceKind::Lighting))
                        .count() as f64;
                    let actual = if systems > 0.0 {
                        (hvac_on + lights_on) / systems
                    } else {
                        0.0
                    };
                    let gap = (actual - expected).abs();
                    Some(if gap <= 0.3 { 1.0 } else { 1.0 - gap })
                }
            }
        }
        METRIC_EMERGENCY_READINESS => {
            let emergency: Vec<_> = snapshot
                .devices
                .iter()
                .filter(|device| matches!(device.kind, DeviceKind::Emergency | DeviceKind::Security))
                .collect();
            let on = emergency.iter().filter(|device| device.is_on).count() as f64;
            let required = slo.param("required_devices", emergency.len() as f64);
            Some(ratio_compliance(on, required))
        }
        other => {
            let current = snapshot.sensor(sensor_for_metric(other)?)?;
            let target = slo.target_value.unwrap_or(0.0);
            if target > 0.0 {
                Some((current / target).min(1.0))
            } else if current == target {
                Some(1.0)
            } else {
                Some(0.5)
            }
        }
    }
}

fn band_compliance(current: f64, min: f64, max: f64, falloff: f64) -> f64 {
    let deviation = if current < min {
        min - current
    } else if current > max {
        current - max
    } else {
        return 1.0;
    };
    1.0 - deviation / falloff
}

fn ratio_compliance(have: f64, required: f64) -> f64 {
    if have >= required {
        1.0
    } else if required > 0.0 {
        have / required
    } else {
        0.0
    }
}

fn sensor_for_metric(metric: &str) -> Option<SensorKind> {
    match metric {
        "temperature" => Some(SensorKind::Temperature),
        "co2" => Some(SensorKind::Co2),
        "occupancy" => Some(SensorKind::Occupancy),
        "light_level" => Some(SensorKind::LightLevel),
        "humidity" => Some(SensorKind::Humidity),
        _ => None,
    }
}
