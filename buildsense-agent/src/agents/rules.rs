//! Deterministic rule sets used when model-backed reasoning is unavailable.

use chrono::Timelike;

use buildsense_core::agent::AgentKind;
use buildsense_core::proposal::{ActionVerb, AxisScores, DeviceAction};
use buildsense_core::room::{DeviceKind, DeviceState, RoomSnapshot, SensorKind};
use buildsense_core::slo::{
    METRIC_AIR_QUALITY_CO2, METRIC_HUMIDITY_CONTROL, METRIC_SECURITY_LIGHTING,
    METRIC_TEMPERATURE_COMFORT,
};

pub const DANGEROUS_CO2_PPM: f64 = 1000.0;
pub const EXTREME_TEMPERATURE_C: f64 = 35.0;
pub const DEFAULT_CO2_THRESHOLD_PPM: f64 = 800.0;
pub const DEFAULT_COMFORT_TARGET_C: f64 = 23.0;
pub const MEETING_COMFORT_TARGET_C: f64 = 22.0;
pub const COMFORT_TOLERANCE_C: f64 = 1.0;
pub const HIGH_OCCUPANCY: u32 = 5;

/// What a rule set proposes for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub actions: Vec<DeviceAction>,
    pub scores: AxisScores,
    pub reasoning: String,
    pub emergency_level: u8,
}

impl RuleOutcome {
    fn new(scores: AxisScores) -> Self {
        Self {
            actions: Vec::new(),
            scores,
            reasoning: String::new(),
            emergency_level: 0,
        }
    }

    fn push(&mut self, action: DeviceAction) {
        if !self
            .actions
            .iter()
            .any(|a| a.device_id == action.device_id && a.verb == action.verb)
        {
            self.actions.push(action);
        }
    }

    fn targets(&self, device_id: &str) -> bool {
        self.actions.iter().any(|a| a.device_id == device_id)
    }

    fn explain(mut self, parts: Vec<String>, idle: &str) -> Self {
        self.reasoning = if parts.is_empty() {
            idle.to_string()
        } else {
            parts.join("; ")
        };
        self
    }
}

pub trait FallbackPolicy: Send + Sync {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome;
}

pub fn rules_for(kind: AgentKind) -> Box<dyn FallbackPolicy> {
    match kind {
        AgentKind::Security => Box::new(SecurityRules),
        AgentKind::Emergency => Box::new(EmergencyRules),
        AgentKind::Comfort => Box::new(ComfortRules),
        AgentKind::Energy => Box::new(EnergyRules),
        AgentKind::Environmental => Box::new(EnvironmentalRules),
        AgentKind::Occupancy => Box::new(OccupancyRules),
    }
}

fn airside(snapshot: &RoomSnapshot) -> impl Iterator<Item = &DeviceState> {
    snapshot
        .devices
        .iter()
        .filter(|device| matches!(device.kind, DeviceKind::Hvac | DeviceKind::AirFlow))
}

/// Comfort band from the room's temperature SLO, else the default target
/// (cooler during meetings) plus tolerance.
pub fn comfort_band(snapshot: &RoomSnapshot) -> (f64, f64) {
    if let Some(slo) = snapshot.slo_for_metric(METRIC_TEMPERATURE_COMFORT) {
        let min = slo.param("min_temp", DEFAULT_COMFORT_TARGET_C - COMFORT_TOLERANCE_C);
        let max = slo.param("max_temp", DEFAULT_COMFORT_TARGET_C + COMFORT_TOLERANCE_C);
        if min <= max {
            return (min, max);
        }
    }
    let meeting = snapshot.has_scenario("meeting")
        || snapshot.active_slos().any(|slo| {
            let name = slo.name.to_ascii_lowercase();
            name.contains("meeting") || name.contains("conference")
        });
    let target = if meeting {
        MEETING_COMFORT_TARGET_C
    } else {
        DEFAULT_COMFORT_TARGET_C
    };
    (target - COMFORT_TOLERANCE_C, target + COMFORT_TOLERANCE_C)
}

fn is_night(snapshot: &RoomSnapshot) -> bool {
    let hour = snapshot.captured_at.hour();
    snapshot.has_scenario("after_hours")
        || snapshot.has_scenario("after-hours")
        || !(7..22).contains(&hour)
}

/// Life safety first: any emergency flag or dangerous air drives every
/// relevant device towards evacuation and ventilation.
pub struct EmergencyRules;

impl FallbackPolicy for EmergencyRules {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome {
        let mut out = RuleOutcome::new(AxisScores::new(0.3, 0.2, 1.0, 0.9));
        let mut parts = Vec::new();

        let flags = snapshot.emergency_flags();
        if !flags.is_empty() {
            out.emergency_level = 5;
            for device in &snapshot.devices {
                let action = match device.kind {
                    DeviceKind::Hvac | DeviceKind::AirFlow => {
                        DeviceAction::new(&device.id, ActionVerb::EmergencyVentilation)
                            .with_param("mode", "max_ventilation")
                    }
                    DeviceKind::Lighting => {
                        DeviceAction::new(&device.id, ActionVerb::TurnOn).with_param("brightness", 1.0)
                    }
                    DeviceKind::Emergency | DeviceKind::Security | DeviceKind::Camera => {
                        DeviceAction::new(&device.id, ActionVerb::TurnOn)
                    }
                    DeviceKind::Other => continue,
                };
                out.push(action);
            }
            parts.push(format!("emergency scenario active ({})", flags.join(", ")));
        }

        if let Some(co2) = snapshot.sensor(SensorKind::Co2) {
            if co2 > DANGEROUS_CO2_PPM {
                out.emergency_level = out.emergency_level.max(3);
                for device in airside(snapshot) {
                    out.push(
                        DeviceAction::new(&device.id, ActionVerb::EmergencyVentilation)
                            .with_param("mode", "max_ventilation"),
                    );
                }
                parts.push(format!("CO2 at {co2} ppm, emergency ventilation"));
            }
        }

        if let Some(temperature) = snapshot.sensor(SensorKind::Temperature) {
            if temperature > EXTREME_TEMPERATURE_C {
                out.emergency_level = out.emergency_level.max(4);
                let hvac: Vec<_> = snapshot
                    .devices_of(DeviceKind::Hvac)
                    .filter(|device| !out.targets(&device.id))
                    .map(|device| device.id.clone())
                    .collect();
                for id in hvac {
                    out.push(
                        DeviceAction::new(id, ActionVerb::SetTemperature)
                            .with_param("temperature", MEETING_COMFORT_TARGET_C)
                            .with_param("mode", "cool"),
                    );
                }
                parts.push(format!("extreme temperature {temperature}C, emergency cooling"));
            }
        }

        out.explain(parts, "no emergency conditions detected")
    }
}

/// Keep surveillance coverage: powered security devices and, in an empty
/// room, at least one lit light or running camera.
pub struct SecurityRules;

impl FallbackPolicy for SecurityRules {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome {
        let mut out = RuleOutcome::new(AxisScores::new(0.2, 0.1, 0.9, 1.0));
        let mut parts = Vec::new();

        for device in snapshot.devices_of(DeviceKind::Security) {
            if !device.is_on {
                out.push(DeviceAction::new(&device.id, ActionVerb::TurnOn));
                parts.push(format!("powering security device {}", device.name));
            }
        }

        let lighting_slo = snapshot.slo_for_metric(METRIC_SECURITY_LIGHTING);
        let unoccupied = snapshot.occupancy() == Some(0);
        if unoccupied || lighting_slo.is_some() {
            let required = lighting_slo
                .map(|slo| slo.param("min_lights", 1.0).max(0.0).round() as usize)
                .unwrap_or(1);
            let covering = snapshot
                .devices
                .iter()
                .filter(|device| {
                    matches!(device.kind, DeviceKind::Lighting | DeviceKind::Camera) && device.is_on
                })
                .count();

            if covering < required {
                let mut candidates: Vec<&DeviceState> = snapshot
                    .devices_of(DeviceKind::Camera)
                    .chain(snapshot.devices_of(DeviceKind::Lighting))
                    .filter(|device| !device.is_on)
                    .collect();
                candidates.truncate(required - covering);
                for device in candidates {
                    let action = DeviceAction::new(&device.id, ActionVerb::TurnOn);
                    let action = if device.kind == DeviceKind::Lighting {
                        action.with_param("brightness", 0.3)
                    } else {
                        action
                    };
                    out.push(action);
                }
                parts.push(format!(
                    "surveillance coverage {covering}/{required}, activating devices"
                ));
            }
        }

        out.explain(parts, "security conditions maintained")
    }
}

/// Hold temperature inside the comfort band; circulate air while occupied.
pub struct ComfortRules;

impl FallbackPolicy for ComfortRules {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome {
        let mut out = RuleOutcome::new(AxisScores::new(1.0, 0.4, 0.7, 0.3));
        let mut parts = Vec::new();
        let (min, max) = comfort_band(snapshot);

        if let Some(current) = snapshot.sensor(SensorKind::Temperature) {
            let setpoint = if current < min {
                Some((min, "heat"))
            } else if current > max {
                Some((max, "cool"))
            } else {
                None
            };
            if let Some((setpoint, mode)) = setpoint {
                for device in snapshot.devices_of(DeviceKind::Hvac) {
                    out.push(
                        DeviceAction::new(&device.id, ActionVerb::SetTemperature)
                            .with_param("temperature", setpoint)
                            .with_param("mode", mode),
                    );
                }
                parts.push(format!(
                    "temperature {current}C outside {min}-{max}C, setpoint {setpoint}C"
                ));
            }
        }

        if snapshot.occupancy().is_some_and(|count| count > 0) {
            for device in snapshot.devices_of(DeviceKind::AirFlow) {
                if !device.is_on {
                    out.push(DeviceAction::new(&device.id, ActionVerb::TurnOn));
                }
            }
            if out.actions.iter().any(|a| a.verb == ActionVerb::TurnOn) {
                parts.push("air circulation for occupied room".to_string());
            }
        }

        out.explain(parts, &format!("comfort band {min}-{max}C satisfied"))
    }
}

/// Switch off whatever serves nobody, keeping one light for surveillance
/// and never touching safety devices.
pub struct EnergyRules;

impl FallbackPolicy for EnergyRules {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome {
        let mut out = RuleOutcome::new(AxisScores::new(0.3, 1.0, 0.6, 0.4));
        let mut parts = Vec::new();

        // No occupancy reading counts as an empty room.
        let unoccupied = snapshot.occupancy().unwrap_or(0) == 0 && !snapshot.has_upcoming_use();
        if !unoccupied {
            return out.explain(parts, "room in use, no energy savings proposed");
        }

        for device in snapshot.devices_of(DeviceKind::AirFlow) {
            if device.is_on {
                out.push(DeviceAction::new(&device.id, ActionVerb::TurnOff));
            }
        }

        let lit: Vec<&DeviceState> = snapshot
            .devices_of(DeviceKind::Lighting)
            .filter(|device| device.is_on)
            .collect();
        for device in lit.iter().skip(1) {
            out.push(DeviceAction::new(&device.id, ActionVerb::TurnOff));
        }

        if is_night(snapshot) {
            for device in snapshot.devices_of(DeviceKind::Hvac) {
                if device.is_on {
                    out.push(DeviceAction::new(&device.id, ActionVerb::TurnOff));
                }
            }
        }

        if !out.actions.is_empty() {
            parts.push(format!(
                "room unoccupied, switching off {} device(s)",
                out.actions.len()
            ));
        }
        out.explain(parts, "nothing left to switch off")
    }
}

/// Ventilate above the CO2 threshold and hold humidity inside its band.
pub struct EnvironmentalRules;

impl FallbackPolicy for EnvironmentalRules {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome {
        let mut out = RuleOutcome::new(AxisScores::new(0.8, 0.5, 0.7, 0.3));
        let mut parts = Vec::new();

        if let Some(humidity) = snapshot.sensor(SensorKind::Humidity) {
            let (min, max) = snapshot
                .slo_for_metric(METRIC_HUMIDITY_CONTROL)
                .map(|slo| (slo.param("min_humidity", 30.0), slo.param("max_humidity", 70.0)))
                .unwrap_or((30.0, 70.0));
            let correction = if humidity > max {
                Some((ActionVerb::Dehumidify, max.min(60.0)))
            } else if humidity < min {
                Some((ActionVerb::Humidify, min.max(45.0)))
            } else {
                None
            };
            if let Some((verb, target)) = correction {
                for device in snapshot.devices_of(DeviceKind::Hvac) {
                    out.push(
                        DeviceAction::new(&device.id, verb).with_param("target_humidity", target),
                    );
                }
                parts.push(format!("humidity {humidity}% outside {min}-{max}%, {verb}"));
            }
        }

        if let Some(co2) = snapshot.sensor(SensorKind::Co2) {
            let threshold = snapshot
                .slo_for_metric(METRIC_AIR_QUALITY_CO2)
                .map(|slo| slo.param("max_co2", DEFAULT_CO2_THRESHOLD_PPM))
                .unwrap_or(DEFAULT_CO2_THRESHOLD_PPM);
            if co2 > threshold {
                for device in airside(snapshot) {
                    out.push(
                        DeviceAction::new(&device.id, ActionVerb::IncreaseVentilation)
                            .with_param("ventilation_level", "high"),
                    );
                }
                parts.push(format!("CO2 {co2} ppm above {threshold} ppm, ventilating"));
            }
        }

        out.explain(parts, "environmental conditions optimal")
    }
}

/// Match services to how the room is used: pre-condition before a booking,
/// dim an idle room, ventilate a crowded one.
pub struct OccupancyRules;

impl FallbackPolicy for OccupancyRules {
    fn evaluate(&self, snapshot: &RoomSnapshot) -> RuleOutcome {
        let mut out = RuleOutcome::new(AxisScores::new(0.7, 0.8, 0.6, 0.5));
        let mut parts = Vec::new();

        match snapshot.occupancy() {
            Some(0) if snapshot.has_upcoming_use() => {
                let (min, max) = comfort_band(snapshot);
                let setpoint = (min + max) / 2.0;
                for device in snapshot.devices_of(DeviceKind::Hvac) {
                    out.push(
                        DeviceAction::new(&device.id, ActionVerb::SetTemperature)
                            .with_param("temperature", setpoint)
                            .with_param("mode", "precondition"),
                    );
                }
                for device in snapshot.devices_of(DeviceKind::Lighting) {
                    if !device.is_on {
                        out.push(DeviceAction::new(&device.id, ActionVerb::TurnOn));
                    }
                }
                parts.push(format!("upcoming use, pre-conditioning to {setpoint}C"));
            }
            Some(0) => {
                for device in snapshot.devices_of(DeviceKind::Lighting) {
                    if device.is_on {
                        out.push(
                            DeviceAction::new(&device.id, ActionVerb::Dim)
                                .with_param("brightness", 0.1),
                        );
                    }
                }
                if !out.actions.is_empty() {
                    parts.push("dimming lights in unoccupied room".to_string());
                }
            }
            Some(count) if count > HIGH_OCCUPANCY => {
                for device in airside(snapshot) {
                    out.push(
                        DeviceAction::new(&device.id, ActionVerb::IncreaseVentilation)
                            .with_param("ventilation_level", "high"),
                    );
                }
                parts.push(format!("{count} occupants, increasing ventilation"));
            }
            _ => {}
        }

        out.explain(parts, "occupancy-based settings unchanged")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use buildsense_core::room::{SensorReading, SloTarget};

    fn room(hour: u32) -> RoomSnapshot {
        let captured_at = Utc
            .with_ymd_and_hms(2026, 10, 18, hour, 15, 0)
            .single()
            .expect("valid timestamp");
        let mut snapshot = RoomSnapshot::new("r-1", captured_at);
        snapshot.devices = vec![
            DeviceState::new("hvac-1", DeviceKind::Hvac, true),
            DeviceState::new("fan-1", DeviceKind::AirFlow, true),
            DeviceState::new("light-1", DeviceKind::Lighting, true),
            DeviceState::new("light-2", DeviceKind::Lighting, true),
            DeviceState::new("cam-1", DeviceKind::Camera, false),
            DeviceState::new("alarm-1", DeviceKind::Security, false),
        ];
        snapshot
    }

    fn set(snapshot: &mut RoomSnapshot, kind: SensorKind, value: f64) {
        snapshot.sensors.set(kind, SensorReading::new(value));
    }

    fn verbs_for(out: &RuleOutcome, device: &str) -> Vec<ActionVerb> {
        out.actions
            .iter()
            .filter(|a| a.device_id == device)
            .map(|a| a.verb)
            .collect()
    }

    #[test]
    fn emergency_flag_drives_every_device_to_life_safety() {
        let mut snapshot = room(12);
        snapshot.scenarios.insert("fire_alarm".to_string());

        let out = EmergencyRules.evaluate(&snapshot);

        assert_eq!(out.emergency_level, 5);
        assert_eq!(verbs_for(&out, "hvac-1"), vec![ActionVerb::EmergencyVentilation]);
        assert_eq!(verbs_for(&out, "light-2"), vec![ActionVerb::TurnOn]);
        assert_eq!(verbs_for(&out, "alarm-1"), vec![ActionVerb::TurnOn]);
        assert!(out.reasoning.contains("fire_alarm"));
    }

    #[test]
    fn emergency_levels_follow_air_and_heat() {
        let mut snapshot = room(12);
        set(&mut snapshot, SensorKind::Co2, 1200.0);
        let out = EmergencyRules.evaluate(&snapshot);
        assert_eq!(out.emergency_level, 3);
        assert_eq!(verbs_for(&out, "fan-1"), vec![ActionVerb::EmergencyVentilation]);

        let mut snapshot = room(12);
        set(&mut snapshot, SensorKind::Temperature, 38.0);
        let out = EmergencyRules.evaluate(&snapshot);
        assert_eq!(out.emergency_level, 4);
        assert_eq!(verbs_for(&out, "hvac-1"), vec![ActionVerb::SetTemperature]);

        let calm = EmergencyRules.evaluate(&room(12));
        assert_eq!(calm.emergency_level, 0);
        assert!(calm.actions.is_empty());
    }

    #[test]
    fn security_keeps_one_surveillance_device_in_empty_room() {
        let mut snapshot = room(23);
        for device in &mut snapshot.devices {
            if device.kind == DeviceKind::Lighting {
                device.is_on = false;
            }
        }
        set(&mut snapshot, SensorKind::Occupancy, 0.0);

        let out = SecurityRules.evaluate(&snapshot);

        assert_eq!(verbs_for(&out, "alarm-1"), vec![ActionVerb::TurnOn]);
        assert_eq!(verbs_for(&out, "cam-1"), vec![ActionVerb::TurnOn]);
        assert!(verbs_for(&out, "light-1").is_empty());
    }

    #[test]
    fn security_honours_min_lights_slo() {
        let mut snapshot = room(12);
        for device in &mut snapshot.devices {
            device.is_on = false;
        }
        snapshot.slos =
            vec![SloTarget::new("Security", METRIC_SECURITY_LIGHTING).with_param("min_lights", 3.0)];

        let out = SecurityRules.evaluate(&snapshot);

        let turned_on = out
            .actions
            .iter()
            .filter(|a| a.device_id != "alarm-1")
            .count();
        assert_eq!(turned_on, 3);
    }

    #[test]
    fn comfort_sets_nearest_band_edge() {
        let mut snapshot = room(12);
        set(&mut snapshot, SensorKind::Temperature, 27.0);
        snapshot.slos = vec![SloTarget::new("Comfort", METRIC_TEMPERATURE_COMFORT)
            .with_param("min_temp", 21.0)
            .with_param("max_temp", 24.0)];

        let out = ComfortRules.evaluate(&snapshot);

        let action = &out.actions[0];
        assert_eq!(action.verb, ActionVerb::SetTemperature);
        assert_eq!(action.parameters["temperature"], serde_json::json!(24.0));
        assert_eq!(action.parameters["mode"], serde_json::json!("cool"));
    }

    #[test]
    fn comfort_band_narrows_for_meetings() {
        let mut snapshot = room(12);
        assert_eq!(comfort_band(&snapshot), (22.0, 24.0));
        snapshot.scenarios.insert("Meeting".to_string());
        assert_eq!(comfort_band(&snapshot), (21.0, 23.0));
    }

    #[test]
    fn energy_switches_off_idle_devices_but_keeps_one_light() {
        let mut snapshot = room(23);
        set(&mut snapshot, SensorKind::Occupancy, 0.0);

        let out = EnergyRules.evaluate(&snapshot);

        assert_eq!(verbs_for(&out, "fan-1"), vec![ActionVerb::TurnOff]);
        assert!(verbs_for(&out, "light-1").is_empty());
        assert_eq!(verbs_for(&out, "light-2"), vec![ActionVerb::TurnOff]);
        assert_eq!(verbs_for(&out, "hvac-1"), vec![ActionVerb::TurnOff]);
        assert!(verbs_for(&out, "alarm-1").is_empty());

        let daytime = {
            let mut snapshot = room(11);
            set(&mut snapshot, SensorKind::Occupancy, 0.0);
            EnergyRules.evaluate(&snapshot)
        };
        assert!(verbs_for(&daytime, "hvac-1").is_empty());
    }

    #[test]
    fn energy_treats_missing_occupancy_reading_as_empty_room() {
        let out = EnergyRules.evaluate(&room(23));

        assert_eq!(verbs_for(&out, "hvac-1"), vec![ActionVerb::TurnOff]);
        assert_eq!(verbs_for(&out, "fan-1"), vec![ActionVerb::TurnOff]);
        assert!(verbs_for(&out, "light-1").is_empty());
        assert_eq!(verbs_for(&out, "light-2"), vec![ActionVerb::TurnOff]);
        assert!(out.reasoning.contains("unoccupied"));
    }

    #[test]
    fn energy_counts_six_oclock_as_night() {
        let mut snapshot = room(6);
        set(&mut snapshot, SensorKind::Occupancy, 0.0);
        let early = EnergyRules.evaluate(&snapshot);
        assert_eq!(verbs_for(&early, "hvac-1"), vec![ActionVerb::TurnOff]);

        let mut snapshot = room(7);
        set(&mut snapshot, SensorKind::Occupancy, 0.0);
        let morning = EnergyRules.evaluate(&snapshot);
        assert!(verbs_for(&morning, "hvac-1").is_empty());
    }

    #[test]
    fn energy_stays_quiet_in_occupied_room_or_before_booking() {
        let mut occupied = room(23);
        set(&mut occupied, SensorKind::Occupancy, 2.0);
        assert!(EnergyRules.evaluate(&occupied).actions.is_empty());

        let mut snapshot = room(23);
        set(&mut snapshot, SensorKind::Occupancy, 0.0);
        snapshot.scenarios.insert("meeting_soon".to_string());
        assert!(EnergyRules.evaluate(&snapshot).actions.is_empty());
    }

    #[test]
    fn environmental_uses_slo_threshold_for_ventilation() {
        let mut snapshot = room(12);
        set(&mut snapshot, SensorKind::Co2, 700.0);
        snapshot.slos =
            vec![SloTarget::new("Air", METRIC_AIR_QUALITY_CO2).with_param("max_co2", 650.0)];

        let out = EnvironmentalRules.evaluate(&snapshot);

        assert_eq!(verbs_for(&out, "hvac-1"), vec![ActionVerb::IncreaseVentilation]);
        assert_eq!(verbs_for(&out, "fan-1"), vec![ActionVerb::IncreaseVentilation]);

        let mut humid = room(12);
        set(&mut humid, SensorKind::Humidity, 78.0);
        let out = EnvironmentalRules.evaluate(&humid);
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].verb, ActionVerb::Dehumidify);
        assert_eq!(out.actions[0].parameters["target_humidity"], serde_json::json!(60.0));
    }

    #[test]
    fn occupancy_preconditions_before_upcoming_use() {
        let mut snapshot = room(7);
        set(&mut snapshot, SensorKind::Occupancy, 0.0);
        snapshot.scenarios.insert("upcoming_use".to_string());

        let out = OccupancyRules.evaluate(&snapshot);

        assert_eq!(verbs_for(&out, "hvac-1"), vec![ActionVerb::SetTemperature]);
        assert_eq!(out.actions[0].parameters["temperature"], serde_json::json!(23.0));

        let crowded = {
            let mut snapshot = room(12);
            set(&mut snapshot, SensorKind::Occupancy, 12.0);
            OccupancyRules.evaluate(&snapshot)
        };
        assert_eq!(verbs_for(&crowded, "hvac-1"), vec![ActionVerb::IncreaseVentilation]);
    }
}
