//! Prompt construction and strict parsing of provider responses.

use std::fmt::Write as _;

use schemars::JsonSchema;
use serde::Deserialize;

use buildsense_core::agent::AgentConfig;
use buildsense_core::error::ProviderError;
use buildsense_core::proposal::{is_unit_interval, AxisScores, DeviceAction};
use buildsense_core::room::{RoomSnapshot, SensorKind};

pub const MAX_EMERGENCY_LEVEL: u8 = 5;

/// The only shape a provider response may take.
#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReasoningResponse {
    /// Device commands, most important first. May be empty.
    pub actions: Vec<DeviceAction>,
    /// Expected effect of the actions on each axis, each in [0,1].
    pub scores: AxisScores,
    /// Short explanation for the audit log.
    pub reasoning: String,
    /// Confidence in the proposal, in [0,1].
    pub confidence: f64,
    /// 0 (none) to 5 (life threatening). Only meaningful for emergency agents.
    #[serde(default)]
    pub emergency_level: Option<u8>,
}

/// Parse and validate raw provider output. Any deviation is a
/// `MalformedResponse`; nothing is partially trusted.
pub fn parse_response(raw: &str) -> Result<ReasoningResponse, ProviderError> {
    let body = strip_code_fence(raw.trim())?;
    let response: ReasoningResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::malformed(e.to_string()))?;

    if !is_unit_interval(response.confidence) {
        return Err(ProviderError::malformed(format!(
            "confidence {} outside [0,1]",
            response.confidence
        )));
    }
    if let Some(axis) = response.scores.out_of_range() {
        return Err(ProviderError::malformed(format!(
            "score `{axis}` outside [0,1]"
        )));
    }
    if response.reasoning.trim().is_empty() {
        return Err(ProviderError::malformed("empty reasoning"));
    }
    if let Some(level) = response.emergency_level {
        if level > MAX_EMERGENCY_LEVEL {
            return Err(ProviderError::malformed(format!(
                "emergency_level {level} above {MAX_EMERGENCY_LEVEL}"
            )));
        }
    }
    if let Some(action) = response
        .actions
        .iter()
        .find(|action| action.device_id.trim().is_empty())
    {
        return Err(ProviderError::malformed(format!(
            "action `{}` has an empty device_id",
            action.verb
        )));
    }
    Ok(response)
}

fn strip_code_fence(body: &str) -> Result<&str, ProviderError> {
    let Some(rest) = body.strip_prefix("```") else {
        return Ok(body);
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let rest = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
    rest.trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .ok_or_else(|| ProviderError::malformed("unterminated code fence"))
}

pub fn response_schema() -> String {
    let schema = schemars::schema_for!(ReasoningResponse);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn system_prompt(config: &AgentConfig) -> String {
    format!(
        "You are the {kind} agent of a smart-building control system.\n\
         OBJECTIVE: {objective}\n\n\
         Other agents argue for other objectives; an arbiter weighs every proposal. \
         Only propose actions that serve your objective, and only for devices listed in the room.\n\
         Reply with a single JSON object matching this schema and nothing else:\n{schema}",
        kind = config.kind,
        objective = config.objective,
        schema = response_schema(),
    )
}

/// Room context for one round, rendered as plain text.
pub fn room_prompt(snapshot: &RoomSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "ROOM {} ({})",
        snapshot.room_id,
        snapshot.name.as_deref().unwrap_or("unnamed")
    );
    let _ = writeln!(out, "captured_at: {}", snapshot.captured_at.to_rfc3339());

    out.push_str("\nSENSORS\n");
    for (label, kind) in [
        ("temperature_c", SensorKind::Temperature),
        ("co2_ppm", SensorKind::Co2),
        ("occupancy", SensorKind::Occupancy),
        ("light_level", SensorKind::LightLevel),
        ("humidity_pct", SensorKind::Humidity),
    ] {
        match snapshot.sensor(kind) {
            Some(value) => {
                let _ = writeln!(out, "- {label}: {value}");
            }
            None => {
                let _ = writeln!(out, "- {label}: unknown");
            }
        }
    }

    out.push_str("\nDEVICES\n");
    if snapshot.devices.is_empty() {
        out.push_str("- none\n");
    }
    for device in &snapshot.devices {
        let _ = writeln!(
            out,
            "- id={} name=\"{}\" kind={:?} state={}{}",
            device.id,
            device.name,
            device.kind,
            if device.is_on { "on" } else { "off" },
            if device.capabilities.is_empty() {
                String::new()
            } else {
                format!(" capabilities=[{}]", device.capabilities.join(","))
            }
        );
    }

    out.push_str("\nSLOS\n");
    let mut any_slo = false;
    for slo in snapshot.active_slos() {
        any_slo = true;
        let params: Vec<String> = slo
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let _ = writeln!(
            out,
            "- {} metric={} weight={}{}{}",
            slo.name,
            slo.metric,
            slo.weight,
            slo.target_value
                .map(|target| format!(" target={target}"))
                .unwrap_or_default(),
            if params.is_empty() {
                String::new()
            } else {
                format!(" {}", params.join(" "))
            }
        );
    }
    if !any_slo {
        out.push_str("- none\n");
    }

    out.push_str("\nSCENARIOS\n");
    if snapshot.scenarios.is_empty() {
        out.push_str("- none\n");
    }
    for scenario in &snapshot.scenarios {
        let _ = writeln!(out, "- {scenario}");
    }
    out
}
