//! Adapter from the external JSON "Preset input" interface (spec.md §6)
//! to a `Preset` ready for `preset::compile`.
//!
//! `Mapping::input_combination` is `#[serde(skip)]` on the domain type —
//! it is built and validated by `Mapping::validate`, not deserialized
//! directly — so this module defines its own wire-shaped mirror types
//! and converts them, the way the teacher keeps its on-disk rule-file
//! schema (`config/rules.rs`) separate from the in-memory `Rule`.

use std::path::Path;

use serde::Deserialize;

use crate::event::{DeviceId, InputConfig};
use crate::mapping::{Mapping, OutputSelector};
use crate::preset::Preset;

#[derive(Debug, Deserialize)]
struct InputConfigJson {
    #[serde(rename = "type")]
    type_: u16,
    code: u16,
    analog_threshold: i32,
    #[serde(default)]
    origin_hash: Option<u64>,
}

impl From<InputConfigJson> for InputConfig {
    fn from(json: InputConfigJson) -> Self {
        InputConfig {
            type_: json.type_,
            code: json.code,
            analog_threshold: json.analog_threshold,
            origin_hash: json.origin_hash.map(DeviceId),
        }
    }
}

fn default_deadzone() -> f32 {
    0.1
}
fn default_gain() -> f32 {
    1.0
}
fn default_rel_rate() -> u16 {
    60
}
fn default_release_timeout() -> f32 {
    0.05
}
fn default_macro_key_sleep_ms() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
struct MappingJson {
    input_combination: Vec<InputConfigJson>,
    target_uinput: String,
    #[serde(flatten)]
    output: OutputSelector,
    #[serde(default = "default_deadzone")]
    deadzone: f32,
    #[serde(default = "default_gain")]
    gain: f32,
    #[serde(default)]
    expo: f32,
    #[serde(default = "default_rel_rate")]
    rel_rate: u16,
    #[serde(default)]
    rel_speed: u32,
    #[serde(default)]
    rel_to_abs_input_cutoff: u32,
    #[serde(default = "default_release_timeout")]
    release_timeout: f32,
    #[serde(default = "default_macro_key_sleep_ms")]
    macro_key_sleep_ms: u32,
    #[serde(default)]
    rel_wheel_speed: u32,
    #[serde(default)]
    rel_wheel_hi_res_speed: u32,
}

impl From<MappingJson> for Mapping {
    fn from(json: MappingJson) -> Self {
        Mapping {
            input_combination: json.input_combination.into_iter().map(InputConfig::from).collect(),
            target_uinput: json.target_uinput,
            output: json.output,
            deadzone: json.deadzone,
            gain: json.gain,
            expo: json.expo,
            rel_rate: json.rel_rate,
            rel_speed: json.rel_speed,
            rel_to_abs_input_cutoff: json.rel_to_abs_input_cutoff,
            release_timeout: json.release_timeout,
            macro_key_sleep_ms: json.macro_key_sleep_ms,
            rel_wheel_speed: json.rel_wheel_speed,
            rel_wheel_hi_res_speed: json.rel_wheel_hi_res_speed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresetLoadError {
    #[error("failed to read preset file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse preset file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

/// Loads a preset from a JSON file: a top-level array of mapping
/// objects. Per-mapping validation against a `KeyboardLayout`/uinput
/// registry happens later, in `preset::compile` — this stage only
/// resolves the wire shape.
pub fn load_from_path(path: &Path) -> Result<Preset, PresetLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| PresetLoadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    load_from_str(&text).map_err(|source| PresetLoadError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn load_from_str(text: &str) -> Result<Preset, serde_json::Error> {
    let mappings: Vec<MappingJson> = serde_json::from_str(text)?;
    Ok(Preset {
        mappings: mappings.into_iter().map(Mapping::from).collect(),
    })
}
