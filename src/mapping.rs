//! `Mapping` and its construction-time validation (spec.md §3).
//!
//! Field names follow `original_source/inputremapper/configs/mapping.py`.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::event::{InputCombination, EV_ABS, EV_KEY, EV_REL};
use crate::keyboard_layout::KeyboardLayout;

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

/// Exactly one of these selects what the mapping outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSelector {
    Symbol(String),
    Code { output_type: u16, output_code: u16 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(skip, default)]
    pub input_combination: InputCombinationSpec,
    pub target_uinput: String,
    #[serde(flatten)]
    pub output: OutputSelector,
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub expo: f32,
    #[serde(default = "default_rel_rate")]
    pub rel_rate: u16,
    #[serde(default)]
    pub rel_speed: u32,
    #[serde(default)]
    pub rel_to_abs_input_cutoff: u32,
    #[serde(default = "default_release_timeout")]
    pub release_timeout: f32,
    #[serde(default = "default_macro_key_sleep_ms")]
    pub macro_key_sleep_ms: u32,
    #[serde(default)]
    pub rel_wheel_speed: u32,
    #[serde(default)]
    pub rel_wheel_hi_res_speed: u32,
}

/// Serde-friendly mirror of `InputCombination`; `Mapping` converts to
/// `InputCombination` via `TryFrom` once validated.
pub type InputCombinationSpec = Vec<crate::event::InputConfig>;

impl Mapping {
    /// Validates the construction-time rules in spec.md §3 and returns
    /// the checked combination. Does not touch the uinput registry
    /// beyond `can_emit`, so callers can validate mappings before any
    /// sink exists (passing `None` skips the sink-capability check).
    pub fn validate(
        &self,
        layout: &KeyboardLayout,
        sink_can_emit: Option<&dyn Fn(&str, u16, u16) -> bool>,
    ) -> Result<InputCombination, ValidationError> {
        let combination = InputCombination::new(self.input_combination.clone());

        if combination.analog_count() > 1 {
            return Err(ValidationError::MultipleAnalogInputs);
        }

        let (output_type, output_code) = match &self.output {
            OutputSelector::Symbol(symbol) => {
                if is_macro_text(symbol) {
                    return Ok(combination);
                }
                let code = layout
                    .get(symbol)
                    .ok_or_else(|| ValidationError::UnknownSymbol(symbol.clone()))?;
                (EV_KEY, code as u16)
            }
            OutputSelector::Code {
                output_type,
                output_code,
            } => (*output_type, *output_code),
        };

        if combination.analog_count() > 0 && output_type != EV_ABS && output_type != EV_REL {
            return Err(ValidationError::AnalogInputWithoutAxisOutput);
        }

        for element in combination.elements() {
            if element.type_ == EV_ABS && !element.is_analog() {
                let pct = element.analog_threshold;
                if pct == 0 || !(-100..=100).contains(&pct) {
                    return Err(ValidationError::TriggerPointOutOfRange(pct));
                }
            }
        }

        if let Some(can_emit) = sink_can_emit {
            if !can_emit(&self.target_uinput, output_type, output_code) {
                let symbol = layout
                    .get_name(output_code as i32)
                    .unwrap_or_else(|| format!("{output_type}:{output_code}"));
                return Err(ValidationError::SymbolNotAvailable {
                    symbol,
                    sink: self.target_uinput.clone(),
                });
            }
        }

        Ok(combination)
    }

    pub fn is_macro(&self) -> bool {
        matches!(&self.output, OutputSelector::Symbol(s) if is_macro_text(s))
    }

    pub fn output_symbol(&self) -> Option<&str> {
        match &self.output {
            OutputSelector::Symbol(s) => Some(s),
            OutputSelector::Code { .. } => None,
        }
    }
}

/// A symbol is a macro iff it looks like a function call: `name(...)`,
/// possibly chained with `.`. Plain key names never contain `(`.
pub fn is_macro_text(symbol: &str) -> bool {
    symbol.contains('(')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InputConfig;

    fn layout() -> KeyboardLayout {
        KeyboardLayout::new()
    }

    fn mapping(combo: Vec<InputConfig>, output: OutputSelector) -> Mapping {
        Mapping {
            input_combination: combo,
            target_uinput: "keyboard".into(),
            output,
            deadzone: 0.1,
            gain: 1.0,
            expo: 0.0,
            rel_rate: 60,
            rel_speed: 1,
            rel_to_abs_input_cutoff: 0,
            release_timeout: 0.05,
            macro_key_sleep_ms: 20,
            rel_wheel_speed: 0,
            rel_wheel_hi_res_speed: 0,
        }
    }

    #[test]
    fn unknown_symbol_rejected() {
        let m = mapping(
            vec![InputConfig::digital(EV_KEY, 30)],
            OutputSelector::Symbol("not_a_key".into()),
        );
        assert_eq!(
            m.validate(&layout(), None),
            Err(ValidationError::UnknownSymbol("not_a_key".into()))
        );
    }

    #[test]
    fn known_symbol_accepted() {
        let m = mapping(
            vec![InputConfig::digital(EV_KEY, 30)],
            OutputSelector::Symbol("KEY_B".into()),
        );
        assert!(m.validate(&layout(), None).is_ok());
    }

    #[test]
    fn analog_input_requires_axis_output() {
        let m = mapping(
            vec![InputConfig::analog(EV_ABS, 0)],
            OutputSelector::Symbol("KEY_B".into()),
        );
        assert_eq!(
            m.validate(&layout(), None),
            Err(ValidationError::AnalogInputWithoutAxisOutput)
        );
    }

    #[test]
    fn analog_input_with_axis_output_ok() {
        let m = mapping(
            vec![InputConfig::analog(EV_ABS, 0)],
            OutputSelector::Code {
                output_type: EV_REL,
                output_code: 0,
            },
        );
        assert!(m.validate(&layout(), None).is_ok());
    }

    #[test]
    fn zero_trigger_percent_rejected() {
        let m = mapping(
            vec![InputConfig::percent(EV_ABS, 0, 0)],
            OutputSelector::Symbol("KEY_B".into()),
        );
        assert!(matches!(
            m.validate(&layout(), None),
            Err(ValidationError::TriggerPointOutOfRange(0))
        ));
    }

    #[test]
    fn macro_symbol_skips_symbol_lookup() {
        let m = mapping(
            vec![InputConfig::digital(EV_KEY, 30)],
            OutputSelector::Symbol("key(a).key(b)".into()),
        );
        assert!(m.validate(&layout(), None).is_ok());
        assert!(m.is_macro());
    }

    #[test]
    fn multiple_analog_inputs_rejected() {
        let m = mapping(
            vec![InputConfig::analog(EV_ABS, 0), InputConfig::analog(EV_ABS, 1)],
            OutputSelector::Code {
                output_type: EV_ABS,
                output_code: 0,
            },
        );
        assert_eq!(
            m.validate(&layout(), None),
            Err(ValidationError::MultipleAnalogInputs)
        );
    }

    #[test]
    fn sink_capability_rejection() {
        let m = mapping(
            vec![InputConfig::digital(EV_KEY, 30)],
            OutputSelector::Symbol("KEY_B".into()),
        );
        let can_emit = |_sink: &str, _t: u16, _c: u16| false;
        assert!(matches!(
            m.validate(&layout(), Some(&can_emit)),
            Err(ValidationError::SymbolNotAvailable { .. })
        ));
    }
}
