//! Preset compiler (spec.md §4.3/§4.9): turns a flat list of `Mapping`s
//! into a compiled `Context` — the handler graph, keyed by `(type,
//! code)`, plus the capability delta each target sink needs.
//!
//! Grounded on `original_source/inputremapper/injection/injector.py`'s
//! assembly logic (`_construct_handlers`/`_map_handlers`) and the
//! teacher's own preset-to-executor-graph assembly pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::device::{AbsInfo, Capabilities};
use crate::error::ValidationError;
use crate::event::{DeviceId, InputCombination, InputConfig, EV_ABS, EV_REL};
use crate::handler::combination::{CombinationHandler, HierarchyHandler, KeyHandler, MacroHandler, PressReleaseHandler};
use crate::handler::transduce::{AbsToBtnHandler, RelToBtnHandler};
use crate::handler::{EmitFn, InputEventHandler};
use crate::keyboard_layout::KeyboardLayout;
use crate::macro_engine::{parse::parse_macro, TaskEnv, TriggerState};
use crate::mapping::{Mapping, OutputSelector};
use crate::transducer::abs_abs::AbsToAbsHandler;
use crate::transducer::abs_rel::{AbsToRelHandler, RelToAbsHandler};
use crate::transducer::rel_rel::RelToRelHandler;
use crate::uinput_registry::{UInputRegistry, UInputSink};
use crate::variable_store::VariableStore;

/// A set of mappings considered together; combinations are unique up to
/// permutation of their non-trigger elements (spec.md §4.9).
#[derive(Debug, Clone, Default)]
pub struct Preset {
    pub mappings: Vec<Mapping>,
}

/// What the compiler produces, plus the capability delta every sink it
/// references needs (so the uinput registry can be (re)built with the
/// right capability set before injection starts).
pub struct CompiledPreset {
    pub context: Context,
    pub sink_capabilities: HashMap<String, Capabilities>,
    pub errors: Vec<ValidationError>,
}

/// Everything the compiler needs about the device a preset is being
/// compiled for, beyond the preset itself.
pub struct CompileEnv<'a> {
    pub layout: &'a KeyboardLayout,
    pub sinks: &'a UInputRegistry,
    pub absinfo: &'a dyn Fn(u16) -> Option<AbsInfo>,
    pub store: VariableStore,
    pub leds: Arc<dyn Fn() -> Vec<u16> + Send + Sync>,
    pub release_timeout_default: Duration,
}

pub fn compile(preset: &Preset, env: &CompileEnv) -> CompiledPreset {
    let context = Context::new();
    let mut errors = Vec::new();
    let mut sink_capabilities: HashMap<String, Capabilities> = HashMap::new();

    let can_emit = |sink: &str, t: u16, c: u16| env.sinks.can_emit(sink, t, c);
    let mut validated: Vec<(Arc<Mapping>, InputCombination)> = Vec::new();
    let mut seen = HashSet::new();

    for mapping in &preset.mappings {
        match mapping.validate(env.layout, Some(&can_emit)) {
            Ok(combination) => {
                if seen.insert(combination.canonical_key()) {
                    validated.push((Arc::new(mapping.clone()), combination));
                }
            }
            Err(err) => errors.push(err),
        }
    }

    let mut axis_keys: HashSet<(u16, u16)> = HashSet::new();
    let mut digital: Vec<(Arc<Mapping>, InputCombination)> = Vec::new();

    for (mapping, combination) in validated {
        if let Some((sink_name, handler)) = build_axis_transducer(&mapping, &combination, env) {
            record_capability(&mut sink_capabilities, &sink_name, &mapping, None);
            let tc = combination.elements()[0].type_and_code();
            context.register_handler(tc, handler);
            axis_keys.insert(tc);
        } else {
            digital.push((mapping, combination));
        }
    }

    // Build one `CombinationHandler` per surviving digital mapping.
    let mut combos: Vec<(InputCombination, Arc<CombinationHandler>)> = Vec::new();
    for (mapping, combination) in &digital {
        let Some(sub_handler) = build_sub_handler(mapping, env, &context, &mut errors) else {
            continue;
        };
        if let Some(sink_name) = mapping_target_sink(mapping) {
            record_capability(&mut sink_capabilities, &sink_name, mapping, Some(env.layout));
        }
        let elements: Vec<(u16, u16)> = combination.elements().iter().map(InputConfig::type_and_code).collect();
        let forward_release: EmitFn = {
            let context = context.clone();
            Arc::new(move |t, c, v| context.forward_write(None, t, c, v))
        };
        let combo_handler = Arc::new(CombinationHandler::new(&elements, sub_handler, forward_release));
        combos.push((combination.clone(), combo_handler));
    }

    // Group combinations that share at least one component (spec.md §8
    // scenario 2) into priority groups via union-find, rather than only
    // ones with an identical literal trigger.
    let mut parent: Vec<usize> = (0..combos.len()).collect();
    let mut element_owner: HashMap<(u16, u16), usize> = HashMap::new();
    for (i, (combination, _)) in combos.iter().enumerate() {
        for element in combination.elements() {
            let tc = element.type_and_code();
            match element_owner.get(&tc) {
                Some(&owner) => union(&mut parent, i, owner),
                None => {
                    element_owner.insert(tc, i);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..combos.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    for mut members in groups.into_values() {
        // Longest combination first: the most specific mapping gets the
        // first chance to claim a shared set of components.
        members.sort_by_key(|&i| std::cmp::Reverse(combos[i].0.elements().len()));

        if members.len() == 1 {
            let i = members[0];
            let (combination, combo_handler) = &combos[i];
            for element in combination.elements() {
                let tc = element.type_and_code();
                if axis_keys.contains(&tc) {
                    log::warn!("{tc:?} mixes an axis-transducer mapping with a digital combination; both are registered");
                }
                let wrapped = wrap_for_element(element, env, combo_handler.clone() as Arc<dyn InputEventHandler>, env.release_timeout_default);
                context.register_handler(tc, wrapped);
            }
            continue;
        }

        let group_handlers: Vec<Arc<CombinationHandler>> = members.iter().map(|&i| combos[i].1.clone()).collect();
        let mut keys: Vec<(u16, u16)> = Vec::new();
        let mut seen_keys = HashSet::new();
        for &i in &members {
            for element in combos[i].0.elements() {
                if seen_keys.insert(element.type_and_code()) {
                    keys.push(element.type_and_code());
                }
            }
        }

        for tc in keys {
            if axis_keys.contains(&tc) {
                log::warn!("{tc:?} mixes an axis-transducer mapping with digital combinations; both are registered");
            }
            let views: Vec<(Arc<dyn InputEventHandler>, Arc<CombinationHandler>)> = members
                .iter()
                .filter_map(|&i| {
                    let (combination, combo_handler) = &combos[i];
                    let element = combination.elements().iter().find(|e| e.type_and_code() == tc)?;
                    let wrapped = wrap_for_element(element, env, combo_handler.clone() as Arc<dyn InputEventHandler>, env.release_timeout_default);
                    Some((wrapped, combo_handler.clone()))
                })
                .collect();
            context.register_handler(tc, Arc::new(HierarchyHandler::new(views, group_handlers.clone())));
        }
    }

    CompiledPreset {
        context,
        sink_capabilities,
        errors,
    }
}

fn find(parent: &mut [usize], x: usize) -> usize {
    if parent[x] != x {
        parent[x] = find(parent, parent[x]);
    }
    parent[x]
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra] = rb;
    }
}

fn mapping_target_sink(mapping: &Mapping) -> Option<String> {
    Some(mapping.target_uinput.clone())
}

fn record_capability(map: &mut HashMap<String, Capabilities>, sink_name: &str, mapping: &Mapping, layout: Option<&KeyboardLayout>) {
    let caps = map.entry(sink_name.to_string()).or_default();
    match &mapping.output {
        OutputSelector::Symbol(symbol) if !crate::mapping::is_macro_text(symbol) => {
            if let Some(layout) = layout {
                if let Some(code) = layout.get(symbol) {
                    caps.insert_key(code as u16);
                }
            }
        }
        OutputSelector::Code { output_type, output_code } => match *output_type {
            crate::event::EV_KEY => caps.insert_key(*output_code),
            EV_REL => caps.insert_rel(*output_code),
            EV_ABS => caps.insert_abs(*output_code, AbsInfo::new(-255, 255)),
            _ => {}
        },
        _ => {}
    }
}

/// Builds the digital-output sub-handler (`KeyHandler` or
/// `MacroHandler`) for one mapping, or `None` (pushing a
/// `ValidationError::MacroParse`) if the macro text fails to parse.
fn build_sub_handler(
    mapping: &Arc<Mapping>,
    env: &CompileEnv,
    context: &Context,
    errors: &mut Vec<ValidationError>,
) -> Option<Arc<dyn PressReleaseHandler>> {
    let sink = env.sinks.get(&mapping.target_uinput)?;

    if mapping.is_macro() {
        let text = mapping.output_symbol().expect("is_macro implies Symbol output");
        let macro_ = match parse_macro(text) {
            Ok(m) => m,
            Err(err) => {
                errors.push(ValidationError::MacroParse(err.to_string()));
                return None;
            }
        };
        let trigger = TriggerState::new();
        let trigger_type_and_code = (crate::event::EV_KEY, 0);
        let sink_for_callback = sink.clone();
        let callback: crate::macro_engine::Callback = Arc::new(move |t, c, v| {
            let _ = crate::uinput_registry::emit(sink_for_callback.as_ref(), t, c, v);
        });
        let context_for_write = context.clone();
        let task_env = TaskEnv {
            mapping: mapping.clone(),
            layout: Arc::new(KeyboardLayout::new()),
            store: env.store.clone(),
            listeners: context.listeners.clone(),
            trigger,
            trigger_type_and_code,
            leds: env.leds.clone(),
            forward_write: Arc::new(move |id, event| context_for_write.forward_write(Some(id), event.type_, event.code, event.value)),
        };
        Some(Arc::new(MacroHandler::new(macro_, task_env, callback)))
    } else {
        let code = match &mapping.output {
            OutputSelector::Symbol(symbol) => env.layout.get(symbol)? as u16,
            OutputSelector::Code { output_code, .. } => *output_code,
        };
        Some(Arc::new(KeyHandler::new(code, sink)))
    }
}

fn wrap_for_element(
    element: &InputConfig,
    env: &CompileEnv,
    target: Arc<dyn InputEventHandler>,
    release_timeout: Duration,
) -> Arc<dyn InputEventHandler> {
    if element.type_ == EV_ABS && !element.is_analog() {
        let info = (env.absinfo)(element.code).unwrap_or_else(|| AbsInfo::new(-255, 255));
        Arc::new(AbsToBtnHandler::new(element.code, element.analog_threshold, info, target))
    } else if element.type_ == EV_REL && !element.is_analog() {
        Arc::new(RelToBtnHandler::new(
            element.code,
            element.analog_threshold.signum(),
            element.analog_threshold,
            release_timeout,
            target,
        ))
    } else {
        target
    }
}

fn build_axis_transducer(mapping: &Arc<Mapping>, combination: &InputCombination, env: &CompileEnv) -> Option<(String, Arc<dyn InputEventHandler>)> {
    if combination.elements().len() != 1 || combination.analog_count() != 1 {
        return None;
    }
    let input = combination.elements()[0];
    if !input.is_analog() {
        return None;
    }
    let (output_type, output_code) = match &mapping.output {
        OutputSelector::Code { output_type, output_code } => (*output_type, *output_code),
        OutputSelector::Symbol(_) => return None,
    };
    let sink = env.sinks.get(&mapping.target_uinput)?;
    let max_abs_out = sink
        .capabilities()
        .abs_info
        .get(&output_code)
        .map(|info| info.max)
        .unwrap_or(255);
    let emit: EmitFn = {
        let sink = sink.clone();
        Arc::new(move |t, c, v| {
            if let Err(err) = crate::uinput_registry::emit(sink.as_ref(), t, c, v) {
                log::warn!("axis transducer write failed: {err}");
            }
        })
    };

    let handler: Arc<dyn InputEventHandler> = match (input.type_, output_type) {
        (EV_ABS, EV_REL) => {
            let info = (env.absinfo)(input.code)?;
            Arc::new(AbsToRelHandler::new(
                input.code,
                output_code,
                info,
                mapping.deadzone,
                mapping.expo,
                mapping.gain,
                mapping.rel_speed,
                mapping.rel_rate,
                emit,
            ))
        }
        (EV_REL, EV_ABS) => Arc::new(RelToAbsHandler::new(
            input.code,
            output_code,
            mapping.rel_to_abs_input_cutoff,
            Duration::from_secs_f32(mapping.release_timeout),
            max_abs_out,
            emit,
        )),
        (EV_REL, EV_REL) => {
            let out_speed = if matches!(output_code, crate::event::REL_WHEEL | crate::event::REL_HWHEEL) {
                mapping.rel_wheel_speed.max(1)
            } else {
                mapping.rel_speed.max(1)
            };
            Arc::new(RelToRelHandler::new(input.code, output_code, mapping.gain, mapping.rel_speed.max(1), out_speed, emit))
        }
        (EV_ABS, EV_ABS) => {
            let info = (env.absinfo)(input.code)?;
            Arc::new(AbsToAbsHandler::new(
                input.code,
                output_code,
                info,
                mapping.deadzone,
                mapping.expo,
                mapping.gain,
                max_abs_out,
                emit,
            ))
        }
        _ => return None,
    };

    Some((mapping.target_uinput.clone(), handler))
}

/// Per-devnode forward-sink capability delta (spec.md §3's "Lifecycles"
/// clause): source capabilities minus `EV_SYN`/`EV_FF`, minus any
/// `EV_ABS` codes handlers consume directly.
pub fn forward_sink_capabilities(source: &Capabilities, abs_consumed: &HashSet<u16>) -> Capabilities {
    Capabilities::forward_sink_from(source, abs_consumed)
}

/// Capabilities every `target_uinput` sink in `preset` needs, computed
/// directly from mapping outputs rather than from `validate()` — callers
/// (the daemon's startup wiring) use this to create the sinks *before*
/// compiling, since `compile()`'s own capability bookkeeping only runs
/// for mappings that already passed the sink's `can_emit` check.
pub fn required_sink_capabilities(preset: &Preset, layout: &KeyboardLayout) -> HashMap<String, Capabilities> {
    let mut result = HashMap::new();
    for mapping in &preset.mappings {
        if let Some(sink_name) = mapping_target_sink(mapping) {
            record_capability(&mut result, &sink_name, mapping, Some(layout));
        }
    }
    result
}

/// Collects the `EV_ABS` input codes any mapping in the preset consumes
/// as an analog input, for `forward_sink_capabilities`.
pub fn analog_inputs_consumed(preset: &Preset) -> HashSet<u16> {
    preset
        .mappings
        .iter()
        .flat_map(|m| m.input_combination.iter())
        .filter(|element| element.type_ == EV_ABS && element.is_analog())
        .map(|element| element.code)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capabilities;
    use crate::event::{InputConfig, EV_KEY};
    use crate::uinput_registry::FakeUInputSink;

    fn base_env<'a>(sinks: &'a UInputRegistry, layout: &'a KeyboardLayout) -> CompileEnv<'a> {
        CompileEnv {
            layout,
            sinks,
            absinfo: &|_code| Some(AbsInfo::new(-255, 255)),
            store: VariableStore::start(Duration::from_millis(20)),
            leds: Arc::new(Vec::new),
            release_timeout_default: Duration::from_millis(50),
        }
    }

    fn keyboard_sink() -> Arc<FakeUInputSink> {
        let mut caps = Capabilities::default();
        caps.insert_key(48); // KEY_B
        FakeUInputSink::new("keyboard", caps)
    }

    #[test]
    fn key_to_key_mapping_compiles_and_fires() {
        let layout = KeyboardLayout::new();
        let sink_registry = UInputRegistry::new();
        let sink = keyboard_sink();
        sink_registry.register(sink.clone());
        let env = base_env(&sink_registry, &layout);

        let preset = Preset {
            mappings: vec![Mapping {
                input_combination: vec![InputConfig::digital(EV_KEY, 30)],
                target_uinput: "keyboard".into(),
                output: OutputSelector::Symbol("KEY_B".into()),
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
            }],
        };

        let compiled = compile(&preset, &env);
        assert!(compiled.errors.is_empty());

        let handlers = compiled.context.handlers_for((EV_KEY, 30));
        assert_eq!(handlers.len(), 1);
        assert!(handlers[0].notify(&crate::event::InputEvent::new(EV_KEY, 30, 1, DeviceId(0))));
        assert_eq!(sink.history(), vec![(EV_KEY, 48, 1)]);
    }

    #[test]
    fn invalid_mapping_is_rejected_without_blocking_others() {
        let layout = KeyboardLayout::new();
        let sink_registry = UInputRegistry::new();
        let sink = keyboard_sink();
        sink_registry.register(sink.clone());
        let env = base_env(&sink_registry, &layout);

        let good = Mapping {
            input_combination: vec![InputConfig::digital(EV_KEY, 30)],
            target_uinput: "keyboard".into(),
            output: OutputSelector::Symbol("KEY_B".into()),
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
        };
        let mut bad = good.clone();
        bad.output = OutputSelector::Symbol("not_a_real_key".into());
        bad.input_combination = vec![InputConfig::digital(EV_KEY, 31)];

        let preset = Preset { mappings: vec![good, bad] };
        let compiled = compile(&preset, &env);
        assert_eq!(compiled.errors.len(), 1);
        assert_eq!(compiled.context.handlers_for((EV_KEY, 30)).len(), 1);
        assert!(compiled.context.handlers_for((EV_KEY, 31)).is_empty());
    }

    #[test]
    fn combination_with_two_components_registers_both() {
        let layout = KeyboardLayout::new();
        let sink_registry = UInputRegistry::new();
        let sink = keyboard_sink();
        sink_registry.register(sink.clone());
        let env = base_env(&sink_registry, &layout);

        let preset = Preset {
            mappings: vec![Mapping {
                input_combination: vec![InputConfig::digital(EV_KEY, 29), InputConfig::digital(EV_KEY, 30)],
                target_uinput: "keyboard".into(),
                output: OutputSelector::Symbol("KEY_B".into()),
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
            }],
        };

        let compiled = compile(&preset, &env);
        assert_eq!(compiled.context.handlers_for((EV_KEY, 29)).len(), 1);
        assert_eq!(compiled.context.handlers_for((EV_KEY, 30)).len(), 1);

        compiled.context.handlers_for((EV_KEY, 29))[0].notify(&crate::event::InputEvent::new(EV_KEY, 29, 1, DeviceId(0)));
        compiled.context.handlers_for((EV_KEY, 30))[0].notify(&crate::event::InputEvent::new(EV_KEY, 30, 1, DeviceId(0)));
        assert_eq!(sink.history(), vec![(EV_KEY, 48, 1)]);
    }

    fn key_mapping(combo: Vec<InputConfig>, output_code: u16) -> Mapping {
        Mapping {
            input_combination: combo,
            target_uinput: "keyboard".into(),
            output: OutputSelector::Code { output_type: EV_KEY, output_code },
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

    /// spec.md §8 scenario 2: three mappings whose declared triggers
    /// differ (`ABS_X`, `BTN_A`, `BTN_B`) but whose combinations overlap
    /// must still be coordinated under one priority group, not three
    /// independent, uncoordinated handler-graph entries.
    #[test]
    fn overlapping_combinations_with_different_triggers_are_coordinated() {
        let layout = KeyboardLayout::new();
        let sink_registry = UInputRegistry::new();
        let mut caps = Capabilities::default();
        caps.insert_key(40); // a
        caps.insert_key(41); // b
        caps.insert_key(42); // c
        let sink = FakeUInputSink::new("keyboard", caps);
        sink_registry.register(sink.clone());
        let env = base_env(&sink_registry, &layout);

        const ABS_X: u16 = 0;
        const BTN_A: u16 = 100;
        const BTN_B: u16 = 101;

        let preset = Preset {
            mappings: vec![
                key_mapping(vec![InputConfig::percent(EV_ABS, ABS_X, 50)], 40), // a
                key_mapping(vec![InputConfig::percent(EV_ABS, ABS_X, 50), InputConfig::digital(EV_KEY, BTN_A)], 41), // b
                key_mapping(
                    vec![InputConfig::percent(EV_ABS, ABS_X, 50), InputConfig::digital(EV_KEY, BTN_A), InputConfig::digital(EV_KEY, BTN_B)],
                    42,
                ), // c
            ],
        };
        let compiled = compile(&preset, &env);
        assert!(compiled.errors.is_empty());

        let abs_x = compiled.context.handlers_for((EV_ABS, ABS_X));
        let btn_a = compiled.context.handlers_for((EV_KEY, BTN_A));
        let btn_b = compiled.context.handlers_for((EV_KEY, BTN_B));
        assert_eq!(abs_x.len(), 1, "all three mappings must share one coordinated handler at ABS_X");
        assert_eq!(btn_a.len(), 1);
        assert_eq!(btn_b.len(), 1);

        btn_a[0].notify(&crate::event::InputEvent::new(EV_KEY, BTN_A, 1, DeviceId(0)));
        abs_x[0].notify(&crate::event::InputEvent::new(EV_ABS, ABS_X, 1234, DeviceId(0)));
        assert_eq!(sink.history(), vec![(EV_KEY, 41, 1)], "b wins over a");

        btn_b[0].notify(&crate::event::InputEvent::new(EV_KEY, BTN_B, 1, DeviceId(0)));
        assert_eq!(sink.history(), vec![(EV_KEY, 41, 1), (EV_KEY, 42, 1), (EV_KEY, 41, 0)], "c preempts b");

        abs_x[0].notify(&crate::event::InputEvent::new(EV_ABS, ABS_X, 0, DeviceId(0)));
        assert_eq!(
            sink.history(),
            vec![(EV_KEY, 41, 1), (EV_KEY, 42, 1), (EV_KEY, 41, 0), (EV_KEY, 42, 0)],
            "c releases; a never fired"
        );
    }
}
