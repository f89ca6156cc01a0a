//! The macro `Task` tagged union (spec.md §4.7) and its execution.
//!
//! One variant per macro function named in spec.md. Grounded file-by-file
//! on `original_source/inputremapper/injection/macros/tasks/*.py`, folded
//! into a single enum per the "tagged variant for the macro AST" design
//! note rather than one struct+file per task: Rust's exhaustive `match`
//! gives the dispatch the Python registry (`task.py` + one subclass per
//! file) provides dynamically.
//!
//! Structural children (`then`/`else`/hold bodies/parallel branches) are
//! plain `Macro` fields, parsed once and never run through variable
//! resolution; only scalar slots go through `Argument`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::MacroError;
use crate::event::{InputEvent, EV_KEY, EV_REL};
use crate::variable_store::Value;

use super::argument::Argument;
use super::{Callback, LedKind, Macro, TaskEnv};

#[derive(Debug, Clone)]
pub enum Task {
    Key { symbol: Argument },
    Hold { target: Option<HoldTarget> },
    HoldKeys { symbols: Vec<Argument> },
    Repeat { count: Argument, body: Macro },
    Modify { symbol: Argument, body: Macro },
    IfEq { value_1: Argument, value_2: Argument, then: Option<Macro>, else_: Option<Macro> },
    IfTap { then: Option<Macro>, else_: Option<Macro>, timeout_ms: Argument },
    IfSingle { then: Option<Macro>, else_: Option<Macro>, timeout_ms: Option<Argument> },
    Mouse { direction: Direction, speed: Argument, acceleration: Option<Argument> },
    MouseXy { x: Argument, y: Argument, acceleration: Argument },
    Wheel { direction: Direction, speed: Argument },
    Set { variable: String, value: Option<Argument> },
    Add { variable: String, value: Argument },
    Event { type_: Argument, code: Argument, value: Argument },
    Parallel { children: Vec<Macro> },
    Wait { min_ms: Argument, max_ms: Option<Argument> },
    IfLed { led: LedKind, then: Option<Macro>, else_: Option<Macro> },
    ModTap { default: Argument, modifier: Argument, tapping_term_ms: Argument },
}

#[derive(Debug, Clone)]
pub enum HoldTarget {
    Symbol(Argument),
    Macro(Macro),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}

impl Task {
    /// Runs one task to completion. `callback` injects `(type, code,
    /// value)` into the macro's target sink, exactly as `Task.run`'s
    /// `callback`/`handler` argument does in the source.
    pub async fn run(&self, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
        match self {
            Task::Key { symbol } => run_key(self.name(), symbol, env, callback).await,
            Task::Hold { target } => run_hold(target, env, callback).await,
            Task::HoldKeys { symbols } => run_hold_keys(symbols, env, callback).await,
            Task::Repeat { count, body } => run_repeat(count, body, env, callback).await,
            Task::Modify { symbol, body } => run_modify(symbol, body, env, callback).await,
            Task::IfEq { value_1, value_2, then, else_ } => {
                run_if_eq(value_1, value_2, then, else_, env, callback).await
            }
            Task::IfTap { then, else_, timeout_ms } => run_if_tap(then, else_, timeout_ms, env, callback).await,
            Task::IfSingle { then, else_, timeout_ms } => {
                run_if_single(then, else_, timeout_ms, env, callback).await
            }
            Task::Mouse { direction, speed, acceleration } => {
                run_mouse(*direction, speed, acceleration, env, callback).await
            }
            Task::MouseXy { x, y, acceleration } => run_mouse_xy(x, y, acceleration, env, callback).await,
            Task::Wheel { direction, speed } => run_wheel(*direction, speed, env, callback).await,
            Task::Set { variable, value } => run_set(variable, value, env),
            Task::Add { variable, value } => run_add(variable, value, env),
            Task::Event { type_, code, value } => run_event(type_, code, value, env, callback).await,
            Task::Parallel { children } => run_parallel(children, env, callback).await,
            Task::Wait { min_ms, max_ms } => run_wait(min_ms, max_ms, env).await,
            Task::IfLed { led, then, else_ } => run_if_led(*led, then, else_, env, callback).await,
            Task::ModTap { default, modifier, tapping_term_ms } => {
                run_mod_tap(default, modifier, tapping_term_ms, env, callback).await
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Task::Key { .. } => "key",
            Task::Hold { .. } => "hold",
            Task::HoldKeys { .. } => "hold_keys",
            Task::Repeat { .. } => "repeat",
            Task::Modify { .. } => "modify",
            Task::IfEq { .. } => "if_eq",
            Task::IfTap { .. } => "if_tap",
            Task::IfSingle { .. } => "if_single",
            Task::Mouse { .. } => "mouse",
            Task::MouseXy { .. } => "mouse_xy",
            Task::Wheel { .. } => "wheel",
            Task::Set { .. } => "set",
            Task::Add { .. } => "add",
            Task::Event { .. } => "event",
            Task::Parallel { .. } => "parallel",
            Task::Wait { .. } => "wait",
            Task::IfLed { .. } => "if_led",
            Task::ModTap { .. } => "mod_tap",
        }
    }
}

async fn keycode_pause(env: &TaskEnv) {
    tokio::time::sleep(Duration::from_millis(env.mapping.macro_key_sleep_ms as u64)).await;
}

fn resolve_symbol(env: &TaskEnv, symbol: &Argument, function: &str, position: usize) -> Result<i32, MacroError> {
    let name = symbol.resolve_text(&env.store, function, position)?;
    env.layout
        .get(&name)
        .ok_or_else(|| MacroError::UnresolvedVariable(name))
}

/// `key(a)`: down, pace, up, pace (tasks/key_down.py + tasks/key_up.py,
/// folded into the `key` sugar named in spec.md §4.7).
async fn run_key(name: &'static str, symbol: &Argument, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    let code = resolve_symbol(env, symbol, name, 0)?;
    callback(EV_KEY, code as u16, 1);
    keycode_pause(env).await;
    callback(EV_KEY, code as u16, 0);
    keycode_pause(env).await;
    Ok(())
}

/// tasks/hold.py.
async fn run_hold(target: &Option<HoldTarget>, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    match target {
        None => {
            env.trigger.wait_release().await;
            Ok(())
        }
        Some(HoldTarget::Symbol(symbol)) => {
            let code = resolve_symbol(env, symbol, "hold", 0)?;
            callback(EV_KEY, code as u16, 1);
            env.trigger.wait_release().await;
            callback(EV_KEY, code as u16, 0);
            Ok(())
        }
        Some(HoldTarget::Macro(body)) => {
            while env.trigger.is_holding() {
                body.run(env, callback).await?;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(())
        }
    }
}

/// tasks/hold_keys.py: press in order, release in reverse.
async fn run_hold_keys(symbols: &[Argument], env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    let mut codes = Vec::with_capacity(symbols.len());
    for (position, symbol) in symbols.iter().enumerate() {
        let code = resolve_symbol(env, symbol, "hold_keys", position)?;
        codes.push(code as u16);
        callback(EV_KEY, code as u16, 1);
        keycode_pause(env).await;
    }
    env.trigger.wait_release().await;
    for code in codes.into_iter().rev() {
        callback(EV_KEY, code, 0);
        keycode_pause(env).await;
    }
    Ok(())
}

/// Legacy `r(count, macro)` / `repeat(count, macro)`.
async fn run_repeat(count: &Argument, body: &Macro, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    let n = count.resolve_number(&env.store, "repeat", 0)? as i64;
    for _ in 0..n.max(0) {
        body.run(env, callback).await?;
    }
    Ok(())
}

/// tasks/modify.py: hold modifier, run the child macro, release.
async fn run_modify(symbol: &Argument, body: &Macro, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    let code = resolve_symbol(env, symbol, "modify", 0)?;
    callback(EV_KEY, code as u16, 1);
    keycode_pause(env).await;
    body.run(env, callback).await?;
    callback(EV_KEY, code as u16, 0);
    keycode_pause(env).await;
    Ok(())
}

/// tasks/if_eq.py: numbers compare as numbers, strings as strings, mixed
/// types are never equal.
async fn run_if_eq(
    value_1: &Argument,
    value_2: &Argument,
    then: &Option<Macro>,
    else_: &Option<Macro>,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let a = value_1.resolve_value(&env.store);
    let b = value_2.resolve_value(&env.store);
    let equal = match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x == y,
        (Some(Value::Text(x)), Some(Value::Text(y))) => x == y,
        _ => false,
    };
    if equal {
        if let Some(then) = then {
            then.run(env, callback).await?;
        }
    } else if let Some(else_) = else_ {
        else_.run(env, callback).await?;
    }
    Ok(())
}

/// tasks/if_tap.py. Handles both "already pressed" (just await release)
/// and "not yet pressed" (await a press, then a release) within the
/// timeout.
async fn run_if_tap(
    then: &Option<Macro>,
    else_: &Option<Macro>,
    timeout_ms: &Argument,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let timeout = Duration::from_secs_f64(timeout_ms.resolve_number(&env.store, "if_tap", 2)? / 1000.0);

    let wait = async {
        if env.trigger.is_holding() {
            env.trigger.wait_release().await;
        } else {
            env.trigger.wait_press().await;
            env.trigger.wait_release().await;
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(()) => {
            if let Some(then) = then {
                then.run(env, callback).await?;
            }
        }
        Err(_) => {
            if let Some(else_) = else_ {
                else_.run(env, callback).await?;
            }
        }
    }
    Ok(())
}

/// tasks/if_single.py: registers a listener that flags any other key
/// press, races it against trigger release (and an optional timeout).
async fn run_if_single(
    then: &Option<Macro>,
    else_: &Option<Macro>,
    timeout_ms: &Option<Argument>,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let other_key_pressed = Arc::new(tokio::sync::Notify::new());
    let flag = other_key_pressed.clone();
    let listener_id = env.listeners.add(Arc::new(move |event: &InputEvent| {
        if event.type_ == EV_KEY && event.value == 1 {
            flag.notify_one();
        }
        false
    }));

    let timeout = match timeout_ms {
        Some(arg) => Some(Duration::from_secs_f64(arg.resolve_number(&env.store, "if_single", 2)? / 1000.0)),
        None => None,
    };

    let race = async {
        tokio::select! {
            _ = other_key_pressed.notified() => {}
            _ = env.trigger.wait_release() => {}
        }
    };

    match timeout {
        Some(t) => {
            let _ = tokio::time::timeout(t, race).await;
        }
        None => race.await,
    }

    env.listeners.remove(listener_id);

    if !env.trigger.is_holding() {
        if let Some(then) = then {
            then.run(env, callback).await?;
        }
    } else if let Some(else_) = else_ {
        else_.run(env, callback).await?;
    }
    Ok(())
}

/// tasks/mouse.py: linear ramp to `speed` at `acceleration` units/tick,
/// emitted every `1/rel_rate` while the trigger is held.
async fn run_mouse(
    direction: Direction,
    speed: &Argument,
    acceleration: &Option<Argument>,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let speed = speed.resolve_number(&env.store, "mouse", 1)?;
    let acceleration = match acceleration {
        Some(arg) => Some(arg.resolve_number(&env.store, "mouse", 2)?),
        None => None,
    };

    let (code, sign) = match direction {
        Direction::Up => (crate::event::EV_REL_Y, -1.0),
        Direction::Down => (crate::event::EV_REL_Y, 1.0),
        Direction::Left => (crate::event::EV_REL_X, -1.0),
        Direction::Right => (crate::event::EV_REL_X, 1.0),
    };

    let mut current_speed = 0.0_f64;
    let mut accumulator = 0.0_f64;
    let mut displacement = if acceleration.is_none() { speed } else { 0.0 };
    let period = Duration::from_secs_f64(1.0 / env.mapping.rel_rate as f64);

    while env.trigger.is_holding() {
        if let Some(acceleration) = acceleration {
            if current_speed < speed {
                current_speed = (current_speed + acceleration).min(speed);
                accumulator += current_speed;
                displacement = accumulator.trunc();
                accumulator -= displacement;
            }
        }
        callback(EV_REL, code, (sign * displacement) as i32);
        tokio::time::sleep(period).await;
    }
    Ok(())
}

/// tasks/mouse_xy.py: two concurrent per-axis ramps.
async fn run_mouse_xy(
    x: &Argument,
    y: &Argument,
    acceleration: &Argument,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let x = x.resolve_number(&env.store, "mouse_xy", 0)?;
    let y = y.resolve_number(&env.store, "mouse_xy", 1)?;
    let fractional_acceleration = acceleration.resolve_number(&env.store, "mouse_xy", 2)?;

    let axis = |code: u16, speed: f64| {
        let env = env;
        async move {
            let acceleration = speed * fractional_acceleration;
            let direction = if speed < 0.0 { -1.0 } else { 1.0 };
            let mut current_speed = 0.0_f64;
            let mut accumulator = 0.0_f64;
            let mut displacement: i64 = if acceleration <= 0.0 { speed.trunc() as i64 } else { 0 };
            let period = Duration::from_secs_f64(1.0 / env.mapping.rel_rate as f64);

            while env.trigger.is_holding() {
                if acceleration != 0.0 && current_speed.abs() < speed.abs() {
                    current_speed += acceleration;
                    current_speed = direction * current_speed.abs().min(speed.abs());
                    accumulator += current_speed;
                    displacement = accumulator.trunc() as i64;
                    accumulator -= displacement as f64;
                }
                if displacement != 0 {
                    callback(EV_REL, code, displacement as i32);
                }
                tokio::time::sleep(period).await;
            }
        }
    };

    tokio::join!(axis(crate::event::EV_REL_X, x), axis(crate::event::EV_REL_Y, y));
    Ok(())
}

/// tasks/wheel.py: paired regular/hi-res emission at a fixed 120:1 ratio,
/// paced by the self-correcting rate loop (`super::precise_iteration`).
async fn run_wheel(direction: Direction, speed: &Argument, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    use crate::event::{REL_HWHEEL, REL_HWHEEL_HI_RES, REL_WHEEL, REL_WHEEL_HI_RES};

    let speed = speed.resolve_number(&env.store, "wheel", 1)?;
    let (codes, units) = match direction {
        Direction::Up => ([REL_WHEEL, REL_WHEEL_HI_RES], [1.0 / 120.0, 1.0]),
        Direction::Down => ([REL_WHEEL, REL_WHEEL_HI_RES], [-1.0 / 120.0, -1.0]),
        Direction::Left => ([REL_HWHEEL, REL_HWHEEL_HI_RES], [1.0 / 120.0, 1.0]),
        Direction::Right => ([REL_HWHEEL, REL_HWHEEL_HI_RES], [-1.0 / 120.0, -1.0]),
    };

    let mut remainder = [0.0_f64; 2];
    let mut ticker = super::PreciseIterationFrequency::new(env.mapping.rel_rate as f64);
    loop {
        ticker.tick().await;
        if !env.trigger.is_holding() {
            return Ok(());
        }
        for i in 0..2 {
            let float_value = units[i] * speed + remainder[i];
            remainder[i] = float_value.fract();
            if float_value.abs() >= 1.0 {
                callback(EV_REL, codes[i], float_value as i32);
            }
        }
    }
}

fn run_set(variable: &str, value: &Option<Argument>, env: &TaskEnv) -> Result<(), MacroError> {
    let resolved = match value {
        Some(arg) => arg.resolve_value(&env.store),
        None => None,
    };
    match resolved {
        Some(v) => env.store.set(variable, v),
        None => env.store.set(variable, Value::Number(0.0)),
    }
    Ok(())
}

fn run_add(variable: &str, value: &Argument, env: &TaskEnv) -> Result<(), MacroError> {
    let delta = value.resolve_number(&env.store, "add", 1)?;
    env.store.add(variable, delta)?;
    Ok(())
}

/// tasks/event.py: emit a raw `(type, code, value)` triple.
async fn run_event(
    type_: &Argument,
    code: &Argument,
    value: &Argument,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let type_ = type_.resolve_number(&env.store, "event", 0)? as u16;
    let code = code.resolve_number(&env.store, "event", 1)? as u16;
    let value = value.resolve_number(&env.store, "event", 2)? as i32;
    callback(type_, code, value);
    keycode_pause(env).await;
    Ok(())
}

async fn run_parallel(children: &[Macro], env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    let futures = children.iter().map(|child| child.run(env, callback));
    let results = futures::future::join_all(futures).await;
    for result in results {
        result?;
    }
    Ok(())
}

/// tasks/wait.py (present only in the legacy single-file macro engine;
/// folded in here as its own variant per spec.md §4.7): uniform jitter in
/// `[min, max]`, or exactly `min` when `max` is unset.
async fn run_wait(min_ms: &Argument, max_ms: &Option<Argument>, env: &TaskEnv) -> Result<(), MacroError> {
    let min = min_ms.resolve_number(&env.store, "wait", 0)?;
    let duration_ms = match max_ms {
        Some(arg) => {
            let max = arg.resolve_number(&env.store, "wait", 1)?;
            if max <= min {
                min
            } else {
                rand::rng().random_range(min..=max)
            }
        }
        None => min,
    };
    tokio::time::sleep(Duration::from_secs_f64(duration_ms / 1000.0)).await;
    Ok(())
}

/// tasks/if_led.py (`if_capslock`/`if_numlock` share this body).
async fn run_if_led(led: LedKind, then: &Option<Macro>, else_: &Option<Macro>, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
    let leds = (env.leds)();
    let on = leds.contains(&led.code());
    if on {
        if let Some(then) = then {
            then.run(env, callback).await?;
        }
    } else if let Some(else_) = else_ {
        else_.run(env, callback).await?;
    }
    Ok(())
}

/// tasks/mod_tap.py: records non-trigger key events that arrive during
/// the decision window, then either taps `default` or holds `modifier`
/// and replays the recording through each event's own forward sink.
async fn run_mod_tap(
    default: &Argument,
    modifier: &Argument,
    tapping_term_ms: &Argument,
    env: &TaskEnv,
    callback: &Callback,
) -> Result<(), MacroError> {
    let tapping_term = Duration::from_secs_f64(tapping_term_ms.resolve_number(&env.store, "mod_tap", 2)? / 1000.0);

    let recorded: Arc<std::sync::Mutex<Vec<InputEvent>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let trigger_type_and_code = env.trigger_type_and_code;
    let recorded_for_listener = recorded.clone();
    let listener_id = env.listeners.add(Arc::new(move |event: &InputEvent| {
        if event.type_and_code() == trigger_type_and_code {
            return false;
        }
        if event.type_ != EV_KEY {
            return false;
        }
        recorded_for_listener.lock().expect("mod_tap recording poisoned").push(*event);
        true
    }));

    let has_timed_out = tokio::time::timeout(tapping_term, env.trigger.wait_release()).await.is_err();

    env.listeners.remove(listener_id);

    let symbol = if has_timed_out { modifier } else { default };
    let code = resolve_symbol(env, symbol, "mod_tap", if has_timed_out { 1 } else { 0 })?;
    callback(EV_KEY, code as u16, 1);
    keycode_pause(env).await;

    let recorded = std::mem::take(&mut *recorded.lock().expect("mod_tap recording poisoned"));
    for event in recorded {
        replay_event(env, event);
        keycode_pause(env).await;
    }

    env.trigger.wait_release().await;
    callback(EV_KEY, code as u16, 0);
    keycode_pause(env).await;
    Ok(())
}

fn replay_event(env: &TaskEnv, event: InputEvent) {
    (env.forward_write)(event.origin_hash, event);
}
