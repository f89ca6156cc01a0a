//! abs→rel and rel→abs axis transducers (spec.md §4.6).
//!
//! Grounded on
//! `original_source/inputremapper/injection/consumers/mapping_handler.py`'s
//! `AbsToRelHandler`/`RelToAbsHandler`: the former runs a rate loop that
//! emits ticks proportional to a continuously-updated target speed, the
//! latter integrates rel deltas into an absolute position and recenters
//! after a quiet period.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::event::{InputEvent, EV_ABS, EV_REL};
use crate::handler::{EmitFn, InputEventHandler};

use super::{normalize, shape};
use crate::device::AbsInfo;

/// Input is an `EV_ABS` axis, output is an `EV_REL` axis: a joystick
/// deflection becomes a continuous scroll/mouse-move rate. A background
/// tick loop (spawned lazily on first event, since `notify` itself is
/// synchronous) emits integer rel deltas at `rel_rate` Hz while the
/// shaped input magnitude exceeds the deadzone.
pub struct AbsToRelHandler {
    input_code: u16,
    output_code: u16,
    info: AbsInfo,
    deadzone: f32,
    expo: f32,
    gain: f32,
    rel_speed: u32,
    rel_rate: u16,
    emit: EmitFn,
    velocity: Arc<Mutex<f64>>,
    started: AtomicBool,
}

impl AbsToRelHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_code: u16,
        output_code: u16,
        info: AbsInfo,
        deadzone: f32,
        expo: f32,
        gain: f32,
        rel_speed: u32,
        rel_rate: u16,
        emit: EmitFn,
    ) -> Self {
        AbsToRelHandler {
            input_code,
            output_code,
            info,
            deadzone,
            expo,
            gain,
            rel_speed,
            rel_rate,
            emit,
            velocity: Arc::new(Mutex::new(0.0)),
            started: AtomicBool::new(false),
        }
    }

    fn start_loop(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let velocity = self.velocity.clone();
        let output_code = self.output_code;
        let emit = self.emit.clone();
        let rel_rate = self.rel_rate.max(1);
        tokio::spawn(async move {
            let mut clock = crate::macro_engine::PreciseIterationFrequency::new(rel_rate as f64);
            let mut carry = 0.0_f64;
            loop {
                clock.tick().await;
                let v = *velocity.lock().expect("abs_to_rel velocity mutex poisoned");
                if v == 0.0 {
                    carry = 0.0;
                    continue;
                }
                carry += v / rel_rate as f64;
                let whole = carry.trunc();
                carry -= whole;
                if whole != 0.0 {
                    emit(EV_REL, output_code, whole as i32);
                }
            }
        });
    }
}

impl InputEventHandler for AbsToRelHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        if event.type_ != EV_ABS || event.code != self.input_code {
            return false;
        }
        self.start_loop();
        let (x, _scale) = normalize(event.value, &self.info);
        let shaped = shape(x as f64, self.deadzone as f64, self.expo as f64, self.gain as f64);
        *self.velocity.lock().expect("abs_to_rel velocity mutex poisoned") = shaped * self.rel_speed as f64;
        true
    }

    fn reset(&self) {
        *self.velocity.lock().expect("abs_to_rel velocity mutex poisoned") = 0.0;
    }
}

/// Input is an `EV_REL` axis, output is an `EV_ABS` axis: mouse motion
/// drives a joystick-shaped position. Rel deltas (divided by
/// `rel_to_abs_input_cutoff`) integrate into a value in `[-1, 1]`; a
/// recenter timer set on every event snaps the output back to the axis
/// midpoint after `release_timeout` of silence.
pub struct RelToAbsHandler {
    input_code: u16,
    output_code: u16,
    rel_to_abs_input_cutoff: u32,
    release_timeout: Duration,
    max_abs_out: i32,
    emit: EmitFn,
    position: Arc<Mutex<f64>>,
    generation: Arc<AtomicU64>,
}

impl RelToAbsHandler {
    pub fn new(
        input_code: u16,
        output_code: u16,
        rel_to_abs_input_cutoff: u32,
        release_timeout: Duration,
        max_abs_out: i32,
        emit: EmitFn,
    ) -> Self {
        RelToAbsHandler {
            input_code,
            output_code,
            rel_to_abs_input_cutoff: rel_to_abs_input_cutoff.max(1),
            release_timeout,
            max_abs_out,
            emit,
            position: Arc::new(Mutex::new(0.0)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn schedule_recenter(&self) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let position = self.position.clone();
        let output_code = self.output_code;
        let emit = self.emit.clone();
        let timeout = self.release_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if generation.load(Ordering::SeqCst) != my_generation {
                return;
            }
            *position.lock().expect("rel_to_abs position mutex poisoned") = 0.0;
            emit(EV_ABS, output_code, 0);
        });
    }
}

impl InputEventHandler for RelToAbsHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        if event.type_ != EV_REL || event.code != self.input_code {
            return false;
        }
        let delta = event.value as f64 / self.rel_to_abs_input_cutoff as f64;
        let mut position = self.position.lock().expect("rel_to_abs position mutex poisoned");
        *position = (*position + delta).clamp(-1.0, 1.0);
        let out = (*position * self.max_abs_out as f64).round() as i32;
        drop(position);
        (self.emit)(EV_ABS, self.output_code, out);
        self.schedule_recenter();
        true
    }

    fn reset(&self) {
        *self.position.lock().expect("rel_to_abs position mutex poisoned") = 0.0;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recording_emit() -> (EmitFn, Arc<StdMutex<Vec<(u16, u16, i32)>>>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let l = log.clone();
        let emit: EmitFn = Arc::new(move |t, c, v| l.lock().unwrap().push((t, c, v)));
        (emit, log)
    }

    #[tokio::test]
    async fn abs_to_rel_ignores_foreign_events() {
        let (emit, log) = recording_emit();
        let handler = AbsToRelHandler::new(0, 0, AbsInfo::new(-255, 255), 0.1, 0.0, 1.0, 100, 60, emit);
        assert!(!handler.notify(&InputEvent::new(EV_ABS, 1, 200, crate::event::DeviceId(0))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abs_to_rel_centers_stop_emission() {
        let (emit, _log) = recording_emit();
        let handler = AbsToRelHandler::new(0, 0, AbsInfo::new(-255, 255), 0.1, 0.0, 1.0, 100, 60, emit);
        assert!(handler.notify(&InputEvent::new(EV_ABS, 0, 0, crate::event::DeviceId(0))));
        assert_eq!(*handler.velocity.lock().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn rel_to_abs_integrates_and_recenters() {
        let (emit, log) = recording_emit();
        let handler = RelToAbsHandler::new(0, 0, 10, Duration::from_millis(20), 255, emit);
        handler.notify(&InputEvent::new(EV_REL, 0, 5, crate::event::DeviceId(0)));
        assert_eq!(log.lock().unwrap().last().copied().unwrap(), (EV_ABS, 0, 128));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(log.lock().unwrap().last().copied().unwrap(), (EV_ABS, 0, 0));
    }
}
