//! abs→abs axis transducer (spec.md §4.6).
//!
//! Grounded on `AbsToAbsHandler` in
//! `original_source/inputremapper/injection/consumers/mapping_handler.py`:
//! no rate loop and no accumulation, the shaped value is rescaled to the
//! output axis range directly and emitted only when it changes, so a
//! joystick rerouted to another joystick axis doesn't flood uinput with
//! duplicate reports.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::device::AbsInfo;
use crate::event::{InputEvent, EV_ABS};
use crate::handler::{EmitFn, InputEventHandler};

use super::{normalize, shape};

pub struct AbsToAbsHandler {
    input_code: u16,
    output_code: u16,
    info: AbsInfo,
    deadzone: f32,
    expo: f32,
    gain: f32,
    max_abs_out: i32,
    emit: EmitFn,
    last_emitted: AtomicI32,
}

impl AbsToAbsHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_code: u16,
        output_code: u16,
        info: AbsInfo,
        deadzone: f32,
        expo: f32,
        gain: f32,
        max_abs_out: i32,
        emit: EmitFn,
    ) -> Self {
        AbsToAbsHandler {
            input_code,
            output_code,
            info,
            deadzone,
            expo,
            gain,
            max_abs_out,
            emit,
            last_emitted: AtomicI32::new(i32::MIN),
        }
    }
}

impl InputEventHandler for AbsToAbsHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        if event.type_ != EV_ABS || event.code != self.input_code {
            return false;
        }

        let (x, _scale) = normalize(event.value, &self.info);
        let shaped = shape(x as f64, self.deadzone as f64, self.expo as f64, self.gain as f64);
        let out = (shaped * self.max_abs_out as f64).clamp(-(self.max_abs_out as f64), self.max_abs_out as f64) as i32;

        if self.last_emitted.swap(out, Ordering::SeqCst) != out {
            (self.emit)(EV_ABS, self.output_code, out);
        }
        true
    }

    fn reset(&self) {
        if self.last_emitted.swap(0, Ordering::SeqCst) != 0 {
            (self.emit)(EV_ABS, self.output_code, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeviceId;
    use std::sync::{Arc, Mutex};

    fn recording_emit() -> (EmitFn, Arc<Mutex<Vec<(u16, u16, i32)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let emit: EmitFn = Arc::new(move |t, c, v| l.lock().unwrap().push((t, c, v)));
        (emit, log)
    }

    #[test]
    fn center_stays_silent_after_deadzone() {
        let (emit, log) = recording_emit();
        let handler = AbsToAbsHandler::new(0, 0, AbsInfo::new(-255, 255), 0.1, 0.0, 1.0, 255, emit);
        handler.notify(&InputEvent::new(EV_ABS, 0, 0, DeviceId(0)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn repeated_identical_values_emit_once() {
        let (emit, log) = recording_emit();
        let handler = AbsToAbsHandler::new(0, 0, AbsInfo::new(-255, 255), 0.0, 0.0, 1.0, 255, emit);
        handler.notify(&InputEvent::new(EV_ABS, 0, 255, DeviceId(0)));
        handler.notify(&InputEvent::new(EV_ABS, 0, 255, DeviceId(0)));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn reset_recenters_if_displaced() {
        let (emit, log) = recording_emit();
        let handler = AbsToAbsHandler::new(0, 0, AbsInfo::new(-255, 255), 0.0, 0.0, 1.0, 255, emit);
        handler.notify(&InputEvent::new(EV_ABS, 0, 255, DeviceId(0)));
        handler.reset();
        assert_eq!(log.lock().unwrap().last().copied().unwrap(), (EV_ABS, 0, 0));
    }
}
