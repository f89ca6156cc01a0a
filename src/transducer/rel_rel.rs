//! rel→rel axis transducer (spec.md §4.6).
//!
//! Grounded on `RelToRelHandler` in
//! `original_source/inputremapper/injection/consumers/mapping_handler.py`:
//! no rate loop, deltas are rescaled and re-emitted as soon as they
//! arrive. Wheel targets additionally emit the paired
//! `REL_WHEEL_HI_RES`/`REL_HWHEEL_HI_RES` event at 120x the low-res
//! value, matching the kernel's own hi-res wheel convention.

use crate::event::{InputEvent, EV_REL, REL_HWHEEL, REL_HWHEEL_HI_RES, REL_WHEEL, REL_WHEEL_HI_RES};
use crate::handler::{EmitFn, InputEventHandler};
use std::sync::Mutex;

/// The hi-res sibling code for a wheel axis, if the output targets one.
fn hi_res_sibling(code: u16) -> Option<u16> {
    match code {
        REL_WHEEL => Some(REL_WHEEL_HI_RES),
        REL_HWHEEL => Some(REL_HWHEEL_HI_RES),
        _ => None,
    }
}

pub struct RelToRelHandler {
    input_code: u16,
    output_code: u16,
    gain: f32,
    in_speed: u32,
    out_speed: u32,
    emit: EmitFn,
    carry: Mutex<f64>,
}

impl RelToRelHandler {
    pub fn new(input_code: u16, output_code: u16, gain: f32, in_speed: u32, out_speed: u32, emit: EmitFn) -> Self {
        RelToRelHandler {
            input_code,
            output_code,
            gain,
            in_speed: in_speed.max(1),
            out_speed,
            emit,
            carry: Mutex::new(0.0),
        }
    }
}

impl InputEventHandler for RelToRelHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        if event.type_ != EV_REL || event.code != self.input_code {
            return false;
        }

        let scale = self.gain as f64 * (self.out_speed as f64 / self.in_speed as f64);
        let mut carry = self.carry.lock().expect("rel_to_rel carry mutex poisoned");
        *carry += event.value as f64 * scale;
        let whole = carry.trunc();
        *carry -= whole;
        drop(carry);

        if whole != 0.0 {
            let delta = whole as i32;
            (self.emit)(EV_REL, self.output_code, delta);
            if let Some(hi_res_code) = hi_res_sibling(self.output_code) {
                (self.emit)(EV_REL, hi_res_code, delta * 120);
            }
        }
        true
    }

    fn reset(&self) {
        *self.carry.lock().expect("rel_to_rel carry mutex poisoned") = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeviceId;
    use std::sync::{Arc, Mutex as StdMutex};

    fn recording_emit() -> (EmitFn, Arc<StdMutex<Vec<(u16, u16, i32)>>>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let l = log.clone();
        let emit: EmitFn = Arc::new(move |t, c, v| l.lock().unwrap().push((t, c, v)));
        (emit, log)
    }

    #[test]
    fn scales_deltas_by_speed_ratio() {
        let (emit, log) = recording_emit();
        let handler = RelToRelHandler::new(0, 0, 1.0, 1, 2, emit);
        handler.notify(&InputEvent::new(EV_REL, 0, 3, DeviceId(0)));
        assert_eq!(log.lock().unwrap().as_slice(), &[(EV_REL, 0, 6)]);
    }

    #[test]
    fn wheel_output_pairs_hi_res_event() {
        let (emit, log) = recording_emit();
        let handler = RelToRelHandler::new(8, REL_WHEEL, 1.0, 1, 1, emit);
        handler.notify(&InputEvent::new(EV_REL, 8, 2, DeviceId(0)));
        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), &[(EV_REL, REL_WHEEL, 2), (EV_REL, REL_WHEEL_HI_RES, 240)]);
    }

    #[test]
    fn sub_unit_deltas_accumulate_before_emitting() {
        let (emit, log) = recording_emit();
        let handler = RelToRelHandler::new(0, 0, 0.5, 1, 1, emit);
        handler.notify(&InputEvent::new(EV_REL, 0, 1, DeviceId(0)));
        assert!(log.lock().unwrap().is_empty());
        handler.notify(&InputEvent::new(EV_REL, 0, 1, DeviceId(0)));
        assert_eq!(log.lock().unwrap().as_slice(), &[(EV_REL, 0, 1)]);
    }
}
