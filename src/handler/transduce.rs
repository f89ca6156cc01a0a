//! Input-side transducers: wrap an analog `(type, code)` so it can sit
//! in the handler graph at the position a button combination element
//! would occupy (spec.md §4.3/§4.6's `AbsToBtn`/`RelToBtn` contracts).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::device::AbsInfo;
use crate::event::{InputEvent, EV_ABS, EV_REL};
use crate::transducer::normalize;

use super::InputEventHandler;

/// Converts an `EV_ABS` axis crossing a percent trigger point into a
/// synthetic press/release on the same `(EV_ABS, code)` key so the
/// downstream `CombinationHandler`'s state map doesn't need to know the
/// input was analog. Hat switches are already percent-scaled (`±1`), so
/// `normalize` passes them through unchanged.
pub struct AbsToBtnHandler {
    code: u16,
    trigger_percent: i32,
    info: AbsInfo,
    target: Arc<dyn InputEventHandler>,
    pressed: AtomicBool,
}

impl AbsToBtnHandler {
    pub fn new(code: u16, trigger_percent: i32, info: AbsInfo, target: Arc<dyn InputEventHandler>) -> Self {
        assert!(trigger_percent != 0, "trigger percent must not be zero");
        AbsToBtnHandler {
            code,
            trigger_percent,
            info,
            target,
            pressed: AtomicBool::new(false),
        }
    }
}

impl InputEventHandler for AbsToBtnHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        if event.type_ != EV_ABS || event.code != self.code {
            return false;
        }
        let (x, _scale) = normalize(event.value, &self.info);
        let t = self.trigger_percent as f64 / 100.0;
        let sign = self.trigger_percent.signum() as f64;
        let crossed = sign * (x - t) > 0.0;

        if self.pressed.swap(crossed, Ordering::SeqCst) == crossed {
            return false;
        }
        let synthetic = event.with_value(if crossed { 1 } else { 0 });
        self.target.notify(&synthetic)
    }

    fn reset(&self) {
        self.pressed.store(false, Ordering::SeqCst);
        self.target.reset();
    }
}

/// Converts `EV_REL` motion past a magnitude threshold into a
/// synthetic press, held until `release_timeout` of silence (spec.md
/// §4.6's `RelToBtn`: scroll wheels and similar sources never emit a
/// release event of their own).
pub struct RelToBtnHandler {
    code: u16,
    direction: i32,
    threshold: i32,
    release_timeout: Duration,
    target: Arc<dyn InputEventHandler>,
    pressed: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

impl RelToBtnHandler {
    pub fn new(
        code: u16,
        direction: i32,
        threshold: i32,
        release_timeout: Duration,
        target: Arc<dyn InputEventHandler>,
    ) -> Self {
        RelToBtnHandler {
            code,
            direction: direction.signum(),
            threshold: threshold.abs(),
            release_timeout,
            target,
            pressed: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn schedule_release_watcher(&self, origin: crate::event::DeviceId) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let pressed = self.pressed.clone();
        let target = self.target.clone();
        let code = self.code;
        let timeout = self.release_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if generation.load(Ordering::SeqCst) != my_generation {
                return;
            }
            if pressed.swap(false, Ordering::SeqCst) {
                target.notify(&InputEvent::new(EV_REL, code, 0, origin));
            }
        });
    }
}

impl InputEventHandler for RelToBtnHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        if event.type_ != EV_REL || event.code != self.code {
            return false;
        }
        let matches = if self.direction >= 0 {
            event.value >= self.threshold
        } else {
            event.value <= -self.threshold
        };
        if !matches {
            return false;
        }

        let was_pressed = self.pressed.swap(true, Ordering::SeqCst);
        let consumed = if !was_pressed {
            self.target.notify(&event.with_value(1))
        } else {
            false
        };
        self.schedule_release_watcher(event.origin_hash);
        consumed
    }

    fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.pressed.swap(false, Ordering::SeqCst) {
            self.target.notify(&InputEvent::new(EV_REL, self.code, 0, crate::event::DeviceId(0)));
        }
        self.target.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeviceId;
    use std::sync::Mutex;

    struct RecordingTarget {
        events: Mutex<Vec<InputEvent>>,
    }

    impl InputEventHandler for RecordingTarget {
        fn notify(&self, event: &InputEvent) -> bool {
            self.events.lock().unwrap().push(*event);
            true
        }
        fn reset(&self) {}
    }

    #[test]
    fn abs_to_btn_presses_past_trigger_point() {
        let target = Arc::new(RecordingTarget { events: Mutex::new(Vec::new()) });
        let handler = AbsToBtnHandler::new(0, 50, AbsInfo::new(0, 255), target.clone());
        handler.notify(&InputEvent::new(EV_ABS, 0, 255, DeviceId(0)));
        let events = target.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 1);
    }

    #[test]
    fn abs_to_btn_releases_back_below_trigger_point() {
        let target = Arc::new(RecordingTarget { events: Mutex::new(Vec::new()) });
        let handler = AbsToBtnHandler::new(0, 50, AbsInfo::new(0, 255), target.clone());
        handler.notify(&InputEvent::new(EV_ABS, 0, 255, DeviceId(0)));
        handler.notify(&InputEvent::new(EV_ABS, 0, 127, DeviceId(0)));
        let events = target.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, 0);
    }

    #[tokio::test]
    async fn rel_to_btn_presses_once_then_releases_after_silence() {
        let target = Arc::new(RecordingTarget { events: Mutex::new(Vec::new()) });
        let handler = RelToBtnHandler::new(8, 1, 5, Duration::from_millis(20), target.clone());
        handler.notify(&InputEvent::new(EV_REL, 8, 10, DeviceId(0)));
        handler.notify(&InputEvent::new(EV_REL, 8, 10, DeviceId(0)));
        {
            let events = target.events.lock().unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].value, 1);
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        let events = target.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, 0);
    }
}
