//! `CombinationHandler`, its two sub-handlers and the hierarchy wrapper
//! for stacked mappings (spec.md §4.4/§4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{InputEvent, EV_KEY};
use crate::macro_engine::{Callback, Macro, TaskEnv};
use crate::uinput_registry::UInputSink;

use super::{EmitFn, InputEventHandler};

/// What a satisfied combination actually does: write a key, or run a
/// macro. Distinct from `InputEventHandler` since a sub-handler never
/// sees raw events, only the combination's press/release transitions.
pub trait PressReleaseHandler: Send + Sync {
    /// Returns `false` if the press could not be carried out (e.g. the
    /// sink lacks the capability); the combination falls back to "not
    /// consumed" so the triggering event is still forwarded.
    fn press(&self) -> bool;
    fn release(&self);
    fn reset(&self);
}

/// Writes `(EV_KEY, code, 1/0)` to a target sink (spec.md §4.5).
pub struct KeyHandler {
    code: u16,
    sink: Arc<dyn UInputSink>,
    held: AtomicBool,
}

impl KeyHandler {
    pub fn new(code: u16, sink: Arc<dyn UInputSink>) -> Self {
        KeyHandler {
            code,
            sink,
            held: AtomicBool::new(false),
        }
    }
}

impl PressReleaseHandler for KeyHandler {
    fn press(&self) -> bool {
        if !self.sink.can_emit(EV_KEY, self.code) {
            log::warn!("sink {} cannot emit key {}", self.sink.name(), self.code);
            return false;
        }
        if let Err(err) = crate::uinput_registry::emit(self.sink.as_ref(), EV_KEY, self.code, 1) {
            log::error!("failed to write key-down for {}: {err}", self.code);
        }
        self.held.store(true, Ordering::SeqCst);
        true
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            if let Err(err) = crate::uinput_registry::emit(self.sink.as_ref(), EV_KEY, self.code, 0) {
                log::error!("failed to write key-up for {}: {err}", self.code);
            }
        }
    }

    fn reset(&self) {
        self.release();
    }
}

/// Owns a parsed macro, driving it on a spawned task per spec.md §4.5.
/// `press`/`release` only flip the shared `TriggerState` (see
/// `macro_engine`'s module docs for why one state serves the whole
/// macro tree); a fresh run is scheduled only if none is in flight.
pub struct MacroHandler {
    macro_: Macro,
    env: TaskEnv,
    callback: Callback,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MacroHandler {
    pub fn new(macro_: Macro, env: TaskEnv, callback: Callback) -> Self {
        MacroHandler {
            macro_,
            env,
            callback,
            handle: Mutex::new(None),
        }
    }
}

impl PressReleaseHandler for MacroHandler {
    fn press(&self) -> bool {
        self.env.trigger.press();
        let mut handle = self.handle.lock().expect("macro handler mutex poisoned");
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }
        let macro_ = self.macro_.clone();
        let env = self.env.clone();
        let callback = self.callback.clone();
        *handle = Some(tokio::spawn(async move {
            if let Err(err) = macro_.run(&env, &callback).await {
                log::error!("macro aborted: {err}");
            }
        }));
        true
    }

    fn release(&self) {
        self.env.trigger.release();
    }

    fn reset(&self) {
        if let Some(handle) = self.handle.lock().expect("macro handler mutex poisoned").take() {
            handle.abort();
        }
        self.env.trigger.release();
    }
}

/// State machine tracking one combination's component presses
/// (spec.md §4.4). Activation is purely a function of the tracked
/// component state transitioning to fully-satisfied — it does not care
/// which component's event caused the transition, so a combination can
/// be driven to activation by any of its elements arriving last.
pub struct CombinationHandler {
    state: Mutex<HashMap<(u16, u16), bool>>,
    active: AtomicBool,
    sub_handler: Arc<dyn PressReleaseHandler>,
    forward_release: EmitFn,
}

impl CombinationHandler {
    pub fn new(elements: &[(u16, u16)], sub_handler: Arc<dyn PressReleaseHandler>, forward_release: EmitFn) -> Self {
        let mut state = HashMap::new();
        for &type_and_code in elements {
            state.insert(type_and_code, false);
        }
        CombinationHandler {
            state: Mutex::new(state),
            active: AtomicBool::new(false),
            sub_handler,
            forward_release,
        }
    }

    /// Updates component state without emitting, for the non-winning
    /// members of a `HierarchyHandler` stack (spec.md §4.3's
    /// `suppressed=true` notify).
    pub fn notify_suppressed(&self, event: &InputEvent) {
        let type_and_code = event.type_and_code();
        let mut state = self.state.lock().expect("combination state mutex poisoned");
        if state.contains_key(&type_and_code) {
            state.insert(type_and_code, event.value != 0);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Deactivates unconditionally, regardless of component state. Used
    /// when a sibling combination sharing some of these components wins
    /// priority (spec.md §8 scenario 2): only one overlapping combination
    /// can hold the shared components at a time.
    pub fn force_release(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.sub_handler.release();
        }
    }
}

impl InputEventHandler for CombinationHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        let type_and_code = event.type_and_code();
        let mut state = self.state.lock().expect("combination state mutex poisoned");
        if !state.contains_key(&type_and_code) {
            return false;
        }
        state.insert(type_and_code, event.value != 0);
        let all = state.values().all(|&v| v);
        let was_active = self.active.load(Ordering::SeqCst);

        if all == was_active {
            return false;
        }

        if all {
            let forwarded: Vec<(u16, u16)> = state
                .iter()
                .filter(|(&tc, &pressed)| tc != type_and_code && pressed)
                .map(|(&tc, _)| tc)
                .collect();
            drop(state);

            if !self.sub_handler.press() {
                self.active.store(false, Ordering::SeqCst);
                return false;
            }
            self.active.store(true, Ordering::SeqCst);
            for (type_, code) in forwarded {
                (self.forward_release)(type_, code, 0);
            }
            return true;
        }

        drop(state);
        self.active.store(false, Ordering::SeqCst);
        self.sub_handler.release();
        true
    }

    fn reset(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.sub_handler.reset();
    }
}

/// Stacks combinations that overlap in at least one input component
/// (spec.md §4.3, generalized per §8 scenario 2 to overlap rather than
/// literal shared trigger): at a given key, `members` lists the
/// (possibly transducer-wrapped) views of every overlapping combination
/// that tracks this key, longest combination first. The first to
/// consume the event wins; the rest are notified with `notify_suppressed`.
/// When the winner just newly activated, every other combination in the
/// wider overlap `group` — even ones that don't track this particular
/// key — is force-released, since overlapping combinations can't both
/// hold their shared components at once.
pub struct HierarchyHandler {
    members: Vec<(Arc<dyn InputEventHandler>, Arc<CombinationHandler>)>,
    group: Vec<Arc<CombinationHandler>>,
}

impl HierarchyHandler {
    pub fn new(members: Vec<(Arc<dyn InputEventHandler>, Arc<CombinationHandler>)>, group: Vec<Arc<CombinationHandler>>) -> Self {
        HierarchyHandler { members, group }
    }
}

impl InputEventHandler for HierarchyHandler {
    fn notify(&self, event: &InputEvent) -> bool {
        let mut consumed = false;
        let mut winner: Option<&Arc<CombinationHandler>> = None;
        for (view, combo) in &self.members {
            if !consumed {
                let was_active = combo.is_active();
                if view.notify(event) {
                    consumed = true;
                    if !was_active && combo.is_active() {
                        winner = Some(combo);
                    }
                }
            } else {
                combo.notify_suppressed(event);
            }
        }

        if let Some(winner) = winner {
            for other in &self.group {
                if !Arc::ptr_eq(other, winner) && other.is_active() {
                    other.force_release();
                }
            }
        }

        consumed
    }

    fn reset(&self) {
        for combo in &self.group {
            combo.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capabilities;
    use crate::event::{DeviceId, EV_KEY};
    use crate::uinput_registry::FakeUInputSink;

    fn key_combination(trigger_code: u16, other_codes: &[u16]) -> (Arc<CombinationHandler>, Arc<FakeUInputSink>) {
        let mut caps = Capabilities::default();
        caps.insert_key(99);
        let sink = FakeUInputSink::new("kbd", caps);
        let key_handler = Arc::new(KeyHandler::new(99, sink.clone()));
        let mut elements: Vec<(u16, u16)> = other_codes.iter().map(|&c| (EV_KEY, c)).collect();
        elements.push((EV_KEY, trigger_code));
        let handler = Arc::new(CombinationHandler::new(&elements, key_handler, Arc::new(|_t, _c, _v| {})));
        (handler, sink)
    }

    #[test]
    fn single_key_combination_fires_on_trigger_press() {
        let (handler, sink) = key_combination(30, &[]);
        assert!(handler.notify(&InputEvent::new(EV_KEY, 30, 1, DeviceId(0))));
        assert_eq!(sink.history(), vec![(EV_KEY, 99, 1)]);
        assert!(handler.notify(&InputEvent::new(EV_KEY, 30, 0, DeviceId(0))));
        assert_eq!(sink.history(), vec![(EV_KEY, 99, 1), (EV_KEY, 99, 0)]);
    }

    #[test]
    fn multi_key_combination_requires_all_components() {
        let (handler, sink) = key_combination(30, &[31]);
        assert!(!handler.notify(&InputEvent::new(EV_KEY, 31, 1, DeviceId(0))));
        assert!(sink.history().is_empty());
        assert!(handler.notify(&InputEvent::new(EV_KEY, 30, 1, DeviceId(0))));
        assert_eq!(sink.history(), vec![(EV_KEY, 99, 1)]);
    }

    #[test]
    fn releasing_any_component_releases_the_combination() {
        let (handler, sink) = key_combination(30, &[31]);
        handler.notify(&InputEvent::new(EV_KEY, 31, 1, DeviceId(0)));
        handler.notify(&InputEvent::new(EV_KEY, 30, 1, DeviceId(0)));
        assert!(handler.notify(&InputEvent::new(EV_KEY, 31, 0, DeviceId(0))));
        assert_eq!(sink.history(), vec![(EV_KEY, 99, 1), (EV_KEY, 99, 0)]);
    }

    #[test]
    fn activation_releases_forwarded_non_trigger_presses() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let r = released.clone();
        let mut caps = Capabilities::default();
        caps.insert_key(99);
        let sink = FakeUInputSink::new("kbd", caps);
        let key_handler = Arc::new(KeyHandler::new(99, sink.clone()));
        let handler = CombinationHandler::new(
            &[(EV_KEY, 31), (EV_KEY, 30)],
            key_handler,
            Arc::new(move |t, c, v| r.lock().unwrap().push((t, c, v))),
        );
        handler.notify(&InputEvent::new(EV_KEY, 31, 1, DeviceId(0)));
        handler.notify(&InputEvent::new(EV_KEY, 30, 1, DeviceId(0)));
        assert_eq!(released.lock().unwrap().as_slice(), &[(EV_KEY, 31, 0)]);
    }

    #[test]
    fn hierarchy_suppresses_losers_after_a_winner_consumes() {
        let (winner, winner_sink) = key_combination(30, &[]);
        let (loser, loser_sink) = key_combination(30, &[]);
        let members: Vec<(Arc<dyn InputEventHandler>, Arc<CombinationHandler>)> =
            vec![(winner.clone() as Arc<dyn InputEventHandler>, winner.clone()), (loser.clone() as Arc<dyn InputEventHandler>, loser.clone())];
        let hierarchy = HierarchyHandler::new(members, vec![winner, loser]);
        assert!(hierarchy.notify(&InputEvent::new(EV_KEY, 30, 1, DeviceId(0))));
        assert_eq!(winner_sink.history(), vec![(EV_KEY, 99, 1)]);
        assert!(loser_sink.history().is_empty());
    }

    /// spec.md §8 scenario 2: `a=[ABS_X]`, `b=[ABS_X,BTN_A]`,
    /// `c=[ABS_X,BTN_A,BTN_B]` overlap entirely in `ABS_X`/`BTN_A` despite
    /// having different declared triggers. `b` must win over `a` once
    /// both of its components are down, and `c` must preempt `b` (forcing
    /// its release) once `BTN_B` also goes down.
    #[test]
    fn longer_overlapping_combination_preempts_a_shorter_active_one() {
        let (a, a_sink) = key_combination(10, &[]); // trigger == its only element, ABS_X stand-in
        let (b, b_sink) = key_combination(11, &[10]); // ABS_X, BTN_A stand-in
        let (c, c_sink) = key_combination(12, &[10, 11]); // ABS_X, BTN_A, BTN_B stand-in
        let group = vec![c.clone(), b.clone(), a.clone()];

        let abs_x_key = HierarchyHandler::new(
            vec![
                (c.clone() as Arc<dyn InputEventHandler>, c.clone()),
                (b.clone() as Arc<dyn InputEventHandler>, b.clone()),
                (a.clone() as Arc<dyn InputEventHandler>, a.clone()),
            ],
            group.clone(),
        );
        let btn_a_key = HierarchyHandler::new(
            vec![(c.clone() as Arc<dyn InputEventHandler>, c.clone()), (b.clone() as Arc<dyn InputEventHandler>, b.clone())],
            group.clone(),
        );
        let btn_b_key = HierarchyHandler::new(vec![(c.clone() as Arc<dyn InputEventHandler>, c.clone())], group.clone());

        // BTN_A down: neither b nor c is fully satisfied yet.
        btn_a_key.notify(&InputEvent::new(EV_KEY, 11, 1, DeviceId(0)));
        assert!(a_sink.history().is_empty());
        assert!(b_sink.history().is_empty());
        assert!(c_sink.history().is_empty());

        // ABS_X down: b wins (longer than a), a never fires.
        abs_x_key.notify(&InputEvent::new(EV_KEY, 10, 1, DeviceId(0)));
        assert_eq!(b_sink.history(), vec![(EV_KEY, 99, 1)]);
        assert!(a_sink.history().is_empty());

        // BTN_B down: c activates and preempts b.
        btn_b_key.notify(&InputEvent::new(EV_KEY, 12, 1, DeviceId(0)));
        assert_eq!(c_sink.history(), vec![(EV_KEY, 99, 1)]);
        assert_eq!(b_sink.history(), vec![(EV_KEY, 99, 1), (EV_KEY, 99, 0)]);
        assert!(a_sink.history().is_empty());

        // ABS_X up: c releases; b was already released, a never fired.
        abs_x_key.notify(&InputEvent::new(EV_KEY, 10, 0, DeviceId(0)));
        assert_eq!(c_sink.history(), vec![(EV_KEY, 99, 1), (EV_KEY, 99, 0)]);
        assert_eq!(b_sink.history(), vec![(EV_KEY, 99, 1), (EV_KEY, 99, 0)]);
        assert!(a_sink.history().is_empty());
    }
}
