//! Per-injection shared state (spec.md §4.4): the compiled handler graph,
//! the broadcast listener set, and the forward-sink lookup used by
//! `mod_tap` to replay buffered events on the originating device's
//! forward uinput.
//!
//! Grounded on `original_source/inputremapper/injection/context.py`: one
//! `Context` per logical device, constructed once by the preset compiler
//! and shared by every `EventReader`/`Task` that belongs to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{DeviceId, InputEvent};
use crate::handler::InputEventHandler;
use crate::uinput_registry::UInputSink;

/// Returns `true` if the event should be hidden from handlers/forwarding
/// (spec.md §4.7: `if_single`, `mod_tap`).
pub type Listener = Arc<dyn Fn(&InputEvent) -> bool + Send + Sync>;

/// The set of broadcast listeners a running macro task can register
/// into and remove itself from. Dispatch order is unspecified (the
/// source uses an unordered `set`); at most one listener is expected to
/// meaningfully act on any given event in practice.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<u64, Listener>>>,
    next_id: Arc<AtomicU64>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        ListenerRegistry::default()
    }

    pub fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().expect("listener registry poisoned").insert(id, listener);
        id
    }

    pub fn remove(&self, id: u64) {
        self.inner.lock().expect("listener registry poisoned").remove(&id);
    }

    /// Fans `event` out to every listener. Returns `true` if at least one
    /// consumed it (spec.md §4.2 step 4: listeners run before handlers).
    pub fn dispatch(&self, event: &InputEvent) -> bool {
        let listeners: Vec<Listener> = self
            .inner
            .lock()
            .expect("listener registry poisoned")
            .values()
            .cloned()
            .collect();
        let mut consumed = false;
        for listener in listeners {
            if listener(event) {
                consumed = true;
            }
        }
        consumed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("listener registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the compiled handler graph for one logical device, the listener
/// set, and the forward sinks keyed by source `DeviceId` (one per
/// grabbed source devnode, used to route unconsumed/replayed events).
#[derive(Clone, Default)]
pub struct Context {
    handlers: Arc<Mutex<HashMap<(u16, u16), Vec<Arc<dyn InputEventHandler>>>>>,
    pub listeners: ListenerRegistry,
    forward_sinks: Arc<Mutex<HashMap<DeviceId, Arc<dyn UInputSink>>>>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn register_handler(&self, type_and_code: (u16, u16), handler: Arc<dyn InputEventHandler>) {
        self.handlers
            .lock()
            .expect("context handlers poisoned")
            .entry(type_and_code)
            .or_default()
            .push(handler);
    }

    pub fn handlers_for(&self, type_and_code: (u16, u16)) -> Vec<Arc<dyn InputEventHandler>> {
        self.handlers
            .lock()
            .expect("context handlers poisoned")
            .get(&type_and_code)
            .cloned()
            .unwrap_or_default()
    }

    pub fn register_forward_sink(&self, source: DeviceId, sink: Arc<dyn UInputSink>) {
        self.forward_sinks
            .lock()
            .expect("context forward sinks poisoned")
            .insert(source, sink);
    }

    pub fn get_forward_sink(&self, source: DeviceId) -> Option<Arc<dyn UInputSink>> {
        self.forward_sinks
            .lock()
            .expect("context forward sinks poisoned")
            .get(&source)
            .cloned()
    }

    /// Writes to the forward sink registered for `source`, falling back
    /// to broadcasting to every registered forward sink of this context
    /// when the origin is unknown (a logical device with more than one
    /// grabbed devnode is the only case that reaches the fallback).
    pub fn forward_write(&self, source: Option<DeviceId>, type_: u16, code: u16, value: i32) {
        let sinks = self.forward_sinks.lock().expect("context forward sinks poisoned");
        let targets: Vec<Arc<dyn UInputSink>> = match source.and_then(|id| sinks.get(&id).cloned()) {
            Some(sink) => vec![sink],
            None => sinks.values().cloned().collect(),
        };
        drop(sinks);
        for sink in targets {
            if let Err(err) = crate::uinput_registry::emit(sink.as_ref(), type_, code, value) {
                log::warn!("forward write failed on {}: {err}", sink.name());
            }
        }
    }

    /// Releases all outputs: asks every registered handler to reset
    /// (spec.md §4.9 cancellation semantics), which in turn cancels rate
    /// loops/running macros and emits release for anything still held.
    pub fn reset(&self) {
        let handlers: Vec<Arc<dyn InputEventHandler>> = self
            .handlers
            .lock()
            .expect("context handlers poisoned")
            .values()
            .flatten()
            .cloned()
            .collect();
        for handler in handlers {
            handler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_dispatch_reports_consumption() {
        let registry = ListenerRegistry::new();
        let id = registry.add(Arc::new(|_event: &InputEvent| true));
        let event = InputEvent::new(crate::event::EV_KEY, 1, 1, DeviceId(0));
        assert!(registry.dispatch(&event));
        registry.remove(id);
        assert!(!registry.dispatch(&event));
    }

    #[test]
    fn forward_sink_lookup_round_trips() {
        use crate::device::Capabilities;
        use crate::uinput_registry::FakeUInputSink;

        let ctx = Context::new();
        let device = DeviceId::from_path("/dev/input/event3");
        let sink = FakeUInputSink::new("kbd", Capabilities::default());
        ctx.register_forward_sink(device, sink.clone());
        assert!(Arc::ptr_eq(&ctx.get_forward_sink(device).unwrap(), &(sink as Arc<dyn UInputSink>)));
    }
}
