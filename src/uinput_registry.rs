//! Named uinput sink registry (spec.md §2/§6).
//!
//! A sink is a long-lived synthetic output device. The registry answers
//! "can sink S emit (type,code)?" and performs writes + syn barriers. The
//! concrete implementation backed by `/dev/uinput` lives in
//! `evdev_adapter.rs`; this module defines the trait and the in-memory
//! fake used throughout the handler/macro/transducer unit tests, mirroring
//! how the teacher keeps `ActionExecutor` (trait) separate from
//! `LinuxWaylandExecutor` (concrete impl).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::device::Capabilities;

/// A single named output device.
pub trait UInputSink: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> &Capabilities;
    fn can_emit(&self, type_: u16, code: u16) -> bool {
        self.capabilities().can_emit(type_, code)
    }
    /// Writes one event. Implementations are responsible for the
    /// trailing `EV_SYN`/`SYN_REPORT` (see `syn`); callers call `write`
    /// then `syn` once per logical event, as the teacher's
    /// `LinuxWaylandExecutor` paces `notify_keyboard_keycode` calls.
    fn write(&self, type_: u16, code: u16, value: i32) -> std::io::Result<()>;
    fn syn(&self) -> std::io::Result<()>;
}

/// Writes an event followed by a syn barrier; the combination every
/// caller in this crate actually wants.
pub fn emit(sink: &dyn UInputSink, type_: u16, code: u16, value: i32) -> std::io::Result<()> {
    sink.write(type_, code, value)?;
    sink.syn()
}

/// A named set of sinks, keyed by the `target_uinput` string in a
/// `Mapping`.
#[derive(Clone, Default)]
pub struct UInputRegistry {
    sinks: Arc<Mutex<HashMap<String, Arc<dyn UInputSink>>>>,
}

impl UInputRegistry {
    pub fn new() -> Self {
        UInputRegistry::default()
    }

    pub fn register(&self, sink: Arc<dyn UInputSink>) {
        self.sinks
            .lock()
            .expect("uinput registry mutex poisoned")
            .insert(sink.name().to_string(), sink);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UInputSink>> {
        self.sinks
            .lock()
            .expect("uinput registry mutex poisoned")
            .get(name)
            .cloned()
    }

    pub fn can_emit(&self, name: &str, type_: u16, code: u16) -> bool {
        self.get(name).is_some_and(|sink| sink.can_emit(type_, code))
    }

    pub fn write(&self, name: &str, type_: u16, code: u16, value: i32) -> std::io::Result<()> {
        match self.get(name) {
            Some(sink) => emit(sink.as_ref(), type_, code, value),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no uinput sink named {name}"),
            )),
        }
    }
}

/// In-memory sink used by tests: records every `(type, code, value)`
/// written to it instead of touching `/dev/uinput`.
pub struct FakeUInputSink {
    name: String,
    capabilities: Capabilities,
    pub written: Mutex<Vec<(u16, u16, i32)>>,
}

impl FakeUInputSink {
    pub fn new(name: &str, capabilities: Capabilities) -> Arc<Self> {
        Arc::new(FakeUInputSink {
            name: name.to_string(),
            capabilities,
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn history(&self) -> Vec<(u16, u16, i32)> {
        self.written.lock().expect("fake sink mutex poisoned").clone()
    }
}

impl UInputSink for FakeUInputSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn write(&self, type_: u16, code: u16, value: i32) -> std::io::Result<()> {
        self.written
            .lock()
            .expect("fake sink mutex poisoned")
            .push((type_, code, value));
        Ok(())
    }

    fn syn(&self) -> std::io::Result<()> {
        Ok(())
    }
}
