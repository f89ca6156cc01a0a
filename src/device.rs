//! External device interfaces (spec.md §6): the abstract surface the core
//! consumes from a source evdev device, decoupled from the `evdev` crate
//! itself so the handler graph and transducers can be unit tested without
//! a real `/dev/input` node. `evdev_adapter.rs` is the only module that
//! bridges this trait to the real kernel devices.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::event::DeviceId;

/// Per-axis metadata, matching the kernel's `struct input_absinfo`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsInfo {
    pub value: i32,
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

impl AbsInfo {
    pub fn new(min: i32, max: i32) -> Self {
        AbsInfo {
            value: 0,
            min,
            max,
            fuzz: 0,
            flat: 0,
            resolution: 0,
        }
    }

    /// A hat-switch axis is reported pre-scaled to `[-1, 1]`.
    pub fn is_hat_switch(&self) -> bool {
        self.min == -1 && self.max == 1
    }
}

/// The set of `(type, code)` pairs (plus abs axis info) a device or sink
/// supports.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub keys: HashSet<u16>,
    pub rel_axes: HashSet<u16>,
    pub abs_axes: HashSet<u16>,
    pub abs_info: std::collections::HashMap<u16, AbsInfo>,
    pub leds: HashSet<u16>,
    pub has_syn: bool,
    pub has_ff: bool,
    pub has_msc: bool,
}

impl Capabilities {
    pub fn can_emit(&self, type_: u16, code: u16) -> bool {
        use crate::event::{EV_ABS, EV_KEY, EV_REL};
        match type_ {
            EV_KEY => self.keys.contains(&code),
            EV_REL => self.rel_axes.contains(&code),
            EV_ABS => self.abs_axes.contains(&code),
            _ => false,
        }
    }

    pub fn insert_key(&mut self, code: u16) {
        self.keys.insert(code);
    }

    pub fn insert_rel(&mut self, code: u16) {
        self.rel_axes.insert(code);
    }

    pub fn insert_abs(&mut self, code: u16, info: AbsInfo) {
        self.abs_axes.insert(code);
        self.abs_info.insert(code, info);
    }

    /// Union of `self` and `other`, used when a sink is shared by multiple
    /// presets at daemon start.
    pub fn union(&self, other: &Capabilities) -> Capabilities {
        let mut out = self.clone();
        out.keys.extend(other.keys.iter().copied());
        out.rel_axes.extend(other.rel_axes.iter().copied());
        out.abs_axes.extend(other.abs_axes.iter().copied());
        for (code, info) in &other.abs_info {
            out.abs_info.entry(*code).or_insert(*info);
        }
        out.leds.extend(other.leds.iter().copied());
        out.has_syn |= other.has_syn;
        out.has_ff |= other.has_ff;
        out.has_msc |= other.has_msc;
        out
    }

    /// Forward-sink capabilities per spec.md §3: source capabilities
    /// minus EV_SYN/EV_FF, minus EV_ABS codes the preset consumes via a
    /// handler (so the OS doesn't classify the synthetic device as a
    /// joystick).
    pub fn forward_sink_from(source: &Capabilities, abs_consumed: &HashSet<u16>) -> Capabilities {
        let mut out = source.clone();
        out.has_syn = false;
        out.has_ff = false;
        for code in abs_consumed {
            out.abs_axes.remove(code);
            out.abs_info.remove(code);
        }
        out
    }
}

/// Read-only metadata surface a handler needs from the device an event
/// originated on (absinfo for percent-trigger computation, LED state for
/// `if_capslock`/`if_numlock`).
pub trait SourceDevice: Send + Sync {
    fn id(&self) -> DeviceId;
    fn path(&self) -> &Path;
    fn capabilities(&self) -> &Capabilities;
    fn absinfo(&self, code: u16) -> Option<AbsInfo>;
    fn leds(&self) -> Vec<u16>;
}

/// A minimal in-memory `SourceDevice` used by tests and, optionally, by
/// presets whose inputs are entirely digital (no absinfo needed).
pub struct FakeSourceDevice {
    pub id: DeviceId,
    pub path: PathBuf,
    pub capabilities: Capabilities,
    pub leds: Vec<u16>,
}

impl FakeSourceDevice {
    pub fn new(name: &str) -> Self {
        FakeSourceDevice {
            id: DeviceId::from_path(name),
            path: PathBuf::from(name),
            capabilities: Capabilities::default(),
            leds: Vec::new(),
        }
    }
}

impl SourceDevice for FakeSourceDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn absinfo(&self, code: u16) -> Option<AbsInfo> {
        self.capabilities.abs_info.get(&code).copied()
    }

    fn leds(&self) -> Vec<u16> {
        self.leds.clone()
    }
}
