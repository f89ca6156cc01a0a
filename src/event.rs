//! Core event and combination types (spec.md §3).
//!
//! These are intentionally decoupled from the `evdev` crate's own event
//! type: the pipeline, handler graph and macro engine are pure logic over
//! this model, and only `evdev_adapter.rs` translates to and from the
//! real kernel wire format. Type/code constants below match
//! `linux/input-event-codes.h` (same values the teacher's
//! `platform/linux/keycodes.rs` hardcodes for its own key table).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_LED: u16 = 0x11;

// EV_REL axis codes used directly by the macro engine's mouse/wheel
// tasks (linux/input-event-codes.h).
pub const EV_REL_X: u16 = 0x00;
pub const EV_REL_Y: u16 = 0x01;
pub const REL_WHEEL: u16 = 0x08;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_WHEEL_HI_RES: u16 = 0x0b;
pub const REL_HWHEEL_HI_RES: u16 = 0x0c;

pub const LED_NUML: u16 = 0x00;
pub const LED_CAPSL: u16 = 0x01;

/// Sentinel `analog_threshold` marking an `InputConfig` as analog
/// (drives an axis, not a button edge).
pub const USE_AS_ANALOG_VALUE: i32 = i32::MIN;

/// Stable identifier for a source devnode, used to route buffered events
/// (see `mod_tap`) back to the correct forward sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl DeviceId {
    pub fn from_path(path: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        DeviceId(hasher.finish())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A single evdev-shaped event flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub type_: u16,
    pub code: u16,
    pub value: i32,
    pub timestamp_usec: u64,
    pub origin_hash: DeviceId,
}

impl InputEvent {
    pub fn new(type_: u16, code: u16, value: i32, origin_hash: DeviceId) -> Self {
        InputEvent {
            type_,
            code,
            value,
            timestamp_usec: now_usec(),
            origin_hash,
        }
    }

    /// `(type, code)` — the key used to index the handler graph.
    pub fn type_and_code(&self) -> (u16, u16) {
        (self.type_, self.code)
    }

    pub fn event_tuple(&self) -> (u16, u16, i32) {
        (self.type_, self.code, self.value)
    }

    pub fn is_key_down(&self) -> bool {
        self.type_ == EV_KEY && self.value == 1
    }

    pub fn is_key_up(&self) -> bool {
        self.type_ == EV_KEY && self.value == 0
    }

    /// A copy with `value` replaced; timestamp and origin are preserved.
    pub fn with_value(&self, value: i32) -> Self {
        InputEvent { value, ..*self }
    }
}

fn now_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// A single input specifier within a combination (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    pub type_: u16,
    pub code: u16,
    /// For EV_KEY: 1 means "key down". For EV_ABS: percent of axis range
    /// in [-100,100], sign is direction. For EV_REL: raw threshold, sign
    /// is direction. `USE_AS_ANALOG_VALUE` marks the input as analog.
    pub analog_threshold: i32,
    pub origin_hash: Option<DeviceId>,
}

impl InputConfig {
    pub fn digital(type_: u16, code: u16) -> Self {
        InputConfig {
            type_,
            code,
            analog_threshold: 1,
            origin_hash: None,
        }
    }

    pub fn analog(type_: u16, code: u16) -> Self {
        InputConfig {
            type_,
            code,
            analog_threshold: USE_AS_ANALOG_VALUE,
            origin_hash: None,
        }
    }

    pub fn percent(type_: u16, code: u16, percent: i32) -> Self {
        InputConfig {
            type_,
            code,
            analog_threshold: percent,
            origin_hash: None,
        }
    }

    pub fn is_analog(&self) -> bool {
        self.analog_threshold == USE_AS_ANALOG_VALUE
    }

    pub fn type_and_code(&self) -> (u16, u16) {
        (self.type_, self.code)
    }

    /// Total order used to canonicalize non-trigger elements within a
    /// combination (SPEC_FULL.md Open Question #1): lexicographic over
    /// `(type, code, threshold-as-stable-bits)`.
    fn order_key(&self) -> (u16, u16, i32) {
        (self.type_, self.code, self.analog_threshold)
    }
}

/// Ordered sequence of `InputConfig`s; the last element is the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputCombination {
    elements: Vec<InputConfig>,
}

impl InputCombination {
    pub fn new(elements: Vec<InputConfig>) -> Self {
        assert!(!elements.is_empty(), "a combination needs at least one element");
        InputCombination { elements }
    }

    pub fn single(config: InputConfig) -> Self {
        InputCombination::new(vec![config])
    }

    pub fn elements(&self) -> &[InputConfig] {
        &self.elements
    }

    pub fn trigger(&self) -> &InputConfig {
        self.elements.last().expect("non-empty by construction")
    }

    pub fn non_trigger(&self) -> &[InputConfig] {
        &self.elements[..self.elements.len() - 1]
    }

    pub fn analog_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_analog()).count()
    }

    /// Canonical key used to index the compiled handler graph: trigger
    /// last, non-trigger elements sorted by `order_key` (spec.md §4.9).
    pub fn canonical_key(&self) -> CanonicalCombinationKey {
        let mut non_trigger: Vec<(u16, u16, i32)> =
            self.non_trigger().iter().map(InputConfig::order_key).collect();
        non_trigger.sort_unstable();
        CanonicalCombinationKey {
            non_trigger,
            trigger: self.trigger().order_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalCombinationKey {
    non_trigger: Vec<(u16, u16, i32)>,
    trigger: (u16, u16, i32),
}
