//! The one module that bridges `SourceDevice`/`UInputSink`/`EventSource`
//! to the real `evdev` crate (spec.md §6). Everything else in this
//! crate is pure logic over `crate::event`/`crate::device`; this module
//! is the only place that imports `evdev` types.
//!
//! Grounded on the teacher's `platform/linux/evdev/capture.rs`
//! (device enumeration, `into_event_stream`, `InputEventKind` matching)
//! for the read side, and on `other_examples`' `evdev`/`evdevil`
//! uinput-builder usage for the write side.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use evdev::uinput::VirtualDeviceBuilder;
use evdev::{AbsoluteAxisType, AttributeSet, Device, EventType, InputEventKind, Key, RelativeAxisType};
use futures::future::BoxFuture;

use crate::device::{AbsInfo, Capabilities, SourceDevice};
use crate::event::{DeviceId, InputEvent, EV_ABS, EV_KEY, EV_LED, EV_REL};
use crate::event_reader::EventSource;
use crate::injector::{DeviceOpener, ForwardSinkFactory};
use crate::uinput_registry::UInputSink;

fn capabilities_of(device: &Device) -> Capabilities {
    let mut caps = Capabilities {
        has_syn: true,
        has_ff: device.supported_ff().is_some(),
        // EV_MSC is scan-code noise only; the forward sink never needs
        // to advertise it separately from EV_SYN/EV_KEY.
        has_msc: false,
        ..Capabilities::default()
    };
    if let Some(keys) = device.supported_keys() {
        for key in keys.iter() {
            caps.insert_key(key.code());
        }
    }
    if let Some(axes) = device.supported_relative_axes() {
        for axis in axes.iter() {
            caps.insert_rel(axis.0);
        }
    }
    if let Some(axes) = device.supported_absolute_axes() {
        if let Ok(states) = device.get_abs_state() {
            for axis in axes.iter() {
                let raw = states[axis.0 as usize];
                caps.insert_abs(
                    axis.0,
                    AbsInfo {
                        value: raw.value,
                        min: raw.minimum,
                        max: raw.maximum,
                        fuzz: raw.fuzz,
                        flat: raw.flat,
                        resolution: raw.resolution,
                    },
                );
            }
        }
    }
    if let Some(leds) = device.supported_leds() {
        for led in leds.iter() {
            caps.leds.insert(led.0);
        }
    }
    caps
}

/// Cached metadata snapshot of a grabbed devnode; reading itself goes
/// through `EvdevEventSource`; this only answers `SourceDevice`'s
/// metadata queries, the same split `FakeSourceDevice` uses for tests.
pub struct EvdevSourceDevice {
    id: DeviceId,
    path: PathBuf,
    capabilities: Capabilities,
    leds: Vec<u16>,
}

impl SourceDevice for EvdevSourceDevice {
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

/// Reads from a grabbed device's async event stream, translating each
/// `evdev::InputEvent` into this crate's `InputEvent` model.
pub struct EvdevEventSource {
    stream: evdev::EventStream,
    origin: DeviceId,
}

impl EventSource for EvdevEventSource {
    fn recv(&mut self) -> BoxFuture<'_, std::io::Result<InputEvent>> {
        Box::pin(async move {
            let raw = self.stream.next_event().await?;
            Ok(translate(raw, self.origin))
        })
    }
}

fn translate(raw: evdev::InputEvent, origin: DeviceId) -> InputEvent {
    let (type_, code) = match raw.kind() {
        InputEventKind::Key(key) => (EV_KEY, key.code()),
        InputEventKind::RelAxis(axis) => (EV_REL, axis.0),
        InputEventKind::AbsAxis(axis) => (EV_ABS, axis.0),
        InputEventKind::Led(led) => (EV_LED, led.0),
        _ => (raw.event_type().0, raw.code()),
    };
    InputEvent {
        type_,
        code,
        value: raw.value(),
        timestamp_usec: raw
            .timestamp()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0),
        origin_hash: origin,
    }
}

/// Opens, exclusively grabs, and snapshots the capabilities of a real
/// evdev devnode (`injector::DeviceOpener`).
pub struct EvdevDeviceOpener;

impl DeviceOpener for EvdevDeviceOpener {
    fn open(&self, path: &Path) -> std::io::Result<(Arc<dyn SourceDevice>, Box<dyn EventSource>)> {
        let mut device = Device::open(path)?;
        let id = DeviceId::from_path(&path.display().to_string());
        let capabilities = capabilities_of(&device);
        let leds = capabilities.leds.iter().copied().collect();
        device.grab()?;

        let source = EvdevSourceDevice {
            id,
            path: path.to_path_buf(),
            capabilities,
            leds,
        };
        let stream = device.into_event_stream()?;
        let event_source = EvdevEventSource { stream, origin: id };
        Ok((Arc::new(source), Box::new(event_source)))
    }
}

/// Enumerates every evdev devnode currently present under `/dev/input`.
pub fn enumerate_devnodes() -> Vec<PathBuf> {
    evdev::enumerate().map(|(path, _device)| path).collect()
}

/// A uinput-backed sink. `write` buffers into `pending`; `syn` appends
/// `SYN_REPORT` and flushes the buffer in one `emit` call, matching how
/// `UInputSink::write`/`syn` are documented to pair (spec.md §6).
pub struct EvdevUInputSink {
    name: String,
    capabilities: Capabilities,
    device: Mutex<evdev::uinput::VirtualDevice>,
    pending: Mutex<Vec<evdev::InputEvent>>,
}

impl EvdevUInputSink {
    pub fn create(name: &str, capabilities: Capabilities) -> std::io::Result<Arc<Self>> {
        let mut builder = VirtualDeviceBuilder::new()?.name(name);

        if !capabilities.keys.is_empty() {
            let mut keys = AttributeSet::<Key>::new();
            for code in &capabilities.keys {
                keys.insert(Key(*code));
            }
            builder = builder.with_keys(&keys)?;
        }
        if !capabilities.rel_axes.is_empty() {
            let mut axes = AttributeSet::<RelativeAxisType>::new();
            for code in &capabilities.rel_axes {
                axes.insert(RelativeAxisType(*code));
            }
            builder = builder.with_relative_axes(&axes)?;
        }
        for code in &capabilities.abs_axes {
            if let Some(info) = capabilities.abs_info.get(code) {
                let setup = evdev::UinputAbsSetup::new(
                    AbsoluteAxisType(*code),
                    evdev::AbsInfo::new(info.value, info.min, info.max, info.fuzz, info.flat, info.resolution),
                );
                builder = builder.with_absolute_axis(&setup)?;
            }
        }

        let device = builder.build()?;
        Ok(Arc::new(EvdevUInputSink {
            name: name.to_string(),
            capabilities,
            device: Mutex::new(device),
            pending: Mutex::new(Vec::new()),
        }))
    }
}

impl UInputSink for EvdevUInputSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn write(&self, type_: u16, code: u16, value: i32) -> std::io::Result<()> {
        let event = evdev::InputEvent::new(EventType(type_), code, value);
        self.pending.lock().expect("uinput sink mutex poisoned").push(event);
        Ok(())
    }

    fn syn(&self) -> std::io::Result<()> {
        let mut pending = self.pending.lock().expect("uinput sink mutex poisoned");
        if pending.is_empty() {
            return Ok(());
        }
        pending.push(evdev::InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
        let device = self.device.lock().expect("uinput sink mutex poisoned");
        let result = device.emit(&pending);
        pending.clear();
        result
    }
}

/// Creates real uinput forward sinks for `injector::start`.
pub struct EvdevForwardSinkFactory;

impl ForwardSinkFactory for EvdevForwardSinkFactory {
    fn create(&self, name: &str, capabilities: Capabilities) -> std::io::Result<Arc<dyn UInputSink>> {
        EvdevUInputSink::create(name, capabilities).map(|sink| sink as Arc<dyn UInputSink>)
    }
}
