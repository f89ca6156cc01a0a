//! Per-logical-device supervisor (spec.md §4.9/§7): grabs every devnode
//! of a logical device exclusively, builds one forward sink per devnode,
//! compiles the preset once into a shared `Context`, and spawns one
//! `EventReader` per devnode against it.
//!
//! Grounded on `original_source/inputremapper/injection/injector.py`
//! (`Injector.run`'s grab-with-retry loop and per-device forward-uinput
//! construction) and on the teacher's
//! `platform/linux/evdev/capture.rs` for the "enumerate, open, spawn one
//! reader per device, cooperative stop channel" shape. `DeviceOpener`
//! and `ForwardSinkFactory` play the role the teacher's `find_keyboards`
//! plays, made swappable so this module is testable without a kernel
//! device: `evdev_adapter.rs` is the only concrete implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::device::{Capabilities, SourceDevice};
use crate::error::InjectionError;
use crate::event_reader::{EventReader, EventSource};
use crate::preset::{analog_inputs_consumed, compile, forward_sink_capabilities, CompileEnv, Preset};
use crate::uinput_registry::UInputSink;

/// Opens one devnode exclusively. Implementations own the retry policy's
/// single attempt; `start` owns the retry loop around it.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, path: &Path) -> std::io::Result<(Arc<dyn SourceDevice>, Box<dyn EventSource>)>;
}

/// Creates the forward uinput sink for one grabbed devnode.
pub trait ForwardSinkFactory: Send + Sync {
    fn create(&self, name: &str, capabilities: Capabilities) -> std::io::Result<Arc<dyn UInputSink>>;
}

pub struct InjectorConfig {
    pub grab_retries: u32,
    pub grab_retry_backoff: Duration,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        InjectorConfig {
            grab_retries: 3,
            grab_retry_backoff: Duration::from_millis(100),
        }
    }
}

/// A running logical-device injection: the compiled handler graph plus
/// the means to stop every reader and release everything it is holding.
pub struct RunningInjection {
    pub context: Context,
    stop: tokio::sync::watch::Sender<bool>,
    readers: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningInjection {
    /// Signals every `EventReader` to stop and waits for them to finish
    /// releasing their handlers (spec.md §7: `Context::reset` is
    /// idempotent and always safe to call on shutdown).
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        for reader in self.readers.drain(..) {
            if let Err(err) = reader.await {
                log::warn!("injector: event reader task panicked: {err}");
            }
        }
    }
}

/// Grabs every devnode in `devnodes`, retrying each up to
/// `config.grab_retries` times before giving up on it. Returns
/// `InjectionError::NoGrab` only if *every* devnode failed — a logical
/// device missing one of several devnodes still runs on the rest.
pub async fn start(
    devnodes: &[PathBuf],
    preset: &Preset,
    env: &CompileEnv<'_>,
    opener: &dyn DeviceOpener,
    sink_factory: &dyn ForwardSinkFactory,
    config: &InjectorConfig,
) -> Result<RunningInjection, InjectionError> {
    let mut opened = Vec::new();
    for path in devnodes {
        match grab_with_retry(opener, path, config).await {
            Ok(pair) => opened.push(pair),
            Err(err) => log::error!("injector: {err}"),
        }
    }
    if opened.is_empty() {
        return Err(InjectionError::NoGrab);
    }

    // Percent-trigger axis mappings need the grabbed devices' real
    // `input_absinfo`, not whatever `env.absinfo` was built with before any
    // device was open. Compile against a merged view: each grabbed device's
    // own `absinfo`, falling back to `env.absinfo` for a code none of them
    // report (e.g. a mapping meant for a device this logical device doesn't
    // include yet).
    let devices: Vec<Arc<dyn SourceDevice>> = opened.iter().map(|(device, _)| device.clone()).collect();
    let merged_absinfo = |code: u16| devices.iter().find_map(|device| device.absinfo(code)).or_else(|| (env.absinfo)(code));
    let compile_env = CompileEnv {
        layout: env.layout,
        sinks: env.sinks,
        absinfo: &merged_absinfo,
        store: env.store.clone(),
        leds: env.leds.clone(),
        release_timeout_default: env.release_timeout_default,
    };

    let compiled = compile(preset, &compile_env);
    for err in &compiled.errors {
        log::warn!("injector: mapping rejected: {err}");
    }

    let abs_consumed = analog_inputs_consumed(preset);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let mut readers = Vec::with_capacity(opened.len());

    for (device, source) in opened {
        let caps = forward_sink_capabilities(device.capabilities(), &abs_consumed);
        let sink_name = format!("forward-{}", device.id());
        let sink = sink_factory
            .create(&sink_name, caps)
            .map_err(|source| InjectionError::SinkCreateFailed { name: sink_name.clone(), source })?;
        compiled.context.register_forward_sink(device.id(), sink.clone());

        let reader = EventReader::new(source, device.id(), sink, compiled.context.clone(), stop_rx.clone());
        readers.push(tokio::spawn(reader.run()));
    }

    log::info!("injector: {} devnode(s) active", readers.len());
    Ok(RunningInjection {
        context: compiled.context,
        stop: stop_tx,
        readers,
    })
}

async fn grab_with_retry(
    opener: &dyn DeviceOpener,
    path: &Path,
    config: &InjectorConfig,
) -> Result<(Arc<dyn SourceDevice>, Box<dyn EventSource>), InjectionError> {
    let mut last_err = None;
    for attempt in 0..=config.grab_retries {
        match opener.open(path) {
            Ok(pair) => return Ok(pair),
            Err(source) => {
                log::warn!("injector: grab attempt {attempt} on {} failed: {source}", path.display());
                last_err = Some(source);
                if attempt < config.grab_retries {
                    tokio::time::sleep(config.grab_retry_backoff).await;
                }
            }
        }
    }
    Err(InjectionError::GrabFailed {
        path: path.display().to_string(),
        source: last_err.expect("at least one attempt was made"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AbsInfo, FakeSourceDevice};
    use crate::event::{DeviceId, InputEvent, EV_KEY};
    use crate::keyboard_layout::KeyboardLayout;
    use crate::uinput_registry::{FakeUInputSink, UInputRegistry};
    use crate::variable_store::VariableStore;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ChannelSource {
        rx: mpsc::Receiver<InputEvent>,
    }

    impl EventSource for ChannelSource {
        fn recv(&mut self) -> BoxFuture<'_, std::io::Result<InputEvent>> {
            Box::pin(async move {
                self.rx
                    .recv()
                    .await
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed"))
            })
        }
    }

    struct AlwaysFailsOpener;
    impl DeviceOpener for AlwaysFailsOpener {
        fn open(&self, path: &Path) -> std::io::Result<(Arc<dyn SourceDevice>, Box<dyn EventSource>)> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, format!("cannot grab {}", path.display())))
        }
    }

    struct SucceedsOnceOpener {
        rx: Mutex<Option<mpsc::Receiver<InputEvent>>>,
        device_id: DeviceId,
        attempts: AtomicU32,
    }

    impl DeviceOpener for SucceedsOnceOpener {
        fn open(&self, _path: &Path) -> std::io::Result<(Arc<dyn SourceDevice>, Box<dyn EventSource>)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let rx = self.rx.lock().unwrap().take().expect("opened twice");
            let mut device = FakeSourceDevice::new("kbd0");
            device.id = self.device_id;
            device.capabilities.insert_key(30);
            Ok((Arc::new(device), Box::new(ChannelSource { rx }) as Box<dyn EventSource>))
        }
    }

    struct FakeForwardSinkFactory;
    impl ForwardSinkFactory for FakeForwardSinkFactory {
        fn create(&self, name: &str, capabilities: Capabilities) -> std::io::Result<Arc<dyn UInputSink>> {
            Ok(FakeUInputSink::new(name, capabilities) as Arc<dyn UInputSink>)
        }
    }

    fn base_env<'a>(sinks: &'a UInputRegistry, layout: &'a KeyboardLayout) -> CompileEnv<'a> {
        CompileEnv {
            layout,
            sinks,
            absinfo: &|_code| Some(AbsInfo::new(-255, 255)),
            store: VariableStore::start(Duration::from_millis(20)),
            leds: Arc::new(Vec::new),
            release_timeout_default: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn every_devnode_failing_reports_no_grab() {
        let layout = KeyboardLayout::new();
        let sinks = UInputRegistry::new();
        let env = base_env(&sinks, &layout);
        let preset = Preset::default();
        let opener = AlwaysFailsOpener;
        let factory = FakeForwardSinkFactory;
        let config = InjectorConfig {
            grab_retries: 1,
            grab_retry_backoff: Duration::from_millis(1),
        };

        let result = start(&[PathBuf::from("/dev/input/event0")], &preset, &env, &opener, &factory, &config).await;
        assert!(matches!(result, Err(InjectionError::NoGrab)));
    }

    #[tokio::test]
    async fn successful_grab_wires_a_reader_that_forwards_events() {
        let layout = KeyboardLayout::new();
        let sinks = UInputRegistry::new();
        let mut caps = Capabilities::default();
        caps.insert_key(48);
        sinks.register(FakeUInputSink::new("keyboard", caps));
        let env = base_env(&sinks, &layout);

        let (event_tx, event_rx) = mpsc::channel(8);
        let device_id = DeviceId(42);
        let opener = SucceedsOnceOpener {
            rx: Mutex::new(Some(event_rx)),
            device_id,
            attempts: AtomicU32::new(0),
        };
        let factory = FakeForwardSinkFactory;
        let config = InjectorConfig::default();
        let preset = Preset::default();

        let running = start(&[PathBuf::from("/dev/input/event3")], &preset, &env, &opener, &factory, &config)
            .await
            .expect("grab should succeed");

        event_tx.send(InputEvent::new(EV_KEY, 30, 1, DeviceId(0))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let forward_sink = running.context.get_forward_sink(device_id).expect("forward sink registered");
        assert!(forward_sink.can_emit(EV_KEY, 30));

        drop(event_tx);
        running.shutdown().await;
    }

    struct AbsReportingOpener {
        rx: Mutex<Option<mpsc::Receiver<InputEvent>>>,
        device_id: DeviceId,
    }

    impl DeviceOpener for AbsReportingOpener {
        fn open(&self, _path: &Path) -> std::io::Result<(Arc<dyn SourceDevice>, Box<dyn EventSource>)> {
            let rx = self.rx.lock().unwrap().take().expect("opened twice");
            let mut device = FakeSourceDevice::new("joystick0");
            device.id = self.device_id;
            device.capabilities.insert_abs(0, AbsInfo::new(-255, 255)); // ABS_X
            Ok((Arc::new(device), Box::new(ChannelSource { rx }) as Box<dyn EventSource>))
        }
    }

    /// `env.absinfo` alone (as `main.rs` builds it before any devnode is
    /// open) reports nothing; `start` must still pick up the grabbed
    /// device's own absinfo so an abs->rel mapping compiles to a real
    /// transducer instead of silently degrading into a digital
    /// combination with a fabricated default range.
    #[tokio::test]
    async fn grabbed_devices_absinfo_reaches_the_compiled_transducer() {
        use crate::event::{InputConfig, EV_ABS, EV_REL};
        use crate::mapping::OutputSelector;

        let layout = KeyboardLayout::new();
        let sinks = UInputRegistry::new();
        let mut caps = Capabilities::default();
        caps.insert_rel(0); // REL_X
        let mouse = FakeUInputSink::new("mouse", caps);
        sinks.register(mouse.clone());

        let env = CompileEnv {
            layout: &layout,
            sinks: &sinks,
            absinfo: &|_code| None,
            store: VariableStore::start(Duration::from_millis(20)),
            leds: Arc::new(Vec::new),
            release_timeout_default: Duration::from_millis(50),
        };

        let mapping = crate::mapping::Mapping {
            input_combination: vec![InputConfig::analog(EV_ABS, 0)],
            target_uinput: "mouse".to_string(),
            output: OutputSelector::Code { output_type: EV_REL, output_code: 0 },
            deadzone: 0.1,
            gain: 1.0,
            expo: 0.0,
            rel_rate: 50,
            rel_speed: 200,
            rel_to_abs_input_cutoff: 1,
            release_timeout: 0.05,
            macro_key_sleep_ms: 1,
            rel_wheel_speed: 0,
            rel_wheel_hi_res_speed: 0,
        };
        let preset = Preset { mappings: vec![mapping] };

        let (event_tx, event_rx) = mpsc::channel(8);
        let device_id = DeviceId(7);
        let opener = AbsReportingOpener {
            rx: Mutex::new(Some(event_rx)),
            device_id,
        };
        let factory = FakeForwardSinkFactory;
        let config = InjectorConfig::default();

        let running = start(&[PathBuf::from("/dev/input/event7")], &preset, &env, &opener, &factory, &config)
            .await
            .expect("grab should succeed");
        assert!(running.context.handlers_for((EV_ABS, 0)).len() == 1, "abs mapping failed to compile against the grabbed device's absinfo");

        event_tx.send(InputEvent::new(EV_ABS, 0, -255, DeviceId(0))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(
            mouse.history().iter().any(|&(t, c, v)| t == EV_REL && c == 0 && v < 0),
            "abs->rel transducer never ticked; absinfo must not have reached compile"
        );

        drop(event_tx);
        running.shutdown().await;
    }
}
