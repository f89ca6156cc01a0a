//! inputremapd -- per-device evdev input remapper daemon.
//!
//! Entry point: loads config and a preset, grabs the configured devnodes,
//! registers the panic watchdog, and runs until `Ctrl+C` or the panic
//! codeword fires. Device discovery/grouping into logical devices is an
//! external collaborator's job (spec.md §1's Non-goals); absent a
//! command-line devnode list this treats every enumerated devnode as one
//! logical device, which is enough for a single-keyboard setup and is
//! the simplification a fuller daemon's config layer would replace.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use inputremapd::config::DaemonConfig;
use inputremapd::evdev_adapter::{enumerate_devnodes, EvdevDeviceOpener, EvdevForwardSinkFactory, EvdevUInputSink};
use inputremapd::injector::{self, InjectorConfig};
use inputremapd::keyboard_layout::KeyboardLayout;
use inputremapd::panic_watchdog::PanicWatchdog;
use inputremapd::preset::{self, CompileEnv};
use inputremapd::preset_loader;
use inputremapd::uinput_registry::UInputRegistry;
use inputremapd::variable_store::VariableStore;

fn main() {
    env_logger::init();
    log::info!("inputremapd v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let preset_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: inputremapd <preset.json> [config.toml]");
            std::process::exit(2);
        }
    };
    let config_path = args.next().map(PathBuf::from);

    let config = match &config_path {
        Some(path) => DaemonConfig::load(path).unwrap_or_else(|err| {
            log::warn!("config: {err}, falling back to defaults");
            DaemonConfig::default()
        }),
        None => DaemonConfig::default(),
    };

    let preset = match preset_loader::load_from_path(&preset_path) {
        Ok(preset) => preset,
        Err(err) => {
            log::error!("preset_loader: {err}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");
    runtime.block_on(run(preset, config));
}

async fn run(preset: inputremapd::preset::Preset, config: DaemonConfig) {
    let layout = KeyboardLayout::new();
    let sinks = UInputRegistry::new();

    for (name, capabilities) in preset::required_sink_capabilities(&preset, &layout) {
        match EvdevUInputSink::create(&name, capabilities) {
            Ok(sink) => sinks.register(sink),
            Err(err) => {
                log::error!("failed to create uinput sink {name}: {err}");
                std::process::exit(1);
            }
        }
    }

    let store = VariableStore::start(config.variable_store_timeout());
    let devnodes = enumerate_devnodes();
    if devnodes.is_empty() {
        log::error!("no evdev devnodes found under /dev/input");
        std::process::exit(1);
    }

    // `injector::start` merges each grabbed devnode's real `absinfo` in
    // before compiling; this closure only covers a percent-trigger mapping
    // whose axis isn't on any devnode this logical device grabbed.
    let env = CompileEnv {
        layout: &layout,
        sinks: &sinks,
        absinfo: &|_code| None,
        store: store.clone(),
        leds: Arc::new(Vec::new),
        release_timeout_default: Duration::from_millis(50),
    };
    let injector_config = InjectorConfig {
        grab_retries: config.grab_retries,
        grab_retry_backoff: config.grab_retry_backoff(),
    };

    let running = match injector::start(
        &devnodes,
        &preset,
        &env,
        &EvdevDeviceOpener,
        &EvdevForwardSinkFactory,
        &injector_config,
    )
    .await
    {
        Ok(running) => running,
        Err(err) => {
            log::error!("injector: {err}");
            std::process::exit(1);
        }
    };

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    match PanicWatchdog::new(&config.panic_codeword, &layout, stop_tx, config.panic_escalation_interval()) {
        Ok(watchdog) => {
            running.context.listeners.add(Arc::new(watchdog).as_listener());
        }
        Err(ch) => log::warn!("panic_watchdog: codeword character {ch:?} is not in the keyboard layout, watchdog disabled"),
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received ctrl-c, shutting down");
        }
        changed = stop_rx.changed() => {
            if changed.is_ok() && *stop_rx.borrow() {
                log::warn!("panic codeword fired, shutting down");
            }
        }
    }

    running.shutdown().await;
}
