//! Per-device evdev input remapper core (spec.md §1): the event
//! pipeline, the macro engine, and the axis transducers, plus the
//! ambient daemon stack (config, preset loading, the evdev/uinput
//! bridge) that wires them to a running process.

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod event;
pub mod event_reader;
pub mod evdev_adapter;
pub mod handler;
pub mod injector;
pub mod keyboard_layout;
pub mod macro_engine;
pub mod mapping;
pub mod panic_watchdog;
pub mod preset;
pub mod preset_loader;
pub mod transducer;
pub mod uinput_registry;
pub mod variable_store;
