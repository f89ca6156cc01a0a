//! Macro AST and runtime (spec.md §4.7).
//!
//! Grounded on `original_source/inputremapper/injection/macros/macro.py`
//! and `task.py`. The source gives every `Task` its own
//! `asyncio.Event` pair for the trigger and propagates press/release
//! recursively through `child_macros`; since the trigger is always the
//! same physical combination for an entire macro tree, this port instead
//! shares one `TriggerState` through `TaskEnv` for the whole tree
//! (constructed once by the owning `MacroHandler`), which observes the
//! same press/release semantics without per-node event plumbing.

pub mod argument;
pub mod parse;
pub mod task;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::error::MacroError;
use crate::event::{DeviceId, InputEvent};
use crate::keyboard_layout::KeyboardLayout;
use crate::mapping::Mapping;
use crate::variable_store::VariableStore;

pub use crate::context::{Listener, ListenerRegistry};
pub use task::Task;

/// Injects one `(type, code, value)` triple into the macro's target
/// sink. Owned/`Arc`'d so it can cross a `tokio::spawn` boundary.
pub type Callback = Arc<dyn Fn(u16, u16, i32) + Send + Sync>;

/// `if_capslock`/`if_numlock` share one task body in the source
/// (`IfLedTask` base class with `led_code` set by subclass).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedKind {
    NumLock,
    CapsLock,
}

impl LedKind {
    pub fn code(self) -> u16 {
        match self {
            LedKind::NumLock => crate::event::LED_NUML,
            LedKind::CapsLock => crate::event::LED_CAPSL,
        }
    }
}

/// The trigger's press/release state, shared by every task in a macro
/// tree. `is_holding()` mirrors the source's `not
/// _trigger_release_event.is_set()`.
#[derive(Clone)]
pub struct TriggerState {
    tx: Arc<tokio::sync::watch::Sender<bool>>,
    rx: tokio::sync::watch::Receiver<bool>,
}

impl TriggerState {
    /// Starts released, matching `_setup_asyncio_events`.
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::watch::channel(false);
        TriggerState { tx: Arc::new(tx), rx }
    }

    pub fn press(&self) {
        let _ = self.tx.send(true);
    }

    pub fn release(&self) {
        let _ = self.tx.send(false);
    }

    pub fn is_holding(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait_release(&self) {
        let mut rx = self.rx.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn wait_press(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for TriggerState {
    fn default() -> Self {
        TriggerState::new()
    }
}

/// Everything a running `Task` needs, owned so the whole bundle can be
/// cloned into a `tokio::spawn`ed future.
#[derive(Clone)]
pub struct TaskEnv {
    pub mapping: Arc<Mapping>,
    pub layout: Arc<KeyboardLayout>,
    pub store: VariableStore,
    pub listeners: ListenerRegistry,
    pub trigger: TriggerState,
    /// `(type, code)` of the combination element that triggers this
    /// macro; `mod_tap` uses it to recognize its own trigger event among
    /// the ones it is recording.
    pub trigger_type_and_code: (u16, u16),
    pub leds: Arc<dyn Fn() -> Vec<u16> + Send + Sync>,
    pub forward_write: Arc<dyn Fn(DeviceId, InputEvent) + Send + Sync>,
}

/// An ordered list of tasks, run sequentially. Calling `run` while
/// already running is a no-op (spec.md §4.7).
#[derive(Clone)]
pub struct Macro {
    tasks: Arc<Vec<Task>>,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Macro").field("tasks", &self.tasks).finish()
    }
}

impl Macro {
    pub fn new(tasks: Vec<Task>) -> Self {
        Macro {
            tasks: Arc::new(tasks),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn run<'a>(&'a self, env: &'a TaskEnv, callback: &'a Callback) -> BoxFuture<'a, Result<(), MacroError>> {
        Box::pin(async move {
            if self.running.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let result = self.run_tasks(env, callback).await;
            self.running.store(false, Ordering::SeqCst);
            result
        })
    }

    async fn run_tasks(&self, env: &TaskEnv, callback: &Callback) -> Result<(), MacroError> {
        for task in self.tasks.iter() {
            task.run(env, callback).await?;
        }
        Ok(())
    }
}

/// Drift-corrected tick source for rate-paced emission (spec.md §4.6/
/// §4.7), grounded on
/// `original_source/.../macros/tasks/util.py::precise_iteration_frequency`:
/// subtract the previous iteration's scheduling error from the next
/// sleep instead of sleeping a fixed period, so a slow tick doesn't
/// accumulate into permanent drift.
pub struct PreciseIterationFrequency {
    period: Duration,
    corrected_sleep: Duration,
    last_tick: Option<Instant>,
}

impl PreciseIterationFrequency {
    pub fn new(frequency_hz: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / frequency_hz);
        PreciseIterationFrequency {
            period,
            corrected_sleep: period,
            last_tick: None,
        }
    }

    pub async fn tick(&mut self) {
        if let Some(start) = self.last_tick {
            tokio::time::sleep(self.corrected_sleep).await;
            let elapsed = start.elapsed();
            let error = elapsed.saturating_sub(self.period);
            self.corrected_sleep = self.period.saturating_sub(error).max(Duration::from_millis(0));
        }
        self.last_tick = Some(Instant::now());
    }
}
