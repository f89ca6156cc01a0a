//! Panic codeword listener (spec.md §6, SUPPLEMENTED FEATURES): a
//! per-character state machine over `EV_KEY` press events that, on a
//! full match of the fixed codeword, requests cooperative shutdown and
//! escalates to `SIGTERM` then `SIGKILL` if the process is still
//! running after each grace interval.
//!
//! Grounded on `original_source/inputremapper/injection/panic_counter.py`.
//! Escalation itself is grounded on the teacher's own `signal-hook`
//! registration in spirit (`flag::register` for catching signals); here
//! the watchdog instead *raises* them against itself, via
//! `signal_hook::low_level::raise`, so no extra `libc` dependency is
//! needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::signal::{SIGKILL, SIGTERM};

use crate::context::Listener;
use crate::event::{InputEvent, EV_KEY};
use crate::keyboard_layout::KeyboardLayout;

/// Tracks progress through the fixed codeword and drives the shutdown
/// escalation once it is fully typed.
pub struct PanicWatchdog {
    codes: Vec<u16>,
    progress: AtomicUsize,
    stop: tokio::sync::watch::Sender<bool>,
    shutdown_grace: Duration,
}

impl PanicWatchdog {
    /// Resolves `codeword` (default `"inputremapperpanicquit"`) character
    /// by character through `layout`, trying the bare letter then
    /// `KEY_<letter>` (`KeyboardLayout::get` already does both).
    pub fn new(
        codeword: &str,
        layout: &KeyboardLayout,
        stop: tokio::sync::watch::Sender<bool>,
        shutdown_grace: Duration,
    ) -> Result<Self, char> {
        let mut codes = Vec::with_capacity(codeword.len());
        for ch in codeword.chars() {
            let code = layout.get(&ch.to_string()).ok_or(ch)?;
            codes.push(code as u16);
        }
        Ok(PanicWatchdog {
            codes,
            progress: AtomicUsize::new(0),
            stop,
            shutdown_grace,
        })
    }

    /// Feeds one key press code into the state machine. Returns `true`
    /// once the codeword just completed (so the caller can log it).
    fn feed(&self, code: u16) -> bool {
        let i = self.progress.load(Ordering::SeqCst);
        if code == self.codes[i] {
            let next = i + 1;
            if next == self.codes.len() {
                self.progress.store(0, Ordering::SeqCst);
                return true;
            }
            self.progress.store(next, Ordering::SeqCst);
        } else {
            // A mismatch resets to 0, not to a partial re-match — even
            // if `code` happens to equal `self.codes[0]`.
            self.progress.store(if code == self.codes[0] { 1 } else { 0 }, Ordering::SeqCst);
        }
        false
    }

    fn trigger_shutdown(self: &Arc<Self>) {
        log::warn!("panic_watchdog: codeword matched, initiating shutdown");
        let _ = self.stop.send(true);
        let grace = self.shutdown_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            log::warn!("panic_watchdog: escalating to SIGTERM");
            if let Err(err) = signal_hook::low_level::raise(SIGTERM) {
                log::error!("panic_watchdog: failed to raise SIGTERM: {err}");
            }
            tokio::time::sleep(grace).await;
            log::warn!("panic_watchdog: escalating to SIGKILL");
            if let Err(err) = signal_hook::low_level::raise(SIGKILL) {
                log::error!("panic_watchdog: failed to raise SIGKILL: {err}");
            }
        });
    }

    /// Wraps `self` as a `Listener` for `ListenerRegistry::add`. Only
    /// `EV_KEY` press events (`value == 1`) advance the state machine;
    /// releases and repeats are ignored and never consumed.
    pub fn as_listener(self: Arc<Self>) -> Listener {
        Arc::new(move |event: &InputEvent| {
            if event.type_ != EV_KEY || event.value != 1 {
                return false;
            }
            if self.feed(event.code) {
                self.trigger_shutdown();
            }
            false
        })
    }
}
