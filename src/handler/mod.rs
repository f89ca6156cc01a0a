//! The handler graph (spec.md §4.2-§4.5): the polymorphism point the
//! Design Notes call out explicitly — the source uses structural typing
//! over handler objects, ported here as one trait every handler
//! implements.

pub mod combination;
pub mod transduce;

use std::sync::Arc;

use crate::event::InputEvent;

/// Writes one `(type, code, value)` triple to a specific target sink,
/// bound at handler-construction time. Shared with the macro engine's
/// `Callback` shape, kept as a separate alias since handlers never need
/// the macro engine's other `TaskEnv` plumbing.
pub type EmitFn = Arc<dyn Fn(u16, u16, i32) + Send + Sync>;

/// One node in the compiled handler graph (spec.md §4.2, Design Notes'
/// "Polymorphism over handler families").
pub trait InputEventHandler: Send + Sync {
    /// Returns `true` if the event was consumed (suppress forwarding).
    fn notify(&self, event: &InputEvent) -> bool;

    /// Releases any output the handler currently holds and cancels
    /// pending timers; called by `Context::reset()`.
    fn reset(&self);
}
