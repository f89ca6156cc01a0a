//! Per-devnode read loop (spec.md §4.1).
//!
//! Grounded on `original_source/inputremapper/injection/event_reader.py`
//! for the six-step dispatch and on the teacher's capture-thread pattern
//! (a dedicated current-thread `tokio` runtime reading one devnode) for
//! how the loop itself is driven. `EventSource` decouples this from the
//! real `evdev` stream the way `SourceDevice`/`UInputSink` do, so the
//! dispatch logic is testable without a kernel device.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::event::{DeviceId, InputEvent, EV_KEY, EV_MSC, EV_SYN};
use crate::uinput_registry::{self, UInputSink};

/// A source of raw events, one item per kernel report. Implementations
/// are expected to coalesce nothing: `EventReader` performs all
/// filtering (`EV_SYN`/`EV_MSC` drop, repeat drop).
pub trait EventSource: Send {
    fn recv(&mut self) -> BoxFuture<'_, std::io::Result<InputEvent>>;
}

impl EventSource for Box<dyn EventSource> {
    fn recv(&mut self) -> BoxFuture<'_, std::io::Result<InputEvent>> {
        (**self).recv()
    }
}

pub struct EventReader<S: EventSource> {
    source: S,
    origin_hash: DeviceId,
    forward_sink: Arc<dyn UInputSink>,
    context: Context,
    stop: tokio::sync::watch::Receiver<bool>,
}

impl<S: EventSource> EventReader<S> {
    pub fn new(
        source: S,
        origin_hash: DeviceId,
        forward_sink: Arc<dyn UInputSink>,
        context: Context,
        stop: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        EventReader {
            source,
            origin_hash,
            forward_sink,
            context,
            stop,
        }
    }

    /// Drives the loop until a read error or the stop signal fires, then
    /// releases everything the context's handlers are holding.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                }
                result = self.source.recv() => {
                    match result {
                        Ok(event) => self.dispatch(event).await,
                        Err(err) => {
                            log::error!("event read failed on {}: {err}", self.origin_hash);
                            break;
                        }
                    }
                }
            }
        }
        self.context.reset();
    }

    async fn dispatch(&self, mut event: InputEvent) {
        if event.type_ == EV_SYN || event.type_ == EV_MSC {
            return;
        }
        if event.type_ == EV_KEY && event.value == 2 {
            return;
        }
        event.origin_hash = self.origin_hash;

        // Listeners run synchronously (they only ever mutate small bits
        // of shared state), but the yield still matters: it gives a
        // listener's own spawned follow-up (e.g. `if_single`'s
        // trigger-release race) a chance to run before handlers see the
        // event.
        let consumed_by_listener = self.context.listeners.dispatch(&event);
        tokio::task::yield_now().await;
        if consumed_by_listener {
            return;
        }

        let mut consumed = false;
        for handler in self.context.handlers_for(event.type_and_code()) {
            if handler.notify(&event) {
                consumed = true;
            }
        }

        if !consumed {
            if let Err(err) = uinput_registry::emit(self.forward_sink.as_ref(), event.type_, event.code, event.value) {
                log::warn!("forward write failed on {}: {err}", self.origin_hash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capabilities;
    use crate::handler::InputEventHandler;
    use crate::uinput_registry::FakeUInputSink;
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
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "source closed"))
            })
        }
    }

    struct CountingHandler {
        seen: Mutex<Vec<InputEvent>>,
        consume: bool,
    }

    impl InputEventHandler for CountingHandler {
        fn notify(&self, event: &InputEvent) -> bool {
            self.seen.lock().unwrap().push(*event);
            self.consume
        }
        fn reset(&self) {}
    }

    fn spawn_reader(
        handler: Arc<CountingHandler>,
        sink: Arc<FakeUInputSink>,
    ) -> (mpsc::Sender<InputEvent>, tokio::sync::watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let context = Context::new();
        context.register_handler((EV_KEY, 30), handler);
        let reader = EventReader::new(ChannelSource { rx }, DeviceId(7), sink, context, stop_rx);
        let handle = tokio::spawn(reader.run());
        (tx, stop_tx, handle)
    }

    #[tokio::test]
    async fn auto_repeat_is_dropped_before_handlers() {
        let handler = Arc::new(CountingHandler { seen: Mutex::new(Vec::new()), consume: true });
        let mut caps = Capabilities::default();
        caps.insert_key(30);
        let sink = FakeUInputSink::new("kbd", caps);
        let (tx, stop_tx, join) = spawn_reader(handler.clone(), sink.clone());

        tx.send(InputEvent::new(EV_KEY, 30, 2, DeviceId(0))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(handler.seen.lock().unwrap().is_empty());

        stop_tx.send(true).unwrap();
        drop(tx);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn unhandled_events_forward_unchanged() {
        let handler = Arc::new(CountingHandler { seen: Mutex::new(Vec::new()), consume: false });
        let mut caps = Capabilities::default();
        caps.insert_key(30);
        let sink = FakeUInputSink::new("kbd", caps);
        let (tx, stop_tx, join) = spawn_reader(handler.clone(), sink.clone());

        tx.send(InputEvent::new(EV_KEY, 30, 1, DeviceId(0))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.history(), vec![(EV_KEY, 30, 1)]);

        stop_tx.send(true).unwrap();
        drop(tx);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn handled_events_do_not_forward() {
        let handler = Arc::new(CountingHandler { seen: Mutex::new(Vec::new()), consume: true });
        let mut caps = Capabilities::default();
        caps.insert_key(30);
        let sink = FakeUInputSink::new("kbd", caps);
        let (tx, stop_tx, join) = spawn_reader(handler.clone(), sink.clone());

        tx.send(InputEvent::new(EV_KEY, 30, 1, DeviceId(0))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(sink.history().is_empty());
        assert_eq!(handler.seen.lock().unwrap().len(), 1);

        stop_tx.send(true).unwrap();
        drop(tx);
        join.await.unwrap();
    }
}
