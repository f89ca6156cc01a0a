//! Process-shared macro variable store (spec.md §4.8).
//!
//! Grounded on `original_source/inputremapper/ipc/shared_dict.py`: a
//! background actor owns the dictionary, reached over a bidirectional
//! channel with a bounded read timeout. The source runs the actor as a
//! separate OS process reached over a pipe; this crate runs one daemon
//! process per logical device set already (`Injector`), so a dedicated
//! thread with a `std::sync::mpsc` channel gives the same "no directly
//! shared mutable state" property without the deployment cost of a second
//! process (SPEC_FULL.md Open Question #4).

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A macro variable value: numbers and strings are the two types the
/// macro argument system resolves (`Argument::get_value`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

enum Message {
    Get(String, mpsc::Sender<Option<Value>>),
    Set(String, Value),
    Clear,
    Ping(mpsc::Sender<()>),
    Stop,
}

/// Handle to the background actor. Cloning shares the same actor thread.
#[derive(Clone)]
pub struct VariableStore {
    tx: mpsc::Sender<Message>,
    timeout: Duration,
    // Wrapped so `Drop` can join the actor thread exactly once even
    // though the handle itself is `Clone`.
    worker: std::sync::Arc<Worker>,
}

struct Worker {
    join: std::sync::Mutex<Option<JoinHandle<()>>>,
    stop_tx: mpsc::Sender<Message>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(Message::Stop);
        if let Some(handle) = self.join.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl VariableStore {
    /// Starts the actor thread. `timeout` bounds `get`/`is_alive` (default
    /// 20ms per spec.md §4.8).
    pub fn start(timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Message>();

        let join = thread::Builder::new()
            .name("variable-store".into())
            .spawn(move || {
                let mut dict: HashMap<String, Value> = HashMap::new();
                for message in rx {
                    match message {
                        Message::Get(key, reply) => {
                            let _ = reply.send(dict.get(&key).cloned());
                        }
                        Message::Set(key, value) => {
                            dict.insert(key, value);
                        }
                        Message::Clear => dict.clear(),
                        Message::Ping(reply) => {
                            let _ = reply.send(());
                        }
                        Message::Stop => return,
                    }
                }
            })
            .expect("failed to spawn variable-store thread");

        VariableStore {
            tx: tx.clone(),
            timeout,
            worker: std::sync::Arc::new(Worker {
                join: std::sync::Mutex::new(Some(join)),
                stop_tx: tx,
            }),
        }
    }

    pub fn default_timeout() -> Self {
        VariableStore::start(Duration::from_millis(20))
    }

    /// Returns `None` and logs on timeout (never an `Err`, matching
    /// `shared_dict.py`'s `__getitem__`).
    pub fn get(&self, key: &str) -> Option<Value> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.tx.send(Message::Get(key.to_string(), reply_tx)).is_err() {
            log::error!("variable_store: actor gone, get({key}) -> None");
            return None;
        }
        match reply_rx.recv_timeout(self.timeout) {
            Ok(value) => value,
            Err(_) => {
                log::error!("variable_store: get({key}) timed out after {:?}", self.timeout);
                None
            }
        }
    }

    /// Fire-and-forget, matching `shared_dict.py`'s `__setitem__`.
    pub fn set(&self, key: &str, value: Value) {
        if self.tx.send(Message::Set(key.to_string(), value)).is_err() {
            log::error!("variable_store: actor gone, set({key}) dropped");
        }
    }

    /// Reads the current value (defaulting to 0), adds `delta`, writes it
    /// back. Matches the macro `add(name, delta)` task contract.
    pub fn add(&self, key: &str, delta: f64) -> Result<f64, crate::error::MacroError> {
        let current = match self.get(key) {
            None => 0.0,
            Some(Value::Number(n)) => n,
            Some(Value::Text(_)) => {
                return Err(crate::error::MacroError::WrongArgumentType {
                    function: "add".into(),
                    position: 0,
                    name: key.into(),
                })
            }
        };
        let next = current + delta;
        self.set(key, Value::Number(next));
        Ok(next)
    }

    pub fn clear(&self) {
        let _ = self.tx.send(Message::Clear);
    }

    /// Ping/pong liveness check bounded by `timeout` (or the override
    /// passed in).
    pub fn is_alive(&self, timeout: Option<Duration>) -> bool {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.tx.send(Message::Ping(reply_tx)).is_err() {
            return false;
        }
        reply_rx.recv_timeout(timeout.unwrap_or(self.timeout)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = VariableStore::start(Duration::from_millis(50));
        store.set("x", Value::Number(3.0));
        assert_eq!(store.get("x"), Some(Value::Number(3.0)));
    }

    #[test]
    fn missing_key_is_none() {
        let store = VariableStore::start(Duration::from_millis(50));
        assert_eq!(store.get("nope"), None);
    }

    #[test]
    fn add_initializes_unset_to_zero() {
        let store = VariableStore::start(Duration::from_millis(50));
        let result = store.add("counter", 5.0).unwrap();
        assert_eq!(result, 5.0);
        assert_eq!(store.get("counter"), Some(Value::Number(5.0)));
    }

    #[test]
    fn add_on_text_value_errors() {
        let store = VariableStore::start(Duration::from_millis(50));
        store.set("s", Value::Text("hi".into()));
        assert!(store.add("s", 1.0).is_err());
    }

    #[test]
    fn clear_empties_the_dictionary() {
        let store = VariableStore::start(Duration::from_millis(50));
        store.set("x", Value::Number(1.0));
        store.clear();
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn is_alive_true_while_running() {
        let store = VariableStore::start(Duration::from_millis(50));
        assert!(store.is_alive(None));
    }
}
