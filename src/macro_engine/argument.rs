//! Scalar macro arguments (spec.md §4.7): a constant or a `$variable`
//! reference, resolved against the shared `VariableStore` at run time.
//!
//! Grounded on `original_source/inputremapper/injection/macros/argument.py`,
//! simplified: the source's `Argument` is built from a declarative
//! `ArgumentConfig` (name, position, accepted types) because one generic
//! `Task.__init__` walks `positional_args`/`keyword_args` for every
//! function. Here each `Task` variant has its own typed fields (see
//! `task.rs`), so only the constant-or-variable/number-or-text resolution
//! itself needs a runtime type check.

use crate::error::MacroError;
use crate::variable_store::{Value, VariableStore};

/// One scalar argument slot: either fixed at parse time, or a reference
/// to a variable resolved fresh on every task invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Number(f64),
    Text(String),
    Variable(String),
}

impl Argument {
    /// Resolves to a number, or a `WrongArgumentType` error if a variable
    /// reference holds text or is unset (spec.md: "dynamic variable"
    /// errors abort the enclosing `Macro.run`).
    pub fn resolve_number(
        &self,
        store: &VariableStore,
        function: &str,
        position: usize,
    ) -> Result<f64, MacroError> {
        match self {
            Argument::Number(n) => Ok(*n),
            Argument::Text(_) => Err(wrong_type(function, position, "<literal>")),
            Argument::Variable(name) => match store.get(name) {
                Some(Value::Number(n)) => Ok(n),
                Some(Value::Text(_)) | None => Err(wrong_type(function, position, name)),
            },
        }
    }

    /// Resolves to text. A bare number literal stringifies (the source
    /// lets `str`-typed slots accept int/float interchangeably).
    pub fn resolve_text(
        &self,
        store: &VariableStore,
        function: &str,
        position: usize,
    ) -> Result<String, MacroError> {
        match self {
            Argument::Text(s) => Ok(s.clone()),
            Argument::Number(n) => Ok(format_number(*n)),
            Argument::Variable(name) => match store.get(name) {
                Some(Value::Text(s)) => Ok(s),
                Some(Value::Number(n)) => Ok(format_number(n)),
                None => Err(wrong_type(function, position, name)),
            },
        }
    }

    /// Resolves to whichever representation is live, for `if_eq`'s
    /// untyped comparison. `None` means an unresolved variable.
    pub fn resolve_value(&self, store: &VariableStore) -> Option<Value> {
        match self {
            Argument::Number(n) => Some(Value::Number(*n)),
            Argument::Text(s) => Some(Value::Text(s.clone())),
            Argument::Variable(name) => store.get(name),
        }
    }

    pub fn variable_name(&self) -> Option<&str> {
        match self {
            Argument::Variable(name) => Some(name),
            _ => None,
        }
    }
}

fn wrong_type(function: &str, position: usize, name: &str) -> MacroError {
    MacroError::WrongArgumentType {
        function: function.to_string(),
        position,
        name: name.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn number_literal_resolves() {
        let store = VariableStore::start(Duration::from_millis(20));
        assert_eq!(Argument::Number(3.0).resolve_number(&store, "wait", 0), Ok(3.0));
    }

    #[test]
    fn unset_variable_is_wrong_type() {
        let store = VariableStore::start(Duration::from_millis(20));
        let arg = Argument::Variable("nope".into());
        assert!(arg.resolve_number(&store, "wait", 0).is_err());
    }

    #[test]
    fn variable_resolves_after_set() {
        let store = VariableStore::start(Duration::from_millis(20));
        store.set("count", Value::Number(4.0));
        let arg = Argument::Variable("count".into());
        assert_eq!(arg.resolve_number(&store, "repeat", 0), Ok(4.0));
    }

    #[test]
    fn text_variable_rejected_as_number() {
        let store = VariableStore::start(Duration::from_millis(20));
        store.set("s", Value::Text("hi".into()));
        let arg = Argument::Variable("s".into());
        assert!(arg.resolve_number(&store, "wait", 0).is_err());
    }
}
