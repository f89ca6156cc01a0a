//! Error taxonomy.
//!
//! One enum per bucket from the propagation policy: validation errors
//! reject a single mapping, macro errors reject a single macro (parse
//! time) or abort a single running macro (runtime), injection/IO errors
//! are operational and recovered by the supervisor, IPC errors are
//! communicated back from the variable store. Nothing here is expected
//! to be `panic!`-worthy; only developer bugs (e.g. a handler registering
//! a duplicate `ArgumentConfig` position) panic, per spec.md §7.

use thiserror::Error;

/// Rejects a single `Mapping` at construction time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown key symbol: {0}")]
    UnknownSymbol(String),
    #[error("symbol {symbol} cannot be emitted by uinput sink {sink}")]
    SymbolNotAvailable { symbol: String, sink: String },
    #[error("macro parse error: {0}")]
    MacroParse(String),
    #[error("output_type/output_code must equal (EV_KEY, layout(output_symbol))")]
    OutputTypeMismatch,
    #[error("exactly one of output_symbol or (output_type, output_code) must be set")]
    MissingOutput,
    #[error("combination has an analog input but the output is not an axis (EV_ABS/EV_REL)")]
    AnalogInputWithoutAxisOutput,
    #[error("trigger percent {0} is out of range [-100, 100] \\ {{0}}")]
    TriggerPointOutOfRange(i32),
    #[error("combination contains more than one analog input")]
    MultipleAnalogInputs,
    #[error("output_type/output_code must be absent when output_symbol is a macro")]
    MacroWithExplicitOutputCode,
}

/// Parse-time or runtime error from the macro engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MacroError {
    #[error("unknown macro function: {0}")]
    UnknownFunction(String),
    #[error("{function}: expected {expected} argument(s), got {got}")]
    BadArity {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("{function}: argument {position} ({name}) has wrong type")]
    WrongArgumentType {
        function: String,
        position: usize,
        name: String,
    },
    #[error("invalid variable name: {0}")]
    InvalidVariableName(String),
    #[error("duplicate keyword argument: {0}")]
    DuplicateKeywordArgument(String),
    #[error("positional argument after keyword argument")]
    PositionalAfterKeyword,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("variable {0} did not resolve to a usable value")]
    UnresolvedVariable(String),
}

/// Device-grab and sink-construction failures during injection startup.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("failed to grab devnode {path}: {source}")]
    GrabFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no devnode of the logical device could be grabbed")]
    NoGrab,
    #[error("failed to create uinput sink {name}: {source}")]
    SinkCreateFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Variable store IPC failure (the store never returns this to `get`; it
/// logs and returns `None` instead — see variable_store.rs).
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("variable store did not respond within the timeout")]
    Timeout,
    #[error("variable store actor is no longer running")]
    ActorGone,
}

/// Umbrella error for call sites (e.g. the preset compiler) that need a
/// single `Result` type spanning more than one bucket.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Macro(#[from] MacroError),
    #[error(transparent)]
    Injection(#[from] InjectionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
