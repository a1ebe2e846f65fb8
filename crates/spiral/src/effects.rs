//! The effect registry and output sinks.
//!
//! Side-effecting operations are keyed by bare name, separately from the pure
//! operator registry. Dispatch falls back to a second table of async I/O
//! hooks when the primary table misses, so hosts can layer deferred effects
//! under the same names.

use std::{
    borrow::Cow,
    io::{self, Write as _},
};

use ahash::AHashMap;

use crate::{
    errors::{ErrorCode, RunError, RunResult},
    heap::Heap,
    value::Value,
};

/// Trait for handling output produced by effects.
///
/// Implement this trait to capture or redirect output from evaluated
/// documents. The default implementation [`StdSink`] writes to stdout.
pub trait EffectSink {
    /// Writes one formatted fragment, without separators or terminators.
    fn write(&mut self, output: Cow<'_, str>);

    /// Writes a single separator or terminator character.
    fn push(&mut self, end: char);
}

/// Default sink that writes to stdout.
#[derive(Debug, Default)]
pub struct StdSink;

impl EffectSink for StdSink {
    fn write(&mut self, output: Cow<'_, str>) {
        let _ = io::stdout().write_all(output.as_bytes());
    }

    fn push(&mut self, end: char) {
        let mut buffer = [0u8; 4];
        let _ = io::stdout().write_all(end.encode_utf8(&mut buffer).as_bytes());
    }
}

/// A sink that collects all output into a string.
///
/// Useful for testing or capturing effect output programmatically.
#[derive(Debug, Default)]
pub struct CollectSink(String);

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected output so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    /// Consumes the sink and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl EffectSink for CollectSink {
    fn write(&mut self, output: Cow<'_, str>) {
        self.0.push_str(&output);
    }

    fn push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// A sink that ignores all output.
#[derive(Debug, Default)]
pub struct NoSink;

impl EffectSink for NoSink {
    fn write(&mut self, _output: Cow<'_, str>) {}

    fn push(&mut self, _end: char) {}
}

/// Implementation signature for effects.
pub type EffectFn = fn(&[Value], &mut Heap, &mut dyn EffectSink) -> RunResult<Value>;

/// Named side-effecting operations, keyed separately from pure operators.
#[derive(Debug, Clone, Default)]
pub struct EffectRegistry {
    effects: AHashMap<String, EffectFn>,
    /// Async I/O hooks tried when the primary table misses.
    async_effects: AHashMap<String, EffectFn>,
}

impl EffectRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry populated with the built-in effects (`print`).
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("print", print);
        registry
    }

    /// Registers a primary effect.
    pub fn register(&mut self, name: impl Into<String>, func: EffectFn) {
        self.effects.insert(name.into(), func);
    }

    /// Registers an async I/O hook, consulted when the primary table misses.
    pub fn register_async(&mut self, name: impl Into<String>, func: EffectFn) {
        self.async_effects.insert(name.into(), func);
    }

    /// Looks up an effect by name, primary table first.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EffectFn> {
        self.effects.get(name).or_else(|| self.async_effects.get(name))
    }

    /// Dispatches an effect by name over evaluated arguments.
    pub fn dispatch(&self, name: &str, args: &[Value], heap: &mut Heap, sink: &mut dyn EffectSink) -> RunResult<Value> {
        match self.get(name) {
            Some(func) => func(args, heap, sink),
            None => Err(RunError::raise(
                ErrorCode::UnknownOperator,
                format!("unknown effect '{name}'"),
            )),
        }
    }
}

/// The `print` effect: space-separated display forms, newline-terminated.
fn print(args: &[Value], heap: &mut Heap, sink: &mut dyn EffectSink) -> RunResult<Value> {
    for (position, arg) in args.iter().enumerate() {
        if position > 0 {
            sink.push(' ');
        }
        sink.write(Cow::Owned(arg.display(heap)));
    }
    sink.push('\n');
    Ok(Value::Void)
}
