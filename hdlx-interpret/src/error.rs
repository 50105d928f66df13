#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use hdlx_ast::{Location, SourceFile, Span};
use miette::Diagnostic;
use thiserror::Error;

/// A typed construct the emitter cannot lower.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("emit error: {location} {message}")]
#[diagnostic(code("hdlx::emit"))]
#[allow(unused_assignments)]
pub struct EmitError {
    pub message: String,
    #[label]
    pub span: Span,
    pub location: Location,
}

impl EmitError {
    pub fn new(message: impl Into<String>, span: Span, file: &SourceFile) -> Self {
        Self {
            message: message.into(),
            span,
            location: file.location(span),
        }
    }
}

/// A program-triggered failure: `fail!`, a failed assertion, an unmatched
/// `match`, or a value operation that cannot proceed.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("{location} {label}: {message}")]
#[diagnostic(code("hdlx::run"))]
#[allow(unused_assignments)]
pub struct RuntimeFailure {
    pub label: String,
    pub message: String,
    #[label]
    pub span: Span,
    pub location: Location,
}

impl RuntimeFailure {
    pub fn new(label: impl Into<String>, message: impl Into<String>, span: Span, file: &SourceFile) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
            span,
            location: file.location(span),
        }
    }
}

impl From<EmitError> for RuntimeFailure {
    fn from(e: EmitError) -> Self {
        Self {
            label: "emit".to_string(),
            message: e.message,
            span: e.span,
            location: e.location,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SimulationError {
    #[error("proc network deadlocked after {ticks} tick(s); blocked: {blocked}")]
    #[diagnostic(code("hdlx::sim"))]
    Deadlock { ticks: u64, blocked: String },

    #[error("proc network did not finish within {max_ticks} tick(s)")]
    #[diagnostic(code("hdlx::sim"))]
    TickLimit { max_ticks: u64 },

    #[error("proc '{proc_name}' failed")]
    #[diagnostic(code("hdlx::sim"))]
    Failed {
        proc_name: String,
        #[source]
        #[diagnostic_source]
        failure: RuntimeFailure,
    },

    #[error("cannot instantiate proc network: {0}")]
    #[diagnostic(code("hdlx::sim"))]
    Setup(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Emit(#[from] EmitError),
}
