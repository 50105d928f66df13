#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use hdlx_ast::{Location, SourceFile, Span};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeErrorKind {
    Mismatch,
    ArityMismatch,
    ParametricCycle,
    UnresolvedParametric,
    Recursion,
    ImportCycle,
    Import,
    Unsupported,
    NotConstexpr,
    Constexpr,
}

#[derive(Debug, Error, Diagnostic)]
#[error("type error: {location} {message}")]
#[diagnostic(code("hdlx::type"))]
#[allow(unused_assignments)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub message: String,
    #[label]
    pub span: Span,
    pub location: Location,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, message: impl Into<String>, span: Span, file: &SourceFile) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            location: file.location(span),
        }
    }
}

/// Raised when an expression that must be known at compile time is not.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("expression is not constexpr: {reason}")]
#[diagnostic(code(hdlx::constexpr))]
#[allow(unused_assignments)]
pub struct NotConstexprError {
    pub reason: String,
    #[label]
    pub span: Span,
}

#[derive(Clone, Debug, Error, Diagnostic)]
pub enum ConstexprError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    NotConstexpr(#[from] NotConstexprError),

    #[error("constexpr evaluation failed: {message}")]
    #[diagnostic(code(hdlx::constexpr))]
    Failed {
        message: String,
        #[label]
        span: Span,
    },
}

impl ConstexprError {
    pub fn not_constexpr(reason: impl Into<String>, span: Span) -> Self {
        ConstexprError::NotConstexpr(NotConstexprError {
            reason: reason.into(),
            span,
        })
    }

    pub fn failed(message: impl Into<String>, span: Span) -> Self {
        ConstexprError::Failed {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ConstexprError::NotConstexpr(e) => e.span,
            ConstexprError::Failed { span, .. } => *span,
        }
    }

    pub fn into_type_error(self, file: &SourceFile) -> TypeError {
        match self {
            ConstexprError::NotConstexpr(e) => {
                TypeError::new(TypeErrorKind::NotConstexpr, e.to_string(), e.span, file)
            }
            ConstexprError::Failed { message, span } => {
                TypeError::new(TypeErrorKind::Constexpr, message, span, file)
            }
        }
    }
}

/// Failure of a value operation shared by the constexpr evaluator and the VM.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValueError(pub String);

impl ValueError {
    pub fn new(message: impl Into<String>) -> Self {
        ValueError(message.into())
    }
}

/// Failure anywhere between source text and a checked module.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] hdlx_parse::ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] TypeError),
}
