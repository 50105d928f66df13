#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use hdlx_ast::{Location, Span};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    Lex,
    Syntax,
    ChainedComparison,
    ChannelInNextParams,
    DuplicateFailLabel,
    ProcMemberVisibility,
    NameResolution,
}

#[derive(Debug, Error, Diagnostic)]
#[error("parse error: {location} {message}")]
#[diagnostic(code(hdlx::parse))]
#[allow(unused_assignments)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    #[label]
    pub span: Span,
    pub location: Location,
}
