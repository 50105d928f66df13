#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use hdlx_ast::{span_between, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(hdlx::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[token("as")]
    KwAs,
    #[token("chan")]
    KwChan,
    #[token("const")]
    KwConst,
    #[token("else")]
    KwElse,
    #[token("enum")]
    KwEnum,
    #[token("false")]
    KwFalse,
    #[token("fn")]
    KwFn,
    #[token("for")]
    KwFor,
    #[token("if")]
    KwIf,
    #[token("import")]
    KwImport,
    #[token("in")]
    KwIn,
    #[token("let")]
    KwLet,
    #[token("match")]
    KwMatch,
    #[token("proc")]
    KwProc,
    #[token("pub")]
    KwPub,
    #[token("spawn")]
    KwSpawn,
    #[token("struct")]
    KwStruct,
    #[token("true")]
    KwTrue,
    #[token("type")]
    KwType,

    #[token("->")]
    Arrow,
    #[token("=>")]
    FatArrow,
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("...")]
    Ellipsis,
    #[token("..")]
    DotDot,
    #[token(".")]
    Dot,
    #[token("+:")]
    PlusColon,
    #[token("++")]
    PlusPlus,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("=")]
    Eq,
    #[token("!")]
    Bang,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("#[")]
    HashBracket,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Any digit-led word; the radix is validated afterwards so `0xg1` is
    // reported as one malformed literal rather than `0` followed by `xg1`.
    #[regex(r"[0-9][0-9a-zA-Z_]*", |lex| lex.slice().to_string())]
    Number(String),

    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    String(Option<String>),

    #[regex(r#""([^"\\]|\\.)*"#)]
    UnterminatedString,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// Checks digits against the literal's radix prefix.
fn validate_number(text: &str) -> Result<(), &'static str> {
    let (digits, radix) = if let Some(rest) = text.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix("0b") {
        (rest, 2)
    } else {
        (text, 10)
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') {
        return Err("invalid numeric literal");
    }
    if digits
        .chars()
        .all(|c| c == '_' || c.to_digit(radix).is_some())
    {
        Ok(())
    } else {
        Err("invalid numeric literal: digit does not match radix")
    }
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let esc = chars.next()?;
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            'x' => {
                let hi = chars.next()?.to_digit(16)?;
                let lo = chars.next()?.to_digit(16)?;
                out.push(char::from_u32(hi * 16 + lo)?);
            }
            'u' => {
                if chars.next() != Some('{') {
                    return None;
                }
                let mut hex = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    chars.next();
                    if hex.len() > 6 {
                        return None;
                    }
                }
                if chars.next() != Some('}') || hex.is_empty() {
                    return None;
                }
                let cp = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(cp)?);
            }
            _ => return None,
        }
    }

    Some(out)
}

/// Token stream over one source text. Holds only a position cursor between
/// tokens.
pub struct Scanner<'a> {
    inner: logos::Lexer<'a, RawToken>,
    len: usize,
    at_eof: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            inner: RawToken::lexer(src),
            len: src.len(),
            at_eof: false,
        }
    }

    /// Next token; yields `TokenKind::Eof` once the input is exhausted.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        let Some(raw) = self.inner.next() else {
            self.at_eof = true;
            return Ok(Token {
                kind: TokenKind::Eof,
                span: span_between(self.len, self.len),
            });
        };
        let range = self.inner.span();
        let span = span_between(range.start, range.end);

        let kind = match raw {
            Ok(RawToken::KwAs) => TokenKind::KwAs,
            Ok(RawToken::KwChan) => TokenKind::KwChan,
            Ok(RawToken::KwConst) => TokenKind::KwConst,
            Ok(RawToken::KwElse) => TokenKind::KwElse,
            Ok(RawToken::KwEnum) => TokenKind::KwEnum,
            Ok(RawToken::KwFalse) => TokenKind::KwFalse,
            Ok(RawToken::KwFn) => TokenKind::KwFn,
            Ok(RawToken::KwFor) => TokenKind::KwFor,
            Ok(RawToken::KwIf) => TokenKind::KwIf,
            Ok(RawToken::KwImport) => TokenKind::KwImport,
            Ok(RawToken::KwIn) => TokenKind::KwIn,
            Ok(RawToken::KwLet) => TokenKind::KwLet,
            Ok(RawToken::KwMatch) => TokenKind::KwMatch,
            Ok(RawToken::KwProc) => TokenKind::KwProc,
            Ok(RawToken::KwPub) => TokenKind::KwPub,
            Ok(RawToken::KwSpawn) => TokenKind::KwSpawn,
            Ok(RawToken::KwStruct) => TokenKind::KwStruct,
            Ok(RawToken::KwTrue) => TokenKind::KwTrue,
            Ok(RawToken::KwType) => TokenKind::KwType,

            Ok(RawToken::Arrow) => TokenKind::Arrow,
            Ok(RawToken::FatArrow) => TokenKind::FatArrow,
            Ok(RawToken::ColonColon) => TokenKind::ColonColon,
            Ok(RawToken::Colon) => TokenKind::Colon,
            Ok(RawToken::Semi) => TokenKind::Semi,
            Ok(RawToken::Comma) => TokenKind::Comma,
            Ok(RawToken::Ellipsis) => TokenKind::Ellipsis,
            Ok(RawToken::DotDot) => TokenKind::DotDot,
            Ok(RawToken::Dot) => TokenKind::Dot,
            Ok(RawToken::PlusColon) => TokenKind::PlusColon,
            Ok(RawToken::PlusPlus) => TokenKind::PlusPlus,
            Ok(RawToken::Plus) => TokenKind::Plus,
            Ok(RawToken::Minus) => TokenKind::Minus,
            Ok(RawToken::Star) => TokenKind::Star,
            Ok(RawToken::Slash) => TokenKind::Slash,
            Ok(RawToken::Percent) => TokenKind::Percent,
            Ok(RawToken::Shl) => TokenKind::Shl,
            Ok(RawToken::Shr) => TokenKind::Shr,
            Ok(RawToken::Le) => TokenKind::Le,
            Ok(RawToken::Ge) => TokenKind::Ge,
            Ok(RawToken::Lt) => TokenKind::Lt,
            Ok(RawToken::Gt) => TokenKind::Gt,
            Ok(RawToken::EqEq) => TokenKind::EqEq,
            Ok(RawToken::Neq) => TokenKind::Neq,
            Ok(RawToken::Eq) => TokenKind::Eq,
            Ok(RawToken::Bang) => TokenKind::Bang,
            Ok(RawToken::AndAnd) => TokenKind::AndAnd,
            Ok(RawToken::OrOr) => TokenKind::OrOr,
            Ok(RawToken::Amp) => TokenKind::Amp,
            Ok(RawToken::Pipe) => TokenKind::Pipe,
            Ok(RawToken::Caret) => TokenKind::Caret,
            Ok(RawToken::HashBracket) => TokenKind::HashBracket,

            Ok(RawToken::LParen) => TokenKind::LParen,
            Ok(RawToken::RParen) => TokenKind::RParen,
            Ok(RawToken::LBrace) => TokenKind::LBrace,
            Ok(RawToken::RBrace) => TokenKind::RBrace,
            Ok(RawToken::LBracket) => TokenKind::LBracket,
            Ok(RawToken::RBracket) => TokenKind::RBracket,

            Ok(RawToken::Number(text)) => {
                if let Err(message) = validate_number(&text) {
                    return Err(LexError {
                        message: format!("{message}: `{text}`"),
                        span,
                    });
                }
                TokenKind::Number(text)
            }
            Ok(RawToken::String(Some(s))) => TokenKind::String(s),
            Ok(RawToken::String(None)) => {
                return Err(LexError {
                    message: "invalid escape in string literal".to_string(),
                    span,
                });
            }
            Ok(RawToken::UnterminatedString) => {
                return Err(LexError {
                    message: "unterminated string literal".to_string(),
                    span,
                });
            }
            Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
            Err(()) => {
                return Err(LexError {
                    message: format!("unrecognized character `{}`", self.inner.slice()),
                    span,
                });
            }
        };
        Ok(Token { kind, span })
    }

    /// Scans the whole input; the result always ends with an `Eof` token.
    pub fn lex(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while !self.at_eof {
            tokens.push(self.next_token()?);
        }
        Ok(tokens)
    }
}
