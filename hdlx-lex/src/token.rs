#![forbid(unsafe_code)]

use std::fmt;

use hdlx_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwAs,
    KwChan,
    KwConst,
    KwElse,
    KwEnum,
    KwFalse,
    KwFn,
    KwFor,
    KwIf,
    KwImport,
    KwIn,
    KwLet,
    KwMatch,
    KwProc,
    KwPub,
    KwSpawn,
    KwStruct,
    KwTrue,
    KwType,

    // Operators / punctuation
    Arrow,
    FatArrow,
    ColonColon,
    Colon,
    Semi,
    Comma,
    Ellipsis,
    DotDot,
    Dot,
    PlusColon,
    PlusPlus,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Le,
    Ge,
    Lt,
    Gt,
    EqEq,
    Neq,
    Eq,
    Bang,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    HashBracket,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    // Literals / identifiers
    /// Raw numeric text, validated for its radix.
    Number(String),
    String(String),
    Ident(String),

    Eof,
}

impl TokenKind {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            TokenKind::EqEq
                | TokenKind::Neq
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::KwAs => "as",
            TokenKind::KwChan => "chan",
            TokenKind::KwConst => "const",
            TokenKind::KwElse => "else",
            TokenKind::KwEnum => "enum",
            TokenKind::KwFalse => "false",
            TokenKind::KwFn => "fn",
            TokenKind::KwFor => "for",
            TokenKind::KwIf => "if",
            TokenKind::KwImport => "import",
            TokenKind::KwIn => "in",
            TokenKind::KwLet => "let",
            TokenKind::KwMatch => "match",
            TokenKind::KwProc => "proc",
            TokenKind::KwPub => "pub",
            TokenKind::KwSpawn => "spawn",
            TokenKind::KwStruct => "struct",
            TokenKind::KwTrue => "true",
            TokenKind::KwType => "type",
            TokenKind::Arrow => "->",
            TokenKind::FatArrow => "=>",
            TokenKind::ColonColon => "::",
            TokenKind::Colon => ":",
            TokenKind::Semi => ";",
            TokenKind::Comma => ",",
            TokenKind::Ellipsis => "...",
            TokenKind::DotDot => "..",
            TokenKind::Dot => ".",
            TokenKind::PlusColon => "+:",
            TokenKind::PlusPlus => "++",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::EqEq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Eq => "=",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::HashBracket => "#[",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Number(n) => return f.write_str(n),
            TokenKind::String(s) => return write!(f, "{s:?}"),
            TokenKind::Ident(s) => return f.write_str(s),
            TokenKind::Eof => "end of file",
        };
        f.write_str(text)
    }
}
