#![forbid(unsafe_code)]

use std::mem;

use hdlx_ast::{
    ArrayLit, BinOp, Builtin, ChannelDecl, Conditional, ElseBranch, Expr, ExprKind, FormatMacro,
    FormatPreference, FormatStep, ForLoop, Ident, Invocation, MatchArm, ModuleMember, NameDefKind,
    NameRef, Number, NumberKind, Pattern, RefTarget, Span, Spawn, StructInstance, TypeAnnotation,
    TypeKind, TypeRef, TypeRefTarget, UnOp, join,
};
use hdlx_lex::TokenKind;

use super::Parser;
use super::types::is_type_keyword;
use crate::bindings::{BoundNode, ScopeKind};
use crate::error::{ParseError, ParseErrorKind};

const COMPARISON_LEVEL: u8 = 2;
const MAX_BINARY_LEVEL: u8 = 8;

/// Binary operator for `kind` at precedence `level` (0 binds loosest).
fn binop_at(kind: &TokenKind, level: u8) -> Option<BinOp> {
    let op = match (level, kind) {
        (0, TokenKind::OrOr) => BinOp::Or,
        (1, TokenKind::AndAnd) => BinOp::And,
        (2, TokenKind::EqEq) => BinOp::Eq,
        (2, TokenKind::Neq) => BinOp::Ne,
        (2, TokenKind::Lt) => BinOp::Lt,
        (2, TokenKind::Le) => BinOp::Le,
        (2, TokenKind::Gt) => BinOp::Gt,
        (2, TokenKind::Ge) => BinOp::Ge,
        (3, TokenKind::Pipe) => BinOp::BitOr,
        (4, TokenKind::Caret) => BinOp::BitXor,
        (5, TokenKind::Amp) => BinOp::BitAnd,
        (6, TokenKind::Shl) => BinOp::Shl,
        (6, TokenKind::Shr) => BinOp::Shr,
        (7, TokenKind::Plus) => BinOp::Add,
        (7, TokenKind::Minus) => BinOp::Sub,
        (7, TokenKind::PlusPlus) => BinOp::Concat,
        (8, TokenKind::Star) => BinOp::Mul,
        (8, TokenKind::Slash) => BinOp::Div,
        (8, TokenKind::Percent) => BinOp::Mod,
        _ => return None,
    };
    Some(op)
}

/// Macros with their own syntax; the rest come from the builtin registry.
const SYNTAX_MACROS: &[&str] = &["trace_fmt", "zero", "unroll_for"];

impl Parser {
    /// Parses one expression using the current bindings.
    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_binary(0)?;
        if self.eat(&TokenKind::DotDot).is_some() {
            let rhs = self.parse_binary(0)?;
            return Ok(self.mk(
                join(lhs.span, rhs.span),
                ExprKind::Range {
                    start: Box::new(lhs),
                    end: Box::new(rhs),
                },
            ));
        }
        Ok(lhs)
    }

    fn parse_binary(&mut self, level: u8) -> Result<Expr, ParseError> {
        if level > MAX_BINARY_LEVEL {
            return self.parse_cast();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        while let Some(op) = binop_at(self.peek_kind(), level) {
            self.next();
            let rhs = self.parse_binary(level + 1)?;
            lhs = self.mk(
                join(lhs.span, rhs.span),
                ExprKind::Binop {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
            if level == COMPARISON_LEVEL {
                if self.peek_kind().is_comparison() {
                    return Err(self.error(
                        ParseErrorKind::ChainedComparison,
                        "comparison operators cannot be chained",
                        self.peek_span(),
                    ));
                }
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_cast(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.parse_unary()?;
        while self.eat(&TokenKind::KwAs).is_some() {
            let ty = self.parse_type_annotation()?;
            e = self.mk(
                join(e.span, ty.span),
                ExprKind::Cast {
                    expr: Box::new(e),
                    ty: Box::new(ty),
                },
            );
        }
        Ok(e)
    }

    pub(crate) fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnOp::Invert,
            TokenKind::Minus => UnOp::Negate,
            _ => return self.parse_postfix(),
        };
        let tok = self.next();
        let operand = self.parse_unary()?;
        Ok(self.mk(
            join(tok.span, operand.span),
            ExprKind::Unop {
                op,
                operand: Box::new(operand),
            },
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.parse_primary()?;
        loop {
            let kind = self.peek_kind().clone();
            match kind {
                TokenKind::LParen => {
                    let (args, close) = self.parse_call_args()?;
                    e = self.mk(
                        join(e.span, close),
                        ExprKind::Invocation(Invocation {
                            callee: Box::new(e),
                            parametrics: Vec::new(),
                            args,
                        }),
                    );
                }
                TokenKind::Lt if self.accepts_parametrics(&e) => {
                    let parametrics = self.parse_parametric_args()?;
                    if !self.at(&TokenKind::LParen) {
                        return Err(self.syntax_error(
                            "Expected a '(' after parametrics for function invocation.",
                            self.peek_span(),
                        ));
                    }
                    let (args, close) = self.parse_call_args()?;
                    e = self.mk(
                        join(e.span, close),
                        ExprKind::Invocation(Invocation {
                            callee: Box::new(e),
                            parametrics,
                            args,
                        }),
                    );
                }
                TokenKind::Lt if is_imported_colon_ref(&e) => {
                    // `m::f<N>(x)` versus `m::LIMIT < x`: try the invocation
                    // first and fall back to a comparison.
                    let checkpoint = self.checkpoint();
                    match self.parse_parametric_args() {
                        Ok(parametrics) if self.at(&TokenKind::LParen) => {
                            let (args, close) = self.parse_call_args()?;
                            e = self.mk(
                                join(e.span, close),
                                ExprKind::Invocation(Invocation {
                                    callee: Box::new(e),
                                    parametrics,
                                    args,
                                }),
                            );
                        }
                        _ => {
                            self.restore(checkpoint);
                            break;
                        }
                    }
                }
                TokenKind::LBracket => e = self.parse_index(e)?,
                TokenKind::Dot => {
                    self.next();
                    let tok = self.next();
                    e = match tok.kind {
                        TokenKind::Number(text) => {
                            let index = super::parse_u64_literal(&text).ok_or_else(|| {
                                self.syntax_error("Invalid tuple index", tok.span)
                            })?;
                            self.mk(
                                join(e.span, tok.span),
                                ExprKind::TupleIndex {
                                    lhs: Box::new(e),
                                    index,
                                },
                            )
                        }
                        TokenKind::Ident(name) => self.mk(
                            join(e.span, tok.span),
                            ExprKind::Attr {
                                lhs: Box::new(e),
                                attr: Ident {
                                    span: tok.span,
                                    node: name,
                                },
                            },
                        ),
                        other => {
                            return Err(self.syntax_error(
                                format!("Expected a field name or tuple index after '.'; got: {other}"),
                                tok.span,
                            ));
                        }
                    };
                }
                _ => break,
            }
        }
        Ok(e)
    }

    /// Local functions and type-taking builtins are always followed by
    /// parametrics when a `<` comes next.
    fn accepts_parametrics(&self, e: &Expr) -> bool {
        if e.in_parens {
            return false;
        }
        match &e.kind {
            ExprKind::NameRef(NameRef {
                target: RefTarget::Builtin(b),
                ..
            }) => self.registry.info(*b).takes_type,
            ExprKind::NameRef(NameRef {
                target: RefTarget::Item(item),
                ..
            }) => matches!(self.member_of(*item), Some(ModuleMember::Function(_))),
            _ => false,
        }
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Span), ParseError> {
        self.expect(TokenKind::LParen)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_comma_list(&TokenKind::RParen);
        self.no_struct_literal = saved;
        let args = result?;
        let close = self.expect(TokenKind::RParen)?;
        Ok((args, close.span))
    }

    /// Expressions separated by commas (trailing comma allowed) up to, but
    /// not including, `close`.
    fn parse_comma_list(&mut self, close: &TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.at(close) {
            items.push(self.parse_expression()?);
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(items)
    }

    fn parse_index(&mut self, lhs: Expr) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_index_rest(lhs);
        self.no_struct_literal = saved;
        result
    }

    fn parse_index_rest(&mut self, lhs: Expr) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Colon).is_some() {
            let limit = if self.at(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let close = self.expect(TokenKind::RBracket)?;
            return Ok(self.mk(
                join(lhs.span, close.span),
                ExprKind::Slice {
                    lhs: Box::new(lhs),
                    start: None,
                    limit,
                },
            ));
        }
        let first = self.parse_expression()?;
        if self.eat(&TokenKind::PlusColon).is_some() {
            let width = self.parse_type_annotation()?;
            let close = self.expect(TokenKind::RBracket)?;
            return Ok(self.mk(
                join(lhs.span, close.span),
                ExprKind::WidthSlice {
                    lhs: Box::new(lhs),
                    start: Box::new(first),
                    width: Box::new(width),
                },
            ));
        }
        if self.eat(&TokenKind::Colon).is_some() {
            let limit = if self.at(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let close = self.expect(TokenKind::RBracket)?;
            return Ok(self.mk(
                join(lhs.span, close.span),
                ExprKind::Slice {
                    lhs: Box::new(lhs),
                    start: Some(Box::new(first)),
                    limit,
                },
            ));
        }
        let close = self.expect(TokenKind::RBracket)?;
        Ok(self.mk(
            join(lhs.span, close.span),
            ExprKind::Index {
                lhs: Box::new(lhs),
                index: Box::new(first),
            },
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Number(text) => {
                self.next();
                Ok(self.mk(
                    tok.span,
                    ExprKind::Number(Number {
                        text: text.clone(),
                        kind: NumberKind::Other,
                        ty: None,
                    }),
                ))
            }
            TokenKind::KwTrue | TokenKind::KwFalse => {
                self.next();
                Ok(self.mk(
                    tok.span,
                    ExprKind::Number(Number {
                        text: tok.kind.to_string(),
                        kind: NumberKind::Bool,
                        ty: None,
                    }),
                ))
            }
            TokenKind::String(s) => {
                self.next();
                Ok(self.mk(tok.span, ExprKind::String(s.clone())))
            }
            TokenKind::LParen => self.parse_paren_or_tuple(),
            TokenKind::LBracket => self.parse_array_literal(None),
            TokenKind::LBrace => {
                let block = self.parse_block_expression()?;
                Ok(self.mk(block.span, ExprKind::Block(block)))
            }
            TokenKind::KwIf => self.parse_conditional(),
            TokenKind::KwMatch => self.parse_match(),
            TokenKind::KwFor => {
                self.next();
                self.parse_for(tok.span, false)
            }
            TokenKind::KwChan => self.parse_channel_decl(),
            TokenKind::KwSpawn => self.parse_spawn(),
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind_n(1), TokenKind::Bang) && self.is_macro_name(name) {
                    return self.parse_macro();
                }
                if is_type_keyword(name) {
                    let ty = self.parse_type_annotation()?;
                    return self.parse_typed_literal(ty);
                }
                self.parse_name_expression()
            }
            other => Err(self.syntax_error(
                format!("Expected start of an expression; got: {other}"),
                tok.span,
            )),
        }
    }

    fn parse_paren_or_tuple(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LParen)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_paren_or_tuple_rest(open.span);
        self.no_struct_literal = saved;
        result
    }

    fn parse_paren_or_tuple_rest(&mut self, open: Span) -> Result<Expr, ParseError> {
        if let Some(close) = self.eat(&TokenKind::RParen) {
            return Ok(self.mk(join(open, close.span), ExprKind::Tuple(Vec::new())));
        }
        let mut first = self.parse_expression()?;
        if self.eat(&TokenKind::Comma).is_none() {
            let close = self.expect(TokenKind::RParen)?;
            first.in_parens = true;
            first.span = join(open, close.span);
            return Ok(first);
        }
        let mut items = vec![first];
        items.extend(self.parse_comma_list(&TokenKind::RParen)?);
        let close = self.expect(TokenKind::RParen)?;
        Ok(self.mk(join(open, close.span), ExprKind::Tuple(items)))
    }

    /// `[a, b, ...]`, optionally annotated as `T[N]:[...]`.
    fn parse_array_literal(&mut self, ty: Option<TypeAnnotation>) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LBracket)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_array_members();
        self.no_struct_literal = saved;
        let (members, has_ellipsis) = result?;
        let close = self.expect(TokenKind::RBracket)?;
        let start = ty.as_ref().map_or(open.span, |t| t.span);
        let is_constant = members.iter().all(|m| self.is_constant_expr(m));
        Ok(self.mk(
            join(start, close.span),
            ExprKind::Array(ArrayLit {
                ty: ty.map(Box::new),
                members,
                has_ellipsis,
                is_constant,
            }),
        ))
    }

    fn parse_array_members(&mut self) -> Result<(Vec<Expr>, bool), ParseError> {
        let mut members = Vec::new();
        while !self.at(&TokenKind::RBracket) {
            if let Some(tok) = self.eat(&TokenKind::Ellipsis) {
                if members.is_empty() || !self.at(&TokenKind::RBracket) {
                    return Err(self.syntax_error(
                        "'...' may only follow the last element of an array",
                        tok.span,
                    ));
                }
                return Ok((members, true));
            }
            members.push(self.parse_expression()?);
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok((members, false))
    }

    fn is_constant_expr(&self, e: &Expr) -> bool {
        match &e.kind {
            ExprKind::Number(_) | ExprKind::ColonRef(_) => true,
            ExprKind::NameRef(r) => match r.target {
                RefTarget::Item(item) => matches!(self.member_of(item), Some(ModuleMember::Const(_))),
                RefTarget::NameDef(id) => matches!(
                    self.name_defs.get(id.0 as usize).map(|d| d.kind),
                    Some(NameDefKind::Const)
                ),
                RefTarget::Builtin(_) => false,
            },
            ExprKind::Array(a) => a.is_constant,
            _ => false,
        }
    }

    /// The literal after `T:`: a number, a boolean, or an array.
    pub(crate) fn parse_typed_literal(&mut self, ty: TypeAnnotation) -> Result<Expr, ParseError> {
        self.expect(TokenKind::Colon)?;
        let tok = self.peek().clone();
        let (text, kind, end) = match &tok.kind {
            TokenKind::LBracket => return self.parse_array_literal(Some(ty)),
            TokenKind::Number(text) => {
                self.next();
                (text.clone(), NumberKind::Other, tok.span)
            }
            TokenKind::KwTrue | TokenKind::KwFalse => {
                self.next();
                (tok.kind.to_string(), NumberKind::Bool, tok.span)
            }
            TokenKind::Minus => {
                self.next();
                let num = self.next();
                let TokenKind::Number(text) = &num.kind else {
                    return Err(self.syntax_error(
                        format!("Expected a number after '-'; got: {}", num.kind),
                        num.span,
                    ));
                };
                (format!("-{text}"), NumberKind::Other, num.span)
            }
            other => {
                return Err(self.syntax_error(
                    format!("Expected a literal value after ':'; got: {other}"),
                    tok.span,
                ));
            }
        };
        Ok(self.mk(
            join(ty.span, end),
            ExprKind::Number(Number {
                text,
                kind,
                ty: Some(Box::new(ty)),
            }),
        ))
    }

    /// An identifier in expression position, resolved against the current
    /// bindings.
    fn parse_name_expression(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        let TokenKind::Ident(name) = &tok.kind else {
            return Err(self.syntax_error(
                format!("Expected an identifier; got: {}", tok.kind),
                tok.span,
            ));
        };
        let bound = self.resolve(name, tok.span)?;
        let followed_by_path = matches!(self.peek_kind_n(1), TokenKind::ColonColon);

        let target = match bound {
            BoundNode::Local(id) | BoundNode::Const(id) | BoundNode::ProcMember(id) => {
                RefTarget::NameDef(id)
            }
            BoundNode::Builtin(b) => RefTarget::Builtin(b),
            BoundNode::Item(item) => match self.member_of(item) {
                Some(ModuleMember::Struct(_) | ModuleMember::TypeAlias(_)) if !followed_by_path => {
                    return self.parse_type_led_expression();
                }
                Some(ModuleMember::Import(_)) => {
                    self.next();
                    let subject = NameRef {
                        name: name.clone(),
                        span: tok.span,
                        target: RefTarget::Item(item),
                    };
                    let colon = self.parse_colon_ref_path(subject)?;
                    if self.at(&TokenKind::LBrace) && !self.no_struct_literal {
                        let span = join(tok.span, colon.last().span);
                        let ty = TypeRef {
                            target: TypeRefTarget::Colon(colon),
                            parametrics: Vec::new(),
                            span,
                        };
                        return self.parse_struct_instance(ty);
                    }
                    let span = join(tok.span, colon.last().span);
                    return Ok(self.mk(span, ExprKind::ColonRef(colon)));
                }
                Some(ModuleMember::Enum(_) | ModuleMember::TypeAlias(_)) => {
                    self.next();
                    let subject = NameRef {
                        name: name.clone(),
                        span: tok.span,
                        target: RefTarget::Item(item),
                    };
                    let colon = self.parse_colon_ref_path(subject)?;
                    let span = join(tok.span, colon.last().span);
                    return Ok(self.mk(span, ExprKind::ColonRef(colon)));
                }
                Some(ModuleMember::Struct(_)) => {
                    return Err(self.syntax_error(
                        format!("Struct '{name}' has no '::' members"),
                        tok.span,
                    ));
                }
                _ => RefTarget::Item(item),
            },
        };
        self.next();
        Ok(self.mk(
            tok.span,
            ExprKind::NameRef(NameRef {
                name: name.clone(),
                span: tok.span,
                target,
            }),
        ))
    }

    /// `S { .. }`, `S<N> { .. }`, `Alias:42`, or `Alias[2]:[..]`.
    fn parse_type_led_expression(&mut self) -> Result<Expr, ParseError> {
        let type_ref = self.parse_type_ref()?;
        if self.at(&TokenKind::LBrace) {
            return self.parse_struct_instance(type_ref);
        }
        let ty = TypeAnnotation {
            span: type_ref.span,
            kind: TypeKind::Ref(type_ref),
        };
        let ty = self.parse_array_dims(ty)?;
        if !self.at(&TokenKind::Colon) {
            let tok = self.peek().clone();
            return Err(self.syntax_error(
                format!("Expected '{{' or ':' after a type name in an expression; got: {}", tok.kind),
                tok.span,
            ));
        }
        self.parse_typed_literal(ty)
    }

    fn parse_struct_instance(&mut self, ty: TypeRef) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_struct_members();
        self.no_struct_literal = saved;
        let (members, splat) = result?;
        let close = self.expect(TokenKind::RBrace)?;
        Ok(self.mk(
            join(ty.span, close.span),
            ExprKind::StructInstance(StructInstance {
                ty,
                members,
                splat: splat.map(Box::new),
            }),
        ))
    }

    #[allow(clippy::type_complexity)]
    fn parse_struct_members(&mut self) -> Result<(Vec<(Ident, Expr)>, Option<Expr>), ParseError> {
        let mut members: Vec<(Ident, Expr)> = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.eat(&TokenKind::DotDot).is_some() {
                let base = self.parse_expression()?;
                return Ok((members, Some(base)));
            }
            let field = self.expect_ident()?;
            if members.iter().any(|(n, _)| n.node == field.node) {
                return Err(self.syntax_error(
                    format!("Duplicate value seen for '{}' in struct instance", field.node),
                    field.span,
                ));
            }
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expression()?;
            members.push((field, value));
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok((members, None))
    }

    /// Parses `e` where a `{` would open a body rather than a struct literal.
    fn parse_head_expression(&mut self) -> Result<Expr, ParseError> {
        let saved = mem::replace(&mut self.no_struct_literal, true);
        let result = self.parse_expression();
        self.no_struct_literal = saved;
        result
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::KwIf)?;
        let test = self.parse_head_expression()?;
        let consequent = self.parse_block_expression()?;
        if !self.at(&TokenKind::KwElse) {
            return Err(self.syntax_error(
                "Conditional expressions require an 'else' branch",
                self.peek_span(),
            ));
        }
        self.next();
        let alternate = if self.at(&TokenKind::KwIf) {
            ElseBranch::If(Box::new(self.parse_conditional()?))
        } else {
            ElseBranch::Block(self.parse_block_expression()?)
        };
        let end = match &alternate {
            ElseBranch::If(e) => e.span,
            ElseBranch::Block(b) => b.span,
        };
        Ok(self.mk(
            join(start.span, end),
            ExprKind::Conditional(Conditional {
                test: Box::new(test),
                consequent,
                alternate,
            }),
        ))
    }

    fn parse_match(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::KwMatch)?;
        let subject = self.parse_head_expression()?;
        self.expect(TokenKind::LBrace)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_match_arms();
        self.no_struct_literal = saved;
        let arms = result?;
        let close = self.expect(TokenKind::RBrace)?;
        Ok(self.mk(
            join(start.span, close.span),
            ExprKind::Match {
                subject: Box::new(subject),
                arms,
            },
        ))
    }

    fn parse_match_arms(&mut self) -> Result<Vec<MatchArm>, ParseError> {
        let mut arms = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let depth = self.bindings.depth();
            self.bindings.push(ScopeKind::Block);
            let arm = self.parse_match_arm();
            self.bindings.truncate(depth);
            let arm = arm?;
            let is_block = matches!(arm.expr.kind, ExprKind::Block(_));
            arms.push(arm);
            if self.eat(&TokenKind::Comma).is_none() && !self.at(&TokenKind::RBrace) && !is_block {
                let tok = self.peek().clone();
                return Err(self.syntax_error(
                    format!("Expected ',' or '}}' after match arm; got: {}", tok.kind),
                    tok.span,
                ));
            }
        }
        Ok(arms)
    }

    fn parse_match_arm(&mut self) -> Result<MatchArm, ParseError> {
        let mut patterns = vec![self.parse_pattern()?];
        while self.eat(&TokenKind::Pipe).is_some() {
            patterns.push(self.parse_pattern()?);
        }
        self.expect(TokenKind::FatArrow)?;
        let expr = self.parse_expression()?;
        let span = join(patterns[0].span(), expr.span);
        Ok(MatchArm {
            patterns,
            expr,
            span,
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::LParen => {
                self.next();
                let mut items = Vec::new();
                while !self.at(&TokenKind::RParen) {
                    items.push(self.parse_pattern()?);
                    if self.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                let close = self.expect(TokenKind::RParen)?;
                Ok(Pattern::Tuple(items, join(tok.span, close.span)))
            }
            TokenKind::Ident(name) if name == "_" => {
                self.next();
                Ok(Pattern::Wildcard(tok.span))
            }
            TokenKind::Number(_)
            | TokenKind::KwTrue
            | TokenKind::KwFalse
            | TokenKind::Minus => Ok(Pattern::Value(self.parse_unary()?)),
            TokenKind::Ident(name) if is_type_keyword(name) => {
                Ok(Pattern::Value(self.parse_primary()?))
            }
            TokenKind::Ident(name) => {
                let is_value = match self.bindings.resolve(name) {
                    Ok(BoundNode::Local(_) | BoundNode::Const(_) | BoundNode::ProcMember(_)) => true,
                    Ok(BoundNode::Item(item)) => match self.member_of(item) {
                        Some(ModuleMember::Const(_)) => true,
                        Some(
                            ModuleMember::Enum(_)
                            | ModuleMember::TypeAlias(_)
                            | ModuleMember::Import(_)
                            | ModuleMember::Struct(_),
                        ) => matches!(self.peek_kind_n(1), TokenKind::ColonColon),
                        _ => false,
                    },
                    _ => false,
                };
                if is_value {
                    return Ok(Pattern::Value(self.parse_primary()?));
                }
                self.next();
                let id = self.add_name_def(name.clone(), tok.span, NameDefKind::MatchBinding, None);
                self.bindings.add(name.clone(), BoundNode::Local(id));
                Ok(Pattern::Bind(id, tok.span))
            }
            other => Err(self.syntax_error(
                format!("Expected a match pattern; got: {other}"),
                tok.span,
            )),
        }
    }

    /// `(i, acc)[: T] in iterable { body }(init)` after `for` or `unroll_for!`.
    fn parse_for(&mut self, start: Span, unroll: bool) -> Result<Expr, ParseError> {
        let id = self.node_id();
        let (names, defined) = self.parse_name_def_tree(NameDefKind::LoopBinding, Some(id))?;
        let ty = if self.eat(&TokenKind::Colon).is_some() {
            Some(Box::new(self.parse_type_annotation()?))
        } else {
            None
        };
        self.expect(TokenKind::KwIn)?;
        let iterable = self.parse_head_expression()?;

        let depth = self.bindings.depth();
        self.bindings.push(ScopeKind::Block);
        for (name, def) in defined {
            self.bindings.add(name, BoundNode::Local(def));
        }
        let body = self.parse_block_expression();
        self.bindings.truncate(depth);
        let body = body?;

        self.expect(TokenKind::LParen)?;
        let saved = mem::replace(&mut self.no_struct_literal, false);
        let init = self.parse_expression();
        self.no_struct_literal = saved;
        let init = init?;
        let close = self.expect(TokenKind::RParen)?;

        let l = ForLoop {
            names,
            ty,
            iterable: Box::new(iterable),
            body,
            init: Box::new(init),
        };
        Ok(Expr {
            id,
            span: join(start, close.span),
            in_parens: false,
            kind: if unroll {
                ExprKind::UnrollFor(l)
            } else {
                ExprKind::For(l)
            },
        })
    }

    /// `chan<T[, depth]>[dims]`
    fn parse_channel_decl(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::KwChan)?;
        self.expect(TokenKind::Lt)?;
        let payload = self.parse_type_annotation()?;
        let depth = if self.eat(&TokenKind::Comma).is_some() {
            Some(Box::new(self.parse_braced_or_unary()?))
        } else {
            None
        };
        let mut end = self.expect_closing_angle()?.span;
        let mut dims = Vec::new();
        while self.eat(&TokenKind::LBracket).is_some() {
            dims.push(self.parse_dim()?);
            end = self.expect(TokenKind::RBracket)?.span;
        }
        Ok(self.mk(
            join(start.span, end),
            ExprKind::ChannelDecl(ChannelDecl {
                payload: Box::new(payload),
                depth,
                dims,
            }),
        ))
    }

    fn parse_braced_or_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::LBrace).is_some() {
            let e = self.parse_expression()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(e);
        }
        self.parse_unary()
    }

    /// `spawn P<..>(args)`
    fn parse_spawn(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::KwSpawn)?;
        let name = self.expect_ident()?;
        let bound = self.resolve(&name.node, name.span)?;
        let callee = match bound {
            BoundNode::Item(item) => match self.member_of(item) {
                Some(ModuleMember::Proc(_)) => self.mk(
                    name.span,
                    ExprKind::NameRef(NameRef {
                        name: name.node.clone(),
                        span: name.span,
                        target: RefTarget::Item(item),
                    }),
                ),
                Some(ModuleMember::Import(_)) => {
                    let subject = NameRef {
                        name: name.node.clone(),
                        span: name.span,
                        target: RefTarget::Item(item),
                    };
                    let colon = self.parse_colon_ref_path(subject)?;
                    let span = join(name.span, colon.last().span);
                    self.mk(span, ExprKind::ColonRef(colon))
                }
                _ => {
                    return Err(self.syntax_error(
                        format!("'{}' is not a proc and cannot be spawned", name.node),
                        name.span,
                    ));
                }
            },
            _ => {
                return Err(self.syntax_error(
                    format!("'{}' is not a proc and cannot be spawned", name.node),
                    name.span,
                ));
            }
        };
        let parametrics = if self.at(&TokenKind::Lt) {
            self.parse_parametric_args()?
        } else {
            Vec::new()
        };
        let (args, close) = self.parse_call_args()?;
        Ok(self.mk(
            join(start.span, close),
            ExprKind::Spawn(Spawn {
                callee: Box::new(callee),
                parametrics,
                args,
            }),
        ))
    }

    fn is_macro_name(&self, name: &str) -> bool {
        SYNTAX_MACROS.contains(&name)
            || self
                .registry
                .lookup(&format!("{name}!"))
                .is_some_and(|info| info.is_macro)
    }

    fn parse_macro(&mut self) -> Result<Expr, ParseError> {
        let name = self.expect_ident()?;
        let bang = self.expect(TokenKind::Bang)?;
        let head = join(name.span, bang.span);
        let macro_builtin = self
            .registry
            .lookup(&format!("{}!", name.node))
            .filter(|info| info.is_macro)
            .map(|info| info.builtin);
        if let Some(builtin) = macro_builtin {
            let (args, close) = self.parse_call_args()?;
            if builtin == Builtin::Fail {
                self.check_fail_label(&args, head)?;
            }
            let callee = self.mk(
                head,
                ExprKind::NameRef(NameRef {
                    name: builtin.name().to_string(),
                    span: head,
                    target: RefTarget::Builtin(builtin),
                }),
            );
            return Ok(self.mk(
                join(head, close),
                ExprKind::Invocation(Invocation {
                    callee: Box::new(callee),
                    parametrics: Vec::new(),
                    args,
                }),
            ));
        }
        match name.node.as_str() {
            "trace_fmt" => {
                self.expect(TokenKind::LParen)?;
                let tok = self.next();
                let TokenKind::String(text) = &tok.kind else {
                    return Err(self.syntax_error(
                        format!("Expected a format string; got: {}", tok.kind),
                        tok.span,
                    ));
                };
                let format = self.parse_format_string(text, tok.span)?;
                let args = if self.eat(&TokenKind::Comma).is_some() {
                    let saved = mem::replace(&mut self.no_struct_literal, false);
                    let r = self.parse_comma_list(&TokenKind::RParen);
                    self.no_struct_literal = saved;
                    r?
                } else {
                    Vec::new()
                };
                let close = self.expect(TokenKind::RParen)?;
                let expected = format
                    .iter()
                    .filter(|s| matches!(s, FormatStep::Value(_)))
                    .count();
                if expected != args.len() {
                    return Err(self.syntax_error(
                        format!(
                            "trace_fmt! macro expects {expected} argument(s) from format but has {} argument(s)",
                            args.len()
                        ),
                        join(head, close.span),
                    ));
                }
                Ok(self.mk(
                    join(head, close.span),
                    ExprKind::FormatMacro(FormatMacro {
                        name: "trace_fmt!".to_string(),
                        format,
                        args,
                    }),
                ))
            }
            "zero" => {
                self.expect(TokenKind::Lt)?;
                let ty = self.parse_type_annotation()?;
                self.expect_closing_angle()?;
                self.expect(TokenKind::LParen)?;
                let close = self.expect(TokenKind::RParen)?;
                Ok(self.mk(join(head, close.span), ExprKind::ZeroMacro(Box::new(ty))))
            }
            "unroll_for" => self.parse_for(head, true),
            other => Err(self.syntax_error(format!("Unknown macro: '{other}!'"), head)),
        }
    }

    fn check_fail_label(&mut self, args: &[Expr], head: Span) -> Result<(), ParseError> {
        let Some(first) = args.first() else {
            return Err(self.syntax_error("fail! requires a label and a value", head));
        };
        let ExprKind::String(label) = &first.kind else {
            return Err(self.syntax_error(
                "The first argument to fail! must be a label string",
                first.span,
            ));
        };
        if !self.fail_labels.insert(label.clone()) {
            return Err(self.error(
                ParseErrorKind::DuplicateFailLabel,
                "A fail label must be unique",
                first.span,
            ));
        }
        Ok(())
    }

    fn parse_format_string(&self, text: &str, span: Span) -> Result<Vec<FormatStep>, ParseError> {
        let mut steps = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut spec = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => spec.push(ch),
                            None => {
                                return Err(self.syntax_error(
                                    "Unterminated '{' in format string",
                                    span,
                                ));
                            }
                        }
                    }
                    let preference = match spec.as_str() {
                        "" => FormatPreference::Default,
                        ":x" => FormatPreference::Hex,
                        ":b" => FormatPreference::Binary,
                        ":d" => FormatPreference::Decimal,
                        other => {
                            return Err(self.syntax_error(
                                format!("Invalid format specifier: '{{{other}}}'"),
                                span,
                            ));
                        }
                    };
                    if !literal.is_empty() {
                        steps.push(FormatStep::Text(mem::take(&mut literal)));
                    }
                    steps.push(FormatStep::Value(preference));
                }
                '}' => {
                    return Err(self.syntax_error("Unmatched '}' in format string", span));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            steps.push(FormatStep::Text(literal));
        }
        Ok(steps)
    }

    pub(crate) fn mk(&mut self, span: Span, kind: ExprKind) -> Expr {
        Expr {
            id: self.node_id(),
            span,
            in_parens: false,
            kind,
        }
    }
}

fn is_imported_colon_ref(e: &Expr) -> bool {
    !e.in_parens && matches!(&e.kind, ExprKind::ColonRef(_))
}
