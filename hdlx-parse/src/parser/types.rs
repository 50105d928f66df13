#![forbid(unsafe_code)]

use hdlx_ast::{
    BitsKeyword, ChannelDirection, ColonRef, Expr, ExprOrType, ModuleMember, NameRef, RefTarget,
    TypeAnnotation, TypeKind, TypeRef, TypeRefTarget, join,
};
use hdlx_lex::TokenKind;

use super::Parser;
use crate::bindings::BoundNode;
use crate::error::ParseError;

/// `u8` -> `(false, 8)`, `s32` -> `(true, 32)`.
pub(crate) fn builtin_bits_type(name: &str) -> Option<(bool, u32)> {
    let (signed, digits) = match name.as_bytes().first()? {
        b'u' => (false, &name[1..]),
        b's' => (true, &name[1..]),
        _ => return None,
    };
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let width: u32 = digits.parse().ok()?;
    (1..=64).contains(&width).then_some((signed, width))
}

pub(crate) fn is_type_keyword(name: &str) -> bool {
    builtin_bits_type(name).is_some() || matches!(name, "bool" | "token" | "uN" | "sN" | "bits")
}

impl Parser {
    pub(crate) fn parse_type_annotation(&mut self) -> Result<TypeAnnotation, ParseError> {
        let base = self.parse_type_base()?;
        self.parse_array_dims(base)
    }

    /// Wraps `base` in one array layer per trailing `[dim]`.
    pub(crate) fn parse_array_dims(
        &mut self,
        mut ty: TypeAnnotation,
    ) -> Result<TypeAnnotation, ParseError> {
        while self.at(&TokenKind::LBracket) {
            self.next();
            let dim = self.parse_dim()?;
            let close = self.expect(TokenKind::RBracket)?;
            ty = TypeAnnotation {
                span: join(ty.span, close.span),
                kind: TypeKind::Array {
                    element: Box::new(ty),
                    dim: Box::new(dim),
                },
            };
        }
        Ok(ty)
    }

    /// A dimension: either `{expr}` or a plain expression.
    pub(crate) fn parse_dim(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::LBrace).is_some() {
            let e = self.parse_expression()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(e);
        }
        self.parse_expression()
    }

    fn parse_type_base(&mut self) -> Result<TypeAnnotation, ParseError> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::LParen => {
                self.next();
                let mut members = Vec::new();
                while !self.at(&TokenKind::RParen) {
                    members.push(self.parse_type_annotation()?);
                    if self.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                let close = self.expect(TokenKind::RParen)?;
                Ok(TypeAnnotation {
                    span: join(tok.span, close.span),
                    kind: TypeKind::Tuple(members),
                })
            }
            TokenKind::KwChan => self.parse_channel_type(),
            TokenKind::Ident(name) => {
                if let Some((signed, width)) = builtin_bits_type(name) {
                    self.next();
                    return Ok(TypeAnnotation {
                        span: tok.span,
                        kind: TypeKind::Builtin { signed, width },
                    });
                }
                let keyword = match name.as_str() {
                    "bool" => {
                        self.next();
                        return Ok(TypeAnnotation {
                            span: tok.span,
                            kind: TypeKind::Bool,
                        });
                    }
                    "token" => {
                        self.next();
                        return Ok(TypeAnnotation {
                            span: tok.span,
                            kind: TypeKind::Token,
                        });
                    }
                    "uN" => Some(BitsKeyword::UN),
                    "sN" => Some(BitsKeyword::SN),
                    "bits" => Some(BitsKeyword::Bits),
                    _ => None,
                };
                if let Some(keyword) = keyword {
                    self.next();
                    self.expect(TokenKind::LBracket)?;
                    let dim = self.parse_dim()?;
                    let close = self.expect(TokenKind::RBracket)?;
                    return Ok(TypeAnnotation {
                        span: join(tok.span, close.span),
                        kind: TypeKind::Bits {
                            keyword,
                            dim: Box::new(dim),
                        },
                    });
                }
                let type_ref = self.parse_type_ref()?;
                Ok(TypeAnnotation {
                    span: type_ref.span,
                    kind: TypeKind::Ref(type_ref),
                })
            }
            other => Err(self.syntax_error(format!("Expected a type; got: {other}"), tok.span)),
        }
    }

    /// `chan<T>[dims] in|out`
    fn parse_channel_type(&mut self) -> Result<TypeAnnotation, ParseError> {
        let start = self.expect(TokenKind::KwChan)?;
        self.expect(TokenKind::Lt)?;
        let payload = self.parse_type_annotation()?;
        self.expect_closing_angle()?;
        let mut dims = Vec::new();
        while self.eat(&TokenKind::LBracket).is_some() {
            dims.push(self.parse_dim()?);
            self.expect(TokenKind::RBracket)?;
        }
        let tok = self.next();
        let direction = match &tok.kind {
            TokenKind::KwIn => ChannelDirection::In,
            TokenKind::Ident(s) if s == "out" => ChannelDirection::Out,
            other => {
                return Err(self.syntax_error(
                    format!("Expected channel direction ('in' or 'out'); got: {other}"),
                    tok.span,
                ));
            }
        };
        Ok(TypeAnnotation {
            span: join(start.span, tok.span),
            kind: TypeKind::Channel {
                payload: Box::new(payload),
                direction,
                dims,
            },
        })
    }

    /// Named struct, enum, or alias type, local or imported, with optional
    /// parametrics.
    pub(crate) fn parse_type_ref(&mut self) -> Result<TypeRef, ParseError> {
        let name = self.expect_ident()?;
        let bound = self.resolve(&name.node, name.span)?;
        let BoundNode::Item(item) = bound else {
            return Err(self.syntax_error(
                format!("'{}' does not name a type", name.node),
                name.span,
            ));
        };
        let target = match self.member_of(item) {
            Some(ModuleMember::Struct(_) | ModuleMember::Enum(_) | ModuleMember::TypeAlias(_)) => {
                TypeRefTarget::Item {
                    item,
                    name: name.node.clone(),
                }
            }
            Some(ModuleMember::Import(_)) => {
                let subject = NameRef {
                    name: name.node.clone(),
                    span: name.span,
                    target: RefTarget::Item(item),
                };
                TypeRefTarget::Colon(self.parse_colon_ref_path(subject)?)
            }
            _ => {
                return Err(self.syntax_error(
                    format!("'{}' does not name a type", name.node),
                    name.span,
                ));
            }
        };
        let mut span = match &target {
            TypeRefTarget::Colon(c) => join(name.span, c.last().span),
            TypeRefTarget::Item { .. } => name.span,
        };
        let parametrics = if self.at(&TokenKind::Lt) {
            let args = self.parse_parametric_args()?;
            span = join(span, self.prev_span());
            args
        } else {
            Vec::new()
        };
        Ok(TypeRef {
            target,
            parametrics,
            span,
        })
    }

    /// `::a::b` following an already-consumed subject.
    pub(crate) fn parse_colon_ref_path(&mut self, subject: NameRef) -> Result<ColonRef, ParseError> {
        let mut path = Vec::new();
        self.expect(TokenKind::ColonColon)?;
        path.push(self.expect_ident()?);
        while self.at(&TokenKind::ColonColon) && matches!(self.peek_kind_n(1), TokenKind::Ident(_)) {
            self.next();
            path.push(self.expect_ident()?);
        }
        Ok(ColonRef { subject, path })
    }

    /// `<arg, ...>` where each argument is a value or a type.
    pub(crate) fn parse_parametric_args(&mut self) -> Result<Vec<ExprOrType>, ParseError> {
        self.expect(TokenKind::Lt)?;
        let mut args = Vec::new();
        while !self.at_closing_angle() {
            args.push(self.parse_parametric_arg()?);
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect_closing_angle()?;
        Ok(args)
    }

    fn parse_parametric_arg(&mut self) -> Result<ExprOrType, ParseError> {
        if self.eat(&TokenKind::LBrace).is_some() {
            let e = self.parse_expression()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(ExprOrType::Expr(e));
        }
        if self.at_type_start() {
            let ty = self.parse_type_annotation()?;
            if self.at(&TokenKind::Colon) {
                return Ok(ExprOrType::Expr(self.parse_typed_literal(ty)?));
            }
            return Ok(ExprOrType::Type(ty));
        }
        Ok(ExprOrType::Expr(self.parse_unary()?))
    }

    /// The next tokens start a type rather than a value.
    pub(crate) fn at_type_start(&self) -> bool {
        match self.peek_kind() {
            TokenKind::KwChan => true,
            TokenKind::Ident(name) if is_type_keyword(name) => true,
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind_n(1), TokenKind::ColonColon) {
                    return false;
                }
                match self.bindings.resolve(name) {
                    Ok(BoundNode::Item(item)) => matches!(
                        self.member_of(item),
                        Some(
                            ModuleMember::Struct(_)
                                | ModuleMember::Enum(_)
                                | ModuleMember::TypeAlias(_)
                        )
                    ),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}
