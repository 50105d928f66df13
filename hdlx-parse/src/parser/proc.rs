#![forbid(unsafe_code)]

use std::mem;

use hdlx_ast::{
    Function, FunctionTag, Ident, ModuleMember, NameDefKind, Param, Proc, Span, TypeAnnotation,
    TypeKind, TypeRefTarget, join,
};
use hdlx_lex::TokenKind;

use super::Parser;
use crate::bindings::{BoundNode, ScopeKind};
use crate::error::{ParseError, ParseErrorKind};

impl Parser {
    /// Parses `proc Name<..> { members; config(..) {..} init {..} next(..) {..} }`.
    pub fn parse_proc(&mut self, is_public: bool) -> Result<Proc, ParseError> {
        let start = self.expect(TokenKind::KwProc)?;
        let name = self.expect_ident()?;
        self.bind_pending_member(&name)?;
        let depth = self.bindings.depth();
        self.bindings.push(ScopeKind::Function);
        let saved_labels = mem::take(&mut self.fail_labels);
        let result = self.parse_proc_rest(start.span, name, is_public);
        self.fail_labels = saved_labels;
        self.bindings.truncate(depth);
        result
    }

    fn parse_proc_rest(
        &mut self,
        start: Span,
        name: Ident,
        is_public: bool,
    ) -> Result<Proc, ParseError> {
        let parametrics = if self.at(&TokenKind::Lt) {
            self.parse_parametric_bindings()?
        } else {
            Vec::new()
        };
        self.expect(TokenKind::LBrace)?;
        self.bindings.push(ScopeKind::ProcMembers);

        let mut members: Vec<Param> = Vec::new();
        let mut config = None;
        let mut init = None;
        let mut next = None;
        while !self.at(&TokenKind::RBrace) {
            let follows = self.peek_kind_n(1).clone();
            if self.at_ident("config") && matches!(follows, TokenKind::LParen) {
                let f = self.parse_proc_function(&name, FunctionTag::ProcConfig, is_public)?;
                self.set_once(&mut config, f, "config")?;
            } else if self.at_ident("init") && matches!(follows, TokenKind::LBrace) {
                let f = self.parse_proc_function(&name, FunctionTag::ProcInit, is_public)?;
                self.set_once(&mut init, f, "init")?;
            } else if self.at_ident("next") && matches!(follows, TokenKind::LParen) {
                let f = self.parse_proc_function(&name, FunctionTag::ProcNext, is_public)?;
                self.set_once(&mut next, f, "next")?;
            } else if let Some(tok) = self.eat(&TokenKind::KwPub) {
                return Err(self.syntax_error("Proc members cannot be public", tok.span));
            } else {
                let member = self.parse_param(NameDefKind::ProcMember)?;
                self.expect(TokenKind::Semi)?;
                self.bindings
                    .add(member.name.node.clone(), BoundNode::ProcMember(member.name_def));
                members.push(member);
            }
        }
        let end = self.expect(TokenKind::RBrace)?;
        let span = join(start, end.span);

        let missing = |phase: &str| {
            self.syntax_error(
                format!("Proc '{}' is missing its '{phase}' function", name.node),
                span,
            )
        };
        let config = config.ok_or_else(|| missing("config"))?;
        let init = init.ok_or_else(|| missing("init"))?;
        let next = next.ok_or_else(|| missing("next"))?;
        Ok(Proc {
            name,
            is_public,
            is_test: false,
            parametrics,
            members,
            config,
            init,
            next,
            span,
        })
    }

    fn set_once(
        &self,
        slot: &mut Option<Function>,
        f: Function,
        phase: &str,
    ) -> Result<(), ParseError> {
        if slot.is_some() {
            return Err(self.syntax_error(
                format!("A proc may only define one '{phase}' function"),
                f.name.span,
            ));
        }
        *slot = Some(f);
        Ok(())
    }

    fn parse_proc_function(
        &mut self,
        proc_name: &Ident,
        tag: FunctionTag,
        is_public: bool,
    ) -> Result<Function, ParseError> {
        let keyword = self.expect_ident()?;
        let (phase, scope) = match tag {
            FunctionTag::ProcConfig => ("config", ScopeKind::Config),
            FunctionTag::ProcInit => ("init", ScopeKind::Init),
            _ => ("next", ScopeKind::Function),
        };
        let name = Ident {
            span: keyword.span,
            node: format!("{}.{phase}", proc_name.node),
        };
        let depth = self.bindings.depth();
        self.bindings.push(scope);
        let saved_labels = mem::take(&mut self.fail_labels);
        let result = self.parse_proc_function_rest(name, tag, is_public);
        self.fail_labels = saved_labels;
        self.bindings.truncate(depth);
        result
    }

    fn parse_proc_function_rest(
        &mut self,
        name: Ident,
        tag: FunctionTag,
        is_public: bool,
    ) -> Result<Function, ParseError> {
        let params = if tag == FunctionTag::ProcInit {
            Vec::new()
        } else {
            self.parse_params()?
        };
        if tag == FunctionTag::ProcNext {
            if let Some(p) = params.iter().find(|p| self.contains_channel(&p.ty)) {
                return Err(self.error(
                    ParseErrorKind::ChannelInNextParams,
                    "Channels cannot be Proc next params.",
                    p.ty.span,
                ));
            }
        }
        let ret = if self.eat(&TokenKind::Arrow).is_some() {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        let body = self.parse_block_expression()?;
        Ok(Function {
            span: join(name.span, body.span),
            name,
            is_public,
            tag,
            parametrics: Vec::new(),
            params,
            ret,
            body,
            attribute: None,
            extern_verilog: None,
        })
    }

    /// Channel types nested anywhere in `ty`, looking through local aliases.
    fn contains_channel(&self, ty: &TypeAnnotation) -> bool {
        match &ty.kind {
            TypeKind::Channel { .. } => true,
            TypeKind::Tuple(members) => members.iter().any(|m| self.contains_channel(m)),
            TypeKind::Array { element, .. } => self.contains_channel(element),
            TypeKind::Ref(r) => match &r.target {
                TypeRefTarget::Item { item, .. } => match self.member_of(*item) {
                    Some(ModuleMember::TypeAlias(alias)) => self.contains_channel(&alias.ty),
                    _ => false,
                },
                TypeRefTarget::Colon(_) => false,
            },
            TypeKind::Builtin { .. } | TypeKind::Bool | TypeKind::Token | TypeKind::Bits { .. } => {
                false
            }
        }
    }
}
