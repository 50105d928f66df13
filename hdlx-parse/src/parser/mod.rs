#![forbid(unsafe_code)]

mod expr;
mod proc;
mod types;

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use hdlx_ast::{
    Block, BuiltinRegistry, ConstStmt, ConstantDef, EnumDef, EnumMember, Function, FunctionTag,
    Ident, Import, ItemId, Let, Module, ModuleMember, NameDef, NameDefId, NameDefKind,
    NameDefTree, NodeId, Param, ParametricBinding, SourceFile, Span, Statement, StatementKind,
    StructDef, StructMember, TestAttribute, TypeAlias, builtins, join, span_between,
};
use hdlx_lex::{Scanner, Token, TokenKind};
use tracing::debug;

use crate::ParseConfig;
use crate::bindings::{BoundNode, Bindings, NameResolutionError, ScopeKind};
use crate::error::{ParseError, ParseErrorKind};

/// Recursive-descent parser over one source file.
///
/// Names are resolved while parsing: every reference is bound to the
/// definition visible at its point of use, so a `Module` produced by
/// `parse_module` contains no unresolved names.
pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    source: Arc<SourceFile>,
    module_name: String,
    config: ParseConfig,
    registry: &'static BuiltinRegistry,
    bindings: Bindings,
    name_defs: Vec<NameDef>,
    members: Vec<ModuleMember>,
    next_node: u32,
    fail_labels: HashSet<String>,
    /// Set while parsing `if`/`match`/`for` heads, where `{` opens the body.
    no_struct_literal: bool,
}

/// Parser state restored when a speculative parse is abandoned.
struct Checkpoint {
    idx: usize,
    tokens: Vec<Token>,
    name_defs: usize,
    depth: usize,
}

pub(crate) enum Attribute {
    Test(Span),
    TestProc(Span),
    QuickCheck(Option<u64>, Span),
    ExternVerilog(String, Span),
}

impl Parser {
    pub fn new(text: &str, filename: &str, module_name: &str) -> Result<Self, ParseError> {
        Self::with_config(text, filename, module_name, ParseConfig::default())
    }

    pub fn with_config(
        text: &str,
        filename: &str,
        module_name: &str,
        config: ParseConfig,
    ) -> Result<Self, ParseError> {
        let source = Arc::new(SourceFile::new(filename, text));
        let tokens = Scanner::new(text).lex().map_err(|e| ParseError {
            kind: ParseErrorKind::Lex,
            location: source.location(e.span),
            message: e.message,
            span: e.span,
        })?;
        let registry = builtins();
        Ok(Self {
            tokens,
            idx: 0,
            source,
            module_name: module_name.to_string(),
            config,
            registry,
            bindings: Bindings::new(registry),
            name_defs: Vec::new(),
            members: Vec::new(),
            next_node: 0,
            fail_labels: HashSet::new(),
            no_struct_literal: false,
        })
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn name_defs(&self) -> &[NameDef] {
        &self.name_defs
    }

    pub fn into_name_defs(self) -> Vec<NameDef> {
        self.name_defs
    }

    pub fn expect_eof(&mut self) -> Result<(), ParseError> {
        if self.at(&TokenKind::Eof) {
            return Ok(());
        }
        let tok = self.peek().clone();
        Err(self.syntax_error(
            format!("Expected end of input; got: {}", tok.kind),
            tok.span,
        ))
    }

    /// Binds `name` as a local in the current scope, as if a `let` had
    /// introduced it.
    pub fn predefine(&mut self, name: &str) -> NameDefId {
        let id = self.add_name_def(name.to_string(), span_between(0, 0), NameDefKind::Let, None);
        self.bindings.add(name, BoundNode::Local(id));
        id
    }

    pub fn parse_module(mut self) -> Result<Module, ParseError> {
        while !self.at(&TokenKind::Eof) {
            let attribute = if self.at(&TokenKind::HashBracket) {
                Some(self.parse_attribute()?)
            } else {
                None
            };
            let is_public = self.eat(&TokenKind::KwPub).is_some();
            let kind = self.peek_kind().clone();
            let member = match (kind, attribute) {
                (TokenKind::KwFn, attribute) => {
                    let mut f = self.parse_function(is_public)?;
                    match attribute {
                        Some(Attribute::Test(_)) => f.attribute = Some(TestAttribute::Test),
                        Some(Attribute::QuickCheck(test_count, _)) => {
                            f.attribute = Some(TestAttribute::QuickCheck { test_count })
                        }
                        Some(Attribute::ExternVerilog(template, _)) => f.extern_verilog = Some(template),
                        Some(Attribute::TestProc(span)) => {
                            return Err(self.syntax_error(
                                "#[test_proc] can only be applied to a proc",
                                span,
                            ));
                        }
                        None => {}
                    }
                    ModuleMember::Function(f)
                }
                (TokenKind::KwProc, attribute) => {
                    let mut p = self.parse_proc(is_public)?;
                    match attribute {
                        Some(Attribute::TestProc(_)) => p.is_test = true,
                        Some(Attribute::Test(span))
                        | Some(Attribute::QuickCheck(_, span))
                        | Some(Attribute::ExternVerilog(_, span)) => {
                            return Err(self.syntax_error(
                                "this attribute can only be applied to a function",
                                span,
                            ));
                        }
                        None => {}
                    }
                    ModuleMember::Proc(p)
                }
                (_, Some(Attribute::Test(span)))
                | (_, Some(Attribute::TestProc(span)))
                | (_, Some(Attribute::QuickCheck(_, span)))
                | (_, Some(Attribute::ExternVerilog(_, span))) => {
                    return Err(self.syntax_error(
                        "attributes must be followed by a function or proc",
                        span,
                    ));
                }
                (TokenKind::KwStruct, None) => ModuleMember::Struct(self.parse_struct(is_public)?),
                (TokenKind::KwEnum, None) => ModuleMember::Enum(self.parse_enum(is_public)?),
                (TokenKind::KwType, None) => {
                    ModuleMember::TypeAlias(self.parse_type_alias(is_public)?)
                }
                (TokenKind::KwConst, None) => ModuleMember::Const(self.parse_constant(is_public)?),
                (TokenKind::KwImport, None) if !is_public => {
                    ModuleMember::Import(self.parse_import()?)
                }
                (other, None) => {
                    let message = format!(
                        "Expected start of a module member (fn, proc, struct, enum, type, const, import); got: {other}"
                    );
                    return Err(self.syntax_error(message, self.peek_span()));
                }
            };
            self.add_member(member)?;
        }

        debug!(
            module = %self.module_name,
            members = self.members.len(),
            name_defs = self.name_defs.len(),
            "parsed module"
        );
        Ok(Module {
            name: self.module_name,
            source: self.source,
            members: self.members,
            name_defs: self.name_defs,
            node_count: self.next_node,
        })
    }

    fn add_member(&mut self, member: ModuleMember) -> Result<ItemId, ParseError> {
        let name = member.name().to_string();
        let id = ItemId(self.members.len() as u32);
        match self.bindings.module_level(&name) {
            Some(BoundNode::Item(pending)) if pending == id => {}
            Some(_) => return Err(self.duplicate_member(&name, member.span())),
            None => self.bindings.add_module_level(name, BoundNode::Item(id)),
        }
        self.members.push(member);
        Ok(id)
    }

    /// Binds the name of the function or proc being parsed to the item it
    /// will become, so its own body can refer to it.
    pub(crate) fn bind_pending_member(&mut self, name: &Ident) -> Result<(), ParseError> {
        if self.bindings.module_level(&name.node).is_some() {
            return Err(self.duplicate_member(&name.node, name.span));
        }
        let id = ItemId(self.members.len() as u32);
        self.bindings
            .add_module_level(name.node.clone(), BoundNode::Item(id));
        Ok(())
    }

    fn duplicate_member(&self, name: &str, span: Span) -> ParseError {
        self.syntax_error(format!("Name '{name}' is defined twice in this module."), span)
    }

    fn parse_attribute(&mut self) -> Result<Attribute, ParseError> {
        let start = self.expect(TokenKind::HashBracket)?;
        let name = self.expect_ident()?;
        let attribute = match name.node.as_str() {
            "test" => Attribute::Test(name.span),
            "test_proc" => {
                if !self.config.allow_test_proc {
                    return Err(self.syntax_error(
                        "#[test_proc] is not enabled in this parse configuration",
                        name.span,
                    ));
                }
                Attribute::TestProc(name.span)
            }
            "quickcheck" => {
                if !self.config.allow_quickcheck {
                    return Err(self.syntax_error(
                        "#[quickcheck] is not enabled in this parse configuration",
                        name.span,
                    ));
                }
                let mut test_count = None;
                if self.eat(&TokenKind::LParen).is_some() {
                    let key = self.expect_ident()?;
                    if key.node != "test_count" {
                        return Err(self.syntax_error(
                            format!("Unknown quickcheck option: '{}'", key.node),
                            key.span,
                        ));
                    }
                    self.expect(TokenKind::Eq)?;
                    let tok = self.next();
                    let TokenKind::Number(text) = &tok.kind else {
                        return Err(self.syntax_error(
                            format!("Expected a test count; got: {}", tok.kind),
                            tok.span,
                        ));
                    };
                    let count = parse_u64_literal(text).ok_or_else(|| {
                        self.syntax_error("Invalid quickcheck test count", tok.span)
                    })?;
                    test_count = Some(count);
                    self.expect(TokenKind::RParen)?;
                }
                Attribute::QuickCheck(test_count, join(start.span, name.span))
            }
            "extern_verilog" => {
                self.expect(TokenKind::LParen)?;
                let tok = self.next();
                let TokenKind::String(template) = &tok.kind else {
                    return Err(self.syntax_error(
                        format!("Expected a Verilog template string; got: {}", tok.kind),
                        tok.span,
                    ));
                };
                let template = template.clone();
                self.expect(TokenKind::RParen)?;
                Attribute::ExternVerilog(template, join(start.span, name.span))
            }
            other => {
                return Err(self.syntax_error(
                    format!("Unknown attribute: '{other}'"),
                    name.span,
                ));
            }
        };
        self.expect(TokenKind::RBracket)?;
        Ok(attribute)
    }

    /// Parses `fn name<...>(...) -> T { ... }` starting at the `fn` keyword.
    pub fn parse_function(&mut self, is_public: bool) -> Result<Function, ParseError> {
        let start = self.expect(TokenKind::KwFn)?;
        let name = self.expect_ident()?;
        self.bind_pending_member(&name)?;
        let depth = self.bindings.depth();
        self.bindings.push(ScopeKind::Function);
        let saved_labels = mem::take(&mut self.fail_labels);
        let result = self.parse_function_rest(start.span, name, is_public);
        self.fail_labels = saved_labels;
        self.bindings.truncate(depth);
        result
    }

    fn parse_function_rest(
        &mut self,
        start: Span,
        name: Ident,
        is_public: bool,
    ) -> Result<Function, ParseError> {
        let parametrics = if self.at(&TokenKind::Lt) {
            self.parse_parametric_bindings()?
        } else {
            Vec::new()
        };
        let params = self.parse_params()?;
        let ret = if self.eat(&TokenKind::Arrow).is_some() {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        let body = self.parse_block_expression()?;
        Ok(Function {
            span: join(start, body.span),
            name,
            is_public,
            tag: FunctionTag::Normal,
            parametrics,
            params,
            ret,
            body,
            attribute: None,
            extern_verilog: None,
        })
    }

    /// `<N: u32, M: u32 = {N + N}>`; each binding is visible to later ones.
    fn parse_parametric_bindings(&mut self) -> Result<Vec<ParametricBinding>, ParseError> {
        self.expect(TokenKind::Lt)?;
        let mut out = Vec::new();
        while !self.at_closing_angle() {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_annotation()?;
            let default = if self.eat(&TokenKind::Eq).is_some() {
                self.expect(TokenKind::LBrace)?;
                let e = self.parse_expression()?;
                self.expect(TokenKind::RBrace)?;
                Some(e)
            } else {
                None
            };
            let name_def = self.add_name_def(
                name.node.clone(),
                name.span,
                NameDefKind::ParametricBinding,
                None,
            );
            self.bindings.add(name.node.clone(), BoundNode::Local(name_def));
            out.push(ParametricBinding {
                name_def,
                name,
                ty,
                default,
            });
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect_closing_angle()?;
        Ok(out)
    }

    /// `(a: T, b: U,)`; names are bound in the current scope.
    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            params.push(self.parse_param(NameDefKind::Param)?);
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        for p in &params {
            let node = match self.name_defs[p.name_def.0 as usize].kind {
                NameDefKind::ProcMember => BoundNode::ProcMember(p.name_def),
                _ => BoundNode::Local(p.name_def),
            };
            self.bindings.add(p.name.node.clone(), node);
        }
        Ok(params)
    }

    fn parse_param(&mut self, kind: NameDefKind) -> Result<Param, ParseError> {
        let name = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;
        let name_def = self.add_name_def(name.node.clone(), name.span, kind, None);
        Ok(Param { name_def, name, ty })
    }

    fn parse_struct(&mut self, is_public: bool) -> Result<StructDef, ParseError> {
        let start = self.expect(TokenKind::KwStruct)?;
        let name = self.expect_ident()?;
        let depth = self.bindings.depth();
        self.bindings.push(ScopeKind::Function);
        let result = self.parse_struct_rest(start.span, name, is_public);
        self.bindings.truncate(depth);
        result
    }

    fn parse_struct_rest(
        &mut self,
        start: Span,
        name: Ident,
        is_public: bool,
    ) -> Result<StructDef, ParseError> {
        let parametrics = if self.at(&TokenKind::Lt) {
            self.parse_parametric_bindings()?
        } else {
            Vec::new()
        };
        self.expect(TokenKind::LBrace)?;
        let mut members: Vec<StructMember> = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let field = self.expect_ident()?;
            if members.iter().any(|m| m.name.node == field.node) {
                return Err(self.syntax_error(
                    format!("Duplicate struct member: '{}'", field.node),
                    field.span,
                ));
            }
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_annotation()?;
            members.push(StructMember { name: field, ty });
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        let end = self.expect(TokenKind::RBrace)?;
        Ok(StructDef {
            name,
            is_public,
            parametrics,
            members,
            span: join(start, end.span),
        })
    }

    fn parse_enum(&mut self, is_public: bool) -> Result<EnumDef, ParseError> {
        let start = self.expect(TokenKind::KwEnum)?;
        let name = self.expect_ident()?;
        let underlying = if self.eat(&TokenKind::Colon).is_some() {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        self.expect(TokenKind::LBrace)?;
        let mut values: Vec<EnumMember> = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let value_name = self.expect_ident()?;
            if values.iter().any(|v| v.name.node == value_name.node) {
                return Err(self.syntax_error(
                    format!("Duplicate enum value: '{}'", value_name.node),
                    value_name.span,
                ));
            }
            self.expect(TokenKind::Eq)?;
            let value = self.parse_expression()?;
            values.push(EnumMember {
                name: value_name,
                value,
            });
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        let end = self.expect(TokenKind::RBrace)?;
        Ok(EnumDef {
            name,
            is_public,
            underlying,
            values,
            span: join(start.span, end.span),
        })
    }

    fn parse_type_alias(&mut self, is_public: bool) -> Result<TypeAlias, ParseError> {
        let start = self.expect(TokenKind::KwType)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let ty = self.parse_type_annotation()?;
        let end = self.expect(TokenKind::Semi)?;
        Ok(TypeAlias {
            name,
            is_public,
            ty,
            span: join(start.span, end.span),
        })
    }

    fn parse_constant(&mut self, is_public: bool) -> Result<ConstantDef, ParseError> {
        let start = self.expect(TokenKind::KwConst)?;
        let name = self.expect_ident()?;
        let ty = if self.eat(&TokenKind::Colon).is_some() {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expression()?;
        let end = self.expect(TokenKind::Semi)?;
        Ok(ConstantDef {
            name,
            is_public,
            ty,
            value,
            span: join(start.span, end.span),
        })
    }

    fn parse_import(&mut self) -> Result<Import, ParseError> {
        let start = self.expect(TokenKind::KwImport)?;
        let mut path = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Dot).is_some() {
            path.push(self.expect_ident()?);
        }
        let alias = if self.eat(&TokenKind::KwAs).is_some() {
            Some(self.expect_ident()?)
        } else {
            None
        };
        let mut end = alias
            .as_ref()
            .map(|a| a.span)
            .or_else(|| path.last().map(|p| p.span))
            .unwrap_or(start.span);
        if let Some(semi) = self.eat(&TokenKind::Semi) {
            end = semi.span;
        }
        Ok(Import {
            path,
            alias,
            span: join(start.span, end),
        })
    }

    /// Parses `{ stmt; ...; expr }` in a fresh scope.
    pub fn parse_block_expression(&mut self) -> Result<Block, ParseError> {
        let start = self.expect(TokenKind::LBrace)?;
        let id = self.node_id();
        let depth = self.bindings.depth();
        self.bindings.push(ScopeKind::Block);
        let saved_no_struct = mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_block_statements();
        self.no_struct_literal = saved_no_struct;
        self.bindings.truncate(depth);
        let (statements, trailing_semi) = result?;
        let end = self.expect(TokenKind::RBrace)?;
        Ok(Block {
            id,
            span: join(start.span, end.span),
            statements,
            trailing_semi,
        })
    }

    fn parse_block_statements(&mut self) -> Result<(Vec<Statement>, bool), ParseError> {
        let mut statements = Vec::new();
        let mut trailing_semi = false;
        while !self.at(&TokenKind::RBrace) {
            let id = self.node_id();
            let start = self.peek_span();
            let (kind, needs_semi) = if self.at(&TokenKind::KwLet) {
                (StatementKind::Let(self.parse_let(id)?), true)
            } else if self.at(&TokenKind::KwConst) {
                (StatementKind::Const(self.parse_const_stmt(id)?), true)
            } else {
                (StatementKind::Expr(self.parse_expression()?), false)
            };
            let mut end = self.prev_span();
            let had_semi = if needs_semi {
                end = self.expect(TokenKind::Semi)?.span;
                true
            } else if let Some(semi) = self.eat(&TokenKind::Semi) {
                end = semi.span;
                true
            } else if self.at(&TokenKind::RBrace) {
                false
            } else {
                let tok = self.peek().clone();
                return Err(self.syntax_error(
                    format!("Expected ';' or '}}' after statement; got: {}", tok.kind),
                    tok.span,
                ));
            };
            statements.push(Statement {
                id,
                span: join(start, end),
                kind,
            });
            trailing_semi = had_semi;
        }
        Ok((statements, trailing_semi))
    }

    fn parse_let(&mut self, stmt: NodeId) -> Result<Let, ParseError> {
        self.expect(TokenKind::KwLet)?;
        let (names, defined) = self.parse_name_def_tree(NameDefKind::Let, Some(stmt))?;
        let ty = if self.eat(&TokenKind::Colon).is_some() {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let rhs = self.parse_expression()?;
        for (name, id) in defined {
            self.bindings.add(name, BoundNode::Local(id));
        }
        Ok(Let { names, ty, rhs })
    }

    fn parse_const_stmt(&mut self, stmt: NodeId) -> Result<ConstStmt, ParseError> {
        self.expect(TokenKind::KwConst)?;
        let name = self.expect_ident()?;
        let ty = if self.eat(&TokenKind::Colon).is_some() {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expression()?;
        let name_def = self.add_name_def(name.node.clone(), name.span, NameDefKind::Const, Some(stmt));
        self.bindings.add(name.node.clone(), BoundNode::Const(name_def));
        Ok(ConstStmt {
            name_def,
            name,
            ty,
            value,
        })
    }

    /// Destructuring target; the returned names are bound by the caller once
    /// the definition is complete.
    fn parse_name_def_tree(
        &mut self,
        kind: NameDefKind,
        definer: Option<NodeId>,
    ) -> Result<(NameDefTree, Vec<(String, NameDefId)>), ParseError> {
        let mut defined = Vec::new();
        let tree = self.parse_name_def_tree_inner(kind, definer, &mut defined)?;
        Ok((tree, defined))
    }

    fn parse_name_def_tree_inner(
        &mut self,
        kind: NameDefKind,
        definer: Option<NodeId>,
        defined: &mut Vec<(String, NameDefId)>,
    ) -> Result<NameDefTree, ParseError> {
        if let Some(open) = self.eat(&TokenKind::LParen) {
            let mut items = Vec::new();
            while !self.at(&TokenKind::RParen) {
                items.push(self.parse_name_def_tree_inner(kind, definer, defined)?);
                if self.eat(&TokenKind::Comma).is_none() {
                    break;
                }
            }
            let close = self.expect(TokenKind::RParen)?;
            return Ok(NameDefTree::Tuple(items, join(open.span, close.span)));
        }
        let name = self.expect_ident()?;
        if name.node == "_" {
            return Ok(NameDefTree::Wildcard(name.span));
        }
        let id = self.add_name_def(name.node.clone(), name.span, kind, definer);
        defined.push((name.node, id));
        Ok(NameDefTree::Leaf(id, name.span))
    }

    // ---- shared helpers ----

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    fn add_name_def(
        &mut self,
        name: String,
        span: Span,
        kind: NameDefKind,
        definer: Option<NodeId>,
    ) -> NameDefId {
        let id = NameDefId(self.name_defs.len() as u32);
        self.name_defs.push(NameDef {
            name,
            span,
            kind,
            definer,
        });
        id
    }

    fn resolve(&self, name: &str, span: Span) -> Result<BoundNode, ParseError> {
        self.bindings.resolve(name).map_err(|e| {
            let kind = match e {
                NameResolutionError::NotFound(_) => ParseErrorKind::NameResolution,
                NameResolutionError::HiddenProcMember(..) => ParseErrorKind::ProcMemberVisibility,
            };
            self.error(kind, e.to_string(), span)
        })
    }

    fn member_of(&self, item: ItemId) -> Option<&ModuleMember> {
        self.members.get(item.0 as usize)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            idx: self.idx,
            tokens: self.tokens.clone(),
            name_defs: self.name_defs.len(),
            depth: self.bindings.depth(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.idx = checkpoint.idx;
        self.tokens = checkpoint.tokens;
        self.name_defs.truncate(checkpoint.name_defs);
        self.bindings.truncate(checkpoint.depth);
    }

    pub(crate) fn error(&self, kind: ParseErrorKind, message: impl Into<String>, span: Span) -> ParseError {
        ParseError {
            kind,
            message: message.into(),
            span,
            location: self.source.location(span),
        }
    }

    fn syntax_error(&self, message: impl Into<String>, span: Span) -> ParseError {
        self.error(ParseErrorKind::Syntax, message, span)
    }

    fn peek(&self) -> &Token {
        // The token stream always ends with `Eof`, which is never consumed.
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_n(&self, n: usize) -> &TokenKind {
        let i = (self.idx + n).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn peek_span(&self) -> Span {
        self.peek().span
    }

    fn prev_span(&self) -> Span {
        match self.idx.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(t) => t.span,
            None => self.peek_span(),
        }
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.idx += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        mem::discriminant(self.peek_kind()) == mem::discriminant(kind)
    }

    fn at_ident(&self, name: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(n) if n == name)
    }

    fn eat(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.at(kind) { Some(self.next()) } else { None }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        if self.at(&expected) {
            return Ok(self.next());
        }
        let tok = self.peek().clone();
        Err(self.syntax_error(
            format!("Expected '{expected}'; got: {}", tok.kind),
            tok.span,
        ))
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident(name) => {
                self.next();
                Ok(Ident {
                    span: tok.span,
                    node: name,
                })
            }
            other => Err(self.syntax_error(
                format!("Expected an identifier; got: {other}"),
                tok.span,
            )),
        }
    }

    fn at_closing_angle(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Gt | TokenKind::Shr)
    }

    /// Consumes one `>`, splitting a `>>` token when generics close back to
    /// back.
    fn expect_closing_angle(&mut self) -> Result<Token, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Gt => Ok(self.next()),
            TokenKind::Shr => {
                let offset = tok.span.offset();
                self.tokens[self.idx] = Token {
                    kind: TokenKind::Gt,
                    span: span_between(offset + 1, offset + 2),
                };
                Ok(Token {
                    kind: TokenKind::Gt,
                    span: span_between(offset, offset + 1),
                })
            }
            other => Err(self.syntax_error(format!("Expected '>'; got: {other}"), tok.span)),
        }
    }
}

/// Value of an unsigned literal in any supported radix.
pub(crate) fn parse_u64_literal(text: &str) -> Option<u64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if let Some(hex) = cleaned.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = cleaned.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()
    } else {
        cleaned.parse().ok()
    }
}
