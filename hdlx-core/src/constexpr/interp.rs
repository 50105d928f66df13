#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use hdlx_ast::{
    BinOp, Block, ColonRef, ElseBranch, Expr, ExprKind, ForLoop, FormatPreference, Function, Invocation, ItemId, Module, ModuleMember,
    NameDefId, NameDefKind, NameDefTree, NameRef, Pattern, RefTarget, Span, StatementKind,
};

use crate::builtins;
use crate::error::{ConstexprError, ValueError};
use crate::import_data::ImportData;
use crate::type_info::{TypeInfoArena, TypeInfoId};
use crate::types::{ConcreteType, ParametricEnv};
use crate::value::{FunctionRef, InterpValue, slice_bounds};

/// Nesting limit for compile-time calls.
pub const MAX_CALL_DEPTH: usize = 256;

pub(crate) struct Frame {
    pub module: Arc<Module>,
    pub type_info: TypeInfoId,
    pub env: ParametricEnv,
    pub locals: HashMap<NameDefId, InterpValue>,
}

/// Tree-walking evaluator over deduced ASTs. Reads types and invocation
/// targets from the type tables; never records anything.
pub(crate) struct Evaluator<'d> {
    data: &'d ImportData,
    depth: usize,
}

impl<'d> Evaluator<'d> {
    pub fn new(data: &'d ImportData) -> Self {
        Self { data, depth: 0 }
    }

    fn arena(&self) -> &'d TypeInfoArena {
        self.data.arena()
    }

    fn module(&self, name: &str, span: Span) -> Result<Arc<Module>, ConstexprError> {
        self.data
            .module(name)
            .map(|m| m.module.clone())
            .ok_or_else(|| ConstexprError::failed(format!("module '{name}' is not loaded"), span))
    }

    fn node_type(&self, frame: &Frame, expr: &Expr) -> Result<ConcreteType, ConstexprError> {
        self.arena()
            .node_type(frame.type_info, expr.id)
            .cloned()
            .ok_or_else(|| ConstexprError::failed("expression has no deduced type", expr.span))
    }

    pub fn call(
        &mut self,
        module: &str,
        item: ItemId,
        env: &ParametricEnv,
        args: Vec<InterpValue>,
    ) -> Result<InterpValue, ConstexprError> {
        let span = hdlx_ast::span(0, 0);
        let m = self.module(module, span)?;
        let Some(f) = m.function(item) else {
            return Err(ConstexprError::failed(format!("'{}' is not a function", m.member(item).name()), span));
        };
        let Some(instance) = self.data.function_instance(module, item, env) else {
            return Err(ConstexprError::failed(
                format!("function '{}' has not been typechecked for {env}", f.name.node),
                f.span,
            ));
        };
        let ti = instance.type_info;
        self.call_body(&m, f, ti, env.clone(), args)
    }

    fn call_body(
        &mut self,
        module: &Arc<Module>,
        f: &Function,
        type_info: TypeInfoId,
        env: ParametricEnv,
        args: Vec<InterpValue>,
    ) -> Result<InterpValue, ConstexprError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ConstexprError::failed(
                format!("call depth limit of {MAX_CALL_DEPTH} exceeded in '{}'", f.name.node),
                f.span,
            ));
        }
        if args.len() != f.params.len() {
            return Err(ConstexprError::failed(
                format!("'{}' expects {} argument(s); got {}", f.name.node, f.params.len(), args.len()),
                f.span,
            ));
        }
        let mut frame = Frame {
            module: module.clone(),
            type_info,
            env,
            locals: f.params.iter().map(|p| p.name_def).zip(args).collect(),
        };
        self.depth += 1;
        let result = self.eval_block(&mut frame, &f.body);
        self.depth -= 1;
        result
    }

    pub fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Result<InterpValue, ConstexprError> {
        if let Some(Some(v)) = self.arena().const_value(frame.type_info, expr.id) {
            return Ok(v.clone());
        }
        let span = expr.span;
        let fail = |e: ValueError| ConstexprError::failed(e.0, span);
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::String(_) => {
                Err(ConstexprError::failed("literal has no recorded value", span))
            }
            ExprKind::ZeroMacro(_) => self.node_type(frame, expr)?.zero_value().map_err(fail),
            ExprKind::NameRef(r) => self.name_ref(frame, r),
            ExprKind::ColonRef(c) => self.colon_ref(frame, c, span),
            ExprKind::Binop { op, lhs, rhs } => {
                let l = self.eval(frame, lhs)?;
                match op {
                    BinOp::And if !l.is_true().map_err(fail)? => return Ok(InterpValue::bool(false)),
                    BinOp::Or if l.is_true().map_err(fail)? => return Ok(InterpValue::bool(true)),
                    _ => {}
                }
                let r = self.eval(frame, rhs)?;
                InterpValue::binop(*op, &l, &r).map_err(fail)
            }
            ExprKind::Unop { op, operand } => {
                let v = self.eval(frame, operand)?;
                InterpValue::unop(*op, &v).map_err(fail)
            }
            ExprKind::Cast { expr: inner, .. } => {
                let v = self.eval(frame, inner)?;
                let target = self.node_type(frame, expr)?;
                builtins::cast(&v, &target).map_err(fail)
            }
            ExprKind::Tuple(items) => Ok(InterpValue::Tuple(self.eval_all(frame, items)?)),
            ExprKind::Array(lit) => {
                let mut items = self.eval_all(frame, &lit.members)?;
                if lit.has_ellipsis {
                    if let ConcreteType::Array { size, .. } = self.node_type(frame, expr)? {
                        let n = size.known().unwrap_or(0) as usize;
                        if let Some(last) = items.last().cloned() {
                            items.resize(n, last);
                        }
                    }
                }
                Ok(InterpValue::Array(items))
            }
            ExprKind::Index { lhs, index } => {
                let v = self.eval(frame, lhs)?;
                let i = self.eval(frame, index)?;
                v.index(&i).map_err(fail)
            }
            ExprKind::Slice { lhs, start, limit } => {
                let v = self.eval(frame, lhs)?;
                let width = v.bit_count().map_err(fail)? as u64;
                let start = match start {
                    Some(e) => Some(self.eval(frame, e)?.as_i128().map_err(fail)?),
                    None => None,
                };
                let limit = match limit {
                    Some(e) => Some(self.eval(frame, e)?.as_i128().map_err(fail)?),
                    None => None,
                };
                let (s, w) = slice_bounds(start, limit, width);
                v.slice(s as u128, w as u32).map_err(fail)
            }
            ExprKind::WidthSlice { lhs, start, .. } => {
                let v = self.eval(frame, lhs)?;
                let (_, _, s) = self.eval(frame, start)?.as_bits().map_err(fail)?;
                let (signed, width) = self
                    .node_type(frame, expr)?
                    .bits_info()
                    .ok_or_else(|| ConstexprError::failed("width slice of unsized type", span))?;
                v.slice(s, width as u32).and_then(|r| r.cast_bits(signed, width as u32)).map_err(fail)
            }
            ExprKind::TupleIndex { lhs, index } => self.eval(frame, lhs)?.tuple_index(*index).map_err(fail),
            ExprKind::Attr { lhs, attr } => {
                let v = self.eval(frame, lhs)?;
                let ConcreteType::Struct(st) = self.node_type(frame, lhs)? else {
                    return Err(ConstexprError::failed("attribute access on a non-struct", span));
                };
                let Some((idx, _)) = st.member(&attr.node) else {
                    return Err(ConstexprError::failed(format!("no member '{}'", attr.node), attr.span));
                };
                v.tuple_index(idx as u64).map_err(fail)
            }
            ExprKind::Invocation(inv) => self.invocation(frame, expr, inv),
            ExprKind::FormatMacro(m) => Err(ConstexprError::not_constexpr(format!("{}! has side effects", m.name), span)),
            ExprKind::StructInstance(si) => {
                let ConcreteType::Struct(st) = self.node_type(frame, expr)? else {
                    return Err(ConstexprError::failed("struct instance without a struct type", span));
                };
                let base = match &si.splat {
                    Some(b) => Some(self.eval(frame, b)?),
                    None => None,
                };
                let mut values = Vec::with_capacity(st.members.len());
                for (i, (name, _)) in st.members.iter().enumerate() {
                    let value = match si.members.iter().find(|(n, _)| &n.node == name) {
                        Some((_, e)) => self.eval(frame, e)?,
                        None => match &base {
                            Some(b) => b.tuple_index(i as u64).map_err(fail)?,
                            None => return Err(ConstexprError::failed(format!("missing member '{name}'"), span)),
                        },
                    };
                    values.push(value);
                }
                Ok(InterpValue::Tuple(values))
            }
            ExprKind::Conditional(c) => {
                if self.eval(frame, &c.test)?.is_true().map_err(fail)? {
                    self.eval_block(frame, &c.consequent)
                } else {
                    match &c.alternate {
                        ElseBranch::Block(b) => self.eval_block(frame, b),
                        ElseBranch::If(e) => self.eval(frame, e),
                    }
                }
            }
            ExprKind::Match { subject, arms } => {
                let v = self.eval(frame, subject)?;
                for arm in arms {
                    for pattern in &arm.patterns {
                        let mut binds = Vec::new();
                        if self.matches(frame, pattern, &v, &mut binds)? {
                            frame.locals.extend(binds);
                            return self.eval(frame, &arm.expr);
                        }
                    }
                }
                Err(ConstexprError::failed(
                    format!("The value was not matched: value: {}", v.format(FormatPreference::Default)),
                    span,
                ))
            }
            ExprKind::For(l) | ExprKind::UnrollFor(l) => self.eval_for(frame, l, span),
            ExprKind::Range { start, end } => {
                let a = self.eval(frame, start)?;
                let b = self.eval(frame, end)?;
                builtins::range(&a, &b).map_err(fail)
            }
            ExprKind::Block(b) => self.eval_block(frame, b),
            ExprKind::ChannelDecl(_) => Err(ConstexprError::not_constexpr("channel declarations are not constexpr", span)),
            ExprKind::Spawn(_) => Err(ConstexprError::not_constexpr("spawn is not constexpr", span)),
        }
    }

    fn eval_all(&mut self, frame: &mut Frame, exprs: &[Expr]) -> Result<Vec<InterpValue>, ConstexprError> {
        exprs.iter().map(|e| self.eval(frame, e)).collect()
    }

    pub fn eval_block(&mut self, frame: &mut Frame, block: &Block) -> Result<InterpValue, ConstexprError> {
        let mut result = InterpValue::unit();
        let last = block.statements.len().saturating_sub(1);
        for (i, stmt) in block.statements.iter().enumerate() {
            match &stmt.kind {
                StatementKind::Let(l) => {
                    let v = self.eval(frame, &l.rhs)?;
                    bind_tree(frame, &l.names, v);
                }
                StatementKind::Const(c) => {
                    let v = self.eval(frame, &c.value)?;
                    frame.locals.insert(c.name_def, v);
                }
                StatementKind::Expr(e) => {
                    let v = self.eval(frame, e)?;
                    if i == last && !block.trailing_semi {
                        result = v;
                    }
                }
            }
        }
        Ok(result)
    }

    fn eval_for(&mut self, frame: &mut Frame, l: &ForLoop, span: Span) -> Result<InterpValue, ConstexprError> {
        let items = match self.eval(frame, &l.iterable)? {
            InterpValue::Array(items) => items,
            other => return Err(ConstexprError::failed(format!("cannot iterate over {other}"), span)),
        };
        let mut acc = self.eval(frame, &l.init)?;
        for item in items {
            bind_tree(frame, &l.names, InterpValue::Tuple(vec![item, acc]));
            acc = self.eval_block(frame, &l.body)?;
        }
        Ok(acc)
    }

    fn matches(
        &mut self,
        frame: &mut Frame,
        pattern: &Pattern,
        value: &InterpValue,
        binds: &mut Vec<(NameDefId, InterpValue)>,
    ) -> Result<bool, ConstexprError> {
        match pattern {
            Pattern::Wildcard(_) => Ok(true),
            Pattern::Bind(id, _) => {
                binds.push((*id, value.clone()));
                Ok(true)
            }
            Pattern::Value(e) => Ok(self.eval(frame, e)? == *value),
            Pattern::Tuple(items, span) => {
                let values = value
                    .elements()
                    .map_err(|e| ConstexprError::failed(e.0, *span))?;
                for (p, v) in items.iter().zip(values) {
                    if !self.matches(frame, p, v, binds)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn name_ref(&mut self, frame: &Frame, r: &NameRef) -> Result<InterpValue, ConstexprError> {
        match r.target {
            RefTarget::NameDef(id) => {
                if let Some(v) = frame.locals.get(&id) {
                    return Ok(v.clone());
                }
                if let Some(v) = self.arena().name_def_value(frame.type_info, id) {
                    return Ok(v.clone());
                }
                if frame.module.name_def(id).kind == NameDefKind::ParametricBinding {
                    if let Some(v) = frame.env.get(&r.name) {
                        return Ok(v.clone());
                    }
                }
                Err(ConstexprError::not_constexpr(
                    format!("'{}' is not a compile-time constant", r.name),
                    r.span,
                ))
            }
            RefTarget::Item(item) => {
                let module = frame.module.clone();
                self.member_value(&module, item, r.span)
            }
            RefTarget::Builtin(b) => Ok(InterpValue::Function(FunctionRef::Builtin(b))),
        }
    }

    fn member_value(&self, module: &Arc<Module>, item: ItemId, span: Span) -> Result<InterpValue, ConstexprError> {
        match module.member(item) {
            ModuleMember::Const(c) => {
                let root = self
                    .data
                    .module(&module.name)
                    .map(|m| m.type_info)
                    .ok_or_else(|| ConstexprError::failed(format!("module '{}' is not loaded", module.name), span))?;
                self.arena()
                    .item_value(root, item)
                    .cloned()
                    .ok_or_else(|| ConstexprError::failed(format!("constant '{}' has no value yet", c.name.node), span))
            }
            ModuleMember::Function(f) => Ok(InterpValue::Function(FunctionRef::User {
                module: module.name.clone(),
                item,
                name: f.name.node.clone(),
            })),
            other => Err(ConstexprError::not_constexpr(
                format!("{} '{}' is not a value", other.kind_name(), other.name()),
                span,
            )),
        }
    }

    fn enum_value(&self, module: &Module, item: ItemId, name: &str, span: Span) -> Result<InterpValue, ConstexprError> {
        let ty = self
            .data
            .module(&module.name)
            .and_then(|m| self.arena().item_type(m.type_info, item));
        match ty {
            Some(ConcreteType::Meta(inner)) => match inner.as_ref() {
                ConcreteType::Enum(e) => e
                    .value(name)
                    .cloned()
                    .ok_or_else(|| ConstexprError::failed(format!("enum has no member '{name}'"), span)),
                other => Err(ConstexprError::failed(format!("{other} is not an enum"), span)),
            },
            _ => Err(ConstexprError::failed(format!("'{}' has no known type", module.member(item).name()), span)),
        }
    }

    fn colon_ref(&mut self, frame: &Frame, c: &ColonRef, span: Span) -> Result<InterpValue, ConstexprError> {
        let RefTarget::Item(item) = c.subject.target else {
            return Err(ConstexprError::failed(format!("cannot resolve '{}'", c.subject.name), span));
        };
        match frame.module.member(item) {
            ModuleMember::Import(_) => {
                let name = self
                    .arena()
                    .import(frame.type_info, item)
                    .ok_or_else(|| ConstexprError::failed("import was not resolved", span))?;
                let other = self.module(name, span)?;
                let Some((target, _)) = other.find_member(&c.path[0].node) else {
                    return Err(ConstexprError::failed(format!("no member '{}'", c.path[0].node), span));
                };
                match c.path.get(1) {
                    None => self.member_value(&other, target, span),
                    Some(member) => self.enum_value(&other, target, &member.node, span),
                }
            }
            _ => {
                let module = frame.module.clone();
                self.enum_value(&module, item, &c.last().node, span)
            }
        }
    }

    fn invocation(&mut self, frame: &mut Frame, expr: &Expr, inv: &Invocation) -> Result<InterpValue, ConstexprError> {
        let span = expr.span;
        if let Some(b) = inv.builtin() {
            if b.is_side_effecting() {
                return Err(ConstexprError::not_constexpr(format!("'{b}' has side effects"), span));
            }
            let args = self.eval_all(frame, &inv.args)?;
            let result_type = self.arena().node_type(frame.type_info, expr.id);
            return builtins::apply(b, &args, result_type).map_err(|e| ConstexprError::failed(e.0, span));
        }
        let Some(data) = self.arena().invocation(frame.type_info, expr.id, &frame.env) else {
            return Err(ConstexprError::failed("invocation was not typechecked", span));
        };
        let args = self.eval_all(frame, &inv.args)?;
        let module = self.module(&data.callee.module, span)?;
        let Some(f) = module.function(data.callee.item) else {
            return Err(ConstexprError::failed("callee is not a function", span));
        };
        self.call_body(&module, f, data.type_info, data.callee_env.clone(), args)
    }
}

fn bind_tree(frame: &mut Frame, tree: &NameDefTree, value: InterpValue) {
    match (tree, value) {
        (NameDefTree::Leaf(id, _), v) => {
            frame.locals.insert(*id, v);
        }
        (NameDefTree::Wildcard(_), _) => {}
        (NameDefTree::Tuple(items, _), InterpValue::Tuple(values)) => {
            for (item, v) in items.iter().zip(values) {
                bind_tree(frame, item, v);
            }
        }
        (NameDefTree::Tuple(..), _) => {}
    }
}
