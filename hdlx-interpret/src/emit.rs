#![forbid(unsafe_code)]

//! Lowers typed function and proc bodies to stack bytecode.

use std::collections::HashMap;
use std::sync::Arc;

use hdlx_ast::{
    BinOp, Block, Builtin, ColonRef, ElseBranch, Expr, ExprKind, FormatPreference, FormatStep, ForLoop, Function,
    Invocation, ItemId, Location, MatchArm, Module, NameDefId, NameDefKind, NameDefTree, NameRef, Pattern, Pos, Proc,
    RefTarget, SourceFile, Span, StatementKind, StructInstance, UnOp, walk,
};
use hdlx_core::{
    ConcreteType, FunctionRef, ImportData, InterpValue, ParametricEnv, TypeInfoArena, TypeInfoId, slice_bounds,
};
use tracing::{debug, instrument};

use crate::bytecode::{
    Bytecode, BytecodeData, BytecodeFunction, ChannelDesc, FailData, InvocationDesc, MatchArmItem, Op, SpawnDesc,
    TraceData,
};
use crate::error::EmitError;

/// Emits `f` as checked under `env` in `type_info`.
#[instrument(skip_all, fields(function = %f.name.node, %env))]
pub fn emit(
    data: &ImportData,
    type_info: TypeInfoId,
    f: &Function,
    env: &ParametricEnv,
) -> Result<BytecodeFunction, EmitError> {
    let mut e = Emitter::new(data, type_info, env)?;
    for p in &f.params {
        e.slot(p.name_def);
    }
    e.block(&f.body)?;
    Ok(e.finish(f.name.node.clone()))
}

/// Emits the `next` function of `p`. Proc members occupy the leading slots,
/// followed by the `next` parameters.
#[instrument(skip_all, fields(proc = %p.name.node, %env))]
pub fn emit_proc_next(
    data: &ImportData,
    type_info: TypeInfoId,
    p: &Proc,
    env: &ParametricEnv,
) -> Result<BytecodeFunction, EmitError> {
    let mut e = Emitter::new(data, type_info, env)?;
    for m in &p.members {
        e.slot(m.name_def);
    }
    for param in &p.next.params {
        e.slot(param.name_def);
    }
    e.block(&p.next.body)?;
    Ok(e.finish(format!("{}.next", p.name.node)))
}

/// Emits a standalone expression. Its free variables take the leading
/// slots in the order of [`walk::free_variables`].
pub fn emit_expression(
    data: &ImportData,
    type_info: TypeInfoId,
    expr: &Expr,
    env: &ParametricEnv,
) -> Result<BytecodeFunction, EmitError> {
    let mut e = Emitter::new(data, type_info, env)?;
    for id in walk::free_variables(expr) {
        if e.arena().name_def_value(type_info, id).is_none() {
            e.slot(id);
        }
    }
    e.expr(expr)?;
    Ok(e.finish("<expr>".to_string()))
}

/// Placeholder error location for failures not tied to a source span.
pub(crate) fn detached(message: impl Into<String>, file: &str) -> EmitError {
    let at = Pos { line: 1, col: 1 };
    EmitError {
        message: message.into(),
        span: hdlx_ast::span(0, 0),
        location: Location {
            file: file.to_string(),
            start: at,
            end: at,
        },
    }
}

struct Emitter<'a> {
    data: &'a ImportData,
    module: Arc<Module>,
    type_info: TypeInfoId,
    env: ParametricEnv,
    bytecodes: Vec<Bytecode>,
    slots: HashMap<NameDefId, u32>,
    next_slot: u32,
}

impl<'a> Emitter<'a> {
    fn new(data: &'a ImportData, type_info: TypeInfoId, env: &ParametricEnv) -> Result<Self, EmitError> {
        let name = &data.arena().get(type_info).module;
        let module = data
            .module(name)
            .map(|m| m.module.clone())
            .ok_or_else(|| detached(format!("module '{name}' has not been typechecked"), name))?;
        Ok(Self {
            data,
            module,
            type_info,
            env: env.clone(),
            bytecodes: Vec::new(),
            slots: HashMap::new(),
            next_slot: 0,
        })
    }

    fn finish(self, name: String) -> BytecodeFunction {
        debug!(%name, instructions = self.bytecodes.len(), slots = self.next_slot, "emitted");
        BytecodeFunction {
            name,
            source: self.module.source.clone(),
            slot_count: self.next_slot,
            bytecodes: self.bytecodes,
        }
    }

    fn arena(&self) -> &'a TypeInfoArena {
        self.data.arena()
    }

    fn source(&self) -> &SourceFile {
        &self.module.source
    }

    fn err(&self, message: impl Into<String>, span: Span) -> EmitError {
        EmitError::new(message, span, self.source())
    }

    fn node_type(&self, expr: &Expr) -> Result<ConcreteType, EmitError> {
        self.arena()
            .node_type(self.type_info, expr.id)
            .cloned()
            .ok_or_else(|| self.err("expression has no deduced type", expr.span))
    }

    fn const_value(&self, expr: &Expr) -> Option<InterpValue> {
        match self.arena().const_value(self.type_info, expr.id) {
            Some(Some(v)) => Some(v.clone()),
            _ => None,
        }
    }

    fn slot(&mut self, id: NameDefId) -> u32 {
        if let Some(&s) = self.slots.get(&id) {
            return s;
        }
        let s = self.temp_slot();
        self.slots.insert(id, s);
        s
    }

    fn temp_slot(&mut self) -> u32 {
        let s = self.next_slot;
        self.next_slot += 1;
        s
    }

    fn add(&mut self, span: Span, op: Op, data: Option<BytecodeData>) -> usize {
        self.bytecodes.push(Bytecode { span, op, data });
        self.bytecodes.len() - 1
    }

    fn op(&mut self, span: Span, op: Op) {
        self.add(span, op, None);
    }

    fn literal(&mut self, span: Span, value: InterpValue) {
        self.add(span, Op::Literal, Some(BytecodeData::Value(value)));
    }

    fn load(&mut self, span: Span, slot: u32) {
        self.add(span, Op::Load, Some(BytecodeData::Slot(slot)));
    }

    fn store(&mut self, span: Span, slot: u32) {
        self.add(span, Op::Store, Some(BytecodeData::Slot(slot)));
    }

    /// A forward jump whose offset is filled in by [`Self::land`].
    fn jump(&mut self, span: Span, op: Op) -> usize {
        self.add(span, op, Some(BytecodeData::Offset(0)))
    }

    fn land(&mut self, span: Span, jumps: &[usize]) {
        let dest = self.add(span, Op::JumpDest, None);
        for &at in jumps {
            self.bytecodes[at].data = Some(BytecodeData::Offset(dest as i64 - at as i64));
        }
    }

    fn jump_back(&mut self, span: Span, dest: usize) {
        let at = self.bytecodes.len();
        self.add(span, Op::JumpRel, Some(BytecodeData::Offset(dest as i64 - at as i64)));
    }

    fn block(&mut self, block: &Block) -> Result<(), EmitError> {
        let last = block.statements.len().checked_sub(1);
        let mut produced = false;
        for (i, stmt) in block.statements.iter().enumerate() {
            match &stmt.kind {
                StatementKind::Let(l) => {
                    self.expr(&l.rhs)?;
                    self.destructure(&l.names);
                }
                StatementKind::Const(c) => {
                    match self.const_value(&c.value) {
                        Some(v) => self.literal(c.value.span, v),
                        None => self.expr(&c.value)?,
                    }
                    let slot = self.slot(c.name_def);
                    self.store(stmt.span, slot);
                }
                StatementKind::Expr(e) => {
                    self.expr(e)?;
                    if Some(i) == last && !block.trailing_semi {
                        produced = true;
                    } else {
                        self.op(e.span, Op::Pop);
                    }
                }
            }
        }
        if !produced {
            self.literal(block.span, InterpValue::unit());
        }
        Ok(())
    }

    fn destructure(&mut self, tree: &NameDefTree) {
        match tree {
            NameDefTree::Leaf(id, span) => {
                let slot = self.slot(*id);
                self.store(*span, slot);
            }
            NameDefTree::Wildcard(span) => self.op(*span, Op::Pop),
            NameDefTree::Tuple(items, span) => {
                self.op(*span, Op::ExpandTuple);
                for item in items {
                    self.destructure(item);
                }
            }
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) -> Result<(), EmitError> {
        exprs.iter().try_for_each(|e| self.expr(e))
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), EmitError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::String(_) => {
                let v = self
                    .const_value(expr)
                    .ok_or_else(|| self.err("literal has no recorded value", span))?;
                self.literal(span, v);
            }
            ExprKind::NameRef(r) => self.name_ref(expr, r)?,
            ExprKind::ColonRef(c) => self.colon_ref(expr, c)?,
            ExprKind::Binop { op, lhs, rhs } => self.binop(span, *op, lhs, rhs)?,
            ExprKind::Unop { op, operand } => {
                self.expr(operand)?;
                let op = match op {
                    UnOp::Invert => Op::Invert,
                    UnOp::Negate => Op::Negate,
                };
                self.op(span, op);
            }
            ExprKind::Cast { expr: inner, .. } => {
                self.expr(inner)?;
                let target = self.node_type(expr)?;
                self.add(span, Op::Cast, Some(BytecodeData::Type(target)));
            }
            ExprKind::Tuple(items) => {
                self.exprs(items)?;
                self.add(span, Op::CreateTuple, Some(BytecodeData::Count(items.len())));
            }
            ExprKind::Array(lit) => {
                if let Some(v) = self.const_value(expr) {
                    self.literal(span, v);
                    return Ok(());
                }
                self.exprs(&lit.members)?;
                let mut count = lit.members.len();
                if lit.has_ellipsis {
                    let ConcreteType::Array { size, .. } = self.node_type(expr)? else {
                        return Err(self.err("array literal without an array type", span));
                    };
                    let total = size
                        .known()
                        .ok_or_else(|| self.err("array literal of unknown size", span))? as usize;
                    while count < total {
                        self.op(span, Op::Dup);
                        count += 1;
                    }
                }
                self.add(span, Op::CreateArray, Some(BytecodeData::Count(count)));
            }
            ExprKind::Index { lhs, index } => {
                self.expr(lhs)?;
                self.expr(index)?;
                self.op(span, Op::Index);
            }
            ExprKind::Slice { lhs, start, limit } => {
                self.expr(lhs)?;
                let width = self
                    .node_type(lhs)?
                    .bits_info()
                    .map(|(_, w)| w)
                    .ok_or_else(|| self.err("slice of a value without a known width", span))?;
                let start = self.slice_bound(start.as_deref())?;
                let limit = self.slice_bound(limit.as_deref())?;
                let (s, w) = slice_bounds(start, limit, width);
                self.literal(span, InterpValue::u32(s as u32));
                self.literal(span, InterpValue::u32((s + w) as u32));
                self.op(span, Op::Slice);
            }
            ExprKind::WidthSlice { lhs, start, .. } => {
                self.expr(lhs)?;
                self.expr(start)?;
                let target = self.node_type(expr)?;
                self.add(span, Op::WidthSlice, Some(BytecodeData::Type(target)));
            }
            ExprKind::TupleIndex { lhs, index } => {
                self.expr(lhs)?;
                self.literal(span, InterpValue::u32(*index as u32));
                self.op(span, Op::TupleIndex);
            }
            ExprKind::Attr { lhs, attr } => {
                let ConcreteType::Struct(st) = self.node_type(lhs)? else {
                    return Err(self.err("attribute access on a non-struct", span));
                };
                let (idx, _) = st
                    .member(&attr.node)
                    .ok_or_else(|| self.err(format!("struct has no member '{}'", attr.node), attr.span))?;
                self.expr(lhs)?;
                self.literal(span, InterpValue::u32(idx as u32));
                self.op(span, Op::TupleIndex);
            }
            ExprKind::Invocation(inv) => self.invocation(expr, inv)?,
            ExprKind::FormatMacro(m) => {
                self.exprs(&m.args)?;
                let trace = TraceData {
                    steps: m.format.clone(),
                    argc: m.args.len(),
                };
                self.add(span, Op::Trace, Some(BytecodeData::Trace(trace)));
            }
            ExprKind::ZeroMacro(_) => {
                let zero = self
                    .node_type(expr)?
                    .zero_value()
                    .map_err(|e| self.err(e.0, span))?;
                self.literal(span, zero);
            }
            ExprKind::StructInstance(si) => self.struct_instance(expr, si)?,
            ExprKind::Conditional(c) => {
                self.expr(&c.test)?;
                let to_consequent = self.jump(span, Op::JumpRelIf);
                match &c.alternate {
                    ElseBranch::Block(b) => self.block(b)?,
                    ElseBranch::If(e) => self.expr(e)?,
                }
                let to_end = self.jump(span, Op::JumpRel);
                self.land(c.consequent.span, &[to_consequent]);
                self.block(&c.consequent)?;
                self.land(span, &[to_end]);
            }
            ExprKind::Match { subject, arms } => self.match_expr(span, subject, arms)?,
            ExprKind::For(l) => self.for_loop(span, l)?,
            ExprKind::UnrollFor(l) => self.unroll_for(span, l)?,
            ExprKind::Range { start, end } => {
                self.expr(start)?;
                self.expr(end)?;
                self.op(span, Op::Range);
            }
            ExprKind::Block(b) => self.block(b)?,
            ExprKind::ChannelDecl(decl) => {
                let (payload, dims) = channel_shape(&self.node_type(expr)?)
                    .ok_or_else(|| self.err("channel declaration without a channel type", span))?;
                let depth = match &decl.depth {
                    Some(d) => Some(
                        self.const_value(d)
                            .ok_or_else(|| self.err("channel depth is not constexpr", d.span))?
                            .as_u64()
                            .map_err(|e| self.err(e.0, d.span))?,
                    ),
                    None => None,
                };
                let desc = ChannelDesc { payload, depth, dims };
                self.add(span, Op::CreateChannel, Some(BytecodeData::Channel(desc)));
            }
            ExprKind::Spawn(s) => {
                let spawn = self
                    .arena()
                    .spawn(self.type_info, expr.id, &self.env)
                    .cloned()
                    .ok_or_else(|| self.err("spawn was not typechecked", span))?;
                let name = self
                    .data
                    .module(&spawn.proc_ref.module)
                    .map(|m| m.module.member(spawn.proc_ref.item).name().to_string())
                    .unwrap_or_default();
                self.exprs(&s.args)?;
                let desc = SpawnDesc {
                    proc_ref: spawn.proc_ref,
                    name,
                    env: spawn.env,
                    type_info: spawn.type_info,
                    argc: s.args.len(),
                };
                self.add(span, Op::Spawn, Some(BytecodeData::Spawn(Box::new(desc))));
            }
        }
        Ok(())
    }

    fn slice_bound(&self, bound: Option<&Expr>) -> Result<Option<i128>, EmitError> {
        let Some(e) = bound else {
            return Ok(None);
        };
        let v = self
            .const_value(e)
            .ok_or_else(|| self.err("slice bound is not constexpr", e.span))?;
        v.as_i128().map(Some).map_err(|err| self.err(err.0, e.span))
    }

    /// Value known for `expr` without running it: a recorded constant, a
    /// parametric binding, or a name bound to a constant.
    fn static_value(&self, expr: &Expr) -> Option<InterpValue> {
        if let Some(v) = self.const_value(expr) {
            return Some(v);
        }
        let ExprKind::NameRef(NameRef {
            name,
            target: RefTarget::NameDef(id),
            ..
        }) = &expr.kind
        else {
            return None;
        };
        if self.module.name_def(*id).kind == NameDefKind::ParametricBinding {
            if let Some(v) = self.env.get(name) {
                return Some(v.clone());
            }
        }
        self.arena().name_def_value(self.type_info, *id).cloned()
    }

    fn function_value(module: &Module, item: ItemId) -> Option<InterpValue> {
        module.function(item).map(|f| {
            InterpValue::Function(FunctionRef::User {
                module: module.name.clone(),
                item,
                name: f.name.node.clone(),
            })
        })
    }

    fn name_ref(&mut self, expr: &Expr, r: &NameRef) -> Result<(), EmitError> {
        if let RefTarget::NameDef(id) = r.target {
            if let Some(&slot) = self.slots.get(&id) {
                self.load(r.span, slot);
                return Ok(());
            }
        }
        let value = match r.target {
            RefTarget::NameDef(_) => self.static_value(expr),
            RefTarget::Item(item) => self.const_value(expr).or_else(|| Self::function_value(&self.module, item)),
            RefTarget::Builtin(b) => Some(InterpValue::Function(FunctionRef::Builtin(b))),
        };
        let value = value.ok_or_else(|| self.err(format!("'{}' has no storage in this function", r.name), r.span))?;
        self.literal(r.span, value);
        Ok(())
    }

    fn colon_ref(&mut self, expr: &Expr, c: &ColonRef) -> Result<(), EmitError> {
        let imported_function = || {
            let RefTarget::Item(item) = c.subject.target else {
                return None;
            };
            let name = self.arena().import(self.type_info, item)?;
            let other = &self.data.module(name)?.module;
            let (target, _) = other.find_member(&c.last().node)?;
            Self::function_value(other, target)
        };
        let v = self.const_value(expr).or_else(imported_function).ok_or_else(|| {
            self.err(
                format!("'{}::{}' has no constant value", c.subject.name, c.last().node),
                expr.span,
            )
        })?;
        self.literal(expr.span, v);
        Ok(())
    }

    fn binop(&mut self, span: Span, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), EmitError> {
        self.expr(lhs)?;
        match op {
            // Right operand is skipped when the left one decides the result.
            BinOp::And | BinOp::Or => {
                self.op(span, Op::Dup);
                if op == BinOp::And {
                    self.op(span, Op::Invert);
                }
                let skip = self.jump(span, Op::JumpRelIf);
                self.expr(rhs)?;
                self.op(span, Op::from_binop(op));
                self.land(span, &[skip]);
            }
            _ => {
                self.expr(rhs)?;
                self.op(span, Op::from_binop(op));
            }
        }
        Ok(())
    }

    fn struct_instance(&mut self, expr: &Expr, si: &StructInstance) -> Result<(), EmitError> {
        let span = expr.span;
        let ConcreteType::Struct(st) = self.node_type(expr)? else {
            return Err(self.err("struct instance without a struct type", span));
        };
        let base = match &si.splat {
            Some(b) => {
                self.expr(b)?;
                let slot = self.temp_slot();
                self.store(b.span, slot);
                Some(slot)
            }
            None => None,
        };
        for (i, (name, _)) in st.members.iter().enumerate() {
            match (si.members.iter().find(|(n, _)| &n.node == name), base) {
                (Some((_, e)), _) => self.expr(e)?,
                (None, Some(slot)) => {
                    self.load(span, slot);
                    self.literal(span, InterpValue::u32(i as u32));
                    self.op(span, Op::TupleIndex);
                }
                (None, None) => return Err(self.err(format!("missing member '{name}'"), span)),
            }
        }
        self.add(span, Op::CreateTuple, Some(BytecodeData::Count(st.members.len())));
        Ok(())
    }

    fn invocation(&mut self, expr: &Expr, inv: &Invocation) -> Result<(), EmitError> {
        let span = expr.span;
        if let Some(b) = inv.builtin() {
            return self.builtin(expr, b, inv);
        }
        let data = self
            .arena()
            .invocation(self.type_info, expr.id, &self.env)
            .cloned()
            .ok_or_else(|| self.err("invocation was not typechecked", span))?;
        let name = self
            .data
            .module(&data.callee.module)
            .map(|m| m.module.member(data.callee.item).name().to_string())
            .ok_or_else(|| self.err(format!("module '{}' is not loaded", data.callee.module), span))?;
        self.exprs(&inv.args)?;
        let desc = InvocationDesc {
            callee: FunctionRef::User {
                module: data.callee.module,
                item: data.callee.item,
                name,
            },
            text: self.call_text(expr),
            argc: inv.args.len(),
            env: data.callee_env,
            type_info: Some(data.type_info),
            result_type: None,
        };
        self.add(span, Op::Call, Some(BytecodeData::Invocation(Box::new(desc))));
        Ok(())
    }

    fn call_text(&self, expr: &Expr) -> String {
        hdlx_parse::format_expr(&self.module.name_defs, expr)
    }

    fn builtin(&mut self, expr: &Expr, b: Builtin, inv: &Invocation) -> Result<(), EmitError> {
        let span = expr.span;
        let predicated = || Some(BytecodeData::Predicated);
        match b {
            Builtin::Fail => {
                let [label, payload] = inv.args.as_slice() else {
                    return Err(self.err("fail! takes a label and a value", span));
                };
                let ExprKind::String(label) = &label.kind else {
                    return Err(self.err("fail! label must be a string literal", label.span));
                };
                self.expr(payload)?;
                let data = FailData {
                    trace: TraceData {
                        steps: vec![FormatStep::Value(FormatPreference::Default)],
                        argc: 1,
                    },
                    label: label.clone(),
                };
                self.add(span, Op::Fail, Some(BytecodeData::Fail(data)));
                return Ok(());
            }
            Builtin::Range => {
                self.exprs(&inv.args)?;
                self.op(span, Op::Range);
                return Ok(());
            }
            Builtin::CheckedCast | Builtin::WideningCast => {
                self.exprs(&inv.args)?;
                let op = if b == Builtin::CheckedCast { Op::CheckedCast } else { Op::WideningCast };
                let target = self.node_type(expr)?;
                self.add(span, op, Some(BytecodeData::Type(target)));
                return Ok(());
            }
            _ => {}
        }
        self.exprs(&inv.args)?;
        match b {
            Builtin::Join => {
                self.add(span, Op::Join, Some(BytecodeData::Count(inv.args.len())));
            }
            Builtin::Send => self.op(span, Op::Send),
            Builtin::SendIf => {
                self.add(span, Op::Send, predicated());
            }
            Builtin::Recv => self.op(span, Op::Recv),
            Builtin::RecvIf => {
                self.add(span, Op::Recv, predicated());
            }
            Builtin::RecvNonBlocking => self.op(span, Op::RecvNonBlocking),
            Builtin::RecvIfNonBlocking => {
                self.add(span, Op::RecvNonBlocking, predicated());
            }
            _ => {
                let callee = InterpValue::Function(FunctionRef::Builtin(b));
                self.add(inv.callee.span, Op::Literal, Some(BytecodeData::Value(callee)));
                let desc = InvocationDesc {
                    callee: FunctionRef::Builtin(b),
                    text: self.call_text(expr),
                    argc: inv.args.len(),
                    env: ParametricEnv::new(),
                    type_info: None,
                    result_type: Some(self.node_type(expr)?),
                };
                self.add(span, Op::Call, Some(BytecodeData::Invocation(Box::new(desc))));
            }
        }
        Ok(())
    }

    fn match_expr(&mut self, span: Span, subject: &Expr, arms: &[MatchArm]) -> Result<(), EmitError> {
        self.expr(subject)?;
        let mut to_end = Vec::new();
        for arm in arms {
            for pattern in &arm.patterns {
                self.op(pattern.span(), Op::Dup);
                let item = self.match_item(pattern)?;
                self.add(pattern.span(), Op::MatchArm, Some(BytecodeData::MatchArm(item)));
                self.op(pattern.span(), Op::Invert);
                let next = self.jump(pattern.span(), Op::JumpRelIf);
                self.op(arm.span, Op::Pop);
                self.expr(&arm.expr)?;
                to_end.push(self.jump(arm.span, Op::JumpRel));
                self.land(arm.span, &[next]);
            }
        }
        let fallback = FailData {
            trace: TraceData {
                steps: vec![
                    FormatStep::Text("The value was not matched: value: ".to_string()),
                    FormatStep::Value(FormatPreference::Default),
                ],
                argc: 1,
            },
            label: "default".to_string(),
        };
        self.add(span, Op::Fail, Some(BytecodeData::Fail(fallback)));
        self.land(span, &to_end);
        Ok(())
    }

    fn match_item(&mut self, pattern: &Pattern) -> Result<MatchArmItem, EmitError> {
        Ok(match pattern {
            Pattern::Wildcard(_) => MatchArmItem::Wildcard,
            Pattern::Bind(id, _) => MatchArmItem::Store(self.slot(*id)),
            Pattern::Value(e) => {
                let local = match &e.kind {
                    ExprKind::NameRef(NameRef {
                        target: RefTarget::NameDef(id),
                        ..
                    }) => self.slots.get(id).copied(),
                    _ => None,
                };
                match (local, self.static_value(e)) {
                    (Some(slot), _) => MatchArmItem::Load(slot),
                    (None, Some(v)) => MatchArmItem::Value(v),
                    (None, None) => return Err(self.err("match pattern is not constexpr", e.span)),
                }
            }
            Pattern::Tuple(items, _) => {
                MatchArmItem::Tuple(items.iter().map(|p| self.match_item(p)).collect::<Result<_, _>>()?)
            }
        })
    }

    fn iteration_count(&self, l: &ForLoop) -> Result<u64, EmitError> {
        match self.node_type(&l.iterable)? {
            ConcreteType::Array { size, .. } => size
                .known()
                .ok_or_else(|| self.err("loop iterable has no known size", l.iterable.span)),
            other => Err(self.err(format!("cannot iterate over {other}"), l.iterable.span)),
        }
    }

    /// Packs `(element, accumulator)` and binds it to the loop names, then
    /// runs the body, leaving the new accumulator on the stack.
    fn loop_body(&mut self, l: &ForLoop, iterable: u32, index: impl FnOnce(&mut Self)) -> Result<(), EmitError> {
        let span = l.body.span;
        self.load(span, iterable);
        index(self);
        self.op(span, Op::Index);
        self.op(span, Op::Swap);
        self.add(span, Op::CreateTuple, Some(BytecodeData::Count(2)));
        self.destructure(&l.names);
        self.block(&l.body)
    }

    fn for_loop(&mut self, span: Span, l: &ForLoop) -> Result<(), EmitError> {
        let count = self.iteration_count(l)?;
        self.expr(&l.iterable)?;
        let iterable = self.temp_slot();
        self.store(span, iterable);
        let index = self.temp_slot();
        self.literal(span, InterpValue::u32(0));
        self.store(span, index);
        self.expr(&l.init)?;

        let top = self.add(span, Op::JumpDest, None);
        self.load(span, index);
        self.literal(span, InterpValue::u32(count as u32));
        self.op(span, Op::Eq);
        let exit = self.jump(span, Op::JumpRelIf);
        self.loop_body(l, iterable, |e| e.load(span, index))?;
        self.load(span, index);
        self.literal(span, InterpValue::u32(1));
        self.op(span, Op::Add);
        self.store(span, index);
        self.jump_back(span, top);
        self.land(span, &[exit]);
        Ok(())
    }

    fn unroll_for(&mut self, span: Span, l: &ForLoop) -> Result<(), EmitError> {
        let count = self.iteration_count(l)?;
        self.expr(&l.iterable)?;
        let iterable = self.temp_slot();
        self.store(span, iterable);
        self.expr(&l.init)?;
        for i in 0..count {
            self.loop_body(l, iterable, |e| e.literal(span, InterpValue::u32(i as u32)))?;
        }
        Ok(())
    }
}

/// Payload type and array dims of the ends produced by a channel declaration.
fn channel_shape(ty: &ConcreteType) -> Option<(ConcreteType, Vec<u64>)> {
    let ConcreteType::Tuple(ends) = ty else {
        return None;
    };
    let mut end = ends.first()?;
    let mut dims = Vec::new();
    loop {
        match end {
            ConcreteType::Array { element, size } => {
                dims.push(size.known()?);
                end = element;
            }
            ConcreteType::Channel { payload, .. } => {
                dims.reverse();
                return Some(((**payload).clone(), dims));
            }
            _ => return None,
        }
    }
}
