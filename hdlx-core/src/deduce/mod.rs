#![forbid(unsafe_code)]

//! Type deduction: computes a `ConcreteType` for every expression and
//! records it in the current `TypeInfo`.

mod annotation;
mod invocation;
mod parametric;

use std::sync::Arc;

use hdlx_ast::{
    ArrayLit, BinOp, Block, ColonRef, Conditional, ElseBranch, Expr, ExprKind, ForLoop, FunctionTag,
    Ident, ItemId, Module, ModuleMember, NameDefId, NameDefKind, NameDefTree, NameRef, Number,
    NumberKind, Pattern, RefTarget, Span, StatementKind, StructInstance, TypeAnnotation,
};

use crate::constexpr;
use crate::error::{TypeError, TypeErrorKind};
use crate::import_data::ImportData;
use crate::type_info::{TypeInfo, TypeInfoArena, TypeInfoId};
use crate::types::{ConcreteType, EnumType, ParametricEnv, StructType, TypeDim};
use crate::value::{InterpValue, MAX_BIT_WIDTH, slice_bounds};

pub(crate) use annotation::{
    binding_type, explicit_values, instantiate_struct, parametric_struct_type, resolve_type, resolve_type_ref,
    resolve_type_symbolic, struct_type,
};
pub(crate) use invocation::{instantiate_function, instantiate_proc};
pub(crate) use parametric::{solve, unify};

/// State threaded through deduction of one function body or module scope.
pub struct DeduceCtx<'a> {
    pub(crate) data: &'a mut ImportData,
    pub(crate) module: Arc<Module>,
    pub(crate) type_info: TypeInfoId,
    pub(crate) env: ParametricEnv,
    /// Kind of function being checked; `None` at module scope.
    pub(crate) tag: Option<FunctionTag>,
}

impl<'a> DeduceCtx<'a> {
    pub fn new(
        data: &'a mut ImportData,
        module: Arc<Module>,
        type_info: TypeInfoId,
        env: ParametricEnv,
    ) -> Self {
        Self {
            data,
            module,
            type_info,
            env,
            tag: None,
        }
    }

    /// Context for checking another body; borrows this one's `ImportData`.
    pub(crate) fn nested(
        &mut self,
        module: Arc<Module>,
        type_info: TypeInfoId,
        env: ParametricEnv,
        tag: Option<FunctionTag>,
    ) -> DeduceCtx<'_> {
        DeduceCtx {
            data: &mut *self.data,
            module,
            type_info,
            env,
            tag,
        }
    }

    /// Context over a fresh table below `module`'s root, for evaluations
    /// whose results must not leak into the current table.
    pub(crate) fn scratch(&mut self, module: Arc<Module>, env: ParametricEnv) -> Result<DeduceCtx<'_>, TypeError> {
        let root = self.module_root(&module.name)?;
        let ti = self.data.arena.new_child(root);
        Ok(self.nested(module, ti, env, None))
    }

    pub(crate) fn err(&self, kind: TypeErrorKind, message: impl Into<String>, span: Span) -> TypeError {
        TypeError::new(kind, message, span, &self.module.source)
    }

    pub(crate) fn mismatch(&self, message: impl Into<String>, span: Span) -> TypeError {
        self.err(TypeErrorKind::Mismatch, message, span)
    }

    pub fn arena(&self) -> &TypeInfoArena {
        &self.data.arena
    }

    pub(crate) fn info_mut(&mut self) -> &mut TypeInfo {
        self.data.arena.get_mut(self.type_info)
    }

    pub(crate) fn module_root(&self, name: &str) -> Result<TypeInfoId, TypeError> {
        self.data
            .module(name)
            .map(|m| m.type_info)
            .ok_or_else(|| self.err(TypeErrorKind::Import, format!("Module '{name}' has not been typechecked"), self.module_span()))
    }

    fn module_span(&self) -> Span {
        hdlx_ast::span(0, 0)
    }

    pub(crate) fn name_def_type(&self, id: NameDefId, span: Span) -> Result<ConcreteType, TypeError> {
        self.arena().name_def_type(self.type_info, id).cloned().ok_or_else(|| {
            let name = &self.module.name_def(id).name;
            self.err(TypeErrorKind::Unsupported, format!("No type is known for '{name}'"), span)
        })
    }

    /// Type recorded for a top-level item of `module`.
    pub(crate) fn item_type_in(&self, module: &Module, item: ItemId, span: Span) -> Result<ConcreteType, TypeError> {
        let root = self.module_root(&module.name)?;
        self.arena().item_type(root, item).cloned().ok_or_else(|| {
            self.err(
                TypeErrorKind::Unsupported,
                format!("'{}' is used before its type is known", module.member(item).name()),
                span,
            )
        })
    }

    /// Type of a member reached from an expression. Names bind only to
    /// earlier members or to the enclosing function or proc, whose signature
    /// is recorded before its body is checked.
    pub(crate) fn member_type(&self, module: &Arc<Module>, item: ItemId, span: Span) -> Result<ConcreteType, TypeError> {
        self.item_type_in(module, item, span)
    }

    pub(crate) fn item_value_in(&self, module: &Module, item: ItemId) -> Option<InterpValue> {
        let root = self.data.module(&module.name)?.type_info;
        self.arena().item_value(root, item).cloned()
    }

    /// The module an import item of the current module refers to.
    pub(crate) fn imported_module(&self, item: ItemId, span: Span) -> Result<Arc<Module>, TypeError> {
        let name = self.arena().import(self.type_info, item).ok_or_else(|| {
            self.err(TypeErrorKind::Import, "Import has not been resolved", span)
        })?;
        self.data
            .module(name)
            .map(|m| m.module.clone())
            .ok_or_else(|| self.err(TypeErrorKind::Import, format!("Module '{name}' has not been typechecked"), span))
    }

    /// Public member `name` of the module imported by `import_item`.
    pub(crate) fn imported_member(
        &self,
        import_item: ItemId,
        name: &Ident,
    ) -> Result<(Arc<Module>, ItemId), TypeError> {
        let module = self.imported_module(import_item, name.span)?;
        let Some((item, member)) = module.find_member(&name.node) else {
            return Err(self.err(
                TypeErrorKind::Import,
                format!("Module '{}' has no member named '{}'", module.name, name.node),
                name.span,
            ));
        };
        if !member.is_public() {
            return Err(self.err(
                TypeErrorKind::Import,
                format!("Attempted to refer to module member '{}' which is not public", name.node),
                name.span,
            ));
        }
        Ok((module.clone(), item))
    }

    /// The definition a `ColonRef` names when its subject is an import and
    /// the path has one segment.
    pub(crate) fn colon_target(&self, c: &ColonRef) -> Result<(Arc<Module>, ItemId), TypeError> {
        let RefTarget::Item(item) = c.subject.target else {
            return Err(self.mismatch(format!("'{}' is not a module", c.subject.name), c.subject.span));
        };
        if !matches!(self.module.member(item), ModuleMember::Import(_)) || c.path.len() != 1 {
            return Err(self.mismatch(
                format!("Expected a reference to a member of an imported module; got '{}'", c.subject.name),
                c.subject.span,
            ));
        }
        self.imported_member(item, &c.path[0])
    }

    fn record(&mut self, expr: &Expr, ty: &ConcreteType) {
        self.info_mut().set_node_type(expr.id, ty.clone());
    }

    fn record_value(&mut self, expr: &Expr, value: InterpValue) {
        self.info_mut().set_const_value(expr.id, Some(value));
    }

    /// Value of an expression that must be known at compile time.
    pub(crate) fn const_value(&mut self, expr: &Expr) -> Result<InterpValue, TypeError> {
        constexpr::evaluate_to_value(self, expr).map_err(|e| e.into_type_error(&self.module.source))
    }

    /// Deduces `expr` as an unsigned size and evaluates it.
    pub(crate) fn const_u64(&mut self, expr: &Expr) -> Result<u64, TypeError> {
        let ty = deduce(self, expr, Some(&ConcreteType::ubits(32)))?;
        if !ty.is_bits() {
            return Err(self.mismatch(format!("Expected a bits-typed size; got {ty}"), expr.span));
        }
        let value = self.const_value(expr)?;
        value
            .as_u64()
            .map_err(|e| self.mismatch(format!("Invalid size: {e}"), expr.span))
    }
}

/// Deduces and records the type of `expr`. `expected` guides untyped
/// literals; callers compare the result themselves.
pub fn deduce(ctx: &mut DeduceCtx, expr: &Expr, expected: Option<&ConcreteType>) -> Result<ConcreteType, TypeError> {
    if let Some(t) = ctx.arena().get(ctx.type_info).own_node_type(expr.id) {
        return Ok(t.clone());
    }
    let ty = deduce_kind(ctx, expr, expected)?;
    ctx.record(expr, &ty);
    Ok(ty)
}

fn deduce_kind(ctx: &mut DeduceCtx, expr: &Expr, expected: Option<&ConcreteType>) -> Result<ConcreteType, TypeError> {
    match &expr.kind {
        ExprKind::Number(n) => deduce_number(ctx, expr, n, expected),
        ExprKind::String(s) => {
            let bytes: Vec<InterpValue> = s.bytes().map(|b| InterpValue::ubits(8, b as u128)).collect();
            let ty = ConcreteType::array(ConcreteType::ubits(8), bytes.len() as u64);
            ctx.record_value(expr, InterpValue::Array(bytes));
            Ok(ty)
        }
        ExprKind::NameRef(r) => deduce_name_ref(ctx, expr, r),
        ExprKind::ColonRef(c) => deduce_colon_ref(ctx, expr, c),
        ExprKind::Binop { op, lhs, rhs } => deduce_binop(ctx, expr, *op, lhs, rhs, expected),
        ExprKind::Unop { op, operand } => {
            let ty = deduce(ctx, operand, expected)?;
            if !ty.is_bits() {
                return Err(ctx.mismatch(
                    format!("Unary operator '{}' requires a bits type; got {ty}", op.symbol()),
                    expr.span,
                ));
            }
            Ok(ty)
        }
        ExprKind::Cast { expr: inner, ty } => deduce_cast(ctx, expr, inner, ty),
        ExprKind::Tuple(items) => {
            let expected_items = match expected {
                Some(ConcreteType::Tuple(ts)) if ts.len() == items.len() => Some(ts),
                _ => None,
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(deduce(ctx, item, expected_items.map(|ts| &ts[i]))?);
            }
            Ok(ConcreteType::Tuple(out))
        }
        ExprKind::Array(lit) => deduce_array(ctx, expr, lit, expected),
        ExprKind::Index { lhs, index } => {
            let lt = deduce(ctx, lhs, None)?;
            match lt {
                ConcreteType::Array { element, .. } => {
                    let it = deduce(ctx, index, None)?;
                    if !matches!(it.bits_info(), Some((false, _))) || !it.is_bits() {
                        return Err(ctx.mismatch(format!("Array index must be unsigned bits; got {it}"), index.span));
                    }
                    Ok(*element)
                }
                ConcreteType::Bits { .. } => Err(ctx.mismatch(
                    format!("Bits-typed value {lt} cannot be indexed; use a slice instead"),
                    expr.span,
                )),
                ConcreteType::Tuple(_) => Err(ctx.mismatch(
                    "Tuples should not be indexed with array-style syntax; use `.N` instead",
                    expr.span,
                )),
                other => Err(ctx.mismatch(format!("Value of type {other} cannot be indexed"), expr.span)),
            }
        }
        ExprKind::Slice { lhs, start, limit } => {
            let lt = deduce(ctx, lhs, None)?;
            let width = match (&lt, lt.bits_info()) {
                (ConcreteType::Bits { .. }, Some((_, w))) => w,
                _ => return Err(ctx.mismatch(format!("Value of type {lt} cannot be sliced"), lhs.span)),
            };
            let start = slice_bound(ctx, start.as_deref())?;
            let limit = slice_bound(ctx, limit.as_deref())?;
            let (_, w) = slice_bounds(start, limit, width);
            Ok(ConcreteType::ubits(w))
        }
        ExprKind::WidthSlice { lhs, start, width } => {
            let lt = deduce(ctx, lhs, None)?;
            if !lt.is_bits() {
                return Err(ctx.mismatch(format!("Value of type {lt} cannot be sliced"), lhs.span));
            }
            let st = deduce(ctx, start, None)?;
            if !matches!(st.bits_info(), Some((false, _))) {
                return Err(ctx.mismatch(format!("Slice start must be unsigned bits; got {st}"), start.span));
            }
            let wt = resolve_type(ctx, width)?;
            if !wt.is_bits() || wt.bits_info().is_none() {
                return Err(ctx.mismatch(format!("Width slice type must be a bits type; got {wt}"), width.span));
            }
            Ok(wt)
        }
        ExprKind::TupleIndex { lhs, index } => {
            let lt = deduce(ctx, lhs, None)?;
            let ConcreteType::Tuple(items) = &lt else {
                return Err(ctx.mismatch(
                    format!("Attempted to use a tuple index on a non-tuple value of type {lt}"),
                    expr.span,
                ));
            };
            items.get(*index as usize).cloned().ok_or_else(|| {
                ctx.mismatch(format!("Tuple index {index} is out of range for {lt}"), expr.span)
            })
        }
        ExprKind::Attr { lhs, attr } => {
            let lt = deduce(ctx, lhs, None)?;
            let ConcreteType::Struct(st) = &lt else {
                return Err(ctx.mismatch(
                    format!("Expected a struct for attribute access; got {lt}"),
                    expr.span,
                ));
            };
            st.member(&attr.node).map(|(_, t)| t.clone()).ok_or_else(|| {
                ctx.mismatch(
                    format!("Struct '{}' does not have a member with name '{}'", st.nominal.name, attr.node),
                    attr.span,
                )
            })
        }
        ExprKind::Invocation(inv) => invocation::deduce_invocation(ctx, expr, inv, expected),
        ExprKind::FormatMacro(m) => {
            for arg in &m.args {
                let t = deduce(ctx, arg, None)?;
                if t.contains_channel() {
                    return Err(ctx.mismatch(format!("Cannot format a value of type {t}"), arg.span));
                }
            }
            Ok(ConcreteType::Token)
        }
        ExprKind::ZeroMacro(ty) => {
            let t = resolve_type(ctx, ty)?;
            let zero = t
                .zero_value()
                .map_err(|e| ctx.mismatch(format!("zero! cannot build a value: {e}"), expr.span))?;
            ctx.record_value(expr, zero);
            Ok(t)
        }
        ExprKind::StructInstance(si) => deduce_struct_instance(ctx, expr, si),
        ExprKind::Conditional(c) => deduce_conditional(ctx, c, expected),
        ExprKind::Match { subject, arms } => {
            let st = deduce(ctx, subject, None)?;
            let mut result: Option<ConcreteType> = None;
            for arm in arms {
                for pattern in &arm.patterns {
                    check_pattern(ctx, pattern, &st)?;
                }
                let t = deduce(ctx, &arm.expr, result.as_ref().or(expected))?;
                match &result {
                    None => result = Some(t),
                    Some(r) if *r != t => {
                        return Err(ctx.mismatch(
                            format!(
                                "This match arm did not have the same type as the preceding match arms; previous: {r} this one: {t}"
                            ),
                            arm.expr.span,
                        ));
                    }
                    Some(_) => {}
                }
            }
            result.ok_or_else(|| ctx.mismatch("Match expressions must have at least one arm", expr.span))
        }
        ExprKind::For(l) => deduce_for(ctx, l, false),
        ExprKind::UnrollFor(l) => deduce_for(ctx, l, true),
        ExprKind::Range { start, end } => deduce_range(ctx, expr.span, start, end),
        ExprKind::Block(b) => deduce_block(ctx, b, expected),
        ExprKind::ChannelDecl(decl) => {
            if ctx.tag != Some(FunctionTag::ProcConfig) {
                return Err(ctx.err(
                    TypeErrorKind::Unsupported,
                    "Channels can only be declared in a proc config function",
                    expr.span,
                ));
            }
            let payload = resolve_type(ctx, &decl.payload)?;
            if let Some(depth) = &decl.depth {
                ctx.const_u64(depth)?;
            }
            let mut dims = Vec::with_capacity(decl.dims.len());
            for d in &decl.dims {
                dims.push(ctx.const_u64(d)?);
            }
            let end = |direction| {
                dims.iter().fold(
                    ConcreteType::Channel {
                        payload: Box::new(payload.clone()),
                        direction,
                    },
                    |acc, n| ConcreteType::array(acc, *n),
                )
            };
            Ok(ConcreteType::Tuple(vec![
                end(hdlx_ast::ChannelDirection::Out),
                end(hdlx_ast::ChannelDirection::In),
            ]))
        }
        ExprKind::Spawn(s) => invocation::deduce_spawn(ctx, expr, s),
    }
}

fn deduce_number(
    ctx: &mut DeduceCtx,
    expr: &Expr,
    n: &Number,
    expected: Option<&ConcreteType>,
) -> Result<ConcreteType, TypeError> {
    let ty = match (&n.ty, n.kind) {
        (Some(ann), _) => resolve_type(ctx, ann)?,
        (None, NumberKind::Bool) => ConcreteType::bool(),
        (None, NumberKind::Other) => match expected {
            Some(t @ ConcreteType::Bits { size: TypeDim::Known(_), .. }) => t.clone(),
            _ => ConcreteType::ubits(32),
        },
    };
    let Some((signed, width)) = ty.bits_info().filter(|_| ty.is_bits()) else {
        return Err(ctx.mismatch(format!("Non-bits type used to define a numeric literal: {ty}"), expr.span));
    };
    if n.kind == NumberKind::Bool && width != 1 {
        return Err(ctx.mismatch(format!("Boolean literal cannot have type {ty}"), expr.span));
    }
    let value = InterpValue::from_literal(&n.text, signed, width as u32).map_err(|e| ctx.mismatch(e.0, expr.span))?;
    ctx.record_value(expr, value);
    Ok(ty)
}

fn deduce_name_ref(ctx: &mut DeduceCtx, expr: &Expr, r: &NameRef) -> Result<ConcreteType, TypeError> {
    match r.target {
        RefTarget::NameDef(id) => ctx.name_def_type(id, r.span),
        RefTarget::Item(item) => {
            let module = ctx.module.clone();
            member_as_value(ctx, expr, &module, item, r.span)
        }
        RefTarget::Builtin(b) => Err(ctx.err(
            TypeErrorKind::Unsupported,
            format!("Builtin '{b}' can only be invoked"),
            r.span,
        )),
    }
}

/// Type of a reference to a module member used in expression position.
fn member_as_value(
    ctx: &mut DeduceCtx,
    expr: &Expr,
    module: &Arc<Module>,
    item: ItemId,
    span: Span,
) -> Result<ConcreteType, TypeError> {
    match module.member(item) {
        ModuleMember::Const(_) => {
            let ty = ctx.member_type(module, item, span)?;
            if let Some(v) = ctx.item_value_in(module, item) {
                ctx.record_value(expr, v);
            }
            Ok(ty)
        }
        ModuleMember::Function(_) | ModuleMember::Struct(_) | ModuleMember::Enum(_) | ModuleMember::TypeAlias(_) => {
            ctx.member_type(module, item, span)
        }
        ModuleMember::Proc(p) => Err(ctx.mismatch(
            format!("Proc '{}' cannot be used as a value; procs are instantiated with spawn", p.name.node),
            span,
        )),
        ModuleMember::Import(i) => Err(ctx.mismatch(
            format!("Module '{}' cannot be used as a value", i.dotted()),
            span,
        )),
    }
}

fn deduce_colon_ref(ctx: &mut DeduceCtx, expr: &Expr, c: &ColonRef) -> Result<ConcreteType, TypeError> {
    let RefTarget::Item(item) = c.subject.target else {
        return Err(ctx.mismatch(format!("Cannot use '::' on '{}'", c.subject.name), c.subject.span));
    };
    let module = ctx.module.clone();
    match module.member(item) {
        ModuleMember::Enum(_) | ModuleMember::TypeAlias(_) => {
            if c.path.len() != 1 {
                return Err(ctx.mismatch("Enum references take a single member name", expr.span));
            }
            let ty = ctx.member_type(&module, item, c.subject.span)?;
            enum_member(ctx, expr, ty, &c.path[0])
        }
        ModuleMember::Import(_) => {
            let (other, target) = ctx.imported_member(item, &c.path[0])?;
            match (c.path.len(), other.member(target)) {
                (1, _) => member_as_value(ctx, expr, &other, target, c.path[0].span),
                (2, ModuleMember::Enum(_) | ModuleMember::TypeAlias(_)) => {
                    let ty = ctx.member_type(&other, target, c.path[0].span)?;
                    enum_member(ctx, expr, ty, &c.path[1])
                }
                _ => Err(ctx.mismatch(
                    format!("Cannot resolve '{}' through module '{}'", c.last().node, c.subject.name),
                    expr.span,
                )),
            }
        }
        other => Err(ctx.mismatch(
            format!("Cannot use '::' on {} '{}'", other.kind_name(), c.subject.name),
            c.subject.span,
        )),
    }
}

fn enum_member(ctx: &mut DeduceCtx, expr: &Expr, ty: ConcreteType, name: &Ident) -> Result<ConcreteType, TypeError> {
    let inner = match ty {
        ConcreteType::Meta(t) => *t,
        t => t,
    };
    let ConcreteType::Enum(e) = &inner else {
        return Err(ctx.mismatch(format!("Type {inner} is not an enum"), name.span));
    };
    let value = e.value(&name.node).cloned().ok_or_else(|| {
        ctx.mismatch(
            format!("Name '{}' is not defined by the enum {}", name.node, e.nominal.name),
            name.span,
        )
    })?;
    ctx.record_value(expr, value);
    Ok(inner)
}

fn is_untyped_literal(expr: &Expr) -> bool {
    matches!(
        &expr.kind,
        ExprKind::Number(Number {
            ty: None,
            kind: NumberKind::Other,
            ..
        })
    )
}

/// Deduces two operands that must agree, letting a typed side decide the
/// type of an untyped literal on the other.
fn deduce_pair(
    ctx: &mut DeduceCtx,
    lhs: &Expr,
    rhs: &Expr,
    expected: Option<&ConcreteType>,
) -> Result<(ConcreteType, ConcreteType), TypeError> {
    if is_untyped_literal(lhs) && !is_untyped_literal(rhs) {
        let rt = deduce(ctx, rhs, expected)?;
        let lt = deduce(ctx, lhs, Some(&rt))?;
        Ok((lt, rt))
    } else {
        let lt = deduce(ctx, lhs, expected)?;
        let rt = deduce(ctx, rhs, Some(&lt))?;
        Ok((lt, rt))
    }
}

fn deduce_binop(
    ctx: &mut DeduceCtx,
    expr: &Expr,
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    expected: Option<&ConcreteType>,
) -> Result<ConcreteType, TypeError> {
    if op.is_shift() {
        let lt = deduce(ctx, lhs, expected)?;
        if !lt.is_bits() {
            return Err(ctx.mismatch(format!("Shift requires a bits type; got {lt}"), lhs.span));
        }
        let rt = deduce(ctx, rhs, None)?;
        if !rt.is_bits() || rt.bits_info().is_some_and(|(s, _)| s) {
            return Err(ctx.mismatch(format!("Shift amount must be unsigned; got {rt}"), rhs.span));
        }
        return Ok(lt);
    }
    if op == BinOp::Concat {
        let lt = deduce(ctx, lhs, None)?;
        let rt = deduce(ctx, rhs, None)?;
        return match (&lt, &rt) {
            (ConcreteType::Bits { .. }, ConcreteType::Bits { .. }) => {
                let (Some((_, a)), Some((_, b))) = (lt.bits_info(), rt.bits_info()) else {
                    return Err(ctx.mismatch("Concatenation of unsized bits", expr.span));
                };
                if a + b > MAX_BIT_WIDTH as u64 {
                    return Err(ctx.err(
                        TypeErrorKind::Unsupported,
                        format!("Concatenation produces {} bits; at most {MAX_BIT_WIDTH} are supported", a + b),
                        expr.span,
                    ));
                }
                Ok(ConcreteType::ubits(a + b))
            }
            (
                ConcreteType::Array { element: le, size: ls },
                ConcreteType::Array { element: re, size: rs },
            ) if le == re => match (ls.known(), rs.known()) {
                (Some(a), Some(b)) => Ok(ConcreteType::array((**le).clone(), a + b)),
                _ => Err(ctx.mismatch("Concatenation of unsized arrays", expr.span)),
            },
            _ => Err(ctx.mismatch(
                format!(
                    "Concatenation requires operand types to be either both arrays of the same element type or both bits; got {lt} and {rt}"
                ),
                expr.span,
            )),
        };
    }
    let operand_expected = if op.is_logical() {
        Some(ConcreteType::bool())
    } else if op.is_comparison() {
        None
    } else {
        expected.cloned()
    };
    let (lt, rt) = deduce_pair(ctx, lhs, rhs, operand_expected.as_ref())?;
    if lt != rt {
        return Err(ctx.mismatch(
            format!("Types are not compatible for '{}': {lt} vs {rt}", op.symbol()),
            expr.span,
        ));
    }
    if op.is_logical() {
        if !lt.is_bool() {
            return Err(ctx.mismatch(format!("Operator '{}' requires u1 operands; got {lt}", op.symbol()), expr.span));
        }
        return Ok(lt);
    }
    if op.is_comparison() {
        let ordered = !matches!(op, BinOp::Eq | BinOp::Ne);
        let ok = if ordered {
            lt.bits_info().is_some()
        } else {
            !lt.contains_channel() && !matches!(lt, ConcreteType::Function { .. } | ConcreteType::Meta(_))
        };
        if !ok {
            return Err(ctx.mismatch(format!("Operator '{}' cannot compare values of type {lt}", op.symbol()), expr.span));
        }
        return Ok(ConcreteType::bool());
    }
    if !lt.is_bits() {
        return Err(ctx.mismatch(format!("Operator '{}' requires bits operands; got {lt}", op.symbol()), expr.span));
    }
    Ok(lt)
}

fn deduce_cast(ctx: &mut DeduceCtx, expr: &Expr, inner: &Expr, ty: &TypeAnnotation) -> Result<ConcreteType, TypeError> {
    let target = resolve_type(ctx, ty)?;
    let source = deduce(ctx, inner, None)?;
    let elem_bits = |t: &ConcreteType| match t {
        ConcreteType::Array { element, .. } if element.is_bits() => t.total_bit_count(),
        _ => None,
    };
    let ok = match (&source, &target) {
        (ConcreteType::Bits { .. } | ConcreteType::Enum(_), ConcreteType::Bits { .. } | ConcreteType::Enum(_)) => true,
        (ConcreteType::Array { .. }, ConcreteType::Bits { .. }) => elem_bits(&source) == target.total_bit_count(),
        (ConcreteType::Bits { .. }, ConcreteType::Array { .. }) => elem_bits(&target) == source.total_bit_count(),
        _ => false,
    };
    if !ok {
        return Err(ctx.mismatch(format!("Cannot cast from type {source} to {target}"), expr.span));
    }
    Ok(target)
}

fn deduce_array(
    ctx: &mut DeduceCtx,
    expr: &Expr,
    lit: &ArrayLit,
    expected: Option<&ConcreteType>,
) -> Result<ConcreteType, TypeError> {
    let annotated = match &lit.ty {
        Some(t) => Some(resolve_type(ctx, t)?),
        None => None,
    };
    let target = annotated
        .clone()
        .or_else(|| expected.filter(|t| matches!(t, ConcreteType::Array { .. })).cloned());
    let (mut element, target_size) = match &target {
        Some(ConcreteType::Array { element, size }) => (Some((**element).clone()), size.known()),
        Some(other) => {
            return Err(ctx.mismatch(format!("Array was annotated with non-array type {other}"), expr.span));
        }
        None => (None, None),
    };
    for member in &lit.members {
        let t = deduce(ctx, member, element.as_ref())?;
        match &element {
            None => element = Some(t),
            Some(e) if *e != t => {
                return Err(ctx.mismatch(
                    format!("Array member did not have same type as other members: {t} vs {e}"),
                    member.span,
                ));
            }
            Some(_) => {}
        }
    }
    let Some(element) = element else {
        return Err(ctx.mismatch("Cannot deduce the type of an empty array without an annotation", expr.span));
    };
    let count = lit.members.len() as u64;
    if lit.has_ellipsis {
        let Some(size) = target_size else {
            return Err(ctx.mismatch("Array with ellipsis must have a type annotation", expr.span));
        };
        if count > size {
            return Err(ctx.mismatch(
                format!("Array has {count} members but its type {} holds only {size}", ConcreteType::array(element, size)),
                expr.span,
            ));
        }
        return Ok(ConcreteType::array(element, size));
    }
    if annotated.is_some() && target_size != Some(count) {
        return Err(ctx.mismatch(
            format!(
                "Annotated array size {} does not match inferred array size {count}",
                target_size.map(|s| s.to_string()).unwrap_or_default()
            ),
            expr.span,
        ));
    }
    Ok(ConcreteType::array(element, count))
}

fn slice_bound(ctx: &mut DeduceCtx, bound: Option<&Expr>) -> Result<Option<i128>, TypeError> {
    let Some(e) = bound else {
        return Ok(None);
    };
    let t = deduce(ctx, e, Some(&ConcreteType::bits(true, 32)))?;
    if !t.is_bits() {
        return Err(ctx.mismatch(format!("Slice bound must be bits; got {t}"), e.span));
    }
    let v = ctx.const_value(e)?;
    v.as_i128().map(Some).map_err(|err| ctx.mismatch(err.0, e.span))
}

fn deduce_struct_instance(ctx: &mut DeduceCtx, expr: &Expr, si: &StructInstance) -> Result<ConcreteType, TypeError> {
    let st = struct_type(ctx, si, expr.span)?;
    for (name, value) in &si.members {
        let Some((_, member_ty)) = st.member(&name.node) else {
            return Err(ctx.mismatch(
                format!("Struct '{}' has no member '{}', but it was provided by this instance", st.nominal.name, name.node),
                name.span,
            ));
        };
        let member_ty = member_ty.clone();
        let t = deduce(ctx, value, Some(&member_ty))?;
        if t != member_ty {
            return Err(ctx.mismatch(
                format!("Member '{}' of struct '{}' has type {member_ty}; got {t}", name.node, st.nominal.name),
                value.span,
            ));
        }
    }
    let result = ConcreteType::Struct(st.clone());
    match &si.splat {
        Some(base) => {
            let bt = deduce(ctx, base, Some(&result))?;
            if bt != result {
                return Err(ctx.mismatch(format!("Splatted value must have type {result}; got {bt}"), base.span));
            }
        }
        None => {
            let missing: Vec<&str> = st
                .members
                .iter()
                .filter(|(n, _)| !si.members.iter().any(|(m, _)| &m.node == n))
                .map(|(n, _)| n.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(ctx.mismatch(
                    format!("Struct instance is missing member(s): {}", missing.join(", ")),
                    expr.span,
                ));
            }
        }
    }
    Ok(result)
}

fn deduce_conditional(
    ctx: &mut DeduceCtx,
    c: &Conditional,
    expected: Option<&ConcreteType>,
) -> Result<ConcreteType, TypeError> {
    let tt = deduce(ctx, &c.test, Some(&ConcreteType::bool()))?;
    if !tt.is_bool() {
        return Err(ctx.mismatch(format!("Test type for conditional expression is not u1: {tt}"), c.test.span));
    }
    let ct = deduce_block(ctx, &c.consequent, expected)?;
    let (at, span) = match &c.alternate {
        ElseBranch::Block(b) => (deduce_block(ctx, b, Some(&ct))?, b.span),
        ElseBranch::If(e) => (deduce(ctx, e, Some(&ct))?, e.span),
    };
    if ct != at {
        return Err(ctx.mismatch(
            format!("Conditional consequent type {ct} did not match alternative type {at}"),
            span,
        ));
    }
    Ok(ct)
}

fn check_pattern(ctx: &mut DeduceCtx, pattern: &Pattern, ty: &ConcreteType) -> Result<(), TypeError> {
    match pattern {
        Pattern::Wildcard(_) => Ok(()),
        Pattern::Bind(id, _) => {
            ctx.info_mut().set_name_def_type(*id, ty.clone());
            Ok(())
        }
        Pattern::Value(e) => {
            let t = deduce(ctx, e, Some(ty))?;
            if t != *ty {
                return Err(ctx.mismatch(format!("Pattern of type {t} cannot match a value of type {ty}"), e.span));
            }
            Ok(())
        }
        Pattern::Tuple(items, span) => {
            let ConcreteType::Tuple(members) = ty else {
                return Err(ctx.mismatch(format!("Tuple pattern cannot match a value of type {ty}"), *span));
            };
            if members.len() != items.len() {
                return Err(ctx.mismatch(
                    format!("Pattern expects a {}-tuple but the matched value has type {ty}", items.len()),
                    *span,
                ));
            }
            for (p, t) in items.iter().zip(members) {
                check_pattern(ctx, p, t)?;
            }
            Ok(())
        }
    }
}

/// Records the types of names bound by a destructuring target.
pub(crate) fn bind_tree(ctx: &mut DeduceCtx, tree: &NameDefTree, ty: &ConcreteType) -> Result<(), TypeError> {
    match tree {
        NameDefTree::Leaf(id, _) => {
            ctx.info_mut().set_name_def_type(*id, ty.clone());
            Ok(())
        }
        NameDefTree::Wildcard(_) => Ok(()),
        NameDefTree::Tuple(items, span) => {
            let ConcreteType::Tuple(members) = ty else {
                return Err(ctx.mismatch(format!("Cannot destructure a value of type {ty} as a tuple"), *span));
            };
            if members.len() != items.len() {
                return Err(ctx.mismatch(
                    format!(
                        "The number of tuple elements ({}) did not match the number of destructured names ({})",
                        members.len(),
                        items.len()
                    ),
                    *span,
                ));
            }
            for (item, member) in items.iter().zip(members) {
                bind_tree(ctx, item, member)?;
            }
            Ok(())
        }
    }
}

fn bind_tree_values(ctx: &mut DeduceCtx, tree: &NameDefTree, value: &InterpValue) {
    match (tree, value) {
        (NameDefTree::Leaf(id, _), v) => ctx.info_mut().set_name_def_value(*id, v.clone()),
        (NameDefTree::Tuple(items, _), InterpValue::Tuple(values)) => {
            for (item, v) in items.iter().zip(values) {
                bind_tree_values(ctx, item, v);
            }
        }
        _ => {}
    }
}

fn deduce_for(ctx: &mut DeduceCtx, l: &ForLoop, unrolled: bool) -> Result<ConcreteType, TypeError> {
    let annotated = match &l.ty {
        Some(t) => Some(resolve_type(ctx, t)?),
        None => None,
    };
    let it = deduce(ctx, &l.iterable, None)?;
    let ConcreteType::Array { element, .. } = &it else {
        return Err(ctx.mismatch(format!("For loop iterable must be an array; got {it}"), l.iterable.span));
    };
    if unrolled {
        ctx.const_value(&l.iterable)?;
    }
    let acc_expected = match &annotated {
        Some(ConcreteType::Tuple(items)) if items.len() == 2 => Some(items[1].clone()),
        _ => None,
    };
    let init = deduce(ctx, &l.init, acc_expected.as_ref())?;
    let names_ty = ConcreteType::Tuple(vec![(**element).clone(), init.clone()]);
    if let Some(a) = &annotated {
        if *a != names_ty {
            return Err(ctx.mismatch(
                format!("For-loop annotated type {a} did not match the inferred type {names_ty}"),
                l.names.span(),
            ));
        }
    }
    bind_tree(ctx, &l.names, &names_ty)?;
    let body = deduce_block(ctx, &l.body, Some(&init))?;
    if body != init {
        return Err(ctx.mismatch(
            format!("For-loop init value type did not match for-loop body's result type; init: {init} body: {body}"),
            l.body.span,
        ));
    }
    Ok(init)
}

/// `start..end` and `range(start, end)`: both bounds must be constexpr.
pub(crate) fn deduce_range(ctx: &mut DeduceCtx, span: Span, start: &Expr, end: &Expr) -> Result<ConcreteType, TypeError> {
    let (st, et) = deduce_pair(ctx, start, end, None)?;
    if st != et || !st.is_bits() {
        return Err(ctx.mismatch(format!("Range bounds must have the same bits type; got {st} and {et}"), span));
    }
    let a = ctx.const_value(start)?;
    let b = ctx.const_value(end)?;
    let (a, b) = (
        a.as_i128().map_err(|e| ctx.mismatch(e.0, start.span))?,
        b.as_i128().map_err(|e| ctx.mismatch(e.0, end.span))?,
    );
    Ok(ConcreteType::array(st, (b - a).max(0) as u64))
}

pub fn deduce_block(ctx: &mut DeduceCtx, block: &Block, expected: Option<&ConcreteType>) -> Result<ConcreteType, TypeError> {
    let mut result = ConcreteType::unit();
    let last = block.statements.len().saturating_sub(1);
    for (i, stmt) in block.statements.iter().enumerate() {
        match &stmt.kind {
            StatementKind::Let(l) => {
                let annotated = match &l.ty {
                    Some(t) => Some(resolve_type(ctx, t)?),
                    None => None,
                };
                let rt = deduce(ctx, &l.rhs, annotated.as_ref())?;
                if let Some(a) = &annotated {
                    if *a != rt {
                        return Err(ctx.mismatch(
                            format!("Annotated type did not match inferred type of right hand side expression: {a} vs {rt}"),
                            l.rhs.span,
                        ));
                    }
                }
                bind_tree(ctx, &l.names, &rt)?;
                if let Some(v) = constexpr::evaluate(ctx, &l.rhs) {
                    bind_tree_values(ctx, &l.names, &v);
                }
            }
            StatementKind::Const(c) => {
                let annotated = match &c.ty {
                    Some(t) => Some(resolve_type(ctx, t)?),
                    None => None,
                };
                let t = deduce(ctx, &c.value, annotated.as_ref())?;
                if let Some(a) = &annotated {
                    if *a != t {
                        return Err(ctx.mismatch(format!("Constant '{}' is annotated {a} but has type {t}", c.name.node), c.value.span));
                    }
                }
                let v = ctx.const_value(&c.value)?;
                ctx.info_mut().set_name_def_type(c.name_def, t);
                ctx.info_mut().set_name_def_value(c.name_def, v);
            }
            StatementKind::Expr(e) => {
                if i == last && !block.trailing_semi {
                    result = deduce(ctx, e, expected)?;
                } else {
                    deduce(ctx, e, None)?;
                }
            }
        }
    }
    ctx.info_mut().set_node_type(block.id, result.clone());
    Ok(result)
}

/// Records the declared types of parametric bindings and, when bound, their
/// values.
pub(crate) fn bind_parametrics(
    ctx: &mut DeduceCtx,
    bindings: &[hdlx_ast::ParametricBinding],
) -> Result<(), TypeError> {
    for b in bindings {
        let ty = binding_type(ctx, b)?;
        ctx.info_mut().set_name_def_type(b.name_def, ty);
        if let Some(v) = ctx.env.get(&b.name.node).cloned() {
            ctx.info_mut().set_name_def_value(b.name_def, v);
        }
    }
    Ok(())
}

pub(crate) fn is_parametric_name(module: &Module, id: NameDefId) -> bool {
    module.name_def(id).kind == NameDefKind::ParametricBinding
}

pub(crate) fn enum_type(
    ctx: &mut DeduceCtx,
    item: ItemId,
    def: &hdlx_ast::EnumDef,
) -> Result<EnumType, TypeError> {
    let underlying = match &def.underlying {
        Some(t) => {
            let ty = resolve_type(ctx, t)?;
            if !ty.is_bits() || ty.bits_info().is_none() {
                return Err(ctx.mismatch(format!("Enum underlying type must be a bits type; got {ty}"), t.span));
            }
            Some(ty)
        }
        None => None,
    };
    let mut values = Vec::with_capacity(def.values.len());
    for member in &def.values {
        let t = deduce(ctx, &member.value, underlying.as_ref())?;
        if let Some(u) = &underlying {
            if t != *u {
                return Err(ctx.mismatch(
                    format!("Enum value '{}' has type {t}; expected {u}", member.name.node),
                    member.value.span,
                ));
            }
        } else if !t.is_bits() {
            return Err(ctx.mismatch(format!("Enum value must be bits; got {t}"), member.value.span));
        }
        values.push((member.name.node.clone(), ctx.const_value(&member.value)?));
    }
    let (signed, width) = match underlying.as_ref().and_then(|u| u.bits_info()) {
        Some(info) => info,
        None => {
            // Narrowest unsigned width holding every value.
            let widest = values
                .iter()
                .filter_map(|(_, v)| v.as_bits().ok())
                .map(|(_, _, v)| 128 - v.leading_zeros())
                .max()
                .unwrap_or(0)
                .max(1);
            let mut narrowed = Vec::with_capacity(values.len());
            for (n, v) in values {
                let v = v.cast_bits(false, widest).map_err(|e| ctx.mismatch(e.0, def.span))?;
                narrowed.push((n, v));
            }
            values = narrowed;
            (false, widest as u64)
        }
    };
    Ok(EnumType {
        nominal: crate::types::NominalRef {
            module: ctx.module.name.clone(),
            item,
            name: def.name.node.clone(),
        },
        signed,
        size: TypeDim::Known(width),
        values,
    })
}

/// Plain struct type of a non-parametric definition.
pub(crate) fn check_struct_def(
    ctx: &mut DeduceCtx,
    item: ItemId,
    def: &hdlx_ast::StructDef,
) -> Result<StructType, TypeError> {
    let mut members = Vec::with_capacity(def.members.len());
    for m in &def.members {
        members.push((m.name.node.clone(), resolve_type(ctx, &m.ty)?));
    }
    Ok(StructType {
        nominal: crate::types::NominalRef {
            module: ctx.module.name.clone(),
            item,
            name: def.name.node.clone(),
        },
        members,
    })
}
