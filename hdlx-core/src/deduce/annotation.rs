#![forbid(unsafe_code)]

//! Turning type annotations into `ConcreteType`s, either fully evaluated or
//! with unbound parametrics kept as symbols.

use std::collections::BTreeMap;
use std::sync::Arc;

use hdlx_ast::{
    BinOp, Expr, ExprKind, ExprOrType, ItemId, Module, ModuleMember, ParametricBinding, RefTarget, Span,
    StructDef, StructInstance, TypeAnnotation, TypeKind, TypeRef, TypeRefTarget, walk,
};

use super::parametric::{binding_types, solve, unify};
use super::{DeduceCtx, bind_parametrics, deduce, is_parametric_name};
use crate::error::{TypeError, TypeErrorKind};
use crate::types::{ConcreteType, NominalRef, ParametricEnv, ParametricExpr, StructType, TypeDim};
use crate::value::{InterpValue, MAX_BIT_WIDTH};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Concrete,
    Symbolic,
}

/// Resolves `ann` with every dimension evaluated.
pub(crate) fn resolve_type(ctx: &mut DeduceCtx, ann: &TypeAnnotation) -> Result<ConcreteType, TypeError> {
    resolve(ctx, ann, Mode::Concrete)
}

/// Resolves `ann`, keeping parametrics that `ctx.env` does not bind as
/// symbols.
pub(crate) fn resolve_type_symbolic(ctx: &mut DeduceCtx, ann: &TypeAnnotation) -> Result<ConcreteType, TypeError> {
    resolve(ctx, ann, Mode::Symbolic)
}

pub(crate) fn binding_type(ctx: &mut DeduceCtx, b: &ParametricBinding) -> Result<ConcreteType, TypeError> {
    let ty = resolve_type(ctx, &b.ty)?;
    if ty.bits_info().is_none() {
        return Err(ctx.err(
            TypeErrorKind::Unsupported,
            format!("Parametric '{}' must have a bits type; got {ty}", b.name.node),
            b.ty.span,
        ));
    }
    Ok(ty)
}

fn resolve(ctx: &mut DeduceCtx, ann: &TypeAnnotation, mode: Mode) -> Result<ConcreteType, TypeError> {
    match &ann.kind {
        TypeKind::Builtin { signed, width } => Ok(ConcreteType::bits(*signed, *width as u64)),
        TypeKind::Bool => Ok(ConcreteType::bool()),
        TypeKind::Token => Ok(ConcreteType::Token),
        TypeKind::Bits { keyword, dim } => {
            let size = resolve_dim(ctx, dim, mode)?;
            if let Some(w) = size.known() {
                if w > MAX_BIT_WIDTH as u64 {
                    return Err(ctx.err(
                        TypeErrorKind::Unsupported,
                        format!("Bit width {w} is larger than the supported maximum of {MAX_BIT_WIDTH}"),
                        dim.span,
                    ));
                }
            }
            Ok(ConcreteType::Bits {
                signed: keyword.is_signed(),
                size,
            })
        }
        TypeKind::Array { element, dim } => {
            let element = resolve(ctx, element, mode)?;
            let size = resolve_dim(ctx, dim, mode)?;
            Ok(ConcreteType::Array {
                element: Box::new(element),
                size,
            })
        }
        TypeKind::Tuple(items) => Ok(ConcreteType::Tuple(
            items.iter().map(|t| resolve(ctx, t, mode)).collect::<Result<_, _>>()?,
        )),
        TypeKind::Ref(tr) => resolve_ref(ctx, tr, mode),
        TypeKind::Channel {
            payload,
            direction,
            dims,
        } => {
            let mut ty = ConcreteType::Channel {
                payload: Box::new(resolve(ctx, payload, mode)?),
                direction: *direction,
            };
            for d in dims {
                ty = ConcreteType::Array {
                    element: Box::new(ty),
                    size: resolve_dim(ctx, d, mode)?,
                };
            }
            Ok(ty)
        }
    }
}

fn resolve_dim(ctx: &mut DeduceCtx, dim: &Expr, mode: Mode) -> Result<TypeDim, TypeError> {
    match mode {
        Mode::Concrete => Ok(TypeDim::Known(ctx.const_u64(dim)?)),
        Mode::Symbolic => Ok(match parametric_expr(ctx, dim)? {
            ParametricExpr::Constant(n) => TypeDim::Known(n),
            e => TypeDim::Parametric(e),
        }),
    }
}

fn mentions_unbound_parametric(ctx: &DeduceCtx, expr: &Expr) -> bool {
    walk::free_variables(expr)
        .into_iter()
        .any(|id| is_parametric_name(&ctx.module, id) && !ctx.env.contains(&ctx.module.name_def(id).name))
}

/// Symbolic form of a dimension expression.
fn parametric_expr(ctx: &mut DeduceCtx, expr: &Expr) -> Result<ParametricExpr, TypeError> {
    if !mentions_unbound_parametric(ctx, expr) {
        return Ok(ParametricExpr::Constant(ctx.const_u64(expr)?));
    }
    match &expr.kind {
        ExprKind::NameRef(r) if matches!(r.target, RefTarget::NameDef(_)) => Ok(ParametricExpr::Symbol(r.name.clone())),
        ExprKind::Binop { op, lhs, rhs } if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul) => {
            let l = parametric_expr(ctx, lhs)?;
            let r = parametric_expr(ctx, rhs)?;
            Ok(match op {
                BinOp::Add => ParametricExpr::add(l, r),
                BinOp::Sub => ParametricExpr::sub(l, r),
                _ => ParametricExpr::mul(l, r),
            })
        }
        _ => Err(ctx.err(
            TypeErrorKind::Unsupported,
            "Dimension expressions over unbound parametrics may only use names, '+', '-', and '*'",
            expr.span,
        )),
    }
}

fn strip_meta(ty: ConcreteType) -> ConcreteType {
    match ty {
        ConcreteType::Meta(t) => *t,
        t => t,
    }
}

fn type_ref_target(ctx: &DeduceCtx, tr: &TypeRef) -> Result<(Arc<Module>, ItemId), TypeError> {
    match &tr.target {
        TypeRefTarget::Item { item, .. } => Ok((ctx.module.clone(), *item)),
        TypeRefTarget::Colon(c) => ctx.colon_target(c),
    }
}

/// Concrete type named by a struct, enum, or alias reference.
pub(crate) fn resolve_type_ref(ctx: &mut DeduceCtx, tr: &TypeRef) -> Result<ConcreteType, TypeError> {
    resolve_ref(ctx, tr, Mode::Concrete)
}

fn resolve_ref(ctx: &mut DeduceCtx, tr: &TypeRef, mode: Mode) -> Result<ConcreteType, TypeError> {
    let (module, item) = type_ref_target(ctx, tr)?;
    match module.member(item) {
        ModuleMember::Struct(def) if !def.parametrics.is_empty() => {
            let symbolic = mode == Mode::Symbolic
                && tr.parametrics.iter().any(|p| match p {
                    ExprOrType::Expr(e) => mentions_unbound_parametric(ctx, e),
                    ExprOrType::Type(_) => false,
                });
            if symbolic {
                let mut args = BTreeMap::new();
                for (b, p) in def.parametrics.iter().zip(&tr.parametrics) {
                    let ExprOrType::Expr(e) = p else {
                        return Err(type_arg_error(ctx, p_span(p)));
                    };
                    args.insert(b.name.node.clone(), parametric_expr(ctx, e)?);
                }
                return Ok(ConcreteType::Struct(symbolic_struct(ctx, &module, item, def, &args, true, tr.span)?));
            }
            let explicit = explicit_values(ctx, &module, &def.parametrics, &tr.parametrics, tr.span)?;
            let env = solve(ctx, &module, &def.parametrics, &explicit, &BTreeMap::new(), tr.span)?;
            Ok(ConcreteType::Struct(instantiate_struct(ctx, &module, item, env)?))
        }
        ModuleMember::Struct(_) | ModuleMember::Enum(_) | ModuleMember::TypeAlias(_) => {
            if !tr.parametrics.is_empty() {
                return Err(ctx.err(
                    TypeErrorKind::ArityMismatch,
                    format!("'{}' does not take parametrics", module.member(item).name()),
                    tr.span,
                ));
            }
            Ok(strip_meta(ctx.member_type(&module, item, tr.span)?))
        }
        other => Err(ctx.mismatch(
            format!("'{}' is a {}, not a type", other.name(), other.kind_name()),
            tr.span,
        )),
    }
}

fn p_span(p: &ExprOrType) -> Span {
    match p {
        ExprOrType::Expr(e) => e.span,
        ExprOrType::Type(t) => t.span,
    }
}

fn type_arg_error(ctx: &DeduceCtx, span: Span) -> TypeError {
    ctx.err(TypeErrorKind::Unsupported, "Type-valued parametrics are not supported here", span)
}

/// Evaluates explicit parametric arguments in the caller's context against
/// the binding types of the callee.
pub(crate) fn explicit_values(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    bindings: &[ParametricBinding],
    args: &[ExprOrType],
    span: Span,
) -> Result<BTreeMap<String, InterpValue>, TypeError> {
    if args.len() > bindings.len() {
        return Err(ctx.err(
            TypeErrorKind::ArityMismatch,
            format!(
                "Too many parametric values supplied; limit: {} given: {}",
                bindings.len(),
                args.len()
            ),
            span,
        ));
    }
    let types = binding_types(ctx, module, bindings)?;
    let mut out = BTreeMap::new();
    for ((b, ty), arg) in bindings.iter().zip(&types).zip(args) {
        let ExprOrType::Expr(e) = arg else {
            return Err(type_arg_error(ctx, p_span(arg)));
        };
        let t = deduce(ctx, e, Some(ty))?;
        if t != *ty {
            return Err(ctx.mismatch(
                format!("Parametric '{}' has type {ty}; the supplied value has type {t}", b.name.node),
                e.span,
            ));
        }
        out.insert(b.name.node.clone(), ctx.const_value(e)?);
    }
    Ok(out)
}

/// Member types of parametric struct `item`, with its bindings replaced by
/// `args`. Bindings without an argument stay symbolic, or take their
/// default expression when `fill_defaults` is set.
fn symbolic_struct(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    item: ItemId,
    def: &StructDef,
    args: &BTreeMap<String, ParametricExpr>,
    fill_defaults: bool,
    span: Span,
) -> Result<StructType, TypeError> {
    let mut scratch = ctx.scratch(module.clone(), ParametricEnv::new())?;
    bind_parametrics(&mut scratch, &def.parametrics)?;
    let mut subst = args.clone();
    if fill_defaults {
        for b in &def.parametrics {
            if subst.contains_key(&b.name.node) {
                continue;
            }
            let Some(default) = &b.default else {
                return Err(scratch.err(
                    TypeErrorKind::UnresolvedParametric,
                    format!("Could not infer parametric(s): {}", b.name.node),
                    span,
                ));
            };
            let e = parametric_expr(&mut scratch, default)?;
            let e = e.substitute(&|s| subst.get(s).cloned());
            subst.insert(b.name.node.clone(), e);
        }
    }
    let mut members = Vec::with_capacity(def.members.len());
    for m in &def.members {
        let t = resolve_type_symbolic(&mut scratch, &m.ty)?;
        let t = t.map_dims(&|e| match e.substitute(&|s| subst.get(s).cloned()) {
            ParametricExpr::Constant(n) => TypeDim::Known(n),
            other => TypeDim::Parametric(other),
        });
        members.push((m.name.node.clone(), t));
    }
    Ok(StructType {
        nominal: NominalRef {
            module: module.name.clone(),
            item,
            name: def.name.node.clone(),
        },
        members,
    })
}

/// Concrete struct type for one env; memoized per instantiation.
pub(crate) fn instantiate_struct(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    item: ItemId,
    env: ParametricEnv,
) -> Result<StructType, TypeError> {
    let key = (module.name.clone(), item, env.clone());
    if let Some(st) = ctx.data.structs.get(&key) {
        return Ok(st.clone());
    }
    let Some(def) = module.struct_def(item) else {
        return Err(ctx.mismatch(format!("'{}' is not a struct", module.member(item).name()), module.member(item).span()));
    };
    let st = {
        let mut scratch = ctx.scratch(module.clone(), env)?;
        bind_parametrics(&mut scratch, &def.parametrics)?;
        let mut members = Vec::with_capacity(def.members.len());
        for m in &def.members {
            members.push((m.name.node.clone(), resolve_type(&mut scratch, &m.ty)?));
        }
        StructType {
            nominal: NominalRef {
                module: module.name.clone(),
                item,
                name: def.name.node.clone(),
            },
            members,
        }
    };
    ctx.data.structs.insert(key, st.clone());
    Ok(st)
}

/// Symbolic type of a parametric struct definition, recorded as its item type.
pub(crate) fn parametric_struct_type(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    item: ItemId,
    def: &StructDef,
) -> Result<StructType, TypeError> {
    symbolic_struct(ctx, module, item, def, &BTreeMap::new(), false, def.span)
}

/// Type of a struct instance expression, inferring parametrics from the
/// member values when none are given.
pub(crate) fn struct_type(ctx: &mut DeduceCtx, si: &StructInstance, span: Span) -> Result<StructType, TypeError> {
    let (module, item) = type_ref_target(ctx, &si.ty)?;
    let Some(def) = module.struct_def(item) else {
        return Err(ctx.mismatch(
            format!("'{}' is a {}, not a struct", module.member(item).name(), module.member(item).kind_name()),
            si.ty.span,
        ));
    };
    if def.parametrics.is_empty() || !si.ty.parametrics.is_empty() {
        return match resolve_type_ref(ctx, &si.ty)? {
            ConcreteType::Struct(st) => Ok(st),
            other => Err(ctx.mismatch(format!("Expected a struct type; got {other}"), si.ty.span)),
        };
    }
    let symbolic = symbolic_struct(ctx, &module, item, def, &BTreeMap::new(), false, span)?;
    let mut inferred = BTreeMap::new();
    for (name, value) in &si.members {
        let Some((_, member_ty)) = symbolic.member(&name.node) else {
            continue;
        };
        let expected = (!member_ty.has_parametric_dims()).then(|| member_ty.clone());
        let actual = deduce(ctx, value, expected.as_ref())?;
        unify(member_ty, &actual, &mut inferred).map_err(|m| ctx.mismatch(m, value.span))?;
    }
    if let Some(base) = &si.splat {
        let actual = deduce(ctx, base, None)?;
        unify(&ConcreteType::Struct(symbolic.clone()), &actual, &mut inferred)
            .map_err(|m| ctx.mismatch(m, base.span))?;
    }
    let env = solve(ctx, &module, &def.parametrics, &BTreeMap::new(), &inferred, span)?;
    instantiate_struct(ctx, &module, item, env)
}
