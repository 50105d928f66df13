#![forbid(unsafe_code)]

//! Invocations of user functions and builtins, and `spawn`.

use std::collections::BTreeMap;
use std::sync::Arc;

use hdlx_ast::{
    Builtin, ChannelDirection, Expr, ExprKind, ExprOrType, FunctionTag, Invocation, ItemId, Module, RefTarget, Span, Spawn,
};

use super::{DeduceCtx, deduce, deduce_range, explicit_values, resolve_type, solve, unify};
use crate::error::{TypeError, TypeErrorKind};
use crate::import_data::{FunctionInstance, ProcInstance};
use crate::type_info::{Callee, InvocationData, SpawnData};
use crate::types::{ConcreteType, ParametricEnv, TypeDim};

/// Definition a callee expression names, in whichever module holds it.
fn callee_target(ctx: &DeduceCtx, callee: &Expr) -> Result<(Arc<Module>, ItemId), TypeError> {
    match &callee.kind {
        ExprKind::NameRef(r) => match r.target {
            RefTarget::Item(item) => Ok((ctx.module.clone(), item)),
            _ => Err(ctx.mismatch(format!("'{}' cannot be invoked", r.name), callee.span)),
        },
        ExprKind::ColonRef(c) => ctx.colon_target(c),
        _ => Err(ctx.err(
            TypeErrorKind::Unsupported,
            "Only named functions can be invoked",
            callee.span,
        )),
    }
}

fn check_not_active(ctx: &DeduceCtx, callee: &Callee, name: &str, span: Span) -> Result<(), TypeError> {
    if ctx.data.active.contains(callee) {
        return Err(ctx.err(
            TypeErrorKind::Recursion,
            format!("Recursion of '{name}' detected; recursion is not supported"),
            span,
        ));
    }
    Ok(())
}

fn arity_error(ctx: &DeduceCtx, expected: usize, got: usize, span: Span) -> TypeError {
    ctx.err(
        TypeErrorKind::ArityMismatch,
        format!("Expected {expected} parameter(s) but got {got} argument(s)"),
        span,
    )
}

/// Deduces arguments against symbolic parameter types and returns the
/// argument types plus whatever parametric values they pin down.
fn deduce_args(
    ctx: &mut DeduceCtx,
    params: &[ConcreteType],
    args: &[Expr],
    span: Span,
) -> Result<(Vec<ConcreteType>, BTreeMap<String, u64>), TypeError> {
    if params.len() != args.len() {
        return Err(arity_error(ctx, params.len(), args.len(), span));
    }
    let mut inferred = BTreeMap::new();
    let mut types = Vec::with_capacity(args.len());
    for (param, arg) in params.iter().zip(args) {
        let expected = (!param.has_parametric_dims()).then(|| param.clone());
        let t = deduce(ctx, arg, expected.as_ref())?;
        unify(param, &t, &mut inferred).map_err(|m| ctx.mismatch(m, arg.span))?;
        types.push(t);
    }
    Ok((types, inferred))
}

fn check_args(ctx: &DeduceCtx, params: &[ConcreteType], actual: &[ConcreteType], args: &[Expr]) -> Result<(), TypeError> {
    for ((p, a), arg) in params.iter().zip(actual).zip(args) {
        if p != a {
            return Err(ctx.mismatch(
                format!("Mismatch between parameter and argument types: {p} vs {a}"),
                arg.span,
            ));
        }
    }
    Ok(())
}

/// Fills dimensions that depend only on explicit parametrics.
fn apply_explicit(ty: &ConcreteType, explicit: &BTreeMap<String, crate::value::InterpValue>) -> ConcreteType {
    let lookup = |s: &str| explicit.get(s).and_then(|v| v.as_u64().ok());
    ty.map_dims(&|e| match e.evaluate(&lookup) {
        Some(n) => TypeDim::Known(n),
        None => TypeDim::Parametric(e.clone()),
    })
}

fn signature(ty: ConcreteType) -> (Vec<ConcreteType>, ConcreteType) {
    match ty {
        ConcreteType::Function { params, ret } => (params, *ret),
        other => (Vec::new(), other),
    }
}

pub(super) fn deduce_invocation(
    ctx: &mut DeduceCtx,
    expr: &Expr,
    inv: &Invocation,
    expected: Option<&ConcreteType>,
) -> Result<ConcreteType, TypeError> {
    if let Some(b) = inv.builtin() {
        return deduce_builtin(ctx, expr, inv, b, expected);
    }
    let (module, item) = callee_target(ctx, &inv.callee)?;
    let Some(f) = module.function(item) else {
        let member = module.member(item);
        return Err(ctx.mismatch(
            format!("'{}' is a {} and cannot be invoked", member.name(), member.kind_name()),
            inv.callee.span,
        ));
    };
    if f.tag != FunctionTag::Normal {
        return Err(ctx.mismatch(format!("Proc function '{}' cannot be invoked directly", f.name.node), inv.callee.span));
    }
    let callee = Callee {
        module: module.name.clone(),
        item,
    };
    check_not_active(ctx, &callee, &f.name.node, expr.span)?;
    let sig = ctx.member_type(&module, item, inv.callee.span)?;
    let (params, ret) = signature(sig);

    let (callee_env, instance) = if f.parametrics.is_empty() {
        if !inv.parametrics.is_empty() {
            return Err(ctx.err(
                TypeErrorKind::ArityMismatch,
                format!("Function '{}' does not take parametrics", f.name.node),
                expr.span,
            ));
        }
        let (actual, _) = deduce_args(ctx, &params, &inv.args, expr.span)?;
        check_args(ctx, &params, &actual, &inv.args)?;
        let root = ctx.module_root(&module.name)?;
        let instance = FunctionInstance {
            type_info: root,
            params,
            ret,
        };
        (ParametricEnv::new(), instance)
    } else {
        let explicit = explicit_values(ctx, &module, &f.parametrics, &inv.parametrics, expr.span)?;
        let params: Vec<ConcreteType> = params.iter().map(|p| apply_explicit(p, &explicit)).collect();
        let (actual, inferred) = deduce_args(ctx, &params, &inv.args, expr.span)?;
        let env = solve(ctx, &module, &f.parametrics, &explicit, &inferred, expr.span)?;
        let instance = instantiate_function(ctx, &module, item, env.clone(), expr.span)?;
        check_args(ctx, &instance.params, &actual, &inv.args)?;
        (env, instance)
    };

    let caller_env = ctx.env.clone();
    ctx.info_mut().add_invocation(
        expr.id,
        caller_env,
        InvocationData {
            callee,
            callee_env,
            type_info: instance.type_info,
        },
    );
    Ok(instance.ret)
}

/// Checked body of function `item` under `env`; memoized per env.
pub(crate) fn instantiate_function(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    item: ItemId,
    env: ParametricEnv,
    span: Span,
) -> Result<FunctionInstance, TypeError> {
    let key = (module.name.clone(), item, env.clone());
    if let Some(inst) = ctx.data.functions.get(&key) {
        return Ok(inst.clone());
    }
    let callee = Callee {
        module: module.name.clone(),
        item,
    };
    check_not_active(ctx, &callee, module.member(item).name(), span)?;
    let root = ctx.module_root(&module.name)?;
    let ti = ctx.data.arena.new_child(root);
    tracing::debug!(function = module.member(item).name(), %env, "instantiating");
    crate::typecheck::check_function(ctx.data, module, item, env, ti)
}

/// Checked proc `item` under `env`; memoized per env.
pub(crate) fn instantiate_proc(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    item: ItemId,
    env: ParametricEnv,
    span: Span,
) -> Result<ProcInstance, TypeError> {
    let key = (module.name.clone(), item, env.clone());
    if let Some(inst) = ctx.data.procs.get(&key) {
        return Ok(inst.clone());
    }
    let callee = Callee {
        module: module.name.clone(),
        item,
    };
    check_not_active(ctx, &callee, module.member(item).name(), span)?;
    let root = ctx.module_root(&module.name)?;
    let ti = ctx.data.arena.new_child(root);
    tracing::debug!(proc = module.member(item).name(), %env, "instantiating");
    crate::typecheck::check_proc(ctx.data, module, item, env, ti)
}

pub(super) fn deduce_spawn(ctx: &mut DeduceCtx, expr: &Expr, s: &Spawn) -> Result<ConcreteType, TypeError> {
    if ctx.tag != Some(FunctionTag::ProcConfig) {
        return Err(ctx.err(
            TypeErrorKind::Unsupported,
            "Procs can only be spawned from a proc config function",
            expr.span,
        ));
    }
    let (module, item) = callee_target(ctx, &s.callee)?;
    let Some(p) = module.proc(item) else {
        let member = module.member(item);
        return Err(ctx.mismatch(
            format!("Cannot spawn '{}'; it is a {}, not a proc", member.name(), member.kind_name()),
            s.callee.span,
        ));
    };
    let sig = ctx.member_type(&module, item, s.callee.span)?;
    let (params, _) = signature(sig);
    let explicit = explicit_values(ctx, &module, &p.parametrics, &s.parametrics, expr.span)?;
    let params: Vec<ConcreteType> = params.iter().map(|t| apply_explicit(t, &explicit)).collect();
    let (actual, inferred) = deduce_args(ctx, &params, &s.args, expr.span)?;
    let env = solve(ctx, &module, &p.parametrics, &explicit, &inferred, expr.span)?;
    let instance = instantiate_proc(ctx, &module, item, env.clone(), expr.span)?;
    check_args(ctx, &instance.config_params, &actual, &s.args)?;
    let caller_env = ctx.env.clone();
    ctx.info_mut().add_spawn(
        expr.id,
        caller_env,
        SpawnData {
            proc_ref: Callee {
                module: module.name.clone(),
                item,
            },
            env,
            type_info: instance.type_info,
        },
    );
    Ok(ConcreteType::unit())
}

fn expect_type(ctx: &mut DeduceCtx, arg: &Expr, want: &ConcreteType, what: &str) -> Result<(), TypeError> {
    let t = deduce(ctx, arg, Some(want))?;
    if t != *want {
        return Err(ctx.mismatch(format!("{what} must be {want}; got {t}"), arg.span));
    }
    Ok(())
}

fn expect_bits(ctx: &mut DeduceCtx, arg: &Expr, b: Builtin) -> Result<ConcreteType, TypeError> {
    let t = deduce(ctx, arg, None)?;
    if !t.is_bits() || t.bits_info().is_none() {
        return Err(ctx.mismatch(format!("'{b}' requires a bits argument; got {t}"), arg.span));
    }
    Ok(t)
}

/// Payload type of a channel argument with the given direction.
fn expect_channel(ctx: &mut DeduceCtx, arg: &Expr, direction: ChannelDirection, b: Builtin) -> Result<ConcreteType, TypeError> {
    let t = deduce(ctx, arg, None)?;
    match t {
        ConcreteType::Channel { payload, direction: d } if d == direction => Ok(*payload),
        other => Err(ctx.mismatch(
            format!("'{b}' requires a channel with direction '{}'; got {other}", direction.keyword()),
            arg.span,
        )),
    }
}

fn type_parametric(ctx: &mut DeduceCtx, inv: &Invocation, b: Builtin, span: Span) -> Result<ConcreteType, TypeError> {
    match inv.parametrics.as_slice() {
        [ExprOrType::Type(t)] => {
            let ty = resolve_type(ctx, t)?;
            if !ty.is_bits() || ty.bits_info().is_none() {
                return Err(ctx.mismatch(format!("'{b}' target must be a bits type; got {ty}"), t.span));
            }
            Ok(ty)
        }
        _ => Err(ctx.err(
            TypeErrorKind::ArityMismatch,
            format!("'{b}' takes exactly one type parametric"),
            span,
        )),
    }
}

fn deduce_builtin(
    ctx: &mut DeduceCtx,
    expr: &Expr,
    inv: &Invocation,
    b: Builtin,
    expected: Option<&ConcreteType>,
) -> Result<ConcreteType, TypeError> {
    let info = b.info();
    let args = &inv.args;
    if let Some(n) = info.arity {
        if args.len() != n {
            return Err(ctx.err(
                TypeErrorKind::ArityMismatch,
                format!("Expected {n} argument(s) to '{b}'; got {}", args.len()),
                expr.span,
            ));
        }
    }
    if !info.takes_type && !inv.parametrics.is_empty() {
        return Err(ctx.err(TypeErrorKind::ArityMismatch, format!("'{b}' does not take parametrics"), expr.span));
    }
    if info.channel_op && ctx.tag != Some(FunctionTag::ProcNext) {
        return Err(ctx.err(
            TypeErrorKind::Unsupported,
            format!("Channel operation '{b}' can only be used in a proc's next function"),
            expr.span,
        ));
    }
    let token = ConcreteType::Token;
    let bool_ty = ConcreteType::bool();
    match b {
        Builtin::AndReduce | Builtin::OrReduce | Builtin::XorReduce => {
            expect_bits(ctx, &args[0], b)?;
            Ok(bool_ty)
        }
        Builtin::Rev | Builtin::Clz | Builtin::Ctz => expect_bits(ctx, &args[0], b),
        Builtin::Signex => {
            let x = expect_bits(ctx, &args[0], b)?;
            let y = expect_bits(ctx, &args[1], b)?;
            let (xw, yw) = (x.bits_info().map(|(_, w)| w), y.bits_info().map(|(_, w)| w));
            if xw > yw {
                return Err(ctx.mismatch(format!("signex cannot narrow {x} to {y}"), expr.span));
            }
            Ok(y)
        }
        Builtin::ArraySize => {
            let t = deduce(ctx, &args[0], None)?;
            if !matches!(t, ConcreteType::Array { .. }) {
                return Err(ctx.mismatch(format!("array_size requires an array; got {t}"), args[0].span));
            }
            Ok(ConcreteType::ubits(32))
        }
        Builtin::Update => {
            let t = deduce(ctx, &args[0], expected)?;
            let ConcreteType::Array { element, .. } = &t else {
                return Err(ctx.mismatch(format!("update requires an array; got {t}"), args[0].span));
            };
            let it = deduce(ctx, &args[1], None)?;
            if !matches!(it.bits_info(), Some((false, _))) || !it.is_bits() {
                return Err(ctx.mismatch(format!("update index must be unsigned bits; got {it}"), args[1].span));
            }
            expect_type(ctx, &args[2], element, "update value")?;
            Ok(t)
        }
        Builtin::Range => deduce_range(ctx, expr.span, &args[0], &args[1]),
        Builtin::AssertEq => {
            let a = deduce(ctx, &args[0], None)?;
            let bt = deduce(ctx, &args[1], Some(&a))?;
            if a != bt {
                return Err(ctx.mismatch(format!("assert_eq operands differ in type: {a} vs {bt}"), expr.span));
            }
            Ok(ConcreteType::unit())
        }
        Builtin::AssertLt => {
            let a = expect_bits(ctx, &args[0], b)?;
            expect_type(ctx, &args[1], &a, "assert_lt rhs")?;
            Ok(ConcreteType::unit())
        }
        Builtin::CheckedCast => {
            let target = type_parametric(ctx, inv, b, expr.span)?;
            expect_bits(ctx, &args[0], b)?;
            Ok(target)
        }
        Builtin::WideningCast => {
            let target = type_parametric(ctx, inv, b, expr.span)?;
            let source = expect_bits(ctx, &args[0], b)?;
            let (Some((ss, sw)), Some((ts, tw))) = (source.bits_info(), target.bits_info()) else {
                return Err(ctx.mismatch("widening_cast requires sized bits types", expr.span));
            };
            let ok = (ss == ts && tw >= sw) || (!ss && ts && tw > sw);
            if !ok {
                return Err(ctx.mismatch(
                    format!("Cannot cast from type {source} to {target} with widening_cast"),
                    expr.span,
                ));
            }
            Ok(target)
        }
        Builtin::Fail => {
            let label = deduce(ctx, &args[0], None)?;
            if !matches!(&label, ConcreteType::Array { element, .. } if **element == ConcreteType::ubits(8)) {
                return Err(ctx.mismatch(format!("fail! label must be a string; got {label}"), args[0].span));
            }
            deduce(ctx, &args[1], expected)
        }
        Builtin::Cover => {
            let label = deduce(ctx, &args[0], None)?;
            if !matches!(&label, ConcreteType::Array { element, .. } if **element == ConcreteType::ubits(8)) {
                return Err(ctx.mismatch(format!("cover! label must be a string; got {label}"), args[0].span));
            }
            expect_type(ctx, &args[1], &bool_ty, "cover! condition")?;
            Ok(ConcreteType::unit())
        }
        Builtin::Join => {
            for arg in args {
                expect_type(ctx, arg, &token, "join argument")?;
            }
            Ok(token)
        }
        Builtin::Send => {
            expect_type(ctx, &args[0], &token, "send token")?;
            let payload = expect_channel(ctx, &args[1], ChannelDirection::Out, b)?;
            expect_type(ctx, &args[2], &payload, "send payload")?;
            Ok(token)
        }
        Builtin::SendIf => {
            expect_type(ctx, &args[0], &token, "send_if token")?;
            let payload = expect_channel(ctx, &args[1], ChannelDirection::Out, b)?;
            expect_type(ctx, &args[2], &bool_ty, "send_if predicate")?;
            expect_type(ctx, &args[3], &payload, "send_if payload")?;
            Ok(token)
        }
        Builtin::Recv => {
            expect_type(ctx, &args[0], &token, "recv token")?;
            let payload = expect_channel(ctx, &args[1], ChannelDirection::In, b)?;
            Ok(ConcreteType::Tuple(vec![token, payload]))
        }
        Builtin::RecvIf => {
            expect_type(ctx, &args[0], &token, "recv_if token")?;
            let payload = expect_channel(ctx, &args[1], ChannelDirection::In, b)?;
            expect_type(ctx, &args[2], &bool_ty, "recv_if predicate")?;
            expect_type(ctx, &args[3], &payload, "recv_if default")?;
            Ok(ConcreteType::Tuple(vec![token, payload]))
        }
        Builtin::RecvNonBlocking => {
            expect_type(ctx, &args[0], &token, "recv_non_blocking token")?;
            let payload = expect_channel(ctx, &args[1], ChannelDirection::In, b)?;
            expect_type(ctx, &args[2], &payload, "recv_non_blocking default")?;
            Ok(ConcreteType::Tuple(vec![token, payload, bool_ty]))
        }
        Builtin::RecvIfNonBlocking => {
            expect_type(ctx, &args[0], &token, "recv_if_non_blocking token")?;
            let payload = expect_channel(ctx, &args[1], ChannelDirection::In, b)?;
            expect_type(ctx, &args[2], &bool_ty, "recv_if_non_blocking predicate")?;
            expect_type(ctx, &args[3], &payload, "recv_if_non_blocking default")?;
            Ok(ConcreteType::Tuple(vec![token, payload, bool_ty]))
        }
    }
}
