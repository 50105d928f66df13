#![forbid(unsafe_code)]

//! Solving parametric bindings from explicit values, argument types, and
//! default expressions.

use std::collections::BTreeMap;
use std::sync::Arc;

use hdlx_ast::{Module, ParametricBinding, Span, walk};

use super::{DeduceCtx, bind_parametrics, deduce, resolve_type};
use crate::error::{TypeError, TypeErrorKind};
use crate::types::{ConcreteType, ParametricEnv, ParametricExpr, TypeDim};
use crate::value::InterpValue;

/// Binds the symbols of `param` by matching it against the concrete `arg`.
/// Shape mismatches are left for the caller's type comparison.
pub(crate) fn unify(param: &ConcreteType, arg: &ConcreteType, out: &mut BTreeMap<String, u64>) -> Result<(), String> {
    match (param, arg) {
        (ConcreteType::Bits { size: p, .. }, ConcreteType::Bits { size: a, .. }) => unify_dim(p, a, out),
        (ConcreteType::Array { element: pe, size: ps }, ConcreteType::Array { element: ae, size: as_ }) => {
            unify(pe, ae, out)?;
            unify_dim(ps, as_, out)
        }
        (ConcreteType::Tuple(ps), ConcreteType::Tuple(as_)) if ps.len() == as_.len() => {
            ps.iter().zip(as_).try_for_each(|(p, a)| unify(p, a, out))
        }
        (ConcreteType::Struct(p), ConcreteType::Struct(a)) if p.nominal == a.nominal => p
            .members
            .iter()
            .zip(&a.members)
            .try_for_each(|((_, p), (_, a))| unify(p, a, out)),
        (ConcreteType::Channel { payload: p, .. }, ConcreteType::Channel { payload: a, .. }) => unify(p, a, out),
        (
            ConcreteType::Function { params: pp, ret: pr },
            ConcreteType::Function { params: ap, ret: ar },
        ) if pp.len() == ap.len() => {
            pp.iter().zip(ap).try_for_each(|(p, a)| unify(p, a, out))?;
            unify(pr, ar, out)
        }
        _ => Ok(()),
    }
}

fn unify_dim(param: &TypeDim, arg: &TypeDim, out: &mut BTreeMap<String, u64>) -> Result<(), String> {
    let (TypeDim::Parametric(ParametricExpr::Symbol(name)), Some(value)) = (param, arg.known()) else {
        return Ok(());
    };
    match out.get(name) {
        Some(&seen) if seen != value => Err(format!(
            "Parametric value {name} was bound to different values at different places in invocation; saw: {seen}; then: {value}"
        )),
        _ => {
            out.insert(name.clone(), value);
            Ok(())
        }
    }
}

/// Declared types of `bindings`, resolved in their defining module.
pub(crate) fn binding_types(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    bindings: &[ParametricBinding],
) -> Result<Vec<ConcreteType>, TypeError> {
    let mut scratch = ctx.scratch(module.clone(), ParametricEnv::new())?;
    bindings.iter().map(|b| resolve_type(&mut scratch, &b.ty)).collect()
}

/// Produces the full env for `bindings`. Explicit values win, inferred
/// values come next, and the remaining bindings are filled from their
/// defaults in dependency order.
pub(crate) fn solve(
    ctx: &mut DeduceCtx,
    module: &Arc<Module>,
    bindings: &[ParametricBinding],
    explicit: &BTreeMap<String, InterpValue>,
    inferred: &BTreeMap<String, u64>,
    span: Span,
) -> Result<ParametricEnv, TypeError> {
    let types = binding_types(ctx, module, bindings)?;
    let mut env = ParametricEnv::new();
    for (b, ty) in bindings.iter().zip(&types) {
        let name = &b.name.node;
        if let Some(v) = explicit.get(name) {
            env = env.with(name.clone(), v.clone());
        } else if let Some(&n) = inferred.get(name) {
            let Some((signed, width)) = ty.bits_info() else {
                return Err(ctx.mismatch(format!("Parametric '{name}' must have a bits type; got {ty}"), b.name.span));
            };
            env = env.with(name.clone(), InterpValue::bits(signed, width as u32, n as u128));
        }
    }

    // Defaults of bindings that already have a value must agree with it.
    let mut pending: Vec<usize> = (0..bindings.len())
        .filter(|&i| bindings[i].default.is_some() && !explicit.contains_key(&bindings[i].name.node))
        .collect();
    let mut rounds = 0;
    while !pending.is_empty() && rounds < ctx.data.options.max_parametric_rounds {
        rounds += 1;
        let mut progressed = false;
        let mut still_pending = Vec::new();
        for i in pending {
            let b = &bindings[i];
            let Some(default) = &b.default else {
                continue;
            };
            if !ready(module, bindings, &env, default, &b.name.node) {
                still_pending.push(i);
                continue;
            }
            let value = {
                let mut scratch = ctx.scratch(module.clone(), env.clone())?;
                bind_parametrics(&mut scratch, bindings)?;
                let t = deduce(&mut scratch, default, Some(&types[i]))?;
                if t != types[i] {
                    return Err(scratch.mismatch(
                        format!("Default for parametric '{}' has type {t}; expected {}", b.name.node, types[i]),
                        default.span,
                    ));
                }
                scratch.const_value(default)?
            };
            match env.get(&b.name.node) {
                Some(existing) if *existing != value => {
                    return Err(ctx.mismatch(
                        format!(
                            "Inconsistent parametric instantiation: '{}' was inferred as {existing} but its default is {value}",
                            b.name.node
                        ),
                        span,
                    ));
                }
                Some(_) => {}
                None => env = env.with(b.name.node.clone(), value),
            }
            progressed = true;
        }
        pending = still_pending;
        if !progressed {
            break;
        }
    }

    let unbound: Vec<&ParametricBinding> = bindings.iter().filter(|b| !env.contains(&b.name.node)).collect();
    if unbound.is_empty() {
        return Ok(env);
    }
    let names = unbound.iter().map(|b| b.name.node.as_str()).collect::<Vec<_>>().join(", ");
    if unbound.iter().any(|b| b.default.is_none()) {
        let missing = unbound
            .iter()
            .filter(|b| b.default.is_none())
            .map(|b| b.name.node.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ctx.err(
            TypeErrorKind::UnresolvedParametric,
            format!("Could not infer parametric(s): {missing}"),
            span,
        ));
    }
    // Defaults only see earlier bindings, so every default is ready in the
    // first round; reaching this point means the round budget ran out.
    Err(ctx.err(
        TypeErrorKind::ParametricCycle,
        format!("Parametric defaults did not resolve within {rounds} round(s): {names}"),
        span,
    ))
}

/// Whether every sibling binding `default` mentions already has a value.
fn ready(
    module: &Module,
    bindings: &[ParametricBinding],
    env: &ParametricEnv,
    default: &hdlx_ast::Expr,
    own_name: &str,
) -> bool {
    walk::free_variables(default).into_iter().all(|id| {
        match bindings.iter().find(|b| b.name_def == id) {
            Some(b) => b.name.node != own_name && env.contains(&b.name.node),
            None => module.name_def(id).kind != hdlx_ast::NameDefKind::ParametricBinding,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> ConcreteType {
        ConcreteType::Bits {
            signed: false,
            size: TypeDim::Parametric(ParametricExpr::Symbol(name.to_string())),
        }
    }

    #[test]
    fn unify_binds_symbols_through_arrays() {
        let param = ConcreteType::Array {
            element: Box::new(sym("W")),
            size: TypeDim::Parametric(ParametricExpr::Symbol("N".into())),
        };
        let arg = ConcreteType::array(ConcreteType::ubits(8), 4);
        let mut out = BTreeMap::new();
        unify(&param, &arg, &mut out).unwrap();
        assert_eq!(out.get("W"), Some(&8));
        assert_eq!(out.get("N"), Some(&4));
    }

    #[test]
    fn unify_reports_conflicting_bindings() {
        let param = ConcreteType::Tuple(vec![sym("N"), sym("N")]);
        let arg = ConcreteType::Tuple(vec![ConcreteType::ubits(8), ConcreteType::ubits(16)]);
        let err = unify(&param, &arg, &mut BTreeMap::new()).unwrap_err();
        assert!(err.contains("saw: 8; then: 16"), "{err}");
    }

    #[test]
    fn unify_skips_compound_dimensions() {
        let param = ConcreteType::Bits {
            signed: false,
            size: TypeDim::Parametric(ParametricExpr::add(
                ParametricExpr::Symbol("N".into()),
                ParametricExpr::Constant(1),
            )),
        };
        let mut out = BTreeMap::new();
        unify(&param, &ConcreteType::ubits(9), &mut out).unwrap();
        assert!(out.is_empty());
    }
}
