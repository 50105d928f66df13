#![forbid(unsafe_code)]

//! Compile-time evaluation of expressions whose inputs are all known.

mod interp;

use std::collections::BTreeMap;

use hdlx_ast::{Expr, ItemId, NameDefId, walk};

use crate::deduce::DeduceCtx;
use crate::error::ConstexprError;
use crate::import_data::ImportData;
use crate::type_info::TypeInfoId;
use crate::types::ParametricEnv;
use crate::value::InterpValue;

pub use interp::MAX_CALL_DEPTH;
use interp::{Evaluator, Frame};

/// Known values for the free variables of an expression.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstexprEnv {
    pub parametrics: ParametricEnv,
    pub values: BTreeMap<NameDefId, InterpValue>,
}

/// Collects the recorded values of `expr`'s free variables. Variables
/// without a recorded value are left out; evaluation reports them.
pub fn make_constexpr_env(
    data: &ImportData,
    type_info: TypeInfoId,
    env: &ParametricEnv,
    expr: &Expr,
) -> ConstexprEnv {
    let values = walk::free_variables(expr)
        .into_iter()
        .filter_map(|id| data.arena().name_def_value(type_info, id).map(|v| (id, v.clone())))
        .collect();
    ConstexprEnv {
        parametrics: env.clone(),
        values,
    }
}

/// Evaluates an already-deduced `expr` and records its value.
pub fn evaluate_to_value(ctx: &mut DeduceCtx, expr: &Expr) -> Result<InterpValue, ConstexprError> {
    if let Some(Some(v)) = ctx.arena().const_value(ctx.type_info, expr.id) {
        return Ok(v.clone());
    }
    let cenv = make_constexpr_env(ctx.data, ctx.type_info, &ctx.env, expr);
    let value = {
        let mut frame = Frame {
            module: ctx.module.clone(),
            type_info: ctx.type_info,
            env: cenv.parametrics,
            locals: cenv.values.into_iter().collect(),
        };
        Evaluator::new(ctx.data).eval(&mut frame, expr)?
    };
    ctx.info_mut().set_const_value(expr.id, Some(value.clone()));
    Ok(value)
}

/// Value of `expr` when it is constexpr. Failures are treated as "not
/// constexpr" so code that is never executed cannot fail typechecking.
pub fn evaluate(ctx: &mut DeduceCtx, expr: &Expr) -> Option<InterpValue> {
    if let Some(known) = ctx.arena().const_value(ctx.type_info, expr.id) {
        return known.clone();
    }
    match evaluate_to_value(ctx, expr) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::trace!(error = %e, "not constexpr");
            ctx.info_mut().set_const_value(expr.id, None);
            None
        }
    }
}

/// Calls a checked function at compile time.
pub fn call_function(
    data: &ImportData,
    module: &str,
    item: ItemId,
    env: &ParametricEnv,
    args: Vec<InterpValue>,
) -> Result<InterpValue, ConstexprError> {
    Evaluator::new(data).call(module, item, env, args)
}
