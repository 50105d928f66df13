#![forbid(unsafe_code)]

//! Module-level checking: imports, declarations in source order, test
//! entry points, and the function/proc body checks that deduction calls
//! back into for parametric instances.

use std::sync::Arc;

use hdlx_ast::{ChannelDirection, FunctionTag, ItemId, Module, ModuleMember, TestAttribute};
use tracing::{debug, instrument};

use crate::deduce::{
    DeduceCtx, bind_parametrics, check_struct_def, deduce, deduce_block, enum_type, parametric_struct_type,
    resolve_type, resolve_type_symbolic,
};
use crate::error::{TypeError, TypeErrorKind};
use crate::import_data::{FunctionInstance, ImportData, ModuleInfo, ProcInstance};
use crate::type_info::{Callee, TypeInfoId};
use crate::types::{ConcreteType, ParametricEnv};

/// Typechecks `module` and everything it imports. Returns the module's root
/// type table.
#[instrument(skip_all, fields(module = %module.name))]
pub fn typecheck_module(data: &mut ImportData, module: Module) -> Result<TypeInfoId, TypeError> {
    let module = Arc::new(module);
    data.import_stack.push(module.name.clone());
    let root = data.arena.new_root(&module.name);
    data.register(ModuleInfo {
        module: module.clone(),
        type_info: root,
    });
    let result = module
        .items()
        .try_for_each(|(item, _)| ensure_member(data, &module, item));
    data.import_stack.pop();
    result?;
    debug!(type_infos = data.arena.len(), "typechecked");
    Ok(root)
}

fn module_root(data: &ImportData, module: &Module) -> Result<TypeInfoId, TypeError> {
    data.module(&module.name).map(|m| m.type_info).ok_or_else(|| {
        TypeError::new(
            TypeErrorKind::Import,
            format!("Module '{}' has not been registered", module.name),
            hdlx_ast::span(0, 0),
            &module.source,
        )
    })
}

fn root_ctx<'a>(data: &'a mut ImportData, module: &Arc<Module>) -> Result<DeduceCtx<'a>, TypeError> {
    let root = module_root(data, module)?;
    Ok(DeduceCtx::new(data, module.clone(), root, ParametricEnv::new()))
}

fn member_done(data: &ImportData, module: &Module, item: ItemId) -> bool {
    let Some(root) = data.module(&module.name).map(|m| m.type_info) else {
        return false;
    };
    match module.member(item) {
        ModuleMember::Import(_) => data.arena().import(root, item).is_some(),
        _ => data.arena().item_type(root, item).is_some(),
    }
}

/// Checks member `item` unless that already happened.
fn ensure_member(data: &mut ImportData, module: &Arc<Module>, item: ItemId) -> Result<(), TypeError> {
    if member_done(data, module, item) {
        return Ok(());
    }
    check_member(data, module, item)
}

fn check_member(data: &mut ImportData, module: &Arc<Module>, item: ItemId) -> Result<(), TypeError> {
    match module.member(item) {
        ModuleMember::Import(import) => import_module(data, module, item, import),
        ModuleMember::TypeAlias(alias) => {
            let mut ctx = root_ctx(data, module)?;
            let ty = resolve_type(&mut ctx, &alias.ty)?;
            ctx.info_mut().set_item_type(item, ConcreteType::Meta(Box::new(ty)));
            Ok(())
        }
        ModuleMember::Struct(def) => {
            let mut ctx = root_ctx(data, module)?;
            let st = if def.parametrics.is_empty() {
                check_struct_def(&mut ctx, item, def)?
            } else {
                parametric_struct_type(&mut ctx, module, item, def)?
            };
            ctx.info_mut()
                .set_item_type(item, ConcreteType::Meta(Box::new(ConcreteType::Struct(st))));
            Ok(())
        }
        ModuleMember::Enum(def) => {
            let mut ctx = root_ctx(data, module)?;
            let et = enum_type(&mut ctx, item, def)?;
            ctx.info_mut()
                .set_item_type(item, ConcreteType::Meta(Box::new(ConcreteType::Enum(et))));
            Ok(())
        }
        ModuleMember::Const(c) => {
            let mut ctx = root_ctx(data, module)?;
            let annotated = match &c.ty {
                Some(t) => Some(resolve_type(&mut ctx, t)?),
                None => None,
            };
            let ty = deduce(&mut ctx, &c.value, annotated.as_ref())?;
            if let Some(a) = &annotated {
                if *a != ty {
                    return Err(ctx.mismatch(
                        format!("Constant '{}' is annotated {a} but its value has type {ty}", c.name.node),
                        c.value.span,
                    ));
                }
            }
            let value = ctx.const_value(&c.value)?;
            let info = ctx.info_mut();
            info.set_item_type(item, ty);
            info.set_item_value(item, value);
            Ok(())
        }
        ModuleMember::Function(f) => {
            let sig = {
                let mut ctx = root_ctx(data, module)?;
                let mut scratch = ctx.scratch(module.clone(), ParametricEnv::new())?;
                bind_parametrics(&mut scratch, &f.parametrics)?;
                let mut params = Vec::with_capacity(f.params.len());
                for p in &f.params {
                    params.push(resolve_type_symbolic(&mut scratch, &p.ty)?);
                }
                let ret = match &f.ret {
                    Some(t) => resolve_type_symbolic(&mut scratch, t)?,
                    None => ConcreteType::unit(),
                };
                ConcreteType::Function {
                    params,
                    ret: Box::new(ret),
                }
            };
            let root = module_root(data, module)?;
            data.arena.get_mut(root).set_item_type(item, sig);
            check_test_attribute(data, module, item)?;
            if !f.is_parametric() {
                check_function(data, module, item, ParametricEnv::new(), root)?;
            }
            Ok(())
        }
        ModuleMember::Proc(p) => {
            let sig = {
                let mut ctx = root_ctx(data, module)?;
                let mut scratch = ctx.scratch(module.clone(), ParametricEnv::new())?;
                bind_parametrics(&mut scratch, &p.parametrics)?;
                let mut params = Vec::with_capacity(p.config.params.len());
                for param in &p.config.params {
                    params.push(resolve_type_symbolic(&mut scratch, &param.ty)?);
                }
                ConcreteType::Function {
                    params,
                    ret: Box::new(ConcreteType::unit()),
                }
            };
            let root = module_root(data, module)?;
            data.arena.get_mut(root).set_item_type(item, sig);
            if p.is_test && p.is_parametric() {
                return Err(TypeError::new(
                    TypeErrorKind::Unsupported,
                    format!("Test proc '{}' cannot be parametric", p.name.node),
                    p.span,
                    &module.source,
                ));
            }
            if !p.is_parametric() {
                let instance = check_proc(data, module, item, ParametricEnv::new(), root)?;
                if p.is_test {
                    let terminator = ConcreteType::Channel {
                        payload: Box::new(ConcreteType::bool()),
                        direction: ChannelDirection::Out,
                    };
                    if instance.config_params != [terminator] {
                        return Err(TypeError::new(
                            TypeErrorKind::Mismatch,
                            format!(
                                "Test proc '{}' config must take exactly one parameter of type chan<u1> out",
                                p.name.node
                            ),
                            p.config.span,
                            &module.source,
                        ));
                    }
                }
            }
            Ok(())
        }
    }
}

fn check_test_attribute(data: &ImportData, module: &Module, item: ItemId) -> Result<(), TypeError> {
    let Some(f) = module.function(item) else {
        return Ok(());
    };
    let err = |message: String| Err(TypeError::new(TypeErrorKind::Mismatch, message, f.span, &module.source));
    match &f.attribute {
        None => Ok(()),
        Some(_) if f.is_parametric() => err(format!("Test function '{}' cannot be parametric", f.name.node)),
        Some(TestAttribute::Test) if !f.params.is_empty() => {
            err(format!("Test function '{}' cannot take parameters", f.name.node))
        }
        Some(TestAttribute::Test) => Ok(()),
        Some(TestAttribute::QuickCheck { .. }) => {
            let root = data.module(&module.name).map(|m| m.type_info);
            let ret = root.and_then(|r| data.arena().item_type(r, item));
            match ret {
                Some(ConcreteType::Function { ret, .. }) if ret.is_bool() => Ok(()),
                _ => err(format!("QuickCheck function '{}' must return a bool", f.name.node)),
            }
        }
    }
}

fn import_module(
    data: &mut ImportData,
    module: &Arc<Module>,
    item: ItemId,
    import: &hdlx_ast::Import,
) -> Result<(), TypeError> {
    let path = import.dotted();
    let import_err =
        |kind, message: String| TypeError::new(kind, message, import.span, &module.source);
    if data.import_stack.contains(&path) {
        let mut chain = data.import_stack.clone();
        chain.push(path);
        return Err(import_err(
            TypeErrorKind::ImportCycle,
            format!("Import cycle detected: {}", chain.join(" -> ")),
        ));
    }
    if data.module(&path).is_none() {
        let (filename, text) = data
            .resolve_import(&path)
            .map_err(|m| import_err(TypeErrorKind::Import, m))?;
        debug!(%path, %filename, "importing");
        let parsed = hdlx_parse::parse_module(&text, &filename, &path)
            .map_err(|e| import_err(TypeErrorKind::Import, format!("Could not parse imported module '{path}': {e}")))?;
        typecheck_module(data, parsed)?;
    }
    let root = module_root(data, module)?;
    data.arena.get_mut(root).add_import(item, path);
    Ok(())
}

/// Checks a function body under `env` in table `type_info` and registers
/// the instance.
pub(crate) fn check_function(
    data: &mut ImportData,
    module: &Arc<Module>,
    item: ItemId,
    env: ParametricEnv,
    type_info: TypeInfoId,
) -> Result<FunctionInstance, TypeError> {
    let Some(f) = module.function(item) else {
        return Err(TypeError::new(
            TypeErrorKind::Mismatch,
            format!("'{}' is not a function", module.member(item).name()),
            module.member(item).span(),
            &module.source,
        ));
    };
    let callee = Callee {
        module: module.name.clone(),
        item,
    };
    data.active.push(callee);
    let result = {
        let mut ctx = DeduceCtx::new(data, module.clone(), type_info, env.clone());
        ctx.tag = Some(f.tag);
        check_body(&mut ctx, &f.parametrics, f)
    };
    data.active.pop();
    let (params, ret) = result?;
    let instance = FunctionInstance {
        type_info,
        params,
        ret,
    };
    data.functions
        .insert((module.name.clone(), item, env), instance.clone());
    Ok(instance)
}

fn bind_params(ctx: &mut DeduceCtx, f: &hdlx_ast::Function) -> Result<Vec<ConcreteType>, TypeError> {
    let mut params = Vec::with_capacity(f.params.len());
    for p in &f.params {
        let t = resolve_type(ctx, &p.ty)?;
        ctx.info_mut().set_name_def_type(p.name_def, t.clone());
        params.push(t);
    }
    Ok(params)
}

/// Binds parametrics and params, then checks the body against the
/// declared return type.
fn check_body(
    ctx: &mut DeduceCtx,
    parametrics: &[hdlx_ast::ParametricBinding],
    f: &hdlx_ast::Function,
) -> Result<(Vec<ConcreteType>, ConcreteType), TypeError> {
    bind_parametrics(ctx, parametrics)?;
    let params = bind_params(ctx, f)?;
    let ret = match &f.ret {
        Some(t) => resolve_type(ctx, t)?,
        None => ConcreteType::unit(),
    };
    let body = deduce_block(ctx, &f.body, Some(&ret))?;
    if body != ret {
        return Err(ctx.mismatch(
            format!(
                "Return type of function body for '{}' did not match the annotated return type: {ret} vs {body}",
                f.name.node
            ),
            f.body.span,
        ));
    }
    Ok((params, ret))
}

/// Checks config, init, and next of proc `item` under `env` and registers
/// the instance.
pub(crate) fn check_proc(
    data: &mut ImportData,
    module: &Arc<Module>,
    item: ItemId,
    env: ParametricEnv,
    type_info: TypeInfoId,
) -> Result<ProcInstance, TypeError> {
    let Some(p) = module.proc(item) else {
        return Err(TypeError::new(
            TypeErrorKind::Mismatch,
            format!("'{}' is not a proc", module.member(item).name()),
            module.member(item).span(),
            &module.source,
        ));
    };
    data.active.push(Callee {
        module: module.name.clone(),
        item,
    });
    let result = {
        let mut ctx = DeduceCtx::new(data, module.clone(), type_info, env.clone());
        check_proc_functions(&mut ctx, p)
    };
    data.active.pop();
    let (config_params, members, state) = result?;
    debug!(proc = %p.name.node, %state, "checked proc");
    let instance = ProcInstance {
        type_info,
        config_params,
        members,
        state,
    };
    data.procs.insert((module.name.clone(), item, env), instance.clone());
    Ok(instance)
}

fn check_proc_functions(
    ctx: &mut DeduceCtx,
    p: &hdlx_ast::Proc,
) -> Result<(Vec<ConcreteType>, Vec<ConcreteType>, ConcreteType), TypeError> {
    bind_parametrics(ctx, &p.parametrics)?;
    let mut members = Vec::with_capacity(p.members.len());
    for m in &p.members {
        let t = resolve_type(ctx, &m.ty)?;
        ctx.info_mut().set_name_def_type(m.name_def, t.clone());
        members.push(t);
    }

    ctx.tag = Some(FunctionTag::ProcConfig);
    let config_params = bind_params(ctx, &p.config)?;
    let config_ret = deduce_block(ctx, &p.config.body, None)?;
    let member_tuple = ConcreteType::Tuple(members.clone());
    if config_ret != member_tuple {
        return Err(ctx.mismatch(
            format!("Proc config function must return the member tuple {member_tuple}; got {config_ret}"),
            p.config.body.span,
        ));
    }

    ctx.tag = Some(FunctionTag::ProcInit);
    if !p.init.params.is_empty() {
        return Err(ctx.mismatch("Proc init function cannot take parameters", p.init.span));
    }
    let state = deduce_block(ctx, &p.init.body, None)?;
    if let Some(ret) = &p.init.ret {
        let annotated = resolve_type(ctx, ret)?;
        if annotated != state {
            return Err(ctx.mismatch(
                format!("Proc init function returns {state}; annotated {annotated}"),
                p.init.body.span,
            ));
        }
    }

    ctx.tag = Some(FunctionTag::ProcNext);
    let next_params = bind_params(ctx, &p.next)?;
    let params_ok = match next_params.as_slice() {
        [] => state.is_unit(),
        [s] => *s == state,
        [ConcreteType::Token, s] => *s == state,
        _ => false,
    };
    if !params_ok {
        return Err(ctx.mismatch(
            format!("Proc next function must take the state of type {state} (optionally after a token)"),
            p.next.span,
        ));
    }
    let body = deduce_block(ctx, &p.next.body, Some(&state))?;
    if body != state {
        return Err(ctx.mismatch(
            format!("Proc next function must return the state type {state}; got {body}"),
            p.next.body.span,
        ));
    }
    Ok((config_params, members, state))
}
