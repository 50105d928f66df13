#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use hdlx_ast::{FunctionTag, ItemId, Module};
use hdlx_core::{ImportData, ParametricEnv, TypeInfoId};
use tracing::trace;

use crate::bytecode::BytecodeFunction;
use crate::emit::{detached, emit, emit_proc_next};
use crate::error::EmitError;

type Key = (String, ItemId, FunctionTag, ParametricEnv);

/// Emitted functions keyed by definition, proc phase, and parametric env.
#[derive(Debug, Default)]
pub struct BytecodeCache {
    functions: HashMap<Key, Arc<BytecodeFunction>>,
}

impl BytecodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Bytecode for a plain function.
    pub fn function(
        &mut self,
        data: &ImportData,
        module: &str,
        item: ItemId,
        env: &ParametricEnv,
        type_info: TypeInfoId,
    ) -> Result<Arc<BytecodeFunction>, EmitError> {
        self.get_or_emit(data, module, item, FunctionTag::Normal, env, |m| {
            let f = m
                .function(item)
                .ok_or_else(|| detached(format!("'{}' is not a function", m.member(item).name()), module))?;
            emit(data, type_info, f, env)
        })
    }

    /// Bytecode for one phase of a proc.
    pub fn proc_function(
        &mut self,
        data: &ImportData,
        module: &str,
        item: ItemId,
        tag: FunctionTag,
        env: &ParametricEnv,
        type_info: TypeInfoId,
    ) -> Result<Arc<BytecodeFunction>, EmitError> {
        self.get_or_emit(data, module, item, tag, env, |m| {
            let p = m
                .proc(item)
                .ok_or_else(|| detached(format!("'{}' is not a proc", m.member(item).name()), module))?;
            match tag {
                FunctionTag::ProcConfig => emit(data, type_info, &p.config, env),
                FunctionTag::ProcInit => emit(data, type_info, &p.init, env),
                FunctionTag::ProcNext => emit_proc_next(data, type_info, p, env),
                FunctionTag::Normal => Err(detached(format!("'{}' has no plain function body", p.name.node), module)),
            }
        })
    }

    fn get_or_emit(
        &mut self,
        data: &ImportData,
        module: &str,
        item: ItemId,
        tag: FunctionTag,
        env: &ParametricEnv,
        build: impl FnOnce(&Module) -> Result<BytecodeFunction, EmitError>,
    ) -> Result<Arc<BytecodeFunction>, EmitError> {
        let key = (module.to_string(), item, tag, env.clone());
        if let Some(f) = self.functions.get(&key) {
            return Ok(f.clone());
        }
        let info = data
            .module(module)
            .ok_or_else(|| detached(format!("module '{module}' has not been typechecked"), module))?;
        let f = Arc::new(build(&info.module)?);
        trace!(%module, function = %f.name, ?tag, "cached bytecode");
        self.functions.insert(key, f.clone());
        Ok(f)
    }
}
