#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use hdlx_ast::{ItemId, Module};

use crate::type_info::{Callee, TypeInfoArena, TypeInfoId};
use crate::types::{ConcreteType, ParametricEnv, StructType};

/// Maps a dotted import path to `(filename, text)`.
pub trait ImportResolver {
    fn resolve(&self, path: &str) -> Result<(String, String), String>;
}

fn relative_path(dotted: &str) -> String {
    format!("{}.x", dotted.replace('.', "/"))
}

/// Serves modules from memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    files: HashMap<String, String>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(path, text);
        self
    }

    pub fn add(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }
}

impl ImportResolver for InMemoryResolver {
    fn resolve(&self, path: &str) -> Result<(String, String), String> {
        self.files
            .get(path)
            .map(|text| (relative_path(path), text.clone()))
            .ok_or_else(|| format!("Could not find module '{path}'"))
    }
}

/// Looks for `a/b/c.x` under each search path in order.
#[derive(Debug, Default)]
pub struct FileResolver {
    search_paths: Vec<PathBuf>,
}

impl FileResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }
}

impl ImportResolver for FileResolver {
    fn resolve(&self, path: &str) -> Result<(String, String), String> {
        let rel = relative_path(path);
        for dir in &self.search_paths {
            let candidate = dir.join(&rel);
            if candidate.is_file() {
                let text = std::fs::read_to_string(&candidate)
                    .map_err(|e| format!("Could not read {}: {e}", candidate.display()))?;
                return Ok((candidate.display().to_string(), text));
            }
        }
        let dirs: Vec<String> = self.search_paths.iter().map(|p| p.display().to_string()).collect();
        Err(format!(
            "Could not find module '{path}' ({rel}) in search path(s): [{}]",
            dirs.join(", ")
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypecheckOptions {
    /// Bound on rounds of parametric default evaluation.
    pub max_parametric_rounds: usize,
}

impl Default for TypecheckOptions {
    fn default() -> Self {
        Self {
            max_parametric_rounds: 64,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModuleInfo {
    pub module: Arc<Module>,
    pub type_info: TypeInfoId,
}

/// A checked parametric function body.
#[derive(Clone, Debug)]
pub struct FunctionInstance {
    pub type_info: TypeInfoId,
    pub params: Vec<ConcreteType>,
    pub ret: ConcreteType,
}

/// A checked proc, parametric or not.
#[derive(Clone, Debug)]
pub struct ProcInstance {
    pub type_info: TypeInfoId,
    pub config_params: Vec<ConcreteType>,
    pub members: Vec<ConcreteType>,
    pub state: ConcreteType,
}

pub(crate) type InstanceKey = (String, ItemId, ParametricEnv);

/// Owns every typechecked module of one compilation and their type tables.
pub struct ImportData {
    resolver: Box<dyn ImportResolver>,
    pub options: TypecheckOptions,
    pub(crate) arena: TypeInfoArena,
    modules: HashMap<String, ModuleInfo>,
    pub(crate) import_stack: Vec<String>,
    pub(crate) functions: HashMap<InstanceKey, FunctionInstance>,
    pub(crate) procs: HashMap<InstanceKey, ProcInstance>,
    pub(crate) structs: HashMap<InstanceKey, StructType>,
    /// Functions whose bodies are being checked, innermost last.
    pub(crate) active: Vec<Callee>,
}

impl ImportData {
    pub fn new(resolver: impl ImportResolver + 'static) -> Self {
        Self::with_options(resolver, TypecheckOptions::default())
    }

    pub fn with_options(resolver: impl ImportResolver + 'static, options: TypecheckOptions) -> Self {
        Self {
            resolver: Box::new(resolver),
            options,
            arena: TypeInfoArena::default(),
            modules: HashMap::new(),
            import_stack: Vec::new(),
            functions: HashMap::new(),
            procs: HashMap::new(),
            structs: HashMap::new(),
            active: Vec::new(),
        }
    }

    pub fn arena(&self) -> &TypeInfoArena {
        &self.arena
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(|k| k.as_str())
    }

    pub(crate) fn register(&mut self, info: ModuleInfo) {
        self.modules.insert(info.module.name.clone(), info);
    }

    pub(crate) fn resolve_import(&self, path: &str) -> Result<(String, String), String> {
        self.resolver.resolve(path)
    }

    /// Checked instance of function `item` under `env`; non-parametric
    /// functions live in their module's root table.
    pub fn function_instance(&self, module: &str, item: ItemId, env: &ParametricEnv) -> Option<&FunctionInstance> {
        self.functions.get(&(module.to_string(), item, env.clone()))
    }

    pub fn proc_instance(&self, module: &str, item: ItemId, env: &ParametricEnv) -> Option<&ProcInstance> {
        self.procs.get(&(module.to_string(), item, env.clone()))
    }
}

impl std::fmt::Debug for ImportData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportData")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("type_infos", &self.arena.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_resolver_maps_dots_to_paths() {
        let r = InMemoryResolver::new().with("a.b", "fn f() {}");
        assert_eq!(r.resolve("a.b"), Ok(("a/b.x".to_string(), "fn f() {}".to_string())));
        assert!(r.resolve("c").unwrap_err().contains("Could not find module 'c'"));
    }

    #[test]
    fn file_resolver_reports_search_paths() {
        let r = FileResolver::new(vec![PathBuf::from("/nonexistent")]);
        let err = r.resolve("m").unwrap_err();
        assert!(err.contains("m.x"), "{err}");
        assert!(err.contains("/nonexistent"), "{err}");
    }
}
