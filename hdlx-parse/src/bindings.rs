#![forbid(unsafe_code)]

use std::collections::HashMap;

use hdlx_ast::{Builtin, BuiltinRegistry, ItemId, NameDefId};
use thiserror::Error;

/// What a name resolves to at its point of use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundNode {
    /// Parameter, parametric binding, `let`, loop, or match binding.
    Local(NameDefId),
    /// Block-level `const`.
    Const(NameDefId),
    /// Module member: function, proc, type, constant, or import.
    Item(ItemId),
    Builtin(Builtin),
    ProcMember(NameDefId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Builtins,
    Module,
    Function,
    Block,
    ProcMembers,
    /// Proc `config`: the member scope above it is invisible.
    Config,
    /// Proc `init`: the member scope above it is invisible.
    Init,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NameResolutionError {
    #[error("Cannot find a definition for name: \"{0}\"")]
    NotFound(String),
    #[error(
        "Cannot find a definition for name: \"{0}\"; \"{0}\" is a proc member, but those cannot be referenced from within a proc {1} function."
    )]
    HiddenProcMember(String, &'static str),
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    names: HashMap<String, BoundNode>,
}

/// Scope chain used while parsing; innermost scope last.
#[derive(Debug)]
pub struct Bindings {
    scopes: Vec<Scope>,
}

impl Bindings {
    /// A chain holding only the non-macro builtins and an empty module scope.
    pub fn new(registry: &BuiltinRegistry) -> Self {
        let mut root = Scope {
            kind: ScopeKind::Builtins,
            names: HashMap::new(),
        };
        for info in registry.iter().filter(|i| !i.is_macro) {
            root.names
                .insert(info.name.to_string(), BoundNode::Builtin(info.builtin));
        }
        Self {
            scopes: vec![
                root,
                Scope {
                    kind: ScopeKind::Module,
                    names: HashMap::new(),
                },
            ],
        }
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            names: HashMap::new(),
        });
    }

    pub fn pop(&mut self) {
        // The builtin and module scopes are permanent.
        if self.scopes.len() > 2 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Drops every scope above `depth`.
    pub fn truncate(&mut self, depth: usize) {
        self.scopes.truncate(depth.max(2));
    }

    /// Binds `name` in the innermost scope; a later binding shadows.
    pub fn add(&mut self, name: impl Into<String>, node: BoundNode) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.into(), node);
        }
    }

    /// Binds `name` in the module scope regardless of the current depth.
    pub fn add_module_level(&mut self, name: impl Into<String>, node: BoundNode) {
        if let Some(scope) = self.scopes.get_mut(1) {
            scope.names.insert(name.into(), node);
        }
    }

    pub fn module_level(&self, name: &str) -> Option<BoundNode> {
        self.scopes.get(1).and_then(|s| s.names.get(name).copied())
    }

    /// Innermost binding of `name`. Proc members are skipped from inside
    /// `config` and `init`; the hidden member is reported only when nothing
    /// further out matches.
    pub fn resolve(&self, name: &str) -> Result<BoundNode, NameResolutionError> {
        let mut hidden_by: Option<&'static str> = None;
        let mut hidden_member: Option<&'static str> = None;
        for scope in self.scopes.iter().rev() {
            if let Some(node) = scope.names.get(name) {
                match (node, hidden_by) {
                    (BoundNode::ProcMember(_), Some(phase)) => {
                        hidden_member.get_or_insert(phase);
                    }
                    _ => return Ok(*node),
                }
            }
            match scope.kind {
                ScopeKind::Config => hidden_by = Some("config"),
                ScopeKind::Init => hidden_by = Some("init"),
                _ => {}
            }
        }
        Err(match hidden_member {
            Some(phase) => NameResolutionError::HiddenProcMember(name.to_string(), phase),
            None => NameResolutionError::NotFound(name.to_string()),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }
}
