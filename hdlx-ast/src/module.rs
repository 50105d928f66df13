#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::ast::{
    EnumDef, Function, ItemId, ModuleMember, NameDef, NameDefId, Proc, StructDef,
};
use crate::span::SourceFile;

/// A parsed compilation unit. Owns every declaration and name definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub source: Arc<SourceFile>,
    pub members: Vec<ModuleMember>,
    pub name_defs: Vec<NameDef>,
    /// Number of `NodeId`s handed out while parsing.
    pub node_count: u32,
}

impl Module {
    pub fn member(&self, id: ItemId) -> &ModuleMember {
        &self.members[id.0 as usize]
    }

    pub fn name_def(&self, id: NameDefId) -> &NameDef {
        &self.name_defs[id.0 as usize]
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &ModuleMember)> {
        self.members
            .iter()
            .enumerate()
            .map(|(i, m)| (ItemId(i as u32), m))
    }

    /// Finds a non-import member by name.
    pub fn find_member(&self, name: &str) -> Option<(ItemId, &ModuleMember)> {
        self.items()
            .find(|(_, m)| !matches!(m, ModuleMember::Import(_)) && m.name() == name)
    }

    pub fn function(&self, id: ItemId) -> Option<&Function> {
        match self.member(id) {
            ModuleMember::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn proc(&self, id: ItemId) -> Option<&Proc> {
        match self.member(id) {
            ModuleMember::Proc(p) => Some(p),
            _ => None,
        }
    }

    pub fn struct_def(&self, id: ItemId) -> Option<&StructDef> {
        match self.member(id) {
            ModuleMember::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn enum_def(&self, id: ItemId) -> Option<&EnumDef> {
        match self.member(id) {
            ModuleMember::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn find_function(&self, name: &str) -> Option<(ItemId, &Function)> {
        self.items().find_map(|(id, m)| match m {
            ModuleMember::Function(f) if f.name.node == name => Some((id, f)),
            _ => None,
        })
    }

    pub fn find_proc(&self, name: &str) -> Option<(ItemId, &Proc)> {
        self.items().find_map(|(id, m)| match m {
            ModuleMember::Proc(p) if p.name.node == name => Some((id, p)),
            _ => None,
        })
    }

    /// `#[test]` functions in declaration order.
    pub fn test_functions(&self) -> impl Iterator<Item = (ItemId, &Function)> {
        self.items().filter_map(|(id, m)| match m {
            ModuleMember::Function(f)
                if matches!(f.attribute, Some(crate::ast::TestAttribute::Test)) =>
            {
                Some((id, f))
            }
            _ => None,
        })
    }

    pub fn quickcheck_functions(&self) -> impl Iterator<Item = (ItemId, &Function)> {
        self.items().filter_map(|(id, m)| match m {
            ModuleMember::Function(f)
                if matches!(
                    f.attribute,
                    Some(crate::ast::TestAttribute::QuickCheck { .. })
                ) =>
            {
                Some((id, f))
            }
            _ => None,
        })
    }

    pub fn test_procs(&self) -> impl Iterator<Item = (ItemId, &Proc)> {
        self.items().filter_map(|(id, m)| match m {
            ModuleMember::Proc(p) if p.is_test => Some((id, p)),
            _ => None,
        })
    }
}
