#![forbid(unsafe_code)]

use std::collections::HashMap;

use hdlx_ast::{ItemId, NameDefId, NodeId};

use crate::types::{ConcreteType, ParametricEnv};
use crate::value::InterpValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeInfoId(pub u32);

/// A function or proc definition in some module.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Callee {
    pub module: String,
    pub item: ItemId,
}

/// What an invocation node resolved to under one caller env.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationData {
    pub callee: Callee,
    pub callee_env: ParametricEnv,
    /// Where the callee body's types live.
    pub type_info: TypeInfoId,
}

/// A checked `spawn`: the proc instance and where its types live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnData {
    pub proc_ref: Callee,
    pub env: ParametricEnv,
    pub type_info: TypeInfoId,
}

/// Append-only side tables for one module or one parametric instantiation.
/// Lookups through [`TypeInfoArena`] fall back to the parent.
#[derive(Debug, Default)]
pub struct TypeInfo {
    pub module: String,
    pub parent: Option<TypeInfoId>,
    node_types: HashMap<NodeId, ConcreteType>,
    name_def_types: HashMap<NameDefId, ConcreteType>,
    const_values: HashMap<NodeId, Option<InterpValue>>,
    name_def_values: HashMap<NameDefId, InterpValue>,
    item_types: HashMap<ItemId, ConcreteType>,
    item_values: HashMap<ItemId, InterpValue>,
    invocations: HashMap<(NodeId, ParametricEnv), InvocationData>,
    spawns: HashMap<(NodeId, ParametricEnv), SpawnData>,
    imports: HashMap<ItemId, String>,
}

impl TypeInfo {
    pub fn set_node_type(&mut self, node: NodeId, ty: ConcreteType) {
        self.node_types.entry(node).or_insert(ty);
    }

    pub fn set_name_def_type(&mut self, id: NameDefId, ty: ConcreteType) {
        self.name_def_types.insert(id, ty);
    }

    /// Records whether `node` is constexpr; `None` means it is known not
    /// to be.
    pub fn set_const_value(&mut self, node: NodeId, value: Option<InterpValue>) {
        self.const_values.entry(node).or_insert(value);
    }

    pub fn set_name_def_value(&mut self, id: NameDefId, value: InterpValue) {
        self.name_def_values.insert(id, value);
    }

    pub fn set_item_type(&mut self, item: ItemId, ty: ConcreteType) {
        self.item_types.insert(item, ty);
    }

    pub fn set_item_value(&mut self, item: ItemId, value: InterpValue) {
        self.item_values.insert(item, value);
    }

    pub fn add_invocation(&mut self, node: NodeId, caller_env: ParametricEnv, data: InvocationData) {
        self.invocations.insert((node, caller_env), data);
    }

    pub fn add_spawn(&mut self, node: NodeId, caller_env: ParametricEnv, data: SpawnData) {
        self.spawns.insert((node, caller_env), data);
    }

    pub fn add_import(&mut self, item: ItemId, module: String) {
        self.imports.insert(item, module);
    }

    pub fn own_node_type(&self, node: NodeId) -> Option<&ConcreteType> {
        self.node_types.get(&node)
    }

    pub fn node_count(&self) -> usize {
        self.node_types.len()
    }
}

#[derive(Debug, Default)]
pub struct TypeInfoArena {
    infos: Vec<TypeInfo>,
}

impl TypeInfoArena {
    pub fn new_root(&mut self, module: &str) -> TypeInfoId {
        self.push(TypeInfo {
            module: module.to_string(),
            ..TypeInfo::default()
        })
    }

    pub fn new_child(&mut self, parent: TypeInfoId) -> TypeInfoId {
        let module = self.get(parent).module.clone();
        self.push(TypeInfo {
            module,
            parent: Some(parent),
            ..TypeInfo::default()
        })
    }

    fn push(&mut self, info: TypeInfo) -> TypeInfoId {
        let id = TypeInfoId(self.infos.len() as u32);
        self.infos.push(info);
        id
    }

    pub fn get(&self, id: TypeInfoId) -> &TypeInfo {
        &self.infos[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeInfoId) -> &mut TypeInfo {
        &mut self.infos[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// `id` followed by its ancestors.
    fn chain(&self, id: TypeInfoId) -> impl Iterator<Item = &TypeInfo> {
        std::iter::successors(Some(self.get(id)), move |info| info.parent.map(|p| self.get(p)))
    }

    pub fn root_of(&self, id: TypeInfoId) -> TypeInfoId {
        let mut cur = id;
        while let Some(p) = self.get(cur).parent {
            cur = p;
        }
        cur
    }

    pub fn node_type(&self, id: TypeInfoId, node: NodeId) -> Option<&ConcreteType> {
        self.chain(id).find_map(|t| t.node_types.get(&node))
    }

    pub fn name_def_type(&self, id: TypeInfoId, def: NameDefId) -> Option<&ConcreteType> {
        self.chain(id).find_map(|t| t.name_def_types.get(&def))
    }

    pub fn const_value(&self, id: TypeInfoId, node: NodeId) -> Option<&Option<InterpValue>> {
        self.chain(id).find_map(|t| t.const_values.get(&node))
    }

    pub fn name_def_value(&self, id: TypeInfoId, def: NameDefId) -> Option<&InterpValue> {
        self.chain(id).find_map(|t| t.name_def_values.get(&def))
    }

    pub fn item_type(&self, id: TypeInfoId, item: ItemId) -> Option<&ConcreteType> {
        self.chain(id).find_map(|t| t.item_types.get(&item))
    }

    pub fn item_value(&self, id: TypeInfoId, item: ItemId) -> Option<&InterpValue> {
        self.chain(id).find_map(|t| t.item_values.get(&item))
    }

    pub fn invocation(&self, id: TypeInfoId, node: NodeId, env: &ParametricEnv) -> Option<&InvocationData> {
        let key = (node, env.clone());
        self.chain(id).find_map(|t| t.invocations.get(&key))
    }

    pub fn spawn(&self, id: TypeInfoId, node: NodeId, env: &ParametricEnv) -> Option<&SpawnData> {
        let key = (node, env.clone());
        self.chain(id).find_map(|t| t.spawns.get(&key))
    }

    /// Module name an import item refers to.
    pub fn import(&self, id: TypeInfoId, item: ItemId) -> Option<&str> {
        self.chain(id).find_map(|t| t.imports.get(&item)).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_lookups_fall_back_to_parent() {
        let mut arena = TypeInfoArena::default();
        let root = arena.new_root("m");
        arena.get_mut(root).set_node_type(NodeId(1), ConcreteType::ubits(8));
        let child = arena.new_child(root);
        arena.get_mut(child).set_node_type(NodeId(2), ConcreteType::bool());
        assert_eq!(arena.node_type(child, NodeId(1)), Some(&ConcreteType::ubits(8)));
        assert_eq!(arena.node_type(child, NodeId(2)), Some(&ConcreteType::bool()));
        assert_eq!(arena.node_type(root, NodeId(2)), None);
        assert_eq!(arena.root_of(child), root);
        assert_eq!(arena.get(child).module, "m");
    }

    #[test]
    fn first_recorded_type_wins() {
        let mut info = TypeInfo::default();
        info.set_node_type(NodeId(0), ConcreteType::ubits(8));
        info.set_node_type(NodeId(0), ConcreteType::ubits(16));
        assert_eq!(info.own_node_type(NodeId(0)), Some(&ConcreteType::ubits(8)));
    }
}
