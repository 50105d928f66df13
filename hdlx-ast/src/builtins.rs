#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Intrinsic functions and macros known to every module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    AndReduce,
    ArraySize,
    AssertEq,
    AssertLt,
    CheckedCast,
    Clz,
    Cover,
    Ctz,
    Fail,
    Join,
    OrReduce,
    Range,
    Recv,
    RecvIf,
    RecvIfNonBlocking,
    RecvNonBlocking,
    Rev,
    Send,
    SendIf,
    Signex,
    Update,
    WideningCast,
    XorReduce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltinInfo {
    pub builtin: Builtin,
    pub name: &'static str,
    /// Expected argument count; `None` means variadic.
    pub arity: Option<usize>,
    /// Invoked as `name!(...)`.
    pub is_macro: bool,
    /// Takes a single type parametric, as in `checked_cast<u8>(x)`.
    pub takes_type: bool,
    /// Observable effect besides producing a value; never constexpr.
    pub side_effecting: bool,
    /// Only legal inside a proc.
    pub channel_op: bool,
}

impl Builtin {
    pub fn info(self) -> &'static BuiltinInfo {
        builtins().info(self)
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_side_effecting(self) -> bool {
        self.info().side_effecting
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name -> builtin metadata. Built once, read-only afterwards.
#[derive(Debug)]
pub struct BuiltinRegistry {
    table: Vec<BuiltinInfo>,
    by_name: HashMap<&'static str, usize>,
}

impl BuiltinRegistry {
    fn new() -> Self {
        use Builtin::*;
        let spec: &[(Builtin, &'static str, Option<usize>, bool, bool, bool, bool)] = &[
            // builtin, name, arity, macro, type param, side effect, channel op
            (AndReduce, "and_reduce", Some(1), false, false, false, false),
            (ArraySize, "array_size", Some(1), false, false, false, false),
            (AssertEq, "assert_eq", Some(2), false, false, true, false),
            (AssertLt, "assert_lt", Some(2), false, false, true, false),
            (CheckedCast, "checked_cast", Some(1), false, true, false, false),
            (Clz, "clz", Some(1), false, false, false, false),
            (Cover, "cover!", Some(2), true, false, true, false),
            (Ctz, "ctz", Some(1), false, false, false, false),
            (Fail, "fail!", Some(2), true, false, true, false),
            (Join, "join", None, false, false, true, true),
            (OrReduce, "or_reduce", Some(1), false, false, false, false),
            (Range, "range", Some(2), false, false, false, false),
            (Recv, "recv", Some(2), false, false, true, true),
            (RecvIf, "recv_if", Some(4), false, false, true, true),
            (RecvIfNonBlocking, "recv_if_non_blocking", Some(4), false, false, true, true),
            (RecvNonBlocking, "recv_non_blocking", Some(3), false, false, true, true),
            (Rev, "rev", Some(1), false, false, false, false),
            (Send, "send", Some(3), false, false, true, true),
            (SendIf, "send_if", Some(4), false, false, true, true),
            (Signex, "signex", Some(2), false, false, false, false),
            (Update, "update", Some(3), false, false, false, false),
            (WideningCast, "widening_cast", Some(1), false, true, false, false),
            (XorReduce, "xor_reduce", Some(1), false, false, false, false),
        ];
        let mut table = Vec::with_capacity(spec.len());
        let mut by_name = HashMap::with_capacity(spec.len());
        for &(builtin, name, arity, is_macro, takes_type, side_effecting, channel_op) in spec {
            by_name.insert(name, table.len());
            table.push(BuiltinInfo {
                builtin,
                name,
                arity,
                is_macro,
                takes_type,
                side_effecting,
                channel_op,
            });
        }
        Self { table, by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&BuiltinInfo> {
        self.by_name.get(name).map(|&i| &self.table[i])
    }

    pub fn info(&self, builtin: Builtin) -> &BuiltinInfo {
        // Registration order above matches declaration order of `Builtin`.
        &self.table[builtin as usize]
    }

    /// Names bound in every module's root scope (macros are spelled with `!`).
    pub fn iter(&self) -> impl Iterator<Item = &BuiltinInfo> {
        self.table.iter()
    }
}

static REGISTRY: LazyLock<BuiltinRegistry> = LazyLock::new(BuiltinRegistry::new);

pub fn builtins() -> &'static BuiltinRegistry {
    &REGISTRY
}
