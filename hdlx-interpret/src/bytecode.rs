#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use hdlx_ast::{BinOp, FormatStep, SourceFile, Span, UnOp};
use hdlx_core::{Callee, ConcreteType, FunctionRef, InterpValue, ParametricEnv, TypeInfoId};

/// Stack machine opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Literal,
    Load,
    Store,
    Dup,
    Pop,
    Swap,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    Invert,
    Negate,
    Cast,
    CheckedCast,
    WideningCast,
    CreateTuple,
    CreateArray,
    /// Pops a tuple and pushes its elements so the first one ends on top.
    ExpandTuple,
    Index,
    TupleIndex,
    /// Pops `limit`, `start`, and a bits value; bounds are already clamped.
    Slice,
    WidthSlice,
    Call,
    JumpRel,
    /// Pops a bool and jumps when it is true.
    JumpRelIf,
    JumpDest,
    MatchArm,
    Fail,
    Trace,
    Range,
    Recv,
    RecvNonBlocking,
    Send,
    Join,
    Spawn,
    CreateChannel,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Literal => "literal",
            Op::Load => "load",
            Op::Store => "store",
            Op::Dup => "dup",
            Op::Pop => "pop",
            Op::Swap => "swap",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Mod => "mod",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Shl => "shl",
            Op::Shr => "shr",
            Op::Concat => "concat",
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::LogicalAnd => "logical_and",
            Op::LogicalOr => "logical_or",
            Op::Invert => "invert",
            Op::Negate => "negate",
            Op::Cast => "cast",
            Op::CheckedCast => "checked_cast",
            Op::WideningCast => "widening_cast",
            Op::CreateTuple => "create_tuple",
            Op::CreateArray => "create_array",
            Op::ExpandTuple => "expand_tuple",
            Op::Index => "index",
            Op::TupleIndex => "tuple_index",
            Op::Slice => "slice",
            Op::WidthSlice => "width_slice",
            Op::Call => "call",
            Op::JumpRel => "jump_rel",
            Op::JumpRelIf => "jump_rel_if",
            Op::JumpDest => "jump_dest",
            Op::MatchArm => "match_arm",
            Op::Fail => "fail",
            Op::Trace => "trace",
            Op::Range => "range",
            Op::Recv => "recv",
            Op::RecvNonBlocking => "recv_non_blocking",
            Op::Send => "send",
            Op::Join => "join",
            Op::Spawn => "spawn",
            Op::CreateChannel => "create_channel",
        }
    }

    pub(crate) fn from_binop(op: BinOp) -> Op {
        match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Shl => Op::Shl,
            BinOp::Shr => Op::Shr,
            BinOp::Concat => Op::Concat,
            BinOp::BitAnd => Op::And,
            BinOp::BitOr => Op::Or,
            BinOp::BitXor => Op::Xor,
            BinOp::And => Op::LogicalAnd,
            BinOp::Or => Op::LogicalOr,
            BinOp::Eq => Op::Eq,
            BinOp::Ne => Op::Ne,
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Le,
            BinOp::Gt => Op::Gt,
            BinOp::Ge => Op::Ge,
        }
    }

    /// The value operation behind a binary opcode.
    pub(crate) fn binop(self) -> Option<BinOp> {
        Some(match self {
            Op::Add => BinOp::Add,
            Op::Sub => BinOp::Sub,
            Op::Mul => BinOp::Mul,
            Op::Div => BinOp::Div,
            Op::Mod => BinOp::Mod,
            Op::Shl => BinOp::Shl,
            Op::Shr => BinOp::Shr,
            Op::Concat => BinOp::Concat,
            Op::And => BinOp::BitAnd,
            Op::Or => BinOp::BitOr,
            Op::Xor => BinOp::BitXor,
            Op::LogicalAnd => BinOp::And,
            Op::LogicalOr => BinOp::Or,
            Op::Eq => BinOp::Eq,
            Op::Ne => BinOp::Ne,
            Op::Lt => BinOp::Lt,
            Op::Le => BinOp::Le,
            Op::Gt => BinOp::Gt,
            Op::Ge => BinOp::Ge,
            _ => return None,
        })
    }

    pub(crate) fn unop(self) -> Option<UnOp> {
        match self {
            Op::Invert => Some(UnOp::Invert),
            Op::Negate => Some(UnOp::Negate),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A call target resolved when the caller was emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationDesc {
    pub callee: FunctionRef,
    /// The call site in canonical form, shown in disassembly.
    pub text: String,
    pub argc: usize,
    /// Parametric bindings of the callee instance.
    pub env: ParametricEnv,
    /// Type table of the callee body; `None` for builtins.
    pub type_info: Option<TypeInfoId>,
    /// Deduced type of the call, used by builtins that need a target type.
    pub result_type: Option<ConcreteType>,
}

impl fmt::Display for InvocationDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.text, self.env)
    }
}

/// One element of a `match` pattern, checked by `match_arm`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchArmItem {
    Value(InterpValue),
    /// Equal to the value held in a slot.
    Load(u32),
    /// Always matches; binds the value to a slot.
    Store(u32),
    Wildcard,
    Tuple(Vec<MatchArmItem>),
}

impl fmt::Display for MatchArmItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchArmItem::Value(v) => write!(f, "value:{v}"),
            MatchArmItem::Load(slot) => write!(f, "load:{slot}"),
            MatchArmItem::Store(slot) => write!(f, "store:{slot}"),
            MatchArmItem::Wildcard => write!(f, "wildcard"),
            MatchArmItem::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Formatting recipe for `trace` and `fail`; pops `argc` values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceData {
    pub steps: Vec<FormatStep>,
    pub argc: usize,
}

impl TraceData {
    pub fn render(&self, args: &[InterpValue]) -> String {
        let mut out = String::new();
        let mut values = args.iter();
        for step in &self.steps {
            match step {
                FormatStep::Text(t) => out.push_str(t),
                FormatStep::Value(pref) => {
                    if let Some(v) = values.next() {
                        out.push_str(&v.format(*pref));
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for TraceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace data: ")?;
        for step in &self.steps {
            match step {
                FormatStep::Text(t) => write!(f, "{t}")?,
                FormatStep::Value(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailData {
    pub trace: TraceData,
    pub label: String,
}

impl fmt::Display for FailData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.trace, self.label)
    }
}

/// Shape of the channels created by `create_channel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDesc {
    pub payload: ConcreteType,
    pub depth: Option<u64>,
    /// Array dimensions, outermost last.
    pub dims: Vec<u64>,
}

impl fmt::Display for ChannelDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan<{}", self.payload)?;
        if let Some(d) = self.depth {
            write!(f, ", {d}")?;
        }
        write!(f, ">")?;
        for d in &self.dims {
            write!(f, "[{d}]")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnDesc {
    pub proc_ref: Callee,
    pub name: String,
    pub env: ParametricEnv,
    pub type_info: TypeInfoId,
    pub argc: usize,
}

impl fmt::Display for SpawnDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}/{} : {}", self.proc_ref.module, self.name, self.argc, self.env)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BytecodeData {
    Value(InterpValue),
    Slot(u32),
    Count(usize),
    Offset(i64),
    Type(ConcreteType),
    Invocation(Box<InvocationDesc>),
    MatchArm(MatchArmItem),
    Trace(TraceData),
    Fail(FailData),
    /// Channel operation that takes a predicate.
    Predicated,
    Channel(ChannelDesc),
    Spawn(Box<SpawnDesc>),
}

impl fmt::Display for BytecodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeData::Value(v) => write!(f, "{v}"),
            BytecodeData::Slot(s) => write!(f, "{s}"),
            BytecodeData::Count(n) => write!(f, "{n}"),
            BytecodeData::Offset(o) => write!(f, "{o:+}"),
            BytecodeData::Type(t) => write!(f, "{t}"),
            BytecodeData::Invocation(i) => write!(f, "{i}"),
            BytecodeData::MatchArm(m) => write!(f, "{m}"),
            BytecodeData::Trace(t) => write!(f, "{t}"),
            BytecodeData::Fail(d) => write!(f, "{d}"),
            BytecodeData::Predicated => write!(f, "if"),
            BytecodeData::Channel(c) => write!(f, "{c}"),
            BytecodeData::Spawn(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bytecode {
    pub span: Span,
    pub op: Op,
    pub data: Option<BytecodeData>,
}

impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(d) => write!(f, "{} {d}", self.op),
            None => write!(f, "{}", self.op),
        }
    }
}

/// The instruction sequence of one (function, parametric env) pair.
#[derive(Clone, Debug)]
pub struct BytecodeFunction {
    pub name: String,
    pub source: Arc<SourceFile>,
    pub slot_count: u32,
    pub bytecodes: Vec<Bytecode>,
}

impl BytecodeFunction {
    /// One `opcode operand @ file:l:c-l:c` line per instruction.
    pub fn to_string_with_locations(&self) -> String {
        self.bytecodes
            .iter()
            .map(|bc| format!("{bc} @ {}", self.source.location(bc.span)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for BytecodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, bc) in self.bytecodes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{i:03} {bc}")?;
        }
        Ok(())
    }
}
