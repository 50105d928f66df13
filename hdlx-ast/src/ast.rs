#![forbid(unsafe_code)]

use crate::builtins::Builtin;
use crate::span::{Ident, Span};

/// Module-unique identity of an expression, block, or statement node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Index into `Module::name_defs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameDefId(pub u32);

/// Index into `Module::members`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameDefKind {
    Param,
    ParametricBinding,
    ProcMember,
    Let,
    Const,
    LoopBinding,
    MatchBinding,
}

/// A point where a name is introduced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameDef {
    pub name: String,
    pub span: Span,
    pub kind: NameDefKind,
    /// Statement or expression that introduced the name (weak; lookup only).
    pub definer: Option<NodeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefTarget {
    NameDef(NameDefId),
    Item(ItemId),
    Builtin(Builtin),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameRef {
    pub name: String,
    pub span: Span,
    pub target: RefTarget,
}

/// `subject::a::b`. The subject is a module import, an enum, or a type alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColonRef {
    pub subject: NameRef,
    pub path: Vec<Ident>,
}

impl ColonRef {
    pub fn last(&self) -> &Ident {
        // The parser never builds an empty path.
        &self.path[self.path.len() - 1]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberKind {
    Bool,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Number {
    /// Literal text as written (`0xdead_beef`, `-1`, `true`).
    pub text: String,
    pub kind: NumberKind,
    pub ty: Option<Box<TypeAnnotation>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Concat => "++",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinOp::Shl | BinOp::Shr)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Invert,
    Negate,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Invert => "!",
            UnOp::Negate => "-",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    /// Written with surrounding parentheses; the printer reproduces them.
    pub in_parens: bool,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprKind {
    Number(Number),
    String(String),
    NameRef(NameRef),
    ColonRef(ColonRef),
    Binop {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unop {
        op: UnOp,
        operand: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        ty: Box<TypeAnnotation>,
    },
    Tuple(Vec<Expr>),
    Array(ArrayLit),
    Index {
        lhs: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lhs: Box<Expr>,
        start: Option<Box<Expr>>,
        limit: Option<Box<Expr>>,
    },
    WidthSlice {
        lhs: Box<Expr>,
        start: Box<Expr>,
        width: Box<TypeAnnotation>,
    },
    TupleIndex {
        lhs: Box<Expr>,
        index: u64,
    },
    Attr {
        lhs: Box<Expr>,
        attr: Ident,
    },
    Invocation(Invocation),
    FormatMacro(FormatMacro),
    ZeroMacro(Box<TypeAnnotation>),
    StructInstance(StructInstance),
    Conditional(Conditional),
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    For(ForLoop),
    UnrollFor(ForLoop),
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Block(Block),
    ChannelDecl(ChannelDecl),
    Spawn(Spawn),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayLit {
    /// `u32[3]:[...]` annotation.
    pub ty: Option<Box<TypeAnnotation>>,
    pub members: Vec<Expr>,
    pub has_ellipsis: bool,
    /// Every member is a literal, constant reference, or nested constant array.
    pub is_constant: bool,
}

/// Parametric argument: either a value (`u32:2`, `N + 1`) or a type (`u8`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprOrType {
    Expr(Expr),
    Type(TypeAnnotation),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub callee: Box<Expr>,
    pub parametrics: Vec<ExprOrType>,
    pub args: Vec<Expr>,
}

impl Invocation {
    pub fn builtin(&self) -> Option<Builtin> {
        match &self.callee.kind {
            ExprKind::NameRef(NameRef {
                target: RefTarget::Builtin(b),
                ..
            }) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatPreference {
    Default,
    Hex,
    Binary,
    Decimal,
}

impl FormatPreference {
    pub fn placeholder(self) -> &'static str {
        match self {
            FormatPreference::Default => "{}",
            FormatPreference::Hex => "{:x}",
            FormatPreference::Binary => "{:b}",
            FormatPreference::Decimal => "{:d}",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FormatPreference::Default => "default",
            FormatPreference::Hex => "hex",
            FormatPreference::Binary => "binary",
            FormatPreference::Decimal => "decimal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormatStep {
    Text(String),
    Value(FormatPreference),
}

/// `trace_fmt!("x is {:x}", x)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatMacro {
    pub name: String,
    pub format: Vec<FormatStep>,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructInstance {
    pub ty: TypeRef,
    pub members: Vec<(Ident, Expr)>,
    /// `..base` trailing splat.
    pub splat: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conditional {
    pub test: Box<Expr>,
    pub consequent: Block,
    pub alternate: ElseBranch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElseBranch {
    Block(Block),
    /// `else if ...`; always an `ExprKind::Conditional`.
    If(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pattern {
    Wildcard(Span),
    /// Literal, constant, or previously bound name compared for equality.
    Value(Expr),
    Bind(NameDefId, Span),
    Tuple(Vec<Pattern>, Span),
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Wildcard(s) | Pattern::Bind(_, s) | Pattern::Tuple(_, s) => *s,
            Pattern::Value(e) => e.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchArm {
    pub patterns: Vec<Pattern>,
    pub expr: Expr,
    pub span: Span,
}

/// Destructuring target of `let` and `for`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameDefTree {
    Leaf(NameDefId, Span),
    Wildcard(Span),
    Tuple(Vec<NameDefTree>, Span),
}

impl NameDefTree {
    pub fn span(&self) -> Span {
        match self {
            NameDefTree::Leaf(_, s) | NameDefTree::Wildcard(s) | NameDefTree::Tuple(_, s) => *s,
        }
    }

    pub fn leaves(&self) -> Vec<NameDefId> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<NameDefId>) {
        match self {
            NameDefTree::Leaf(id, _) => out.push(*id),
            NameDefTree::Wildcard(_) => {}
            NameDefTree::Tuple(items, _) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForLoop {
    pub names: NameDefTree,
    pub ty: Option<Box<TypeAnnotation>>,
    pub iterable: Box<Expr>,
    pub body: Block,
    pub init: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDecl {
    pub payload: Box<TypeAnnotation>,
    pub depth: Option<Box<Expr>>,
    pub dims: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spawn {
    /// NameRef or ColonRef naming the proc.
    pub callee: Box<Expr>,
    pub parametrics: Vec<ExprOrType>,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Statement>,
    pub trailing_semi: bool,
}

impl Block {
    /// The expression producing the block's value, if any.
    pub fn trailing_expr(&self) -> Option<&Expr> {
        if self.trailing_semi {
            return None;
        }
        match self.statements.last() {
            Some(Statement {
                kind: StatementKind::Expr(e),
                ..
            }) => Some(e),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Let(Let),
    Const(ConstStmt),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Let {
    pub names: NameDefTree,
    pub ty: Option<TypeAnnotation>,
    pub rhs: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstStmt {
    pub name_def: NameDefId,
    pub name: Ident,
    pub ty: Option<TypeAnnotation>,
    pub value: Expr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelDirection {
    In,
    Out,
}

impl ChannelDirection {
    pub fn keyword(self) -> &'static str {
        match self {
            ChannelDirection::In => "in",
            ChannelDirection::Out => "out",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitsKeyword {
    UN,
    SN,
    Bits,
}

impl BitsKeyword {
    pub fn text(self) -> &'static str {
        match self {
            BitsKeyword::UN => "uN",
            BitsKeyword::SN => "sN",
            BitsKeyword::Bits => "bits",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, BitsKeyword::SN)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeAnnotation {
    pub span: Span,
    pub kind: TypeKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// `u8`, `s32`, ...
    Builtin { signed: bool, width: u32 },
    Bool,
    Token,
    /// `uN[e]`, `sN[e]`, `bits[e]`.
    Bits { keyword: BitsKeyword, dim: Box<Expr> },
    Array {
        element: Box<TypeAnnotation>,
        dim: Box<Expr>,
    },
    Tuple(Vec<TypeAnnotation>),
    Ref(TypeRef),
    Channel {
        payload: Box<TypeAnnotation>,
        direction: ChannelDirection,
        dims: Vec<Expr>,
    },
}

/// Reference to a struct, enum, or alias, possibly in another module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRef {
    pub target: TypeRefTarget,
    pub parametrics: Vec<ExprOrType>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRefTarget {
    Item { item: ItemId, name: String },
    Colon(ColonRef),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParametricBinding {
    pub name_def: NameDefId,
    pub name: Ident,
    pub ty: TypeAnnotation,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name_def: NameDefId,
    pub name: Ident,
    pub ty: TypeAnnotation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionTag {
    Normal,
    ProcConfig,
    ProcInit,
    ProcNext,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestAttribute {
    Test,
    QuickCheck { test_count: Option<u64> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: Ident,
    pub is_public: bool,
    pub tag: FunctionTag,
    pub parametrics: Vec<ParametricBinding>,
    pub params: Vec<Param>,
    pub ret: Option<TypeAnnotation>,
    pub body: Block,
    pub attribute: Option<TestAttribute>,
    /// Template from `#[extern_verilog("...")]`; the body still defines
    /// the function's behavior for interpretation.
    pub extern_verilog: Option<String>,
    pub span: Span,
}

impl Function {
    pub fn is_parametric(&self) -> bool {
        !self.parametrics.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proc {
    pub name: Ident,
    pub is_public: bool,
    pub is_test: bool,
    pub parametrics: Vec<ParametricBinding>,
    pub members: Vec<Param>,
    pub config: Function,
    pub init: Function,
    pub next: Function,
    pub span: Span,
}

impl Proc {
    pub fn is_parametric(&self) -> bool {
        !self.parametrics.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructMember {
    pub name: Ident,
    pub ty: TypeAnnotation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructDef {
    pub name: Ident,
    pub is_public: bool,
    pub parametrics: Vec<ParametricBinding>,
    pub members: Vec<StructMember>,
    pub span: Span,
}

impl StructDef {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name.node == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMember {
    pub name: Ident,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDef {
    pub name: Ident,
    pub is_public: bool,
    pub underlying: Option<TypeAnnotation>,
    pub values: Vec<EnumMember>,
    pub span: Span,
}

impl EnumDef {
    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name.node == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeAlias {
    pub name: Ident,
    pub is_public: bool,
    pub ty: TypeAnnotation,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantDef {
    pub name: Ident,
    pub is_public: bool,
    pub ty: Option<TypeAnnotation>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    pub path: Vec<Ident>,
    pub alias: Option<Ident>,
    pub span: Span,
}

impl Import {
    pub fn dotted(&self) -> String {
        self.path
            .iter()
            .map(|p| p.node.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Name the import is bound to in the importing module.
    pub fn local_name(&self) -> &str {
        match &self.alias {
            Some(a) => &a.node,
            None => self.path.last().map(|p| p.node.as_str()).unwrap_or(""),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleMember {
    Function(Function),
    Proc(Proc),
    Struct(StructDef),
    Enum(EnumDef),
    TypeAlias(TypeAlias),
    Const(ConstantDef),
    Import(Import),
}

impl ModuleMember {
    pub fn name(&self) -> &str {
        match self {
            ModuleMember::Function(f) => &f.name.node,
            ModuleMember::Proc(p) => &p.name.node,
            ModuleMember::Struct(s) => &s.name.node,
            ModuleMember::Enum(e) => &e.name.node,
            ModuleMember::TypeAlias(t) => &t.name.node,
            ModuleMember::Const(c) => &c.name.node,
            ModuleMember::Import(i) => i.local_name(),
        }
    }

    pub fn is_public(&self) -> bool {
        match self {
            ModuleMember::Function(f) => f.is_public,
            ModuleMember::Proc(p) => p.is_public,
            ModuleMember::Struct(s) => s.is_public,
            ModuleMember::Enum(e) => e.is_public,
            ModuleMember::TypeAlias(t) => t.is_public,
            ModuleMember::Const(c) => c.is_public,
            ModuleMember::Import(_) => false,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ModuleMember::Function(f) => f.span,
            ModuleMember::Proc(p) => p.span,
            ModuleMember::Struct(s) => s.span,
            ModuleMember::Enum(e) => e.span,
            ModuleMember::TypeAlias(t) => t.span,
            ModuleMember::Const(c) => c.span,
            ModuleMember::Import(i) => i.span,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ModuleMember::Function(_) => "function",
            ModuleMember::Proc(_) => "proc",
            ModuleMember::Struct(_) => "struct",
            ModuleMember::Enum(_) => "enum",
            ModuleMember::TypeAlias(_) => "type alias",
            ModuleMember::Const(_) => "constant",
            ModuleMember::Import(_) => "import",
        }
    }
}
