#![forbid(unsafe_code)]

use hdlx_ast::{
    BinOp, Block, ChannelDecl, ConstantDef, ElseBranch, EnumDef, Expr, ExprKind, ExprOrType,
    ForLoop, FormatStep, Function, Import, Module, ModuleMember, NameDef, NameDefTree, Number,
    ParametricBinding, Param, Pattern, Proc, StatementKind, StructDef, TestAttribute, TypeAlias,
    TypeAnnotation, TypeKind, TypeRef, TypeRefTarget,
};

const INDENT: &str = "    ";
const MAX_INLINE_WIDTH: usize = 80;

/// Renders a whole module; members are separated by a single newline.
pub fn format_module(module: &Module) -> String {
    let mut p = Printer::new(&module.name_defs);
    for (i, member) in module.members.iter().enumerate() {
        if i > 0 {
            p.out.push('\n');
        }
        p.member(member);
    }
    p.out
}

/// Renders one expression; `name_defs` supplies the names of bindings
/// introduced inside it.
pub fn format_expr(name_defs: &[NameDef], expr: &Expr) -> String {
    let mut p = Printer::new(name_defs);
    p.expr(expr, Prec::Lowest, 0);
    p.out
}

pub fn format_function(name_defs: &[NameDef], f: &Function) -> String {
    let mut p = Printer::new(name_defs);
    p.function(f);
    p.out
}

pub fn format_type(name_defs: &[NameDef], ty: &TypeAnnotation) -> String {
    let mut p = Printer::new(name_defs);
    p.ty(ty);
    p.out
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Or,
    And,
    Cmp,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Add,
    Mul,
    Cast,
    Unary,
    Postfix,
    Primary,
}

impl Prec {
    fn tighter(self) -> Prec {
        match self {
            Prec::Lowest => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Cmp,
            Prec::Cmp => Prec::BitOr,
            Prec::BitOr => Prec::BitXor,
            Prec::BitXor => Prec::BitAnd,
            Prec::BitAnd => Prec::Shift,
            Prec::Shift => Prec::Add,
            Prec::Add => Prec::Mul,
            Prec::Mul => Prec::Cast,
            Prec::Cast => Prec::Unary,
            Prec::Unary => Prec::Postfix,
            Prec::Postfix | Prec::Primary => Prec::Primary,
        }
    }
}

fn bin_prec(op: BinOp) -> Prec {
    match op {
        BinOp::Or => Prec::Or,
        BinOp::And => Prec::And,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Prec::Cmp,
        BinOp::BitOr => Prec::BitOr,
        BinOp::BitXor => Prec::BitXor,
        BinOp::BitAnd => Prec::BitAnd,
        BinOp::Shl | BinOp::Shr => Prec::Shift,
        BinOp::Add | BinOp::Sub | BinOp::Concat => Prec::Add,
        BinOp::Mul | BinOp::Div | BinOp::Mod => Prec::Mul,
    }
}

fn expr_prec(expr: &Expr) -> Prec {
    match &expr.kind {
        ExprKind::Range { .. } => Prec::Lowest,
        ExprKind::Binop { op, .. } => bin_prec(*op),
        ExprKind::Cast { .. } => Prec::Cast,
        ExprKind::Unop { .. } => Prec::Unary,
        ExprKind::Invocation(_)
        | ExprKind::Index { .. }
        | ExprKind::Slice { .. }
        | ExprKind::WidthSlice { .. }
        | ExprKind::TupleIndex { .. }
        | ExprKind::Attr { .. } => Prec::Postfix,
        _ => Prec::Primary,
    }
}

/// Dimensions and parametric values print bare only when they are a single
/// token-ish term.
fn is_simple(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Number(_) | ExprKind::NameRef(_) | ExprKind::ColonRef(_)
    ) && !expr.in_parens
}

fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other if other.is_control() => {
                out.push_str(&format!("\\x{:02x}", other as u32));
            }
            other => out.push(other),
        }
    }
}

struct Printer<'a> {
    defs: &'a [NameDef],
    out: String,
}

impl<'a> Printer<'a> {
    fn new(defs: &'a [NameDef]) -> Self {
        Self {
            defs,
            out: String::new(),
        }
    }

    fn indent(&mut self, level: usize) {
        for _ in 0..level {
            self.out.push_str(INDENT);
        }
    }

    fn name(&self, id: hdlx_ast::NameDefId) -> &'a str {
        self.defs
            .get(id.0 as usize)
            .map(|d| d.name.as_str())
            .unwrap_or("_")
    }

    fn member(&mut self, member: &ModuleMember) {
        match member {
            ModuleMember::Function(f) => self.function(f),
            ModuleMember::Proc(p) => self.proc(p),
            ModuleMember::Struct(s) => self.struct_def(s),
            ModuleMember::Enum(e) => self.enum_def(e),
            ModuleMember::TypeAlias(t) => self.type_alias(t),
            ModuleMember::Const(c) => self.constant(c),
            ModuleMember::Import(i) => self.import(i),
        }
    }

    fn function(&mut self, f: &Function) {
        if let Some(template) = &f.extern_verilog {
            self.out.push_str("#[extern_verilog(\"");
            escape_into(&mut self.out, template);
            self.out.push_str("\")]\n");
        }
        match &f.attribute {
            Some(TestAttribute::Test) => self.out.push_str("#[test]\n"),
            Some(TestAttribute::QuickCheck { test_count: None }) => {
                self.out.push_str("#[quickcheck]\n")
            }
            Some(TestAttribute::QuickCheck {
                test_count: Some(n),
            }) => self.out.push_str(&format!("#[quickcheck(test_count={n})]\n")),
            None => {}
        }
        if f.is_public {
            self.out.push_str("pub ");
        }
        self.out.push_str("fn ");
        self.out.push_str(&f.name.node);
        self.parametric_bindings(&f.parametrics);
        self.params(&f.params);
        if let Some(ret) = &f.ret {
            self.out.push_str(" -> ");
            self.ty(ret);
        }
        self.out.push(' ');
        self.block(&f.body, 0);
    }

    fn proc(&mut self, p: &Proc) {
        if p.is_test {
            self.out.push_str("#[test_proc]\n");
        }
        if p.is_public {
            self.out.push_str("pub ");
        }
        self.out.push_str("proc ");
        self.out.push_str(&p.name.node);
        self.parametric_bindings(&p.parametrics);
        self.out.push_str(" {\n");
        for m in &p.members {
            self.indent(1);
            self.param(m);
            self.out.push_str(";\n");
        }
        for (keyword, f) in [("config", &p.config), ("init", &p.init), ("next", &p.next)] {
            self.indent(1);
            self.out.push_str(keyword);
            if keyword != "init" {
                self.params(&f.params);
            }
            if let Some(ret) = &f.ret {
                self.out.push_str(" -> ");
                self.ty(ret);
            }
            self.out.push(' ');
            self.block(&f.body, 1);
            self.out.push('\n');
        }
        self.out.push('}');
    }

    fn struct_def(&mut self, s: &StructDef) {
        if s.is_public {
            self.out.push_str("pub ");
        }
        self.out.push_str("struct ");
        self.out.push_str(&s.name.node);
        self.parametric_bindings(&s.parametrics);
        if s.members.is_empty() {
            self.out.push_str(" {}");
            return;
        }
        self.out.push_str(" {\n");
        for m in &s.members {
            self.indent(1);
            self.out.push_str(&m.name.node);
            self.out.push_str(": ");
            self.ty(&m.ty);
            self.out.push_str(",\n");
        }
        self.out.push('}');
    }

    fn enum_def(&mut self, e: &EnumDef) {
        if e.is_public {
            self.out.push_str("pub ");
        }
        self.out.push_str("enum ");
        self.out.push_str(&e.name.node);
        if let Some(ty) = &e.underlying {
            self.out.push_str(" : ");
            self.ty(ty);
        }
        self.out.push_str(" {\n");
        for v in &e.values {
            self.indent(1);
            self.out.push_str(&v.name.node);
            self.out.push_str(" = ");
            self.expr(&v.value, Prec::Lowest, 1);
            self.out.push_str(",\n");
        }
        self.out.push('}');
    }

    fn type_alias(&mut self, t: &TypeAlias) {
        if t.is_public {
            self.out.push_str("pub ");
        }
        self.out.push_str("type ");
        self.out.push_str(&t.name.node);
        self.out.push_str(" = ");
        self.ty(&t.ty);
        self.out.push(';');
    }

    fn constant(&mut self, c: &ConstantDef) {
        if c.is_public {
            self.out.push_str("pub ");
        }
        self.out.push_str("const ");
        self.out.push_str(&c.name.node);
        if let Some(ty) = &c.ty {
            self.out.push_str(": ");
            self.ty(ty);
        }
        self.out.push_str(" = ");
        self.expr(&c.value, Prec::Lowest, 0);
        self.out.push(';');
    }

    fn import(&mut self, i: &Import) {
        self.out.push_str("import ");
        self.out.push_str(&i.dotted());
        if let Some(alias) = &i.alias {
            self.out.push_str(" as ");
            self.out.push_str(&alias.node);
        }
        self.out.push(';');
    }

    fn parametric_bindings(&mut self, bindings: &[ParametricBinding]) {
        if bindings.is_empty() {
            return;
        }
        self.out.push('<');
        for (i, b) in bindings.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(&b.name.node);
            self.out.push_str(": ");
            self.ty(&b.ty);
            if let Some(default) = &b.default {
                self.out.push_str(" = {");
                self.expr(default, Prec::Lowest, 0);
                self.out.push('}');
            }
        }
        self.out.push('>');
    }

    fn params(&mut self, params: &[Param]) {
        self.out.push('(');
        for (i, p) in params.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.param(p);
        }
        self.out.push(')');
    }

    fn param(&mut self, p: &Param) {
        self.out.push_str(&p.name.node);
        self.out.push_str(": ");
        self.ty(&p.ty);
    }

    fn ty(&mut self, ty: &TypeAnnotation) {
        match &ty.kind {
            TypeKind::Builtin { signed, width } => {
                self.out.push(if *signed { 's' } else { 'u' });
                self.out.push_str(&width.to_string());
            }
            TypeKind::Bool => self.out.push_str("bool"),
            TypeKind::Token => self.out.push_str("token"),
            TypeKind::Bits { keyword, dim } => {
                self.out.push_str(keyword.text());
                self.dim(dim);
            }
            TypeKind::Array { element, dim } => {
                self.ty(element);
                self.dim(dim);
            }
            TypeKind::Tuple(members) => {
                self.out.push('(');
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.ty(m);
                }
                if members.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            TypeKind::Ref(r) => self.type_ref(r),
            TypeKind::Channel {
                payload,
                direction,
                dims,
            } => {
                self.out.push_str("chan<");
                self.ty(payload);
                self.out.push('>');
                for d in dims {
                    self.dim(d);
                }
                self.out.push(' ');
                self.out.push_str(direction.keyword());
            }
        }
    }

    fn type_ref(&mut self, r: &TypeRef) {
        match &r.target {
            TypeRefTarget::Item { name, .. } => self.out.push_str(name),
            TypeRefTarget::Colon(c) => self.colon_ref(c),
        }
        self.parametric_args(&r.parametrics);
    }

    fn colon_ref(&mut self, c: &hdlx_ast::ColonRef) {
        self.out.push_str(&c.subject.name);
        for seg in &c.path {
            self.out.push_str("::");
            self.out.push_str(&seg.node);
        }
    }

    fn dim(&mut self, e: &Expr) {
        self.out.push('[');
        self.braced_unless_simple(e);
        self.out.push(']');
    }

    fn braced_unless_simple(&mut self, e: &Expr) {
        if is_simple(e) {
            self.expr(e, Prec::Lowest, 0);
        } else {
            self.out.push('{');
            self.expr(e, Prec::Lowest, 0);
            self.out.push('}');
        }
    }

    fn parametric_args(&mut self, args: &[ExprOrType]) {
        if args.is_empty() {
            return;
        }
        self.out.push('<');
        for (i, a) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            match a {
                ExprOrType::Type(t) => self.ty(t),
                ExprOrType::Expr(e) => self.braced_unless_simple(e),
            }
        }
        self.out.push('>');
    }

    /// `{}` when empty, otherwise one statement per line at `level + 1`.
    fn block(&mut self, block: &Block, level: usize) {
        if block.statements.is_empty() {
            self.out.push_str("{}");
            return;
        }
        self.out.push_str("{\n");
        let last = block.statements.len() - 1;
        for (i, stmt) in block.statements.iter().enumerate() {
            self.indent(level + 1);
            self.statement(&stmt.kind, level + 1);
            if i != last || block.trailing_semi || !matches!(stmt.kind, StatementKind::Expr(_)) {
                self.out.push(';');
            }
            self.out.push('\n');
        }
        self.indent(level);
        self.out.push('}');
    }

    /// One-line rendering used to decide whether an `if` fits on a line.
    fn inline_block(&mut self, block: &Block) {
        if block.statements.is_empty() {
            self.out.push_str("{}");
            return;
        }
        self.out.push_str("{ ");
        let last = block.statements.len() - 1;
        for (i, stmt) in block.statements.iter().enumerate() {
            self.statement(&stmt.kind, 0);
            if i != last || block.trailing_semi || !matches!(stmt.kind, StatementKind::Expr(_)) {
                self.out.push(';');
            }
            if i != last {
                self.out.push(' ');
            }
        }
        self.out.push_str(" }");
    }

    fn statement(&mut self, kind: &StatementKind, level: usize) {
        match kind {
            StatementKind::Let(l) => {
                self.out.push_str("let ");
                self.name_def_tree(&l.names);
                if let Some(ty) = &l.ty {
                    self.out.push_str(": ");
                    self.ty(ty);
                }
                self.out.push_str(" = ");
                self.expr(&l.rhs, Prec::Lowest, level);
            }
            StatementKind::Const(c) => {
                self.out.push_str("const ");
                self.out.push_str(&c.name.node);
                if let Some(ty) = &c.ty {
                    self.out.push_str(": ");
                    self.ty(ty);
                }
                self.out.push_str(" = ");
                self.expr(&c.value, Prec::Lowest, level);
            }
            StatementKind::Expr(e) => self.expr(e, Prec::Lowest, level),
        }
    }

    fn name_def_tree(&mut self, tree: &NameDefTree) {
        match tree {
            NameDefTree::Leaf(id, _) => {
                let name = self.name(*id);
                self.out.push_str(name);
            }
            NameDefTree::Wildcard(_) => self.out.push('_'),
            NameDefTree::Tuple(items, _) => {
                self.out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.name_def_tree(item);
                }
                self.out.push(')');
            }
        }
    }

    fn pattern(&mut self, pattern: &Pattern, level: usize) {
        match pattern {
            Pattern::Wildcard(_) => self.out.push('_'),
            Pattern::Value(e) => self.expr(e, Prec::Lowest, level),
            Pattern::Bind(id, _) => {
                let name = self.name(*id);
                self.out.push_str(name);
            }
            Pattern::Tuple(items, _) => {
                self.out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.pattern(item, level);
                }
                self.out.push(')');
            }
        }
    }

    fn exprs(&mut self, items: &[Expr], level: usize) {
        for (i, e) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(e, Prec::Lowest, level);
        }
    }

    fn expr(&mut self, expr: &Expr, parent: Prec, level: usize) {
        let parens = expr.in_parens || expr_prec(expr) < parent;
        if parens {
            self.out.push('(');
        }
        self.expr_inner(expr, level);
        if parens {
            self.out.push(')');
        }
    }

    fn expr_inner(&mut self, expr: &Expr, level: usize) {
        match &expr.kind {
            ExprKind::Number(n) => self.number(n),
            ExprKind::String(s) => {
                self.out.push('"');
                escape_into(&mut self.out, s);
                self.out.push('"');
            }
            ExprKind::NameRef(r) => self.out.push_str(&r.name),
            ExprKind::ColonRef(c) => self.colon_ref(c),
            ExprKind::Binop { op, lhs, rhs } => {
                let my = bin_prec(*op);
                let lhs_prec = if op.is_comparison() { my.tighter() } else { my };
                self.expr(lhs, lhs_prec, level);
                self.out.push(' ');
                self.out.push_str(op.symbol());
                self.out.push(' ');
                self.expr(rhs, my.tighter(), level);
            }
            ExprKind::Unop { op, operand } => {
                self.out.push_str(op.symbol());
                self.expr(operand, Prec::Unary, level);
            }
            ExprKind::Cast { expr: inner, ty } => {
                self.expr(inner, Prec::Cast, level);
                self.out.push_str(" as ");
                self.ty(ty);
            }
            ExprKind::Tuple(items) => {
                self.out.push('(');
                self.exprs(items, level);
                if items.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            ExprKind::Array(a) => {
                if let Some(ty) = &a.ty {
                    self.ty(ty);
                    self.out.push(':');
                }
                self.out.push('[');
                self.exprs(&a.members, level);
                if a.has_ellipsis {
                    self.out.push_str(", ...");
                }
                self.out.push(']');
            }
            ExprKind::Index { lhs, index } => {
                self.expr(lhs, Prec::Postfix, level);
                self.out.push('[');
                self.expr(index, Prec::Lowest, level);
                self.out.push(']');
            }
            ExprKind::Slice { lhs, start, limit } => {
                self.expr(lhs, Prec::Postfix, level);
                self.out.push('[');
                if let Some(s) = start {
                    self.expr(s, Prec::Lowest, level);
                }
                self.out.push(':');
                if let Some(l) = limit {
                    self.expr(l, Prec::Lowest, level);
                }
                self.out.push(']');
            }
            ExprKind::WidthSlice { lhs, start, width } => {
                self.expr(lhs, Prec::Postfix, level);
                self.out.push('[');
                self.expr(start, Prec::Lowest, level);
                self.out.push_str("+:");
                self.ty(width);
                self.out.push(']');
            }
            ExprKind::TupleIndex { lhs, index } => {
                self.expr(lhs, Prec::Postfix, level);
                self.out.push('.');
                self.out.push_str(&index.to_string());
            }
            ExprKind::Attr { lhs, attr } => {
                self.expr(lhs, Prec::Postfix, level);
                self.out.push('.');
                self.out.push_str(&attr.node);
            }
            ExprKind::Invocation(inv) => {
                self.expr(&inv.callee, Prec::Postfix, level);
                self.parametric_args(&inv.parametrics);
                self.out.push('(');
                self.exprs(&inv.args, level);
                self.out.push(')');
            }
            ExprKind::FormatMacro(m) => {
                self.out.push_str(&m.name);
                self.out.push_str("(\"");
                for step in &m.format {
                    match step {
                        FormatStep::Text(t) => {
                            let mut escaped = String::new();
                            escape_into(&mut escaped, t);
                            self.out
                                .push_str(&escaped.replace('{', "{{").replace('}', "}}"));
                        }
                        FormatStep::Value(pref) => self.out.push_str(pref.placeholder()),
                    }
                }
                self.out.push('"');
                for a in &m.args {
                    self.out.push_str(", ");
                    self.expr(a, Prec::Lowest, level);
                }
                self.out.push(')');
            }
            ExprKind::ZeroMacro(ty) => {
                self.out.push_str("zero!<");
                self.ty(ty);
                self.out.push_str(">()");
            }
            ExprKind::StructInstance(s) => {
                self.type_ref(&s.ty);
                if s.members.is_empty() && s.splat.is_none() {
                    self.out.push_str(" {}");
                    return;
                }
                self.out.push_str(" { ");
                for (i, (name, value)) in s.members.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push_str(&name.node);
                    self.out.push_str(": ");
                    self.expr(value, Prec::Lowest, level);
                }
                if let Some(base) = &s.splat {
                    if !s.members.is_empty() {
                        self.out.push_str(", ");
                    }
                    self.out.push_str("..");
                    self.expr(base, Prec::Lowest, level);
                }
                self.out.push_str(" }");
            }
            ExprKind::Conditional(_) => self.conditional(expr, level),
            ExprKind::Match { subject, arms } => {
                self.out.push_str("match ");
                self.expr(subject, Prec::Lowest, level);
                self.out.push_str(" {\n");
                for arm in arms {
                    self.indent(level + 1);
                    for (i, p) in arm.patterns.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(" | ");
                        }
                        self.pattern(p, level + 1);
                    }
                    self.out.push_str(" => ");
                    self.expr(&arm.expr, Prec::Lowest, level + 1);
                    self.out.push_str(",\n");
                }
                self.indent(level);
                self.out.push('}');
            }
            ExprKind::For(l) => {
                self.out.push_str("for ");
                self.for_loop(l, level);
            }
            ExprKind::UnrollFor(l) => {
                self.out.push_str("unroll_for! ");
                self.for_loop(l, level);
            }
            ExprKind::Range { start, end } => {
                self.expr(start, Prec::Or, level);
                self.out.push_str("..");
                self.expr(end, Prec::Or, level);
            }
            ExprKind::Block(b) => self.block(b, level),
            ExprKind::ChannelDecl(c) => self.channel_decl(c),
            ExprKind::Spawn(s) => {
                self.out.push_str("spawn ");
                self.expr(&s.callee, Prec::Postfix, level);
                self.parametric_args(&s.parametrics);
                self.out.push('(');
                self.exprs(&s.args, level);
                self.out.push(')');
            }
        }
    }

    fn number(&mut self, n: &Number) {
        if let Some(ty) = &n.ty {
            self.ty(ty);
            self.out.push(':');
        }
        self.out.push_str(&n.text);
    }

    fn conditional(&mut self, expr: &Expr, level: usize) {
        let mut one_line = Printer::new(self.defs);
        one_line.conditional_inline(expr);
        if one_line.out.len() <= MAX_INLINE_WIDTH && !one_line.out.contains('\n') {
            self.out.push_str(&one_line.out);
            return;
        }
        self.conditional_multiline(expr, level);
    }

    fn conditional_inline(&mut self, expr: &Expr) {
        let ExprKind::Conditional(c) = &expr.kind else {
            self.expr(expr, Prec::Lowest, 0);
            return;
        };
        self.out.push_str("if ");
        self.expr(&c.test, Prec::Lowest, 0);
        self.out.push(' ');
        self.inline_block(&c.consequent);
        self.out.push_str(" else ");
        match &c.alternate {
            ElseBranch::Block(b) => self.inline_block(b),
            ElseBranch::If(e) => self.conditional_inline(e),
        }
    }

    fn conditional_multiline(&mut self, expr: &Expr, level: usize) {
        let ExprKind::Conditional(c) = &expr.kind else {
            self.expr(expr, Prec::Lowest, level);
            return;
        };
        self.out.push_str("if ");
        self.expr(&c.test, Prec::Lowest, level);
        self.out.push(' ');
        self.block(&c.consequent, level);
        self.out.push_str(" else ");
        match &c.alternate {
            ElseBranch::Block(b) => self.block(b, level),
            ElseBranch::If(e) => self.conditional_multiline(e, level),
        }
    }

    fn for_loop(&mut self, l: &ForLoop, level: usize) {
        self.name_def_tree(&l.names);
        if let Some(ty) = &l.ty {
            self.out.push_str(": ");
            self.ty(ty);
        }
        self.out.push_str(" in ");
        self.expr(&l.iterable, Prec::Lowest, level);
        self.out.push(' ');
        self.block(&l.body, level);
        self.out.push('(');
        self.expr(&l.init, Prec::Lowest, level);
        self.out.push(')');
    }

    fn channel_decl(&mut self, c: &ChannelDecl) {
        self.out.push_str("chan<");
        self.ty(&c.payload);
        if let Some(depth) = &c.depth {
            self.out.push_str(", ");
            self.braced_unless_simple(depth);
        }
        self.out.push('>');
        for d in &c.dims {
            self.dim(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(src: &str) {
        let module = crate::parse_module(src, "test.x", "test").unwrap();
        assert_eq!(format_module(&module), src);
    }

    fn is_idempotent(src: &str) {
        let module = crate::parse_module(src, "test.x", "test").unwrap();
        let formatted1 = format_module(&module);
        let module2 = crate::parse_module(&formatted1, "test.x", "test").unwrap();
        assert_eq!(formatted1, format_module(&module2));
    }

    #[test]
    fn simple_function_round_trips() {
        round_trip("fn f(x: u32) -> u32 {\n    x + u32:1\n}");
    }

    #[test]
    fn short_if_stays_on_one_line() {
        round_trip("fn f(x: u32) -> u32 {\n    if x == u32:0 { u32:1 } else { x }\n}");
    }

    #[test]
    fn long_if_is_split_across_lines() {
        round_trip(
            "fn f(some_long_value: u32) -> u32 {\n    if some_long_value == u32:0 {\n        some_long_value + u32:1111111111\n    } else if some_long_value == u32:1 {\n        u32:2\n    } else {\n        some_long_value\n    }\n}",
        );
    }

    #[test]
    fn recorded_parens_are_kept() {
        round_trip("fn f(a: u32, b: u32) -> u32 {\n    (a + b) * b\n}");
        round_trip("fn f(a: u32, b: u32) -> u32 {\n    a + (b * b)\n}");
    }

    #[test]
    fn strings_are_escaped() {
        let module = crate::parse_module(
            "fn f() -> u8[3] {\n    \"a\\n\\\"\"\n}",
            "test.x",
            "test",
        )
        .unwrap();
        assert!(format_module(&module).contains("\"a\\n\\\"\""));
    }

    #[test]
    fn proc_layout_is_stable() {
        is_idempotent(
            "proc P {\n    c: chan<u32> out;\n    config(c: chan<u32> out) {\n        (c,)\n    }\n    init {\n        u32:0\n    }\n    next(st: u32) {\n        let tok = send(join(), c, st);\n        st + u32:1\n    }\n}",
        );
    }
}
