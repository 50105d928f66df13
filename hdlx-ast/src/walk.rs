#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use crate::ast::{
    Block, ElseBranch, Expr, ExprKind, ExprOrType, NameDefId, Pattern, RefTarget, StatementKind,
};

/// Calls `f` on each direct sub-expression of `expr`, descending into the
/// statements of nested blocks and match patterns.
pub fn for_each_child<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    match &expr.kind {
        ExprKind::Number(_)
        | ExprKind::String(_)
        | ExprKind::NameRef(_)
        | ExprKind::ColonRef(_)
        | ExprKind::ZeroMacro(_) => {}
        ExprKind::Binop { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        ExprKind::Unop { operand, .. } => f(operand),
        ExprKind::Cast { expr, .. } => f(expr),
        ExprKind::Tuple(items) => items.iter().for_each(|e| f(e)),
        ExprKind::Array(array) => array.members.iter().for_each(|e| f(e)),
        ExprKind::Index { lhs, index } => {
            f(lhs);
            f(index);
        }
        ExprKind::Slice { lhs, start, limit } => {
            f(lhs);
            if let Some(s) = start {
                f(s);
            }
            if let Some(l) = limit {
                f(l);
            }
        }
        ExprKind::WidthSlice { lhs, start, .. } => {
            f(lhs);
            f(start);
        }
        ExprKind::TupleIndex { lhs, .. } | ExprKind::Attr { lhs, .. } => f(lhs),
        ExprKind::Invocation(inv) => {
            f(&inv.callee);
            for p in &inv.parametrics {
                if let ExprOrType::Expr(e) = p {
                    f(e);
                }
            }
            inv.args.iter().for_each(|e| f(e));
        }
        ExprKind::FormatMacro(m) => m.args.iter().for_each(|e| f(e)),
        ExprKind::StructInstance(s) => {
            s.members.iter().for_each(|(_, e)| f(e));
            if let Some(base) = &s.splat {
                f(base);
            }
        }
        ExprKind::Conditional(c) => {
            f(&c.test);
            block_children(&c.consequent, f);
            match &c.alternate {
                ElseBranch::Block(b) => block_children(b, f),
                ElseBranch::If(e) => f(e),
            }
        }
        ExprKind::Match { subject, arms } => {
            f(subject);
            for arm in arms {
                for p in &arm.patterns {
                    pattern_children(p, f);
                }
                f(&arm.expr);
            }
        }
        ExprKind::For(l) | ExprKind::UnrollFor(l) => {
            f(&l.iterable);
            block_children(&l.body, f);
            f(&l.init);
        }
        ExprKind::Range { start, end } => {
            f(start);
            f(end);
        }
        ExprKind::Block(b) => block_children(b, f),
        ExprKind::ChannelDecl(c) => {
            if let Some(d) = &c.depth {
                f(d);
            }
            c.dims.iter().for_each(|e| f(e));
        }
        ExprKind::Spawn(s) => {
            f(&s.callee);
            s.args.iter().for_each(|e| f(e));
        }
    }
}

pub fn block_children<'a>(block: &'a Block, f: &mut dyn FnMut(&'a Expr)) {
    for stmt in &block.statements {
        match &stmt.kind {
            StatementKind::Let(l) => f(&l.rhs),
            StatementKind::Const(c) => f(&c.value),
            StatementKind::Expr(e) => f(e),
        }
    }
}

fn pattern_children<'a>(pattern: &'a Pattern, f: &mut dyn FnMut(&'a Expr)) {
    match pattern {
        Pattern::Value(e) => f(e),
        Pattern::Tuple(items, _) => items.iter().for_each(|p| pattern_children(p, f)),
        Pattern::Wildcard(_) | Pattern::Bind(..) => {}
    }
}

/// Preorder traversal of `expr` and everything below it.
pub fn visit<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    f(expr);
    for_each_child(expr, &mut |child| visit(child, &mut *f));
}

/// Name definitions introduced somewhere inside `expr`.
pub fn defined_names(expr: &Expr) -> BTreeSet<NameDefId> {
    let mut out = BTreeSet::new();
    visit(expr, &mut |e| match &e.kind {
        ExprKind::Block(b) => collect_block_defs(b, &mut out),
        ExprKind::Conditional(c) => {
            collect_block_defs(&c.consequent, &mut out);
            if let ElseBranch::Block(b) = &c.alternate {
                collect_block_defs(b, &mut out);
            }
        }
        ExprKind::For(l) | ExprKind::UnrollFor(l) => {
            out.extend(l.names.leaves());
            collect_block_defs(&l.body, &mut out);
        }
        ExprKind::Match { arms, .. } => {
            for arm in arms {
                for p in &arm.patterns {
                    collect_pattern_defs(p, &mut out);
                }
            }
        }
        _ => {}
    });
    out
}

fn collect_block_defs(block: &Block, out: &mut BTreeSet<NameDefId>) {
    for stmt in &block.statements {
        match &stmt.kind {
            StatementKind::Let(l) => out.extend(l.names.leaves()),
            StatementKind::Const(c) => {
                out.insert(c.name_def);
            }
            StatementKind::Expr(_) => {}
        }
    }
}

fn collect_pattern_defs(pattern: &Pattern, out: &mut BTreeSet<NameDefId>) {
    match pattern {
        Pattern::Bind(id, _) => {
            out.insert(*id);
        }
        Pattern::Tuple(items, _) => items.iter().for_each(|p| collect_pattern_defs(p, out)),
        Pattern::Wildcard(_) | Pattern::Value(_) => {}
    }
}

/// Name definitions referenced in `expr` but defined outside it, in order of
/// first reference.
pub fn free_variables(expr: &Expr) -> Vec<NameDefId> {
    let defined = defined_names(expr);
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    visit(expr, &mut |e| {
        if let ExprKind::NameRef(r) = &e.kind {
            if let RefTarget::NameDef(id) = r.target {
                if !defined.contains(&id) && seen.insert(id) {
                    out.push(id);
                }
            }
        }
    });
    out
}

/// Free variables of a block, treating it as a single expression.
pub fn block_free_variables(block: &Block) -> Vec<NameDefId> {
    let mut defined = BTreeSet::new();
    collect_block_defs(block, &mut defined);
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    block_children(block, &mut |child| {
        for id in free_variables(child) {
            if !defined.contains(&id) && seen.insert(id) {
                out.push(id);
            }
        }
    });
    out
}
