#![forbid(unsafe_code)]

mod bindings;
mod error;
mod fmt;
mod parser;

use hdlx_ast::{Expr, Module, NameDef};
use miette::IntoDiagnostic;

pub use bindings::{Bindings, BoundNode, NameResolutionError, ScopeKind};
pub use error::{ParseError, ParseErrorKind};
pub use fmt::{format_expr, format_function, format_module, format_type};
pub use parser::Parser;

/// Language features that can be switched off per parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseConfig {
    pub allow_quickcheck: bool,
    pub allow_test_proc: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            allow_quickcheck: true,
            allow_test_proc: true,
        }
    }
}

/// Parses `text` as module `module_name`; `filename` appears in error
/// locations.
pub fn parse_module(text: &str, filename: &str, module_name: &str) -> Result<Module, ParseError> {
    Parser::new(text, filename, module_name)?.parse_module()
}

pub fn parse_module_with_config(
    text: &str,
    filename: &str,
    module_name: &str,
    config: ParseConfig,
) -> Result<Module, ParseError> {
    Parser::with_config(text, filename, module_name, config)?.parse_module()
}

/// Parses a standalone expression, returning it with the name definitions
/// it introduced.
pub fn parse_expr(text: &str, filename: &str) -> Result<(Expr, Vec<NameDef>), ParseError> {
    let mut parser = Parser::new(text, filename, "expr")?;
    let expr = parser.parse_expression()?;
    parser.expect_eof()?;
    Ok((expr, parser.into_name_defs()))
}

pub fn parse_source(src: &str) -> miette::Result<Module> {
    parse_module(src, "<source>", "main").into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdlx_ast::{ExprKind, ItemId, ModuleMember, NameDefId, RefTarget, builtins};

    #[test]
    fn inner_scope_shadows_outer() {
        let mut b = Bindings::new(builtins());
        b.add("x", BoundNode::Local(NameDefId(0)));
        b.push(ScopeKind::Block);
        b.add("x", BoundNode::Local(NameDefId(1)));
        assert_eq!(b.resolve("x"), Ok(BoundNode::Local(NameDefId(1))));
        b.pop();
        assert_eq!(b.resolve("x"), Ok(BoundNode::Local(NameDefId(0))));
    }

    #[test]
    fn builtins_are_visible_but_macros_are_not() {
        let b = Bindings::new(builtins());
        assert!(b.contains("range"));
        assert!(!b.contains("fail!"));
        assert_eq!(
            b.resolve("nope"),
            Err(NameResolutionError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn config_scope_hides_proc_members() {
        let mut b = Bindings::new(builtins());
        b.push(ScopeKind::ProcMembers);
        b.add("m", BoundNode::ProcMember(NameDefId(3)));
        b.push(ScopeKind::Function);
        assert_eq!(b.resolve("m"), Ok(BoundNode::ProcMember(NameDefId(3))));
        b.pop();
        b.push(ScopeKind::Config);
        assert_eq!(
            b.resolve("m"),
            Err(NameResolutionError::HiddenProcMember("m".to_string(), "config"))
        );
    }

    #[test]
    fn hidden_proc_member_falls_through_to_module_scope() {
        let mut b = Bindings::new(builtins());
        b.add_module_level("x", BoundNode::Item(ItemId(0)));
        b.push(ScopeKind::ProcMembers);
        b.add("x", BoundNode::ProcMember(NameDefId(1)));
        b.push(ScopeKind::Init);
        assert_eq!(b.resolve("x"), Ok(BoundNode::Item(ItemId(0))));
    }

    #[test]
    fn permanent_scopes_survive_pop() {
        let mut b = Bindings::new(builtins());
        b.add_module_level("f", BoundNode::Local(NameDefId(0)));
        b.pop();
        b.pop();
        assert_eq!(b.depth(), 2);
        assert!(b.module_level("f").is_some());
    }

    #[test]
    fn predefined_names_resolve_in_expressions() {
        let mut parser = Parser::new("x + u32:1", "test.x", "test").unwrap();
        let x = parser.predefine("x");
        let e = parser.parse_expression().unwrap();
        let ExprKind::Binop { lhs, .. } = &e.kind else {
            panic!("expected a binop, got {e:?}");
        };
        let ExprKind::NameRef(r) = &lhs.kind else {
            panic!("expected a name ref");
        };
        assert_eq!(r.target, RefTarget::NameDef(x));
    }

    #[test]
    fn items_are_bound_in_source_order() {
        let m = parse_module(
            "const A = u32:1;\nfn f() -> u32 {\n    A\n}",
            "test.x",
            "test",
        )
        .unwrap();
        let ModuleMember::Function(f) = &m.members[1] else {
            panic!("expected a function");
        };
        let Some(e) = f.body.trailing_expr() else {
            panic!("expected a trailing expression");
        };
        assert!(matches!(
            &e.kind,
            ExprKind::NameRef(r) if r.target == RefTarget::Item(hdlx_ast::ItemId(0))
        ));
    }

    #[test]
    fn quickcheck_can_be_disabled() {
        let config = ParseConfig {
            allow_quickcheck: false,
            ..ParseConfig::default()
        };
        let err = parse_module_with_config(
            "#[quickcheck]\nfn f(x: u8) -> bool {\n    true\n}",
            "test.x",
            "test",
            config,
        )
        .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
    }
}
