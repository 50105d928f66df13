#![forbid(unsafe_code)]

mod ast;
mod builtins;
mod module;
mod span;
pub mod walk;

pub use ast::*;
pub use builtins::{builtins, Builtin, BuiltinInfo, BuiltinRegistry};
pub use module::Module;
pub use span::{join, span, span_between, span_end, Ident, Location, Pos, SourceFile, Span, Spanned};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_file_positions_are_one_based() {
        let file = SourceFile::new("test.x", "fn f() {\n  x == y\n}\n");
        assert_eq!(file.pos(0), Pos { line: 1, col: 1 });
        assert_eq!(file.pos(11), Pos { line: 2, col: 3 });
        let loc = file.location(span(11, 6));
        assert_eq!(loc.to_string(), "test.x:2:3-2:9");
    }

    #[test]
    fn builtin_registry_indexes_by_declaration_order() {
        for info in builtins().iter() {
            assert_eq!(builtins().info(info.builtin).name, info.name);
        }
        assert_eq!(Builtin::Range.name(), "range");
        assert!(builtins().lookup("fail!").is_some_and(|i| i.is_macro));
        assert!(builtins().lookup("send").is_some_and(|i| i.channel_op));
        assert!(builtins().lookup("nope").is_none());
    }

    #[test]
    fn join_covers_both_spans() {
        let s = join(span(10, 2), span(3, 4));
        assert_eq!(s.offset(), 3);
        assert_eq!(s.len(), 9);
    }
}
