#![forbid(unsafe_code)]

//! Type deduction, parametric instantiation, and compile-time evaluation.

mod builtins;
pub mod constexpr;
mod deduce;
mod error;
mod import_data;
mod type_info;
mod typecheck;
mod types;
mod value;

pub use builtins::{apply as apply_builtin, cast, range};
pub use deduce::{DeduceCtx, deduce, deduce_block};
pub use error::{CheckError, ConstexprError, NotConstexprError, TypeError, TypeErrorKind, ValueError};
pub use import_data::{
    FileResolver, FunctionInstance, ImportData, ImportResolver, InMemoryResolver, ModuleInfo, ProcInstance,
    TypecheckOptions,
};
pub use type_info::{Callee, InvocationData, SpawnData, TypeInfo, TypeInfoArena, TypeInfoId};
pub use typecheck::typecheck_module;
pub use types::{ConcreteType, EnumType, NominalRef, ParametricEnv, ParametricExpr, StructType, TypeDim};
pub use value::{ChannelHandle, FunctionRef, InterpValue, MAX_BIT_WIDTH, mask, slice_bounds};

/// Parses and typechecks one module held in memory.
pub fn typecheck_text(
    data: &mut ImportData,
    text: &str,
    filename: &str,
    module_name: &str,
) -> Result<TypeInfoId, CheckError> {
    let module = hdlx_parse::parse_module(text, filename, module_name)?;
    Ok(typecheck_module(data, module)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(src: &str) -> Result<(ImportData, TypeInfoId), CheckError> {
        let mut data = ImportData::new(InMemoryResolver::new());
        let root = typecheck_text(&mut data, src, "test.x", "test")?;
        Ok((data, root))
    }

    fn type_error(src: &str) -> TypeError {
        match check(src) {
            Err(CheckError::Type(e)) => e,
            Err(CheckError::Parse(e)) => panic!("unexpected parse error: {e}"),
            Ok(_) => panic!("expected a type error"),
        }
    }

    fn const_value(data: &ImportData, root: TypeInfoId, name: &str) -> InterpValue {
        let module = &data.module("test").expect("module").module;
        let (item, _) = module.find_member(name).expect("member");
        data.arena().item_value(root, item).cloned().expect("value")
    }

    #[test]
    fn module_constants_are_evaluated() {
        let (data, root) = check("const A = u8:3;\nconst B = A + u8:4;\nconst C = (B as u16) << 2;\n").expect("typecheck");
        assert_eq!(const_value(&data, root, "B"), InterpValue::ubits(8, 7));
        assert_eq!(const_value(&data, root, "C"), InterpValue::ubits(16, 28));
    }

    #[test]
    fn untyped_literals_follow_their_context() {
        let (data, root) = check("const X = u4:3 + 1;\nconst Y = 5;\n").expect("typecheck");
        assert_eq!(const_value(&data, root, "X"), InterpValue::ubits(4, 4));
        assert_eq!(const_value(&data, root, "Y"), InterpValue::u32(5));
    }

    #[test]
    fn literal_that_does_not_fit_is_rejected() {
        let err = type_error("const X = u8:256;\n");
        assert_eq!(err.kind, TypeErrorKind::Mismatch);
        assert!(err.message.contains("does not fit"), "{}", err.message);
    }

    #[test]
    fn mismatched_binop_operands_are_rejected() {
        let err = type_error("fn f(a: u8, b: u16) -> u8 { a + b }\n");
        assert!(err.message.contains("u8 vs u16"), "{}", err.message);
    }

    #[test]
    fn return_type_must_match_body() {
        let err = type_error("fn f(a: u8) -> u16 { a }\n");
        assert!(err.message.contains("did not match the annotated return type"), "{}", err.message);
    }

    #[test]
    fn enum_width_defaults_to_the_widest_value() {
        let (data, root) = check("enum E { A = 0, B = 5 }\nconst V = E::B;\n").expect("typecheck");
        assert_eq!(const_value(&data, root, "V"), InterpValue::ubits(3, 5));
    }

    #[test]
    fn slices_clamp_and_wrap_negative_bounds() {
        let (data, root) = check("const X = u8:0b1011_0110;\nconst HI = X[-4:];\nconst LO = X[:4];\n").expect("typecheck");
        assert_eq!(const_value(&data, root, "HI"), InterpValue::ubits(4, 0b1011));
        assert_eq!(const_value(&data, root, "LO"), InterpValue::ubits(4, 0b0110));
    }

    #[test]
    fn later_members_are_not_visible_to_earlier_ones() {
        let err = check("const Y = double(u32:4);\nfn double(x: u32) -> u32 { x * u32:2 }\n").err();
        let Some(CheckError::Parse(e)) = err else {
            panic!("expected a name resolution error, got {err:?}");
        };
        assert!(e.message.contains("\"double\""), "{}", e.message);
    }

    #[test]
    fn recursion_is_rejected() {
        let err = type_error("fn f(x: u32) -> u32 { f(x) }\n");
        assert_eq!(err.kind, TypeErrorKind::Recursion);
        assert!(err.message.contains("Recursion of 'f' detected"), "{}", err.message);

        let err = type_error("fn g(x: u32) -> u32 { x }\nfn f(x: u32) -> u32 { if x == u32:0 { g(x) } else { f(x - u32:1) } }\n");
        assert_eq!(err.kind, TypeErrorKind::Recursion);
    }
}
