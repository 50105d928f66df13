use std::sync::Arc;

use hdlx_ast::{Expr, ModuleMember, StatementKind};
use hdlx_core::{DeduceCtx, ImportData, InMemoryResolver, InterpValue, ParametricEnv, TypeInfoId, constexpr, typecheck_text};
use hdlx_interpret::{emit_expression, run};

const SRC: &str = "const K = u8:7;
const PAIR = (u4:9 + u4:12, [u8:1, u8:2, u8:3][u32:1]);
fn f(x: u8) -> u8 {
    const M = u8:5;
    let a = M * u8:3;
    let b = (a + K) - u8:4;
    b + x
}
";

fn check() -> (ImportData, TypeInfoId) {
    let mut data = ImportData::new(InMemoryResolver::new());
    let root = typecheck_text(&mut data, SRC, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    (data, root)
}

fn run_expression(data: &ImportData, type_info: TypeInfoId, expr: &Expr, args: Vec<InterpValue>) -> InterpValue {
    let f = emit_expression(data, type_info, expr, &ParametricEnv::new()).unwrap_or_else(|e| panic!("{e}"));
    run(data, Arc::new(f), args).unwrap_or_else(|e| panic!("{e}"))
}

/// Runs `expr` on the VM and checks it against the compile-time evaluator.
fn agree(data: &mut ImportData, type_info: TypeInfoId, expr: &Expr) -> InterpValue {
    let vm = run_expression(data, type_info, expr, Vec::new());
    let module = data.module("test").expect("module").module.clone();
    let mut ctx = DeduceCtx::new(data, module, type_info, ParametricEnv::new());
    let folded = constexpr::evaluate_to_value(&mut ctx, expr).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(vm, folded);
    vm
}

#[test]
fn module_constant_expression_agrees_with_constexpr() {
    let (mut data, root) = check();
    let module = data.module("test").expect("module").module.clone();
    let Some((_, ModuleMember::Const(pair))) = module.find_member("PAIR") else {
        panic!("expected a constant");
    };
    let value = agree(&mut data, root, &pair.value);
    assert_eq!(value, InterpValue::Tuple(vec![InterpValue::ubits(4, 5), InterpValue::ubits(8, 2)]));
}

#[test]
fn expressions_over_free_constants_agree_with_constexpr() {
    let (mut data, _) = check();
    let module = data.module("test").expect("module").module.clone();
    let (item, f) = module.find_function("f").expect("f");
    let type_info = data
        .function_instance("test", item, &ParametricEnv::new())
        .expect("instance")
        .type_info;

    let lets: Vec<&Expr> = f
        .body
        .statements
        .iter()
        .filter_map(|s| match &s.kind {
            StatementKind::Let(l) => Some(&l.rhs),
            _ => None,
        })
        .collect();
    // `M * u8:3` reads a block constant, `(a + K) - u8:4` a constexpr local
    // and a module constant.
    assert_eq!(agree(&mut data, type_info, lets[0]), InterpValue::ubits(8, 15));
    assert_eq!(agree(&mut data, type_info, lets[1]), InterpValue::ubits(8, 18));
}

#[test]
fn runtime_free_variables_become_leading_slots() {
    let (data, _) = check();
    let module = data.module("test").expect("module").module.clone();
    let (item, f) = module.find_function("f").expect("f");
    let type_info = data
        .function_instance("test", item, &ParametricEnv::new())
        .expect("instance")
        .type_info;
    let tail = f.body.trailing_expr().expect("trailing expression");

    let x = InterpValue::ubits(8, 1);
    let vm = run_expression(&data, type_info, tail, vec![x.clone()]);
    let expected = constexpr::call_function(&data, "test", item, &ParametricEnv::new(), vec![x]).expect("constexpr");
    assert_eq!(vm, expected);
    assert_eq!(vm, InterpValue::ubits(8, 19));
}
