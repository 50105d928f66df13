use std::sync::Arc;

use hdlx_core::{ConstexprError, ImportData, InMemoryResolver, InterpValue, ParametricEnv, constexpr, typecheck_text};
use hdlx_interpret::{BytecodeFunction, bytecode_for, run};
use proptest::prelude::*;

fn check(src: &str) -> ImportData {
    let mut data = ImportData::new(InMemoryResolver::new());
    typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    data
}

fn emitted(data: &ImportData, name: &str) -> BytecodeFunction {
    bytecode_for(data, "test", name, &ParametricEnv::new()).unwrap_or_else(|e| panic!("{e}"))
}

fn call(data: &ImportData, name: &str, args: Vec<InterpValue>) -> InterpValue {
    run(data, Arc::new(emitted(data, name)), args).unwrap_or_else(|e| panic!("{e}"))
}

const SQUARE: &str = "fn square<N: u32>(x: uN[N]) -> uN[N] {\n    x * x\n}\nfn explicit() -> u16 {\n    square<u32:16>(u16:4)\n}\nfn inferred() -> u32 {\n    square(u32:8)\n}\n";

#[test]
fn parametric_instances_run_at_their_own_width() {
    let data = check(SQUARE);
    assert_eq!(call(&data, "explicit", Vec::new()), InterpValue::ubits(16, 16));
    assert_eq!(call(&data, "inferred", Vec::new()), InterpValue::u32(64));
}

#[test]
fn parametric_instance_can_be_emitted_directly() {
    let data = check(SQUARE);
    let env = ParametricEnv::new().with("N", InterpValue::u32(16));
    let f = bytecode_for(&data, "test", "square", &env).unwrap_or_else(|e| panic!("{e}"));
    let out = run(&data, Arc::new(f), vec![InterpValue::ubits(16, 300)]).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(out, InterpValue::ubits(16, (300u128 * 300) & 0xffff));
}

#[test]
fn unmatched_value_fails_at_runtime() {
    let data = check("fn f(x: u32) -> u32 {\n    match x {\n        u32:1 => u32:10,\n        u32:2 => u32:20,\n    }\n}\n");
    assert_eq!(call(&data, "f", vec![InterpValue::u32(2)]), InterpValue::u32(20));

    let failure = run(&data, Arc::new(emitted(&data, "f")), vec![InterpValue::u32(3)]).unwrap_err();
    assert_eq!(failure.label, "default");
    assert!(failure.message.contains("The value was not matched"), "{}", failure.message);
}

#[test]
fn match_binds_and_compares_tuple_elements() {
    let data = check("fn f(x: u32, y: u32) -> u32 {\n    match (x, y) {\n        (u32:0, z) => z,\n        (a, _) => a + u32:100,\n    }\n}\n");
    assert_eq!(call(&data, "f", vec![InterpValue::u32(0), InterpValue::u32(7)]), InterpValue::u32(7));
    assert_eq!(call(&data, "f", vec![InterpValue::u32(5), InterpValue::u32(7)]), InterpValue::u32(105));
}

#[test]
fn short_circuit_skips_the_failing_side() {
    let data = check("fn boom() -> bool {\n    fail!(\"boom\", false)\n}\nfn f(x: bool) -> bool {\n    x || boom()\n}\n");
    assert_eq!(call(&data, "f", vec![InterpValue::bool(true)]), InterpValue::bool(true));
    let failure = run(&data, Arc::new(emitted(&data, "f")), vec![InterpValue::bool(false)]).unwrap_err();
    assert_eq!(failure.label, "boom");
}

#[test]
fn emission_is_deterministic() {
    let src = "fn f(a: u8[4]) -> u8 {\n    let s = for (i, acc): (u32, u8) in range(u32:0, u32:4) {\n        acc + a[i]\n    }(u8:0);\n    if s > u8:10 { s[0:4] as u8 } else { s }\n}\n";
    let first = emitted(&check(src), "f").to_string();
    let second = emitted(&check(src), "f").to_string();
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn disassembly_numbers_each_instruction() {
    let data = check("fn f(x: u32) -> u32 {\n    x + u32:1\n}\n");
    let f = emitted(&data, "f");
    let text = f.to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), f.bytecodes.len());
    assert!(lines[0].starts_with("000 load"), "{text}");
    assert!(lines.iter().any(|l| l.contains("literal u32:1")), "{text}");
    assert!(lines.last().is_some_and(|l| l.ends_with("add")), "{text}");

    let located = f.to_string_with_locations();
    assert!(located.lines().all(|l| l.contains(" @ test.x:")), "{located}");
}

#[test]
fn builtin_calls_disassemble_with_their_call_site() {
    let data = check("#[test]\nfn expect_fail() -> u32{\n  let foo = u32:3;\n  assert_eq(foo, u32:2);\n  foo\n}");
    let text = emitted(&data, "expect_fail").to_string();
    assert_eq!(
        text,
        "000 literal u32:3
001 store 0
002 load 0
003 literal u32:2
004 literal builtin:assert_eq
005 call assert_eq(foo, u32:2) : {}
006 pop
007 load 0"
    );
}

#[test]
fn wide_literals_disassemble_in_hex() {
    let data = check(
        "#[test]\nfn has_name_def_tree() -> (u32, u64, uN[128]) {\n  let (a, b, (c, d)) = (u4:0, u8:1, (u16:2, (u32:3, u64:4, uN[128]:5)));\n  assert_eq(a, u4:0);\n  d\n}",
    );
    let text = emitted(&data, "has_name_def_tree").to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[5], "005 literal u128:0x5", "{text}");
    assert!(lines.contains(&"017 literal builtin:assert_eq"), "{text}");
    assert!(lines.contains(&"018 call assert_eq(a, u4:0) : {}"), "{text}");

    let out = call(&data, "has_name_def_tree", Vec::new());
    assert_eq!(out.to_string(), "(u32:3, u64:4, u128:0x5)");
}

#[test]
fn user_calls_name_their_parametric_instance() {
    let data = check(SQUARE);
    let text = emitted(&data, "explicit").to_string();
    assert!(text.lines().any(|l| l.ends_with("call square<u32:16>(u16:4) : {N: u32:16}")), "{text}");
}

#[test]
fn unmatched_value_reads_the_same_in_both_evaluators() {
    let data = check("fn f(x: u2) -> u32 {\n    match x {\n        u2:0 => u32:10,\n        u2:1 => u32:20,\n    }\n}\n");
    let arg = InterpValue::ubits(2, 3);
    let failure = run(&data, Arc::new(emitted(&data, "f")), vec![arg.clone()]).unwrap_err();

    let module = data.module("test").expect("module").module.clone();
    let (item, _) = module.find_function("f").expect("f");
    let err = constexpr::call_function(&data, "test", item, &ParametricEnv::new(), vec![arg]).unwrap_err();
    let ConstexprError::Failed { message, .. } = err else {
        panic!("expected a failure, got {err}");
    };
    assert_eq!(message, "The value was not matched: value: 3");
    assert_eq!(failure.message, message);
}

const ARITH: &str = "fn mix(a: u16, b: u16) -> u16 {\n    let c = (a ^ b) + (a & b);\n    let d = if a > b { a - b } else { b - a };\n    (c << 1) | (d >> 2)\n}\n";

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn interpreter_agrees_with_compile_time_evaluation(a in any::<u16>(), b in any::<u16>()) {
        let data = check(ARITH);
        let module = data.module("test").expect("module").module.clone();
        let (item, _) = module.find_function("mix").expect("mix");
        let args = vec![InterpValue::ubits(16, a as u128), InterpValue::ubits(16, b as u128)];
        let expected = constexpr::call_function(&data, "test", item, &ParametricEnv::new(), args.clone())
            .expect("constexpr");
        prop_assert_eq!(call(&data, "mix", args), expected);
    }
}
