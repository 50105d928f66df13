use hdlx_ast::{ExprKind, ItemId, ModuleMember, Pattern, RefTarget, TestAttribute};
use hdlx_parse::{format_module, parse_module};

fn round_trip(src: &str) {
    let module = parse_module(src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(format_module(&module), src);
}

#[test]
fn parametric_invocation_round_trips() {
    round_trip(
        "fn p<N: u32>(x: bits[N]) -> bits[N] {\n    x\n}\nfn main() -> u8 {\n    p<u32:8>(u8:1)\n}",
    );
}

#[test]
fn parametric_default_round_trips() {
    round_trip(
        "fn p<X: u32, Y: u32 = {X + X}>(x: bits[X]) -> bits[Y] {\n    x as bits[Y]\n}",
    );
}

#[test]
fn struct_instance_with_splat_round_trips() {
    round_trip(
        "struct Point {\n    x: u32,\n    y: u32,\n}\nfn f(p: Point) -> Point {\n    Point { x: u32:42, ..p }\n}",
    );
}

#[test]
fn struct_literal_in_if_head_round_trips() {
    round_trip(
        "struct MyStruct {\n    x: u32,\n}\nfn f(a: MyStruct) -> u32 {\n    if a.x <= MyStruct { x: u32:42 }.x { u32:1 } else { u32:2 }\n}",
    );
}

#[test]
fn enum_and_match_round_trip() {
    round_trip(
        "enum MyEnum : u2 {\n    A = 0,\n    B = 1,\n}\nfn f(e: MyEnum) -> u32 {\n    match e {\n        MyEnum::A => u32:1,\n        _ => u32:2,\n    }\n}",
    );
}

#[test]
fn slices_round_trip() {
    round_trip("fn f(x: u32) -> u4 {\n    x[0:8][4:]\n}");
    round_trip("fn f(x: u32) -> u8 {\n    x[1+:u8]\n}");
}

#[test]
fn for_loops_round_trip() {
    round_trip(
        "fn f() -> u32 {\n    for (i, acc): (u32, u32) in range(u32:0, u32:4) {\n        acc + i\n    }(u32:0)\n}",
    );
    round_trip(
        "fn f() -> u32 {\n    unroll_for! (i, acc) in range(u32:0, u32:4) {\n        acc + i\n    }(u32:0)\n}",
    );
}

#[test]
fn nested_destructuring_round_trips() {
    round_trip(
        "fn f() -> u32 {\n    let (w, (x, (y)), z): (u32, (u32, (u32,)), u32) = (1, (2, (3,)), 4);\n    w + x + y + z\n}",
    );
}

#[test]
fn procs_round_trip() {
    round_trip(
        "proc Counter {\n    out_ch: chan<u32> out;\n    config(out_ch: chan<u32> out) {\n        (out_ch,)\n    }\n    init {\n        u32:0\n    }\n    next(st: u32) {\n        send(join(), out_ch, st);\n        st + u32:1\n    }\n}\n#[test_proc]\nproc Tester {\n    c: chan<u32> in;\n    config() {\n        let (p, c) = chan<u32, 2>;\n        spawn Counter(p);\n        (c,)\n    }\n    init {\n        ()\n    }\n    next(st: ()) {\n        let (tok, v) = recv(join(), c);\n        ()\n    }\n}",
    );
}

#[test]
fn imported_parametric_invocation_round_trips() {
    round_trip("import foo;\nfn f(x: u32) -> u32 {\n    foo::bar<u32:2>(x)\n}");
    round_trip("import foo;\nfn f(x: u32) -> bool {\n    foo::LIMIT < x\n}");
}

#[test]
fn macros_round_trip() {
    round_trip(
        "fn f(x: u32) -> u32 {\n    trace_fmt!(\"x is {:x} {{}}\", x);\n    let z = zero!<u32>();\n    fail!(\"never\", x + z)\n}",
    );
}

#[test]
fn typed_constant_array_round_trips() {
    round_trip("const A = u32[4]:[1, 2, ...];");
}

#[test]
fn quickcheck_attribute_round_trips() {
    round_trip("#[quickcheck(test_count=1024)]\nfn prop(x: u8) -> bool {\n    x == x\n}");
}

#[test]
fn attributes_are_recorded() {
    let module = parse_module(
        "#[test]\nfn t() {\n    assert_eq(u32:1, u32:1)\n}\n#[quickcheck]\nfn q(x: u8) -> bool {\n    true\n}",
        "test.x",
        "test",
    )
    .unwrap();
    assert_eq!(module.test_functions().count(), 1);
    let (_, q) = module.quickcheck_functions().next().unwrap();
    assert_eq!(q.attribute, Some(TestAttribute::QuickCheck { test_count: None }));
}

#[test]
fn match_binds_unknown_names_and_compares_known_ones() {
    let module = parse_module(
        "fn f(x: u32, y: u32) -> u32 {\n    match (x, y) {\n        (y, z) => z,\n        _ => u32:0,\n    }\n}",
        "test.x",
        "test",
    )
    .unwrap();
    let ModuleMember::Function(f) = &module.members[0] else {
        panic!("expected a function");
    };
    let ExprKind::Match { arms, .. } = &f.body.trailing_expr().unwrap().kind else {
        panic!("expected a match");
    };
    let Pattern::Tuple(items, _) = &arms[0].patterns[0] else {
        panic!("expected a tuple pattern");
    };
    assert!(matches!(items[0], Pattern::Value(_)));
    assert!(matches!(items[1], Pattern::Bind(..)));
}

#[test]
fn shr_closes_nested_parametrics() {
    let module = parse_module(
        "struct S<N: u32> {\n    x: bits[N],\n}\nfn id<N: u32>(s: S<N>) -> S<N> {\n    s\n}\nfn f(s: S<u32:4>) -> S<u32:4> {\n    id<S<u32:4>>(s)\n}",
        "test.x",
        "test",
    );
    assert!(module.is_ok(), "{module:?}");
}

#[test]
fn function_body_refers_to_its_own_item() {
    let module = parse_module(
        "fn g() -> u32 {\n    u32:0\n}\nfn f(x: u32) -> u32 {\n    f(x)\n}",
        "test.x",
        "test",
    )
    .unwrap();
    let ModuleMember::Function(f) = &module.members[1] else {
        panic!("expected a function");
    };
    let ExprKind::Invocation(inv) = &f.body.trailing_expr().unwrap().kind else {
        panic!("expected an invocation");
    };
    let ExprKind::NameRef(callee) = &inv.callee.kind else {
        panic!("expected a named callee");
    };
    assert_eq!(callee.target, RefTarget::Item(ItemId(1)));
}

#[test]
fn extern_verilog_function_round_trips() {
    round_trip("#[extern_verilog(\"unit\")]\nfn example() {\n    ()\n}");
    let module = parse_module("#[extern_verilog(\"unit\")]\nfn example() {\n    ()\n}", "test.x", "test").unwrap();
    let ModuleMember::Function(f) = &module.members[0] else {
        panic!("expected a function");
    };
    assert_eq!(f.extern_verilog.as_deref(), Some("unit"));
    assert_eq!(f.attribute, None);
}
