use hdlx_core::{
    CheckError, ConcreteType, ImportData, InMemoryResolver, InterpValue, ParametricEnv, TypeError, TypeErrorKind,
    TypeInfoId, TypecheckOptions, typecheck_text,
};

fn check(src: &str) -> (ImportData, TypeInfoId) {
    let mut data = ImportData::new(InMemoryResolver::new());
    let root = typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    (data, root)
}

fn type_error(src: &str) -> TypeError {
    let mut data = ImportData::new(InMemoryResolver::new());
    match typecheck_text(&mut data, src, "test.x", "test") {
        Err(CheckError::Type(e)) => e,
        Err(CheckError::Parse(e)) => panic!("unexpected parse error: {e}"),
        Ok(_) => panic!("expected sema error"),
    }
}

fn constant(data: &ImportData, root: TypeInfoId, name: &str) -> (ConcreteType, InterpValue) {
    let module = &data.module("test").expect("module").module;
    let (item, _) = module.find_member(name).expect("member");
    let ty = data.arena().item_type(root, item).cloned().expect("type");
    let value = data.arena().item_value(root, item).cloned().expect("value");
    (ty, value)
}

#[test]
fn explicit_parametric_sets_the_return_width() {
    let src = "fn f<N: u32>(x: bits[N]) -> bits[N] {\n    x\n}\nconst R = f<u32:16>(u16:4);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "R"), (ConcreteType::ubits(16), InterpValue::ubits(16, 4)));
}

#[test]
fn parametric_is_inferred_from_arguments() {
    let src = "fn id<N: u32>(x: bits[N]) -> bits[N] {\n    x\n}\nconst R = id(u32:7);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "R").0, ConcreteType::ubits(32));

    let module = &data.module("test").expect("module").module;
    let (item, _) = module.find_function("id").expect("id");
    let env = ParametricEnv::new().with("N", InterpValue::u32(32));
    let instance = data.function_instance("test", item, &env).expect("instance for N=32");
    assert_eq!(instance.ret, ConcreteType::ubits(32));
}

#[test]
fn each_instantiation_gets_its_own_table() {
    let src = "fn id<N: u32>(x: bits[N]) -> bits[N] {\n    x\n}\nconst A = id(u8:1);\nconst B = id(u4:2);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "A").0, ConcreteType::ubits(8));
    assert_eq!(constant(&data, root, "B").0, ConcreteType::ubits(4));

    let module = &data.module("test").expect("module").module;
    let (item, _) = module.find_function("id").expect("id");
    let eight = data
        .function_instance("test", item, &ParametricEnv::new().with("N", InterpValue::u32(8)))
        .expect("N=8");
    let four = data
        .function_instance("test", item, &ParametricEnv::new().with("N", InterpValue::u32(4)))
        .expect("N=4");
    assert_ne!(eight.type_info, four.type_info);
}

#[test]
fn parametric_defaults_are_derived_from_other_parametrics() {
    let src = "fn p<X: u32, Y: u32 = {X + X}>(x: bits[X]) -> bits[Y] {\n    x as bits[Y]\n}\nconst R = p(u8:3);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "R"), (ConcreteType::ubits(16), InterpValue::ubits(16, 3)));
}

#[test]
fn conflicting_inferences_are_reported() {
    let src = "fn g<N: u32>(a: bits[N], b: bits[N]) -> bits[N] {\n    a\n}\nfn h() -> u8 {\n    g(u8:1, u16:2)\n}\n";
    let err = type_error(src);
    assert!(
        err.message.contains("was bound to different values"),
        "unexpected error: {}",
        err.message
    );
}

#[test]
fn uninferable_parametric_is_reported() {
    let src = "fn f<N: u32>() -> u32 {\n    N\n}\nfn g() -> u32 {\n    f()\n}\n";
    let err = type_error(src);
    assert_eq!(err.kind, TypeErrorKind::UnresolvedParametric);
    assert!(err.message.contains("Could not infer parametric(s): N"), "unexpected error: {}", err.message);
}

#[test]
fn too_many_explicit_parametrics_is_an_arity_error() {
    let src = "fn f<N: u32>(x: bits[N]) -> bits[N] {\n    x\n}\nconst R = f<u32:8, u32:9>(u8:1);\n";
    let err = type_error(src);
    assert_eq!(err.kind, TypeErrorKind::ArityMismatch);
}

#[test]
fn argument_count_is_checked() {
    let err = type_error("fn f(a: u32) -> u32 {\n    a\n}\nfn g() -> u32 {\n    f(u32:1, u32:2)\n}\n");
    assert_eq!(err.kind, TypeErrorKind::ArityMismatch);
    assert!(err.message.contains("Expected 1 parameter(s) but got 2 argument(s)"), "unexpected error: {}", err.message);
}

#[test]
fn parametric_struct_members_drive_inference() {
    let src = "struct Pair<N: u32> {\n    a: bits[N],\n    b: bits[N],\n}\nfn first(p: Pair<u32:8>) -> u8 {\n    p.a\n}\nconst P = Pair { a: u8:1, b: u8:2 };\nconst V = first(P);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "V"), (ConcreteType::ubits(8), InterpValue::ubits(8, 1)));
}

#[test]
fn parametric_used_as_value_inside_body() {
    let src = "fn width<N: u32>(x: bits[N]) -> u32 {\n    N\n}\nconst W = width(u5:0);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "W").1, InterpValue::u32(5));
}

#[test]
fn parametric_defaults_stop_at_the_round_budget() {
    let src = "fn p<X: u32, Y: u32 = {X + X}>(x: bits[X]) -> bits[Y] {\n    x as bits[Y]\n}\nconst R = p(u8:3);\n";
    let (data, root) = check(src);
    assert_eq!(constant(&data, root, "R"), (ConcreteType::ubits(16), InterpValue::ubits(16, 3)));

    let options = TypecheckOptions {
        max_parametric_rounds: 0,
    };
    let mut data = ImportData::with_options(InMemoryResolver::new(), options);
    let Err(CheckError::Type(err)) = typecheck_text(&mut data, src, "test.x", "test") else {
        panic!("expected a type error");
    };
    assert_eq!(err.kind, TypeErrorKind::ParametricCycle);
    assert!(err.message.contains("did not resolve within 0 round(s): Y"), "unexpected error: {}", err.message);
}
