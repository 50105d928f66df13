use hdlx_core::{CheckError, ImportData, InMemoryResolver, InterpValue, TypeErrorKind, constexpr, typecheck_text};

fn resolver() -> InMemoryResolver {
    InMemoryResolver::new()
        .with(
            "lib",
            "pub const LIMIT = u32:5;\npub fn double(x: u32) -> u32 {\n    x * u32:2\n}\nfn hidden() -> u32 {\n    u32:0\n}\npub enum Mode : u2 {\n    IDLE = 0,\n    BUSY = 3,\n}\n",
        )
        .with("util.math", "pub fn inc(x: u32) -> u32 {\n    x + u32:1\n}\n")
}

#[test]
fn imported_functions_and_constants_are_usable() {
    let mut data = ImportData::new(resolver());
    let src = "import lib;\nconst R = lib::double(lib::LIMIT);\n";
    let root = typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    let module = &data.module("test").expect("module").module;
    let (item, _) = module.find_member("R").expect("R");
    assert_eq!(data.arena().item_value(root, item), Some(&InterpValue::u32(10)));
    assert!(data.module("lib").is_some());
}

#[test]
fn dotted_imports_resolve_through_the_alias() {
    let mut data = ImportData::new(resolver());
    let src = "import util.math as m;\nconst R = m::inc(u32:1);\n";
    let root = typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    let module = &data.module("test").expect("module").module;
    let (item, _) = module.find_member("R").expect("R");
    assert_eq!(data.arena().item_value(root, item), Some(&InterpValue::u32(2)));
}

#[test]
fn imported_enum_members_resolve() {
    let mut data = ImportData::new(resolver());
    let src = "import lib;\nfn busy() -> lib::Mode {\n    lib::Mode::BUSY\n}\n";
    typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
}

#[test]
fn private_members_are_not_importable() {
    let mut data = ImportData::new(resolver());
    let src = "import lib;\nconst R = lib::hidden();\n";
    let Err(CheckError::Type(err)) = typecheck_text(&mut data, src, "test.x", "test") else {
        panic!("expected sema error");
    };
    assert_eq!(err.kind, TypeErrorKind::Import);
    assert!(err.message.contains("not public"), "unexpected error: {}", err.message);
}

#[test]
fn missing_modules_are_reported() {
    let mut data = ImportData::new(InMemoryResolver::new());
    let Err(CheckError::Type(err)) = typecheck_text(&mut data, "import nowhere;\n", "test.x", "test") else {
        panic!("expected sema error");
    };
    assert_eq!(err.kind, TypeErrorKind::Import);
    assert!(err.message.contains("Could not find module 'nowhere'"), "unexpected error: {}", err.message);
}

#[test]
fn import_cycles_are_detected() {
    let resolver = InMemoryResolver::new()
        .with("a", "import b;\npub const X = u32:1;\n")
        .with("b", "import a;\npub const Y = u32:2;\n");
    let mut data = ImportData::new(resolver);
    let Err(CheckError::Type(err)) = typecheck_text(&mut data, "import a;\n", "test.x", "test") else {
        panic!("expected sema error");
    };
    assert_eq!(err.kind, TypeErrorKind::ImportCycle);
    assert!(err.message.contains("a -> b -> a"), "unexpected error: {}", err.message);
}

#[test]
fn checked_functions_can_be_called_at_compile_time() {
    let mut data = ImportData::new(resolver());
    let src = "fn tri(n: u32) -> u32 {\n    for (i, acc): (u32, u32) in range(u32:0, u32:8) {\n        if i <= n { acc + i } else { acc }\n    }(u32:0)\n}\n";
    typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    let module = data.module("test").expect("module").module.clone();
    let (item, _) = module.find_function("tri").expect("tri");
    let out = constexpr::call_function(&data, "test", item, &Default::default(), vec![InterpValue::u32(4)])
        .expect("call");
    assert_eq!(out, InterpValue::u32(10));
}

#[test]
fn failing_assertions_surface_at_compile_time() {
    let mut data = ImportData::new(InMemoryResolver::new());
    let src = "fn f(x: u32) -> u32 {\n    assert_eq(x, u32:1);\n    x\n}\nconst R = f(u32:2);\n";
    let Err(CheckError::Type(err)) = typecheck_text(&mut data, src, "test.x", "test") else {
        panic!("expected sema error");
    };
    assert!(
        matches!(err.kind, TypeErrorKind::Constexpr | TypeErrorKind::NotConstexpr),
        "unexpected error: {err}"
    );
}
