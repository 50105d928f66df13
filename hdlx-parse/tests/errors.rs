use hdlx_parse::{ParseError, ParseErrorKind, parse_expr, parse_module};

fn module_error(src: &str) -> ParseError {
    parse_module(src, "test.x", "test").expect_err("expected a parse error")
}

#[test]
fn chained_comparisons_are_rejected_at_the_second_operator() {
    let err = module_error("fn f(x: u32, y: u32, z: u32) -> bool {\n    x == y == z\n}");
    assert_eq!(err.kind, ParseErrorKind::ChainedComparison);
    assert_eq!(err.message, "comparison operators cannot be chained");
    assert_eq!(err.location.to_string(), "test.x:2:12-2:14");

    let err = module_error("fn f(x: u32, y: u32, z: u32) -> bool {\n    x < y < z\n}");
    assert_eq!(err.kind, ParseErrorKind::ChainedComparison);
    assert_eq!(err.location.to_string(), "test.x:2:11-2:12");
}

#[test]
fn parenthesized_comparisons_may_be_compared() {
    parse_module(
        "fn f(x: u32, y: u32, z: bool) -> bool {\n    (x == y) == z\n}",
        "test.x",
        "test",
    )
    .unwrap();
}

#[test]
fn fail_labels_must_be_unique_per_function() {
    let err = module_error(
        "fn f(x: u32) -> u32 {\n    let a = fail!(\"boom\", x);\n    fail!(\"boom\", a)\n}",
    );
    assert_eq!(err.kind, ParseErrorKind::DuplicateFailLabel);
    assert_eq!(err.message, "A fail label must be unique");

    parse_module(
        "fn f(x: u32) -> u32 {\n    fail!(\"boom\", x)\n}\nfn g(x: u32) -> u32 {\n    fail!(\"boom\", x)\n}",
        "test.x",
        "test",
    )
    .unwrap();
}

#[test]
fn config_cannot_see_proc_members() {
    let err = module_error(
        "proc P {\n    x12: chan<u32> in;\n    config(c: chan<u32> in) {\n        let y = c;\n        (x12,)\n    }\n    init {\n        ()\n    }\n    next(st: ()) {\n        ()\n    }\n}",
    );
    assert_eq!(err.kind, ParseErrorKind::ProcMemberVisibility);
    assert_eq!(
        err.message,
        "Cannot find a definition for name: \"x12\"; \"x12\" is a proc member, but those cannot be referenced from within a proc config function."
    );
    assert_eq!(err.location.to_string(), "test.x:5:10-5:13");
}

#[test]
fn config_sees_module_constant_behind_a_proc_member() {
    let module = parse_module(
        "const x = u32:5;\nproc P {\n    x: u32;\n    config() {\n        (x,)\n    }\n    init {\n        ()\n    }\n    next(st: ()) {\n        ()\n    }\n}",
        "test.x",
        "test",
    )
    .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(module.members.len(), 2);
}

#[test]
fn channels_are_not_next_params() {
    let err = module_error(
        "proc P {\n    config() {\n        ()\n    }\n    init {\n        ()\n    }\n    next(c: (u32, chan<u32> in)) {\n        ()\n    }\n}",
    );
    assert_eq!(err.kind, ParseErrorKind::ChannelInNextParams);
    assert_eq!(err.message, "Channels cannot be Proc next params.");
}

#[test]
fn procs_need_all_three_functions() {
    let err = module_error("proc P {\n    config() {\n        ()\n    }\n}");
    assert_eq!(err.message, "Proc 'P' is missing its 'init' function");
}

#[test]
fn bad_expression_start_is_reported_with_its_location() {
    let err = parse_expr("+1", "fake.x").unwrap_err();
    assert_eq!(err.message, "Expected start of an expression; got: +");
    assert_eq!(err.location.to_string(), "fake.x:1:1-1:2");
    assert_eq!(
        err.to_string(),
        "parse error: fake.x:1:1-1:2 Expected start of an expression; got: +"
    );

    let err = parse_expr("(,)", "fake.x").unwrap_err();
    assert_eq!(err.location.to_string(), "fake.x:1:2-1:3");
}

#[test]
fn unknown_names_fail_resolution() {
    let err = module_error("fn f() -> u32 {\n    q\n}");
    assert_eq!(err.kind, ParseErrorKind::NameResolution);
    assert_eq!(err.message, "Cannot find a definition for name: \"q\"");
}

#[test]
fn names_are_not_visible_before_their_let() {
    let err = module_error("fn f() -> u32 {\n    let x = x;\n    x\n}");
    assert_eq!(err.kind, ParseErrorKind::NameResolution);
}

#[test]
fn duplicate_module_members_are_rejected() {
    let err = module_error("fn f() {}\nfn f() {}");
    assert_eq!(err.message, "Name 'f' is defined twice in this module.");
}

#[test]
fn local_parametric_call_needs_arguments() {
    let err = module_error("fn p<N: u32>() -> u32 {\n    N\n}\nfn f() -> u32 {\n    p<u32:1>\n}");
    assert_eq!(
        err.message,
        "Expected a '(' after parametrics for function invocation."
    );
}

#[test]
fn conditionals_require_else() {
    let err = module_error("fn f(x: bool) -> u32 {\n    if x { u32:1 }\n}");
    assert_eq!(
        err.message,
        "Conditional expressions require an 'else' branch"
    );
}

#[test]
fn lex_errors_surface_as_parse_errors() {
    let err = module_error("fn f() -> u32 {\n    \"abc\n}");
    assert_eq!(err.kind, ParseErrorKind::Lex);
}

#[test]
fn builtins_that_are_not_macros_cannot_take_a_bang() {
    module_error("fn f() {\n    assert_eq!(u32:1, u32:1)\n}");
    parse_module(
        "fn f(x: bool) {\n    cover!(\"hit\", x)\n}",
        "test.x",
        "test",
    )
    .unwrap();
}

#[test]
fn extern_verilog_only_applies_to_functions() {
    let err = module_error("#[extern_verilog(\"unit\")]\nconst X = u32:1;");
    assert_eq!(err.message, "attributes must be followed by a function or proc");
}
