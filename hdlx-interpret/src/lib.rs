#![forbid(unsafe_code)]

//! Bytecode emission, the stack interpreter, channel-connected proc
//! networks, and the module test runner.

mod bytecode;
mod cache;
mod channels;
mod emit;
mod error;
mod interpreter;
mod proc_network;
mod runner;

use std::sync::Arc;

use hdlx_core::{ImportData, InterpValue, ParametricEnv};

pub use bytecode::{
    Bytecode, BytecodeData, BytecodeFunction, ChannelDesc, FailData, InvocationDesc, MatchArmItem, Op, SpawnDesc,
    TraceData,
};
pub use cache::BytecodeCache;
pub use channels::Channels;
pub use emit::{emit, emit_expression, emit_proc_next};
pub use error::{EmitError, RuntimeFailure, SimulationError};
pub use interpreter::{ExecContext, ExecState, Interpreter, InterpreterOptions, SpawnRequest};
pub use proc_network::{ProcNetwork, ProcNetworkOptions};
pub use runner::{DEFAULT_QUICKCHECK_CASES, TestKind, TestOptions, TestResult, run_tests};

/// Emits function `function_name` of a typechecked module under `env`.
pub fn bytecode_for(
    data: &ImportData,
    module: &str,
    function_name: &str,
    env: &ParametricEnv,
) -> Result<BytecodeFunction, EmitError> {
    let info = data
        .module(module)
        .ok_or_else(|| emit::detached(format!("module '{module}' has not been typechecked"), module))?;
    let (item, member) = info
        .module
        .find_member(function_name)
        .ok_or_else(|| emit::detached(format!("no member named '{function_name}' in '{module}'"), module))?;
    let hdlx_ast::ModuleMember::Function(f) = member else {
        return Err(emit::detached(format!("'{function_name}' is not a function"), module));
    };
    let instance = data.function_instance(module, item, env).ok_or_else(|| {
        emit::detached(format!("'{function_name}' has not been typechecked for {env}"), module)
    })?;
    emit(data, instance.type_info, f, env)
}

/// Runs a function that uses no channels to completion.
pub fn run(
    data: &ImportData,
    function: Arc<BytecodeFunction>,
    args: Vec<InterpValue>,
) -> Result<InterpValue, RuntimeFailure> {
    let mut cache = BytecodeCache::new();
    let mut channels = Channels::new();
    let mut spawns = Vec::new();
    let mut interp = Interpreter::new(function.clone(), args, InterpreterOptions::default());
    match interp.run(&mut ExecContext {
        data,
        cache: &mut cache,
        channels: &mut channels,
        spawns: &mut spawns,
    }) {
        ExecState::Completed(v) => Ok(v),
        ExecState::Failed(failure) => Err(failure),
        ExecState::Suspended { channel } => Err(RuntimeFailure::new(
            "blocked",
            format!("'{}' blocked on {} outside of a proc network", function.name, channels.name(channel)),
            hdlx_ast::span(0, 0),
            &function.source,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdlx_core::{InMemoryResolver, typecheck_text};

    fn checked(src: &str) -> ImportData {
        let mut data = ImportData::new(InMemoryResolver::new());
        typecheck_text(&mut data, src, "test.x", "test").expect("typecheck");
        data
    }

    fn call(data: &ImportData, name: &str, args: Vec<InterpValue>) -> Result<InterpValue, RuntimeFailure> {
        let f = bytecode_for(data, "test", name, &ParametricEnv::new()).expect("emit");
        run(data, Arc::new(f), args)
    }

    #[test]
    fn arithmetic_wraps_to_the_operand_width() {
        let data = checked("fn f(x: u8) -> u8 { x + u8:200 }\n");
        assert_eq!(call(&data, "f", vec![InterpValue::ubits(8, 100)]).unwrap(), InterpValue::ubits(8, 44));
    }

    #[test]
    fn let_bindings_and_tuples_destructure() {
        let data = checked("fn f(x: u8) -> u8 { let (a, b) = (x, x + u8:1); a * b }\n");
        assert_eq!(call(&data, "f", vec![InterpValue::ubits(8, 3)]).unwrap(), InterpValue::ubits(8, 12));
    }

    #[test]
    fn for_loops_thread_the_accumulator() {
        let data = checked("fn f() -> u32 { for (i, acc): (u32, u32) in range(u32:0, u32:5) { acc + i }(u32:0) }\n");
        assert_eq!(call(&data, "f", Vec::new()).unwrap(), InterpValue::u32(10));
    }

    #[test]
    fn calls_between_functions() {
        let data = checked("fn sq(x: u32) -> u32 { x * x }\nfn f(x: u32) -> u32 { sq(x) + u32:1 }\n");
        assert_eq!(call(&data, "f", vec![InterpValue::u32(6)]).unwrap(), InterpValue::u32(37));
    }

    #[test]
    fn failing_assertion_reports_its_label() {
        let data = checked("fn f(x: u32) -> u32 { assert_eq(x, u32:1); x }\n");
        let failure = call(&data, "f", vec![InterpValue::u32(2)]).unwrap_err();
        assert_eq!(failure.label, "assert_eq");
        assert!(failure.message.contains("was not equal"), "{}", failure.message);
    }

    #[test]
    fn unknown_function_is_an_emit_error() {
        let data = checked("fn f() -> u32 { u32:1 }\n");
        let err = bytecode_for(&data, "test", "g", &ParametricEnv::new()).unwrap_err();
        assert!(err.message.contains("no member named 'g'"), "{}", err.message);
    }
}
