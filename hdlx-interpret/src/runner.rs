#![forbid(unsafe_code)]

//! Runs the `#[test]`, `#[test_proc]` and `#[quickcheck]` items of a module.

use std::cell::RefCell;

use hdlx_ast::{Function, ItemId, Proc, TestAttribute};
use hdlx_core::{ConcreteType, ImportData, InterpValue, ParametricEnv};
use proptest::prelude::*;
use proptest::test_runner::{Config, RngAlgorithm, TestCaseError, TestError, TestRng, TestRunner};
use serde::Serialize;
use tracing::{debug, info_span};

use crate::cache::BytecodeCache;
use crate::channels::Channels;
use crate::error::SimulationError;
use crate::interpreter::{ExecContext, ExecState, Interpreter, InterpreterOptions};
use crate::proc_network::{ProcNetwork, ProcNetworkOptions};

/// Samples per `#[quickcheck]` function without an explicit `test_count`.
pub const DEFAULT_QUICKCHECK_CASES: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Function,
    Proc,
    QuickCheck,
}

#[derive(Clone, Debug, Serialize)]
pub struct TestResult {
    pub name: String,
    pub kind: TestKind,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl TestResult {
    fn new(name: &str, kind: TestKind, outcome: Result<(), String>, trace: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            passed: outcome.is_ok(),
            message: outcome.err(),
            trace,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TestOptions {
    /// Only run tests whose name contains this string.
    pub filter: Option<String>,
    pub max_ticks: u64,
    pub interpreter: InterpreterOptions,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            filter: None,
            max_ticks: ProcNetworkOptions::default().max_ticks,
            interpreter: InterpreterOptions::default(),
        }
    }
}

impl TestOptions {
    fn selects(&self, name: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| name.contains(f))
    }
}

/// Runs every test item of a typechecked module, in declaration order.
pub fn run_tests(data: &ImportData, module: &str, options: &TestOptions) -> Result<Vec<TestResult>, SimulationError> {
    let info = data
        .module(module)
        .ok_or_else(|| SimulationError::Setup(format!("module '{module}' has not been typechecked")))?;
    let m = info.module.clone();
    let mut results = Vec::new();
    for (item, member) in m.items() {
        let name = member.name();
        if !options.selects(name) {
            continue;
        }
        let _span = info_span!("test", %module, name).entered();
        let result = match member {
            hdlx_ast::ModuleMember::Function(f) => match &f.attribute {
                Some(TestAttribute::Test) => run_test_function(data, module, item, f, options),
                Some(TestAttribute::QuickCheck { test_count }) => {
                    run_quickcheck(data, module, item, f, test_count.unwrap_or(DEFAULT_QUICKCHECK_CASES), options)
                }
                None => continue,
            },
            hdlx_ast::ModuleMember::Proc(p) if p.is_test => run_test_proc(data, module, item, p, options),
            _ => continue,
        };
        debug!(passed = result.passed, "test finished");
        results.push(result);
    }
    Ok(results)
}

fn run_test_function(data: &ImportData, module: &str, item: ItemId, f: &Function, options: &TestOptions) -> TestResult {
    let name = f.name.node.as_str();
    let Some(instance) = data.function_instance(module, item, &ParametricEnv::new()) else {
        return TestResult::new(name, TestKind::Function, Err("test function was not typechecked".into()), Vec::new());
    };
    let mut cache = BytecodeCache::new();
    let function = match cache.function(data, module, item, &ParametricEnv::new(), instance.type_info) {
        Ok(function) => function,
        Err(e) => return TestResult::new(name, TestKind::Function, Err(e.to_string()), Vec::new()),
    };
    let mut channels = Channels::new();
    let mut spawns = Vec::new();
    let mut interp = Interpreter::new(function, Vec::new(), options.interpreter.clone());
    let state = interp.run(&mut ExecContext {
        data,
        cache: &mut cache,
        channels: &mut channels,
        spawns: &mut spawns,
    });
    let outcome = match state {
        ExecState::Completed(_) => Ok(()),
        ExecState::Failed(failure) => Err(failure.to_string()),
        ExecState::Suspended { channel } => Err(format!("blocked on {}", channels.name(channel))),
    };
    TestResult::new(name, TestKind::Function, outcome, interp.take_trace())
}

/// A test proc passes once its terminator channel carries a value. Test
/// procs whose config takes no terminator pass when the network goes quiet.
fn run_test_proc(data: &ImportData, module: &str, item: ItemId, p: &Proc, options: &TestOptions) -> TestResult {
    let name = p.name.node.as_str();
    let mut net = ProcNetwork::new(
        data,
        ProcNetworkOptions {
            max_ticks: options.max_ticks,
            interpreter: options.interpreter.clone(),
            ..ProcNetworkOptions::default()
        },
    );
    let outcome = (|| {
        let terminator = match p.config.params.len() {
            0 => None,
            1 => Some(net.create_channel("terminator", ConcreteType::bool(), None)),
            n => {
                return Err(SimulationError::Setup(format!(
                    "test proc config takes a single terminator channel; got {n} parameter(s)"
                )));
            }
        };
        let args = terminator.map(InterpValue::Channel).into_iter().collect();
        net.instantiate(module, item, &ParametricEnv::new(), args)?;
        match terminator {
            Some(t) => net.run_until(|channels| !channels.is_empty(t)),
            None => net.run_to_quiescence(),
        }
    })();
    let outcome = outcome.map(|ticks| debug!(ticks, "test proc finished")).map_err(|e| match e {
        SimulationError::Failed { failure, .. } => failure.to_string(),
        other => other.to_string(),
    });
    TestResult::new(name, TestKind::Proc, outcome, net.trace().to_vec())
}

fn run_quickcheck(
    data: &ImportData,
    module: &str,
    item: ItemId,
    f: &Function,
    cases: u64,
    options: &TestOptions,
) -> TestResult {
    let name = f.name.node.as_str();
    let fail = |message: String| TestResult::new(name, TestKind::QuickCheck, Err(message), Vec::new());
    let Some(instance) = data.function_instance(module, item, &ParametricEnv::new()) else {
        return fail("quickcheck function was not typechecked".into());
    };
    let strategy = match instance.params.iter().map(value_strategy).collect::<Result<Vec<_>, _>>() {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let cache = RefCell::new(BytecodeCache::new());
    let function = match cache
        .borrow_mut()
        .function(data, module, item, &ParametricEnv::new(), instance.type_info)
    {
        Ok(function) => function,
        Err(e) => return fail(e.to_string()),
    };
    let config = Config {
        cases: cases.min(u32::MAX as u64) as u32,
        failure_persistence: None,
        ..Config::default()
    };
    let mut runner = TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha));
    let result = runner.run(&strategy, |args| {
        let mut cache = cache.borrow_mut();
        let mut channels = Channels::new();
        let mut spawns = Vec::new();
        let shown = args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
        let mut interp = Interpreter::new(function.clone(), args, options.interpreter.clone());
        match interp.run(&mut ExecContext {
            data,
            cache: &mut cache,
            channels: &mut channels,
            spawns: &mut spawns,
        }) {
            ExecState::Completed(v) if v == InterpValue::bool(true) => Ok(()),
            ExecState::Completed(v) => Err(TestCaseError::fail(format!("returned {v} for ({shown})"))),
            ExecState::Failed(failure) => Err(TestCaseError::fail(format!("{failure} for ({shown})"))),
            ExecState::Suspended { .. } => Err(TestCaseError::fail(format!("blocked on a channel for ({shown})"))),
        }
    });
    let outcome = result.map_err(|e| match e {
        TestError::Fail(reason, _) => reason.to_string(),
        TestError::Abort(reason) => format!("aborted: {reason}"),
    });
    TestResult::new(name, TestKind::QuickCheck, outcome, Vec::new())
}

/// Uniform samples of every value of `ty`.
fn value_strategy(ty: &ConcreteType) -> Result<BoxedStrategy<InterpValue>, String> {
    match ty {
        ConcreteType::Enum(e) => {
            let values: Vec<InterpValue> = e.values.iter().map(|(_, v)| v.clone()).collect();
            if values.is_empty() {
                return Err(format!("cannot sample the empty enum {ty}"));
            }
            Ok(proptest::sample::select(values).boxed())
        }
        ConcreteType::Bits { .. } => {
            let (signed, width) = ty.bits_info().ok_or_else(|| format!("cannot sample {ty}"))?;
            Ok(any::<u128>()
                .prop_map(move |v| InterpValue::bits(signed, width as u32, v))
                .boxed())
        }
        ConcreteType::Array { element, size } => {
            let n = size.known().ok_or_else(|| format!("cannot sample {ty}"))?;
            Ok(proptest::collection::vec(value_strategy(element)?, n as usize)
                .prop_map(InterpValue::Array)
                .boxed())
        }
        ConcreteType::Tuple(items) => {
            let items = items.iter().map(value_strategy).collect::<Result<Vec<_>, _>>()?;
            Ok(items.prop_map(InterpValue::Tuple).boxed())
        }
        ConcreteType::Struct(s) => {
            let members = s
                .members
                .iter()
                .map(|(_, t)| value_strategy(t))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(members.prop_map(InterpValue::Tuple).boxed())
        }
        ConcreteType::Token => Ok(Just(InterpValue::Token).boxed()),
        other => Err(format!("cannot sample values of type {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;

    #[test]
    fn bit_samples_stay_within_their_width() {
        let strategy = value_strategy(&ConcreteType::bits(true, 5)).unwrap();
        let mut runner = TestRunner::deterministic();
        for _ in 0..64 {
            let v = strategy.new_tree(&mut runner).unwrap().current();
            let (signed, width, value) = v.as_bits().unwrap();
            assert!(signed);
            assert_eq!(width, 5);
            assert!(value < 32);
        }
    }

    #[test]
    fn channels_cannot_be_sampled() {
        let ty = ConcreteType::Channel {
            payload: Box::new(ConcreteType::ubits(8)),
            direction: hdlx_ast::ChannelDirection::In,
        };
        assert!(value_strategy(&ty).is_err());
    }

    #[test]
    fn filter_matches_substrings() {
        let options = TestOptions {
            filter: Some("add".into()),
            ..TestOptions::default()
        };
        assert!(options.selects("test_add_wraps"));
        assert!(!options.selects("test_sub"));
    }
}
