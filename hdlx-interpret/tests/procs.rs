use hdlx_core::{ConcreteType, ImportData, InMemoryResolver, InterpValue, ParametricEnv, typecheck_text};
use hdlx_interpret::{ProcNetwork, ProcNetworkOptions, SimulationError, TestKind, TestOptions, run_tests};

fn check(src: &str) -> ImportData {
    let mut data = ImportData::new(InMemoryResolver::new());
    typecheck_text(&mut data, src, "test.x", "test").unwrap_or_else(|e| panic!("{e}"));
    data
}

const COUNTER: &str = "proc Counter {
    out_ch: chan<u32> out;
    config(out_ch: chan<u32> out) {
        (out_ch,)
    }
    init {
        u32:0
    }
    next(st: u32) {
        send(join(), out_ch, st);
        st + u32:1
    }
}
";

const TESTER: &str = "#[test_proc]
proc Tester {
    c: chan<u32> in;
    terminator: chan<bool> out;
    config(terminator: chan<bool> out) {
        let (p, c) = chan<u32, 2>;
        spawn Counter(p);
        (c, terminator)
    }
    init {
        u32:0
    }
    next(count: u32) {
        let (tok, v) = recv(join(), c);
        assert_eq(v, count);
        send_if(tok, terminator, count == u32:4, true);
        count + u32:1
    }
}
";

#[test]
fn test_proc_passes_once_the_terminator_fires() {
    let data = check(&format!("{COUNTER}{TESTER}"));
    let results = run_tests(&data, "test", &TestOptions::default()).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.name, "Tester");
    assert_eq!(r.kind, TestKind::Proc);
    assert!(r.passed, "{:?}", r.message);
}

#[test]
fn network_delivers_values_in_order() {
    let data = check(COUNTER);
    let module = data.module("test").expect("module").module.clone();
    let (item, _) = module.find_member("Counter").expect("Counter");

    let mut net = ProcNetwork::new(&data, ProcNetworkOptions::default());
    let out = net.create_channel("out", ConcreteType::ubits(32), Some(3));
    net.instantiate("test", item, &ParametricEnv::new(), vec![InterpValue::Channel(out)])
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(net.proc_names().collect::<Vec<_>>(), vec!["Counter"]);

    net.run_until(|channels| channels.len(out) == 3).unwrap_or_else(|e| panic!("{e}"));
    let received: Vec<InterpValue> = (0..3)
        .map(|_| net.channels_mut().pop(out).expect("pop").expect("value"))
        .collect();
    assert_eq!(received, vec![InterpValue::u32(0), InterpValue::u32(1), InterpValue::u32(2)]);
}

#[test]
fn full_channel_without_a_reader_deadlocks() {
    let data = check(COUNTER);
    let module = data.module("test").expect("module").module.clone();
    let (item, _) = module.find_member("Counter").expect("Counter");

    let mut net = ProcNetwork::new(&data, ProcNetworkOptions::default());
    let out = net.create_channel("out", ConcreteType::ubits(32), Some(1));
    net.instantiate("test", item, &ParametricEnv::new(), vec![InterpValue::Channel(out)])
        .unwrap_or_else(|e| panic!("{e}"));
    let err = net.run_until(|_| false).unwrap_err();
    let SimulationError::Deadlock { blocked, .. } = err else {
        panic!("expected a deadlock, got {err}");
    };
    assert!(blocked.contains("Counter on out"), "{blocked}");
}

#[test]
fn receiver_without_a_sender_fails_its_test() {
    let src = "#[test_proc]
proc Stuck {
    c: chan<u32> in;
    terminator: chan<bool> out;
    config(terminator: chan<bool> out) {
        let (p, c) = chan<u32, 1>;
        (c, terminator)
    }
    init {
        ()
    }
    next(st: ()) {
        let (tok, v) = recv(join(), c);
        send(tok, terminator, true);
        ()
    }
}
";
    let data = check(src);
    let results = run_tests(&data, "test", &TestOptions::default()).unwrap_or_else(|e| panic!("{e}"));
    assert!(!results[0].passed);
    let message = results[0].message.as_deref().unwrap_or_default();
    assert!(message.contains("deadlocked"), "{message}");
}

#[test]
fn tick_limit_bounds_endless_networks() {
    let data = check(COUNTER);
    let module = data.module("test").expect("module").module.clone();
    let (item, _) = module.find_member("Counter").expect("Counter");

    let options = ProcNetworkOptions {
        max_ticks: 10,
        ..ProcNetworkOptions::default()
    };
    let mut net = ProcNetwork::new(&data, options);
    let out = net.create_channel("out", ConcreteType::ubits(32), None);
    net.instantiate("test", item, &ParametricEnv::new(), vec![InterpValue::Channel(out)])
        .unwrap_or_else(|e| panic!("{e}"));
    let err = net.run_until(|_| false).unwrap_err();
    assert!(matches!(err, SimulationError::TickLimit { max_ticks: 10 }), "{err}");
    assert_eq!(net.ticks(), 10);
}

#[test]
fn test_functions_and_quickchecks_report_per_item() {
    let src = "#[test]
fn passes() {
    assert_eq(u8:1 + u8:1, u8:2)
}
#[test]
fn fails() {
    assert_eq(u8:1, u8:2)
}
#[quickcheck(test_count=50)]
fn double_is_even(x: u8) -> bool {
    (((x as u9) * u9:2) & u9:1) == u9:0
}
#[quickcheck(test_count=50)]
fn everything_is_small(x: u8) -> bool {
    x < u8:4
}
";
    let data = check(src);
    let results = run_tests(&data, "test", &TestOptions::default()).unwrap_or_else(|e| panic!("{e}"));
    let outcome: Vec<(&str, TestKind, bool)> = results.iter().map(|r| (r.name.as_str(), r.kind, r.passed)).collect();
    assert_eq!(
        outcome,
        vec![
            ("passes", TestKind::Function, true),
            ("fails", TestKind::Function, false),
            ("double_is_even", TestKind::QuickCheck, true),
            ("everything_is_small", TestKind::QuickCheck, false),
        ]
    );
    let message = results[1].message.as_deref().unwrap_or_default();
    assert!(message.contains("was not equal"), "{message}");
}

#[test]
fn filter_selects_tests_by_name() {
    let src = "#[test]\nfn alpha() {\n    ()\n}\n#[test]\nfn beta() {\n    ()\n}\n";
    let data = check(src);
    let options = TestOptions {
        filter: Some("bet".into()),
        ..TestOptions::default()
    };
    let results = run_tests(&data, "test", &options).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "beta");
}
