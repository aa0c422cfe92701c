//! Reload, caching and resolution behaviour of `DynamicModule`

use std::fs::File;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime};

use hotmod_core::{
    Capability, ConstructionFailure, DynamicModule, HostNamespace, IndexFailurePolicy, Instance,
    ModuleConfig, ModuleError, NativeDefinition, Origin,
};
use hotmod_tools::ArtifactBuilder;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

/// Write `units` to `path` and pin its mtime to a fixed offset, so change
/// detection never depends on filesystem timestamp resolution.
fn write_units(path: &Path, units: &[(&str, &str)], tick: u64) {
    let mut builder = ArtifactBuilder::new();
    for (symbol, source) in units {
        builder = builder.with_unit(*symbol, *source);
    }
    builder.write_atomic(path).unwrap();
    set_tick(path, tick);
}

fn set_tick(path: &Path, tick: u64) {
    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + tick);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

fn calc_source(value: i64) -> String {
    format!("fn create() {{ () }}\nfn calculate() {{ {} }}\n", value)
}

fn calculator() -> Capability {
    Capability::new("Calculator").requires("calculate", 0)
}

fn calculate(instance: &Instance) -> i64 {
    instance
        .invoke("calculate", vec![])
        .unwrap()
        .as_int()
        .unwrap()
}

fn setup(units: &[(&str, &str)]) -> (TempDir, std::path::PathBuf, DynamicModule) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.zip");
    write_units(&path, units, 0);
    let module = DynamicModule::open(&path);
    (dir, path, module)
}

// ============================================================================
// Change detection
// ============================================================================

#[test]
fn unchanged_artifact_reports_no_change() {
    let (_dir, _path, module) = setup(&[("calc.Calc", calc_source(42).as_str())]);
    for _ in 0..5 {
        assert!(!module.check_for_change());
    }
    assert_eq!(module.generation(), 1);
}

#[test]
fn replacement_is_detected_until_reloaded() {
    let (_dir, path, module) = setup(&[("calc.Calc", calc_source(42).as_str())]);
    let before = module.version();

    write_units(&path, &[("calc.Calc", calc_source(99).as_str())], 10);
    assert!(module.check_for_change());
    assert!(module.check_for_change());

    assert!(module.refresh());
    assert!(!module.check_for_change());
    assert!(!module.refresh());
    assert_eq!(module.generation(), 2);
    assert_ne!(module.version(), before);
}

// ============================================================================
// The calculator scenario
// ============================================================================

#[test]
fn calc_scenario_swaps_implementation() {
    let (_dir, path, module) = setup(&[("calc.Calc", calc_source(42).as_str())]);
    module.create_alias("calc.Calc", "calc");

    let v1 = module.get_instance(&calculator(), "calc").unwrap();
    assert_eq!(calculate(&v1), 42);

    write_units(&path, &[("calc.Calc", calc_source(99).as_str())], 5);
    assert!(module.check_for_change());

    let v2 = module.get_instance(&calculator(), "calc").unwrap();
    assert_eq!(calculate(&v2), 99);
    assert!(!Arc::ptr_eq(&v1, &v2));
    assert_eq!(v1.origin(), Origin::Artifact { generation: 1 });
    assert_eq!(v2.origin(), Origin::Artifact { generation: 2 });

    // Instances from a superseded generation stay usable
    assert_eq!(calculate(&v1), 42);
}

// ============================================================================
// Instance cache
// ============================================================================

#[test]
fn repeated_requests_share_one_instance() {
    let (_dir, _path, module) = setup(&[("calc.Calc", calc_source(1).as_str())]);
    let first = module.get_instance(&calculator(), "calc.Calc").unwrap();
    let second = module.get_instance(&calculator(), "calc.Calc").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn byte_identical_reload_still_yields_new_instance() {
    let source = calc_source(7);
    let (_dir, path, module) = setup(&[("calc.Calc", source.as_str())]);
    let first = module.get_instance(&calculator(), "calc.Calc").unwrap();

    set_tick(&path, 30);
    assert!(module.check_for_change());

    let second = module.get_instance(&calculator(), "calc.Calc").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(calculate(&second), 7);
}

#[test]
fn instance_state_persists_between_calls() {
    let (_dir, _path, module) = setup(&[(
        "ctr.Counter",
        "fn create() { #{ n: 0 } }\nfn next() { this.n += 1; this.n }",
    )]);
    let counter = module.get_instance(&Capability::any(), "ctr.Counter").unwrap();
    counter.invoke("next", vec![]).unwrap();
    let again = module.get_instance(&Capability::any(), "ctr.Counter").unwrap();
    assert_eq!(again.invoke("next", vec![]).unwrap().as_int().unwrap(), 2);
}

#[test]
fn type_mismatch_does_not_poison_cache() {
    let (_dir, _path, module) = setup(&[("calc.Calc", calc_source(42).as_str())]);
    let printer = Capability::new("Printer").requires("print_page", 1);

    match module.get_instance(&printer, "calc.Calc") {
        Err(ModuleError::TypeMismatch { symbol, capability }) => {
            assert_eq!(symbol, "calc.Calc");
            assert!(capability.starts_with("Printer"));
        }
        other => panic!("expected type mismatch, got {:?}", other.err()),
    }

    let instance = module.get_instance(&calculator(), "calc.Calc").unwrap();
    assert_eq!(calculate(&instance), 42);
    assert_eq!(module.status().instances, 1);
}

#[test]
fn construction_failures_carry_their_cause() {
    let (_dir, _path, module) = setup(&[
        ("bad.NoCtor", "fn calculate() { 1 }"),
        ("bad.Private", "private fn create() { () }"),
        ("bad.Raises", r#"fn create() { throw "no thanks"; }"#),
        ("bad.Syntax", "fn create( {"),
    ]);

    let cause = |symbol: &str| match module.get_instance(&Capability::any(), symbol) {
        Err(ModuleError::ConstructionRefused { cause, .. }) => cause,
        other => panic!("expected refusal for {}, got {:?}", symbol, other.err()),
    };

    assert!(matches!(cause("bad.NoCtor"), ConstructionFailure::NoDefaultConstructor(_)));
    assert!(matches!(cause("bad.Private"), ConstructionFailure::AccessDenied(_)));
    assert!(matches!(cause("bad.Raises"), ConstructionFailure::Raised(m) if m.contains("no thanks")));

    assert!(matches!(
        module.get_instance(&Capability::any(), "bad.Syntax"),
        Err(ModuleError::MalformedDefinition { .. })
    ));
    assert_eq!(module.status().instances, 0);
}

// ============================================================================
// Aliases
// ============================================================================

#[test]
fn aliases_survive_reload() {
    let (_dir, path, module) = setup(&[("calc.Calc", calc_source(1).as_str())]);
    module.create_alias("calc.Calc", "calc");

    write_units(&path, &[("calc.Calc", calc_source(2).as_str())], 1);
    assert!(module.refresh());

    assert_eq!(module.resolve_alias("calc").as_deref(), Some("calc.Calc"));
    assert!(module.has_symbol("calc"));
    let instance = module.get_instance(&calculator(), "calc").unwrap();
    assert_eq!(calculate(&instance), 2);
}

#[test]
fn alias_to_missing_symbol_is_not_found() {
    let (_dir, _path, module) = setup(&[("calc.Calc", calc_source(1).as_str())]);
    module.create_alias("calc.Gone", "gone");
    assert!(!module.has_symbol("gone"));
    assert!(matches!(
        module.resolve_symbol("gone"),
        Err(ModuleError::NotFound(name)) if name == "calc.Gone"
    ));

    assert_eq!(module.remove_alias("gone").as_deref(), Some("calc.Gone"));
    assert!(module.aliases().is_empty());
}

// ============================================================================
// Index failures
// ============================================================================

#[test]
fn deleted_artifact_yields_empty_generation() {
    let (_dir, path, module) = setup(&[("calc.Calc", calc_source(1).as_str())]);
    let held = module.get_instance(&calculator(), "calc.Calc").unwrap();

    std::fs::remove_file(&path).unwrap();
    assert!(module.check_for_change());

    assert!(!module.has_symbol("calc.Calc"));
    assert!(module.symbols().is_empty());
    assert_eq!(module.version(), "unavailable");
    assert_eq!(module.generation(), 2);
    assert!(matches!(
        module.get_instance(&calculator(), "calc.Calc"),
        Err(ModuleError::NotFound(_))
    ));
    assert!(!module.check_for_change());

    // The held instance outlives its generation
    assert_eq!(calculate(&held), 1);
}

#[test]
fn corrupt_artifact_fails_open_by_default() {
    let (_dir, path, module) = setup(&[("calc.Calc", calc_source(1).as_str())]);
    std::fs::write(&path, b"this is not a zip").unwrap();
    set_tick(&path, 3);

    assert!(module.refresh());
    assert!(module.symbols().is_empty());
    assert!(!module.check_for_change());
}

#[test]
fn keep_last_good_policy_retains_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.zip");
    write_units(&path, &[("calc.Calc", calc_source(5).as_str())], 0);

    let config = ModuleConfig {
        index_failure_policy: IndexFailurePolicy::KeepLastGood,
        ..Default::default()
    };
    let module = DynamicModule::builder(&path).config(config).build();
    let before = module.get_instance(&calculator(), "calc.Calc").unwrap();

    std::fs::write(&path, b"truncated").unwrap();
    set_tick(&path, 4);

    assert!(!module.refresh());
    assert!(!module.check_for_change());
    assert_eq!(module.generation(), 1);
    let after = module.get_instance(&calculator(), "calc.Calc").unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    write_units(&path, &[("calc.Calc", calc_source(6).as_str())], 8);
    assert!(module.refresh());
    assert_eq!(calculate(&module.get_instance(&calculator(), "calc.Calc").unwrap()), 6);
}

// ============================================================================
// Parent chain
// ============================================================================

#[test]
fn artifact_units_take_precedence_over_host() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.zip");
    write_units(
        &path,
        &[
            ("calc.Calc", calc_source(11).as_str()),
            (
                "calc.UsesHost",
                "import \"host.math\" as m;\nfn create() { () }\nfn calculate() { m::triple(5) }",
            ),
        ],
        0,
    );

    let mut math = hotmod_core::ScriptModule::new();
    math.set_native_fn("triple", |x: i64| Ok(x * 3));

    let host = Arc::new(HostNamespace::new());
    host.register(NativeDefinition::new("calc.Calc").with_method("calculate", 0));
    host.register(NativeDefinition::new("host.Clock").with_method("now", 0));
    host.register_module("host.math", math);

    let module = DynamicModule::builder(&path).parent(host).build();

    let calc = module.resolve_symbol("calc.Calc").unwrap();
    assert_eq!(calc.origin(), Origin::Artifact { generation: 1 });

    let clock = module.resolve_symbol("host.Clock").unwrap();
    assert_eq!(clock.origin(), Origin::Host);
    assert!(!module.has_symbol("host.Clock"));

    let uses_host = module.get_instance(&calculator(), "calc.UsesHost").unwrap();
    assert_eq!(calculate(&uses_host), 15);

    // Host definitions without a factory cannot be instantiated
    assert!(matches!(
        module.get_instance(&Capability::any(), "host.Clock"),
        Err(ModuleError::ConstructionRefused {
            cause: ConstructionFailure::NoDefaultConstructor(_),
            ..
        })
    ));
}

#[test]
fn host_factories_may_call_back_into_the_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.zip");
    write_units(&path, &[("calc.Calc", calc_source(11).as_str())], 0);

    let slot: Arc<OnceLock<Weak<DynamicModule>>> = Arc::new(OnceLock::new());
    let lookup = slot.clone();
    let host = Arc::new(HostNamespace::new());
    host.register(
        NativeDefinition::new("host.Facade")
            .with_method("calculate", 0)
            .with_factory(move || {
                let module = lookup.get().and_then(Weak::upgrade).ok_or("module dropped")?;
                module
                    .get_instance(&calculator(), "calc.Calc")
                    .map_err(|e| e.to_string())
            }),
    );

    let module = Arc::new(DynamicModule::builder(&path).parent(host).build());
    slot.set(Arc::downgrade(&module)).unwrap();

    let facade = module.get_instance(&calculator(), "host.Facade").unwrap();
    let calc = module.get_instance(&calculator(), "calc.Calc").unwrap();
    assert!(Arc::ptr_eq(&facade, &calc));
    assert_eq!(calculate(&facade), 11);
    assert_eq!(module.status().instances, 2);
}

#[test]
fn factory_requesting_its_own_symbol_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.zip");
    write_units(&path, &[("calc.Calc", calc_source(1).as_str())], 0);

    let slot: Arc<OnceLock<Weak<DynamicModule>>> = Arc::new(OnceLock::new());
    let lookup = slot.clone();
    let host = Arc::new(HostNamespace::new());
    host.register(NativeDefinition::new("host.Loop").with_factory(move || {
        let module = lookup.get().and_then(Weak::upgrade).ok_or("module dropped")?;
        module
            .get_instance(&Capability::new("Any"), "host.Loop")
            .map_err(|e| e.to_string())
    }));

    let module = Arc::new(DynamicModule::builder(&path).parent(host).build());
    slot.set(Arc::downgrade(&module)).unwrap();

    let err = module.get_instance(&Capability::new("Any"), "host.Loop").unwrap_err();
    match err {
        ModuleError::ConstructionRefused {
            symbol,
            cause: ConstructionFailure::Raised(message),
        } => {
            assert_eq!(symbol, "host.Loop");
            assert!(message.contains("re-entered itself"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The marker is cleared, so other symbols still construct
    assert_eq!(calculate(&module.get_instance(&calculator(), "calc.Calc").unwrap()), 1);
    assert_eq!(module.status().instances, 1);
}

#[test]
fn units_import_each_other_within_a_generation() {
    let (_dir, path, module) = setup(&[
        ("lib.base", "fn base() { 40 }"),
        (
            "calc.Calc",
            "import \"lib.base\" as b;\nfn create() { () }\nfn calculate() { b::base() + 2 }",
        ),
    ]);
    assert_eq!(calculate(&module.get_instance(&calculator(), "calc.Calc").unwrap()), 42);

    write_units(
        &path,
        &[
            ("lib.base", "fn base() { 90 }"),
            (
                "calc.Calc",
                "import \"lib.base\" as b;\nfn create() { () }\nfn calculate() { b::base() + 9 }",
            ),
        ],
        2,
    );
    assert_eq!(calculate(&module.get_instance(&calculator(), "calc.Calc").unwrap()), 99);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_readers_never_see_a_torn_generation() {
    fn units(k: i64) -> Vec<(String, String)> {
        vec![
            ("lib.stamp".to_string(), format!("fn stamp() {{ {} }}", k)),
            (
                "app.Main".to_string(),
                format!(
                    "import \"lib.stamp\" as s;\nfn create() {{ () }}\nfn consistent() {{ s::stamp() == {} }}",
                    k
                ),
            ),
        ]
    }

    fn write(path: &Path, k: i64) {
        let owned = units(k);
        let borrowed: Vec<(&str, &str)> = owned
            .iter()
            .map(|(symbol, source)| (symbol.as_str(), source.as_str()))
            .collect();
        write_units(path, &borrowed, k as u64);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("units.zip");
    write(&path, 0);
    let module = Arc::new(DynamicModule::open(&path));
    let barrier = Arc::new(std::sync::Barrier::new(5));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let module = module.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                let mut last_generation = 0;
                for _ in 0..200 {
                    let instance = module.get_instance(&Capability::any(), "app.Main").unwrap();
                    let Origin::Artifact { generation } = instance.origin() else {
                        panic!("artifact unit resolved from host");
                    };
                    assert!(generation >= last_generation);
                    last_generation = generation;
                    let consistent = instance.invoke("consistent", vec![]).unwrap();
                    assert!(consistent.as_bool().unwrap());
                }
            })
        })
        .collect();

    barrier.wait();
    for k in 1..=20 {
        write(&path, k);
        module.refresh();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(module.generation() > 1);
}
