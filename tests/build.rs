// tests/build.rs

//! Integration tests for scheduling and executing build plans.
//!
//! All builds go through a mock adapter, so these never run a compiler.

mod common;

use common::{CHECKSUM, MockBuild, Roots, options, recipe, registry, serial, simple};
use cookbook::kitchen::{InstallLock, SkipReason};
use cookbook::progress::SilentProgress;
use cookbook::recipe::BuildSystemKind;
use cookbook::scheduler::NodeStatus;
use cookbook::{
    AbstractSpec, BuildPlan, Concretizer, Error, InstallState, InstallStatus, Kitchen,
    NodeOutcome, Registry, schedule,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn plan(registry: &Registry, state: &InstallState, request: &str) -> BuildPlan {
    let graph = Concretizer::new(registry, options())
        .with_install_state(state)
        .concretize(&AbstractSpec::parse(request).unwrap())
        .unwrap();
    schedule(graph, state).unwrap()
}

fn chain() -> Registry {
    registry(vec![
        simple("app", &["1.0"], &["mid"]),
        simple("mid", &["1.0"], &["base"]),
        simple("base", &["1.0"], &[]),
    ])
}

#[test]
fn test_dependencies_are_built_first() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");
    assert_eq!(plan.pending().len(), 3);

    let mock = Arc::new(MockBuild::new());
    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 4)
        .unwrap();

    assert!(report.success());
    assert_eq!(report.installed(), 3);
    assert_eq!(mock.built(), vec!["base", "mid", "app"]);

    for spec in plan.graph().nodes() {
        let record = state.lookup(&spec.hash).unwrap().unwrap();
        assert_eq!(record.status, InstallStatus::Installed);
        assert!(record.prefix.join("lib").is_dir());
        assert!(record.prefix.starts_with(roots.install_root()));
    }
}

#[test]
fn test_failure_skips_only_dependents() {
    let roots = Roots::new();
    let registry = registry(vec![
        simple("app", &["1.0"], &["left", "right"]),
        simple("left", &["1.0"], &["broken"]),
        simple("right", &["1.0"], &[]),
        simple("broken", &["1.0"], &[]),
    ]);
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let mock = Arc::new(MockBuild::failing(&["broken"]));
    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 2)
        .unwrap();

    assert!(!report.success());
    assert_eq!(report.installed(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 2);
    assert!(report.outcome("right").unwrap().is_success());

    match report.outcome("broken").unwrap() {
        NodeOutcome::Failed {
            error,
            exit_code,
            log_excerpt,
            attempts,
        } => {
            assert_eq!(error, "configure step failed with exit code 2");
            assert_eq!(*exit_code, Some(2));
            assert_eq!(log_excerpt.as_deref(), Some("error: mock failure"));
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    for name in ["left", "app"] {
        assert!(matches!(
            report.outcome(name).unwrap(),
            NodeOutcome::Skipped {
                reason: SkipReason::DependencyFailed(failed)
            } if failed == "broken"
        ));
    }

    let broken = plan.graph().get("broken").unwrap();
    let record = state.lookup(&broken.hash).unwrap().unwrap();
    assert_eq!(record.status, InstallStatus::Failed);
    assert!(!record.prefix.exists());
}

#[test]
fn test_failure_before_first_attempt_is_recorded() {
    let roots = Roots::new();
    let recipes = roots.dir.path().join("recipes");
    std::fs::create_dir_all(&recipes).unwrap();
    let file = recipes.join("solo.toml");
    std::fs::write(
        &file,
        format!(
            "[package]\nname = \"solo\"\n\n[[versions]]\nid = \"1.0\"\nchecksum = \"{}\"\n",
            CHECKSUM
        ),
    )
    .unwrap();

    let registry = Registry::new(vec![recipes]);
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "solo");

    // The recipe disappears between planning and cooking
    std::fs::remove_file(&file).unwrap();
    registry.reload();

    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, Arc::new(MockBuild::new()))
        .execute(&plan, 1)
        .unwrap();
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.outcome("solo").unwrap(),
        NodeOutcome::Failed { attempts: 0, .. }
    ));

    let solo = plan.graph().root_spec();
    let record = state.lookup(&solo.hash).unwrap().unwrap();
    assert_eq!(record.status, InstallStatus::Failed);
    assert!(record.error.unwrap().contains("solo"));
}

#[test]
fn test_second_run_reuses_installed_nodes() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();

    let first = plan(&registry, &state, "app");
    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, Arc::new(MockBuild::new()))
        .execute(&first, 2)
        .unwrap();
    assert_eq!(report.installed(), 3);

    let second = plan(&registry, &state, "app");
    assert!(second.pending().is_empty());
    for &id in second.order() {
        assert!(matches!(second.status(id), NodeStatus::Satisfied { .. }));
    }

    let mock = Arc::new(MockBuild::new());
    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&second, 2)
        .unwrap();
    assert!(report.success());
    assert_eq!(report.reused(), 3);
    assert!(mock.built().is_empty());
}

#[test]
fn test_missing_prefix_is_rebuilt() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();

    let first = plan(&registry, &state, "app");
    Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, Arc::new(MockBuild::new()))
        .execute(&first, 2)
        .unwrap();

    let base = first.graph().get("base").unwrap();
    let prefix = state.installed_prefix(&base.hash).unwrap().unwrap();
    std::fs::remove_dir_all(&prefix).unwrap();

    let second = plan(&registry, &state, "app");
    let pending: Vec<&str> = second
        .pending()
        .into_iter()
        .map(|id| second.graph().node(id).name.as_str())
        .collect();
    assert_eq!(pending, vec!["base"]);
}

#[test]
fn test_serial_package_builds_alone() {
    let roots = Roots::new();
    let registry = registry(vec![
        simple("app", &["1.0"], &["a", "b", "solo"]),
        simple("a", &["1.0"], &[]),
        simple("b", &["1.0"], &[]),
        serial("solo", &[]),
    ]);
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let mock = Arc::new(MockBuild::new().with_delay(Duration::from_millis(100)));
    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 4)
        .unwrap();

    assert!(report.success());
    assert!(!mock.serial_overlap.load(Ordering::SeqCst));
    assert!(mock.peak.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_fail_fast_stops_dispatching() {
    let roots = Roots::new();
    let registry = registry(vec![
        simple("app", &["1.0"], &["broken", "other"]),
        simple("broken", &["1.0"], &[]),
        simple("other", &["1.0"], &[]),
    ]);
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let mut config = roots.kitchen_config();
    config.fail_fast = true;
    let mock = Arc::new(MockBuild::failing(&["broken"]));
    let report = Kitchen::new(config, &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 1)
        .unwrap();

    assert!(mock.built().is_empty());
    assert!(matches!(
        report.outcome("other").unwrap(),
        NodeOutcome::Skipped {
            reason: SkipReason::FailFast
        }
    ));
    assert!(matches!(
        report.outcome("app").unwrap(),
        NodeOutcome::Skipped {
            reason: SkipReason::DependencyFailed(_)
        }
    ));
}

#[test]
fn test_retries_recover_flaky_build() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let mut config = roots.kitchen_config();
    config.retries = 2;
    let mock = Arc::new(MockBuild::new());
    mock.flaky.lock().unwrap().insert("mid".to_string(), 1);

    let report = Kitchen::new(config, &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 2)
        .unwrap();

    assert!(report.success());
    assert_eq!(mock.attempts_of("mid"), 2);
    assert!(matches!(
        report.outcome("mid").unwrap(),
        NodeOutcome::Installed { attempts: 2, .. }
    ));
}

#[test]
fn test_retries_are_bounded() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let mut config = roots.kitchen_config();
    config.retries = 1;
    let mock = Arc::new(MockBuild::failing(&["base"]));
    let report = Kitchen::new(config, &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 2)
        .unwrap();

    assert_eq!(mock.attempts_of("base"), 2);
    assert!(matches!(
        report.outcome("base").unwrap(),
        NodeOutcome::Failed { attempts: 2, .. }
    ));
    assert_eq!(report.skipped(), 2);
}

const DIRTYING: &str = r#"
[package]
name = "dirty"
build_system = "custom"

[[versions]]
id = "1.0"
checksum = "35e5c663a25912e4bdc94f168e827ed2"

[build]
install = 'if [ -e marker ]; then exit 9; fi; touch marker; exit 1'
"#;

#[test]
fn test_custom_retry_starts_from_clean_sources() {
    let roots = Roots::new();
    let sources = roots.dir.path().join("sources").join("dirty-1.0");
    std::fs::create_dir_all(&sources).unwrap();
    std::fs::write(sources.join("README"), "hello\n").unwrap();

    let registry = registry(vec![recipe(DIRTYING)]);
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "dirty");

    let mut config = roots.kitchen_config();
    config.retries = 1;
    let report = Kitchen::new(config, &registry, &state)
        .execute(&plan, 1)
        .unwrap();

    // The second attempt would exit 9 if it saw the first one's marker
    assert!(matches!(
        report.outcome("dirty").unwrap(),
        NodeOutcome::Failed {
            exit_code: Some(1),
            attempts: 2,
            ..
        }
    ));
    assert!(!sources.join("marker").exists());
    assert!(sources.join("README").is_file());
}

#[test]
fn test_cancel_lets_running_build_finish() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let kitchen = Kitchen::new(roots.kitchen_config(), &registry, &state);
    let mock = Arc::new(MockBuild {
        cancel_on: Some(("base".to_string(), kitchen.cancel_handle())),
        ..MockBuild::default()
    });
    let report = kitchen
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .execute(&plan, 1)
        .unwrap();

    assert!(report.outcome("base").unwrap().is_success());
    for name in ["mid", "app"] {
        assert!(matches!(
            report.outcome(name).unwrap(),
            NodeOutcome::Skipped {
                reason: SkipReason::Cancelled
            }
        ));
    }
}

#[test]
fn test_cancel_before_start_builds_nothing() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let mock = Arc::new(MockBuild::new());
    let kitchen = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone());
    kitchen.cancel();
    let err = kitchen.execute(&plan, 2).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(mock.built().is_empty());
    assert!(state.list().unwrap().is_empty());
}

#[test]
fn test_locked_install_root_is_refused() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let _held = InstallLock::try_acquire(&roots.install_root()).unwrap();
    let result = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, Arc::new(MockBuild::new()))
        .execute(&plan, 2);
    assert!(result.is_err());
}

#[test]
fn test_progress_sees_every_node() {
    let roots = Roots::new();
    let registry = chain();
    let state = InstallState::open_in_memory().unwrap();
    let plan = plan(&registry, &state, "app");

    let progress = Arc::new(SilentProgress::new());
    Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, Arc::new(MockBuild::failing(&["mid"])))
        .with_progress(progress.clone())
        .execute(&plan, 2)
        .unwrap();

    assert_eq!(progress.total(), 3);
    assert_eq!(progress.finished_count(), 3);
    assert!(progress.is_done());
}
