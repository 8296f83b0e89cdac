// tests/ipopt_scenario.rs

//! End-to-end checks against the recipes shipped in `recipes/`.

mod common;

use common::{MockBuild, Roots, options};
use cookbook::kitchen::{ArgContext, DepInfo};
use cookbook::recipe::BuildSystemKind;
use cookbook::spec::{ConcreteGraph, DepType, VariantValue};
use cookbook::{AbstractSpec, Concretizer, InstallState, Kitchen, Registry, schedule};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn shipped() -> Registry {
    Registry::new(vec![
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("recipes"),
    ])
}

fn concretize(registry: &Registry, request: &str) -> ConcreteGraph {
    Concretizer::new(registry, options())
        .concretize(&AbstractSpec::parse(request).unwrap())
        .unwrap()
}

/// Configure arguments of the root, with every dependency under `/opt/<name>`
fn root_args(registry: &Registry, graph: &ConcreteGraph) -> Vec<String> {
    let root = graph.root_spec();
    let deps: BTreeMap<String, DepInfo> = root
        .dependencies
        .iter()
        .map(|(name, link)| {
            let info = DepInfo {
                version: graph.node(link.node).version.clone(),
                prefix: Path::new("/opt").join(name),
                libraries: registry.load(name).unwrap().libraries.clone(),
            };
            (name.clone(), info)
        })
        .collect();
    let recipe = registry.load(&root.name).unwrap();
    ArgContext {
        spec: root,
        recipe: &recipe,
        prefix: Path::new("/opt/ipopt"),
        jobs: 1,
        deps: &deps,
    }
    .resolve()
    .unwrap()
}

#[test]
fn test_shipped_recipes_all_load() {
    let report = shipped().preload().unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.loaded >= 13);
}

#[test]
fn test_ipopt_with_coinhsl() {
    let registry = shipped();
    let graph = concretize(&registry, "ipopt+coinhsl");

    let ipopt = graph.root_spec();
    assert_eq!(ipopt.version.to_string(), "3.12.10");
    assert!(!ipopt.parallel);
    assert_eq!(ipopt.variants["coinhsl"], VariantValue::Bool(true));
    assert!(graph.get("coinhsl").is_some());
    assert!(graph.get("metis").is_none());

    let mumps = graph.get("mumps").unwrap();
    assert_eq!(mumps.variants["double"], VariantValue::Bool(true));
    assert_eq!(mumps.variants["mpi"], VariantValue::Bool(false));
    assert!(graph.get("openmpi").is_none());

    let pkgconfig = &ipopt.dependencies["pkgconfig"];
    assert!(pkgconfig.types.contains(DepType::Build));
    assert!(!pkgconfig.types.contains(DepType::Link));

    let args = root_args(&registry, &graph);
    assert!(args.contains(&"--with-hsl-lib=-L/opt/coinhsl/lib -lcoinhsl".to_string()));
    assert!(args.contains(&"--with-hsl-incdir=/opt/coinhsl/include".to_string()));
    assert!(args.contains(
        &"--with-mumps-lib=-L/opt/mumps/lib -ldmumps -lmumps_common -lpord -lmpiseq".to_string()
    ));
    assert!(args.contains(&"--disable-debug".to_string()));
}

#[test]
fn test_plain_ipopt_omits_coinhsl() {
    let registry = shipped();
    let graph = concretize(&registry, "ipopt");

    assert_eq!(graph.len(), 5);
    assert!(graph.get("coinhsl").is_none());
    assert!(!graph.root_spec().dependencies.contains_key("coinhsl"));

    let args = root_args(&registry, &graph);
    assert!(args.iter().all(|a| !a.contains("hsl")));
    assert!(args.iter().all(|a| !a.contains("metis")));
    assert!(args.contains(&"--with-blas-lib=-L/opt/blas/lib -lblas".to_string()));
}

#[test]
fn test_ipopt_with_metis_needs_new_enough_metis() {
    let registry = shipped();
    let graph = concretize(&registry, "ipopt+metis ^metis@4");
    assert_eq!(graph.get("metis").unwrap().version.to_string(), "4.0.3");

    let args = root_args(&registry, &graph);
    assert!(args.contains(&"--with-metis-incdir=/opt/metis/include".to_string()));
}

#[test]
fn test_aspcud_points_at_clingo_tools() {
    let registry = shipped();
    let graph = concretize(&registry, "aspcud");
    for name in ["boost", "cmake", "re2c", "clingo"] {
        assert!(graph.get(name).is_some(), "missing {}", name);
    }
    let aspcud = graph.root_spec();
    assert_eq!(aspcud.build_system, BuildSystemKind::CMake);

    let args = root_args(&registry, &graph);
    assert!(args.contains(&"-DASPCUD_GRINGO_PATH=/opt/clingo/bin/gringo".to_string()));
    assert!(args.contains(&"-DASPCUD_CLASP_PATH=/opt/clingo/bin/clasp".to_string()));
}

#[test]
fn test_ipopt_builds_in_dependency_order() {
    let roots = Roots::new();
    let registry = shipped();
    let state = InstallState::open_in_memory().unwrap();
    let graph = concretize(&registry, "ipopt+coinhsl");
    let plan = schedule(graph, &state).unwrap();

    let mock = Arc::new(MockBuild::new());
    let report = Kitchen::new(roots.kitchen_config(), &registry, &state)
        .with_adapter(BuildSystemKind::Autotools, mock.clone())
        .with_adapter(BuildSystemKind::CMake, mock.clone())
        .with_adapter(BuildSystemKind::Custom, mock.clone())
        .execute(&plan, 4)
        .unwrap();

    assert!(report.success(), "{}", report);
    assert_eq!(report.installed(), 6);

    let built = mock.built();
    assert_eq!(built.last().map(String::as_str), Some("ipopt"));
    let position = |name: &str| built.iter().position(|n| n == name).unwrap();
    assert!(position("blas") < position("lapack"));
    assert!(position("blas") < position("mumps"));

    let coinhsl_prefix = report.outcome("coinhsl").unwrap().prefix().unwrap().clone();
    let expected = format!("--with-hsl-incdir={}", coinhsl_prefix.join("include").display());
    assert!(mock.args_of("ipopt").contains(&expected));
}
