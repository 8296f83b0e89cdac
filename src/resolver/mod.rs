// src/resolver/mod.rs

//! Concretizer: turn an abstract spec into a concrete spec graph
//!
//! The search decides nodes in discovery order (breadth first from the
//! root, dependencies in recipe declaration order). Deciding a node binds
//! its version, then each declared variant, then its compiler. Every binding
//! with alternatives pushes a choice point holding a snapshot of the search
//! state; a failure restores the most recent snapshot and tries the next
//! alternative.
//!
//! Once a node is fully bound its conflicts are checked and the dependency
//! edges whose `when` holds are added, constraining (or creating) the target
//! nodes. A target that is already decided must satisfy the new constraint
//! as bound, which is how diamonds unify onto a single node.

mod constraint;

pub use constraint::ConstraintSet;

use crate::error::{Error, Result};
use crate::recipe::{DependencyDecl, PackageRecipe, Registry};
use crate::spec::concrete::NodeDraft;
use crate::spec::{
    AbstractSpec, Clause, Compiler, ConcreteGraph, DepTypes, PredicateContext, VariantValue,
};
use crate::state::InstallState;
use crate::version::Version;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Default bound on the number of backtracks per request
pub const DEFAULT_MAX_BACKTRACKS: usize = 10_000;

/// Knobs for a concretization run
#[derive(Debug, Clone)]
pub struct ConcretizerOptions {
    /// Platform for nodes that neither pin one nor inherit one
    pub platform: String,
    /// Available compilers, preferred first
    pub compilers: Vec<Compiler>,
    /// Prefer versions that are already installed
    pub reuse: bool,
    pub max_backtracks: usize,
}

impl Default for ConcretizerOptions {
    fn default() -> Self {
        Self {
            platform: crate::config::host_platform(),
            compilers: Vec::new(),
            reuse: true,
            max_backtracks: DEFAULT_MAX_BACKTRACKS,
        }
    }
}

/// Resolves abstract specs against a registry
pub struct Concretizer<'a> {
    registry: &'a Registry,
    state: Option<&'a InstallState>,
    options: ConcretizerOptions,
}

impl<'a> Concretizer<'a> {
    pub fn new(registry: &'a Registry, options: ConcretizerOptions) -> Self {
        Self {
            registry,
            state: None,
            options,
        }
    }

    /// Consult an install state for version reuse
    pub fn with_install_state(mut self, state: &'a InstallState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn options(&self) -> &ConcretizerOptions {
        &self.options
    }

    /// Concretize a request into a graph, or explain why it cannot be done
    pub fn concretize(&self, request: &AbstractSpec) -> Result<ConcreteGraph> {
        info!("Concretizing {}", request);
        if self.options.compilers.is_empty() {
            return Err(Error::ConfigError("no compilers configured".to_string()));
        }
        self.registry.check_acyclic(&request.name)?;

        let mut run = Run {
            concretizer: self,
            root: request.name.clone(),
            requested: request
                .dependencies
                .iter()
                .map(|d| (d.name.clone(), d.clause()))
                .collect(),
            stack: Vec::new(),
            deepest: None,
            backtracks: 0,
        };

        let mut search = Search::default();
        run.add_node(&mut search, &request.name, None, &request.clause(), REQUESTED)?;

        loop {
            let step = match run.next_slot(&search) {
                None => match run.check_complete(&search) {
                    Ok(()) => return run.finish(search),
                    Err(e) => Err(e),
                },
                Some((name, slot)) => match run.candidates(&search, &name, slot) {
                    Ok(mut candidates) => match candidates.pop_front() {
                        Some(first) => {
                            if !candidates.is_empty() {
                                run.stack.push(ChoicePoint {
                                    snapshot: search.clone(),
                                    node: name.clone(),
                                    remaining: candidates,
                                });
                            }
                            run.apply(&mut search, &name, first)
                        }
                        None => Err(run.unsatisfiable(&search, &name, "no candidate remains")),
                    },
                    Err(e) => Err(e),
                },
            };

            if let Err(e) = step {
                if !recoverable(&e) {
                    return Err(e);
                }
                run.record_failure(&search, e);
                search = run.backtrack()?;
            }
        }
    }
}

const REQUESTED: &str = "requested";

/// Failures that another choice might avoid
fn recoverable(err: &Error) -> bool {
    matches!(err, Error::Unsatisfiable { .. } | Error::Conflict { .. })
}

/// Search-time state of one package
#[derive(Debug, Clone)]
struct Node {
    recipe: Arc<PackageRecipe>,
    constraints: ConstraintSet,
    introducer: Option<String>,
    platform: String,
    version: Option<Version>,
    variants: BTreeMap<String, VariantValue>,
    compiler: Option<Compiler>,
    deps: BTreeMap<String, DepTypes>,
    decided: bool,
}

impl Node {
    fn fully_bound(&self) -> bool {
        self.version.is_some()
            && self.compiler.is_some()
            && self
                .recipe
                .variants
                .iter()
                .all(|v| self.variants.contains_key(&v.name))
    }
}

impl PredicateContext for Node {
    fn variant(&self, name: &str) -> Option<&VariantValue> {
        self.variants.get(name)
    }

    fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    fn platform(&self) -> Option<&str> {
        Some(&self.platform)
    }

    fn compiler(&self) -> Option<&Compiler> {
        self.compiler.as_ref()
    }
}

#[derive(Debug, Clone, Default)]
struct Search {
    nodes: BTreeMap<String, Node>,
    /// Discovery order
    order: Vec<String>,
    /// Number of bindings made so far, the measure of search progress
    bound: usize,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Version,
    Variant(usize),
    Compiler,
}

#[derive(Debug, Clone)]
enum Choice {
    Version(Version),
    Variant(String, VariantValue),
    Compiler(Compiler),
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::Version(v) => write!(f, "@{}", v),
            Choice::Variant(name, value) => write!(f, "{}", value.render(name).trim()),
            Choice::Compiler(c) => write!(f, "%{}", c),
        }
    }
}

struct ChoicePoint {
    snapshot: Search,
    node: String,
    remaining: VecDeque<Choice>,
}

/// One concretization request in flight
struct Run<'c, 'a> {
    concretizer: &'c Concretizer<'a>,
    root: String,
    /// `^dep` clauses from the request
    requested: BTreeMap<String, Clause>,
    stack: Vec<ChoicePoint>,
    /// Failure seen at the greatest search progress
    deepest: Option<(usize, Error)>,
    backtracks: usize,
}

impl Run<'_, '_> {
    fn options(&self) -> &ConcretizerOptions {
        &self.concretizer.options
    }

    /// First unbound slot of the first undecided node
    fn next_slot(&self, search: &Search) -> Option<(String, Slot)> {
        for name in &search.order {
            let node = &search.nodes[name];
            if node.decided {
                continue;
            }
            if node.version.is_none() {
                return Some((name.clone(), Slot::Version));
            }
            if let Some(i) = node
                .recipe
                .variants
                .iter()
                .position(|v| !node.variants.contains_key(&v.name))
            {
                return Some((name.clone(), Slot::Variant(i)));
            }
            return Some((name.clone(), Slot::Compiler));
        }
        None
    }

    fn candidates(&self, search: &Search, name: &str, slot: Slot) -> Result<VecDeque<Choice>> {
        let node = &search.nodes[name];
        let candidates: VecDeque<Choice> = match slot {
            Slot::Version => {
                let allowed: Vec<Version> = node
                    .recipe
                    .sorted_versions()
                    .into_iter()
                    .filter(|v| node.constraints.allows_version(v))
                    .collect();
                if allowed.is_empty() {
                    return Err(self.unsatisfiable(search, name, "no known version satisfies"));
                }

                let mut ordered = Vec::with_capacity(allowed.len());
                if self.options().reuse
                    && let Some(state) = self.concretizer.state
                {
                    for installed in state.installed_versions(name)? {
                        if allowed.contains(&installed) && !ordered.contains(&installed) {
                            ordered.push(installed);
                        }
                    }
                }
                for version in allowed {
                    if !ordered.contains(&version) {
                        ordered.push(version);
                    }
                }
                ordered.into_iter().map(Choice::Version).collect()
            }
            Slot::Variant(i) => {
                let decl = &node.recipe.variants[i];
                let values = match node.constraints.variants.get(&decl.name) {
                    Some(pinned) => vec![pinned.clone()],
                    None => decl.domain.candidates(&decl.default),
                };
                values
                    .into_iter()
                    .map(|v| Choice::Variant(decl.name.clone(), v))
                    .collect()
            }
            Slot::Compiler => {
                let introducer = node
                    .introducer
                    .as_ref()
                    .and_then(|parent| search.nodes.get(parent))
                    .and_then(|parent| parent.compiler.clone());
                let mut ordered: Vec<Compiler> = Vec::new();
                for compiler in introducer.into_iter().chain(self.options().compilers.iter().cloned()) {
                    if node.constraints.allows_compiler(&compiler) && !ordered.contains(&compiler) {
                        ordered.push(compiler);
                    }
                }
                if ordered.is_empty() {
                    return Err(self.unsatisfiable(search, name, "no configured compiler satisfies"));
                }
                ordered.into_iter().map(Choice::Compiler).collect()
            }
        };
        Ok(candidates)
    }

    fn apply(&self, search: &mut Search, name: &str, choice: Choice) -> Result<()> {
        debug!("{}: choosing {}", name, choice);
        search.bound += 1;
        let node = search
            .nodes
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("search node '{}'", name)))?;
        match choice {
            Choice::Version(v) => node.version = Some(v),
            Choice::Variant(variant, value) => {
                node.variants.insert(variant, value);
            }
            Choice::Compiler(c) => node.compiler = Some(c),
        }

        if node.fully_bound() {
            self.finalize(search, name)?;
        }
        Ok(())
    }

    /// Check conflicts and add the active dependency edges of a bound node
    fn finalize(&self, search: &mut Search, name: &str) -> Result<()> {
        let node = search.nodes[name].clone();

        for conflict in &node.recipe.conflicts {
            if conflict.when.evaluate(&node) {
                debug!("{}: conflict '{}' triggered", name, conflict.when);
                return Err(Error::Conflict {
                    node: name.to_string(),
                    message: conflict.message.clone(),
                });
            }
        }

        for dep in &node.recipe.dependencies {
            if dep.when.evaluate(&node) {
                self.add_edge(search, name, dep)?;
            }
        }

        if let Some(node) = search.nodes.get_mut(name) {
            node.decided = true;
        }
        Ok(())
    }

    fn add_edge(&self, search: &mut Search, from: &str, dep: &DependencyDecl) -> Result<()> {
        if let Some(node) = search.nodes.get_mut(from) {
            node.deps
                .entry(dep.name.clone())
                .and_modify(|types| types.merge(&dep.types))
                .or_insert_with(|| dep.types.clone());
        }

        let origin = format!("required by {}", from);
        if search.nodes.contains_key(&dep.name) {
            self.constrain(search, &dep.name, &dep.constraint, &origin)
        } else {
            self.add_node(search, &dep.name, Some(from), &dep.constraint, &origin)
        }
    }

    /// Create a node on first sight
    fn add_node(
        &self,
        search: &mut Search,
        name: &str,
        introducer: Option<&str>,
        clause: &Clause,
        origin: &str,
    ) -> Result<()> {
        let recipe = self.concretizer.registry.load(name)?;
        debug!("Discovered {}{}", name, introducer.map(|i| format!(" via {}", i)).unwrap_or_default());

        let inherited = introducer
            .and_then(|parent| search.nodes.get(parent))
            .map(|parent| parent.platform.clone());

        search.nodes.insert(
            name.to_string(),
            Node {
                recipe,
                constraints: ConstraintSet::default(),
                introducer: introducer.map(str::to_string),
                platform: inherited.unwrap_or_else(|| self.options().platform.clone()),
                version: None,
                variants: BTreeMap::new(),
                compiler: None,
                deps: BTreeMap::new(),
                decided: false,
            },
        );
        search.order.push(name.to_string());

        if introducer.is_some()
            && let Some(requested) = self.requested.get(name)
        {
            self.constrain(search, name, requested, REQUESTED)?;
        }
        self.constrain(search, name, clause, origin)
    }

    /// Add a requirement to an existing node
    fn constrain(&self, search: &mut Search, name: &str, clause: &Clause, origin: &str) -> Result<()> {
        let node = search
            .nodes
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("search node '{}'", name)))?;

        if let Err(reason) = node.constraints.add(clause, origin) {
            let mut constraints = node.constraints.describe();
            constraints.push(format!("{} ({})", clause_text(clause), origin));
            constraints.push(reason);
            return Err(Error::Unsatisfiable {
                node: name.to_string(),
                constraints,
            });
        }

        let problem = if node.decided {
            check_bound(node)
        } else {
            if let Some(platform) = node.constraints.platform.clone() {
                node.platform = platform;
            }
            check_open(node, &self.options().compilers)
        };

        match problem {
            Some(reason) => Err(self.unsatisfiable(search, name, &reason)),
            None => Ok(()),
        }
    }

    /// `^dep` clauses must all have been reached
    fn check_complete(&self, search: &Search) -> Result<()> {
        for (name, clause) in &self.requested {
            if !search.nodes.contains_key(name) {
                return Err(Error::Unsatisfiable {
                    node: name.clone(),
                    constraints: vec![
                        format!("{} ({})", clause, REQUESTED),
                        format!("'{}' does not depend on '{}'", self.root, name),
                    ],
                });
            }
        }
        Ok(())
    }

    fn unsatisfiable(&self, search: &Search, name: &str, reason: &str) -> Error {
        let mut constraints = search
            .nodes
            .get(name)
            .map(|n| n.constraints.describe())
            .unwrap_or_default();
        constraints.push(reason.to_string());
        Error::Unsatisfiable {
            node: name.to_string(),
            constraints,
        }
    }

    fn record_failure(&mut self, search: &Search, err: Error) {
        debug!("Dead end after {} bindings: {}", search.bound, err);
        let deeper = self
            .deepest
            .as_ref()
            .is_none_or(|(depth, _)| search.bound > *depth);
        if deeper {
            self.deepest = Some((search.bound, err));
        }
    }

    /// Resume from the most recent choice point with an untried alternative
    fn backtrack(&mut self) -> Result<Search> {
        loop {
            let (choice, mut search, node) = {
                let Some(point) = self.stack.last_mut() else {
                    return Err(self.exhausted());
                };
                match point.remaining.pop_front() {
                    Some(choice) => {
                        let snapshot = point.snapshot.clone();
                        let node = point.node.clone();
                        if point.remaining.is_empty() {
                            self.stack.pop();
                        }
                        (choice, snapshot, node)
                    }
                    None => {
                        self.stack.pop();
                        continue;
                    }
                }
            };

            self.backtracks += 1;
            if self.backtracks > self.options().max_backtracks {
                return Err(Error::Unsatisfiable {
                    node: self.root.clone(),
                    constraints: vec![format!(
                        "search gave up after {} backtracks",
                        self.options().max_backtracks
                    )],
                });
            }
            debug!("Backtracking to {} with {}", node, choice);

            match self.apply(&mut search, &node, choice) {
                Ok(()) => return Ok(search),
                Err(e) if recoverable(&e) => self.record_failure(&search, e),
                Err(e) => return Err(e),
            }
        }
    }

    fn exhausted(&mut self) -> Error {
        self.deepest.take().map(|(_, e)| e).unwrap_or_else(|| Error::Unsatisfiable {
            node: self.root.clone(),
            constraints: vec!["no assignment satisfies the request".to_string()],
        })
    }

    fn finish(&self, search: Search) -> Result<ConcreteGraph> {
        let mut drafts = Vec::with_capacity(search.nodes.len());
        for (name, node) in search.nodes {
            let (Some(version), Some(compiler)) = (node.version, node.compiler) else {
                return Err(Error::Unsatisfiable {
                    node: name,
                    constraints: vec!["left unbound".to_string()],
                });
            };
            drafts.push(NodeDraft {
                name,
                version,
                variants: node.variants,
                platform: node.platform,
                compiler,
                dependencies: node.deps,
                build_system: node.recipe.build_system,
                parallel: node.recipe.parallel,
            });
        }

        let graph = ConcreteGraph::freeze(drafts, &self.root)?;
        info!(
            "Concretized {} into {} packages after {} backtracks",
            self.root,
            graph.len(),
            self.backtracks
        );
        Ok(graph)
    }
}

/// A decided node must already satisfy its constraints as bound
fn check_bound(node: &Node) -> Option<String> {
    let set = &node.constraints;
    if let Some(version) = &node.version
        && !set.allows_version(version)
    {
        return Some(format!("already concretized at @{}", version));
    }
    for (name, wanted) in &set.variants {
        match node.variants.get(name) {
            Some(bound) if bound == wanted => {}
            Some(bound) => {
                return Some(format!("already concretized with {}", bound.render(name).trim()));
            }
            None => return Some(format!("has no variant '{}'", name)),
        }
    }
    if let Some(compiler) = &node.compiler
        && !set.allows_compiler(compiler)
    {
        return Some(format!("already concretized with %{}", compiler));
    }
    if let Some(platform) = &set.platform
        && platform != &node.platform
    {
        return Some(format!("already concretized for arch={}", node.platform));
    }
    None
}

/// An undecided node must still have some assignment left
fn check_open(node: &Node, compilers: &[Compiler]) -> Option<String> {
    let set = &node.constraints;
    let recipe = &node.recipe;
    if !recipe.versions.iter().any(|v| set.allows_version(&v.version)) {
        return Some(format!(
            "no known version satisfies (known: {})",
            recipe
                .sorted_versions()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    for (name, value) in &set.variants {
        match recipe.variant(name) {
            None => return Some(format!("'{}' has no variant '{}'", recipe.name, name)),
            Some(decl) if !decl.domain.contains(value) => {
                return Some(format!("'{}' is not a valid value of variant '{}'", value, name));
            }
            Some(_) => {}
        }
    }
    if !compilers.iter().any(|c| set.allows_compiler(c)) {
        return Some("no configured compiler satisfies".to_string());
    }
    None
}

fn clause_text(clause: &Clause) -> String {
    Clause {
        name: None,
        ..clause.clone()
    }
    .to_string()
    .trim()
    .to_string()
}
