// src/spec/concrete.rs

//! Concrete spec graphs
//!
//! A concretized request is an arena of [`ConcreteSpec`] nodes, one per
//! package name. Edges refer to nodes by index, so a diamond (two packages
//! depending on the same library) shares a single node. Nodes are stored in
//! post-order: every node comes after all of its dependencies, and the root
//! is last.

use super::{Compiler, PredicateContext, VariantValue};
use crate::error::{Error, Result};
use crate::hash::Hasher;
use crate::recipe::BuildSystemKind;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

/// Index of a node inside its [`ConcreteGraph`]
pub type NodeId = usize;

/// Why one package needs another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    /// Needed while building (tools, headers)
    Build,
    /// Linked into the result
    Link,
    /// Needed at run time
    Run,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Build => "build",
            DepType::Link => "link",
            DepType::Run => "run",
        }
    }
}

/// Set of dependency types on one edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepTypes(BTreeSet<DepType>);

impl DepTypes {
    pub fn new(types: impl IntoIterator<Item = DepType>) -> Self {
        Self(types.into_iter().collect())
    }

    pub fn contains(&self, ty: DepType) -> bool {
        self.0.contains(&ty)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge the types of another edge to the same target
    pub fn merge(&mut self, other: &DepTypes) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = DepType> + '_ {
        self.0.iter().copied()
    }
}

impl Default for DepTypes {
    fn default() -> Self {
        Self::new([DepType::Build, DepType::Link])
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|t| t.as_str()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Edge from a node to one of its dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLink {
    pub node: NodeId,
    pub types: DepTypes,
}

/// A fully resolved package node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteSpec {
    pub name: String,
    pub version: Version,
    pub variants: BTreeMap<String, VariantValue>,
    pub platform: String,
    pub compiler: Compiler,
    pub dependencies: BTreeMap<String, DependencyLink>,
    pub build_system: BuildSystemKind,
    pub parallel: bool,
    /// Content hash over name, version, variants, platform, compiler and the
    /// hashes of the dependencies
    pub hash: String,
}

impl ConcreteSpec {
    /// One-line rendering: `name@version+a~b %compiler arch=platform`
    pub fn format_short(&self) -> String {
        let mut out = format!("{}@{}", self.name, self.version);
        for (name, value) in &self.variants {
            out.push_str(&value.render(name));
        }
        out.push_str(&format!(" %{} arch={}", self.compiler, self.platform));
        out
    }
}

impl PredicateContext for ConcreteSpec {
    fn variant(&self, name: &str) -> Option<&VariantValue> {
        self.variants.get(name)
    }

    fn version(&self) -> Option<&Version> {
        Some(&self.version)
    }

    fn platform(&self) -> Option<&str> {
        Some(&self.platform)
    }

    fn compiler(&self) -> Option<&Compiler> {
        Some(&self.compiler)
    }
}

impl fmt::Display for ConcreteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.hash.get(..7).unwrap_or(&self.hash);
        write!(f, "{} /{}", self.format_short(), short)
    }
}

/// A node as produced by the concretizer, before hashing and indexing
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub name: String,
    pub version: Version,
    pub variants: BTreeMap<String, VariantValue>,
    pub platform: String,
    pub compiler: Compiler,
    pub dependencies: BTreeMap<String, DepTypes>,
    pub build_system: BuildSystemKind,
    pub parallel: bool,
}

/// The concretized dependency graph of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphRepr")]
pub struct ConcreteGraph {
    nodes: Vec<ConcreteSpec>,
    root: NodeId,
}

/// Serialized form, checked before it becomes a [`ConcreteGraph`]
#[derive(Deserialize)]
struct GraphRepr {
    nodes: Vec<ConcreteSpec>,
    root: NodeId,
}

impl TryFrom<GraphRepr> for ConcreteGraph {
    type Error = Error;

    fn try_from(repr: GraphRepr) -> Result<Self> {
        if repr.root >= repr.nodes.len() {
            return Err(Error::ParseError(format!(
                "graph root {} out of range for {} nodes",
                repr.root,
                repr.nodes.len()
            )));
        }
        for (id, node) in repr.nodes.iter().enumerate() {
            if node.hash.is_empty() || !node.hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::ParseError(format!(
                    "node '{}' has an invalid hash",
                    node.name
                )));
            }
            // Post-order: dependencies always precede their dependents
            if let Some((dep, _)) = node.dependencies.iter().find(|(_, l)| l.node >= id) {
                return Err(Error::ParseError(format!(
                    "node '{}' refers to '{}' out of order",
                    node.name, dep
                )));
            }
        }
        Ok(Self {
            nodes: repr.nodes,
            root: repr.root,
        })
    }
}

impl ConcreteGraph {
    /// Build the graph from concretizer output
    ///
    /// Nodes not reachable from `root` are dropped. Fails with a cycle error
    /// if the drafts do not form a DAG, or `NotFound` for a dangling edge.
    pub fn freeze(drafts: Vec<NodeDraft>, root: &str) -> Result<Self> {
        let by_name: HashMap<String, NodeDraft> =
            drafts.into_iter().map(|d| (d.name.clone(), d)).collect();
        if !by_name.contains_key(root) {
            return Err(Error::NotFound(format!("root node '{}'", root)));
        }

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        post_order(root, &by_name, &mut visited, &mut stack, &mut order)?;

        let mut nodes: Vec<ConcreteSpec> = Vec::with_capacity(order.len());
        let mut index: HashMap<String, NodeId> = HashMap::new();

        for name in order {
            let draft = &by_name[&name];
            let mut dependencies = BTreeMap::new();
            for (dep, types) in &draft.dependencies {
                dependencies.insert(
                    dep.clone(),
                    DependencyLink {
                        node: index[dep],
                        types: types.clone(),
                    },
                );
            }

            let hash = compute_hash(draft, &dependencies, &nodes);
            index.insert(name.clone(), nodes.len());
            nodes.push(ConcreteSpec {
                name,
                version: draft.version.clone(),
                variants: draft.variants.clone(),
                platform: draft.platform.clone(),
                compiler: draft.compiler.clone(),
                dependencies,
                build_system: draft.build_system,
                parallel: draft.parallel,
                hash,
            });
        }

        let root = nodes.len() - 1;
        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_spec(&self) -> &ConcreteSpec {
        &self.nodes[self.root]
    }

    pub fn node(&self, id: NodeId) -> &ConcreteSpec {
        &self.nodes[id]
    }

    /// All nodes, dependencies before dependents
    pub fn nodes(&self) -> &[ConcreteSpec] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by package name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ConcreteSpec> {
        self.find(name).map(|id| &self.nodes[id])
    }

    /// Render the graph as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn fmt_tree(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: NodeId,
        depth: usize,
        printed: &mut HashSet<NodeId>,
    ) -> fmt::Result {
        if !printed.insert(id) {
            return Ok(());
        }
        let node = &self.nodes[id];
        if depth == 0 {
            writeln!(f, "{}", node)?;
        } else {
            writeln!(f, "{:indent$}^{}", "", node, indent = depth * 4)?;
        }
        for link in node.dependencies.values() {
            self.fmt_tree(f, link.node, depth + 1, printed)?;
        }
        Ok(())
    }
}

impl fmt::Display for ConcreteGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printed = HashSet::new();
        self.fmt_tree(f, self.root, 0, &mut printed)
    }
}

fn post_order(
    name: &str,
    drafts: &HashMap<String, NodeDraft>,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    if visited.contains(name) {
        return Ok(());
    }
    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(name.to_string());
        return Err(Error::Cycle { cycle });
    }

    let draft = drafts
        .get(name)
        .ok_or_else(|| Error::NotFound(format!("dependency node '{}'", name)))?;

    stack.push(name.to_string());
    // BTreeMap keys: dependencies visited in name order
    for dep in draft.dependencies.keys() {
        post_order(dep, drafts, visited, stack, order)?;
    }
    stack.pop();

    visited.insert(name.to_string());
    order.push(name.to_string());
    Ok(())
}

fn compute_hash(
    draft: &NodeDraft,
    dependencies: &BTreeMap<String, DependencyLink>,
    built: &[ConcreteSpec],
) -> String {
    let mut hasher = Hasher::new();
    hasher.field("name", &draft.name);
    hasher.field("version", &draft.version);
    for (name, value) in &draft.variants {
        hasher.field(&format!("variant.{}", name), value);
    }
    hasher.field("platform", &draft.platform);
    hasher.field("compiler", &draft.compiler);
    for (name, link) in dependencies {
        hasher.field(
            &format!("dep.{}", name),
            format!("{}:{}", link.types, built[link.node].hash),
        );
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, deps: &[&str]) -> NodeDraft {
        NodeDraft {
            name: name.to_string(),
            version: Version::parse("1.0").unwrap(),
            variants: BTreeMap::new(),
            platform: "linux-x86_64".to_string(),
            compiler: Compiler::parse("gcc@11.4.0").unwrap(),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), DepTypes::default()))
                .collect(),
            build_system: BuildSystemKind::Autotools,
            parallel: true,
        }
    }

    #[test]
    fn test_post_order_and_sharing() {
        let graph = ConcreteGraph::freeze(
            vec![
                draft("app", &["left", "right"]),
                draft("left", &["base"]),
                draft("right", &["base"]),
                draft("base", &[]),
            ],
            "app",
        )
        .unwrap();

        let names: Vec<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["base", "left", "right", "app"]);
        assert_eq!(graph.root_spec().name, "app");

        let base = graph.find("base").unwrap();
        assert_eq!(graph.get("left").unwrap().dependencies["base"].node, base);
        assert_eq!(graph.get("right").unwrap().dependencies["base"].node, base);
    }

    #[test]
    fn test_unreachable_drafts_dropped() {
        let graph =
            ConcreteGraph::freeze(vec![draft("app", &[]), draft("orphan", &[])], "app").unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_cycle_detected() {
        let err = ConcreteGraph::freeze(vec![draft("a", &["b"]), draft("b", &["a"])], "a")
            .unwrap_err();
        match err {
            Error::Cycle { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_hash_depends_on_dependencies() {
        let one = ConcreteGraph::freeze(vec![draft("app", &["lib"]), draft("lib", &[])], "app")
            .unwrap();

        let mut lib = draft("lib", &[]);
        lib.variants
            .insert("shared".to_string(), VariantValue::Bool(true));
        let two = ConcreteGraph::freeze(vec![draft("app", &["lib"]), lib], "app").unwrap();

        assert_ne!(one.root_spec().hash, two.root_spec().hash);
        assert_eq!(one.root_spec().hash.len(), 64);

        let again = ConcreteGraph::freeze(vec![draft("lib", &[]), draft("app", &["lib"])], "app")
            .unwrap();
        assert_eq!(one.root_spec().hash, again.root_spec().hash);
    }

    #[test]
    fn test_tree_display_prints_shared_node_once() {
        let graph = ConcreteGraph::freeze(
            vec![
                draft("app", &["left", "right"]),
                draft("left", &["base"]),
                draft("right", &["base"]),
                draft("base", &[]),
            ],
            "app",
        )
        .unwrap();
        let text = graph.to_string();
        assert!(text.starts_with("app@1.0 %gcc@11.4.0 arch=linux-x86_64 /"));
        assert_eq!(text.matches("^base@1.0").count(), 1);
        assert!(text.contains("    ^left@1.0"));
        assert!(text.contains("        ^base@1.0"));
    }

    #[test]
    fn test_json_roundtrip() {
        let graph = ConcreteGraph::freeze(vec![draft("app", &["lib"]), draft("lib", &[])], "app")
            .unwrap();
        let json = graph.to_json().unwrap();
        let back: ConcreteGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }

    fn tampered(edit: impl FnOnce(&mut serde_json::Value)) -> serde_json::Result<ConcreteGraph> {
        let graph = ConcreteGraph::freeze(vec![draft("app", &["lib"]), draft("lib", &[])], "app")
            .unwrap();
        let mut value = serde_json::to_value(&graph).unwrap();
        edit(&mut value);
        serde_json::from_value(value)
    }

    #[test]
    fn test_deserialize_rejects_root_out_of_range() {
        let err = tampered(|v| v["root"] = serde_json::json!(7)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_deserialize_rejects_bad_hash() {
        let err = tampered(|v| v["nodes"][0]["hash"] = serde_json::json!("é")).unwrap_err();
        assert!(err.to_string().contains("invalid hash"));
    }

    #[test]
    fn test_deserialize_rejects_forward_edge() {
        let err =
            tampered(|v| v["nodes"][1]["dependencies"]["lib"]["node"] = serde_json::json!(1))
                .unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }
}
