//! Dependency graph visualization for development and debugging
//!
//! Renders the committed store in DOT format, which can be rendered using
//! Graphviz. Nodes are injectables; each edge points from a consumer to a
//! candidate of one of its bindings. Lazy edges are dashed.
//!
//! ## Example
//!
//! ```rust
//! use lattice_di::visualization::DependencyGraph;
//! use lattice_di::{Binding, Injectable, Key, ScopeRegistry, Store, instance};
//!
//! struct Database;
//! struct UserService;
//!
//! let database = Injectable::of::<Database>()
//!     .build(|_| Ok(instance(Database)))
//!     .unwrap();
//! let service = Injectable::of::<UserService>()
//!     .binding(Binding::required(Key::of::<Database>()))
//!     .build(|_| Ok(instance(UserService)))
//!     .unwrap();
//!
//! let mut store = Store::new();
//! store.put(&[database, service], &ScopeRegistry::new()).unwrap();
//!
//! let dot = DependencyGraph::from_store(&store).to_dot();
//! assert!(dot.contains("\"UserService\" -> \"Database\""));
//! ```

use indexmap::IndexMap;

use crate::binding::{Binding, Cardinality};
use crate::cycle_detection::find_cycle;
use crate::scope::Scope;
use crate::store::Store;

/// Represents a node in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
	/// Injectable, as displayed in errors
	pub name: String,
	/// Declared scope
	pub scope: String,
	/// Fully qualified produced type
	pub type_name: String,
}

/// Represents an edge from a consumer to one candidate of its binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
	pub from: String,
	pub to: String,
	pub cardinality: Cardinality,
	pub lazy: bool,
}

/// Dependency graph for visualization
#[derive(Debug, Default)]
pub struct DependencyGraph {
	nodes: IndexMap<String, GraphNode>,
	edges: Vec<GraphEdge>,
}

impl DependencyGraph {
	/// Create a new empty dependency graph
	pub fn new() -> Self {
		Self::default()
	}

	/// Snapshot of the injectables committed to `store`, in registration
	/// order.
	pub fn from_store(store: &Store) -> Self {
		let mut graph = Self::new();
		for injectable in store.injectables() {
			graph.add_node(GraphNode {
				name: injectable.to_string(),
				scope: injectable.scope().to_string(),
				type_name: injectable.ty().name().to_string(),
			});
		}
		for injectable in store.injectables() {
			for binding in injectable.bindings() {
				for candidate in store.resolve(binding.key()) {
					graph.add_dependency(injectable.to_string(), candidate.to_string(), binding);
				}
			}
		}
		graph
	}

	pub fn add_node(&mut self, node: GraphNode) {
		self.nodes.insert(node.name.clone(), node);
	}

	/// Add a dependency edge from `from` to `to` for `binding`
	pub fn add_dependency(&mut self, from: impl Into<String>, to: impl Into<String>, binding: &Binding) {
		self.edges.push(GraphEdge {
			from: from.into(),
			to: to.into(),
			cardinality: binding.cardinality(),
			lazy: binding.is_lazy(),
		});
	}

	pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
		self.nodes.values()
	}

	pub fn edges(&self) -> &[GraphEdge] {
		&self.edges
	}

	/// Generate DOT format output for Graphviz
	pub fn to_dot(&self) -> String {
		let mut output = String::from("digraph DependencyGraph {\n");
		output.push_str("  rankdir=LR;\n");
		output.push_str("  node [shape=box, style=rounded];\n\n");

		for node in self.nodes.values() {
			let color = if node.scope == Scope::SINGLETON.name() {
				"lightblue"
			} else if node.scope == Scope::DEPENDENT.name() {
				"lightyellow"
			} else {
				"lightgreen"
			};

			output.push_str(&format!(
				"  \"{}\" [label=\"{}\\n[{}]\", fillcolor={}, style=filled];\n",
				escape(&node.name),
				escape(&node.name),
				escape(&node.scope),
				color
			));
		}

		output.push('\n');

		for edge in &self.edges {
			let mut attributes = Vec::new();
			match edge.cardinality {
				Cardinality::ExactlyOne => {}
				Cardinality::AtMostOne => attributes.push("label=\"?\"".to_string()),
				Cardinality::Many => attributes.push("label=\"*\"".to_string()),
			}
			if edge.lazy {
				attributes.push("style=dashed".to_string());
			}
			let attributes = if attributes.is_empty() {
				String::new()
			} else {
				format!(" [{}]", attributes.join(", "))
			};
			output.push_str(&format!(
				"  \"{}\" -> \"{}\"{};\n",
				escape(&edge.from),
				escape(&edge.to),
				attributes
			));
		}

		output.push_str("}\n");
		output
	}

	/// First cycle through lazy edges, if any. Cycles over non-lazy edges
	/// never reach a committed store.
	pub fn find_lazy_cycle(&self) -> Option<Vec<String>> {
		find_cycle(self.nodes.keys().cloned(), |node: &String| {
			self.edges
				.iter()
				.filter(|edge| edge.from == *node)
				.map(|edge| edge.to.clone())
				.collect()
		})
	}

	/// Get statistics about the dependency graph
	pub fn statistics(&self) -> GraphStatistics {
		let count = |scope: &Scope| {
			self.nodes
				.values()
				.filter(|node| node.scope == scope.name())
				.count()
		};
		let singleton_count = count(&Scope::SINGLETON);
		let dependent_count = count(&Scope::DEPENDENT);

		GraphStatistics {
			node_count: self.nodes.len(),
			edge_count: self.edges.len(),
			lazy_edge_count: self.edges.iter().filter(|edge| edge.lazy).count(),
			singleton_count,
			dependent_count,
			other_count: self.nodes.len() - singleton_count - dependent_count,
		}
	}
}

fn escape(text: &str) -> String {
	text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Statistics about a dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStatistics {
	/// Total number of nodes
	pub node_count: usize,
	/// Total number of edges
	pub edge_count: usize,
	pub lazy_edge_count: usize,
	/// Number of singleton-scoped injectables
	pub singleton_count: usize,
	/// Number of dependent-scoped injectables
	pub dependent_count: usize,
	/// Number of injectables in switchable or custom scopes
	pub other_count: usize,
}
