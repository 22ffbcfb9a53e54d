//! Consistency-checked injectable store
//!
//! The store indexes injectables by produced type and keeps one [`Node`] per
//! distinct key referenced by a registered binding. A node records the
//! candidates currently satisfying its key and how many bindings demand at
//! least one or at most one of them. No node may be invalid after a committed
//! mutation:
//!
//! - `at_least_one > 0` requires at least one candidate
//! - `at_most_one > 0` allows at most one candidate
//! - a node without dependents is pruned
//!
//! [`Store::put`] and [`Store::remove`] are all-or-nothing: a batch that
//! would leave a node invalid is undone by applying the inverse bookkeeping
//! before the error is returned.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::binding::Binding;
use crate::cycle_detection::find_cycle;
use crate::error::{DiError, DiResult};
use crate::injectable::Injectable;
use crate::key::{Key, Type};
use crate::scope::ScopeRegistry;

#[derive(Debug, Default)]
struct Node {
	candidates: IndexSet<Injectable>,
	at_least_one: usize,
	at_most_one: usize,
	dependents: IndexMap<Injectable, usize>,
}

impl Node {
	fn required_by(&self) -> Vec<String> {
		self.dependents.keys().map(ToString::to_string).collect()
	}
}

/// Counters of a store node, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
	pub candidates: usize,
	pub at_least_one: usize,
	pub at_most_one: usize,
	pub dependents: usize,
}

impl NodeStats {
	/// Whether the node satisfies every binding referencing it.
	pub fn is_valid(&self) -> bool {
		!(self.at_least_one > 0 && self.candidates == 0)
			&& !(self.at_most_one > 0 && self.candidates > 1)
			&& self.dependents > 0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
	Put,
	Remove,
}

/// Keys whose nodes were touched by a batch, in first-touched order.
#[derive(Default)]
struct Touched {
	targets: IndexSet<Key>,
	sources: IndexSet<Key>,
}

#[derive(Debug, Default)]
pub struct Store {
	injectables: IndexSet<Injectable>,
	by_type: HashMap<Type, IndexSet<Injectable>>,
	nodes: HashMap<Key, Node>,
	nodes_by_type: HashMap<Type, IndexSet<Key>>,
}

impl Store {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.injectables.len()
	}

	pub fn is_empty(&self) -> bool {
		self.injectables.is_empty()
	}

	/// Registered injectables in registration order.
	pub fn injectables(&self) -> impl Iterator<Item = &Injectable> {
		self.injectables.iter()
	}

	pub fn contains_injectable(&self, injectable: &Injectable) -> bool {
		self.injectables.contains(injectable)
	}

	/// Whether any registered injectable satisfies `key`.
	pub fn contains(&self, key: &Key) -> bool {
		match self.nodes.get(key) {
			Some(node) => !node.candidates.is_empty(),
			None => self.scan(key).next().is_some(),
		}
	}

	/// Every registered injectable satisfying `key`.
	///
	/// Keys referenced by a registered binding are answered from the node
	/// index; other keys fall back to the per-type index.
	pub fn resolve(&self, key: &Key) -> Vec<Injectable> {
		match self.nodes.get(key) {
			Some(node) => node.candidates.iter().cloned().collect(),
			None => self.scan(key).cloned().collect(),
		}
	}

	/// Injectables producing `ty`, regardless of qualifiers.
	pub fn of_type(&self, ty: Type) -> impl Iterator<Item = &Injectable> {
		self.by_type.get(&ty).into_iter().flatten()
	}

	pub fn node(&self, key: &Key) -> Option<NodeStats> {
		self.nodes.get(key).map(|node| NodeStats {
			candidates: node.candidates.len(),
			at_least_one: node.at_least_one,
			at_most_one: node.at_most_one,
			dependents: node.dependents.len(),
		})
	}

	/// Keys of every live node.
	pub fn node_keys(&self) -> impl Iterator<Item = &Key> {
		self.nodes.keys()
	}

	fn scan<'a>(&'a self, key: &'a Key) -> impl Iterator<Item = &'a Injectable> + 'a {
		self.of_type(key.ty())
			.filter(move |injectable| injectable.satisfies(key))
	}

	/// Adds `batch` to the store, or leaves it untouched and fails.
	///
	/// Validation runs in this order: duplicates, known scopes, static
	/// cycles over non-lazy bindings, node bookkeeping and invariant scan,
	/// scope conflicts.
	pub fn put(&mut self, batch: &[Injectable], scopes: &ScopeRegistry) -> DiResult<()> {
		if batch.is_empty() {
			return Ok(());
		}

		let mut seen = IndexSet::with_capacity(batch.len());
		for injectable in batch {
			if self.injectables.contains(injectable) || !seen.insert(injectable) {
				return Err(DiError::AlreadyRegistered(injectable.to_string()));
			}
		}

		for injectable in batch {
			if !scopes.is_known(injectable.scope()) {
				return Err(DiError::UnknownScope {
					scope: injectable.scope().to_string(),
					producer: injectable.to_string(),
				});
			}
		}

		self.check_cycles(batch)?;

		let mut touched = Touched::default();
		for injectable in batch {
			self.add_targets(injectable, &mut touched);
		}
		for injectable in batch {
			self.add_sources(injectable, &mut touched);
		}

		if let Some(error) = DiError::aggregate(self.scan_nodes(&touched, Mutation::Put)) {
			tracing::warn!(batch = batch.len(), error = %error, "rolling back store batch");
			self.undo_put(batch);
			return Err(error);
		}

		if let Err(error) = self.check_scopes(batch, &touched, scopes) {
			tracing::warn!(batch = batch.len(), error = %error, "rolling back store batch");
			self.undo_put(batch);
			return Err(error);
		}

		tracing::debug!(batch = batch.len(), total = self.len(), "store batch committed");
		Ok(())
	}

	/// Removes `batch` from the store, or leaves it untouched and fails.
	///
	/// Fails with [`DiError::SingularDependencyViolation`] if a remaining
	/// exactly-one binding would lose its last candidate. Bindings with
	/// at-most-one or collection cardinality never block removal.
	pub fn remove(&mut self, batch: &[Injectable]) -> DiResult<()> {
		let mut unique: IndexSet<Injectable> = IndexSet::with_capacity(batch.len());
		for injectable in batch {
			if !self.injectables.contains(injectable) {
				return Err(DiError::NotRegistered(injectable.to_string()));
			}
			unique.insert(injectable.clone());
		}
		if unique.is_empty() {
			return Ok(());
		}

		let mut touched = Touched::default();
		for injectable in &unique {
			self.remove_targets(injectable, &mut touched);
		}
		for injectable in &unique {
			self.remove_sources(injectable, &mut touched);
		}

		if let Some(error) = DiError::aggregate(self.scan_nodes(&touched, Mutation::Remove)) {
			tracing::warn!(batch = unique.len(), error = %error, "rolling back store removal");
			let mut undo = Touched::default();
			for injectable in &unique {
				self.add_targets(injectable, &mut undo);
			}
			for injectable in &unique {
				self.add_sources(injectable, &mut undo);
			}
			return Err(error);
		}

		tracing::debug!(batch = unique.len(), total = self.len(), "store removal committed");
		Ok(())
	}

	fn undo_put(&mut self, batch: &[Injectable]) {
		let mut undo = Touched::default();
		for injectable in batch.iter().rev() {
			self.remove_sources(injectable, &mut undo);
		}
		for injectable in batch.iter().rev() {
			self.remove_targets(injectable, &mut undo);
		}
	}

	/// Candidates for `key` among the store and `batch`, before `batch` is
	/// indexed.
	fn candidates_with(&self, key: &Key, batch: &[Injectable]) -> Vec<Injectable> {
		self.resolve(key)
			.into_iter()
			.chain(batch.iter().filter(|injectable| injectable.satisfies(key)).cloned())
			.collect()
	}

	fn check_cycles(&self, batch: &[Injectable]) -> DiResult<()> {
		let cycle = find_cycle(batch.iter().cloned(), |injectable| {
			let mut targets: Vec<Injectable> = Vec::new();
			for binding in injectable.bindings().iter().filter(|b| !b.is_lazy()) {
				for candidate in self.candidates_with(binding.key(), batch) {
					if !targets.contains(&candidate) {
						targets.push(candidate);
					}
				}
			}
			targets
		});
		match cycle {
			Some(path) => Err(DiError::CyclicDependency {
				path: path.iter().map(ToString::to_string).collect(),
			}),
			None => Ok(()),
		}
	}

	fn add_targets(&mut self, owner: &Injectable, touched: &mut Touched) {
		for binding in owner.bindings() {
			let key = binding.key();
			if !self.nodes.contains_key(key) {
				let candidates = self.scan(key).cloned().collect();
				self.nodes_by_type
					.entry(key.ty())
					.or_default()
					.insert(key.clone());
				self.nodes.insert(
					key.clone(),
					Node {
						candidates,
						..Node::default()
					},
				);
			}
			let Some(node) = self.nodes.get_mut(key) else {
				continue;
			};
			adjust_counters(node, binding, true);
			*node.dependents.entry(owner.clone()).or_insert(0) += 1;
			tracing::trace!(key = %key, owner = %owner, "binding registered");
			touched.targets.insert(key.clone());
		}
	}

	fn remove_targets(&mut self, owner: &Injectable, touched: &mut Touched) {
		for binding in owner.bindings() {
			let key = binding.key();
			let Some(node) = self.nodes.get_mut(key) else {
				continue;
			};
			adjust_counters(node, binding, false);
			if let Some(count) = node.dependents.get_mut(owner) {
				*count -= 1;
				if *count == 0 {
					node.dependents.shift_remove(owner);
				}
			}
			tracing::trace!(key = %key, owner = %owner, "binding unregistered");
			if node.dependents.is_empty() {
				self.nodes.remove(key);
				if let Some(keys) = self.nodes_by_type.get_mut(&key.ty()) {
					keys.shift_remove(key);
					if keys.is_empty() {
						self.nodes_by_type.remove(&key.ty());
					}
				}
			}
			touched.targets.insert(key.clone());
		}
	}

	fn add_sources(&mut self, injectable: &Injectable, touched: &mut Touched) {
		for ty in injectable.produced_types() {
			if let Some(keys) = self.nodes_by_type.get(ty) {
				for key in keys {
					if injectable.satisfies(key)
						&& let Some(node) = self.nodes.get_mut(key)
						&& node.candidates.insert(injectable.clone())
					{
						tracing::trace!(key = %key, candidate = %injectable, "candidate added");
						touched.sources.insert(key.clone());
					}
				}
			}
			self.by_type
				.entry(*ty)
				.or_default()
				.insert(injectable.clone());
		}
		self.injectables.insert(injectable.clone());
	}

	fn remove_sources(&mut self, injectable: &Injectable, touched: &mut Touched) {
		for ty in injectable.produced_types() {
			if let Some(keys) = self.nodes_by_type.get(ty) {
				for key in keys {
					if let Some(node) = self.nodes.get_mut(key)
						&& node.candidates.shift_remove(injectable)
					{
						tracing::trace!(key = %key, candidate = %injectable, "candidate removed");
						touched.sources.insert(key.clone());
					}
				}
			}
			if let Some(injectables) = self.by_type.get_mut(ty) {
				injectables.shift_remove(injectable);
				if injectables.is_empty() {
					self.by_type.remove(ty);
				}
			}
		}
		self.injectables.shift_remove(injectable);
	}

	/// Invalid touched nodes, bookkeeping targets first.
	///
	/// On addition, a node whose own bindings changed reports the missing or
	/// ambiguous dependency. Any other invalid node, and every invalid node
	/// after a removal, reports a singular-dependency violation against the
	/// bindings already there.
	fn scan_nodes(&self, touched: &Touched, mutation: Mutation) -> Vec<DiError> {
		let mut errors = Vec::new();
		if mutation == Mutation::Put {
			for key in &touched.targets {
				let Some(node) = self.nodes.get(key) else {
					continue;
				};
				let count = node.candidates.len();
				if node.at_least_one > 0 && count == 0 {
					errors.push(DiError::UnresolvableDependency {
						key: key.to_string(),
						required_by: node.dependents.keys().next().map(ToString::to_string),
					});
				} else if node.at_most_one > 0 && count > 1 {
					errors.push(DiError::AmbiguousResolution {
						key: key.to_string(),
						candidates: node.candidates.iter().map(ToString::to_string).collect(),
					});
				}
			}
		}
		let others = touched
			.sources
			.iter()
			.chain(&touched.targets)
			.filter(|key| mutation == Mutation::Remove || !touched.targets.contains(*key));
		let mut reported: IndexSet<&Key> = IndexSet::new();
		for key in others {
			if !reported.insert(key) {
				continue;
			}
			let Some(node) = self.nodes.get(key) else {
				continue;
			};
			let count = node.candidates.len();
			if (node.at_least_one > 0 && count == 0) || (node.at_most_one > 0 && count > 1) {
				errors.push(DiError::SingularDependencyViolation {
					key: key.to_string(),
					candidates: count,
					required_by: node.required_by(),
				});
			}
		}
		errors
	}

	/// Rejects non-lazy bindings, of any cardinality, whose unique candidate
	/// lives shorter than the binding's owner. Dependent-scoped owners and
	/// dependencies are exempt.
	fn check_scopes(
		&self,
		batch: &[Injectable],
		touched: &Touched,
		scopes: &ScopeRegistry,
	) -> DiResult<()> {
		let mut owners: IndexSet<&Injectable> = batch.iter().collect();
		for key in &touched.sources {
			if let Some(node) = self.nodes.get(key) {
				owners.extend(node.dependents.keys());
			}
		}

		for owner in owners {
			if owner.scope().is_pseudo() {
				continue;
			}
			let Some(owner_longevity) = scopes.longevity(owner.scope()) else {
				continue;
			};
			for binding in owner.bindings() {
				if binding.is_lazy() {
					continue;
				}
				let Some(node) = self.nodes.get(binding.key()) else {
					continue;
				};
				if node.candidates.len() != 1 {
					continue;
				}
				let Some(dependency) = node.candidates.first() else {
					continue;
				};
				if dependency.scope().is_pseudo() {
					continue;
				}
				if let Some(longevity) = scopes.longevity(dependency.scope())
					&& longevity < owner_longevity
				{
					return Err(DiError::ScopeConflict {
						consumer: owner.to_string(),
						consumer_scope: owner.scope().to_string(),
						dependency: dependency.to_string(),
						dependency_scope: dependency.scope().to_string(),
					});
				}
			}
		}
		Ok(())
	}
}

fn adjust_counters(node: &mut Node, binding: &Binding, add: bool) {
	let cardinality = binding.cardinality();
	let delta = |counter: &mut usize| {
		if add {
			*counter += 1;
		} else {
			*counter = counter.saturating_sub(1);
		}
	};
	if cardinality.requires_at_least_one() {
		delta(&mut node.at_least_one);
	}
	if cardinality.requires_at_most_one() {
		delta(&mut node.at_most_one);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::injectable::{Discriminator, instance};
	use crate::scope::{ContextScope, Scope};
	use rstest::{fixture, rstest};
	use std::sync::Arc;

	struct Foo;
	struct Bar;

	fn named(name: &'static str, ty: Type, bindings: Vec<Binding>) -> Injectable {
		Injectable::builder(ty, Discriminator::Named(name.into()))
			.bindings(bindings)
			.build(|_| Ok(instance(())))
			.unwrap()
	}

	#[fixture]
	fn scopes() -> ScopeRegistry {
		let mut scopes = ScopeRegistry::new();
		scopes
			.register_context(Arc::new(ContextScope::new(Scope::new("request"), 10)))
			.unwrap();
		scopes
	}

	#[rstest]
	fn test_put_and_resolve(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let foo = named("foo", Type::of::<Foo>(), vec![]);
		let bar = named("bar", Type::of::<Bar>(), vec![Binding::required(Key::of::<Foo>())]);

		// Act
		store.put(&[foo.clone(), bar.clone()], &scopes).unwrap();

		// Assert
		assert_eq!(store.resolve(&Key::of::<Foo>()), vec![foo]);
		assert_eq!(store.len(), 2);
		assert_eq!(
			store.node(&Key::of::<Foo>()),
			Some(NodeStats {
				candidates: 1,
				at_least_one: 1,
				at_most_one: 1,
				dependents: 1
			})
		);
	}

	#[rstest]
	fn test_missing_dependency_rolls_back(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let bar = named("bar", Type::of::<Bar>(), vec![Binding::required(Key::of::<Foo>())]);

		// Act
		let error = store.put(&[bar], &scopes).unwrap_err();

		// Assert
		assert!(matches!(error, DiError::UnresolvableDependency { .. }));
		assert!(store.is_empty());
		assert_eq!(store.node_keys().count(), 0);
	}

	#[rstest]
	fn test_second_candidate_violates_existing_binding(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let foo = named("foo", Type::of::<Foo>(), vec![]);
		let bar = named("bar", Type::of::<Bar>(), vec![Binding::optional(Key::of::<Foo>())]);
		store.put(&[foo.clone(), bar], &scopes).unwrap();

		// Act
		let error = store
			.put(&[named("other", Type::of::<Foo>(), vec![])], &scopes)
			.unwrap_err();

		// Assert
		match error {
			DiError::SingularDependencyViolation {
				candidates,
				required_by,
				..
			} => {
				assert_eq!(candidates, 2);
				assert_eq!(required_by, vec!["bar".to_string()]);
			}
			other => panic!("unexpected error: {other}"),
		}
		assert_eq!(store.resolve(&Key::of::<Foo>()), vec![foo]);
	}

	#[rstest]
	fn test_remove_last_required_candidate_fails(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let foo = named("foo", Type::of::<Foo>(), vec![]);
		let bar = named("bar", Type::of::<Bar>(), vec![Binding::required(Key::of::<Foo>())]);
		store.put(&[foo.clone(), bar.clone()], &scopes).unwrap();

		// Act
		let error = store.remove(std::slice::from_ref(&foo)).unwrap_err();

		// Assert
		assert!(matches!(error, DiError::SingularDependencyViolation { candidates: 0, .. }));
		assert!(store.contains_injectable(&foo));
		assert!(store.remove(&[bar, foo]).is_ok());
		assert!(store.is_empty());
	}

	#[rstest]
	fn test_optional_dependency_does_not_block_removal(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let foo = named("foo", Type::of::<Foo>(), vec![]);
		let bar = named("bar", Type::of::<Bar>(), vec![Binding::optional(Key::of::<Foo>())]);
		store.put(&[foo.clone(), bar], &scopes).unwrap();

		// Act
		store.remove(&[foo]).unwrap();

		// Assert
		assert!(!store.contains(&Key::of::<Foo>()));
		assert_eq!(store.node(&Key::of::<Foo>()).map(|n| n.candidates), Some(0));
	}

	#[rstest]
	fn test_duplicate_and_unknown(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let foo = named("foo", Type::of::<Foo>(), vec![]);
		let session = Injectable::of::<Bar>()
			.scope(Scope::new("session"))
			.build(|_| Ok(instance(Bar)))
			.unwrap();
		store.put(std::slice::from_ref(&foo), &scopes).unwrap();

		// Act
		let duplicate = store.put(&[foo], &scopes);
		let unknown = store.put(&[session], &scopes);
		let missing = store.remove(&[named("ghost", Type::of::<Bar>(), vec![])]);

		// Assert
		assert!(matches!(duplicate, Err(DiError::AlreadyRegistered(_))));
		assert!(matches!(unknown, Err(DiError::UnknownScope { .. })));
		assert!(matches!(missing, Err(DiError::NotRegistered(_))));
	}

	#[rstest]
	fn test_scope_conflict(scopes: ScopeRegistry) {
		// Arrange
		let mut store = Store::new();
		let request_foo = Injectable::of::<Foo>()
			.scope(Scope::new("request"))
			.build(|_| Ok(instance(Foo)))
			.unwrap();
		let singleton_bar = Injectable::of::<Bar>()
			.scope(Scope::SINGLETON)
			.binding(Binding::required(Key::of::<Foo>()))
			.build(|_| Ok(instance(Bar)))
			.unwrap();
		let lazy_bar = Injectable::builder(Type::of::<Bar>(), Discriminator::Named("lazy".into()))
			.scope(Scope::SINGLETON)
			.binding(Binding::required(Key::of::<Foo>()).lazy())
			.build(|_| Ok(instance(Bar)))
			.unwrap();

		// Act
		let conflict = store.put(&[request_foo.clone(), singleton_bar], &scopes);
		let lazy = store.put(&[request_foo, lazy_bar], &scopes);

		// Assert
		assert!(matches!(conflict, Err(DiError::ScopeConflict { .. })));
		assert!(lazy.is_ok());
	}
}
