//! Auto-discovery fixpoint
//!
//! The [`Gatherer`] computes the injectables that must be added to a store so
//! that a set of requested keys becomes satisfiable. It never mutates the
//! store: derived injectables accumulate in an overlay that also consults the
//! store, and the caller commits the result.
//!
//! Each round runs three phases:
//!
//! 1. Every newly visited type is handed to the derivation strategies. The
//!    requested types are visited first, then every type produced by a
//!    derived injectable. Results are cached per type for the lifetime of
//!    the gatherer.
//! 2. Once per run, a default injectable is built for each requested key
//!    through the [`BindingSource`].
//! 3. With auto-discovery enabled, the first unresolved exactly-one binding
//!    that the binding source can satisfy is derived, and the round
//!    restarts at phase 1.
//!
//! All iteration follows first-encountered order, so two runs over the same
//! inputs derive the same injectables and report the same errors.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;

use crate::binding::Cardinality;
use crate::error::{DiError, DiResult};
use crate::injectable::Injectable;
use crate::key::{Key, Type};
use crate::store::Store;

/// Builds the default injectable of a declared type.
pub trait BindingSource: Send + Sync {
	fn injectable_for(&self, ty: Type) -> DiResult<Injectable>;
}

/// Derives additional injectables purely from a type, e.g. the factory
/// members it declares.
pub trait DerivationStrategy: Send + Sync {
	fn derive(&self, ty: Type) -> DiResult<Vec<Injectable>>;
}

/// Pending injectables layered over a store.
struct Overlay<'a> {
	store: &'a Store,
	pending: IndexSet<Injectable>,
	visited: HashSet<Type>,
	queue: VecDeque<Type>,
}

impl<'a> Overlay<'a> {
	fn new(store: &'a Store) -> Self {
		Self {
			store,
			pending: IndexSet::new(),
			visited: HashSet::new(),
			queue: VecDeque::new(),
		}
	}

	fn visit(&mut self, ty: Type) {
		if self.visited.insert(ty) {
			self.queue.push_back(ty);
		}
	}

	fn contains(&self, injectable: &Injectable) -> bool {
		self.store.contains_injectable(injectable) || self.pending.contains(injectable)
	}

	/// Adds `injectable` unless it is already pending or stored.
	fn add(&mut self, injectable: Injectable) -> bool {
		if self.contains(&injectable) {
			return false;
		}
		for ty in injectable.produced_types() {
			self.visit(*ty);
		}
		self.pending.insert(injectable)
	}

	fn is_resolvable(&self, key: &Key) -> bool {
		self.store.contains(key) || self.pending.iter().any(|injectable| injectable.satisfies(key))
	}

	/// Unresolved exactly-one bindings of pending injectables, first
	/// encountered first, one entry per key.
	fn unresolved(&self) -> Vec<(Key, Injectable)> {
		let mut seen = HashSet::new();
		let mut unresolved = Vec::new();
		for owner in &self.pending {
			for binding in owner.bindings() {
				if binding.cardinality() != Cardinality::ExactlyOne {
					continue;
				}
				let key = binding.key();
				if !seen.contains(key) && !self.is_resolvable(key) {
					seen.insert(key.clone());
					unresolved.push((key.clone(), owner.clone()));
				}
			}
		}
		unresolved
	}
}

pub struct Gatherer {
	source: Option<Arc<dyn BindingSource>>,
	strategies: Vec<Arc<dyn DerivationStrategy>>,
	auto_discovery: bool,
	extension_cache: RwLock<HashMap<Type, Arc<[Injectable]>>>,
}

impl Gatherer {
	pub fn new(
		source: Option<Arc<dyn BindingSource>>,
		strategies: Vec<Arc<dyn DerivationStrategy>>,
		auto_discovery: bool,
	) -> Self {
		Self {
			source,
			strategies,
			auto_discovery,
			extension_cache: RwLock::new(HashMap::new()),
		}
	}

	pub fn auto_discovery(&self) -> bool {
		self.auto_discovery
	}

	/// Injectables to add to `store` so that every key in `requested` is
	/// satisfiable, in derivation order.
	pub fn gather(&self, store: &Store, requested: &[Key]) -> DiResult<Vec<Injectable>> {
		let mut overlay = Overlay::new(store);
		for key in requested {
			overlay.visit(key.ty());
		}

		let mut inputs_derived = false;
		loop {
			self.derive_extensions(&mut overlay)?;

			if !inputs_derived {
				inputs_derived = true;
				self.derive_inputs(&mut overlay, requested)?;
				continue;
			}

			if !self.auto_discovery || !self.derive_unresolved(&mut overlay)? {
				break;
			}
		}

		tracing::debug!(
			requested = requested.len(),
			derived = overlay.pending.len(),
			"gathering complete"
		);
		Ok(overlay.pending.into_iter().collect())
	}

	/// Injectables derived from `ty` by the strategies, cached per type.
	pub fn extensions(&self, ty: Type) -> DiResult<Arc<[Injectable]>> {
		if let Some(cached) = self.extension_cache.read().get(&ty) {
			return Ok(Arc::clone(cached));
		}
		let mut derived = Vec::new();
		for strategy in &self.strategies {
			derived.extend(strategy.derive(ty)?);
		}
		let derived: Arc<[Injectable]> = derived.into();
		self.extension_cache
			.write()
			.entry(ty)
			.or_insert_with(|| Arc::clone(&derived));
		Ok(derived)
	}

	/// Phase 1
	fn derive_extensions(&self, overlay: &mut Overlay<'_>) -> DiResult<()> {
		while let Some(ty) = overlay.queue.pop_front() {
			for injectable in self.extensions(ty)?.iter() {
				if overlay.add(injectable.clone()) {
					tracing::debug!(from = %ty, injectable = %injectable, "derived via extension");
				}
			}
		}
		Ok(())
	}

	/// Phase 2
	fn derive_inputs(&self, overlay: &mut Overlay<'_>, requested: &[Key]) -> DiResult<()> {
		let extension_derived: Vec<Injectable> = overlay.pending.iter().cloned().collect();
		let mut failures = Vec::new();

		for key in requested {
			let derivable: Vec<&Injectable> = extension_derived
				.iter()
				.filter(|injectable| injectable.satisfies(key))
				.collect();
			let otherwise_derivable = !derivable.is_empty();

			match self.construct(key.ty()) {
				Ok(injectable) if !injectable.satisfies(key) => {
					if !otherwise_derivable {
						failures.push(DiError::UnresolvableDependency {
							key: key.to_string(),
							required_by: None,
						});
					}
				}
				Ok(injectable) if otherwise_derivable => {
					if !derivable.contains(&&injectable) {
						let mut candidates: Vec<String> =
							derivable.iter().map(ToString::to_string).collect();
						candidates.push(injectable.to_string());
						failures.push(DiError::AmbiguousResolution {
							key: key.to_string(),
							candidates,
						});
					}
				}
				Ok(injectable) if overlay.store.contains_injectable(&injectable) => {
					failures.push(DiError::AlreadyRegistered(injectable.to_string()));
				}
				Ok(injectable) => {
					if overlay.add(injectable.clone()) {
						tracing::debug!(key = %key, injectable = %injectable, "derived requested input");
					}
				}
				Err(error) if otherwise_derivable => {
					tracing::debug!(key = %key, error = %error, "direct construction skipped");
				}
				Err(error) => failures.push(error),
			}
		}

		match DiError::aggregate(failures) {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	/// Phase 3. Returns whether an injectable was derived.
	fn derive_unresolved(&self, overlay: &mut Overlay<'_>) -> DiResult<bool> {
		let unresolved = overlay.unresolved();
		let Some((first_key, first_owner)) = unresolved.first().cloned() else {
			return Ok(false);
		};

		let mut failures = Vec::new();
		for (key, owner) in unresolved {
			match self.construct(key.ty()) {
				Ok(injectable) if injectable.satisfies(&key) && !overlay.contains(&injectable) => {
					overlay.add(injectable.clone());
					tracing::debug!(key = %key, injectable = %injectable, "derived unresolved binding");
					return Ok(true);
				}
				Ok(injectable) => failures.push(DiError::Definition {
					producer: injectable.to_string(),
					message: format!("does not satisfy {key} required by {owner}"),
				}),
				Err(error) => failures.push(error),
			}
		}

		Err(DiError::UnresolvableDependency {
			key: first_key.to_string(),
			required_by: Some(first_owner.to_string()),
		}
		.with_suppressed(failures))
	}

	fn construct(&self, ty: Type) -> DiResult<Injectable> {
		match &self.source {
			Some(source) => source.injectable_for(ty),
			None => Err(DiError::UnresolvableDependency {
				key: ty.to_string(),
				required_by: None,
			}),
		}
	}
}

impl fmt::Debug for Gatherer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Gatherer")
			.field("has_source", &self.source.is_some())
			.field("strategies", &self.strategies.len())
			.field("auto_discovery", &self.auto_discovery)
			.field("cached_types", &self.extension_cache.read().len())
			.finish()
	}
}
