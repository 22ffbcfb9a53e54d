//! Dependency scopes
//!
//! A scope decides how long produced instances live. Every scope except the
//! `dependent` pseudo-scope has a [`ScopeResolver`] caching one
//! [`CreationalContext`] per injectable. Dependent-scoped instances are never
//! cached; they are attached to the context they were created for.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::context::CreationalContext;
use crate::error::{DiError, DiResult};
use crate::injectable::Injectable;

/// Scope tag declared by an injectable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(Cow<'static, str>);

impl Scope {
	/// One instance per container.
	pub const SINGLETON: Scope = Scope(Cow::Borrowed("singleton"));
	/// Pseudo-scope: a new instance per injection point.
	pub const DEPENDENT: Scope = Scope(Cow::Borrowed("dependent"));

	pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
		Self(name.into())
	}

	pub fn name(&self) -> &str {
		&self.0
	}

	/// Whether instances of this scope bypass any cache.
	pub fn is_pseudo(&self) -> bool {
		*self == Self::DEPENDENT
	}
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Longevity of the singleton scope; nothing outlives it.
pub const SINGLETON_LONGEVITY: u32 = u32::MAX;

/// Per-scope cache of created instances, keyed by injectable.
pub trait ScopeResolver: Send + Sync {
	fn scope(&self) -> &Scope;

	/// Relative lifetime. A resolver with a lower value lives shorter, so an
	/// injectable may not depend on one with a lower value than its own.
	fn longevity(&self) -> u32;

	fn is_active(&self) -> bool;

	/// Cached context of `injectable` in the active scope instance.
	fn find(&self, injectable: &Injectable) -> Option<Arc<CreationalContext>>;

	/// Caches a completed context. Fails if the scope is not active.
	fn insert(&self, context: Arc<CreationalContext>) -> DiResult<()>;

	/// Removes the context of `injectable` from every scope instance without
	/// releasing it.
	fn remove(&self, injectable: &Injectable) -> Vec<Arc<CreationalContext>>;

	/// Releases every cached context, most recently created first.
	fn release_all(&self);
}

type ContextMap = IndexMap<Injectable, Arc<CreationalContext>>;

fn release_in_reverse(contexts: ContextMap) {
	for (_, context) in contexts.into_iter().rev() {
		context.release();
	}
}

/// Always-active scope holding one instance per injectable.
pub struct SingletonScope {
	scope: Scope,
	cache: RwLock<ContextMap>,
}

impl SingletonScope {
	pub fn new() -> Self {
		Self {
			scope: Scope::SINGLETON,
			cache: RwLock::new(IndexMap::new()),
		}
	}

	pub fn len(&self) -> usize {
		self.cache.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.cache.read().is_empty()
	}
}

impl Default for SingletonScope {
	fn default() -> Self {
		Self::new()
	}
}

impl ScopeResolver for SingletonScope {
	fn scope(&self) -> &Scope {
		&self.scope
	}

	fn longevity(&self) -> u32 {
		SINGLETON_LONGEVITY
	}

	fn is_active(&self) -> bool {
		true
	}

	fn find(&self, injectable: &Injectable) -> Option<Arc<CreationalContext>> {
		self.cache.read().get(injectable).cloned()
	}

	fn insert(&self, context: Arc<CreationalContext>) -> DiResult<()> {
		self.cache
			.write()
			.entry(context.injectable().clone())
			.or_insert(context);
		Ok(())
	}

	fn remove(&self, injectable: &Injectable) -> Vec<Arc<CreationalContext>> {
		self.cache
			.write()
			.shift_remove(injectable)
			.into_iter()
			.collect()
	}

	fn release_all(&self) {
		let contexts = std::mem::take(&mut *self.cache.write());
		release_in_reverse(contexts);
	}
}

#[derive(Default)]
struct ContextState {
	active: Option<String>,
	contexts: IndexMap<String, ContextMap>,
}

/// Switchable scope, e.g. a request or session scope.
///
/// Each scope instance is identified by a string id. Only one instance is
/// active at a time; instances stay cached until [`ContextScope::destroy`].
///
/// # Examples
///
/// ```
/// use lattice_di::{ContextScope, Scope, ScopeResolver};
///
/// let request = ContextScope::new(Scope::new("request"), 10);
/// assert!(!request.is_active());
///
/// request.activate("req-1");
/// assert!(request.is_active());
/// assert_eq!(request.active_id().as_deref(), Some("req-1"));
///
/// request.destroy("req-1");
/// assert!(!request.is_active());
/// ```
pub struct ContextScope {
	scope: Scope,
	longevity: u32,
	state: RwLock<ContextState>,
}

impl ContextScope {
	pub fn new(scope: Scope, longevity: u32) -> Self {
		Self {
			scope,
			longevity,
			state: RwLock::new(ContextState::default()),
		}
	}

	/// Makes `id` the active scope instance and returns the previous one.
	pub fn activate(&self, id: impl Into<String>) -> Option<String> {
		let id = id.into();
		let mut state = self.state.write();
		state.contexts.entry(id.clone()).or_default();
		tracing::debug!(scope = %self.scope, id = %id, "scope activated");
		state.active.replace(id)
	}

	/// Deactivates the current scope instance without releasing it.
	pub fn deactivate(&self) -> Option<String> {
		self.state.write().active.take()
	}

	/// Releases every context cached under `id`.
	pub fn destroy(&self, id: &str) {
		let contexts = {
			let mut state = self.state.write();
			if state.active.as_deref() == Some(id) {
				state.active = None;
			}
			state.contexts.shift_remove(id)
		};
		if let Some(contexts) = contexts {
			tracing::debug!(scope = %self.scope, id = %id, count = contexts.len(), "scope destroyed");
			release_in_reverse(contexts);
		}
	}

	pub fn active_id(&self) -> Option<String> {
		self.state.read().active.clone()
	}
}

impl ScopeResolver for ContextScope {
	fn scope(&self) -> &Scope {
		&self.scope
	}

	fn longevity(&self) -> u32 {
		self.longevity
	}

	fn is_active(&self) -> bool {
		self.state.read().active.is_some()
	}

	fn find(&self, injectable: &Injectable) -> Option<Arc<CreationalContext>> {
		let state = self.state.read();
		let active = state.active.as_ref()?;
		state.contexts.get(active)?.get(injectable).cloned()
	}

	fn insert(&self, context: Arc<CreationalContext>) -> DiResult<()> {
		let mut state = self.state.write();
		let ContextState { active, contexts } = &mut *state;
		let Some(active) = active.as_ref() else {
			return Err(DiError::ScopeNotActive {
				scope: self.scope.to_string(),
				producer: context.injectable().to_string(),
			});
		};
		contexts
			.entry(active.clone())
			.or_default()
			.entry(context.injectable().clone())
			.or_insert(context);
		Ok(())
	}

	fn remove(&self, injectable: &Injectable) -> Vec<Arc<CreationalContext>> {
		let mut state = self.state.write();
		state
			.contexts
			.values_mut()
			.filter_map(|contexts| contexts.shift_remove(injectable))
			.collect()
	}

	fn release_all(&self) {
		let contexts = {
			let mut state = self.state.write();
			state.active = None;
			std::mem::take(&mut state.contexts)
		};
		for (_, contexts) in contexts.into_iter().rev() {
			release_in_reverse(contexts);
		}
	}
}

/// Registered scope resolvers. The singleton scope is always present and the
/// dependent pseudo-scope is always known.
pub struct ScopeRegistry {
	resolvers: IndexMap<Scope, Arc<dyn ScopeResolver>>,
	contexts: HashMap<Scope, Arc<ContextScope>>,
}

impl ScopeRegistry {
	pub fn new() -> Self {
		let mut resolvers: IndexMap<Scope, Arc<dyn ScopeResolver>> = IndexMap::new();
		resolvers.insert(Scope::SINGLETON, Arc::new(SingletonScope::new()));
		Self {
			resolvers,
			contexts: HashMap::new(),
		}
	}

	/// Registers `resolver`, replacing any resolver of the same scope.
	pub fn register(&mut self, resolver: Arc<dyn ScopeResolver>) -> DiResult<()> {
		let scope = resolver.scope().clone();
		if scope.is_pseudo() {
			return Err(DiError::Config(format!(
				"scope `{scope}` is a pseudo-scope and cannot have a resolver"
			)));
		}
		self.contexts.remove(&scope);
		self.resolvers.insert(scope, resolver);
		Ok(())
	}

	/// Registers a switchable scope so it stays reachable for activation.
	pub fn register_context(&mut self, scope: Arc<ContextScope>) -> DiResult<()> {
		self.register(Arc::clone(&scope) as Arc<dyn ScopeResolver>)?;
		self.contexts.insert(scope.scope().clone(), scope);
		Ok(())
	}

	pub fn get(&self, scope: &Scope) -> Option<&Arc<dyn ScopeResolver>> {
		self.resolvers.get(scope)
	}

	pub fn context(&self, scope: &Scope) -> Option<&Arc<ContextScope>> {
		self.contexts.get(scope)
	}

	pub fn is_known(&self, scope: &Scope) -> bool {
		scope.is_pseudo() || self.resolvers.contains_key(scope)
	}

	pub fn longevity(&self, scope: &Scope) -> Option<u32> {
		self.resolvers.get(scope).map(|resolver| resolver.longevity())
	}

	pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
		self.resolvers.keys()
	}

	/// Releases every scope, most recently registered first.
	pub fn release_all(&self) {
		for resolver in self.resolvers.values().rev() {
			resolver.release_all();
		}
	}
}

impl Default for ScopeRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for ScopeRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.resolvers.keys()).finish()
	}
}
