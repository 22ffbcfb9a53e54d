//! Container
//!
//! [`Container`] is the caller surface over a [`Store`], a [`Gatherer`] and
//! the instantiation engine. Registration and removal are transactional: a
//! failing call leaves the container exactly as it was.
//!
//! ```rust
//! use std::sync::Arc;
//! use lattice_di::{Catalog, Container, Scope};
//!
//! struct Config {
//!     url: String,
//! }
//!
//! struct Repository {
//!     config: Arc<Config>,
//! }
//!
//! let catalog = Arc::new(Catalog::new());
//! catalog
//!     .declare::<Config>()
//!     .scope(Scope::SINGLETON)
//!     .construct(|_| Ok(Config { url: "sqlite::memory:".to_string() }))
//!     .unwrap();
//! catalog
//!     .declare::<Repository>()
//!     .requires::<Config>()
//!     .construct(|args| Ok(Repository { config: args.take()? }))
//!     .unwrap();
//!
//! let container = Container::builder().catalog(catalog).build().unwrap();
//!
//! // `Config` is discovered through the binding of `Repository`
//! let repository = container.get::<Repository>().unwrap();
//! assert_eq!(repository.config.url, "sqlite::memory:");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::catalog::{Catalog, FactoryStrategy};
use crate::config::ContainerConfig;
use crate::context::CreationalContext;
use crate::cycle_detection::ConstructionTracker;
use crate::error::{DiError, DiResult};
use crate::gatherer::{BindingSource, DerivationStrategy, Gatherer};
use crate::injectable::{Discriminator, Injectable, Instance, downcast, downcast_view};
use crate::instantiation::{DeferredTarget, InstantiationContext};
use crate::key::{Key, Qualifier, Type};
use crate::scope::{ContextScope, Scope, ScopeRegistry, ScopeResolver};
use crate::store::Store;

/// Dependency injection container. Clones share the same state.
#[derive(Clone)]
pub struct Container {
	inner: Arc<Inner>,
}

struct Inner {
	lock: ReentrantMutex<()>,
	store: RwLock<Store>,
	scopes: ScopeRegistry,
	gatherer: Gatherer,
	tracker: ConstructionTracker,
	detached: Mutex<Vec<Arc<CreationalContext>>>,
	config: ContainerConfig,
	closed: AtomicBool,
	this: Weak<Inner>,
}

impl Container {
	pub fn builder() -> ContainerBuilder {
		ContainerBuilder::new()
	}

	/// Container with default settings and no binding source.
	pub fn new() -> Self {
		Self::from_parts(
			ContainerConfig::default(),
			ScopeRegistry::new(),
			Gatherer::new(None, Vec::new(), true),
		)
	}

	fn from_parts(config: ContainerConfig, scopes: ScopeRegistry, gatherer: Gatherer) -> Self {
		let inner = Arc::new_cyclic(|this| Inner {
			lock: ReentrantMutex::new(()),
			store: RwLock::new(Store::new()),
			scopes,
			gatherer,
			tracker: ConstructionTracker::new(config.max_resolution_depth),
			detached: Mutex::new(Vec::new()),
			config,
			closed: AtomicBool::new(false),
			this: this.clone(),
		});
		Self { inner }
	}

	/// Registers the producers of `types` together with everything the
	/// gatherer derives for them. Returns the committed injectables.
	pub fn register(&self, types: &[Type]) -> DiResult<Vec<Injectable>> {
		self.inner.register(types)
	}

	/// Registers the producer of `T`.
	pub fn register_type<T: ?Sized + 'static>(&self) -> DiResult<Vec<Injectable>> {
		self.inner.register(&[Type::of::<T>()])
	}

	/// Removes the producers of `types` and the factory members they own,
	/// releasing their cached instances.
	pub fn remove(&self, types: &[Type]) -> DiResult<()> {
		self.inner.remove(types)
	}

	/// Commits prebuilt injectables as one batch.
	pub fn register_injectables(&self, batch: &[Injectable]) -> DiResult<()> {
		self.inner.register_injectables(batch)
	}

	pub fn remove_injectables(&self, batch: &[Injectable]) -> DiResult<()> {
		self.inner.remove_injectables(batch)
	}

	/// Registers an already built value as a singleton producer.
	pub fn register_instance<T: Send + Sync + 'static>(
		&self,
		value: Arc<T>,
		qualifiers: impl IntoIterator<Item = Qualifier>,
	) -> DiResult<Injectable> {
		let injectable = Injectable::instance(value, qualifiers);
		self.inner.register_injectables(std::slice::from_ref(&injectable))?;
		Ok(injectable)
	}

	/// Removes a value previously passed to
	/// [`register_instance`](Self::register_instance).
	pub fn remove_instance<T: Send + Sync + 'static>(&self, value: &Arc<T>) -> DiResult<()> {
		let ty = Type::of::<T>();
		let address = Arc::as_ptr(value).cast::<()>() as usize;
		let registered: Vec<Injectable> = self
			.inner
			.store
			.read()
			.of_type(ty)
			.filter(|injectable| {
				matches!(
					injectable.discriminator(),
					Discriminator::Instance { address: a, .. } if *a == address
				)
			})
			.cloned()
			.collect();
		if registered.is_empty() {
			return Err(DiError::NotRegistered(format!("{ty}#{address:x}")));
		}
		self.inner.remove_injectables(&registered)
	}

	/// Whether any registered injectable satisfies `key`.
	pub fn contains(&self, key: &Key) -> bool {
		self.inner.store.read().contains(key)
	}

	/// The single instance satisfying `key`.
	///
	/// With auto-discovery enabled, an unregistered key is first gathered
	/// and committed. If construction then fails, the discovered injectables
	/// are removed again.
	pub fn get_instance(&self, key: &Key) -> DiResult<Instance> {
		self.inner.get_instance(key)
	}

	/// Zero or one instance satisfying `key`. Never discovers.
	pub fn find_instance(&self, key: &Key) -> DiResult<Option<Instance>> {
		self.inner.find_instance(key)
	}

	/// Every instance satisfying `key` whose scope is active. Never
	/// discovers.
	pub fn get_instances(&self, key: &Key) -> DiResult<Vec<Instance>> {
		self.inner.instances(key)
	}

	/// Typed [`get_instance`](Self::get_instance).
	pub fn get<T: Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
		self.get_qualified::<T>(Key::of::<T>())
	}

	/// Typed lookup of a qualified key of type `T`.
	pub fn get_qualified<T: Send + Sync + 'static>(&self, key: Key) -> DiResult<Arc<T>> {
		let instance = self.get_instance(&key)?;
		downcast::<T>(instance).ok_or_else(|| mismatch::<T>(&key))
	}

	/// Lookup through a typed view, e.g. `get_dyn::<dyn Greeter>()`.
	pub fn get_dyn<U: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<U>> {
		let key = Key::of::<U>();
		let instance = self.get_instance(&key)?;
		downcast_view::<U>(instance).ok_or_else(|| mismatch::<U>(&key))
	}

	pub fn get_all<T: Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<T>>> {
		let key = Key::of::<T>();
		self.get_instances(&key)?
			.into_iter()
			.map(|instance| downcast::<T>(instance).ok_or_else(|| mismatch::<T>(&key)))
			.collect()
	}

	pub fn get_all_dyn<U: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<U>>> {
		let key = Key::of::<U>();
		self.get_instances(&key)?
			.into_iter()
			.map(|instance| downcast_view::<U>(instance).ok_or_else(|| mismatch::<U>(&key)))
			.collect()
	}

	/// Releases a dependent-scoped instance obtained directly from this
	/// container, cascading to the dependents created for it.
	///
	/// Returns `false` if `value` is not such an instance, or if nothing in
	/// its context had a destroy capability and it was never retained.
	pub fn destroy_instance<T: ?Sized>(&self, value: &Arc<T>) -> bool {
		self.inner.destroy_instance(Arc::as_ptr(value).cast::<()>())
	}

	/// Releases every cached and detached instance, most recent first.
	/// Later calls fail with [`DiError::ContainerClosed`].
	pub fn close(&self) {
		self.inner.close();
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	/// Snapshot of the registered injectables, in registration order.
	pub fn injectables(&self) -> Vec<Injectable> {
		self.inner.store.read().injectables().cloned().collect()
	}

	pub fn scope(&self, scope: &Scope) -> Option<Arc<dyn ScopeResolver>> {
		self.inner.scopes.get(scope).cloned()
	}

	/// Switchable scope registered under `scope`, for activation.
	pub fn context_scope(&self, scope: &Scope) -> Option<Arc<ContextScope>> {
		self.inner.scopes.context(scope).cloned()
	}

	pub fn config(&self) -> &ContainerConfig {
		&self.inner.config
	}

	/// Graph of the committed store.
	#[cfg(feature = "dev-tools")]
	pub fn dependency_graph(&self) -> crate::visualization::DependencyGraph {
		crate::visualization::DependencyGraph::from_store(&self.inner.store.read())
	}
}

impl Default for Container {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for Container {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Container")
			.field("injectables", &self.inner.store.read().len())
			.field("scopes", &self.inner.scopes)
			.field("gatherer", &self.inner.gatherer)
			.field("closed", &self.is_closed())
			.finish()
	}
}

fn mismatch<T: ?Sized + 'static>(key: &Key) -> DiError {
	DiError::TypeMismatch {
		expected: Type::of::<T>().to_string(),
		producer: key.to_string(),
	}
}

impl Inner {
	fn ensure_open(&self) -> DiResult<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(DiError::ContainerClosed);
		}
		Ok(())
	}

	fn instantiation(&self) -> InstantiationContext<'_> {
		let target: Weak<dyn DeferredTarget> = self.this.clone();
		InstantiationContext::new(
			&self.store,
			&self.scopes,
			&self.tracker,
			&self.detached,
			target,
		)
	}

	fn register(&self, types: &[Type]) -> DiResult<Vec<Injectable>> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		let keys: Vec<Key> = types.iter().copied().map(Key::new).collect();
		let batch = self.gatherer.gather(&self.store.read(), &keys)?;
		self.store.write().put(&batch, &self.scopes)?;
		tracing::debug!(requested = types.len(), committed = batch.len(), "types registered");
		Ok(batch)
	}

	fn remove(&self, types: &[Type]) -> DiResult<()> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		let mut batch = Vec::new();
		{
			let store = self.store.read();
			for &ty in types {
				let owned: Vec<Injectable> = store
					.injectables()
					.filter(|injectable| match injectable.discriminator() {
						Discriminator::Constructor(produced) => *produced == ty,
						Discriminator::Factory { owner, .. } => *owner == ty,
						_ => false,
					})
					.cloned()
					.collect();
				if owned.is_empty() {
					return Err(DiError::NotRegistered(ty.to_string()));
				}
				batch.extend(owned);
			}
		}
		self.remove_injectables(&batch)
	}

	fn register_injectables(&self, batch: &[Injectable]) -> DiResult<()> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		self.store.write().put(batch, &self.scopes)
	}

	fn remove_injectables(&self, batch: &[Injectable]) -> DiResult<()> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		self.store.write().remove(batch)?;
		for injectable in batch {
			self.release_cached(injectable);
		}
		Ok(())
	}

	fn release_cached(&self, injectable: &Injectable) {
		if let Some(resolver) = self.scopes.get(injectable.scope()) {
			for context in resolver.remove(injectable).into_iter().rev() {
				context.release();
			}
		}
	}

	/// Gathers and commits the producers of an unregistered key. Returns
	/// the committed injectables.
	fn discover(&self, key: &Key) -> DiResult<Vec<Injectable>> {
		if !self.gatherer.auto_discovery() || self.store.read().contains(key) {
			return Ok(Vec::new());
		}
		tracing::debug!(key = %key, "discovering unregistered key");
		let batch = self.gatherer.gather(&self.store.read(), std::slice::from_ref(key))?;
		self.store.write().put(&batch, &self.scopes)?;
		Ok(batch)
	}

	fn get_instance(&self, key: &Key) -> DiResult<Instance> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		let discovered = self.discover(key)?;
		let result = self.instantiation().create(key);
		if result.is_err() && !discovered.is_empty() {
			self.roll_back(&discovered);
		}
		result
	}

	fn roll_back(&self, discovered: &[Injectable]) {
		match self.store.write().remove(discovered) {
			Ok(()) => {
				for injectable in discovered {
					self.release_cached(injectable);
				}
				tracing::debug!(removed = discovered.len(), "discovered injectables rolled back");
			}
			Err(error) => {
				tracing::warn!(error = %error, "failed to roll back discovered injectables");
			}
		}
	}

	fn find_instance(&self, key: &Key) -> DiResult<Option<Instance>> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		self.instantiation().find(key)
	}

	fn instances(&self, key: &Key) -> DiResult<Vec<Instance>> {
		let _guard = self.lock.lock();
		self.ensure_open()?;
		self.instantiation().create_all(key)
	}

	fn destroy_instance(&self, address: *const ()) -> bool {
		let _guard = self.lock.lock();
		let context = {
			let mut detached = self.detached.lock();
			let position = detached.iter().position(|context| {
				context
					.instance()
					.is_some_and(|instance| Arc::as_ptr(instance).cast::<()>() == address)
			});
			position.map(|index| detached.remove(index))
		};
		match context {
			Some(context) => {
				context.release();
				true
			}
			None => false,
		}
	}

	fn close(&self) {
		let _guard = self.lock.lock();
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		let detached = std::mem::take(&mut *self.detached.lock());
		for context in detached.into_iter().rev() {
			context.release();
		}
		self.scopes.release_all();
		tracing::debug!("container closed");
	}
}

impl DeferredTarget for Inner {
	fn instance(&self, key: &Key) -> DiResult<Instance> {
		self.get_instance(key)
	}

	fn find_instance(&self, key: &Key) -> DiResult<Option<Instance>> {
		Inner::find_instance(self, key)
	}

	fn instances(&self, key: &Key) -> DiResult<Vec<Instance>> {
		Inner::instances(self, key)
	}
}

/// Builder for [`Container`]
#[derive(Default)]
pub struct ContainerBuilder {
	config: ContainerConfig,
	source: Option<Arc<dyn BindingSource>>,
	strategies: Vec<Arc<dyn DerivationStrategy>>,
	resolvers: Vec<Arc<dyn ScopeResolver>>,
	contexts: Vec<Arc<ContextScope>>,
}

impl ContainerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn config(mut self, config: ContainerConfig) -> Self {
		self.config = config;
		self
	}

	pub fn auto_discovery(mut self, enabled: bool) -> Self {
		self.config.auto_discovery = enabled;
		self
	}

	pub fn max_resolution_depth(mut self, depth: usize) -> Self {
		self.config.max_resolution_depth = depth;
		self
	}

	/// Binding source used to build default injectables.
	pub fn source(mut self, source: Arc<dyn BindingSource>) -> Self {
		self.source = Some(source);
		self
	}

	/// Uses `catalog` as binding source and derives its factory members.
	pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
		self.strategies
			.push(Arc::new(FactoryStrategy::new(Arc::clone(&catalog))));
		self.source = Some(catalog);
		self
	}

	pub fn strategy(mut self, strategy: Arc<dyn DerivationStrategy>) -> Self {
		self.strategies.push(strategy);
		self
	}

	pub fn scope(mut self, resolver: Arc<dyn ScopeResolver>) -> Self {
		self.resolvers.push(resolver);
		self
	}

	/// Registers a switchable scope, reachable through
	/// [`Container::context_scope`].
	pub fn context_scope(mut self, scope: Arc<ContextScope>) -> Self {
		self.contexts.push(scope);
		self
	}

	pub fn build(self) -> DiResult<Container> {
		self.config.validate()?;
		let mut scopes = ScopeRegistry::new();
		for scope in &self.config.scopes {
			scopes.register_context(Arc::new(ContextScope::new(
				Scope::new(scope.name.clone()),
				scope.longevity,
			)))?;
		}
		for resolver in self.resolvers {
			scopes.register(resolver)?;
		}
		for context in self.contexts {
			scopes.register_context(context)?;
		}
		let gatherer = Gatherer::new(self.source, self.strategies, self.config.auto_discovery);
		tracing::debug!(scopes = ?scopes, auto_discovery = self.config.auto_discovery, "container built");
		Ok(Container::from_parts(self.config, scopes, gatherer))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::injectable::instance;
	use rstest::rstest;
	use std::sync::atomic::AtomicUsize;

	#[derive(Debug)]
	struct Config(&'static str);
	#[derive(Debug)]
	struct Service(Arc<Config>);
	#[derive(Debug)]
	struct Broken;

	fn catalog() -> Arc<Catalog> {
		let catalog = Arc::new(Catalog::new());
		catalog
			.declare::<Config>()
			.scope(Scope::SINGLETON)
			.construct(|_| Ok(Config("memory")))
			.unwrap();
		catalog
			.declare::<Service>()
			.requires::<Config>()
			.construct(|args| Ok(Service(args.take()?)))
			.unwrap();
		catalog
			.declare::<Broken>()
			.requires::<Config>()
			.construct(|_| Err("refused".into()))
			.unwrap();
		catalog
	}

	#[rstest]
	fn test_lazy_discovery_commits_dependencies() {
		// Arrange
		let container = Container::builder().catalog(catalog()).build().unwrap();

		// Act
		let service = container.get::<Service>().unwrap();

		// Assert
		assert_eq!(service.0.0, "memory");
		assert!(container.contains(&Key::of::<Service>()));
		assert!(container.contains(&Key::of::<Config>()));
	}

	#[rstest]
	fn test_failed_lookup_rolls_back_discovery() {
		// Arrange
		let container = Container::builder().catalog(catalog()).build().unwrap();

		// Act
		let error = container.get::<Broken>().unwrap_err();

		// Assert
		assert!(matches!(error, DiError::Creation { .. }));
		assert!(container.injectables().is_empty());
	}

	#[rstest]
	fn test_lookup_without_discovery() {
		// Arrange
		let container = Container::builder()
			.catalog(catalog())
			.auto_discovery(false)
			.build()
			.unwrap();

		// Act
		let error = container.get::<Config>().unwrap_err();

		// Assert
		assert!(matches!(error, DiError::UnresolvableDependency { .. }));
	}

	#[rstest]
	fn test_register_and_remove_types() {
		// Arrange
		let container = Container::builder().catalog(catalog()).build().unwrap();
		container.register_type::<Service>().unwrap();

		// Act
		let blocked = container.remove(&[Type::of::<Config>()]);
		container.remove(&[Type::of::<Service>(), Type::of::<Config>()]).unwrap();

		// Assert
		assert!(matches!(
			blocked.unwrap_err().root(),
			DiError::SingularDependencyViolation { .. }
		));
		assert!(container.injectables().is_empty());
	}

	#[rstest]
	fn test_register_instance_round_trip() {
		// Arrange
		let container = Container::new();
		let config = Arc::new(Config("shared"));

		// Act
		container
			.register_instance(Arc::clone(&config), Vec::<Qualifier>::new())
			.unwrap();
		let resolved = container.get::<Config>().unwrap();
		container.remove_instance(&config).unwrap();

		// Assert
		assert!(Arc::ptr_eq(&resolved, &config));
		assert!(!container.contains(&Key::of::<Config>()));
	}

	#[rstest]
	fn test_destroy_detached_instance() {
		// Arrange
		let destroyed = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&destroyed);
		let container = Container::new();
		let injectable = Injectable::of::<Config>()
			.on_destroy(move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.build(|_| Ok(instance(Config("transient"))))
			.unwrap();
		container.register_injectables(&[injectable]).unwrap();
		let value = container.get::<Config>().unwrap();

		// Act
		let first = container.destroy_instance(&value);
		let second = container.destroy_instance(&value);

		// Assert
		assert!(first);
		assert!(!second);
		assert_eq!(destroyed.load(Ordering::SeqCst), 1);
	}

	#[rstest]
	fn test_destroy_less_dependent_is_not_retained() {
		// Arrange
		let container = Container::new();
		let injectable = Injectable::of::<Config>()
			.build(|_| Ok(instance(Config("transient"))))
			.unwrap();
		container.register_injectables(&[injectable]).unwrap();
		let values: Vec<Arc<Config>> = (0..100)
			.map(|_| container.get::<Config>().unwrap())
			.collect();

		// Act
		let destroyed = values
			.iter()
			.filter(|value| container.destroy_instance(*value))
			.count();

		// Assert
		assert_eq!(destroyed, 0);
		assert!(container.inner.detached.lock().is_empty());
	}

	#[rstest]
	#[case("singleton")]
	#[case("dependent")]
	fn test_configured_scope_cannot_shadow_builtin(#[case] name: &str) {
		// Arrange
		let config = ContainerConfig::new().with_scope(name, 1);

		// Act
		let error = Container::builder().config(config).build().unwrap_err();

		// Assert
		assert!(matches!(error, DiError::Config(ref message) if message.contains("reserved")));
	}

	#[rstest]
	fn test_closed_container_rejects_lookups() {
		// Arrange
		let container = Container::builder().catalog(catalog()).build().unwrap();
		container.get::<Service>().unwrap();

		// Act
		container.close();

		// Assert
		assert!(container.is_closed());
		assert!(matches!(container.get::<Service>(), Err(DiError::ContainerClosed)));
	}
}
