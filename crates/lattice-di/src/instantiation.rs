//! Instantiation engine
//!
//! [`InstantiationContext`] turns a resolved injectable into an instance:
//! it consults the injectable's scope cache, recursively creates every
//! binding value, invokes the create capability and records the new
//! [`CreationalContext`] either in the scope cache or, for dependent-scoped
//! injectables, as a child of the context it was created for.
//!
//! The construction stack is an explicit value threaded through the
//! recursion. Re-entrant construction of an injectable that is still being
//! built is caught by the shared [`ConstructionTracker`].

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::binding::{Binding, Cardinality};
use crate::context::CreationalContext;
use crate::cycle_detection::ConstructionTracker;
use crate::error::{DiError, DiResult};
use crate::injectable::{Argument, Arguments, Injectable, Instance, downcast, downcast_view};
use crate::key::{Key, Type};
use crate::scope::{ScopeRegistry, ScopeResolver};
use crate::store::Store;

/// Container capability used by deferred handles.
pub trait DeferredTarget: Send + Sync {
	fn instance(&self, key: &Key) -> DiResult<Instance>;
	fn find_instance(&self, key: &Key) -> DiResult<Option<Instance>>;
	fn instances(&self, key: &Key) -> DiResult<Vec<Instance>>;
}

/// Handle injected for a lazy binding, resolved on demand.
///
/// The handle does not keep its container alive; using it after the
/// container is dropped fails with [`DiError::ContainerClosed`].
#[derive(Clone)]
pub struct Deferred {
	binding: Binding,
	target: Weak<dyn DeferredTarget>,
}

impl Deferred {
	pub(crate) fn new(binding: Binding, target: Weak<dyn DeferredTarget>) -> Self {
		Self { binding, target }
	}

	pub fn binding(&self) -> &Binding {
		&self.binding
	}

	pub fn key(&self) -> &Key {
		self.binding.key()
	}

	fn target(&self) -> DiResult<Arc<dyn DeferredTarget>> {
		self.target.upgrade().ok_or(DiError::ContainerClosed)
	}

	/// Resolves exactly one instance of the key.
	pub fn get(&self) -> DiResult<Instance> {
		self.target()?.instance(self.key())
	}

	/// Resolves zero or one instance of the key.
	pub fn find(&self) -> DiResult<Option<Instance>> {
		self.target()?.find_instance(self.key())
	}

	/// Resolves every instance of the key.
	pub fn get_all(&self) -> DiResult<Vec<Instance>> {
		self.target()?.instances(self.key())
	}

	/// Resolves exactly one instance as `Arc<T>`.
	pub fn get_as<T: Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
		let instance = self.get()?;
		downcast::<T>(instance).ok_or_else(|| self.mismatch::<T>())
	}

	/// Resolves exactly one instance as a view, e.g. `Arc<dyn Trait>`.
	pub fn get_dyn<U: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<U>> {
		let instance = self.get()?;
		downcast_view::<U>(instance).ok_or_else(|| self.mismatch::<U>())
	}

	fn mismatch<T: ?Sized + 'static>(&self) -> DiError {
		DiError::TypeMismatch {
			expected: Type::of::<T>().to_string(),
			producer: self.key().to_string(),
		}
	}
}

impl fmt::Debug for Deferred {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Deferred")
			.field("binding", &self.binding)
			.field("open", &(self.target.strong_count() > 0))
			.finish()
	}
}

/// Contexts under construction, innermost last.
#[derive(Debug, Default)]
pub struct ConstructionStack {
	contexts: Vec<Arc<CreationalContext>>,
}

impl ConstructionStack {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, context: Arc<CreationalContext>) {
		self.contexts.push(context);
	}

	pub fn pop(&mut self) -> Option<Arc<CreationalContext>> {
		self.contexts.pop()
	}

	pub fn top(&self) -> Option<&Arc<CreationalContext>> {
		self.contexts.last()
	}

	pub fn len(&self) -> usize {
		self.contexts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.contexts.is_empty()
	}
}

/// Recursive construction over a store and its scopes.
///
/// Store locks are taken only to resolve keys and are never held while a
/// producer runs, so producers may call back into their container.
pub struct InstantiationContext<'a> {
	store: &'a RwLock<Store>,
	scopes: &'a ScopeRegistry,
	tracker: &'a ConstructionTracker,
	detached: &'a Mutex<Vec<Arc<CreationalContext>>>,
	deferred: Weak<dyn DeferredTarget>,
}

impl<'a> InstantiationContext<'a> {
	pub fn new(
		store: &'a RwLock<Store>,
		scopes: &'a ScopeRegistry,
		tracker: &'a ConstructionTracker,
		detached: &'a Mutex<Vec<Arc<CreationalContext>>>,
		deferred: Weak<dyn DeferredTarget>,
	) -> Self {
		Self {
			store,
			scopes,
			tracker,
			detached,
			deferred,
		}
	}

	/// Creates the single instance satisfying `key`.
	///
	/// Fails if there is no candidate or more than one, or if the candidate's
	/// scope is not active.
	pub fn create(&self, key: &Key) -> DiResult<Instance> {
		self.create_in(key, None, &mut ConstructionStack::new())
	}

	/// Like [`create`](Self::create), but zero candidates or an inactive
	/// scope yield `None`.
	pub fn find(&self, key: &Key) -> DiResult<Option<Instance>> {
		self.find_in(key, &mut ConstructionStack::new())
	}

	/// Creates every instance satisfying `key`, skipping candidates whose
	/// scope is not active.
	pub fn create_all(&self, key: &Key) -> DiResult<Vec<Instance>> {
		self.create_all_in(key, &mut ConstructionStack::new())
	}

	fn create_in(
		&self,
		key: &Key,
		owner: Option<&Injectable>,
		stack: &mut ConstructionStack,
	) -> DiResult<Instance> {
		let injectable = self.resolve_single(key)?.ok_or_else(|| {
			DiError::UnresolvableDependency {
				key: key.to_string(),
				required_by: owner.map(ToString::to_string),
			}
		})?;
		let instance = self.instantiate(&injectable, stack)?;
		view(&injectable, key, &instance)
	}

	fn find_in(&self, key: &Key, stack: &mut ConstructionStack) -> DiResult<Option<Instance>> {
		let Some(injectable) = self.resolve_single(key)? else {
			return Ok(None);
		};
		if !self.is_active(&injectable) {
			return Ok(None);
		}
		let instance = self.instantiate(&injectable, stack)?;
		view(&injectable, key, &instance).map(Some)
	}

	fn create_all_in(&self, key: &Key, stack: &mut ConstructionStack) -> DiResult<Vec<Instance>> {
		let candidates = self.store.read().resolve(key);
		let mut instances = Vec::with_capacity(candidates.len());
		for injectable in candidates {
			if !self.is_active(&injectable) {
				tracing::debug!(injectable = %injectable, "skipping candidate in inactive scope");
				continue;
			}
			let instance = self.instantiate(&injectable, stack)?;
			instances.push(view(&injectable, key, &instance)?);
		}
		Ok(instances)
	}

	fn resolve_single(&self, key: &Key) -> DiResult<Option<Injectable>> {
		let mut candidates = self.store.read().resolve(key);
		match candidates.len() {
			0 => Ok(None),
			1 => Ok(candidates.pop()),
			_ => Err(DiError::AmbiguousResolution {
				key: key.to_string(),
				candidates: candidates.iter().map(ToString::to_string).collect(),
			}),
		}
	}

	fn resolver(&self, injectable: &Injectable) -> DiResult<Option<&Arc<dyn ScopeResolver>>> {
		let scope = injectable.scope();
		if scope.is_pseudo() {
			return Ok(None);
		}
		self.scopes
			.get(scope)
			.map(Some)
			.ok_or_else(|| DiError::UnknownScope {
				scope: scope.to_string(),
				producer: injectable.to_string(),
			})
	}

	fn is_active(&self, injectable: &Injectable) -> bool {
		match self.resolver(injectable) {
			Ok(Some(resolver)) => resolver.is_active(),
			Ok(None) => true,
			Err(_) => false,
		}
	}

	/// Creates or reuses the instance of `injectable`, as its primary type.
	pub fn instantiate(
		&self,
		injectable: &Injectable,
		stack: &mut ConstructionStack,
	) -> DiResult<Instance> {
		let resolver = self.resolver(injectable)?;
		if let Some(resolver) = resolver {
			if !resolver.is_active() {
				return Err(DiError::ScopeNotActive {
					scope: injectable.scope().to_string(),
					producer: injectable.to_string(),
				});
			}
			if let Some(cached) = resolver.find(injectable)
				&& let Some(instance) = cached.instance()
			{
				tracing::trace!(injectable = %injectable, "scope cache hit");
				return Ok(Arc::clone(instance));
			}
		}

		let _guard = self.tracker.begin(injectable)?;
		let parent = if resolver.is_none() {
			stack.top().cloned()
		} else {
			None
		};
		let context = CreationalContext::new(injectable.clone(), parent.as_ref());

		stack.push(Arc::clone(&context));
		let produced = self.arguments(injectable, stack).and_then(|mut arguments| {
			injectable
				.produce(&mut arguments)
				.map_err(|source| DiError::creation(injectable, source))
		});
		stack.pop();

		let instance = match produced {
			Ok(instance) => instance,
			Err(error) => {
				context.release();
				return Err(error);
			}
		};
		context.complete(Arc::clone(&instance));
		tracing::debug!(injectable = %injectable, scope = %injectable.scope(), "instance created");

		match resolver {
			Some(resolver) => {
				if let Err(error) = resolver.insert(Arc::clone(&context)) {
					context.release();
					return Err(error);
				}
			}
			None => match stack.top() {
				Some(parent) => parent.attach(context),
				None if context.needs_release() => self.detached.lock().push(context),
				None => {
					tracing::trace!(injectable = %injectable, "dependent root has nothing to destroy");
				}
			},
		}
		Ok(instance)
	}

	fn arguments(&self, owner: &Injectable, stack: &mut ConstructionStack) -> DiResult<Arguments> {
		let mut values = Vec::with_capacity(owner.bindings().len());
		for binding in owner.bindings() {
			let key = binding.key();
			let argument = if binding.is_lazy() {
				Argument::Deferred(Deferred::new(binding.clone(), self.deferred.clone()))
			} else {
				match binding.cardinality() {
					Cardinality::ExactlyOne => Argument::Value(self.create_in(key, Some(owner), stack)?),
					Cardinality::AtMostOne => Argument::Optional(self.find_in(key, stack)?),
					Cardinality::Many => Argument::All(self.create_all_in(key, stack)?),
				}
			};
			values.push((binding.clone(), argument));
		}
		Ok(Arguments::new(values))
	}
}

fn view(injectable: &Injectable, key: &Key, instance: &Instance) -> DiResult<Instance> {
	injectable
		.view(key.ty(), instance)
		.ok_or_else(|| DiError::TypeMismatch {
			expected: key.ty().to_string(),
			producer: injectable.to_string(),
		})
}
