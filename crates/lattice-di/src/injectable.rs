//! Injectable producers and the arguments handed to them
//!
//! An [`Injectable`] is an immutable description of one producer: the key it
//! is registered under, every type it can be requested as, its ordered
//! bindings, its scope and a discriminator telling apart producers that would
//! otherwise look identical (two factory members returning the same type).
//!
//! Instances travel through the container as [`Instance`] (`Arc<dyn Any>`).
//! The primary type is stored as `Arc<T>`; additional produced types are
//! stored as `Arc<Arc<U>>` by the caster registered with
//! [`InjectableBuilder::view`], which lets `U` be a trait object.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::binding::Binding;
use crate::error::{BoxError, DiError, DiResult};
use crate::instantiation::Deferred;
use crate::key::{Key, Qualifier, Type};
use crate::scope::Scope;

/// Type-erased produced value.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Producer = dyn Fn(&mut Arguments) -> Result<Instance, BoxError> + Send + Sync;
type Destroyer = dyn Fn(&Instance) + Send + Sync;
type Caster = dyn Fn(&Instance) -> Option<Instance> + Send + Sync;

/// Origin of a producer, used to tell apart producers of the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
	/// Primary constructor of a type
	Constructor(Type),
	/// Factory member declared on an owner type
	Factory {
		owner: Type,
		member: Cow<'static, str>,
	},
	/// Pre-built instance, identified by its address
	Instance { ty: Type, address: usize },
	/// Free-form origin supplied by a derivation strategy
	Named(Cow<'static, str>),
}

impl fmt::Display for Discriminator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Discriminator::Constructor(ty) => write!(f, "{ty}"),
			Discriminator::Factory { owner, member } => write!(f, "{owner}::{member}"),
			Discriminator::Instance { ty, address } => write!(f, "{ty}#{address:x}"),
			Discriminator::Named(name) => f.write_str(name),
		}
	}
}

struct Inner {
	key: Key,
	produced: IndexSet<Type>,
	bindings: Vec<Binding>,
	scope: Scope,
	discriminator: Discriminator,
	producer: Box<Producer>,
	destroyer: Option<Box<Destroyer>>,
	views: HashMap<Type, Box<Caster>>,
}

/// A registered producer of values for one or more types.
///
/// Cloning is cheap. Equality and hashing use the key and the discriminator.
///
/// # Examples
///
/// ```
/// use lattice_di::{Binding, Injectable, Key, Scope, instance};
/// use std::sync::Arc;
///
/// struct Engine;
/// struct Car(Arc<Engine>);
///
/// let car = Injectable::of::<Car>()
///     .scope(Scope::SINGLETON)
///     .binding(Binding::required(Key::of::<Engine>()))
///     .build(|args| Ok(instance(Car(args.take::<Engine>()?))))
///     .unwrap();
///
/// assert_eq!(car.bindings().len(), 1);
/// assert!(car.satisfies(&Key::of::<Car>()));
/// ```
#[derive(Clone)]
pub struct Injectable {
	inner: Arc<Inner>,
}

impl Injectable {
	/// Starts building a producer of `ty` originating from `discriminator`.
	pub fn builder(ty: Type, discriminator: Discriminator) -> InjectableBuilder {
		InjectableBuilder::new(ty, discriminator)
	}

	/// Starts building the primary constructor of `T`.
	pub fn of<T: ?Sized + 'static>() -> InjectableBuilder {
		let ty = Type::of::<T>();
		InjectableBuilder::new(ty, Discriminator::Constructor(ty))
	}

	/// Producer handing out an already built value.
	pub fn instance<T: Send + Sync + 'static>(
		value: Arc<T>,
		qualifiers: impl IntoIterator<Item = Qualifier>,
	) -> Self {
		let ty = Type::of::<T>();
		let address = Arc::as_ptr(&value).cast::<()>() as usize;
		let mut builder = InjectableBuilder::new(ty, Discriminator::Instance { ty, address })
			.scope(Scope::SINGLETON);
		builder.qualifiers.extend(qualifiers);
		let value: Instance = value;
		builder.finish(Box::new(move |_| Ok(Arc::clone(&value))))
	}

	pub fn key(&self) -> &Key {
		&self.inner.key
	}

	/// Primary produced type.
	pub fn ty(&self) -> Type {
		self.inner.key.ty()
	}

	pub fn qualifiers(&self) -> &BTreeSet<Qualifier> {
		self.inner.key.qualifiers()
	}

	/// Every type this producer can be requested as, primary type first.
	pub fn produced_types(&self) -> impl Iterator<Item = &Type> {
		self.inner.produced.iter()
	}

	pub fn bindings(&self) -> &[Binding] {
		&self.inner.bindings
	}

	pub fn scope(&self) -> &Scope {
		&self.inner.scope
	}

	pub fn discriminator(&self) -> &Discriminator {
		&self.inner.discriminator
	}

	/// Whether this producer can be handed out for `key`.
	pub fn satisfies(&self, key: &Key) -> bool {
		key.is_satisfied_by(self.produced_types(), self.qualifiers())
	}

	/// Invokes the create capability.
	pub fn produce(&self, arguments: &mut Arguments) -> Result<Instance, BoxError> {
		(self.inner.producer)(arguments)
	}

	pub fn has_destroyer(&self) -> bool {
		self.inner.destroyer.is_some()
	}

	/// Invokes the destroy capability, if any.
	pub fn destroy(&self, instance: &Instance) {
		if let Some(destroyer) = &self.inner.destroyer {
			destroyer(instance);
		}
	}

	/// Presents `instance` as `ty`. The primary type is returned unchanged.
	pub fn view(&self, ty: Type, instance: &Instance) -> Option<Instance> {
		if ty == self.ty() {
			return Some(Arc::clone(instance));
		}
		self.inner.views.get(&ty).and_then(|caster| caster(instance))
	}
}

impl PartialEq for Injectable {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
			|| (self.inner.key == other.inner.key
				&& self.inner.discriminator == other.inner.discriminator)
	}
}

impl Eq for Injectable {}

impl Hash for Injectable {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.inner.key.hash(state);
		self.inner.discriminator.hash(state);
	}
}

impl fmt::Debug for Injectable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Injectable")
			.field("key", &self.inner.key)
			.field("discriminator", &self.inner.discriminator)
			.field("scope", &self.inner.scope)
			.field("bindings", &self.inner.bindings)
			.finish()
	}
}

impl fmt::Display for Injectable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.inner.discriminator)?;
		for qualifier in self.qualifiers() {
			write!(f, " {qualifier}")?;
		}
		Ok(())
	}
}

/// Builder for [`Injectable`].
pub struct InjectableBuilder {
	ty: Type,
	discriminator: Discriminator,
	qualifiers: BTreeSet<Qualifier>,
	scope: Scope,
	bindings: Vec<Binding>,
	produced: IndexSet<Type>,
	views: HashMap<Type, Box<Caster>>,
	destroyer: Option<Box<Destroyer>>,
}

impl InjectableBuilder {
	fn new(ty: Type, discriminator: Discriminator) -> Self {
		let mut produced = IndexSet::new();
		produced.insert(ty);
		Self {
			ty,
			discriminator,
			qualifiers: BTreeSet::new(),
			scope: Scope::DEPENDENT,
			bindings: Vec::new(),
			produced,
			views: HashMap::new(),
			destroyer: None,
		}
	}

	pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
		self.qualifiers.insert(qualifier.into());
		self
	}

	/// Declared scope; defaults to [`Scope::DEPENDENT`].
	pub fn scope(mut self, scope: Scope) -> Self {
		self.scope = scope;
		self
	}

	/// Appends a binding. Arguments are handed to the producer in binding order.
	pub fn binding(mut self, binding: Binding) -> Self {
		self.bindings.push(binding);
		self
	}

	pub fn bindings(mut self, bindings: impl IntoIterator<Item = Binding>) -> Self {
		self.bindings.extend(bindings);
		self
	}

	/// Declares `ty` as an additional produced type, converted by `caster`.
	pub fn view<F>(mut self, ty: Type, caster: F) -> Self
	where
		F: Fn(&Instance) -> Option<Instance> + Send + Sync + 'static,
	{
		self.produced.insert(ty);
		self.views.insert(ty, Box::new(caster));
		self
	}

	pub fn on_destroy<F>(mut self, destroyer: F) -> Self
	where
		F: Fn(&Instance) + Send + Sync + 'static,
	{
		self.destroyer = Some(Box::new(destroyer));
		self
	}

	/// Validates the declaration and attaches the create capability.
	///
	/// Fails with [`DiError::Definition`] if the same key is bound twice with
	/// a different cardinality or laziness.
	pub fn build<F>(self, producer: F) -> DiResult<Injectable>
	where
		F: Fn(&mut Arguments) -> Result<Instance, BoxError> + Send + Sync + 'static,
	{
		for (index, binding) in self.bindings.iter().enumerate() {
			let conflict = self.bindings[..index].iter().find(|earlier| {
				earlier.key() == binding.key()
					&& (earlier.cardinality() != binding.cardinality()
						|| earlier.is_lazy() != binding.is_lazy())
			});
			if let Some(earlier) = conflict {
				return Err(DiError::Definition {
					producer: self.discriminator.to_string(),
					message: format!("conflicting bindings {earlier} and {binding}"),
				});
			}
		}
		Ok(self.finish(Box::new(producer)))
	}

	fn finish(self, producer: Box<Producer>) -> Injectable {
		Injectable {
			inner: Arc::new(Inner {
				key: Key::with_qualifiers(self.ty, self.qualifiers),
				produced: self.produced,
				bindings: self.bindings,
				scope: self.scope,
				discriminator: self.discriminator,
				producer,
				destroyer: self.destroyer,
				views: self.views,
			}),
		}
	}
}

/// Downcasts an instance stored either as `Arc<T>` or as a view `Arc<Arc<T>>`.
pub(crate) fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Option<Arc<T>> {
	match instance.downcast::<T>() {
		Ok(value) => Some(value),
		Err(instance) => downcast_view::<T>(instance),
	}
}

/// Downcasts a view stored as `Arc<Arc<U>>`; `U` may be a trait object.
pub(crate) fn downcast_view<U: ?Sized + Send + Sync + 'static>(
	instance: Instance,
) -> Option<Arc<U>> {
	instance
		.downcast::<Arc<U>>()
		.ok()
		.map(|view| Arc::clone(&*view))
}

/// One resolved binding value.
#[derive(Debug, Clone)]
pub enum Argument {
	/// Exactly-one binding
	Value(Instance),
	/// At-most-one binding
	Optional(Option<Instance>),
	/// Collection binding
	All(Vec<Instance>),
	/// Lazy binding of any cardinality
	Deferred(Deferred),
}

impl Argument {
	fn kind(&self) -> &'static str {
		match self {
			Argument::Value(_) => "value",
			Argument::Optional(_) => "optional value",
			Argument::All(_) => "collection",
			Argument::Deferred(_) => "deferred handle",
		}
	}
}

/// Failure while a producer reads its arguments.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ArgumentError {
	/// More arguments were read than bindings were declared
	#[error("argument {position} requested but only {available} binding(s) declared")]
	Exhausted { position: usize, available: usize },

	/// The argument does not have the requested shape or type
	#[error("argument {position} ({binding}) is a {found}, expected {expected}")]
	Mismatch {
		position: usize,
		binding: String,
		found: &'static str,
		expected: String,
	},
}

/// Resolved binding values, consumed by a producer in binding order.
pub struct Arguments {
	values: std::vec::IntoIter<(Binding, Argument)>,
	position: usize,
	available: usize,
}

impl Arguments {
	pub(crate) fn new(values: Vec<(Binding, Argument)>) -> Self {
		let available = values.len();
		Self {
			values: values.into_iter(),
			position: 0,
			available,
		}
	}

	/// Number of arguments not read yet.
	pub fn remaining(&self) -> usize {
		self.values.len()
	}

	/// Next raw argument.
	pub fn next_argument(&mut self) -> Result<Argument, ArgumentError> {
		self.next_positioned().map(|(_, _, argument)| argument)
	}

	/// Next exactly-one argument as `Arc<T>`.
	pub fn take<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>, ArgumentError> {
		let (position, binding, argument) = self.next_positioned()?;
		let found = argument.kind();
		let value = match argument {
			Argument::Value(instance) => downcast::<T>(instance),
			_ => None,
		};
		value.ok_or_else(|| mismatch::<T>(position, &binding, found))
	}

	/// Next exactly-one argument as a view, e.g. `Arc<dyn Trait>`.
	pub fn take_dyn<U: ?Sized + Send + Sync + 'static>(
		&mut self,
	) -> Result<Arc<U>, ArgumentError> {
		let (position, binding, argument) = self.next_positioned()?;
		let found = argument.kind();
		let value = match argument {
			Argument::Value(instance) => downcast_view::<U>(instance),
			_ => None,
		};
		value.ok_or_else(|| mismatch::<U>(position, &binding, found))
	}

	/// Next at-most-one argument.
	pub fn take_optional<T: Send + Sync + 'static>(
		&mut self,
	) -> Result<Option<Arc<T>>, ArgumentError> {
		let (position, binding, argument) = self.next_positioned()?;
		let found = argument.kind();
		match argument {
			Argument::Optional(None) => Ok(None),
			Argument::Optional(Some(instance)) => downcast::<T>(instance)
				.map(Some)
				.ok_or_else(|| mismatch::<T>(position, &binding, found)),
			_ => Err(mismatch::<T>(position, &binding, found)),
		}
	}

	/// Next collection argument.
	pub fn take_all<T: Send + Sync + 'static>(&mut self) -> Result<Vec<Arc<T>>, ArgumentError> {
		let (position, binding, argument) = self.next_positioned()?;
		let found = argument.kind();
		let values = match argument {
			Argument::All(instances) => instances
				.into_iter()
				.map(|instance| downcast::<T>(instance))
				.collect::<Option<Vec<_>>>(),
			_ => None,
		};
		values.ok_or_else(|| mismatch::<T>(position, &binding, found))
	}

	/// Next collection argument as views.
	pub fn take_all_dyn<U: ?Sized + Send + Sync + 'static>(
		&mut self,
	) -> Result<Vec<Arc<U>>, ArgumentError> {
		let (position, binding, argument) = self.next_positioned()?;
		let found = argument.kind();
		let values = match argument {
			Argument::All(instances) => instances
				.into_iter()
				.map(|instance| downcast_view::<U>(instance))
				.collect::<Option<Vec<_>>>(),
			_ => None,
		};
		values.ok_or_else(|| mismatch::<U>(position, &binding, found))
	}

	/// Next lazy argument.
	pub fn take_deferred(&mut self) -> Result<Deferred, ArgumentError> {
		let (position, binding, argument) = self.next_positioned()?;
		match argument {
			Argument::Deferred(deferred) => Ok(deferred),
			other => Err(ArgumentError::Mismatch {
				position,
				binding: binding.to_string(),
				found: other.kind(),
				expected: "deferred handle".to_string(),
			}),
		}
	}

	fn next_positioned(&mut self) -> Result<(usize, Binding, Argument), ArgumentError> {
		let position = self.position;
		let (binding, argument) = self.values.next().ok_or(ArgumentError::Exhausted {
			position,
			available: self.available,
		})?;
		self.position += 1;
		Ok((position, binding, argument))
	}
}

fn mismatch<T: ?Sized + 'static>(
	position: usize,
	binding: &Binding,
	found: &'static str,
) -> ArgumentError {
	ArgumentError::Mismatch {
		position,
		binding: binding.to_string(),
		found,
		expected: Type::of::<T>().to_string(),
	}
}

impl fmt::Debug for Arguments {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Arguments")
			.field("position", &self.position)
			.field("remaining", &self.remaining())
			.finish()
	}
}

/// Wraps `value` as an [`Instance`], for producers built by hand.
pub fn instance<T: Send + Sync + 'static>(value: T) -> Instance {
	Arc::new(value)
}
