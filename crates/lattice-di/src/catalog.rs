//! Builder-based producer declarations
//!
//! A [`Catalog`] records how each type is produced: its qualifiers, scope,
//! ordered bindings, additional produced types and constructor. It serves as
//! the [`BindingSource`] of a container, and [`FactoryStrategy`] derives the
//! factory members declared on a type whenever that type becomes visible to
//! the gatherer.
//!
//! # Examples
//!
//! ```
//! use lattice_di::{Catalog, Scope};
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct Config { name: String }
//! struct English { config: Arc<Config> }
//!
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         format!("Hello, {}", self.config.name)
//!     }
//! }
//!
//! let catalog = Catalog::new();
//! catalog
//!     .declare::<Config>()
//!     .scope(Scope::SINGLETON)
//!     .construct(|_| Ok(Config { name: "lattice".into() }))
//!     .unwrap();
//! catalog
//!     .declare::<English>()
//!     .requires::<Config>()
//!     .provides::<dyn Greeter>(|english| english)
//!     .construct(|args| Ok(English { config: args.take()? }))
//!     .unwrap();
//!
//! assert!(catalog.is_declared::<English>());
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::binding::Binding;
use crate::error::{BoxError, DiError, DiResult};
use crate::gatherer::{BindingSource, DerivationStrategy};
use crate::injectable::{Arguments, Discriminator, Injectable, InjectableBuilder, Instance};
use crate::key::{Key, Qualifier, Type};
use crate::scope::Scope;

/// Declared producers, by produced type and by factory owner.
#[derive(Default)]
pub struct Catalog {
	primary: RwLock<HashMap<Type, Injectable>>,
	members: RwLock<HashMap<Type, Vec<Injectable>>>,
}

impl Catalog {
	pub fn new() -> Self {
		Self::default()
	}

	/// Declares the primary producer of `T`.
	pub fn declare<T: Send + Sync + 'static>(&self) -> Declaration<'_, T, Primary> {
		let ty = Type::of::<T>();
		Declaration::new(self, ty, Discriminator::Constructor(ty))
	}

	/// Declares a factory member of `O` producing `P`.
	pub fn factory<O, P>(&self, member: impl Into<Cow<'static, str>>) -> Declaration<'_, P, Member<O>>
	where
		O: Send + Sync + 'static,
		P: Send + Sync + 'static,
	{
		Declaration::new(
			self,
			Type::of::<P>(),
			Discriminator::Factory {
				owner: Type::of::<O>(),
				member: member.into(),
			},
		)
	}

	pub fn is_declared<T: ?Sized + 'static>(&self) -> bool {
		self.primary.read().contains_key(&Type::of::<T>())
	}

	/// Factory members declared on `owner`, in declaration order.
	pub fn members_of(&self, owner: Type) -> Vec<Injectable> {
		self.members.read().get(&owner).cloned().unwrap_or_default()
	}

	fn insert_primary(&self, injectable: Injectable) -> DiResult<()> {
		let mut primary = self.primary.write();
		if primary.contains_key(&injectable.ty()) {
			return Err(DiError::Definition {
				producer: injectable.to_string(),
				message: "declared twice".to_string(),
			});
		}
		tracing::debug!(injectable = %injectable, "declared");
		primary.insert(injectable.ty(), injectable);
		Ok(())
	}

	fn insert_member(&self, owner: Type, injectable: Injectable) -> DiResult<()> {
		let mut members = self.members.write();
		let declared = members.entry(owner).or_default();
		if declared.contains(&injectable) {
			return Err(DiError::Definition {
				producer: injectable.to_string(),
				message: "declared twice".to_string(),
			});
		}
		tracing::debug!(injectable = %injectable, "factory member declared");
		declared.push(injectable);
		Ok(())
	}
}

impl BindingSource for Catalog {
	fn injectable_for(&self, ty: Type) -> DiResult<Injectable> {
		self.primary
			.read()
			.get(&ty)
			.cloned()
			.ok_or_else(|| DiError::Definition {
				producer: ty.to_string(),
				message: "no producer declared".to_string(),
			})
	}
}

impl fmt::Debug for Catalog {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Catalog")
			.field("primary", &self.primary.read().len())
			.field("members", &self.members.read().values().map(Vec::len).sum::<usize>())
			.finish()
	}
}

/// Marker for primary declarations.
pub struct Primary;

/// Marker for factory members declared on `O`.
pub struct Member<O>(PhantomData<fn() -> O>);

/// Builder of one declaration; finished by a `construct` method.
#[must_use = "a declaration is only recorded by a construct method"]
pub struct Declaration<'a, T, M> {
	catalog: &'a Catalog,
	ty: Type,
	discriminator: Discriminator,
	qualifiers: Vec<Qualifier>,
	scope: Scope,
	bindings: Vec<Binding>,
	views: Vec<(Type, Caster)>,
	destroyer: Option<Box<dyn Fn(&T) + Send + Sync>>,
	_marker: PhantomData<fn() -> M>,
}

type Caster = Box<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

impl<'a, T, M> Declaration<'a, T, M>
where
	T: Send + Sync + 'static,
{
	fn new(catalog: &'a Catalog, ty: Type, discriminator: Discriminator) -> Self {
		Self {
			catalog,
			ty,
			discriminator,
			qualifiers: Vec::new(),
			scope: Scope::DEPENDENT,
			bindings: Vec::new(),
			views: Vec::new(),
			destroyer: None,
			_marker: PhantomData,
		}
	}

	pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
		self.qualifiers.push(qualifier.into());
		self
	}

	pub fn scope(mut self, scope: Scope) -> Self {
		self.scope = scope;
		self
	}

	/// Exactly one `D`, read with `Arguments::take` or `take_dyn`.
	pub fn requires<D: ?Sized + 'static>(self) -> Self {
		self.binding(Binding::required(Key::of::<D>()))
	}

	/// Exactly one value matching `key`.
	pub fn requires_key(self, key: Key) -> Self {
		self.binding(Binding::required(key))
	}

	/// Zero or one `D`, read with `Arguments::take_optional`.
	pub fn optional<D: ?Sized + 'static>(self) -> Self {
		self.binding(Binding::optional(Key::of::<D>()))
	}

	/// Every `D`, read with `Arguments::take_all` or `take_all_dyn`.
	pub fn all<D: ?Sized + 'static>(self) -> Self {
		self.binding(Binding::all(Key::of::<D>()))
	}

	/// Exactly one `D` behind a deferred handle, read with
	/// `Arguments::take_deferred`.
	pub fn lazy<D: ?Sized + 'static>(self) -> Self {
		self.binding(Binding::required(Key::of::<D>()).lazy())
	}

	pub fn binding(mut self, binding: Binding) -> Self {
		self.bindings.push(binding);
		self
	}

	/// Makes the produced value available as `U`, typically a trait object.
	pub fn provides<U>(mut self, cast: fn(Arc<T>) -> Arc<U>) -> Self
	where
		U: ?Sized + Send + Sync + 'static,
	{
		let caster: Caster = Box::new(move |instance: &Instance| {
			let value = Arc::clone(instance).downcast::<T>().ok()?;
			let view: Instance = Arc::new(cast(value));
			Some(view)
		});
		self.views.push((Type::of::<U>(), caster));
		self
	}

	/// Called once when an instance is released.
	pub fn on_destroy<F>(mut self, destroy: F) -> Self
	where
		F: Fn(&T) + Send + Sync + 'static,
	{
		self.destroyer = Some(Box::new(destroy));
		self
	}

	fn into_builder(self, leading: Option<Binding>) -> (&'a Catalog, InjectableBuilder) {
		let mut builder = Injectable::builder(self.ty, self.discriminator)
			.scope(self.scope)
			.bindings(leading)
			.bindings(self.bindings);
		for qualifier in self.qualifiers {
			builder = builder.qualifier(qualifier);
		}
		for (ty, caster) in self.views {
			builder = builder.view(ty, caster);
		}
		if let Some(destroy) = self.destroyer {
			builder = builder.on_destroy(move |instance: &Instance| {
				if let Some(value) = instance.downcast_ref::<T>() {
					destroy(value);
				}
			});
		}
		(self.catalog, builder)
	}
}

fn wrap<T: Send + Sync + 'static>(result: Result<T, BoxError>) -> Result<Instance, BoxError> {
	result.map(|value| Arc::new(value) as Instance)
}

impl<T> Declaration<'_, T, Primary>
where
	T: Send + Sync + 'static,
{
	/// Records the declaration with its constructor.
	///
	/// Fails with [`DiError::Definition`] if `T` is already declared or the
	/// bindings conflict.
	pub fn construct<F>(self, constructor: F) -> DiResult<()>
	where
		F: Fn(&mut Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
	{
		let (catalog, builder) = self.into_builder(None);
		let injectable = builder.build(move |args| wrap(constructor(args)))?;
		catalog.insert_primary(injectable)
	}
}

impl<T, O> Declaration<'_, T, Member<O>>
where
	T: Send + Sync + 'static,
	O: Send + Sync + 'static,
{
	/// Records an instance member: the owner is injected first and handed to
	/// `member` ahead of the declared arguments.
	pub fn construct<F>(self, member: F) -> DiResult<()>
	where
		F: Fn(&O, &mut Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
	{
		let owner = Type::of::<O>();
		let (catalog, builder) = self.into_builder(Some(Binding::required(Key::new(owner))));
		let injectable = builder.build(move |args| {
			let owner = args.take::<O>()?;
			wrap(member(&owner, args))
		})?;
		catalog.insert_member(owner, injectable)
	}

	/// Records a static member, which does not depend on the owner.
	pub fn construct_static<F>(self, member: F) -> DiResult<()>
	where
		F: Fn(&mut Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
	{
		let owner = Type::of::<O>();
		let (catalog, builder) = self.into_builder(None);
		let injectable = builder.build(move |args| wrap(member(args)))?;
		catalog.insert_member(owner, injectable)
	}
}

/// Derives the factory members declared on each visited type.
#[derive(Debug, Clone)]
pub struct FactoryStrategy {
	catalog: Arc<Catalog>,
}

impl FactoryStrategy {
	pub fn new(catalog: Arc<Catalog>) -> Self {
		Self { catalog }
	}
}

impl DerivationStrategy for FactoryStrategy {
	fn derive(&self, ty: Type) -> DiResult<Vec<Injectable>> {
		Ok(self.catalog.members_of(ty))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::binding::Cardinality;
	use crate::injectable::downcast_view;
	use rstest::rstest;

	trait Shape: Send + Sync {
		fn area(&self) -> u32;
	}

	struct Square(u32);

	impl Shape for Square {
		fn area(&self) -> u32 {
			self.0 * self.0
		}
	}

	struct Workshop;

	#[rstest]
	fn test_declaration_records_bindings_in_order() {
		// Arrange
		let catalog = Catalog::new();

		// Act
		catalog
			.declare::<Square>()
			.requires::<u32>()
			.optional::<u8>()
			.all::<dyn Shape>()
			.lazy::<Workshop>()
			.construct(|args| Ok(Square(*args.take::<u32>()?)))
			.unwrap();

		// Assert
		let injectable = catalog.injectable_for(Type::of::<Square>()).unwrap();
		let shapes: Vec<(Cardinality, bool)> = injectable
			.bindings()
			.iter()
			.map(|b| (b.cardinality(), b.is_lazy()))
			.collect();
		assert_eq!(
			shapes,
			vec![
				(Cardinality::ExactlyOne, false),
				(Cardinality::AtMostOne, false),
				(Cardinality::Many, false),
				(Cardinality::ExactlyOne, true),
			]
		);
	}

	#[rstest]
	fn test_provides_registers_view() {
		// Arrange
		let catalog = Catalog::new();
		catalog
			.declare::<Square>()
			.provides::<dyn Shape>(|square| square)
			.construct(|_| Ok(Square(3)))
			.unwrap();
		let injectable = catalog.injectable_for(Type::of::<Square>()).unwrap();

		// Act
		let produced = injectable.produce(&mut Arguments::new(Vec::new())).unwrap();
		let view = injectable.view(Type::of::<dyn Shape>(), &produced).unwrap();

		// Assert
		assert!(injectable.satisfies(&Key::of::<dyn Shape>()));
		assert_eq!(downcast_view::<dyn Shape>(view).unwrap().area(), 9);
	}

	#[rstest]
	fn test_undeclared_and_duplicate() {
		// Arrange
		let catalog = Catalog::new();
		catalog.declare::<Square>().construct(|_| Ok(Square(1))).unwrap();

		// Act
		let duplicate = catalog.declare::<Square>().construct(|_| Ok(Square(2)));
		let undeclared = catalog.injectable_for(Type::of::<Workshop>());

		// Assert
		assert!(matches!(duplicate, Err(DiError::Definition { .. })));
		assert!(matches!(undeclared, Err(DiError::Definition { .. })));
	}

	#[rstest]
	fn test_instance_member_requires_owner_first() {
		// Arrange
		let catalog = Arc::new(Catalog::new());
		catalog
			.factory::<Workshop, Square>("square")
			.requires::<u32>()
			.construct(|_workshop, args| Ok(Square(*args.take::<u32>()?)))
			.unwrap();
		catalog
			.factory::<Workshop, u8>("unit")
			.construct_static(|_| Ok(1u8))
			.unwrap();

		// Act
		let derived = FactoryStrategy::new(Arc::clone(&catalog))
			.derive(Type::of::<Workshop>())
			.unwrap();

		// Assert
		assert_eq!(derived.len(), 2);
		assert_eq!(derived[0].to_string(), "Workshop::square");
		assert_eq!(derived[0].bindings()[0].key(), &Key::of::<Workshop>());
		assert_eq!(derived[0].bindings()[1].key(), &Key::of::<u32>());
		assert!(derived[1].bindings().is_empty());
	}
}
