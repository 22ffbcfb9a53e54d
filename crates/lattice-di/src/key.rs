//! Keys identifying requested and produced values
//!
//! A [`Key`] pairs a type descriptor with a set of qualifier tags. Producers
//! declare the set of types they can be requested as, so assignability
//! between a key and a producer is a set membership test rather than a
//! reflective subtype query.

use std::any::TypeId;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Type descriptor used in keys.
///
/// Equality and hashing use the `TypeId` only; the name is kept for
/// diagnostics.
///
/// # Examples
///
/// ```
/// use lattice_di::Type;
///
/// trait Greeter {}
///
/// let ty = Type::of::<String>();
/// assert_eq!(ty, Type::of::<String>());
/// assert_eq!(ty.to_string(), "String");
/// assert_eq!(Type::of::<dyn Greeter>().to_string(), "dyn Greeter");
/// ```
#[derive(Clone, Copy)]
pub struct Type {
	id: TypeId,
	name: &'static str,
}

impl Type {
	/// Descriptor of `T`. Unsized types such as `dyn Trait` are allowed.
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: std::any::type_name::<T>(),
		}
	}

	pub fn id(&self) -> TypeId {
		self.id
	}

	/// Fully qualified type name as reported by the compiler.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Type name with module paths stripped, e.g. `Vec<Engine>`.
	pub fn short_name(&self) -> String {
		short_name(self.name)
	}
}

impl PartialEq for Type {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Type {}

impl Hash for Type {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl PartialOrd for Type {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Type {
	fn cmp(&self, other: &Self) -> Ordering {
		self.name
			.cmp(other.name)
			.then_with(|| self.id.cmp(&other.id))
	}
}

impl fmt::Debug for Type {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Type({})", self.short_name())
	}
}

impl fmt::Display for Type {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.short_name())
	}
}

fn short_name(full: &str) -> String {
	let mut out = String::with_capacity(full.len());
	let mut segment_start = 0;
	let mut chars = full.chars().peekable();
	while let Some(c) = chars.next() {
		if c == ':' && chars.peek() == Some(&':') {
			chars.next();
			out.truncate(segment_start);
			continue;
		}
		out.push(c);
		if !(c.is_alphanumeric() || c == '_') {
			segment_start = out.len();
		}
	}
	out
}

/// Opaque tag narrowing which producers satisfy a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier(Cow<'static, str>);

impl Qualifier {
	pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
		Self(name.into())
	}

	pub fn name(&self) -> &str {
		&self.0
	}
}

impl From<&'static str> for Qualifier {
	fn from(name: &'static str) -> Self {
		Self(Cow::Borrowed(name))
	}
}

impl From<String> for Qualifier {
	fn from(name: String) -> Self {
		Self(Cow::Owned(name))
	}
}

impl fmt::Display for Qualifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "@{}", self.0)
	}
}

/// Identity of a requested or produced value: a type plus qualifiers.
///
/// # Examples
///
/// ```
/// use lattice_di::Key;
///
/// struct Engine;
///
/// let plain = Key::of::<Engine>();
/// let turbo = Key::of::<Engine>().qualified("turbo");
///
/// assert_ne!(plain, turbo);
/// assert!(turbo.is_compatible_with(&plain));
/// assert!(!plain.is_compatible_with(&turbo));
/// assert_eq!(turbo.to_string(), "Engine @turbo");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
	ty: Type,
	qualifiers: BTreeSet<Qualifier>,
}

impl Key {
	pub fn new(ty: Type) -> Self {
		Self {
			ty,
			qualifiers: BTreeSet::new(),
		}
	}

	pub fn of<T: ?Sized + 'static>() -> Self {
		Self::new(Type::of::<T>())
	}

	pub fn with_qualifiers<I, Q>(ty: Type, qualifiers: I) -> Self
	where
		I: IntoIterator<Item = Q>,
		Q: Into<Qualifier>,
	{
		Self {
			ty,
			qualifiers: qualifiers.into_iter().map(Into::into).collect(),
		}
	}

	/// Returns this key with `qualifier` added.
	pub fn qualified(mut self, qualifier: impl Into<Qualifier>) -> Self {
		self.qualifiers.insert(qualifier.into());
		self
	}

	pub fn ty(&self) -> Type {
		self.ty
	}

	pub fn qualifiers(&self) -> &BTreeSet<Qualifier> {
		&self.qualifiers
	}

	/// Whether a value identified by `self` may be handed out for `other`:
	/// same type and a qualifier superset.
	pub fn is_compatible_with(&self, other: &Key) -> bool {
		self.ty == other.ty && self.qualifiers.is_superset(&other.qualifiers)
	}

	/// Whether a producer of `produced` types carrying `qualifiers` satisfies
	/// this key.
	pub fn is_satisfied_by<'a>(
		&self,
		mut produced: impl Iterator<Item = &'a Type>,
		qualifiers: &BTreeSet<Qualifier>,
	) -> bool {
		produced.any(|ty| *ty == self.ty) && qualifiers.is_superset(&self.qualifiers)
	}
}

impl fmt::Debug for Key {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Key({self})")
	}
}

impl fmt::Display for Key {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.ty)?;
		for qualifier in &self.qualifiers {
			write!(f, " {qualifier}")?;
		}
		Ok(())
	}
}

impl From<Type> for Key {
	fn from(ty: Type) -> Self {
		Self::new(ty)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	mod nested {
		pub struct Engine;
		pub trait Greeter {}
	}

	#[rstest]
	#[case("core::option::Option<alloc::string::String>", "Option<String>")]
	#[case("dyn my_crate::nested::Greeter", "dyn Greeter")]
	#[case("(u8, alloc::vec::Vec<a::B>)", "(u8, Vec<B>)")]
	#[case("Engine", "Engine")]
	fn test_short_name(#[case] full: &str, #[case] expected: &str) {
		assert_eq!(short_name(full), expected);
	}

	#[rstest]
	fn test_type_identity_ignores_name() {
		// Arrange
		let a = Type::of::<nested::Engine>();
		let b = Type::of::<nested::Engine>();

		// Assert
		assert_eq!(a, b);
		assert_eq!(a.to_string(), "Engine");
		assert_ne!(a, Type::of::<dyn nested::Greeter>());
	}

	#[rstest]
	fn test_key_display_sorts_qualifiers() {
		let key = Key::of::<nested::Engine>().qualified("v8").qualified("red");
		assert_eq!(key.to_string(), "Engine @red @v8");
	}

	#[rstest]
	fn test_key_satisfied_by_superset_of_qualifiers() {
		// Arrange
		let key = Key::of::<nested::Engine>().qualified("red");
		let produced = [Type::of::<nested::Engine>(), Type::of::<dyn nested::Greeter>()];
		let red_fast: BTreeSet<Qualifier> = ["red".into(), "fast".into()].into_iter().collect();
		let fast: BTreeSet<Qualifier> = ["fast".into()].into_iter().collect();

		// Assert
		assert!(key.is_satisfied_by(produced.iter(), &red_fast));
		assert!(!key.is_satisfied_by(produced.iter(), &fast));
		assert!(!key.is_satisfied_by([Type::of::<u8>()].iter(), &red_fast));
	}
}
