//! Dependency edges declared by producers

use std::fmt;

use crate::key::Key;

/// How many candidates a binding accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
	/// Exactly one candidate must exist
	ExactlyOne,
	/// Zero or one candidate; the value is injected as `Option`
	AtMostOne,
	/// Any number of candidates, injected as a list
	Many,
}

impl Cardinality {
	pub fn requires_at_least_one(self) -> bool {
		matches!(self, Cardinality::ExactlyOne)
	}

	pub fn requires_at_most_one(self) -> bool {
		matches!(self, Cardinality::ExactlyOne | Cardinality::AtMostOne)
	}
}

/// One dependency of a producer on a key.
///
/// For [`Cardinality::Many`] the key is the element key of the collection.
/// Lazy bindings are injected as deferred handles and do not take part in
/// static cycle or scope conflict detection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Binding {
	key: Key,
	cardinality: Cardinality,
	lazy: bool,
}

impl Binding {
	pub fn new(key: Key, cardinality: Cardinality) -> Self {
		Self {
			key,
			cardinality,
			lazy: false,
		}
	}

	/// Binding on exactly one candidate of `key`.
	pub fn required(key: Key) -> Self {
		Self::new(key, Cardinality::ExactlyOne)
	}

	/// Binding on zero or one candidate of `key`.
	pub fn optional(key: Key) -> Self {
		Self::new(key, Cardinality::AtMostOne)
	}

	/// Binding on every candidate of `key`.
	pub fn all(key: Key) -> Self {
		Self::new(key, Cardinality::Many)
	}

	/// Marks this binding as resolved through a deferred handle.
	pub fn lazy(mut self) -> Self {
		self.lazy = true;
		self
	}

	pub fn key(&self) -> &Key {
		&self.key
	}

	pub fn cardinality(&self) -> Cardinality {
		self.cardinality
	}

	pub fn is_lazy(&self) -> bool {
		self.lazy
	}
}

impl fmt::Debug for Binding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Binding({self})")
	}
}

impl fmt::Display for Binding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.lazy {
			f.write_str("lazy ")?;
		}
		match self.cardinality {
			Cardinality::ExactlyOne => write!(f, "{}", self.key),
			Cardinality::AtMostOne => write!(f, "Option<{}>", self.key),
			Cardinality::Many => write!(f, "Vec<{}>", self.key),
		}
	}
}
