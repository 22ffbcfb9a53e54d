//! Store consistency tests
//!
//! Covers commit-time validation: unresolvable and ambiguous bindings,
//! static cycles, scope conflicts and the removal guard.

use lattice_di::{
	Binding, ContextScope, DiError, Injectable, Key, Scope, ScopeRegistry, Store, instance,
};
use rstest::*;
use std::sync::Arc;

struct Foo;
struct Bar;
struct Consumer;
struct A;
struct B;

fn producer<T: Send + Sync + 'static>(value: fn() -> T) -> Injectable {
	Injectable::of::<T>()
		.build(move |_| Ok(instance(value())))
		.unwrap()
}

fn requiring<T: Send + Sync + 'static>(value: fn() -> T, binding: Binding) -> Injectable {
	Injectable::of::<T>()
		.binding(binding)
		.build(move |_| Ok(instance(value())))
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

fn resolved(store: &Store, key: &Key) -> Vec<String> {
	store.resolve(key).iter().map(ToString::to_string).collect()
}

#[rstest]
fn test_missing_required_dependency_is_rejected(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let consumer = requiring(|| Consumer, Binding::required(Key::of::<Foo>()));

	// Act
	let error = store.put(&[consumer], &scopes).unwrap_err();

	// Assert
	match error.root() {
		DiError::UnresolvableDependency { key, required_by } => {
			assert_eq!(key, "Foo");
			assert_eq!(required_by.as_deref(), Some("Consumer"));
		}
		other => panic!("unexpected error: {other}"),
	}
	assert!(store.is_empty());
}

#[rstest]
fn test_optional_and_collection_bindings_accept_zero_candidates(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let consumer = Injectable::of::<Consumer>()
		.binding(Binding::optional(Key::of::<Foo>()))
		.binding(Binding::all(Key::of::<Bar>()))
		.build(|_| Ok(instance(Consumer)))
		.unwrap();

	// Act
	let result = store.put(&[consumer], &scopes);

	// Assert
	assert!(result.is_ok());
	assert!(store.node(&Key::of::<Foo>()).unwrap().is_valid());
}

#[rstest]
fn test_ambiguity_then_removal_restores_resolvability(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let first = producer(|| Foo);
	let second = Injectable::builder(
		lattice_di::Type::of::<Foo>(),
		lattice_di::Discriminator::Named("second".into()),
	)
	.build(|_| Ok(instance(Foo)))
	.unwrap();
	store.put(&[first.clone(), second.clone()], &scopes).unwrap();
	let consumer = requiring(|| Consumer, Binding::required(Key::of::<Foo>()));

	// Act
	let ambiguous = store.put(std::slice::from_ref(&consumer), &scopes);
	store.remove(&[second]).unwrap();
	let resolvable = store.put(std::slice::from_ref(&consumer), &scopes);

	// Assert
	assert!(matches!(
		ambiguous.unwrap_err().root(),
		DiError::AmbiguousResolution { .. }
	));
	assert!(resolvable.is_ok());
	assert_eq!(resolved(&store, &Key::of::<Foo>()), vec![first.to_string()]);
}

#[rstest]
fn test_second_candidate_for_singular_binding_is_rejected(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let consumer = requiring(|| Consumer, Binding::optional(Key::of::<Foo>()));
	store.put(&[producer(|| Foo), consumer], &scopes).unwrap();
	let extra = Injectable::builder(
		lattice_di::Type::of::<Foo>(),
		lattice_di::Discriminator::Named("extra".into()),
	)
	.build(|_| Ok(instance(Foo)))
	.unwrap();

	// Act
	let error = store.put(&[extra], &scopes).unwrap_err();

	// Assert
	match error.root() {
		DiError::SingularDependencyViolation {
			candidates,
			required_by,
			..
		} => {
			assert_eq!(*candidates, 2);
			assert_eq!(required_by, &vec!["Consumer".to_string()]);
		}
		other => panic!("unexpected error: {other}"),
	}
	assert_eq!(store.len(), 2);
}

#[rstest]
fn test_cycle_rejected_unless_lazy(scopes: ScopeRegistry) {
	// Arrange
	let a = requiring(|| A, Binding::required(Key::of::<B>()));
	let b = requiring(|| B, Binding::required(Key::of::<A>()));
	let lazy_b = requiring(|| B, Binding::required(Key::of::<A>()).lazy());
	let mut store = Store::new();

	// Act
	let cyclic = store.put(&[a.clone(), b], &scopes);
	let lazy = store.put(&[a, lazy_b], &scopes);

	// Assert
	match cyclic.unwrap_err() {
		DiError::CyclicDependency { path } => assert_eq!(path, vec!["A", "B", "A"]),
		other => panic!("unexpected error: {other}"),
	}
	assert!(lazy.is_ok());
	assert_eq!(store.len(), 2);
}

#[rstest]
fn test_cycle_error_message() {
	let error = DiError::CyclicDependency {
		path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
	};
	assert_eq!(
		error.to_string(),
		"Circular dependency detected\n  Path: A -> B -> A"
	);
}

#[rstest]
#[case::required(Binding::required(Key::of::<Foo>()), true)]
#[case::optional(Binding::optional(Key::of::<Foo>()), true)]
#[case::all(Binding::all(Key::of::<Foo>()), true)]
#[case::lazy(Binding::required(Key::of::<Foo>()).lazy(), false)]
fn test_singleton_depending_on_request_scope(
	scopes: ScopeRegistry,
	#[case] binding: Binding,
	#[case] conflict: bool,
) {
	// Arrange
	let mut store = Store::new();
	let request = Injectable::of::<Foo>()
		.scope(Scope::new("request"))
		.build(|_| Ok(instance(Foo)))
		.unwrap();
	let singleton = Injectable::of::<Consumer>()
		.scope(Scope::SINGLETON)
		.binding(binding)
		.build(|_| Ok(instance(Consumer)))
		.unwrap();

	// Act
	let result = store.put(&[request, singleton], &scopes);

	// Assert
	assert_eq!(
		matches!(
			result.as_ref().map_err(DiError::root),
			Err(DiError::ScopeConflict { .. })
		),
		conflict
	);
	assert_eq!(store.is_empty(), conflict);
}

#[rstest]
fn test_narrow_candidate_for_committed_singleton_is_rejected(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let singleton = Injectable::of::<Consumer>()
		.scope(Scope::SINGLETON)
		.binding(Binding::optional(Key::of::<Foo>()))
		.build(|_| Ok(instance(Consumer)))
		.unwrap();
	store.put(std::slice::from_ref(&singleton), &scopes).unwrap();
	let request = Injectable::of::<Foo>()
		.scope(Scope::new("request"))
		.build(|_| Ok(instance(Foo)))
		.unwrap();

	// Act
	let result = store.put(&[request], &scopes);

	// Assert
	assert!(matches!(
		result.as_ref().map_err(DiError::root),
		Err(DiError::ScopeConflict { consumer_scope, dependency_scope, .. })
			if consumer_scope == "singleton" && dependency_scope == "request"
	));
	assert_eq!(store.len(), 1);
	assert!(store.contains_injectable(&singleton));
	assert!(store.resolve(&Key::of::<Foo>()).is_empty());
}

#[rstest]
fn test_unknown_scope(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let session = Injectable::of::<Foo>()
		.scope(Scope::new("session"))
		.build(|_| Ok(instance(Foo)))
		.unwrap();

	// Act
	let error = store.put(&[session], &scopes).unwrap_err();

	// Assert
	assert!(matches!(error, DiError::UnknownScope { ref scope, .. } if scope == "session"));
}

#[rstest]
fn test_removing_required_candidate_is_rejected(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let foo = producer(|| Foo);
	let consumer = requiring(|| Consumer, Binding::required(Key::of::<Foo>()));
	store.put(&[foo.clone(), consumer.clone()], &scopes).unwrap();

	// Act
	let blocked = store.remove(std::slice::from_ref(&foo));
	let together = store.remove(&[consumer, foo]);

	// Assert
	assert!(matches!(
		blocked.unwrap_err().root(),
		DiError::SingularDependencyViolation { .. }
	));
	assert!(together.is_ok());
	assert!(store.is_empty());
	assert_eq!(store.node_keys().count(), 0);
}

#[rstest]
fn test_duplicate_registration(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let foo = producer(|| Foo);
	store.put(std::slice::from_ref(&foo), &scopes).unwrap();

	// Act
	let error = store.put(&[foo], &scopes).unwrap_err();

	// Assert
	assert_eq!(error.to_string(), "Foo is already registered");
}

#[rstest]
fn test_qualified_binding_selects_qualified_producer(scopes: ScopeRegistry) {
	// Arrange
	let mut store = Store::new();
	let plain = producer(|| Foo);
	let red = Injectable::builder(
		lattice_di::Type::of::<Foo>(),
		lattice_di::Discriminator::Named("red".into()),
	)
	.qualifier("red")
	.build(|_| Ok(instance(Foo)))
	.unwrap();
	let consumer = requiring(
		|| Consumer,
		Binding::required(Key::of::<Foo>().qualified("red")),
	);

	// Act
	let result = store.put(&[plain, red.clone(), consumer], &scopes);

	// Assert
	assert!(result.is_ok());
	assert_eq!(
		resolved(&store, &Key::of::<Foo>().qualified("red")),
		vec![red.to_string()]
	);
	assert_eq!(store.resolve(&Key::of::<Foo>()).len(), 2);
}
