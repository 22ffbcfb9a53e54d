//! Discovery tests
//!
//! Registration through a catalog: fixpoint derivation of missing
//! producers, factory members, determinism and rollback of failed lookups.

use lattice_di::{Catalog, Container, DiError, Key, Scope, Type};
use rstest::*;
use std::sync::Arc;

struct Engine {
	cylinders: u32,
}

struct Wheel;

struct Car {
	engine: Arc<Engine>,
	wheels: Vec<Arc<Wheel>>,
}

struct Garage;

struct Spare(&'static str);

#[derive(Debug)]
struct Radio;

fn catalog() -> Arc<Catalog> {
	let catalog = Arc::new(Catalog::new());
	catalog
		.declare::<Engine>()
		.scope(Scope::SINGLETON)
		.construct(|_| Ok(Engine { cylinders: 8 }))
		.unwrap();
	catalog
		.declare::<Wheel>()
		.construct(|_| Ok(Wheel))
		.unwrap();
	catalog
		.declare::<Car>()
		.requires::<Engine>()
		.all::<Wheel>()
		.construct(|args| {
			Ok(Car {
				engine: args.take()?,
				wheels: args.take_all()?,
			})
		})
		.unwrap();
	catalog
		.declare::<Garage>()
		.construct(|_| Ok(Garage))
		.unwrap();
	catalog
		.factory::<Garage, Spare>("spare")
		.construct(|_, _| Ok(Spare("from garage")))
		.unwrap();
	catalog
		.declare::<Radio>()
		.requires::<Spare>()
		.requires_key(Key::of::<Engine>().qualified("electric"))
		.construct(|_| Ok(Radio))
		.unwrap();
	catalog
}

fn names(container: &Container) -> Vec<String> {
	container
		.injectables()
		.iter()
		.map(ToString::to_string)
		.collect()
}

#[rstest]
fn test_register_derives_required_dependencies_only() {
	// Arrange
	let container = Container::builder().catalog(catalog()).build().unwrap();

	// Act
	let committed = container.register_type::<Car>().unwrap();

	// Assert
	let committed: Vec<String> = committed.iter().map(ToString::to_string).collect();
	assert_eq!(committed, vec!["Car", "Engine"]);
	let car = container.get::<Car>().unwrap();
	assert_eq!(car.engine.cylinders, 8);
	assert!(car.wheels.is_empty());
}

#[rstest]
fn test_factory_member_derived_with_owner() {
	// Arrange
	let container = Container::builder().catalog(catalog()).build().unwrap();

	// Act
	let committed = container.register(&[Type::of::<Garage>()]).unwrap();
	let spare = container.get::<Spare>().unwrap();

	// Assert
	let committed: Vec<String> = committed.iter().map(ToString::to_string).collect();
	assert_eq!(committed, vec!["Garage::spare", "Garage"]);
	assert_eq!(spare.0, "from garage");
}

#[rstest]
fn test_removing_owner_removes_its_members() {
	// Arrange
	let container = Container::builder().catalog(catalog()).build().unwrap();
	container.register_type::<Garage>().unwrap();

	// Act
	container.remove(&[Type::of::<Garage>()]).unwrap();

	// Assert
	assert!(names(&container).is_empty());
	assert!(!container.contains(&Key::of::<Spare>()));
}

#[rstest]
fn test_discovery_is_deterministic() {
	// Arrange
	let first = Container::builder().catalog(catalog()).build().unwrap();
	let second = Container::builder().catalog(catalog()).build().unwrap();

	// Act
	first.register(&[Type::of::<Car>(), Type::of::<Garage>()]).unwrap();
	second.register(&[Type::of::<Car>(), Type::of::<Garage>()]).unwrap();
	let first_error = first.register_type::<Radio>().unwrap_err();
	let second_error = second.register_type::<Radio>().unwrap_err();

	// Assert
	assert_eq!(names(&first), names(&second));
	assert_eq!(first_error.to_string(), second_error.to_string());
}

#[rstest]
fn test_unresolvable_discovery_reports_every_failure() {
	// Arrange
	let container = Container::builder().catalog(catalog()).build().unwrap();

	// Act
	let error = container.register_type::<Radio>().unwrap_err();

	// Assert
	assert!(matches!(
		error.root(),
		DiError::UnresolvableDependency { required_by: Some(owner), .. } if owner == "Radio"
	));
	assert!(!error.suppressed().is_empty());
	assert!(names(&container).is_empty());
}

#[rstest]
fn test_failed_lookup_leaves_no_residue() {
	// Arrange
	let container = Container::builder().catalog(catalog()).build().unwrap();

	// Act
	let error = container.get::<Radio>().unwrap_err();

	// Assert
	assert!(matches!(error.root(), DiError::UnresolvableDependency { .. }));
	assert!(names(&container).is_empty());
}

#[rstest]
fn test_undeclared_type_is_reported() {
	// Arrange
	#[derive(Debug)]
	struct Unknown;
	let container = Container::builder().catalog(catalog()).build().unwrap();

	// Act
	let error = container.get::<Unknown>().unwrap_err();

	// Assert
	assert!(matches!(error.root(), DiError::Definition { .. }));
	assert!(error.to_string().contains("no producer declared"));
}

#[rstest]
fn test_registering_twice_is_rejected() {
	// Arrange
	let container = Container::builder().catalog(catalog()).build().unwrap();
	container.register_type::<Engine>().unwrap();

	// Act
	let error = container.register_type::<Engine>().unwrap_err();

	// Assert
	assert!(matches!(error.root(), DiError::AlreadyRegistered(_)));
	assert_eq!(names(&container), vec!["Engine"]);
}
