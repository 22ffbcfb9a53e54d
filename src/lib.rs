//! # Lattice
//!
//! Consistency-checked dependency injection for Rust.
//!
//! Producers are registered in transactional batches. Every committed state
//! keeps each binding satisfiable, free of static cycles and of
//! dependencies on narrower scopes. Missing producers are discovered on
//! demand, and instances are created, cached and destroyed per scope.
//!
//! ## Feature Flags
//!
//! - `di` (default) - Dependency injection core
//! - `dev-tools` - DOT rendering of the committed dependency graph
//!
//! ## Quick Example
//!
//! ```rust
//! use lattice::prelude::*;
//! use std::sync::Arc;
//!
//! struct Clock;
//!
//! struct Scheduler {
//!     clock: Arc<Clock>,
//! }
//!
//! let catalog = Arc::new(Catalog::new());
//! catalog
//!     .declare::<Clock>()
//!     .scope(Scope::SINGLETON)
//!     .construct(|_| Ok(Clock))
//!     .unwrap();
//! catalog
//!     .declare::<Scheduler>()
//!     .requires::<Clock>()
//!     .construct(|args| Ok(Scheduler { clock: args.take()? }))
//!     .unwrap();
//!
//! let container = Container::builder().catalog(catalog).build().unwrap();
//! let first = container.get::<Scheduler>().unwrap();
//! let second = container.get::<Scheduler>().unwrap();
//!
//! // Dependent-scoped schedulers share the singleton clock
//! assert!(!Arc::ptr_eq(&first, &second));
//! assert!(Arc::ptr_eq(&first.clock, &second.clock));
//! ```

#[cfg(feature = "di")]
pub use lattice_di as di;

/// Prelude module for convenient imports
#[cfg(feature = "di")]
pub mod prelude {
	pub use lattice_di::{
		Binding, Catalog, Container, ContainerBuilder, ContainerConfig, Deferred, DiError,
		DiResult, Injectable, Key, Qualifier, Scope, Type, instance,
	};
}
