//! # Lattice Dependency Injection
//!
//! Consistency-checked dependency injection core.
//!
//! ## Features
//!
//! - **Transactional store**: registering or removing a batch of producers
//!   either keeps every binding satisfiable or leaves the store untouched
//! - **Static checks**: unresolvable and ambiguous bindings, cycles over
//!   non-lazy bindings and narrower-scoped dependencies are rejected at
//!   registration time
//! - **Discovery**: missing producers are derived through a binding source
//!   and derivation strategies until a fixpoint is reached
//! - **Scoped instantiation**: singleton, dependent and switchable scopes,
//!   with destruction cascading to dependent instances
//!
//! ## Development Tools (dev-tools feature)
//!
//! - **Visualization**: Generate dependency graphs in DOT format for Graphviz
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lattice_di::{Catalog, Container, Scope};
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct Greeting(&'static str);
//!
//! struct English {
//!     greeting: Arc<Greeting>,
//! }
//!
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         self.greeting.0.to_string()
//!     }
//! }
//!
//! let catalog = Arc::new(Catalog::new());
//! catalog
//!     .declare::<Greeting>()
//!     .scope(Scope::SINGLETON)
//!     .construct(|_| Ok(Greeting("hello")))
//!     .unwrap();
//! catalog
//!     .declare::<English>()
//!     .requires::<Greeting>()
//!     .provides::<dyn Greeter>(|english| english)
//!     .construct(|args| Ok(English { greeting: args.take()? }))
//!     .unwrap();
//!
//! let container = Container::builder().catalog(catalog).build().unwrap();
//! container.register_type::<English>().unwrap();
//!
//! let greeter = container.get_dyn::<dyn Greeter>().unwrap();
//! assert_eq!(greeter.greet(), "hello");
//! ```

pub mod binding;
pub mod catalog;
pub mod config;
pub mod container;
pub mod context;
pub mod cycle_detection;
pub mod error;
pub mod gatherer;
pub mod injectable;
pub mod instantiation;
pub mod key;
pub mod scope;
pub mod store;

// Development tools
#[cfg(feature = "dev-tools")]
pub mod visualization;

pub use binding::{Binding, Cardinality};
pub use catalog::{Catalog, Declaration, FactoryStrategy, Member, Primary};
pub use config::{ContainerConfig, ScopeConfig};
pub use container::{Container, ContainerBuilder};
pub use context::CreationalContext;
pub use cycle_detection::{ConstructionGuard, ConstructionTracker, MAX_RESOLUTION_DEPTH, find_cycle};
pub use error::{BoxError, DiError, DiResult};
pub use gatherer::{BindingSource, DerivationStrategy, Gatherer};
pub use injectable::{
	Argument, ArgumentError, Arguments, Discriminator, Injectable, InjectableBuilder, Instance,
	instance,
};
pub use instantiation::{ConstructionStack, Deferred, DeferredTarget, InstantiationContext};
pub use key::{Key, Qualifier, Type};
pub use scope::{
	ContextScope, SINGLETON_LONGEVITY, Scope, ScopeRegistry, ScopeResolver, SingletonScope,
};
pub use store::{NodeStats, Store};
