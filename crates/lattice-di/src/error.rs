//! Error types for the dependency injection core

use std::fmt;

/// Boxed error returned by producer and destroy callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for DI operations
pub type DiResult<T> = Result<T, DiError>;

/// Errors raised by the store, the gatherer and the instantiation engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DiError {
	/// A producer declaration is structurally invalid
	#[error("Invalid definition of {producer}: {message}")]
	Definition {
		/// Producer whose declaration was rejected
		producer: String,
		/// What is wrong with it
		message: String,
	},

	/// A required binding has no candidate
	#[error("Unresolvable dependency {key}{}", fmt_required_by(.required_by))]
	UnresolvableDependency {
		/// Key that could not be satisfied
		key: String,
		/// Producer that declared the binding, if any
		required_by: Option<String>,
	},

	/// More than one candidate satisfies a key that demands exactly one
	#[error("Ambiguous resolution of {key}: candidates [{}]", .candidates.join(", "))]
	AmbiguousResolution {
		/// Key being resolved
		key: String,
		/// Competing producers
		candidates: Vec<String>,
	},

	/// A mutation would break an at-most-one or exactly-one binding elsewhere
	#[error(
		"Singular dependency violation on {key}: {candidates} candidate(s) for a binding required by [{}]",
		.required_by.join(", ")
	)]
	SingularDependencyViolation {
		/// Key of the affected binding
		key: String,
		/// Candidate count after the mutation
		candidates: usize,
		/// Producers owning the affected bindings
		required_by: Vec<String>,
	},

	/// Static cycle across non-lazy bindings
	#[error("Circular dependency detected\n  Path: {}", .path.join(" -> "))]
	CyclicDependency {
		/// Cycle path; the first entry is repeated at the end
		path: Vec<String>,
	},

	/// A producer was re-entered while it was still being constructed
	#[error(
		"Construction loop while creating {producer}\n  Path: {}",
		.path.join(" -> ")
	)]
	ConstructionLoop {
		/// Producer entered twice
		producer: String,
		/// Producers under construction, outermost first
		path: Vec<String>,
	},

	/// A producer depends on a dependency that lives shorter than itself
	#[error(
		"Scope conflict: {consumer} ({consumer_scope}) depends on {dependency} ({dependency_scope}) which is shorter-lived"
	)]
	ScopeConflict {
		/// Consuming producer
		consumer: String,
		/// Scope of the consumer
		consumer_scope: String,
		/// Narrower-scoped dependency
		dependency: String,
		/// Scope of the dependency
		dependency_scope: String,
	},

	/// A producer declares a scope with no registered resolver
	#[error("Unknown scope {scope} declared by {producer}")]
	UnknownScope {
		/// Unknown scope name
		scope: String,
		/// Producer declaring it
		producer: String,
	},

	/// Construction attempted while the producer's scope is inactive
	#[error("Scope {scope} is not active while creating {producer}")]
	ScopeNotActive {
		/// Inactive scope
		scope: String,
		/// Producer that was requested
		producer: String,
	},

	/// The producer's create capability failed
	#[error("Failed to create {producer}: {source}")]
	Creation {
		/// Producer that failed
		producer: String,
		/// Underlying failure
		#[source]
		source: BoxError,
	},

	/// Injectable is already present in the store
	#[error("{0} is already registered")]
	AlreadyRegistered(String),

	/// Injectable is not present in the store
	#[error("{0} is not registered")]
	NotRegistered(String),

	/// Recursive construction went deeper than the configured limit
	#[error(
		"Maximum resolution depth exceeded: {depth}\nThis likely indicates an extremely deep dependency chain."
	)]
	MaxDepthExceeded {
		/// Configured limit that was exceeded
		depth: usize,
	},

	/// A produced instance could not be viewed as the requested type
	#[error("Type mismatch: expected {expected}, produced by {producer}")]
	TypeMismatch {
		/// Requested type
		expected: String,
		/// Producer of the instance
		producer: String,
	},

	/// Configuration could not be loaded
	#[error("Configuration error: {0}")]
	Config(String),

	/// The container owning a deferred handle has been dropped
	#[error("Container is closed")]
	ContainerClosed,

	/// Primary failure with related failures attached for diagnostics
	#[error("{error}{}", fmt_suppressed(.suppressed))]
	Suppressed {
		/// First failure
		error: Box<DiError>,
		/// Failures observed after the first one
		suppressed: Vec<DiError>,
	},
}

fn fmt_required_by(required_by: &Option<String>) -> String {
	match required_by {
		Some(owner) => format!(" required by {owner}"),
		None => String::new(),
	}
}

fn fmt_suppressed(suppressed: &[DiError]) -> String {
	let mut out = String::new();
	for error in suppressed {
		out.push_str("\n  Suppressed: ");
		out.push_str(&error.to_string());
	}
	out
}

impl DiError {
	/// Attaches `suppressed` to `self`. An empty list returns `self` unchanged.
	pub fn with_suppressed(self, suppressed: Vec<DiError>) -> Self {
		if suppressed.is_empty() {
			return self;
		}
		match self {
			DiError::Suppressed {
				error,
				suppressed: mut existing,
			} => {
				existing.extend(suppressed);
				DiError::Suppressed {
					error,
					suppressed: existing,
				}
			}
			error => DiError::Suppressed {
				error: Box::new(error),
				suppressed,
			},
		}
	}

	/// Folds a list of failures into one error: the first is primary.
	pub fn aggregate(mut errors: Vec<DiError>) -> Option<Self> {
		if errors.is_empty() {
			return None;
		}
		let first = errors.remove(0);
		Some(first.with_suppressed(errors))
	}

	/// The primary failure, unwrapping any suppressed-context wrapper.
	pub fn root(&self) -> &DiError {
		match self {
			DiError::Suppressed { error, .. } => error.root(),
			other => other,
		}
	}

	/// Failures attached to this error for diagnostics.
	pub fn suppressed(&self) -> &[DiError] {
		match self {
			DiError::Suppressed { suppressed, .. } => suppressed,
			_ => &[],
		}
	}

	pub(crate) fn creation(producer: impl fmt::Display, source: BoxError) -> Self {
		DiError::Creation {
			producer: producer.to_string(),
			source,
		}
	}
}
