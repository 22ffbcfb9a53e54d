//! Container configuration
//!
//! ```toml
//! auto_discovery = true
//! max_resolution_depth = 64
//!
//! [[scopes]]
//! name = "request"
//! longevity = 10
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cycle_detection::MAX_RESOLUTION_DEPTH;
use crate::error::{DiError, DiResult};
use crate::scope::Scope;

/// Container settings
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
	/// Derive missing producers through the binding source, both at
	/// registration and on lookup of an unregistered key
	#[serde(default = "default_auto_discovery")]
	pub auto_discovery: bool,

	/// Depth limit for recursive construction
	#[serde(default = "default_max_resolution_depth")]
	pub max_resolution_depth: usize,

	/// Switchable scopes registered at build time
	#[serde(default)]
	pub scopes: Vec<ScopeConfig>,
}

fn default_auto_discovery() -> bool {
	true
}

fn default_max_resolution_depth() -> usize {
	MAX_RESOLUTION_DEPTH
}

impl Default for ContainerConfig {
	fn default() -> Self {
		Self {
			auto_discovery: default_auto_discovery(),
			max_resolution_depth: default_max_resolution_depth(),
			scopes: Vec::new(),
		}
	}
}

impl ContainerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_auto_discovery(mut self, enabled: bool) -> Self {
		self.auto_discovery = enabled;
		self
	}

	pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
		self.max_resolution_depth = depth;
		self
	}

	pub fn with_scope(mut self, name: impl Into<String>, longevity: u32) -> Self {
		self.scopes.push(ScopeConfig {
			name: name.into(),
			longevity,
		});
		self
	}

	/// Parses settings from TOML text
	pub fn from_toml_str(contents: &str) -> DiResult<Self> {
		let config: ContainerConfig = toml::from_str(contents)
			.map_err(|e| DiError::Config(format!("TOML parse error: {}", e)))?;
		config.validate()?;
		Ok(config)
	}

	/// Loads settings from a TOML file
	pub fn from_file(path: impl Into<PathBuf>) -> DiResult<Self> {
		let path = path.into();
		let contents = std::fs::read_to_string(&path)
			.map_err(|e| DiError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
		Self::from_toml_str(&contents)
	}

	/// Rejects settings no container can be built from
	pub fn validate(&self) -> DiResult<()> {
		if self.max_resolution_depth == 0 {
			return Err(DiError::Config(
				"max_resolution_depth must be at least 1".to_string(),
			));
		}
		for (index, scope) in self.scopes.iter().enumerate() {
			if scope.name.is_empty() {
				return Err(DiError::Config("scope name must not be empty".to_string()));
			}
			if [Scope::SINGLETON, Scope::DEPENDENT]
				.iter()
				.any(|builtin| builtin.name() == scope.name)
			{
				return Err(DiError::Config(format!(
					"scope name `{}` is reserved for a built-in scope",
					scope.name
				)));
			}
			if self.scopes[..index].iter().any(|earlier| earlier.name == scope.name) {
				return Err(DiError::Config(format!(
					"scope `{}` is configured twice",
					scope.name
				)));
			}
		}
		Ok(())
	}
}

/// A switchable scope to register
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
	pub name: String,
	/// Lower values live shorter
	pub longevity: u32,
}

impl ScopeConfig {
	pub fn new(name: impl Into<String>, longevity: u32) -> Self {
		Self {
			name: name.into(),
			longevity,
		}
	}
}
