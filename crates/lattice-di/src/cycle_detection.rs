//! Circular dependency detection
//!
//! Two mechanisms live here:
//!
//! - [`find_cycle`]: static detection over the producer graph, run by the
//!   store before a batch is committed. Lazy bindings are not edges.
//! - [`ConstructionTracker`]: runtime detection of producers re-entered
//!   while still under construction, which static detection cannot see
//!   when the loop goes through a producer's side effects. Cleanup is
//!   automatic through [`ConstructionGuard`].

use std::collections::HashSet;
use std::hash::Hash;

use indexmap::IndexSet;
use parking_lot::Mutex;

use crate::error::{DiError, DiResult};
use crate::injectable::Injectable;

/// Maximum construction depth (prevents pathological cases)
pub const MAX_RESOLUTION_DEPTH: usize = 100;

/// Finds a cycle reachable from `roots` using iterative DFS.
///
/// Uses an explicit stack instead of recursion to avoid stack overflow on
/// deeply nested graphs. The returned path starts and ends with the same
/// node, e.g. `[A, B, C, A]`.
pub fn find_cycle<N, I, F>(roots: I, mut edges: F) -> Option<Vec<N>>
where
	N: Clone + Eq + Hash,
	I: IntoIterator<Item = N>,
	F: FnMut(&N) -> Vec<N>,
{
	let mut visited: HashSet<N> = HashSet::new();

	for root in roots {
		if visited.contains(&root) {
			continue;
		}

		// Explicit stack: (node, outgoing edges, next edge index)
		let mut on_stack: HashSet<N> = HashSet::new();
		visited.insert(root.clone());
		on_stack.insert(root.clone());
		let root_edges = edges(&root);
		let mut stack: Vec<(N, Vec<N>, usize)> = vec![(root, root_edges, 0)];

		while let Some((_, targets, index)) = stack.last_mut() {
			if *index >= targets.len() {
				// All edges processed, backtrack
				if let Some((node, _, _)) = stack.pop() {
					on_stack.remove(&node);
				}
				continue;
			}

			let target = targets[*index].clone();
			*index += 1;

			if on_stack.contains(&target) {
				let start = stack
					.iter()
					.position(|(node, _, _)| *node == target)
					.unwrap_or(0);
				let mut path: Vec<N> = stack[start..]
					.iter()
					.map(|(node, _, _)| node.clone())
					.collect();
				path.push(target);
				return Some(path);
			}

			if visited.insert(target.clone()) {
				on_stack.insert(target.clone());
				let target_edges = edges(&target);
				stack.push((target, target_edges, 0));
			}
		}
	}

	None
}

/// Tracks injectables currently under construction.
#[derive(Debug)]
pub struct ConstructionTracker {
	active: Mutex<IndexSet<Injectable>>,
	max_depth: usize,
}

impl ConstructionTracker {
	pub fn new(max_depth: usize) -> Self {
		Self {
			active: Mutex::new(IndexSet::new()),
			max_depth,
		}
	}

	/// Marks `injectable` as under construction.
	///
	/// Fails with [`DiError::ConstructionLoop`] if it already is, or with
	/// [`DiError::MaxDepthExceeded`] past the configured depth.
	pub fn begin(&self, injectable: &Injectable) -> DiResult<ConstructionGuard<'_>> {
		let mut active = self.active.lock();
		if active.contains(injectable) {
			let mut path: Vec<String> = active.iter().map(ToString::to_string).collect();
			path.push(injectable.to_string());
			return Err(DiError::ConstructionLoop {
				producer: injectable.to_string(),
				path,
			});
		}
		if active.len() >= self.max_depth {
			return Err(DiError::MaxDepthExceeded {
				depth: self.max_depth,
			});
		}
		active.insert(injectable.clone());
		Ok(ConstructionGuard {
			tracker: self,
			injectable: injectable.clone(),
		})
	}

	pub fn depth(&self) -> usize {
		self.active.lock().len()
	}

	pub fn is_constructing(&self, injectable: &Injectable) -> bool {
		self.active.lock().contains(injectable)
	}
}

impl Default for ConstructionTracker {
	fn default() -> Self {
		Self::new(MAX_RESOLUTION_DEPTH)
	}
}

/// RAII guard: clears the under-construction flag on Drop
#[derive(Debug)]
pub struct ConstructionGuard<'a> {
	tracker: &'a ConstructionTracker,
	injectable: Injectable,
}

impl Drop for ConstructionGuard<'_> {
	fn drop(&mut self) {
		self.tracker.active.lock().shift_remove(&self.injectable);
	}
}
