//! Creational contexts
//!
//! A [`CreationalContext`] owns one live instance together with the
//! dependent-scoped instances created on its behalf. Releasing it destroys
//! its own instance first and then releases every attached child, most
//! recently attached first.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::injectable::{Injectable, Instance};

pub struct CreationalContext {
	injectable: Injectable,
	instance: OnceLock<Instance>,
	parent: Option<Weak<CreationalContext>>,
	children: Mutex<Vec<Arc<CreationalContext>>>,
	released: AtomicBool,
}

impl CreationalContext {
	pub(crate) fn new(injectable: Injectable, parent: Option<&Arc<CreationalContext>>) -> Arc<Self> {
		Arc::new(Self {
			injectable,
			instance: OnceLock::new(),
			parent: parent.map(Arc::downgrade),
			children: Mutex::new(Vec::new()),
			released: AtomicBool::new(false),
		})
	}

	pub fn injectable(&self) -> &Injectable {
		&self.injectable
	}

	/// The produced instance, once construction has completed.
	pub fn instance(&self) -> Option<&Instance> {
		self.instance.get()
	}

	/// Records the produced instance. A second completion is ignored and
	/// the first instance kept.
	pub(crate) fn complete(&self, instance: Instance) {
		if self.instance.set(instance).is_err() {
			tracing::warn!(
				injectable = %self.injectable,
				"creational context completed twice, keeping the first instance"
			);
		}
	}

	/// Context this one was created for, if it is dependent-scoped.
	pub fn parent(&self) -> Option<Arc<CreationalContext>> {
		self.parent.as_ref().and_then(Weak::upgrade)
	}

	/// Attaches a dependent-scoped context that must be released together
	/// with this one. Attaching to a released context releases the child.
	pub(crate) fn attach(&self, child: Arc<CreationalContext>) {
		if self.is_released() {
			child.release();
			return;
		}
		self.children.lock().push(child);
	}

	pub fn children(&self) -> Vec<Arc<CreationalContext>> {
		self.children.lock().clone()
	}

	/// Whether releasing this context would run any destroy capability,
	/// its own or one of its children's.
	pub fn needs_release(&self) -> bool {
		self.injectable.has_destroyer()
			|| self.children.lock().iter().any(|child| child.needs_release())
	}

	pub fn is_released(&self) -> bool {
		self.released.load(Ordering::Acquire)
	}

	/// Destroys the instance and cascades to the children. Idempotent.
	pub fn release(&self) {
		if self.released.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(instance) = self.instance.get() {
			tracing::debug!(injectable = %self.injectable, "destroying instance");
			self.injectable.destroy(instance);
		}
		let children = std::mem::take(&mut *self.children.lock());
		for child in children.into_iter().rev() {
			child.release();
		}
	}
}

impl fmt::Debug for CreationalContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CreationalContext")
			.field("injectable", &self.injectable.to_string())
			.field("completed", &self.instance.get().is_some())
			.field("children", &self.children.lock().len())
			.field("released", &self.is_released())
			.finish()
	}
}
