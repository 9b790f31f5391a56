//! Last-result register.
//!
//! A single slot holding the most recent completed [`AnalysisResult`]. Runs
//! publish a whole result in one assignment, so readers see either the old
//! result or the new one, never a mix. Last write wins.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::summary::AnalysisResult;

/// Single-slot publish/read store for the latest analysis result.
#[derive(Debug, Default)]
pub struct LastResultStore {
	slot: RwLock<Option<Arc<AnalysisResult>>>,
}

impl LastResultStore {
	/// Empty store.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the stored result, returning the shared handle to the new one.
	pub fn publish(&self, result: AnalysisResult) -> Arc<AnalysisResult> {
		let result = Arc::new(result);
		*self.slot.write() = Some(Arc::clone(&result));
		result
	}

	/// The latest published result, if any run has completed.
	#[must_use]
	pub fn latest(&self) -> Option<Arc<AnalysisResult>> {
		self.slot.read().clone()
	}

	/// Whether any result has been published.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.slot.read().is_none()
	}

	/// Drop the stored result.
	pub fn clear(&self) {
		*self.slot.write() = None;
	}
}
