//! Aggregation
//!
//! Folds one frame's entities at a time into running totals for a run:
//!
//! - **Category frequency**: raw occurrences per category across sampled frames.
//!   Every entity counts, so a laptop visible in five sampled frames counts five.
//! - **People**: distinct person identities. An identity counts at most once no
//!   matter how many sampled frames it reappears in. Untracked person
//!   detections get a fresh synthetic identity, so each one counts exactly once.
//! - **Attributes**: the label resolved for each person identity, when the
//!   classifier produced one.
//!
//! The state is owned by exactly one run and is never shared.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entity::{DetectedEntity, Identity, PixelBuffer};

// ============================================================================
// Attributes
// ============================================================================

/// Outcome of classifying one person crop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attribute {
	/// A confidently resolved label, e.g. `"female"`
	Known(String),
	/// No crop, degenerate crop, or the model failed
	Unknown,
}

impl Attribute {
	/// The label, if known.
	#[must_use]
	pub fn label(&self) -> Option<&str> {
		match self {
			Self::Known(label) => Some(label),
			Self::Unknown => None,
		}
	}
}

/// Something that can turn a person crop into an [`Attribute`].
///
/// Implementations must absorb their own failures and answer
/// [`Attribute::Unknown`]; classification never aborts a run.
pub trait AttributeSource {
	/// Classify one crop. `None` means the analyzer produced no crop.
	fn attribute(&mut self, crop: Option<&PixelBuffer>) -> Attribute;
}

/// Attribute source for runs without a classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttributes;

impl AttributeSource for NoAttributes {
	fn attribute(&mut self, _crop: Option<&PixelBuffer>) -> Attribute {
		Attribute::Unknown
	}
}

impl<F> AttributeSource for F
where
	F: FnMut(Option<&PixelBuffer>) -> Attribute,
{
	fn attribute(&mut self, crop: Option<&PixelBuffer>) -> Attribute {
		self(crop)
	}
}

/// When an already-seen identity may still receive a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributePolicy {
	/// Classify only on the first sighting of an identity
	#[default]
	FirstSighting,
	/// Keep classifying a tracked identity on later sightings until one yields
	/// a known label; the first known label is kept
	FirstKnown,
}

// ============================================================================
// State
// ============================================================================

/// Running totals for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AggregationState {
	category_frequency: IndexMap<String, u64>,
	seen_identities: HashSet<Identity>,
	attributed_identities: BTreeMap<Identity, String>,
	policy: AttributePolicy,
	next_synthetic: u64,
	frames_folded: u64,
}

impl AggregationState {
	/// Empty state with the default attribute policy.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Empty state with an explicit attribute policy.
	#[must_use]
	pub fn with_policy(policy: AttributePolicy) -> Self {
		Self {
			policy,
			..Self::default()
		}
	}

	/// Fold one frame's entities into the totals.
	///
	/// `classifier` is consulted only for person entities that still need a
	/// label under the configured policy.
	pub fn fold<A>(&mut self, entities: &[DetectedEntity], classifier: &mut A)
	where
		A: AttributeSource + ?Sized,
	{
		self.frames_folded += 1;

		for entity in entities {
			*self
				.category_frequency
				.entry(entity.category.clone())
				.or_insert(0) += 1;

			if !entity.is_person() {
				continue;
			}

			let identity = match entity.identity {
				Some(id) if self.seen_identities.contains(&id) => {
					if self.policy == AttributePolicy::FirstKnown
						&& !self.attributed_identities.contains_key(&id)
					{
						self.resolve(id, entity, classifier);
					}
					continue;
				}
				Some(id) => id,
				None => self.mint_synthetic(),
			};

			let _ = self.seen_identities.insert(identity);
			self.resolve(identity, entity, classifier);
		}
	}

	fn resolve<A>(&mut self, identity: Identity, entity: &DetectedEntity, classifier: &mut A)
	where
		A: AttributeSource + ?Sized,
	{
		if let Attribute::Known(label) = classifier.attribute(entity.crop.as_ref()) {
			let _ = self.attributed_identities.insert(identity, label);
		}
	}

	fn mint_synthetic(&mut self) -> Identity {
		let id = Identity::Synthetic(self.next_synthetic);
		self.next_synthetic += 1;
		id
	}

	/// Occurrences per category, in first-seen order.
	#[must_use]
	pub const fn category_frequency(&self) -> &IndexMap<String, u64> {
		&self.category_frequency
	}

	/// Occurrences of one category.
	#[must_use]
	pub fn frequency_of(&self, category: &str) -> u64 {
		self.category_frequency.get(category).copied().unwrap_or(0)
	}

	/// Distinct people counted so far.
	#[must_use]
	pub fn people_count(&self) -> usize {
		self.seen_identities.len()
	}

	/// Resolved label per identity.
	#[must_use]
	pub const fn attributed_identities(&self) -> &BTreeMap<Identity, String> {
		&self.attributed_identities
	}

	/// Count of identities per resolved label.
	#[must_use]
	pub fn attribute_breakdown(&self) -> BTreeMap<String, u64> {
		let mut breakdown = BTreeMap::new();
		for label in self.attributed_identities.values() {
			*breakdown.entry(label.clone()).or_insert(0) += 1;
		}
		breakdown
	}

	/// Number of `fold` calls so far.
	#[must_use]
	pub const fn frames_folded(&self) -> u64 {
		self.frames_folded
	}
}

// ============================================================================
// Tests
// ============================================================================
