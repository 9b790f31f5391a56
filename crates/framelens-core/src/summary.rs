//! Summarization
//!
//! Reduces a finished [`AggregationState`] into an [`AnalysisResult`]: ranked
//! categories, people counts and a one-sentence description.
//!
//! The environment phrase comes from a literal ordered rule table evaluated over
//! the top five categories. The first rule whose category set intersects the top
//! five wins. A table instead of a model keeps the output deterministic and easy
//! to audit.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::aggregate::AggregationState;

/// How many top categories feed the sentence and the environment rules.
pub const TOP_CATEGORIES: usize = 5;

/// Phrase used when no environment rule matches.
pub const FALLBACK_ENVIRONMENT: &str = "an indoor environment";

/// Ordered `(categories, phrase)` environment rules. First match wins.
pub const ENVIRONMENT_RULES: &[(&[&str], &str)] = &[
	(
		&["laptop", "keyboard", "mouse", "monitor"],
		"a workspace or office environment",
	),
	(
		&[
			"dining table",
			"couch",
			"cup",
			"bowl",
			"fork",
			"knife",
			"spoon",
			"wine glass",
		],
		"a dining or living area",
	),
	(&["cat", "dog"], "a home environment"),
	(
		&[
			"car",
			"bus",
			"truck",
			"bicycle",
			"motorcycle",
			"traffic light",
			"stop sign",
		],
		"an outdoor street scene",
	),
];

// ============================================================================
// Result
// ============================================================================

/// One category with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
	/// Category name
	pub category: String,
	/// Occurrences across analyzed frames
	pub count: u64,
}

/// The final, immutable outcome of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
	/// Distinct people seen
	pub people_count: u64,

	/// People per resolved attribute label
	pub attribute_breakdown: BTreeMap<String, u64>,

	/// All categories, most frequent first (ties in first-seen order)
	pub visual_categories: Vec<String>,

	/// Same order as `visual_categories`, with counts
	pub category_counts: Vec<CategoryCount>,

	/// Environment phrase picked by the rule table
	pub environment: String,

	/// Natural-language description
	pub content_summary: String,
}

// ============================================================================
// Summarize
// ============================================================================

/// Pick the environment phrase for a set of top categories.
#[must_use]
pub fn environment_for(top: &[&str]) -> &'static str {
	ENVIRONMENT_RULES
		.iter()
		.find(|(categories, _)| categories.iter().any(|c| top.contains(c)))
		.map_or(FALLBACK_ENVIRONMENT, |(_, phrase)| *phrase)
}

/// Reduce aggregation state to a result. Pure and deterministic.
#[must_use]
pub fn summarize(state: &AggregationState) -> AnalysisResult {
	// `sort_by` is stable, so equal counts keep first-seen order.
	let mut ranked: Vec<(&String, u64)> = state
		.category_frequency()
		.iter()
		.map(|(category, count)| (category, *count))
		.collect();
	ranked.sort_by(|a, b| b.1.cmp(&a.1));

	let top: SmallVec<[&str; TOP_CATEGORIES]> = ranked
		.iter()
		.take(TOP_CATEGORIES)
		.map(|(category, _)| category.as_str())
		.collect();

	let people_count = state.people_count() as u64;
	let attribute_breakdown = state.attribute_breakdown();
	let environment = environment_for(&top);
	let content_summary = describe(environment, people_count, &attribute_breakdown, &top);

	AnalysisResult {
		people_count,
		attribute_breakdown,
		visual_categories: ranked.iter().map(|(c, _)| (*c).clone()).collect(),
		category_counts: ranked
			.iter()
			.map(|(category, count)| CategoryCount {
				category: (*category).clone(),
				count: *count,
			})
			.collect(),
		environment: environment.to_string(),
		content_summary,
	}
}

/// Render the summary sentence.
fn describe(
	environment: &str,
	people_count: u64,
	breakdown: &BTreeMap<String, u64>,
	top: &[&str],
) -> String {
	let mut sentence = format!("The footage shows {environment} with ");

	match people_count {
		0 => sentence.push_str("no people"),
		1 => sentence.push_str("1 person"),
		n => {
			let _ = write!(sentence, "{n} people");
		}
	}

	if !breakdown.is_empty() {
		let parts: Vec<String> = breakdown
			.iter()
			.map(|(label, count)| format!("{count} {label}"))
			.collect();
		let _ = write!(sentence, " ({})", parts.join(", "));
	}

	if top.is_empty() {
		sentence.push_str(", and no clear objects were detected.");
	} else {
		let _ = write!(
			sentence,
			", and the most frequent objects are {}.",
			top.join(", ")
		);
	}

	sentence
}

// ============================================================================
// Tests
// ============================================================================
