//! Keyword chat over the last result.
//!
//! A small responder: the question is lower-cased, split into words and
//! matched against keyword groups in order. Keywords match whole words only,
//! so "environment" never hits "men". Anything unmatched gets the summary.

use crate::summary::AnalysisResult;

/// Reply when no analysis has completed yet.
pub const ANALYZE_FIRST: &str = "Please analyze a video first.";

const PEOPLE_KEYWORDS: &[&str] = &["how many", "people", "person", "persons"];
const ATTRIBUTE_KEYWORDS: &[&str] = &[
	"male", "males", "female", "females", "gender", "genders", "men", "women",
];
const OBJECT_KEYWORDS: &[&str] = &[
	"object", "objects", "see", "seen", "detect", "detected", "item", "items",
];
const ENVIRONMENT_KEYWORDS: &[&str] = &["where", "environment", "place", "setting"];

/// Lower-cased words joined by single spaces, padded with a space each side.
fn words(message: &str) -> String {
	let lowered = message.to_lowercase();
	let joined = lowered
		.split(|c: char| !c.is_alphanumeric())
		.filter(|w| !w.is_empty())
		.collect::<Vec<_>>()
		.join(" ");
	format!(" {joined} ")
}

/// Whether any keyword (one word or a phrase) appears as whole words.
fn mentions(question: &str, keywords: &[&str]) -> bool {
	keywords
		.iter()
		.any(|k| question.contains(&format!(" {k} ")))
}

fn breakdown_phrase(result: &AnalysisResult) -> Option<String> {
	if result.attribute_breakdown.is_empty() {
		return None;
	}
	let parts: Vec<String> = result
		.attribute_breakdown
		.iter()
		.map(|(label, count)| format!("{count} {label}"))
		.collect();
	Some(parts.join(", "))
}

/// Answer `message` from `last`.
#[must_use]
pub fn reply(message: &str, last: Option<&AnalysisResult>) -> String {
	let Some(result) = last else {
		return ANALYZE_FIRST.to_string();
	};
	let question = words(message);

	// "how many women" asks about attributes, not the head count.
	if mentions(&question, ATTRIBUTE_KEYWORDS) {
		return breakdown_phrase(result).map_or_else(
			|| "I could not confidently tell anyone's gender in this video.".to_string(),
			|b| format!("Gender breakdown: {b}."),
		);
	}

	if mentions(&question, PEOPLE_KEYWORDS) {
		let base = match result.people_count {
			1 => "I counted 1 person".to_string(),
			n => format!("I counted {n} people"),
		};
		return breakdown_phrase(result).map_or_else(
			|| format!("{base}."),
			|b| format!("{base} ({b})."),
		);
	}

	if mentions(&question, OBJECT_KEYWORDS) {
		if result.visual_categories.is_empty() {
			return "No clear objects were detected.".to_string();
		}
		return format!("Detected objects: {}.", result.visual_categories.join(", "));
	}

	if mentions(&question, ENVIRONMENT_KEYWORDS) {
		return format!("It looks like {}.", result.environment);
	}

	result.content_summary.clone()
}
