//! Service configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config and a
//! partial one only overrides what it names.

use std::path::{Path, PathBuf};

use framelens_core::{AttributePolicy, BudgetConfig};
use serde::{Deserialize, Serialize};

use crate::acquire::AcquisitionConfig;
use crate::classify::AttributeModelConfig;
use crate::detect::DetectorConfig;
use crate::error::Result;
use crate::track::TrackerConfig;

/// Directory models are looked up in by default: `~/.framelens/models`.
#[must_use]
pub fn default_model_dir() -> PathBuf {
	dirs::home_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(".framelens")
		.join("models")
}

/// Configuration for an analysis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
	/// Object detector
	pub detector: DetectorConfig,

	/// Identity tracking; `null` disables it and every person sighting counts
	pub tracker: Option<TrackerConfig>,

	/// Attribute model; `null` disables attribute classification
	pub attributes: Option<AttributeModelConfig>,

	/// When a tracked person may still be classified
	pub policy: AttributePolicy,

	/// Budget used when a request does not carry one
	pub default_budget: BudgetConfig,

	/// Remote download limits
	pub acquisition: AcquisitionConfig,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			detector: DetectorConfig::default(),
			tracker: Some(TrackerConfig::default()),
			attributes: Some(AttributeModelConfig::default()),
			policy: AttributePolicy::default(),
			default_budget: BudgetConfig::default(),
			acquisition: AcquisitionConfig::default(),
		}
	}
}

impl ServiceConfig {
	/// Parse a config from JSON text.
	///
	/// # Errors
	///
	/// Returns `Io` (kind `InvalidData`) when the JSON is malformed.
	pub fn from_json_str(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json).map_err(std::io::Error::from)?)
	}

	/// Read a config from a JSON file.
	///
	/// # Errors
	///
	/// Returns `Io` when the file cannot be read or parsed.
	pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
		let text = std::fs::read_to_string(path)?;
		Self::from_json_str(&text)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::error::PerceptionError;
	use std::io::Write;

	#[test]
	fn test_default_model_dir() {
		let dir = default_model_dir();
		assert!(dir.ends_with(".framelens/models"));
	}

	#[test]
	fn test_empty_object_is_default() {
		let config = ServiceConfig::from_json_str("{}").unwrap();
		assert_eq!(config.default_budget, BudgetConfig::default());
		assert!(config.tracker.is_some());
		assert!(config.attributes.is_some());
		assert_eq!(config.detector.input_size, 640);
	}

	#[test]
	fn test_partial_override() {
		let config = ServiceConfig::from_json_str(
			r#"{
				"tracker": null,
				"attributes": null,
				"default_budget": { "max_analyzed_frames": 4, "frame_stride": 2,
					"target_resolution": null, "min_confidence": 0.5 },
				"acquisition": { "timeout_seconds": 30 }
			}"#,
		)
		.unwrap();

		assert!(config.tracker.is_none());
		assert!(config.attributes.is_none());
		assert_eq!(config.default_budget.max_analyzed_frames, 4);
		assert_eq!(config.default_budget.target_resolution, None);
		assert_eq!(config.acquisition.timeout_seconds, 30);
		assert_eq!(config.acquisition.max_bytes, AcquisitionConfig::default().max_bytes);
	}

	#[test]
	fn test_from_file_and_errors() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{ "policy": "FirstKnown" }}"#).unwrap();
		let config = ServiceConfig::from_json_file(file.path()).unwrap();
		assert_eq!(config.policy, AttributePolicy::FirstKnown);

		let err = ServiceConfig::from_json_str("{ not json").unwrap_err();
		assert!(matches!(err, PerceptionError::Io(_)));
		assert!(ServiceConfig::from_json_file("/nonexistent/framelens.json").is_err());
	}
}
