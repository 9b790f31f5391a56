//! Attribute classification of person crops.
//!
//! The model side ([`AttributeModel`]) may fail in any way it likes. The
//! pipeline side ([`AttributeClassifier`]) turns every failure, and every
//! missing or degenerate crop, into [`Attribute::Unknown`] so classification
//! can never abort a run.

use std::path::PathBuf;

use framelens_core::{Attribute, AttributeSource, PixelBuffer};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::default_model_dir;
use crate::detect::to_nchw;
use crate::error::{PerceptionError, Result};

// ============================================================================
// Capability
// ============================================================================

/// Classifies one person crop into a label.
pub trait AttributeModel: Send + Sync {
	/// Classify a non-degenerate RGB crop.
	///
	/// # Errors
	///
	/// Returns `ClassificationFailure` when the model cannot answer
	/// confidently, or `ModelError` when inference fails.
	fn classify(&self, crop: &PixelBuffer) -> Result<String>;
}

impl<F> AttributeModel for F
where
	F: Fn(&PixelBuffer) -> Result<String> + Send + Sync,
{
	fn classify(&self, crop: &PixelBuffer) -> Result<String> {
		self(crop)
	}
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the ONNX attribute model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeModelConfig {
	/// Path to the ONNX model file
	pub model_path: PathBuf,

	/// Square model input size in pixels
	pub input_size: u32,

	/// Label per output index
	pub labels: Vec<String>,

	/// Top probability below which the answer counts as a failure
	pub min_confidence: f32,
}

impl Default for AttributeModelConfig {
	fn default() -> Self {
		Self {
			model_path: default_model_dir().join("gender.onnx"),
			input_size: 224,
			labels: vec!["female".to_string(), "male".to_string()],
			min_confidence: 0.6,
		}
	}
}

// ============================================================================
// ONNX model
// ============================================================================

/// Square-input classifier on ONNX Runtime.
pub struct OnnxAttributeModel {
	session: Mutex<Session>,
	config: AttributeModelConfig,
}

impl std::fmt::Debug for OnnxAttributeModel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OnnxAttributeModel")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl OnnxAttributeModel {
	/// Load the ONNX model from disk.
	///
	/// # Errors
	///
	/// Returns `ModelNotFound` when the file is missing and `ModelError` when
	/// ONNX Runtime rejects it or no labels are configured.
	pub fn load(config: AttributeModelConfig) -> Result<Self> {
		if !config.model_path.exists() {
			return Err(PerceptionError::ModelNotFound(config.model_path));
		}
		if config.labels.is_empty() {
			return Err(PerceptionError::ModelError(
				"attribute model needs at least one label".to_string(),
			));
		}

		let session = Session::builder()?.commit_from_file(&config.model_path)?;
		info!(
			model_path = %config.model_path.display(),
			labels = ?config.labels,
			"Attribute model initialized"
		);

		Ok(Self {
			session: Mutex::new(session),
			config,
		})
	}

	/// Check whether the model file exists at the configured path.
	#[must_use]
	pub fn is_available(config: &AttributeModelConfig) -> bool {
		config.model_path.exists()
	}

	fn run_inference(&self, input: Tensor<f32>) -> Result<Vec<f32>> {
		let mut session = self.session.lock();
		let outputs = session.run(ort::inputs![input])?;
		let view = outputs[0].try_extract_array::<f32>()?;
		Ok(view.iter().copied().collect())
	}
}

impl AttributeModel for OnnxAttributeModel {
	fn classify(&self, crop: &PixelBuffer) -> Result<String> {
		let input = to_nchw(crop, self.config.input_size)
			.map_err(|e| PerceptionError::ClassificationFailure(e.to_string()))?;
		let scores = self.run_inference(Tensor::from_array(input)?)?;
		pick_label(&scores, &self.config.labels, self.config.min_confidence)
	}
}

/// Treat `scores` as probabilities if they already are, otherwise softmax them.
pub(crate) fn to_probabilities(scores: &[f32]) -> Vec<f32> {
	let sum: f32 = scores.iter().sum();
	let already = scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
	if already {
		return scores.to_vec();
	}

	let max = scores.iter().copied().fold(f32::MIN, f32::max);
	let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
	let total: f32 = exps.iter().sum();
	exps.into_iter().map(|e| e / total).collect()
}

/// Pick the top label, failing when it is not confident enough.
pub(crate) fn pick_label(scores: &[f32], labels: &[String], min_confidence: f32) -> Result<String> {
	if scores.len() != labels.len() {
		return Err(PerceptionError::ClassificationFailure(format!(
			"model returned {} scores for {} labels",
			scores.len(),
			labels.len()
		)));
	}

	let probabilities = to_probabilities(scores);
	let (best, p) = probabilities
		.iter()
		.copied()
		.enumerate()
		.max_by(|a, b| a.1.total_cmp(&b.1))
		.ok_or_else(|| PerceptionError::ClassificationFailure("no scores".to_string()))?;

	if p < min_confidence {
		return Err(PerceptionError::ClassificationFailure(format!(
			"top score {p:.2} below {min_confidence:.2}"
		)));
	}
	Ok(labels[best].clone())
}

// ============================================================================
// Pipeline adapter
// ============================================================================

/// [`AttributeSource`] that never fails: wraps an optional model and logs
/// what it absorbs.
pub struct AttributeClassifier<'a> {
	model: Option<&'a dyn AttributeModel>,
	failures: u64,
}

impl<'a> AttributeClassifier<'a> {
	/// Classifier backed by `model`, or disabled when `None`.
	#[must_use]
	pub const fn new(model: Option<&'a dyn AttributeModel>) -> Self {
		Self { model, failures: 0 }
	}

	/// Model failures absorbed so far.
	#[must_use]
	pub const fn failures(&self) -> u64 {
		self.failures
	}
}

impl AttributeSource for AttributeClassifier<'_> {
	fn attribute(&mut self, crop: Option<&PixelBuffer>) -> Attribute {
		let Some(model) = self.model else {
			return Attribute::Unknown;
		};
		let Some(crop) = crop.filter(|c| !c.is_degenerate()) else {
			return Attribute::Unknown;
		};

		match model.classify(crop) {
			Ok(label) => Attribute::Known(label),
			Err(e) => {
				self.failures += 1;
				warn!(error = %e, "Attribute classification failed, treating as unknown");
				Attribute::Unknown
			}
		}
	}
}
