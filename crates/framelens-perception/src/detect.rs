//! Object detection.
//!
//! [`ObjectDetector`] is the capability the frame analyzer calls once per
//! analyzed frame. The bundled implementation runs a YOLOv8 ONNX export
//! in-process through ONNX Runtime.

use std::path::PathBuf;

use framelens_core::{DetectedEntity, PixelBuffer, Region};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::default_model_dir;
use crate::error::{PerceptionError, Result};

/// COCO class names (80 classes), in YOLOv8 output order.
pub const COCO_CLASSES: &[&str] = &[
	"person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
	"boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
	"bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
	"giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
	"skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
	"skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
	"fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
	"broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
	"potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
	"remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
	"refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
	"toothbrush",
];

// ============================================================================
// Capability
// ============================================================================

/// Detects objects in one RGB frame.
///
/// Implementations return untracked entities in the frame's pixel
/// coordinates. Identity assignment is the tracker's job.
pub trait ObjectDetector: Send + Sync {
	/// Detect objects scoring at least `min_confidence`.
	///
	/// # Errors
	///
	/// Returns `DetectionFailure` (or `ModelError`) when inference fails.
	fn detect(&self, frame: &PixelBuffer, min_confidence: f32) -> Result<Vec<DetectedEntity>>;
}

impl<F> ObjectDetector for F
where
	F: Fn(&PixelBuffer, f32) -> Result<Vec<DetectedEntity>> + Send + Sync,
{
	fn detect(&self, frame: &PixelBuffer, min_confidence: f32) -> Result<Vec<DetectedEntity>> {
		self(frame, min_confidence)
	}
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the YOLOv8 detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
	/// Path to the ONNX model file
	pub model_path: PathBuf,

	/// Square model input size in pixels
	pub input_size: u32,

	/// IoU above which overlapping boxes of one class are suppressed
	pub nms_threshold: f32,

	/// Class names in model output order (COCO-80 when empty)
	pub class_names: Vec<String>,
}

impl Default for DetectorConfig {
	fn default() -> Self {
		Self {
			model_path: default_model_dir().join("yolov8n.onnx"),
			input_size: 640,
			nms_threshold: 0.45,
			class_names: Vec::new(),
		}
	}
}

// ============================================================================
// YOLOv8
// ============================================================================

/// YOLOv8 detector on ONNX Runtime.
///
/// Thread-safe: wraps `ort::Session` in a `Mutex` since `Session::run`
/// requires `&mut self`. The lock is held only during ONNX inference.
pub struct YoloDetector {
	session: Mutex<Session>,
	config: DetectorConfig,
}

impl std::fmt::Debug for YoloDetector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("YoloDetector")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl YoloDetector {
	/// Load the ONNX model from disk.
	///
	/// # Errors
	///
	/// Returns `ModelNotFound` when the file is missing and `ModelError` when
	/// ONNX Runtime rejects it.
	pub fn load(config: DetectorConfig) -> Result<Self> {
		if !config.model_path.exists() {
			return Err(PerceptionError::ModelNotFound(config.model_path));
		}

		let session = Session::builder()?.commit_from_file(&config.model_path)?;
		info!(
			model_path = %config.model_path.display(),
			input_size = config.input_size,
			"Object detector initialized"
		);

		Ok(Self {
			session: Mutex::new(session),
			config,
		})
	}

	/// Check whether the model file exists at the configured path.
	#[must_use]
	pub fn is_available(config: &DetectorConfig) -> bool {
		config.model_path.exists()
	}

	fn class_name(&self, class_id: usize) -> String {
		self.config.class_names.get(class_id).map_or_else(
			|| {
				COCO_CLASSES
					.get(class_id)
					.map_or_else(|| format!("class_{class_id}"), |name| (*name).to_string())
			},
			Clone::clone,
		)
	}

	/// Run ONNX inference and return the flattened `[1, 4 + C, N]` output.
	fn run_inference(&self, input: Tensor<f32>) -> Result<(Vec<f32>, usize, usize)> {
		let mut session = self.session.lock();
		let outputs = session.run(ort::inputs![input])?;
		let view = outputs[0].try_extract_array::<f32>()?;
		let shape = view.shape().to_vec();
		let [_, features, anchors] = shape[..] else {
			return Err(PerceptionError::DetectionFailure(format!(
				"unexpected output shape {shape:?}"
			)));
		};
		Ok((view.iter().copied().collect(), features, anchors))
	}
}

impl ObjectDetector for YoloDetector {
	#[instrument(skip_all, fields(width = frame.width, height = frame.height))]
	fn detect(&self, frame: &PixelBuffer, min_confidence: f32) -> Result<Vec<DetectedEntity>> {
		let input = preprocess(frame, self.config.input_size)?;
		let (output, features, anchors) = self.run_inference(input)?;

		let candidates = decode_predictions(
			&output,
			features,
			anchors,
			min_confidence,
			ScaleFactors::new(frame, self.config.input_size),
		)?;
		let kept = non_max_suppression(candidates, self.config.nms_threshold);
		debug!(count = kept.len(), "Object detection completed");

		Ok(kept
			.into_iter()
			.map(|c| DetectedEntity::new(self.class_name(c.class_id), c.confidence, c.region))
			.collect())
	}
}

// ============================================================================
// Pre/post-processing
// ============================================================================

/// Resize to the square model input and convert HWC u8 to NCHW f32 in [0, 1].
pub(crate) fn preprocess(frame: &PixelBuffer, input_size: u32) -> Result<Tensor<f32>> {
	Ok(Tensor::from_array(to_nchw(frame, input_size)?)?)
}

/// `[1, 3, S, S]` input array for a square model.
pub(crate) fn to_nchw(frame: &PixelBuffer, input_size: u32) -> Result<Array4<f32>> {
	let rgb = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
		.ok_or_else(|| {
			PerceptionError::DetectionFailure(format!(
				"frame buffer does not match {}x{}",
				frame.width, frame.height
			))
		})?;
	let resized = image::imageops::resize(
		&rgb,
		input_size,
		input_size,
		image::imageops::FilterType::Triangle,
	);

	let side = input_size as usize;
	let mut input = Array4::<f32>::zeros((1, 3, side, side));
	for (x, y, pixel) in resized.enumerate_pixels() {
		for c in 0..3 {
			input[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
		}
	}
	Ok(input)
}

/// Maps model-input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScaleFactors {
	x: f32,
	y: f32,
	width: f32,
	height: f32,
}

impl ScaleFactors {
	#[allow(clippy::cast_precision_loss)]
	pub(crate) fn new(frame: &PixelBuffer, input_size: u32) -> Self {
		let input = input_size.max(1) as f32;
		Self {
			x: frame.width as f32 / input,
			y: frame.height as f32 / input,
			width: frame.width as f32,
			height: frame.height as f32,
		}
	}
}

/// One box before suppression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
	pub(crate) class_id: usize,
	pub(crate) confidence: f32,
	pub(crate) region: Region,
}

/// Decode the `[1, 4 + C, N]` YOLOv8 head: `(cx, cy, w, h)` then class scores,
/// laid out feature-major.
pub(crate) fn decode_predictions(
	output: &[f32],
	features: usize,
	anchors: usize,
	min_confidence: f32,
	scale: ScaleFactors,
) -> Result<Vec<Candidate>> {
	if features <= 4 || output.len() != features * anchors {
		return Err(PerceptionError::DetectionFailure(format!(
			"unexpected output size {} for {features}x{anchors}",
			output.len()
		)));
	}

	let at = |feature: usize, anchor: usize| output[feature * anchors + anchor];
	let mut candidates = Vec::new();

	for i in 0..anchors {
		let (class_id, confidence) = (4..features)
			.map(|f| (f - 4, at(f, i)))
			.fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

		if confidence < min_confidence {
			continue;
		}

		let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
		let region = Region::new(
			((cx - w / 2.0) * scale.x).clamp(0.0, scale.width),
			((cy - h / 2.0) * scale.y).clamp(0.0, scale.height),
			((cx + w / 2.0) * scale.x).clamp(0.0, scale.width),
			((cy + h / 2.0) * scale.y).clamp(0.0, scale.height),
		);

		candidates.push(Candidate {
			class_id,
			confidence,
			region,
		});
	}

	Ok(candidates)
}

/// Greedy per-class non-maximum suppression, highest confidence first.
pub(crate) fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
	candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

	let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
	for candidate in candidates {
		let suppressed = kept.iter().any(|k| {
			k.class_id == candidate.class_id && k.region.iou(&candidate.region) > iou_threshold
		});
		if !suppressed {
			kept.push(candidate);
		}
	}
	kept
}

// ============================================================================
// Tests
// ============================================================================
