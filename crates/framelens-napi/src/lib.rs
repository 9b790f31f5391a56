//! Node.js bindings for the framelens analysis service.
//!
//! Exposes a `FrameLensService` class (process media, query the last result,
//! chat about it) plus logging setup via napi-rs.

// napi-rs requires owned types at the FFI boundary
#![allow(clippy::needless_pass_by_value)]
// Counts and timings stay far below u32/i64 limits in practice
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use std::path::PathBuf;
use std::sync::Arc;

use napi::bindgen_prelude::*;
use napi_derive::napi;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use framelens_core::{AnalysisResult, AttributePolicy, BudgetConfig, Resolution};
use framelens_perception::{
	AnalysisService, AttributeModelConfig, MediaKind, PerceptionError, ProcessingOutput,
	ServiceConfig, TrackerConfig,
};

/// Filter used when neither an explicit filter nor `RUST_LOG` is given.
const DEFAULT_LOG_FILTER: &str = "framelens=info";

// ============================================================================
// JS Types
// ============================================================================

/// Analysis budget. Unset fields take the service default.
#[napi(object)]
#[derive(Clone)]
pub struct JsBudgetConfig {
	/// Hard cap on analyzed frames (0 = analyze nothing)
	pub max_analyzed_frames: Option<u32>,
	/// Analyze every n-th frame
	pub frame_stride: Option<u32>,
	/// Downscale target width (needs `targetHeight`)
	pub target_width: Option<u32>,
	/// Downscale target height (needs `targetWidth`)
	pub target_height: Option<u32>,
	/// Analyze frames at their decoded size
	pub full_resolution: Option<bool>,
	/// Minimum detection confidence (0-1)
	pub min_confidence: Option<f64>,
	/// Hard cap on frames read from the source
	pub max_read_frames: Option<i64>,
}

/// Service configuration. Unset fields take their defaults.
#[napi(object)]
#[derive(Clone)]
pub struct JsServiceConfig {
	/// JSON config file applied before the fields below
	pub config_path: Option<String>,
	/// Detector ONNX model path
	pub detector_model_path: Option<String>,
	/// Attribute ONNX model path
	pub attribute_model_path: Option<String>,
	/// Skip attribute classification
	pub disable_attributes: Option<bool>,
	/// Skip identity tracking (every person sighting counts)
	pub disable_tracking: Option<bool>,
	/// Minimum IoU to continue a track
	pub tracker_iou_threshold: Option<f64>,
	/// "first_sighting" or "first_known"
	pub attribute_policy: Option<String>,
	/// Budget used when a call passes none
	pub default_budget: Option<JsBudgetConfig>,
	/// Download timeout (seconds)
	pub download_timeout_seconds: Option<u32>,
	/// Largest accepted download (bytes)
	pub max_download_bytes: Option<i64>,
}

/// One category with its count.
#[napi(object)]
pub struct JsCategoryCount {
	/// Category name
	pub category: String,
	/// Occurrences across analyzed frames
	pub count: u32,
}

/// People per attribute label.
#[napi(object)]
pub struct JsAttributeCount {
	/// Label
	pub label: String,
	/// Distinct people with this label
	pub count: u32,
}

/// Analysis result.
#[napi(object)]
pub struct JsAnalysisResult {
	/// Distinct people seen
	pub people_count: u32,
	/// People per resolved label
	pub attribute_breakdown: Vec<JsAttributeCount>,
	/// Categories, most frequent first
	pub visual_categories: Vec<String>,
	/// Categories with counts
	pub category_counts: Vec<JsCategoryCount>,
	/// Environment phrase
	pub environment: String,
	/// Summary sentence
	pub content_summary: String,
}

/// Processing statistics.
#[napi(object)]
pub struct JsProcessingStats {
	/// Frames read from the source
	pub frames_read: i64,
	/// Frames analyzed
	pub frames_analyzed: u32,
	/// Frames skipped by the stride
	pub frames_skipped: i64,
	/// Frames that failed to decode
	pub frames_failed: u32,
	/// "end_of_source", "budget_exhausted" or "read_cap_reached"
	pub stop_reason: String,
	/// Run time (ms)
	pub elapsed_ms: i64,
}

/// Processing output.
#[napi(object)]
pub struct JsProcessingOutput {
	/// Result
	pub result: JsAnalysisResult,
	/// Stats
	pub stats: JsProcessingStats,
}

// ============================================================================
// Service
// ============================================================================

/// Long-lived analysis service holding loaded models and the last result.
#[napi]
pub struct FrameLensService {
	inner: Arc<AnalysisService>,
}

#[napi]
impl FrameLensService {
	/// Load models and create the service.
	#[napi(constructor)]
	pub fn new(config: Option<JsServiceConfig>) -> Result<Self> {
		let config = js_service_config_to_core(config)?;
		let service = AnalysisService::from_config(config).map_err(perception_error_to_napi)?;
		info!(version = framelens_perception::VERSION, "FrameLens service created");
		Ok(Self {
			inner: Arc::new(service),
		})
	}

	/// Analyze uploaded bytes. `kind` is "image" or "video".
	#[napi]
	pub async fn process_media(
		&self,
		data: Buffer,
		kind: String,
		budget: Option<JsBudgetConfig>,
	) -> Result<JsProcessingOutput> {
		let kind: MediaKind = kind.parse().map_err(perception_error_to_napi)?;
		let budget = self.budget_or_default(budget);
		let output = self
			.inner
			.process_media(data.to_vec(), kind, budget)
			.await
			.map_err(perception_error_to_napi)?;
		Ok(processing_output_to_js(output))
	}

	/// Analyze a local image or video file.
	#[napi]
	pub async fn process_path(
		&self,
		path: String,
		budget: Option<JsBudgetConfig>,
	) -> Result<JsProcessingOutput> {
		let budget = self.budget_or_default(budget);
		let output = self
			.inner
			.process_path(PathBuf::from(path), budget)
			.await
			.map_err(perception_error_to_napi)?;
		Ok(processing_output_to_js(output))
	}

	/// Download and analyze a remote image or video.
	#[napi]
	pub async fn process_url(
		&self,
		url: String,
		budget: Option<JsBudgetConfig>,
	) -> Result<JsProcessingOutput> {
		let budget = self.budget_or_default(budget);
		let output = self
			.inner
			.process_url(&url, budget)
			.await
			.map_err(perception_error_to_napi)?;
		Ok(processing_output_to_js(output))
	}

	/// The most recent successful result, if any.
	#[napi]
	pub fn last_result(&self) -> Option<JsAnalysisResult> {
		self.inner.last_result().map(|r| result_to_js(&r))
	}

	/// The most recent result as a JSON string, if any.
	#[napi]
	pub fn last_result_json(&self) -> Result<Option<String>> {
		self.inner
			.last_result()
			.map(|r| serde_json::to_string(r.as_ref()))
			.transpose()
			.map_err(|e| Error::new(Status::GenericFailure, e.to_string()))
	}

	/// Summary of the most recent result, or a prompt to analyze first.
	#[napi]
	pub fn summarize_last(&self) -> String {
		self.inner.summarize_last()
	}

	/// Answer a question about the most recent result.
	#[napi]
	pub fn chat(&self, message: String) -> String {
		self.inner.chat(&message)
	}

	fn budget_or_default(&self, js: Option<JsBudgetConfig>) -> Option<BudgetConfig> {
		js.map(|js| js_budget_config_to_core(js, self.inner.config().default_budget))
	}
}

// ============================================================================
// Functions
// ============================================================================

/// Install the global tracing subscriber.
///
/// `filter` is an `EnvFilter` directive string; without it `RUST_LOG` is used,
/// then `framelens=info`. Returns `false` when a subscriber was already set.
#[napi]
pub fn init_logging(filter: Option<String>, json: Option<bool>) -> bool {
	let env_filter = filter.map_or_else(
		|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
		EnvFilter::new,
	);

	let installed = if json.unwrap_or(false) {
		tracing_subscriber::registry()
			.with(fmt::layer().json())
			.with(env_filter)
			.try_init()
	} else {
		tracing_subscriber::registry()
			.with(fmt::layer().with_target(true))
			.with(env_filter)
			.try_init()
	};
	installed.is_ok()
}

/// Check if FFmpeg is available.
#[napi]
pub async fn check_ffmpeg() -> Result<bool> {
	match framelens_perception::check_ffmpeg().await {
		Ok(()) => Ok(true),
		Err(_) => Ok(false),
	}
}

/// Check if FFprobe is available. Video metadata needs it.
#[napi]
pub async fn check_ffprobe() -> Result<bool> {
	Ok(framelens_perception::check_ffprobe().await.is_ok())
}

/// Get the default model directory.
#[napi]
pub fn get_default_model_dir() -> String {
	framelens_perception::default_model_dir().display().to_string()
}

/// Library version.
#[napi]
pub fn version() -> String {
	framelens_perception::VERSION.to_string()
}

// ============================================================================
// Type Conversions
// ============================================================================

fn perception_error_to_napi(e: PerceptionError) -> Error {
	let status = if e.is_invalid_input() {
		Status::InvalidArg
	} else {
		Status::GenericFailure
	};
	Error::new(status, e.to_string())
}

fn result_to_js(r: &AnalysisResult) -> JsAnalysisResult {
	JsAnalysisResult {
		people_count: r.people_count as u32,
		attribute_breakdown: r
			.attribute_breakdown
			.iter()
			.map(|(label, count)| JsAttributeCount {
				label: label.clone(),
				count: *count as u32,
			})
			.collect(),
		visual_categories: r.visual_categories.clone(),
		category_counts: r
			.category_counts
			.iter()
			.map(|c| JsCategoryCount {
				category: c.category.clone(),
				count: c.count as u32,
			})
			.collect(),
		environment: r.environment.clone(),
		content_summary: r.content_summary.clone(),
	}
}

fn processing_output_to_js(o: ProcessingOutput) -> JsProcessingOutput {
	JsProcessingOutput {
		result: result_to_js(&o.result),
		stats: JsProcessingStats {
			frames_read: o.stats.frames_read as i64,
			frames_analyzed: o.stats.frames_analyzed as u32,
			frames_skipped: o.stats.frames_skipped as i64,
			frames_failed: o.stats.frames_failed as u32,
			stop_reason: o.stats.stop_reason.as_str().to_string(),
			elapsed_ms: o.stats.elapsed_ms as i64,
		},
	}
}

fn js_budget_config_to_core(js: JsBudgetConfig, default: BudgetConfig) -> BudgetConfig {
	let target_resolution = if js.full_resolution.unwrap_or(false) {
		None
	} else {
		match (js.target_width, js.target_height) {
			(Some(w), Some(h)) => Some(Resolution::new(w, h)),
			_ => default.target_resolution,
		}
	};

	BudgetConfig {
		max_analyzed_frames: js.max_analyzed_frames.unwrap_or(default.max_analyzed_frames),
		frame_stride: js.frame_stride.unwrap_or(default.frame_stride),
		target_resolution,
		min_confidence: js
			.min_confidence
			.map_or(default.min_confidence, |c| c as f32),
		max_read_frames: js
			.max_read_frames
			.map(|n| n.max(0) as u64)
			.or(default.max_read_frames),
	}
}

fn js_service_config_to_core(js: Option<JsServiceConfig>) -> Result<ServiceConfig> {
	let Some(js) = js else {
		return Ok(ServiceConfig::default());
	};

	let mut config = match js.config_path {
		Some(path) => ServiceConfig::from_json_file(path).map_err(perception_error_to_napi)?,
		None => ServiceConfig::default(),
	};

	if let Some(path) = js.detector_model_path {
		config.detector.model_path = PathBuf::from(path);
	}
	if let Some(path) = js.attribute_model_path {
		// A model path turns classification back on for a config that had it off.
		config
			.attributes
			.get_or_insert_with(AttributeModelConfig::default)
			.model_path = PathBuf::from(path);
	}
	if js.disable_attributes.unwrap_or(false) {
		config.attributes = None;
	}

	if js.disable_tracking.unwrap_or(false) {
		config.tracker = None;
	} else if let Some(iou) = js.tracker_iou_threshold {
		config.tracker = Some(TrackerConfig {
			iou_threshold: iou as f32,
			..config.tracker.unwrap_or_default()
		});
	}

	if let Some(policy) = js.attribute_policy.as_deref() {
		config.policy = match policy {
			"first_sighting" => AttributePolicy::FirstSighting,
			"first_known" => AttributePolicy::FirstKnown,
			other => {
				return Err(Error::new(
					Status::InvalidArg,
					format!("unknown attribute policy '{other}'"),
				))
			}
		};
	}

	if let Some(budget) = js.default_budget {
		config.default_budget = js_budget_config_to_core(budget, config.default_budget);
	}
	if let Some(seconds) = js.download_timeout_seconds {
		config.acquisition.timeout_seconds = u64::from(seconds);
	}
	if let Some(bytes) = js.max_download_bytes {
		config.acquisition.max_bytes = bytes.max(0) as u64;
	}

	Ok(config)
}
