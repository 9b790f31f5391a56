//! The analysis run loop.
//!
//! One run pulls frames from a [`FrameSource`] under a budget, analyzes the
//! frames the scheduler selects, folds their entities into a fresh
//! [`AggregationState`] and summarizes once the source ends or the budget is
//! spent. The loop is synchronous and sequential: no two frames are ever
//! analyzed at once.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use framelens_core::{
	summarize, AggregationState, AnalysisResult, AttributePolicy, BudgetConfig, FrameAction,
	Scheduler, StopReason,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::FrameAnalyzer;
use crate::classify::{AttributeClassifier, AttributeModel};
use crate::detect::ObjectDetector;
use crate::error::{PerceptionError, Result};
use crate::track::{IouTracker, TrackerConfig};
use crate::video::{decode_image, is_image_path, FrameSource, SingleImageSource};

// ============================================================================
// Media kind
// ============================================================================

/// What the caller says the bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
	/// A still image: one frame, always analyzed
	Image,
	/// A video container decoded with FFmpeg
	Video,
}

impl MediaKind {
	/// Stable lowercase name.
	#[must_use]
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Image => "image",
			Self::Video => "video",
		}
	}

	/// Guess from a file extension; anything that is not an image is video.
	#[must_use]
	pub fn from_path(path: &Path) -> Self {
		if is_image_path(path) {
			Self::Image
		} else {
			Self::Video
		}
	}
}

impl FromStr for MediaKind {
	type Err = PerceptionError;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"image" => Ok(Self::Image),
			"video" => Ok(Self::Video),
			other => Err(PerceptionError::UnsupportedMedia(format!(
				"unknown media kind '{other}', expected 'image' or 'video'"
			))),
		}
	}
}

// ============================================================================
// Output
// ============================================================================

/// Output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutput {
	/// The summarized result
	pub result: AnalysisResult,

	/// Processing statistics
	pub stats: ProcessingStats,
}

/// Statistics from one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
	/// Frames pulled from the source, analyzed or not
	pub frames_read: u64,

	/// Frames that went through detection
	pub frames_analyzed: u64,

	/// Frames passed over by the stride
	pub frames_skipped: u64,

	/// Frames selected for analysis that failed to decode
	pub frames_failed: u64,

	/// Why the loop stopped
	pub stop_reason: StopReason,

	/// Wall-clock time of the run (ms)
	pub elapsed_ms: u64,
}

// ============================================================================
// Pipeline
// ============================================================================

/// The capabilities a run uses. Cheap to clone; every run gets fresh state.
#[derive(Clone)]
pub struct Pipeline {
	detector: Arc<dyn ObjectDetector>,
	attributes: Option<Arc<dyn AttributeModel>>,
	tracker: Option<TrackerConfig>,
	policy: AttributePolicy,
}

impl std::fmt::Debug for Pipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pipeline")
			.field("attributes", &self.attributes.is_some())
			.field("tracker", &self.tracker)
			.field("policy", &self.policy)
			.finish_non_exhaustive()
	}
}

impl Pipeline {
	/// Pipeline with tracking on and no attribute model.
	#[must_use]
	pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
		Self {
			detector,
			attributes: None,
			tracker: Some(TrackerConfig::default()),
			policy: AttributePolicy::default(),
		}
	}

	/// Set (or clear) the attribute model.
	#[must_use]
	pub fn with_attributes(mut self, model: Option<Arc<dyn AttributeModel>>) -> Self {
		self.attributes = model;
		self
	}

	/// Set (or disable) identity tracking.
	#[must_use]
	pub const fn with_tracker(mut self, tracker: Option<TrackerConfig>) -> Self {
		self.tracker = tracker;
		self
	}

	/// Set the attribute resolution policy.
	#[must_use]
	pub const fn with_policy(mut self, policy: AttributePolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Run the budgeted loop over `source` and summarize.
	///
	/// Per-frame decode, detection and classification faults are absorbed.
	///
	/// # Errors
	///
	/// Returns `InvalidBudget` for a budget that fails validation, and any
	/// fatal error the source reports (e.g. `SourceUnavailable`).
	#[allow(clippy::cast_possible_truncation)]
	pub fn run(&self, source: &mut dyn FrameSource, budget: &BudgetConfig) -> Result<ProcessingOutput> {
		budget.validate()?;
		let start = Instant::now();

		let mut scheduler = Scheduler::new(*budget);
		let mut analyzer =
			FrameAnalyzer::new(self.detector.as_ref(), self.tracker.map(IouTracker::new));
		let mut classifier = AttributeClassifier::new(self.attributes.as_deref());
		let mut state = AggregationState::with_policy(self.policy);

		let mut frames_read = 0_u64;
		let mut frames_analyzed = 0_u64;
		let mut frames_skipped = 0_u64;
		let mut frames_failed = 0_u64;

		loop {
			match scheduler.next() {
				FrameAction::Stop => break,
				FrameAction::Skip => match source.skip_frame() {
					None => {
						scheduler.finish_source();
						break;
					}
					Some(Err(e)) if e.is_fatal() => return Err(e),
					Some(outcome) => {
						frames_read += 1;
						frames_skipped += 1;
						if let Err(e) = outcome {
							debug!(error = %e, "Skipped frame was unreadable");
						}
					}
				},
				FrameAction::Analyze => {
					let index = scheduler.current_index();
					match source.next_frame() {
						None => {
							scheduler.finish_source();
							break;
						}
						Some(Err(e)) if e.is_fatal() => return Err(e),
						Some(Err(e)) => {
							frames_read += 1;
							frames_failed += 1;
							scheduler.record_analyzed();
							warn!(frame = index, error = %e, "Frame decode failed, skipping");
						}
						Some(Ok(frame)) => {
							frames_read += 1;
							let entities = analyzer.analyze(&frame, budget);
							debug!(frame = index, entities = entities.len(), "Folding frame");
							state.fold(&entities, &mut classifier);
							scheduler.record_analyzed();
							frames_analyzed += 1;
						}
					}
				}
			}
		}

		let result = summarize(&state);
		let stats = ProcessingStats {
			frames_read,
			frames_analyzed,
			frames_skipped,
			frames_failed,
			stop_reason: scheduler.stop_reason().unwrap_or(StopReason::EndOfSource),
			elapsed_ms: start.elapsed().as_millis() as u64,
		};

		info!(
			frames_read,
			frames_analyzed,
			frames_failed,
			detection_failures = analyzer.failures(),
			classification_failures = classifier.failures(),
			people = result.people_count,
			stop_reason = stats.stop_reason.as_str(),
			elapsed_ms = stats.elapsed_ms,
			"Analysis run complete"
		);

		Ok(ProcessingOutput { result, stats })
	}

	/// Analyze one encoded still image.
	///
	/// The single frame bypasses the stride; a cap of 0 still analyzes nothing.
	///
	/// # Errors
	///
	/// Returns `FrameDecodeFailure` when the bytes are not a decodable image
	/// (the sole frame failing is fatal), or `InvalidBudget`.
	pub fn run_image(&self, bytes: &[u8], budget: &BudgetConfig) -> Result<ProcessingOutput> {
		budget.validate()?;
		let pixels = decode_image(bytes).map_err(|e| PerceptionError::FrameDecodeFailure {
			index: 1,
			reason: e.to_string(),
		})?;

		let single = BudgetConfig {
			frame_stride: 1,
			max_read_frames: None,
			..*budget
		};
		self.run(&mut SingleImageSource::from_pixels(pixels), &single)
	}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::video::MemoryFrameSource;
	use framelens_core::{DetectedEntity, PixelBuffer, Region};
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn frame() -> PixelBuffer {
		PixelBuffer::new(16, 16, vec![90; 16 * 16 * 3])
	}

	fn frames(n: usize) -> Vec<PixelBuffer> {
		(0..n).map(|_| frame()).collect()
	}

	fn budget(max: u32, stride: u32) -> BudgetConfig {
		BudgetConfig {
			max_analyzed_frames: max,
			frame_stride: stride,
			target_resolution: None,
			..Default::default()
		}
	}

	fn detector_returning(entities: Vec<DetectedEntity>) -> Arc<dyn ObjectDetector> {
		Arc::new(move |_: &PixelBuffer, _: f32| -> Result<Vec<DetectedEntity>> { Ok(entities.clone()) })
	}

	fn person(x: f32) -> DetectedEntity {
		DetectedEntity::new("person", 0.9, Region::new(x, 0.0, x + 4.0, 8.0))
	}

	fn png(width: u32, height: u32) -> Vec<u8> {
		let mut out = Vec::new();
		image::RgbImage::from_pixel(width, height, image::Rgb([50, 60, 70]))
			.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
			.unwrap();
		out
	}

	#[test]
	fn test_media_kind_parsing() {
		assert_eq!("Image".parse::<MediaKind>().unwrap(), MediaKind::Image);
		assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
		let err = "audio".parse::<MediaKind>().unwrap_err();
		assert!(err.is_invalid_input());
		assert_eq!(MediaKind::from_path(Path::new("a.png")), MediaKind::Image);
		assert_eq!(MediaKind::from_path(Path::new("a.mov")), MediaKind::Video);
	}

	#[test]
	fn test_hundred_frames_stride_ten_cap_five() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		let detector: Arc<dyn ObjectDetector> =
			Arc::new(move |_: &PixelBuffer, _: f32| -> Result<Vec<DetectedEntity>> {
				let _ = counter.fetch_add(1, Ordering::SeqCst);
				Ok(vec![])
			});

		let mut source = MemoryFrameSource::new(frames(100));
		let output = Pipeline::new(detector).run(&mut source, &budget(5, 10)).unwrap();

		assert_eq!(calls.load(Ordering::SeqCst), 5);
		assert_eq!(output.stats.frames_analyzed, 5);
		assert_eq!(output.stats.frames_read, 50);
		assert_eq!(output.stats.frames_skipped, 45);
		assert_eq!(output.stats.stop_reason, StopReason::BudgetExhausted);
		// The rest of the source is never touched
		assert_eq!(source.remaining(), 50);
	}

	#[test]
	fn test_tracked_person_counted_once_across_frames() {
		let pipeline = Pipeline::new(detector_returning(vec![person(2.0)]));
		let output = pipeline
			.run(&mut MemoryFrameSource::new(frames(30)), &budget(10, 3))
			.unwrap();

		assert_eq!(output.stats.frames_analyzed, 10);
		assert_eq!(output.result.people_count, 1);
		assert_eq!(output.result.category_counts[0].count, 10);
	}

	#[test]
	fn test_decode_failure_is_skipped_and_counted() {
		let mut source = MemoryFrameSource::from_results(vec![
			Ok(frame()),
			Err(PerceptionError::FrameDecodeFailure {
				index: 2,
				reason: "corrupt".into(),
			}),
			Ok(frame()),
		]);
		let pipeline = Pipeline::new(detector_returning(vec![DetectedEntity::new(
			"cup",
			0.8,
			Region::new(0.0, 0.0, 2.0, 2.0),
		)]));
		let output = pipeline.run(&mut source, &budget(10, 1)).unwrap();

		assert_eq!(output.stats.frames_failed, 1);
		assert_eq!(output.stats.frames_analyzed, 2);
		assert_eq!(output.stats.stop_reason, StopReason::EndOfSource);
		assert_eq!(output.result.visual_categories, vec!["cup"]);
	}

	#[test]
	fn test_fatal_source_error_aborts() {
		let mut source = MemoryFrameSource::from_results(vec![
			Ok(frame()),
			Err(PerceptionError::SourceUnavailable("stream closed".into())),
		]);
		let err = Pipeline::new(detector_returning(vec![]))
			.run(&mut source, &budget(10, 1))
			.unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
	}

	#[test]
	fn test_invalid_budget_rejected() {
		let err = Pipeline::new(detector_returning(vec![]))
			.run(&mut MemoryFrameSource::new(frames(3)), &budget(3, 0))
			.unwrap_err();
		assert!(matches!(err, PerceptionError::InvalidBudget(_)));
	}

	#[test]
	fn test_single_image_two_untracked_people() {
		let pipeline =
			Pipeline::new(detector_returning(vec![person(0.0), person(8.0)])).with_tracker(None);
		let output = pipeline.run_image(&png(16, 16), &budget(10, 30)).unwrap();

		assert_eq!(output.stats.frames_analyzed, 1);
		assert_eq!(output.result.people_count, 2);
		assert_eq!(output.result.category_counts[0].category, "person");
		assert_eq!(output.result.category_counts[0].count, 2);
	}

	#[test]
	fn test_classifier_always_failing() {
		let failing: Arc<dyn AttributeModel> = Arc::new(|_: &PixelBuffer| -> Result<String> {
			Err(PerceptionError::ModelNotFound("gender.onnx".into()))
		});
		let pipeline = Pipeline::new(detector_returning(vec![person(0.0), person(8.0)]))
			.with_attributes(Some(failing));
		let output = pipeline.run_image(&png(16, 16), &budget(10, 1)).unwrap();

		assert!(output.result.attribute_breakdown.is_empty());
		assert_eq!(output.result.people_count, 2);
		assert!(!output.result.content_summary.contains('('));
	}

	#[test]
	fn test_attributes_resolved_per_person() {
		let labels: Arc<dyn AttributeModel> =
			Arc::new(|_: &PixelBuffer| -> Result<String> { Ok("female".to_string()) });
		let pipeline = Pipeline::new(detector_returning(vec![person(0.0), person(8.0)]))
			.with_attributes(Some(labels));
		let output = pipeline
			.run(&mut MemoryFrameSource::new(frames(9)), &budget(3, 3))
			.unwrap();

		assert_eq!(output.result.people_count, 2);
		assert_eq!(output.result.attribute_breakdown.get("female"), Some(&2));
		assert!(output.result.content_summary.contains("(2 female)"));
	}

	#[test]
	fn test_no_entities_anywhere() {
		let output = Pipeline::new(detector_returning(vec![]))
			.run(&mut MemoryFrameSource::new(frames(12)), &budget(4, 3))
			.unwrap();
		assert!(output.result.visual_categories.is_empty());
		assert_eq!(output.result.environment, "an indoor environment");
		assert!(output
			.result
			.content_summary
			.contains("no clear objects were detected"));
	}

	#[test]
	fn test_image_respects_zero_cap() {
		let output = Pipeline::new(detector_returning(vec![person(0.0)]))
			.run_image(&png(8, 8), &budget(0, 1))
			.unwrap();
		assert_eq!(output.stats.frames_analyzed, 0);
		assert_eq!(output.result.people_count, 0);
		assert_eq!(output.stats.stop_reason, StopReason::BudgetExhausted);
	}

	#[test]
	fn test_undecodable_image_is_fatal() {
		let err = Pipeline::new(detector_returning(vec![]))
			.run_image(b"\x89PNG but not really", &budget(1, 1))
			.unwrap_err();
		assert!(matches!(err, PerceptionError::FrameDecodeFailure { index: 1, .. }));
	}

	#[test]
	fn test_analyzed_never_exceeds_cap() {
		let mut rng = StdRng::seed_from_u64(42);
		let pipeline = Pipeline::new(detector_returning(vec![person(1.0)]));
		for _ in 0..100 {
			let len = rng.gen_range(0..120);
			let b = budget(rng.gen_range(0..15), rng.gen_range(1..12));
			let mut source = MemoryFrameSource::from_results(
				(0..len)
					.map(|i| {
						if rng.gen_bool(0.1) {
							Err(PerceptionError::FrameDecodeFailure {
								index: i + 1,
								reason: "noise".into(),
							})
						} else {
							Ok(frame())
						}
					})
					.collect(),
			);
			let stats = pipeline.run(&mut source, &b).unwrap().stats;
			assert!(stats.frames_analyzed + stats.frames_failed <= u64::from(b.max_analyzed_frames));
			assert!(stats.frames_read <= len);
		}
	}
}
