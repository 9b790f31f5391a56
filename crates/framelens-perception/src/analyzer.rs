//! Frame analysis.
//!
//! Turns one decoded frame into normalized [`DetectedEntity`] values:
//!
//! 1. Downscale to fit the budget's target resolution (aspect preserved, never
//!    upscaled)
//! 2. Run the detector; a failure yields no entities for this frame
//! 3. Drop anything below the budget's confidence threshold
//! 4. Assign identities when a tracker is attached
//! 5. Crop person regions out of the analyzed frame for attribute
//!    classification
//!
//! Regions are in the pixel coordinates of the analyzed (possibly downscaled)
//! frame.

use std::borrow::Cow;

use framelens_core::{BudgetConfig, DetectedEntity, PixelBuffer, Region, Resolution};
use tracing::{debug, warn};

use crate::detect::ObjectDetector;
use crate::track::IouTracker;

/// Runs detection on single frames. One instance per run.
pub struct FrameAnalyzer<'a> {
	detector: &'a dyn ObjectDetector,
	tracker: Option<IouTracker>,
	failures: u64,
}

impl<'a> FrameAnalyzer<'a> {
	/// Analyzer over `detector`, with optional identity tracking.
	#[must_use]
	pub const fn new(detector: &'a dyn ObjectDetector, tracker: Option<IouTracker>) -> Self {
		Self {
			detector,
			tracker,
			failures: 0,
		}
	}

	/// Detection failures absorbed so far.
	#[must_use]
	pub const fn failures(&self) -> u64 {
		self.failures
	}

	/// Analyze one frame. Never fails: detector errors give an empty list.
	pub fn analyze(&mut self, frame: &PixelBuffer, budget: &BudgetConfig) -> Vec<DetectedEntity> {
		if frame.is_degenerate() {
			self.failures += 1;
			warn!(
				width = frame.width,
				height = frame.height,
				"Skipping degenerate frame"
			);
			return Vec::new();
		}

		let frame = match budget.target_resolution {
			Some(target) => downscale(frame, target),
			None => Cow::Borrowed(frame),
		};

		let mut entities = match self.detector.detect(&frame, budget.min_confidence) {
			Ok(entities) => entities,
			Err(e) => {
				self.failures += 1;
				warn!(error = %e, "Detection failed, treating frame as empty");
				return Vec::new();
			}
		};

		entities.retain(|e| e.confidence >= budget.min_confidence);

		if let Some(tracker) = self.tracker.as_mut() {
			tracker.assign(&mut entities);
		}

		for entity in entities.iter_mut().filter(|e| e.is_person()) {
			entity.crop = crop(&frame, &entity.region);
		}

		debug!(count = entities.len(), "Analyzed frame");
		entities
	}
}

/// Largest size with the frame's aspect ratio that fits inside `target`.
/// Frames that already fit keep their size.
#[must_use]
#[allow(
	clippy::cast_possible_truncation,
	clippy::cast_sign_loss,
	clippy::cast_precision_loss
)]
pub fn fit_within(width: u32, height: u32, target: Resolution) -> (u32, u32) {
	if width <= target.width && height <= target.height {
		return (width, height);
	}
	let scale = (f64::from(target.width) / f64::from(width))
		.min(f64::from(target.height) / f64::from(height));
	let w = (f64::from(width) * scale).round().max(1.0) as u32;
	let h = (f64::from(height) * scale).round().max(1.0) as u32;
	(w.min(target.width), h.min(target.height))
}

/// Downscale `frame` to fit inside `target`, borrowing when no resize is needed.
#[must_use]
pub fn downscale(frame: &PixelBuffer, target: Resolution) -> Cow<'_, PixelBuffer> {
	let (w, h) = fit_within(frame.width, frame.height, target);
	if (w, h) == (frame.width, frame.height) {
		return Cow::Borrowed(frame);
	}

	let Some(rgb) = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone()) else {
		return Cow::Borrowed(frame);
	};
	let resized = image::imageops::resize(&rgb, w, h, image::imageops::FilterType::Triangle);
	Cow::Owned(PixelBuffer::new(w, h, resized.into_raw()))
}

/// Copy the pixels under `region`. `None` for degenerate or off-frame regions.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn crop(frame: &PixelBuffer, region: &Region) -> Option<PixelBuffer> {
	let clamped = region.clamp_to(frame.width, frame.height)?;

	let x1 = clamped.x1.floor() as u32;
	let y1 = clamped.y1.floor() as u32;
	let x2 = (clamped.x2.ceil() as u32).min(frame.width);
	let y2 = (clamped.y2.ceil() as u32).min(frame.height);
	if x2 <= x1 || y2 <= y1 {
		return None;
	}

	let (w, h) = (x2 - x1, y2 - y1);
	let stride = frame.width as usize * 3;
	let mut data = Vec::with_capacity(w as usize * h as usize * 3);
	for y in y1..y2 {
		let start = y as usize * stride + x1 as usize * 3;
		data.extend_from_slice(frame.data.get(start..start + w as usize * 3)?);
	}
	Some(PixelBuffer::new(w, h, data))
}
