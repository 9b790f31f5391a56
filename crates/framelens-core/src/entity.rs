//! Detected entities
//!
//! The normalized per-frame unit the aggregator folds. An entity lives only
//! for the aggregation step of the frame it was detected in.

use serde::{Deserialize, Serialize};

/// The distinguished category whose entities are counted as people.
pub const PERSON_CATEGORY: &str = "person";

// ============================================================================
// Geometry
// ============================================================================

/// Axis-aligned bounding region in pixel coordinates, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
	/// Left edge
	pub x1: f32,
	/// Top edge
	pub y1: f32,
	/// Right edge
	pub x2: f32,
	/// Bottom edge
	pub y2: f32,
}

impl Region {
	/// Create a region from corner coordinates.
	#[must_use]
	pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
		Self { x1, y1, x2, y2 }
	}

	/// Width (zero when inverted).
	#[inline]
	#[must_use]
	pub fn width(&self) -> f32 {
		(self.x2 - self.x1).max(0.0)
	}

	/// Height (zero when inverted).
	#[inline]
	#[must_use]
	pub fn height(&self) -> f32 {
		(self.y2 - self.y1).max(0.0)
	}

	/// Area (zero for degenerate regions).
	#[inline]
	#[must_use]
	pub fn area(&self) -> f32 {
		self.width() * self.height()
	}

	/// Intersection over union with another region.
	#[must_use]
	pub fn iou(&self, other: &Self) -> f32 {
		let inter = Self::new(
			self.x1.max(other.x1),
			self.y1.max(other.y1),
			self.x2.min(other.x2),
			self.y2.min(other.y2),
		)
		.area();
		let union = self.area() + other.area() - inter;
		if union > 0.0 {
			inter / union
		} else {
			0.0
		}
	}

	/// Clamp to a `width` x `height` frame.
	///
	/// Returns `None` when nothing with positive area is left, i.e. the region
	/// is degenerate or lies entirely outside the frame.
	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
		let (w, h) = (width as f32, height as f32);
		let clamped = Self::new(
			self.x1.clamp(0.0, w),
			self.y1.clamp(0.0, h),
			self.x2.clamp(0.0, w),
			self.y2.clamp(0.0, h),
		);
		(clamped.area() > 0.0).then_some(clamped)
	}
}

// ============================================================================
// Pixels
// ============================================================================

/// A packed RGB8 pixel buffer (`width * height * 3` bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
	/// Width in pixels
	pub width: u32,
	/// Height in pixels
	pub height: u32,
	/// Row-major RGB bytes
	pub data: Vec<u8>,
}

impl PixelBuffer {
	/// Wrap raw RGB bytes.
	#[must_use]
	pub const fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
		Self {
			width,
			height,
			data,
		}
	}

	/// Whether the buffer is unusable for classification: a zero side, or a
	/// byte length that disagrees with the dimensions.
	#[must_use]
	pub fn is_degenerate(&self) -> bool {
		self.width == 0
			|| self.height == 0
			|| self.data.len() != self.width as usize * self.height as usize * 3
	}
}

impl std::fmt::Debug for PixelBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PixelBuffer")
			.field("width", &self.width)
			.field("height", &self.height)
			.field("bytes", &self.data.len())
			.finish()
	}
}

// ============================================================================
// Identity
// ============================================================================

/// Token denoting one physical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identity {
	/// Assigned by a tracker; stable across frames within a run
	Tracked(u64),
	/// Minted by the aggregator for an untracked detection; never repeats
	Synthetic(u64),
}

// ============================================================================
// Entity
// ============================================================================

/// One normalized detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
	/// Category name, e.g. `"person"` or `"laptop"`
	pub category: String,

	/// Detector confidence (0-1)
	pub confidence: f32,

	/// Bounding region in analyzed-frame pixels
	pub region: Region,

	/// Tracker identity, when the detector tracks
	pub identity: Option<Identity>,

	/// Pixel crop for attribute classification (person entities only)
	#[serde(skip)]
	pub crop: Option<PixelBuffer>,
}

impl DetectedEntity {
	/// Create an untracked entity without a crop.
	#[must_use]
	pub fn new(category: impl Into<String>, confidence: f32, region: Region) -> Self {
		Self {
			category: category.into(),
			confidence,
			region,
			identity: None,
			crop: None,
		}
	}

	/// Attach a tracker identity.
	#[must_use]
	pub fn with_identity(mut self, identity: Identity) -> Self {
		self.identity = Some(identity);
		self
	}

	/// Attach a pixel crop.
	#[must_use]
	pub fn with_crop(mut self, crop: PixelBuffer) -> Self {
		self.crop = Some(crop);
		self
	}

	/// Whether this entity belongs to the person category.
	#[inline]
	#[must_use]
	pub fn is_person(&self) -> bool {
		self.category == PERSON_CATEGORY
	}
}
