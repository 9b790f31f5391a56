//! Error types for perception operations.

use std::path::PathBuf;

use framelens_core::BudgetError;

/// Errors that can occur while acquiring, decoding or analyzing media.
#[derive(Debug, thiserror::Error)]
pub enum PerceptionError {
	/// The input could not be opened at all (missing file, unopenable stream).
	#[error("Source unavailable: {0}")]
	SourceUnavailable(String),

	/// A single frame could not be decoded.
	#[error("Failed to decode frame {index}: {reason}")]
	FrameDecodeFailure {
		/// 1-based frame index
		index: u64,
		/// Reason for failure
		reason: String,
	},

	/// The object detector failed on a frame.
	#[error("Detection failed: {0}")]
	DetectionFailure(String),

	/// The attribute model failed on a crop.
	#[error("Classification failed: {0}")]
	ClassificationFailure(String),

	/// Remote media could not be fetched.
	#[error("Failed to acquire {url}: {reason}")]
	AcquisitionFailed {
		/// Requested URL
		url: String,
		/// Reason for failure
		reason: String,
	},

	/// Remote media took too long to fetch.
	#[error("Acquisition timed out after {seconds}s")]
	AcquisitionTimeout {
		/// Timeout duration in seconds
		seconds: u64,
	},

	/// FFmpeg is not installed or not found in PATH.
	#[error("FFmpeg not found. Please install FFmpeg: https://ffmpeg.org/download.html")]
	FfmpegNotFound,

	/// FFprobe is not installed or not found in PATH.
	#[error("FFprobe not found. Please install FFmpeg: https://ffmpeg.org/download.html")]
	FfprobeNotFound,

	/// An ONNX model file is missing.
	#[error("Model not found at: {0}. Run the install script to download it.")]
	ModelNotFound(PathBuf),

	/// ONNX Runtime failed to load or run a model.
	#[error("Model error: {0}")]
	ModelError(String),

	/// The caller supplied an unusable budget.
	#[error("Invalid budget: {0}")]
	InvalidBudget(#[from] BudgetError),

	/// Unknown or unsupported media kind.
	#[error("Unsupported media: {0}")]
	UnsupportedMedia(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Image codec error.
	#[error("Image error: {0}")]
	Image(#[from] image::ImageError),

	/// A background task was cancelled before it finished.
	#[error("Operation was cancelled")]
	Cancelled,
}

impl PerceptionError {
	/// Whether this error ends a run. Per-frame faults are absorbed by the loop.
	#[must_use]
	pub const fn is_fatal(&self) -> bool {
		!matches!(
			self,
			Self::FrameDecodeFailure { .. } | Self::DetectionFailure(_) | Self::ClassificationFailure(_)
		)
	}

	/// Check if this error is due to a missing dependency (FFmpeg, model files).
	#[must_use]
	pub const fn is_missing_dependency(&self) -> bool {
		matches!(
			self,
			Self::FfmpegNotFound | Self::FfprobeNotFound | Self::ModelNotFound(_)
		)
	}

	/// Check if the error is recoverable (e.g., try again later).
	#[must_use]
	pub const fn is_recoverable(&self) -> bool {
		matches!(self, Self::AcquisitionTimeout { .. } | Self::Cancelled)
	}

	/// Whether the caller passed bad arguments rather than hitting a runtime fault.
	#[must_use]
	pub const fn is_invalid_input(&self) -> bool {
		matches!(self, Self::InvalidBudget(_) | Self::UnsupportedMedia(_))
	}
}

impl From<ort::Error> for PerceptionError {
	fn from(e: ort::Error) -> Self {
		Self::ModelError(e.to_string())
	}
}

/// Result type alias for perception operations.
pub type Result<T> = std::result::Result<T, PerceptionError>;
