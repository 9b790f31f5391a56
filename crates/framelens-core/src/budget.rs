//! Analysis Budget
//!
//! A budget bounds how much of a video one run is allowed to look at. Per-frame
//! detection dominates the cost of a run, so the scheduler gates every frame
//! read from a source:
//!
//! - **Stride**: only every `frame_stride`-th frame is analyzed
//! - **Analysis cap**: the loop stops once `max_analyzed_frames` have been analyzed
//! - **Read cap**: optionally, the loop stops after `max_read_frames` frames were read
//!
//! Together these bound a run to `O(max_analyzed_frames)` detector calls
//! regardless of how long (or hostile) the input is.
//!
//! Frame indices are 1-based: the first frame read from a source is index 1.

use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// A target frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
	/// Width in pixels
	pub width: u32,
	/// Height in pixels
	pub height: u32,
}

impl Resolution {
	/// Create a new resolution.
	#[must_use]
	pub const fn new(width: u32, height: u32) -> Self {
		Self { width, height }
	}

	/// Whether either side is zero.
	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.width == 0 || self.height == 0
	}
}

/// Caller-supplied limits for one analysis run. Immutable for the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
	/// Hard cap on analyzed frames (0 = analyze nothing)
	pub max_analyzed_frames: u32,

	/// Sampling interval: analyze frames whose index is a multiple of this
	pub frame_stride: u32,

	/// Downscale frames to fit this box before detection
	pub target_resolution: Option<Resolution>,

	/// Detections below this confidence are discarded
	pub min_confidence: f32,

	/// Hard cap on frames read from the source, analyzed or not
	#[serde(default)]
	pub max_read_frames: Option<u64>,
}

impl Default for BudgetConfig {
	fn default() -> Self {
		Self {
			max_analyzed_frames: 10,
			frame_stride: 3,
			target_resolution: Some(Resolution::new(320, 320)),
			min_confidence: 0.4,
			max_read_frames: None,
		}
	}
}

/// Budget validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BudgetError {
	/// A stride of zero would never select a frame.
	#[error("frame_stride must be at least 1")]
	ZeroStride,

	/// Confidence threshold outside `[0, 1]`.
	#[error("min_confidence must be within [0, 1], got {0}")]
	ConfidenceOutOfRange(f32),

	/// Target resolution with a zero side.
	#[error("target_resolution must be non-zero, got {width}x{height}")]
	EmptyResolution {
		/// Requested width
		width: u32,
		/// Requested height
		height: u32,
	},
}

impl BudgetConfig {
	/// Check the budget for values the scheduler cannot honour.
	///
	/// # Errors
	///
	/// Returns a [`BudgetError`] for a zero stride, an out-of-range confidence
	/// threshold, or a degenerate target resolution.
	pub fn validate(&self) -> Result<(), BudgetError> {
		if self.frame_stride == 0 {
			return Err(BudgetError::ZeroStride);
		}
		if !(0.0..=1.0).contains(&self.min_confidence) {
			return Err(BudgetError::ConfidenceOutOfRange(self.min_confidence));
		}
		if let Some(res) = self.target_resolution {
			if res.is_empty() {
				return Err(BudgetError::EmptyResolution {
					width: res.width,
					height: res.height,
				});
			}
		}
		Ok(())
	}
}

// ============================================================================
// Scheduling
// ============================================================================

/// What the read loop should do with the frame at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameAction {
	/// Run detection on this frame
	Analyze,
	/// Read past this frame without analysis
	Skip,
	/// Stop pulling frames
	Stop,
}

/// Why a run stopped reading its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
	/// The source ran out of frames
	EndOfSource,
	/// `max_analyzed_frames` frames were analyzed
	BudgetExhausted,
	/// `max_read_frames` frames were read
	ReadCapReached,
}

impl StopReason {
	/// Stable lowercase name.
	#[must_use]
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::EndOfSource => "end_of_source",
			Self::BudgetExhausted => "budget_exhausted",
			Self::ReadCapReached => "read_cap_reached",
		}
	}
}

/// Decide what to do with frame `frame_index` (1-based).
///
/// `Stop` wins over everything once the analysis cap is reached, so a run never
/// analyzes more than `max_analyzed_frames` frames.
#[inline]
#[must_use]
pub fn next_action(frame_index: u64, analyzed_so_far: u32, budget: &BudgetConfig) -> FrameAction {
	if analyzed_so_far >= budget.max_analyzed_frames {
		return FrameAction::Stop;
	}
	if budget
		.max_read_frames
		.is_some_and(|cap| frame_index > cap)
	{
		return FrameAction::Stop;
	}
	let stride = u64::from(budget.frame_stride.max(1));
	if frame_index % stride == 0 {
		FrameAction::Analyze
	} else {
		FrameAction::Skip
	}
}

/// Stateful wrapper around [`next_action`] for one run.
#[derive(Debug, Clone)]
pub struct Scheduler {
	budget: BudgetConfig,
	frames_seen: u64,
	analyzed: u32,
	stop_reason: Option<StopReason>,
}

impl Scheduler {
	/// Create a scheduler for one run.
	#[must_use]
	pub const fn new(budget: BudgetConfig) -> Self {
		Self {
			budget,
			frames_seen: 0,
			analyzed: 0,
			stop_reason: None,
		}
	}

	/// Advance to the next frame and decide its fate.
	///
	/// Once `Stop` has been returned every later call returns `Stop` too.
	pub fn next(&mut self) -> FrameAction {
		if self.stop_reason.is_some() {
			return FrameAction::Stop;
		}
		let index = self.frames_seen + 1;
		let action = next_action(index, self.analyzed, &self.budget);
		if action == FrameAction::Stop {
			self.stop_reason = Some(if self.analyzed >= self.budget.max_analyzed_frames {
				StopReason::BudgetExhausted
			} else {
				StopReason::ReadCapReached
			});
		} else {
			self.frames_seen = index;
		}
		action
	}

	/// Record that the frame just scheduled for analysis was analyzed.
	///
	/// Frames whose decode failed still count: the budget bounds attempts.
	pub fn record_analyzed(&mut self) {
		self.analyzed = self.analyzed.saturating_add(1);
	}

	/// Mark the source as exhausted.
	pub fn finish_source(&mut self) {
		if self.stop_reason.is_none() {
			self.stop_reason = Some(StopReason::EndOfSource);
		}
	}

	/// Index of the frame most recently handed out (0 before the first call).
	#[must_use]
	pub const fn current_index(&self) -> u64 {
		self.frames_seen
	}

	/// Frames analyzed so far.
	#[must_use]
	pub const fn analyzed(&self) -> u32 {
		self.analyzed
	}

	/// Why the run stopped, if it has.
	#[must_use]
	pub const fn stop_reason(&self) -> Option<StopReason> {
		self.stop_reason
	}

	/// The budget this scheduler enforces.
	#[must_use]
	pub const fn budget(&self) -> &BudgetConfig {
		&self.budget
	}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	fn budget(max: u32, stride: u32) -> BudgetConfig {
		BudgetConfig {
			max_analyzed_frames: max,
			frame_stride: stride,
			..Default::default()
		}
	}

	/// Drive a scheduler over a synthetic source of `len` frames.
	fn run(len: u64, budget: BudgetConfig) -> (Vec<u64>, Scheduler) {
		let mut scheduler = Scheduler::new(budget);
		let mut analyzed = Vec::new();
		let mut remaining = len;
		loop {
			if remaining == 0 {
				scheduler.finish_source();
				break;
			}
			match scheduler.next() {
				FrameAction::Stop => break,
				FrameAction::Skip => {}
				FrameAction::Analyze => {
					analyzed.push(scheduler.current_index());
					scheduler.record_analyzed();
				}
			}
			remaining -= 1;
		}
		(analyzed, scheduler)
	}

	#[test]
	fn test_default_budget_is_valid() {
		let config = BudgetConfig::default();
		assert!(config.validate().is_ok());
		assert_eq!(config.max_analyzed_frames, 10);
		assert_eq!(config.frame_stride, 3);
		assert_eq!(config.target_resolution, Some(Resolution::new(320, 320)));
	}

	#[test]
	fn test_validate_rejects_bad_budgets() {
		assert_eq!(budget(5, 0).validate(), Err(BudgetError::ZeroStride));

		let conf = BudgetConfig {
			min_confidence: 1.5,
			..Default::default()
		};
		assert!(matches!(
			conf.validate(),
			Err(BudgetError::ConfidenceOutOfRange(_))
		));

		let res = BudgetConfig {
			target_resolution: Some(Resolution::new(0, 240)),
			..Default::default()
		};
		assert!(matches!(
			res.validate(),
			Err(BudgetError::EmptyResolution { width: 0, .. })
		));
	}

	#[test]
	fn test_next_action_stride() {
		let b = budget(100, 3);
		assert_eq!(next_action(1, 0, &b), FrameAction::Skip);
		assert_eq!(next_action(2, 0, &b), FrameAction::Skip);
		assert_eq!(next_action(3, 0, &b), FrameAction::Analyze);
		assert_eq!(next_action(6, 1, &b), FrameAction::Analyze);
	}

	#[test]
	fn test_next_action_stops_at_cap() {
		let b = budget(2, 1);
		assert_eq!(next_action(7, 2, &b), FrameAction::Stop);
		assert_eq!(next_action(1, 0, &budget(0, 1)), FrameAction::Stop);
	}

	#[test]
	fn test_hundred_frames_stride_ten_cap_five() {
		let (analyzed, scheduler) = run(100, budget(5, 10));
		assert_eq!(analyzed, vec![10, 20, 30, 40, 50]);
		assert_eq!(scheduler.stop_reason(), Some(StopReason::BudgetExhausted));
		// Frame 51 triggered the stop; 50 frames were never handed out.
		assert_eq!(scheduler.current_index(), 50);
	}

	#[test]
	fn test_stride_longer_than_source() {
		let (analyzed, scheduler) = run(7, budget(5, 30));
		assert!(analyzed.is_empty());
		assert_eq!(scheduler.stop_reason(), Some(StopReason::EndOfSource));

		let (analyzed, _) = run(30, budget(5, 30));
		assert_eq!(analyzed, vec![30]);
	}

	#[test]
	fn test_read_cap() {
		let b = BudgetConfig {
			max_analyzed_frames: 100,
			frame_stride: 4,
			max_read_frames: Some(10),
			..Default::default()
		};
		let (analyzed, scheduler) = run(1000, b);
		assert_eq!(analyzed, vec![4, 8]);
		assert_eq!(scheduler.stop_reason(), Some(StopReason::ReadCapReached));
		assert_eq!(scheduler.current_index(), 10);
	}

	#[test]
	fn test_stop_is_sticky() {
		let mut scheduler = Scheduler::new(budget(1, 1));
		assert_eq!(scheduler.next(), FrameAction::Analyze);
		scheduler.record_analyzed();
		assert_eq!(scheduler.next(), FrameAction::Stop);
		assert_eq!(scheduler.next(), FrameAction::Stop);
	}

	#[test]
	fn test_analyzed_never_exceeds_cap() {
		let mut rng = StdRng::seed_from_u64(0x5eed);
		for _ in 0..500 {
			let len = rng.gen_range(0..2_000);
			let b = budget(rng.gen_range(0..40), rng.gen_range(1..25));
			let (analyzed, scheduler) = run(len, b);
			assert!(analyzed.len() <= b.max_analyzed_frames as usize);
			assert_eq!(analyzed.len(), scheduler.analyzed() as usize);
			assert!(analyzed.iter().all(|i| i % u64::from(b.frame_stride) == 0));
			assert!(scheduler.stop_reason().is_some());
		}
	}
}
