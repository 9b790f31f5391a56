//! # FrameLens Core
//!
//! Budgeted video understanding, minus the pixels. This crate holds the
//! deterministic half of the pipeline: which frames to look at, how per-frame
//! detections fold into run totals, and how those totals become a result.
//!
//! ## Why a Budget?
//!
//! Running an object detector on every frame of a video is the expensive part
//! of answering "what is in this video". Most of those frames are near
//! duplicates of their neighbours. A run therefore only analyzes a sparse,
//! capped sample:
//!
//! - **Stride** - analyze every n-th frame
//! - **Cap** - stop after a fixed number of analyzed frames
//! - **Downscale** - shrink frames before detection
//!
//! ## Pipeline
//!
//! ```text
//! source ──► Scheduler ──► (detector) ──► AggregationState ──► summarize ──► LastResultStore
//!              skip/stop      entities        fold per frame      AnalysisResult
//! ```
//!
//! The detector and attribute classifier live in `framelens-perception`. Here
//! the classifier is anything implementing [`AttributeSource`], so the folding
//! logic is testable without a model.
//!
//! ## Counting
//!
//! - **Objects** count raw occurrences: a cup in three sampled frames is 3.
//! - **People** count distinct identities. Tracked people count once per run;
//!   untracked detections each count once.
//!
//! ## Example
//!
//! ```rust
//! use framelens_core::{
//!     summarize, AggregationState, BudgetConfig, DetectedEntity, FrameAction, NoAttributes,
//!     Region, Scheduler,
//! };
//!
//! let mut scheduler = Scheduler::new(BudgetConfig {
//!     max_analyzed_frames: 2,
//!     frame_stride: 2,
//!     ..Default::default()
//! });
//! let mut state = AggregationState::new();
//!
//! for _frame in 0..10 {
//!     match scheduler.next() {
//!         FrameAction::Stop => break,
//!         FrameAction::Skip => continue,
//!         FrameAction::Analyze => {
//!             let seen = vec![DetectedEntity::new("laptop", 0.8, Region::new(0.0, 0.0, 5.0, 5.0))];
//!             state.fold(&seen, &mut NoAttributes);
//!             scheduler.record_analyzed();
//!         }
//!     }
//! }
//!
//! let result = summarize(&state);
//! assert_eq!(result.visual_categories, vec!["laptop"]);
//! assert_eq!(result.environment, "a workspace or office environment");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod budget;
pub mod chat;
pub mod entity;
pub mod store;
pub mod summary;

pub use aggregate::{AggregationState, Attribute, AttributePolicy, AttributeSource, NoAttributes};
pub use budget::{
	next_action, BudgetConfig, BudgetError, FrameAction, Resolution, Scheduler, StopReason,
};
pub use chat::reply;
pub use entity::{DetectedEntity, Identity, PixelBuffer, Region, PERSON_CATEGORY};
pub use store::LastResultStore;
pub use summary::{
	environment_for, summarize, AnalysisResult, CategoryCount, ENVIRONMENT_RULES,
	FALLBACK_ENVIRONMENT, TOP_CATEGORIES,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sampled_run_end_to_end() {
		let mut scheduler = Scheduler::new(BudgetConfig {
			max_analyzed_frames: 3,
			frame_stride: 2,
			..Default::default()
		});
		let mut state = AggregationState::new();
		let store = LastResultStore::new();

		for _ in 0..20 {
			match scheduler.next() {
				FrameAction::Stop => break,
				FrameAction::Skip => {}
				FrameAction::Analyze => {
					let frame = vec![
						DetectedEntity::new("person", 0.9, Region::new(0.0, 0.0, 4.0, 8.0))
							.with_identity(Identity::Tracked(1)),
						DetectedEntity::new("cup", 0.7, Region::new(5.0, 5.0, 6.0, 6.0)),
					];
					state.fold(&frame, &mut NoAttributes);
					scheduler.record_analyzed();
				}
			}
		}

		assert_eq!(scheduler.stop_reason(), Some(StopReason::BudgetExhausted));
		let _ = store.publish(summarize(&state));

		let latest = store.latest();
		let result = latest.as_deref();
		assert_eq!(result.map(|r| r.people_count), Some(1));
		assert_eq!(reply("what objects?", result), "Detected objects: person, cup.");
		assert_eq!(reply("how many people", result), "I counted 1 person.");
	}
}
