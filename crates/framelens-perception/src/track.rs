//! Identity tracking across analyzed frames.
//!
//! A greedy IoU matcher: each detection is paired with the live track of the
//! same category it overlaps most, best pairs first. Unmatched detections open
//! new tracks; tracks unmatched for more than `max_missed` analyzed frames
//! expire.
//!
//! Sampled frames can be far apart, so matching is deliberately loose. The
//! aggregator only needs "same physical entity, probably" to avoid counting a
//! person once per sampled frame.

use framelens_core::{DetectedEntity, Identity, Region};
use serde::{Deserialize, Serialize};

/// Tracker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
	/// Minimum IoU for a detection to continue a track
	pub iou_threshold: f32,

	/// Analyzed frames a track may go unmatched before it expires
	pub max_missed: u32,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			iou_threshold: 0.3,
			max_missed: 2,
		}
	}
}

#[derive(Debug, Clone)]
struct Track {
	id: u64,
	category: String,
	region: Region,
	missed: u32,
}

/// Greedy per-category IoU tracker. One instance per run.
#[derive(Debug, Clone)]
pub struct IouTracker {
	config: TrackerConfig,
	tracks: Vec<Track>,
	next_id: u64,
}

impl IouTracker {
	/// Create a tracker with no live tracks.
	#[must_use]
	pub const fn new(config: TrackerConfig) -> Self {
		Self {
			config,
			tracks: Vec::new(),
			next_id: 0,
		}
	}

	/// Assign identities to one frame's entities, updating the live tracks.
	pub fn assign(&mut self, entities: &mut [DetectedEntity]) {
		// Every (track, detection) pair of one category above the threshold.
		let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
		for (t, track) in self.tracks.iter().enumerate() {
			for (d, entity) in entities.iter().enumerate() {
				if entity.category != track.category {
					continue;
				}
				let iou = track.region.iou(&entity.region);
				if iou >= self.config.iou_threshold {
					pairs.push((iou, t, d));
				}
			}
		}
		pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

		let mut track_matched = vec![false; self.tracks.len()];
		let mut entity_matched = vec![false; entities.len()];

		for (_, t, d) in pairs {
			if track_matched[t] || entity_matched[d] {
				continue;
			}
			track_matched[t] = true;
			entity_matched[d] = true;

			let track = &mut self.tracks[t];
			track.region = entities[d].region;
			track.missed = 0;
			entities[d].identity = Some(Identity::Tracked(track.id));
		}

		for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
			if !matched {
				track.missed += 1;
			}
		}
		let max_missed = self.config.max_missed;
		self.tracks.retain(|t| t.missed <= max_missed);

		for (entity, matched) in entities.iter_mut().zip(&entity_matched) {
			if *matched {
				continue;
			}
			let id = self.next_id;
			self.next_id += 1;
			entity.identity = Some(Identity::Tracked(id));
			self.tracks.push(Track {
				id,
				category: entity.category.clone(),
				region: entity.region,
				missed: 0,
			});
		}
	}

	/// Number of live tracks.
	#[must_use]
	pub fn live_tracks(&self) -> usize {
		self.tracks.len()
	}
}
