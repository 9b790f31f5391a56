//! Sampling and Summarizing Example
//!
//! This example walks a fake 60-frame clip through the core pipeline:
//! 1. The scheduler picks which frames to analyze
//! 2. Hand-written "detections" stand in for a detector
//! 3. The aggregate is summarized into a result
//!
//! Run with: `cargo run --example summarize_frames`

use framelens_core::{
	reply, summarize, AggregationState, Attribute, BudgetConfig, DetectedEntity, FrameAction,
	Identity, PixelBuffer, Region, Scheduler,
};

/// Pretend detector output for frame `index`.
fn fake_detections(index: u64) -> Vec<DetectedEntity> {
	let person = |id| {
		DetectedEntity::new("person", 0.88, Region::new(40.0, 20.0, 120.0, 300.0))
			.with_identity(Identity::Tracked(id))
			.with_crop(PixelBuffer::new(1, 1, vec![128, 128, 128]))
	};

	let mut frame = vec![
		person(1),
		DetectedEntity::new("laptop", 0.91, Region::new(150.0, 180.0, 260.0, 250.0)),
		DetectedEntity::new("cup", 0.55, Region::new(270.0, 220.0, 290.0, 250.0)),
	];
	// A second person walks in halfway through
	if index > 30 {
		frame.push(person(2));
	}
	frame
}

fn main() {
	println!("=== Sampling and Summarizing ===\n");

	let budget = BudgetConfig {
		max_analyzed_frames: 6,
		frame_stride: 5,
		..Default::default()
	};
	println!(
		"Budget: analyze every {} frames, at most {}\n",
		budget.frame_stride, budget.max_analyzed_frames
	);

	let mut scheduler = Scheduler::new(budget);
	let mut state = AggregationState::new();

	// Alternate labels so the breakdown has something to show
	let mut calls = 0_u32;
	let mut classifier = |_: Option<&PixelBuffer>| {
		calls += 1;
		Attribute::Known(if calls % 2 == 1 { "male" } else { "female" }.to_string())
	};

	for _ in 0..60 {
		match scheduler.next() {
			FrameAction::Stop => break,
			FrameAction::Skip => continue,
			FrameAction::Analyze => {
				let index = scheduler.current_index();
				let detections = fake_detections(index);
				println!("frame {index:>3}: {} detections", detections.len());
				state.fold(&detections, &mut classifier);
				scheduler.record_analyzed();
			}
		}
	}

	let reason = scheduler
		.stop_reason()
		.map_or("end_of_source", |r| r.as_str());
	println!("\nStopped: {reason}");

	let result = summarize(&state);
	println!("\n--- Result ---");
	println!("People:      {}", result.people_count);
	println!("Breakdown:   {:?}", result.attribute_breakdown);
	println!("Categories:  {:?}", result.visual_categories);
	println!("Environment: {}", result.environment);
	println!("Summary:     {}", result.content_summary);

	println!("\n--- Chat ---");
	for question in ["How many people?", "What objects did you see?", "Where is this?"] {
		println!("> {question}");
		println!("  {}", reply(question, Some(&result)));
	}
}
