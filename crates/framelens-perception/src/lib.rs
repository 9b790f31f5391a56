//! # FrameLens Perception
//!
//! The pixel-facing half of framelens: getting frames out of media, finding
//! things in them, and running the budgeted analysis loop around
//! `framelens-core`.
//!
//! ## Layers
//!
//! - [`video`] - frame sources (FFmpeg pipe, image files, in-memory) and ffprobe
//! - [`detect`] - the [`ObjectDetector`] capability and a YOLOv8 ONNX detector
//! - [`track`] - greedy IoU identity tracking across analyzed frames
//! - [`classify`] - the [`AttributeModel`] capability for person crops
//! - [`analyzer`] - one frame in, normalized entities out
//! - [`pipeline`] - the budgeted run loop
//! - [`acquire`] - URL downloads with a timeout and a size cap
//! - [`service`] - long-lived service with serialized runs and a last result
//!
//! ## Failure Model
//!
//! A run only fails for problems with the whole input: an unopenable source,
//! an invalid budget, missing FFmpeg. Bad frames, detector errors and
//! classifier errors are logged and absorbed, so a run over a partly corrupt
//! video still produces a result.
//!
//! ## Requirements
//!
//! - FFmpeg and ffprobe on `PATH` for video input
//! - ONNX models under `~/.framelens/models/` (`yolov8n.onnx`, optionally
//!   `gender.onnx`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acquire;
pub mod analyzer;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod track;
pub mod video;

pub use acquire::{download_to_temp, AcquiredMedia, AcquisitionConfig};
pub use analyzer::FrameAnalyzer;
pub use classify::{AttributeClassifier, AttributeModel, AttributeModelConfig, OnnxAttributeModel};
pub use config::{default_model_dir, ServiceConfig};
pub use detect::{DetectorConfig, ObjectDetector, YoloDetector, COCO_CLASSES};
pub use error::{PerceptionError, Result};
pub use pipeline::{MediaKind, Pipeline, ProcessingOutput, ProcessingStats};
pub use service::AnalysisService;
pub use track::{IouTracker, TrackerConfig};
pub use video::{
	check_ffmpeg, check_ffprobe, get_video_metadata, FfmpegFrameSource, FrameSource,
	ImageSequenceSource, MemoryFrameSource, SingleImageSource, VideoMetadata,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
