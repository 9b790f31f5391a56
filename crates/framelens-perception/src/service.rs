//! The analysis service.
//!
//! Owns the loaded models, the last-result store and the run gate. Requests
//! arrive as bytes, a local path or a URL; each becomes a
//! [`FrameSource`](crate::video::FrameSource) and goes through
//! [`Pipeline::run`] on the blocking thread pool.
//!
//! Runs are serialized by an async mutex so one heavyweight analysis happens
//! at a time. Readers of the last result never wait on a run: they see the
//! previous complete result until the new one is published.

use std::path::Path;
use std::sync::Arc;

use framelens_core::{chat, AnalysisResult, BudgetConfig, LastResultStore};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::acquire::download_to_temp;
use crate::classify::{AttributeModel, OnnxAttributeModel};
use crate::config::ServiceConfig;
use crate::detect::YoloDetector;
use crate::error::{PerceptionError, Result};
use crate::pipeline::{MediaKind, Pipeline, ProcessingOutput};
use crate::video::{get_video_metadata, is_image_path, FfmpegFrameSource};

/// Long-lived analysis service.
#[derive(Debug)]
pub struct AnalysisService {
	config: ServiceConfig,
	pipeline: Pipeline,
	store: Arc<LastResultStore>,
	run_gate: Mutex<()>,
}

impl AnalysisService {
	/// Service over an already assembled pipeline.
	#[must_use]
	pub fn new(config: ServiceConfig, pipeline: Pipeline) -> Self {
		Self {
			config,
			pipeline,
			store: Arc::new(LastResultStore::new()),
			run_gate: Mutex::new(()),
		}
	}

	/// Load the models named in `config` and build the service.
	///
	/// A missing attribute model is not an error: the service runs without
	/// attribute classification and says so in the log.
	///
	/// # Errors
	///
	/// Returns `ModelNotFound` or `ModelError` when the detector cannot be
	/// loaded, or `ModelError` when an attribute model exists but fails to load.
	pub fn from_config(config: ServiceConfig) -> Result<Self> {
		let detector = Arc::new(YoloDetector::load(config.detector.clone())?);

		let attributes: Option<Arc<dyn AttributeModel>> = match &config.attributes {
			Some(cfg) if OnnxAttributeModel::is_available(cfg) => {
				Some(Arc::new(OnnxAttributeModel::load(cfg.clone())?))
			}
			Some(cfg) => {
				warn!(
					model_path = %cfg.model_path.display(),
					"Attribute model not found, people will not be classified"
				);
				None
			}
			None => None,
		};

		let pipeline = Pipeline::new(detector)
			.with_attributes(attributes)
			.with_tracker(config.tracker)
			.with_policy(config.policy);

		info!("Analysis service ready");
		Ok(Self::new(config, pipeline))
	}

	/// The configuration the service was built with.
	#[must_use]
	pub const fn config(&self) -> &ServiceConfig {
		&self.config
	}

	/// Shared handle to the last-result store.
	#[must_use]
	pub fn store(&self) -> Arc<LastResultStore> {
		Arc::clone(&self.store)
	}

	// ========================================================================
	// Processing
	// ========================================================================

	/// Analyze uploaded bytes.
	///
	/// `budget` falls back to the configured default.
	///
	/// # Errors
	///
	/// Returns `InvalidBudget`, `SourceUnavailable` for empty or unopenable
	/// media, `FrameDecodeFailure` for an undecodable image, or a missing
	/// FFmpeg dependency for video.
	#[instrument(skip(self, bytes, kind), fields(len = bytes.len(), kind = kind.as_str()))]
	pub async fn process_media(
		&self,
		bytes: Vec<u8>,
		kind: MediaKind,
		budget: Option<BudgetConfig>,
	) -> Result<ProcessingOutput> {
		let budget = budget.unwrap_or(self.config.default_budget);
		if bytes.is_empty() {
			return Err(PerceptionError::SourceUnavailable("empty media".to_string()));
		}

		match kind {
			MediaKind::Image => self.run_image(bytes, budget).await,
			MediaKind::Video => {
				let file = tempfile::Builder::new().prefix("framelens-").tempfile()?;
				tokio::fs::write(file.path(), &bytes).await?;
				drop(bytes);
				self.run_video(file.path(), budget).await
			}
		}
	}

	/// Analyze a local file, choosing image or video by extension.
	///
	/// # Errors
	///
	/// Returns `SourceUnavailable` when the file does not exist, otherwise as
	/// [`process_media`](Self::process_media).
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub async fn process_path(
		&self,
		path: impl AsRef<Path>,
		budget: Option<BudgetConfig>,
	) -> Result<ProcessingOutput> {
		let path = path.as_ref();
		let budget = budget.unwrap_or(self.config.default_budget);
		if !path.exists() {
			return Err(PerceptionError::SourceUnavailable(format!(
				"file not found: {}",
				path.display()
			)));
		}

		match MediaKind::from_path(path) {
			MediaKind::Image => self.run_image(tokio::fs::read(path).await?, budget).await,
			MediaKind::Video => self.run_video(path, budget).await,
		}
	}

	/// Download `url` and analyze it.
	///
	/// Images are recognized by extension or an `image/*` content type.
	///
	/// # Errors
	///
	/// Returns `AcquisitionFailed` or `AcquisitionTimeout` when the download
	/// fails, otherwise as [`process_media`](Self::process_media).
	#[instrument(skip(self, budget))]
	pub async fn process_url(&self, url: &str, budget: Option<BudgetConfig>) -> Result<ProcessingOutput> {
		let budget = budget.unwrap_or(self.config.default_budget);
		budget.validate()?;

		let media = download_to_temp(url, &self.config.acquisition).await?;
		let is_image = is_image_path(media.path())
			|| media
				.content_type
				.as_deref()
				.is_some_and(|t| t.starts_with("image/"));

		if is_image {
			let bytes = tokio::fs::read(media.path()).await?;
			self.run_image(bytes, budget).await
		} else {
			self.run_video(media.path(), budget).await
		}
	}

	async fn run_image(&self, bytes: Vec<u8>, budget: BudgetConfig) -> Result<ProcessingOutput> {
		let pipeline = self.pipeline.clone();
		self.run_exclusive(move || pipeline.run_image(&bytes, &budget))
			.await
	}

	async fn run_video(&self, path: &Path, budget: BudgetConfig) -> Result<ProcessingOutput> {
		budget.validate()?;
		let metadata = get_video_metadata(path).await?;
		info!(
			duration_seconds = metadata.duration_seconds,
			frame_rate = metadata.frame_rate,
			width = metadata.width,
			height = metadata.height,
			codec = %metadata.codec,
			"Probed video"
		);

		let path = path.to_path_buf();
		let pipeline = self.pipeline.clone();
		self.run_exclusive(move || {
			let mut source = FfmpegFrameSource::spawn(
				&path,
				metadata.width,
				metadata.height,
				budget.target_resolution,
			)?;
			pipeline.run(&mut source, &budget)
		})
		.await
	}

	/// Run `job` on the blocking pool behind the run gate and publish its
	/// result. Failed runs leave the store untouched.
	async fn run_exclusive<F>(&self, job: F) -> Result<ProcessingOutput>
	where
		F: FnOnce() -> Result<ProcessingOutput> + Send + 'static,
	{
		let _gate = self.run_gate.lock().await;
		let output = tokio::task::spawn_blocking(job)
			.await
			.map_err(|_| PerceptionError::Cancelled)??;

		let _ = self.store.publish(output.result.clone());
		Ok(output)
	}

	// ========================================================================
	// Queries
	// ========================================================================

	/// The most recent successful result.
	#[must_use]
	pub fn last_result(&self) -> Option<Arc<AnalysisResult>> {
		self.store.latest()
	}

	/// Summary sentence of the most recent result, or a prompt to analyze first.
	#[must_use]
	pub fn summarize_last(&self) -> String {
		self.last_result().map_or_else(
			|| chat::ANALYZE_FIRST.to_string(),
			|result| result.content_summary.clone(),
		)
	}

	/// Answer a question about the most recent result.
	#[must_use]
	pub fn chat(&self, message: &str) -> String {
		chat::reply(message, self.last_result().as_deref())
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::detect::ObjectDetector;
	use framelens_core::{DetectedEntity, PixelBuffer, Region};
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn png() -> Vec<u8> {
		let mut out = Vec::new();
		image::RgbImage::from_pixel(32, 24, image::Rgb([120, 130, 140]))
			.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
			.unwrap();
		out
	}

	fn service() -> AnalysisService {
		let detector: Arc<dyn ObjectDetector> =
			Arc::new(|_: &PixelBuffer, _: f32| -> Result<Vec<DetectedEntity>> {
				Ok(vec![
					DetectedEntity::new("person", 0.9, Region::new(0.0, 0.0, 8.0, 20.0)),
					DetectedEntity::new("person", 0.8, Region::new(16.0, 0.0, 24.0, 20.0)),
					DetectedEntity::new("laptop", 0.7, Region::new(10.0, 10.0, 14.0, 14.0)),
				])
			});
		let labels: Arc<dyn AttributeModel> =
			Arc::new(|_: &PixelBuffer| -> Result<String> { Ok("female".to_string()) });
		let pipeline = Pipeline::new(detector).with_attributes(Some(labels));
		AnalysisService::new(ServiceConfig::default(), pipeline)
	}

	#[tokio::test]
	async fn test_image_result_is_published() {
		let service = service();
		assert_eq!(service.summarize_last(), chat::ANALYZE_FIRST);
		assert_eq!(service.chat("how many people?"), chat::ANALYZE_FIRST);

		let output = service
			.process_media(png(), MediaKind::Image, None)
			.await
			.unwrap();
		assert_eq!(output.result.people_count, 2);
		assert_eq!(output.result.attribute_breakdown.get("female"), Some(&2));
		assert_eq!(output.result.environment, "a workspace or office environment");

		let last = service.last_result().unwrap();
		assert_eq!(*last, output.result);
		assert_eq!(service.summarize_last(), output.result.content_summary);
		assert_eq!(service.chat("How many people are there?"), "I counted 2 people (2 female).");
	}

	#[tokio::test]
	async fn test_failed_run_keeps_previous_result() {
		let service = service();
		let _ = service
			.process_media(png(), MediaKind::Image, None)
			.await
			.unwrap();
		let before = service.last_result().unwrap();

		let err = service
			.process_media(b"garbage".to_vec(), MediaKind::Image, None)
			.await
			.unwrap_err();
		assert!(matches!(err, PerceptionError::FrameDecodeFailure { .. }));
		assert!(Arc::ptr_eq(&before, &service.last_result().unwrap()));
	}

	#[tokio::test]
	async fn test_invalid_budget_and_empty_media() {
		let service = service();
		let bad = BudgetConfig {
			min_confidence: 1.5,
			..Default::default()
		};
		let err = service
			.process_media(png(), MediaKind::Image, Some(bad))
			.await
			.unwrap_err();
		assert!(err.is_invalid_input());

		let err = service
			.process_media(Vec::new(), MediaKind::Video, None)
			.await
			.unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
		assert!(service.last_result().is_none());
	}

	#[tokio::test]
	async fn test_process_path() {
		let service = service();
		let dir = tempfile::tempdir().unwrap();
		let image_path = dir.path().join("desk.png");
		std::fs::write(&image_path, png()).unwrap();

		let output = service.process_path(&image_path, None).await.unwrap();
		assert_eq!(output.stats.frames_analyzed, 1);

		let err = service
			.process_path(dir.path().join("missing.mp4"), None)
			.await
			.unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
	}

	#[tokio::test]
	async fn test_process_url_image() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/snapshot"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_bytes(png())
					.insert_header("content-type", "image/png"),
			)
			.mount(&server)
			.await;

		let service = service();
		let output = service
			.process_url(&format!("{}/snapshot", server.uri()), None)
			.await
			.unwrap();
		assert_eq!(output.result.people_count, 2);
		assert!(service.last_result().is_some());
	}

	#[tokio::test]
	async fn test_concurrent_runs_are_serialized() {
		let service = Arc::new(service());
		let a = Arc::clone(&service);
		let b = Arc::clone(&service);
		let (first, second) = tokio::join!(
			async move { a.process_media(png(), MediaKind::Image, None).await },
			async move { b.process_media(png(), MediaKind::Image, None).await },
		);
		assert!(first.is_ok() && second.is_ok());
		assert_eq!(service.last_result().unwrap().people_count, 2);
	}

	#[tokio::test]
	#[ignore = "requires ffmpeg on PATH"]
	async fn test_video_upload() {
		let service = service();
		let dir = tempfile::tempdir().unwrap();
		let clip = dir.path().join("clip.mp4");
		let status = std::process::Command::new("ffmpeg")
			.args(["-v", "error", "-f", "lavfi", "-i", "testsrc=duration=2:size=64x48:rate=10"])
			.arg(&clip)
			.status()
			.unwrap();
		assert!(status.success());

		let budget = BudgetConfig {
			max_analyzed_frames: 3,
			frame_stride: 5,
			..Default::default()
		};
		let output = service
			.process_media(std::fs::read(&clip).unwrap(), MediaKind::Video, Some(budget))
			.await
			.unwrap();
		assert_eq!(output.stats.frames_analyzed, 3);
	}
}
