//! Frame sources.
//!
//! A [`FrameSource`] is a sequence of RGB frames with a position. Reads are
//! sequential and blocking; `None` signals end of stream.
//!
//! Video files are decoded by FFmpeg as an external process streaming raw RGB
//! frames over a pipe. FFmpeg is preferred over linked libraries for:
//! - Simplicity and reliability
//! - No complex build dependencies
//! - Support for all video formats FFmpeg supports

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Stdio};
use std::thread::JoinHandle;

use framelens_core::{PixelBuffer, Resolution};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::analyzer::fit_within;
use crate::error::{PerceptionError, Result};

/// File extensions decoded as still images rather than video.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

// ============================================================================
// Video Metadata
// ============================================================================

/// Metadata about a video file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
	/// Duration in seconds
	pub duration_seconds: f64,

	/// Frame rate (frames per second)
	pub frame_rate: f64,

	/// Total number of frames (estimated)
	pub frame_count: u64,

	/// Video width in pixels
	pub width: u32,

	/// Video height in pixels
	pub height: u32,

	/// Video codec name
	pub codec: String,
}

/// Raw FFprobe stream data.
#[derive(Debug, Deserialize)]
struct FfprobeStream {
	codec_type: String,
	#[serde(default)]
	duration: Option<String>,
	#[serde(default)]
	r_frame_rate: Option<String>,
	#[serde(default)]
	nb_frames: Option<String>,
	#[serde(default)]
	width: Option<u32>,
	#[serde(default)]
	height: Option<u32>,
	#[serde(default)]
	codec_name: Option<String>,
}

/// Raw FFprobe format data.
#[derive(Debug, Deserialize)]
struct FfprobeFormat {
	#[serde(default)]
	duration: Option<String>,
}

/// Raw FFprobe output.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
	#[serde(default)]
	streams: Vec<FfprobeStream>,
	#[serde(default)]
	format: Option<FfprobeFormat>,
}

// ============================================================================
// FFmpeg Detection
// ============================================================================

/// Check if FFmpeg is available in PATH.
#[instrument]
pub async fn check_ffmpeg() -> Result<()> {
	let output = Command::new("ffmpeg")
		.arg("-version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.await;

	match output {
		Ok(status) if status.success() => Ok(()),
		_ => Err(PerceptionError::FfmpegNotFound),
	}
}

/// Check if FFprobe is available in PATH.
#[instrument]
pub async fn check_ffprobe() -> Result<()> {
	let output = Command::new("ffprobe")
		.arg("-version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.await;

	match output {
		Ok(status) if status.success() => Ok(()),
		_ => Err(PerceptionError::FfprobeNotFound),
	}
}

// ============================================================================
// Video Metadata Extraction
// ============================================================================

/// Get metadata about a video file.
#[instrument(skip_all, fields(video = %video_path.as_ref().display()))]
pub async fn get_video_metadata(video_path: impl AsRef<Path>) -> Result<VideoMetadata> {
	let video_path = video_path.as_ref();

	if !video_path.exists() {
		return Err(PerceptionError::SourceUnavailable(format!(
			"video file not found: {}",
			video_path.display()
		)));
	}

	let output = Command::new("ffprobe")
		.args([
			"-v",
			"error",
			"-select_streams",
			"v:0",
			"-show_entries",
			"stream=duration,r_frame_rate,nb_frames,width,height,codec_name,codec_type",
			"-show_entries",
			"format=duration",
			"-of",
			"json",
		])
		.arg(video_path)
		.output()
		.await
		.map_err(|_| PerceptionError::FfprobeNotFound)?;

	if !output.status.success() {
		return Err(PerceptionError::SourceUnavailable(format!(
			"invalid or unsupported video: {}",
			video_path.display()
		)));
	}

	let metadata = parse_ffprobe(&String::from_utf8_lossy(&output.stdout), video_path)?;
	debug!(?metadata, "Got video metadata");
	Ok(metadata)
}

/// Parse `ffprobe -of json` output.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_ffprobe(json: &str, video_path: &Path) -> Result<VideoMetadata> {
	let probe: FfprobeOutput = serde_json::from_str(json).map_err(|e| {
		PerceptionError::SourceUnavailable(format!("failed to parse FFprobe output: {e}"))
	})?;

	let video_stream = probe
		.streams
		.iter()
		.find(|s| s.codec_type == "video")
		.ok_or_else(|| {
			PerceptionError::SourceUnavailable(format!(
				"no video stream in {}",
				video_path.display()
			))
		})?;

	// Parse duration (try stream first, then format)
	let duration_seconds = video_stream
		.duration
		.as_ref()
		.and_then(|d| d.parse::<f64>().ok())
		.or_else(|| {
			probe
				.format
				.as_ref()
				.and_then(|f| f.duration.as_ref())
				.and_then(|d| d.parse::<f64>().ok())
		})
		.unwrap_or(0.0);

	// Parse frame rate (format: "num/den")
	let frame_rate = video_stream
		.r_frame_rate
		.as_ref()
		.and_then(|r| match r.split_once('/') {
			Some((num, den)) => {
				let num: f64 = num.parse().ok()?;
				let den: f64 = den.parse().ok()?;
				(den > 0.0).then(|| num / den)
			}
			None => r.parse().ok(),
		})
		.unwrap_or(30.0);

	let frame_count = video_stream
		.nb_frames
		.as_ref()
		.and_then(|n| n.parse::<u64>().ok())
		.unwrap_or_else(|| (duration_seconds * frame_rate) as u64);

	Ok(VideoMetadata {
		duration_seconds,
		frame_rate,
		frame_count,
		width: video_stream.width.unwrap_or(0),
		height: video_stream.height.unwrap_or(0),
		codec: video_stream
			.codec_name
			.clone()
			.unwrap_or_else(|| "unknown".to_string()),
	})
}

// ============================================================================
// Frame Sources
// ============================================================================

/// A sequential source of RGB frames.
pub trait FrameSource: Send {
	/// Decode and return the next frame, or `None` at end of stream.
	///
	/// A per-frame decode problem is `Some(Err(FrameDecodeFailure))`; the
	/// source stays usable afterwards.
	fn next_frame(&mut self) -> Option<Result<PixelBuffer>>;

	/// Move past the next frame without handing it out.
	///
	/// Sources that can avoid decoding override this.
	fn skip_frame(&mut self) -> Option<Result<()>> {
		self.next_frame().map(|frame| frame.map(drop))
	}
}

/// Whether `path` looks like a still image by extension.
#[must_use]
pub fn is_image_path(path: &Path) -> bool {
	path.extension()
		.and_then(|e| e.to_str())
		.is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Decode an encoded image (JPEG, PNG, ...) into RGB pixels.
///
/// # Errors
///
/// Returns the codec error when the bytes are not a decodable image.
pub fn decode_image(bytes: &[u8]) -> std::result::Result<PixelBuffer, image::ImageError> {
	let rgb = image::load_from_memory(bytes)?.to_rgb8();
	let (width, height) = rgb.dimensions();
	Ok(PixelBuffer::new(width, height, rgb.into_raw()))
}

fn load_image(path: &Path) -> std::result::Result<PixelBuffer, image::ImageError> {
	let rgb = image::open(path)?.to_rgb8();
	let (width, height) = rgb.dimensions();
	Ok(PixelBuffer::new(width, height, rgb.into_raw()))
}

// ----------------------------------------------------------------------------
// FFmpeg
// ----------------------------------------------------------------------------

/// Largest frame, in pixels, decoded without a downscale target (8K UHD).
pub const MAX_FRAME_PIXELS: u64 = 7680 * 4320;

/// Bytes of ffmpeg's stderr kept for error messages.
const STDERR_TAIL_BYTES: usize = 2048;

/// Decodes a video file through an `ffmpeg` child process piping raw RGB24.
///
/// When a target resolution is given, ffmpeg scales frames before they reach
/// the pipe, so a frame buffer is never larger than the target box.
#[derive(Debug)]
pub struct FfmpegFrameSource {
	child: Child,
	stdout: ChildStdout,
	stderr: Option<JoinHandle<String>>,
	width: u32,
	height: u32,
	scratch: Vec<u8>,
	index: u64,
	frames_read: u64,
	finished: bool,
}

impl FfmpegFrameSource {
	/// Probe `video_path` with ffprobe, then start decoding it.
	///
	/// # Errors
	///
	/// Returns `SourceUnavailable` when the file is missing or not a video, and
	/// `FfprobeNotFound`/`FfmpegNotFound` when the tools are not installed.
	pub async fn open(video_path: impl AsRef<Path>, target: Option<Resolution>) -> Result<Self> {
		let video_path = video_path.as_ref();
		let metadata = get_video_metadata(video_path).await?;
		Self::spawn(video_path, metadata.width, metadata.height, target)
	}

	/// Start decoding `video_path`, whose frames are `width` x `height`.
	///
	/// # Errors
	///
	/// Returns `SourceUnavailable` for zero or oversized dimensions and
	/// `FfmpegNotFound` when the process cannot be started.
	pub fn spawn(
		video_path: &Path,
		width: u32,
		height: u32,
		target: Option<Resolution>,
	) -> Result<Self> {
		Self::spawn_program("ffmpeg", video_path, width, height, target)
	}

	/// As [`spawn`](Self::spawn), running `program` instead of `ffmpeg` from `PATH`.
	///
	/// # Errors
	///
	/// As [`spawn`](Self::spawn).
	pub fn spawn_program(
		program: impl AsRef<OsStr>,
		video_path: &Path,
		width: u32,
		height: u32,
		target: Option<Resolution>,
	) -> Result<Self> {
		if width == 0 || height == 0 {
			return Err(PerceptionError::SourceUnavailable(format!(
				"video has no frame dimensions: {}",
				video_path.display()
			)));
		}

		let (out_width, out_height) =
			target.map_or((width, height), |t| fit_within(width, height, t));
		if u64::from(out_width) * u64::from(out_height) > MAX_FRAME_PIXELS {
			return Err(PerceptionError::SourceUnavailable(format!(
				"frame size {out_width}x{out_height} exceeds {MAX_FRAME_PIXELS} pixels"
			)));
		}

		// `-noautorotate` stops rotation metadata from swapping the probed width and height.
		let mut command = std::process::Command::new(program);
		let _ = command
			.args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
			.arg(video_path);
		if (out_width, out_height) != (width, height) {
			let _ = command.args(["-vf", &format!("scale={out_width}:{out_height}")]);
		}
		let mut child = command
			.args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|e| match e.kind() {
				std::io::ErrorKind::NotFound => PerceptionError::FfmpegNotFound,
				_ => PerceptionError::Io(e),
			})?;

		let stdout = child.stdout.take().ok_or_else(|| {
			PerceptionError::SourceUnavailable("ffmpeg stdout was not captured".to_string())
		})?;
		// Drained on its own thread so a chatty ffmpeg never blocks on a full pipe.
		let stderr = child
			.stderr
			.take()
			.map(|pipe| std::thread::spawn(move || read_tail(pipe, STDERR_TAIL_BYTES)));

		debug!(
			width,
			height,
			out_width,
			out_height,
			video = %video_path.display(),
			"Started ffmpeg decoder"
		);

		Ok(Self {
			child,
			stdout,
			stderr,
			width: out_width,
			height: out_height,
			scratch: Vec::new(),
			index: 0,
			frames_read: 0,
			finished: false,
		})
	}

	fn frame_len(&self) -> usize {
		self.width as usize * self.height as usize * 3
	}

	/// Read one frame's bytes into `buf`. A short read at EOF ends the stream.
	fn read_frame_into(&mut self, buf: &mut [u8]) -> Option<Result<()>> {
		if self.finished {
			return None;
		}
		self.index += 1;
		match self.stdout.read_exact(buf) {
			Ok(()) => {
				self.frames_read += 1;
				Some(Ok(()))
			}
			Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
				self.finished = true;
				self.check_exit()
			}
			Err(e) => {
				self.finished = true;
				Some(Err(PerceptionError::FrameDecodeFailure {
					index: self.index,
					reason: e.to_string(),
				}))
			}
		}
	}

	/// At end of output, find out whether ffmpeg actually succeeded.
	///
	/// Failing before the first frame means the stream could not be opened;
	/// failing later truncates the stream.
	fn check_exit(&mut self) -> Option<Result<()>> {
		let status = match self.child.wait() {
			Ok(status) => status,
			Err(e) => return Some(Err(PerceptionError::Io(e))),
		};
		if status.success() {
			return None;
		}

		let stderr = self
			.stderr
			.take()
			.and_then(|handle| handle.join().ok())
			.unwrap_or_default();
		let reason = format!("ffmpeg exited with {status}: {}", stderr.trim());

		if self.frames_read == 0 {
			return Some(Err(PerceptionError::SourceUnavailable(reason)));
		}
		warn!(frames = self.frames_read, %reason, "ffmpeg stopped early, ending stream");
		None
	}
}

/// Read `pipe` to the end, keeping only the last `limit` bytes.
fn read_tail(mut pipe: impl Read, limit: usize) -> String {
	let mut kept: Vec<u8> = Vec::new();
	let mut chunk = [0_u8; 1024];
	loop {
		match pipe.read(&mut chunk) {
			Ok(0) | Err(_) => break,
			Ok(n) => {
				kept.extend_from_slice(&chunk[..n]);
				if kept.len() > limit {
					let excess = kept.len() - limit;
					let _ = kept.drain(..excess);
				}
			}
		}
	}
	String::from_utf8_lossy(&kept).into_owned()
}

impl FrameSource for FfmpegFrameSource {
	fn next_frame(&mut self) -> Option<Result<PixelBuffer>> {
		let mut data = vec![0_u8; self.frame_len()];
		let read = self.read_frame_into(&mut data)?;
		Some(read.map(|()| PixelBuffer::new(self.width, self.height, data)))
	}

	fn skip_frame(&mut self) -> Option<Result<()>> {
		let mut scratch = std::mem::take(&mut self.scratch);
		scratch.resize(self.frame_len(), 0);
		let read = self.read_frame_into(&mut scratch);
		self.scratch = scratch;
		read
	}
}

impl Drop for FfmpegFrameSource {
	fn drop(&mut self) {
		// The loop may stop long before ffmpeg reaches the end of the file.
		let _ = self.child.kill();
		let _ = self.child.wait();
	}
}

// ----------------------------------------------------------------------------
// Images
// ----------------------------------------------------------------------------

/// A list of image files treated as consecutive frames, decoded lazily.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
	paths: Vec<PathBuf>,
	position: usize,
}

impl ImageSequenceSource {
	/// Frames from `paths`, in order.
	#[must_use]
	pub const fn new(paths: Vec<PathBuf>) -> Self {
		Self { paths, position: 0 }
	}

	/// Every image file in `dir`, sorted by file name.
	///
	/// # Errors
	///
	/// Returns `SourceUnavailable` when the directory cannot be read.
	pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
		let dir = dir.as_ref();
		let entries = std::fs::read_dir(dir).map_err(|e| {
			PerceptionError::SourceUnavailable(format!("{}: {e}", dir.display()))
		})?;

		let mut paths: Vec<PathBuf> = entries
			.filter_map(|entry| entry.ok().map(|e| e.path()))
			.filter(|p| is_image_path(p))
			.collect();
		paths.sort();
		Ok(Self::new(paths))
	}

	/// Number of frames in the sequence.
	#[must_use]
	pub fn len(&self) -> usize {
		self.paths.len()
	}

	/// Whether the sequence has no frames.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}
}

impl FrameSource for ImageSequenceSource {
	fn next_frame(&mut self) -> Option<Result<PixelBuffer>> {
		let path = self.paths.get(self.position)?;
		self.position += 1;
		Some(
			load_image(path).map_err(|e| PerceptionError::FrameDecodeFailure {
				index: self.position as u64,
				reason: format!("{}: {e}", path.display()),
			}),
		)
	}

	fn skip_frame(&mut self) -> Option<Result<()>> {
		(self.position < self.paths.len()).then(|| {
			self.position += 1;
			Ok(())
		})
	}
}

/// A single still image, decoded up front.
#[derive(Debug)]
pub struct SingleImageSource {
	frame: Option<Result<PixelBuffer>>,
}

impl SingleImageSource {
	/// Decode `bytes`. A decode failure is reported by the first read.
	#[must_use]
	pub fn from_bytes(bytes: &[u8]) -> Self {
		let frame = decode_image(bytes).map_err(|e| PerceptionError::FrameDecodeFailure {
			index: 1,
			reason: e.to_string(),
		});
		Self { frame: Some(frame) }
	}

	/// Wrap already decoded pixels.
	#[must_use]
	pub const fn from_pixels(pixels: PixelBuffer) -> Self {
		Self {
			frame: Some(Ok(pixels)),
		}
	}
}

impl FrameSource for SingleImageSource {
	fn next_frame(&mut self) -> Option<Result<PixelBuffer>> {
		self.frame.take()
	}

	fn skip_frame(&mut self) -> Option<Result<()>> {
		self.frame.take().map(|_| Ok(()))
	}
}

/// Frames held in memory. Entries may be errors to simulate bad frames.
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
	frames: VecDeque<Result<PixelBuffer>>,
}

impl MemoryFrameSource {
	/// A source yielding `frames` in order.
	#[must_use]
	pub fn new(frames: Vec<PixelBuffer>) -> Self {
		Self {
			frames: frames.into_iter().map(Ok).collect(),
		}
	}

	/// A source yielding each entry as-is, errors included.
	#[must_use]
	pub fn from_results(frames: Vec<Result<PixelBuffer>>) -> Self {
		Self {
			frames: frames.into(),
		}
	}

	/// Frames not yet read or skipped.
	#[must_use]
	pub fn remaining(&self) -> usize {
		self.frames.len()
	}
}

impl FrameSource for MemoryFrameSource {
	fn next_frame(&mut self) -> Option<Result<PixelBuffer>> {
		self.frames.pop_front()
	}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
	use super::*;

	fn solid(width: u32, height: u32, value: u8) -> PixelBuffer {
		PixelBuffer::new(width, height, vec![value; (width * height * 3) as usize])
	}

	fn write_png(path: &Path, value: u8) {
		let img = image::RgbImage::from_pixel(4, 3, image::Rgb([value, value, value]));
		img.save(path).unwrap();
	}

	#[tokio::test]
	async fn test_check_ffmpeg() {
		// Availability depends on the system
		match check_ffmpeg().await {
			Ok(()) | Err(PerceptionError::FfmpegNotFound) => {}
			Err(e) => panic!("unexpected error: {e}"),
		}
	}

	#[tokio::test]
	async fn test_check_ffprobe() {
		match check_ffprobe().await {
			Ok(()) | Err(PerceptionError::FfprobeNotFound) => {}
			Err(e) => panic!("unexpected error: {e}"),
		}
	}

	/// Write an executable shell script standing in for ffmpeg.
	#[cfg(unix)]
	fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
		use std::os::unix::fs::PermissionsExt;

		let path = dir.join("ffmpeg");
		std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	/// Spawn a fake ffmpeg, retrying while the just-written script is busy.
	#[cfg(unix)]
	fn spawn_fake(
		program: &Path,
		width: u32,
		height: u32,
		target: Option<Resolution>,
	) -> FfmpegFrameSource {
		let clip = program.with_file_name("clip.mp4");
		for _ in 0..20 {
			match FfmpegFrameSource::spawn_program(program, &clip, width, height, target) {
				// ETXTBSY
				Err(PerceptionError::Io(e)) if e.raw_os_error() == Some(26) => {
					std::thread::sleep(std::time::Duration::from_millis(10));
				}
				other => return other.unwrap(),
			}
		}
		panic!("fake ffmpeg stayed busy");
	}

	#[cfg(unix)]
	#[test]
	fn test_ffmpeg_failing_before_first_frame() {
		let dir = tempfile::tempdir().unwrap();
		let program = fake_ffmpeg(dir.path(), "echo 'Decoder (codec av1) not found' >&2\nexit 1");

		let mut source = spawn_fake(&program, 4, 4, None);
		match source.next_frame() {
			Some(Err(PerceptionError::SourceUnavailable(reason))) => {
				assert!(reason.contains("Decoder (codec av1) not found"), "{reason}");
			}
			other => panic!("expected SourceUnavailable, got {:?}", other.map(|r| r.map(|_| ()))),
		}
		assert!(source.next_frame().is_none());

		// The run fails instead of publishing an empty result
		let mut source = spawn_fake(&program, 4, 4, None);
		let detector = |_: &PixelBuffer, _: f32| -> Result<Vec<framelens_core::DetectedEntity>> {
			Ok(vec![])
		};
		let budget = framelens_core::BudgetConfig { target_resolution: None, ..Default::default() };
		let err = crate::pipeline::Pipeline::new(std::sync::Arc::new(detector))
			.run(&mut source, &budget)
			.unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)), "{err}");
	}

	#[cfg(unix)]
	#[test]
	fn test_ffmpeg_failing_after_frames_ends_stream() {
		let dir = tempfile::tempdir().unwrap();
		// One complete 2x1 frame, then a crash
		let program = fake_ffmpeg(dir.path(), "printf 'abcdef'\nexit 1");

		let mut source = spawn_fake(&program, 2, 1, None);
		let frame = source.next_frame().unwrap().unwrap();
		assert_eq!(frame.data, b"abcdef".to_vec());
		assert!(source.next_frame().is_none());
	}

	#[cfg(unix)]
	#[test]
	fn test_ffmpeg_scales_to_target() {
		let dir = tempfile::tempdir().unwrap();
		let args = dir.path().join("args");
		let program = fake_ffmpeg(dir.path(), &format!("echo \"$@\" > '{}'", args.display()));
		let target = Resolution { width: 320, height: 320 };

		let mut source = spawn_fake(&program, 1920, 1080, Some(target));
		assert_eq!((source.width, source.height), (320, 180));
		assert!(source.next_frame().is_none());
		assert!(std::fs::read_to_string(&args).unwrap().contains("-vf scale=320:180"));

		// Already within the target: no scale filter
		let mut source = spawn_fake(&program, 160, 90, Some(target));
		assert_eq!((source.width, source.height), (160, 90));
		assert!(source.next_frame().is_none());
		assert!(!std::fs::read_to_string(&args).unwrap().contains("scale="));
	}

	#[test]
	fn test_ffmpeg_rejects_oversized_frames() {
		let clip = Path::new("clip.mp4");
		let err = FfmpegFrameSource::spawn(clip, 100_000, 100_000, None).unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));

		let err = FfmpegFrameSource::spawn(clip, 0, 1080, None).unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
	}

	#[tokio::test]
	async fn test_metadata_for_missing_file() {
		let err = get_video_metadata("/definitely/not/here.mp4").await.unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
		assert!(err.is_fatal());
	}

	#[test]
	fn test_parse_ffprobe() {
		let json = r#"{
			"streams": [{
				"codec_type": "video",
				"codec_name": "h264",
				"width": 1280,
				"height": 720,
				"r_frame_rate": "30000/1001",
				"nb_frames": "300"
			}],
			"format": {"duration": "10.01"}
		}"#;
		let meta = parse_ffprobe(json, Path::new("clip.mp4")).unwrap();
		assert_eq!(meta.width, 1280);
		assert_eq!(meta.height, 720);
		assert_eq!(meta.frame_count, 300);
		assert_eq!(meta.codec, "h264");
		assert!((meta.frame_rate - 29.97).abs() < 0.01);
		assert!((meta.duration_seconds - 10.01).abs() < f64::EPSILON);
	}

	#[test]
	fn test_parse_ffprobe_without_video_stream() {
		let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
		let err = parse_ffprobe(json, Path::new("song.mp3")).unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
	}

	#[test]
	fn test_is_image_path() {
		assert!(is_image_path(Path::new("a/b/frame.JPG")));
		assert!(is_image_path(Path::new("x.webp")));
		assert!(!is_image_path(Path::new("clip.mp4")));
		assert!(!is_image_path(Path::new("noext")));
	}

	#[test]
	fn test_memory_source_order_and_end() {
		let mut source = MemoryFrameSource::new(vec![solid(2, 2, 1), solid(2, 2, 2)]);
		assert_eq!(source.remaining(), 2);
		assert!(source.skip_frame().unwrap().is_ok());
		let frame = source.next_frame().unwrap().unwrap();
		assert_eq!(frame.data[0], 2);
		assert!(source.next_frame().is_none());
	}

	#[test]
	fn test_single_image_source() {
		let mut png = Vec::new();
		image::RgbImage::from_pixel(5, 4, image::Rgb([9, 9, 9]))
			.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
			.unwrap();

		let mut source = SingleImageSource::from_bytes(&png);
		let frame = source.next_frame().unwrap().unwrap();
		assert_eq!((frame.width, frame.height), (5, 4));
		assert!(source.next_frame().is_none());

		let mut broken = SingleImageSource::from_bytes(b"not an image");
		let err = broken.next_frame().unwrap().unwrap_err();
		assert!(matches!(err, PerceptionError::FrameDecodeFailure { index: 1, .. }));
	}

	#[test]
	fn test_image_sequence_from_dir() {
		let dir = tempfile::tempdir().unwrap();
		write_png(&dir.path().join("frame-002.png"), 20);
		write_png(&dir.path().join("frame-001.png"), 10);
		std::fs::write(dir.path().join("frame-003.jpg"), b"garbage").unwrap();
		std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

		let mut source = ImageSequenceSource::from_dir(dir.path()).unwrap();
		assert_eq!(source.len(), 3);

		assert_eq!(source.next_frame().unwrap().unwrap().data[0], 10);
		assert!(source.skip_frame().unwrap().is_ok());
		let err = source.next_frame().unwrap().unwrap_err();
		assert!(matches!(err, PerceptionError::FrameDecodeFailure { index: 3, .. }));
		assert!(source.next_frame().is_none());
		assert!(source.skip_frame().is_none());
	}

	#[test]
	fn test_image_sequence_missing_dir() {
		let err = ImageSequenceSource::from_dir("/definitely/not/a/dir").unwrap_err();
		assert!(matches!(err, PerceptionError::SourceUnavailable(_)));
	}

	#[tokio::test]
	#[ignore = "requires ffmpeg and ffprobe in PATH"]
	async fn test_ffmpeg_source_reads_synthetic_clip() {
		let dir = tempfile::tempdir().unwrap();
		let clip = dir.path().join("testsrc.mp4");
		let status = std::process::Command::new("ffmpeg")
			.args(["-v", "error", "-f", "lavfi", "-i", "testsrc=size=64x48:rate=10", "-t", "2"])
			.arg(&clip)
			.status()
			.expect("ffmpeg should run");
		assert!(status.success());

		let mut source = FfmpegFrameSource::open(&clip, None).await.unwrap();
		let mut frames = 0;
		while let Some(frame) = source.skip_frame() {
			frame.unwrap();
			frames += 1;
		}
		assert_eq!(frames, 20);
		assert!(source.next_frame().is_none());
	}
}
