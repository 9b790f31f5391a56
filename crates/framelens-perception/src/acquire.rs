//! Remote media acquisition.
//!
//! Downloads a URL into a named temporary file so the regular file-based frame
//! sources can decode it. The whole download runs under one timeout and the
//! body is capped in size, independently of the analysis loop's own frame cap.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::{PerceptionError, Result};

/// Limits for one download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
	/// Total time allowed for the request and body, in seconds
	pub timeout_seconds: u64,

	/// Largest accepted body in bytes
	pub max_bytes: u64,

	/// `User-Agent` header sent with the request
	pub user_agent: String,
}

impl Default for AcquisitionConfig {
	fn default() -> Self {
		Self {
			timeout_seconds: 120,
			max_bytes: 100 * 1024 * 1024,
			user_agent: concat!("framelens/", env!("CARGO_PKG_VERSION")).to_string(),
		}
	}
}

/// A downloaded file. The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct AcquiredMedia {
	/// The temporary file holding the body
	pub file: NamedTempFile,

	/// Bytes written
	pub bytes: u64,

	/// `Content-Type` reported by the server
	pub content_type: Option<String>,
}

impl AcquiredMedia {
	/// Path of the downloaded file.
	#[must_use]
	pub fn path(&self) -> &Path {
		self.file.path()
	}
}

/// Download `url` into a temporary file.
///
/// # Errors
///
/// Returns `AcquisitionFailed` for a malformed or non-http(s) URL, a non-2xx
/// status, a body over `max_bytes` or a transport error, and
/// `AcquisitionTimeout` when `timeout_seconds` elapses first.
#[instrument(skip(config), fields(max_bytes = config.max_bytes))]
pub async fn download_to_temp(url: &str, config: &AcquisitionConfig) -> Result<AcquiredMedia> {
	let parsed = reqwest::Url::parse(url).map_err(|e| failed(url, e))?;
	if !matches!(parsed.scheme(), "http" | "https") {
		return Err(failed(url, format!("unsupported scheme {}", parsed.scheme())));
	}

	let limit = Duration::from_secs(config.timeout_seconds);
	let media = tokio::time::timeout(limit, fetch(parsed, url, config))
		.await
		.map_err(|_| PerceptionError::AcquisitionTimeout {
			seconds: config.timeout_seconds,
		})??;

	info!(bytes = media.bytes, "Downloaded remote media");
	Ok(media)
}

async fn fetch(parsed: reqwest::Url, url: &str, config: &AcquisitionConfig) -> Result<AcquiredMedia> {
	let client = reqwest::Client::builder()
		.user_agent(config.user_agent.as_str())
		.build()
		.map_err(|e| failed(url, e))?;

	let mut response = client.get(parsed.as_str()).send().await.map_err(|e| failed(url, e))?;

	let status = response.status();
	if !status.is_success() {
		return Err(failed(url, format!("HTTP {status}")));
	}

	if let Some(len) = response.content_length() {
		if len > config.max_bytes {
			return Err(too_large(url, config.max_bytes));
		}
	}

	let content_type = response
		.headers()
		.get(reqwest::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);

	// Keep the extension so ffmpeg can use it as a container hint.
	let suffix = Path::new(parsed.path())
		.extension()
		.and_then(|e| e.to_str())
		.map(|e| format!(".{e}"))
		.unwrap_or_default();
	let file = tempfile::Builder::new()
		.prefix("framelens-")
		.suffix(&suffix)
		.tempfile()?;
	let mut out = tokio::fs::File::from_std(file.reopen()?);

	let mut bytes = 0_u64;
	while let Some(chunk) = response.chunk().await.map_err(|e| failed(url, e))? {
		bytes += chunk.len() as u64;
		if bytes > config.max_bytes {
			return Err(too_large(url, config.max_bytes));
		}
		out.write_all(&chunk).await?;
	}
	out.flush().await?;
	debug!(bytes, path = %file.path().display(), "Wrote download to temp file");

	Ok(AcquiredMedia {
		file,
		bytes,
		content_type,
	})
}

fn failed(url: &str, reason: impl std::fmt::Display) -> PerceptionError {
	PerceptionError::AcquisitionFailed {
		url: url.to_string(),
		reason: reason.to_string(),
	}
}

fn too_large(url: &str, max_bytes: u64) -> PerceptionError {
	failed(url, format!("body exceeds {max_bytes} bytes"))
}
