//! Capture providers.
//!
//! Pixel capture itself lives outside this crate. A [`CaptureProvider`]
//! hands back an already-encoded image; the agent only buffers and relays it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snaplink_proto::Quality;
use tracing::trace;

use super::buffer::CapturePayload;
use crate::config::{CaptureConfig, CaptureSource};
use crate::error::CaptureError;

#[async_trait]
pub trait CaptureProvider: Send + Sync + 'static {
    async fn capture(&self, quality: Quality) -> Result<CapturePayload, CaptureError>;
}

/// Provider for headless hosts. Every capture fails with `NoDisplayAvailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableProvider;

#[async_trait]
impl CaptureProvider for UnavailableProvider {
    async fn capture(&self, _quality: Quality) -> Result<CapturePayload, CaptureError> {
        Err(CaptureError::NoDisplayAvailable)
    }
}

/// Serves an image file from disk as a base64 `data:` URL. The file is
/// re-read on every capture so an external tool can keep replacing it.
#[derive(Debug, Clone)]
pub struct FileCaptureProvider {
    path: PathBuf,
}

impl FileCaptureProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaptureProvider for FileCaptureProvider {
    async fn capture(&self, quality: Quality) -> Result<CapturePayload, CaptureError> {
        trace!(path = %self.path.display(), ?quality, "reading capture file");
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            CaptureError::CaptureFailed(format!("{}: {e}", self.path.display()))
        })?;
        if bytes.is_empty() {
            return Err(CaptureError::CaptureFailed(format!(
                "{}: empty file",
                self.path.display()
            )));
        }
        Ok(CapturePayload::new(data_url(mime_for(&self.path), &bytes)))
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Build the provider selected by `[capture]`.
pub fn from_config(config: &CaptureConfig) -> Arc<dyn CaptureProvider> {
    match (config.source, &config.path) {
        (CaptureSource::File, Some(path)) => Arc::new(FileCaptureProvider::new(path.clone())),
        _ => Arc::new(UnavailableProvider),
    }
}
