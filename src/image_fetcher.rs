use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use log::{debug, warn};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::collage_types::{CollageResult, RankedItem, ResolvedImage};

/// Fill of the generated placeholder image (neutral grey).
pub const PLACEHOLDER_IMAGE_COLOR: Rgba<u8> = Rgba([0x9E, 0x9E, 0x9E, 255]);

const PLACEHOLDER_IMAGE_SIDE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Empty response body")]
    Empty,
}

impl FetchError {
    /// Client errors and empty bodies will not change on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Empty => false,
        }
    }
}

/// Binary download of one image reference.
pub trait ImageTransport: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpImageTransport {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpImageTransport {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: config.into(),
            max_bytes,
        }
    }
}

impl ImageTransport for HttpImageTransport {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::Status(status));
        }

        let bytes = response
            .body_mut()
            .with_config()
            .limit(self.max_bytes)
            .read_to_vec()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }

        Ok(bytes)
    }
}

/// Load the placeholder image from `path` when it exists and decodes,
/// otherwise generate a flat grey PNG.
pub fn load_placeholder(path: Option<&Path>) -> CollageResult<Vec<u8>> {
    if let Some(path) = path {
        match std::fs::read(path) {
            Ok(bytes) if image::load_from_memory(&bytes).is_ok() => return Ok(bytes),
            Ok(_) => warn!(
                "Placeholder {:?} is not a decodable image, using generated one",
                path
            ),
            Err(e) => warn!(
                "Failed to read placeholder {:?}: {}, using generated one",
                path, e
            ),
        }
    }

    let img = RgbaImage::from_pixel(
        PLACEHOLDER_IMAGE_SIDE,
        PLACEHOLDER_IMAGE_SIDE,
        PLACEHOLDER_IMAGE_COLOR,
    );
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img).write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Resolves an item's image reference to bytes. Never fails: anything that
/// goes wrong is replaced by the placeholder image.
#[derive(Clone)]
pub struct ImageFetcher {
    transport: Arc<dyn ImageTransport>,
    placeholder: Arc<Vec<u8>>,
    retries: u32,
}

impl ImageFetcher {
    pub fn new(transport: Arc<dyn ImageTransport>, placeholder: Vec<u8>, retries: u32) -> Self {
        Self {
            transport,
            placeholder: Arc::new(placeholder),
            retries,
        }
    }

    pub async fn resolve(&self, item: &RankedItem) -> ResolvedImage {
        let Some(url) = item.image_ref.as_deref() else {
            debug!("Item {} has no image, using placeholder", item.rank);
            return self.placeholder_for(item.rank);
        };

        let mut attempt = 0;
        loop {
            let transport = self.transport.clone();
            let url_owned = url.to_string();
            let result = tokio::task::spawn_blocking(move || transport.fetch(&url_owned))
                .await
                .unwrap_or_else(|e| Err(FetchError::Transport(format!("fetch task failed: {}", e))));

            match result {
                Ok(bytes) => {
                    return ResolvedImage {
                        owner_rank: item.rank,
                        bytes,
                        was_placeholder: false,
                    }
                }
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    debug!(
                        "Image fetch for item {} failed ({}), retry {}/{}",
                        item.rank, e, attempt, self.retries
                    );
                }
                Err(e) => {
                    warn!(
                        "Image fetch for item {} ({}) failed, using placeholder: {}",
                        item.rank, url, e
                    );
                    return self.placeholder_for(item.rank);
                }
            }
        }
    }

    pub fn placeholder_for(&self, rank: usize) -> ResolvedImage {
        ResolvedImage {
            owner_rank: rank,
            bytes: self.placeholder.as_ref().clone(),
            was_placeholder: true,
        }
    }
}
