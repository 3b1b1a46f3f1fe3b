use log::debug;
use serde::Deserialize;
use std::time::Duration;

use crate::collage_types::{EntityType, TimeRange};

/// Upper bound on how long a 429 `Retry-After` is allowed to stall a page.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Upstream rejected the credential (HTTP {0})")]
    Unauthorized(u16),
    #[error("Upstream rate limited the request")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Upstream returned HTTP {0}")]
    Status(u16),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed upstream response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Credential problems end the request; everything else degrades.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Unauthorized(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. }
            | SourceError::Transport(_)
            | SourceError::Malformed(_) => true,
            SourceError::Status(code) => *code >= 500,
            SourceError::Unauthorized(_) => false,
        }
    }
}

/// One page of the upstream "top items" listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopItemsPage {
    #[serde(default)]
    pub items: Vec<UpstreamEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageVariant {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub images: Vec<ImageVariant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub name: String,
}

/// An artist or a track as the listing returns it. Tracks carry their
/// artwork on the nested album rather than on the entity itself.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEntity {
    pub name: String,
    #[serde(default)]
    pub images: Vec<ImageVariant>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

impl UpstreamEntity {
    /// Largest variant by width; variants without a width rank below sized
    /// ones and the first variant wins ties.
    pub fn preferred_image(&self) -> Option<&ImageVariant> {
        let variants = if self.images.is_empty() {
            self.album
                .as_ref()
                .map(|album| album.images.as_slice())
                .unwrap_or(&[])
        } else {
            self.images.as_slice()
        };

        variants.iter().fold(None, |best: Option<&ImageVariant>, candidate| {
            let rank = |v: &ImageVariant| v.width.map(i64::from).unwrap_or(-1);
            match best {
                Some(current) if rank(current) >= rank(candidate) => Some(current),
                _ => Some(candidate),
            }
        })
    }

    pub fn display_name(&self, entity_type: EntityType) -> String {
        match (entity_type, self.artists.first()) {
            (EntityType::Tracks, Some(artist)) => format!("{} - {}", self.name, artist.name),
            _ => self.name.clone(),
        }
    }
}

/// Paginated "list top items" call. Implementations block; callers move
/// them onto the blocking pool.
pub trait TopItemsSource: Send + Sync {
    fn fetch_page(
        &self,
        credential: &str,
        entity_type: EntityType,
        time_range: TimeRange,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<UpstreamEntity>, SourceError>;
}

/// Map a non-success HTTP status to the adapter's error taxonomy.
pub fn classify_status(status: u16, retry_after: Option<&str>) -> SourceError {
    match status {
        401 | 403 => SourceError::Unauthorized(status),
        429 => SourceError::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        },
        other => SourceError::Status(other),
    }
}

/// `Retry-After` in delta-seconds form, capped at [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

pub struct HttpTopItemsSource {
    agent: ureq::Agent,
    api_base: String,
}

impl HttpTopItemsSource {
    pub fn new(api_base: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: config.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

impl TopItemsSource for HttpTopItemsSource {
    fn fetch_page(
        &self,
        credential: &str,
        entity_type: EntityType,
        time_range: TimeRange,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<UpstreamEntity>, SourceError> {
        let url = format!("{}/me/top/{}", self.api_base, entity_type.as_str());
        debug!(
            "Fetching {} (time_range={}, limit={}, offset={})",
            url, time_range, limit, offset
        );

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", format!("Bearer {}", credential))
            .query("time_range", time_range.as_str())
            .query("limit", limit.to_string())
            .query("offset", offset.to_string())
            .call()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string());
            return Err(classify_status(status, retry_after.as_deref()));
        }

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let page: TopItemsPage =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;

        Ok(page.items)
    }
}
