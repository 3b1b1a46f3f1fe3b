use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_base_url: String,
    pub page_size: u32,
    pub retries: u32,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub canvas_size: u32,
    pub max_grid_size: u32,
    pub label_supersample: u32,
    pub placeholder_path: Option<String>,
    pub image_retries: u32,
    pub max_image_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub upstream: UpstreamConfig,
    pub render: RenderConfig,
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Unset keeps collages in memory only
    pub output_dir: Option<String>,
    pub retention_secs: u64,
}

/// Parallel fetch/render tasks per request: one per core, at least 2 so a
/// slow download does not serialize the grid, at most 8 to stay polite to
/// the image CDN.
pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            port: var_or("TOP_COLLAGE_PORT", "8888").parse()?,
            host: var_or("TOP_COLLAGE_HOST", "0.0.0.0"),
            upstream: UpstreamConfig {
                api_base_url: var_or("TOP_COLLAGE_API_BASE_URL", "https://api.spotify.com/v1"),
                page_size: var_or("TOP_COLLAGE_PAGE_SIZE", "50").parse()?,
                retries: var_or("TOP_COLLAGE_SOURCE_RETRIES", "2").parse()?,
                http_timeout_secs: var_or("TOP_COLLAGE_HTTP_TIMEOUT_SECS", "10").parse()?,
            },
            render: RenderConfig {
                canvas_size: var_or("TOP_COLLAGE_CANVAS_SIZE", "900").parse()?,
                max_grid_size: var_or("TOP_COLLAGE_MAX_GRID_SIZE", "10").parse()?,
                label_supersample: var_or("TOP_COLLAGE_LABEL_SUPERSAMPLE", "2").parse()?,
                placeholder_path: optional_var("TOP_COLLAGE_PLACEHOLDER_PATH"),
                image_retries: var_or("TOP_COLLAGE_IMAGE_RETRIES", "1").parse()?,
                max_image_bytes: var_or("TOP_COLLAGE_MAX_IMAGE_BYTES", "10485760").parse()?,
            },
            concurrency: match optional_var("TOP_COLLAGE_CONCURRENCY") {
                Some(value) => value.parse()?,
                None => default_concurrency(),
            },
            request_timeout_secs: var_or("TOP_COLLAGE_REQUEST_TIMEOUT_SECS", "60").parse()?,
            output_dir: optional_var("TOP_COLLAGE_OUTPUT_DIR"),
            retention_secs: var_or("TOP_COLLAGE_RETENTION_SECS", "3600").parse()?,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.http_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}
