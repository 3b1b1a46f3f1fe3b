use image::RgbaImage;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Label shown on cells padded in when the upstream runs out of items.
pub const PLACEHOLDER_LABEL: &str = "No data available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Artists,
    Tracks,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Artists => "artists",
            EntityType::Tracks => "tracks",
        }
    }
}

impl FromStr for EntityType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artists" | "artist" => Ok(EntityType::Artists),
            "tracks" | "track" => Ok(EntityType::Tracks),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ranking window of the upstream "top items" listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeRange {
    ShortTerm,  // ~4 weeks
    #[default]
    MediumTerm, // ~6 months
    LongTerm,   // several years
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

impl FromStr for TimeRange {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" | "short" => Ok(TimeRange::ShortTerm),
            "medium_term" | "medium" => Ok(TimeRange::MediumTerm),
            "long_term" | "long" => Ok(TimeRange::LongTerm),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the ranked listing. `rank` is the row-major cell index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedItem {
    pub display_name: String,
    pub image_ref: Option<String>,
    pub rank: usize,
    /// Padding entry with no upstream data behind it
    pub placeholder: bool,
}

impl RankedItem {
    pub fn new(rank: usize, display_name: String, image_ref: Option<String>) -> Self {
        Self {
            display_name,
            image_ref,
            rank,
            placeholder: false,
        }
    }

    pub fn placeholder(rank: usize) -> Self {
        Self {
            display_name: PLACEHOLDER_LABEL.to_string(),
            image_ref: None,
            rank,
            placeholder: true,
        }
    }
}

/// Raw image bytes for one item, or the placeholder image when the fetch
/// failed or there was nothing to fetch.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub owner_rank: usize,
    pub bytes: Vec<u8>,
    pub was_placeholder: bool,
}

/// A finished `cell_size` x `cell_size` cell with its label burned in.
#[derive(Debug, Clone)]
pub struct RenderedTile {
    pub owner_rank: usize,
    pub pixels: RgbaImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutSpec {
    pub grid_size: u32,
    pub cell_size: u32,
    pub show_labels: bool,
}

impl LayoutSpec {
    /// Derive the cell size from the target canvas side. The canvas ends up
    /// `cell_size * grid_size` wide, which is at most `canvas_target`.
    pub fn new(grid_size: u32, canvas_target: u32, show_labels: bool) -> CollageResult<Self> {
        if grid_size == 0 {
            return Err(CollageError::InvalidParameter(
                "grid size must be at least 1".to_string(),
            ));
        }

        let cell_size = canvas_target / grid_size;
        if cell_size == 0 {
            return Err(CollageError::InvalidParameter(format!(
                "grid size {} does not fit a {}px canvas",
                grid_size, canvas_target
            )));
        }

        Ok(Self {
            grid_size,
            cell_size,
            show_labels,
        })
    }

    pub fn tile_count(&self) -> usize {
        (self.grid_size as usize) * (self.grid_size as usize)
    }

    /// Canvas side length, `None` if it does not fit in a u32.
    pub fn canvas_side(&self) -> Option<u32> {
        self.cell_size.checked_mul(self.grid_size)
    }

    /// Pixel offset of the cell at `rank`.
    pub fn cell_origin(&self, rank: usize) -> (u32, u32) {
        let grid = self.grid_size as usize;
        let row = (rank / grid) as u32;
        let col = (rank % grid) as u32;
        (col * self.cell_size, row * self.cell_size)
    }
}

/// Encoded output of one collage request.
#[derive(Debug, Clone)]
pub struct Collage {
    pub width: u32,
    pub height: u32,
    pub grid_size: u32,
    pub cell_size: u32,
    pub tiles_placed: usize,
    pub png: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum CollageError {
    #[error("Authorization failed: {0}")]
    Auth(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Composition failed: {0}")]
    Composition(String),
    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Collage generation timed out after {0:?}")]
    Timeout(Duration),
}

pub type CollageResult<T> = Result<T, CollageError>;
