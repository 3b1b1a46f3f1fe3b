use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cell_renderer::CellRenderer;
use crate::collage_store::{new_collage_id, CollageStore};
use crate::collage_types::{
    Collage, CollageError, CollageResult, EntityType, LayoutSpec, RankedItem, RenderedTile,
    ResolvedImage, TimeRange,
};
use crate::config::Config;
use crate::grid_compositor::GridCompositor;
use crate::image_fetcher::ImageFetcher;
use crate::item_source::ItemSource;
use crate::upstream::SourceError;

pub const DEFAULT_GRID_SIZE: i64 = 3;

/// Filter parameters of one collage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollageRequest {
    pub entity_type: EntityType,
    pub time_range: TimeRange,
    /// Signed so that non-positive sizes reach validation instead of failing
    /// to parse
    pub grid_size: i64,
    pub show_labels: bool,
}

impl CollageRequest {
    /// Build a request from loosely typed parameters, applying defaults for
    /// anything absent.
    pub fn parse(
        entity_type: Option<&str>,
        time_range: Option<&str>,
        grid_size: Option<i64>,
        show_labels: Option<bool>,
    ) -> CollageResult<Self> {
        let entity_type = match entity_type {
            Some(raw) => raw.parse::<EntityType>().map_err(|_| {
                CollageError::InvalidParameter(format!("unsupported entity type: {}", raw))
            })?,
            None => EntityType::Artists,
        };

        let time_range = match time_range {
            Some(raw) => raw.parse::<TimeRange>().map_err(|_| {
                CollageError::InvalidParameter(format!("unsupported time range: {}", raw))
            })?,
            None => TimeRange::default(),
        };

        Ok(Self {
            entity_type,
            time_range,
            grid_size: grid_size.unwrap_or(DEFAULT_GRID_SIZE),
            show_labels: show_labels.unwrap_or(true),
        })
    }
}

/// A finished request: the stored collage and the names in row-major rows
/// of `grid_size`, for presentation layers that show labels beside the image.
#[derive(Debug, Clone)]
pub struct CollageOutput {
    pub id: String,
    pub collage: Collage,
    pub label_rows: Vec<Vec<String>>,
    pub placeholder_count: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub canvas_size: u32,
    pub max_grid_size: u32,
    pub concurrency: usize,
    pub request_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            canvas_size: config.render.canvas_size,
            max_grid_size: config.render.max_grid_size,
            concurrency: config.concurrency,
            request_timeout: config.request_timeout(),
        }
    }
}

fn source_error(e: SourceError) -> CollageError {
    match e {
        SourceError::Unauthorized(status) => {
            CollageError::Auth(format!("upstream rejected the access token (HTTP {})", status))
        }
        other => CollageError::Upstream(other.to_string()),
    }
}

pub struct CollagePipeline {
    items: ItemSource,
    fetcher: ImageFetcher,
    renderer: Arc<CellRenderer>,
    compositor: GridCompositor,
    store: Arc<dyn CollageStore>,
    settings: PipelineSettings,
}

impl CollagePipeline {
    pub fn new(
        items: ItemSource,
        fetcher: ImageFetcher,
        renderer: CellRenderer,
        compositor: GridCompositor,
        store: Arc<dyn CollageStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            items,
            fetcher,
            renderer: Arc::new(renderer),
            compositor,
            store,
            settings,
        }
    }

    pub fn store(&self) -> Arc<dyn CollageStore> {
        self.store.clone()
    }

    pub fn layout_for(&self, request: &CollageRequest) -> CollageResult<LayoutSpec> {
        if request.grid_size < 1 {
            return Err(CollageError::InvalidParameter(format!(
                "grid size must be positive, got {}",
                request.grid_size
            )));
        }
        if request.grid_size > i64::from(self.settings.max_grid_size) {
            return Err(CollageError::InvalidParameter(format!(
                "grid size {} exceeds the maximum of {}",
                request.grid_size, self.settings.max_grid_size
            )));
        }

        let layout = LayoutSpec::new(
            request.grid_size as u32,
            self.settings.canvas_size,
            request.show_labels,
        )?;
        self.compositor.check_canvas(&layout)?;

        Ok(layout)
    }

    /// Generate and store one collage. Parameter and credential problems are
    /// rejected before any network call; after that only an upstream
    /// authorization failure, a composition failure or the request timeout
    /// fail the request. Nothing is stored unless the whole grid was built.
    pub async fn run(
        &self,
        request: &CollageRequest,
        credential: Option<&str>,
    ) -> CollageResult<CollageOutput> {
        let layout = self.layout_for(request)?;
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CollageError::Auth("missing access token".to_string()))?;

        info!(
            "Generating {}x{} collage of top {} ({})",
            layout.grid_size, layout.grid_size, request.entity_type, request.time_range
        );
        let started = Instant::now();

        let timeout = self.settings.request_timeout;
        let (collage, label_rows, placeholder_count) =
            match tokio::time::timeout(timeout, self.generate(request, credential, layout)).await {
                Ok(result) => result?,
                Err(_) => {
                    error!("Collage generation timed out after {:?}", timeout);
                    return Err(CollageError::Timeout(timeout));
                }
            };

        let id = new_collage_id();
        self.store.save(&id, &collage.png)?;

        info!(
            "Collage {} ready in {:?} ({} placeholder cell(s))",
            id,
            started.elapsed(),
            placeholder_count
        );

        Ok(CollageOutput {
            id,
            collage,
            label_rows,
            placeholder_count,
        })
    }

    async fn generate(
        &self,
        request: &CollageRequest,
        credential: &str,
        layout: LayoutSpec,
    ) -> CollageResult<(Collage, Vec<Vec<String>>, usize)> {
        let items = self
            .items
            .collect(
                credential,
                request.entity_type,
                request.time_range,
                layout.tile_count(),
            )
            .await
            .map_err(source_error)?;

        let label_rows = label_rows(&items, layout.grid_size);
        let placeholder_count = items.iter().filter(|i| i.placeholder).count();

        let tiles = self.render_tiles(items, layout).await;

        let compositor = self.compositor;
        let collage = tokio::task::spawn_blocking(move || compositor.compose(&tiles, &layout))
            .await
            .map_err(|e| CollageError::Composition(format!("compositor task failed: {}", e)))??;

        Ok((collage, label_rows, placeholder_count))
    }

    /// Fetch and render every item concurrently, bounded by the configured
    /// concurrency, and wait for all of them. A rank whose task failed is
    /// rendered from the placeholder image instead.
    async fn render_tiles(&self, items: Vec<RankedItem>, layout: LayoutSpec) -> Vec<RenderedTile> {
        let total = items.len();
        let mut names: Vec<String> = items.iter().map(|i| i.display_name.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for item in items {
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let renderer = self.renderer.clone();

            tasks.spawn(async move {
                // Held until the tile is rendered
                let _permit = semaphore.acquire_owned().await;
                render_item(fetcher, renderer, item, layout).await
            });
        }

        let mut slots: Vec<Option<RenderedTile>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(tile)) if tile.owner_rank < total => {
                    let rank = tile.owner_rank;
                    slots[rank] = Some(tile);
                }
                Ok(_) => {}
                Err(e) => warn!("Tile task failed: {}", e),
            }
        }

        let mut tiles = Vec::with_capacity(total);
        for (rank, slot) in slots.into_iter().enumerate() {
            if let Some(tile) = slot {
                tiles.push(tile);
                continue;
            }

            warn!("No tile for item {}, rendering placeholder", rank);
            let fallback = render_fallback(
                self.renderer.clone(),
                self.fetcher.placeholder_for(rank),
                std::mem::take(&mut names[rank]),
                layout,
            )
            .await;
            tiles.extend(fallback);
        }

        tiles
    }
}

async fn render_item(
    fetcher: ImageFetcher,
    renderer: Arc<CellRenderer>,
    item: RankedItem,
    layout: LayoutSpec,
) -> Option<RenderedTile> {
    let render = if item.placeholder {
        tokio::task::spawn_blocking(move || renderer.render_placeholder(&item, &layout)).await
    } else {
        let resolved = fetcher.resolve(&item).await;
        tokio::task::spawn_blocking(move || {
            renderer.render(&resolved, Some(&item.display_name), &layout)
        })
        .await
    };

    render.ok()
}

/// Render the placeholder image for a rank whose task produced no tile.
async fn render_fallback(
    renderer: Arc<CellRenderer>,
    placeholder: ResolvedImage,
    name: String,
    layout: LayoutSpec,
) -> Option<RenderedTile> {
    let rank = placeholder.owner_rank;
    match tokio::task::spawn_blocking(move || renderer.render(&placeholder, Some(&name), &layout))
        .await
    {
        Ok(tile) => Some(tile),
        Err(e) => {
            warn!("Placeholder tile for item {} failed: {}", rank, e);
            None
        }
    }
}

fn label_rows(items: &[RankedItem], grid_size: u32) -> Vec<Vec<String>> {
    items
        .chunks(grid_size.max(1) as usize)
        .map(|row| row.iter().map(|i| i.display_name.clone()).collect())
        .collect()
}
