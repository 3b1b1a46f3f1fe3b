use log::{error, info};
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use warp::Filter;

use top_collage::cell_renderer::CellRenderer;
use top_collage::collage_pipeline::{CollagePipeline, PipelineSettings};
use top_collage::collage_store::{CollageStore, DirectoryCollageStore, MemoryCollageStore};
use top_collage::config::Config;
use top_collage::grid_compositor::GridCompositor;
use top_collage::handlers_collage::build_collage_routes;
use top_collage::handlers_health::build_health_routes;
use top_collage::image_fetcher::{load_placeholder, HttpImageTransport, ImageFetcher};
use top_collage::item_source::ItemSource;
use top_collage::label::{FontSizePolicy, LabelRenderer};
use top_collage::upstream::HttpTopItemsSource;
use top_collage::warp_helpers::{cors, handle_rejection};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    info!("Starting top-collage server on {}", addr);
    info!("Upstream API: {}", config.upstream.api_base_url);
    info!(
        "Canvas {}px, grid up to {}x{}, {} concurrent tile tasks",
        config.render.canvas_size,
        config.render.max_grid_size,
        config.render.max_grid_size,
        config.concurrency
    );

    // Check if port is available BEFORE initializing services
    if !is_port_available(addr) {
        error!(
            "Port {} is already in use. Stop the other instance or set TOP_COLLAGE_PORT.",
            config.port
        );
        return Err(format!("Port {} is already in use", config.port).into());
    }

    let store = initialize_store(&config)?;
    start_retention_task(store.clone(), &config);

    let pipeline = Arc::new(initialize_pipeline(&config, store)?);
    info!("Collage pipeline initialized");

    let routes = build_health_routes()
        .or(build_collage_routes(pipeline))
        .with(cors())
        .with(warp::log("top_collage"))
        .recover(handle_rejection);

    info!("Server started successfully, listening on http://{}", addr);

    warp::serve(routes).run(addr).await;

    Ok(())
}

fn is_port_available(addr: SocketAddr) -> bool {
    TcpListener::bind(addr).is_ok()
}

fn initialize_store(config: &Config) -> Result<Arc<dyn CollageStore>, Box<dyn std::error::Error>> {
    match &config.output_dir {
        Some(dir) => {
            info!("Collages are written to {}", dir);
            Ok(Arc::new(DirectoryCollageStore::new(PathBuf::from(dir))?))
        }
        None => {
            info!("Collages are kept in memory");
            Ok(Arc::new(MemoryCollageStore::new()))
        }
    }
}

fn initialize_pipeline(
    config: &Config,
    store: Arc<dyn CollageStore>,
) -> Result<CollagePipeline, Box<dyn std::error::Error>> {
    let upstream = Arc::new(HttpTopItemsSource::new(
        &config.upstream.api_base_url,
        config.http_timeout(),
    ));
    let items = ItemSource::new(upstream, config.upstream.page_size, config.upstream.retries);

    let placeholder = load_placeholder(config.render.placeholder_path.as_deref().map(Path::new))?;
    let transport = Arc::new(HttpImageTransport::new(
        config.http_timeout(),
        config.render.max_image_bytes,
    ));
    let fetcher = ImageFetcher::new(transport, placeholder, config.render.image_retries);

    let labels = LabelRenderer::new(FontSizePolicy::default(), config.render.label_supersample)?;
    let renderer = CellRenderer::new(labels);

    Ok(CollagePipeline::new(
        items,
        fetcher,
        renderer,
        GridCompositor::default(),
        store,
        PipelineSettings::from_config(config),
    ))
}

fn start_retention_task(store: Arc<dyn CollageStore>, config: &Config) {
    let retention = config.retention();
    // Sweep a few times per retention period, at most once a minute
    let period = (retention / 4).max(std::time::Duration::from_secs(60));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match store.purge_older_than(retention) {
                Ok(0) => {}
                Ok(removed) => info!("Purged {} expired collage(s)", removed),
                Err(e) => error!("Collage purge failed: {}", e),
            }
        }
    });
}
