pub mod cell_renderer;
pub mod collage_pipeline;
pub mod collage_store;
pub mod collage_types;
pub mod config;
pub mod grid_compositor;
pub mod handlers_collage;
pub mod handlers_health;
pub mod image_fetcher;
pub mod item_source;
pub mod label;
pub mod upstream;
pub mod warp_helpers;
