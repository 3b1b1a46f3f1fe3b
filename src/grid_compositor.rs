use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba, RgbaImage};
use log::{info, warn};
use std::io::Cursor;

use crate::collage_types::{Collage, CollageError, CollageResult, LayoutSpec, RenderedTile};

/// Canvas colour for cells that never received a tile.
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 8192 x 8192
pub const DEFAULT_MAX_CANVAS_PIXELS: u64 = 67_108_864;

#[derive(Debug, Clone, Copy)]
pub struct GridCompositor {
    max_canvas_pixels: u64,
}

impl Default for GridCompositor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CANVAS_PIXELS)
    }
}

impl GridCompositor {
    pub fn new(max_canvas_pixels: u64) -> Self {
        Self { max_canvas_pixels }
    }

    /// Place every tile at its row-major cell and encode the canvas as PNG.
    /// Cells without a tile stay white.
    pub fn compose(&self, tiles: &[RenderedTile], layout: &LayoutSpec) -> CollageResult<Collage> {
        let canvas = self.compose_canvas(tiles, layout)?;
        let (width, height) = canvas.dimensions();

        let tiles_placed = tiles
            .iter()
            .filter(|tile| fits(tile, layout))
            .count();

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas)
            .to_rgb8()
            .write_to(&mut buffer, ImageFormat::Png)?;
        let png = buffer.into_inner();

        info!(
            "Composed {}x{} collage ({} of {} cells, {} bytes)",
            width,
            height,
            tiles_placed,
            layout.tile_count(),
            png.len()
        );

        Ok(Collage {
            width,
            height,
            grid_size: layout.grid_size,
            cell_size: layout.cell_size,
            tiles_placed,
            png,
        })
    }

    /// Side length of the canvas `layout` needs, or a `Composition` error if
    /// it overflows or exceeds the pixel limit.
    pub fn check_canvas(&self, layout: &LayoutSpec) -> CollageResult<u32> {
        let side = layout.canvas_side().ok_or_else(|| {
            CollageError::Composition(format!(
                "canvas side overflows for {} cells of {}px",
                layout.grid_size, layout.cell_size
            ))
        })?;

        let pixels = u64::from(side) * u64::from(side);
        if pixels > self.max_canvas_pixels {
            return Err(CollageError::Composition(format!(
                "canvas of {}x{} exceeds the {} pixel limit",
                side, side, self.max_canvas_pixels
            )));
        }

        Ok(side)
    }

    pub fn compose_canvas(&self, tiles: &[RenderedTile], layout: &LayoutSpec) -> CollageResult<RgbaImage> {
        let side = self.check_canvas(layout)?;

        if tiles.len() < layout.tile_count() {
            warn!(
                "Composing {} tiles into a grid of {}, remaining cells stay blank",
                tiles.len(),
                layout.tile_count()
            );
        }

        let mut canvas: RgbaImage = ImageBuffer::from_pixel(side, side, BACKGROUND);

        for tile in tiles {
            if !fits(tile, layout) {
                warn!(
                    "Skipping tile {} ({}x{}) that does not fit a {}x{} grid of {}px cells",
                    tile.owner_rank,
                    tile.pixels.width(),
                    tile.pixels.height(),
                    layout.grid_size,
                    layout.grid_size,
                    layout.cell_size
                );
                continue;
            }

            let (x_offset, y_offset) = layout.cell_origin(tile.owner_rank);
            image::imageops::overlay(
                &mut canvas,
                &tile.pixels,
                i64::from(x_offset),
                i64::from(y_offset),
            );
        }

        Ok(canvas)
    }
}

fn fits(tile: &RenderedTile, layout: &LayoutSpec) -> bool {
    tile.owner_rank < layout.tile_count()
        && tile.pixels.dimensions() == (layout.cell_size, layout.cell_size)
}
