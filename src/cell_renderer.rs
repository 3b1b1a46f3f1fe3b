use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::{debug, warn};

use crate::collage_types::{LayoutSpec, RankedItem, RenderedTile, ResolvedImage};
use crate::grid_compositor::BACKGROUND;
use crate::image_fetcher::PLACEHOLDER_IMAGE_COLOR;
use crate::label::LabelRenderer;

/// Fill for padded cells that have no upstream item behind them. Darker than
/// the missing-image grey so "no data" reads differently from "no artwork".
pub const EMPTY_SLOT_COLOR: Rgba<u8> = Rgba([0x2B, 0x2B, 0x2B, 255]);

pub struct CellRenderer {
    labels: LabelRenderer,
}

impl CellRenderer {
    pub fn new(labels: LabelRenderer) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &LabelRenderer {
        &self.labels
    }

    /// Cover-fit the image into a `cell_size` square and burn in the label.
    /// Bytes that fail to decode render as the missing-image fill.
    pub fn render(
        &self,
        image: &ResolvedImage,
        label: Option<&str>,
        layout: &LayoutSpec,
    ) -> RenderedTile {
        let cell = layout.cell_size;

        let mut pixels = match image::load_from_memory(&image.bytes) {
            Ok(img) => img
                .resize_to_fill(cell, cell, FilterType::Lanczos3)
                .to_rgba8(),
            Err(e) => {
                warn!(
                    "Failed to decode image for item {}, using fill: {}",
                    image.owner_rank, e
                );
                RgbaImage::from_pixel(cell, cell, PLACEHOLDER_IMAGE_COLOR)
            }
        };

        // resize_to_fill lands on the exact size; guard the tile invariant anyway
        if pixels.dimensions() != (cell, cell) {
            pixels = imageops::resize(&pixels, cell, cell, FilterType::Lanczos3);
        }

        // Transparent artwork shows the collage background, and the label
        // band is blended over opaque pixels only
        let mut tile = RgbaImage::from_pixel(cell, cell, BACKGROUND);
        imageops::overlay(&mut tile, &pixels, 0, 0);

        self.apply_label(&mut tile, label, layout, image.owner_rank);

        RenderedTile {
            owner_rank: image.owner_rank,
            pixels: tile,
        }
    }

    /// Tile for a padded slot: flat fill plus the item's (sentinel) label.
    pub fn render_placeholder(&self, item: &RankedItem, layout: &LayoutSpec) -> RenderedTile {
        let mut pixels = RgbaImage::from_pixel(layout.cell_size, layout.cell_size, EMPTY_SLOT_COLOR);
        self.apply_label(&mut pixels, Some(&item.display_name), layout, item.rank);

        RenderedTile {
            owner_rank: item.rank,
            pixels,
        }
    }

    fn apply_label(&self, pixels: &mut RgbaImage, label: Option<&str>, layout: &LayoutSpec, rank: usize) {
        if !layout.show_labels {
            return;
        }
        let Some(text) = label.filter(|t| !t.trim().is_empty()) else {
            return;
        };

        match self.labels.draw(pixels, text) {
            Some(plan) if plan.clipped => debug!(
                "Label for item {} clipped from {}px to {}px",
                rank, plan.measured_width, plan.text_width
            ),
            Some(_) => {}
            None => debug!("Cell too small for label of item {}", rank),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::FontSizePolicy;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn renderer() -> CellRenderer {
        CellRenderer::new(LabelRenderer::new(FontSizePolicy::default(), 2).unwrap())
    }

    fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, color))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn resolved(rank: usize, bytes: Vec<u8>) -> ResolvedImage {
        ResolvedImage {
            owner_rank: rank,
            bytes,
            was_placeholder: false,
        }
    }

    #[test]
    fn test_cover_fit_produces_exact_square() {
        let renderer = renderer();
        let layout = LayoutSpec::new(3, 300, false).unwrap();

        for (w, h) in [(640, 640), (300, 100), (50, 400), (1, 1), (1000, 7)] {
            let tile = renderer.render(&resolved(0, png_bytes(w, h, Rgba([200, 10, 10, 255]))), None, &layout);
            assert_eq!(tile.pixels.dimensions(), (100, 100), "source {}x{}", w, h);
        }
    }

    #[test]
    fn test_cover_fit_crops_instead_of_letterboxing() {
        let renderer = renderer();
        let layout = LayoutSpec::new(1, 60, false).unwrap();

        // Wide image: left third red, middle blue, right third red
        let mut wide = RgbaImage::from_pixel(300, 100, Rgba([255, 0, 0, 255]));
        for x in 100..200 {
            for y in 0..100 {
                wide.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(wide)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();

        let tile = renderer.render(&resolved(0, buffer.into_inner()), None, &layout);

        // The centre square is kept and fills the whole cell
        let center = tile.pixels.get_pixel(30, 30);
        assert!(center[2] > 200 && center[0] < 50);
        let top = tile.pixels.get_pixel(30, 0);
        assert!(top[2] > 200, "no letterbox bars expected");
    }

    #[test]
    fn test_undecodable_bytes_render_fill() {
        let renderer = renderer();
        let layout = LayoutSpec::new(2, 200, false).unwrap();

        let tile = renderer.render(&resolved(3, b"<html>nope</html>".to_vec()), None, &layout);

        assert_eq!(tile.owner_rank, 3);
        assert_eq!(tile.pixels.dimensions(), (100, 100));
        assert_eq!(tile.pixels.get_pixel(50, 50), &PLACEHOLDER_IMAGE_COLOR);
    }

    #[test]
    fn test_labels_respect_show_labels() {
        let renderer = renderer();
        let bytes = png_bytes(10, 10, Rgba([255, 255, 255, 255]));

        let hidden = LayoutSpec::new(1, 200, false).unwrap();
        let tile = renderer.render(&resolved(0, bytes.clone()), Some("Label"), &hidden);
        assert_eq!(tile.pixels.get_pixel(0, 199), &Rgba([255, 255, 255, 255]));

        let shown = LayoutSpec::new(1, 200, true).unwrap();
        let tile = renderer.render(&resolved(0, bytes), Some("Label"), &shown);
        assert_ne!(tile.pixels.get_pixel(0, 199), &Rgba([255, 255, 255, 255]));
        assert_eq!(tile.pixels.dimensions(), (200, 200));
    }

    #[test]
    fn test_placeholder_slot_is_distinct_from_missing_image() {
        let renderer = renderer();
        let layout = LayoutSpec::new(2, 400, true).unwrap();

        let slot = renderer.render_placeholder(&RankedItem::placeholder(2), &layout);
        let missing = renderer.render(
            &resolved(1, png_bytes(64, 64, PLACEHOLDER_IMAGE_COLOR)),
            Some("Real Artist"),
            &layout,
        );

        assert_eq!(slot.owner_rank, 2);
        assert_eq!(slot.pixels.dimensions(), (200, 200));
        assert_eq!(slot.pixels.get_pixel(100, 10), &EMPTY_SLOT_COLOR);
        let grey = missing.pixels.get_pixel(100, 10);
        for channel in 0..3 {
            assert!(grey[channel].abs_diff(PLACEHOLDER_IMAGE_COLOR[channel]) <= 1);
        }
        assert_ne!(EMPTY_SLOT_COLOR, PLACEHOLDER_IMAGE_COLOR);
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = renderer();
        let layout = LayoutSpec::new(3, 450, true).unwrap();
        let bytes = png_bytes(320, 200, Rgba([12, 140, 90, 255]));

        let first = renderer.render(&resolved(4, bytes.clone()), Some("Khruangbin"), &layout);
        let second = renderer.render(&resolved(4, bytes), Some("Khruangbin"), &layout);

        assert_eq!(first.pixels, second.pixels);
    }

    #[test]
    fn test_transparent_artwork_is_flattened_onto_background() {
        let renderer = renderer();
        let layout = LayoutSpec::new(1, 100, true).unwrap();

        let tile = renderer.render(
            &resolved(0, png_bytes(64, 64, Rgba([0, 0, 0, 0]))),
            Some("Ghost"),
            &layout,
        );

        assert_eq!(tile.pixels.get_pixel(50, 10), &BACKGROUND);
        assert!(tile.pixels.pixels().all(|p| p[3] == 255));
    }
}
