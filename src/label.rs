//! Cell labels: font sizing policy, text measurement and the bottom band
//! that gets burned into each tile.
//!
//! Overflow is handled by fixed-width clipping. A label wider than
//! `cell_size - 2 * padding` is drawn at full size and every glyph pixel past
//! that width is discarded; text is never compressed or ellipsized.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rusttype::{point, Font, PositionedGlyph, Scale};

use crate::collage_types::{CollageError, CollageResult};

/// Embedded font data - DejaVu Sans Bold
const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

const BAND_COLOR: Rgba<u8> = Rgba([0, 0, 0, 160]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Font size as a pure function of the cell size:
/// `max(min_size, base_size + scale * ln(cell_size))`.
///
/// Logarithmic growth keeps labels legible on dense grids without letting
/// them swamp the artwork on sparse ones. Padding is `padding_ratio` of the
/// font size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontSizePolicy {
    pub min_size: f32,
    pub base_size: f32,
    pub scale: f32,
    pub padding_ratio: f32,
}

impl Default for FontSizePolicy {
    fn default() -> Self {
        Self {
            min_size: 10.0,
            base_size: -14.0,
            scale: 6.0,
            padding_ratio: 0.4,
        }
    }
}

impl FontSizePolicy {
    pub fn font_size(&self, cell_size: u32) -> f32 {
        let cell = cell_size.max(1) as f32;
        (self.base_size + self.scale * cell.ln()).max(self.min_size)
    }

    pub fn padding(&self, font_size: f32) -> f32 {
        font_size * self.padding_ratio
    }
}

/// Measured size of a line of text at some font size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextMetrics {
    pub width: u32,
    pub height: u32,
}

/// Geometry of one label at base (non-supersampled) resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelPlan {
    pub font_size: f32,
    pub padding: u32,
    pub measured_width: u32,
    /// Measured width clamped to the room the cell leaves for text
    pub text_width: u32,
    pub band_width: u32,
    pub band_height: u32,
    pub clipped: bool,
}

pub struct LabelRenderer {
    font: Font<'static>,
    policy: FontSizePolicy,
    supersample: u32,
}

impl LabelRenderer {
    /// `supersample` is the internal resolution multiplier used for
    /// antialiasing; 1 draws directly at cell resolution.
    pub fn new(policy: FontSizePolicy, supersample: u32) -> CollageResult<Self> {
        let font = Font::try_from_bytes(FONT_DATA)
            .ok_or_else(|| CollageError::Composition("embedded label font is invalid".to_string()))?;

        Ok(Self {
            font,
            policy,
            supersample: supersample.max(1),
        })
    }

    pub fn policy(&self) -> &FontSizePolicy {
        &self.policy
    }

    /// Lay the text out on an unbounded surface and report the extent of the
    /// rasterized glyphs (kerning included).
    pub fn measure(&self, text: &str, font_size: f32) -> TextMetrics {
        let scale = Scale::uniform(font_size);
        let v_metrics = self.font.v_metrics(scale);
        let height = (v_metrics.ascent - v_metrics.descent).ceil().max(0.0) as u32;

        let bounds = self
            .layout(text, font_size, 0.0, v_metrics.ascent)
            .iter()
            .filter_map(|g| g.pixel_bounding_box())
            .fold(None, |acc: Option<(i32, i32)>, bb| match acc {
                Some((min_x, max_x)) => Some((min_x.min(bb.min.x), max_x.max(bb.max.x))),
                None => Some((bb.min.x, bb.max.x)),
            });

        let width = match bounds {
            Some((min_x, max_x)) => (max_x - min_x.min(0)).max(0) as u32,
            None => 0,
        };

        TextMetrics { width, height }
    }

    /// Size, pad, measure and clamp `text` for a cell of `cell_size`.
    /// Returns `None` when the cell leaves no room for any text.
    pub fn plan(&self, text: &str, cell_size: u32) -> Option<LabelPlan> {
        if text.trim().is_empty() {
            return None;
        }

        let font_size = self.policy.font_size(cell_size);
        let padding = self.policy.padding(font_size).round() as u32;
        let max_text_width = cell_size.saturating_sub(2 * padding);
        if max_text_width == 0 {
            return None;
        }

        let metrics = self.measure(text, font_size);
        let clipped = metrics.width > max_text_width;
        let text_width = metrics.width.min(max_text_width);

        Some(LabelPlan {
            font_size,
            padding,
            measured_width: metrics.width,
            text_width,
            band_width: (text_width + 2 * padding).min(cell_size),
            band_height: (metrics.height + 2 * padding).min(cell_size),
            clipped,
        })
    }

    /// Burn `text` into the bottom-left corner of a square tile. The tile's
    /// dimensions never change.
    pub fn draw(&self, tile: &mut RgbaImage, text: &str) -> Option<LabelPlan> {
        let cell_size = tile.width().min(tile.height());
        let plan = self.plan(text, cell_size)?;
        if plan.band_width == 0 || plan.band_height == 0 {
            return None;
        }

        let band = self.render_band(text, &plan);
        let y = i64::from(tile.height() - plan.band_height);
        imageops::overlay(tile, &band, 0, y);

        Some(plan)
    }

    /// Draw the band at `supersample` times the plan's geometry, then scale
    /// it back down to the plan's size.
    fn render_band(&self, text: &str, plan: &LabelPlan) -> RgbaImage {
        let k = self.supersample;
        let font_size = plan.font_size * k as f32;
        let padding = (plan.padding * k) as f32;
        let clip_right = (plan.padding + plan.text_width) * k;

        let mut band = RgbaImage::from_pixel(plan.band_width * k, plan.band_height * k, BAND_COLOR);
        let ascent = self.font.v_metrics(Scale::uniform(font_size)).ascent;

        for glyph in self.layout(text, font_size, padding, padding + ascent) {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let x = bb.min.x + gx as i32;
                let y = bb.min.y + gy as i32;
                if x < 0 || y < 0 {
                    return;
                }
                let (x, y) = (x as u32, y as u32);
                if x >= clip_right || x >= band.width() || y >= band.height() {
                    return;
                }
                let pixel = band.get_pixel_mut(x, y);
                *pixel = blend(*pixel, TEXT_COLOR, coverage);
            });
        }

        if k == 1 {
            band
        } else {
            imageops::resize(&band, plan.band_width, plan.band_height, FilterType::Lanczos3)
        }
    }

    fn layout(&self, text: &str, font_size: f32, x: f32, baseline: f32) -> Vec<PositionedGlyph<'static>> {
        self.font
            .layout(text, Scale::uniform(font_size), point(x, baseline))
            .collect()
    }
}

fn blend(under: Rgba<u8>, over: Rgba<u8>, coverage: f32) -> Rgba<u8> {
    let t = coverage.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    Rgba([
        mix(under[0], over[0]),
        mix(under[1], over[1]),
        mix(under[2], over[2]),
        mix(under[3], over[3]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn renderer(supersample: u32) -> LabelRenderer {
        LabelRenderer::new(FontSizePolicy::default(), supersample).unwrap()
    }

    #[test]
    fn test_font_size_is_monotonic_in_cell_size() {
        let policy = FontSizePolicy::default();
        let mut previous = 0.0;
        for cell_size in [1, 8, 32, 64, 90, 128, 180, 300, 450, 900, 2000] {
            let size = policy.font_size(cell_size);
            assert!(
                size >= previous,
                "font size shrank at cell {}: {} < {}",
                cell_size,
                size,
                previous
            );
            previous = size;
        }
    }

    #[test]
    fn test_font_size_has_floor_and_grows_sublinearly() {
        let policy = FontSizePolicy::default();
        assert_eq!(policy.font_size(1), policy.min_size);
        assert_eq!(policy.font_size(0), policy.min_size);

        let small = policy.font_size(300);
        let large = policy.font_size(900);
        assert!(large > small);
        assert!(large < small * 3.0);
        assert!((policy.padding(20.0) - 8.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_measure_grows_with_text() {
        let renderer = renderer(1);
        let short = renderer.measure("Air", 20.0);
        let long = renderer.measure("Air Supply and Friends", 20.0);
        assert!(short.width > 0);
        assert!(long.width > short.width);
        assert_eq!(short.height, long.height);
        assert_eq!(renderer.measure("", 20.0).width, 0);
    }

    #[test]
    fn test_plan_fits_short_label() {
        let renderer = renderer(1);
        let plan = renderer.plan("Björk", 300).unwrap();
        assert!(!plan.clipped);
        assert_eq!(plan.text_width, plan.measured_width);
        assert!(plan.band_width <= 300);
        assert!(plan.band_height < 300);
    }

    #[test]
    fn test_plan_clamps_long_label() {
        let renderer = renderer(1);
        let text = "An Extremely Long Name That Cannot Possibly Fit Inside One Cell";
        let plan = renderer.plan(text, 120).unwrap();
        assert!(plan.clipped);
        assert!(plan.measured_width > plan.text_width);
        assert_eq!(plan.text_width, 120 - 2 * plan.padding);
        assert_eq!(plan.band_width, 120);
    }

    #[test]
    fn test_plan_skips_blank_text_and_tiny_cells() {
        let renderer = renderer(1);
        assert!(renderer.plan("   ", 300).is_none());
        // Padding alone is wider than a 6px cell
        assert!(renderer.plan("Hi", 6).is_none());
    }

    #[test]
    fn test_draw_keeps_tile_size_and_darkens_band() {
        for supersample in [1, 2, 3] {
            let renderer = renderer(supersample);
            let text = "A label far too long to fit in such a small square cell";
            let mut tile = RgbaImage::from_pixel(100, 100, WHITE);

            let plan = renderer.draw(&mut tile, text).unwrap();

            assert_eq!(tile.dimensions(), (100, 100));
            assert!(plan.clipped);
            // Top of the cell is untouched, bottom-left corner sits in the band
            assert_eq!(tile.get_pixel(50, 0), &WHITE);
            let corner = tile.get_pixel(0, 99);
            assert!(corner[0] < 255, "band missing at supersample {}", supersample);
        }
    }

    #[test]
    fn test_draw_is_deterministic() {
        let renderer = renderer(2);
        let mut first = RgbaImage::from_pixel(150, 150, Rgba([30, 60, 90, 255]));
        let mut second = first.clone();

        renderer.draw(&mut first, "Stereolab");
        renderer.draw(&mut second, "Stereolab");

        assert_eq!(first, second);
    }

    #[test]
    fn test_blend_endpoints() {
        let under = Rgba([0, 0, 0, 160]);
        assert_eq!(blend(under, TEXT_COLOR, 0.0), under);
        assert_eq!(blend(under, TEXT_COLOR, 1.0), TEXT_COLOR);
    }
}
