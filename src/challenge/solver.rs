//! Slider-puzzle solving from pixels.
//!
//! The solver never looks at page structure: it screenshots the challenge
//! container, crops the configured piece and slot regions, normalizes both to
//! edge maps, and exhaustively scans for the offset where the piece fits.
//! Edges rather than raw pixels, because the provider jitters colors subtly
//! between challenge instances; edge geometry stays put.

use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

use crate::challenge::ChallengeSurface;
use crate::core::config::PuzzleRegions;
use crate::core::error::HarvestError;
use crate::core::types::{PuzzleGeometry, Rect};

/// Image comparison strategy behind the exhaustive scan. Swappable so a
/// faster correlation method can replace the scan without touching the state
/// machine.
pub trait TemplateMatcher: Send + Sync {
    /// Map a grayscale crop into the domain scores are computed in.
    fn normalize(&self, img: &GrayImage) -> GrayImage;

    /// Distance between the piece and the background crop at `(dx, dy)`.
    /// Lower is better. Both images must already be normalized.
    fn distance(&self, piece: &GrayImage, background: &GrayImage, dx: u32, dy: u32) -> f64;
}

/// Default matcher: contrast stretch followed by 3×3 Sobel edge magnitude,
/// scored by mean absolute grayscale difference.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeMatcher;

impl TemplateMatcher for EdgeMatcher {
    fn normalize(&self, img: &GrayImage) -> GrayImage {
        sobel_magnitude(&contrast_stretch(img))
    }

    fn distance(&self, piece: &GrayImage, background: &GrayImage, dx: u32, dy: u32) -> f64 {
        let (pw, ph) = piece.dimensions();
        let mut sum = 0u64;
        for y in 0..ph {
            for x in 0..pw {
                let a = piece.get_pixel(x, y).0[0] as i32;
                let b = background.get_pixel(x + dx, y + dy).0[0] as i32;
                sum += (a - b).unsigned_abs() as u64;
            }
        }
        sum as f64 / (pw as u64 * ph as u64) as f64
    }
}

pub struct PuzzleSolver<M: TemplateMatcher = EdgeMatcher> {
    matcher: M,
    regions: PuzzleRegions,
}

impl PuzzleSolver<EdgeMatcher> {
    pub fn new(regions: PuzzleRegions) -> Self {
        Self::with_matcher(regions, EdgeMatcher)
    }
}

impl<M: TemplateMatcher> PuzzleSolver<M> {
    pub fn with_matcher(regions: PuzzleRegions, matcher: M) -> Self {
        Self { matcher, regions }
    }

    /// Screenshot the challenge container and locate the piece's target
    /// offset. The `x` component of the returned offset is the horizontal
    /// drag distance — the targeted challenge type only needs horizontal
    /// correction.
    pub async fn solve(
        &self,
        surface: &dyn ChallengeSurface,
    ) -> Result<PuzzleGeometry, HarvestError> {
        let png = surface.capture_region(self.regions.container).await?;
        let decoded = image::load_from_memory(&png)
            .map_err(|e| HarvestError::Geometry(format!("container screenshot undecodable: {e}")))?;
        self.solve_image(&decoded)
    }

    /// Pure-pixel solve over an already-captured container image.
    pub fn solve_image(&self, container: &DynamicImage) -> Result<PuzzleGeometry, HarvestError> {
        let gray = container.to_luma8();
        let piece_raw = crop(&gray, self.regions.piece)?;
        let background_raw = crop(&gray, self.regions.background)?;

        let (pw, ph) = piece_raw.dimensions();
        let (bw, bh) = background_raw.dimensions();
        if pw > bw || ph > bh {
            return Err(HarvestError::Geometry(format!(
                "piece {pw}x{ph} larger than background {bw}x{bh}"
            )));
        }

        let piece = self.matcher.normalize(&piece_raw);
        let background = self.matcher.normalize(&background_raw);

        // Exhaustive scan, row-major; strict less-than keeps the first-found
        // minimum on ties.
        let mut best_offset = (0u32, 0u32);
        let mut best_score = f64::INFINITY;
        for dy in 0..=(bh - ph) {
            for dx in 0..=(bw - pw) {
                let score = self.matcher.distance(&piece, &background, dx, dy);
                if score < best_score {
                    best_score = score;
                    best_offset = (dx, dy);
                }
            }
        }

        debug!(
            dx = best_offset.0,
            dy = best_offset.1,
            score = best_score,
            "puzzle offset located"
        );
        Ok(PuzzleGeometry {
            piece_region: self.regions.piece,
            background_region: self.regions.background,
            best_offset: (best_offset.0 as i64, best_offset.1 as i64),
            match_score: best_score,
        })
    }
}

/// Crop `rect` out of `img`, failing with a geometry error when the
/// configured region no longer fits the captured container — the layout has
/// changed and needs recalibration, which is a solve failure, not a crash.
fn crop(img: &GrayImage, rect: Rect) -> Result<GrayImage, HarvestError> {
    let (w, h) = img.dimensions();
    if !rect.fits_within(w, h) {
        return Err(HarvestError::Geometry(format!(
            "region {}x{}+{}+{} outside container {}x{}",
            rect.width, rect.height, rect.x, rect.y, w, h
        )));
    }
    Ok(image::imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Linear contrast stretch to the full 0–255 range. Flat images pass through.
fn contrast_stretch(img: &GrayImage) -> GrayImage {
    let (lo, hi) = img
        .pixels()
        .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi <= lo {
        return img.clone();
    }
    let range = (hi - lo) as f32;
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y).0[0];
        Luma([(((v - lo) as f32 / range) * 255.0).round() as u8])
    })
}

/// 3×3 Sobel gradient magnitude, clamped to u8. The one-pixel border stays
/// zero.
fn sobel_magnitude(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let p = |dx: i32, dy: i32| -> i32 {
                img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0] as i32
            };
            let gx = p(1, -1) + 2 * p(1, 0) + p(1, 1) - p(-1, -1) - 2 * p(-1, 0) - p(-1, 1);
            let gy = p(-1, 1) + 2 * p(0, 1) + p(1, 1) - p(-1, -1) - 2 * p(0, -1) - p(1, -1);
            let mag = ((gx * gx + gy * gy) as f64).sqrt().min(255.0) as u8;
            out.put_pixel(x, y, Luma([mag]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Rect;

    /// Small calibrated layout for synthetic containers.
    fn test_regions() -> PuzzleRegions {
        PuzzleRegions {
            container: Rect::new(0, 0, 200, 120),
            piece: Rect::new(4, 40, 24, 24),
            background: Rect::new(40, 30, 150, 70),
        }
    }

    /// Checkerboard tile used as the piece pattern — strong, unambiguous
    /// edges.
    fn stamp_pattern(img: &mut GrayImage, ox: u32, oy: u32, size: u32) {
        for y in 0..size {
            for x in 0..size {
                let v = if (x / 4 + y / 4) % 2 == 0 { 230 } else { 20 };
                img.put_pixel(ox + x, oy + y, Luma([v]));
            }
        }
    }

    /// Container with the piece pattern stamped at the piece region and at a
    /// known offset inside the background region.
    fn synthetic_container(regions: &PuzzleRegions, dx: u32, dy: u32) -> GrayImage {
        let c = regions.container;
        let mut img = GrayImage::from_pixel(c.width, c.height, Luma([128]));
        stamp_pattern(&mut img, regions.piece.x, regions.piece.y, regions.piece.width);
        stamp_pattern(
            &mut img,
            regions.background.x + dx,
            regions.background.y + dy,
            regions.piece.width,
        );
        img
    }

    #[test]
    fn recovers_injected_offset_without_noise() {
        let regions = test_regions();
        let solver = PuzzleSolver::new(regions);
        for (dx, dy) in [(0u32, 0u32), (37, 12), (126, 46), (63, 0)] {
            let container = DynamicImage::ImageLuma8(synthetic_container(&regions, dx, dy));
            let geom = solver.solve_image(&container).unwrap();
            assert!(
                (geom.best_offset.0 - dx as i64).abs() <= 2,
                "dx: expected {dx}, got {}",
                geom.best_offset.0
            );
            assert!(
                (geom.best_offset.1 - dy as i64).abs() <= 2,
                "dy: expected {dy}, got {}",
                geom.best_offset.1
            );
        }
    }

    #[test]
    fn survives_pixel_noise() {
        let regions = test_regions();
        let solver = PuzzleSolver::new(regions);
        let mut img = synthetic_container(&regions, 80, 20);

        // Deterministic xorshift noise, ±12 gray levels.
        let mut state = 0x9e3779b9_u32;
        for p in img.pixels_mut() {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let delta = (state % 25) as i32 - 12;
            p.0[0] = (p.0[0] as i32 + delta).clamp(0, 255) as u8;
        }

        // Graceful degradation: must not fail, and with mild noise the strong
        // checkerboard edges still dominate.
        let geom = solver
            .solve_image(&DynamicImage::ImageLuma8(img))
            .expect("noise must not break the solve");
        assert!((geom.best_offset.0 - 80).abs() <= 4);
    }

    #[test]
    fn uniform_field_ties_break_to_first_offset() {
        let regions = test_regions();
        let solver = PuzzleSolver::new(regions);
        let flat = GrayImage::from_pixel(
            regions.container.width,
            regions.container.height,
            Luma([77]),
        );
        let geom = solver.solve_image(&DynamicImage::ImageLuma8(flat)).unwrap();
        assert_eq!(geom.best_offset, (0, 0));
    }

    #[test]
    fn out_of_bounds_region_is_a_geometry_error() {
        let mut regions = test_regions();
        regions.background = Rect::new(150, 100, 200, 100); // overruns the container
        let solver = PuzzleSolver::new(regions);
        let container = DynamicImage::ImageLuma8(GrayImage::new(200, 120));
        match solver.solve_image(&container) {
            Err(HarvestError::Geometry(_)) => {}
            other => panic!("expected geometry error, got {other:?}"),
        }
    }

    #[test]
    fn piece_larger_than_background_is_a_geometry_error() {
        let regions = PuzzleRegions {
            container: Rect::new(0, 0, 100, 100),
            piece: Rect::new(0, 0, 60, 60),
            background: Rect::new(60, 60, 40, 40),
        };
        let solver = PuzzleSolver::new(regions);
        let container = DynamicImage::ImageLuma8(GrayImage::new(100, 100));
        assert!(matches!(
            solver.solve_image(&container),
            Err(HarvestError::Geometry(_))
        ));
    }

    #[test]
    fn undecodable_screenshot_is_a_geometry_error() {
        let err = image::load_from_memory(b"definitely not a png").unwrap_err();
        // Mirrors the mapping in `solve`.
        let mapped = HarvestError::Geometry(format!("container screenshot undecodable: {err}"));
        assert!(matches!(mapped, HarvestError::Geometry(_)));
    }

    #[test]
    fn contrast_stretch_expands_range_and_keeps_flats() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([100]));
        img.put_pixel(0, 0, Luma([110]));
        let stretched = contrast_stretch(&img);
        assert_eq!(stretched.get_pixel(0, 0).0[0], 255);
        assert_eq!(stretched.get_pixel(5, 5).0[0], 0);

        let flat = GrayImage::from_pixel(4, 4, Luma([42]));
        assert_eq!(contrast_stretch(&flat), flat);
    }

    #[test]
    fn sobel_highlights_edges_only() {
        // Vertical step edge down the middle.
        let img = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 0 } else { 255 }]));
        let edges = sobel_magnitude(&img);
        assert!(edges.get_pixel(8, 8).0[0] > 200, "edge not emphasized");
        assert_eq!(edges.get_pixel(3, 8).0[0], 0, "flat area not quiet");
    }
}
