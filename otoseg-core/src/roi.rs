//! Circular ROI localization.
//!
//! Otoscope photographs show the scene through a circular optical viewport
//! surrounded by a dark frame. The locator binarizes the photograph with an
//! adaptive (Otsu) threshold, takes the largest external contour, fits its
//! minimal enclosing circle, and derives a fixed-width crop window centered on
//! the circle. Localization failure is a normal outcome, not an error: the
//! pipeline then processes the full frame.

use image::RgbImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use log::debug;

use crate::space::CropRect;
use otoseg_utils::RoiSettings;

/// Outcome of circular viewport localization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiDetection {
    /// Whether a usable viewport circle was found.
    pub success: bool,
    /// Circle center in Original-space pixels. `(0, 0)` when no contour exists.
    pub center: (f32, f32),
    /// Circle radius in pixels. `0` when no contour exists.
    pub radius: f32,
    /// The adaptive threshold the binarization settled on.
    pub otsu_threshold: u8,
    /// Crop window derived from the circle. `None` unless `success` is true.
    pub crop_rect: Option<CropRect>,
}

impl RoiDetection {
    fn failure(center: (f32, f32), radius: f32, otsu_threshold: u8) -> Self {
        Self {
            success: false,
            center,
            radius,
            otsu_threshold,
            crop_rect: None,
        }
    }
}

/// Locate the circular viewport in an Original-space photograph.
///
/// Pure function of the input image; never fails on a non-empty image. The
/// crop window spans the image's full height and `target_crop_width` pixels
/// horizontally, centered on the circle's x coordinate and clamped to the
/// image bounds.
pub fn locate_roi(image: &RgbImage, settings: &RoiSettings) -> RoiDetection {
    let (width, height) = image.dimensions();
    debug_assert!(width > 0 && height > 0, "caller must reject empty images");

    let gray = image::imageops::grayscale(image);
    let level = otsu_level(&gray);
    let binary = threshold(&gray, level, ThresholdType::Binary);

    // A frame that binarizes to a single class has no optical boundary to
    // find; treat it like the no-contour case instead of fitting a circle to
    // the image border.
    let foreground = binary.pixels().filter(|p| p[0] > 0).count();
    if foreground == 0 || foreground == (width as usize * height as usize) {
        return RoiDetection::failure((0.0, 0.0), 0.0, level);
    }

    let contours = find_contours::<i32>(&binary);
    let largest = contours
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .max_by(|a, b| {
            shoelace_area(&a.points)
                .total_cmp(&shoelace_area(&b.points))
        });
    let Some(largest) = largest else {
        return RoiDetection::failure((0.0, 0.0), 0.0, level);
    };

    let points: Vec<(f32, f32)> = largest
        .points
        .iter()
        .map(|p| (p.x as f32, p.y as f32))
        .collect();
    let (center, radius) = min_enclosing_circle(&points);
    debug!(
        "viewport candidate: center ({:.1}, {:.1}), radius {:.1}, otsu {}",
        center.0, center.1, radius, level
    );

    if radius < settings.min_radius {
        return RoiDetection::failure(center, radius, level);
    }

    let half = settings.half_target_width() as i64;
    let cx = center.0.round() as i64;
    let x1 = (cx - half).clamp(0, width as i64) as u32;
    let x2 = (cx + half).clamp(0, width as i64) as u32;
    if x1 >= x2 {
        return RoiDetection::failure(center, radius, level);
    }

    RoiDetection {
        success: true,
        center,
        radius,
        otsu_threshold: level,
        crop_rect: Some(CropRect::new(x1, 0, x2, height)),
    }
}

/// Extract the crop window from the photograph. The rectangle must lie within
/// the image, which holds for every rect produced by [`locate_roi`].
pub fn crop_to_rect(image: &RgbImage, rect: CropRect) -> RgbImage {
    image::imageops::crop_imm(image, rect.x1, rect.y1, rect.width(), rect.height()).to_image()
}

/// Unsigned polygon area via the shoelace formula.
pub(crate) fn shoelace_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        doubled += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (doubled.abs() as f64) / 2.0
}

/// Minimal enclosing circle of a point set, by incremental construction.
///
/// Returns center and radius. A single point yields a zero-radius circle.
fn min_enclosing_circle(points: &[(f32, f32)]) -> ((f32, f32), f32) {
    if points.is_empty() {
        return ((0.0, 0.0), 0.0);
    }

    // Randomized insertion order keeps the incremental construction close to
    // linear; contour points arrive ordered along the boundary, which is the
    // pathological order for this algorithm. A fixed xorshift seed keeps the
    // result reproducible.
    let mut pts: Vec<(f64, f64)> = points.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    for i in (1..pts.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        pts.swap(i, (state % (i as u64 + 1)) as usize);
    }

    let mut circle = Circle {
        center: pts[0],
        radius: 0.0,
    };
    for i in 1..pts.len() {
        if circle.contains(pts[i]) {
            continue;
        }
        circle = Circle {
            center: pts[i],
            radius: 0.0,
        };
        for j in 0..i {
            if circle.contains(pts[j]) {
                continue;
            }
            circle = Circle::through_two(pts[i], pts[j]);
            for k in 0..j {
                if !circle.contains(pts[k]) {
                    circle = Circle::through_three(pts[i], pts[j], pts[k]);
                }
            }
        }
    }

    (
        (circle.center.0 as f32, circle.center.1 as f32),
        circle.radius as f32,
    )
}

#[derive(Clone, Copy)]
struct Circle {
    center: (f64, f64),
    radius: f64,
}

impl Circle {
    const EPS: f64 = 1e-7;

    fn contains(&self, p: (f64, f64)) -> bool {
        let dx = p.0 - self.center.0;
        let dy = p.1 - self.center.1;
        (dx * dx + dy * dy).sqrt() <= self.radius + Self::EPS
    }

    fn through_two(a: (f64, f64), b: (f64, f64)) -> Self {
        let center = ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0);
        let dx = a.0 - b.0;
        let dy = a.1 - b.1;
        Self {
            center,
            radius: (dx * dx + dy * dy).sqrt() / 2.0,
        }
    }

    fn through_three(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Self {
        let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
        if d.abs() < Self::EPS {
            // Collinear points: the widest pair determines the circle.
            let ab = Self::through_two(a, b);
            let ac = Self::through_two(a, c);
            let bc = Self::through_two(b, c);
            let mut widest = ab;
            if ac.radius > widest.radius {
                widest = ac;
            }
            if bc.radius > widest.radius {
                widest = bc;
            }
            return widest;
        }

        let a2 = a.0 * a.0 + a.1 * a.1;
        let b2 = b.0 * b.0 + b.1 * b.1;
        let c2 = c.0 * c.0 + c.1 * c.1;
        let ux = (a2 * (b.1 - c.1) + b2 * (c.1 - a.1) + c2 * (a.1 - b.1)) / d;
        let uy = (a2 * (c.0 - b.0) + b2 * (a.0 - c.0) + c2 * (b.0 - a.0)) / d;
        let dx = a.0 - ux;
        let dy = a.1 - uy;
        Self {
            center: (ux, uy),
            radius: (dx * dx + dy * dy).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otoseg_utils::fixtures::{flat_frame, scope_frame};

    #[test]
    fn clean_viewport_yields_expected_crop_window() {
        let image = scope_frame(1600, 1080, (600.0, 540.0), 300.0);
        let roi = locate_roi(&image, &RoiSettings::default());

        assert!(roi.success);
        assert!((roi.center.0 - 600.0).abs() <= 1.5, "center {:?}", roi.center);
        assert!((roi.center.1 - 540.0).abs() <= 1.5, "center {:?}", roi.center);
        assert!((roi.radius - 300.0).abs() <= 2.0, "radius {}", roi.radius);
        assert_eq!(roi.crop_rect, Some(CropRect::new(60, 0, 1140, 1080)));
    }

    #[test]
    fn small_viewport_is_rejected_with_measurements() {
        let image = scope_frame(1600, 1080, (600.0, 540.0), 50.0);
        let roi = locate_roi(&image, &RoiSettings::default());

        assert!(!roi.success);
        assert!(roi.crop_rect.is_none());
        assert!((roi.radius - 50.0).abs() <= 2.0, "radius {}", roi.radius);
    }

    #[test]
    fn uniform_frames_fail_without_panicking() {
        for value in [0u8, 255u8] {
            let image = flat_frame(320, 240, value);
            let roi = locate_roi(&image, &RoiSettings::default());
            assert!(!roi.success);
            assert!(roi.crop_rect.is_none());
            assert_eq!(roi.radius, 0.0);
        }
    }

    #[test]
    fn crop_window_clamps_at_image_border() {
        // Viewport close to the left edge: the window cannot reach 540 px to
        // the left of the center, so it clamps to x = 0.
        let image = scope_frame(1200, 1080, (260.0, 540.0), 250.0);
        let roi = locate_roi(&image, &RoiSettings::default());

        assert!(roi.success);
        let rect = roi.crop_rect.expect("crop window");
        assert_eq!(rect.x1, 0);
        assert_eq!(rect.x2, 800);
        assert_eq!(rect.y1, 0);
        assert_eq!(rect.y2, 1080);
    }

    #[test]
    fn crop_extracts_requested_window() {
        let image = scope_frame(1600, 1080, (600.0, 540.0), 300.0);
        let cropped = crop_to_rect(&image, CropRect::new(60, 0, 1140, 1080));
        assert_eq!(cropped.dimensions(), (1080, 1080));
        // The viewport center shifts left by the crop offset.
        assert_eq!(cropped.get_pixel(540, 540), image.get_pixel(600, 540));
    }

    #[test]
    fn enclosing_circle_of_square_corners() {
        let points = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let ((cx, cy), r) = min_enclosing_circle(&points);
        assert!((cx - 5.0).abs() < 1e-3);
        assert!((cy - 5.0).abs() < 1e-3);
        assert!((r - (50.0f32).sqrt()).abs() < 1e-3);
    }

    #[test]
    fn enclosing_circle_handles_collinear_points() {
        let points = [(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)];
        let ((cx, cy), r) = min_enclosing_circle(&points);
        assert!((cx - 5.0).abs() < 1e-3);
        assert!(cy.abs() < 1e-3);
        assert!((r - 5.0).abs() < 1e-3);
    }

    #[test]
    fn enclosing_circle_of_single_point_is_degenerate() {
        let ((cx, cy), r) = min_enclosing_circle(&[(3.0, 4.0)]);
        assert_eq!((cx, cy), (3.0, 4.0));
        assert_eq!(r, 0.0);
    }
}
