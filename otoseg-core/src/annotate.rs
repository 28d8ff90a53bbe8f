//! Annotation rendering for visual QA of segmentation results.
//!
//! A detection's mask is smoothed, traced, resampled into evenly spaced
//! nodes, and drawn as a stylized node-and-link outline with a translucent
//! label at the contour centroid. Detections without a mask fall back to a
//! plain bounding-box overlay.
//!
//! The canvas handed to [`Annotator::render`] must be in the same coordinate
//! space as the detections being drawn.

use ab_glyph::{FontVec, PxScale};
use anyhow::Result;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_polygon_mut, draw_text_mut, text_size,
};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::close;
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::postprocess::Detection;
use crate::roi::shoelace_area;
use otoseg_utils::{AnnotationSettings, blend_weighted, class_color};

/// Contours smaller than this many square pixels are not worth outlining.
const MIN_CONTOUR_AREA: f64 = 10.0;

/// Draws detection overlays onto review images.
pub struct Annotator {
    style: AnnotationSettings,
    font: Option<FontVec>,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("style", &self.style)
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl Annotator {
    /// Create an annotator with the given style. Labels are drawn as bare
    /// background plates until a font is supplied via [`Self::with_font_bytes`].
    pub fn new(style: AnnotationSettings) -> Self {
        Self {
            style: style.sanitized(),
            font: None,
        }
    }

    /// Attach a TTF/OTF font for label text.
    pub fn with_font_bytes(mut self, bytes: Vec<u8>) -> Result<Self> {
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("failed to parse label font: {e}"))?;
        self.font = Some(font);
        Ok(self)
    }

    /// Render all drawable detections onto a copy of `image`.
    pub fn render(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.clone();
        for detection in detections {
            if detection.confidence < self.style.draw_conf_thres {
                continue;
            }
            let color = class_color(detection.class_id).to_pixel();
            match &detection.mask {
                Some(mask) => self.draw_mask_annotation(&mut canvas, detection, mask, color),
                None => self.draw_box_annotation(&mut canvas, detection, color),
            }
        }
        canvas
    }

    fn draw_mask_annotation(
        &self,
        canvas: &mut RgbImage,
        detection: &Detection,
        mask: &GrayImage,
        color: Rgb<u8>,
    ) {
        let (cw, ch) = canvas.dimensions();
        let aligned: GrayImage = if mask.dimensions() == (cw, ch) {
            mask.clone()
        } else {
            // Tolerant draw path: anchor the mask at the grid origin and let
            // the copy clip, matching how undersized masks were historically
            // visualized.
            let mut full = GrayImage::new(cw, ch);
            image::imageops::replace(&mut full, mask, 0, 0);
            full
        };

        let smoothed = smooth_mask(&aligned);
        let contours = find_contours::<i32>(&smoothed);
        let Some(largest) = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .max_by(|a, b| shoelace_area(&a.points).total_cmp(&shoelace_area(&b.points)))
        else {
            return;
        };
        if shoelace_area(&largest.points) < MIN_CONTOUR_AREA {
            return;
        }

        let polyline: Vec<(f32, f32)> = largest
            .points
            .iter()
            .map(|p| (p.x as f32, p.y as f32))
            .collect();
        let nodes = resample_polyline(&polyline, self.style.node_step_px as f32);
        if nodes.len() < 2 {
            return;
        }

        if self.style.glow {
            let thickness = ((self.style.line_thickness as f32 * self.style.glow_thickness_mult)
                .round() as u32)
                .max(1);
            let radius =
                ((self.style.node_radius as f32 * self.style.glow_radius_mult).round() as u32).max(1);
            *canvas = draw_outline_pass(
                canvas,
                &nodes,
                color,
                thickness,
                radius,
                self.style.glow_strength,
            );
        }
        *canvas = draw_outline_pass(
            canvas,
            &nodes,
            color,
            self.style.line_thickness,
            self.style.node_radius,
            self.style.outline_alpha,
        );

        let anchor = contour_centroid(&largest.points).unwrap_or_else(|| {
            let min_x = largest.points.iter().map(|p| p.x).min().unwrap_or(0);
            let min_y = largest.points.iter().map(|p| p.y).min().unwrap_or(0);
            (min_x, min_y)
        });
        let label = format!(
            "{} {:.2}%",
            detection.class_name,
            detection.confidence * 100.0
        );
        self.draw_label(canvas, &label, anchor, color);
    }

    fn draw_box_annotation(&self, canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
        let (cw, ch) = canvas.dimensions();
        if cw == 0 || ch == 0 {
            return;
        }
        let max_x = (cw - 1) as f32;
        let max_y = (ch - 1) as f32;
        let x1 = detection.bbox.x1.clamp(0.0, max_x).round() as i32;
        let y1 = detection.bbox.y1.clamp(0.0, max_y).round() as i32;
        let x2 = detection.bbox.x2.clamp(0.0, max_x).round() as i32;
        let y2 = detection.bbox.y2.clamp(0.0, max_y).round() as i32;
        let width = (x2 - x1).max(1) as u32;
        let height = (y2 - y1).max(1) as u32;

        // Two nested hollow rects stand in for a 2 px stroke.
        draw_hollow_rect_mut(canvas, Rect::at(x1, y1).of_size(width, height), color);
        if width > 2 && height > 2 {
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x1 + 1, y1 + 1).of_size(width - 2, height - 2),
                color,
            );
        }

        let label = format!(
            "{} {:.2}%",
            detection.class_name,
            detection.confidence * 100.0
        );
        self.draw_label(canvas, &label, (x1, y1), color);
    }

    fn draw_label(&self, canvas: &mut RgbImage, text: &str, anchor: (i32, i32), color: Rgb<u8>) {
        let (cw, ch) = canvas.dimensions();
        let pad = self.style.label_pad as i32;
        let scale = PxScale::from(self.style.label_px);

        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, text),
            // Width estimate when no font is available to measure with.
            None => (
                (text.len() as f32 * self.style.label_px * 0.55) as u32,
                self.style.label_px as u32,
            ),
        };

        let x1 = anchor.0.max(0);
        let y1 = (anchor.1 - text_h as i32 - pad).max(0);
        let plate_w = (text_w as i32 + pad * 2).min(cw as i32 - x1).max(0) as u32;
        let plate_h = (text_h as i32 + pad * 2).min(ch as i32 - y1).max(0) as u32;
        if plate_w == 0 || plate_h == 0 {
            return;
        }

        let mut overlay = canvas.clone();
        draw_filled_rect_mut(
            &mut overlay,
            Rect::at(x1, y1).of_size(plate_w, plate_h),
            Rgb([0, 0, 0]),
        );
        *canvas = blend_weighted(canvas, &overlay, self.style.label_bg_alpha);

        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x1 + pad, y1 + pad, scale, font, text);
        }
    }
}

/// One outline layer: links between consecutive nodes (closing the loop) plus
/// filled node markers, composited onto the base at the given opacity.
fn draw_outline_pass(
    base: &RgbImage,
    nodes: &[(f32, f32)],
    color: Rgb<u8>,
    thickness: u32,
    node_radius: u32,
    alpha: f32,
) -> RgbImage {
    let mut overlay = base.clone();
    for pair in nodes.windows(2) {
        draw_thick_segment(&mut overlay, pair[0], pair[1], thickness, color);
    }
    if let (Some(&first), Some(&last)) = (nodes.first(), nodes.last()) {
        draw_thick_segment(&mut overlay, last, first, thickness, color);
    }
    for &(x, y) in nodes {
        draw_filled_circle_mut(
            &mut overlay,
            (x.round() as i32, y.round() as i32),
            node_radius as i32,
            color,
        );
    }
    blend_weighted(base, &overlay, alpha)
}

/// Draw a line segment with the given stroke width as a filled quad.
fn draw_thick_segment(
    canvas: &mut RgbImage,
    a: (f32, f32),
    b: (f32, f32),
    thickness: u32,
    color: Rgb<u8>,
) {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let len = (dx * dx + dy * dy).sqrt();
    if len < 0.5 {
        return;
    }
    if thickness <= 1 {
        draw_line_segment_mut(canvas, a, b, color);
        return;
    }

    let half = thickness as f32 / 2.0;
    let nx = -dy / len * half;
    let ny = dx / len * half;
    let quad = [
        Point::new((a.0 + nx).round() as i32, (a.1 + ny).round() as i32),
        Point::new((b.0 + nx).round() as i32, (b.1 + ny).round() as i32),
        Point::new((b.0 - nx).round() as i32, (b.1 - ny).round() as i32),
        Point::new((a.0 - nx).round() as i32, (a.1 - ny).round() as i32),
    ];
    if quad[0] == quad[3] {
        draw_line_segment_mut(canvas, a, b, color);
        return;
    }
    draw_polygon_mut(canvas, &quad, color);
}

/// Remove rasterization jags from a binary mask: morphological close with a
/// round structuring element scaled to the image, Gaussian smoothing, then
/// re-binarization.
fn smooth_mask(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let k = (((width.min(height)) as f32 * 0.008) as u32 | 1).max(3);
    let radius = (k / 2).min(255) as u8;
    let closed = close(mask, Norm::L2, radius);

    // OpenCV's kernel-size-to-sigma rule, so the smoothing matches what the
    // blur would do with an explicit k x k kernel.
    let sigma = (0.3 * ((k - 1) as f32 * 0.5 - 1.0) + 0.8).max(0.1);
    let blurred = gaussian_blur_f32(&closed, sigma);

    let mut binary = GrayImage::new(width, height);
    for (dst, src) in binary.pixels_mut().zip(blurred.pixels()) {
        dst[0] = if src[0] > 127 { 255 } else { 0 };
    }
    binary
}

/// Resample a polyline at a fixed arc-length step.
///
/// Builds a fresh node list from the immutable input; the source polyline is
/// never modified. The first input point is always the first node.
pub fn resample_polyline(points: &[(f32, f32)], step: f32) -> Vec<(f32, f32)> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let step = step.max(2.0);

    let mut nodes = vec![points[0]];
    let mut carried = 0.0f32;
    for pair in points.windows(2) {
        let (mut ax, mut ay) = pair[0];
        let (bx, by) = pair[1];
        let mut seg = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
        if seg <= f32::EPSILON {
            continue;
        }
        while carried + seg >= step {
            let t = (step - carried) / seg;
            let px = ax + (bx - ax) * t;
            let py = ay + (by - ay) * t;
            nodes.push((px, py));
            ax = px;
            ay = py;
            seg = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
            carried = 0.0;
        }
        carried += seg;
    }
    nodes
}

/// Centroid of a closed contour from its polygon moments. `None` when the
/// contour has (near-)zero area.
fn contour_centroid(points: &[Point<i32>]) -> Option<(i32, i32)> {
    if points.len() < 3 {
        return None;
    }
    let mut area2 = 0.0f64;
    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        let cross = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
        area2 += cross;
        cx += (p.x + q.x) as f64 * cross;
        cy += (p.y + q.y) as f64 * cross;
    }
    if area2.abs() < 1e-6 {
        return None;
    }
    let factor = 1.0 / (3.0 * area2);
    Some(((cx * factor).round() as i32, (cy * factor).round() as i32))
}
