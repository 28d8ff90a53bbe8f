//! Detection post-processing: scoring, non-maximum suppression, and
//! prototype-mask decoding.
//!
//! Raw candidates arrive in Inference space. This module filters and decodes
//! them there (the prototype tensor is aligned to Inference resolution), then
//! hands boxes and masks to the [`SpaceMap`](crate::space::SpaceMap) so the
//! returned detections are expressed in Cropped space.

use std::cmp::Ordering;

use anyhow::Result;
use image::{GrayImage, Luma, imageops::FilterType};
use log::warn;
use ndarray::{Array2, Array3, Axis};

use crate::classes::ClassLabel;
use crate::space::{AffineMap, CoordSpace, Extent, SpaceMap};
use otoseg_utils::DetectionSettings;

/// Axis-aligned bounding box, `x1 <= x2` and `y1 <= y2` after normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box from center-form coordinates `(cx, cy, w, h)`.
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Calculates the area of the bounding box.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Calculates the Intersection over Union (IoU) with another bounding box.
    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if intersection <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }

    /// Apply an affine map to both corners and re-normalize the ordering.
    pub fn transformed(&self, map: &AffineMap) -> Self {
        let (ax, ay) = map.apply((self.x1, self.y1));
        let (bx, by) = map.apply((self.x2, self.y2));
        Self {
            x1: ax.min(bx),
            y1: ay.min(by),
            x2: ax.max(bx),
            y2: ay.max(by),
        }
    }

    /// Clip the box into a pixel grid extent.
    pub fn clamped_to(&self, extent: Extent) -> Self {
        let w = extent.width as f32;
        let h = extent.height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// One raw candidate emitted by the segmentation backend, in Inference space.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    /// Center-form box `(cx, cy, w, h)` in Inference pixels.
    pub bbox_cxcywh: [f32; 4],
    /// Objectness score in `[0, 1]`.
    pub objectness: f32,
    /// Per-class scores; the confidence is `objectness * max(class_scores)`.
    pub class_scores: Vec<f32>,
    /// Coefficients combined with the prototype tensor to decode the mask.
    pub mask_coeffs: Vec<f32>,
}

/// The shared mask basis emitted once per inference call.
///
/// Owned by the postprocessor for the duration of one request; never
/// persisted across requests.
#[derive(Debug, Clone)]
pub struct MaskPrototypes {
    data: Array3<f32>,
}

impl MaskPrototypes {
    /// Wrap a `[count, height, width]` prototype tensor.
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn count(&self) -> usize {
        self.data.shape()[0]
    }

    /// Prototype raster resolution as `(width, height)`.
    pub fn resolution(&self) -> (usize, usize) {
        (self.data.shape()[2], self.data.shape()[1])
    }
}

/// Everything one inference call produced.
#[derive(Debug, Clone)]
pub struct RawPrediction {
    pub candidates: Vec<RawCandidate>,
    /// Absent for detect-only exports; detections then carry no masks.
    pub prototypes: Option<MaskPrototypes>,
}

/// A single finalized detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box in `space` coordinates.
    pub bbox: BoundingBox,
    /// Confidence score in `[0, 1]`.
    pub confidence: f32,
    /// Raw network class index.
    pub class_id: u32,
    /// Resolved class name (`class_<id>` for out-of-table indices).
    pub class_name: String,
    /// Binary mask (0/255) covering the same `space` grid as `bbox`, when
    /// mask decoding succeeded.
    pub mask: Option<GrayImage>,
    /// The coordinate space both `bbox` and `mask` are expressed in.
    pub space: CoordSpace,
}

struct ScoredCandidate {
    bbox: BoundingBox,
    confidence: f32,
    class_id: u32,
    index: usize,
}

/// Convert one inference call's raw output into Cropped-space detections.
///
/// Candidates are scored (`objectness * best class score`), filtered against
/// the low visualization threshold, passed through class-agnostic NMS, and
/// finally filtered with the caller's `conf_thres`. Survivors get their masks
/// decoded at Inference resolution and are then projected into Cropped space.
/// The output preserves NMS order (descending confidence).
///
/// A mask decode failure drops that candidate's mask only; the candidate is
/// still reported.
pub fn postprocess_prediction(
    prediction: &RawPrediction,
    map: &SpaceMap,
    settings: &DetectionSettings,
) -> Result<Vec<Detection>> {
    let settings = settings.sanitized();

    let mut scored: Vec<ScoredCandidate> = Vec::new();
    for (index, candidate) in prediction.candidates.iter().enumerate() {
        let (class_id, class_score) = best_class(&candidate.class_scores);
        let confidence = candidate.objectness * class_score;
        if !confidence.is_finite() || confidence < settings.vis_conf_thres {
            continue;
        }
        let [cx, cy, w, h] = candidate.bbox_cxcywh;
        let bbox = BoundingBox::from_cxcywh(cx, cy, w, h);
        if bbox.area() <= 0.0 {
            continue;
        }
        scored.push(ScoredCandidate {
            bbox,
            confidence,
            class_id,
            index,
        });
    }

    scored.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let kept = non_max_suppression(scored, settings.iou_thres);

    let to_cropped = map.transform(CoordSpace::Inference, CoordSpace::Cropped);
    let cropped = map.cropped_extent();

    let mut detections = Vec::with_capacity(kept.len());
    for candidate in kept {
        if candidate.confidence < settings.conf_thres {
            continue;
        }

        let label = ClassLabel::from_index(candidate.class_id);
        let raw = &prediction.candidates[candidate.index];

        let mask = match &prediction.prototypes {
            Some(prototypes) if !raw.mask_coeffs.is_empty() => {
                match decode_mask(
                    prototypes,
                    &raw.mask_coeffs,
                    &candidate.bbox,
                    map.inference_extent(),
                ) {
                    Ok(inference_mask) => match map.mask_to_cropped(&inference_mask) {
                        Ok(cropped_mask) => Some(cropped_mask),
                        Err(err) => {
                            warn!("dropping mask for candidate {}: {err}", candidate.index);
                            None
                        }
                    },
                    Err(err) => {
                        warn!("mask decode failed for candidate {}: {err}", candidate.index);
                        None
                    }
                }
            }
            _ => None,
        };

        detections.push(Detection {
            bbox: candidate.bbox.transformed(&to_cropped).clamped_to(cropped),
            confidence: candidate.confidence,
            class_id: candidate.class_id,
            class_name: label.name().into_owned(),
            mask,
            space: CoordSpace::Cropped,
        });
    }

    Ok(detections)
}

/// Pick the best-scoring class. Candidates with an empty class list score 1.0
/// for class 0, so single-class exports without explicit class columns work.
fn best_class(class_scores: &[f32]) -> (u32, f32) {
    if class_scores.is_empty() {
        return (0, 1.0);
    }
    let mut best = 0usize;
    let mut best_score = class_scores[0];
    for (idx, &score) in class_scores.iter().enumerate().skip(1) {
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    (best as u32, best_score)
}

/// Class-agnostic greedy NMS over candidates sorted by descending confidence.
/// A kept candidate suppresses any later one whose IoU reaches `iou_thres`.
fn non_max_suppression(candidates: Vec<ScoredCandidate>, iou_thres: f32) -> Vec<ScoredCandidate> {
    let mut result: Vec<ScoredCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = result
            .iter()
            .any(|kept| candidate.bbox.iou(&kept.bbox) >= iou_thres);
        if !suppressed {
            result.push(candidate);
        }
    }
    result
}

/// Decode one candidate's mask from the shared prototype tensor.
///
/// Linear combination of the prototypes with the candidate's coefficients,
/// sigmoid activation, crop to the candidate's Inference-space box, bilinear
/// upsample to Inference resolution, threshold at 0.5. The box must still be
/// expressed in Inference space: the prototype raster is aligned to the
/// letterboxed network input, not to the crop.
pub fn decode_mask(
    prototypes: &MaskPrototypes,
    coefficients: &[f32],
    bbox: &BoundingBox,
    inference: Extent,
) -> Result<GrayImage> {
    anyhow::ensure!(
        coefficients.len() == prototypes.count(),
        "expected {} mask coefficients, got {}",
        prototypes.count(),
        coefficients.len()
    );
    let (proto_w, proto_h) = prototypes.resolution();
    anyhow::ensure!(proto_w > 0 && proto_h > 0, "prototype tensor is empty");
    anyhow::ensure!(
        coefficients.iter().all(|c| c.is_finite()),
        "mask coefficients contain non-finite values"
    );

    let mut combined = Array2::<f32>::zeros((proto_h, proto_w));
    for (k, &coefficient) in coefficients.iter().enumerate() {
        combined.scaled_add(coefficient, &prototypes.data.index_axis(Axis(0), k));
    }
    combined.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));

    // Zero everything outside the candidate's box, in prototype coordinates.
    let sx = proto_w as f32 / inference.width as f32;
    let sy = proto_h as f32 / inference.height as f32;
    let bx1 = bbox.x1 * sx;
    let by1 = bbox.y1 * sy;
    let bx2 = bbox.x2 * sx;
    let by2 = bbox.y2 * sy;
    for ((row, col), value) in combined.indexed_iter_mut() {
        let x = col as f32 + 0.5;
        let y = row as f32 + 0.5;
        if x < bx1 || x > bx2 || y < by1 || y > by2 {
            *value = 0.0;
        }
    }

    let (data, offset) = combined.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    let raster = image::ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(
        proto_w as u32,
        proto_h as u32,
        data,
    )
    .ok_or_else(|| anyhow::anyhow!("prototype raster has inconsistent dimensions"))?;

    let upsampled = if (proto_w as u32, proto_h as u32) == (inference.width, inference.height) {
        raster
    } else {
        image::imageops::resize(
            &raster,
            inference.width,
            inference.height,
            FilterType::Triangle,
        )
    };

    let mut mask = GrayImage::new(inference.width, inference.height);
    for (dst, src) in mask.pixels_mut().zip(upsampled.pixels()) {
        dst[0] = if src[0] > 0.5 { 255 } else { 0 };
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn identity_map(size: u32) -> SpaceMap {
        SpaceMap::new(Extent::new(size, size), None, Extent::new(size, size)).expect("map")
    }

    fn candidate(cx: f32, cy: f32, w: f32, h: f32, objectness: f32) -> RawCandidate {
        RawCandidate {
            bbox_cxcywh: [cx, cy, w, h],
            objectness,
            class_scores: vec![1.0],
            mask_coeffs: Vec::new(),
        }
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::from_cxcywh(5.0, 5.0, 10.0, 10.0);
        let b = BoundingBox::from_cxcywh(50.0, 50.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn transform_normalizes_corner_ordering() {
        let flipped = AffineMap {
            sx: -1.0,
            sy: -1.0,
            tx: 0.0,
            ty: 0.0,
        };
        let bbox = BoundingBox {
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
        };
        let mapped = bbox.transformed(&flipped);
        assert!(mapped.x1 <= mapped.x2);
        assert!(mapped.y1 <= mapped.y2);
    }

    #[test]
    fn nms_suppresses_overlap_at_threshold() {
        // IoU of the pair is exactly 0.6: 10x10 boxes offset by 2.5 vertically.
        let prediction = RawPrediction {
            candidates: vec![
                candidate(5.0, 5.0, 10.0, 10.0, 0.9),
                candidate(5.0, 7.5, 10.0, 10.0, 0.7),
            ],
            prototypes: None,
        };
        let map = identity_map(64);
        let settings = DetectionSettings {
            conf_thres: 0.25,
            iou_thres: 0.45,
            vis_conf_thres: 0.001,
        };

        let detections = postprocess_prediction(&prediction, &map, &settings).unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn nms_keeps_overlap_below_threshold() {
        let prediction = RawPrediction {
            candidates: vec![
                candidate(5.0, 5.0, 10.0, 10.0, 0.9),
                candidate(5.0, 7.5, 10.0, 10.0, 0.7),
            ],
            prototypes: None,
        };
        let map = identity_map(64);
        let settings = DetectionSettings {
            conf_thres: 0.25,
            iou_thres: 0.65,
            vis_conf_thres: 0.001,
        };

        let detections = postprocess_prediction(&prediction, &map, &settings).unwrap();
        assert_eq!(detections.len(), 2);
        assert!(detections[0].confidence >= detections[1].confidence);
    }

    #[test]
    fn conf_filter_applies_after_nms() {
        // The 0.2 candidate survives the visualization threshold and takes
        // part in NMS, but is filtered from the final list.
        let prediction = RawPrediction {
            candidates: vec![
                candidate(5.0, 5.0, 10.0, 10.0, 0.9),
                candidate(40.0, 40.0, 10.0, 10.0, 0.2),
            ],
            prototypes: None,
        };
        let map = identity_map(64);
        let detections =
            postprocess_prediction(&prediction, &map, &DetectionSettings::default()).unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn out_of_table_class_gets_synthetic_name() {
        let mut raw = candidate(5.0, 5.0, 10.0, 10.0, 0.9);
        raw.class_scores = vec![0.0; 31];
        raw.class_scores[30] = 1.0;
        let prediction = RawPrediction {
            candidates: vec![raw],
            prototypes: None,
        };
        let map = identity_map(64);
        let detections =
            postprocess_prediction(&prediction, &map, &DetectionSettings::default()).unwrap();
        assert_eq!(detections[0].class_id, 30);
        assert_eq!(detections[0].class_name, "class_30");
    }

    #[test]
    fn decode_produces_binary_mask_inside_box() {
        // One 8x8 prototype matching the inference resolution: strongly
        // positive in the top-left quadrant, strongly negative elsewhere.
        let mut data = Array3::<f32>::from_elem((1, 8, 8), -10.0);
        for y in 0..4 {
            for x in 0..4 {
                data[(0, y, x)] = 10.0;
            }
        }
        let prototypes = MaskPrototypes::new(data);
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 8.0,
            y2: 8.0,
        };

        let mask = decode_mask(&prototypes, &[1.0], &bbox, Extent::new(8, 8)).unwrap();
        assert_eq!(mask.get_pixel(1, 1)[0], 255);
        assert_eq!(mask.get_pixel(6, 6)[0], 0);
        assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn decode_zeroes_pixels_outside_box() {
        let data = Array3::<f32>::from_elem((1, 8, 8), 10.0);
        let prototypes = MaskPrototypes::new(data);
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 4.0,
            y2: 8.0,
        };

        let mask = decode_mask(&prototypes, &[1.0], &bbox, Extent::new(8, 8)).unwrap();
        assert_eq!(mask.get_pixel(1, 4)[0], 255);
        assert_eq!(mask.get_pixel(7, 4)[0], 0);
    }

    #[test]
    fn coefficient_mismatch_drops_mask_but_keeps_candidate() {
        let mut raw = candidate(5.0, 5.0, 10.0, 10.0, 0.9);
        raw.mask_coeffs = vec![1.0, 2.0]; // prototypes carry only one basis mask
        let prediction = RawPrediction {
            candidates: vec![raw],
            prototypes: Some(MaskPrototypes::new(Array3::zeros((1, 8, 8)))),
        };
        let map = identity_map(8);
        let detections =
            postprocess_prediction(&prediction, &map, &DetectionSettings::default()).unwrap();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].mask.is_none());
    }

    #[test]
    fn empty_class_list_defaults_to_class_zero() {
        assert_eq!(best_class(&[]), (0, 1.0));
        assert_eq!(best_class(&[0.1, 0.8, 0.3]), (1, 0.8));
    }
}
