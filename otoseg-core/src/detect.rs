use std::{borrow::Cow, path::Path};

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use log::{Level, debug};

use crate::backmap::detections_to_original;
use crate::model::SegmentationBackend;
use crate::postprocess::{Detection, postprocess_prediction};
use crate::preprocess::preprocess_image;
use crate::roi::{crop_to_rect, locate_roi};
use crate::space::{CropRect, Extent, SpaceMap};
use otoseg_utils::{
    CoordinateKind, DetectionSettings, InferenceDimensions, MaskPlacement, PipelineSettings,
    RoiSettings, load_image, timing_guard,
};

/// Per-request options mirrored from the surrounding API layer.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Minimum confidence for a detection to be reported.
    pub conf_thres: f32,
    /// IoU threshold for non-maximum suppression.
    pub iou_thres: f32,
    /// Coordinate space the caller wants detections expressed in.
    pub coordinates: CoordinateKind,
    /// Whether to include the ROI report in the result.
    pub include_roi: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        let detection = DetectionSettings::default();
        Self {
            conf_thres: detection.conf_thres,
            iou_thres: detection.iou_thres,
            coordinates: CoordinateKind::default(),
            include_roi: true,
        }
    }
}

/// ROI localization report surfaced alongside the detections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiReport {
    /// Whether a usable viewport circle was found.
    pub success: bool,
    /// Circle center in Original-space pixels.
    pub center: (f32, f32),
    /// Circle radius in pixels.
    pub radius: f32,
    /// The adaptive binarization threshold the locator settled on.
    pub otsu_threshold: u8,
    /// Crop window, absent when localization failed.
    pub crop_rect: Option<CropRect>,
    /// Extent of the source photograph.
    pub original_extent: Extent,
    /// Extent of the crop window (equals `original_extent` on failure).
    pub cropped_extent: Extent,
}

/// Result of analyzing one photograph.
#[derive(Debug)]
pub struct Analysis {
    /// Detections ordered by descending confidence.
    pub detections: Vec<Detection>,
    /// The coordinate space the detections are expressed in.
    pub coordinates: CoordinateKind,
    /// ROI report, present when the caller asked for it.
    pub roi: Option<RoiReport>,
}

/// The full geometric pipeline around an injected segmentation backend.
///
/// The backend handle is supplied at construction, owned by the hosting
/// layer's composition root, and never mutated afterwards. The analyzer keeps
/// no per-request state, so one instance can serve concurrent requests.
#[derive(Debug)]
pub struct ScopeAnalyzer {
    backend: Box<dyn SegmentationBackend>,
    roi: RoiSettings,
    inference: InferenceDimensions,
    detection: DetectionSettings,
    mask_placement: MaskPlacement,
}

impl ScopeAnalyzer {
    /// Construct an analyzer from a backend handle and pipeline settings.
    pub fn new(backend: Box<dyn SegmentationBackend>, settings: &PipelineSettings) -> Self {
        Self {
            backend,
            roi: settings.roi,
            inference: settings.inference,
            detection: settings.detection.sanitized(),
            mask_placement: settings.mask_placement,
        }
    }

    /// Request options seeded from the analyzer's configured thresholds.
    pub fn default_options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            conf_thres: self.detection.conf_thres,
            iou_thres: self.detection.iou_thres,
            coordinates: CoordinateKind::default(),
            include_roi: true,
        }
    }

    /// Analyze an image file on disk.
    pub fn analyze_path<P: AsRef<Path>>(
        &self,
        path: P,
        options: &AnalyzeOptions,
    ) -> Result<Analysis> {
        let image = load_image(path)?;
        self.analyze(&image, options)
    }

    /// Analyze a decoded photograph.
    ///
    /// Fails fast on malformed (zero-size) input; ROI localization failure is
    /// not an error and degrades to full-frame processing.
    pub fn analyze(&self, image: &DynamicImage, options: &AnalyzeOptions) -> Result<Analysis> {
        self.analyze_rgb(&image.to_rgb8(), options)
    }

    /// Analyze an RGB photograph. See [`Self::analyze`].
    pub fn analyze_rgb(&self, image: &RgbImage, options: &AnalyzeOptions) -> Result<Analysis> {
        let _guard = timing_guard("otoseg_core::analyze", Level::Debug);
        let (width, height) = image.dimensions();
        anyhow::ensure!(
            width > 0 && height > 0,
            "input image has zero size ({width}x{height})"
        );

        let roi = {
            let _guard = timing_guard("otoseg_core::locate_roi", Level::Debug);
            locate_roi(image, &self.roi)
        };
        let crop_rect = if roi.success { roi.crop_rect } else { None };
        debug!(
            "roi success={} radius={:.1} crop={:?}",
            roi.success, roi.radius, crop_rect
        );

        let working: Cow<'_, RgbImage> = match crop_rect {
            Some(rect) => Cow::Owned(crop_to_rect(image, rect)),
            None => Cow::Borrowed(image),
        };

        let original = Extent::new(width, height);
        let inference = Extent::new(self.inference.width, self.inference.height);
        let map = SpaceMap::new(original, crop_rect, inference)?;

        let prep = preprocess_image(&working, self.inference)?;
        debug_assert_eq!(prep.letterbox, map.letterbox());

        let raw = {
            let _guard = timing_guard("otoseg_core::inference", Level::Debug);
            self.backend.predict(&prep.tensor)?
        };

        let settings = DetectionSettings {
            conf_thres: options.conf_thres,
            iou_thres: options.iou_thres,
            vis_conf_thres: self.detection.vis_conf_thres,
        };
        let mut detections = {
            let _guard = timing_guard("otoseg_core::postprocess", Level::Debug);
            postprocess_prediction(&raw, &map, &settings)?
        };

        if options.coordinates == CoordinateKind::Original {
            detections = detections_to_original(detections, &map, self.mask_placement)?;
        }

        let report = options.include_roi.then(|| RoiReport {
            success: roi.success,
            center: roi.center,
            radius: roi.radius,
            otsu_threshold: roi.otsu_threshold,
            crop_rect,
            original_extent: original,
            cropped_extent: map.cropped_extent(),
        });

        Ok(Analysis {
            detections,
            coordinates: options.coordinates,
            roi: report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::{RawCandidate, RawPrediction};
    use crate::space::CoordSpace;
    use tract_onnx::prelude::Tensor;

    #[derive(Debug)]
    struct MockBackend {
        prediction: RawPrediction,
    }

    impl SegmentationBackend for MockBackend {
        fn predict(&self, _input: &Tensor) -> Result<RawPrediction> {
            Ok(self.prediction.clone())
        }
    }

    fn analyzer_with(candidates: Vec<RawCandidate>) -> ScopeAnalyzer {
        let backend = MockBackend {
            prediction: RawPrediction {
                candidates,
                prototypes: None,
            },
        };
        ScopeAnalyzer::new(Box::new(backend), &PipelineSettings::default())
    }

    fn candidate(cx: f32, cy: f32, size: f32, objectness: f32) -> RawCandidate {
        RawCandidate {
            bbox_cxcywh: [cx, cy, size, size],
            objectness,
            class_scores: vec![1.0],
            mask_coeffs: Vec::new(),
        }
    }

    #[test]
    fn zero_size_input_is_a_request_error() {
        let analyzer = analyzer_with(Vec::new());
        let image = RgbImage::new(0, 0);
        assert!(analyzer.analyze_rgb(&image, &AnalyzeOptions::default()).is_err());
    }

    #[test]
    fn failed_roi_degrades_to_full_frame_original_space() {
        let analyzer = analyzer_with(vec![candidate(320.0, 320.0, 64.0, 0.9)]);
        let image = otoseg_utils::fixtures::flat_frame(800, 600, 0);

        let analysis = analyzer
            .analyze_rgb(&image, &AnalyzeOptions::default())
            .expect("analysis");
        let roi = analysis.roi.expect("roi report");
        assert!(!roi.success);
        assert!(roi.crop_rect.is_none());
        assert_eq!(roi.cropped_extent, roi.original_extent);

        assert_eq!(analysis.detections.len(), 1);
        assert_eq!(analysis.detections[0].space, CoordSpace::Original);
    }

    #[test]
    fn cropped_coordinates_skip_back_mapping() {
        let analyzer = analyzer_with(vec![candidate(320.0, 320.0, 64.0, 0.9)]);
        let image = otoseg_utils::fixtures::flat_frame(800, 600, 0);

        let options = AnalyzeOptions {
            coordinates: CoordinateKind::Cropped,
            ..AnalyzeOptions::default()
        };
        let analysis = analyzer.analyze_rgb(&image, &options).expect("analysis");
        assert_eq!(analysis.detections[0].space, CoordSpace::Cropped);
        assert_eq!(analysis.coordinates, CoordinateKind::Cropped);
    }

    #[test]
    fn roi_report_can_be_omitted() {
        let analyzer = analyzer_with(Vec::new());
        let image = otoseg_utils::fixtures::flat_frame(320, 240, 0);
        let options = AnalyzeOptions {
            include_roi: false,
            ..AnalyzeOptions::default()
        };
        let analysis = analyzer.analyze_rgb(&image, &options).expect("analysis");
        assert!(analysis.roi.is_none());
    }
}
