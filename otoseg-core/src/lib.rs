//! Core otoscope segmentation pipeline.
//!
//! This crate turns a clinical ear-canal photograph into a list of
//! segmentation detections: it localizes the circular optical viewport, crops
//! and letterboxes the frame for an injected segmentation backend, decodes the
//! backend's raw candidates and prototype masks, and maps everything back into
//! the photograph's own pixel grid.

/// Annotation rendering (node-and-link outlines, labels).
pub mod annotate;
/// Projection of detections from Cropped into Original space.
pub mod backmap;
/// The detector's ordered class table.
pub mod classes;
/// The high-level analysis pipeline.
pub mod detect;
/// The segmentation backend trait and its ONNX implementation.
pub mod model;
/// Detection postprocessing (NMS, score filtering, mask decoding).
pub mod postprocess;
/// Image preprocessing (letterboxing, tensor conversion).
pub mod preprocess;
/// Circular ROI localization.
pub mod roi;
/// Coordinate spaces and the transforms between them.
pub mod space;

pub use annotate::{Annotator, resample_polyline};
pub use backmap::{detection_to_original, detections_to_original};
pub use classes::{ClassLabel, EarFinding};
pub use detect::{AnalyzeOptions, Analysis, RoiReport, ScopeAnalyzer};
pub use model::{OnnxSegmentationModel, SegmentationBackend};
pub use postprocess::{
    BoundingBox, Detection, MaskPrototypes, RawCandidate, RawPrediction, decode_mask,
    postprocess_prediction,
};
pub use preprocess::{PreprocessOutput, letterbox_image, preprocess_image};
pub use roi::{RoiDetection, crop_to_rect, locate_roi};
pub use space::{AffineMap, CoordSpace, CropRect, Extent, Letterbox, SpaceError, SpaceMap};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
