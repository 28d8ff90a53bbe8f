//! Shared configuration types consumed across the otoseg workspace.
//!
//! These structures provide a common representation for ROI localization,
//! inference, detection postprocessing, and annotation settings that can be
//! serialized to disk and reused by whichever front end hosts the pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::Path,
    str::FromStr,
};

/// Detection thresholds applied when postprocessing raw network output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum confidence for a detection to be reported.
    pub conf_thres: f32,
    /// IoU threshold for class-agnostic non-maximum suppression.
    pub iou_thres: f32,
    /// Low internal threshold applied before NMS so near-threshold candidates
    /// stay available for downstream statistics.
    pub vis_conf_thres: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            conf_thres: 0.25,
            iou_thres: 0.45,
            vis_conf_thres: 0.001,
        }
    }
}

impl DetectionSettings {
    /// Clamp all thresholds into `[0, 1]`.
    pub fn sanitized(mut self) -> Self {
        self.conf_thres = self.conf_thres.clamp(0.0, 1.0);
        self.iou_thres = self.iou_thres.clamp(0.0, 1.0);
        self.vis_conf_thres = self.vis_conf_thres.clamp(0.0, 1.0);
        self
    }
}

/// Parameters of the circular ROI locator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoiSettings {
    /// Minimum enclosing-circle radius (pixels) for an accepted viewport.
    pub min_radius: f32,
    /// Width of the crop window centered on the viewport (pixels).
    pub target_crop_width: u32,
}

impl Default for RoiSettings {
    fn default() -> Self {
        Self {
            min_radius: 200.0,
            target_crop_width: 1080,
        }
    }
}

impl RoiSettings {
    /// Half of the target crop width, the per-side reach from the circle center.
    pub fn half_target_width(&self) -> u32 {
        self.target_crop_width / 2
    }
}

/// Inference input resolution in pixels (width x height).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct InferenceDimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for InferenceDimensions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
        }
    }
}

/// How to handle a mask whose rasterized size disagrees with the declared
/// cropped-space extent at a transform boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskPlacement {
    /// Reject the mismatch with a hard error (default).
    #[default]
    Strict,
    /// Resample the mask with nearest-neighbor interpolation before placing
    /// it. Matches the legacy tolerant behavior; kept for compatibility runs.
    Resize,
}

/// Which coordinate space the caller wants detections expressed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateKind {
    /// Boxes and masks in the source photograph's pixel grid.
    #[default]
    Original,
    /// Boxes and masks relative to the ROI crop window.
    Cropped,
}

impl fmt::Display for CoordinateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CoordinateKind::Original => "original",
                CoordinateKind::Cropped => "cropped",
            }
        )
    }
}

impl FromStr for CoordinateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(CoordinateKind::Original),
            "cropped" => Ok(CoordinateKind::Cropped),
            other => Err(format!(
                "invalid coordinate kind '{other}'; expected 'original' or 'cropped'"
            )),
        }
    }
}

/// Styling for the node-and-link annotation overlay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnotationSettings {
    /// Detections below this confidence are skipped when drawing.
    pub draw_conf_thres: f32,
    /// Arc-length spacing between contour nodes (pixels).
    pub node_step_px: u32,
    /// Radius of the filled node markers (pixels).
    pub node_radius: u32,
    /// Stroke width of the links between nodes (pixels).
    pub line_thickness: u32,
    /// Opacity of the main outline layer.
    pub outline_alpha: f32,
    /// Draw a wider, softer stroke underneath the main outline.
    pub glow: bool,
    /// Opacity of the glow layer.
    pub glow_strength: f32,
    /// Thickness multiplier for the glow stroke.
    pub glow_thickness_mult: f32,
    /// Radius multiplier for the glow node markers.
    pub glow_radius_mult: f32,
    /// Label text height in pixels.
    pub label_px: f32,
    /// Padding around the label text (pixels).
    pub label_pad: u32,
    /// Opacity of the label's dark background plate.
    pub label_bg_alpha: f32,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            draw_conf_thres: 0.1,
            node_step_px: 12,
            node_radius: 4,
            line_thickness: 4,
            outline_alpha: 0.85,
            glow: false,
            glow_strength: 0.35,
            glow_thickness_mult: 2.2,
            glow_radius_mult: 1.8,
            label_px: 20.0,
            label_pad: 6,
            label_bg_alpha: 0.55,
        }
    }
}

impl AnnotationSettings {
    /// Clamp opacities into `[0, 1]` and enforce drawable minimums.
    pub fn sanitized(mut self) -> Self {
        self.draw_conf_thres = self.draw_conf_thres.clamp(0.0, 1.0);
        self.outline_alpha = self.outline_alpha.clamp(0.0, 1.0);
        self.glow_strength = self.glow_strength.clamp(0.0, 1.0);
        self.label_bg_alpha = self.label_bg_alpha.clamp(0.0, 1.0);
        self.node_step_px = self.node_step_px.max(2);
        self.node_radius = self.node_radius.max(1);
        self.line_thickness = self.line_thickness.max(1);
        self
    }
}

/// Persistent pipeline settings.
///
/// Aggregates all user-configurable parameters so they can be loaded from and
/// saved to a JSON file by the hosting service.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Optional override for the segmentation model path.
    pub model_path: Option<String>,
    /// Inference input resolution.
    pub inference: InferenceDimensions,
    /// Detection thresholds.
    pub detection: DetectionSettings,
    /// Circular ROI locator parameters.
    pub roi: RoiSettings,
    /// Annotation overlay styling.
    pub annotation: AnnotationSettings,
    /// Policy for masks that disagree with their declared extent.
    pub mask_placement: MaskPlacement,
}

impl PipelineSettings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: PipelineSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings.detection = settings.detection.sanitized();
        settings.annotation = settings.annotation.sanitized();
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting any
    /// existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = PipelineSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = PipelineSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "detection": { "conf_thres": 0.5 },
            "roi": { "min_radius": 150.0 }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = PipelineSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.detection.conf_thres, 0.5);
        assert_eq!(loaded.detection.iou_thres, 0.45);
        assert_eq!(loaded.roi.min_radius, 150.0);
        assert_eq!(loaded.roi.target_crop_width, 1080);
        assert_eq!(loaded.mask_placement, MaskPlacement::Strict);
    }

    #[test]
    fn sanitize_clamps_out_of_range_thresholds() {
        let settings = DetectionSettings {
            conf_thres: 1.5,
            iou_thres: -0.2,
            vis_conf_thres: 0.001,
        }
        .sanitized();
        assert_eq!(settings.conf_thres, 1.0);
        assert_eq!(settings.iou_thres, 0.0);
    }

    #[test]
    fn coordinate_kind_parses_case_insensitively() {
        assert_eq!(
            "Original".parse::<CoordinateKind>().unwrap(),
            CoordinateKind::Original
        );
        assert_eq!(
            " cropped ".parse::<CoordinateKind>().unwrap(),
            CoordinateKind::Cropped
        );
        assert!("letterboxed".parse::<CoordinateKind>().is_err());
    }

    #[test]
    fn half_target_width_is_half() {
        let roi = RoiSettings::default();
        assert_eq!(roi.half_target_width(), 540);
    }
}
