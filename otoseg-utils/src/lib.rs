//! Common helpers shared across otoseg crates.

/// Pipeline configuration and settings management.
pub mod config;
/// Color types and the per-class annotation palette.
pub mod color;
/// Synthetic image fixtures for tests.
pub mod fixtures;
/// Image loading, tensor conversion, mask resampling, and blending.
pub mod image_utils;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use color::{CLASS_PALETTE, RgbColor, class_color};
pub use config::{
    AnnotationSettings, CoordinateKind, DetectionSettings, InferenceDimensions, MaskPlacement,
    PipelineSettings, RoiSettings,
};
pub use image_utils::{blend_weighted, load_image, resize_mask_nearest, rgb_to_chw_norm};
pub use telemetry::{TimingGuard, timing_guard};

/// Initialize logging once for whichever binary hosts the pipeline.
///
/// This function respects the `RUST_LOG` environment variable if it is set.
/// Otherwise, it falls back to the provided default filter level.
///
/// # Arguments
///
/// * `default_filter` - The `LevelFilter` to use if `RUST_LOG` is not set.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module("otoseg::telemetry", LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}
