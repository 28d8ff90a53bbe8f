//! Color utilities shared across the otoseg workspace.
//!
//! Includes the fixed drawing palette used to colorize per-class annotations.
//! The palette is cycled by class id so synthetic fallback classes still get
//! a stable color.

use serde::{Deserialize, Serialize};

/// Simple RGB color stored in 8-bit channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RgbColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl RgbColor {
    /// Constructs a color from its channels.
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Returns the color as an `image` pixel.
    pub fn to_pixel(self) -> image::Rgb<u8> {
        image::Rgb([self.red, self.green, self.blue])
    }
}

impl Default for RgbColor {
    fn default() -> Self {
        Self::new(255, 255, 255)
    }
}

/// Fixed annotation palette, indexed by class id modulo the palette length.
pub const CLASS_PALETTE: [RgbColor; 20] = [
    RgbColor::new(255, 56, 56),
    RgbColor::new(255, 157, 151),
    RgbColor::new(255, 112, 193),
    RgbColor::new(255, 178, 238),
    RgbColor::new(207, 210, 49),
    RgbColor::new(72, 249, 10),
    RgbColor::new(146, 204, 23),
    RgbColor::new(61, 219, 134),
    RgbColor::new(26, 147, 52),
    RgbColor::new(0, 212, 187),
    RgbColor::new(44, 153, 168),
    RgbColor::new(0, 194, 255),
    RgbColor::new(52, 69, 147),
    RgbColor::new(100, 115, 255),
    RgbColor::new(0, 24, 236),
    RgbColor::new(132, 56, 255),
    RgbColor::new(82, 0, 133),
    RgbColor::new(203, 56, 255),
    RgbColor::new(255, 149, 200),
    RgbColor::new(255, 55, 199),
];

/// Returns the palette color assigned to a class id.
pub fn class_color(class_id: u32) -> RgbColor {
    CLASS_PALETTE[class_id as usize % CLASS_PALETTE.len()]
}
