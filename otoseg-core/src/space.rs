//! Coordinate spaces and the transforms between them.
//!
//! One analysis request moves geometry through three pixel grids: the source
//! photograph (`Original`), the ROI crop window (`Cropped`), and the
//! letterboxed network input (`Inference`). [`SpaceMap`] holds the extents of
//! all three for a single request and hands out composable affine transforms
//! between any pair, plus the mask resampling/placement operations that must
//! stay consistent with those transforms.
//!
//! Boxes and masks belonging to one detection must always travel together;
//! the pipeline never moves one without the other.

use image::GrayImage;
use thiserror::Error;

use otoseg_utils::{MaskPlacement, resize_mask_nearest};

/// The three pixel grids of one analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSpace {
    /// The source photograph.
    Original,
    /// The ROI crop window. Equals `Original` when ROI localization failed.
    Cropped,
    /// The letterboxed network input.
    Inference,
}

/// Width and height of a pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Crop window in Original-space pixel coordinates, `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRect {
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width(), self.height())
    }
}

/// Errors raised at transform boundaries.
#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("{space:?} extent is empty")]
    EmptyExtent { space: CoordSpace },
    #[error("crop rectangle {rect:?} does not fit the original extent {extent:?}")]
    CropOutOfBounds { rect: CropRect, extent: Extent },
    #[error(
        "mask is {actual_w}x{actual_h} but the declared {space:?} extent is {expected_w}x{expected_h}"
    )]
    MaskExtentMismatch {
        space: CoordSpace,
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },
    #[error("detection is already expressed in Original space")]
    AlreadyOriginal,
}

/// Axis-aligned scale-then-translate map: `x' = x * sx + tx`.
///
/// Every transform between the request's spaces is of this form, so
/// composition stays closed and inverses are exact algebraically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    pub sx: f32,
    pub sy: f32,
    pub tx: f32,
    pub ty: f32,
}

impl AffineMap {
    pub const IDENTITY: AffineMap = AffineMap {
        sx: 1.0,
        sy: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Pure translation.
    pub const fn translation(dx: f32, dy: f32) -> Self {
        Self {
            sx: 1.0,
            sy: 1.0,
            tx: dx,
            ty: dy,
        }
    }

    /// Apply the map to a point.
    pub fn apply(&self, point: (f32, f32)) -> (f32, f32) {
        (point.0 * self.sx + self.tx, point.1 * self.sy + self.ty)
    }

    /// Compose: apply `self` first, then `other`.
    pub fn then(&self, other: &AffineMap) -> AffineMap {
        AffineMap {
            sx: self.sx * other.sx,
            sy: self.sy * other.sy,
            tx: self.tx * other.sx + other.tx,
            ty: self.ty * other.sy + other.ty,
        }
    }

    /// Exact algebraic inverse. Scales must be non-zero, which holds for every
    /// map built from non-empty extents.
    pub fn inverse(&self) -> AffineMap {
        AffineMap {
            sx: 1.0 / self.sx,
            sy: 1.0 / self.sy,
            tx: -self.tx / self.sx,
            ty: -self.ty / self.sy,
        }
    }
}

/// Letterbox geometry fitting a content extent into a target extent.
///
/// Uniform scale preserving aspect ratio, remainder split into centered
/// padding (left/top gets the floor half when the total is odd).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    /// Scaled content width inside the target.
    pub inner_width: u32,
    /// Scaled content height inside the target.
    pub inner_height: u32,
}

impl Letterbox {
    /// Fit `content` into `target`.
    pub fn fit(content: Extent, target: Extent) -> Self {
        let scale = (target.width as f32 / content.width as f32)
            .min(target.height as f32 / content.height as f32);
        let inner_width = ((content.width as f32 * scale).round() as u32).min(target.width);
        let inner_height = ((content.height as f32 * scale).round() as u32).min(target.height);
        let pad_left = (target.width - inner_width) / 2;
        let pad_top = (target.height - inner_height) / 2;
        Self {
            scale,
            pad_left,
            pad_top,
            inner_width,
            inner_height,
        }
    }

    /// The content -> target affine map.
    pub fn as_map(&self) -> AffineMap {
        AffineMap {
            sx: self.scale,
            sy: self.scale,
            tx: self.pad_left as f32,
            ty: self.pad_top as f32,
        }
    }
}

/// Space definitions for one analysis request.
#[derive(Debug, Clone)]
pub struct SpaceMap {
    original: Extent,
    crop: Option<CropRect>,
    inference: Extent,
    letterbox: Letterbox,
}

impl SpaceMap {
    /// Build the map for one request.
    ///
    /// `crop` is `None` when ROI localization failed; Cropped space then
    /// coincides with Original space.
    pub fn new(
        original: Extent,
        crop: Option<CropRect>,
        inference: Extent,
    ) -> Result<Self, SpaceError> {
        if original.is_empty() {
            return Err(SpaceError::EmptyExtent {
                space: CoordSpace::Original,
            });
        }
        if inference.is_empty() {
            return Err(SpaceError::EmptyExtent {
                space: CoordSpace::Inference,
            });
        }
        if let Some(rect) = crop {
            if rect.extent().is_empty() {
                return Err(SpaceError::EmptyExtent {
                    space: CoordSpace::Cropped,
                });
            }
            if rect.x2 > original.width || rect.y2 > original.height {
                return Err(SpaceError::CropOutOfBounds {
                    rect,
                    extent: original,
                });
            }
        }
        let cropped = crop.map_or(original, |rect| rect.extent());
        let letterbox = Letterbox::fit(cropped, inference);
        Ok(Self {
            original,
            crop,
            inference,
            letterbox,
        })
    }

    pub fn original_extent(&self) -> Extent {
        self.original
    }

    pub fn cropped_extent(&self) -> Extent {
        self.crop.map_or(self.original, |rect| rect.extent())
    }

    pub fn inference_extent(&self) -> Extent {
        self.inference
    }

    pub fn crop_rect(&self) -> Option<CropRect> {
        self.crop
    }

    pub fn letterbox(&self) -> Letterbox {
        self.letterbox
    }

    pub fn extent_of(&self, space: CoordSpace) -> Extent {
        match space {
            CoordSpace::Original => self.original_extent(),
            CoordSpace::Cropped => self.cropped_extent(),
            CoordSpace::Inference => self.inference_extent(),
        }
    }

    /// The pure affine transform between two spaces.
    ///
    /// Composition is associative and `transform(a, b).then(&transform(b, a))`
    /// is the identity up to floating-point rounding (round-trip error stays
    /// below half a pixel).
    pub fn transform(&self, from: CoordSpace, to: CoordSpace) -> AffineMap {
        self.map_to_cropped(from).then(&self.map_from_cropped(to))
    }

    fn map_to_cropped(&self, from: CoordSpace) -> AffineMap {
        match from {
            CoordSpace::Original => match self.crop {
                Some(rect) => AffineMap::translation(-(rect.x1 as f32), -(rect.y1 as f32)),
                None => AffineMap::IDENTITY,
            },
            CoordSpace::Cropped => AffineMap::IDENTITY,
            CoordSpace::Inference => self.letterbox.as_map().inverse(),
        }
    }

    fn map_from_cropped(&self, to: CoordSpace) -> AffineMap {
        match to {
            CoordSpace::Original => match self.crop {
                Some(rect) => AffineMap::translation(rect.x1 as f32, rect.y1 as f32),
                None => AffineMap::IDENTITY,
            },
            CoordSpace::Cropped => AffineMap::IDENTITY,
            CoordSpace::Inference => self.letterbox.as_map(),
        }
    }

    /// Project a point between spaces.
    ///
    /// Points leaving Inference space are clamped into the destination extent:
    /// letterbox padding has no counterpart in the crop, so coordinates inside
    /// the padded border must land on the crop boundary rather than outside it.
    pub fn project_point(&self, point: (f32, f32), from: CoordSpace, to: CoordSpace) -> (f32, f32) {
        let mapped = self.transform(from, to).apply(point);
        if from == CoordSpace::Inference && to != CoordSpace::Inference {
            let extent = self.extent_of(to);
            (
                mapped.0.clamp(0.0, extent.width as f32),
                mapped.1.clamp(0.0, extent.height as f32),
            )
        } else {
            mapped
        }
    }

    /// Move an Inference-resolution mask into Cropped space.
    ///
    /// The unpadded letterbox region is extracted and resampled to the cropped
    /// extent with nearest-neighbor sampling, keeping the mask binary.
    pub fn mask_to_cropped(&self, mask: &GrayImage) -> Result<GrayImage, SpaceError> {
        let (mw, mh) = mask.dimensions();
        if mw != self.inference.width || mh != self.inference.height {
            return Err(SpaceError::MaskExtentMismatch {
                space: CoordSpace::Inference,
                expected_w: self.inference.width,
                expected_h: self.inference.height,
                actual_w: mw,
                actual_h: mh,
            });
        }

        let lb = self.letterbox;
        let inner = image::imageops::crop_imm(
            mask,
            lb.pad_left,
            lb.pad_top,
            lb.inner_width,
            lb.inner_height,
        )
        .to_image();

        let cropped = self.cropped_extent();
        Ok(resize_mask_nearest(&inner, cropped.width, cropped.height))
    }

    /// Move a Cropped-space mask into Original space.
    ///
    /// Allocates a zero-filled Original-sized grid and copies the mask into
    /// the crop rectangle, clipping at the grid bounds. A mask whose size
    /// disagrees with the cropped extent is a hard error under
    /// [`MaskPlacement::Strict`]; [`MaskPlacement::Resize`] resamples it with
    /// nearest-neighbor sampling first.
    pub fn mask_to_original(
        &self,
        mask: &GrayImage,
        placement: MaskPlacement,
    ) -> Result<GrayImage, SpaceError> {
        let cropped = self.cropped_extent();
        let (mw, mh) = mask.dimensions();

        let aligned: GrayImage = if mw == cropped.width && mh == cropped.height {
            mask.clone()
        } else {
            match placement {
                MaskPlacement::Strict => {
                    return Err(SpaceError::MaskExtentMismatch {
                        space: CoordSpace::Cropped,
                        expected_w: cropped.width,
                        expected_h: cropped.height,
                        actual_w: mw,
                        actual_h: mh,
                    });
                }
                MaskPlacement::Resize => {
                    resize_mask_nearest(mask, cropped.width, cropped.height)
                }
            }
        };

        let Some(rect) = self.crop else {
            // Cropped space already equals Original space.
            return Ok(aligned);
        };

        let mut canvas = GrayImage::new(self.original.width, self.original.height);
        let max_w = self.original.width.saturating_sub(rect.x1);
        let max_h = self.original.height.saturating_sub(rect.y1);
        for y in 0..aligned.height().min(max_h) {
            for x in 0..aligned.width().min(max_w) {
                canvas.put_pixel(rect.x1 + x, rect.y1 + y, *aligned.get_pixel(x, y));
            }
        }
        Ok(canvas)
    }
}
