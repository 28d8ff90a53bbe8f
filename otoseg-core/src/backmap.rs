//! Space back-mapping: project Cropped-space detections into Original space.
//!
//! Boxes and masks of one detection are moved together, never independently.
//! When ROI localization failed the two spaces coincide and the mapping is a
//! coordinate no-op, but the detection's space tag still advances so callers
//! can tell mapped output from unmapped output. Re-mapping an
//! Original-space detection is rejected: double-mapping would silently shift
//! every coordinate by the crop offset a second time.

use crate::postprocess::Detection;
use crate::space::{CoordSpace, SpaceError, SpaceMap};
use otoseg_utils::MaskPlacement;

/// Project one detection from Cropped into Original space.
pub fn detection_to_original(
    detection: Detection,
    map: &SpaceMap,
    placement: MaskPlacement,
) -> Result<Detection, SpaceError> {
    if detection.space == CoordSpace::Original {
        return Err(SpaceError::AlreadyOriginal);
    }

    let bbox = detection
        .bbox
        .transformed(&map.transform(CoordSpace::Cropped, CoordSpace::Original))
        .clamped_to(map.original_extent());

    let mask = match &detection.mask {
        Some(mask) => Some(map.mask_to_original(mask, placement)?),
        None => None,
    };

    Ok(Detection {
        bbox,
        mask,
        space: CoordSpace::Original,
        ..detection
    })
}

/// Project a batch of detections, preserving order.
pub fn detections_to_original(
    detections: Vec<Detection>,
    map: &SpaceMap,
    placement: MaskPlacement,
) -> Result<Vec<Detection>, SpaceError> {
    detections
        .into_iter()
        .map(|detection| detection_to_original(detection, map, placement))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::BoundingBox;
    use crate::space::{CropRect, Extent};
    use image::{GrayImage, Luma};

    fn cropped_detection(bbox: BoundingBox, mask: Option<GrayImage>) -> Detection {
        Detection {
            bbox,
            confidence: 0.9,
            class_id: 4,
            class_name: "cerumen".to_string(),
            mask,
            space: CoordSpace::Cropped,
        }
    }

    fn cropped_map() -> SpaceMap {
        SpaceMap::new(
            Extent::new(1600, 1080),
            Some(CropRect::new(60, 0, 1140, 1080)),
            Extent::new(640, 640),
        )
        .unwrap()
    }

    #[test]
    fn boxes_translate_by_the_crop_offset() {
        let map = cropped_map();
        let detection = cropped_detection(
            BoundingBox {
                x1: 100.0,
                y1: 200.0,
                x2: 300.0,
                y2: 400.0,
            },
            None,
        );

        let mapped =
            detection_to_original(detection, &map, MaskPlacement::Strict).expect("mapping");
        assert_eq!(mapped.space, CoordSpace::Original);
        assert_eq!(mapped.bbox.x1, 160.0);
        assert_eq!(mapped.bbox.x2, 360.0);
        assert_eq!(mapped.bbox.y1, 200.0);
        assert_eq!(mapped.bbox.y2, 400.0);
    }

    #[test]
    fn masks_land_inside_the_crop_rectangle() {
        let map = cropped_map();
        let mut mask = GrayImage::new(1080, 1080);
        mask.put_pixel(0, 0, Luma([255]));
        let detection = cropped_detection(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
            Some(mask),
        );

        let mapped =
            detection_to_original(detection, &map, MaskPlacement::Strict).expect("mapping");
        let mask = mapped.mask.expect("mask survives mapping");
        assert_eq!(mask.dimensions(), (1600, 1080));
        assert_eq!(mask.get_pixel(60, 0)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn failed_roi_mapping_is_a_tagged_no_op() {
        let map = SpaceMap::new(Extent::new(1600, 1080), None, Extent::new(640, 640)).unwrap();
        let bbox = BoundingBox {
            x1: 10.0,
            y1: 20.0,
            x2: 30.0,
            y2: 40.0,
        };
        let mapped = detection_to_original(cropped_detection(bbox, None), &map, MaskPlacement::Strict)
            .expect("mapping");
        assert_eq!(mapped.bbox, bbox);
        assert_eq!(mapped.space, CoordSpace::Original);
    }

    #[test]
    fn double_mapping_is_rejected() {
        let map = cropped_map();
        let detection = cropped_detection(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 1.0,
                y2: 1.0,
            },
            None,
        );
        let mapped =
            detection_to_original(detection, &map, MaskPlacement::Strict).expect("first mapping");
        assert!(matches!(
            detection_to_original(mapped, &map, MaskPlacement::Strict),
            Err(SpaceError::AlreadyOriginal)
        ));
    }

    #[test]
    fn strict_placement_propagates_size_mismatch() {
        let map = cropped_map();
        let detection = cropped_detection(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
            Some(GrayImage::new(500, 500)),
        );
        assert!(matches!(
            detection_to_original(detection, &map, MaskPlacement::Strict),
            Err(SpaceError::MaskExtentMismatch { .. })
        ));
    }
}
