//! The fixed, ordered class table of the ear-finding detector.
//!
//! The table order is part of the detector's weight contract: index `i` in the
//! network's class logits refers to `ORDERED[i]`. Reordering this list without
//! retraining the model silently corrupts every reported class, so the table
//! is versioned together with the weights it describes.

use std::borrow::Cow;

/// Findings the segmentation model was trained to recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EarFinding {
    EardrumPerforation,
    Atresia,
    AtrophicScar,
    BloodClot,
    Cerumen,
    ForeignBody,
    MiddleEarEffusion,
    MiddleEarTumor,
    OtitisExterna,
    Otomycosis,
    Retraction,
    Tympanosclerosis,
    VentilationTube,
    OtitisMedia,
    Tympanoplasty,
    EacTumor,
    Myringitis,
    Normal,
}

impl EarFinding {
    /// Class table in network output order. Index equals class id.
    pub const ORDERED: [EarFinding; 18] = [
        EarFinding::EardrumPerforation,
        EarFinding::Atresia,
        EarFinding::AtrophicScar,
        EarFinding::BloodClot,
        EarFinding::Cerumen,
        EarFinding::ForeignBody,
        EarFinding::MiddleEarEffusion,
        EarFinding::MiddleEarTumor,
        EarFinding::OtitisExterna,
        EarFinding::Otomycosis,
        EarFinding::Retraction,
        EarFinding::Tympanosclerosis,
        EarFinding::VentilationTube,
        EarFinding::OtitisMedia,
        EarFinding::Tympanoplasty,
        EarFinding::EacTumor,
        EarFinding::Myringitis,
        EarFinding::Normal,
    ];

    /// Look up a finding by its network class index.
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ORDERED.get(index as usize).copied()
    }

    /// The finding's wire name, matching the training label set.
    pub fn as_str(self) -> &'static str {
        match self {
            EarFinding::EardrumPerforation => "eardrum_perforation",
            EarFinding::Atresia => "atresia",
            EarFinding::AtrophicScar => "atrophic_scar",
            EarFinding::BloodClot => "blood_clot",
            EarFinding::Cerumen => "cerumen",
            EarFinding::ForeignBody => "foreign_body",
            EarFinding::MiddleEarEffusion => "middle_ear_effusion",
            EarFinding::MiddleEarTumor => "middle_ear_tumor",
            EarFinding::OtitisExterna => "otitis_externa",
            EarFinding::Otomycosis => "otomycosis",
            EarFinding::Retraction => "retraction",
            EarFinding::Tympanosclerosis => "tympanosclerosis",
            EarFinding::VentilationTube => "ventilation_tube",
            EarFinding::OtitisMedia => "otitis_media",
            EarFinding::Tympanoplasty => "tympanoplasty",
            EarFinding::EacTumor => "EAC_tumor",
            EarFinding::Myringitis => "myringitis",
            EarFinding::Normal => "normal",
        }
    }
}

/// A resolved class label: either a known finding or an out-of-table index.
///
/// Detectors exported with a larger head than the table describes still
/// produce reportable detections; the unknown variant keeps the raw id
/// visible instead of failing the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassLabel {
    Known(EarFinding),
    Unknown(u32),
}

impl ClassLabel {
    /// Resolve a network class index against the table.
    pub fn from_index(index: u32) -> Self {
        match EarFinding::from_index(index) {
            Some(finding) => ClassLabel::Known(finding),
            None => ClassLabel::Unknown(index),
        }
    }

    /// Human-readable name; unknown indices synthesize `class_<id>`.
    pub fn name(self) -> Cow<'static, str> {
        match self {
            ClassLabel::Known(finding) => Cow::Borrowed(finding.as_str()),
            ClassLabel::Unknown(id) => Cow::Owned(format!("class_{id}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_indices_match_training_order() {
        assert_eq!(EarFinding::from_index(0), Some(EarFinding::EardrumPerforation));
        assert_eq!(EarFinding::from_index(4), Some(EarFinding::Cerumen));
        assert_eq!(EarFinding::from_index(17), Some(EarFinding::Normal));
        assert_eq!(EarFinding::from_index(18), None);
    }

    #[test]
    fn every_entry_round_trips_through_its_index() {
        for (idx, finding) in EarFinding::ORDERED.iter().enumerate() {
            assert_eq!(EarFinding::from_index(idx as u32), Some(*finding));
        }
    }

    #[test]
    fn out_of_range_index_synthesizes_name() {
        assert_eq!(ClassLabel::from_index(2).name(), "atrophic_scar");
        assert_eq!(ClassLabel::from_index(99).name(), "class_99");
    }
}
