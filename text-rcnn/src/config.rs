//! Detector configuration.

use crate::{common::*, model::BackboneKind};

/// The full set of knobs for building a [Detector](crate::model::Detector).
///
/// Defaults reproduce the reference training setup for text regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// The `(height, width)` every input image is expected to have.
    pub input_size: (i64, i64),
    pub backbone: BackboneKind,
    /// Number of output classes, including the background class.
    pub n_classes: i64,
    /// The pooled `(height, width)` of each region crop.
    pub roi_size: (i64, i64),
    /// Anchor sizes in feature map cells.
    pub anchor_scales: Vec<R64>,
    /// Width over height ratios of the anchor variants.
    pub anchor_ratios: Vec<R64>,
    pub pos_iou_thresh: R64,
    pub neg_iou_thresh: R64,
    /// Sampled negatives per positive anchor.
    pub neg_ratio: R64,
    /// Minimum objectness score a proposal needs at inference time.
    pub confidence_threshold: R64,
    pub nms_iou_threshold: R64,
    pub reg_weight: R64,
    pub conf_weight: R64,
    pub proposal_hidden_channels: i64,
    pub classifier_hidden_dim: i64,
    pub proposal_dropout_p: R64,
    pub classifier_dropout_p: R64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: (448, 448),
            backbone: BackboneKind::Resnet50,
            n_classes: 2,
            roi_size: (2, 2),
            anchor_scales: vec![r64(2.0), r64(4.0), r64(6.0)],
            anchor_ratios: vec![r64(0.5), r64(1.0), r64(1.5)],
            pos_iou_thresh: r64(0.7),
            neg_iou_thresh: r64(0.3),
            neg_ratio: r64(1.0),
            confidence_threshold: r64(0.5),
            nms_iou_threshold: r64(0.7),
            reg_weight: r64(5.0),
            conf_weight: r64(1.0),
            proposal_hidden_channels: 512,
            classifier_hidden_dim: 512,
            proposal_dropout_p: r64(0.3),
            classifier_dropout_p: r64(0.3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = DetectorConfig {
            backbone: BackboneKind::Resnet18,
            n_classes: 5,
            ..Default::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        let loaded: DetectorConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded.n_classes, 5);
        assert_eq!(loaded.backbone, BackboneKind::Resnet18);
        assert_eq!(loaded.anchor_scales, config.anchor_scales);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let loaded: DetectorConfig =
            serde_json::from_str(r#"{"backbone": "resnet34", "n_classes": 3}"#).unwrap();
        assert_eq!(loaded.backbone, BackboneKind::Resnet34);
        assert_eq!(loaded.n_classes, 3);
        assert_eq!(loaded.input_size, (448, 448));
        assert_eq!(loaded.pos_iou_thresh, r64(0.7));
    }
}
