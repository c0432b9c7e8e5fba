use super::{FeatureExtractor, ProposalHead, ProposalHeadInit};
use crate::{
    anchor::{AnchorGrid, AnchorGridInit, Matcher, MatcherInit},
    codec,
    common::*,
    config::DetectorConfig,
    loss::{RpnLoss, RpnLossInit},
    project::{self, ProjectDirection},
};

/// First-stage outputs when training. Proposals are decoded from
/// detached offsets so the second stage never backpropagates into the
/// proposal head through them.
#[derive(Debug, TensorLike)]
pub struct RpnTrainingOutput {
    /// Weighted confidence plus regression loss, a scalar.
    pub loss: Tensor,
    /// Backbone feature map, `[b, c, h, w]`.
    pub feature_map: Tensor,
    /// Decoded positive proposals in feature map space, `[n_pos, 4]`.
    pub proposals: Tensor,
    /// Source image of each proposal, `[n_pos]`.
    pub batch_indices: Tensor,
    /// Class of the ground truth each proposal was matched to, `[n_pos]`.
    pub matched_classes: Tensor,
}

/// First-stage outputs when predicting.
#[derive(Debug, TensorLike)]
pub struct RpnInferenceOutput {
    pub feature_map: Tensor,
    /// Decoded proposals above the confidence threshold, `[n, 4]`.
    pub proposals: Tensor,
    /// Sigmoid objectness of each proposal, `[n]`.
    pub confidences: Tensor,
    pub batch_indices: Tensor,
}

/// The first detection stage: a backbone feature extractor plus a
/// proposal head scored against a fixed anchor grid.
///
/// Training and inference are separate entry points rather than a mode
/// flag, as they differ in both inputs and outputs.
pub struct RegionProposalNetwork {
    backbone: Box<dyn FeatureExtractor + Send>,
    head: ProposalHead,
    anchor_grid: AnchorGrid,
    matcher: Matcher,
    loss_fn: RpnLoss,
    height_scale: i64,
    width_scale: i64,
    confidence_threshold: f64,
}

impl RegionProposalNetwork {
    pub fn new(
        path: &nn::Path,
        backbone: Box<dyn FeatureExtractor + Send>,
        config: &DetectorConfig,
    ) -> Result<Self> {
        let (feat_c, feat_h, feat_w) = backbone.output_shape();
        let (height_scale, width_scale) =
            project::scale_factors(config.input_size, (feat_h, feat_w))?;

        let anchor_grid = AnchorGridInit {
            feature_h: feat_h,
            feature_w: feat_w,
            scales: config.anchor_scales.clone(),
            ratios: config.anchor_ratios.clone(),
        }
        .build()?;

        let head = ProposalHeadInit {
            in_channels: feat_c,
            hidden_channels: config.proposal_hidden_channels,
            n_variants: anchor_grid.n_variants(),
            dropout_p: config.proposal_dropout_p,
        }
        .build(&(path / "head"))?;

        let matcher = MatcherInit {
            pos_iou_thresh: config.pos_iou_thresh,
            neg_iou_thresh: config.neg_iou_thresh,
            neg_ratio: config.neg_ratio,
        }
        .build()?;

        let loss_fn = RpnLossInit {
            reg_weight: config.reg_weight,
            conf_weight: config.conf_weight,
        }
        .build()?;

        ensure!(
            (0.0..=1.0).contains(&config.confidence_threshold.raw()),
            "confidence_threshold must be in [0, 1], got {}",
            config.confidence_threshold
        );

        Ok(Self {
            backbone,
            head,
            anchor_grid,
            matcher,
            loss_fn,
            height_scale,
            width_scale,
            confidence_threshold: config.confidence_threshold.raw(),
        })
    }

    pub fn anchor_grid(&self) -> &AnchorGrid {
        &self.anchor_grid
    }

    /// Stride factors from image pixels to feature map cells, as
    /// `(height_scale, width_scale)`.
    pub fn scale_factors(&self) -> (i64, i64) {
        (self.height_scale, self.width_scale)
    }

    /// Match anchors against ground truth and compute the first-stage
    /// loss.
    ///
    /// `gt_boxes` is `[b, n_max_obj, 4]` corner boxes in image pixel
    /// space, padded with `(-1, -1, -1, -1)`; `gt_classes` is
    /// `[b, n_max_obj]` padded with -1.
    pub fn forward_train<R>(
        &self,
        images: &Tensor,
        gt_boxes: &Tensor,
        gt_classes: &Tensor,
        rng: &mut R,
    ) -> Result<RpnTrainingOutput>
    where
        R: Rng + ?Sized,
    {
        let (batch_size, _, _, _) = images.size4()?;
        let (gt_batch, n_max_obj, _) = gt_boxes.size3()?;
        ensure!(
            gt_batch == batch_size,
            "ground truth batch {} does not match image batch {}",
            gt_batch,
            batch_size
        );

        let feature_map = self.backbone.forward_t(images, true);
        let prediction = self.head.forward_t(&feature_map, true);

        let projected_gt = project::project_boxes(
            &gt_boxes.view([-1, 4]),
            self.width_scale,
            self.height_scale,
            ProjectDirection::ToFeatureSpace,
        )
        .view([batch_size, n_max_obj, 4]);

        let anchors = self.anchor_grid.flat().to_device(images.device());
        let matches = self
            .matcher
            .forward(&anchors, &projected_gt, gt_classes, rng)?;

        let pos_conf = prediction.conf_logits.index_select(0, &matches.pos_indices);
        let neg_conf = prediction.conf_logits.index_select(0, &matches.neg_indices);
        let pred_offsets = prediction.offsets.index_select(0, &matches.pos_indices);

        let loss = self.loss_fn.forward(
            &pos_conf,
            &neg_conf,
            &pred_offsets,
            &matches.gt_offsets,
            batch_size,
        );

        let proposals = codec::decode(&matches.pos_anchors, &pred_offsets.detach());

        Ok(RpnTrainingOutput {
            loss,
            feature_map,
            proposals,
            batch_indices: matches.pos_batch_indices,
            matched_classes: matches.gt_classes,
        })
    }

    /// Decode every anchor whose predicted objectness clears the
    /// confidence threshold.
    pub fn forward_eval(&self, images: &Tensor) -> Result<RpnInferenceOutput> {
        let (batch_size, _, _, _) = images.size4()?;
        let device = images.device();
        let n_anchors = self.anchor_grid.num_anchors();

        let feature_map = self.backbone.forward_t(images, false);
        let prediction = self.head.forward_t(&feature_map, false);

        let confidences = prediction.conf_logits.sigmoid();
        let keep = confidences
            .ge(self.confidence_threshold)
            .nonzero()
            .view([-1]);

        // decompose kept flat indices into (image, anchor) pairs
        let kept_flat = Vec::<i64>::from(&keep.to_device(Device::Cpu));
        let batch_of: Vec<i64> = kept_flat.iter().map(|flat| flat / n_anchors).collect();
        let anchor_of: Vec<i64> = kept_flat.iter().map(|flat| flat % n_anchors).collect();
        debug_assert!(batch_of.iter().all(|index| *index < batch_size));

        let anchor_indices = Tensor::of_slice(&anchor_of).to_device(device);
        let anchors = self
            .anchor_grid
            .flat()
            .to_device(device)
            .index_select(0, &anchor_indices);
        let offsets = prediction.offsets.index_select(0, &keep);

        Ok(RpnInferenceOutput {
            feature_map,
            proposals: codec::decode(&anchors, &offsets),
            confidences: confidences.index_select(0, &keep),
            batch_indices: Tensor::of_slice(&batch_of).to_device(device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackboneKind, ResNetBackbone};

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            input_size: (64, 64),
            backbone: BackboneKind::Resnet18,
            proposal_hidden_channels: 32,
            classifier_hidden_dim: 16,
            ..Default::default()
        }
    }

    fn small_rpn(vs: &nn::VarStore) -> RegionProposalNetwork {
        let config = small_config();
        let backbone =
            ResNetBackbone::new(&(&vs.root() / "backbone"), config.backbone, config.input_size)
                .unwrap();
        RegionProposalNetwork::new(&(&vs.root() / "rpn"), Box::new(backbone), &config).unwrap()
    }

    #[test]
    fn anchor_grid_covers_the_feature_map() {
        let vs = nn::VarStore::new(Device::Cpu);
        let rpn = small_rpn(&vs);

        // 64x64 input over a stride-32 backbone leaves a 2x2 feature map
        assert_eq!(rpn.scale_factors(), (32, 32));
        assert_eq!(rpn.anchor_grid().num_anchors(), 2 * 2 * 9);
    }

    #[test]
    fn training_forward_produces_a_finite_scalar_loss() {
        let vs = nn::VarStore::new(Device::Cpu);
        let rpn = small_rpn(&vs);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);

        let images = Tensor::rand(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));
        // one real box plus a sentinel row per image, in pixel space
        let gt_boxes = Tensor::of_slice(&[
            0.0_f32, 0.0, 64.0, 64.0, //
            -1.0, -1.0, -1.0, -1.0, //
            16.0, 16.0, 64.0, 64.0, //
            -1.0, -1.0, -1.0, -1.0,
        ])
        .view([2, 2, 4]);
        let gt_classes = Tensor::of_slice(&[1_i64, -1, 1, -1]).view([2, 2]);

        let output = rpn
            .forward_train(&images, &gt_boxes, &gt_classes, &mut rng)
            .unwrap();

        assert_eq!(output.loss.size(), &[] as &[i64]);
        assert!(f64::from(&output.loss).is_finite());

        // every image has an object, so forced matching guarantees at
        // least one proposal per image
        let n_pos = output.proposals.size()[0];
        assert!(n_pos >= 2);
        assert_eq!(output.batch_indices.size(), &[n_pos]);
        assert_eq!(output.matched_classes.size(), &[n_pos]);
    }

    #[test]
    fn training_rejects_mismatched_batches() {
        let vs = nn::VarStore::new(Device::Cpu);
        let rpn = small_rpn(&vs);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);

        let images = Tensor::rand(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let gt_boxes = Tensor::zeros(&[1, 1, 4], (Kind::Float, Device::Cpu));
        let gt_classes = Tensor::zeros(&[1, 1], (Kind::Int64, Device::Cpu));

        assert!(rpn
            .forward_train(&images, &gt_boxes, &gt_classes, &mut rng)
            .is_err());
    }

    #[test]
    fn inference_forward_shapes_are_consistent() {
        let vs = nn::VarStore::new(Device::Cpu);
        let rpn = small_rpn(&vs);

        let images = Tensor::rand(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let output = rpn.forward_eval(&images).unwrap();

        let n = output.proposals.size()[0];
        assert_eq!(output.proposals.size(), &[n, 4]);
        assert_eq!(output.confidences.size(), &[n]);
        assert_eq!(output.batch_indices.size(), &[n]);

        // every kept confidence clears the threshold
        if n > 0 {
            assert!(f64::from(output.confidences.min()) >= 0.5);
            let batches = Vec::<i64>::from(&output.batch_indices);
            assert!(batches.iter().all(|index| (0..2).contains(index)));
        }
    }
}
