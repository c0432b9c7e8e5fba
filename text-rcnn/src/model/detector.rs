use super::{
    ClassifierHead, ClassifierHeadInit, FeatureExtractor, RegionProposalNetwork, ResNetBackbone,
};
use crate::{
    common::*,
    config::DetectorConfig,
    project::{self, ProjectDirection},
    suppress::{NonMaxSuppression, NonMaxSuppressionInit},
};

/// Training outputs of the whole detector.
#[derive(Debug, TensorLike)]
pub struct TrainingOutput {
    /// Combined first and second stage loss, a scalar.
    pub loss: Tensor,
    pub feature_map: Tensor,
    /// Positive proposals fed to the classifier, `[n_pos, 4]` in feature
    /// map space.
    pub proposals: Tensor,
    pub batch_indices: Tensor,
    pub matched_classes: Tensor,
}

/// Final detections of one image.
#[derive(Debug, TensorLike)]
pub struct ImageDetections {
    /// Corner boxes in image pixel space, `[n, 4]`.
    pub boxes: Tensor,
    /// Objectness of each box, `[n]`.
    pub confidences: Tensor,
    /// Class probabilities of each box, `[n, n_classes]`.
    pub class_scores: Tensor,
}

/// Inference outputs of the whole detector.
#[derive(Debug, TensorLike)]
pub struct InferenceOutput {
    pub feature_map: Tensor,
    pub detections: Vec<ImageDetections>,
}

/// The full two-stage detector.
///
/// The first stage proposes class-agnostic text regions from a fixed
/// anchor grid; the second stage pools each surviving region from the
/// shared feature map and classifies it.
pub struct Detector {
    rpn: RegionProposalNetwork,
    classifier: ClassifierHead,
    nms: NonMaxSuppression,
}

impl Detector {
    pub fn new(path: &nn::Path, config: &DetectorConfig) -> Result<Self> {
        let backbone = ResNetBackbone::new(
            &(path / "backbone"),
            config.backbone,
            config.input_size,
        )?;
        let (feat_c, _, _) = backbone.output_shape();

        let rpn = RegionProposalNetwork::new(&(path / "rpn"), Box::new(backbone), config)?;

        let classifier = ClassifierHeadInit {
            in_channels: feat_c,
            n_classes: config.n_classes,
            roi_size: config.roi_size,
            hidden_dim: config.classifier_hidden_dim,
            dropout_p: config.classifier_dropout_p,
        }
        .build(&(path / "classifier"))?;

        let nms = NonMaxSuppressionInit {
            iou_threshold: config.nms_iou_threshold,
            confidence_threshold: config.confidence_threshold,
        }
        .build()?;

        Ok(Self {
            rpn,
            classifier,
            nms,
        })
    }

    pub fn rpn(&self) -> &RegionProposalNetwork {
        &self.rpn
    }

    /// One training step over a batch: the first-stage loss on matched
    /// anchors plus the classification loss on the positive proposals.
    pub fn forward_train<R>(
        &self,
        images: &Tensor,
        gt_boxes: &Tensor,
        gt_classes: &Tensor,
        rng: &mut R,
    ) -> Result<TrainingOutput>
    where
        R: Rng + ?Sized,
    {
        let rpn_output = self.rpn.forward_train(images, gt_boxes, gt_classes, rng)?;

        let logits = self.classifier.forward_t(
            &rpn_output.feature_map,
            &rpn_output.proposals,
            &rpn_output.batch_indices,
            true,
        )?;
        let classifier_loss = self
            .classifier
            .loss(&logits, &rpn_output.matched_classes);

        Ok(TrainingOutput {
            loss: rpn_output.loss + classifier_loss,
            feature_map: rpn_output.feature_map,
            proposals: rpn_output.proposals,
            batch_indices: rpn_output.batch_indices,
            matched_classes: rpn_output.matched_classes,
        })
    }

    /// Detect regions in a batch: propose, suppress, then classify each
    /// survivor. Boxes come back in image pixel space.
    pub fn forward_eval(&self, images: &Tensor) -> Result<InferenceOutput> {
        tch::no_grad(|| {
            let (batch_size, _, _, _) = images.size4()?;
            let (height_scale, width_scale) = self.rpn.scale_factors();

            let rpn_output = self.rpn.forward_eval(images)?;
            let survivors = self.nms.forward(
                &rpn_output.proposals,
                &rpn_output.confidences,
                &rpn_output.batch_indices,
                batch_size,
            )?;

            let detections: Vec<ImageDetections> = survivors
                .into_iter()
                .enumerate()
                .map(|(image, proposals)| -> Result<_> {
                    let n_boxes = proposals.boxes.size()[0];
                    let batch_indices = Tensor::full(
                        &[n_boxes],
                        image as i64,
                        (Kind::Int64, images.device()),
                    );

                    let logits = self.classifier.forward_t(
                        &rpn_output.feature_map,
                        &proposals.boxes,
                        &batch_indices,
                        false,
                    )?;
                    let class_scores = logits.softmax(-1, Kind::Float);

                    let boxes = project::project_boxes(
                        &proposals.boxes,
                        width_scale,
                        height_scale,
                        ProjectDirection::ToImageSpace,
                    );

                    Ok(ImageDetections {
                        boxes,
                        confidences: proposals.confidences,
                        class_scores,
                    })
                })
                .try_collect()?;

            Ok(InferenceOutput {
                feature_map: rpn_output.feature_map,
                detections,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneKind;

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            input_size: (64, 64),
            backbone: BackboneKind::Resnet18,
            proposal_hidden_channels: 32,
            classifier_hidden_dim: 16,
            ..Default::default()
        }
    }

    #[test]
    fn training_step_produces_a_finite_loss() {
        let vs = nn::VarStore::new(Device::Cpu);
        let detector = Detector::new(&vs.root(), &small_config()).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);

        let images = Tensor::rand(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let gt_boxes = Tensor::of_slice(&[
            0.0_f32, 0.0, 64.0, 64.0, //
            16.0, 16.0, 64.0, 64.0,
        ])
        .view([2, 1, 4]);
        let gt_classes = Tensor::of_slice(&[1_i64, 1]).view([2, 1]);

        let output = detector
            .forward_train(&images, &gt_boxes, &gt_classes, &mut rng)
            .unwrap();

        assert!(f64::from(&output.loss).is_finite());
        assert!(output.loss.requires_grad());
        assert_eq!(
            output.proposals.size()[0],
            output.matched_classes.size()[0]
        );
    }

    #[test]
    fn inference_returns_one_detection_set_per_image() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = small_config();
        let detector = Detector::new(&vs.root(), &config).unwrap();

        let images = Tensor::rand(&[3, 3, 64, 64], (Kind::Float, Device::Cpu));
        let output = detector.forward_eval(&images).unwrap();

        assert_eq!(output.detections.len(), 3);
        for detections in &output.detections {
            let n = detections.boxes.size()[0];
            assert_eq!(detections.boxes.size(), &[n, 4]);
            assert_eq!(detections.confidences.size(), &[n]);
            assert_eq!(detections.class_scores.size(), &[n, config.n_classes]);
            if n > 0 {
                // probabilities over classes sum to one per box
                let sums = detections.class_scores.sum_dim_intlist(
                    &[1],
                    false,
                    Kind::Float,
                );
                let max_err =
                    f64::from((sums - 1.0).abs().max());
                assert!(max_err < 1e-5);
            }
        }
    }

    #[test]
    fn inference_output_carries_no_gradients() {
        let vs = nn::VarStore::new(Device::Cpu);
        let detector = Detector::new(&vs.root(), &small_config()).unwrap();

        let images = Tensor::rand(&[1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let output = detector.forward_eval(&images).unwrap();

        assert!(!output.feature_map.requires_grad());
        for detections in &output.detections {
            assert!(!detections.boxes.requires_grad());
        }
    }
}
