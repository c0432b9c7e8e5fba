//! Confidence filtering and greedy non-maximum suppression of decoded
//! proposals.

use crate::common::*;
use bbox::{prelude::*, Corners};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonMaxSuppressionInit {
    pub iou_threshold: R64,
    pub confidence_threshold: R64,
}

impl Default for NonMaxSuppressionInit {
    fn default() -> Self {
        Self {
            iou_threshold: r64(0.7),
            confidence_threshold: r64(0.5),
        }
    }
}

impl NonMaxSuppressionInit {
    pub fn build(self) -> Result<NonMaxSuppression> {
        let Self {
            iou_threshold,
            confidence_threshold,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&iou_threshold.raw()),
            "iou_threshold must be in [0, 1], got {}",
            iou_threshold
        );
        ensure!(
            (0.0..=1.0).contains(&confidence_threshold.raw()),
            "confidence_threshold must be in [0, 1], got {}",
            confidence_threshold
        );

        Ok(NonMaxSuppression {
            iou_threshold: iou_threshold.raw(),
            confidence_threshold: confidence_threshold.raw(),
        })
    }
}

/// Surviving boxes of one image, in suppression order.
#[derive(Debug, TensorLike)]
pub struct ImageProposals {
    /// Corner boxes, `[n, 4]`.
    pub boxes: Tensor,
    /// Confidence of each box, `[n]`.
    pub confidences: Tensor,
}

#[derive(Debug)]
pub struct NonMaxSuppression {
    iou_threshold: f64,
    confidence_threshold: f64,
}

impl NonMaxSuppression {
    pub fn iou_threshold(&self) -> f64 {
        self.iou_threshold
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Group candidates by source image and greedily suppress overlaps
    /// per image.
    ///
    /// Candidates are kept in descending confidence order; every kept box
    /// discards the remaining boxes overlapping it beyond the IoU
    /// threshold. A zero-candidate input yields empty per-image results.
    pub fn forward(
        &self,
        proposals: &Tensor,
        confidences: &Tensor,
        batch_indices: &Tensor,
        batch_size: i64,
    ) -> Result<Vec<ImageProposals>> {
        tch::no_grad(|| {
            let (n_candidates, n_params) = proposals.size2()?;
            ensure!(n_params == 4, "proposals must have shape [n, 4]");
            ensure!(
                confidences.size1()? == n_candidates && batch_indices.size1()? == n_candidates,
                "confidences and batch_indices must match the proposal count"
            );

            (0..batch_size)
                .map(|batch_index| {
                    let select = batch_indices.eq(batch_index).nonzero().view([-1]);
                    let boxes = proposals.index_select(0, &select);
                    let confidences = confidences.index_select(0, &select);

                    let keep = greedy_nms(&boxes, &confidences, self.iou_threshold);
                    Ok(ImageProposals {
                        boxes: boxes.index_select(0, &keep),
                        confidences: confidences.index_select(0, &keep),
                    })
                })
                .collect()
        })
    }
}

/// The sequential greedy suppression loop of one image. The order of the
/// kept indices is part of the contract: confidence-descending, ties
/// broken by the original candidate index.
fn greedy_nms(boxes: &Tensor, confidences: &Tensor, iou_threshold: f64) -> Tensor {
    let n_boxes = boxes.size()[0] as usize;
    if n_boxes == 0 {
        return Tensor::zeros(&[0], (Kind::Int64, boxes.device()));
    }

    let conf_vec = Vec::<f32>::from(confidences.view([-1]));
    let rects: Vec<Corners<f32>> = Vec::<f32>::from(boxes.view([-1]))
        .chunks(4)
        .map(|row| Corners::from_corners([row[0], row[1], row[2], row[3]]))
        .collect();

    let mut order: Vec<usize> = (0..n_boxes).collect();
    order.sort_by_key(|&index| (-r32(conf_vec[index]), index));

    let mut suppressed = vec![false; n_boxes];
    let mut keep: Vec<i64> = vec![];

    for (rank, &kept) in order.iter().enumerate() {
        if suppressed[kept] {
            continue;
        }
        keep.push(kept as i64);
        let kept_rect = &rects[kept];

        for &other in &order[(rank + 1)..] {
            if suppressed[other] {
                continue;
            }
            if kept_rect.iou_with(&rects[other]) as f64 > iou_threshold {
                suppressed[other] = true;
            }
        }
    }

    Tensor::of_slice(&keep).to_device(boxes.device())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_of(rows: &[[f32; 4]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::of_slice(&flat).view([rows.len() as i64, 4])
    }

    fn suppression(iou_threshold: f64) -> NonMaxSuppression {
        NonMaxSuppressionInit {
            iou_threshold: r64(iou_threshold),
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    fn pairwise_ious(boxes: &Tensor) -> Vec<f64> {
        let rects: Vec<Corners<f32>> = Vec::<f32>::from(boxes.view([-1]))
            .chunks(4)
            .map(|row| Corners::from_corners([row[0], row[1], row[2], row[3]]))
            .collect();
        iproduct!(0..rects.len(), 0..rects.len())
            .filter(|(lhs, rhs)| lhs < rhs)
            .map(|(lhs, rhs)| rects[lhs].iou_with(&rects[rhs]) as f64)
            .collect()
    }

    #[test]
    fn init_rejects_out_of_range_thresholds() {
        assert!(NonMaxSuppressionInit {
            iou_threshold: r64(1.5),
            ..Default::default()
        }
        .build()
        .is_err());
        assert!(NonMaxSuppressionInit {
            confidence_threshold: r64(-0.1),
            ..Default::default()
        }
        .build()
        .is_err());
    }

    #[test]
    fn overlapping_pair_keeps_the_stronger() {
        let proposals = tensor_of(&[[0.0, 0.0, 10.0, 10.0], [1.0, 1.0, 10.0, 10.0]]);
        let confidences = Tensor::of_slice(&[0.9_f32, 0.8]);
        let batch_indices = Tensor::of_slice(&[0_i64, 0]);

        let output = suppression(0.5)
            .forward(&proposals, &confidences, &batch_indices, 1)
            .unwrap();

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].boxes.size(), &[1, 4]);
        assert!((f64::from(output[0].confidences.i(0)) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn survivors_never_overlap_beyond_threshold() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let n = 60_i64;
        let rows: Vec<[f32; 4]> = (0..n)
            .map(|_| {
                let x1 = rng.gen_range(0.0..20.0);
                let y1 = rng.gen_range(0.0..20.0);
                [
                    x1,
                    y1,
                    x1 + rng.gen_range(1.0..10.0),
                    y1 + rng.gen_range(1.0..10.0),
                ]
            })
            .collect();
        let proposals = tensor_of(&rows);
        let confidences = Tensor::rand(&[n], (Kind::Float, Device::Cpu));
        let batch_indices = Tensor::zeros(&[n], (Kind::Int64, Device::Cpu));

        let threshold = 0.4;
        let output = suppression(threshold)
            .forward(&proposals, &confidences, &batch_indices, 1)
            .unwrap();

        assert!(pairwise_ious(&output[0].boxes)
            .into_iter()
            .all(|iou| iou <= threshold));
    }

    #[test]
    fn suppression_is_idempotent() {
        let proposals = tensor_of(&[
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 10.0, 10.0],
            [20.0, 20.0, 28.0, 28.0],
            [21.0, 19.0, 28.0, 29.0],
        ]);
        let confidences = Tensor::of_slice(&[0.9_f32, 0.8, 0.7, 0.95]);
        let batch_indices = Tensor::zeros(&[4], (Kind::Int64, Device::Cpu));

        let nms = suppression(0.5);
        let first = nms
            .forward(&proposals, &confidences, &batch_indices, 1)
            .unwrap();

        let n_survivors = first[0].boxes.size()[0];
        let again = nms
            .forward(
                &first[0].boxes,
                &first[0].confidences,
                &Tensor::zeros(&[n_survivors], (Kind::Int64, Device::Cpu)),
                1,
            )
            .unwrap();

        assert_eq!(
            Vec::<f32>::from(first[0].boxes.view([-1])),
            Vec::<f32>::from(again[0].boxes.view([-1]))
        );
        assert_eq!(
            Vec::<f32>::from(&first[0].confidences),
            Vec::<f32>::from(&again[0].confidences)
        );
    }

    #[test]
    fn candidates_are_grouped_by_image() {
        let proposals = tensor_of(&[[0.0, 0.0, 10.0, 10.0], [0.0, 0.0, 10.0, 10.0]]);
        let confidences = Tensor::of_slice(&[0.9_f32, 0.8]);
        let batch_indices = Tensor::of_slice(&[0_i64, 1]);

        let output = suppression(0.5)
            .forward(&proposals, &confidences, &batch_indices, 2)
            .unwrap();

        // identical boxes in different images never suppress each other
        assert_eq!(output[0].boxes.size(), &[1, 4]);
        assert_eq!(output[1].boxes.size(), &[1, 4]);
    }

    #[test]
    fn empty_candidate_list_yields_empty_output() {
        let proposals = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        let confidences = Tensor::zeros(&[0], (Kind::Float, Device::Cpu));
        let batch_indices = Tensor::zeros(&[0], (Kind::Int64, Device::Cpu));

        let output = suppression(0.5)
            .forward(&proposals, &confidences, &batch_indices, 2)
            .unwrap();

        assert_eq!(output.len(), 2);
        assert_eq!(output[0].boxes.size(), &[0, 4]);
        assert_eq!(output[1].confidences.size(), &[0]);
    }
}
