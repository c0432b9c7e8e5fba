use crate::{codec, common::*};

/// Matching thresholds and negative sampling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherInit {
    /// Anchors whose best IoU reaches this are positive.
    pub pos_iou_thresh: R64,
    /// Anchors whose best IoU stays below this are negative; anchors in
    /// between are ignored.
    pub neg_iou_thresh: R64,
    /// Sampled negatives per positive anchor.
    pub neg_ratio: R64,
}

impl Default for MatcherInit {
    fn default() -> Self {
        Self {
            pos_iou_thresh: r64(0.7),
            neg_iou_thresh: r64(0.3),
            neg_ratio: r64(1.0),
        }
    }
}

impl MatcherInit {
    pub fn build(self) -> Result<Matcher> {
        let Self {
            pos_iou_thresh,
            neg_iou_thresh,
            neg_ratio,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&pos_iou_thresh.raw()),
            "pos_iou_thresh must be in [0, 1], got {}",
            pos_iou_thresh
        );
        ensure!(
            (0.0..=1.0).contains(&neg_iou_thresh.raw()),
            "neg_iou_thresh must be in [0, 1], got {}",
            neg_iou_thresh
        );
        ensure!(
            neg_iou_thresh < pos_iou_thresh,
            "neg_iou_thresh {} must be less than pos_iou_thresh {}",
            neg_iou_thresh,
            pos_iou_thresh
        );
        ensure!(
            neg_ratio.raw() > 0.0,
            "neg_ratio must be positive, got {}",
            neg_ratio
        );

        Ok(Matcher {
            pos_iou_thresh: pos_iou_thresh.raw(),
            neg_iou_thresh: neg_iou_thresh.raw(),
            neg_ratio: neg_ratio.raw(),
        })
    }
}

/// Assigns positive/negative/ignored labels to anchors per image and
/// derives the regression targets of the positives.
#[derive(Debug)]
pub struct Matcher {
    pos_iou_thresh: f64,
    neg_iou_thresh: f64,
    neg_ratio: f64,
}

/// Matching results for one batch, recomputed every forward pass.
#[derive(Debug, TensorLike)]
pub struct MatchOutput {
    /// Flat indices of positive anchors into `[b * n_anchors]`, `[n_pos]`.
    pub pos_indices: Tensor,
    /// The source image of each positive anchor, `[n_pos]`.
    pub pos_batch_indices: Tensor,
    /// Flat indices of sampled negative anchors, `[n_neg]`.
    pub neg_indices: Tensor,
    /// Corner boxes of positive anchors, `[n_pos, 4]`.
    pub pos_anchors: Tensor,
    /// Encoded regression targets of positive anchors, `[n_pos, 4]`.
    pub gt_offsets: Tensor,
    /// Class label of the matched ground truth per positive, `[n_pos]`.
    pub gt_classes: Tensor,
}

impl Matcher {
    /// Match a flat anchor grid against sentinel-padded ground truth.
    ///
    /// `anchors` is `[n_anchors, 4]` in feature map space and is shared
    /// across the batch. `gt_boxes` is `[b, n_max_obj, 4]` in the same
    /// space, padded with `(-1, -1, -1, -1)` rows; `gt_classes` is
    /// `[b, n_max_obj]`, padded with -1.
    pub fn forward<R>(
        &self,
        anchors: &Tensor,
        gt_boxes: &Tensor,
        gt_classes: &Tensor,
        rng: &mut R,
    ) -> Result<MatchOutput>
    where
        R: Rng + ?Sized,
    {
        let (n_anchors, n_params) = anchors.size2()?;
        ensure!(n_params == 4, "anchors must have shape [n, 4]");
        let (batch_size, n_max_obj, _) = gt_boxes.size3()?;
        ensure!(
            gt_classes.size2()? == (batch_size, n_max_obj),
            "gt_classes shape does not match gt_boxes"
        );
        let device = anchors.device();
        let class_kind = gt_classes.kind();

        let mut pos_indices = vec![];
        let mut pos_batch_indices = vec![];
        let mut neg_indices = vec![];
        let mut pos_anchors = vec![];
        let mut gt_offsets = vec![];
        let mut matched_classes = vec![];

        for batch_index in 0..batch_size {
            let boxes = gt_boxes.i((batch_index, .., ..));
            let classes = gt_classes.i((batch_index, ..));

            // live rows have positive width and height; sentinel rows are
            // zero-size and are dropped by the same mask, keeping
            // degenerate boxes away from the codec
            let w = boxes.select(1, 2) - boxes.select(1, 0);
            let h = boxes.select(1, 3) - boxes.select(1, 1);
            let live = w.gt(0.0).logical_and(&h.gt(0.0)).nonzero().view([-1]);
            let n_live = live.size()[0];

            if n_live == 0 {
                // no objects: no positives, and the negative sample count
                // scales with the positive count
                pos_indices.push(Tensor::zeros(&[0], (Kind::Int64, device)));
                pos_batch_indices.push(Tensor::zeros(&[0], (Kind::Int64, device)));
                neg_indices.push(Tensor::zeros(&[0], (Kind::Int64, device)));
                pos_anchors.push(Tensor::zeros(&[0, 4], (Kind::Float, device)));
                gt_offsets.push(Tensor::zeros(&[0, 4], (Kind::Float, device)));
                matched_classes.push(Tensor::zeros(&[0], (class_kind, device)));
                continue;
            }

            let live_boxes = boxes.index_select(0, &live);
            let live_classes = classes.index_select(0, &live);

            let iou = iou_matrix(anchors, &live_boxes);

            // per-anchor best match; argmax returns the first maximal
            // index, so ties resolve to the lowest ground truth index
            let (best_iou, best_gt) = iou.max_dim(1, false);

            // the best anchor of every ground truth is forced positive and
            // claims that ground truth; writing in reversed order makes
            // the lowest ground truth index win a contested anchor
            let forced = iou.argmax(0, false);
            let gt_order = Tensor::arange(n_live, (Kind::Int64, device));
            let best_gt = best_gt.index_copy(0, &forced.flip(&[0]), &gt_order.flip(&[0]));

            let pos_mask = best_iou.ge(self.pos_iou_thresh).index_fill(0, &forced, 1_i64);
            let neg_mask = best_iou
                .lt(self.neg_iou_thresh)
                .logical_and(&pos_mask.logical_not());

            let pos_local = pos_mask.nonzero().view([-1]);
            let n_pos = pos_local.size()[0];

            let pos_anchor_boxes = anchors.index_select(0, &pos_local);
            let assigned = best_gt.index_select(0, &pos_local);
            let assigned_boxes = live_boxes.index_select(0, &assigned);
            let assigned_classes = live_classes.index_select(0, &assigned);
            let offsets = codec::encode(&pos_anchor_boxes, &assigned_boxes);

            // uniform down-sampling of negatives without replacement
            let neg_pool = Vec::<i64>::from(neg_mask.nonzero().view([-1]));
            let n_wanted = (n_pos as f64 * self.neg_ratio).round() as usize;
            let neg_local: Vec<i64> = if neg_pool.len() > n_wanted {
                rand::seq::index::sample(rng, neg_pool.len(), n_wanted)
                    .into_iter()
                    .map(|index| neg_pool[index])
                    .collect()
            } else {
                if neg_pool.len() < n_wanted {
                    warn!(
                        "image {}: only {} negative anchors available, wanted {}",
                        batch_index,
                        neg_pool.len(),
                        n_wanted
                    );
                }
                neg_pool
            };
            let neg_local = Tensor::of_slice(&neg_local).to_device(device);

            let flat_base = batch_index * n_anchors;
            pos_indices.push(&pos_local + flat_base);
            pos_batch_indices.push(Tensor::full(&[n_pos], batch_index, (Kind::Int64, device)));
            neg_indices.push(&neg_local + flat_base);
            pos_anchors.push(pos_anchor_boxes);
            gt_offsets.push(offsets);
            matched_classes.push(assigned_classes);
        }

        Ok(MatchOutput {
            pos_indices: Tensor::cat(&pos_indices, 0),
            pos_batch_indices: Tensor::cat(&pos_batch_indices, 0),
            neg_indices: Tensor::cat(&neg_indices, 0),
            pos_anchors: Tensor::cat(&pos_anchors, 0),
            gt_offsets: Tensor::cat(&gt_offsets, 0),
            gt_classes: Tensor::cat(&matched_classes, 0),
        })
    }
}

/// Pairwise IoU between two corner box tensors, shape `[n, m]`.
pub fn iou_matrix(lhs: &Tensor, rhs: &Tensor) -> Tensor {
    let lhs_x1 = lhs.select(1, 0).unsqueeze(1);
    let lhs_y1 = lhs.select(1, 1).unsqueeze(1);
    let lhs_x2 = lhs.select(1, 2).unsqueeze(1);
    let lhs_y2 = lhs.select(1, 3).unsqueeze(1);

    let rhs_x1 = rhs.select(1, 0).unsqueeze(0);
    let rhs_y1 = rhs.select(1, 1).unsqueeze(0);
    let rhs_x2 = rhs.select(1, 2).unsqueeze(0);
    let rhs_y2 = rhs.select(1, 3).unsqueeze(0);

    let inner_w = (lhs_x2.minimum(&rhs_x2) - lhs_x1.maximum(&rhs_x1)).clamp_min(0.0);
    let inner_h = (lhs_y2.minimum(&rhs_y2) - lhs_y1.maximum(&rhs_y1)).clamp_min(0.0);
    let inter_area = inner_w * inner_h;

    let lhs_area = (lhs_x2 - lhs_x1) * (lhs_y2 - lhs_y1);
    let rhs_area = (rhs_x2 - rhs_x1) * (rhs_y2 - rhs_y1);
    let union_area = lhs_area + rhs_area - &inter_area + 1e-8;

    inter_area / union_area
}
