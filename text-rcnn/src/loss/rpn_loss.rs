use super::{BceWithLogitsLoss, BceWithLogitsLossInit, SmoothL1Loss, SmoothL1LossInit};
use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpnLossInit {
    /// The weight of the offset regression term.
    pub reg_weight: R64,
    /// The weight of the confidence term.
    pub conf_weight: R64,
}

impl Default for RpnLossInit {
    fn default() -> Self {
        Self {
            reg_weight: r64(5.0),
            conf_weight: r64(1.0),
        }
    }
}

impl RpnLossInit {
    pub fn build(self) -> Result<RpnLoss> {
        let Self {
            reg_weight,
            conf_weight,
        } = self;

        ensure!(
            reg_weight.raw() >= 0.0 && conf_weight.raw() >= 0.0,
            "loss weights must be non-negative, got reg {} conf {}",
            reg_weight,
            conf_weight
        );

        Ok(RpnLoss {
            reg_weight: reg_weight.raw(),
            conf_weight: conf_weight.raw(),
            reg_loss: SmoothL1LossInit::default(Reduction::Sum).build()?,
            conf_loss: BceWithLogitsLossInit::default(Reduction::Sum).build(),
        })
    }
}

/// The weighted sum of confidence and offset regression losses.
///
/// Both terms are sum-reduced and normalized by batch size rather than
/// anchor count, so the magnitude scales with object density per image.
#[derive(Debug)]
pub struct RpnLoss {
    reg_weight: f64,
    conf_weight: f64,
    reg_loss: SmoothL1Loss,
    conf_loss: BceWithLogitsLoss,
}

impl RpnLoss {
    /// `pos_conf` and `neg_conf` are raw logits of the sampled positive
    /// and negative anchors; offsets are `[n_pos, 4]`.
    pub fn forward(
        &self,
        pos_conf: &Tensor,
        neg_conf: &Tensor,
        pred_offsets: &Tensor,
        gt_offsets: &Tensor,
        batch_size: i64,
    ) -> Tensor {
        let batch_size = batch_size as f64;

        let reg_loss = self.reg_loss.forward(pred_offsets, gt_offsets) / batch_size;

        let conf_input = Tensor::cat(&[pos_conf, neg_conf], 0);
        let conf_target = Tensor::cat(&[pos_conf.ones_like(), neg_conf.zeros_like()], 0);
        let conf_loss = self.conf_loss.forward(&conf_input, &conf_target) / batch_size;

        reg_loss * self.reg_weight + conf_loss * self.conf_weight
    }
}
