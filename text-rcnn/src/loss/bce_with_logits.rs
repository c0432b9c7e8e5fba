use crate::common::*;

#[derive(Debug)]
pub struct BceWithLogitsLossInit {
    pub pos_weight: Option<Tensor>,
    pub reduction: Reduction,
}

impl BceWithLogitsLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            pos_weight: None,
            reduction,
        }
    }

    pub fn build(self) -> BceWithLogitsLoss {
        let Self {
            pos_weight,
            reduction,
        } = self;

        BceWithLogitsLoss {
            pos_weight,
            reduction,
        }
    }
}

/// Binary cross entropy computed from raw logits in the numerically
/// stable log-sigmoid form.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    pos_weight: Option<Tensor>,
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );
        debug_assert!(
            input.is_empty()
                || bool::from(target.ge(0.0).logical_and(&target.le(1.0)).all()),
            "target values must be in range of [0.0, 1.0]"
        );

        // an empty input contributes zero loss
        if input.is_empty() {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        input.binary_cross_entropy_with_logits(
            target,
            None::<&Tensor>,
            self.pos_weight.as_ref(),
            self.reduction,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bce_of_zero_logit_is_ln_two() {
        let loss_fn = BceWithLogitsLossInit::default(Reduction::Sum).build();
        let input = Tensor::of_slice(&[0.0_f32]);
        let target = Tensor::of_slice(&[1.0_f32]);
        let loss = f64::from(loss_fn.forward(&input, &target));
        assert!((loss - (2.0_f64).ln()).abs() < 1e-6);
    }

    #[test]
    fn bce_of_empty_input_is_zero() {
        let loss_fn = BceWithLogitsLossInit::default(Reduction::Sum).build();
        let input = Tensor::zeros(&[0], (Kind::Float, Device::Cpu));
        let target = Tensor::zeros(&[0], (Kind::Float, Device::Cpu));
        assert_eq!(f64::from(loss_fn.forward(&input, &target)), 0.0);
    }

    #[test]
    fn bce_matches_stable_form_for_large_logits() {
        // naive -ln(sigmoid(-40)) overflows to inf; the stable form is
        // close to the logit itself
        let loss_fn = BceWithLogitsLossInit::default(Reduction::Sum).build();
        let input = Tensor::of_slice(&[40.0_f32]);
        let target = Tensor::of_slice(&[0.0_f32]);
        let loss = f64::from(loss_fn.forward(&input, &target));
        assert!(loss.is_finite());
        assert!((loss - 40.0).abs() < 1e-4);
    }
}
