use crate::common::*;

#[derive(Debug)]
pub struct SmoothL1LossInit {
    pub reduction: Reduction,
    /// The absolute residual where the loss switches from quadratic to
    /// linear.
    pub beta: f64,
}

impl SmoothL1LossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            reduction,
            beta: 1.0,
        }
    }

    pub fn build(self) -> Result<SmoothL1Loss> {
        let Self { reduction, beta } = self;
        ensure!(beta > 0.0, "beta must be positive, got {}", beta);

        Ok(SmoothL1Loss { reduction, beta })
    }
}

/// Smooth L1 (Huber-style) regression loss.
#[derive(Debug)]
pub struct SmoothL1Loss {
    reduction: Reduction,
    beta: f64,
}

impl SmoothL1Loss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );

        // an empty input contributes zero loss
        if input.is_empty() {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        input.smooth_l1_loss(target, self.reduction, self.beta)
    }
}
