//! Loss functions of the region proposal stage.

pub use bce_with_logits::*;
mod bce_with_logits;

pub use smooth_l1::*;
mod smooth_l1;

pub use rpn_loss::*;
mod rpn_loss;
