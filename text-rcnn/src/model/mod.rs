//! The two-stage detection model: backbone, proposal head, region
//! proposal network, and classification head.

pub use backbone::*;
pub mod backbone;

pub use proposal_head::*;
pub mod proposal_head;

pub use classifier::*;
pub mod classifier;

pub use rpn::*;
pub mod rpn;

pub use detector::*;
pub mod detector;
