//! Projection of box tensors between image pixel space and feature map
//! cell space.

use crate::common::*;

/// The direction of a box projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectDirection {
    /// Divide pixel coordinates by the stride factors.
    ToFeatureSpace,
    /// Multiply cell coordinates by the stride factors.
    ToImageSpace,
}

/// Integer stride factors between image size and feature map size.
///
/// Any remainder of the division is discarded.
pub fn scale_factors(image_hw: (i64, i64), feature_hw: (i64, i64)) -> Result<(i64, i64)> {
    let (image_h, image_w) = image_hw;
    let (feature_h, feature_w) = feature_hw;
    ensure!(
        feature_h > 0 && feature_w > 0,
        "feature map size must be positive, got {}x{}",
        feature_h,
        feature_w
    );
    ensure!(
        image_h >= feature_h && image_w >= feature_w,
        "image size {}x{} is smaller than feature map size {}x{}",
        image_h,
        image_w,
        feature_h,
        feature_w
    );

    Ok((image_h / feature_h, image_w / feature_w))
}

/// Project `[n, 4]` corner boxes between coordinate spaces, scaling x by
/// `width_scale` and y by `height_scale`.
///
/// Sentinel rows (all four coordinates exactly -1) pass through
/// unchanged, so a later sentinel check still recognizes them.
pub fn project_boxes(
    boxes: &Tensor,
    width_scale: i64,
    height_scale: i64,
    direction: ProjectDirection,
) -> Tensor {
    let factor = Tensor::of_slice(&[
        width_scale as f32,
        height_scale as f32,
        width_scale as f32,
        height_scale as f32,
    ])
    .to_device(boxes.device());

    let scaled = match direction {
        ProjectDirection::ToImageSpace => boxes * &factor,
        ProjectDirection::ToFeatureSpace => boxes / &factor,
    };

    // [n, 1] mask of sentinel rows
    let sentinel = boxes
        .eq(-1.0)
        .sum_dim_intlist(&[1], true, Kind::Int64)
        .eq(4_i64);

    boxes.where_self(&sentinel, &scaled)
}
