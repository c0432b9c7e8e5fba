use crate::common::*;

/// Anchor grid configuration.
///
/// One anchor center sits at the midpoint of every feature map cell, and
/// each center carries one box per (scale, ratio) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorGridInit {
    pub feature_h: i64,
    pub feature_w: i64,
    /// Scale factors controlling anchor box area.
    pub scales: Vec<R64>,
    /// Aspect ratios controlling width/height skew.
    pub ratios: Vec<R64>,
}

impl AnchorGridInit {
    pub fn build(self) -> Result<AnchorGrid> {
        let Self {
            feature_h,
            feature_w,
            scales,
            ratios,
        } = self;

        ensure!(
            feature_h > 0 && feature_w > 0,
            "feature map size must be positive, got {}x{}",
            feature_h,
            feature_w
        );
        ensure!(!scales.is_empty(), "scale set must not be empty");
        ensure!(!ratios.is_empty(), "ratio set must not be empty");
        ensure!(
            scales.iter().all(|scale| scale.raw() > 0.0),
            "scales must be positive, got {:?}",
            scales
        );
        ensure!(
            ratios.iter().all(|ratio| ratio.raw() > 0.0),
            "ratios must be positive, got {:?}",
            ratios
        );

        // variant order is outer scales, inner ratios; downstream flat
        // indices depend on it
        let variants: Vec<(f64, f64)> = iproduct!(&scales, &ratios)
            .map(|(scale, ratio)| {
                let w = scale.raw() * ratio.raw().sqrt();
                let h = scale.raw() / ratio.raw().sqrt();
                (w, h)
            })
            .collect();
        let n_variants = variants.len() as i64;

        let data: Vec<f32> = iproduct!(0..feature_h, 0..feature_w)
            .flat_map(|(row, col)| {
                let cx = col as f64 + 0.5;
                let cy = row as f64 + 0.5;

                variants.iter().flat_map(move |&(w, h)| {
                    [
                        (cx - w / 2.0) as f32,
                        (cy - h / 2.0) as f32,
                        (cx + w / 2.0) as f32,
                        (cy + h / 2.0) as f32,
                    ]
                })
            })
            .collect();

        let grid = Tensor::of_slice(&data)
            .view([feature_h, feature_w, n_variants, 4])
            .set_requires_grad(false);

        info!(
            "built anchor grid {}x{} with {} variants per cell",
            feature_h, feature_w, n_variants
        );

        Ok(AnchorGrid {
            grid,
            feature_h,
            feature_w,
            n_variants,
        })
    }
}

/// The immutable set of candidate boxes over a feature map.
///
/// Constructed once per model configuration and shared read-only across
/// every image and forward pass afterwards.
#[derive(Debug, Getters, CopyGetters)]
pub struct AnchorGrid {
    /// Anchor boxes in corner format, shape `[h, w, n_variants, 4]`.
    #[get = "pub"]
    grid: Tensor,
    #[get_copy = "pub"]
    feature_h: i64,
    #[get_copy = "pub"]
    feature_w: i64,
    #[get_copy = "pub"]
    n_variants: i64,
}

impl AnchorGrid {
    pub fn num_anchors(&self) -> i64 {
        self.feature_h * self.feature_w * self.n_variants
    }

    /// The `[h * w * n_variants, 4]` view whose row index is the flat
    /// anchor index.
    pub fn flat(&self) -> Tensor {
        self.grid.view([-1, 4])
    }
}
