use crate::common::*;

#[derive(Debug, Clone)]
pub struct ProposalHeadInit {
    pub in_channels: i64,
    pub hidden_channels: i64,
    /// Anchor variants per grid cell.
    pub n_variants: i64,
    pub dropout_p: R64,
}

impl ProposalHeadInit {
    pub fn build(self, path: &nn::Path) -> Result<ProposalHead> {
        let Self {
            in_channels,
            hidden_channels,
            n_variants,
            dropout_p,
        } = self;

        ensure!(
            in_channels > 0 && hidden_channels > 0 && n_variants > 0,
            "channel and variant counts must be positive"
        );
        ensure!(
            (0.0..1.0).contains(&dropout_p.raw()),
            "dropout probability must be in [0, 1), got {}",
            dropout_p
        );

        let hidden = nn::conv2d(
            path / "hidden",
            in_channels,
            hidden_channels,
            3,
            nn::ConvConfig {
                padding: 1,
                ..Default::default()
            },
        );
        let conf = nn::conv2d(
            path / "conf",
            hidden_channels,
            n_variants,
            1,
            Default::default(),
        );
        let reg = nn::conv2d(
            path / "reg",
            hidden_channels,
            4 * n_variants,
            1,
            Default::default(),
        );

        Ok(ProposalHead {
            hidden,
            conf,
            reg,
            n_variants,
            dropout_p: dropout_p.raw(),
        })
    }
}

/// Per-anchor predictions in anchor flat index order.
#[derive(Debug, TensorLike)]
pub struct ProposalPrediction {
    /// Raw objectness logits, shape `[batch_size * n_anchors]`.
    pub conf_logits: Tensor,
    /// Box regression offsets, shape `[batch_size * n_anchors, 4]`.
    pub offsets: Tensor,
}

/// A small convolutional head predicting per-anchor objectness and box
/// offsets from the backbone feature map.
#[derive(Debug)]
pub struct ProposalHead {
    hidden: nn::Conv2D,
    conf: nn::Conv2D,
    reg: nn::Conv2D,
    n_variants: i64,
    dropout_p: f64,
}

impl ProposalHead {
    pub fn forward_t(&self, feature_map: &Tensor, train: bool) -> ProposalPrediction {
        let hidden = feature_map
            .apply(&self.hidden)
            .relu()
            .dropout(self.dropout_p, train);

        // Flatten in (row, col, variant) order so a prediction's flat
        // index equals the corresponding anchor's flat index.
        let conf_logits = hidden
            .apply(&self.conf)
            .permute(&[0, 2, 3, 1])
            .contiguous()
            .view([-1]);
        let offsets = hidden
            .apply(&self.reg)
            .permute(&[0, 2, 3, 1])
            .contiguous()
            .view([-1, 4]);

        debug_assert_eq!(conf_logits.size1().unwrap() * 4, offsets.numel() as i64);

        ProposalPrediction {
            conf_logits,
            offsets,
        }
    }

    pub fn n_variants(&self) -> i64 {
        self.n_variants
    }
}
