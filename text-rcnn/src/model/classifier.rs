use crate::common::*;

#[derive(Debug, Clone)]
pub struct ClassifierHeadInit {
    pub in_channels: i64,
    pub n_classes: i64,
    /// The `(height, width)` each pooled region is resized to.
    pub roi_size: (i64, i64),
    pub hidden_dim: i64,
    pub dropout_p: R64,
}

impl ClassifierHeadInit {
    pub fn build(self, path: &nn::Path) -> Result<ClassifierHead> {
        let Self {
            in_channels,
            n_classes,
            roi_size,
            hidden_dim,
            dropout_p,
        } = self;

        ensure!(
            in_channels > 0 && hidden_dim > 0,
            "channel and hidden dims must be positive"
        );
        ensure!(n_classes >= 2, "need at least two classes, got {}", n_classes);
        ensure!(
            roi_size.0 > 0 && roi_size.1 > 0,
            "roi size must be positive, got {:?}",
            roi_size
        );
        ensure!(
            (0.0..1.0).contains(&dropout_p.raw()),
            "dropout probability must be in [0, 1), got {}",
            dropout_p
        );

        let fc = nn::linear(path / "fc", in_channels, hidden_dim, Default::default());
        let cls = nn::linear(path / "cls", hidden_dim, n_classes, Default::default());

        Ok(ClassifierHead {
            fc,
            cls,
            in_channels,
            n_classes,
            roi_size,
            dropout_p: dropout_p.raw(),
        })
    }
}

/// The second-stage head that pools each proposed region from the
/// shared feature map and predicts its class.
#[derive(Debug)]
pub struct ClassifierHead {
    fc: nn::Linear,
    cls: nn::Linear,
    in_channels: i64,
    n_classes: i64,
    roi_size: (i64, i64),
    dropout_p: f64,
}

impl ClassifierHead {
    /// Predict class logits for each proposal.
    ///
    /// `proposals` are corner boxes `[n, 4]` in feature map coordinates
    /// and `batch_indices` maps each proposal to its image.
    pub fn forward_t(
        &self,
        feature_map: &Tensor,
        proposals: &Tensor,
        batch_indices: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (batch_size, channels, feat_h, feat_w) = feature_map.size4()?;
        ensure!(
            channels == self.in_channels,
            "expected {} feature channels, got {}",
            self.in_channels,
            channels
        );
        let n_proposals = proposals.size2()?.0;
        ensure!(
            batch_indices.size1()? == n_proposals,
            "proposal and batch index counts differ"
        );

        let (roi_h, roi_w) = self.roi_size;
        let pooled = if n_proposals == 0 {
            Tensor::zeros(
                &[0, channels, roi_h, roi_w],
                (Kind::Float, feature_map.device()),
            )
        } else {
            let boxes = Vec::<f32>::from(&proposals.contiguous().view([-1]).to_device(Device::Cpu));
            let images = Vec::<i64>::from(&batch_indices.to_device(Device::Cpu));

            let regions: Vec<_> = izip!(boxes.chunks(4), images)
                .map(|(corners, image)| {
                    ensure!(
                        (0..batch_size).contains(&image),
                        "batch index {} out of range",
                        image
                    );
                    let [x1, y1, x2, y2] = match *corners {
                        [x1, y1, x2, y2] => [x1, y1, x2, y2],
                        _ => unreachable!(),
                    };

                    // quantize to whole cells, keeping at least one
                    let left = (x1.floor() as i64).clamp(0, feat_w - 1);
                    let top = (y1.floor() as i64).clamp(0, feat_h - 1);
                    let right = (x2.ceil() as i64).clamp(left + 1, feat_w);
                    let bottom = (y2.ceil() as i64).clamp(top + 1, feat_h);

                    let region = feature_map
                        .i((image..image + 1, .., top..bottom, left..right))
                        .adaptive_max_pool2d(&[roi_h, roi_w])
                        .0;
                    Ok(region)
                })
                .try_collect()?;

            Tensor::cat(&regions, 0)
        };

        let features = pooled
            .adaptive_avg_pool2d(&[1, 1])
            .view([-1, channels]);
        let logits = features
            .apply(&self.fc)
            .dropout(self.dropout_p, train)
            .apply(&self.cls);

        Ok(logits)
    }

    /// Sum-reduced cross entropy of the predicted logits against the
    /// matched ground truth classes.
    pub fn loss(&self, logits: &Tensor, gt_classes: &Tensor) -> Tensor {
        if logits.is_empty() {
            return Tensor::zeros(&[], (Kind::Float, logits.device())).set_requires_grad(false);
        }
        logits.cross_entropy_for_logits(gt_classes)
    }

    pub fn n_classes(&self) -> i64 {
        self.n_classes
    }
}
