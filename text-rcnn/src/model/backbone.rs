use crate::common::*;

/// The feature extraction capability consumed by the region proposal
/// network. The network never inspects the extractor's internals.
pub trait FeatureExtractor {
    /// Compute the feature map of an image batch.
    fn forward_t(&self, images: &Tensor, train: bool) -> Tensor;

    /// The `(channels, height, width)` of the produced feature map for
    /// the configured input size.
    fn output_shape(&self) -> (i64, i64, i64);
}

/// The supported ResNet backbone family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackboneKind {
    Resnet18,
    Resnet34,
    Resnet50,
    Resnet101,
    Resnet152,
}

impl BackboneKind {
    fn block_counts(self) -> [i64; 4] {
        match self {
            Self::Resnet18 => [2, 2, 2, 2],
            Self::Resnet34 | Self::Resnet50 => [3, 4, 6, 3],
            Self::Resnet101 => [3, 4, 23, 3],
            Self::Resnet152 => [3, 8, 36, 3],
        }
    }

    fn uses_bottleneck(self) -> bool {
        matches!(self, Self::Resnet50 | Self::Resnet101 | Self::Resnet152)
    }
}

/// A ResNet body truncated before the pooling and classification head,
/// producing a stride-32 feature map.
#[derive(Debug)]
pub struct ResNetBackbone {
    body: nn::SequentialT,
    out_c: i64,
    out_h: i64,
    out_w: i64,
}

impl ResNetBackbone {
    /// Build the body and probe its output shape with a placeholder
    /// input, as the shape depends on the configured image size.
    pub fn new(path: &nn::Path, kind: BackboneKind, input_size: (i64, i64)) -> Result<Self> {
        let (input_h, input_w) = input_size;
        ensure!(
            input_h >= 32 && input_w >= 32,
            "input size must be at least 32x32, got {}x{}",
            input_h,
            input_w
        );

        let body = resnet_body(path, kind);

        let placeholder = Tensor::zeros(&[1, 3, input_h, input_w], (Kind::Float, path.device()));
        let output = tch::no_grad(|| body.forward_t(&placeholder, false));
        let (_, out_c, out_h, out_w) = output.size4()?;

        Ok(Self {
            body,
            out_c,
            out_h,
            out_w,
        })
    }
}

impl FeatureExtractor for ResNetBackbone {
    fn forward_t(&self, images: &Tensor, train: bool) -> Tensor {
        self.body.forward_t(images, train)
    }

    fn output_shape(&self) -> (i64, i64, i64) {
        (self.out_c, self.out_h, self.out_w)
    }
}

fn conv2d(path: &nn::Path, c_in: i64, c_out: i64, ksize: i64, padding: i64, stride: i64) -> nn::Conv2D {
    let conv2d_cfg = nn::ConvConfig {
        stride,
        padding,
        bias: false,
        ..Default::default()
    };
    nn::conv2d(path, c_in, c_out, ksize, conv2d_cfg)
}

fn downsample(path: &nn::Path, c_in: i64, c_out: i64, stride: i64) -> nn::SequentialT {
    if stride != 1 || c_in != c_out {
        nn::seq_t()
            .add(conv2d(&(path / "0"), c_in, c_out, 1, 0, stride))
            .add(nn::batch_norm2d(&(path / "1"), c_out, Default::default()))
    } else {
        nn::seq_t()
    }
}

fn basic_block(path: &nn::Path, c_in: i64, c_out: i64, stride: i64) -> impl nn::ModuleT {
    let conv1 = conv2d(&(path / "conv1"), c_in, c_out, 3, 1, stride);
    let bn1 = nn::batch_norm2d(&(path / "bn1"), c_out, Default::default());
    let conv2 = conv2d(&(path / "conv2"), c_out, c_out, 3, 1, 1);
    let bn2 = nn::batch_norm2d(&(path / "bn2"), c_out, Default::default());
    let shortcut = downsample(&(path / "downsample"), c_in, c_out, stride);

    nn::func_t(move |xs, train| {
        let ys = xs
            .apply(&conv1)
            .apply_t(&bn1, train)
            .relu()
            .apply(&conv2)
            .apply_t(&bn2, train);
        (xs.apply_t(&shortcut, train) + ys).relu()
    })
}

fn bottleneck_block(path: &nn::Path, c_in: i64, c_mid: i64, stride: i64) -> impl nn::ModuleT {
    let expansion = 4;
    let conv1 = conv2d(&(path / "conv1"), c_in, c_mid, 1, 0, 1);
    let bn1 = nn::batch_norm2d(&(path / "bn1"), c_mid, Default::default());
    let conv2 = conv2d(&(path / "conv2"), c_mid, c_mid, 3, 1, stride);
    let bn2 = nn::batch_norm2d(&(path / "bn2"), c_mid, Default::default());
    let conv3 = conv2d(&(path / "conv3"), c_mid, c_mid * expansion, 1, 0, 1);
    let bn3 = nn::batch_norm2d(&(path / "bn3"), c_mid * expansion, Default::default());
    let shortcut = downsample(&(path / "downsample"), c_in, c_mid * expansion, stride);

    nn::func_t(move |xs, train| {
        let ys = xs
            .apply(&conv1)
            .apply_t(&bn1, train)
            .relu()
            .apply(&conv2)
            .apply_t(&bn2, train)
            .relu()
            .apply(&conv3)
            .apply_t(&bn3, train);
        (xs.apply_t(&shortcut, train) + ys).relu()
    })
}

fn stage(path: &nn::Path, kind: BackboneKind, c_in: i64, c_out: i64, count: i64, stride: i64) -> nn::SequentialT {
    let mut layer = nn::seq_t();
    for index in 0..count {
        let path = path / index;
        let (c_in, stride) = if index == 0 { (c_in, stride) } else { (expanded(kind, c_out), 1) };
        if kind.uses_bottleneck() {
            layer = layer.add(bottleneck_block(&path, c_in, c_out, stride));
        } else {
            layer = layer.add(basic_block(&path, c_in, c_out, stride));
        }
    }
    layer
}

fn expanded(kind: BackboneKind, c_out: i64) -> i64 {
    if kind.uses_bottleneck() {
        c_out * 4
    } else {
        c_out
    }
}

fn resnet_body(path: &nn::Path, kind: BackboneKind) -> nn::SequentialT {
    let counts = kind.block_counts();

    nn::seq_t()
        .add(conv2d(&(path / "conv1"), 3, 64, 7, 3, 2))
        .add(nn::batch_norm2d(&(path / "bn1"), 64, Default::default()))
        .add_fn(|xs| xs.relu().max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false))
        .add(stage(&(path / "layer1"), kind, 64, 64, counts[0], 1))
        .add(stage(&(path / "layer2"), kind, expanded(kind, 64), 128, counts[1], 2))
        .add(stage(&(path / "layer3"), kind, expanded(kind, 128), 256, counts[2], 2))
        .add(stage(&(path / "layer4"), kind, expanded(kind, 256), 512, counts[3], 2))
}
