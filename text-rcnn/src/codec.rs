//! Box format conversion and anchor offset encoding on box tensors.
//!
//! All functions operate on `[n, 4]` float tensors. Corner boxes are
//! `(x1, y1, x2, y2)`, center-size boxes are `(cx, cy, w, h)`, offsets
//! are `(dx, dy, dw, dh)` relative to an anchor box.

use crate::common::*;

/// Convert corner boxes to center-size boxes.
pub fn corners_to_cxcywh(boxes: &Tensor) -> Tensor {
    let x1 = boxes.select(1, 0);
    let y1 = boxes.select(1, 1);
    let x2 = boxes.select(1, 2);
    let y2 = boxes.select(1, 3);

    let w = &x2 - &x1;
    let h = &y2 - &y1;
    let cx = &x1 + &w / 2.0;
    let cy = &y1 + &h / 2.0;

    Tensor::stack(&[cx, cy, w, h], 1)
}

/// Convert center-size boxes to corner boxes.
pub fn cxcywh_to_corners(boxes: &Tensor) -> Tensor {
    let cx = boxes.select(1, 0);
    let cy = boxes.select(1, 1);
    let w = boxes.select(1, 2);
    let h = boxes.select(1, 3);

    let x1 = &cx - &w / 2.0;
    let y1 = &cy - &h / 2.0;
    let x2 = &cx + &w / 2.0;
    let y2 = &cy + &h / 2.0;

    Tensor::stack(&[x1, y1, x2, y2], 1)
}

/// Encode ground truth boxes as offsets relative to anchor boxes.
///
/// Both inputs are corner boxes of equal length. The result is undefined
/// for zero-size anchors or ground truth boxes; callers must filter
/// sentinel and degenerate rows beforehand.
pub fn encode(anchors: &Tensor, gt_boxes: &Tensor) -> Tensor {
    let anchors = corners_to_cxcywh(anchors);
    let gt_boxes = corners_to_cxcywh(gt_boxes);

    let anc_cx = anchors.select(1, 0);
    let anc_cy = anchors.select(1, 1);
    let anc_w = anchors.select(1, 2);
    let anc_h = anchors.select(1, 3);

    let gt_cx = gt_boxes.select(1, 0);
    let gt_cy = gt_boxes.select(1, 1);
    let gt_w = gt_boxes.select(1, 2);
    let gt_h = gt_boxes.select(1, 3);

    let dx = (&gt_cx - &anc_cx) / &anc_w;
    let dy = (&gt_cy - &anc_cy) / &anc_h;
    let dw = (&gt_w / &anc_w).log();
    let dh = (&gt_h / &anc_h).log();

    Tensor::stack(&[dx, dy, dw, dh], 1)
}

/// Apply predicted offsets to anchor boxes, producing corner boxes.
///
/// The exact algebraic inverse of [`encode`] for the same anchors.
pub fn decode(anchors: &Tensor, offsets: &Tensor) -> Tensor {
    let anchors = corners_to_cxcywh(anchors);

    let anc_cx = anchors.select(1, 0);
    let anc_cy = anchors.select(1, 1);
    let anc_w = anchors.select(1, 2);
    let anc_h = anchors.select(1, 3);

    let dx = offsets.select(1, 0);
    let dy = offsets.select(1, 1);
    let dw = offsets.select(1, 2);
    let dh = offsets.select(1, 3);

    let cx = &anc_cx + &dx * &anc_w;
    let cy = &anc_cy + &dy * &anc_h;
    let w = &anc_w * &dw.exp();
    let h = &anc_h * &dh.exp();

    cxcywh_to_corners(&Tensor::stack(&[cx, cy, w, h], 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn max_abs_diff(lhs: &Tensor, rhs: &Tensor) -> f64 {
        f64::from((lhs - rhs).abs().max())
    }

    #[test]
    fn corner_center_round_trip() {
        let boxes = Tensor::of_slice(&[0.0f32, 0.0, 10.0, 10.0, 2.0, 3.0, 5.0, 11.0]).view([2, 4]);
        let center = corners_to_cxcywh(&boxes);
        let expect = Tensor::of_slice(&[5.0f32, 5.0, 10.0, 10.0, 3.5, 7.0, 3.0, 8.0]).view([2, 4]);
        assert!(max_abs_diff(&center, &expect) < 1e-6);

        let back = cxcywh_to_corners(&center);
        assert!(max_abs_diff(&back, &boxes) < 1e-6);
    }

    #[test]
    fn encode_then_decode_round_trip() {
        let mut rng = rand::thread_rng();
        let n = 64;

        let make_boxes = |rng: &mut ThreadRng| {
            let rows: Vec<f32> = (0..n)
                .flat_map(|_| {
                    let x1 = rng.gen_range(0.0..20.0);
                    let y1 = rng.gen_range(0.0..20.0);
                    let w = rng.gen_range(0.5..15.0);
                    let h = rng.gen_range(0.5..15.0);
                    [x1, y1, x1 + w, y1 + h]
                })
                .collect();
            Tensor::of_slice(&rows).view([n, 4])
        };

        let anchors = make_boxes(&mut rng);
        let gt_boxes = make_boxes(&mut rng);

        let offsets = encode(&anchors, &gt_boxes);
        let decoded = decode(&anchors, &offsets);

        assert!(max_abs_diff(&decoded, &gt_boxes) < 1e-4);
    }

    #[test]
    fn encode_known_values() {
        // anchor: 4x4 centered at (2, 2); gt: 8x2 centered at (4, 3)
        let anchors = Tensor::of_slice(&[0.0f32, 0.0, 4.0, 4.0]).view([1, 4]);
        let gt_boxes = Tensor::of_slice(&[0.0f32, 2.0, 8.0, 4.0]).view([1, 4]);

        let offsets = Vec::<f32>::from(encode(&anchors, &gt_boxes).view([-1]));
        assert_abs_diff_eq!(offsets[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(offsets[1], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(offsets[2], (2.0f32).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(offsets[3], (0.5f32).ln(), epsilon = 1e-6);
    }

    #[test]
    fn zero_offsets_decode_to_anchor() {
        let anchors = Tensor::of_slice(&[1.0f32, 2.0, 5.0, 6.0]).view([1, 4]);
        let offsets = Tensor::zeros(&[1, 4], (Kind::Float, Device::Cpu));
        let decoded = decode(&anchors, &offsets);
        assert!(max_abs_diff(&decoded, &anchors) < 1e-6);
    }

    #[test]
    fn codec_accepts_empty_input() {
        let anchors = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        let offsets = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        let decoded = decode(&anchors, &offsets);
        assert_eq!(decoded.size(), &[0, 4]);
    }
}
