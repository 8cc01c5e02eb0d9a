// Motion vector prediction, per-axis rate/distortion cost, and the
// neighbor-similarity heuristics used for stability and loop-filter
// strength decisions. Grounded on examples/original_source/src/dsv.c
// (pred, dsv_mv_cost, dsv_movec_pred, dsv_neighbordif, dsv_neighbordif2).

use crate::block::{MotionVector, PictureParams};
use crate::util;

// "Closer of left/top to (left + top - topleft)" -- the median-ish predictor
// used per axis for both the x and y motion components.
pub fn pred(left: i32, top: i32, topleft: i32) -> i32 {
  let mm = left + top - topleft;
  let dl = (mm - left).abs();
  let dt = (mm - top).abs();
  if dl <= dt {
    left
  } else {
    top
  }
}

// Bit cost of a SEG-coded value: 2*n+1 where n is the unsigned-exp-Golomb
// prefix length of |v|, plus a sign bit for nonzero values.
fn seg_bits(v: i32) -> i32 {
  let mag = v.unsigned_abs() + 1;
  let n_bits = 31 - mag.leading_zeros();
  let mut bits = 2 * n_bits as i32 + 1;
  if v != 0 {
    bits += 1;
  }
  bits
}

// Gather the left/top/top-left predicted motion vectors for block (bx, by)
// in a row-major nblocks_h x nblocks_v grid, applying `pred` per axis.
// Out-of-frame neighbors (negative index, top row) are treated as zero.
pub fn movec_pred(mvs: &[MotionVector], params: &PictureParams, bx: i32, by: i32) -> (i32, i32) {
  let idx = |x: i32, y: i32| -> Option<usize> {
    if x < 0 || y < 0 || x >= params.nblocks_h as i32 || y >= params.nblocks_v as i32 {
      None
    } else {
      Some((y as usize) * (params.nblocks_h as usize) + x as usize)
    }
  };

  let get = |x: i32, y: i32| -> (i32, i32) {
    match idx(x, y) {
      Some(i) => (mvs[i].x as i32, mvs[i].y as i32),
      None => (0, 0),
    }
  };

  let (lx, ly) = get(bx - 1, by);
  let (tx, ty) = get(bx, by - 1);
  let (tlx, tly) = get(bx - 1, by - 1);

  (pred(lx, tx, tlx), pred(ly, ty, tly))
}

// Rate/distortion cost of coding (mx, my) against the block's predictor
// (px, py). `q` is the current quantizer; `sqr` squares the result for use
// as a distance-style metric in the hierarchical search.
pub fn mv_cost(params: &PictureParams, px: i32, py: i32, mx: i32, my: i32, q: i32, sqr: bool) -> i32 {
  let bits = seg_bits(mx - px) + seg_bits(my - py);

  let width = params.nblocks_h * params.blk_w;
  let height = params.nblocks_v * params.blk_h;
  let blkarea = (params.blk_w * params.blk_h) as i64;
  let area = (width * height).max(1) as i64;

  let qsq = ((q * q) >> 12).max(0) as i64;
  let b2sr = (256 * qsq * blkarea / area) as i32;

  let cost = (bits * b2sr) >> 8;
  if sqr {
    cost * cost
  } else {
    cost
  }
}

// Magnitude of the difference between a candidate vector and a spatial
// neighbor, used by `neighbordif`/`neighbordif2` below.
fn axis_dif(a: i32, b: i32) -> i32 {
  util::abs(a - b)
}

// Per-axis similarity to the left and top neighbors. Early-outs to (0, 0)
// when both axes are already within 2 quarter-pel units of the left
// neighbor, matching the original's cheap common case.
pub fn neighbordif2(mx: i32, my: i32, left: (i32, i32), top: (i32, i32)) -> (i32, i32) {
  let cmx = axis_dif(mx, left.0);
  let cmy = axis_dif(my, left.1);
  if cmx < 2 && cmy < 2 {
    return (0, 0);
  }
  let dx = (axis_dif(mx, left.0) + axis_dif(mx, top.0)) / 2;
  let dy = (axis_dif(my, left.1) + axis_dif(my, top.1)) / 2;
  (dx, dy)
}

// Scalar similarity metric folding both axes together: average of the x/y
// differences weighted two-to-one toward the dominant axis.
pub fn neighbordif(mx: i32, my: i32, left: (i32, i32), top: (i32, i32)) -> i32 {
  let (dx, dy) = neighbordif2(mx, my, left, top);
  (dx + dy + util::max(dx, dy)) / 3
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pred_picks_closer_neighbor() {
    assert_eq!(pred(0, 0, 0), 0);
    assert_eq!(pred(10, 0, 0), 10);
    assert_eq!(pred(4, 8, 0), 4);
  }

  #[test]
  fn neighbordif2_early_out() {
    assert_eq!(neighbordif2(1, 1, (0, 0), (5, 5)), (0, 0));
  }

  #[test]
  fn neighbordif2_nonzero_when_far() {
    let (dx, dy) = neighbordif2(10, 10, (0, 0), (0, 0));
    assert!(dx > 0 && dy > 0);
  }

  #[test]
  fn mv_cost_zero_at_predictor() {
    let params = PictureParams::new(640, 480, 16, 16, false, true, 1, 50);
    assert_eq!(mv_cost(&params, 4, 4, 4, 4, 50, false), 0);
  }

  #[test]
  fn mv_cost_grows_with_distance() {
    let params = PictureParams::new(640, 480, 16, 16, false, true, 1, 50);
    let near = mv_cost(&params, 0, 0, 1, 0, 50, false);
    let far = mv_cost(&params, 0, 0, 20, 0, 50, false);
    assert!(far >= near);
  }
}
