// Hierarchical motion estimation: a diamond search seeded from zero,
// spatial-predictor, previous-frame and global-motion candidates, refined to
// quarter-pel, followed by the per-block mode decision (SKIP/INTRA-within-P/
// submask/MAINTAIN/SIMCMPLX/NOXMIT/EPRM) that hands the rest of the encoder
// a fully-decided MotionVector rather than a bare displacement.
//
// Grounded on examples/original_source/src/hme.c. The original is a large
// (roughly 2000-line) file combining a full downsample pyramid, per-level
// metrics, and the mode decision in one pass; this is a structurally
// faithful but condensed port -- the same stages in the same order (seed
// candidates -> diamond refine -> sub-pel refine -> mode decision), against
// a single resolution rather than the full pyramid. That condensation is
// recorded in DESIGN.md; the mode decision itself is not condensed away --
// every flag category hme.c's decision tree produces (SKIP, INTRA/submask,
// MAINTAIN, SIMCMPLX, NOXMITY/NOXMITC, EPRM) is derived and set here.

use crate::block::{self, MotionVector, PictureParams};
use crate::frame::{Frame, Plane};
use crate::meta;
use crate::mv_pred;
use crate::util;

#[derive(Clone, Copy)]
pub struct SearchConfig {
  pub effort: u8,
  pub quant: i32,
}

// Extra cost (in SAD units) a quadrant's intra prediction must beat the
// inter prediction by before INTRA-within-P is worth the submask/DC bits it
// costs to signal -- hme.c's equivalent is folded into its rate/distortion
// bookkeeping; this is a flat per-pixel stand-in for it.
const INTRA_DETAIL_BIAS_PER_PX: i64 = 2;
// Flat bit-cost stand-in for transmitting a literal source DC versus
// falling back to the reference average (which costs nothing extra).
const DC_TRANSMIT_PENALTY: i64 = 32;
// A block whose worst-case per-pixel residual could saturate a non-EPRM
// reconstruction (mc::subtract's `|s - p| > 127` branch) needs EPRM.
const EPRM_CLIP_THRESH: i32 = 127;
// Below this average per-pixel residual magnitude, a plane's residual is
// cheaper to not transmit at all (mc::subtract's `noxmit` branch, forcing a
// neutral 128) than to code it.
const NOXMIT_THRESH: i64 = 2;
const MAINTAIN_VARIANCE_THRESH: i32 = 6;
// Same RINGING heuristic encoder.rs applies to I-frame blocks (see its
// block_ringing_decision doc comment for the gradient/dark-luma rationale);
// P-frame blocks need the identical decision so L2Adaptive's 5-tap filter
// and HZCC's RINGING divisor stay reachable on inter frames too.
const RINGING_GRADIENT_THRESH: i32 = 24;
const RINGING_DARK_LUMA_THRESH: i32 = 24;

fn ringing_decision(refp: &Plane, x: isize, y: isize, dx: isize, dy: isize, w: usize, h: usize) -> bool {
  let mut sum: i64 = 0;
  let mut grad: i64 = 0;
  let mut n: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      let v = refp.get(x + bx + dx, y + by + dy) as i32;
      sum += v as i64;
      n += 1;
      if bx + 1 < w as isize {
        grad += (v - refp.get(x + bx + 1 + dx, y + by + dy) as i32).unsigned_abs() as i64;
      }
      if by + 1 < h as isize {
        grad += (v - refp.get(x + bx + dx, y + by + 1 + dy) as i32).unsigned_abs() as i64;
      }
    }
  }
  if n == 0 {
    return false;
  }
  let avg = (sum / n) as i32;
  let grad_avg = (grad / n) as i32;
  avg < RINGING_DARK_LUMA_THRESH || grad_avg > RINGING_GRADIENT_THRESH
}

// Sum of absolute differences between a candidate block in `refp` and the
// source block in `cur`, used as the per-candidate search metric.
fn block_sad(cur: &Plane, refp: &Plane, x: isize, y: isize, dx: isize, dy: isize, w: usize, h: usize) -> i64 {
  let mut sum: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      let a = cur.get(x + bx, y + by) as i32;
      let b = refp.get(x + bx + dx, y + by + dy) as i32;
      sum += (a - b).unsigned_abs() as i64;
    }
  }
  sum
}

// Cost of DC-predicting `cur`'s block from a single average taken out of
// `refp` at offset (dx, dy) -- also used with `refp = cur, dx = dy = 0` to
// get the block's own source average and its cost against itself.
fn block_dc_cost(cur: &Plane, refp: &Plane, x: isize, y: isize, dx: isize, dy: isize, w: usize, h: usize) -> (i64, i32) {
  let n = (w * h).max(1) as i64;
  let mut rsum: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      rsum += refp.get(x + bx + dx, y + by + dy) as i64;
    }
  }
  let avg = (rsum / n) as i32;
  let mut cost: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      cost += (cur.get(x + bx, y + by) as i32 - avg).unsigned_abs() as i64;
    }
  }
  (cost, avg)
}

// Cost of predicting `cur`'s block with the single literal value `v`,
// used once the whole-block DC candidate (transmitted or reference-average)
// is known, to score each quadrant against what reconstruction will
// actually produce.
fn block_const_cost(cur: &Plane, x: isize, y: isize, w: usize, h: usize, v: i32) -> i64 {
  let mut cost: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      cost += (cur.get(x + bx, y + by) as i32 - v).unsigned_abs() as i64;
    }
  }
  cost
}

fn block_variance(plane: &Plane, x: isize, y: isize, dx: isize, dy: isize, w: usize, h: usize) -> i64 {
  let n = (w * h).max(1) as i64;
  let mut sum: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      sum += plane.get(x + bx + dx, y + by + dy) as i64;
    }
  }
  let avg = sum / n;
  let mut acc: i64 = 0;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      let d = plane.get(x + bx + dx, y + by + dy) as i64 - avg;
      acc += d * d;
    }
  }
  acc / n
}

fn block_max_abs_diff(cur: &Plane, refp: &Plane, x: isize, y: isize, dx: isize, dy: isize, w: usize, h: usize) -> i32 {
  let mut m = 0i32;
  for by in 0..h as isize {
    for bx in 0..w as isize {
      let d = (cur.get(x + bx, y + by) as i32 - refp.get(x + bx + dx, y + by + dy) as i32).abs();
      m = util::max(m, d);
    }
  }
  m
}

// Full-pel diamond search around a starting point, descending step sizes.
// Returns the best (dx, dy) found and its SAD.
fn diamond_search(cur: &Plane, refp: &Plane, x: isize, y: isize, w: usize, h: usize, start: (i32, i32), range: i32) -> ((i32, i32), i64) {
  let mut best = start;
  let mut best_cost = block_sad(cur, refp, x, y, start.0 as isize, start.1 as isize, w, h);

  let mut step = range.max(1);
  while step >= 1 {
    let mut improved = true;
    while improved {
      improved = false;
      let (bx, by) = best;
      for &(ox, oy) in &[(step, 0), (-step, 0), (0, step), (0, -step)] {
        let cand = (bx + ox, by + oy);
        let cost = block_sad(cur, refp, x, y, cand.0 as isize, cand.1 as isize, w, h);
        if cost < best_cost {
          best_cost = cost;
          best = cand;
          improved = true;
        }
      }
    }
    step /= 2;
  }
  (best, best_cost)
}

// Quarter-pel refinement around a full-pel winner: tries the 8 neighbors
// at 1 quarter-pel unit (the half/quarter taps mc.rs interpolates).
fn subpel_refine(cur: &Plane, refp: &Plane, x: isize, y: isize, w: usize, h: usize, full: (i32, i32)) -> (i32, i32) {
  let center = (full.0 * 4, full.1 * 4);
  let mut best = center;
  let mut best_cost = block_sad(cur, refp, x, y, (center.0 >> 2) as isize, (center.1 >> 2) as isize, w, h);

  for &(ox, oy) in &[(1, 0), (-1, 0), (0, 1), (0, -1), (1, 1), (-1, -1), (1, -1), (-1, 1)] {
    let cand = (center.0 + ox, center.1 + oy);
    let cost = block_sad(cur, refp, x, y, (cand.0 >> 2) as isize, (cand.1 >> 2) as isize, w, h);
    if cost < best_cost {
      best_cost = cost;
      best = cand;
    }
  }
  best
}

// Estimate a single global-motion vector for the whole frame by averaging
// the previous frame's block vectors, used as an extra seed candidate
// (handles pans that a purely-local search can take several levels to
// converge on).
fn global_motion_estimate(prev_mvs: &[MotionVector]) -> (i32, i32) {
  if prev_mvs.is_empty() {
    return (0, 0);
  }
  let mut sx = 0i64;
  let mut sy = 0i64;
  let mut n = 0i64;
  for mv in prev_mvs {
    if !mv.is_intra() {
      sx += mv.x as i64;
      sy += mv.y as i64;
      n += 1;
    }
  }
  if n == 0 {
    (0, 0)
  } else {
    ((sx / n) as i32, (sy / n) as i32)
  }
}

// INTRA-within-P + submask + DC decision for one block, given the best
// full-pel inter candidate already found by the diamond search. Grounded on
// bmc.c's `predict()`, which reads an intra block's quadrants against the
// same full-pel-offset reference the inter path would have used, and on
// dsv_encoder.c's per-block bitstream loop, which transmits one DC value
// (literal or "use reference average") shared by every flagged quadrant.
fn intra_mode_decision(cur: &Plane, refp: &Plane, x: isize, y: isize, w: usize, h: usize, full: (i32, i32)) -> (u8, u16) {
  let (err_ref, avg_ref) = block_dc_cost(cur, refp, x, y, full.0 as isize, full.1 as isize, w, h);
  let (err_src, avg_src) = block_dc_cost(cur, cur, x, y, 0, 0, w, h);
  let use_src_dc = err_src + DC_TRANSMIT_PENALTY < err_ref;
  let dc_val = if use_src_dc { avg_src } else { avg_ref };

  let hw = w / 2;
  let hh = h / 2;
  let quads = [
    (block::MASK_INTRA00, 0isize, 0isize, hw, hh),
    (block::MASK_INTRA01, hw as isize, 0isize, w - hw, hh),
    (block::MASK_INTRA10, 0isize, hh as isize, hw, h - hh),
    (block::MASK_INTRA11, hw as isize, hh as isize, w - hw, h - hh),
  ];

  let mut submask = 0u8;
  for (mask, ox, oy, qw, qh) in quads {
    let inter_cost = block_sad(cur, refp, x + ox, y + oy, full.0 as isize, full.1 as isize, qw, qh);
    let intra_cost = block_const_cost(cur, x + ox, y + oy, qw, qh, dc_val);
    let bias = (qw * qh) as i64 * INTRA_DETAIL_BIAS_PER_PX;
    if intra_cost + bias < inter_cost {
      submask |= mask;
    }
  }

  let dc = if submask != 0 && use_src_dc { block::SRC_DC_PRED | (dc_val as u16 & 0xff) } else { 0 };
  (submask, dc)
}

// Per-block motion search and mode decision for one P-frame, against the
// single reference frame `refr`. `prev_mvs` seeds the search (this frame's
// previous-frame vectors at the same block index).
pub fn search(cur: &Frame, refr: &Frame, subsamp: u8, params: &PictureParams, prev_mvs: &[MotionVector], cfg: SearchConfig) -> Vec<MotionVector> {
  let nblk = (params.nblocks_h * params.nblocks_v) as usize;
  let mut out = vec![MotionVector::default(); nblk];
  let gmv = global_motion_estimate(prev_mvs);
  let range = if cfg.effort >= 7 { 32 } else { 16 };

  let (h_shift, v_shift) = (meta::h_shift(subsamp) as u32, meta::v_shift(subsamp) as u32);
  let (cbw, cbh) = ((params.blk_w >> h_shift).max(1), (params.blk_h >> v_shift).max(1));

  for by in 0..params.nblocks_v {
    for bx in 0..params.nblocks_h {
      let idx = (by * params.nblocks_h + bx) as usize;
      let x = (bx * params.blk_w) as isize;
      let y = (by * params.blk_h) as isize;
      let w = params.blk_w as usize;
      let h = params.blk_h as usize;

      let (px, py) = mv_pred::movec_pred(&out, params, bx as i32, by as i32);
      let prev_here = if idx < prev_mvs.len() { (prev_mvs[idx].x as i32 / 4, prev_mvs[idx].y as i32 / 4) } else { (0, 0) };

      let candidates = [(0, 0), (px / 4, py / 4), prev_here, gmv];
      let mut best = candidates[0];
      let mut best_cost = i64::MAX;
      for &cand in &candidates {
        let (refined, cost) = diamond_search(cur.y(), refr.y(), x, y, w, h, cand, range);
        if cost < best_cost {
          best_cost = cost;
          best = refined;
        }
      }

      let qpel = subpel_refine(cur.y(), refr.y(), x, y, w, h, best);

      let mut mv = MotionVector::default();
      mv.err = util::clamp(best_cost, 0, u16::MAX as i64) as u16;

      let (submask, dc) = intra_mode_decision(cur.y(), refr.y(), x, y, w, h, best);
      mv.set_ringing(ringing_decision(refr.y(), x, y, best.0 as isize, best.1 as isize, w, h));

      if submask != 0 {
        mv.set_intra(true);
        mv.submask = submask;
        mv.dc = dc;
        mv.x = (best.0 * 4) as i16;
        mv.y = (best.1 * 4) as i16;
      } else {
        mv.x = qpel.0 as i16;
        mv.y = qpel.1 as i16;

        let stationary = (qpel.0 - px).abs() < 2 && (qpel.1 - py).abs() < 2;
        let area = (w * h) as i64 * 2;
        mv.set_skip(stationary && best_cost < area);

        if !mv.is_skip() {
          let var_src = block_variance(cur.y(), x, y, 0, 0, w, h);
          let var_ref = block_variance(refr.y(), x, y, best.0 as isize, best.1 as isize, w, h);
          mv.set_simcmplx((var_src - var_ref).abs() * 4 < util::max(var_src + var_ref, 1));

          let avg_resid = best_cost / (w * h).max(1) as i64;
          mv.set_noxmity(avg_resid < NOXMIT_THRESH);

          let max_diff = block_max_abs_diff(cur.y(), refr.y(), x, y, best.0 as isize, best.1 as isize, w, h);
          mv.set_eprm(max_diff > EPRM_CLIP_THRESH);

          let ccx = (bx * cbw) as isize;
          let ccy = (by * cbh) as isize;
          let cfx = best.0 >> h_shift;
          let cfy = best.1 >> v_shift;
          let u_diff = block_sad(cur.plane(1), refr.plane(1), ccx, ccy, cfx as isize, cfy as isize, cbw as usize, cbh as usize);
          let v_diff = block_sad(cur.plane(2), refr.plane(2), ccx, ccy, cfx as isize, cfy as isize, cbw as usize, cbh as usize);
          let avg_cresid = (u_diff + v_diff) / (2 * (cbw * cbh).max(1) as i64);
          mv.set_noxmitc(avg_cresid < NOXMIT_THRESH);
        }
      }

      if params.is_ref {
        let lo_hi = {
          let mut lo = 255i32;
          let mut hi = 0i32;
          for dy in 0..h as isize {
            for dx in 0..w as isize {
              let v = cur.y().get(x + dx, y + dy) as i32;
              lo = util::min(lo, v);
              hi = util::max(hi, v);
            }
          }
          hi - lo
        };
        mv.set_maintain(lo_hi < MAINTAIN_VARIANCE_THRESH);
      }

      out[idx] = mv;
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Bordered;

  #[test]
  fn identical_frames_yield_zero_motion() {
    let params = PictureParams::new(32, 32, 16, 16, false, true, 1, 50);
    let cur = Frame::new(meta::SUBSAMP_420, 32, 32, Bordered::Yes);
    let refr = Frame::new(meta::SUBSAMP_420, 32, 32, Bordered::Yes);
    let cfg = SearchConfig { effort: 5, quant: 50 };
    let mvs = search(&cur, &refr, meta::SUBSAMP_420, &params, &[], cfg);
    for mv in mvs {
      assert_eq!((mv.x, mv.y), (0, 0));
      assert!(mv.is_skip());
      assert!(!mv.is_intra());
    }
  }

  #[test]
  fn global_motion_estimate_averages_prev_mvs() {
    let mvs = vec![
      MotionVector { x: 4, y: 0, ..Default::default() },
      MotionVector { x: 8, y: 0, ..Default::default() },
    ];
    assert_eq!(global_motion_estimate(&mvs), (6, 0));
  }

  // A block with brand-new flat content (absent from the reference
  // entirely) should be cheaper to code as INTRA-within-P than as a
  // (necessarily poor) inter match -- the core case SPEC_FULL.md calls out
  // for this flag category.
  #[test]
  fn novel_flat_content_is_coded_intra_within_p() {
    let params = PictureParams::new(32, 32, 16, 16, false, true, 1, 50);
    let mut cur = Frame::new(meta::SUBSAMP_420, 32, 32, Bordered::Yes);
    let refr = Frame::new(meta::SUBSAMP_420, 32, 32, Bordered::Yes);
    for y in 0..16isize {
      for x in 0..16isize {
        cur.y_mut().set(x, y, 250);
      }
    }
    let cfg = SearchConfig { effort: 5, quant: 50 };
    let mvs = search(&cur, &refr, meta::SUBSAMP_420, &params, &[], cfg);
    assert!(mvs[0].is_intra());
    assert!(mvs[0].submask != 0);
  }
}
