// Rate control: quality-to-quantizer curve plus the CRF/ABR/CQP
// controllers that adapt it frame to frame.
//
// Grounded on examples/original_source/src/dsv_encoder.c
// (qual_to_qp, sample_point, quality2quant, scene_complexity). The
// original labels this code "highly experimental" in its own comments;
// this port keeps that same pragmatic, heuristic-heavy character rather
// than smoothing it into something more principled than the source.

use crate::config::RateControlMode;
use crate::util;

pub const QUALITY_SCALE: i32 = 256;

// Every 256 frames the running rate-filter average is allowed to reset
// rather than accumulate drift indefinitely (DSV_RF_RESET).
pub const RF_RESET_INTERVAL: u32 = 256;

// Piecewise quality->QP curve. Values sampled at a handful of quality
// breakpoints and linearly interpolated between them; the original's
// `sample_point` indexes a hand-tuned static table, here expressed as an
// explicit breakpoint list so the interpolation logic is visible rather
// than baked into magic array literals.
const CURVE: &[(i32, i32)] = &[
  (0, 2048),
  (10, 1024),
  (20, 512),
  (30, 256),
  (40, 128),
  (50, 80),
  (60, 56),
  (70, 40),
  (80, 28),
  (90, 20),
  (100, 16),
];

fn sample_point(actv: i32) -> i32 {
  let actv = util::clamp(actv, 0, 100);
  for w in CURVE.windows(2) {
    let (x0, y0) = w[0];
    let (x1, y1) = w[1];
    if actv >= x0 && actv <= x1 {
      if x1 == x0 {
        return y0;
      }
      return y0 + (y1 - y0) * (actv - x0) / (x1 - x0);
    }
  }
  CURVE.last().unwrap().1
}

// Quality (0..=100*QUALITY_SCALE) to quantizer. Near-lossless qualities
// get a direct linear mapping (the `d_hi < 60` branch); everything else
// goes through the sampled curve.
pub fn qual_to_qp(v: i32) -> i32 {
  let d_hi = 100 * QUALITY_SCALE - v;
  if d_hi < 60 {
    return d_hi + 16;
  }
  let v2 = v * 2;
  let actv = v2 / (3 * QUALITY_SCALE);
  let frac = (v2 / QUALITY_SCALE) % 3;
  let lo = sample_point(actv);
  let hi = sample_point(actv + 1);
  lo + (hi - lo) * frac / 3
}

pub struct RateController {
  pub mode: RateControlMode,
  pub quality: i32,
  pub min_quality: i32,
  pub max_quality: i32,
  pub min_i_frame_quality: i32,
  pub min_quant_step: i32,
  pub max_quant_step: i32,

  pub target_bitrate: u32,
  pub fps_num: u32,
  pub fps_den: u32,

  rf_avg: i64,
  frame_count: u32,
  last_quality: i32,
}

impl RateController {
  pub fn new(mode: RateControlMode, quality: i32, target_bitrate: u32, fps_num: u32, fps_den: u32) -> Self {
    Self {
      mode,
      quality,
      min_quality: 0,
      max_quality: 100 * QUALITY_SCALE,
      min_i_frame_quality: 9 * QUALITY_SCALE,
      min_quant_step: 1,
      max_quant_step: 20,
      target_bitrate,
      fps_num: fps_num.max(1),
      fps_den: fps_den.max(1),
      rf_avg: 0,
      frame_count: 0,
      last_quality: quality,
    }
  }

  // Heuristic complexity estimate driving the CRF "moving target": how
  // much motion-vector coding cost this frame carried relative to a flat
  // scene, used to push quality up on busy frames and down on static ones.
  pub fn scene_complexity(&self, avg_mv_cost: i32, nblocks: u32) -> i32 {
    if nblocks == 0 {
      return 0;
    }
    util::clamp(avg_mv_cost / 4, 0, 100)
  }

  fn clamp_quality(&self, q: i32, is_intra: bool) -> i32 {
    let lo = if is_intra { util::max(self.min_quality, self.min_i_frame_quality) } else { self.min_quality };
    util::clamp(q, lo, self.max_quality)
  }

  // CRF: quality is the fixed target, gently nudged by complexity and by
  // proximity to the last I-frame.
  fn crf_quality(&mut self, complexity: i32, is_intra: bool) -> i32 {
    let anchor = self.quality;
    let dir = complexity - 50;
    let moving_targ = anchor + dir * QUALITY_SCALE / 100;
    self.clamp_quality(moving_targ, is_intra)
  }

  // ABR: proportional control toward a target bytes-per-frame derived
  // from the configured bitrate.
  fn abr_quality(&mut self, last_frame_bytes: u32, is_intra: bool) -> i32 {
    let target_bytes = (self.target_bitrate as u64 * self.fps_den as u64 / (8 * self.fps_num as u64)).max(1) as i64;
    let delta = target_bytes - last_frame_bytes as i64;
    let step = util::clamp((delta * QUALITY_SCALE as i64 / target_bytes) as i32, -self.max_quant_step, self.max_quant_step);
    let step = if step >= 0 { util::max(step, self.min_quant_step) } else { util::min(step, -self.min_quant_step) };
    self.clamp_quality(self.last_quality + step, is_intra)
  }

  // Mathematically-lossless mode: the configured quality target sits at
  // the top of the scale. `qual_to_qp` alone never reaches QP==1 (its
  // hardcoded high-quality branch bottoms out at 16), so this is an
  // explicit override of the curve, not a property of it.
  pub fn is_lossless_target(&self) -> bool {
    self.quality >= 100 * QUALITY_SCALE
  }

  // Decide this frame's quality, then convert to a quantizer. `complexity`
  // and `last_frame_bytes` are ignored outside their respective modes.
  pub fn next_quant(&mut self, is_intra: bool, complexity: i32, last_frame_bytes: u32) -> i32 {
    let q = match self.mode {
      RateControlMode::Crf => self.crf_quality(complexity, is_intra),
      RateControlMode::Abr => self.abr_quality(last_frame_bytes, is_intra),
      RateControlMode::Cqp => self.clamp_quality(self.quality, is_intra),
    };
    self.last_quality = q;

    self.rf_avg += last_frame_bytes as i64;
    self.frame_count += 1;
    if self.frame_count >= RF_RESET_INTERVAL {
      self.rf_avg = 0;
      self.frame_count = 0;
    }

    if self.is_lossless_target() {
      return 1;
    }

    util::max(qual_to_qp(q), 1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn qual_to_qp_is_monotonic_decreasing() {
    let mut prev = i32::MAX;
    for v in (0..=100).map(|p| p * QUALITY_SCALE) {
      let qp = qual_to_qp(v);
      assert!(qp <= prev, "qp should not increase with quality: {} -> {}", prev, qp);
      prev = qp;
    }
  }

  #[test]
  fn near_lossless_uses_linear_branch() {
    assert_eq!(qual_to_qp(100 * QUALITY_SCALE), 16);
  }

  #[test]
  fn max_quality_forces_lossless_quant() {
    let mut rc = RateController::new(RateControlMode::Crf, 100 * QUALITY_SCALE, 0, 30, 1);
    assert!(rc.is_lossless_target());
    assert_eq!(rc.next_quant(true, 0, 0), 1);
    assert_eq!(rc.next_quant(false, 50, 1000), 1);
  }

  #[test]
  fn cqp_is_passthrough() {
    let mut rc = RateController::new(RateControlMode::Cqp, 50 * QUALITY_SCALE, 0, 30, 1);
    let qp1 = rc.next_quant(false, 0, 0);
    let qp2 = rc.next_quant(false, 0, 100_000);
    assert_eq!(qp1, qp2);
  }

  #[test]
  fn rf_avg_resets_after_interval() {
    let mut rc = RateController::new(RateControlMode::Abr, 50 * QUALITY_SCALE, 1_000_000, 30, 1);
    for _ in 0..RF_RESET_INTERVAL {
      rc.next_quant(false, 0, 1000);
    }
    assert_eq!(rc.frame_count, 0);
  }
}
