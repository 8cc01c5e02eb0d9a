// Encoder configuration surface. Grounded on
// examples/original_source/src/dsv_encoder.h's DSV_ENCODER fields; plain
// struct with a `Default` impl rather than a builder, matching how
// nekotrix-tinyavif's own encoder config is a flat struct filled in by the
// caller.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RateControlMode {
  Crf,
  Abr,
  Cqp,
}

#[derive(Clone, Copy, Debug)]
pub struct PsyConfig {
  pub visual_masking: bool,
}

impl Default for PsyConfig {
  fn default() -> Self {
    Self { visual_masking: true }
  }
}

#[derive(Clone, Debug)]
pub struct EncoderConfig {
  // overall quality target, 0 (worst) to 100*SCALE (lossless); only used
  // directly in CQP mode, otherwise seeds the rate controller's anchor.
  pub quality: i32,
  // 0 (fastest, skips most mode decisions) to 10 (exhaustive search).
  pub effort: u8,

  pub gop: u32,
  pub variable_i_interval: bool,
  pub do_scene_change_detection: bool,

  pub do_temporal_aq: bool,
  pub do_intra_filter: bool,
  pub do_inter_filter: bool,
  pub do_dark_intra_boost: bool,
  pub psy: PsyConfig,

  pub rc_mode: RateControlMode,
  pub bitrate: u32,
  pub min_quality: i32,
  pub max_quality: i32,
  pub min_i_frame_quality: i32,
  pub min_quant_step: i32,
  pub max_quant_step: i32,

  // 0 lets the encoder pick block size from frame dimensions (size4dim).
  pub block_size_override_x: Option<u32>,
  pub block_size_override_y: Option<u32>,

  pub pyramid_levels: u32,
  pub stable_refresh: u32,
  pub intra_pct_thresh: u32,
  pub scene_change_pct_thresh: u32,
  pub skip_block_thresh: i32,
}

impl Default for EncoderConfig {
  fn default() -> Self {
    Self {
      quality: 80 * 256,
      effort: 5,
      gop: 15,
      variable_i_interval: true,
      do_scene_change_detection: true,
      do_temporal_aq: true,
      do_intra_filter: true,
      do_inter_filter: true,
      do_dark_intra_boost: true,
      psy: PsyConfig::default(),
      rc_mode: RateControlMode::Crf,
      bitrate: 0,
      min_quality: 0,
      max_quality: 100 * 256,
      min_i_frame_quality: 9 * 256,
      min_quant_step: 1,
      max_quant_step: 20,
      block_size_override_x: None,
      block_size_override_y: None,
      pyramid_levels: 4,
      stable_refresh: 16,
      intra_pct_thresh: 50,
      scene_change_pct_thresh: 86,
      skip_block_thresh: 1,
    }
  }
}

// Block size from frame dimensions when no override is set, matching
// dsv_encoder.c's size4dim: large frames get the bigger block size.
pub fn size4dim(dim: u32) -> u32 {
  if dim > 1280 {
    crate::block::MAX_BLOCK_SIZE
  } else {
    crate::block::MIN_BLOCK_SIZE
  }
}

impl EncoderConfig {
  pub fn block_size(&self, width: u32, height: u32) -> (u32, u32) {
    (self.block_size_override_x.unwrap_or_else(|| size4dim(width)), self.block_size_override_y.unwrap_or_else(|| size4dim(height)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn size4dim_picks_max_for_hd() {
    assert_eq!(size4dim(1920), crate::block::MAX_BLOCK_SIZE);
    assert_eq!(size4dim(640), crate::block::MIN_BLOCK_SIZE);
  }

  #[test]
  fn default_config_has_sane_bounds() {
    let cfg = EncoderConfig::default();
    assert!(cfg.min_quality <= cfg.max_quality);
  }
}
