// Top-level encoder: GOP management, per-frame I/P decision, motion
// search, transform/entropy coding, and packet assembly.
//
// Grounded on examples/original_source/src/dsv_encoder.c
// (dsv_enc_start, dsv_encoder_encode, encode_picture, encode_metadata,
// motion_est, mk_pyramid). The reference-cache/pyramid-cache bookkeeping
// follows the same ref-counted-EncData pattern the original uses
// (encdat_ref/encdat_unref), expressed here as a single owned reference
// frame rather than a ring buffer, since this codec has no multi-reference
// or B-frame mode.

use crate::bitstream::BitWriter;
use crate::block::{BlockMeta, MotionVector, PictureParams};
use crate::coef::CoefFrame;
use crate::config::EncoderConfig;
use crate::frame::{Bordered, Frame, Plane};
use crate::hzcc::{self, FrameMeta, PsyFlags};
use crate::loopfilter;
use crate::mc;
use crate::meta::{self, Metadata};
use crate::mv_pred;
use crate::packet::{self, PacketType};
use crate::ratecontrol::RateController;
use crate::subband::{self, TransformMeta};

// A flat-enough intra block (pixel range under this on the luma plane) is
// marked MAINTAIN so the I-frame high-band quantizer (hzcc::tmq4pos_i) can
// bias it toward coarser quantization without visible ringing.
const MAINTAIN_VARIANCE_THRESH: i32 = 6;

// Simplified RINGING heuristic. hme.c (~1790-1935) derives this flag from a
// multi-stage psychovisual pipeline (block_detail/block_hist_var/quant_tex/
// block_var/block_peaks/chroma_analysis, plus foliage/text/skin heuristics)
// not reproduced here. This keeps its two clearest signals instead: blocks
// with high gradient energy are the ones the 5-tap L2A filter actually
// changes, and sbt.c's own comment on the filter notes it's tuned to help
// perceived detail in otherwise-flat dark regions, which the luma-average
// threshold below approximates.
const RINGING_GRADIENT_THRESH: i32 = 24;
const RINGING_DARK_LUMA_THRESH: i32 = 24;

fn block_ringing_decision(refp: &Plane, x: isize, y: isize, w: usize, h: usize) -> bool {
  let mut sum: i64 = 0;
  let mut grad: i64 = 0;
  let mut n: i64 = 0;
  for dy in 0..h as isize {
    for dx in 0..w as isize {
      let v = refp.get(x + dx, y + dy) as i32;
      sum += v as i64;
      n += 1;
      if dx + 1 < w as isize {
        grad += (v - refp.get(x + dx + 1, y + dy) as i32).unsigned_abs() as i64;
      }
      if dy + 1 < h as isize {
        grad += (v - refp.get(x + dx, y + dy + 1) as i32).unsigned_abs() as i64;
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

pub struct Encoder {
  cfg: EncoderConfig,
  meta: Metadata,
  params: PictureParams,
  rc: RateController,

  fnum: u32,
  frames_since_i: u32,
  refresh_ctr: u32,

  reference: Option<Frame>,
  ref_mvs: Vec<MotionVector>,
}

impl Encoder {
  pub fn new(cfg: EncoderConfig, meta: Metadata) -> Self {
    let (blk_w, blk_h) = cfg.block_size(meta.width, meta.height);
    let params = PictureParams::new(meta.width, meta.height, blk_w, blk_h, true, false, 0, cfg.quality);
    let rc = RateController::new(cfg.rc_mode, cfg.quality, cfg.bitrate, meta.fps_num, meta.fps_den);
    Self {
      cfg,
      meta,
      params,
      rc,
      fnum: 0,
      frames_since_i: 0,
      refresh_ctr: 0,
      reference: None,
      ref_mvs: Vec::new(),
    }
  }

  pub fn metadata_packet(&self) -> Vec<u8> {
    let mut buf = Vec::new();
    packet::write_header(&mut buf, PacketType::Meta);
    let mut bw = BitWriter::new();
    self.meta.write(&mut bw);
    let payload = bw.finalize();
    buf.extend_from_slice(&payload);
    let next_link = buf.len() as u32;
    packet::patch_next_link(&mut buf, next_link);
    buf
  }

  pub fn end_of_stream_packet(&self) -> Vec<u8> {
    packet::encode_eos()
  }

  fn is_intra_decision(&self) -> bool {
    if self.fnum == 0 {
      return true;
    }
    if !self.cfg.variable_i_interval {
      return self.frames_since_i >= self.cfg.gop;
    }
    self.frames_since_i >= self.cfg.gop
  }

  // Mean absolute pixel difference against the reference, used as a cheap
  // scene-change signal (a simplified stand-in for dsv_encoder.c's
  // motion_est scene-change-block percentage, which requires a completed
  // motion search; this runs before the search to decide whether it's
  // worth doing one).
  fn scene_change_detected(&self, src: &Frame) -> bool {
    let Some(refr) = &self.reference else { return false };
    if !self.cfg.do_scene_change_detection {
      return false;
    }
    let w = src.width;
    let h = src.height;
    let mut sum: i64 = 0;
    let step = 4isize;
    let mut n = 0i64;
    let mut y = 0isize;
    while y < h as isize {
      let mut x = 0isize;
      while x < w as isize {
        let a = src.y().get(x, y) as i32;
        let b = refr.y().get(x, y) as i32;
        sum += (a - b).unsigned_abs() as i64;
        n += 1;
        x += step;
      }
      y += step;
    }
    if n == 0 {
      return false;
    }
    let avg = sum / n;
    avg * 100 >= (self.cfg.scene_change_pct_thresh as i64) * 2
  }

  // Encodes one frame, returning the PIC packet bytes. `src` must match
  // the stream's configured dimensions and chroma format.
  pub fn encode(&mut self, src: &Frame) -> Vec<u8> {
    let mut padded = src.clone_bordered(Bordered::Yes);

    let is_intra = self.is_intra_decision() || self.scene_change_detected(&padded);
    log::debug!("encoding frame {} as {}", self.fnum, if is_intra { "I" } else { "P" });
    // Geometry only at this point; the real quantizer (and therefore the
    // lossless flag) isn't known until the rate controller runs below.
    self.params = PictureParams::new(self.meta.width, self.meta.height, self.params.blk_w, self.params.blk_h, true, !is_intra, self.fnum, 50);

    let nblk = (self.params.nblocks_h * self.params.nblocks_v) as usize;
    let mut mvs = vec![MotionVector::default(); nblk];
    let mut block_meta = vec![BlockMeta::new(); nblk];

    if !is_intra {
      let refr = self.reference.as_ref().expect("P-frame requires a reference");
      let cfg = crate::hme::SearchConfig { effort: self.cfg.effort, quant: self.rc.quality };
      mvs = crate::hme::search(&padded, refr, self.meta.subsamp, &self.params, &self.ref_mvs, cfg);
      // hzcc.rs's P-path quantizer (tmq4pos_p, simcmplx high-band gate)
      // reads BlockMeta, not MotionVector, so the decided per-block flags
      // have to be mirrored across before entropy coding runs.
      for (bm, mv) in block_meta.iter_mut().zip(mvs.iter()) {
        bm.set_intra(mv.is_intra());
        bm.set_eprm(mv.is_eprm());
        bm.set_simcmplx(mv.is_simcmplx());
        bm.set_stable(mv.is_skip());
        bm.set_ringing(mv.is_ringing());
      }
    } else {
      for bm in block_meta.iter_mut() {
        bm.set_intra(true);
      }
      for mv in mvs.iter_mut() {
        mv.set_intra(true);
        mv.submask = crate::block::MASK_ALL_INTRA;
      }
    }

    let quant = self.rc.next_quant(is_intra, 0, 0);
    log::trace!("frame {} quant {}", self.fnum, quant);
    self.params = PictureParams::new(self.meta.width, self.meta.height, self.params.blk_w, self.params.blk_h, true, !is_intra, self.fnum, quant);

    let mut prediction = Frame::new(self.meta.subsamp, self.meta.width as usize, self.meta.height as usize, Bordered::Yes);
    let mut residual = Frame::new(self.meta.subsamp, self.meta.width as usize, self.meta.height as usize, Bordered::Yes);

    self.build_prediction_and_residual(&padded, &mut prediction, &mut residual, &mvs, is_intra, &mut block_meta);

    let mut coefs = CoefFrame::new(self.meta.subsamp, self.meta.width as usize, self.meta.height as usize);
    let block_ringing: Vec<bool> = block_meta.iter().map(|b| b.ringing()).collect();

    let mut buf = Vec::new();
    packet::write_header(&mut buf, PacketType::Pic { is_ref: true, has_ref: !is_intra });
    let mut bw = BitWriter::new();
    bw.align();
    bw.put_bits(32, self.fnum);
    bw.align();

    bw.put_ueg(crate::util::log2i(self.params.blk_w) - 4);
    bw.put_ueg(crate::util::log2i(self.params.blk_h) - 4);
    bw.align();
    bw.put_bits(12, quant as u32);
    bw.align();

    if is_intra {
      self.encode_intra_block_flags(&mut bw, &block_meta);
    } else {
      self.encode_motion(&mut bw, &mvs, &self.params);
    }

    for plane_idx in 0..3 {
      let tmeta = TransformMeta {
        is_p: !is_intra,
        is_luma: plane_idx == 0,
        lossless: self.params.lossless,
        block_ringing: &block_ringing,
        nblocks_h: self.params.nblocks_h as usize,
        nblocks_v: self.params.nblocks_v as usize,
      };
      let plane = coefs.plane_mut(plane_idx);
      plane.load_residual(residual.plane(plane_idx));
      subband::forward(plane, &tmeta);

      let fm = FrameMeta {
        params: &self.params,
        is_p: !is_intra,
        cur_plane: plane_idx,
        subsamp: self.meta.subsamp,
        do_psy: PsyFlags { p_visual_masking: self.cfg.psy.visual_masking, i_visual_masking: self.cfg.psy.visual_masking },
        block_meta: &block_meta,
      };
      hzcc::encode_plane(&mut bw, plane, quant, &fm);
      subband::inverse(plane, &tmeta, quant);
      plane.store_residual(residual.plane_mut(plane_idx));
    }

    bw.align();
    let payload = bw.finalize();
    buf.extend_from_slice(&payload);
    let next_link = buf.len() as u32;
    packet::patch_next_link(&mut buf, next_link);

    self.finish_reconstruction(&mut padded, &prediction, &residual, quant, &mvs);

    self.reference = Some(padded);
    self.ref_mvs = mvs;
    self.fnum += 1;
    if is_intra {
      self.frames_since_i = 0;
    } else {
      self.frames_since_i += 1;
    }
    self.refresh_ctr = (self.refresh_ctr + 1) % self.cfg.stable_refresh.max(1);

    buf
  }

  fn build_prediction_and_residual(&self, padded: &Frame, prediction: &mut Frame, residual: &mut Frame, mvs: &[MotionVector], is_intra: bool, block_meta: &mut [BlockMeta]) {
    for plane_idx in 0..3 {
      let is_chroma = plane_idx != 0;
      let (h_shift, v_shift) = (meta::h_shift(self.meta.subsamp) as u32, meta::v_shift(self.meta.subsamp) as u32);
      let (bw, bh) = if is_chroma { ((self.params.blk_w >> h_shift).max(1), (self.params.blk_h >> v_shift).max(1)) } else { (self.params.blk_w, self.params.blk_h) };

      for by in 0..self.params.nblocks_v {
        for bx in 0..self.params.nblocks_h {
          let idx = (by * self.params.nblocks_h + bx) as usize;
          let mv = mvs[idx];
          let x = (bx * bw) as isize;
          let y = (by * bh) as isize;

          if is_intra {
            let avg = if bx == 0 && by == 0 {
              128
            } else {
              let refp = padded.plane(plane_idx);
              let (rx, ry) = if bx > 0 { (x - 1, y) } else { (x, y - 1) };
              refp.get(rx, ry) as i32
            };
            for dy in 0..bh as isize {
              for dx in 0..bw as isize {
                prediction.plane_mut(plane_idx).set(x + dx, y + dy, crate::util::clamp(avg, 0, 255) as u8);
              }
            }
            block_meta[idx].set_intra(true);
            if plane_idx == 0 {
              let refp = padded.plane(plane_idx);
              let mut lo = 255i32;
              let mut hi = 0i32;
              for dy in 0..bh as isize {
                for dx in 0..bw as isize {
                  let v = refp.get(x + dx, y + dy) as i32;
                  lo = crate::util::min(lo, v);
                  hi = crate::util::max(hi, v);
                }
              }
              block_meta[idx].set_maintain((hi - lo) < MAINTAIN_VARIANCE_THRESH);
              block_meta[idx].set_ringing(block_ringing_decision(refp, x, y, bw as usize, bh as usize));
            }
          } else {
            let refr = self.reference.as_ref().unwrap();
            mc::predict(prediction.plane_mut(plane_idx), refr.plane(plane_idx), &mv, x, y, bw as usize, bh as usize, is_chroma, h_shift, v_shift, self.params.temporal_mc);
          }

          for dy in 0..bh as isize {
            for dx in 0..bw as isize {
              let src = padded.plane(plane_idx).get(x + dx, y + dy);
              let pred = prediction.plane(plane_idx).get(x + dx, y + dy);
              let noxmit = if is_chroma { mv.is_noxmitc() } else { mv.is_noxmity() };
              let res = mc::subtract(src, pred, self.params.lossless, mv.is_eprm(), noxmit);
              residual.plane_mut(plane_idx).set(x + dx, y + dy, res);
            }
          }
        }
      }
    }
  }

  fn finish_reconstruction(&self, recon: &mut Frame, prediction: &Frame, residual: &Frame, quant: i32, mvs: &[MotionVector]) {
    let (h_shift, v_shift) = (meta::h_shift(self.meta.subsamp) as u32, meta::v_shift(self.meta.subsamp) as u32);
    for plane_idx in 0..3 {
      let is_chroma = plane_idx != 0;
      let (bw, bh) = if is_chroma { ((self.params.blk_w >> h_shift).max(1), (self.params.blk_h >> v_shift).max(1)) } else { (self.params.blk_w, self.params.blk_h) };
      let (pw, ph) = (residual.plane(plane_idx).width, residual.plane(plane_idx).height);
      for y in 0..ph as isize {
        let by = (y as u32 / bh).min(self.params.nblocks_v - 1);
        for x in 0..pw as isize {
          let bx = (x as u32 / bw).min(self.params.nblocks_h - 1);
          let idx = (by * self.params.nblocks_h + bx) as usize;
          let pred = prediction.plane(plane_idx).get(x, y);
          let res = residual.plane(plane_idx).get(x, y);
          let rec = mc::reconstruct(pred, res, self.params.lossless, mvs[idx].is_eprm());
          recon.plane_mut(plane_idx).set(x, y, rec);
        }
      }
    }
    if self.cfg.do_inter_filter {
      loopfilter::luma_filter(recon.y_mut(), &self.params, mvs, quant, self.cfg.do_inter_filter);
      for plane_idx in 1..3 {
        loopfilter::chroma_filter(recon.plane_mut(plane_idx), &self.params, mvs, quant, h_shift, v_shift, self.cfg.do_inter_filter);
      }
    }
    recon.extend();
  }

  // I-frames carry two ZBRLEs, ringing then maintain, each with its own
  // UEG-coded byte-length prefix.
  fn encode_intra_block_flags(&self, bw: &mut BitWriter, block_meta: &[BlockMeta]) {
    let mut ringing = crate::bitstream::ZbrleWriter::new();
    for bm in block_meta {
      ringing.put(bm.ringing());
    }
    let ringing_bytes = ringing.finish();
    bw.put_ueg(ringing_bytes.len() as u32);
    bw.align();
    bw.concat(&ringing_bytes);

    let mut maintain = crate::bitstream::ZbrleWriter::new();
    for bm in block_meta {
      maintain.put(bm.maintain());
    }
    let maintain_bytes = maintain.finish();
    bw.put_ueg(maintain_bytes.len() as u32);
    bw.align();
    bw.concat(&maintain_bytes);
  }

  // Per block: is_intra bit; if intra, an all-intra bit (then a 4-bit
  // submask when not all four quadrants are intra), a has-src-dc bit (then
  // an 8-bit literal DC when set); if inter, an EPRM bit. Every block then
  // carries a SEG-coded motion vector against the spatial predictor --
  // intra blocks transmit their full-pel reference offset this way too,
  // which is how INTRA-within-P still tracks motion (dsv_encoder.c's
  // per-block loop spreads these same fields across five separate ZBRLE
  // substreams; this keeps them inline per block instead).
  fn encode_motion(&self, bw: &mut BitWriter, mvs: &[MotionVector], params: &PictureParams) {
    for by in 0..params.nblocks_v {
      for bx in 0..params.nblocks_h {
        let idx = (by * params.nblocks_h + bx) as usize;
        let mv = mvs[idx];
        let (px, py) = mv_pred::movec_pred(mvs, params, bx as i32, by as i32);
        bw.put_bit(mv.is_intra() as u32);
        if mv.is_intra() {
          bw.put_bit(mv.is_all_intra() as u32);
          if !mv.is_all_intra() {
            bw.put_bits(4, mv.submask as u32);
          }
          let has_src_dc = mv.dc & crate::block::SRC_DC_PRED != 0;
          bw.put_bit(has_src_dc as u32);
          if has_src_dc {
            bw.put_bits(8, (mv.dc & 0xff) as u32);
          }
        } else {
          bw.put_bit(mv.is_eprm() as u32);
        }
        bw.put_seg(mv.x as i32 - px);
        bw.put_seg(mv.y as i32 - py);
      }
    }
    bw.align();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn metadata_packet_has_correct_fourcc() {
    let meta = Metadata::new(64, 64, meta::SUBSAMP_420);
    let enc = Encoder::new(EncoderConfig::default(), meta);
    let pkt = enc.metadata_packet();
    assert_eq!(&pkt[0..4], b"DSV2");
  }

  #[test]
  fn first_frame_is_always_intra() {
    let m = Metadata::new(64, 64, meta::SUBSAMP_420);
    let mut enc = Encoder::new(EncoderConfig::default(), m);
    let src = Frame::new(meta::SUBSAMP_420, 64, 64, Bordered::No);
    let pkt = enc.encode(&src);
    let hdr = packet::read_header(&pkt).unwrap();
    assert_eq!(hdr.pkt_type, PacketType::Pic { is_ref: true, has_ref: false });
  }
}
