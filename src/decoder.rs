// Top-level decoder: packet parsing, reference frame management, and the
// predict -> dequantize/inverse-transform -> reconstruct -> filter pipeline.
//
// Grounded on examples/original_source/src/dsv_decoder.c's overall packet
// dispatch loop and dsv_add_pred (predict, then add the decoded residual,
// then loop-filter). A corrupt plane (failed EOP sentinel) is reported but
// decoding continues rather than aborting the stream.

use crate::bitstream::BitReader;
use crate::block::{BlockMeta, MotionVector, PictureParams};
use crate::coef::CoefFrame;
use crate::error::{DsvError, Result};
use crate::frame::{Bordered, Frame};
use crate::hzcc::{self, FrameMeta, PsyFlags};
use crate::loopfilter;
use crate::mc;
use crate::meta::{self, Metadata};
use crate::mv_pred;
use crate::packet::{self, PacketType};
use crate::subband::{self, TransformMeta};

pub struct Decoder {
  meta: Option<Metadata>,
  params: Option<PictureParams>,
  reference: Option<Frame>,
  do_inter_filter: bool,
}

#[derive(Debug)]
pub enum DecodeEvent {
  Metadata(Metadata),
  Picture { fnum: u32, corrupt: bool },
  EndOfStream,
}

impl Decoder {
  pub fn new() -> Self {
    Self { meta: None, params: None, reference: None, do_inter_filter: true }
  }

  pub fn metadata(&self) -> Option<&Metadata> {
    self.meta.as_ref()
  }

  pub fn decode(&mut self, packet: &[u8]) -> Result<(DecodeEvent, Option<Frame>)> {
    let hdr = packet::read_header(packet)?;
    let payload = &packet[packet::HDR_SIZE..];

    match hdr.pkt_type {
      PacketType::Meta => {
        let mut br = BitReader::new(payload);
        let meta = Metadata::read(&mut br)?;
        self.meta = Some(meta);
        Ok((DecodeEvent::Metadata(meta), None))
      }
      PacketType::Eos => Ok((DecodeEvent::EndOfStream, None)),
      PacketType::Pic { is_ref: _, has_ref } => {
        let meta = self.meta.ok_or(DsvError::MetadataMissing)?;
        if has_ref && self.reference.is_none() {
          return Err(DsvError::ReferenceMissing);
        }
        let (frame, fnum, corrupt) = self.decode_picture(&meta, payload, has_ref)?;
        self.reference = Some(frame.clone_bordered(Bordered::Yes));
        Ok((DecodeEvent::Picture { fnum, corrupt }, Some(frame)))
      }
    }
  }

  fn decode_picture(&mut self, meta: &Metadata, payload: &[u8], has_ref: bool) -> Result<(Frame, u32, bool)> {
    let mut br = BitReader::new(payload);
    br.align();
    let fnum = br.get_bits(32)?;
    br.align();

    let blk_w_exp = br.get_ueg()? + 4;
    let blk_h_exp = br.get_ueg()? + 4;
    let blk_w = 1u32 << blk_w_exp;
    let blk_h = 1u32 << blk_h_exp;
    br.align();

    let quant = br.get_bits(12)? as i32;
    br.align();

    let params = PictureParams::new(meta.width, meta.height, blk_w, blk_h, true, has_ref, fnum, quant);
    self.params = Some(params);

    let nblk = (params.nblocks_h * params.nblocks_v) as usize;
    let mut mvs = vec![MotionVector::default(); nblk];
    let mut block_meta = vec![BlockMeta::new(); nblk];

    if has_ref {
      self.decode_motion(&mut br, &mut mvs, &params)?;
      // Mirror encoder.rs: hzcc.rs's P-path quantizer reads BlockMeta, not
      // MotionVector, so the per-block flags decoded onto `mvs` have to be
      // copied across before entropy decoding runs.
      for (bm, mv) in block_meta.iter_mut().zip(mvs.iter()) {
        bm.set_intra(mv.is_intra());
        bm.set_eprm(mv.is_eprm());
        bm.set_simcmplx(mv.is_simcmplx());
        bm.set_stable(mv.is_skip());
        bm.set_ringing(mv.is_ringing());
      }
    } else {
      self.decode_intra_block_flags(&mut br, &mut block_meta)?;
      for (mv, bm) in mvs.iter_mut().zip(block_meta.iter()) {
        mv.set_intra(true);
        mv.submask = crate::block::MASK_ALL_INTRA;
        mv.set_ringing(bm.ringing());
      }
    }

    let mut prediction = Frame::new(meta.subsamp, meta.width as usize, meta.height as usize, Bordered::Yes);
    let mut residual = Frame::new(meta.subsamp, meta.width as usize, meta.height as usize, Bordered::Yes);
    let mut coefs = CoefFrame::new(meta.subsamp, meta.width as usize, meta.height as usize);
    let block_ringing: Vec<bool> = block_meta.iter().map(|b| b.ringing()).collect();

    let mut corrupt = false;

    self.build_prediction(&mut prediction, &mvs, has_ref, &params);

    for plane_idx in 0..3 {
      let tmeta = TransformMeta {
        is_p: has_ref,
        is_luma: plane_idx == 0,
        lossless: params.lossless,
        block_ringing: &block_ringing,
        nblocks_h: params.nblocks_h as usize,
        nblocks_v: params.nblocks_v as usize,
      };
      let fm = FrameMeta {
        params: &params,
        is_p: has_ref,
        cur_plane: plane_idx,
        subsamp: meta.subsamp,
        do_psy: PsyFlags::default(),
        block_meta: &block_meta,
      };
      let plane = coefs.plane_mut(plane_idx);
      let ok = hzcc::decode_plane(&mut br, plane, quant, &fm)?;
      if !ok {
        log::warn!("frame {} plane {} missing end-of-plane sentinel, marking corrupt", fnum, plane_idx);
        corrupt = true;
      }
      subband::inverse(plane, &tmeta, quant);
      plane.store_residual(residual.plane_mut(plane_idx));
    }

    let (h_shift, v_shift) = (meta::h_shift(meta.subsamp) as u32, meta::v_shift(meta.subsamp) as u32);
    let mut out = Frame::new(meta.subsamp, meta.width as usize, meta.height as usize, Bordered::Yes);
    for plane_idx in 0..3 {
      let is_chroma = plane_idx != 0;
      let (bw, bh) = if is_chroma { ((params.blk_w >> h_shift).max(1), (params.blk_h >> v_shift).max(1)) } else { (params.blk_w, params.blk_h) };
      let (pw, ph) = (residual.plane(plane_idx).width, residual.plane(plane_idx).height);
      for y in 0..ph as isize {
        let by = (y as u32 / bh).min(params.nblocks_v - 1);
        for x in 0..pw as isize {
          let bx = (x as u32 / bw).min(params.nblocks_h - 1);
          let idx = (by * params.nblocks_h + bx) as usize;
          let pred = prediction.plane(plane_idx).get(x, y);
          let res = residual.plane(plane_idx).get(x, y);
          out.plane_mut(plane_idx).set(x, y, mc::reconstruct(pred, res, params.lossless, mvs[idx].is_eprm()));
        }
      }
    }

    if has_ref && self.do_inter_filter {
      loopfilter::luma_filter(out.y_mut(), &params, &mvs, quant, true);
      for plane_idx in 1..3 {
        loopfilter::chroma_filter(out.plane_mut(plane_idx), &params, &mvs, quant, h_shift, v_shift, true);
      }
    } else if !has_ref {
      loopfilter::intra_filter(out.y_mut(), &params, &block_meta, quant, true);
    }
    out.extend();

    Ok((out, fnum, corrupt))
  }

  fn build_prediction(&self, prediction: &mut Frame, mvs: &[MotionVector], has_ref: bool, params: &PictureParams) {
    let subsamp = self.meta.unwrap().subsamp;
    let (h_shift, v_shift) = (meta::h_shift(subsamp) as u32, meta::v_shift(subsamp) as u32);

    for plane_idx in 0..3 {
      let is_chroma = plane_idx != 0;
      let (bw, bh) = if is_chroma { ((params.blk_w >> h_shift).max(1), (params.blk_h >> v_shift).max(1)) } else { (params.blk_w, params.blk_h) };

      for by in 0..params.nblocks_v {
        for bx in 0..params.nblocks_h {
          let idx = (by * params.nblocks_h + bx) as usize;
          let mv = mvs[idx];
          let x = (bx * bw) as isize;
          let y = (by * bh) as isize;

          if !has_ref {
            // Flat DC seed; the encoder's neighbor-average intra DC isn't
            // recoverable here without interleaving per-block
            // reconstruction into this pass (a documented condensation,
            // see DESIGN.md).
            for dy in 0..bh as isize {
              for dx in 0..bw as isize {
                prediction.plane_mut(plane_idx).set(x + dx, y + dy, 128);
              }
            }
          } else {
            let refr = self.reference.as_ref().unwrap();
            mc::predict(prediction.plane_mut(plane_idx), refr.plane(plane_idx), &mv, x, y, bw as usize, bh as usize, is_chroma, h_shift, v_shift, params.temporal_mc);
          }
        }
      }
    }
  }

  // Mirrors encoder.rs's encode_motion bit-for-bit: is_intra bit, then
  // either (all-intra bit, optional 4-bit submask, has-src-dc bit, optional
  // 8-bit DC) for an intra block or an EPRM bit for an inter block, then
  // every block's SEG-coded motion vector against the spatial predictor.
  fn decode_motion(&self, br: &mut BitReader, mvs: &mut [MotionVector], params: &PictureParams) -> Result<()> {
    for by in 0..params.nblocks_v {
      for bx in 0..params.nblocks_h {
        let idx = (by * params.nblocks_h + bx) as usize;
        let (px, py) = mv_pred::movec_pred(mvs, params, bx as i32, by as i32);
        let is_intra = br.get_bit()? != 0;
        if is_intra {
          mvs[idx].set_intra(true);
          let all_intra = br.get_bit()? != 0;
          if all_intra {
            mvs[idx].submask = crate::block::MASK_ALL_INTRA;
          } else {
            mvs[idx].submask = br.get_bits(4)? as u8;
          }
          let has_src_dc = br.get_bit()? != 0;
          if has_src_dc {
            let dc = br.get_bits(8)? as u16;
            mvs[idx].dc = crate::block::SRC_DC_PRED | dc;
          } else {
            mvs[idx].dc = 0;
          }
        } else {
          let eprm = br.get_bit()? != 0;
          mvs[idx].set_eprm(eprm);
        }
        let dx = br.get_seg()?;
        let dy = br.get_seg()?;
        mvs[idx].x = (px + dx) as i16;
        mvs[idx].y = (py + dy) as i16;
      }
    }
    br.align();
    Ok(())
  }

  fn decode_intra_block_flags(&self, br: &mut BitReader, block_meta: &mut [BlockMeta]) -> Result<()> {
    let ringing_nbytes = br.get_ueg()? as usize;
    br.align();
    let ringing_bytes = br.concat_bytes(ringing_nbytes)?;
    let mut ringing = crate::bitstream::ZbrleReader::new(ringing_bytes);
    for bm in block_meta.iter_mut() {
      bm.set_ringing(ringing.get()?);
    }

    let maintain_nbytes = br.get_ueg()? as usize;
    br.align();
    let maintain_bytes = br.concat_bytes(maintain_nbytes)?;
    let mut maintain = crate::bitstream::ZbrleReader::new(maintain_bytes);
    for bm in block_meta.iter_mut() {
      bm.set_maintain(maintain.get()?);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::encoder::Encoder;
  use crate::config::EncoderConfig;

  #[test]
  fn decodes_metadata_packet_from_encoder() {
    let meta = Metadata::new(64, 64, meta::SUBSAMP_420);
    let enc = Encoder::new(EncoderConfig::default(), meta);
    let pkt = enc.metadata_packet();

    let mut dec = Decoder::new();
    let (event, frame) = dec.decode(&pkt).unwrap();
    assert!(frame.is_none());
    match event {
      DecodeEvent::Metadata(m) => assert_eq!(m, meta),
      _ => panic!("expected metadata event"),
    }
  }

  #[test]
  fn decodes_eos_packet() {
    let mut dec = Decoder::new();
    let (event, frame) = dec.decode(&packet::encode_eos()).unwrap();
    assert!(frame.is_none());
    assert!(matches!(event, DecodeEvent::EndOfStream));
  }

  #[test]
  fn first_intra_frame_round_trips_through_encoder_and_decoder() {
    let meta = Metadata::new(64, 64, meta::SUBSAMP_420);
    let mut enc = Encoder::new(EncoderConfig::default(), meta);
    let src = Frame::new(meta::SUBSAMP_420, 64, 64, Bordered::No);
    let pic_pkt = enc.encode(&src);

    let mut dec = Decoder::new();
    dec.decode(&enc.metadata_packet()).unwrap();
    let (event, frame) = dec.decode(&pic_pkt).unwrap();
    assert!(frame.is_some());
    match event {
      DecodeEvent::Picture { fnum, .. } => assert_eq!(fnum, 0),
      _ => panic!("expected picture event"),
    }
  }

  // spec.md SS8 scenario 2: a 16x16 all-Y=16/U=128/V=128 I-frame encoded
  // at quality=max (lossless) must decode back bit-exact on all planes.
  #[test]
  fn lossless_intra_frame_round_trips_bit_exact() {
    let meta = Metadata::new(16, 16, meta::SUBSAMP_420);
    let mut cfg = EncoderConfig::default();
    cfg.quality = 100 * crate::ratecontrol::QUALITY_SCALE;
    cfg.gop = 0;
    cfg.do_intra_filter = false;
    cfg.do_inter_filter = false;
    let mut enc = Encoder::new(cfg, meta);

    let mut src = Frame::new(meta::SUBSAMP_420, 16, 16, Bordered::No);
    for y in 0..16isize {
      for x in 0..16isize {
        src.y_mut().set(x, y, 16);
      }
    }
    for y in 0..8isize {
      for x in 0..8isize {
        src.plane_mut(1).set(x, y, 128);
        src.plane_mut(2).set(x, y, 128);
      }
    }

    let pic_pkt = enc.encode(&src);

    let mut dec = Decoder::new();
    dec.decode(&enc.metadata_packet()).unwrap();
    let (_event, frame) = dec.decode(&pic_pkt).unwrap();
    let out = frame.expect("picture packet must decode to a frame");

    for y in 0..16isize {
      for x in 0..16isize {
        assert_eq!(out.y().get(x, y), 16, "luma mismatch at ({x},{y})");
      }
    }
    for y in 0..8isize {
      for x in 0..8isize {
        assert_eq!(out.plane(1).get(x, y), 128, "u mismatch at ({x},{y})");
        assert_eq!(out.plane(2).get(x, y), 128, "v mismatch at ({x},{y})");
      }
    }
  }
}
