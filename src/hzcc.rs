// Hierarchical Zero Coefficient Coding: per-plane quantization and zero-run
// entropy coding of subband coefficients. Grounded on
// examples/original_source/src/hzcc.c, translated function-for-function.

use crate::bitstream::{BitReader, BitWriter};
use crate::block::{BlockMeta, PictureParams};
use crate::coef::{CoefPlane, Sbc};
use crate::error::{DsvError, Result};
use crate::meta::{h_shift, v_shift};
use crate::util;

const EOP_SYMBOL: u32 = 0x55;
const MAXLVL: i32 = 3;
const NSUBBAND: i32 = 4; // 0 = LL, 1 = LH, 2 = HL, 3 = HH
const LH: i32 = 1;
const HL: i32 = 2;
const HH: i32 = 3;
const MINQUANT: i32 = 8; // 1 << MINQP(3)
const RUN_BITS: u32 = 24;

fn dimat(level: i32, v: i32) -> i32 {
  util::ceil_shift(v as u32, (MAXLVL - level) as u32) as i32
}

fn subband(level: i32, sub: i32, w: i32, h: i32) -> usize {
  let mut offset = 0i32;
  if sub & 1 != 0 {
    offset += dimat(level, w);
  }
  if sub & 2 != 0 {
    offset += dimat(level, h) * w;
  }
  offset as usize
}

fn fix_quant(q: i32) -> i32 {
  q * 3 / 2
}

// Visual masking / rate-control psychovisual flags. Mirrors DSV_PSY_* on the
// encoder config; a decoder never sets these since it never quantizes.
#[derive(Clone, Copy, Default)]
pub struct PsyFlags {
  pub p_visual_masking: bool,
  pub i_visual_masking: bool,
}

pub struct FrameMeta<'a> {
  pub params: &'a PictureParams,
  pub is_p: bool,
  // 0 = luma, 1/2 = chroma
  pub cur_plane: usize,
  pub subsamp: u8,
  pub do_psy: PsyFlags,
  // row-major nblocks_h x nblocks_v, one entry per coding block.
  pub block_meta: &'a [BlockMeta],
}

impl<'a> FrameMeta<'a> {
  fn is_chroma(&self) -> bool {
    self.cur_plane != 0
  }

  fn block_at(&self, bx: usize, by: usize) -> BlockMeta {
    let idx = by * self.params.nblocks_h as usize + bx;
    self.block_meta.get(idx).copied().unwrap_or_default()
  }
}

// larger dimensions -> higher freq is less important
//
// Also used by mc.rs's loop-filter strength calculation with sub == -1,
// which falls into the same combined-dimension branch as HH.
pub(crate) fn spatial_psy_factor(p: &PictureParams, sub: i32) -> i32 {
  let (lo, hi, scale);
  if sub == LH {
    lo = util::ceil_shift(352, util::log2i(p.blk_w)) as i32;
    hi = util::ceil_shift(1920, util::log2i(p.blk_w)) as i32;
    scale = p.nblocks_h as i32;
  } else if sub == HL {
    lo = util::ceil_shift(288, util::log2i(p.blk_h)) as i32;
    hi = util::ceil_shift(1080, util::log2i(p.blk_h)) as i32;
    scale = p.nblocks_v as i32;
  } else {
    lo = util::ceil_shift(352, util::log2i(p.blk_w)) as i32 * util::ceil_shift(288, util::log2i(p.blk_h)) as i32;
    hi = util::ceil_shift(1920, util::log2i(p.blk_w)) as i32 * util::ceil_shift(1080, util::log2i(p.blk_h)) as i32;
    scale = (p.nblocks_h * p.nblocks_v) as i32;
  }
  let scale = util::max(0, scale - lo);
  (scale << 7) / (hi - lo)
}

fn lfquant(q: i32, fm: &FrameMeta) -> i32 {
  let psyfac = spatial_psy_factor(fm.params, HH);
  let mut q = q - (q * psyfac >> (7 + 3));
  q = util::max(q, MINQUANT);
  if fm.is_chroma() {
    if q > 256 {
      q = 256 + q / 4;
    }
    util::min(q, 768)
  } else {
    util::min(q, 3072)
  }
}

fn hfquant(fm: &FrameMeta, q: i32, s: i32, l: i32) -> i32 {
  let chroma = fm.is_chroma();
  let mut psyfac = spatial_psy_factor(fm.params, s);
  let mut q = q / 2;
  psyfac = q * psyfac >> (7 + if fm.is_p { 0 } else { 1 });

  if chroma {
    let mut tl = l - 2;
    if s == LH {
      tl += h_shift(fm.subsamp) as i32;
    } else if s == HL {
      tl += v_shift(fm.subsamp) as i32;
    }
    q = (q * 6) / (4 - tl);
  } else if l == MAXLVL - 2 {
    q += psyfac / 2;
  } else if l == MAXLVL - 1 {
    q += psyfac;
  }

  if fm.is_p {
    if l != MAXLVL - 1 {
      if l == MAXLVL - 3 {
        q *= 2;
        q -= psyfac;
      } else {
        q -= psyfac / 2;
      }
    }
    return util::max(q / 4, MINQUANT);
  }

  q = q * (15 + 3 * l) / 16;
  if !chroma {
    if l == MAXLVL - 3 {
      q = (q * 3) / 8;
    } else if s == HH {
      q *= 2;
    }
  } else {
    q /= 4;
    if s == HH {
      q *= 2;
    }
  }
  util::max(q, MINQUANT)
}

fn tmq4pos_p(tmq: i32, m: &BlockMeta) -> i32 {
  if m.eprm() || m.stable() || m.intra() {
    tmq * 3 >> 2
  } else {
    tmq
  }
}

fn tmq4pos_i(tmq: i32, m: &BlockMeta, l: i32) -> i32 {
  if l == MAXLVL - 3 {
    return tmq;
  }
  if l == MAXLVL - 1 {
    return match (m.stable(), m.maintain()) {
      (true, false) => tmq >> 2,
      (false, true) => tmq >> (if m.ringing() { 2 } else { 1 }),
      (true, true) => tmq >> 2,
      (false, false) => tmq,
    };
  }
  // default / MAXLVL - 2
  match (m.stable(), m.maintain()) {
    (true, false) => tmq / 3,
    (false, true) => tmq / (if m.ringing() { 6 } else { 3 }),
    (true, true) => tmq >> 2,
    (false, false) => tmq,
  }
}

fn quant_sub(v: i32, q: i32, sub: i32) -> i32 {
  (if v >= 0 { v - sub } else { v + sub }) / q
}

fn quant_ri(v: i32, q: i32) -> i32 {
  if v.abs() < q * 7 / 8 {
    return 0;
  }
  if v < 0 {
    (v - q / 3) / q
  } else {
    (v + q / 3) / q
  }
}

fn quant_s(v: i32, q: i32) -> i32 {
  v / q
}

fn dequant_s(v: i32, q: i32) -> Sbc {
  v * q + if v < 0 { -(q * 2 / 3) } else { q * 2 / 3 }
}

fn dequant_d(v: i32, q: i32) -> Sbc {
  v * q + if v < 0 { -(q / 2) } else { q / 2 }
}

fn dequant_l(v: i32, q: i32, is_p: bool) -> Sbc {
  if is_p {
    dequant_d(v, q)
  } else {
    dequant_s(v, q)
  }
}

fn dequant_h(v: i32, q: i32) -> Sbc {
  dequant_d(v, q)
}

// hzcc_enc: quantizes `plane` in place (matching the encoder's local
// reconstruction) and writes the zero-run coded residual stream.
fn encode_coefficients(bw: &mut BitWriter, plane: &mut CoefPlane, q: i32, fm: &FrameMeta) {
  let w = plane.width() as i32;
  let h = plane.height() as i32;
  let lossless = fm.params.lossless;

  let start = bw.bit_pos();
  bw.put_bits(RUN_BITS, 0);
  bw.align();

  let q = fix_quant(q);
  let mut run = 0i32;
  let mut nruns = 0u32;

  let sw = dimat(0, w);
  let sh = dimat(0, h);
  let qp = lfquant(q, fm);

  let buf = plane.data.as_flat_slice_mut();

  if lossless {
    for y in 0..sh {
      for x in 0..sw {
        let idx = (y * w + x) as usize;
        let v = buf[idx];
        if v != 0 {
          bw.put_ueg(run as u32);
          bw.put_neg(v);
          run = -1;
          nruns += 1;
        }
        run += 1;
      }
    }
    for l in 0..MAXLVL {
      let sw = dimat(l, w);
      let sh = dimat(l, h);
      for s in 1..NSUBBAND {
        let o = subband(l, s, w, h) as i32;
        for y in 0..sh {
          for x in 0..sw {
            let idx = (o + y * w + x) as usize;
            let v = buf[idx];
            if v != 0 {
              bw.put_ueg(run as u32);
              bw.put_neg(v);
              run = -1;
              nruns += 1;
            } else {
              buf[idx] = 0;
            }
            run += 1;
          }
        }
      }
    }
  } else {
    for y in 0..sh {
      for x in 0..sw {
        let idx = (y * w + x) as usize;
        let v = quant_s(buf[idx], qp);
        if v != 0 {
          buf[idx] = dequant_l(v, qp, fm.is_p);
          bw.put_ueg(run as u32);
          bw.put_neg(v);
          run = -1;
          nruns += 1;
        } else {
          buf[idx] = 0;
        }
        run += 1;
      }
    }

    for l in 0..MAXLVL {
      let sw = dimat(l, w);
      let sh = dimat(l, h);
      let dbx = ((fm.params.nblocks_h as i64) << 14) / sw as i64;
      let dby = ((fm.params.nblocks_v as i64) << 14) / sh as i64;
      let psyluma = ((fm.is_p && fm.do_psy.p_visual_masking) || (!fm.is_p && fm.do_psy.i_visual_masking))
        && !fm.is_chroma()
        && l != MAXLVL - 3;

      for s in 1..NSUBBAND {
        let par = subband(l - 1, s, w, h) as i32;
        let o = subband(l, s, w, h) as i32;
        let qp = hfquant(fm, q, s, l);

        let mut by: i64 = 0;
        for y in 0..sh {
          let mut bx: i64 = 0;
          let blk_row = (by >> 14) as usize;
          for x in 0..sw {
            let tmq0 = qp;
            let blk_col = (bx >> 14) as usize;
            let m = fm.block_at(blk_col, blk_row);
            let idx = (o + y * w + x) as usize;

            let v;
            let tmq;
            if fm.is_p {
              tmq = tmq4pos_p(tmq0, &m);
              if psyluma && m.simcmplx() {
                v = quant_sub(buf[idx], tmq, tmq >> 2);
              } else {
                v = quant_s(buf[idx], tmq);
              }
            } else {
              tmq = tmq4pos_i(tmq0, &m, l);
              if psyluma && !m.stable() {
                if buf[idx] != 0 {
                  let parent_idx = (par + (y >> 1) * w + (x >> 1)) as usize;
                  let parc = buf[parent_idx];
                  if parc != 0 {
                    let absrc = buf[idx].abs();
                    let tm = (q * parc.abs() / absrc) >> (7 - l);
                    if tm < tmq && tm < absrc {
                      v = quant_sub(buf[idx], tmq, tm);
                    } else {
                      v = 0;
                    }
                  } else {
                    v = quant_ri(buf[idx], tmq);
                  }
                } else {
                  v = 0;
                }
              } else {
                v = quant_s(buf[idx], tmq);
              }
            }

            if v != 0 {
              buf[idx] = dequant_h(v, tmq);
              bw.put_ueg(run as u32);
              bw.put_neg(v);
              run = -1;
              nruns += 1;
            } else {
              buf[idx] = 0;
            }
            run += 1;
            bx += dbx;
          }
          by += dby;
        }
      }
    }
  }

  bw.align();
  let end = bw.bit_pos();
  bw.seek_bit(start);
  bw.put_bits(RUN_BITS, nruns);
  bw.seek_bit(end);
}

// hzcc_dec: reads the zero-run coded stream into `plane`, dequantizing as it
// goes. `bit_limit` mirrors the C decoder's `bufsz` guard: once the read
// cursor reaches it, remaining positions are left at zero rather than erred.
fn decode_coefficients(br: &mut BitReader, plane: &mut CoefPlane, q: i32, fm: &FrameMeta, bit_limit: usize) -> Result<()> {
  let w = plane.width() as i32;
  let h = plane.height() as i32;
  let lossless = fm.params.lossless;

  br.align();
  let mut runs = br.get_bits(RUN_BITS)? as i64;
  br.align();

  let q = fix_quant(q);

  let sw = dimat(0, w);
  let sh = dimat(0, h);
  let qp = lfquant(q, fm);

  let mut run: i64 = if runs > 0 {
    runs -= 1;
    br.get_ueg()? as i64
  } else {
    i64::MAX
  };

  macro_rules! next_run {
    () => {
      if runs > 0 {
        runs -= 1;
        br.get_ueg()? as i64
      } else {
        i64::MAX
      }
    };
  }

  let buf = plane.data.as_flat_slice_mut();

  if lossless {
    'll: for y in 0..sh {
      for x in 0..sw {
        if run == 0 {
          let v = br.get_neg()?;
          run = next_run!();
          if br.bit_pos() >= bit_limit {
            break 'll;
          }
          buf[(y * w + x) as usize] = v;
        } else {
          run -= 1;
        }
      }
    }
    'outer: for l in 0..MAXLVL {
      let sw = dimat(l, w);
      let sh = dimat(l, h);
      for s in 1..NSUBBAND {
        let o = subband(l, s, w, h) as i32;
        for y in 0..sh {
          for x in 0..sw {
            if run == 0 {
              let v = br.get_neg()?;
              run = next_run!();
              if br.bit_pos() >= bit_limit {
                break 'outer;
              }
              buf[(o + y * w + x) as usize] = v;
            } else {
              run -= 1;
            }
          }
        }
      }
    }
  } else {
    'll2: for y in 0..sh {
      for x in 0..sw {
        if run == 0 {
          let v = br.get_neg()?;
          run = next_run!();
          if br.bit_pos() >= bit_limit {
            break 'll2;
          }
          buf[(y * w + x) as usize] = dequant_l(v, qp, fm.is_p);
        } else {
          run -= 1;
        }
      }
    }

    'outer2: for l in 0..MAXLVL {
      let sw = dimat(l, w);
      let sh = dimat(l, h);
      let dbx = ((fm.params.nblocks_h as i64) << 14) / sw as i64;
      let dby = ((fm.params.nblocks_v as i64) << 14) / sh as i64;

      for s in 1..NSUBBAND {
        let o = subband(l, s, w, h) as i32;
        let qp = hfquant(fm, q, s, l);

        let mut by: i64 = 0;
        for y in 0..sh {
          let mut bx: i64 = 0;
          let blk_row = (by >> 14) as usize;
          for x in 0..sw {
            if run == 0 {
              let blk_col = (bx >> 14) as usize;
              let m = fm.block_at(blk_col, blk_row);
              let v = br.get_neg()?;
              run = next_run!();
              if br.bit_pos() >= bit_limit {
                break 'outer2;
              }
              let tmq = if fm.is_p { tmq4pos_p(qp, &m) } else { tmq4pos_i(qp, &m, l) };
              buf[(o + y * w + x) as usize] = dequant_h(v, tmq);
            } else {
              run -= 1;
            }
            bx += dbx;
          }
          by += dby;
        }
      }
    }
  }

  br.align();
  Ok(())
}

// dsv_encode_plane: length-prefixed plane payload with an unquantized DC and
// an end-of-plane sentinel for corruption detection.
pub fn encode_plane(bw: &mut BitWriter, plane: &mut CoefPlane, q: i32, fm: &FrameMeta) {
  bw.align();
  let start = bw.bit_pos();
  bw.put_bits(32, 0);

  let ll = plane.data.as_flat_slice()[0];
  bw.put_seg(ll);
  encode_coefficients(bw, plane, q, fm);
  plane.data.as_flat_slice_mut()[0] = ll;

  bw.put_bits(8, EOP_SYMBOL);
  bw.align();

  let end = bw.bit_pos();
  bw.seek_bit(start);
  bw.put_bits(32, ((end - start) / 8 - 4) as u32);
  bw.seek_bit(end);
}

// dsv_decode_plane: returns Ok(true) on a clean end-of-plane sentinel,
// Ok(false) if the plane decoded but its EOP marker was missing or corrupt
// (caller reports it and marks the frame corrupt, but keeps decoding).
pub fn decode_plane(br: &mut BitReader, plane: &mut CoefPlane, q: i32, fm: &FrameMeta) -> Result<bool> {
  br.align();
  let plen = br.get_bits(32)? as usize;
  br.align();

  let max_len = plane.width() * plane.height() * core::mem::size_of::<Sbc>() * 2;
  if plen == 0 || plen >= max_len {
    return Err(DsvError::BadPlaneLength { len: plen, limit: max_len });
  }

  let start = br.bit_pos();
  let ll = br.get_seg()?;
  decode_coefficients(br, plane, q, fm, start + plen * 8)?;
  plane.data.as_flat_slice_mut()[0] = ll;

  let eop_ok = br.get_bits(8)? == EOP_SYMBOL;
  br.align();

  br.seek_bit(start);
  br.concat_bytes(plen)?;

  Ok(eop_ok)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::PictureParams;

  fn params(w: u32, h: u32) -> PictureParams {
    PictureParams::new(w, h, 16, 16, true, false, 0, 1)
  }

  fn frame_meta<'a>(p: &'a PictureParams, is_p: bool, cur_plane: usize, blocks: &'a [BlockMeta]) -> FrameMeta<'a> {
    FrameMeta {
      params: p,
      is_p,
      cur_plane,
      subsamp: crate::meta::SUBSAMP_420,
      do_psy: PsyFlags::default(),
      block_meta: blocks,
    }
  }

  #[test]
  fn lossless_plane_round_trips_at_q1() {
    let pp = params(32, 32);
    let mut plane = CoefPlane::new(32, 32);
    for y in 0..32usize {
      for x in 0..32usize {
        plane.data[y][x] = (((x * 3 + y * 5) % 37) as i32) - 18;
      }
    }
    let blocks = vec![BlockMeta::default(); (pp.nblocks_h * pp.nblocks_v) as usize];
    let fm = frame_meta(&pp, false, 0, &blocks);

    let mut bw = BitWriter::new();
    encode_plane(&mut bw, &mut plane, 1, &fm);
    let bytes = bw.finalize();

    let mut decoded = CoefPlane::new(32, 32);
    let mut br = BitReader::new(&bytes);
    let ok = decode_plane(&mut br, &mut decoded, 1, &fm).unwrap();
    assert!(ok);
    assert_eq!(plane.data.as_flat_slice(), decoded.data.as_flat_slice());
  }

  #[test]
  fn dc_is_not_quantized() {
    let pp = params(32, 32);
    let mut plane = CoefPlane::new(32, 32);
    plane.data[0][0] = -112;
    let blocks = vec![BlockMeta::default(); (pp.nblocks_h * pp.nblocks_v) as usize];
    let fm = frame_meta(&pp, false, 0, &blocks);

    let mut bw = BitWriter::new();
    encode_plane(&mut bw, &mut plane, 40, &fm);
    let bytes = bw.finalize();

    let mut decoded = CoefPlane::new(32, 32);
    let mut br = BitReader::new(&bytes);
    decode_plane(&mut br, &mut decoded, 40, &fm).unwrap();
    assert_eq!(decoded.data[0][0], -112);
  }
}
