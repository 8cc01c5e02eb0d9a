// Stream metadata: dimensions, chroma subsampling, timing, and the
// never-consumed reserved field that forward-compatible decoders must still
// round-trip. Grounded on examples/original_source/src/dsv.h's DSV_META and
// its wire layout.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::Result;

pub const SUBSAMP_444: u8 = 0x00;
pub const SUBSAMP_422: u8 = 0x04;
pub const SUBSAMP_420: u8 = 0x05;
pub const SUBSAMP_411: u8 = 0x08;
pub const SUBSAMP_410: u8 = 0x0a;
pub const SUBSAMP_UYVY: u8 = 0x14;

pub fn h_shift(format: u8) -> u8 {
  (format >> 2) & 0x3
}

pub fn v_shift(format: u8) -> u8 {
  format & 0x3
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
  pub width: u32,
  pub height: u32,
  pub subsamp: u8,
  pub fps_num: u32,
  pub fps_den: u32,
  pub aspect_num: u32,
  pub aspect_den: u32,
  pub inter_sharpen: bool,
  // Present but never consumed; round-tripped so a decoder built against a
  // later minor version doesn't silently drop data it doesn't understand.
  pub reserved: Option<u16>,
}

impl Metadata {
  pub fn new(width: u32, height: u32, subsamp: u8) -> Self {
    assert!(width >= 16 && height >= 16, "DSV-2 frames must be at least 16x16");
    Self {
      width,
      height,
      subsamp,
      fps_num: 30,
      fps_den: 1,
      aspect_num: 1,
      aspect_den: 1,
      inter_sharpen: false,
      reserved: None,
    }
  }

  pub fn write(&self, bw: &mut BitWriter) {
    bw.put_ueg(self.width);
    bw.put_ueg(self.height);
    bw.put_ueg(self.subsamp as u32);
    bw.put_ueg(self.fps_num);
    bw.put_ueg(self.fps_den);
    bw.put_ueg(self.aspect_num);
    bw.put_ueg(self.aspect_den);
    bw.put_bit(self.inter_sharpen as u32);
    match self.reserved {
      Some(bits) => {
        bw.put_bit(1);
        bw.put_bits(15, bits as u32);
      }
      None => bw.put_bit(0),
    }
  }

  pub fn read(br: &mut BitReader) -> Result<Self> {
    let width = br.get_ueg()?;
    let height = br.get_ueg()?;
    let subsamp = br.get_ueg()? as u8;
    let fps_num = br.get_ueg()?;
    let fps_den = br.get_ueg()?;
    let aspect_num = br.get_ueg()?;
    let aspect_den = br.get_ueg()?;
    let inter_sharpen = br.get_bit()? != 0;
    let reserved = if br.get_bit()? != 0 { Some(br.get_bits(15)? as u16) } else { None };
    Ok(Self {
      width,
      height,
      subsamp,
      fps_num,
      fps_den,
      aspect_num,
      aspect_den,
      inter_sharpen,
      reserved,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_bitstream() {
    let mut meta = Metadata::new(352, 288, SUBSAMP_420);
    meta.fps_num = 25;
    meta.fps_den = 1;
    meta.inter_sharpen = true;
    meta.reserved = Some(0x1234 & 0x7fff);

    let mut bw = BitWriter::new();
    meta.write(&mut bw);
    let bytes = bw.finalize();
    let mut br = BitReader::new(&bytes);
    let back = Metadata::read(&mut br).unwrap();
    assert_eq!(meta, back);
  }

  #[test]
  fn subsampling_codes_match_wire_values() {
    assert_eq!(SUBSAMP_444, 0);
    assert_eq!(SUBSAMP_422, 4);
    assert_eq!(SUBSAMP_420, 5);
    assert_eq!(SUBSAMP_411, 8);
    assert_eq!(SUBSAMP_410, 10);
    assert_eq!(SUBSAMP_UYVY, 0x14);
  }
}
