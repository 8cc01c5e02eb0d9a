// Packet framing: the 4-byte fourcc, minor version, packet type byte, and
// the prev/next link offsets that let a reader walk the stream without
// decoding every packet's payload.
//
// Grounded on examples/original_source/src/dsv.h (DSV_FOURCC_*,
// DSV_VERSION_MINOR, DSV_PT_*, DSV_PACKET_HDR_SIZE) and dsv_encoder.c's
// encode_packet_hdr/set_link_offsets. The header is 14 bytes, taken from
// DSV_PACKET_HDR_SIZE = (4+1+1+4+4).

use byteorder::{BigEndian, ByteOrder};

use crate::error::{DsvError, Result};

pub const FOURCC: [u8; 4] = *b"DSV2";
// spec.md SS8 scenario 1 pins the literal EOS byte vector with minor=0x08
// (the single-header decoder's version); that concrete vector is the
// resolving authority for this crate the same way it was for HDR_SIZE
// above, so this core tracks minor 8 rather than the split encoder's 7.
pub const VERSION_MINOR: u8 = 8;

pub const HDR_SIZE: usize = 4 + 1 + 1 + 4 + 4;
pub const TYPE_OFFSET: usize = 5;
pub const PREV_OFFSET: usize = 6;
pub const NEXT_OFFSET: usize = 10;

pub const PT_META: u8 = 0x00;
pub const PT_PIC: u8 = 0x04;
pub const PT_EOS: u8 = 0x10;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PacketType {
  Meta,
  Pic { is_ref: bool, has_ref: bool },
  Eos,
}

impl PacketType {
  pub fn to_byte(self) -> u8 {
    match self {
      PacketType::Meta => PT_META,
      PacketType::Pic { is_ref, has_ref } => PT_PIC | ((is_ref as u8) << 1) | has_ref as u8,
      PacketType::Eos => PT_EOS,
    }
  }

  pub fn from_byte(b: u8) -> Option<Self> {
    if b == PT_META {
      Some(PacketType::Meta)
    } else if b == PT_EOS {
      Some(PacketType::Eos)
    } else if b & PT_PIC != 0 {
      Some(PacketType::Pic { is_ref: (b >> 1) & 1 != 0, has_ref: b & 1 != 0 })
    } else {
      None
    }
  }
}

// Writes the 14-byte header with both link offsets reserved as zero;
// callers patch NEXT_OFFSET in once the payload length is known (mirrors
// set_link_offsets in the original encoder, which only ever fills in the
// forward link at encode time -- backward links are a reader-side
// convenience built while walking the stream).
pub fn write_header(buf: &mut Vec<u8>, pkt_type: PacketType) {
  buf.extend_from_slice(&FOURCC);
  buf.push(VERSION_MINOR);
  buf.push(pkt_type.to_byte());
  buf.extend_from_slice(&[0u8; 4]); // prev_link
  buf.extend_from_slice(&[0u8; 4]); // next_link
}

pub fn patch_next_link(buf: &mut [u8], next_link: u32) {
  BigEndian::write_u32(&mut buf[NEXT_OFFSET..NEXT_OFFSET + 4], next_link);
}

pub fn patch_prev_link(buf: &mut [u8], prev_link: u32) {
  BigEndian::write_u32(&mut buf[PREV_OFFSET..PREV_OFFSET + 4], prev_link);
}

pub struct ParsedHeader {
  pub pkt_type: PacketType,
  pub prev_link: u32,
  pub next_link: u32,
}

// Parses the header and tolerates a one-minor-version skew between stream
// and decoder; differing by more than one minor version is rejected.
pub fn read_header(data: &[u8]) -> Result<ParsedHeader> {
  if data.len() < HDR_SIZE {
    return Err(DsvError::OutOfBytes { needed: HDR_SIZE, available: data.len() });
  }
  if data[0..4] != FOURCC {
    let mut got = [0u8; 4];
    got.copy_from_slice(&data[0..4]);
    return Err(DsvError::BadFourCc(got));
  }
  let stream_minor = data[4];
  if stream_minor.abs_diff(VERSION_MINOR) > 1 {
    return Err(DsvError::IncompatibleVersion { stream_minor, decoder_minor: VERSION_MINOR });
  }
  let pkt_type = PacketType::from_byte(data[TYPE_OFFSET]).ok_or(DsvError::BadPacketSize(data.len()))?;
  let prev_link = BigEndian::read_u32(&data[PREV_OFFSET..PREV_OFFSET + 4]);
  let next_link = BigEndian::read_u32(&data[NEXT_OFFSET..NEXT_OFFSET + 4]);
  Ok(ParsedHeader { pkt_type, prev_link, next_link })
}

// An end-of-stream packet is the header alone; next_link stays 0, which is
// the wire encoding of "no next packet" (spec.md SS4.7/SS8 scenario 1).
pub fn encode_eos() -> Vec<u8> {
  let mut buf = Vec::with_capacity(HDR_SIZE);
  write_header(&mut buf, PacketType::Eos);
  buf
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn eos_packet_matches_spec_vector() {
    let buf = encode_eos();
    let expected = [0x44, 0x53, 0x56, 0x32, 0x08, 0x10, 0, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(buf.as_slice(), &expected);
  }

  #[test]
  fn header_round_trips() {
    let mut buf = Vec::new();
    write_header(&mut buf, PacketType::Pic { is_ref: true, has_ref: false });
    patch_next_link(&mut buf, 123);
    patch_prev_link(&mut buf, 45);
    let parsed = read_header(&buf).unwrap();
    assert_eq!(parsed.pkt_type, PacketType::Pic { is_ref: true, has_ref: false });
    assert_eq!(parsed.next_link, 123);
    assert_eq!(parsed.prev_link, 45);
  }

  #[test]
  fn bad_fourcc_is_rejected() {
    let mut buf = encode_eos();
    buf[0] = b'X';
    assert!(read_header(&buf).is_err());
  }

  #[test]
  fn pic_packet_type_round_trips_flags() {
    for is_ref in [false, true] {
      for has_ref in [false, true] {
        let b = PacketType::Pic { is_ref, has_ref }.to_byte();
        assert_eq!(PacketType::from_byte(b), Some(PacketType::Pic { is_ref, has_ref }));
      }
    }
  }
}
