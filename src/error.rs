// Error model for the codec core.
//
// The reference implementation treats most decode errors as "log and try to
// continue" and a handful (invariant violations) as fatal aborts. We keep
// that split: recoverable conditions are `DsvError` values
// threaded through `Result`, while invariant violations stay `panic!`/
// `assert!` the way the DSV_ASSERT macro aborts the C encoder.
//
// Grounded on kornelski-avif-parse's `Error` enum (src/lib.rs) - the nearest
// precedent in the pack for a parser distinguishing truncation, malformed
// headers, and unsupported data as distinct non-fatal cases.

use std::fmt;

pub type Result<T> = std::result::Result<T, DsvError>;

#[derive(Debug)]
pub enum DsvError {
  /// Packet header read ran past the end of the input.
  Eof,
  /// A payload read needed more bytes than were available.
  OutOfBytes { needed: usize, available: usize },
  /// The 4CC at the start of a packet header wasn't "DSV2".
  BadFourCc([u8; 4]),
  /// Packet length field was smaller than the fixed header size.
  BadPacketSize(usize),
  /// A coefficient-plane length prefix exceeded 2x the plane's coefficient
  /// area.
  BadPlaneLength { len: usize, limit: usize },
  /// HZCC payload was missing its 0x55 end-of-plane sentinel.
  MissingEop,
  /// A picture packet arrived before any metadata packet.
  MetadataMissing,
  /// A P-frame arrived with no cached reference frame.
  ReferenceMissing,
  /// Decoder-side minor version is more than one greater than the stream's.
  IncompatibleVersion { stream_minor: u8, decoder_minor: u8 },
}

impl fmt::Display for DsvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DsvError::Eof => write!(f, "end of stream while reading packet header"),
      DsvError::OutOfBytes { needed, available } =>
        write!(f, "out of bytes: needed {needed}, had {available}"),
      DsvError::BadFourCc(got) =>
        write!(f, "bad 4CC: {:02x} {:02x} {:02x} {:02x}", got[0], got[1], got[2], got[3]),
      DsvError::BadPacketSize(size) => write!(f, "packet size {size} smaller than header"),
      DsvError::BadPlaneLength { len, limit } =>
        write!(f, "coefficient plane length {len} exceeds limit {limit}"),
      DsvError::MissingEop => write!(f, "missing end-of-plane sentinel after HZCC payload"),
      DsvError::MetadataMissing => write!(f, "picture packet arrived before metadata"),
      DsvError::ReferenceMissing => write!(f, "P-frame arrived with no reference frame cached"),
      DsvError::IncompatibleVersion { stream_minor, decoder_minor } =>
        write!(f, "stream minor version {stream_minor} incompatible with decoder minor version {decoder_minor}"),
    }
  }
}

impl std::error::Error for DsvError {}
