//! DSV-2: a lossy, block-based subband-transform video codec with
//! hierarchical motion estimation, sub-pixel motion compensation, an
//! adaptive in-loop filter, and a custom entropy-coded bitstream.
//!
//! This crate is a library: `encoder`/`decoder` are the entry points, and
//! there is no CLI, Y4M/raw-YUV I/O, or console logging built in -- callers
//! supply frames and consume packets, and install their own `log`
//! subscriber if they want diagnostics.

pub mod array2d;
pub mod bitstream;
pub mod block;
pub mod coef;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod hme;
pub mod hzcc;
pub mod loopfilter;
pub mod mc;
pub mod meta;
pub mod mv_pred;
pub mod packet;
pub mod ratecontrol;
pub mod subband;
pub mod util;

pub use block::{BlockMeta, MotionVector, PictureParams};
pub use config::{EncoderConfig, RateControlMode};
pub use decoder::{DecodeEvent, Decoder};
pub use encoder::Encoder;
pub use error::{DsvError, Result};
pub use frame::{Bordered, Frame, FrameRc};
pub use meta::Metadata;
