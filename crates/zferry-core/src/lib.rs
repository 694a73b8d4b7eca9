//! zferry-core — wire constants, frame types, and the frame codec.
//! The transfer engine crate builds on this one.

pub mod codec;
pub mod config;
pub mod consts;
pub mod crc;
pub mod frame;

pub use codec::{DecodeError, DecodeOpts, FrameDecoder};
pub use frame::{Direction, Encoding, FileHeader, Frame, FrameKind};
