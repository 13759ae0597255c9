//! PPP frame encoding and decoding
//!
//! The codec layer is split into three pieces that mirror the layering on
//! the wire: the outer encapsulation and PPP header ([`frame`]), HDLC byte
//! stuffing ([`hdlc`]) and the option TLVs carried inside negotiation
//! payloads ([`tlv`]). All of it is plain byte slicing with no I/O; the
//! session mainloop owns the buffers.

pub mod errors;
pub mod frame;
pub mod hdlc;
pub mod tlv;

pub use errors::FrameError;
