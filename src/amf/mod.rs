//! AMF (Action Message Format) implementation
//!
//! AMF is Adobe's binary serialization format used in RTMP for encoding
//! command parameters and metadata. RTMP command traffic is AMF0; this
//! module implements the AMF0 subset that appears on the wire.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::AmfValue;
