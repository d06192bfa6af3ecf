//! RTMP client implementation
//!
//! Everything needed to publish to a remote RTMP server: address and
//! connection configuration, the Adobe connect auth scheme, and the
//! connection engine itself.

pub mod auth;
pub mod config;
pub mod connection;
pub mod responder;
pub mod status;

pub use config::{ConnectionConfig, Credentials, RtmpAddress, RtmpScheme};
pub use connection::{
    ConnectionEvent, EngineStats, RtmpConnection, SampleSink,
};
pub use responder::Responder;
pub use status::{StatusCode, StatusInfo, StatusLevel};
