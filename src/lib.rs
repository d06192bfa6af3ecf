//! rtmp-publish: client-side RTMP live publishing
//!
//! This library implements the publishing half of RTMP:
//! - Chunk codec and AMF0 encoding for the wire protocol
//! - Client handshake, connect (including Adobe auth) and createStream
//! - Publish stream state machine with FMLE-style FCPublish traffic
//! - A broadcast orchestrator with automatic reconnection and
//!   queue-depth driven adaptive bitrate
//!
//! # Example: publish a stream
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_publish::media::{EncoderControl, Track};
//! use rtmp_publish::publisher::{Publisher, PublisherConfig, PublisherEvent};
//!
//! struct MyEncoder;
//!
//! impl EncoderControl for MyEncoder {
//!     fn start(&self) {}
//!     fn stop(&self) {}
//!     fn set_video_bitrate(&self, _bitrate: u32) {}
//!     fn set_audio_bitrate(&self, _bitrate: u32) {}
//!     fn set_muted(&self, _track: Track, _muted: bool) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PublisherConfig {
//!         url: "rtmp://live.example.com/app/stream-key".into(),
//!         ..Default::default()
//!     };
//!     let (publisher, mut events) = Publisher::new(config, Arc::new(MyEncoder), None)?;
//!     publisher.start_streaming();
//!
//!     // Feed encoded samples through publisher.sink() from the encoder,
//!     // and watch the broadcast lifecycle here.
//!     while let Some(event) = events.recv().await {
//!         if let PublisherEvent::Status(status) = event {
//!             println!("status: {:?}", status);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod publisher;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use client::config::{ConnectionConfig, RtmpAddress};
pub use client::connection::{ConnectionEvent, RtmpConnection, SampleSink};
pub use media::{EncoderControl, MediaSample, Recorder, StreamMetadata, Track};
pub use publisher::{BroadcastStatus, Publisher, PublisherConfig, PublisherEvent};
pub use session::{PublishKind, StreamSession};
