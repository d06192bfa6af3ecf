//! Publish stream state machine
//!
//! A `StreamSession` tracks one logical NetStream on top of a live
//! connection: createStream hands it a message stream id, `publish`
//! drives the FCPublish/publish exchange, and once the server answers
//! with `NetStream.Publish.Start` media samples flow through `append`.
//!
//! Session methods never touch the socket. They return ready-to-encode
//! chunks and the connection engine writes them, so every transition is
//! testable without IO.

use bytes::Bytes;

use crate::client::status::{StatusCode, StatusInfo};
use crate::media::{MediaSample, StreamMetadata, Track};
use crate::protocol::constants::*;
use crate::protocol::message::{Command, DataMessage, RtmpMessage};
use crate::protocol::RtmpChunk;

/// Lifecycle of a NetStream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// No message stream id yet
    Initialized,
    /// createStream answered, stream id assigned
    Open,
    /// play sent, waiting for the server
    Play,
    Playing,
    /// publish sent, waiting for NetStream.Publish.Start
    Publish,
    Publishing,
    Closed,
}

/// The publish mode argument of the publish command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishKind {
    #[default]
    Live,
    Record,
    Append,
}

impl PublishKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishKind::Live => "live",
            PublishKind::Record => "record",
            PublishKind::Append => "append",
        }
    }
}

/// Accumulates fractional millisecond deltas into a u32 media clock.
///
/// Encoders time frames in fractional milliseconds (e.g. 1024 samples
/// at 48kHz is 21.333ms). Truncating per frame would lose up to a
/// millisecond per frame; keeping the exact sum and rounding once keeps
/// the wire clock within half a millisecond of the true one forever.
#[derive(Debug, Default)]
struct TimestampTicker {
    exact_ms: f64,
}

impl TimestampTicker {
    fn advance(&mut self, delta_ms: f64) -> u32 {
        self.exact_ms += delta_ms;
        self.exact_ms.round() as u32
    }

    fn reset(&mut self) {
        self.exact_ms = 0.0;
    }
}

/// Per-second throughput counters, sampled by the engine's stats tick
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub current_fps: u32,
    pub media_bytes: u64,
}

pub struct StreamSession {
    id: u32,
    state: ReadyState,
    name: Option<String>,
    kind: PublishKind,
    /// FCPublish/FCUnpublish are only spoken to FMLE-compatible servers
    send_fc: bool,
    metadata: Option<StreamMetadata>,
    audio_clock: TimestampTicker,
    video_clock: TimestampTicker,
    audio_muted: bool,
    video_muted: bool,
    frames_this_tick: u32,
    stats: SessionStats,
}

impl StreamSession {
    pub fn new(send_fc: bool) -> Self {
        Self {
            id: 0,
            state: ReadyState::Initialized,
            name: None,
            kind: PublishKind::default(),
            send_fc,
            metadata: None,
            audio_clock: TimestampTicker::default(),
            video_clock: TimestampTicker::default(),
            audio_muted: false,
            video_muted: false,
            frames_this_tick: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    pub fn publish_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Called with the stream id from the createStream result
    pub fn open(&mut self, id: u32) {
        self.id = id;
        self.state = ReadyState::Open;
    }

    /// Start (or re-target) publishing under `name`.
    ///
    /// Re-publishing the same name while already live only updates the
    /// publish kind; the stream on the wire is untouched. A different
    /// name tears the current publish down first.
    pub fn publish(&mut self, name: &str, kind: PublishKind) -> Vec<RtmpChunk> {
        if matches!(self.state, ReadyState::Publish | ReadyState::Publishing)
            && self.name.as_deref() == Some(name)
        {
            self.kind = kind;
            return Vec::new();
        }

        let mut chunks = Vec::new();
        if matches!(self.state, ReadyState::Publish | ReadyState::Publishing) {
            chunks.extend(self.unpublish_chunks());
        }
        if !matches!(self.state, ReadyState::Open | ReadyState::Publish | ReadyState::Publishing) {
            tracing::warn!(state = ?self.state, "publish requested before stream is open");
            return chunks;
        }

        self.name = Some(name.to_string());
        self.kind = kind;
        self.audio_clock.reset();
        self.video_clock.reset();

        if self.send_fc {
            chunks.push(self.command_chunk(Command::new(
                CMD_FC_PUBLISH,
                0.0,
                vec![name.into()],
            )));
        }
        let mut publish = Command::new(
            CMD_PUBLISH,
            0.0,
            vec![name.into(), self.kind.as_str().into()],
        );
        publish.stream_id = self.id;
        chunks.push(self.command_chunk(publish));

        self.state = ReadyState::Publish;
        chunks
    }

    /// Feed an onStatus aimed at this stream. Returns chunks to write
    /// (the metadata data frame once the publish is accepted).
    pub fn on_status(&mut self, info: &StatusInfo) -> Vec<RtmpChunk> {
        match info.code {
            StatusCode::PublishStart if self.state == ReadyState::Publish => {
                self.state = ReadyState::Publishing;
                tracing::info!(stream = self.id, name = ?self.name, "publish accepted");
                self.metadata_chunk().into_iter().collect()
            }
            StatusCode::PublishBadName => {
                tracing::warn!(stream = self.id, "publish rejected: bad name");
                self.state = ReadyState::Open;
                self.name = None;
                Vec::new()
            }
            StatusCode::UnpublishSuccess => Vec::new(),
            _ => Vec::new(),
        }
    }

    /// Set the stream metadata. If the publish is already live the
    /// updated data frame goes out immediately.
    pub fn set_metadata(&mut self, metadata: StreamMetadata) -> Vec<RtmpChunk> {
        self.metadata = Some(metadata);
        if self.state == ReadyState::Publishing {
            self.metadata_chunk().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    pub fn set_muted(&mut self, track: Track, muted: bool) {
        match track {
            Track::Audio => self.audio_muted = muted,
            Track::Video => self.video_muted = muted,
        }
    }

    /// Turn one encoded sample into a media chunk. Samples are dropped
    /// (clock still advancing) while the track is muted, and dropped
    /// entirely when no publish is live.
    pub fn append(&mut self, sample: MediaSample) -> Option<RtmpChunk> {
        if self.state != ReadyState::Publishing {
            return None;
        }

        let (timestamp, muted, csid, message_type) = match sample.track {
            Track::Audio => (
                self.audio_clock.advance(sample.delta_ms),
                self.audio_muted,
                CSID_AUDIO,
                MSG_AUDIO,
            ),
            Track::Video => (
                self.video_clock.advance(sample.delta_ms),
                self.video_muted,
                CSID_VIDEO,
                MSG_VIDEO,
            ),
        };
        if muted {
            return None;
        }

        if sample.track == Track::Video {
            self.frames_this_tick += 1;
        }
        self.stats.media_bytes += sample.data.len() as u64;

        Some(RtmpChunk {
            csid,
            timestamp,
            message_type,
            stream_id: self.id,
            payload: sample.data,
        })
    }

    /// Tear the publish down and release the stream. Safe to call in
    /// any state; closing twice is a no-op.
    pub fn close(&mut self) -> Vec<RtmpChunk> {
        if self.state == ReadyState::Closed {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        if matches!(self.state, ReadyState::Publish | ReadyState::Publishing) {
            chunks.extend(self.unpublish_chunks());
        }
        if self.state != ReadyState::Initialized {
            chunks.push(self.command_chunk(Command::new(
                CMD_DELETE_STREAM,
                0.0,
                vec![(self.id as f64).into()],
            )));
        }
        self.state = ReadyState::Closed;
        self.name = None;
        chunks
    }

    /// Sample and reset the per-second counters
    pub fn tick(&mut self) -> SessionStats {
        self.stats.current_fps = self.frames_this_tick;
        self.frames_this_tick = 0;
        self.stats
    }

    fn unpublish_chunks(&mut self) -> Vec<RtmpChunk> {
        let mut chunks = Vec::new();
        if self.send_fc {
            if let Some(name) = self.name.clone() {
                chunks.push(self.command_chunk(Command::new(
                    CMD_FC_UNPUBLISH,
                    0.0,
                    vec![name.into()],
                )));
            }
        }
        let mut close_stream = Command::new(CMD_CLOSE_STREAM, 0.0, vec![]);
        close_stream.stream_id = self.id;
        chunks.push(self.command_chunk(close_stream));
        chunks
    }

    fn metadata_chunk(&self) -> Option<RtmpChunk> {
        let metadata = self.metadata.as_ref()?;
        let data = DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![CMD_ON_METADATA.into(), metadata.to_amf()],
            stream_id: self.id,
        };
        Some(RtmpMessage::Data(data).into_chunk(CSID_COMMAND, self.id, 0))
    }

    fn command_chunk(&self, command: Command) -> RtmpChunk {
        let stream_id = command.stream_id;
        RtmpMessage::Command(command).into_chunk(CSID_COMMAND, stream_id, 0)
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("name", &self.name)
            .finish()
    }
}
