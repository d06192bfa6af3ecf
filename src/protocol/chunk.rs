//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a
//! header that identifies the chunk stream and message being carried.
//!
//! ```text
//! Chunk Format:
//! +-------------+-----------------+-------------------+
//! | Basic Header| Message Header  | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)        |
//! +-------------+-----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) is appended when the 24-bit field saturates
//! at 0xFFFFFF, including on type 3 continuations of the same message.
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message (reassembled from chunks)
#[derive(Debug, Clone)]
pub struct RtmpChunk {
    /// Chunk stream ID (for multiplexing)
    pub csid: u32,
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

/// Per-chunk-stream state for reassembly and header compression
#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    /// Last absolute timestamp
    timestamp: u32,
    /// Last timestamp delta
    timestamp_delta: u32,
    /// Last message length
    message_length: u32,
    /// Last message type
    message_type: u8,
    /// Last message stream ID
    stream_id: u32,
    /// Whether the last header carried an extended timestamp
    has_extended_timestamp: bool,
    /// Buffer for partial message reassembly
    partial_message: BytesMut,
    /// Expected total length of the message being reassembled
    expected_length: u32,
}

/// Chunk stream decoder
///
/// Demultiplexes interleaved chunk streams and reassembles messages. State
/// for each chunk stream is independent; a fragmented video message does not
/// disturb command traffic on another csid.
pub struct ChunkDecoder {
    /// Maximum incoming chunk size (peer-announced via SetChunkSize)
    chunk_size: u32,
    /// Per-chunk-stream state
    streams: HashMap<u32, ChunkStreamState>,
    /// Maximum message size (sanity limit)
    max_message_size: u32,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Apply a peer SetChunkSize. Values outside 1..=0x7FFFFFFF are a
    /// protocol violation.
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Try to decode one chunk from the buffer, returning a message once its
    /// final chunk arrives.
    ///
    /// Returns `Ok(Some(..))` when a message completed, `Ok(None)` when more
    /// data is needed. Nothing is consumed from the buffer until the whole
    /// chunk (headers and data) is present, so a short read simply retries.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpChunk>> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };

        // A continuation header is only valid once this chunk stream has
        // seen a full header.
        if fmt == CHUNK_FMT_3 && !self.streams.contains_key(&csid) {
            return Err(ProtocolError::OrphanContinuation(csid).into());
        }
        let state = self.streams.entry(csid).or_default();

        let msg_header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            3 => 0,
            _ => return Err(ProtocolError::InvalidChunkHeader.into()),
        };

        if buf.len() < basic_len + msg_header_len {
            return Ok(None);
        }

        // Peek the 24-bit timestamp field to see whether a 4-byte extended
        // timestamp follows the message header.
        let has_extended = if fmt == CHUNK_FMT_3 {
            state.has_extended_timestamp
        } else {
            read_u24(&buf[basic_len..]) >= EXTENDED_TIMESTAMP_THRESHOLD
        };
        let extended_len = if has_extended { 4 } else { 0 };

        // Work out this chunk's data length without consuming anything.
        let message_length = match fmt {
            0 | 1 => read_u24(&buf[basic_len + 3..]),
            _ => state.message_length,
        };
        if message_length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message_length,
                max: self.max_message_size,
            }
            .into());
        }
        let already_buffered = state.partial_message.len() as u32;
        let remaining = if already_buffered > 0 {
            state.expected_length - already_buffered
        } else {
            message_length
        };
        let data_len = remaining.min(self.chunk_size) as usize;

        if buf.len() < basic_len + msg_header_len + extended_len + data_len {
            return Ok(None);
        }

        // The whole chunk is in the buffer; consume it.
        buf.advance(basic_len);
        let (timestamp_field, message_type, stream_id) = match fmt {
            0 => {
                let ts = buf.get_uint(3) as u32;
                buf.advance(3); // length already peeked
                let typ = buf.get_u8();
                let sid = buf.get_u32_le(); // stream ID is little-endian
                (ts, typ, sid)
            }
            1 => {
                let ts = buf.get_uint(3) as u32;
                buf.advance(3);
                let typ = buf.get_u8();
                (ts, typ, state.stream_id)
            }
            2 => (buf.get_uint(3) as u32, state.message_type, state.stream_id),
            _ => (state.timestamp_delta, state.message_type, state.stream_id),
        };

        let timestamp = if has_extended {
            buf.get_u32()
        } else {
            timestamp_field
        };
        state.has_extended_timestamp = has_extended;

        // Type 0 carries an absolute timestamp, the rest carry deltas. A
        // continuation chunk of an in-progress message repeats the delta but
        // must not advance the clock again.
        if already_buffered == 0 {
            state.timestamp = if fmt == CHUNK_FMT_0 {
                timestamp
            } else {
                state.timestamp.wrapping_add(timestamp)
            };
            state.timestamp_delta = if fmt == CHUNK_FMT_0 {
                0
            } else {
                timestamp
            };
            state.expected_length = message_length;
            state
                .partial_message
                .reserve(message_length as usize);
        }
        state.message_length = message_length;
        state.message_type = message_type;
        state.stream_id = stream_id;

        state.partial_message.put_slice(&buf[..data_len]);
        buf.advance(data_len);

        if state.partial_message.len() as u32 >= state.expected_length {
            let payload = state.partial_message.split().freeze();
            state.expected_length = 0;

            Ok(Some(RtmpChunk {
                csid,
                timestamp: state.timestamp,
                message_type: state.message_type,
                stream_id: state.stream_id,
                payload,
            }))
        } else {
            Ok(None)
        }
    }

    /// Drop any partial message on a chunk stream (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial_message.clear();
            state.expected_length = 0;
        }
    }

    /// Forget all chunk stream state (connection reset)
    pub fn reset(&mut self) {
        self.streams.clear();
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a basic header and return (fmt, csid, header_length)
fn parse_basic_header(buf: &[u8]) -> Result<Option<(u8, u32, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let first = buf[0];
    let fmt = first >> 6;
    let csid_low = first & 0x3F;

    match csid_low {
        0 => {
            // 2-byte form: csid = 64 + second byte
            if buf.len() < 2 {
                return Ok(None);
            }
            Ok(Some((fmt, 64 + buf[1] as u32, 2)))
        }
        1 => {
            // 3-byte form: csid = 64 + second + third*256
            if buf.len() < 3 {
                return Ok(None);
            }
            Ok(Some((fmt, 64 + buf[1] as u32 + (buf[2] as u32) * 256, 3)))
        }
        _ => Ok(Some((fmt, csid_low as u32, 1))),
    }
}

fn read_u24(buf: &[u8]) -> u32 {
    ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32)
}

/// Chunk stream encoder
///
/// Splits messages into chunks and compresses headers against the previous
/// message on the same chunk stream.
pub struct ChunkEncoder {
    /// Outgoing chunk size
    chunk_size: u32,
    /// Per-chunk-stream header history
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Set the outgoing chunk size. Announce the change to the peer with a
    /// SetChunkSize message before encoding with it.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Forget all header history (connection reset)
    pub fn reset(&mut self) {
        self.streams.clear();
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }

    /// Encode a message into one or more chunks appended to `buf`
    pub fn encode(&mut self, chunk: &RtmpChunk, buf: &mut BytesMut) {
        let chunk_size = self.chunk_size as usize;
        let payload_len = chunk.payload.len();

        let fmt = match self.streams.get(&chunk.csid) {
            None => CHUNK_FMT_0,
            Some(prev) => select_format(chunk, prev),
        };
        let state = self.streams.entry(chunk.csid).or_default();

        let needs_extended = if fmt == CHUNK_FMT_0 {
            chunk.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            chunk.timestamp.wrapping_sub(state.timestamp) >= EXTENDED_TIMESTAMP_THRESHOLD
        };
        let delta = chunk.timestamp.wrapping_sub(state.timestamp);
        let header_value = if fmt == CHUNK_FMT_0 { chunk.timestamp } else { delta };
        let field_value = if needs_extended {
            EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            header_value
        };

        state.timestamp_delta = if fmt == CHUNK_FMT_0 { 0 } else { delta };
        state.timestamp = chunk.timestamp;
        state.message_length = payload_len as u32;
        state.message_type = chunk.message_type;
        state.stream_id = chunk.stream_id;
        state.has_extended_timestamp = needs_extended;

        let mut offset = 0;
        let mut first_chunk = true;

        loop {
            let data_len = (payload_len - offset).min(chunk_size);

            write_basic_header(
                chunk.csid,
                if first_chunk { fmt } else { CHUNK_FMT_3 },
                buf,
            );

            if first_chunk {
                match fmt {
                    CHUNK_FMT_0 => {
                        write_u24(field_value, buf);
                        write_u24(payload_len as u32, buf);
                        buf.put_u8(chunk.message_type);
                        buf.put_u32_le(chunk.stream_id);
                    }
                    CHUNK_FMT_1 => {
                        write_u24(field_value, buf);
                        write_u24(payload_len as u32, buf);
                        buf.put_u8(chunk.message_type);
                    }
                    CHUNK_FMT_2 => {
                        write_u24(field_value, buf);
                    }
                    _ => {}
                }
            }

            // Continuation chunks of an extended-timestamp message repeat
            // the 4-byte value.
            if needs_extended {
                buf.put_u32(header_value);
            }

            buf.put_slice(&chunk.payload[offset..offset + data_len]);
            offset += data_len;
            first_chunk = false;

            if offset >= payload_len {
                break;
            }
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the smallest header format the history allows
fn select_format(chunk: &RtmpChunk, prev: &ChunkStreamState) -> u8 {
    if chunk.stream_id != prev.stream_id {
        return CHUNK_FMT_0;
    }

    // A timestamp going backwards cannot be expressed as a delta.
    if chunk.timestamp < prev.timestamp {
        return CHUNK_FMT_0;
    }

    if chunk.message_type != prev.message_type
        || chunk.payload.len() as u32 != prev.message_length
    {
        return CHUNK_FMT_1;
    }

    let delta = chunk.timestamp.wrapping_sub(prev.timestamp);
    if delta == prev.timestamp_delta {
        return CHUNK_FMT_3;
    }

    CHUNK_FMT_2
}

/// Write basic header
fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        buf.put_u8((fmt << 6) | 1);
        let csid_offset = csid - 64;
        buf.put_u8((csid_offset & 0xFF) as u8);
        buf.put_u8(((csid_offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}
