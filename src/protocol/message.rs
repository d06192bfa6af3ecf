//! RTMP message types and parsing
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Command Messages (type 20): AMF-encoded commands
//! - Data Messages (type 18): Metadata
//! - Audio/Video Messages (types 8, 9): Media data
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RtmpChunk;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// Audio data (type 8)
    Audio { timestamp: u32, data: Bytes },

    /// Video data (type 9)
    Video { timestamp: u32, data: Bytes },

    /// AMF0 Command (type 20)
    Command(Command),

    /// AMF0 Data message (type 18) - metadata, etc.
    Data(DataMessage),

    /// Unknown message type
    Unknown { type_id: u8, data: Bytes },
}

/// User Control Event
#[derive(Debug, Clone)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// RTMP command (connect, createStream, publish, _result, ...)
#[derive(Debug, Clone)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID
    pub transaction_id: f64,
    /// Command object (often null)
    pub command_object: AmfValue,
    /// Additional arguments
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
}

impl Command {
    /// Create a command with a null command object
    pub fn new(name: impl Into<String>, transaction_id: f64, arguments: Vec<AmfValue>) -> Self {
        Command {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments,
            stream_id: 0,
        }
    }

    /// Create a command with an explicit command object
    pub fn with_object(
        name: impl Into<String>,
        transaction_id: f64,
        command_object: AmfValue,
        arguments: Vec<AmfValue>,
    ) -> Self {
        Command {
            name: name.into(),
            transaction_id,
            command_object,
            arguments,
            stream_id: 0,
        }
    }

    /// First argument, if any. Responses carry their info object here.
    pub fn info(&self) -> Option<&AmfValue> {
        self.arguments.first()
    }

    /// Create a _result response (used by in-process test peers)
    pub fn result(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Command {
            name: CMD_RESULT.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// Create an _error response
    pub fn error(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Command {
            name: CMD_ERROR.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// Create an onStatus notification
    pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> Self {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::String(level.to_string()));
        info.insert("code".to_string(), AmfValue::String(code.to_string()));
        info.insert(
            "description".to_string(),
            AmfValue::String(description.to_string()),
        );

        Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![AmfValue::Object(info)],
            stream_id,
        }
    }
}

/// Data message (@setDataFrame, onMetaData, etc.)
#[derive(Debug, Clone)]
pub struct DataMessage {
    /// Handler name (e.g., "@setDataFrame", "onMetaData")
    pub name: String,
    /// Data values
    pub values: Vec<AmfValue>,
    /// Message stream ID
    pub stream_id: u32,
}

impl RtmpMessage {
    /// Parse a message from a reassembled chunk
    pub fn from_chunk(chunk: &RtmpChunk) -> Result<Self> {
        let mut payload = chunk.payload.clone();

        match chunk.message_type {
            MSG_SET_CHUNK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                // Top bit is reserved
                let size = payload.get_u32() & 0x7FFFFFFF;
                Ok(RtmpMessage::SetChunkSize(size))
            }

            MSG_ABORT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Abort {
                    csid: payload.get_u32(),
                })
            }

            MSG_ACKNOWLEDGEMENT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Acknowledgement {
                    sequence: payload.get_u32(),
                })
            }

            MSG_USER_CONTROL => Self::parse_user_control(&mut payload),

            MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: chunk.timestamp,
                data: payload,
            }),

            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: chunk.timestamp,
                data: payload,
            }),

            MSG_COMMAND_AMF0 => {
                let cmd = Self::parse_command(&mut payload, chunk.stream_id)?;
                Ok(RtmpMessage::Command(cmd))
            }

            MSG_DATA_AMF0 => {
                let data = Self::parse_data(&mut payload, chunk.stream_id)?;
                Ok(RtmpMessage::Data(data))
            }

            _ => Ok(RtmpMessage::Unknown {
                type_id: chunk.message_type,
                data: payload,
            }),
        }
    }

    /// Parse User Control message
    fn parse_user_control(payload: &mut Bytes) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let event_type = payload.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
            UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
            UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
            _ => UserControlEvent::Unknown {
                event_type,
                data: payload.clone(),
            },
        };

        Ok(RtmpMessage::UserControl(event))
    }

    /// Parse AMF0 command
    fn parse_command(payload: &mut Bytes, stream_id: u32) -> Result<Command> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => return Err(ProtocolError::InvalidCommand("expected command name".into()).into()),
        };

        // Lenient: a missing transaction id defaults to 0
        let transaction_id = match decoder.decode(payload)? {
            AmfValue::Number(n) => n,
            _ => 0.0,
        };

        let command_object = if payload.has_remaining() {
            decoder.decode(payload)?
        } else {
            AmfValue::Null
        };

        let mut arguments = Vec::new();
        while payload.has_remaining() {
            match decoder.decode(payload) {
                Ok(v) => arguments.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }

    /// Parse AMF0 data message
    fn parse_data(payload: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => String::new(), // lenient
        };

        let mut values = Vec::new();
        while payload.has_remaining() {
            match decoder.decode(payload) {
                Ok(v) => values.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(DataMessage {
            name,
            values,
            stream_id,
        })
    }

    /// Encode to (message type, payload)
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*size);
                (MSG_SET_CHUNK_SIZE, buf.freeze())
            }

            RtmpMessage::Abort { csid } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*csid);
                (MSG_ABORT, buf.freeze())
            }

            RtmpMessage::Acknowledgement { sequence } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*sequence);
                (MSG_ACKNOWLEDGEMENT, buf.freeze())
            }

            RtmpMessage::WindowAckSize(size) => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32(*size);
                (MSG_WINDOW_ACK_SIZE, buf.freeze())
            }

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }

            RtmpMessage::UserControl(event) => {
                let mut buf = BytesMut::with_capacity(10);
                match event {
                    UserControlEvent::StreamBegin(id) => {
                        buf.put_u16(UC_STREAM_BEGIN);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamEof(id) => {
                        buf.put_u16(UC_STREAM_EOF);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::SetBufferLength {
                        stream_id,
                        buffer_ms,
                    } => {
                        buf.put_u16(UC_SET_BUFFER_LENGTH);
                        buf.put_u32(*stream_id);
                        buf.put_u32(*buffer_ms);
                    }
                    UserControlEvent::PingRequest(ts) => {
                        buf.put_u16(UC_PING_REQUEST);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::PingResponse(ts) => {
                        buf.put_u16(UC_PING_RESPONSE);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::Unknown { event_type, data } => {
                        buf.put_u16(*event_type);
                        buf.put_slice(data);
                    }
                }
                (MSG_USER_CONTROL, buf.freeze())
            }

            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),

            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),

            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, encode_command(cmd)),

            RtmpMessage::Data(data) => (MSG_DATA_AMF0, encode_data(data)),

            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        }
    }

    /// Wrap this message in a chunk for the given chunk stream
    pub fn into_chunk(self, csid: u32, stream_id: u32, timestamp: u32) -> RtmpChunk {
        let (message_type, payload) = self.encode();
        RtmpChunk {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }
    }
}

/// Encode a command to AMF0 bytes
fn encode_command(cmd: &Command) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(&AmfValue::String(cmd.name.clone()));
    encoder.encode(&AmfValue::Number(cmd.transaction_id));
    encoder.encode(&cmd.command_object);
    for arg in &cmd.arguments {
        encoder.encode(arg);
    }
    encoder.finish()
}

/// Encode a data message to AMF0 bytes
fn encode_data(data: &DataMessage) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(&AmfValue::String(data.name.clone()));
    for value in &data.values {
        encoder.encode(value);
    }
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: RtmpMessage) -> RtmpMessage {
        let chunk = msg.into_chunk(CSID_COMMAND, 0, 0);
        RtmpMessage::from_chunk(&chunk).unwrap()
    }

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command::new("createStream", 2.0, vec![]);
        let parsed = roundtrip(RtmpMessage::Command(cmd));
        if let RtmpMessage::Command(parsed) = parsed {
            assert_eq!(parsed.name, "createStream");
            assert_eq!(parsed.transaction_id, 2.0);
            assert!(matches!(parsed.command_object, AmfValue::Null));
        } else {
            panic!("Expected Command message");
        }
    }

    #[test]
    fn test_publish_command_arguments() {
        let cmd = Command::new(
            CMD_PUBLISH,
            0.0,
            vec!["streamkey".into(), "live".into()],
        );
        let parsed = roundtrip(RtmpMessage::Command(cmd));
        if let RtmpMessage::Command(parsed) = parsed {
            assert_eq!(parsed.arguments[0].as_str().unwrap(), "streamkey");
            assert_eq!(parsed.arguments[1].as_str().unwrap(), "live");
        } else {
            panic!("Expected Command message");
        }
    }

    #[test]
    fn test_on_status_info() {
        let cmd = Command::on_status(1, "status", NS_PUBLISH_START, "Publishing started");
        let parsed = roundtrip(RtmpMessage::Command(cmd));
        if let RtmpMessage::Command(parsed) = parsed {
            let info = parsed.info().unwrap();
            assert_eq!(info.get_str("code").unwrap(), NS_PUBLISH_START);
            assert_eq!(info.get_str("level").unwrap(), "status");
        } else {
            panic!("Expected Command message");
        }
    }

    #[test]
    fn test_control_message_roundtrips() {
        match roundtrip(RtmpMessage::SetChunkSize(4096)) {
            RtmpMessage::SetChunkSize(4096) => {}
            other => panic!("unexpected {:?}", other),
        }
        match roundtrip(RtmpMessage::WindowAckSize(250_000)) {
            RtmpMessage::WindowAckSize(250_000) => {}
            other => panic!("unexpected {:?}", other),
        }
        match roundtrip(RtmpMessage::Acknowledgement { sequence: 77 }) {
            RtmpMessage::Acknowledgement { sequence: 77 } => {}
            other => panic!("unexpected {:?}", other),
        }
        match roundtrip(RtmpMessage::Abort { csid: 6 }) {
            RtmpMessage::Abort { csid: 6 } => {}
            other => panic!("unexpected {:?}", other),
        }
        match roundtrip(RtmpMessage::SetPeerBandwidth {
            size: 2_500_000,
            limit_type: 2,
        }) {
            RtmpMessage::SetPeerBandwidth {
                size: 2_500_000,
                limit_type: 2,
            } => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_set_chunk_size_reserved_bit_masked() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_SET_CHUNK_SIZE,
            stream_id: 0,
            payload: Bytes::from_static(&[0x80, 0x00, 0x10, 0x00]),
        };
        match RtmpMessage::from_chunk(&chunk).unwrap() {
            RtmpMessage::SetChunkSize(size) => assert_eq!(size, 0x1000),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_control_message_is_error() {
        let chunk = RtmpChunk {
            csid: CSID_PROTOCOL_CONTROL,
            timestamp: 0,
            message_type: MSG_WINDOW_ACK_SIZE,
            stream_id: 0,
            payload: Bytes::from_static(&[0x00, 0x01]),
        };
        assert!(RtmpMessage::from_chunk(&chunk).is_err());
    }

    #[test]
    fn test_user_control_roundtrip() {
        match roundtrip(RtmpMessage::UserControl(UserControlEvent::StreamBegin(1))) {
            RtmpMessage::UserControl(UserControlEvent::StreamBegin(1)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match roundtrip(RtmpMessage::UserControl(UserControlEvent::PingRequest(99))) {
            RtmpMessage::UserControl(UserControlEvent::PingRequest(99)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_data_message_roundtrip() {
        let mut meta = HashMap::new();
        meta.insert("width".to_string(), AmfValue::Number(1280.0));
        let data = DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![
                AmfValue::String(CMD_ON_METADATA.to_string()),
                AmfValue::EcmaArray(meta),
            ],
            stream_id: 1,
        };
        let chunk = RtmpMessage::Data(data).into_chunk(CSID_COMMAND, 1, 0);
        match RtmpMessage::from_chunk(&chunk).unwrap() {
            RtmpMessage::Data(parsed) => {
                assert_eq!(parsed.name, CMD_SET_DATA_FRAME);
                assert_eq!(parsed.values[0].as_str().unwrap(), CMD_ON_METADATA);
                assert_eq!(parsed.values[1].get_number("width").unwrap(), 1280.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_passthrough() {
        let chunk = RtmpChunk {
            csid: CSID_COMMAND,
            timestamp: 0,
            message_type: 99,
            stream_id: 0,
            payload: Bytes::from_static(b"opaque"),
        };
        match RtmpMessage::from_chunk(&chunk).unwrap() {
            RtmpMessage::Unknown { type_id: 99, data } => {
                assert_eq!(&data[..], b"opaque")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
