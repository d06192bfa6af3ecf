//! Scripted in-process RTMP server used by engine and publisher tests

use std::collections::HashMap;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::amf::AmfValue;
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder};
use crate::protocol::constants::*;
use crate::protocol::message::{Command, RtmpMessage};

/// Minimal server side of the protocol: handshake, then answer connect,
/// createStream and publish the way a permissive server would.
pub struct TestServer<S> {
    pub stream: S,
    read_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
}

impl TestServer<TcpStream> {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = listener.accept().await.unwrap();
        Self::new(socket)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestServer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(8192),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
        }
    }

    pub async fn handshake(&mut self) {
        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        self.stream.read_exact(&mut c0c1).await.unwrap();
        assert_eq!(c0c1[0], RTMP_VERSION);

        let mut response = vec![RTMP_VERSION];
        response.extend_from_slice(&[0u8; HANDSHAKE_SIZE]); // s1
        response.extend_from_slice(&c0c1[1..]); // s2 echoes c1
        self.stream.write_all(&response).await.unwrap();

        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        self.stream.read_exact(&mut c2).await.unwrap();
    }

    pub async fn recv_message(&mut self) -> RtmpMessage {
        loop {
            if let Some(chunk) = self.decoder.decode(&mut self.read_buf).unwrap() {
                let message = RtmpMessage::from_chunk(&chunk).unwrap();
                if let RtmpMessage::SetChunkSize(size) = message {
                    self.decoder.set_chunk_size(size).unwrap();
                    continue;
                }
                return message;
            }
            let n = self.stream.read_buf(&mut self.read_buf).await.unwrap();
            assert!(n > 0, "client closed unexpectedly");
        }
    }

    pub async fn recv_command(&mut self, name: &str) -> Command {
        loop {
            if let RtmpMessage::Command(command) = self.recv_message().await {
                if command.name == name {
                    return command;
                }
            }
        }
    }

    pub async fn send_message(&mut self, message: RtmpMessage, stream_id: u32) {
        let chunk = message.into_chunk(CSID_COMMAND, stream_id, 0);
        let mut buf = BytesMut::new();
        self.encoder.encode(&chunk, &mut buf);
        self.stream.write_all(&buf).await.unwrap();
    }

    pub async fn accept_connect(&mut self) -> Command {
        let connect = self.recv_command(CMD_CONNECT).await;
        let info = status_info("status", NC_CONNECT_SUCCESS, "Connection succeeded.");
        self.send_message(
            RtmpMessage::Command(Command::result(
                connect.transaction_id,
                AmfValue::Null,
                info,
            )),
            0,
        )
        .await;
        connect
    }

    pub async fn reject_connect(&mut self, description: &str) {
        let connect = self.recv_command(CMD_CONNECT).await;
        let info = status_info("error", NC_CONNECT_REJECTED, description);
        self.send_message(
            RtmpMessage::Command(Command::error(
                connect.transaction_id,
                AmfValue::Null,
                info,
            )),
            0,
        )
        .await;
    }

    pub async fn accept_create_stream(&mut self, stream_id: u32) {
        let create = self.recv_command(CMD_CREATE_STREAM).await;
        self.send_message(
            RtmpMessage::Command(Command::result(
                create.transaction_id,
                AmfValue::Null,
                AmfValue::Number(stream_id as f64),
            )),
            0,
        )
        .await;
    }

    pub async fn accept_publish(&mut self) -> Command {
        let publish = self.recv_command(CMD_PUBLISH).await;
        self.send_message(
            RtmpMessage::Command(Command::on_status(
                publish.stream_id,
                "status",
                NS_PUBLISH_START,
                "Publishing.",
            )),
            publish.stream_id,
        )
        .await;
        publish
    }

    /// Full happy-path session setup
    pub async fn accept_session(&mut self, stream_id: u32) {
        self.handshake().await;
        self.accept_connect().await;
        self.accept_create_stream(stream_id).await;
    }
}

pub fn status_info(level: &str, code: &str, description: &str) -> AmfValue {
    let mut info = HashMap::new();
    info.insert("level".to_string(), AmfValue::String(level.into()));
    info.insert("code".to_string(), AmfValue::String(code.into()));
    info.insert(
        "description".to_string(),
        AmfValue::String(description.into()),
    );
    AmfValue::Object(info)
}
