//! UDP and FINS/TCP transports.
//!
//! The transport layer only moves FINS frames; it does not look inside them
//! beyond the two node bytes FINS/TCP requires it to patch.
//!
//! # UDP
//!
//! One datagram per frame. The socket is bound to an ephemeral local port
//! and connected to the PLC, so only the PLC's datagrams are received.
//!
//! # FINS/TCP
//!
//! After connecting, the client sends a 20-byte node address request and the
//! PLC answers with 24 bytes carrying the client and server node numbers.
//! Every frame after that travels in a 16-byte envelope:
//!
//! | Bytes | Field | Description |
//! |-------|-------|-------------|
//! | 0-3 | Magic | ASCII `FINS` |
//! | 4-7 | Length | Bytes following this field (8 + frame length) |
//! | 8-11 | Command | 2 = FINS frame send |
//! | 12-15 | Error | 0 = normal |
//!
//! [`FinsTcpCodec`] implements both directions for `tokio_util::codec::Framed`.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use omron_fins_client::transport::{FinsTcpCodec, StreamItem};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = FinsTcpCodec::new();
//! let mut buf = BytesMut::from(&hex::decode(
//!     "46494e530000001000000001000000000000000a0000000b",
//! ).unwrap()[..]);
//! let item = codec.decode(&mut buf).unwrap();
//! assert_eq!(item, Some(StreamItem::Handshake { client_node: 10, server_node: 11 }));
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace};

use crate::command::MAX_WORDS_PER_COMMAND;
use crate::constants::tcp_error_text;
use crate::error::{FinsError, Result};
use crate::event::RemoteInfo;
use crate::header::FINS_HEADER_SIZE;

/// Largest FINS frame a request or reply of this client can produce: a
/// 999-element write to a 4-byte area (header, command, address, count, data).
pub const MAX_PACKET_SIZE: usize = FINS_HEADER_SIZE + 8 + 4 * MAX_WORDS_PER_COMMAND as usize;

/// Magic marker opening every FINS/TCP envelope.
pub const FINS_TCP_MAGIC: [u8; 4] = *b"FINS";

/// FINS/TCP envelope size.
pub const FINS_TCP_HEADER_SIZE: usize = 16;

/// Size of the node address request.
pub const HANDSHAKE_REQUEST_SIZE: usize = 20;

/// Size of the node address reply.
pub const HANDSHAKE_REPLY_SIZE: usize = 24;

/// Envelope command of the node address request.
pub const TCP_CMD_NODE_ADDRESS_REQUEST: u32 = 0;

/// Envelope command of a FINS frame.
pub const TCP_CMD_FRAME_SEND: u32 = 2;

/// Largest envelope accepted from the stream.
const MAX_ENVELOPE_SIZE: usize = FINS_TCP_HEADER_SIZE + MAX_PACKET_SIZE;

/// Transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// FINS over UDP.
    #[default]
    Udp,
    /// FINS over TCP, with the node handshake and envelope.
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        })
    }
}

impl FromStr for Protocol {
    type Err = FinsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(FinsError::invalid_parameter(
                "protocol",
                format!("'{other}' is not udp or tcp"),
            )),
        }
    }
}

/// Builds the node address request. Node 0 asks the PLC to assign one.
pub fn handshake_request() -> [u8; HANDSHAKE_REQUEST_SIZE] {
    let mut request = [0u8; HANDSHAKE_REQUEST_SIZE];
    request[..4].copy_from_slice(&FINS_TCP_MAGIC);
    request[4..8].copy_from_slice(&12u32.to_be_bytes());
    request[8..12].copy_from_slice(&TCP_CMD_NODE_ADDRESS_REQUEST.to_be_bytes());
    request
}

/// Something decoded from a FINS/TCP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// The node address reply.
    Handshake {
        /// Node number assigned to this client.
        client_node: u8,
        /// Node number of the PLC.
        server_node: u8,
    },
    /// A FINS frame with its envelope removed.
    Frame(Bytes),
    /// An envelope carrying a non-zero error code.
    Error {
        /// The error code.
        code: u32,
        /// Its description.
        text: &'static str,
    },
}

/// Codec for the FINS/TCP envelope.
///
/// The first envelope decoded must be the node address reply; the learned
/// node numbers are written into DA1 and SA1 of every encoded frame.
#[derive(Debug, Clone, Default)]
pub struct FinsTcpCodec {
    handshake_done: bool,
    client_node: u8,
    server_node: u8,
}

impl FinsTcpCodec {
    /// Creates a codec waiting for the handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node numbers learned from the handshake, `(client, server)`.
    pub fn nodes(&self) -> Option<(u8, u8)> {
        self.handshake_done
            .then_some((self.client_node, self.server_node))
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl Decoder for FinsTcpCodec {
    type Item = StreamItem;
    type Error = FinsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamItem>> {
        if src.len() < FINS_TCP_HEADER_SIZE {
            return Ok(None);
        }
        if src[..4] != FINS_TCP_MAGIC {
            return Err(FinsError::framing("Expected FINS magic packet"));
        }
        let length = be_u32(&src[4..8]) as usize;
        if length < 8 {
            return Err(FinsError::framing(format!(
                "envelope length {length} is shorter than its header"
            )));
        }
        let total = length + 8;
        if total > MAX_ENVELOPE_SIZE {
            return Err(FinsError::framing(format!(
                "envelope of {total} bytes exceeds {MAX_ENVELOPE_SIZE}"
            )));
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let envelope = src.split_to(total);
        let command = be_u32(&envelope[8..12]);
        let code = be_u32(&envelope[12..16]);
        if code != 0 {
            return Ok(Some(StreamItem::Error {
                code,
                text: tcp_error_text(code),
            }));
        }

        if !self.handshake_done {
            if total != HANDSHAKE_REPLY_SIZE {
                return Err(FinsError::framing(format!(
                    "expected a {HANDSHAKE_REPLY_SIZE} byte node address reply, got {total} bytes"
                )));
            }
            self.client_node = envelope[19];
            self.server_node = envelope[23];
            self.handshake_done = true;
            return Ok(Some(StreamItem::Handshake {
                client_node: self.client_node,
                server_node: self.server_node,
            }));
        }

        if command != TCP_CMD_FRAME_SEND {
            trace!(command, "envelope with unexpected command");
        }
        Ok(Some(StreamItem::Frame(
            envelope.freeze().slice(FINS_TCP_HEADER_SIZE..),
        )))
    }
}

impl Encoder<Bytes> for FinsTcpCodec {
    type Error = FinsError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        let length = u32::try_from(frame.len() + 8)
            .map_err(|_| FinsError::framing("frame too long for a FINS/TCP envelope"))?;
        dst.reserve(FINS_TCP_HEADER_SIZE + frame.len());
        dst.put_slice(&FINS_TCP_MAGIC);
        dst.put_u32(length);
        dst.put_u32(TCP_CMD_FRAME_SEND);
        dst.put_u32(0);
        let start = dst.len();
        dst.put_slice(&frame);
        if self.handshake_done && frame.len() > 7 {
            dst[start + 4] = self.server_node;
            dst[start + 7] = self.client_node;
        }
        Ok(())
    }
}

type TcpFramed = Framed<TcpStream, FinsTcpCodec>;

/// Sending half of an open connection.
pub(crate) enum FrameWriter {
    Udp(Arc<UdpSocket>),
    Tcp(SplitSink<TcpFramed, Bytes>),
}

impl FrameWriter {
    pub(crate) async fn send(&mut self, frame: Bytes) -> Result<()> {
        trace!(frame = %hex::encode(&frame), "sending frame");
        match self {
            FrameWriter::Udp(socket) => {
                socket.send(&frame).await?;
                Ok(())
            }
            FrameWriter::Tcp(sink) => sink.send(frame).await,
        }
    }

    pub(crate) async fn close(&mut self) {
        if let FrameWriter::Tcp(sink) = self {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing stream");
            }
        }
    }
}

/// Receiving half of an open connection.
pub(crate) enum FrameReader {
    Udp(Arc<UdpSocket>),
    Tcp(SplitStream<TcpFramed>),
}

impl FrameReader {
    /// Next inbound frame.
    ///
    /// `Some(Err(_))` reports a problem the connection survives; `None`
    /// means the connection is gone.
    pub(crate) async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        let frame = match self {
            FrameReader::Udp(socket) => {
                let mut buf = vec![0u8; MAX_PACKET_SIZE];
                match socket.recv(&mut buf).await {
                    Ok(n) => Bytes::copy_from_slice(&buf[..n]),
                    Err(e) => return Some(Err(e.into())),
                }
            }
            FrameReader::Tcp(stream) => match stream.next().await? {
                Ok(StreamItem::Frame(frame)) => frame,
                Ok(StreamItem::Error { code, text }) => {
                    return Some(Err(FinsError::framing(format!(
                        "FINS/TCP error {code}: {text}"
                    ))))
                }
                Ok(StreamItem::Handshake { .. }) => {
                    return Some(Err(FinsError::framing("unexpected node address reply")))
                }
                Err(e) => return Some(Err(e)),
            },
        };
        trace!(frame = %hex::encode(&frame), "received frame");
        Some(Ok(frame))
    }
}

/// An open connection.
pub(crate) struct Link {
    pub(crate) writer: FrameWriter,
    pub(crate) reader: FrameReader,
    pub(crate) remote: RemoteInfo,
}

/// Resolves `host:port` to the first address found.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        FinsError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {host}:{port}"),
        ))
    })
}

/// Binds an ephemeral UDP socket connected to `addr`.
pub(crate) async fn open_udp(addr: SocketAddr) -> Result<Link> {
    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    debug!(%addr, local = ?socket.local_addr().ok(), "udp socket connected");
    let socket = Arc::new(socket);
    Ok(Link {
        writer: FrameWriter::Udp(Arc::clone(&socket)),
        reader: FrameReader::Udp(socket),
        remote: RemoteInfo::new(addr, Protocol::Udp),
    })
}

/// Opens the TCP connection, before the FINS/TCP handshake.
pub(crate) async fn connect_tcp(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(%addr, "tcp connected, sending node address request");
    Ok(stream)
}

/// Runs the node address exchange on a fresh connection.
pub(crate) async fn handshake(mut stream: TcpStream, addr: SocketAddr) -> Result<Link> {
    let request = handshake_request();
    trace!(frame = %hex::encode(request), "sending node address request");
    stream.write_all(&request).await?;

    let mut framed = Framed::new(stream, FinsTcpCodec::new());
    let (client_node, server_node) = match framed.next().await {
        Some(Ok(StreamItem::Handshake {
            client_node,
            server_node,
        })) => (client_node, server_node),
        Some(Ok(StreamItem::Error { code, text })) => {
            return Err(FinsError::framing(format!("FINS/TCP error {code}: {text}")))
        }
        Some(Ok(StreamItem::Frame(_))) => {
            return Err(FinsError::framing("Expected FINS handshake"))
        }
        Some(Err(e)) => return Err(e),
        None => {
            return Err(FinsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )))
        }
    };
    debug!(%addr, client_node, server_node, "fins/tcp handshake complete");

    let (sink, stream) = framed.split();
    Ok(Link {
        writer: FrameWriter::Tcp(sink),
        reader: FrameReader::Tcp(stream),
        remote: RemoteInfo::new(addr, Protocol::Tcp).with_nodes(client_node, server_node),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_reply(client: u8, server: u8) -> Vec<u8> {
        let mut reply = hex::decode("46494e53000000100000000100000000").unwrap();
        reply.extend_from_slice(&[0, 0, 0, client, 0, 0, 0, server]);
        reply
    }

    fn envelope(frame: &[u8], error: u32) -> Vec<u8> {
        let mut out = FINS_TCP_MAGIC.to_vec();
        out.extend_from_slice(&((frame.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(&TCP_CMD_FRAME_SEND.to_be_bytes());
        out.extend_from_slice(&error.to_be_bytes());
        out.extend_from_slice(frame);
        out
    }

    fn ready_codec() -> FinsTcpCodec {
        let mut codec = FinsTcpCodec::new();
        let mut buf = BytesMut::from(&handshake_reply(0x21, 0x01)[..]);
        codec.decode(&mut buf).unwrap();
        codec
    }

    #[test]
    fn test_handshake_request_layout() {
        assert_eq!(
            hex::encode(handshake_request()),
            "46494e530000000c000000000000000000000000"
        );
    }

    #[test]
    fn test_decode_handshake() {
        let mut codec = FinsTcpCodec::new();
        assert_eq!(codec.nodes(), None);
        let mut buf = BytesMut::from(&handshake_reply(0x21, 0x01)[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(StreamItem::Handshake {
                client_node: 0x21,
                server_node: 0x01
            })
        );
        assert_eq!(codec.nodes(), Some((0x21, 0x01)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_handshake_wrong_size() {
        let mut codec = FinsTcpCodec::new();
        let mut buf = BytesMut::from(&envelope(&[0; 10], 0)[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FinsError::ProtocolFraming { .. })
        ));
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut codec = ready_codec();
        let mut bytes = envelope(&[0xC0; 14], 0);
        bytes[0] = b'X';
        let mut buf = BytesMut::from(&bytes[..]);
        match codec.decode(&mut buf) {
            Err(FinsError::ProtocolFraming { reason }) => {
                assert_eq!(reason, "Expected FINS magic packet")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_two_frames_in_one_read() {
        let mut codec = ready_codec();
        let first: Vec<u8> = (0..14).collect();
        let second: Vec<u8> = (100..118).collect();
        let mut bytes = envelope(&first, 0);
        bytes.extend(envelope(&second, 0));
        let mut buf = BytesMut::from(&bytes[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(StreamItem::Frame(Bytes::from(first)))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(StreamItem::Frame(Bytes::from(second)))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_partial_frame_buffered() {
        let mut codec = ready_codec();
        let frame: Vec<u8> = (0..20).collect();
        let bytes = envelope(&frame, 0);
        let mut buf = BytesMut::from(&bytes[..10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&bytes[10..30]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&bytes[30..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(StreamItem::Frame(Bytes::from(frame)))
        );
    }

    #[test]
    fn test_decode_error_code() {
        let mut codec = ready_codec();
        let mut buf = BytesMut::from(&envelope(&[], 3)[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(StreamItem::Error {
                code: 3,
                text: "The command is not supported."
            })
        );
    }

    #[test]
    fn test_decode_oversized_envelope() {
        let mut codec = ready_codec();
        let mut bytes = envelope(&[], 0);
        bytes[4..8].copy_from_slice(&100_000u32.to_be_bytes());
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_largest_read_reply() {
        let mut codec = ready_codec();
        let mut frame = vec![0xC0, 0, 0x02, 0, 0x21, 0, 0, 0x01, 0, 0x05, 0x01, 0x01, 0, 0];
        frame.extend(std::iter::repeat(0xAB).take(4 * usize::from(MAX_WORDS_PER_COMMAND)));
        assert!(frame.len() <= MAX_PACKET_SIZE);
        let mut buf = BytesMut::from(&envelope(&frame, 0)[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(StreamItem::Frame(Bytes::from(frame)))
        );
    }

    #[test]
    fn test_encode_patches_nodes() {
        let mut codec = ready_codec();
        let frame = Bytes::from_static(&[0x80, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x06, 0x01]);
        let mut dst = BytesMut::new();
        codec.encode(frame, &mut dst).unwrap();
        assert_eq!(
            hex::encode(&dst),
            "46494e53000000140000000200000000800002000100002100010601"
        );
    }

    #[test]
    fn test_encode_before_handshake_leaves_frame() {
        let mut codec = FinsTcpCodec::new();
        let frame = Bytes::from_static(&[0x80, 0x00, 0x02, 0x00, 0x05, 0x00, 0x00, 0x07, 0x00, 0x01]);
        let mut dst = BytesMut::new();
        codec.encode(frame.clone(), &mut dst).unwrap();
        assert_eq!(&dst[FINS_TCP_HEADER_SIZE..], &frame[..]);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!(" udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("serial".parse::<Protocol>().is_err());
        let p: Protocol = serde_json::from_str("\"tcp\"").unwrap();
        assert_eq!(p, Protocol::Tcp);
    }
}
