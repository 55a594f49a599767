//! Client events.
//!
//! Lifecycle changes, plus every reply or failure that has no per-request
//! reply channel, arrive on the stream returned by
//! [`FinsClient::take_events`](crate::FinsClient::take_events).

use std::net::SocketAddr;

use serde::Serialize;

use crate::error::Failure;
use crate::reply::Reply;
use crate::transport::Protocol;

/// The peer a connection is open to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteInfo {
    /// Peer IP address.
    pub address: String,
    /// Peer port.
    pub port: u16,
    /// Transport in use.
    pub protocol: Protocol,
    /// Node number assigned to this client by the FINS/TCP handshake.
    pub client_node: Option<u8>,
    /// Node number of the PLC from the FINS/TCP handshake.
    pub server_node: Option<u8>,
}

impl RemoteInfo {
    /// Describes a connection to `addr`.
    pub fn new(addr: SocketAddr, protocol: Protocol) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
            protocol,
            client_node: None,
            server_node: None,
        }
    }

    /// Adds the node numbers learned during the handshake.
    pub fn with_nodes(mut self, client_node: u8, server_node: u8) -> Self {
        self.client_node = Some(client_node);
        self.server_node = Some(server_node);
        self
    }
}

/// Events emitted by a [`FinsClient`](crate::FinsClient).
#[derive(Debug)]
pub enum ClientEvent {
    /// The client was configured and is about to connect.
    Initialised,
    /// The connection is ready for requests.
    Open(RemoteInfo),
    /// The connection was closed.
    Close,
    /// A reply for a request without a reply channel.
    Reply(Reply),
    /// A failure for a request without a reply channel, or one no request
    /// can be blamed for.
    Error(Failure),
    /// A request was rejected because the queue is full.
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_info() {
        let info = RemoteInfo::new("192.168.1.10:9600".parse().unwrap(), Protocol::Tcp)
            .with_nodes(0x21, 0x0A);
        assert_eq!(info.address, "192.168.1.10");
        assert_eq!(info.port, 9600);
        assert_eq!(info.client_node, Some(0x21));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["protocol"], "tcp");
    }
}
