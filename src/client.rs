//! Asynchronous FINS client.
//!
//! This module provides the main [`FinsClient`] for talking to Omron PLCs.
//!
//! # Overview
//!
//! Every request operation validates its arguments, allocates a transaction
//! ID (SID), registers the transaction and queues the frame, then returns the
//! SID synchronously. The reply arrives later, either on the reply channel of
//! the request's [`RequestOptions`] or, when none was given, as a
//! [`ClientEvent::Reply`] / [`ClientEvent::Error`] on the event stream.
//!
//! Requests are rejected synchronously, before any SID is allocated, when:
//!
//! 1. the number of in-flight transactions has reached `max_queue`
//!    (`QueueFull`, and a [`ClientEvent::Full`] is emitted)
//! 2. the client is not connected (`NotConnected`)
//! 3. an argument is invalid (`InvalidAddress`, `InvalidParameter`, ...)
//!
//! # Example
//!
//! ```no_run
//! use omron_fins_client::{ClientConfig, FinsClient, Protocol, RequestOptions};
//!
//! # async fn run() -> omron_fins_client::Result<()> {
//! let config = ClientConfig::new("192.168.1.250").with_protocol(Protocol::Tcp);
//! let client = FinsClient::new(config)?;
//! client.connect().await?;
//!
//! let (options, reply) = RequestOptions::new().reply_channel();
//! let sid = client.read("D100", 10, options, None)?;
//! match reply.await {
//!     Ok(Ok(reply)) => println!("SID {sid}: {:?}", reply.values()),
//!     Ok(Err(failure)) => println!("SID {sid} failed: {failure}"),
//!     Err(_) => println!("client closed"),
//! }
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Setting | Default |
//! |---------|---------|
//! | Host | `127.0.0.1` |
//! | Port | 9600 |
//! | Protocol | UDP |
//! | PLC family | CS/CJ |
//! | Timeout | 2 s |
//! | Max queue | 50 |
//! | SID range | 1..=254 |
//! | Source / destination | network 0, node 0, unit 0 |

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::address::{AddressCodec, MemoryAddress};
use crate::command::{
    ClockData, ClockWriteCommand, Command, CommandCode, FillCommand, MultipleReadCommand, PlcMode,
    ReadCommand, RunCommand, TransferCommand, WriteCommand,
};
use crate::constants::{
    DEFAULT_HOST, DEFAULT_MAX_QUEUE, DEFAULT_MAX_SID, DEFAULT_MIN_SID, DEFAULT_PORT, DEFAULT_TIMEOUT,
};
use crate::error::{Failure, FinsError, Result};
use crate::event::{ClientEvent, RemoteInfo};
use crate::header::{FinsHeader, NodeAddress, Routing, SidAllocator};
use crate::memory::PlcFamily;
use crate::packing::DataValue;
use crate::reply::{decode_body, Outcome, Reply, Tag};
use crate::response::FinsResponse;
use crate::sequence::{PendingRequest, ReplySender, SequenceManager, StatsSnapshot};
use crate::transport::{self, FrameReader, FrameWriter, Link, Protocol};

/// How long a disconnect waits for queued frames to be flushed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

fn duration_from_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Configuration for a FINS client.
///
/// Deserializable with every field optional, e.g. from
/// `{"host": "10.0.0.5", "protocol": "tcp", "timeout_ms": 500}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// PLC host name or IP address.
    pub host: String,
    /// PLC port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// PLC family, selecting the memory area map.
    #[serde(alias = "plc_type")]
    pub plc_family: PlcFamily,
    /// Default request timeout.
    #[serde(rename = "timeout_ms", deserialize_with = "duration_from_millis")]
    pub timeout: Duration,
    /// Maximum number of in-flight transactions.
    pub max_queue: usize,
    /// Lowest transaction ID.
    pub min_sid: u8,
    /// Highest transaction ID.
    pub max_sid: u8,
    /// Source address written into every header.
    pub source: NodeAddress,
    /// Destination address written into every header.
    pub destination: NodeAddress,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::default(),
            plc_family: PlcFamily::default(),
            timeout: DEFAULT_TIMEOUT,
            max_queue: DEFAULT_MAX_QUEUE,
            min_sid: DEFAULT_MIN_SID,
            max_sid: DEFAULT_MAX_SID,
            source: NodeAddress::default(),
            destination: NodeAddress::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for `host` with default settings.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.250");
    /// assert_eq!(config.port, 9600);
    /// ```
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Sets the PLC port.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.250").with_port(9601);
    /// assert_eq!(config.port, 9601);
    /// ```
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the transport protocol.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the PLC family.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::{ClientConfig, PlcFamily};
    ///
    /// let config = ClientConfig::new("192.168.1.250").with_plc_family(PlcFamily::Cv);
    /// assert_eq!(config.plc_family, PlcFamily::Cv);
    /// ```
    pub fn with_plc_family(mut self, family: PlcFamily) -> Self {
        self.plc_family = family;
        self
    }

    /// Sets the default request timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::new("192.168.1.250")
    ///     .with_timeout(Duration::from_millis(500));
    /// assert_eq!(config.timeout, Duration::from_millis(500));
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of in-flight transactions.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    /// Sets the transaction ID range.
    pub fn with_sid_range(mut self, min: u8, max: u8) -> Self {
        self.min_sid = min;
        self.max_sid = max;
        self
    }

    /// Sets the source network address (SNA).
    pub fn with_source_network(mut self, network: u8) -> Self {
        self.source.network = network;
        self
    }

    /// Sets the source node address (SA1).
    pub fn with_source_node(mut self, node: u8) -> Self {
        self.source.node = node;
        self
    }

    /// Sets the source unit address (SA2).
    pub fn with_source_unit(mut self, unit: u8) -> Self {
        self.source.unit = unit;
        self
    }

    /// Sets the destination network address (DNA).
    pub fn with_dest_network(mut self, network: u8) -> Self {
        self.destination.network = network;
        self
    }

    /// Sets the destination node address (DA1).
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.250").with_dest_node(10);
    /// assert_eq!(config.destination.node, 10);
    /// ```
    pub fn with_dest_node(mut self, node: u8) -> Self {
        self.destination.node = node;
        self
    }

    /// Sets the destination unit address (DA2).
    pub fn with_dest_unit(mut self, unit: u8) -> Self {
        self.destination.unit = unit;
        self
    }
}

/// Per-request options.
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// Timeout for this request, overriding the configured default.
    pub timeout: Option<Duration>,
    /// Header routing overrides.
    pub routing: Routing,
    /// Channel the outcome is delivered to instead of the event stream.
    pub reply: Option<ReplySender>,
}

impl RequestOptions {
    /// Options with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout of this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the header routing overrides.
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Attaches a reply channel and returns its receiving end.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::RequestOptions;
    ///
    /// let (options, _reply) = RequestOptions::new().reply_channel();
    /// assert!(options.reply.is_some());
    /// ```
    pub fn reply_channel(mut self) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        (self, rx)
    }
}

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The client is being (re)configured.
    Uninitialized,
    /// Configured, never connected.
    Initialized,
    /// Opening the socket.
    Connecting,
    /// TCP connected, waiting for the node address reply.
    AwaitingHandshake,
    /// Ready for requests.
    Connected,
    /// The connection was closed.
    Disconnected,
}

impl ConnectionState {
    fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingHandshake)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::AwaitingHandshake => "awaiting handshake",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

struct Outbound {
    sid: u8,
    frame: Bytes,
}

struct LinkHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    remote: RemoteInfo,
}

impl LinkHandle {
    async fn shutdown(self) {
        self.reader.abort();
        drop(self.outbound);
        let abort = self.writer.abort_handle();
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, self.writer).await.is_err() {
            warn!("writer did not drain in time, aborting");
            abort.abort();
        }
    }

    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct State {
    config: ClientConfig,
    codec: AddressCodec,
    header: FinsHeader,
    sids: SidAllocator,
    sequences: SequenceManager,
    connection: ConnectionState,
    link: Option<LinkHandle>,
    link_seq: u64,
}

impl State {
    fn new(config: ClientConfig, events: &mpsc::UnboundedSender<ClientEvent>) -> Result<Self> {
        let sids = SidAllocator::new(config.min_sid, config.max_sid)?;
        let sequences = SequenceManager::new(config.min_sid, config.max_sid, config.timeout)?;
        sequences.set_fallback(events.clone());
        Ok(Self {
            codec: AddressCodec::new(config.plc_family),
            header: FinsHeader::new_command(config.destination, config.source, 0),
            sids,
            sequences,
            connection: ConnectionState::Initialized,
            link: None,
            link_seq: 0,
            config,
        })
    }
}

struct Shared {
    state: Mutex<State>,
    events: mpsc::UnboundedSender<ClientEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.events.send(event) {
            debug!(event = ?e.0, "event stream closed, event dropped");
        }
    }

    fn connection_lost(&self, id: u64) {
        let link = {
            let mut state = self.state.lock();
            if state.link.as_ref().map(|l| l.id) != Some(id) {
                return;
            }
            state.connection = ConnectionState::Disconnected;
            state.link.take()
        };
        if let Some(link) = link {
            link.writer.abort();
            warn!(remote = %link.remote.address, "connection closed by peer");
            self.emit(ClientEvent::Close);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(link) = state.link.take() {
            link.abort();
        }
        state.sequences.close();
    }
}

/// FINS client.
///
/// Cheap to clone; clones share the connection and the transaction table,
/// so requests can be issued from any number of tasks.
#[derive(Clone)]
pub struct FinsClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for FinsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FinsClient")
            .field("host", &state.config.host)
            .field("port", &state.config.port)
            .field("protocol", &state.config.protocol)
            .field("state", &state.connection)
            .finish()
    }
}

impl FinsClient {
    /// Creates a client. No socket is opened until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` for an invalid SID range.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::{ClientConfig, ConnectionState, FinsClient};
    ///
    /// let client = FinsClient::new(ClientConfig::new("192.168.1.250")).unwrap();
    /// assert_eq!(client.state(), ConnectionState::Initialized);
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        let (events, receiver) = mpsc::unbounded_channel();
        let state = State::new(config, &events)?;
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            events,
            receiver: Mutex::new(Some(receiver)),
        });
        shared.emit(ClientEvent::Initialised);
        Ok(Self { shared })
    }

    /// Takes the event stream. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.shared.receiver.lock().take()
    }

    /// Opens the connection using the current configuration.
    ///
    /// Does nothing while connected or connecting. For FINS/TCP the call
    /// returns once the node address handshake has completed. Both the
    /// connect and the handshake are bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::Io` if the socket cannot be opened,
    /// `FinsError::Timeout` if the PLC does not answer in time and
    /// `FinsError::ProtocolFraming` for a bad handshake reply.
    pub async fn connect(&self) -> Result<()> {
        let (config, id) = {
            let mut state = self.shared.state.lock();
            if state.connection == ConnectionState::Connected || state.connection.is_connecting() {
                return Ok(());
            }
            state.connection = ConnectionState::Connecting;
            state.link_seq += 1;
            (state.config.clone(), state.link_seq)
        };

        debug!(host = %config.host, port = config.port, protocol = %config.protocol, "connecting");
        match self.open_link(&config, id).await {
            Ok(link) => self.install(link, id),
            Err(e) => {
                let mut state = self.shared.state.lock();
                if state.link_seq == id {
                    state.connection = ConnectionState::Disconnected;
                }
                drop(state);
                warn!(host = %config.host, port = config.port, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Closes the current connection, applies `config` and connects again.
    ///
    /// Statistics and pending transactions of the previous configuration
    /// are discarded.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), plus `FinsError::InvalidParameter`
    /// for an invalid SID range, in which case the previous configuration
    /// is kept.
    pub async fn connect_with(&self, config: ClientConfig) -> Result<()> {
        self.disconnect().await;
        {
            let mut state = self.shared.state.lock();
            state.connection = ConnectionState::Uninitialized;
            match State::new(config, &self.shared.events) {
                Ok(mut fresh) => {
                    fresh.link_seq = state.link_seq;
                    state.sequences.close();
                    *state = fresh;
                }
                Err(e) => {
                    state.connection = ConnectionState::Initialized;
                    return Err(e);
                }
            }
        }
        self.shared.emit(ClientEvent::Initialised);
        self.connect().await
    }

    async fn open_link(&self, config: &ClientConfig, id: u64) -> Result<Link> {
        let addr = transport::resolve(&config.host, config.port).await?;
        match config.protocol {
            Protocol::Udp => transport::open_udp(addr).await,
            Protocol::Tcp => {
                let stream = tokio::time::timeout(config.timeout, transport::connect_tcp(addr))
                    .await
                    .map_err(|_| FinsError::Timeout)??;
                {
                    let mut state = self.shared.state.lock();
                    if state.link_seq == id {
                        state.connection = ConnectionState::AwaitingHandshake;
                    }
                }
                tokio::time::timeout(config.timeout, transport::handshake(stream, addr))
                    .await
                    .map_err(|_| FinsError::Timeout)?
            }
        }
    }

    fn install(&self, link: Link, id: u64) -> Result<()> {
        let Link {
            writer,
            reader,
            remote,
        } = link;

        let mut state = self.shared.state.lock();
        if state.link_seq != id {
            // a disconnect overtook this connect
            return Err(FinsError::NotConnected);
        }
        let sequences = state.sequences.clone();
        let (outbound, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(writer, queue, sequences.clone()));
        let reader = tokio::spawn(read_loop(
            reader,
            sequences,
            Arc::downgrade(&self.shared),
            id,
            remote.address.clone(),
        ));
        state.link = Some(LinkHandle {
            id,
            outbound,
            writer,
            reader,
            remote: remote.clone(),
        });
        state.connection = ConnectionState::Connected;
        debug!(remote = %remote.address, port = remote.port, protocol = %remote.protocol, "connected");
        // under the lock, so a Close from the reader always follows it
        self.shared.emit(ClientEvent::Open(remote));
        Ok(())
    }

    /// Closes the connection. Safe to call repeatedly.
    ///
    /// Frames already queued are flushed first. Pending transactions stay in
    /// the table and time out normally; [`close`](Self::close) drops them.
    /// A [`ClientEvent::Close`] is emitted only if the client was connected.
    pub async fn disconnect(&self) {
        let (link, was_connected) = {
            let mut state = self.shared.state.lock();
            state.link_seq += 1;
            let was_connected = state.connection == ConnectionState::Connected;
            if was_connected || state.connection.is_connecting() {
                // requests are refused from here on; the flag flips below
                (state.link.take(), was_connected)
            } else {
                (None, false)
            }
        };

        if let Some(link) = link {
            link.shutdown().await;
        }
        {
            let mut state = self.shared.state.lock();
            if state.connection == ConnectionState::Connected || state.connection.is_connecting() {
                state.connection = ConnectionState::Disconnected;
            }
        }
        if was_connected {
            debug!("disconnected");
            self.shared.emit(ClientEvent::Close);
        }
    }

    /// Disconnects and drops every pending transaction.
    pub async fn close(&self) {
        self.disconnect().await;
        let sequences = self.shared.state.lock().sequences.clone();
        sequences.close();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    /// Returns whether requests can be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The peer of the open connection.
    pub fn remote(&self) -> Option<RemoteInfo> {
        self.shared
            .state
            .lock()
            .link
            .as_ref()
            .map(|l| l.remote.clone())
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> ClientConfig {
        self.shared.state.lock().config.clone()
    }

    /// Number of transactions waiting for a reply.
    pub fn queue_count(&self) -> usize {
        self.sequences().active_count()
    }

    /// Current transaction statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.sequences().stats()
    }

    /// The transaction table.
    pub fn sequences(&self) -> SequenceManager {
        self.shared.state.lock().sequences.clone()
    }

    /// Parses an address with the configured PLC family.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::{ClientConfig, FinsClient};
    ///
    /// let client = FinsClient::new(ClientConfig::new("192.168.1.250")).unwrap();
    /// let addr = client.parse_address("D100").unwrap();
    /// assert_eq!(client.format_address(&addr, 5, 0), "D105");
    /// ```
    pub fn parse_address(&self, address: &str) -> Result<MemoryAddress> {
        self.shared.state.lock().codec.parse(address)
    }

    /// Formats an address, offset by `word_offset` words and `bit_offset` bits.
    pub fn format_address(&self, address: &MemoryAddress, word_offset: u32, bit_offset: u32) -> String {
        self.shared
            .state
            .lock()
            .codec
            .format(address, word_offset, bit_offset)
    }

    /// MEMORY AREA READ (0101) of `count` elements from `address`.
    ///
    /// The reply body is [`ReplyBody::Memory`](crate::ReplyBody::Memory).
    ///
    /// # Errors
    ///
    /// `QueueFull`, `NotConnected`, `InvalidAddress` or `InvalidParameter`
    /// when the request is rejected; nothing is sent in that case.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use omron_fins_client::{ClientConfig, FinsClient, RequestOptions};
    ///
    /// # async fn run() -> omron_fins_client::Result<()> {
    /// let client = FinsClient::new(ClientConfig::new("192.168.1.250"))?;
    /// client.connect().await?;
    /// let sid = client.read("D100", 10, RequestOptions::new(), None)?;
    /// println!("queued as SID {sid}");
    /// # Ok(())
    /// # }
    /// ```
    pub fn read(&self, address: &str, count: u16, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(
            |codec| Ok(Command::Read(ReadCommand::new(codec.parse(address)?, count)?)),
            options,
            tag,
        )
    }

    /// MEMORY AREA WRITE (0102) of `values` starting at `address`.
    ///
    /// Word addresses take integers, bit addresses take booleans or
    /// `1`/`0`/`"on"`/`"off"`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use omron_fins_client::{ClientConfig, FinsClient, RequestOptions};
    ///
    /// # async fn run() -> omron_fins_client::Result<()> {
    /// let client = FinsClient::new(ClientConfig::new("192.168.1.250"))?;
    /// client.connect().await?;
    /// client.write("D100", &[1, 2, 3], RequestOptions::new(), None)?;
    /// client.write("CIO0.05", &[true], RequestOptions::new(), None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn write<V>(&self, address: &str, values: &[V], options: RequestOptions, tag: Option<Tag>) -> Result<u8>
    where
        V: Clone + Into<DataValue>,
    {
        let values: Vec<DataValue> = values.iter().cloned().map(Into::into).collect();
        self.submit(
            |codec| Ok(Command::Write(WriteCommand::new(codec.parse(address)?, &values)?)),
            options,
            tag,
        )
    }

    /// MEMORY AREA FILL (0103) of `count` words from `address` with `value`.
    pub fn fill(
        &self,
        address: &str,
        value: impl Into<DataValue>,
        count: u16,
        options: RequestOptions,
        tag: Option<Tag>,
    ) -> Result<u8> {
        let value = value.into();
        self.submit(
            |codec| Ok(Command::Fill(FillCommand::new(codec.parse(address)?, &value, count)?)),
            options,
            tag,
        )
    }

    /// MULTIPLE MEMORY AREA READ (0104) of one element per address.
    ///
    /// The reply values come back in the order of `addresses`.
    pub fn read_multiple<S>(&self, addresses: &[S], options: RequestOptions, tag: Option<Tag>) -> Result<u8>
    where
        S: AsRef<str>,
    {
        self.submit(
            |codec| {
                Ok(Command::ReadMultiple(MultipleReadCommand::new(
                    codec.parse_all(addresses)?,
                )?))
            },
            options,
            tag,
        )
    }

    /// MEMORY AREA TRANSFER (0105) of `count` words from `source` to `destination`.
    pub fn transfer(
        &self,
        source: &str,
        destination: &str,
        count: u16,
        options: RequestOptions,
        tag: Option<Tag>,
    ) -> Result<u8> {
        self.submit(
            |codec| {
                Ok(Command::Transfer(TransferCommand::new(
                    codec.parse(source)?,
                    codec.parse(destination)?,
                    count,
                )?))
            },
            options,
            tag,
        )
    }

    /// RUN (0401), optionally switching to `mode`.
    pub fn run(&self, mode: Option<PlcMode>, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(|_| Ok(Command::Run(RunCommand::new(mode)?)), options, tag)
    }

    /// STOP (0402).
    pub fn stop(&self, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(|_| Ok(Command::Stop), options, tag)
    }

    /// CPU UNIT DATA READ (0501).
    pub fn cpu_unit_data_read(&self, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(|_| Ok(Command::CpuUnitDataRead), options, tag)
    }

    /// CPU UNIT STATUS READ (0601).
    pub fn status(&self, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(|_| Ok(Command::Status), options, tag)
    }

    /// CLOCK READ (0701).
    pub fn clock_read(&self, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(|_| Ok(Command::ClockRead), options, tag)
    }

    /// CLOCK WRITE (0702).
    pub fn clock_write(&self, clock: &ClockData, options: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(
            |_| Ok(Command::ClockWrite(ClockWriteCommand::new(clock)?)),
            options,
            tag,
        )
    }

    /// Sends a command chosen by its 4 digit code or short name.
    ///
    /// `params` are validated against the command's descriptor.
    ///
    /// # Errors
    ///
    /// `UnrecognisedCommand` for an unknown code, otherwise the same as the
    /// dedicated operation.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use omron_fins_client::{ClientConfig, FinsClient, RequestOptions};
    /// use serde_json::json;
    ///
    /// # async fn run() -> omron_fins_client::Result<()> {
    /// let client = FinsClient::new(ClientConfig::new("192.168.1.250"))?;
    /// client.connect().await?;
    /// client.command("0101", &[json!("D100"), json!(4)], RequestOptions::new(), None)?;
    /// client.command("read-multiple", &[json!("D10,CIO20.0")], RequestOptions::new(), None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn command(
        &self,
        code_or_name: &str,
        params: &[Value],
        options: RequestOptions,
        tag: Option<Tag>,
    ) -> Result<u8> {
        let code = CommandCode::lookup(code_or_name).ok_or_else(|| FinsError::UnrecognisedCommand {
            code: code_or_name.to_string(),
        })?;
        self.submit(|codec| Command::from_params(code, params, codec), options, tag)
    }

    /// Runs the precondition checks, registers the transaction and queues
    /// the frame.
    fn submit<F>(&self, build: F, options: RequestOptions, tag: Option<Tag>) -> Result<u8>
    where
        F: FnOnce(&AddressCodec) -> Result<Command>,
    {
        let mut state = self.shared.state.lock();

        let active = state.sequences.active_count();
        let max = state.config.max_queue;
        if active >= max {
            drop(state);
            debug!(active, max, "queue full, request rejected");
            self.shared.emit(ClientEvent::Full);
            return Err(FinsError::QueueFull { active, max });
        }

        let outbound = match &state.link {
            Some(link) if state.connection == ConnectionState::Connected => link.outbound.clone(),
            _ => return Err(FinsError::NotConnected),
        };

        let command = build(&state.codec)?;
        let sid = state.sids.next_sid();
        let header = state.header.with_routing(&options.routing).with_sid(sid);
        let frame = Bytes::from(command.encode(&header));
        let code = command.code();

        state.sequences.add(
            sid,
            PendingRequest {
                command,
                timeout: options.timeout,
                reply: options.reply,
            },
            tag,
        )?;
        let sequences = state.sequences.clone();
        drop(state);

        debug!(sid, command = %code, "request queued");
        if outbound.send(Outbound { sid, frame }).is_err() {
            sequences.set_error(sid, FinsError::NotConnected);
        }
        Ok(sid)
    }
}

async fn write_loop(
    mut writer: FrameWriter,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    sequences: SequenceManager,
) {
    while let Some(Outbound { sid, frame }) = queue.recv().await {
        match writer.send(frame).await {
            Ok(()) => sequences.confirm_sent(sid),
            Err(e) => {
                warn!(sid, error = %e, "send failed");
                sequences.fail_active(sid, e);
            }
        }
    }
    writer.close().await;
}

async fn read_loop(
    mut reader: FrameReader,
    sequences: SequenceManager,
    shared: Weak<Shared>,
    id: u64,
    remote_host: String,
) {
    while let Some(frame) = reader.next_frame().await {
        match frame {
            Ok(frame) => dispatch(&sequences, &frame, &remote_host),
            Err(e) => {
                warn!(error = %e, "receive failed");
                sequences.deliver(None, Err(Failure::detached(e)));
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.connection_lost(id);
    }
}

/// Matches one inbound frame to its transaction and delivers the outcome.
pub(crate) fn dispatch(sequences: &SequenceManager, frame: &[u8], remote_host: &str) {
    let response = match FinsResponse::from_bytes(frame) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "undecodable frame");
            sequences.deliver(None, Err(Failure::detached(e)));
            return;
        }
    };

    let sid = response.sid();
    let info = match sequences.get(sid) {
        Some(info) if sequences.in_range(sid) => info,
        _ => {
            sequences.deliver(
                None,
                Err(Failure::new(
                    FinsError::UnexpectedTransactionId { sid },
                    Some(sid),
                    None,
                )),
            );
            return;
        }
    };
    if !info.is_active() {
        warn!(sid, timeout = info.timeout, error = info.error, "late reply dropped");
        return;
    }
    if response.command().is_none() {
        sequences.fail_active(
            sid,
            FinsError::UnrecognisedCommand {
                code: response.command_code(),
            },
        );
        return;
    }

    match decode_body(&info.command, &response) {
        Ok(body) => {
            let Some(done) = sequences.done(sid) else {
                warn!(sid, "late reply dropped");
                return;
            };
            sequences.remove(sid);
            let reply = Reply {
                sid,
                command: info.command.code(),
                remote_host: remote_host.to_string(),
                end_code: response.end_code,
                body,
                tag: done.tag,
                time_taken: done.time_taken,
                stats: done.stats,
            };
            sequences.deliver(done.reply, Ok(reply));
        }
        Err(e) => {
            sequences.fail_active(sid, e);
        }
    }
}
