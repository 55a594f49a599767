//! # Omron FINS Client
//!
//! An asynchronous client for Omron PLCs speaking FINS (Factory Interface
//! Network Service) over UDP or FINS/TCP.
//!
//! Requests are fire-and-track: every call validates its arguments, allocates
//! a transaction ID (SID), registers the transaction and returns the SID at
//! once. Replies are matched back by SID, decoded per command and delivered
//! through the request's own reply channel or the client's event stream.
//!
//! ## Features
//!
//! - **Two transports**: FINS over UDP, and FINS/TCP with the node address
//!   handshake and 16-byte envelope
//! - **Transaction tracking**: bounded in-flight queue, per-request timeouts,
//!   late replies detected and dropped
//! - **String addressing**: `D100`, `CIO20.5`, `T10.x`, `E3_100` for the
//!   CS/CJ/CP/NJ/NX and CV memory maps
//! - **Decoded replies**: memory values, CPU status, clock, CPU unit data
//! - **Statistics**: reply/error/timeout counts, reply time min/max/average,
//!   message rate
//! - **No panics**: all errors returned as `Result<T, FinsError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use omron_fins_client::{ClientConfig, ClientEvent, FinsClient, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> omron_fins_client::Result<()> {
//!     let client = FinsClient::new(ClientConfig::new("192.168.1.250"))?;
//!     let mut events = client.take_events().expect("first call");
//!     client.connect().await?;
//!
//!     // Await one reply directly
//!     let (options, reply) = RequestOptions::new().reply_channel();
//!     client.read("D100", 2, options, None)?;
//!     if let Ok(Ok(reply)) = reply.await {
//!         println!("D100-101 = {:?}", reply.values());
//!     }
//!
//!     // Or let replies flow to the event stream, tagged
//!     client.read("CIO0.05", 1, RequestOptions::new(), Some("start button".into()))?;
//!     while let Some(event) = events.recv().await {
//!         if let ClientEvent::Reply(reply) = event {
//!             println!("{:?}: {:?}", reply.tag, reply.values());
//!             break;
//!         }
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Memory Areas
//!
//! | Mnemonic | Area | Word Access | Bit Access |
//! |----------|------|:-----------:|:----------:|
//! | `CIO` | Core I/O | ✓ | ✓ |
//! | `W` | Work | ✓ | ✓ |
//! | `H` | Holding | ✓ | ✓ |
//! | `A` | Auxiliary | ✓ | ✓ |
//! | `D` | Data Memory | ✓ | ✓ |
//! | `T` / `C` | Timer / Counter PV | ✓ | completion flag (`.x`) |
//! | `IR` | Index Register | ✓ (2 words) | ✗ |
//! | `DR` | Data Register | ✓ | ✗ |
//! | `EM`, `E0_`..`E18_` | Extended Memory | ✓ | ✓ |
//!
//! Availability depends on the [`PlcFamily`]; the CV map has no W, H or
//! index registers.
//!
//! ## Commands
//!
//! | Code | Operation | Reply body |
//! |------|-----------|------------|
//! | 0101 | [`FinsClient::read`] | [`ReplyBody::Memory`] |
//! | 0102 | [`FinsClient::write`] | none |
//! | 0103 | [`FinsClient::fill`] | none |
//! | 0104 | [`FinsClient::read_multiple`] | [`ReplyBody::MultipleMemory`] |
//! | 0105 | [`FinsClient::transfer`] | none |
//! | 0401 | [`FinsClient::run`] | none |
//! | 0402 | [`FinsClient::stop`] | none |
//! | 0501 | [`FinsClient::cpu_unit_data_read`] | [`ReplyBody::CpuUnitData`] |
//! | 0601 | [`FinsClient::status`] | [`ReplyBody::Status`] |
//! | 0701 | [`FinsClient::clock_read`] | [`ReplyBody::Clock`] |
//! | 0702 | [`FinsClient::clock_write`] | none |
//!
//! [`FinsClient::command`] sends any of them by code or short name with JSON
//! parameters.
//!
//! ## Error Handling
//!
//! Rejections (`QueueFull`, `NotConnected`, `InvalidAddress`,
//! `InvalidParameter`) are returned synchronously and nothing is sent.
//! Everything that happens later arrives as a [`Failure`] carrying the SID
//! and the caller's tag.
//!
//! A reply with a non-normal end code is still a reply; use
//! [`Reply::check_end_code`] to turn it into an error.
//!
//! ```no_run
//! use omron_fins_client::{ClientConfig, FinsClient, FinsError, RequestOptions};
//!
//! # async fn run() -> omron_fins_client::Result<()> {
//! let client = FinsClient::new(ClientConfig::new("192.168.1.250"))?;
//! client.connect().await?;
//!
//! let (options, reply) = RequestOptions::new().reply_channel();
//! match client.read("D100", 10, options, None) {
//!     Ok(_) => {}
//!     Err(FinsError::QueueFull { active, max }) => println!("busy: {active}/{max}"),
//!     Err(e) => return Err(e),
//! }
//! match reply.await {
//!     Ok(Ok(reply)) => reply.check_end_code()?,
//!     Ok(Err(failure)) if matches!(failure.error, FinsError::Timeout) => println!("timeout"),
//!     Ok(Err(failure)) => println!("failed: {failure}"),
//!     Err(_) => println!("client closed"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```
//! use omron_fins_client::{ClientConfig, PlcFamily, Protocol};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("192.168.1.250")
//!     .with_protocol(Protocol::Tcp)              // default: UDP
//!     .with_plc_family(PlcFamily::CsCj)          // default: CS/CJ
//!     .with_timeout(Duration::from_millis(500))  // default: 2s
//!     .with_max_queue(10)                        // default: 50
//!     .with_dest_node(10);
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events: `debug` for
//! the connection lifecycle and transactions, `trace` with a hex dump of
//! every frame, `warn` for late replies and transport failures. Install a
//! subscriber to see them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod address;
mod client;
mod command;
pub mod constants;
mod error;
mod event;
mod header;
mod memory;
pub mod packing;
mod reply;
mod response;
mod sequence;
pub mod transport;

pub use address::{AddressCodec, MemoryAddress};
pub use client::{ClientConfig, ConnectionState, FinsClient, RequestOptions};
pub use command::{
    ClockData, ClockWriteCommand, Command, CommandCode, CommandDescriptor, FillCommand,
    MultipleReadCommand, ParamKind, ParamSpec, PlcMode, ReadCommand, RunCommand, TransferCommand,
    WriteCommand, COMMANDS, MAX_WORDS_PER_COMMAND,
};
pub use error::{Failure, FinsError, Result};
pub use event::{ClientEvent, RemoteInfo};
pub use header::{FinsHeader, NodeAddress, Routing, SidAllocator, FINS_HEADER_SIZE};
pub use memory::{ExtendedBank, MemoryArea, PlcFamily};
pub use packing::DataValue;
pub use reply::{
    decode_body, AreaData, BusUnit, CpuStatus, CpuUnitData, Outcome, Reply, ReplyBody, RunStatus,
    Tag,
};
pub use response::{EndCode, FinsResponse, MIN_RESPONSE_SIZE};
pub use sequence::{
    Completion, PendingRequest, ReplySender, SequenceInfo, SequenceManager, StatsSnapshot,
};
pub use transport::Protocol;
