//! FINS header, routing overrides and transaction ID allocation.
//!
//! Every FINS frame starts with a 10-byte header:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | ICF | Information Control Field |
//! | 1 | RSV | Reserved (always 0x00) |
//! | 2 | GCT | Gateway Count |
//! | 3 | DNA | Destination Network Address |
//! | 4 | DA1 | Destination Node Address |
//! | 5 | DA2 | Destination Unit Address |
//! | 6 | SNA | Source Network Address |
//! | 7 | SA1 | Source Node Address |
//! | 8 | SA2 | Source Unit Address |
//! | 9 | SID | Service ID |
//!
//! The client keeps one template header built from its configuration. Each
//! request may override the six routing bytes through a [`Routing`], and gets
//! its SID from a [`SidAllocator`].
//!
//! # Example
//!
//! ```
//! use omron_fins_client::{FinsHeader, NodeAddress, Routing};
//!
//! let header = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::local(), 0);
//! let routed = header.with_routing(&Routing { da1: Some(20), ..Routing::default() }).with_sid(7);
//! assert_eq!(routed.to_bytes(), [0x80, 0x00, 0x02, 0x00, 20, 0x00, 0x00, 0x00, 0x00, 7]);
//! ```

use serde::Deserialize;

use crate::constants::{DEFAULT_GCT, ICF_COMMAND};
use crate::error::{FinsError, Result};

/// FINS header size in bytes.
pub const FINS_HEADER_SIZE: usize = 10;

/// Node address for FINS communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct NodeAddress {
    /// Network address (0 = local network).
    #[serde(default)]
    pub network: u8,
    /// Node address.
    #[serde(default)]
    pub node: u8,
    /// Unit address (0 = CPU unit).
    #[serde(default)]
    pub unit: u8,
}

impl NodeAddress {
    /// Creates a new node address.
    pub fn new(network: u8, node: u8, unit: u8) -> Self {
        Self {
            network,
            node,
            unit,
        }
    }

    /// Creates a local node address (network 0, node 0, unit 0).
    pub fn local() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Per-request overrides for the routing bytes of the header.
///
/// Unset fields keep the client's configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Routing {
    /// Destination network.
    pub dna: Option<u8>,
    /// Destination node.
    pub da1: Option<u8>,
    /// Destination unit.
    pub da2: Option<u8>,
    /// Source network.
    pub sna: Option<u8>,
    /// Source node.
    pub sa1: Option<u8>,
    /// Source unit.
    pub sa2: Option<u8>,
}

impl Routing {
    /// Returns true if no field is overridden.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// FINS command/response header (10 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinsHeader {
    /// Information Control Field.
    /// - Bit 7: 1 = response required
    /// - Bit 6: 0 = command, 1 = response
    pub icf: u8,
    /// Reserved byte.
    pub rsv: u8,
    /// Gateway Count.
    pub gct: u8,
    /// Destination Network Address.
    pub dna: u8,
    /// Destination Node Address.
    pub da1: u8,
    /// Destination Unit Address.
    pub da2: u8,
    /// Source Network Address.
    pub sna: u8,
    /// Source Node Address.
    pub sa1: u8,
    /// Source Unit Address.
    pub sa2: u8,
    /// Service ID, used to match responses with requests.
    pub sid: u8,
}

impl FinsHeader {
    /// Creates a command header that requests a response.
    pub fn new_command(destination: NodeAddress, source: NodeAddress, sid: u8) -> Self {
        Self {
            icf: ICF_COMMAND,
            rsv: 0x00,
            gct: DEFAULT_GCT,
            dna: destination.network,
            da1: destination.node,
            da2: destination.unit,
            sna: source.network,
            sa1: source.node,
            sa2: source.unit,
            sid,
        }
    }

    /// Applies routing overrides.
    pub fn with_routing(mut self, routing: &Routing) -> Self {
        self.dna = routing.dna.unwrap_or(self.dna);
        self.da1 = routing.da1.unwrap_or(self.da1);
        self.da2 = routing.da2.unwrap_or(self.da2);
        self.sna = routing.sna.unwrap_or(self.sna);
        self.sa1 = routing.sa1.unwrap_or(self.sa1);
        self.sa2 = routing.sa2.unwrap_or(self.sa2);
        self
    }

    /// Replaces the SID.
    pub fn with_sid(mut self, sid: u8) -> Self {
        self.sid = sid;
        self
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(self) -> [u8; FINS_HEADER_SIZE] {
        [
            self.icf, self.rsv, self.gct, self.dna, self.da1, self.da2, self.sna, self.sa1,
            self.sa2, self.sid,
        ]
    }

    /// Parses a header from the start of a frame.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidResponse` if the slice is too short.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bytes: [u8; FINS_HEADER_SIZE] = data
            .get(..FINS_HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                FinsError::invalid_response(format!(
                    "header too short: expected {FINS_HEADER_SIZE} bytes, got {}",
                    data.len()
                ))
            })?;
        let [icf, rsv, gct, dna, da1, da2, sna, sa1, sa2, sid] = bytes;
        Ok(Self {
            icf,
            rsv,
            gct,
            dna,
            da1,
            da2,
            sna,
            sa1,
            sa2,
            sid,
        })
    }

    /// Returns whether this is a response header.
    pub fn is_response(self) -> bool {
        (self.icf & 0x40) != 0
    }

    /// Returns the destination node address.
    pub fn destination(self) -> NodeAddress {
        NodeAddress::new(self.dna, self.da1, self.da2)
    }

    /// Returns the source node address.
    pub fn source(self) -> NodeAddress {
        NodeAddress::new(self.sna, self.sa1, self.sa2)
    }
}

/// Hands out SIDs in `min..=max`, wrapping back to `min` after `max`.
///
/// # Example
///
/// ```
/// use omron_fins_client::SidAllocator;
///
/// let mut sids = SidAllocator::new(1, 3).unwrap();
/// let seen: Vec<u8> = (0..4).map(|_| sids.next_sid()).collect();
/// assert_eq!(seen, vec![1, 2, 3, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct SidAllocator {
    min: u8,
    max: u8,
    last: Option<u8>,
}

impl SidAllocator {
    /// Creates an allocator for `min..=max`.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if `min` is 0 or greater than `max`.
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min == 0 || min > max {
            return Err(FinsError::invalid_parameter(
                "sid_range",
                format!("{min}..={max} is not a valid SID range"),
            ));
        }
        Ok(Self {
            min,
            max,
            last: None,
        })
    }

    /// Lowest SID handed out.
    pub fn min(&self) -> u8 {
        self.min
    }

    /// Highest SID handed out.
    pub fn max(&self) -> u8 {
        self.max
    }

    /// The SID the next call to [`next_sid`](Self::next_sid) returns.
    pub fn peek(&self) -> u8 {
        match self.last {
            Some(last) if last < self.max => last + 1,
            _ => self.min,
        }
    }

    /// Returns the next SID.
    pub fn next_sid(&mut self) -> u8 {
        let sid = self.peek();
        self.last = Some(sid);
        sid
    }
}
