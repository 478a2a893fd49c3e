//! Container, object and transaction identifiers (spec §3).

use std::fmt;

/// A container id: a tree root, or a "data container" sibling that holds
/// per-row payloads for an intkey tree. `DATA_CID` is a deterministic
/// remapping of a `Cid`, not a separately-allocated id.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Cid(pub u64);

impl Cid {
    /// High bit reserved to mark an ephemeral (in-process-only) container,
    /// per §4.7: "Ephemerality is encoded in the high bits of cid."
    pub const EPHEMERAL_BIT: u64 = 1 << 63;

    /// Bit flipped by `DATA_CID` to derive a row-payload container from a
    /// tree-root container, or vice versa. Any fixed, involutive,
    /// identity-free bit is sufficient; the original reserves a high bit
    /// below the ephemeral marker for this purpose (`gaiarpcaux.h`).
    const DATA_BIT: u64 = 1 << 62;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// `DATA_CID(cid)`: the row-payload container associated with a tree
    /// root. Applying it twice returns the original cid (it is its own
    /// inverse), and it never maps a cid to itself.
    pub fn data_cid(&self) -> Self {
        Self(self.0 ^ Self::DATA_BIT)
    }

    pub fn is_ephemeral(&self) -> bool {
        self.0 & Self::EPHEMERAL_BIT != 0
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cid:{:#x}", self.0)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An object id: node identity within a container. The tree root is always
/// `oid = 0`. Non-root oids are minted with (issuer, counter, server-bias)
/// bits packed so that a node's owning server is locally computable
/// without a round trip.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Oid(pub u64);

impl Oid {
    pub const ROOT: Oid = Oid(0);

    const COUNTER_BITS: u32 = 40;
    const ISSUER_BITS: u32 = 16;
    const SERVER_BIAS_BITS: u32 = 8;
    const COUNTER_MASK: u64 = (1 << Self::COUNTER_BITS) - 1;
    const ISSUER_MASK: u64 = (1 << Self::ISSUER_BITS) - 1;

    /// Mint a non-root oid from an issuer id, a monotonic per-issuer
    /// counter, and the bias of the server that should own the node.
    pub fn mint(issuer: u16, counter: u64, server_bias: u8) -> Self {
        debug_assert!(counter <= Self::COUNTER_MASK, "oid counter overflow");
        let value = (server_bias as u64) << (Self::COUNTER_BITS + Self::ISSUER_BITS)
            | ((issuer as u64 & Self::ISSUER_MASK) << Self::COUNTER_BITS)
            | (counter & Self::COUNTER_MASK);
        Self(value)
    }

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }

    /// The server-bias bits encoded into a minted oid, used to locally
    /// compute which server owns this node without an RPC.
    pub fn owning_server_bias(&self) -> u8 {
        (self.0 >> (Self::COUNTER_BITS + Self::ISSUER_BITS)) as u8
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Oid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "oid:{:#x}", self.0)
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A (container, object) pair -- the unit of read/write against the MVKVS.
#[derive(Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Coid {
    pub cid: Cid,
    pub oid: Oid,
}

impl Coid {
    pub fn new(cid: Cid, oid: Oid) -> Self {
        Self { cid, oid }
    }

    pub fn root(cid: Cid) -> Self {
        Self::new(cid, Oid::ROOT)
    }

    /// The data-payload coid for an intkey row at this cid, for the given
    /// rowid (reused as the oid field of the data-container coid).
    pub fn data(cid: Cid, rowid: Oid) -> Self {
        Self::new(cid.data_cid(), rowid)
    }
}

impl fmt::Display for Coid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.cid, self.oid)
    }
}

impl fmt::Debug for Coid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A transaction id: `(client-ip ^ pid, counter)`. The low word selects the
/// server worker thread that handles every RPC for this transaction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Tid {
    high: u64,
    low: u64,
}

impl Tid {
    pub fn new(client_ip: u32, pid: u32, counter: u64) -> Self {
        let high = (client_ip as u64) ^ (pid as u64);
        Self { high, low: counter }
    }

    /// The bits used to pin this transaction's RPCs to one server worker
    /// (spec §5: "same Tid hash routes to the same worker").
    pub fn worker_hash(&self) -> u64 {
        self.low
    }

    pub fn as_u128(&self) -> u128 {
        ((self.high as u128) << 64) | self.low as u128
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tid:{:#x}:{:#x}", self.high, self.low)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
