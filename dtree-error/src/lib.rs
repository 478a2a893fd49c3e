//! DTree's generic error struct and the wire status-code taxonomy of §6.
//!
//! Mirrors the shape of a conventional `TCError`: a fixed status code plus
//! a human-readable message, with no attempt to preserve a backtrace or a
//! source chain across an RPC boundary.

use std::fmt;

/// The wire status-code taxonomy of spec §6. Values are fixed and must not
/// be renumbered: they are sent on the wire in the `status` field of every
/// RPC reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[repr(i8)]
pub enum StatusCode {
    Ok = 0,
    Generic = -1,
    TooOld = -2,
    PendingData = -3,
    CorruptedLog = -4,
    RpcDeferred = -5,
    InvalidTid = -6,
    ClearedTid = -7,
    TransactionEnded = -9,
    ServerTimeout = -10,
    NotImplemented = -11,
    OutOfMemory = -12,
    CellOutOfRange = -13,
    AttrOutOfRange = -14,
    WrongType = -99,
}

impl StatusCode {
    /// Decode a status code received on the wire. An unrecognized code is
    /// treated as `Generic` rather than panicking: a future server may add
    /// a status this client doesn't know about yet.
    pub fn from_i8(value: i8) -> Self {
        match value {
            0 => Self::Ok,
            -2 => Self::TooOld,
            -3 => Self::PendingData,
            -4 => Self::CorruptedLog,
            -5 => Self::RpcDeferred,
            -6 => Self::InvalidTid,
            -7 => Self::ClearedTid,
            -9 => Self::TransactionEnded,
            -10 => Self::ServerTimeout,
            -11 => Self::NotImplemented,
            -12 => Self::OutOfMemory,
            -13 => Self::CellOutOfRange,
            -14 => Self::AttrOutOfRange,
            -99 => Self::WrongType,
            _ => Self::Generic,
        }
    }

    pub fn as_i8(&self) -> i8 {
        *self as i8
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Self::Ok => "ok",
            Self::Generic => "generic error",
            Self::TooOld => "too-old version (below log horizon)",
            Self::PendingData => "pending-data (prepared, not committed)",
            Self::CorruptedLog => "corrupted log",
            Self::RpcDeferred => "rpc-deferred",
            Self::InvalidTid => "invalid transaction id",
            Self::ClearedTid => "cleared transaction id",
            Self::TransactionEnded => "transaction ended",
            Self::ServerTimeout => "server timeout",
            Self::NotImplemented => "not implemented",
            Self::OutOfMemory => "out of memory",
            Self::CellOutOfRange => "cell out of range for coid",
            Self::AttrOutOfRange => "attribute id out of range",
            Self::WrongType => "wrong type (blob vs supervalue mismatch)",
        };
        f.write_str(msg)
    }
}

/// DTree's generic error type. A status code from the fixed taxonomy above,
/// plus a message constructed at the call site -- never a formatted
/// backtrace, since this crosses an RPC boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DtError {
    code: StatusCode,
    message: String,
}

pub type DtResult<T> = Result<T, DtError>;

impl DtError {
    pub fn new<I: fmt::Display>(code: StatusCode, message: I) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn generic<I: fmt::Display>(message: I) -> Self {
        Self::new(StatusCode::Generic, message)
    }

    pub fn internal<I: fmt::Display>(message: I) -> Self {
        Self::new(StatusCode::Generic, format!("internal error: {}", message))
    }

    pub fn bad_request<M: fmt::Display, I: fmt::Display>(message: M, info: I) -> Self {
        Self::new(StatusCode::Generic, format!("{}: {}", message, info))
    }

    pub fn too_old<I: fmt::Display>(coid: I) -> Self {
        Self::new(
            StatusCode::TooOld,
            format!("version of {} is below the log horizon", coid),
        )
    }

    pub fn invalid_tid<I: fmt::Display>(tid: I) -> Self {
        Self::new(StatusCode::InvalidTid, format!("invalid transaction id {}", tid))
    }

    pub fn transaction_ended<I: fmt::Display>(tid: I) -> Self {
        Self::new(
            StatusCode::TransactionEnded,
            format!("transaction {} has already ended", tid),
        )
    }

    pub fn server_timeout<I: fmt::Display>(detail: I) -> Self {
        Self::new(StatusCode::ServerTimeout, detail)
    }

    pub fn not_implemented<I: fmt::Display>(what: I) -> Self {
        Self::new(StatusCode::NotImplemented, format!("not implemented: {}", what))
    }

    pub fn cell_out_of_range<I: fmt::Display>(coid: I) -> Self {
        Self::new(
            StatusCode::CellOutOfRange,
            format!("cell out of range for {}", coid),
        )
    }

    pub fn attr_out_of_range(attrid: usize, nattrs: usize) -> Self {
        Self::new(
            StatusCode::AttrOutOfRange,
            format!("attribute id {} is out of range (Nattrs = {})", attrid, nattrs),
        )
    }

    pub fn wrong_type<I: fmt::Display>(coid: I) -> Self {
        Self::new(
            StatusCode::WrongType,
            format!("{} holds the wrong value type for this request", coid),
        )
    }

    pub fn corrupted_log<I: fmt::Display>(detail: I) -> Self {
        Self::new(StatusCode::CorruptedLog, detail)
    }
}

impl fmt::Display for DtError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for DtError {}
