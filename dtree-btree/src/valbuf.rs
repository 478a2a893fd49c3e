//! Reference-counted, copy-on-write value buffers (spec §3, §9).
//!
//! Mirrors the teacher's shared-handle-plus-`make_mut` idiom rather than
//! exposing a raw pointer: `Valbuf::to_mut` deep-copies the inner payload
//! only when it is actually shared, and there is no way to alias a
//! mutable reference to it.

use std::sync::Arc;

use bytes::Bytes;
use dtree_error::{DtError, DtResult};
use dtree_generic::{Coid, Timestamp};

use crate::supervalue::SuperValue;

#[derive(Clone)]
enum Payload {
    Blob(Bytes),
    Super(SuperValue),
}

/// A value as stored and transmitted by the MVKVS: either an opaque blob
/// (type 0) or a supervalue (type 1), tagged with the snapshot metadata a
/// transaction needs to decide whether it can serve a read from cache.
#[derive(Clone)]
pub struct Valbuf {
    coid: Coid,
    commit_ts: Timestamp,
    read_ts: Timestamp,
    immutable: bool,
    payload: Arc<Payload>,
}

impl Valbuf {
    pub fn blob(coid: Coid, commit_ts: Timestamp, read_ts: Timestamp, bytes: Bytes) -> Self {
        Self {
            coid,
            commit_ts,
            read_ts,
            immutable: false,
            payload: Arc::new(Payload::Blob(bytes)),
        }
    }

    pub fn supervalue(coid: Coid, commit_ts: Timestamp, read_ts: Timestamp, sv: SuperValue) -> Self {
        Self {
            coid,
            commit_ts,
            read_ts,
            immutable: false,
            payload: Arc::new(Payload::Super(sv)),
        }
    }

    pub fn coid(&self) -> Coid {
        self.coid
    }

    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn set_read_ts(&mut self, ts: Timestamp) {
        self.read_ts = ts;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn mark_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn is_blob(&self) -> bool {
        matches!(&*self.payload, Payload::Blob(_))
    }

    pub fn is_supervalue(&self) -> bool {
        matches!(&*self.payload, Payload::Super(_))
    }

    pub fn as_blob(&self) -> DtResult<&Bytes> {
        match &*self.payload {
            Payload::Blob(b) => Ok(b),
            Payload::Super(_) => Err(DtError::wrong_type(self.coid)),
        }
    }

    pub fn as_supervalue(&self) -> DtResult<&SuperValue> {
        match &*self.payload {
            Payload::Super(sv) => Ok(sv),
            Payload::Blob(_) => Err(DtError::wrong_type(self.coid)),
        }
    }

    /// A deep copy of this buffer, independent of whatever else may hold
    /// a reference to the original payload. Used before installing a
    /// freshly-read value into a mutable transaction cache.
    pub fn deep_copy(&self) -> Self {
        Self {
            coid: self.coid,
            commit_ts: self.commit_ts,
            read_ts: self.read_ts,
            immutable: false,
            payload: Arc::new((*self.payload).clone()),
        }
    }

    /// Get a mutable supervalue, deep-copying first if this buffer is
    /// shared (copy-on-write discipline, spec §3: "Mutating a shared
    /// `Valbuf` requires deep-copy first").
    pub fn supervalue_mut(&mut self) -> DtResult<&mut SuperValue> {
        if self.immutable {
            return Err(DtError::internal("attempted to mutate an immutable Valbuf"));
        }

        match Arc::get_mut(&mut self.payload) {
            Some(Payload::Super(_)) => {}
            Some(Payload::Blob(_)) => return Err(DtError::wrong_type(self.coid)),
            None => {
                if !matches!(&*self.payload, Payload::Super(_)) {
                    return Err(DtError::wrong_type(self.coid));
                }
                self.payload = Arc::new((*self.payload).clone());
            }
        }

        match Arc::get_mut(&mut self.payload) {
            Some(Payload::Super(sv)) => Ok(sv),
            _ => unreachable!("just ensured unique ownership of a Super payload"),
        }
    }

    /// Replace this buffer's blob contents, deep-copying the container
    /// first if it is shared. Used by `Transaction::write`.
    pub fn set_blob(&mut self, coid: Coid, commit_ts: Timestamp, read_ts: Timestamp, bytes: Bytes) {
        self.coid = coid;
        self.commit_ts = commit_ts;
        self.read_ts = read_ts;
        self.immutable = false;
        self.payload = Arc::new(Payload::Blob(bytes));
    }
}
