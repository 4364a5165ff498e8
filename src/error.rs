//! Wire-level status codes.
//!
//! Every status cell carries one of these as a trailing `i8`; the protocol
//! itself never fails a call. The same taxonomy is shared by the server
//! (which puts the codes on the wire) and the client (which surfaces them
//! to callers, plus the local-only codes `Timeout`, `Send` and `Recv`).

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Status byte of a reply cell.
#[derive(Error, IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i8)]
pub enum ErrCode {
    /// Success.
    #[error("no error")]
    Ok = 0,
    /// Generic failure: duplicate list add, full list, mismatched reply.
    #[error("unspecified error")]
    Unspec = -1,
    /// Verb not permitted by the parameter's access mask.
    #[error("access denied")]
    Access = -2,
    /// Value type does not match the parameter's native type.
    #[error("type mismatch")]
    Type = -3,
    /// No parameter registered under the requested PID.
    #[error("unknown parameter")]
    Pid = -4,
    /// Element index out of range.
    #[error("element index out of range")]
    Eid = -5,
    /// Seek past end, or value outside its enumeration.
    #[error("out of range")]
    Range = -6,
    /// List subtraction of an absent element.
    #[error("not found")]
    NotFound = -7,
    /// Array or write run too long.
    #[error("overflow")]
    Overflow = -8,
    /// No reply within the configured window (client only).
    #[error("timed out")]
    Timeout = -9,
    /// The device rejected an outbound message (client only).
    #[error("send failed")]
    Send = -10,
    /// The device failed while receiving (client only).
    #[error("receive failed")]
    Recv = -11,
}

impl ErrCode {
    /// Decode a status byte, folding unknown codes into `Unspec`.
    pub fn from_wire(raw: i8) -> ErrCode {
        ErrCode::try_from(raw).unwrap_or(ErrCode::Unspec)
    }

    /// Compact token used by the text query protocol.
    pub fn label(&self) -> &'static str {
        match self {
            ErrCode::Ok => "ok",
            ErrCode::Unspec => "unspec",
            ErrCode::Access => "access",
            ErrCode::Type => "type",
            ErrCode::Pid => "pid",
            ErrCode::Eid => "eid",
            ErrCode::Range => "range",
            ErrCode::NotFound => "notfound",
            ErrCode::Overflow => "overflow",
            ErrCode::Timeout => "timeout",
            ErrCode::Send => "send",
            ErrCode::Recv => "recv",
        }
    }

    /// Collapse a binding result into the status byte it puts on the wire.
    pub fn of(res: Result<(), ErrCode>) -> ErrCode {
        match res {
            Ok(()) => ErrCode::Ok,
            Err(e) => e,
        }
    }
}
