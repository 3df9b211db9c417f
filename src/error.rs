use crate::transfer_id::TransferId;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Reason carried in an Abort frame so the peer can tell a deliberate cancellation from a
///  failed transfer when it releases its buffered state.
#[derive(Copy, Clone, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AbortReason {
    Cancelled = 0,
    Timeout = 1,
    ProtocolError = 2,
}

/// Everything that can go wrong with a transfer.
///
/// None of these is ever fatal to the hosting process: configuration problems surface once at
///  startup, and everything else fails at most the one transfer it belongs to.
#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A contiguous run of chunks turned out not to be reassemblable after all. The session's
    ///  gating logic should make this unreachable, so hitting it points to a sender-side bug.
    #[error("reassembly failed: {0}")]
    Reassembly(String),

    #[error("no response from peer after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("no active session for transfer {0}")]
    UnknownTransfer(TransferId),

    #[error("destination {0:?} cannot be resolved")]
    PeerUnreachable(String),

    #[error("payload is empty")]
    EmptyPayload,

    #[error("transfer was cancelled locally")]
    Cancelled,

    #[error("peer aborted the transfer: {0:?}")]
    PeerAborted(AbortReason),

    #[error("proxy is shut down")]
    ProxyClosed,
}
