use std::fmt::{Display, Formatter};

/// Identifies one payload transfer between a pair of proxies.
///
/// Ids are allocated from a per-proxy monotonic counter, so an id is unique for the lifetime
///  of the proxy that initiated the transfer and is never handed out again once the transfer
///  is retired. The receiving side additionally scopes ids by the sending peer, so ids
///  allocated independently by different senders cannot collide there either.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TransferId(u64);

impl Display for TransferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TransferId {
    pub const ZERO: TransferId = TransferId(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }
}
