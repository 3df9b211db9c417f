/// Sender-side credit accounting for one transfer.
///
/// The window bounds how many chunks may be in flight, i.e. sent but not yet covered by a
///  cumulative acknowledgement. Sending consumes one credit, an acknowledgement of sequence
///  `k` restores the credit of every previously unacknowledged chunk up to and including `k`.
///  When credit is exhausted the sender suspends emission until the peer catches up; a stall
///  that outlives the response deadline is handled by the same retry machinery as a lost
///  acknowledgement.
pub struct CreditWindow {
    window_size: u32,
    next_to_send: u32,
    highest_acked: Option<u32>,
}

impl CreditWindow {
    pub fn new(window_size: u32) -> CreditWindow {
        CreditWindow {
            window_size,
            next_to_send: 0,
            highest_acked: None,
        }
    }

    fn first_unacked(&self) -> u32 {
        match self.highest_acked {
            Some(sequence) => sequence + 1,
            None => 0,
        }
    }

    pub fn in_flight(&self) -> u32 {
        self.next_to_send - self.first_unacked()
    }

    pub fn has_credit(&self) -> bool {
        self.in_flight() < self.window_size
    }

    /// the sequence number the next emitted chunk will carry
    pub fn next_sequence(&self) -> u32 {
        self.next_to_send
    }

    pub fn on_chunk_sent(&mut self) {
        self.next_to_send += 1;
    }

    /// Applies a cumulative acknowledgement of everything up to and including `sequence`.
    ///  Returns whether any credit was restored; stale and duplicate acknowledgements are
    ///  no-ops, as are acknowledgements for chunks that were never sent.
    pub fn on_cumulative_ack(&mut self, sequence: u32) -> bool {
        if sequence >= self.next_to_send {
            return false;
        }
        match self.highest_acked {
            Some(previous) if sequence <= previous => false,
            _ => {
                self.highest_acked = Some(sequence);
                true
            }
        }
    }

    /// sequence numbers that are in flight, oldest first
    pub fn unacknowledged(&self) -> std::ops::Range<u32> {
        self.first_unacked()..self.next_to_send
    }

    pub fn all_acknowledged(&self) -> bool {
        self.in_flight() == 0
    }
}
