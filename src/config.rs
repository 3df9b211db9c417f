use anyhow::bail;
use std::time::Duration;

/// Configuration for a proxy instance.
///
/// All values are consumed as plain data; parsing them from the command line or a config file
///  is the hosting application's business.
pub struct ProxyConfig {
    /// The largest number of payload bytes per chunk. Together with the frame header this must
    ///  fit into a single frame of the underlying transport. The transport's frame limit cannot
    ///  be discovered reliably, so the responsibility for choosing a workable value lies with
    ///  the application.
    pub max_chunk_size: usize,

    /// The number of chunks that may be in flight per transfer, i.e. sent but not yet covered
    ///  by a cumulative acknowledgement, before the sender suspends emission.
    pub credit_window: u32,

    /// How long a sender waits for a ConnectAck, ChunkAck or Complete before retransmitting.
    pub ack_timeout: Duration,

    /// The number of retransmission attempts before a transfer is given up on.
    pub max_retries: u32,

    /// Growth of the retransmission delay per attempt, in eighths: 8 keeps the delay fixed at
    ///  [`ack_timeout`](ProxyConfig::ack_timeout), 16 doubles it with every attempt.
    pub backoff_growth_eighths: u32,

    /// A receiver-side session that sees no traffic for this long discards its buffers. This is
    ///  the safety net against lost Abort frames and crashed senders, so it should comfortably
    ///  exceed the sender's full retry budget.
    pub receive_idle_timeout: Duration,

    /// Upper bound for the announced size of an incoming transfer. Connects above this limit
    ///  are rejected before any buffering happens.
    pub max_payload_size: u64,
}

impl ProxyConfig {
    /// Defaults for peers on a low-latency network, e.g. inside a data center.
    pub fn default_lan() -> ProxyConfig {
        ProxyConfig {
            max_chunk_size: 32 * 1024,
            credit_window: 32,
            ack_timeout: Duration::from_millis(250),
            max_retries: 5,
            backoff_growth_eighths: 16,
            receive_idle_timeout: Duration::from_secs(30),
            max_payload_size: 64 * 1024 * 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_chunk_size == 0 {
            bail!("chunk size must be positive");
        }
        if self.credit_window == 0 {
            bail!("credit window must be positive");
        }
        if self.ack_timeout.is_zero() {
            bail!("ack timeout must be positive");
        }
        if self.backoff_growth_eighths < 8 {
            bail!("backoff growth must be at least 8 eighths - the retry delay must not shrink");
        }
        if self.receive_idle_timeout.is_zero() {
            bail!("receive idle timeout must be positive");
        }
        if self.max_payload_size == 0 {
            bail!("max payload size must be positive");
        }
        Ok(())
    }
}
