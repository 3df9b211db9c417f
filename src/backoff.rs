use std::time::Duration;

/// Deterministic retransmission delay curve: attempt `n` waits
///  `base * (growth_eighths / 8)^n`. A growth factor of 8 keeps the delay fixed, 16 doubles it
///  per attempt. Integer arithmetic throughout, so the curve is exactly reproducible in tests.
pub struct RetryBackoff {
    base: Duration,
    growth_eighths: u32,
}

impl RetryBackoff {
    pub fn new(base: Duration, growth_eighths: u32) -> RetryBackoff {
        RetryBackoff {
            base,
            // validated at startup; clamped here so a delay can never shrink
            growth_eighths: u32::max(growth_eighths, 8),
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut nanos = self.base.as_nanos();
        for _ in 0..attempt {
            nanos = nanos * self.growth_eighths as u128 / 8;
        }
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
