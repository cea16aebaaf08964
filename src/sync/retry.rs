use chrono::Duration;

use crate::config::SyncConfig;

/// Bounded-retry-with-backoff policy for queued action delivery.
///
/// Per action: a failed attempt pushes its next attempt out by
/// `base * 2^(attempts - 1)`, capped at `max_delay`. Per registration: after
/// `max_retries` consecutive drain cycles that leave failures behind, the
/// registration is marked failed and waits for an explicit trigger.
/// Actions themselves are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  /// No backoff between attempts
  pub fn immediate(max_retries: u32) -> Self {
    Self {
      max_retries,
      base_delay: Duration::zero(),
      max_delay: Duration::zero(),
    }
  }

  /// Delay before the next attempt, given how many attempts have failed
  pub fn delay_for(&self, failed_attempts: u32) -> Duration {
    if failed_attempts == 0 {
      return Duration::zero();
    }

    let exponent = (failed_attempts - 1).min(30);
    let factor = 1i32 << exponent;
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}

impl From<&SyncConfig> for RetryPolicy {
  fn from(config: &SyncConfig) -> Self {
    Self {
      max_retries: config.max_retries,
      base_delay: Duration::seconds(config.base_delay_secs as i64),
      max_delay: Duration::seconds(config.max_delay_secs as i64),
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}
