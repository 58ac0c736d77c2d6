use std::time::Duration;

/// Exponential backoff schedule for retried jobs.
///
/// The delay before retry attempt `n` (zero-based) is
/// `initial_delay * multiplier^n`, capped at `max_delay`. Retries are
/// attempt-bounded by the job's retry budget, not time-bounded; the job's
/// deadline still applies across the whole sequence and can abort it
/// mid-backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
  initial_delay: Duration,
  multiplier: f64,
  max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      initial_delay: Duration::from_millis(100),
      multiplier: 2.0,
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  /// A multiplier below 1.0 would shrink delays; it is clamped up to 1.0.
  pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
    Self {
      initial_delay,
      multiplier: multiplier.max(1.0),
      max_delay,
    }
  }

  /// Delay to sleep before the given zero-based retry attempt.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = self.multiplier.powi(attempt as i32);
    let delay = self.initial_delay.as_secs_f64() * factor;
    let capped = delay.min(self.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delays_grow_exponentially() {
    let policy = RetryPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(60));
    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    assert_eq!(policy.delay_for(3), Duration::from_millis(800));
  }

  #[test]
  fn delay_is_capped() {
    let policy = RetryPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(1));
    assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    // Far past any representable factor, the cap still holds.
    assert_eq!(policy.delay_for(2000), Duration::from_secs(1));
  }

  #[test]
  fn multiplier_is_clamped_to_at_least_one() {
    let policy = RetryPolicy::new(Duration::from_millis(50), 0.1, Duration::from_secs(1));
    assert_eq!(policy.delay_for(0), Duration::from_millis(50));
    assert_eq!(policy.delay_for(5), Duration::from_millis(50));
  }

  #[test]
  fn default_policy_starts_small() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert!(policy.delay_for(20) <= Duration::from_secs(5));
  }
}
