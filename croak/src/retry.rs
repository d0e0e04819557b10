use std::time::Duration;

use rand::{Rng, SeedableRng};

/// A number of retransmission attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Draw a random initial delay between `init_min` and `init_max`,
  /// then double the delay after each failed attempt.
  Exponential {
    /// Minimum (inclusive) delay before the first retry
    init_min: Duration,
    /// Maximum (inclusive) delay before the first retry
    init_max: Duration,
  },
  /// Draw a random delay between `min` and `max` and wait that long
  /// between every attempt.
  Delay {
    /// Minimum (inclusive) delay between attempts
    min: Duration,
    /// Maximum (inclusive) delay between attempts
    max: Duration,
  },
}

impl Strategy {
  fn init_range(&self) -> (Duration, Duration) {
    match *self {
      | Strategy::Exponential { init_min, init_max } => (init_min, init_max),
      | Strategy::Delay { min, max } => (min, max),
    }
  }

  /// Are min & max delays the same? if so, we can skip the random
  /// number generation.
  pub fn has_jitter(&self) -> bool {
    let (min, max) = self.init_range();
    min != max
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// A retry should be performed
  Retry,
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
}

/// Tracks the delay schedule for one piece of fallible work.
///
/// The timer does not sleep and does not contain the work to be done;
/// it only answers "how long until the next attempt, and is there
/// one". The first transmission is the caller's business and does not
/// count as an attempt:
///
/// ```
/// use std::time::Duration;
/// use croak::retry::{Attempts, RetryTimer, Strategy, YouShould};
///
/// let strategy = Strategy::Exponential { init_min: Duration::from_secs(2),
///                                        init_max: Duration::from_secs(2) };
/// let mut retry = RetryTimer::new(strategy, Attempts(4));
///
/// // transmit();
/// loop {
///   let wait_for = retry.next_timeout();
///   // sleep(wait_for); acked? break;
///   match retry.what_should_i_do() {
///     | YouShould::Retry => { /* transmit(); */ },
///     | YouShould::Cry => break, // give the exchange up for dead
///   }
///   # break;
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTimer {
  delay: Duration,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl RetryTimer {
  /// Create a new retrier
  pub fn new(strategy: Strategy, max_attempts: Attempts) -> Self {
    let (min, max) = strategy.init_range();
    let delay = if strategy.has_jitter() {
      let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(rand::random());
      Duration::from_millis(rand.gen_range(min.as_millis() as u64..=max.as_millis() as u64))
    } else {
      min
    };

    Self { delay,
           strategy,
           attempts: Attempts(0),
           max_attempts }
  }

  /// The delay to wait before asking [`RetryTimer::what_should_i_do`]
  pub fn next_timeout(&self) -> Duration {
    self.delay
  }

  /// When the thing we keep trying fails again, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  pub fn what_should_i_do(&mut self) -> YouShould {
    if self.attempts >= self.max_attempts {
      return YouShould::Cry;
    }

    self.attempts.0 += 1;

    if let Strategy::Exponential { .. } = self.strategy {
      self.delay *= 2;
    }

    YouShould::Retry
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn exponential_retrier() {
    let strategy = Strategy::Exponential { init_min: Duration::from_secs(1),
                                           init_max: Duration::from_secs(1) };
    let mut retry = RetryTimer::new(strategy, Attempts(4));

    assert_eq!(retry.next_timeout(), Duration::from_secs(1));
    assert_eq!(retry.what_should_i_do(), YouShould::Retry);
    assert_eq!(retry.next_timeout(), Duration::from_secs(2));
    assert_eq!(retry.what_should_i_do(), YouShould::Retry);
    assert_eq!(retry.next_timeout(), Duration::from_secs(4));
    assert_eq!(retry.what_should_i_do(), YouShould::Retry);
    assert_eq!(retry.next_timeout(), Duration::from_secs(8));
    assert_eq!(retry.what_should_i_do(), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(), YouShould::Cry);
    assert_eq!(retry.what_should_i_do(), YouShould::Cry);
  }

  #[test]
  fn delay_retrier_does_not_grow() {
    let strategy = Strategy::Delay { min: Duration::from_millis(500),
                                     max: Duration::from_millis(500) };
    let mut retry = RetryTimer::new(strategy, Attempts(2));

    assert_eq!(retry.what_should_i_do(), YouShould::Retry);
    assert_eq!(retry.next_timeout(), Duration::from_millis(500));
    assert_eq!(retry.what_should_i_do(), YouShould::Retry);
    assert_eq!(retry.next_timeout(), Duration::from_millis(500));
    assert_eq!(retry.what_should_i_do(), YouShould::Cry);
  }

  #[test]
  fn jitter_stays_in_range() {
    let strategy = Strategy::Exponential { init_min: Duration::from_millis(2000),
                                           init_max: Duration::from_millis(3000) };

    for _ in 0..32 {
      let retry = RetryTimer::new(strategy, Attempts(4));
      assert!(retry.next_timeout() >= Duration::from_millis(2000));
      assert!(retry.next_timeout() <= Duration::from_millis(3000));
    }
  }
}
