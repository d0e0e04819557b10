use std::time::Duration;

use crate::retry::{Attempts, Strategy};

/// Runtime knobs shared by servers and clients.
///
/// Every field has a sensible default; construct with
/// `Config::default()` and override what you need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Largest inbound datagram we will read.
  ///
  /// Datagrams larger than this are truncated by the socket and will
  /// fail to parse.
  ///
  /// ```
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().max_message_size, 64 * 1024);
  /// ```
  pub max_message_size: usize,

  /// Whether payloads too large for a single datagram are split
  /// across block-wise exchanges (RFC7959).
  ///
  /// When disabled, oversized messages are sent as-is and inbound
  /// block options are handed to the application untouched.
  ///
  /// ```
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().blockwise_enable, true);
  /// ```
  pub blockwise_enable: bool,

  /// Largest block size exponent we will use or accept; block size
  /// is `2^(szx + 4)` bytes, so the default of 6 means 1024-byte
  /// blocks.
  ///
  /// ```
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().blockwise_szx, 6);
  /// ```
  pub blockwise_szx: u8,

  /// How long a block-wise transfer may sit idle before it is
  /// discarded and its exchange failed.
  ///
  /// ```
  /// use std::time::Duration;
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().blockwise_timeout, Duration::from_secs(3));
  /// ```
  pub blockwise_timeout: Duration,

  /// Upper bound on the size of a reassembled block-wise body.
  ///
  /// ```
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().max_assembled_size, 64 * 1024);
  /// ```
  pub max_assembled_size: usize,

  /// Number of confirmable messages that may be in flight to one
  /// peer at the same time; further sends queue until an
  /// acknowledgement frees a slot.
  ///
  /// ```
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().transmission_nstart, 1);
  /// ```
  pub transmission_nstart: usize,

  /// Base timeout before the first retransmission of an unacked
  /// confirmable message. The effective initial timeout is drawn
  /// uniformly from `[ack_timeout, ack_timeout * 1.5]` and doubles
  /// with every retransmission.
  ///
  /// ```
  /// use std::time::Duration;
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().transmission_ack_timeout, Duration::from_secs(2));
  /// ```
  pub transmission_ack_timeout: Duration,

  /// Number of times an unacked confirmable message is retransmitted
  /// before its exchange fails.
  ///
  /// ```
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().transmission_max_retransmit, 4);
  /// ```
  pub transmission_max_retransmit: u16,

  /// How long a message ID is remembered for deduplication and
  /// acknowledgement replay.
  ///
  /// ```
  /// use std::time::Duration;
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().exchange_lifetime, Duration::from_secs(247));
  /// ```
  pub exchange_lifetime: Duration,

  /// Interval between keep-alive pings on an otherwise idle session.
  ///
  /// Zero disables keep-alive entirely (the default). A session whose
  /// ping runs out of retransmissions is closed.
  ///
  /// ```
  /// use std::time::Duration;
  /// use croak::Config;
  ///
  /// assert_eq!(Config::default().keepalive_interval, Duration::ZERO);
  /// ```
  pub keepalive_interval: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Config { max_message_size: 64 * 1024,
             blockwise_enable: true,
             blockwise_szx: 6,
             blockwise_timeout: Duration::from_secs(3),
             max_assembled_size: 64 * 1024,
             transmission_nstart: 1,
             transmission_ack_timeout: Duration::from_secs(2),
             transmission_max_retransmit: 4,
             exchange_lifetime: Duration::from_secs(247),
             keepalive_interval: Duration::ZERO }
  }
}

impl Config {
  /// Retry strategy for unacked confirmable messages, as configured
  /// by [`Config::transmission_ack_timeout`].
  pub(crate) fn con_retry_strategy(&self) -> Strategy {
    Strategy::Exponential { init_min: self.transmission_ack_timeout,
                            init_max: self.transmission_ack_timeout * 3 / 2 }
  }

  /// See [`Config::transmission_max_retransmit`]
  pub(crate) fn max_retransmits(&self) -> Attempts {
    Attempts(self.transmission_max_retransmit)
  }

  /// Block size in bytes implied by [`Config::blockwise_szx`]
  pub(crate) fn block_size(&self) -> usize {
    1 << (self.blockwise_szx.min(6) + 4)
  }
}
