use std::collections::HashMap;
use std::time::{Duration, Instant};

use croak_msg::Id;

/// What the duplicate detector knows about an inbound message ID
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Seen {
  /// Never seen (within the exchange lifetime); the caller should
  /// process the message. The ID is now remembered.
  New,
  /// Seen, and the reply to it is still being produced; the duplicate
  /// is dropped so the handler does not run twice.
  InProgress,
  /// Seen and answered; these exact bytes should be retransmitted
  /// instead of re-processing.
  Replay(Vec<u8>),
}

#[derive(Debug)]
struct Entry {
  at: Instant,
  reply: Option<Vec<u8>>,
}

/// Duplicate detector for one peer, keyed by message ID.
///
/// IDs are remembered for the exchange lifetime. The caller records
/// the acknowledgement (or piggybacked response) it sent for an ID so
/// a duplicate arriving later replays identical bytes.
#[derive(Debug)]
pub(crate) struct Dedup {
  lifetime: Duration,
  seen: HashMap<Id, Entry>,
}

impl Dedup {
  pub(crate) fn new(lifetime: Duration) -> Self {
    Self { lifetime,
           seen: HashMap::new() }
  }

  /// Ask whether `id` is fresh, marking it seen if so.
  pub(crate) fn check(&mut self, id: Id, now: Instant) -> Seen {
    match self.seen.get(&id) {
      | Some(entry) if now.duration_since(entry.at) < self.lifetime => {
        match &entry.reply {
          | Some(bytes) => Seen::Replay(bytes.clone()),
          | None => Seen::InProgress,
        }
      },
      | _ => {
        self.seen.insert(id, Entry { at: now, reply: None });
        Seen::New
      },
    }
  }

  /// Remember the bytes that answered `id`.
  pub(crate) fn record(&mut self, id: Id, bytes: Vec<u8>) {
    if let Some(entry) = self.seen.get_mut(&id) {
      entry.reply = Some(bytes);
    }
  }

  /// Forget everything older than the exchange lifetime.
  pub(crate) fn prune(&mut self, now: Instant) {
    self.seen
        .retain(|_, entry| now.duration_since(entry.at) < self.lifetime);
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.seen.len()
  }
}
