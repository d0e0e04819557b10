use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use croak_msg::{CodeKind, Message, Token};

use crate::error::Error;

/// Called once per accepted notification (or terminal failure) of an
/// observed resource.
pub type ObserveCallback = Arc<dyn Fn(Result<Message, Error>) + Send + Sync>;

/// Half the 24-bit sequence space; the cutoff between "newer" and
/// "wrapped around"
const SEQ_WINDOW: u32 = 1 << 23;

/// A notification this much younger than the freshest one seen is
/// accepted regardless of sequence numbers
const REORDER_GRACE: Duration = Duration::from_secs(128);

/// Whether a notification `(v2, t2)` is newer than the freshest
/// already-delivered `(v1, t1)`, per the RFC7641 §3.4 ordering:
/// sequence numbers compare modulo 2^24 with a half-space window, and
/// anything is fresh once 128 seconds have passed.
pub fn is_newer(v1: u32, t1: Instant, v2: u32, t2: Instant) -> bool {
  (v1 < v2 && v2 - v1 < SEQ_WINDOW)
  || (v1 > v2 && v1 - v2 > SEQ_WINDOW)
  || t2 > t1 + REORDER_GRACE
}

struct Observation {
  callback: ObserveCallback,
  latest: Option<(u32, Instant)>,
}

impl core::fmt::Debug for Observation {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Observation")
     .field("latest", &self.latest)
     .finish_non_exhaustive()
  }
}

/// Token-indexed registry of the resources this session observes.
///
/// An entry is created by a register GET, and dies on a deregister
/// GET, an error response, a peer reset, or session close; whichever
/// ends it, the callback hears about the end exactly once.
#[derive(Debug, Default)]
pub(crate) struct Observations {
  map: Mutex<HashMap<Token, Observation>>,
}

impl Observations {
  pub(crate) fn register(&self, token: Token, callback: ObserveCallback) -> Result<(), Error> {
    let mut map = self.map.lock().expect("observe lock");

    if map.contains_key(&token) {
      return Err(Error::DuplicateToken);
    }

    map.insert(token,
               Observation { callback,
                             latest: None });
    Ok(())
  }

  pub(crate) fn contains(&self, token: &Token) -> bool {
    self.map.lock().expect("observe lock").contains_key(token)
  }

  /// Route a notification to its observer.
  ///
  /// Stale notifications (older than the freshest delivered, inside
  /// the reorder window) are dropped. Error responses and
  /// notifications without an Observe option are terminal: they are
  /// delivered and the observation is removed.
  pub(crate) fn notify(&self, token: &Token, msg: Message, now: Instant) {
    let terminal = msg.code.kind() != CodeKind::Response
                   || msg.code.is_error()
                   || msg.observe().is_none();

    if terminal {
      let removed = self.map.lock().expect("observe lock").remove(token);
      if let Some(obs) = removed {
        (obs.callback)(Ok(msg));
      }
      return;
    }

    let seq = msg.observe().expect("checked above");

    let callback = {
      let mut map = self.map.lock().expect("observe lock");
      let Some(obs) = map.get_mut(token) else {
        return;
      };

      match obs.latest {
        | Some((v1, t1)) if !is_newer(v1, t1, seq, now) => {
          log::debug!("dropping stale notification seq {seq}");
          return;
        },
        | _ => {},
      }

      obs.latest = Some((seq, now));
      Arc::clone(&obs.callback)
    };

    callback(Ok(msg));
  }

  /// Terminate the observation under `token` with an error.
  pub(crate) fn fail(&self, token: &Token, err: Error) {
    let removed = self.map.lock().expect("observe lock").remove(token);
    if let Some(obs) = removed {
      (obs.callback)(Err(err));
    }
  }

  /// Remove the observation without telling its callback (the owner
  /// asked for this).
  pub(crate) fn deregister(&self, token: &Token) -> bool {
    self.map.lock().expect("observe lock").remove(token).is_some()
  }

  pub(crate) fn cancel_all(&self) {
    let drained: Vec<Observation> = {
      let mut map = self.map.lock().expect("observe lock");
      map.drain().map(|(_, o)| o).collect()
    };

    for obs in drained {
      (obs.callback)(Err(Error::Cancelled));
    }
  }
}
