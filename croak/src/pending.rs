use std::collections::HashMap;
use std::sync::Mutex;

use croak_msg::{Message, Token};
use tokio::sync::oneshot;

use crate::error::Error;

/// One outstanding request: the message that opened the exchange and
/// the channel its final response (or failure) is delivered on.
#[derive(Debug)]
pub(crate) struct PendingRequest {
  /// The request as sent, kept so block-wise continuations can
  /// reproduce its method and options.
  pub(crate) req: Message,
  pub(crate) sink: oneshot::Sender<Result<Message, Error>>,
}

/// Token-indexed table of a session's in-flight requests.
///
/// There is at most one consumer per token: `insert` refuses occupied
/// tokens and `take` removes the entry it returns.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
  inner: Mutex<HashMap<Token, PendingRequest>>,
}

impl PendingRequests {
  pub(crate) fn insert(&self, token: Token, pending: PendingRequest) -> Result<(), Error> {
    let mut inner = self.inner.lock().expect("pending lock");

    if inner.contains_key(&token) {
      return Err(Error::DuplicateToken);
    }

    inner.insert(token, pending);
    Ok(())
  }

  pub(crate) fn take(&self, token: &Token) -> Option<PendingRequest> {
    self.inner.lock().expect("pending lock").remove(token)
  }

  pub(crate) fn contains(&self, token: &Token) -> bool {
    self.inner.lock().expect("pending lock").contains_key(token)
  }

  /// Clone of the originating request for `token`, if one is in flight
  pub(crate) fn request(&self, token: &Token) -> Option<Message> {
    self.inner
        .lock()
        .expect("pending lock")
        .get(token)
        .map(|p| p.req.clone())
  }

  /// Complete the exchange under `token`. Returns false when nothing
  /// was waiting (the result should then go to the error sink).
  pub(crate) fn complete(&self, token: &Token, result: Result<Message, Error>) -> bool {
    match self.take(token) {
      | Some(pending) => pending.sink.send(result).is_ok(),
      | None => false,
    }
  }

  /// Fire every entry's cancel signal and empty the table.
  pub(crate) fn cancel_all(&self) {
    let drained: Vec<PendingRequest> = {
      let mut inner = self.inner.lock().expect("pending lock");
      inner.drain().map(|(_, p)| p).collect()
    };

    for pending in drained {
      let _ = pending.sink.send(Err(Error::Cancelled));
    }
  }
}
