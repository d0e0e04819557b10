use std::sync::Mutex;

use croak_msg::{Code, Id, Message, Token, Type};

/// Free-list of [`Message`] values so the hot send paths can reuse
/// option-map and payload allocations instead of rebuilding them for
/// every acknowledgement and reply.
#[derive(Debug)]
pub(crate) struct Pool {
  free: Mutex<Vec<Message>>,
  capacity: usize,
}

impl Pool {
  pub(crate) fn new(capacity: usize) -> Self {
    Self { free: Mutex::new(Vec::new()),
           capacity }
  }

  /// Take a zeroed message out of the pool (or mint one).
  pub(crate) fn acquire(&self) -> Message {
    self.free
        .lock()
        .expect("pool lock")
        .pop()
        .unwrap_or_else(|| Message::new(Type::Con, Code::EMPTY, Id(0), Token::EMPTY))
  }

  /// Hand a message back. Its contents are wiped here; releasing a
  /// message twice is a logic error upstream that this cannot detect.
  pub(crate) fn release(&self, mut msg: Message) {
    msg.id = Id(0);
    msg.ty = Type::Con;
    msg.code = Code::EMPTY;
    msg.token = Token::EMPTY;
    msg.opts.clear();
    msg.payload.0.clear();

    let mut free = self.free.lock().expect("pool lock");
    if free.len() < self.capacity {
      free.push(msg);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn acquire_is_zeroed_after_release() {
    let pool = Pool::new(4);

    let mut msg = pool.acquire();
    msg.id = Id(77);
    msg.code = Code::CONTENT;
    msg.payload.0.extend(b"leftovers");
    pool.release(msg);

    let msg = pool.acquire();
    assert_eq!(msg.id, Id(0));
    assert_eq!(msg.code, Code::EMPTY);
    assert!(msg.payload.0.is_empty());
    assert!(msg.opts.is_empty());
  }

  #[test]
  fn capacity_bounds_the_free_list() {
    let pool = Pool::new(1);
    pool.release(Message::new(Type::Con, Code::EMPTY, Id(1), Token::EMPTY));
    pool.release(Message::new(Type::Con, Code::EMPTY, Id(2), Token::EMPTY));

    assert_eq!(pool.free.lock().unwrap().len(), 1);
  }
}
