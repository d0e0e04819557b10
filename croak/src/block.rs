use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use croak_msg::known::{self, Block};
use croak_msg::{Code, Message, Token, Type};

use crate::error::Error;

/// What the engine made of a message it was shown
#[derive(Debug, PartialEq)]
pub(crate) enum BlockOutcome {
  /// Nothing block-wise going on; process the message as usual
  PassThrough(Message),
  /// The engine consumed the message and produced the next leg of
  /// the transfer; put it on the wire and keep waiting
  Continue(Message),
  /// A transfer just finished; here is the reassembled message
  Complete(Message),
}

/// Transfers are tracked by the exchange token on the side that
/// opened them, and by request identity on the side answering, since
/// every continuation arrives with a fresh message ID (and possibly a
/// fresh token).
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Key {
  Token(Token),
  Ident(u64),
}

/// Reassembling an inbound body, block by block
#[derive(Debug)]
struct RxState {
  buf: Vec<u8>,
  next_num: u32,
  last: Instant,
}

/// Pushing an outbound body, block by block
#[derive(Debug)]
struct TxState {
  payload: Vec<u8>,
  offset: usize,
  last_sent: usize,
  szx: u8,
  last: Instant,
}

/// A fully formed response being served out in windows as the peer
/// asks for them
#[derive(Debug)]
struct ServeState {
  msg: Message,
  last: Instant,
}

#[derive(Debug)]
enum Transfer {
  Rx(RxState),
  Tx(TxState),
  Serve(ServeState),
}

impl Transfer {
  fn last_activity(&self) -> Instant {
    match self {
      | Transfer::Rx(s) => s.last,
      | Transfer::Tx(s) => s.last,
      | Transfer::Serve(s) => s.last,
    }
  }
}

/// Splits oversized payloads across many exchanges and reassembles
/// the other direction, transparently to the application (RFC7959).
///
/// Two entry points matter per role: requesters wrap outbound
/// requests ([`BlockWise::outbound_request`]) and feed responses
/// through [`BlockWise::on_response`]; responders feed requests
/// through [`BlockWise::on_request`] and wrap outbound responses
/// ([`BlockWise::outbound_response`]).
#[derive(Debug)]
pub(crate) struct BlockWise {
  enabled: bool,
  szx: u8,
  timeout: Duration,
  max_assembled: usize,
  transfers: Mutex<HashMap<Key, Transfer>>,
}

fn block_size(szx: u8) -> usize {
  1 << (szx.min(6) + 4)
}

impl BlockWise {
  pub(crate) fn new(enabled: bool, szx: u8, timeout: Duration, max_assembled: usize) -> Self {
    Self { enabled,
           szx: szx.min(6),
           timeout,
           max_assembled,
           transfers: Mutex::new(HashMap::new()) }
  }

  /// Fragment an outbound request if its body needs it.
  ///
  /// Returns the message to actually send; when fragmentation kicks
  /// in, that is block 0 and the rest of the body is parked until
  /// the peer acknowledges each piece with 2.31 Continue.
  pub(crate) fn outbound_request(&self, req: Message, now: Instant) -> Result<Message, Error> {
    let size = block_size(self.szx);
    if !self.enabled || req.payload.0.len() <= size {
      return Ok(req);
    }

    let total = req.payload.0.len();
    let mut first = req.clone();
    first.payload.0.truncate(size);
    first.set_block1(Block::from_parts(self.szx, 0, true));
    first.set_size1(total as u32);

    self.transfers
        .lock()
        .expect("blockwise lock")
        .insert(Key::Token(req.token),
                Transfer::Tx(TxState { payload: req.payload.0,
                                       offset: 0,
                                       last_sent: size,
                                       szx: self.szx,
                                       last: now }));

    Ok(first)
  }

  /// Inbound hook for the requesting side.
  ///
  /// `original` is the logical (unfragmented) request the exchange
  /// was opened with; continuations clone its method and options.
  pub(crate) fn on_response(&self,
                            mut resp: Message,
                            original: Option<&Message>,
                            now: Instant)
                            -> Result<BlockOutcome, Error> {
    if !self.enabled {
      return Ok(BlockOutcome::PassThrough(resp));
    }

    let key = Key::Token(resp.token);

    if let Some(block1) = resp.block1() {
      if resp.code == Code::CONTINUE {
        return self.next_request_fragment(key, block1, original, now);
      }

      // final answer to an uploaded body; the upload state is done
      // and the block descriptor is no concern of the application
      self.transfers.lock().expect("blockwise lock").remove(&key);
      resp.remove(known::BLOCK1);
      resp.remove(known::SIZE1);
    }

    match resp.block2() {
      | Some(block2) => self.assemble_response(key, block2, resp, original, now),
      | None => Ok(BlockOutcome::PassThrough(resp)),
    }
  }

  fn next_request_fragment(&self,
                           key: Key,
                           echoed: Block,
                           original: Option<&Message>,
                           now: Instant)
                           -> Result<BlockOutcome, Error> {
    let mut transfers = self.transfers.lock().expect("blockwise lock");

    let Some(original) = original else {
      transfers.remove(&key);
      return Err(Error::BlockwiseProtocolError);
    };
    let Some(Transfer::Tx(state)) = transfers.get_mut(&key) else {
      return Err(Error::BlockwiseProtocolError);
    };

    // the peer may shrink the block size; it may never grow it
    let szx = echoed.szx().min(state.szx);
    let size = block_size(szx);

    state.offset += state.last_sent;
    state.szx = szx;
    state.last = now;

    if state.offset >= state.payload.len() {
      transfers.remove(&key);
      return Err(Error::BlockwiseProtocolError);
    }

    let end = (state.offset + size).min(state.payload.len());
    let more = end < state.payload.len();
    let num = (state.offset / size) as u32;

    let mut next = original.clone();
    next.payload.0 = state.payload[state.offset..end].to_vec();
    next.set_block1(Block::from_parts(szx, num, more));
    next.set_size1(state.payload.len() as u32);

    state.last_sent = end - state.offset;

    if !more {
      // nothing left to push once this is acknowledged; the final
      // response closes the exchange
      transfers.remove(&key);
    }

    Ok(BlockOutcome::Continue(next))
  }

  fn assemble_response(&self,
                       key: Key,
                       block2: Block,
                       mut resp: Message,
                       original: Option<&Message>,
                       now: Instant)
                       -> Result<BlockOutcome, Error> {
    let mut transfers = self.transfers.lock().expect("blockwise lock");

    let state = match transfers.entry(key) {
      | Entry::Occupied(entry) => match entry.into_mut() {
        | Transfer::Rx(state) => state,
        | _ => return Err(Error::BlockwiseProtocolError),
      },
      | Entry::Vacant(entry) => {
        if block2.num() != 0 {
          return Err(Error::BlockwiseProtocolError);
        }
        match entry.insert(Transfer::Rx(RxState { buf: Vec::new(),
                                                  next_num: 0,
                                                  last: now })) {
          | Transfer::Rx(state) => state,
          | _ => unreachable!(),
        }
      },
    };

    if block2.num() != state.next_num || block2.offset() != state.buf.len() {
      transfers.remove(&key);
      return Err(Error::BlockwiseProtocolError);
    }

    if state.buf.len() + resp.payload.0.len() > self.max_assembled {
      transfers.remove(&key);
      return Err(Error::PayloadTooLarge);
    }

    state.buf.extend(&resp.payload.0);
    state.next_num += 1;
    state.last = now;

    if !block2.more() {
      let Some(Transfer::Rx(state)) = transfers.remove(&key) else {
        unreachable!()
      };
      resp.payload.0 = state.buf;
      resp.remove(known::BLOCK2);
      resp.remove(known::SIZE2);
      return Ok(BlockOutcome::Complete(resp));
    }

    let Some(original) = original else {
      // nobody to issue continuations for (e.g. an unsolicited
      // notification); deliver the fragment as-is
      transfers.remove(&key);
      return Ok(BlockOutcome::PassThrough(resp));
    };

    let mut next = original.clone();
    next.payload.0.clear();
    next.remove(known::BLOCK1);
    next.remove(known::SIZE1);
    next.set_block2(Block::from_parts(block2.szx(), block2.num() + 1, false));

    Ok(BlockOutcome::Continue(next))
  }

  /// Inbound hook for the answering side.
  ///
  /// Replies produced here (2.31 Continue, served windows) come back
  /// fully shaped: piggybacked on an ACK for confirmable requests,
  /// non-confirmable otherwise.
  pub(crate) fn on_request(&self, req: Message, now: Instant) -> Result<BlockOutcome, Error> {
    if !self.enabled {
      return Ok(BlockOutcome::PassThrough(req));
    }

    if let Some(block1) = req.block1() {
      return self.assemble_request(block1, req, now);
    }

    match req.block2() {
      | Some(block2) if block2.num() > 0 => self.serve_window(block2, req, now),
      | _ => Ok(BlockOutcome::PassThrough(req)),
    }
  }

  fn reply_shape(req: &Message, code: Code) -> Message {
    let ty = match req.ty {
      | Type::Con => Type::Ack,
      | _ => Type::Non,
    };
    Message::new(ty, code, req.id, req.token)
  }

  fn assemble_request(&self,
                      block1: Block,
                      mut req: Message,
                      now: Instant)
                      -> Result<BlockOutcome, Error> {
    let key = Key::Ident(req.cache_key());
    let mut transfers = self.transfers.lock().expect("blockwise lock");

    let state = match transfers.entry(key) {
      | Entry::Occupied(entry) => match entry.into_mut() {
        | Transfer::Rx(state) => state,
        | _ => return Err(Error::BlockwiseProtocolError),
      },
      | Entry::Vacant(entry) => {
        if block1.num() != 0 {
          return Err(Error::BlockwiseProtocolError);
        }
        match entry.insert(Transfer::Rx(RxState { buf: Vec::new(),
                                                  next_num: 0,
                                                  last: now })) {
          | Transfer::Rx(state) => state,
          | _ => unreachable!(),
        }
      },
    };

    if block1.offset() != state.buf.len() {
      transfers.remove(&key);
      return Err(Error::BlockwiseProtocolError);
    }

    if state.buf.len() + req.payload.0.len() > self.max_assembled {
      transfers.remove(&key);
      return Err(Error::PayloadTooLarge);
    }

    state.buf.extend(&req.payload.0);
    state.next_num = block1.num() + 1;
    state.last = now;

    if block1.more() {
      let szx = block1.szx().min(self.szx);
      let mut reply = Self::reply_shape(&req, Code::CONTINUE);
      reply.set_block1(Block::from_parts(szx, block1.num(), true));
      return Ok(BlockOutcome::Continue(reply));
    }

    let Some(Transfer::Rx(state)) = transfers.remove(&key) else {
      unreachable!()
    };
    req.payload.0 = state.buf;
    req.remove(known::BLOCK1);
    req.remove(known::SIZE1);
    Ok(BlockOutcome::Complete(req))
  }

  fn serve_window(&self,
                  block2: Block,
                  req: Message,
                  now: Instant)
                  -> Result<BlockOutcome, Error> {
    let key = Key::Ident(req.cache_key());
    let mut transfers = self.transfers.lock().expect("blockwise lock");

    let Some(Transfer::Serve(state)) = transfers.get_mut(&key) else {
      // no cached body; let the handler regenerate the response and
      // outbound_response pick the window out of it
      return Ok(BlockOutcome::PassThrough(req));
    };
    state.last = now;

    let szx = block2.szx().min(self.szx);
    let size = block_size(szx);
    let body = &state.msg.payload.0;
    let offset = block2.num() as usize * size;

    if offset >= body.len() {
      transfers.remove(&key);
      return Err(Error::BlockwiseProtocolError);
    }

    let end = (offset + size).min(body.len());
    let more = end < body.len();

    let mut reply = Self::reply_shape(&req, state.msg.code);
    reply.opts = state.msg.opts.clone();
    reply.payload.0 = body[offset..end].to_vec();
    reply.set_block2(Block::from_parts(szx, block2.num(), more));
    reply.remove(known::SIZE2);

    if !more {
      transfers.remove(&key);
    }

    Ok(BlockOutcome::Continue(reply))
  }

  /// Window an outbound response if its body needs it, caching the
  /// whole thing for the follow-up requests to come.
  ///
  /// The result keeps `resp`'s identity fields; the caller decides
  /// how it rides the wire.
  pub(crate) fn outbound_response(&self,
                                  mut resp: Message,
                                  req: &Message,
                                  now: Instant)
                                  -> Message {
    if !self.enabled {
      return resp;
    }

    let requested = req.block2();
    let szx = requested.map(|b| b.szx()).unwrap_or(self.szx).min(self.szx);
    let size = block_size(szx);

    if resp.payload.0.len() <= size && requested.is_none() {
      return resp;
    }

    if resp.payload.0.len() <= size && requested.map(|b| b.num()) == Some(0) {
      // it fits after all; answer the descriptor so the peer knows
      // the transfer is one block long
      resp.set_block2(Block::from_parts(szx, 0, false));
      return resp;
    }

    let total = resp.payload.0.len();
    let num = requested.map(|b| b.num()).unwrap_or(0) as usize;
    let offset = num * size;
    let end = (offset + size).min(total);
    let more = end < total;

    let mut window = resp.clone();
    window.payload.0 = resp.payload.0[offset.min(total)..end].to_vec();
    window.set_block2(Block::from_parts(szx, num as u32, more));
    if num == 0 {
      window.set_size2(total as u32);
    }

    if more {
      self.transfers
          .lock()
          .expect("blockwise lock")
          .insert(Key::Ident(req.cache_key()),
                  Transfer::Serve(ServeState { msg: resp, last: now }));
    }

    window
  }

  /// Drop every transfer idle past the deadline, reporting the
  /// token-keyed ones so their exchanges can be failed.
  pub(crate) fn expire(&self, now: Instant) -> Vec<Token> {
    let mut timed_out = Vec::new();

    self.transfers
        .lock()
        .expect("blockwise lock")
        .retain(|key, transfer| {
          let fresh = now.duration_since(transfer.last_activity()) < self.timeout;
          if !fresh {
            if let Key::Token(token) = key {
              timed_out.push(*token);
            }
          }
          fresh
        });

    timed_out
  }

  /// Forget a requester-side transfer (its exchange ended some other
  /// way).
  pub(crate) fn abandon(&self, token: &Token) {
    self.transfers
        .lock()
        .expect("blockwise lock")
        .remove(&Key::Token(*token));
  }
}

#[cfg(test)]
mod test {
  use croak_msg::{Id, Token};

  use super::*;

  fn engine() -> BlockWise {
    BlockWise::new(true, 2, Duration::from_secs(3), 64 * 1024)
  }

  fn get(token: u8) -> Message {
    let mut req = Message::new(Type::Con,
                               Code::GET,
                               Id(1),
                               Token::from_slice(&[token]).unwrap());
    req.set_path("a");
    req
  }

  #[test]
  fn response_windows_follow_request_then_assemble() {
    let server = engine();
    let client = engine();
    let now = Instant::now();

    let req = get(1);
    let body: Vec<u8> = (0..200u8).collect();

    let mut full = Message::new(Type::Ack, Code::CONTENT, req.id, req.token);
    full.payload.0 = body.clone();

    // server windows the 200-byte body into 64-byte blocks
    let window0 = server.outbound_response(full, &req, now);
    assert_eq!(window0.payload.0, &body[0..64]);
    assert_eq!(window0.block2().unwrap().num(), 0);
    assert!(window0.block2().unwrap().more());
    assert_eq!(window0.size2(), Some(200));

    // client assembles and issues continuations
    let mut window = window0;
    let mut hops = 0;
    loop {
      match client.on_response(window, Some(&req), now).unwrap() {
        | BlockOutcome::Continue(follow_up) => {
          hops += 1;
          let num = follow_up.block2().unwrap().num();
          assert_eq!(num, hops);
          assert!(follow_up.payload.0.is_empty());

          window = match server.on_request(follow_up, now).unwrap() {
            | BlockOutcome::Continue(w) => w,
            | other => panic!("expected served window, got {other:?}"),
          };
          assert_eq!(window.payload.0,
                     &body[num as usize * 64..(num as usize * 64 + 64).min(200)]);
        },
        | BlockOutcome::Complete(assembled) => {
          assert_eq!(assembled.payload.0, body);
          assert!(assembled.block2().is_none());
          break;
        },
        | other => panic!("unexpected {other:?}"),
      }
    }
    assert_eq!(hops, 3);
  }

  #[test]
  fn request_body_uploads_block_by_block() {
    let client = engine();
    let server = engine();
    let now = Instant::now();

    let mut req = get(7);
    req.code = Code::POST;
    req.payload.0 = (0..150u8).collect();
    let original = req.clone();

    let first = client.outbound_request(req, now).unwrap();
    assert_eq!(first.payload.0.len(), 64);
    assert_eq!(first.block1().unwrap().num(), 0);
    assert!(first.block1().unwrap().more());
    assert_eq!(first.size1(), Some(150));

    // leg 0: server wants more
    let reply = match server.on_request(first, now).unwrap() {
      | BlockOutcome::Continue(r) => r,
      | other => panic!("unexpected {other:?}"),
    };
    assert_eq!(reply.code, Code::CONTINUE);
    assert_eq!(reply.ty, Type::Ack);

    // leg 1
    let second = match client.on_response(reply, Some(&original), now).unwrap() {
      | BlockOutcome::Continue(m) => m,
      | other => panic!("unexpected {other:?}"),
    };
    assert_eq!(second.block1().unwrap().num(), 1);
    let reply = match server.on_request(second, now).unwrap() {
      | BlockOutcome::Continue(r) => r,
      | other => panic!("unexpected {other:?}"),
    };

    // leg 2 is final
    let third = match client.on_response(reply, Some(&original), now).unwrap() {
      | BlockOutcome::Continue(m) => m,
      | other => panic!("unexpected {other:?}"),
    };
    assert_eq!(third.block1().unwrap().num(), 2);
    assert!(!third.block1().unwrap().more());

    match server.on_request(third, now).unwrap() {
      | BlockOutcome::Complete(assembled) => {
        assert_eq!(assembled.payload.0, (0..150u8).collect::<Vec<u8>>());
        assert!(assembled.block1().is_none());
      },
      | other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn peer_may_shrink_block_size() {
    let client = engine();
    let now = Instant::now();

    let mut req = get(9);
    req.code = Code::PUT;
    req.payload.0 = vec![0; 200];
    let original = req.clone();

    let first = client.outbound_request(req, now).unwrap();
    assert_eq!(first.payload.0.len(), 64);

    // server echoes szx 0 (16-byte blocks)
    let mut reply = Message::new(Type::Ack, Code::CONTINUE, Id(1), original.token);
    reply.set_block1(Block::from_parts(0, 0, true));

    let next = match client.on_response(reply, Some(&original), now).unwrap() {
      | BlockOutcome::Continue(m) => m,
      | other => panic!("unexpected {other:?}"),
    };

    // 64 bytes were delivered, so the next 16-byte block is number 4
    let b = next.block1().unwrap();
    assert_eq!(b.size(), 16);
    assert_eq!(b.num(), 4);
    assert_eq!(next.payload.0.len(), 16);
  }

  #[test]
  fn out_of_order_blocks_poison_the_transfer() {
    let client = engine();
    let now = Instant::now();
    let req = get(3);

    let mut fragment = Message::new(Type::Ack, Code::CONTENT, Id(1), req.token);
    fragment.payload.0 = vec![0; 64];
    fragment.set_block2(Block::from_parts(2, 0, true));
    client.on_response(fragment, Some(&req), now).unwrap();

    // num 2 arrives where num 1 was expected
    let mut skipped = Message::new(Type::Ack, Code::CONTENT, Id(2), req.token);
    skipped.payload.0 = vec![0; 64];
    skipped.set_block2(Block::from_parts(2, 2, true));

    assert_eq!(client.on_response(skipped, Some(&req), now).unwrap_err(),
               Error::BlockwiseProtocolError);

    // the transfer is gone; a fresh block 0 starts over
    let mut restart = Message::new(Type::Ack, Code::CONTENT, Id(3), req.token);
    restart.payload.0 = vec![0; 64];
    restart.set_block2(Block::from_parts(2, 0, true));
    assert!(matches!(client.on_response(restart, Some(&req), now),
                     Ok(BlockOutcome::Continue(_))));
  }

  #[test]
  fn assembled_size_is_bounded() {
    let client = BlockWise::new(true, 2, Duration::from_secs(3), 100);
    let now = Instant::now();
    let req = get(4);

    let mut first = Message::new(Type::Ack, Code::CONTENT, Id(1), req.token);
    first.payload.0 = vec![0; 64];
    first.set_block2(Block::from_parts(2, 0, true));
    client.on_response(first, Some(&req), now).unwrap();

    let mut second = Message::new(Type::Ack, Code::CONTENT, Id(2), req.token);
    second.payload.0 = vec![0; 64];
    second.set_block2(Block::from_parts(2, 1, true));

    assert_eq!(client.on_response(second, Some(&req), now).unwrap_err(),
               Error::PayloadTooLarge);
  }

  #[test]
  fn idle_transfers_expire() {
    let client = engine();
    let now = Instant::now();
    let req = get(5);

    let mut fragment = Message::new(Type::Ack, Code::CONTENT, Id(1), req.token);
    fragment.payload.0 = vec![0; 64];
    fragment.set_block2(Block::from_parts(2, 0, true));
    client.on_response(fragment, Some(&req), now).unwrap();

    assert!(client.expire(now + Duration::from_secs(1)).is_empty());
    assert_eq!(client.expire(now + Duration::from_secs(4)), vec![req.token]);
  }

  #[test]
  fn small_messages_pass_through() {
    let engine = engine();
    let now = Instant::now();

    let req = get(6);
    let sent = engine.outbound_request(req.clone(), now).unwrap();
    assert_eq!(sent, req);

    let resp = Message::new(Type::Ack, Code::CONTENT, Id(1), req.token);
    assert_eq!(engine.on_response(resp.clone(), Some(&req), now).unwrap(),
               BlockOutcome::PassThrough(resp));
  }
}
