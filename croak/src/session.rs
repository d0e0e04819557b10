use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use croak_msg::{Code, CodeKind, Id, Message, Token, TryFromBytes, TryIntoBytes, Type};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch, Semaphore};

use crate::block::{BlockOutcome, BlockWise};
use crate::config::Config;
use crate::dedup::{Dedup, Seen};
use crate::error::Error;
use crate::handler::{ErrorSink, Handler, ResponseWriter, Spawner};
use crate::ids::{self, MidGen};
use crate::net::Addrd;
use crate::observe::{ObserveCallback, Observations};
use crate::pending::{PendingRequest, PendingRequests};
use crate::pool::Pool;
use crate::retry::{RetryTimer, YouShould};

/// How long a handler gets to produce its response before the
/// acknowledgement stops waiting and goes out empty
const PIGGYBACK_WINDOW: Duration = Duration::from_millis(100);

/// Messages the pool keeps warm per session
const POOL_CAPACITY: usize = 16;

/// How an acknowledgement-layer exchange resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckKind {
  /// The peer acknowledged our confirmable message
  Acked,
  /// The peer reset it (which is the *happy* path for pings)
  Reset,
}

#[derive(Debug)]
struct Retransmit {
  token: Token,
  resolve: oneshot::Sender<AckKind>,
}

/// One peer's worth of protocol state over a shared datagram socket.
///
/// Everything token- or id-shaped lives here: the pending-request
/// table, the retransmit map, the duplicate detector, the block-wise
/// engine and the observation registry. The dispatcher feeds inbound
/// datagrams in; user-facing handles ([`crate::Client`], the server's
/// per-peer sessions) call the outbound methods.
pub struct Session {
  // self-reference so borrowed methods can hand owned handles to the
  // tasks they spawn
  weak: Weak<Session>,
  peer: SocketAddr,
  sock: Arc<UdpSocket>,
  cfg: Config,
  mids: MidGen,
  pool: Pool,
  pending: PendingRequests,
  retrans: Mutex<HashMap<Id, Retransmit>>,
  dedup: Mutex<Dedup>,
  observations: Observations,
  blockwise: BlockWise,
  nstart: Arc<Semaphore>,
  handler: Arc<dyn Handler>,
  spawner: Spawner,
  errors: ErrorSink,
  closed: watch::Sender<bool>,
}

impl core::fmt::Debug for Session {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Session")
     .field("peer", &self.peer)
     .field("closed", &*self.closed.borrow())
     .finish_non_exhaustive()
  }
}

impl Session {
  pub(crate) fn new(peer: SocketAddr,
                    sock: Arc<UdpSocket>,
                    cfg: Config,
                    handler: Arc<dyn Handler>,
                    spawner: Spawner,
                    errors: ErrorSink)
                    -> Arc<Session> {
    let (closed, _) = watch::channel(false);

    let session =
      Arc::new_cyclic(|weak| Session { weak: weak.clone(),
                                       peer,
                                       sock,
                                       mids: MidGen::new(),
                                       pool: Pool::new(POOL_CAPACITY),
                                       pending: PendingRequests::default(),
                                       retrans: Mutex::new(HashMap::new()),
                                       dedup: Mutex::new(Dedup::new(cfg.exchange_lifetime)),
                                       observations: Observations::default(),
                                       blockwise: BlockWise::new(cfg.blockwise_enable,
                                                                 cfg.blockwise_szx,
                                                                 cfg.blockwise_timeout,
                                                                 cfg.max_assembled_size),
                                       nstart:
                                         Arc::new(Semaphore::new(cfg.transmission_nstart)),
                                       handler,
                                       spawner,
                                       errors,
                                       closed,
                                       cfg });

    session.spawn_timer_driver();
    session
  }

  /// The remote address this session talks to
  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// Whether [`Session::close`] has run
  pub fn is_closed(&self) -> bool {
    *self.closed.borrow()
  }

  /// Resolves once the session closes
  pub async fn closed(&self) {
    let mut rx = self.closed.subscribe();
    while !*rx.borrow_and_update() {
      if rx.changed().await.is_err() {
        return;
      }
    }
  }

  /// Tear the session down: every pending request and observation
  /// hears `Cancelled`, in-flight retransmissions stop.
  pub fn close(&self) {
    if self.closed.send_replace(true) {
      return;
    }

    log::debug!("session {} closing", self.peer);
    self.retrans.lock().expect("retrans lock").clear();
    self.pending.cancel_all();
    self.observations.cancel_all();
  }

  /// Drives dedup expiry and block-wise deadlines.
  fn spawn_timer_driver(&self) {
    let weak = self.weak.clone();
    let mut closed = self.closed.subscribe();

    tokio::spawn(async move {
      let mut tick = tokio::time::interval(Duration::from_secs(1));
      tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = closed.changed() => return,
          _ = tick.tick() => {
            let Some(session) = weak.upgrade() else { return };
            let now = Instant::now();

            session.dedup.lock().expect("dedup lock").prune(now);
            for token in session.blockwise.expire(now) {
              session.deliver_error(&token, Error::BlockwiseTimeout);
            }
          },
        }
      }
    });
  }

  pub(crate) fn spawn_keepalive(&self, interval: Duration) {
    let weak = self.weak.clone();
    let mut closed = self.closed.subscribe();

    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = closed.changed() => return,
          _ = tokio::time::sleep(interval) => {
            let Some(session) = weak.upgrade() else { return };
            if let Err(e) = session.ping().await {
              log::warn!("keep-alive to {} failed: {e}", session.peer());
              session.close();
              return;
            }
          },
        }
      }
    });
  }

  fn emit_error(&self, err: Error) {
    (self.errors)(&err);
  }

  /// Deliver an exchange-scoped error exactly once: to the waiter if
  /// there is one, the observer if there is one, the sink otherwise.
  fn deliver_error(&self, token: &Token, err: Error) {
    if self.pending.complete(token, Err(err)) {
      self.blockwise.abandon(token);
      return;
    }

    if self.observations.contains(token) {
      self.observations.fail(token, err);
      return;
    }

    if !token.is_empty() {
      self.emit_error(err);
    }
  }

  async fn transmit(&self, bytes: &[u8]) -> Result<(), Error> {
    self.sock
        .send_to(bytes, self.peer)
        .await
        .map(|_| ())
        .map_err(|e| {
          log::warn!("send to {} failed: {e}", self.peer);
          Error::TransportClosed
        })
  }

  async fn transmit_msg(&self, msg: &Message) -> Result<(), Error> {
    let bytes = msg.try_into_bytes()?;
    self.transmit(&bytes).await
  }

  /// Send a confirmable message and keep retransmitting it until the
  /// peer acknowledges, the attempts run out, or the session closes.
  ///
  /// The returned channel resolves when the acknowledgement layer is
  /// done with the message; exchange-level completion arrives through
  /// the pending-request table instead.
  pub(crate) async fn send_reliable(&self,
                                    msg: &Message)
                                    -> Result<oneshot::Receiver<Result<AckKind, Error>>, Error> {
    let bytes = msg.try_into_bytes().map_err(Error::from)?;
    let Some(session) = self.weak.upgrade() else {
      return Err(Error::Cancelled);
    };

    // NSTART: only so many unacked messages may be in flight per peer
    let permit = {
      let mut closed = self.closed.subscribe();
      if self.is_closed() {
        return Err(Error::Cancelled);
      }
      tokio::select! {
        _ = closed.changed() => return Err(Error::Cancelled),
        permit = Arc::clone(&self.nstart).acquire_owned() => {
          permit.map_err(|_| Error::Cancelled)?
        },
      }
    };

    let (resolve_tx, mut resolve_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    self.retrans
        .lock()
        .expect("retrans lock")
        .insert(msg.id,
                Retransmit { token: msg.token,
                             resolve: resolve_tx });

    if let Err(e) = self.transmit(&bytes).await {
      self.retrans.lock().expect("retrans lock").remove(&msg.id);
      return Err(e);
    }

    let (id, token) = (msg.id, msg.token);
    let mut timer = RetryTimer::new(self.cfg.con_retry_strategy(), self.cfg.max_retransmits());
    let mut closed = self.closed.subscribe();

    tokio::spawn(async move {
      let _permit = permit;

      loop {
        tokio::select! {
          kind = &mut resolve_rx => {
            // an ACK or RST claimed our id; the inbound path already
            // routed any consequences by token
            let _ = done_tx.send(kind.map_err(|_| Error::Cancelled));
            return;
          },
          _ = closed.changed() => {
            session.retrans.lock().expect("retrans lock").remove(&id);
            let _ = done_tx.send(Err(Error::Cancelled));
            return;
          },
          _ = tokio::time::sleep(timer.next_timeout()) => match timer.what_should_i_do() {
            | YouShould::Retry => {
              log::debug!("retransmitting id {} to {}", id.0, session.peer);
              if session.transmit(&bytes).await.is_err() {
                session.retrans.lock().expect("retrans lock").remove(&id);
                session.deliver_error(&token, Error::TransportClosed);
                let _ = done_tx.send(Err(Error::TransportClosed));
                return;
              }
            },
            | YouShould::Cry => {
              session.retrans.lock().expect("retrans lock").remove(&id);
              session.blockwise.abandon(&token);
              session.deliver_error(&token, Error::RetransmitExhausted);
              let _ = done_tx.send(Err(Error::RetransmitExhausted));
              return;
            },
          },
        }
      }
    });

    Ok(done_rx)
  }

  /// Open an exchange: register the request under its token, put its
  /// first datagram on the wire, and hand back the channel the final
  /// response arrives on.
  pub(crate) async fn send_request(&self,
                                   mut req: Message)
                                   -> Result<oneshot::Receiver<Result<Message, Error>>, Error> {
    if req.token.is_empty() {
      req.token = ids::random_token(8);
    }
    req.id = self.mids.next();

    let (sink, rx) = oneshot::channel();
    self.pending.insert(req.token,
                        PendingRequest { req: req.clone(),
                                         sink })?;

    let token = req.token;
    let wire = match self.blockwise.outbound_request(req, Instant::now()) {
      | Ok(wire) => wire,
      | Err(e) => {
        self.pending.take(&token);
        return Err(e);
      },
    };

    let sent = match wire.ty {
      | Type::Con => self.send_reliable(&wire).await.map(|_| ()),
      | _ => self.transmit_msg(&wire).await,
    };

    if let Err(e) = sent {
      self.pending.take(&token);
      self.blockwise.abandon(&token);
      return Err(e);
    }

    Ok(rx)
  }

  /// Send a request and wait for its final (reassembled) response.
  pub async fn request(&self, req: Message) -> Result<Message, Error> {
    let rx = self.send_request(req).await?;
    rx.await.map_err(|_| Error::Cancelled)?
  }

  /// CoAP ping: an empty confirmable message the peer must answer
  /// with a reset. Resolves once liveness is proven.
  pub async fn ping(&self) -> Result<(), Error> {
    let msg = Message::ping(self.mids.next());
    let done = self.send_reliable(&msg).await?;

    match done.await {
      | Ok(Ok(_)) => Ok(()),
      | Ok(Err(e)) => Err(e),
      | Err(_) => Err(Error::Cancelled),
    }
  }

  /// Abandon the exchange under `token` (nobody is waiting anymore).
  pub(crate) fn cancel_request(&self, token: &Token) {
    if self.pending.take(token).is_some() {
      self.blockwise.abandon(token);
    }
  }

  pub(crate) fn observe_register(&self, token: Token, callback: ObserveCallback) -> Result<(), Error> {
    self.observations.register(token, callback)
  }

  pub(crate) fn observe_deregister(&self, token: &Token) -> bool {
    self.observations.deregister(token)
  }

  /// Inbound entry point; the dispatcher calls this with every
  /// datagram the peer sends us.
  pub(crate) async fn process(&self, dgram: Addrd<Vec<u8>>) {
    match Message::try_from_bytes(dgram.data()) {
      | Ok(msg) => self.dispatch(msg).await,
      | Err(e) => self.reject_garbage(dgram.data(), e.into()).await,
    }
  }

  /// Garbage to a confirmable message gets a reset with the same id;
  /// garbage to anything else is dropped.
  async fn reject_garbage(&self, bytes: &[u8], err: Error) {
    self.emit_error(err);

    let confirmable = bytes.len() >= 4 && (bytes[0] >> 4) & 0b11 == 0;
    if confirmable {
      let id = Id(u16::from_be_bytes([bytes[2], bytes[3]]));
      let rst = Message::new(Type::Reset, Code::EMPTY, id, Token::EMPTY);
      let _ = self.transmit_msg(&rst).await;
    }
  }

  async fn dispatch(&self, msg: Message) {
    log::trace!("{} -> {:?} {} id {} tkl {}",
                self.peer,
                msg.ty,
                msg.code,
                msg.id.0,
                msg.token.as_bytes().len());

    match msg.ty {
      | Type::Ack | Type::Reset => self.on_ack_or_reset(msg).await,
      | Type::Con | Type::Non => match msg.code.kind() {
        | CodeKind::Empty if msg.ty == Type::Con => self.pong(&msg).await,
        | CodeKind::Empty => {},
        | CodeKind::Request => self.on_request(msg).await,
        | CodeKind::Response => self.on_response(msg).await,
      },
    }
  }

  /// Empty CON is a ping; answer with the matching reset.
  async fn pong(&self, ping: &Message) {
    let mut pong = self.pool.acquire();
    pong.ty = Type::Reset;
    pong.id = ping.id;

    if let Err(e) = self.transmit_msg(&pong).await {
      self.emit_error(e);
    }
    self.pool.release(pong);
  }

  async fn on_ack_or_reset(&self, msg: Message) {
    let entry = self.retrans.lock().expect("retrans lock").remove(&msg.id);

    if let Some(entry) = entry {
      let kind = match msg.ty {
        | Type::Reset => AckKind::Reset,
        | _ => AckKind::Acked,
      };
      let _ = entry.resolve.send(kind);

      if kind == AckKind::Reset {
        self.blockwise.abandon(&entry.token);
        if !entry.token.is_empty() {
          self.deliver_error(&entry.token, Error::PeerReset);
        }
      }
    }

    // a piggybacked response rides the ACK itself
    if msg.ty == Type::Ack && msg.code.kind() == CodeKind::Response {
      self.on_response(msg).await;
    }
  }

  async fn on_response(&self, msg: Message) {
    // confirmable responses are acknowledged and deduplicated like
    // any other confirmable traffic
    if msg.ty == Type::Con {
      let seen = self.dedup.lock().expect("dedup lock").check(msg.id, Instant::now());
      match seen {
        | Seen::Replay(bytes) => {
          let _ = self.transmit(&bytes).await;
          return;
        },
        | Seen::InProgress => return,
        | Seen::New => self.send_ack(msg.id).await,
      }
    }

    let token = msg.token;
    let original = self.pending.request(&token);

    match self.blockwise.on_response(msg, original.as_ref(), Instant::now()) {
      | Err(e) => self.deliver_error(&token, e),
      | Ok(BlockOutcome::Continue(mut next)) => {
        next.id = self.mids.next();
        let sent = match next.ty {
          | Type::Con => self.send_reliable(&next).await.map(|_| ()),
          | _ => self.transmit_msg(&next).await,
        };
        if let Err(e) = sent {
          self.deliver_error(&token, e);
        }
      },
      | Ok(BlockOutcome::Complete(msg)) | Ok(BlockOutcome::PassThrough(msg)) => {
        self.deliver_response(msg).await;
      },
    }
  }

  async fn deliver_response(&self, msg: Message) {
    let token = msg.token;
    let observed = self.observations.contains(&token);

    if observed && msg.observe().is_some() {
      // notification; the first one may also be answering the
      // register request itself
      if self.pending.contains(&token) {
        let _ = self.pending.complete(&token, Ok(msg.clone()));
      }
      self.observations.notify(&token, msg, Instant::now());
      return;
    }

    if self.pending.complete(&token, Ok(msg.clone())) {
      return;
    }

    if observed {
      // no Observe option (or a terminal error): the observation ends
      self.observations.notify(&token, msg, Instant::now());
      return;
    }

    log::debug!("dropping response with unknown token from {}", self.peer);
  }

  /// Emit an empty acknowledgement and remember its bytes for
  /// duplicate replay.
  async fn send_ack(&self, id: Id) {
    let mut ack = self.pool.acquire();
    ack.ty = Type::Ack;
    ack.id = id;

    match (&ack).try_into_bytes() {
      | Ok(bytes) => {
        self.dedup.lock().expect("dedup lock").record(id, bytes.clone());
        let _ = self.transmit(&bytes).await;
      },
      | Err(e) => self.emit_error(e.into()),
    }
    self.pool.release(ack);
  }

  async fn on_request(&self, msg: Message) {
    let now = Instant::now();
    let confirmable = msg.ty == Type::Con;

    let seen = self.dedup.lock().expect("dedup lock").check(msg.id, now);
    match seen {
      | Seen::Replay(bytes) if confirmable => {
        log::debug!("duplicate id {} from {}; replaying", msg.id.0, self.peer);
        let _ = self.transmit(&bytes).await;
        return;
      },
      | Seen::Replay(_) | Seen::InProgress => return,
      | Seen::New => {},
    }

    let (req_id, req_token) = (msg.id, msg.token);

    match self.blockwise.on_request(msg, now) {
      | Err(e) => {
        let code = match e {
          | Error::PayloadTooLarge => Code::REQUEST_ENTITY_TOO_LARGE,
          | _ => Code::REQUEST_ENTITY_INCOMPLETE,
        };
        let ty = if confirmable { Type::Ack } else { Type::Non };
        let mut reply = Message::new(ty, code, req_id, req_token);
        if !confirmable {
          reply.id = self.mids.next();
        }
        self.send_recorded(req_id, &reply, confirmable).await;
        self.emit_error(e);
      },
      | Ok(BlockOutcome::Continue(mut reply)) => {
        // the engine answered for us (2.31 Continue or a served
        // window); non-confirmable replies need their own id
        if reply.ty != Type::Ack {
          reply.id = self.mids.next();
        }
        self.send_recorded(req_id, &reply, confirmable).await;
      },
      | Ok(BlockOutcome::Complete(req)) | Ok(BlockOutcome::PassThrough(req)) => {
        self.dispatch_request(req);
      },
    }
  }

  /// Transmit a reply and (for confirmable exchanges) remember its
  /// bytes so duplicates replay it.
  async fn send_recorded(&self, req_id: Id, reply: &Message, confirmable: bool) {
    match reply.try_into_bytes() {
      | Ok(bytes) => {
        if confirmable {
          self.dedup.lock().expect("dedup lock").record(req_id, bytes.clone());
        }
        let _ = self.transmit(&bytes).await;
      },
      | Err(e) => self.emit_error(e.into()),
    }
  }

  /// Hand a (fully reassembled) request to the application and see
  /// its answer onto the wire.
  fn dispatch_request(&self, req: Message) {
    let (tx, rx) = oneshot::channel();
    let writer = ResponseWriter::new(&req, tx);

    (self.spawner)(self.handler.handle(writer, Addrd(req.clone(), self.peer)));

    let Some(session) = self.weak.upgrade() else { return };
    tokio::spawn(async move {
      session.respond_flow(req, rx).await;
    });
  }

  async fn respond_flow(self: Arc<Self>, req: Message, mut rx: oneshot::Receiver<Option<Message>>) {
    let confirmable = req.ty == Type::Con;
    let mut acked = false;

    // give the handler a beat to let the response ride the ACK
    let resp = match tokio::time::timeout(PIGGYBACK_WINDOW, &mut rx).await {
      | Ok(resp) => resp.unwrap_or(None),
      | Err(_) => {
        if confirmable {
          self.send_ack(req.id).await;
          acked = true;
        }
        (&mut rx).await.unwrap_or(None)
      },
    };

    let Some(resp) = resp else {
      // the handler chose silence; confirmable requests still need
      // their acknowledgement
      if confirmable && !acked {
        self.send_ack(req.id).await;
      }
      return;
    };

    if let Some(suppress) = req.no_response() {
      if suppress.suppresses(resp.code) {
        log::debug!("response {} to {} suppressed by No-Response", resp.code, self.peer);
        if confirmable && !acked {
          self.send_ack(req.id).await;
        }
        return;
      }
    }

    let mut wire = self.blockwise.outbound_response(resp, &req, Instant::now());
    wire.token = req.token;

    if confirmable && !acked {
      // piggyback on the ACK
      wire.ty = Type::Ack;
      wire.id = req.id;
      self.send_recorded(req.id, &wire, true).await;
      return;
    }

    // separate response: its own exchange at the message layer
    wire.id = self.mids.next();
    wire.ty = if confirmable { Type::Con } else { Type::Non };

    let sent = match wire.ty {
      | Type::Con => self.send_reliable(&wire).await.map(|_| ()),
      | _ => self.transmit_msg(&wire).await,
    };
    if let Err(e) = sent {
      self.emit_error(e);
    }
  }
}
