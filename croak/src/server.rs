use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::Error;
use crate::handler::{self, ErrorSink, Handler, HandlerFuture, Spawner};
use crate::net::Addrd;
use crate::session::Session;

/// Called once per previously unseen peer, before its first message
/// is processed
pub type NewPeerCallback = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

type SessionTable = Arc<Mutex<HashMap<SocketAddr, Arc<Session>>>>;

/// A CoAP server over one datagram socket.
///
/// The serve loop reads datagrams, finds (or creates) the
/// [`Session`] for the source address, and hands the bytes over; all
/// protocol behavior lives in the sessions. One server serves once:
/// after [`Server::stop`] the object is spent.
///
/// ```no_run
/// use croak::{Addrd, Code, Config, Message, ResponseWriter, Server};
///
/// # async fn run() -> Result<(), croak::Error> {
/// let server =
///   Server::new(Config::default()).handler(|mut w: ResponseWriter, _req: Addrd<Message>| {
///                                   async move {
///                                     w.set_response(Code::CONTENT, b"hi".to_vec());
///                                   }
///                                 });
///
/// let sock = tokio::net::UdpSocket::bind("0.0.0.0:5683").await.unwrap();
/// server.serve(sock).await
/// # }
/// ```
pub struct Server {
  cfg: Config,
  handler: Arc<dyn Handler>,
  on_new_peer: NewPeerCallback,
  errors: ErrorSink,
  spawner: Spawner,
  sessions: SessionTable,
  started: Mutex<bool>,
  closed: watch::Sender<bool>,
}

impl core::fmt::Debug for Server {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Server")
     .field("cfg", &self.cfg)
     .field("closed", &*self.closed.borrow())
     .finish_non_exhaustive()
  }
}

impl Server {
  /// A server that 4.04s everything until given a [`Server::handler`]
  pub fn new(cfg: Config) -> Self {
    let (closed, _) = watch::channel(false);

    Self { cfg,
           handler: handler::not_found(),
           on_new_peer: Arc::new(|_| {}),
           errors: handler::default_error_sink(),
           spawner: handler::default_spawner(),
           sessions: Arc::new(Mutex::new(HashMap::new())),
           started: Mutex::new(false),
           closed }
  }

  /// Use `handler` for every inbound request
  pub fn handler(mut self, handler: impl Handler) -> Self {
    self.handler = Arc::new(handler);
    self
  }

  /// Run `f` once per newly seen peer
  pub fn on_new_peer(mut self, f: impl Fn(&Arc<Session>) + Send + Sync + 'static) -> Self {
    self.on_new_peer = Arc::new(f);
    self
  }

  /// Deliver waiter-less errors to `f` instead of the log
  pub fn error_sink(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
    self.errors = Arc::new(f);
    self
  }

  /// Run handler futures through `f` (e.g. a bounded worker pool)
  /// instead of spawning a task per request
  pub fn worker_pool(mut self, f: impl Fn(HandlerFuture) + Send + Sync + 'static) -> Self {
    self.spawner = Arc::new(f);
    self
  }

  /// Serve `sock` until [`Server::stop`] or a fatal socket error.
  ///
  /// Single-shot: a second call (even after a clean stop) fails with
  /// [`Error::TransportClosed`].
  pub async fn serve(&self, sock: UdpSocket) -> Result<(), Error> {
    {
      let mut started = self.started.lock().expect("server lock");
      if *started || *self.closed.borrow() {
        return Err(Error::TransportClosed);
      }
      *started = true;
    }

    log::info!("serving coap on {:?}", sock.local_addr().ok());

    let sock = Arc::new(sock);
    let mut closed = self.closed.subscribe();
    let mut buf = vec![0u8; self.cfg.max_message_size];

    let result = loop {
      tokio::select! {
        _ = closed.changed() => break Ok(()),
        recvd = sock.recv_from(&mut buf) => match recvd {
          | Err(e) => {
            log::warn!("socket read failed: {e}");
            break Err(Error::TransportClosed);
          },
          | Ok((n, peer)) => {
            let session = self.session_for(peer, &sock);
            session.process(Addrd(buf[..n].to_vec(), peer)).await;
          },
        },
      }
    };

    self.close_sessions();
    result
  }

  /// Signal shutdown; in-flight exchanges are cancelled.
  pub fn stop(&self) {
    let _ = self.closed.send_replace(true);
    self.close_sessions();
  }

  /// The session currently talking to `peer`, if any
  pub fn session(&self, peer: SocketAddr) -> Option<Arc<Session>> {
    self.sessions.lock().expect("session table lock").get(&peer).cloned()
  }

  fn session_for(&self, peer: SocketAddr, sock: &Arc<UdpSocket>) -> Arc<Session> {
    let created = {
      let mut sessions = self.sessions.lock().expect("session table lock");
      match sessions.get(&peer) {
        | Some(session) => return Arc::clone(session),
        | None => {
          let session = Session::new(peer,
                                     Arc::clone(sock),
                                     self.cfg,
                                     Arc::clone(&self.handler),
                                     Arc::clone(&self.spawner),
                                     Arc::clone(&self.errors));
          sessions.insert(peer, Arc::clone(&session));
          session
        },
      }
    };

    log::debug!("new peer {peer}");
    (self.on_new_peer)(&created);

    if !self.cfg.keepalive_interval.is_zero() {
      created.spawn_keepalive(self.cfg.keepalive_interval);
    }

    Self::evict_on_close(&created, Arc::downgrade(&self.sessions), peer);
    created
  }

  /// Drop the table entry once its session dies, so a closed peer
  /// can come back as a fresh session. Holds only weak references;
  /// the evictor never keeps a dead server alive.
  fn evict_on_close(session: &Arc<Session>, table: Weak<Mutex<HashMap<SocketAddr, Arc<Session>>>>, peer: SocketAddr) {
    let session = Arc::downgrade(session);

    tokio::spawn(async move {
      {
        let Some(session) = session.upgrade() else { return };
        session.closed().await;
      }

      if let Some(table) = table.upgrade() {
        table.lock().expect("session table lock").remove(&peer);
      }
    });
  }

  fn close_sessions(&self) {
    let drained: Vec<Arc<Session>> = {
      let mut sessions = self.sessions.lock().expect("session table lock");
      sessions.drain().map(|(_, s)| s).collect()
    };

    for session in drained {
      session.close();
    }
  }
}
