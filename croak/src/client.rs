use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use croak_msg::known::observe::Action;
use croak_msg::{Code, Id, Message, Token, Type};
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};

use crate::config::Config;
use crate::error::Error;
use crate::handler;
use crate::ids;
use crate::net::Addrd;
use crate::observe::ObserveCallback;
use crate::session::Session;

/// A CoAP client: one [`Session`] to one peer over its own socket.
///
/// ```no_run
/// use croak::{Client, Config};
///
/// # async fn run() -> Result<(), croak::Error> {
/// let client = Client::dial("coap.example:5683", Config::default()).await?;
/// let resp = client.get("sensors/temperature").await?;
/// println!("{:?}", resp.payload_bytes());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
  session: Arc<Session>,
}

impl Client {
  /// Resolve `addr`, bind an ephemeral local socket, and start
  /// talking CoAP to it.
  ///
  /// The peer may push requests at us too; they answer 4.04 until
  /// something smarter is configured server-side.
  pub async fn dial(addr: impl ToSocketAddrs, cfg: Config) -> Result<Client, Error> {
    let peer: SocketAddr = lookup_host(addr).await
                                            .ok()
                                            .and_then(|mut addrs| addrs.next())
                                            .ok_or(Error::TransportClosed)?;

    let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let sock = UdpSocket::bind(local).await.map_err(|_| Error::TransportClosed)?;
    let sock = Arc::new(sock);

    let session = Session::new(peer,
                               Arc::clone(&sock),
                               cfg,
                               handler::not_found(),
                               handler::default_spawner(),
                               handler::default_error_sink());

    Self::spawn_reader(&session, sock, cfg.max_message_size);

    if !cfg.keepalive_interval.is_zero() {
      session.spawn_keepalive(cfg.keepalive_interval);
    }

    Ok(Client { session })
  }

  fn spawn_reader(session: &Arc<Session>, sock: Arc<UdpSocket>, buf_size: usize) {
    let weak = Arc::downgrade(session);
    let peer = session.peer();

    tokio::spawn(async move {
      let mut buf = vec![0u8; buf_size];

      loop {
        let Ok((n, from)) = sock.recv_from(&mut buf).await else {
          if let Some(session) = weak.upgrade() {
            session.close();
          }
          return;
        };

        if from != peer {
          continue;
        }

        let Some(session) = weak.upgrade() else { return };
        if session.is_closed() {
          return;
        }
        session.process(Addrd(buf[..n].to_vec(), from)).await;
      }
    });
  }

  /// The session underneath, for anything the verb methods don't say
  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  fn new_request(code: Code, path: &str) -> Message {
    let mut req = Message::new(Type::Con, code, Id(0), Token::EMPTY);
    req.set_path(path);
    req
  }

  /// GET the resource at `path`
  pub async fn get(&self, path: &str) -> Result<Message, Error> {
    self.session.request(Self::new_request(Code::GET, path)).await
  }

  /// POST `body` to the resource at `path`
  pub async fn post(&self, path: &str, body: Vec<u8>) -> Result<Message, Error> {
    let mut req = Self::new_request(Code::POST, path);
    req.payload.0 = body;
    self.session.request(req).await
  }

  /// PUT `body` to the resource at `path`
  pub async fn put(&self, path: &str, body: Vec<u8>) -> Result<Message, Error> {
    let mut req = Self::new_request(Code::PUT, path);
    req.payload.0 = body;
    self.session.request(req).await
  }

  /// DELETE the resource at `path`
  pub async fn delete(&self, path: &str) -> Result<Message, Error> {
    self.session.request(Self::new_request(Code::DELETE, path)).await
  }

  /// Send an arbitrary request and wait for its final response
  pub async fn request(&self, req: Message) -> Result<Message, Error> {
    self.session.request(req).await
  }

  /// Like [`Client::request`], giving up (and cancelling the
  /// exchange) after `deadline`.
  pub async fn request_with_deadline(&self,
                                     mut req: Message,
                                     deadline: Duration)
                                     -> Result<Message, Error> {
    if req.token.is_empty() {
      req.token = ids::random_token(8);
    }
    let token = req.token;

    match tokio::time::timeout(deadline, self.session.request(req)).await {
      | Ok(result) => result,
      | Err(_) => {
        self.session.cancel_request(&token);
        Err(Error::Cancelled)
      },
    }
  }

  /// Subscribe to `path`: a GET with Observe=0 whose token stays
  /// live, feeding every accepted notification (the initial
  /// response included) to `callback`.
  ///
  /// Cancel through the returned [`Observation`]; an error response
  /// or a peer reset ends the subscription on its own.
  pub async fn observe(&self,
                       path: &str,
                       callback: ObserveCallback)
                       -> Result<Observation, Error> {
    let token = ids::random_token(8);
    self.session.observe_register(token, Arc::clone(&callback))?;

    let mut req = Self::new_request(Code::GET, path);
    req.token = token;
    req.set_observe(Action::Register);

    let observation = Observation { token,
                                    path: path.to_string(),
                                    session: Arc::downgrade(&self.session) };

    match self.session.request(req).await {
      | Err(e) => {
        self.session.observe_deregister(&token);
        Err(e)
      },
      | Ok(resp) if resp.code.is_error() || resp.observe().is_none() => {
        // the peer answered but will not be pushing notifications
        self.session.observe_deregister(&token);
        callback(Ok(resp));
        Ok(observation)
      },
      | Ok(_) => Ok(observation),
    }
  }

  /// CoAP ping; resolves once the peer proves liveness
  pub async fn ping(&self) -> Result<(), Error> {
    self.session.ping().await
  }

  /// Tear down the session; every in-flight exchange hears
  /// `Cancelled`.
  pub fn close(&self) {
    self.session.close();
  }
}

impl Drop for Client {
  fn drop(&mut self) {
    self.session.close();
  }
}

/// Handle to a live observation; see [`Client::observe`]
#[derive(Debug, Clone)]
pub struct Observation {
  token: Token,
  path: String,
  session: Weak<Session>,
}

impl Observation {
  /// The token the subscription lives under
  pub fn token(&self) -> Token {
    self.token
  }

  /// Deregister: stop delivering notifications immediately and tell
  /// the peer with a GET Observe=1 under the same token.
  pub async fn cancel(&self) -> Result<(), Error> {
    let Some(session) = self.session.upgrade() else {
      return Ok(());
    };

    if !session.observe_deregister(&self.token) {
      // already ended some other way
      return Ok(());
    }

    let mut req = Message::new(Type::Con, Code::GET, Id(0), self.token);
    req.set_path(&self.path);
    req.set_observe(Action::Deregister);

    session.request(req).await.map(|_| ())
  }
}
