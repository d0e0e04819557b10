use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use croak_msg::{Code, Id, Message, Type};
use tokio::sync::oneshot;

use crate::error::Error;
use crate::net::Addrd;

/// Boxed unit of handler work, ready to be spawned somewhere
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Decides where handler futures run.
///
/// The default spawns a fresh task per request; a bounded worker pool
/// can be slotted in by handing the future to something that queues.
pub type Spawner = Arc<dyn Fn(HandlerFuture) + Send + Sync>;

/// Receives every error that had no exchange waiting to hear it
pub type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

pub(crate) fn default_spawner() -> Spawner {
  Arc::new(|fut| {
    tokio::spawn(fut);
  })
}

pub(crate) fn default_error_sink() -> ErrorSink {
  Arc::new(|err| log::error!("{err}"))
}

/// The single capability a server needs from application code:
/// given a place to write the response and a decoded request,
/// produce zero or one response.
///
/// Plain `async fn`-shaped closures implement this; middleware
/// composes by wrapping one `Handler` in another.
pub trait Handler: Send + Sync + 'static {
  /// Answer `req`, responding (or deliberately not) through `w`
  fn handle(&self, w: ResponseWriter, req: Addrd<Message>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
  where F: Fn(ResponseWriter, Addrd<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
  fn handle(&self, w: ResponseWriter, req: Addrd<Message>) -> HandlerFuture {
    Box::pin(self(w, req))
  }
}

/// Answers every request with 4.04 Not Found; what a server does
/// until it is given something better.
pub(crate) fn not_found() -> Arc<dyn Handler> {
  Arc::new(|mut w: ResponseWriter, _req: Addrd<Message>| async move {
    w.set_response(Code::NOT_FOUND, Vec::new());
  })
}

/// Where a handler writes its answer.
///
/// Populate it with [`ResponseWriter::set_response`] (or poke at
/// [`ResponseWriter::msg_mut`] for full control) and just return;
/// leaving it untouched means "this request gets no response".
/// The session that issued the writer decides whether the result
/// rides piggybacked on the ACK or as a separate message.
#[derive(Debug)]
pub struct ResponseWriter {
  msg: Option<Message>,
  tx: Option<oneshot::Sender<Option<Message>>>,
}

impl ResponseWriter {
  pub(crate) fn new(req: &Message, tx: oneshot::Sender<Option<Message>>) -> Self {
    Self { msg: Some(Message::new(Type::Non, Code::EMPTY, Id(0), req.token)),
           tx: Some(tx) }
  }

  /// Set the response code and payload
  pub fn set_response(&mut self, code: Code, payload: Vec<u8>) {
    if let Some(msg) = self.msg.as_mut() {
      msg.code = code;
      msg.payload.0 = payload;
    }
  }

  /// The response under construction, options and all.
  ///
  /// The code left at 0.00 Empty means "no response"; identity
  /// fields (type, id, token) are owned by the session and overwritten
  /// at send time.
  pub fn msg_mut(&mut self) -> &mut Message {
    self.msg.as_mut().expect("writer already finished")
  }
}

impl Drop for ResponseWriter {
  fn drop(&mut self) {
    if let (Some(msg), Some(tx)) = (self.msg.take(), self.tx.take()) {
      let out = match msg.code {
        | Code::EMPTY => None,
        | _ => Some(msg),
      };
      let _ = tx.send(out);
    }
  }
}

#[cfg(test)]
mod test {
  use croak_msg::Token;

  use super::*;

  fn req() -> Message {
    Message::new(Type::Con, Code::GET, Id(1), Token::from_slice(&[1]).unwrap())
  }

  #[tokio::test]
  async fn untouched_writer_yields_no_response() {
    let (tx, rx) = oneshot::channel();
    let w = ResponseWriter::new(&req(), tx);
    drop(w);

    assert_eq!(rx.await.unwrap(), None);
  }

  #[tokio::test]
  async fn populated_writer_yields_its_message() {
    let (tx, rx) = oneshot::channel();
    let mut w = ResponseWriter::new(&req(), tx);
    w.set_response(Code::CONTENT, b"hello".to_vec());
    drop(w);

    let resp = rx.await.unwrap().unwrap();
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.payload_bytes(), b"hello");
    assert_eq!(resp.token, req().token);
  }

  #[tokio::test]
  async fn closures_are_handlers() {
    let handler: Arc<dyn Handler> = Arc::new(|mut w: ResponseWriter, req: Addrd<Message>| {
      async move {
        w.set_response(Code::CONTENT, req.data().path().into_bytes());
      }
    });

    let (tx, rx) = oneshot::channel();
    let w = ResponseWriter::new(&req(), tx);
    let mut r = req();
    r.set_path("an/answer");
    handler.handle(w, Addrd(r, "127.0.0.1:5683".parse().unwrap())).await;

    let resp = rx.await.unwrap().unwrap();
    assert_eq!(resp.payload_bytes(), b"an/answer");
  }
}
