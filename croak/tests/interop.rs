use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use croak::known::no_response::NoResponse;
use croak::{Addrd, Client, Code, Config, Error, Id, Message, ResponseWriter, Server, Token,
            TryFromBytes, TryIntoBytes, Type};
use tokio::net::UdpSocket;

async fn spawn_server(server: Server) -> (SocketAddr, Arc<Server>) {
  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let addr = sock.local_addr().unwrap();

  let server = Arc::new(server);
  let serving = Arc::clone(&server);
  tokio::spawn(async move {
    let _ = serving.serve(sock).await;
  });

  (addr, server)
}

fn hello_server(cfg: Config) -> Server {
  Server::new(cfg).handler(|mut w: ResponseWriter, req: Addrd<Message>| {
                    async move {
                      match req.data().path().as_str() {
                        | "a" => w.set_response(Code::CONTENT, b"hello".to_vec()),
                        | _ => w.set_response(Code::NOT_FOUND, Vec::new()),
                      }
                    }
                  })
}

#[tokio::test]
async fn get_with_piggybacked_response() {
  let (addr, server) = spawn_server(hello_server(Config::default())).await;

  // a raw exchange so every wire detail is visible
  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let mut req = Message::new(Type::Con,
                             Code::GET,
                             Id(0x1234),
                             Token::from_slice(&[0x01]).unwrap());
  req.set_path("a");
  sock.send_to(&req.try_into_bytes().unwrap(), addr).await.unwrap();

  let mut buf = [0u8; 1500];
  let (n, _) = tokio::time::timeout(Duration::from_secs(2), sock.recv_from(&mut buf)).await
                                                                                     .unwrap()
                                                                                     .unwrap();
  let resp = Message::try_from_bytes(&buf[..n]).unwrap();

  assert_eq!(resp.ty, Type::Ack);
  assert_eq!(resp.id, Id(0x1234));
  assert_eq!(resp.token, Token::from_slice(&[0x01]).unwrap());
  assert_eq!(resp.code, Code::CONTENT);
  assert_eq!(resp.payload_bytes(), b"hello");

  server.stop();
}

#[tokio::test]
async fn client_verbs_against_server() {
  let (addr, server) = spawn_server(hello_server(Config::default())).await;

  let client = Client::dial(addr, Config::default()).await.unwrap();

  let resp = client.get("a").await.unwrap();
  assert_eq!(resp.code, Code::CONTENT);
  assert_eq!(resp.payload_bytes(), b"hello");

  let resp = client.get("nope").await.unwrap();
  assert_eq!(resp.code, Code::NOT_FOUND);

  client.ping().await.unwrap();

  server.stop();
}

#[tokio::test]
async fn duplicate_con_runs_handler_once_and_replays_ack() {
  let handled = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&handled);

  let server =
    Server::new(Config::default()).handler(move |mut w: ResponseWriter, _req: Addrd<Message>| {
                                    let counter = Arc::clone(&counter);
                                    async move {
                                      counter.fetch_add(1, Ordering::SeqCst);
                                      w.set_response(Code::CONTENT, b"once".to_vec());
                                    }
                                  });
  let (addr, server) = spawn_server(server).await;

  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let mut req = Message::new(Type::Con,
                             Code::GET,
                             Id(0x5555),
                             Token::from_slice(&[7]).unwrap());
  req.set_path("whatever");
  let wire = req.try_into_bytes().unwrap();

  let mut acks = Vec::new();
  for _ in 0..2 {
    sock.send_to(&wire, addr).await.unwrap();

    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), sock.recv_from(&mut buf)).await
                                                                                       .unwrap()
                                                                                       .unwrap();
    acks.push(buf[..n].to_vec());

    tokio::time::sleep(Duration::from_millis(500)).await;
  }

  assert_eq!(handled.load(Ordering::SeqCst), 1);
  assert_eq!(acks[0], acks[1]);

  server.stop();
}

#[tokio::test]
async fn con_retransmits_until_acked() {
  // a "server" that drops the first three transmissions
  let sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
  let addr = sock.local_addr().unwrap();

  let cfg = Config { transmission_ack_timeout: Duration::from_millis(100),
                     ..Config::default() };
  let client = Client::dial(addr, cfg).await.unwrap();

  let lossy = Arc::clone(&sock);
  let observed = tokio::spawn(async move {
    let mut seen: Vec<(Vec<u8>, Instant)> = Vec::new();
    let mut buf = [0u8; 1500];

    loop {
      let (n, from) = lossy.recv_from(&mut buf).await.unwrap();
      seen.push((buf[..n].to_vec(), Instant::now()));

      if seen.len() == 4 {
        let req = Message::try_from_bytes(&buf[..n]).unwrap();
        let mut resp = Message::new(Type::Ack, Code::CONTENT, req.id, req.token);
        resp.payload.0 = b"finally".to_vec();
        lossy.send_to(&resp.try_into_bytes().unwrap(), from).await.unwrap();
        return seen;
      }
    }
  });

  let resp = tokio::time::timeout(Duration::from_secs(5), client.get("slow")).await
                                                                             .unwrap()
                                                                             .unwrap();
  assert_eq!(resp.payload_bytes(), b"finally");

  let seen = observed.await.unwrap();
  assert_eq!(seen.len(), 4);
  assert!(seen.iter().all(|(bytes, _)| *bytes == seen[0].0),
          "every retransmission must be byte-identical");

  let intervals: Vec<Duration> = seen.windows(2)
                                     .map(|pair| pair[1].1.duration_since(pair[0].1))
                                     .collect();
  // jittered exponential backoff: each interval roughly doubles
  for pair in intervals.windows(2) {
    assert!(pair[1] > pair[0] * 3 / 2,
            "intervals should grow: {intervals:?}");
    assert!(pair[1] < pair[0] * 4, "intervals grew too fast: {intervals:?}");
  }
}

#[tokio::test]
async fn blockwise_get_reassembles_the_response() {
  let body: Vec<u8> = (0..200u16).map(|n| n as u8).collect();
  let served = body.clone();

  let cfg = Config { blockwise_szx: 2, // 64-byte blocks
                     ..Config::default() };
  let server =
    Server::new(cfg).handler(move |mut w: ResponseWriter, _req: Addrd<Message>| {
                      let body = served.clone();
                      async move {
                        w.set_response(Code::CONTENT, body);
                      }
                    });
  let (addr, server) = spawn_server(server).await;

  let client = Client::dial(addr, cfg).await.unwrap();
  let resp = tokio::time::timeout(Duration::from_secs(5), client.get("big")).await
                                                                            .unwrap()
                                                                            .unwrap();

  assert_eq!(resp.code, Code::CONTENT);
  assert_eq!(resp.payload_bytes(), &body[..]);
  assert!(resp.block2().is_none(), "descriptor must not leak out");

  server.stop();
}

#[tokio::test]
async fn blockwise_post_uploads_the_request_body() {
  let got = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&got);

  let cfg = Config { blockwise_szx: 2,
                     ..Config::default() };
  let server =
    Server::new(cfg).handler(move |mut w: ResponseWriter, req: Addrd<Message>| {
                      let sink = Arc::clone(&sink);
                      async move {
                        *sink.lock().unwrap() = req.data().payload_bytes().to_vec();
                        w.set_response(Code::CHANGED, Vec::new());
                      }
                    });
  let (addr, server) = spawn_server(server).await;

  let body: Vec<u8> = (0..150u16).map(|n| n as u8).collect();
  let client = Client::dial(addr, cfg).await.unwrap();
  let resp = tokio::time::timeout(Duration::from_secs(5), client.post("upload", body.clone()))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(resp.code, Code::CHANGED);
  assert_eq!(*got.lock().unwrap(), body);

  server.stop();
}

#[tokio::test]
async fn observe_delivers_in_modulo_order() {
  let fake_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let addr = fake_server.local_addr().unwrap();

  let client = Client::dial(addr, Config::default()).await.unwrap();

  let delivered = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&delivered);

  let observing = {
    let client = &client;
    client.observe("seq",
                   Arc::new(move |resp: Result<Message, Error>| {
                     if let Ok(resp) = resp {
                       sink.lock().unwrap().push(resp.payload_bytes().to_vec());
                     }
                   }))
  };

  let pushing = async {
    let mut buf = [0u8; 1500];
    let (n, from) = fake_server.recv_from(&mut buf).await.unwrap();
    let req = Message::try_from_bytes(&buf[..n]).unwrap();
    assert_eq!(req.observe(), Some(0));

    // initial notification rides the ACK; the rest arrive as NONs
    // with sequence numbers that wrap the 24-bit space
    let notify = |seq: u32, body: &[u8], ty: Type, id: Id| {
      let mut msg = Message::new(ty, Code::CONTENT, id, req.token);
      msg.set_observe_seq(seq);
      msg.payload.0 = body.to_vec();
      msg.try_into_bytes().unwrap()
    };

    let first = notify(16_777_200, b"n0", Type::Ack, req.id);
    fake_server.send_to(&first, from).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (seq, body) in [(16_777_210u32, b"n1"), (5u32, b"n2"), (16_777_205u32, b"xx")] {
      fake_server.send_to(&notify(seq, body, Type::Non, Id(seq as u16)), from).await.unwrap();
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
  };

  let (observation, _) = tokio::join!(observing, pushing);
  observation.unwrap();

  tokio::time::sleep(Duration::from_millis(100)).await;

  // the wrapped 5 is newer than 16_777_210; the late 16_777_205 is
  // on the stale side of the window and never delivered
  assert_eq!(*delivered.lock().unwrap(),
             vec![b"n0".to_vec(), b"n1".to_vec(), b"n2".to_vec()]);
}

#[tokio::test]
async fn no_response_suppresses_the_success_class() {
  let handled = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&handled);

  let server =
    Server::new(Config::default()).handler(move |mut w: ResponseWriter, _req: Addrd<Message>| {
                                    let counter = Arc::clone(&counter);
                                    async move {
                                      counter.fetch_add(1, Ordering::SeqCst);
                                      w.set_response(Code::CHANGED, Vec::new());
                                    }
                                  });
  let (addr, server) = spawn_server(server).await;

  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let mut req = Message::new(Type::Con,
                             Code::POST,
                             Id(0x0042),
                             Token::from_slice(&[9]).unwrap());
  req.set_path("fire-and-forget");
  req.set_no_response(NoResponse::SUCCESS);
  sock.send_to(&req.try_into_bytes().unwrap(), addr).await.unwrap();

  // the CON still gets its (empty) acknowledgement
  let mut buf = [0u8; 1500];
  let (n, _) = tokio::time::timeout(Duration::from_secs(2), sock.recv_from(&mut buf)).await
                                                                                     .unwrap()
                                                                                     .unwrap();
  let ack = Message::try_from_bytes(&buf[..n]).unwrap();
  assert_eq!(ack.ty, Type::Ack);
  assert_eq!(ack.id, Id(0x0042));
  assert_eq!(ack.code, Code::EMPTY);

  // ...but the 2.04 is withheld
  let silence =
    tokio::time::timeout(Duration::from_millis(400), sock.recv_from(&mut buf)).await;
  assert!(silence.is_err(), "suppressed response leaked onto the wire");
  assert_eq!(handled.load(Ordering::SeqCst), 1);

  server.stop();
}

#[tokio::test]
async fn malformed_con_gets_a_reset() {
  let (addr, server) = spawn_server(hello_server(Config::default())).await;

  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

  // version 2 in a confirmable header; undecodable but addressable
  let garbage = [0x80u8, 0x01, 0x0B, 0xAD];
  sock.send_to(&garbage, addr).await.unwrap();

  let mut buf = [0u8; 1500];
  let (n, _) = tokio::time::timeout(Duration::from_secs(2), sock.recv_from(&mut buf)).await
                                                                                     .unwrap()
                                                                                     .unwrap();
  let rst = Message::try_from_bytes(&buf[..n]).unwrap();
  assert_eq!(rst.ty, Type::Reset);
  assert_eq!(rst.id, Id(0x0BAD));
  assert_eq!(rst.code, Code::EMPTY);

  // the same garbage as a non-confirmable is dropped in silence
  let garbage = [0x90u8, 0x01, 0x0B, 0xAE];
  sock.send_to(&garbage, addr).await.unwrap();
  let silence =
    tokio::time::timeout(Duration::from_millis(300), sock.recv_from(&mut buf)).await;
  assert!(silence.is_err());

  server.stop();
}

#[tokio::test]
async fn serve_is_single_shot() {
  let server = Server::new(Config::default());
  let server = Arc::new(server);

  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let serving = Arc::clone(&server);
  let first = tokio::spawn(async move { serving.serve(sock).await });

  tokio::time::sleep(Duration::from_millis(50)).await;
  server.stop();
  assert_eq!(first.await.unwrap(), Ok(()));

  let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  assert_eq!(server.serve(sock).await, Err(Error::TransportClosed));
}

#[tokio::test]
async fn closed_session_cancels_waiters() {
  let fake_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let addr = fake_server.local_addr().unwrap();

  let cfg = Config { transmission_ack_timeout: Duration::from_secs(10),
                     ..Config::default() };
  let client = Arc::new(Client::dial(addr, cfg).await.unwrap());

  let requesting = {
    let client = Arc::clone(&client);
    tokio::spawn(async move { client.get("never").await })
  };

  tokio::time::sleep(Duration::from_millis(100)).await;
  client.close();

  assert_eq!(requesting.await.unwrap(), Err(Error::Cancelled));
}
