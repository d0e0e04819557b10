use croak::{Addrd, Code, Config, Message, ResponseWriter, Server};

#[tokio::main]
async fn main() {
  simple_logger::init_with_env().unwrap();

  let server = Server::new(Config::default())
    .handler(|mut w: ResponseWriter, req: Addrd<Message>| async move {
      log::info!("{} {} from {}", req.data().code, req.data().path(), req.addr());

      match req.data().path().as_str() {
        | "hello" => w.set_response(Code::CONTENT, b"hi there!".to_vec()),
        | _ => w.set_response(Code::NOT_FOUND, Vec::new()),
      }
    })
    .on_new_peer(|session| log::info!("new peer {}", session.peer()));

  let sock = tokio::net::UdpSocket::bind("0.0.0.0:5683").await.unwrap();
  server.serve(sock).await.unwrap();
}
