use croak::{Client, Config};

#[tokio::main]
async fn main() {
  simple_logger::init_with_env().unwrap();

  let client = Client::dial("127.0.0.1:5683", Config::default()).await.unwrap();

  let resp = client.get("hello").await.unwrap();
  log::info!("{} {:?}",
             resp.code,
             String::from_utf8_lossy(resp.payload_bytes()));
}
