use super::{OptNumber, OptValue};
use crate::msg::Message;

/// Block descriptor packing/unpacking
pub mod block;
/// Payload media types
pub mod content_format;
/// Response suppression bitmap
pub mod no_response;
/// Register/deregister actions
pub mod observe;

pub use block::Block;
pub use content_format::ContentFormat;
pub use no_response::NoResponse;

/// If-Match
pub const IF_MATCH: OptNumber = OptNumber(1);
/// Uri-Host
pub const URI_HOST: OptNumber = OptNumber(3);
/// ETag
pub const ETAG: OptNumber = OptNumber(4);
/// If-None-Match
pub const IF_NONE_MATCH: OptNumber = OptNumber(5);
/// Observe (RFC7641)
pub const OBSERVE: OptNumber = OptNumber(6);
/// Uri-Port
pub const URI_PORT: OptNumber = OptNumber(7);
/// Location-Path
pub const LOCATION_PATH: OptNumber = OptNumber(8);
/// Uri-Path; one option per path segment
pub const URI_PATH: OptNumber = OptNumber(11);
/// Content-Format
pub const CONTENT_FORMAT: OptNumber = OptNumber(12);
/// Max-Age
pub const MAX_AGE: OptNumber = OptNumber(14);
/// Uri-Query
pub const URI_QUERY: OptNumber = OptNumber(15);
/// Accept
pub const ACCEPT: OptNumber = OptNumber(17);
/// Location-Query
pub const LOCATION_QUERY: OptNumber = OptNumber(20);
/// Block2 (RFC7959); describes a block of the response body
pub const BLOCK2: OptNumber = OptNumber(23);
/// Block1 (RFC7959); describes a block of the request body
pub const BLOCK1: OptNumber = OptNumber(27);
/// Size2; total size hint for a Block2 transfer
pub const SIZE2: OptNumber = OptNumber(28);
/// Proxy-Uri
pub const PROXY_URI: OptNumber = OptNumber(35);
/// Proxy-Scheme
pub const PROXY_SCHEME: OptNumber = OptNumber(39);
/// Size1; total size hint for a Block1 transfer
pub const SIZE1: OptNumber = OptNumber(60);
/// No-Response (RFC7967)
pub const NO_RESPONSE: OptNumber = OptNumber(258);

impl Message {
  /// First value of an option, if present
  pub fn get(&self, num: OptNumber) -> Option<&OptValue> {
    self.opts.get(&num).and_then(|vs| vs.first())
  }

  /// Every value of a (repeatable) option
  pub fn get_all(&self, num: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(&num)
  }

  /// Whether the option appears at all
  pub fn has(&self, num: OptNumber) -> bool {
    self.opts.contains_key(&num)
  }

  /// Set an option, replacing any values it already had
  pub fn set(&mut self, num: OptNumber, value: OptValue) {
    self.opts.insert(num, vec![value]);
  }

  /// Append a value to a repeatable option
  pub fn add(&mut self, num: OptNumber, value: OptValue) {
    self.opts.entry(num).or_default().push(value);
  }

  /// Drop an option entirely
  pub fn remove(&mut self, num: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&num)
  }

  fn get_uint(&self, num: OptNumber) -> Option<u32> {
    self.get(num).and_then(OptValue::as_uint)
  }

  /// Replace the Uri-Path options with the segments of `path`.
  ///
  /// Leading and trailing slashes are ignored; the root path is
  /// the absence of Uri-Path options.
  pub fn set_path(&mut self, path: &str) {
    self.remove(URI_PATH);
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .for_each(|seg| self.add(URI_PATH, OptValue::from(seg)));
  }

  /// The Uri-Path segments joined with `/`
  pub fn path(&self) -> String {
    self.get_all(URI_PATH)
        .map(|segs| {
          segs.iter()
              .filter_map(OptValue::as_str)
              .collect::<Vec<_>>()
              .join("/")
        })
        .unwrap_or_default()
  }

  /// The Block1 descriptor, if present and well-formed
  pub fn block1(&self) -> Option<Block> {
    self.get_uint(BLOCK1).and_then(Block::from_opt)
  }

  /// Set the Block1 descriptor
  pub fn set_block1(&mut self, b: Block) {
    self.set(BLOCK1, OptValue::uint(b.into()));
  }

  /// The Block2 descriptor, if present and well-formed
  pub fn block2(&self) -> Option<Block> {
    self.get_uint(BLOCK2).and_then(Block::from_opt)
  }

  /// Set the Block2 descriptor
  pub fn set_block2(&mut self, b: Block) {
    self.set(BLOCK2, OptValue::uint(b.into()));
  }

  /// Raw value of the Observe option.
  ///
  /// In requests this is a registration [`observe::Action`]; in
  /// notifications it is a 24-bit sequence number.
  pub fn observe(&self) -> Option<u32> {
    self.get_uint(OBSERVE).map(|n| n % observe::SEQ_MODULO)
  }

  /// Set the Observe option to a register/deregister action
  pub fn set_observe(&mut self, action: observe::Action) {
    self.set(OBSERVE, OptValue::uint(action.into()));
  }

  /// Set the Observe option to a notification sequence number
  pub fn set_observe_seq(&mut self, seq: u32) {
    self.set(OBSERVE, OptValue::uint(seq % observe::SEQ_MODULO));
  }

  /// The No-Response suppression bitmap, if present
  pub fn no_response(&self) -> Option<NoResponse> {
    self.get_uint(NO_RESPONSE).map(|n| NoResponse(n as u8))
  }

  /// Set the No-Response suppression bitmap
  pub fn set_no_response(&mut self, nr: NoResponse) {
    self.set(NO_RESPONSE, OptValue::uint(nr.0 as u32));
  }

  /// The payload media type, if announced
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_uint(CONTENT_FORMAT).map(|n| ContentFormat::from(n as u16))
  }

  /// Announce the payload media type
  pub fn set_content_format(&mut self, f: ContentFormat) {
    self.set(CONTENT_FORMAT, OptValue::uint(u16::from(f) as u32));
  }

  /// Size1 transfer-size hint
  pub fn size1(&self) -> Option<u32> {
    self.get_uint(SIZE1)
  }

  /// Set the Size1 transfer-size hint
  pub fn set_size1(&mut self, n: u32) {
    self.set(SIZE1, OptValue::uint(n));
  }

  /// Size2 transfer-size hint
  pub fn size2(&self) -> Option<u32> {
    self.get_uint(SIZE2)
  }

  /// Set the Size2 transfer-size hint
  pub fn set_size2(&mut self, n: u32) {
    self.set(SIZE2, OptValue::uint(n));
  }
}

#[cfg(test)]
mod test {
  use super::observe::Action;
  use super::*;
  use crate::msg::{Code, Id, Token, Type};

  fn msg() -> Message {
    Message::new(Type::Con, Code::GET, Id(1), Token::EMPTY)
  }

  #[test]
  fn path_round_trip() {
    let mut m = msg();
    m.set_path("/sensors/temperature/");
    assert_eq!(m.path(), "sensors/temperature");
    assert_eq!(m.get_all(URI_PATH).unwrap().len(), 2);

    m.set_path("");
    assert_eq!(m.path(), "");
    assert!(!m.has(URI_PATH));
  }

  #[test]
  fn typed_options() {
    let mut m = msg();

    m.set_block2(Block::new(64, 3, true));
    assert_eq!(m.block2().unwrap().size(), 64);
    assert_eq!(m.block2().unwrap().num(), 3);
    assert!(m.block2().unwrap().more());
    assert!(m.block1().is_none());

    m.set_observe(Action::Register);
    assert_eq!(m.observe(), Some(0));
    m.set_observe_seq(observe::SEQ_MODULO + 5);
    assert_eq!(m.observe(), Some(5));

    m.set_no_response(NoResponse::SUCCESS);
    assert!(m.no_response().unwrap().suppresses(Code::CONTENT));

    m.set_content_format(ContentFormat::Json);
    assert_eq!(m.content_format(), Some(ContentFormat::Json));
  }

  #[test]
  fn set_replaces_add_appends() {
    let mut m = msg();
    m.add(URI_QUERY, OptValue::from("a=1"));
    m.add(URI_QUERY, OptValue::from("b=2"));
    assert_eq!(m.get_all(URI_QUERY).unwrap().len(), 2);

    m.set(URI_QUERY, OptValue::from("c=3"));
    assert_eq!(m.get_all(URI_QUERY).unwrap().len(), 1);
    assert_eq!(m.get(URI_QUERY).unwrap().as_str(), Some("c=3"));
  }
}
