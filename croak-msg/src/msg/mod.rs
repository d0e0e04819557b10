use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::cursor::Cursor;
use crate::from_bytes::{TryConsumeBytes, TryFromBytes};

/// Message Code
pub mod code;
/// Message ID
pub mod id;
/// Message Options
pub mod opt;
/// Message parsing errors
pub mod parse_error;
/// Message Token
pub mod token;
/// Message Type
pub mod ty;
/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

/// The request or response body; zero bytes of payload is
/// represented as the empty vec and has no marker on the wire.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Payload(pub Vec<u8>);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (CON, NON, ACK, RST)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6;
    let ty = b >> 4 & 0b11;
    let tkl = b & 0b1111;

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    (b.ver.0 << 6) | (u8::from(b.ty) << 4) | b.tkl
  }
}

/// # `Message` struct
/// Representation of a CoAP message close to the actual byte layout:
/// a fixed 4-byte header, a 0-8 byte [`Token`], options indexed by
/// their absolute [`OptNumber`], and an optional [`Payload`].
///
/// Options are a map from number to the values seen for that number,
/// which makes the encoded option order canonical (numbers ascending,
/// repeated values in insertion order) no matter how the message was
/// put together.
///
/// Parsing never borrows from the datagram it was handed; callers are
/// free to reuse receive buffers.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::OptNumber`] and [`opt::OptValue`] for details
  pub opts: BTreeMap<OptNumber, Vec<OptValue>>,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a message with no options and no payload
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           token,
           code,
           ver: Version::default(),
           opts: BTreeMap::new(),
           payload: Payload(Vec::new()) }
  }

  /// Create the empty acknowledgement for this message.
  ///
  /// Empty ACKs echo the Id of the message they acknowledge and
  /// carry no token; the response (if any) follows separately under
  /// the request's token.
  pub fn ack(&self) -> Self {
    Self::new(Type::Ack, Code::EMPTY, self.id, Token::EMPTY)
  }

  /// Create the reset reply for this message
  pub fn rst(&self) -> Self {
    Self::new(Type::Reset, Code::EMPTY, self.id, Token::EMPTY)
  }

  /// Create an empty confirmable message ("CoAP ping"); the peer
  /// answers with a matching reset, proving liveness.
  pub fn ping(id: Id) -> Self {
    Self::new(Type::Con, Code::EMPTY, id, Token::EMPTY)
  }

  /// The payload bytes
  pub fn payload_bytes(&self) -> &[u8] {
    &self.payload.0
  }

  /// Identity of the request this message makes, independent of
  /// Id, token and transfer-layer options.
  ///
  /// Two requests that ask the same thing of the same resource hash
  /// equal here even when their block descriptors differ, which is
  /// what ties the legs of a block-wise transfer together.
  pub fn cache_key(&self) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    u8::from(self.code).hash(&mut h);
    self.opts
        .iter()
        .filter(|(num, _)| num.include_in_cache_key())
        .for_each(|(num, vals)| {
          num.0.hash(&mut h);
          vals.iter().for_each(|v| v.0.hash(&mut h));
        });
    h.finish()
  }
}

impl<B: AsRef<[u8]>> TryFromBytes<B> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: B) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver != Version(1) {
      return Err(MessageParseError::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(MessageParseError::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .and_then(Token::from_slice)
                     .ok_or_else(MessageParseError::eof)?;

    let mut opts = BTreeMap::<OptNumber, Vec<OptValue>>::new();
    let mut number = 0u32;
    let mut saw_marker = false;

    while let Some(head) = bytes.peek() {
      if head == 0xFF {
        bytes.next();
        saw_marker = true;
        break;
      }

      let opt = Opt::try_consume_bytes(&mut bytes)?;
      number += opt.delta.0 as u32;
      opts.entry(OptNumber(number)).or_default().push(opt.value);
    }

    let payload = bytes.take_until_end();
    if saw_marker && payload.is_empty() {
      return Err(MessageParseError::PayloadMarkerWithoutPayload);
    }

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload: Payload(payload.to_vec()) })
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parse_msg() {
    let (expect, bytes) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = Byte1::try_from(0b_01_10_0011u8).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_rejects_garbage() {
    // too short for a header
    assert_eq!(Message::try_from_bytes([0x40u8, 0x01]),
               Err(MessageParseError::UnexpectedEndOfStream));

    // version 2
    assert_eq!(Message::try_from_bytes([0x80u8, 0x01, 0, 1]),
               Err(MessageParseError::InvalidVersion(2)));

    // token length 9
    assert_eq!(Message::try_from_bytes([0x49u8, 0x01, 0, 1, 1, 2, 3, 4, 5, 6, 7, 8, 9]),
               Err(MessageParseError::InvalidTokenLength(9)));

    // token length 2 but only 1 byte follows
    assert_eq!(Message::try_from_bytes([0x42u8, 0x01, 0, 1, 0xAA]),
               Err(MessageParseError::UnexpectedEndOfStream));

    // payload marker then nothing
    assert_eq!(Message::try_from_bytes([0x40u8, 0x01, 0, 1, 0xFF]),
               Err(MessageParseError::PayloadMarkerWithoutPayload));
  }

  #[test]
  fn parse_shares_no_memory() {
    let (_, bytes) = crate::test_msg();
    let msg = Message::try_from_bytes(&bytes).unwrap();
    drop(bytes);
    assert_eq!(msg.payload_bytes(), b"hello, world!");
  }

  #[test]
  fn cache_key_ignores_transfer_options() {
    let mut a = Message::new(Type::Con, Code::GET, Id(1), Token::from_slice(&[1]).unwrap());
    a.set_path("some/resource");

    let mut b = Message::new(Type::Con, Code::GET, Id(9), Token::from_slice(&[2]).unwrap());
    b.set_path("some/resource");
    b.set_block2(known::Block::new(64, 2, false));

    assert_eq!(a.cache_key(), b.cache_key());

    let mut c = a.clone();
    c.set_path("some/other");
    assert_ne!(a.cache_key(), c.cache_key());
  }
}
