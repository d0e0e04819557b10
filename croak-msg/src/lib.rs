//! Low-level representation of CoAP messages.
//!
//! The most notable item in `croak_msg` is [`Message`]; a CoAP message
//! very close to the actual byte layout described in RFC7252 §3.
//!
//! ## Codec
//! Messages convert to and from bytes with the [`TryIntoBytes`] and
//! [`TryFromBytes`] traits. Decoding validates the structural rules of
//! the wire format (version, token length, option nibbles, payload
//! marker) and yields a message owning all of its storage; encoding is
//! canonical, so re-encoding a decoded message reproduces its bytes
//! modulo option order normalization.
//!
//! ## Options
//! Options live in a map keyed by their absolute [`OptNumber`], not in
//! wire order; the delta encoding is a codec detail that never leaks
//! into the rest of a program. Typed views over the well-known options
//! (Uri-Path, Observe, the Block family, No-Response, Content-Format)
//! live in [`opt::known`].

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
#![cfg_attr(not(test), warn(unreachable_pub))]

#[doc(hidden)]
pub mod cursor;

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  use std::collections::BTreeMap;

  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b1100_1101u8, 0b0000_0011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b1111_1111u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.concat().as_ref(),
               payload.concat().as_ref()].concat();

  let msg = Message { id: Id(1),
                      ty: Type::Con,
                      ver: Version(1),
                      token: Token(tinyvec::array_vec!([u8; 8] => 254)),
                      opts: BTreeMap::from([(OptNumber(12),
                                             vec![OptValue(content_format.to_vec())])]),
                      code: Code { class: 2,
                                   detail: 5 },
                      payload: Payload(b"hello, world!".to_vec()) };
  (msg, bytes)
}
