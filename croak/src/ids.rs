use std::sync::atomic::{AtomicU32, Ordering};

use croak_msg::{Id, Token};
use rand::Rng;

/// Message ID source for one session.
///
/// A 32-bit counter seeded randomly and truncated to 16 bits on
/// emission, so consecutive messages get consecutive IDs and a
/// restarted session is unlikely to resume inside its predecessor's
/// dedup window. Collisions across sessions are fine; IDs only need
/// to be unique per peer within the exchange lifetime.
#[derive(Debug)]
pub(crate) struct MidGen(AtomicU32);

impl MidGen {
  pub(crate) fn new() -> Self {
    Self(AtomicU32::new(rand::thread_rng().gen()))
  }

  pub(crate) fn next(&self) -> Id {
    Id((self.0.fetch_add(1, Ordering::Relaxed) % 0x1_0000) as u16)
  }
}

/// Generate a fresh random token of `len` bytes (clamped to `1..=8`).
pub(crate) fn random_token(len: usize) -> Token {
  let mut bytes = [0u8; 8];
  let len = len.clamp(1, 8);
  rand::thread_rng().fill(&mut bytes[..len]);

  Token::from_slice(&bytes[..len]).expect("len is <= 8")
}
