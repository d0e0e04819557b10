use crate::cursor::Cursor;

/// Trait for fallible conversion from a buffer of bytes
pub trait TryFromBytes<B: AsRef<[u8]>>: Sized {
  /// Error yielded when the bytes do not describe a `Self`
  type Error;

  /// Try to parse a `Self` out of a byte buffer.
  ///
  /// The buffer is borrowed for the duration of the call only;
  /// whatever comes out owns all of its storage.
  fn try_from_bytes(bytes: B) -> Result<Self, Self::Error>;
}

/// Trait for parsing a `Self` out of the front of a partially
/// consumed buffer, leaving the cursor positioned after it.
pub trait TryConsumeBytes<B: AsRef<[u8]>>: Sized {
  /// Error yielded when the bytes do not describe a `Self`
  type Error;

  /// Try to parse a `Self` from the cursor's current position.
  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error>;
}
