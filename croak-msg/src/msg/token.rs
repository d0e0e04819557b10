use tinyvec::ArrayVec;

/// # Token
///
/// 0 to 8 bytes of opaque data used to correlate requests and responses.
/// Every response to a request echoes that request's token, however many
/// message-layer exchanges the pair is spread over.
///
/// Tokens say nothing about reliability; retransmission and
/// acknowledgement match on the [`Id`](super::Id) instead.
#[derive(Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// The zero-length token
  pub const EMPTY: Token = Token(ArrayVec::from_array_empty([0; 8]));

  /// Copy up to 8 bytes of `data` into a Token.
  ///
  /// Returns None when `data` is longer than 8 bytes.
  pub fn from_slice(data: &[u8]) -> Option<Token> {
    if data.len() > 8 {
      return None;
    }

    let mut buf = ArrayVec::new();
    buf.extend_from_slice(data);
    Some(Token(buf))
  }

  /// Whether this is the zero-length token
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// The token bytes
  pub fn as_bytes(&self) -> &[u8] {
    self.0.as_slice()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn from_slice() {
    assert_eq!(Token::from_slice(&[]).unwrap(), Token::EMPTY);
    assert_eq!(Token::from_slice(&[1, 2, 3]).unwrap().as_bytes(), &[1, 2, 3]);
    assert!(Token::from_slice(&[0; 9]).is_none());
  }
}
