/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum MessageParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Version was something other than 1
  InvalidVersion(u8),

  /// Token length was > 8
  InvalidTokenLength(u8),

  /// The message type is invalid (see [`Type`](super::Type) for valid values)
  InvalidType(u8),

  /// A payload marker (0xFF) was present with zero payload bytes after it
  PayloadMarkerWithoutPayload,

  /// Error parsing option
  OptParseError(super::opt::parse_error::OptParseError),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

impl From<super::opt::parse_error::OptParseError> for MessageParseError {
  fn from(e: super::opt::parse_error::OptParseError) -> Self {
    Self::OptParseError(e)
  }
}
