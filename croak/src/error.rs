use croak_msg::{MessageParseError, MessageToBytesError, OptParseError};

/// Everything that can go wrong inside the runtime.
///
/// Errors scoped to a single exchange (anything token- or
/// transfer-shaped) fail that exchange only and are delivered exactly
/// once: to the waiter when the exchange has one, otherwise to the
/// configured error sink. [`Error::TransportClosed`] is the one fatal
/// case; it ends the whole serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// A datagram failed structural validation. Confirmable garbage is
  /// answered with a reset carrying the same message ID;
  /// non-confirmable garbage is dropped.
  MalformedMessage(MessageParseError),

  /// An option inside a datagram failed to decode
  MalformedOption(OptParseError),

  /// A message could not be expressed in the wire format
  UnencodableMessage(MessageToBytesError),

  /// A request was issued under a token that already has an
  /// outstanding exchange. Local programming error (or a one-in-2^64
  /// token collision), surfaced to the caller.
  DuplicateToken,

  /// A confirmable message was retransmitted to exhaustion without
  /// an acknowledgement or reset coming back
  RetransmitExhausted,

  /// The peer answered with a reset
  PeerReset,

  /// A block-wise transfer sat idle past the configured deadline
  BlockwiseTimeout,

  /// A block arrived out of order, with a mismatched size, or
  /// otherwise violating the transfer's state
  BlockwiseProtocolError,

  /// A body exceeded the maximum reassembled size
  PayloadTooLarge,

  /// The exchange was cancelled by its owner or by session close
  Cancelled,

  /// The socket is unusable; fatal to the server loop
  TransportClosed,
}

impl From<MessageParseError> for Error {
  fn from(e: MessageParseError) -> Self {
    match e {
      | MessageParseError::OptParseError(inner) => Error::MalformedOption(inner),
      | other => Error::MalformedMessage(other),
    }
  }
}

impl From<MessageToBytesError> for Error {
  fn from(e: MessageToBytesError) -> Self {
    Error::UnencodableMessage(e)
  }
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Error::MalformedMessage(e) => write!(f, "malformed message: {e:?}"),
      | Error::MalformedOption(e) => write!(f, "malformed option: {e:?}"),
      | Error::UnencodableMessage(e) => write!(f, "message cannot be encoded: {e:?}"),
      | Error::DuplicateToken => f.write_str("token already has an outstanding exchange"),
      | Error::RetransmitExhausted => f.write_str("retransmissions exhausted without ack"),
      | Error::PeerReset => f.write_str("peer sent reset"),
      | Error::BlockwiseTimeout => f.write_str("block-wise transfer timed out"),
      | Error::BlockwiseProtocolError => f.write_str("block-wise transfer violated protocol"),
      | Error::PayloadTooLarge => f.write_str("assembled payload too large"),
      | Error::Cancelled => f.write_str("exchange cancelled"),
      | Error::TransportClosed => f.write_str("transport closed"),
    }
  }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parse_errors_split_by_layer() {
    let opt = MessageParseError::OptParseError(OptParseError::ValueLengthReservedValue(15));
    assert_eq!(Error::from(opt),
               Error::MalformedOption(OptParseError::ValueLengthReservedValue(15)));

    let msg = MessageParseError::InvalidTokenLength(9);
    assert_eq!(Error::from(msg),
               Error::MalformedMessage(MessageParseError::InvalidTokenLength(9)));
  }
}
