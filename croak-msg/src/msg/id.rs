use super::MessageParseError;
use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;

/// # Message ID
///
/// 16-bit unsigned integer in network byte order. Used to
/// detect message duplication and to match messages of type
/// Acknowledgement/Reset to messages of type Confirmable/Non-confirmable.
///
/// The Message ID belongs to the reliability layer and says nothing
/// about which request a response answers; that is the [`Token`](super::Token)'s job.
#[derive(Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Id(pub u16);

impl<B: AsRef<[u8]>> TryConsumeBytes<B> for Id {
  type Error = MessageParseError;

  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error> {
    match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(Id(u16::from_be_bytes([a, b]))),
      | _ => Err(MessageParseError::eof()),
    }
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}
