use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;

/// Errors that can occur while parsing CoAP options
pub mod parse_error;
pub use parse_error::*;

/// Well-known option numbers and typed views over them
pub mod known;

/// The Option Number identifies which option is being set
/// (e.g. Uri-Path has Number 11).
///
/// On the wire, option numbers are not stored directly; each option
/// stores the difference ([`OptDelta`]) between its number and the
/// number of the option before it, which forces options to appear
/// in non-decreasing number order.
///
/// The low bits of the number encode the option's forwarding
/// qualities per RFC7252 §5.4.6.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

impl OptNumber {
  /// Whether this option must be understood by the receiver
  /// ("critical" in RFC7252 terms)
  pub fn must_be_processed(&self) -> bool {
    self.0 & 0b1 == 1
  }

  /// Whether this option participates in the identity of a request.
  ///
  /// Options that describe the transfer of a message rather than the
  /// request itself (the Block family, their size hints, Observe and
  /// No-Response), and options flagged NoCacheKey, do not.
  pub fn include_in_cache_key(&self) -> bool {
    let transfer_layer = [known::BLOCK1,
                          known::BLOCK2,
                          known::SIZE1,
                          known::SIZE2,
                          known::OBSERVE,
                          known::NO_RESPONSE].contains(self);
    let no_cache_key = self.0 & 0b11100 == 0b11100;

    !transfer_layer && !no_cache_key
  }
}

/// The "Option Delta" is the difference between this Option's Number
/// and the previous Option's number, as stored on the wire.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

/// The value of an option; an opaque byte string whose meaning
/// depends on the option number.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Encode an unsigned integer option value; big-endian
  /// with no leading zero bytes, zero encoding as the empty string.
  pub fn uint(n: u32) -> OptValue {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    OptValue(bytes[skip..].to_vec())
  }

  /// Decode an unsigned integer option value.
  ///
  /// Returns None when the value is wider than 4 bytes.
  pub fn as_uint(&self) -> Option<u32> {
    if self.0.len() > 4 {
      return None;
    }

    Some(self.0.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
  }

  /// The value as a utf8 string, if it is one
  pub fn as_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.0).ok()
  }
}

impl From<&str> for OptValue {
  fn from(s: &str) -> Self {
    OptValue(s.as_bytes().to_vec())
  }
}

impl From<Vec<u8>> for OptValue {
  fn from(v: Vec<u8>) -> Self {
    OptValue(v)
  }
}

/// Low-level representation of a freshly parsed CoAP Option:
/// the wire delta plus the value bytes.
///
/// This only exists at the codec boundary; parsed messages store
/// options by absolute [`OptNumber`] instead.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

pub(crate) fn parse_opt_len_or_delta<B: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<B>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

impl<B: AsRef<[u8]>> TryConsumeBytes<B> for Opt {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error> {
    let byte1 = bytes.next().ok_or_else(OptParseError::eof)?;

    // Delta MUST be consumed before the length; both nibbles may
    // push extended bytes onto the wire in that order.
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let len = parse_opt_len_or_delta(byte1 & 0b1111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    let value = bytes.take_exact(len)
                     .map(|v| OptValue(v.to_vec()))
                     .ok_or_else(OptParseError::eof)?;

    Ok(Opt { delta: OptDelta(delta),
             value })
  }
}
