use tinyvec::ArrayVec;

use crate::msg::{Byte1, Message};

/// Trait for fallible conversion into a wire-format byte buffer
pub trait TryIntoBytes {
  /// Error yielded when `Self` cannot be expressed on the wire
  type Error;

  /// Serialize into bytes.
  ///
  /// Encoding is canonical: the same message value always yields
  /// the same bytes.
  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error>;
}

/// The largest value a 2-byte extended delta/length field can carry
const EXTENDED_MAX: u32 = 269 + u16::MAX as u32;

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// An option value was longer than the 2-byte extended length field can express
  OptionValueTooLong(usize),
  /// The gap between consecutive option numbers was too large to delta-encode
  OptionDeltaTooLarge(u32),
}

pub(crate) fn opt_len_or_delta(val: u32) -> (u8, ArrayVec<[u8; 2]>) {
  let mut ext = ArrayVec::new();

  match val {
    | n if n >= 269 => {
      ext.extend(((n - 269) as u16).to_be_bytes());
      (14, ext)
    },
    | n if n >= 13 => {
      ext.push((n - 13) as u8);
      (13, ext)
    },
    | n => (n as u8, ext),
  }
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    (&self).try_into_bytes()
  }
}

impl TryIntoBytes for &Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    let opts_size: usize = self.opts
                               .values()
                               .flatten()
                               .map(|v| 5 + v.0.len())
                               .sum();
    let mut bytes =
      Vec::with_capacity(4 + self.token.0.len() + opts_size + 1 + self.payload.0.len());

    bytes.push(u8::from(Byte1 { ver: self.ver,
                                ty: self.ty,
                                tkl: self.token.0.len() as u8 }));
    bytes.push(u8::from(self.code));
    bytes.extend(<[u8; 2]>::from(self.id));
    bytes.extend(self.token.as_bytes());

    let mut prev = 0u32;
    for (num, vals) in self.opts.iter() {
      for val in vals {
        let delta = num.0 - prev;
        if delta > EXTENDED_MAX {
          return Err(MessageToBytesError::OptionDeltaTooLarge(delta));
        }
        if val.0.len() > EXTENDED_MAX as usize {
          return Err(MessageToBytesError::OptionValueTooLong(val.0.len()));
        }

        let (delta_nibble, delta_ext) = opt_len_or_delta(delta);
        let (len_nibble, len_ext) = opt_len_or_delta(val.0.len() as u32);

        bytes.push((delta_nibble << 4) | len_nibble);
        bytes.extend(delta_ext);
        bytes.extend(len_ext);
        bytes.extend(&val.0);

        prev = num.0;
      }
    }

    if !self.payload.0.is_empty() {
      bytes.push(0xFF);
      bytes.extend(&self.payload.0);
    }

    Ok(bytes)
  }
}
