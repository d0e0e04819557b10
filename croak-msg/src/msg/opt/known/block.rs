/// Three items of information are packed into a Block1 or Block2
/// option value:
/// * the size of the block ([`Block::size`], stored as the exponent SZX)
/// * whether more blocks are following ([`Block::more`])
/// * the relative number of the block ([`Block::num`]) within a sequence of blocks with the given size.
///
/// ```text
///  0
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |  NUM  |M| SZX |
/// +-+-+-+-+-+-+-+-+
/// ```
/// (NUM widens to 12 or 20 bits in the 2- and 3-byte encodings.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

/// Largest block size expressible by an SZX of 6
pub const MAX_BLOCK_SIZE: u16 = 1024;

/// Largest block number expressible in the 3-byte encoding (20 bits)
pub const MAX_BLOCK_NUM: u32 = (1 << 20) - 1;

impl Block {
  /// Build a block descriptor from a byte size, rounding the size
  /// down to the nearest expressible power of two in `[16, 1024]`.
  pub fn new(size: u16, num: u32, more: bool) -> Self {
    Self::from_parts(size_to_szx(size), num, more)
  }

  /// Build a block descriptor from an already-valid SZX in `0..=6`.
  pub fn from_parts(szx: u8, num: u32, more: bool) -> Self {
    let num = num.min(MAX_BLOCK_NUM) << 4;
    let more = u32::from(more) << 3;

    Self(num | more | (szx.min(6) as u32))
  }

  /// Reconstruct from a raw option value.
  ///
  /// Returns None for the reserved SZX 7 and for block numbers that
  /// do not fit the 3-byte encoding.
  pub fn from_opt(raw: u32) -> Option<Self> {
    if raw & 0b111 == 7 || raw >> 4 > MAX_BLOCK_NUM {
      return None;
    }

    Some(Self(raw))
  }

  /// The size exponent; block size is `2^(szx + 4)`
  pub fn szx(&self) -> u8 {
    (self.0 & 0b111) as u8
  }

  /// Block size in bytes
  pub fn size(&self) -> u16 {
    1 << (self.szx() + 4)
  }

  /// Whether more blocks follow this one
  pub fn more(&self) -> bool {
    (self.0 >> 3) & 1 == 1
  }

  /// This block's number within the transfer
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }

  /// Byte offset of this block in the assembled representation
  pub fn offset(&self) -> usize {
    self.num() as usize * self.size() as usize
  }
}

/// Round a byte count down to the nearest valid SZX.
pub fn size_to_szx(size: u16) -> u8 {
  let size = size.clamp(16, MAX_BLOCK_SIZE);
  (31 - (size as u32).leading_zeros() as u8) - 4
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}
