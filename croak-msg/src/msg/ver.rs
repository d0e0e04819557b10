/// Version of the CoAP protocol that the message adheres to.
///
/// As far as this crate is concerned, this will always be 1,
/// and messages claiming any other version are rejected by the
/// decoder.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
