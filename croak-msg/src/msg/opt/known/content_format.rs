/// Media type of a message payload, from the CoAP Content-Formats
/// registry (RFC7252 §12.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/exi`
  Exi,
  /// `application/json`
  Json,
  /// `application/cbor`
  Cbor,
  /// A registered value this crate has no name for
  Other(u16),
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    match n {
      | 0 => ContentFormat::Text,
      | 40 => ContentFormat::LinkFormat,
      | 41 => ContentFormat::Xml,
      | 42 => ContentFormat::OctetStream,
      | 47 => ContentFormat::Exi,
      | 50 => ContentFormat::Json,
      | 60 => ContentFormat::Cbor,
      | n => ContentFormat::Other(n),
    }
  }
}

impl From<ContentFormat> for u16 {
  fn from(f: ContentFormat) -> Self {
    match f {
      | ContentFormat::Text => 0,
      | ContentFormat::LinkFormat => 40,
      | ContentFormat::Xml => 41,
      | ContentFormat::OctetStream => 42,
      | ContentFormat::Exi => 47,
      | ContentFormat::Json => 50,
      | ContentFormat::Cbor => 60,
      | ContentFormat::Other(n) => n,
    }
  }
}
