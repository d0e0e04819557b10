/// # Message Code
///
/// 8 bits split into a 3-bit class and a 5-bit detail, written
/// `class.detail` (e.g. `0.01` GET, `2.05` Content, `4.04` Not Found).
///
/// ```
/// use croak_msg::Code;
///
/// assert_eq!(Code { class: 2, detail: 5 }.to_string(), "2.05".to_string())
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Code {
  /// The "class" of message codes identify it as a request or response, and provides the class of response status:
  ///
  /// |class|meaning|
  /// |---|---|
  /// |`0`|Message is a request (or empty)|
  /// |`2`|Message is a success response|
  /// |`4`|Message is a client error response|
  /// |`5`|Message is a server error response|
  pub class: u8,

  /// 2-digit integer (range `[0, 32)`) that provides granular information about the response status.
  ///
  /// Will always be `0` for empty messages and in `[1, 4]` for requests.
  pub detail: u8,
}

/// What a [`Code`] means at the request/response layer
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CodeKind {
  /// The `0.00` code; carried by ACK, RST and ping messages only
  Empty,
  /// Class 0 with nonzero detail; a method like GET
  Request,
  /// Class 2, 4 or 5; an outcome
  Response,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use croak_msg::Code;
  ///
  /// let content = Code::new(2, 5);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// The `0.00` empty code
  pub const EMPTY: Code = Code::new(0, 0);
  /// Method code GET
  pub const GET: Code = Code::new(0, 1);
  /// Method code POST
  pub const POST: Code = Code::new(0, 2);
  /// Method code PUT
  pub const PUT: Code = Code::new(0, 3);
  /// Method code DELETE
  pub const DELETE: Code = Code::new(0, 4);
  /// Response 2.01 Created
  pub const CREATED: Code = Code::new(2, 1);
  /// Response 2.02 Deleted
  pub const DELETED: Code = Code::new(2, 2);
  /// Response 2.03 Valid
  pub const VALID: Code = Code::new(2, 3);
  /// Response 2.04 Changed
  pub const CHANGED: Code = Code::new(2, 4);
  /// Response 2.05 Content
  pub const CONTENT: Code = Code::new(2, 5);
  /// Response 2.31 Continue
  pub const CONTINUE: Code = Code::new(2, 31);
  /// Response 4.00 Bad Request
  pub const BAD_REQUEST: Code = Code::new(4, 0);
  /// Response 4.02 Bad Option
  pub const BAD_OPTION: Code = Code::new(4, 2);
  /// Response 4.04 Not Found
  pub const NOT_FOUND: Code = Code::new(4, 4);
  /// Response 4.08 Request Entity Incomplete
  pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
  /// Response 4.13 Request Entity Too Large
  pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
  /// Response 5.00 Internal Server Error
  pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

  /// Whether this code is empty, a request method or a response status
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// Whether this code signals client or server error (class 4 or 5)
  pub fn is_error(&self) -> bool {
    self.class == 4 || self.class == 5
  }
}

impl core::fmt::Display for Code {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "{}.{:02}", self.class, self.detail)
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    Code { class: b >> 5,
           detail: b & 0b11111 }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    (code.class << 5) | code.detail
  }
}
