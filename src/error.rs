use core::fmt::{Debug, Display, Formatter};

/// Grouped individual errors
#[derive(Debug)]
pub enum Error {
  // External - Third parties
  //
  /// See the documentation of the associated element.
  HttpParse(httparse::Error),
  /// See the documentation of the associated element.
  Io(std::io::Error),
  /// See the documentation of the associated element.
  Tls(rustls::Error),

  // Internal
  //
  /// A request head terminator was found but its header block could not be parsed to completion.
  IncompleteHttpHeaders,
  /// The provided PEM data contains no usable private key.
  MissingTlsPrivateKey,
  /// No connection is associated with the provided identifier.
  UnknownConnection {
    /// Provided identifier
    id: u64,
  },
  /// A request head exceeded the maximum allowed size before completing.
  VeryLargeHttp,
  /// See [`WebSocketError`].
  WebSocket(WebSocketError),
}

impl Display for Error {
  #[inline]
  fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
    <Self as Debug>::fmt(self, f)
  }
}

impl core::error::Error for Error {}

impl From<httparse::Error> for Error {
  #[inline]
  fn from(from: httparse::Error) -> Self {
    Self::HttpParse(from)
  }
}

impl From<std::io::Error> for Error {
  #[inline]
  fn from(from: std::io::Error) -> Self {
    Self::Io(from)
  }
}

impl From<rustls::Error> for Error {
  #[inline]
  fn from(from: rustls::Error) -> Self {
    Self::Tls(from)
  }
}

impl From<WebSocketError> for Error {
  #[inline]
  fn from(from: WebSocketError) -> Self {
    Self::WebSocket(from)
  }
}

/// Errors related to the WebSocket protocol
#[derive(Debug)]
pub enum WebSocketError {
  /// Received close frame has invalid parameters.
  InvalidCloseFrame,
  /// No op code can be represented with the provided byte.
  InvalidOpCodeByte {
    /// Provided byte
    provided: u8,
  },
  /// Text message whose payload is not valid UTF-8.
  InvalidUtf8Payload,
  /// Server received a frame without a mask.
  MissingFrameMask,
  /// Reserved bits are not zero.
  ReservedBitsAreNotZero,
  /// Received control frame wasn't supposed to be fragmented.
  UnexpectedFragmentedControlFrame,
  /// The first frame of a message is a continuation or the following frames are not a
  /// continuation.
  UnexpectedMessageFrame,
  /// Control frames have a maximum allowed size.
  VeryLargeControlFrame,
  /// Frame payload exceeds the defined threshold.
  VeryLargePayload,
}
