use crate::error::WebSocketError;

/// Defines how to interpret the payload data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCode {
  /// Continuation of a previous frame.
  Continuation,
  /// UTF-8 text.
  Text,
  /// Opaque bytes.
  Binary,
  /// Connection is closed.
  Close,
  /// Test reachability.
  Ping,
  /// Response of a ping frame.
  Pong,
}

impl OpCode {
  #[inline]
  pub(crate) fn is_control(self) -> bool {
    matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
  }

  #[inline]
  pub(crate) fn is_text(self) -> bool {
    matches!(self, OpCode::Text)
  }
}

impl From<OpCode> for u8 {
  #[inline]
  fn from(from: OpCode) -> Self {
    match from {
      OpCode::Continuation => 0b0000_0000,
      OpCode::Text => 0b0000_0001,
      OpCode::Binary => 0b0000_0010,
      OpCode::Close => 0b0000_1000,
      OpCode::Ping => 0b0000_1001,
      OpCode::Pong => 0b0000_1010,
    }
  }
}

impl TryFrom<u8> for OpCode {
  type Error = crate::Error;

  #[inline]
  fn try_from(from: u8) -> crate::Result<Self> {
    let rslt = match from {
      0b0000_0000 => Self::Continuation,
      0b0000_0001 => Self::Text,
      0b0000_0010 => Self::Binary,
      0b0000_1000 => Self::Close,
      0b0000_1001 => Self::Ping,
      0b0000_1010 => Self::Pong,
      _ => return Err(WebSocketError::InvalidOpCodeByte { provided: from }.into()),
    };
    Ok(rslt)
  }
}
