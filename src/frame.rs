use crate::op_code::OpCode;

pub(crate) const MAX_CONTROL_PAYLOAD_LEN: usize = 125;

/// Unit of generic data used for communication.
#[derive(Debug)]
pub struct Frame {
  fin: bool,
  op_code: OpCode,
  payload: Vec<u8>,
}

impl Frame {
  /// Creates a new instance that is considered final.
  #[inline]
  pub fn new_fin(op_code: OpCode, payload: Vec<u8>) -> Self {
    Self::new(true, op_code, payload)
  }

  /// Creates a new instance that is meant to be a continuation of previous frames.
  #[inline]
  pub fn new_unfin(op_code: OpCode, payload: Vec<u8>) -> Self {
    Self::new(false, op_code, payload)
  }

  /// Indicates if this is the final frame in a message.
  #[inline]
  pub fn fin(&self) -> bool {
    self.fin
  }

  /// See [`OpCode`].
  #[inline]
  pub fn op_code(&self) -> OpCode {
    self.op_code
  }

  /// Frame's content.
  #[inline]
  pub fn payload(&self) -> &[u8] {
    &self.payload
  }

  /// Serialized wire form. Frames sent by a server are never masked.
  #[inline]
  pub fn to_bytes(&self) -> Vec<u8> {
    let payload_len = self.payload.len();
    let mut bytes = Vec::with_capacity(payload_len.wrapping_add(10));
    bytes.push(u8::from(self.fin) << 7 | u8::from(self.op_code));
    match payload_len {
      0..=125 => bytes.push(u8::try_from(payload_len).unwrap_or_default()),
      126..=0xFFFF => {
        bytes.push(126);
        bytes.extend_from_slice(&u16::try_from(payload_len).unwrap_or_default().to_be_bytes());
      }
      _ => {
        bytes.push(127);
        bytes.extend_from_slice(&u64::try_from(payload_len).unwrap_or_default().to_be_bytes());
      }
    }
    bytes.extend_from_slice(&self.payload);
    bytes
  }

  fn new(fin: bool, op_code: OpCode, mut payload: Vec<u8>) -> Self {
    if op_code.is_control() {
      payload.truncate(MAX_CONTROL_PAYLOAD_LEN);
    }
    Self { fin, op_code, payload }
  }
}
