use crate::{
  handshake::RequestParser,
  message::MessageParser,
  transport::{ReadOutcome, Transport},
};
use std::collections::VecDeque;

/// Protocol state of a single connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConnectionState {
  /// The opening handshake request has not arrived yet.
  NotConnected,
  /// The handshake response is queued or partially delivered.
  Connecting,
  /// Messages flow in both directions.
  Connected,
  /// A locally initiated close frame is queued or sent; waiting for the peer's reply.
  Closing,
  /// Terminal. The entry is removed in the next collection pass.
  Closed,
}

/// Everything the server tracks about a single peer.
#[derive(Debug)]
pub(crate) struct Connection<T> {
  pub(crate) handshake_parser: RequestParser,
  pub(crate) message_parser: MessageParser,
  pub(crate) send_buffer: VecDeque<Vec<u8>>,
  pub(crate) state: ConnectionState,
  pub(crate) transport: T,
}

impl<T> Connection<T>
where
  T: Transport,
{
  pub(crate) fn new(transport: T) -> Self {
    Self {
      handshake_parser: RequestParser::new(),
      message_parser: MessageParser::new(),
      send_buffer: VecDeque::new(),
      state: ConnectionState::NotConnected,
      transport,
    }
  }

  pub(crate) fn read(&mut self) -> crate::Result<ReadOutcome> {
    self.transport.read()
  }

  pub(crate) fn write(&mut self) -> crate::Result<()> {
    self.transport.drain(&mut self.send_buffer)
  }

  pub(crate) fn data_to_send(&self) -> bool {
    !self.send_buffer.is_empty() || self.transport.wants_write()
  }

  pub(crate) fn buffer_bytes(&self) -> usize {
    self.send_buffer.iter().map(Vec::len).sum()
  }
}
