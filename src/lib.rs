//! Readiness-driven WebSocket server.
//!
//! A single thread multiplexes one listening socket and up to [`MAX_CONNECTION_NUM`] client
//! connections, plain TCP or TLS. Each connection moves through the RFC 6455 opening handshake
//! and a small protocol state machine; application code observes the lifecycle through three
//! callbacks and answers by queueing frames.
//!
//! ```no_run
//! use wsmux::{Frame, OpCode, TcpServer};
//!
//! fn main() -> wsmux::Result<()> {
//!   let mut server = TcpServer::new("127.0.0.1:9001".parse().unwrap(), ())?;
//!   server.set_message_callback(|ctx, id, message| {
//!     let echo = Frame::new_fin(OpCode::Text, message.into_payload());
//!     let _queued = ctx.queue_frame(id, &echo);
//!   });
//!   let _status = server.run()?;
//!   Ok(())
//! }
//! ```

#[macro_use]
mod macros;

mod connection;
mod error;
mod frame;
mod handshake;
mod message;
mod op_code;
mod poller;
mod server;
mod tls;
mod transport;

pub use error::{Error, WebSocketError};
pub use frame::Frame;
pub use handshake::{
  handshake_response, is_valid_handshake_request, Request, RequestParser, Response,
  WS_MAGIC_STRING,
};
pub use message::{Message, MessageKind, MessageParser};
pub use op_code::OpCode;
pub use poller::{Action, Direction, PollContext, PollResult, Poller, ResultType};
pub use server::{ServerContext, TcpServer, TlsServer, WsServer, MAX_CONNECTION_NUM};
pub use tls::TlsContext;
pub use transport::{ReadOutcome, TcpTransport, TlsTransport, Transport};

/// Shortcut of [`core::result::Result<T, Error>`].
pub type Result<T> = core::result::Result<T, Error>;
