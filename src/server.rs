use crate::{
  connection::{Connection, ConnectionState},
  frame::Frame,
  handshake::handshake_response,
  message::{Message, MessageKind},
  op_code::OpCode,
  poller::{Action, Direction, PollContext, PollResult, Poller, ResultType},
  transport::{bind_listener, TcpTransport, TlsTransport, Transport},
};
use mio::{net::TcpListener, Token};
use std::{
  collections::{HashMap, HashSet},
  io::ErrorKind,
  net::SocketAddr,
  os::fd::AsRawFd,
};

/// Hard cap of concurrently tracked connections. The listener is paused while the cap is
/// reached and resumed once a collection pass frees capacity.
pub const MAX_CONNECTION_NUM: usize = 60;

const LISTENER_TOKEN: Token = Token(usize::MAX);

type Callback<T> = Box<dyn FnMut(&mut ServerContext<T>, u64) + Send>;
type MessageCallback<T> = Box<dyn FnMut(&mut ServerContext<T>, u64, Message) + Send>;

/// [`WsServer`] over plain TCP sockets.
pub type TcpServer = WsServer<TcpTransport>;
/// [`WsServer`] over TLS sockets.
pub type TlsServer = WsServer<TlsTransport>;

/// Single-threaded WebSocket server.
///
/// One poll loop multiplexes the listening socket and every accepted connection. Application
/// code observes the lifecycle through three callbacks, each invoked synchronously inside the
/// loop thread with a context that accepts re-entrant operations.
pub struct WsServer<T>
where
  T: Transport,
{
  context: ServerContext<T>,
  poller: Poller<ServerContext<T>>,
}

impl<T> WsServer<T>
where
  T: Transport,
{
  /// Binds `listener_addr` and registers the accepting machinery.
  ///
  /// The listening socket is configured with `SO_REUSEADDR` and `SO_REUSEPORT`.
  #[inline]
  pub fn new(listener_addr: SocketAddr, config: T::Config) -> crate::Result<Self> {
    let mut this = Self {
      context: ServerContext {
        active: false,
        close_callback: None,
        closed_connections: HashSet::new(),
        config,
        connections: HashMap::new(),
        last_connection_id: 0,
        listener: None,
        listener_addr,
        message_callback: None,
        open_callback: None,
        pending_actions: Vec::new(),
      },
      poller: Poller::new()?,
    };
    this.init_listener_socket()?;
    Ok(this)
  }

  /// Callback invoked once a connection finishes its opening handshake.
  #[inline]
  pub fn set_open_callback<F>(&mut self, callback: F)
  where
    F: FnMut(&mut ServerContext<T>, u64) + Send + 'static,
  {
    self.context.open_callback = Some(Box::new(callback));
  }

  /// Callback invoked for every complete text or binary message.
  #[inline]
  pub fn set_message_callback<F>(&mut self, callback: F)
  where
    F: FnMut(&mut ServerContext<T>, u64, Message) + Send + 'static,
  {
    self.context.message_callback = Some(Box::new(callback));
  }

  /// Callback invoked exactly once when a connection reaches its terminal state.
  #[inline]
  pub fn set_close_callback<F>(&mut self, callback: F)
  where
    F: FnMut(&mut ServerContext<T>, u64) + Send + 'static,
  {
    self.context.close_callback = Some(Box::new(callback));
  }

  /// See [`ServerContext::queue_frame`].
  #[inline]
  pub fn queue_frame(&mut self, connection_id: u64, frame: &Frame) -> bool {
    self.context.queue_frame(connection_id, frame)
  }

  /// See [`ServerContext::close_connection`].
  #[inline]
  pub fn close_connection(&mut self, connection_id: u64) -> bool {
    self.context.close_connection(connection_id)
  }

  /// See [`ServerContext::clear_buffer`].
  #[inline]
  pub fn clear_buffer(&mut self, connection_id: u64) {
    self.context.clear_buffer(connection_id);
  }

  /// See [`ServerContext::buffer_bytes`].
  #[inline]
  pub fn buffer_bytes(&self, connection_id: u64) -> usize {
    self.context.buffer_bytes(connection_id)
  }

  /// See [`ServerContext::peer_addr`].
  #[inline]
  pub fn peer_addr(&self, connection_id: u64) -> crate::Result<SocketAddr> {
    self.context.peer_addr(connection_id)
  }

  /// Resolved address of the listening socket.
  #[inline]
  pub fn local_addr(&self) -> SocketAddr {
    self.context.listener_addr
  }

  /// Performs a single blocking poll cycle followed by a collection pass.
  ///
  /// Connections that reached their terminal state are removed here, never inside a poll
  /// cycle, and the listener is resumed once capacity frees up.
  #[inline]
  pub fn loop_once(&mut self) -> crate::Result<PollResult> {
    let rslt = self.poller.poll(&mut self.context, None)?;
    for connection_id in core::mem::take(&mut self.context.closed_connections) {
      let _conn = self.context.connections.remove(&connection_id);
      self.poller.cancel(conn_token(connection_id));
    }
    if !self.context.active && self.context.connections.len() < MAX_CONNECTION_NUM {
      self.init_listener_socket()?;
    }
    Ok(rslt)
  }

  /// Invokes [`Self::loop_once`] until the poll result is no longer successful, returning the
  /// associated exit status.
  #[inline]
  pub fn run(&mut self) -> crate::Result<i32> {
    loop {
      match self.loop_once()? {
        PollResult::Success => {}
        PollResult::Timeout => return Ok(0),
        PollResult::Exit(status) => return Ok(status),
      }
    }
  }

  fn init_listener_socket(&mut self) -> crate::Result<()> {
    let listener = bind_listener(self.context.listener_addr)?;
    // keep the resolved address so that a re-bind preserves ephemeral ports
    self.context.listener_addr = listener.local_addr()?;
    let fd = listener.as_raw_fd();
    self.context.listener = Some(listener);
    self.context.active = true;
    self.poller.add_action(Action::new(
      fd,
      LISTENER_TOKEN,
      Direction::In,
      Box::new(|_| true),
      Box::new(|ctx: &mut ServerContext<T>| ctx.accept_action()),
    ));
    _debug!(addr = %self.context.listener_addr, "listening");
    Ok(())
  }
}

/// Server state reachable from within callbacks.
///
/// Every operation takes a connection identifier and tolerates identifiers of connections that
/// were dropped in the meantime.
pub struct ServerContext<T>
where
  T: Transport,
{
  pub(crate) active: bool,
  pub(crate) close_callback: Option<Callback<T>>,
  pub(crate) closed_connections: HashSet<u64>,
  pub(crate) config: T::Config,
  pub(crate) connections: HashMap<u64, Connection<T>>,
  pub(crate) last_connection_id: u64,
  pub(crate) listener: Option<TcpListener>,
  pub(crate) listener_addr: SocketAddr,
  pub(crate) message_callback: Option<MessageCallback<T>>,
  pub(crate) open_callback: Option<Callback<T>>,
  pub(crate) pending_actions: Vec<Action<Self>>,
}

impl<T> ServerContext<T>
where
  T: Transport,
{
  /// Serializes `frame` and appends the bytes to the outgoing buffer of `connection_id`.
  ///
  /// Returns `false` without side effects unless the connection finished its handshake and is
  /// not closing.
  #[inline]
  pub fn queue_frame(&mut self, connection_id: u64, frame: &Frame) -> bool {
    let Some(conn) = self.connections.get_mut(&connection_id) else {
      _warn!(id = connection_id, "unknown connection; cannot queue the frame");
      return false;
    };
    if !matches!(conn.state, ConnectionState::Connected) {
      _warn!(id = connection_id, "not connected; cannot queue the frame");
      return false;
    }
    conn.send_buffer.push_back(frame.to_bytes());
    true
  }

  /// Starts a graceful shutdown by queueing a close frame. Subsequent frames are rejected.
  ///
  /// Returns `false` without side effects unless the connection finished its handshake and is
  /// not already closing.
  #[inline]
  pub fn close_connection(&mut self, connection_id: u64) -> bool {
    match self.connections.get(&connection_id) {
      Some(conn) if matches!(conn.state, ConnectionState::Connected) => {}
      _ => {
        _warn!(id = connection_id, "not connected; cannot close the connection");
        return false;
      }
    }
    let close_frame = Frame::new_fin(OpCode::Close, Vec::new());
    let _queued = self.queue_frame(connection_id, &close_frame);
    if let Some(conn) = self.connections.get_mut(&connection_id) {
      conn.state = ConnectionState::Closing;
    }
    true
  }

  /// Discards every queued outgoing chunk of `connection_id`.
  #[inline]
  pub fn clear_buffer(&mut self, connection_id: u64) {
    if let Some(conn) = self.connections.get_mut(&connection_id) {
      conn.send_buffer.clear();
    }
  }

  /// Sum of the queued outgoing chunk sizes of `connection_id`.
  #[inline]
  pub fn buffer_bytes(&self, connection_id: u64) -> usize {
    self.connections.get(&connection_id).map_or(0, Connection::buffer_bytes)
  }

  /// Address of the remote peer of `connection_id`.
  #[inline]
  pub fn peer_addr(&self, connection_id: u64) -> crate::Result<SocketAddr> {
    let Some(conn) = self.connections.get(&connection_id) else {
      return Err(crate::Error::UnknownConnection { id: connection_id });
    };
    conn.transport.peer_addr()
  }

  /// Resolved address of the listening socket.
  #[inline]
  pub fn local_addr(&self) -> SocketAddr {
    self.listener_addr
  }

  fn accept_action(&mut self) -> crate::Result<ResultType> {
    loop {
      let Some(listener) = self.listener.as_ref() else {
        return Ok(ResultType::Continue);
      };
      match listener.accept() {
        Ok((stream, peer_addr)) => {
          let connection_id = self.last_connection_id;
          self.last_connection_id = self.last_connection_id.wrapping_add(1);
          let transport = T::accept(stream, &self.config)?;
          let fd = transport.raw_fd();
          let _prev = self.connections.insert(connection_id, Connection::new(transport));
          let token = conn_token(connection_id);
          self.pending_actions.push(Action::new(
            fd,
            token,
            Direction::In,
            Box::new(move |ctx: &Self| {
              ctx.connections.get(&connection_id).map_or(false, |conn| {
                !matches!(conn.state, ConnectionState::Connecting | ConnectionState::Closed)
              })
            }),
            Box::new(move |ctx: &mut Self| ctx.read_action(connection_id)),
          ));
          self.pending_actions.push(Action::new(
            fd,
            token,
            Direction::Out,
            Box::new(move |ctx: &Self| {
              ctx.connections.get(&connection_id).map_or(false, |conn| {
                matches!(conn.state, ConnectionState::Connecting) || conn.data_to_send()
              })
            }),
            Box::new(move |ctx: &mut Self| ctx.write_action(connection_id)),
          ));
          _debug!(id = connection_id, peer = %peer_addr, "accepted connection");
          if self.connections.len() >= MAX_CONNECTION_NUM {
            _warn!("connection capacity reached; pausing the listener");
            self.listener = None;
            self.active = false;
            return Ok(ResultType::CancelAll);
          }
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(ResultType::Continue),
        Err(err) if err.kind() == ErrorKind::Interrupted => {}
        Err(err) => return Err(err.into()),
      }
    }
  }

  fn read_action(&mut self, connection_id: u64) -> crate::Result<ResultType> {
    let (data, eof, state) = {
      let Some(conn) = self.connections.get_mut(&connection_id) else {
        return Ok(ResultType::CancelAll);
      };
      let outcome = conn.read()?;
      (outcome.data, outcome.eof, conn.state)
    };
    if data.is_empty() {
      if eof {
        self.drop_connection(connection_id);
        return Ok(ResultType::CancelAll);
      }
      return Ok(ResultType::Continue);
    }
    let rslt = match state {
      ConnectionState::NotConnected => self.on_handshake_data(connection_id, &data)?,
      ConnectionState::Connected => self.on_connected_data(connection_id, &data)?,
      ConnectionState::Closing => self.on_closing_data(connection_id, &data)?,
      ConnectionState::Connecting | ConnectionState::Closed => ResultType::Continue,
    };
    if let ResultType::CancelAll | ResultType::Exit(_) = rslt {
      return Ok(rslt);
    }
    if eof {
      self.drop_connection(connection_id);
      return Ok(ResultType::CancelAll);
    }
    Ok(rslt)
  }

  fn write_action(&mut self, connection_id: u64) -> crate::Result<ResultType> {
    let opened = {
      let Some(conn) = self.connections.get_mut(&connection_id) else {
        return Ok(ResultType::CancelAll);
      };
      if matches!(conn.state, ConnectionState::Connecting) {
        if conn.data_to_send() {
          conn.write()?;
        }
        if conn.data_to_send() {
          false
        } else {
          // the whole handshake response has been sent
          conn.state = ConnectionState::Connected;
          true
        }
      } else {
        if conn.data_to_send() {
          conn.write()?;
        }
        false
      }
    };
    if opened {
      self.invoke_open_callback(connection_id);
    }
    let finished = self.connections.get(&connection_id).map_or(false, |conn| {
      matches!(conn.state, ConnectionState::Closed) && !conn.data_to_send()
    });
    if finished {
      self.drop_connection(connection_id);
      return Ok(ResultType::CancelAll);
    }
    Ok(ResultType::Continue)
  }

  fn on_handshake_data(&mut self, connection_id: u64, data: &[u8]) -> crate::Result<ResultType> {
    let status_code = {
      let Some(conn) = self.connections.get_mut(&connection_id) else {
        return Ok(ResultType::CancelAll);
      };
      conn.handshake_parser.parse(data)?;
      let Some(request) = conn.handshake_parser.pop() else {
        return Ok(ResultType::Continue);
      };
      let response = handshake_response(&request);
      conn.send_buffer.push_back(response.serialize());
      if response.status_code() == 101 {
        conn.state = ConnectionState::Connecting;
      }
      response.status_code()
    };
    if status_code != 101 {
      _debug!(id = connection_id, status_code, "rejected handshake");
      // TODO: drain the response before dropping, the peer currently never sees the rejection
      self.drop_connection(connection_id);
      return Ok(ResultType::CancelAll);
    }
    Ok(ResultType::Continue)
  }

  fn on_connected_data(&mut self, connection_id: u64, data: &[u8]) -> crate::Result<ResultType> {
    let parse_rslt = {
      let Some(conn) = self.connections.get_mut(&connection_id) else {
        return Ok(ResultType::CancelAll);
      };
      conn.message_parser.parse(data)
    };
    if let Err(err) = parse_rslt {
      // close the connection if an invalid message was received
      _debug!(id = connection_id, error = %err, "invalid message");
      let _closed = self.close_connection(connection_id);
      return Ok(ResultType::Continue);
    }
    loop {
      let message = {
        let Some(conn) = self.connections.get_mut(&connection_id) else {
          return Ok(ResultType::CancelAll);
        };
        if !matches!(conn.state, ConnectionState::Connected) {
          break;
        }
        let Some(message) = conn.message_parser.pop() else {
          break;
        };
        message
      };
      match message.kind() {
        MessageKind::Text | MessageKind::Binary => {
          self.invoke_message_callback(connection_id, message);
        }
        MessageKind::Close => {
          let close_frame = Frame::new_fin(OpCode::Close, message.into_payload());
          let _queued = self.queue_frame(connection_id, &close_frame);
          if let Some(conn) = self.connections.get_mut(&connection_id) {
            conn.state = ConnectionState::Closed;
          }
          break;
        }
        MessageKind::Ping => {
          let pong = Frame::new_fin(OpCode::Pong, Vec::new());
          let _queued = self.queue_frame(connection_id, &pong);
        }
        MessageKind::Pong => {}
      }
    }
    Ok(ResultType::Continue)
  }

  fn on_closing_data(&mut self, connection_id: u64, data: &[u8]) -> crate::Result<ResultType> {
    let parse_rslt = {
      let Some(conn) = self.connections.get_mut(&connection_id) else {
        return Ok(ResultType::CancelAll);
      };
      conn.message_parser.parse(data)
    };
    if let Err(err) = parse_rslt {
      // already closing, invalid messages are irrelevant at this point
      _debug!(id = connection_id, error = %err, "ignoring invalid message while closing");
      return Ok(ResultType::Continue);
    }
    loop {
      let message = {
        let Some(conn) = self.connections.get_mut(&connection_id) else {
          return Ok(ResultType::CancelAll);
        };
        let Some(message) = conn.message_parser.pop() else {
          break;
        };
        message
      };
      if matches!(message.kind(), MessageKind::Close) {
        if let Some(conn) = self.connections.get_mut(&connection_id) {
          conn.state = ConnectionState::Closed;
          conn.send_buffer.clear();
        }
        // this socket does not need to be polled anymore
        self.drop_connection(connection_id);
        return Ok(ResultType::CancelAll);
      }
    }
    Ok(ResultType::Continue)
  }

  fn drop_connection(&mut self, connection_id: u64) {
    if self.closed_connections.contains(&connection_id) {
      return;
    }
    let Some(conn) = self.connections.get_mut(&connection_id) else {
      // connection does not exist any longer
      return;
    };
    conn.state = ConnectionState::Closed;
    _debug!(id = connection_id, "dropping connection");
    self.invoke_close_callback(connection_id);
    let _inserted = self.closed_connections.insert(connection_id);
  }

  fn invoke_open_callback(&mut self, connection_id: u64) {
    let Some(mut callback) = self.open_callback.take() else {
      return;
    };
    callback(self, connection_id);
    if self.open_callback.is_none() {
      self.open_callback = Some(callback);
    }
  }

  fn invoke_message_callback(&mut self, connection_id: u64, message: Message) {
    let Some(mut callback) = self.message_callback.take() else {
      return;
    };
    callback(self, connection_id, message);
    if self.message_callback.is_none() {
      self.message_callback = Some(callback);
    }
  }

  fn invoke_close_callback(&mut self, connection_id: u64) {
    let Some(mut callback) = self.close_callback.take() else {
      return;
    };
    callback(self, connection_id);
    if self.close_callback.is_none() {
      self.close_callback = Some(callback);
    }
  }
}

impl<T> PollContext for ServerContext<T>
where
  T: Transport,
{
  #[inline]
  fn pending_actions(&mut self) -> &mut Vec<Action<Self>> {
    &mut self.pending_actions
  }
}

fn conn_token(connection_id: u64) -> Token {
  Token(usize::try_from(connection_id).unwrap_or_default())
}
