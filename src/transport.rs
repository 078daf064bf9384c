use crate::tls::TlsContext;
use mio::net::{TcpListener, TcpStream};
use rustls::ServerConnection;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
  collections::VecDeque,
  io::{ErrorKind, Read, Write},
  net::SocketAddr,
  os::fd::{AsRawFd, RawFd},
};

const READ_CHUNK_LEN: usize = 4096;

/// Bytes produced by a single read pass over a socket.
#[derive(Debug)]
pub struct ReadOutcome {
  /// Everything the socket had to offer.
  pub data: Vec<u8>,
  /// If the peer will not send anything else.
  pub eof: bool,
}

/// Uniform operations over the supported socket variants.
pub trait Transport: Send + Sized {
  /// Variant-specific acceptance state shared by every connection.
  type Config: Send;

  /// Wraps a freshly accepted client socket.
  fn accept(stream: TcpStream, config: &Self::Config) -> crate::Result<Self>;

  /// Reads whatever the socket currently has.
  fn read(&mut self) -> crate::Result<ReadOutcome>;

  /// Writes as much of `send_buffer` as the variant policy allows, front to back.
  fn drain(&mut self, send_buffer: &mut VecDeque<Vec<u8>>) -> crate::Result<()>;

  /// If the variant holds undelivered bytes outside of the caller-managed buffer.
  fn wants_write(&self) -> bool;

  /// Address of the remote peer.
  fn peer_addr(&self) -> crate::Result<SocketAddr>;

  /// Raw descriptor used for readiness registration.
  fn raw_fd(&self) -> RawFd;
}

/// Plain non-blocking TCP socket.
///
/// A chunk that could only be partially delivered is truncated in place and stays at the front
/// of the buffer for the next writable readiness.
#[derive(Debug)]
pub struct TcpTransport {
  stream: TcpStream,
}

impl Transport for TcpTransport {
  type Config = ();

  #[inline]
  fn accept(stream: TcpStream, _: &Self::Config) -> crate::Result<Self> {
    let _rslt = stream.set_nodelay(true);
    Ok(Self { stream })
  }

  #[inline]
  fn read(&mut self) -> crate::Result<ReadOutcome> {
    read_stream(&mut self.stream)
  }

  #[inline]
  fn drain(&mut self, send_buffer: &mut VecDeque<Vec<u8>>) -> crate::Result<()> {
    while let Some(chunk) = send_buffer.front_mut() {
      match self.stream.write(chunk) {
        Ok(0) => break,
        Ok(written) if written == chunk.len() => {
          let _ = send_buffer.pop_front();
        }
        Ok(written) => {
          let _ = chunk.drain(..written);
          break;
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => break,
        Err(err) if err.kind() == ErrorKind::Interrupted => {}
        Err(err) => return Err(err.into()),
      }
    }
    Ok(())
  }

  #[inline]
  fn wants_write(&self) -> bool {
    false
  }

  #[inline]
  fn peer_addr(&self) -> crate::Result<SocketAddr> {
    Ok(self.stream.peer_addr()?)
  }

  #[inline]
  fn raw_fd(&self) -> RawFd {
    self.stream.as_raw_fd()
  }
}

/// Non-blocking TLS socket.
///
/// Outgoing chunks are moved whole into the TLS session, which performs its own unbounded
/// buffering. Ciphertext is flushed opportunistically after reads and writes.
#[derive(Debug)]
pub struct TlsTransport {
  session: ServerConnection,
  stream: TcpStream,
}

impl TlsTransport {
  fn flush_session(&mut self) -> crate::Result<()> {
    while self.session.wants_write() {
      match self.session.write_tls(&mut self.stream) {
        Ok(0) => break,
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::WouldBlock => break,
        Err(err) if err.kind() == ErrorKind::Interrupted => {}
        Err(err) => return Err(err.into()),
      }
    }
    Ok(())
  }
}

impl Transport for TlsTransport {
  type Config = TlsContext;

  #[inline]
  fn accept(stream: TcpStream, config: &Self::Config) -> crate::Result<Self> {
    let _rslt = stream.set_nodelay(true);
    let mut session = ServerConnection::new(config.server_config())?;
    session.set_buffer_limit(None);
    Ok(Self { session, stream })
  }

  #[inline]
  fn read(&mut self) -> crate::Result<ReadOutcome> {
    let mut eof = false;
    loop {
      match self.session.read_tls(&mut self.stream) {
        Ok(0) => {
          eof = true;
          break;
        }
        Ok(_) => {
          if let Err(err) = self.session.process_new_packets() {
            // give the outgoing alert a chance to leave before reporting
            let _rslt = self.flush_session();
            return Err(err.into());
          }
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => break,
        Err(err) if err.kind() == ErrorKind::Interrupted => {}
        Err(err) => return Err(err.into()),
      }
    }
    let mut data = Vec::new();
    let mut chunk = [0; READ_CHUNK_LEN];
    loop {
      match self.session.reader().read(&mut chunk) {
        Ok(0) => {
          eof = true;
          break;
        }
        Ok(read) => data.extend_from_slice(chunk.get(..read).unwrap_or_default()),
        Err(err) if err.kind() == ErrorKind::WouldBlock => break,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
          eof = true;
          break;
        }
        Err(err) => return Err(err.into()),
      }
    }
    self.flush_session()?;
    Ok(ReadOutcome { data, eof })
  }

  #[inline]
  fn drain(&mut self, send_buffer: &mut VecDeque<Vec<u8>>) -> crate::Result<()> {
    while let Some(chunk) = send_buffer.pop_front() {
      // never partial at this layer, the session buffers whole chunks
      self.session.writer().write_all(&chunk)?;
    }
    self.flush_session()
  }

  #[inline]
  fn wants_write(&self) -> bool {
    self.session.wants_write()
  }

  #[inline]
  fn peer_addr(&self) -> crate::Result<SocketAddr> {
    Ok(self.stream.peer_addr()?)
  }

  #[inline]
  fn raw_fd(&self) -> RawFd {
    self.stream.as_raw_fd()
  }
}

pub(crate) fn bind_listener(addr: SocketAddr) -> crate::Result<TcpListener> {
  let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
  socket.set_reuse_address(true)?;
  socket.set_reuse_port(true)?;
  socket.set_nonblocking(true)?;
  socket.bind(&addr.into())?;
  socket.listen(1024)?;
  Ok(TcpListener::from_std(socket.into()))
}

pub(crate) fn read_stream(stream: &mut TcpStream) -> crate::Result<ReadOutcome> {
  let mut data = Vec::new();
  let mut eof = false;
  let mut chunk = [0; READ_CHUNK_LEN];
  loop {
    match stream.read(&mut chunk) {
      Ok(0) => {
        eof = true;
        break;
      }
      Ok(read) => data.extend_from_slice(chunk.get(..read).unwrap_or_default()),
      Err(err) if err.kind() == ErrorKind::WouldBlock => break,
      Err(err) if err.kind() == ErrorKind::Interrupted => {}
      Err(err) => return Err(err.into()),
    }
  }
  Ok(ReadOutcome { data, eof })
}
