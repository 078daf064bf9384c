mod common;

use common::{handshake_head, masked_frame, read_frame, read_http_head};
use std::{
  io::Write,
  net::{SocketAddr, TcpStream},
  sync::mpsc::{channel, Receiver},
  thread,
  time::{Duration, Instant},
};
use wsmux::{Frame, MessageKind, OpCode, TcpServer};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Event {
  Close(u64),
  Message(u64, MessageKind, Vec<u8>),
  Open(u64),
}

fn start_server() -> (SocketAddr, Receiver<Event>) {
  let _rslt = tracing_subscriber::fmt().try_init();
  let mut server = TcpServer::new("127.0.0.1:0".parse().unwrap(), ()).unwrap();
  let addr = server.local_addr();
  let (tx, rx) = channel();
  let open_tx = tx.clone();
  server.set_open_callback(move |_, id| {
    let _rslt = open_tx.send(Event::Open(id));
  });
  let message_tx = tx.clone();
  server.set_message_callback(move |ctx, id, message| {
    let _rslt = message_tx.send(Event::Message(id, message.kind(), message.payload().to_vec()));
    let reply = Frame::new_fin(OpCode::Text, b"world".to_vec());
    let _queued = ctx.queue_frame(id, &reply);
  });
  server.set_close_callback(move |_, id| {
    let _rslt = tx.send(Event::Close(id));
  });
  let _handle = thread::spawn(move || {
    let _rslt = server.run();
  });
  (addr, rx)
}

#[test]
fn happy_path_exchanges_messages_and_closes() {
  let (addr, events) = start_server();
  let mut stream = TcpStream::connect(addr).unwrap();
  stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();

  stream.write_all(handshake_head(true).as_bytes()).unwrap();
  let head = read_http_head(&mut stream);
  assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
  assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"), "{head}");
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open(_)));

  stream.write_all(&masked_frame(0b1000_0001, b"hello")).unwrap();
  match events.recv_timeout(RECV_TIMEOUT).unwrap() {
    Event::Message(_, kind, payload) => {
      assert_eq!(kind, MessageKind::Text);
      assert_eq!(payload, b"hello");
    }
    other => panic!("unexpected event: {other:?}"),
  }
  let (first, payload) = read_frame(&mut stream);
  assert_eq!(first, 0b1000_0001);
  assert_eq!(payload, b"world");

  stream.write_all(&masked_frame(0b1000_1000, &[0x03, 0xE8])).unwrap();
  let (first, payload) = read_frame(&mut stream);
  assert_eq!(first, 0b1000_1000);
  assert_eq!(payload, &[0x03, 0xE8]);
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(_)));
}

#[test]
fn missing_origin_drops_without_a_visible_response() {
  let (addr, events) = start_server();
  let mut stream = TcpStream::connect(addr).unwrap();
  stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();

  stream.write_all(handshake_head(false).as_bytes()).unwrap();
  // the rejection is queued but the connection is dropped before it can be flushed
  let head = read_http_head(&mut stream);
  assert!(head.is_empty(), "{head}");
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(_)));
  assert!(events.try_recv().is_err());
}

#[test]
fn wrong_method_drops_without_a_visible_response() {
  let (addr, events) = start_server();
  let mut stream = TcpStream::connect(addr).unwrap();
  stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();

  let head = handshake_head(true).replacen("GET", "POST", 1);
  stream.write_all(head.as_bytes()).unwrap();
  let response = read_http_head(&mut stream);
  assert!(response.is_empty(), "{response}");
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(_)));
}

#[test]
fn malformed_frame_triggers_a_graceful_close() {
  let (addr, events) = start_server();
  let mut stream = TcpStream::connect(addr).unwrap();
  stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();

  stream.write_all(handshake_head(true).as_bytes()).unwrap();
  let head = read_http_head(&mut stream);
  assert!(head.starts_with("HTTP/1.1 101"), "{head}");
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open(_)));

  // reserved bits set
  stream.write_all(&[0b1111_0001, 0b1000_0000, 0, 0, 0, 0]).unwrap();
  let (first, payload) = read_frame(&mut stream);
  assert_eq!(first, 0b1000_1000);
  assert!(payload.is_empty());

  stream.write_all(&masked_frame(0b1000_1000, &[])).unwrap();
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Close(_)));
}

#[test]
fn ping_elicits_an_empty_pong() {
  let (addr, events) = start_server();
  let mut stream = TcpStream::connect(addr).unwrap();
  stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();

  stream.write_all(handshake_head(true).as_bytes()).unwrap();
  let _head = read_http_head(&mut stream);
  assert!(matches!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open(_)));

  stream.write_all(&masked_frame(0b1000_1001, b"payload-is-dropped")).unwrap();
  let (first, payload) = read_frame(&mut stream);
  assert_eq!(first, 0b1000_1010);
  assert!(payload.is_empty());
}

#[test]
fn capacity_pauses_and_resumes_the_listener() {
  let (addr, _events) = start_server();
  let mut held: Vec<TcpStream> =
    (0..60).map(|_| TcpStream::connect(addr).unwrap()).collect();

  // in-flight attempts may still land in the backlog, so probe until refusal
  let mut probes = Vec::new();
  let deadline = Instant::now() + Duration::from_secs(10);
  loop {
    assert!(Instant::now() < deadline, "listener never paused");
    match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
      Ok(stream) => probes.push(stream),
      Err(_) => break,
    }
    thread::sleep(Duration::from_millis(20));
  }

  // freeing one slot re-arms the listener; probes may occupy accepted slots, so they go too
  drop(held.pop());
  drop(probes);
  let deadline = Instant::now() + Duration::from_secs(10);
  let mut reconnected = false;
  while Instant::now() < deadline {
    if let Ok(mut stream) = TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
      stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
      stream.write_all(handshake_head(true).as_bytes()).unwrap();
      let head = read_http_head(&mut stream);
      if head.starts_with("HTTP/1.1 101") {
        reconnected = true;
        break;
      }
    }
    thread::sleep(Duration::from_millis(50));
  }
  assert!(reconnected, "listener never resumed");
}
