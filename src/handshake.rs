use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use std::collections::VecDeque;

/// Globally unique identifier defined by RFC 6455, used to derive handshake keys.
pub const WS_MAGIC_STRING: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_READ_HEADER_LEN: usize = 64;
const MAX_READ_LEN: usize = 2 * 1024;

/// Head of an HTTP request that intends to upgrade to the WebSocket protocol.
#[derive(Debug)]
pub struct Request {
  first_line: String,
  headers: Vec<(String, String)>,
}

impl Request {
  /// Request line as received, including the method and the protocol version.
  #[inline]
  pub fn first_line(&self) -> &str {
    &self.first_line
  }

  /// Value of the first header whose name matches `name`, ignoring ASCII case.
  #[inline]
  pub fn header_value(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find_map(|(local_name, value)| local_name.eq_ignore_ascii_case(name).then_some(value.as_str()))
  }

  /// If a header named `name` exists.
  #[inline]
  pub fn has_header(&self, name: &str) -> bool {
    self.header_value(name).is_some()
  }
}

/// Consumes raw bytes and yields a queue of complete upgrade requests.
#[derive(Debug, Default)]
pub struct RequestParser {
  buffer: Vec<u8>,
  queue: VecDeque<Request>,
}

impl RequestParser {
  /// Creates an empty instance.
  #[inline]
  pub fn new() -> Self {
    Self::default()
  }

  /// Feeds raw bytes into the internal buffer, extracting as many complete request heads as
  /// possible.
  #[inline]
  pub fn parse(&mut self, bytes: &[u8]) -> crate::Result<()> {
    self.buffer.extend_from_slice(bytes);
    while let Some(head_len) = head_end(&self.buffer) {
      let request = parse_head(self.buffer.get(..head_len).unwrap_or_default())?;
      let _ = self.buffer.drain(..head_len);
      self.queue.push_back(request);
    }
    if self.buffer.len() > MAX_READ_LEN {
      return Err(crate::Error::VeryLargeHttp);
    }
    Ok(())
  }

  /// Removes the oldest complete request, if any.
  #[inline]
  pub fn pop(&mut self) -> Option<Request> {
    self.queue.pop_front()
  }

  /// If there are no complete requests.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }
}

/// Response produced for an upgrade request.
#[derive(Debug)]
pub struct Response {
  headers: Vec<(&'static str, String)>,
  reason: &'static str,
  status_code: u16,
}

impl Response {
  /// Status code of the first line.
  #[inline]
  pub fn status_code(&self) -> u16 {
    self.status_code
  }

  /// Wire form of the response: status line, headers and the final empty line.
  #[inline]
  pub fn serialize(&self) -> Vec<u8> {
    let mut rslt = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.reason);
    for (name, value) in &self.headers {
      rslt.push_str(name);
      rslt.push_str(": ");
      rslt.push_str(value);
      rslt.push_str("\r\n");
    }
    rslt.push_str("\r\n");
    rslt.into_bytes()
  }

  fn rejection(status_code: u16, reason: &'static str) -> Self {
    Self {
      headers: vec![("Content-Length", "0".into()), ("Connection", "close".into())],
      reason,
      status_code,
    }
  }
}

/// Checks the properties every upgrade request must fulfill.
pub fn is_valid_handshake_request(request: &Request) -> bool {
  let first_line = request.first_line();
  if !first_line.starts_with("GET") {
    _debug!("invalid WebSocket request: method must be GET");
    return false;
  }
  let Some(last_space) = first_line.rfind(' ') else {
    return false;
  };
  let version = first_line.get(last_space.wrapping_add(1)..).unwrap_or_default();
  if version != "HTTP/1.1" && version != "HTTP/2" {
    _debug!("invalid WebSocket request: only HTTP/1.1 and HTTP/2 are allowed");
    return false;
  }
  if !request.header_value("Connection").map_or(false, |el| el.contains("Upgrade")) {
    _debug!("invalid WebSocket request: 'Connection: Upgrade' is required");
    return false;
  }
  if request.header_value("Upgrade") != Some("websocket") {
    _debug!("invalid WebSocket request: 'Upgrade: websocket' is required");
    return false;
  }
  // Sec-WebSocket-Key is required to protect against abuse
  if !request.has_header("Sec-WebSocket-Key") {
    _debug!("invalid WebSocket request: 'Sec-WebSocket-Key' is required");
    return false;
  }
  true
}

/// Builds the response for an upgrade request.
///
/// Invalid requests receive `400 Bad Request` and requests without an `Origin` header receive
/// `403 Forbidden`. Everything else is accepted with `101 Switching Protocols`.
pub fn handshake_response(request: &Request) -> Response {
  if !is_valid_handshake_request(request) {
    return Response::rejection(400, "Bad Request");
  }
  // requests without an Origin are rejected (same-origin checks could come later)
  if !request.has_header("Origin") {
    return Response::rejection(403, "Forbidden");
  }
  let sec_key = request.header_value("Sec-WebSocket-Key").unwrap_or_default();
  Response {
    headers: vec![
      ("Connection", "Upgrade".into()),
      ("Upgrade", "websocket".into()),
      ("Sec-WebSocket-Accept", derived_key(sec_key)),
    ],
    reason: "Switching Protocols",
    status_code: 101,
  }
}

fn derived_key(sec_key: &str) -> String {
  let mut sha1 = Sha1::new();
  sha1.update(sec_key.as_bytes());
  sha1.update(WS_MAGIC_STRING.as_bytes());
  STANDARD.encode(sha1.finalize())
}

fn head_end(buffer: &[u8]) -> Option<usize> {
  buffer.windows(4).position(|el| el == b"\r\n\r\n").map(|idx| idx.wrapping_add(4))
}

fn parse_head(head: &[u8]) -> crate::Result<Request> {
  let first_line_len = head.windows(2).position(|el| el == b"\r\n").unwrap_or(head.len());
  let first_line = String::from_utf8_lossy(head.get(..first_line_len).unwrap_or_default()).into_owned();
  let header_bytes = head.get(first_line_len.wrapping_add(2)..).unwrap_or_default();
  let mut header_buffer = [httparse::EMPTY_HEADER; MAX_READ_HEADER_LEN];
  let httparse::Status::Complete((_, parsed)) = httparse::parse_headers(header_bytes, &mut header_buffer)?
  else {
    return Err(crate::Error::IncompleteHttpHeaders);
  };
  let headers = parsed
    .iter()
    .map(|el| (el.name.to_owned(), String::from_utf8_lossy(el.value).into_owned()))
    .collect();
  Ok(Request { first_line, headers })
}

#[cfg(test)]
mod tests {
  use crate::{
    handshake::{handshake_response, is_valid_handshake_request, RequestParser},
    Error,
  };

  fn request_from(head: &str) -> crate::Request {
    let mut parser = RequestParser::new();
    parser.parse(head.as_bytes()).unwrap();
    parser.pop().unwrap()
  }

  fn valid_head(extra: &str) -> String {
    format!(
      "GET /chat HTTP/1.1\r\nHost: example.com\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n{extra}\r\n"
    )
  }

  #[test]
  fn sample_key_derives_documented_accept_value() {
    let request = request_from(&valid_head("Origin: http://example.com\r\n"));
    let response = handshake_response(&request);
    assert_eq!(response.status_code(), 101);
    let serialized = String::from_utf8(response.serialize()).unwrap();
    assert!(serialized.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(serialized.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(serialized.ends_with("\r\n\r\n"));
  }

  #[test]
  fn post_method_is_rejected() {
    let request = request_from(
      "POST / HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: a\r\n\r\n",
    );
    assert!(!is_valid_handshake_request(&request));
    assert_eq!(handshake_response(&request).status_code(), 400);
  }

  #[test]
  fn http_2_request_line_is_accepted() {
    let request = request_from(
      "GET / HTTP/2\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: a\r\n\
       Origin: o\r\n\r\n",
    );
    assert_eq!(handshake_response(&request).status_code(), 101);
  }

  #[test]
  fn http_1_0_is_rejected() {
    let request = request_from(
      "GET / HTTP/1.0\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: a\r\n\r\n",
    );
    assert!(!is_valid_handshake_request(&request));
  }

  #[test]
  fn connection_header_may_carry_other_tokens() {
    let request = request_from(
      "GET / HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\
       Sec-WebSocket-Key: a\r\nOrigin: o\r\n\r\n",
    );
    assert_eq!(handshake_response(&request).status_code(), 101);
  }

  #[test]
  fn lowercase_upgrade_token_is_rejected() {
    let request = request_from(
      "GET / HTTP/1.1\r\nConnection: upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: a\r\n\r\n",
    );
    assert!(!is_valid_handshake_request(&request));
  }

  #[test]
  fn missing_sec_key_is_rejected() {
    let request =
      request_from("GET / HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n");
    assert!(!is_valid_handshake_request(&request));
  }

  #[test]
  fn missing_origin_yields_forbidden() {
    let request = request_from(&valid_head(""));
    let response = handshake_response(&request);
    assert_eq!(response.status_code(), 403);
    let serialized = String::from_utf8(response.serialize()).unwrap();
    assert!(serialized.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(serialized.contains("Content-Length: 0\r\n"));
    assert!(serialized.contains("Connection: close\r\n"));
  }

  #[test]
  fn byte_at_a_time_delivery() {
    let mut parser = RequestParser::new();
    for byte in valid_head("Origin: o\r\n").as_bytes() {
      assert!(parser.is_empty());
      parser.parse(&[*byte]).unwrap();
    }
    assert!(parser.pop().is_some());
  }

  #[test]
  fn header_names_ignore_case() {
    let request = request_from(
      "GET / HTTP/1.1\r\nconnection: Upgrade\r\nupgrade: websocket\r\nsec-websocket-key: a\r\n\
       origin: o\r\n\r\n",
    );
    assert_eq!(handshake_response(&request).status_code(), 101);
  }

  #[test]
  fn oversized_head_is_rejected() {
    let mut parser = RequestParser::new();
    let rslt = parser.parse(&vec![b'a'; 3 * 1024]);
    assert!(matches!(rslt, Err(Error::VeryLargeHttp)));
  }
}
