#![allow(dead_code)]

use std::io::Read;

pub const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

/// Upgrade request the reference test vectors are built around.
pub fn handshake_head(origin: bool) -> String {
  let mut head = String::from(
    "GET /chat HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
  );
  if origin {
    head.push_str("Origin: http://localhost\r\n");
  }
  head.push_str("\r\n");
  head
}

/// Reads one byte at a time until the head terminator or EOF.
pub fn read_http_head<R>(stream: &mut R) -> String
where
  R: Read,
{
  let mut head = Vec::new();
  let mut byte = [0];
  loop {
    match stream.read(&mut byte) {
      Ok(0) => break,
      Ok(_) => {
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
          break;
        }
      }
      Err(_) => break,
    }
  }
  String::from_utf8_lossy(&head).into_owned()
}

/// Client-side frame: masked, as mandated for the client-to-server direction.
pub fn masked_frame(first: u8, payload: &[u8]) -> Vec<u8> {
  let mut bytes = vec![first];
  match payload.len() {
    0..=125 => bytes.push(0b1000_0000 | u8::try_from(payload.len()).unwrap()),
    126..=0xFFFF => {
      bytes.push(0b1000_0000 | 126);
      bytes.extend_from_slice(&u16::try_from(payload.len()).unwrap().to_be_bytes());
    }
    _ => {
      bytes.push(0b1000_0000 | 127);
      bytes.extend_from_slice(&u64::try_from(payload.len()).unwrap().to_be_bytes());
    }
  }
  bytes.extend_from_slice(&MASK);
  bytes.extend(payload.iter().zip(MASK.iter().cycle()).map(|(elem, mask)| elem ^ mask));
  bytes
}

/// Server-side frames are unmasked. Returns the first header byte and the payload.
pub fn read_frame<R>(stream: &mut R) -> (u8, Vec<u8>)
where
  R: Read,
{
  let mut header = [0; 2];
  stream.read_exact(&mut header).unwrap();
  assert_eq!(header[1] & 0b1000_0000, 0, "server frames must not be masked");
  let payload_len = match header[1] & 0b0111_1111 {
    126 => {
      let mut ext = [0; 2];
      stream.read_exact(&mut ext).unwrap();
      usize::from(u16::from_be_bytes(ext))
    }
    127 => {
      let mut ext = [0; 8];
      stream.read_exact(&mut ext).unwrap();
      usize::try_from(u64::from_be_bytes(ext)).unwrap()
    }
    el => usize::from(el),
  };
  let mut payload = vec![0; payload_len];
  stream.read_exact(&mut payload).unwrap();
  (header[0], payload)
}
