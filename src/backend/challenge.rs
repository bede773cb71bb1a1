// src/backend/challenge.rs
//! Connectionless `connect` challenge, the probe r1 servers answer without a
//! session.
//!
//! Request: `FF FF FF FF 48 "connect" <nonce> 00`
//! Reply:   `FF FF FF FF 49 <server challenge:u32 le> "connect" <nonce>`
//!
//! The nonce is `0x` followed by eight uppercase hex digits.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use rand::Rng;
use std::fmt::Write;
use std::io::Cursor;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use crate::error::BackendError;

pub const CONNECTIONLESS_HEADER: i32 = -1;
pub const CHALLENGE_REQUEST: u8 = 0x48;
pub const CHALLENGE_RESPONSE: u8 = 0x49;
const CONNECT: &[u8] = b"connect";
const NONCE_LEN: usize = 10;
const RESPONSE_LEN: usize = 4 + 1 + 4 + CONNECT.len() + NONCE_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(String);

impl Nonce {
    pub fn random() -> Self {
        let bytes: [u8; 4] = rand::thread_rng().gen();
        let mut nonce = String::with_capacity(NONCE_LEN);
        nonce.push_str("0x");
        for byte in bytes {
            let _ = write!(&mut nonce, "{:02X}", byte);
        }
        Nonce(nonce)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn encode_request(nonce: &Nonce) -> Vec<u8> {
    let mut packet = Vec::with_capacity(5 + CONNECT.len() + NONCE_LEN + 1);
    // Writing into a Vec cannot fail.
    let _ = packet.write_i32::<LittleEndian>(CONNECTIONLESS_HEADER);
    packet.push(CHALLENGE_REQUEST);
    packet.extend_from_slice(CONNECT);
    packet.extend_from_slice(nonce.as_str().as_bytes());
    packet.push(0x00);
    packet
}

/// Builds the reply a server sends back. Used by responders and tests.
pub fn encode_response(server_challenge: u32, nonce: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(RESPONSE_LEN);
    let _ = packet.write_i32::<LittleEndian>(CONNECTIONLESS_HEADER);
    packet.push(CHALLENGE_RESPONSE);
    let _ = packet.write_u32::<LittleEndian>(server_challenge);
    packet.extend_from_slice(CONNECT);
    packet.extend_from_slice(nonce.as_bytes());
    packet
}

fn read_header(cursor: &mut Cursor<&[u8]>, expected_kind: u8) -> Result<(), BackendError> {
    let header = cursor
        .read_i32::<LittleEndian>()
        .map_err(|_| BackendError::Protocol("packet too short".into()))?;
    let kind = cursor
        .read_u8()
        .map_err(|_| BackendError::Protocol("packet too short".into()))?;
    if header != CONNECTIONLESS_HEADER || kind != expected_kind {
        return Err(BackendError::Protocol(format!(
            "unexpected header {:#010x}/{:#04x}",
            header, kind
        )));
    }
    Ok(())
}

/// Extracts the nonce from a challenge request.
pub fn parse_request(packet: &[u8]) -> Result<String, BackendError> {
    let mut cursor = Cursor::new(packet);
    read_header(&mut cursor, CHALLENGE_REQUEST)?;
    let rest = &packet[cursor.position() as usize..];
    let body = rest
        .strip_prefix(CONNECT)
        .ok_or_else(|| BackendError::Protocol("missing connect string".into()))?;
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    Ok(String::from_utf8_lossy(&body[..end]).into_owned())
}

/// Validates a reply against the nonce we sent and returns the server
/// challenge value.
pub fn parse_response(packet: &[u8], expected: &Nonce) -> Result<u32, BackendError> {
    if packet.len() < RESPONSE_LEN {
        return Err(BackendError::Protocol(format!("reply of {} bytes is too short", packet.len())));
    }
    let mut cursor = Cursor::new(packet);
    read_header(&mut cursor, CHALLENGE_RESPONSE)?;
    let server_challenge = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| BackendError::Protocol("packet too short".into()))?;

    let connect_at = cursor.position() as usize;
    let nonce_at = connect_at + CONNECT.len();
    if &packet[connect_at..nonce_at] != CONNECT {
        return Err(BackendError::Protocol(format!(
            "invalid connect string {:?}",
            &packet[connect_at..nonce_at]
        )));
    }
    let nonce = String::from_utf8_lossy(&packet[nonce_at..nonce_at + NONCE_LEN]);
    if !nonce.starts_with("0x") {
        return Err(BackendError::Protocol(format!("invalid nonce format {}", nonce)));
    }
    if nonce != expected.as_str() {
        return Err(BackendError::Protocol(format!(
            "nonce mismatch, sent {}, received {}",
            expected.as_str(),
            nonce
        )));
    }
    Ok(server_challenge)
}

/// Sends one challenge and waits for a valid reply from `addr`. Returns
/// the round trip time.
pub async fn probe(addr: SocketAddrV4, timeout: Duration) -> Result<Duration, BackendError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let nonce = Nonce::random();
    let started = Instant::now();
    socket.send_to(&encode_request(&nonce), addr).await?;
    debug!("Challenge sent to {} with nonce {}", addr, nonce.as_str());

    let deadline = tokio::time::Instant::now() + timeout;
    let mut buffer = [0u8; 1024];
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await {
            Ok(received) => received?,
            Err(_) => {
                debug!("Timed out waiting for challenge reply from {}", addr);
                return Err(BackendError::NoResponse);
            }
        };
        if from != SocketAddr::V4(addr) {
            debug!("Ignoring datagram from {} while probing {}", from, addr);
            continue;
        }
        match parse_response(&buffer[..len], &nonce) {
            Ok(_) => return Ok(started.elapsed()),
            Err(e) => {
                warn!("Invalid challenge reply from {}: {}", addr, e);
                return Err(e);
            }
        }
    }
}

/// Broadcasts one challenge per port and collects every server that
/// answers within `window`.
pub async fn broadcast(
    targets: &[SocketAddrV4],
    window: Duration,
) -> Result<Vec<(SocketAddrV4, Duration)>, BackendError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    let nonce = Nonce::random();
    let request = encode_request(&nonce);
    let started = Instant::now();
    for target in targets {
        if let Err(e) = socket.send_to(&request, target).await {
            warn!("Could not send LAN challenge to {}: {}", target, e);
        }
    }

    let deadline = tokio::time::Instant::now() + window;
    let mut found: Vec<(SocketAddrV4, Duration)> = Vec::new();
    let mut buffer = [0u8; 1024];
    while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await {
        let (len, from) = received?;
        let SocketAddr::V4(from) = from else {
            continue;
        };
        if parse_response(&buffer[..len], &nonce).is_ok() && !found.iter().any(|(a, _)| *a == from) {
            debug!("LAN server answered from {}", from);
            found.push((from, started.elapsed()));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn request_layout() {
        let nonce = Nonce("0x0A1B2C3D".to_string());
        let packet = encode_request(&nonce);
        assert_eq!(&packet[..5], &[0xFF, 0xFF, 0xFF, 0xFF, 0x48]);
        assert_eq!(&packet[5..12], b"connect");
        assert_eq!(&packet[12..22], b"0x0A1B2C3D");
        assert_eq!(packet[22], 0);
        assert_eq!(parse_request(&packet).unwrap(), "0x0A1B2C3D");
    }

    #[test]
    fn random_nonce_shape() {
        let nonce = Nonce::random();
        assert_eq!(nonce.as_str().len(), NONCE_LEN);
        assert!(nonce.as_str().starts_with("0x"));
        assert!(nonce.as_str()[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn accepts_matching_reply() {
        let nonce = Nonce::random();
        let reply = encode_response(0xDEADBEEF, nonce.as_str());
        assert_eq!(reply.len(), RESPONSE_LEN);
        assert_eq!(parse_response(&reply, &nonce).unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn rejects_bad_replies() {
        let nonce = Nonce("0x00000001".to_string());
        let wrong_nonce = encode_response(1, "0x00000002");
        assert!(parse_response(&wrong_nonce, &nonce).is_err());

        let mut wrong_kind = encode_response(1, nonce.as_str());
        wrong_kind[4] = CHALLENGE_REQUEST;
        assert!(parse_response(&wrong_kind, &nonce).is_err());

        let mut wrong_connect = encode_response(1, nonce.as_str());
        wrong_connect[9] = b'k';
        assert!(parse_response(&wrong_connect, &nonce).is_err());

        assert!(parse_response(&[0xFF; 21], &nonce).is_err());
    }

    #[tokio::test]
    async fn probe_times_out_against_silent_socket() {
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = match silent.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        let result = probe(addr, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(BackendError::NoResponse)));
    }

    #[tokio::test]
    async fn probe_measures_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = match server.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let nonce = parse_request(&buf[..len]).unwrap();
            server.send_to(&encode_response(7, &nonce), from).await.unwrap();
        });
        let rtt = probe(addr, Duration::from_secs(2)).await.unwrap();
        assert!(rtt < Duration::from_secs(2));
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
    }
}
