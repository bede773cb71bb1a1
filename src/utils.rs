// src/utils.rs
use byteorder::{BigEndian, ByteOrder};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{SystemTime, UNIX_EPOCH};

/// Splits a host-order IPv4 value into its four big-endian octets.
pub fn ipv4_octets(ip: u32) -> [u8; 4] {
    let mut octets = [0u8; 4];
    BigEndian::write_u32(&mut octets, ip);
    octets
}

pub fn ipv4_from_u32(ip: u32) -> Ipv4Addr {
    let [a, b, c, d] = ipv4_octets(ip);
    Ipv4Addr::new(a, b, c, d)
}

pub fn ipv4_to_u32(ip: Ipv4Addr) -> u32 {
    BigEndian::read_u32(&ip.octets())
}

/// `a.b.c.d:port` for a host-order IPv4 value.
pub fn format_ipv4(ip: u32, port: u16) -> String {
    let [a, b, c, d] = ipv4_octets(ip);
    format!("{}.{}.{}.{}:{}", a, b, c, d, port)
}

/// Parses `ip` or `ip:port`. Only IPv4 is supported.
pub fn parse_ip_or_socket(input: &str) -> Result<(Ipv4Addr, Option<u16>), String> {
    let input = input.trim();
    if let Ok(addr) = input.parse::<SocketAddrV4>() {
        return Ok((*addr.ip(), Some(addr.port())));
    }
    input
        .parse::<Ipv4Addr>()
        .map(|ip| (ip, None))
        .map_err(|_| format!("'{}' is not an IPv4 address or IPv4:port", input))
}

pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}
