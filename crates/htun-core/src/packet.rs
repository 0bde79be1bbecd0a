//! Minimal IPv4 inspection and construction.
//!
//! The tunnel never routes, but it needs to know where a packet claims to
//! come from and where it is going, and the CLI and tests need a real
//! packet to send.

use std::net::Ipv4Addr;

/// Minimum IPv4 header length (no options).
pub const IPV4_MIN_HEADER: usize = 20;

const IP_VERSION_4: u8 = 4;
const PROTO_ICMP: u8 = 1;
const ICMP_ECHO_REQUEST: u8 = 8;

/// Source and destination of an IPv4 packet, if it is one.
pub fn ipv4_endpoints(packet: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr)> {
    if packet.len() < IPV4_MIN_HEADER || packet[0] >> 4 != IP_VERSION_4 {
        return None;
    }
    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    Some((src, dst))
}

/// RFC 1071 internet checksum.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build an IPv4 ICMP echo request.
pub fn icmp_echo_request(src: Ipv4Addr, dst: Ipv4Addr, id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let icmp_len = 8 + payload.len();
    let total_len = IPV4_MIN_HEADER + icmp_len;
    let mut packet = vec![0u8; total_len];

    // IPv4 header
    packet[0] = (IP_VERSION_4 << 4) | 5;
    packet[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[8] = 64; // TTL
    packet[9] = PROTO_ICMP;
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    let header_sum = checksum(&packet[..IPV4_MIN_HEADER]);
    packet[10..12].copy_from_slice(&header_sum.to_be_bytes());

    // ICMP echo
    let icmp = &mut packet[IPV4_MIN_HEADER..];
    icmp[0] = ICMP_ECHO_REQUEST;
    icmp[4..6].copy_from_slice(&id.to_be_bytes());
    icmp[6..8].copy_from_slice(&seq.to_be_bytes());
    icmp[8..].copy_from_slice(payload);
    let icmp_sum = checksum(icmp);
    icmp[2..4].copy_from_slice(&icmp_sum.to_be_bytes());

    packet
}
