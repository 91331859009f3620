//! Minimal L2/L3 header definitions and a slice-based 5-tuple extractor.
//!
//! Used by the host-stack classifier and the zero-copy drainer. The XDP
//! program cannot share this code (the verifier requires its own explicit
//! bounds-check pattern) but mirrors the same constants and field offsets.

use crate::FlowKey;

pub const ETH_HLEN: usize = 14;
pub const IPV4_HLEN_MIN: usize = 20;

/// Ethertypes in host byte order.
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;
pub const ETH_P_IPV6: u16 = 0x86DD;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Why a frame could not be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Frame shorter than an Ethernet header.
    TruncatedEthernet,
    /// IPv4 ethertype but the IPv4 header is incomplete or malformed.
    TruncatedIpv4,
}

/// Outcome of parsing one frame up to L4 ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsedFrame {
    /// Not an IPv4 frame; carries the ethertype in host byte order.
    NonIp { ethertype: u16 },
    /// IPv4 frame with its 5-tuple. Ports are zero for protocols without
    /// them, or when the frame is too short to carry them.
    Ipv4 { key: FlowKey },
}

/// Extract the 5-tuple from an Ethernet frame.
///
/// Mirrors the fast-path parser: bounds check L2, dispatch on ethertype,
/// bounds check L3, then read ports from the first four transport bytes
/// when present. Truncated transport headers are not an error; the ports
/// stay zero.
pub fn parse_frame(frame: &[u8]) -> Result<ParsedFrame, ParseError> {
    if frame.len() < ETH_HLEN {
        return Err(ParseError::TruncatedEthernet);
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETH_P_IP {
        return Ok(ParsedFrame::NonIp { ethertype });
    }

    let ip = &frame[ETH_HLEN..];
    if ip.len() < IPV4_HLEN_MIN {
        return Err(ParseError::TruncatedIpv4);
    }
    let version = ip[0] >> 4;
    let ihl = usize::from(ip[0] & 0x0F) * 4;
    if version != 4 || ihl < IPV4_HLEN_MIN || ip.len() < ihl {
        return Err(ParseError::TruncatedIpv4);
    }

    let protocol = ip[9];
    let mut key = FlowKey {
        src_ip: u32::from_ne_bytes([ip[12], ip[13], ip[14], ip[15]]),
        dst_ip: u32::from_ne_bytes([ip[16], ip[17], ip[18], ip[19]]),
        src_port: 0,
        dst_port: 0,
        protocol,
        _pad: [0; 3],
    };

    if protocol == IPPROTO_TCP || protocol == IPPROTO_UDP {
        let l4 = &ip[ihl..];
        if l4.len() >= 4 {
            key.src_port = u16::from_ne_bytes([l4[0], l4[1]]);
            key.dst_port = u16::from_ne_bytes([l4[2], l4[3]]);
        }
    }

    Ok(ParsedFrame::Ipv4 { key })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(protocol: u8, l4: &[u8]) -> [u8; 64] {
        let mut f = [0u8; 64];
        f[12] = 0x08;
        f[13] = 0x00;
        f[14] = 0x45; // version 4, ihl 5
        f[23] = protocol;
        f[26..30].copy_from_slice(&[10, 0, 0, 1]);
        f[30..34].copy_from_slice(&[10, 0, 0, 2]);
        f[34..34 + l4.len()].copy_from_slice(l4);
        f
    }

    #[test]
    fn test_parse_tcp_ports() {
        // sport 5000, dport 80
        let f = ipv4_frame(IPPROTO_TCP, &[0x13, 0x88, 0x00, 0x50]);
        let ParsedFrame::Ipv4 { key } = parse_frame(&f).unwrap() else {
            panic!("expected IPv4");
        };
        assert_eq!(key.protocol, IPPROTO_TCP);
        assert_eq!(key.src_port_host(), 5000);
        assert_eq!(key.dst_port_host(), 80);
        assert_eq!(key.src_addr().octets(), [10, 0, 0, 1]);
        assert_eq!(key.dst_addr().octets(), [10, 0, 0, 2]);
        assert_eq!(key._pad, [0; 3]);
    }

    #[test]
    fn test_parse_icmp_has_no_ports() {
        let f = ipv4_frame(IPPROTO_ICMP, &[8, 0, 0, 0]);
        let ParsedFrame::Ipv4 { key } = parse_frame(&f).unwrap() else {
            panic!("expected IPv4");
        };
        assert_eq!(key.protocol, IPPROTO_ICMP);
        assert_eq!(key.src_port, 0);
        assert_eq!(key.dst_port, 0);
    }

    #[test]
    fn test_parse_arp_is_non_ip() {
        let mut f = [0u8; 60];
        f[12] = 0x08;
        f[13] = 0x06;
        assert_eq!(
            parse_frame(&f),
            Ok(ParsedFrame::NonIp { ethertype: ETH_P_ARP })
        );
    }

    #[test]
    fn test_parse_ipv6_is_non_ip() {
        let mut f = [0u8; 60];
        f[12] = 0x86;
        f[13] = 0xDD;
        assert_eq!(
            parse_frame(&f),
            Ok(ParsedFrame::NonIp { ethertype: ETH_P_IPV6 })
        );
    }

    #[test]
    fn test_parse_truncated_ethernet() {
        assert_eq!(parse_frame(&[0u8; 10]), Err(ParseError::TruncatedEthernet));
    }

    #[test]
    fn test_parse_truncated_ipv4() {
        // Valid Ethernet header claiming IPv4, then only 10 bytes of payload.
        let mut f = [0u8; 24];
        f[12] = 0x08;
        f[13] = 0x00;
        assert_eq!(parse_frame(&f), Err(ParseError::TruncatedIpv4));
    }

    #[test]
    fn test_truncated_transport_leaves_ports_zero() {
        // 20-byte IPv4 header, TCP, but only 2 bytes of L4.
        let mut f = [0u8; 36];
        f[12] = 0x08;
        f[13] = 0x00;
        f[14] = 0x45;
        f[23] = IPPROTO_TCP;
        let ParsedFrame::Ipv4 { key } = parse_frame(&f).unwrap() else {
            panic!("expected IPv4");
        };
        assert_eq!(key.src_port, 0);
        assert_eq!(key.dst_port, 0);
    }

    #[test]
    fn test_flow_key_reversed_round_trip() {
        let key = FlowKey::new(
            core::net::Ipv4Addr::new(10, 0, 0, 1),
            core::net::Ipv4Addr::new(10, 0, 0, 2),
            5000,
            80,
            IPPROTO_TCP,
        );
        assert_eq!(key.reversed().reversed(), key);
        assert_eq!(key.reversed().src_port_host(), 80);
    }
}
