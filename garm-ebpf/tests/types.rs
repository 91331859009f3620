use std::mem::{offset_of, size_of};
use std::net::Ipv4Addr;

use garm_ebpf_common::{AclRule, FlowKey, SessionEntry, ACTION_DROP};

#[test]
fn test_flow_key_layout() {
    // 4 + 4 + 2 + 2 + 1 + 3 = 16 bytes
    assert_eq!(size_of::<FlowKey>(), 16);
    assert_eq!(offset_of!(FlowKey, protocol), 12);
}

#[test]
fn test_acl_rule_layout() {
    // 4 + 4 + 2 + 2 + 1 + 1 + 2 = 16 bytes
    assert_eq!(size_of::<AclRule>(), 16);
    assert_eq!(offset_of!(AclRule, action), 13);
}

#[test]
fn test_session_entry_layout() {
    // 4 + 4 + 2 + 2 + 1 + 1 + 2 + 8 + 8 + 8 = 40 bytes
    assert_eq!(size_of::<SessionEntry>(), 40);
    assert_eq!(offset_of!(SessionEntry, last_seen), 16);
}

#[test]
fn test_flow_key_is_wire_order() {
    let key = FlowKey::new(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(10, 0, 0, 2), 5000, 80, 6);
    // The in-memory bytes must be exactly the wire bytes the kernel reads.
    assert_eq!(key.src_ip.to_ne_bytes(), [192, 168, 1, 1]);
    assert_eq!(key.dst_ip.to_ne_bytes(), [10, 0, 0, 2]);
    assert_eq!(key.src_port.to_ne_bytes(), 5000u16.to_be_bytes());
    assert_eq!(key.dst_port_host(), 80);
}

#[test]
fn test_acl_rule_carries_its_key() {
    let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 0, 80, 6);
    let rule = AclRule::new(&key, ACTION_DROP, 100);
    assert_eq!(rule.src_ip, key.src_ip);
    assert_eq!(rule.dst_port, key.dst_port);
    assert_eq!(rule.action, ACTION_DROP);
}

#[test]
fn test_session_entry_key_round_trip() {
    let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 5000, 80, 6);
    let entry = SessionEntry {
        src_ip: key.src_ip,
        dst_ip: key.dst_ip,
        src_port: key.src_port,
        dst_port: key.dst_port,
        protocol: key.protocol,
        ..Default::default()
    };
    assert_eq!(entry.key(), key);
}
