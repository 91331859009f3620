//! Local ACL rule table.
//!
//! Rules are keyed by 5-tuple with wildcard fields stored as zero. Lookup
//! walks a fixed specificity ladder from the fully qualified tuple down to
//! a destination-port-only rule, so one probe sequence serves both exact
//! and partially wildcarded rules. The kernel fast path probes only the
//! exact tuple; anything it misses is re-evaluated here.

use std::collections::HashMap;

use garm_ebpf_common::{AclRule, FlowKey};

/// Masks applied to the packet tuple before each probe, most specific
/// first. The first hit wins.
fn probe_ladder(key: &FlowKey) -> [FlowKey; 6] {
    let exact = *key;
    let mut no_sport = exact;
    no_sport.src_port = 0;
    let mut src_dport = no_sport;
    src_dport.dst_ip = 0;
    let mut dst_dport = no_sport;
    dst_dport.src_ip = 0;
    let mut dport_only = src_dport;
    dport_only.src_ip = 0;
    let mut src_only = src_dport;
    src_only.dst_port = 0;
    [exact, no_sport, src_dport, dst_dport, dport_only, src_only]
}

#[derive(Default)]
pub struct AclTable {
    rules: HashMap<FlowKey, AclRule, ahash::RandomState>,
}

impl AclTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule under its own (possibly wildcarded) tuple.
    pub fn insert(&mut self, key: FlowKey, rule: AclRule) {
        self.rules.insert(key, rule);
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<AclRule> {
        self.rules.remove(key)
    }

    /// Match a packet tuple against the table.
    pub fn lookup(&self, key: &FlowKey) -> Option<&AclRule> {
        probe_ladder(key).iter().find_map(|probe| self.rules.get(probe))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &AclRule)> {
        self.rules.iter()
    }
}

/// The same ladder evaluated against the shared map.
pub(crate) fn lookup_shared(
    maps: &garm_ebpf::SharedMaps,
    key: &FlowKey,
) -> Option<AclRule> {
    probe_ladder(key).iter().find_map(|probe| maps.lookup_rule(probe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use garm_ebpf_common::net::IPPROTO_TCP;
    use garm_ebpf_common::{ACTION_ALLOW, ACTION_DROP};
    use std::net::Ipv4Addr;

    const ANY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

    fn pkt_key() -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            5000,
            80,
            IPPROTO_TCP,
        )
    }

    #[test]
    fn test_exact_rule_matches() {
        let mut acl = AclTable::new();
        let key = pkt_key();
        acl.insert(key, AclRule::new(&key, ACTION_DROP, 10));
        assert_eq!(acl.lookup(&key).unwrap().action, ACTION_DROP);
    }

    #[test]
    fn test_source_and_dport_wildcard_rule_matches() {
        let mut acl = AclTable::new();
        // src 10.0.0.1/32, any destination, any source port, dport 80
        let rule_key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), ANY, 0, 80, IPPROTO_TCP);
        acl.insert(rule_key, AclRule::new(&rule_key, ACTION_DROP, 10));

        assert_eq!(acl.lookup(&pkt_key()).unwrap().action, ACTION_DROP);

        // Different source must not match.
        let other = FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 9),
            Ipv4Addr::new(10, 0, 0, 2),
            5000,
            80,
            IPPROTO_TCP,
        );
        assert!(acl.lookup(&other).is_none());
    }

    #[test]
    fn test_more_specific_rule_wins() {
        let mut acl = AclTable::new();
        let wide = FlowKey::new(ANY, ANY, 0, 80, IPPROTO_TCP);
        acl.insert(wide, AclRule::new(&wide, ACTION_DROP, 1));
        let exact = pkt_key();
        acl.insert(exact, AclRule::new(&exact, ACTION_ALLOW, 100));

        assert_eq!(acl.lookup(&exact).unwrap().action, ACTION_ALLOW);

        // A different flow to port 80 still hits the wide rule.
        let other = FlowKey::new(
            Ipv4Addr::new(192, 168, 0, 7),
            Ipv4Addr::new(10, 0, 0, 2),
            1234,
            80,
            IPPROTO_TCP,
        );
        assert_eq!(acl.lookup(&other).unwrap().action, ACTION_DROP);
    }

    #[test]
    fn test_miss_on_empty_table() {
        assert!(AclTable::new().lookup(&pkt_key()).is_none());
    }
}
