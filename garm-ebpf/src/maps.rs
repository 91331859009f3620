//! Userspace access to the pinned shared maps.
//!
//! The XDP object creates and pins `vpp_acl_v4`, `vpp_stats` and
//! `vpp_sessions` when it is loaded; any process may then open them through
//! the pin paths. Per-key operations are atomic on the kernel side, so two
//! data planes can consult and update the same tables without extra locking.

use std::borrow::Borrow;
use std::path::Path;

use aya::maps::{HashMap, Map, MapData, PerCpuArray};

use garm_ebpf_common::{
    AclRule, FlowKey, SessionEntry, MAP_ACL_V4, MAP_SESSIONS, MAP_STATS, STAT_DROP, STAT_ERROR,
    STAT_PASS, STAT_REDIRECT, UPDATE_ANY,
};

use crate::EbpfError;

/// Kernel verdict counters, summed across CPUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub pass: u64,
    pub drop: u64,
    pub redirect: u64,
    pub error: u64,
}

pub(crate) fn sum_percpu<T: Borrow<MapData>>(
    arr: &PerCpuArray<T, u64>,
) -> Result<KernelStats, EbpfError> {
    let sum = |index: u32| -> Result<u64, EbpfError> {
        let values = arr.get(&index, 0)?;
        Ok((0..values.len()).map(|cpu| values[cpu]).sum())
    };
    Ok(KernelStats {
        pass: sum(STAT_PASS)?,
        drop: sum(STAT_DROP)?,
        redirect: sum(STAT_REDIRECT)?,
        error: sum(STAT_ERROR)?,
    })
}

/// Handles to the three pinned tables.
///
/// Opening fails with [`EbpfError::OpenPinned`] when the XDP object has not
/// been loaded yet (nothing pinned); callers are expected to degrade rather
/// than abort, and classify with local state only.
pub struct SharedMaps {
    acl: HashMap<MapData, FlowKey, AclRule>,
    sessions: HashMap<MapData, FlowKey, SessionEntry>,
    stats: PerCpuArray<MapData, u64>,
}

impl SharedMaps {
    /// Open all three tables from their pin paths under `pin_root`.
    pub fn open(pin_root: &Path) -> Result<Self, EbpfError> {
        let open = |name: &'static str| -> Result<MapData, EbpfError> {
            MapData::from_pin(pin_root.join(name))
                .map_err(|source| EbpfError::OpenPinned { name, source })
        };

        let acl = Map::HashMap(open(MAP_ACL_V4)?)
            .try_into()
            .map_err(|source| EbpfError::MapType { name: MAP_ACL_V4, source })?;
        let sessions = Map::LruHashMap(open(MAP_SESSIONS)?)
            .try_into()
            .map_err(|source| EbpfError::MapType { name: MAP_SESSIONS, source })?;
        let stats = Map::PerCpuArray(open(MAP_STATS)?)
            .try_into()
            .map_err(|source| EbpfError::MapType { name: MAP_STATS, source })?;

        Ok(Self { acl, sessions, stats })
    }

    /// Exact-match rule lookup. A missing key is a miss, not an error.
    pub fn lookup_rule(&self, key: &FlowKey) -> Option<AclRule> {
        self.acl.get(key, 0).ok()
    }

    /// Insert or replace a rule. `flags` is one of `UPDATE_ANY`,
    /// `UPDATE_NOEXIST`, `UPDATE_EXIST`.
    pub fn insert_rule(&mut self, key: &FlowKey, rule: &AclRule, flags: u64) -> Result<(), EbpfError> {
        Ok(self.acl.insert(key, rule, flags)?)
    }

    pub fn delete_rule(&mut self, key: &FlowKey) -> Result<(), EbpfError> {
        Ok(self.acl.remove(key)?)
    }

    pub fn rules(&self) -> impl Iterator<Item = (FlowKey, AclRule)> + '_ {
        self.acl.iter().filter_map(Result::ok)
    }

    pub fn lookup_session(&self, key: &FlowKey) -> Option<SessionEntry> {
        self.sessions.get(key, 0).ok()
    }

    /// Mirror a session row into the shared table. The LRU map evicts the
    /// oldest entry on overflow, so insertion never fails for capacity.
    pub fn upsert_session(&mut self, key: &FlowKey, entry: &SessionEntry) -> Result<(), EbpfError> {
        Ok(self.sessions.insert(key, entry, UPDATE_ANY)?)
    }

    pub fn delete_session(&mut self, key: &FlowKey) -> Result<(), EbpfError> {
        Ok(self.sessions.remove(key)?)
    }

    pub fn sessions(&self) -> impl Iterator<Item = (FlowKey, SessionEntry)> + '_ {
        self.sessions.iter().filter_map(Result::ok)
    }

    /// Kernel verdict counters, summed across CPUs.
    pub fn verdict_counts(&self) -> Result<KernelStats, EbpfError> {
        sum_percpu(&self.stats)
    }
}
