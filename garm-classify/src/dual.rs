//! Dual-protection mode: the shared tables both data planes agree on.

use std::path::Path;

use tracing::{debug, warn};

use garm_ebpf::{EbpfError, SharedMaps};
use garm_ebpf_common::{AclRule, FlowKey, SessionEntry};

/// Handle to the pinned maps shared with the XDP fast path.
///
/// Updates from the two planes are eventually consistent; the kernel's
/// per-key atomicity is the only synchronization, which is all the session
/// accounting tolerances require.
pub struct DualTables {
    maps: SharedMaps,
}

impl DualTables {
    /// Open the pinned tables under `pin_root`. Fails when the fast path has
    /// not been loaded yet; callers degrade to local-only classification.
    pub fn open(pin_root: &Path) -> Result<Self, EbpfError> {
        let maps = SharedMaps::open(pin_root)?;
        Ok(Self { maps })
    }

    pub fn lookup_rule(&self, key: &FlowKey) -> Option<AclRule> {
        crate::acl::lookup_shared(&self.maps, key)
    }

    /// Push a session row out to the shared table. Failures are logged and
    /// swallowed: a missed mirror costs accuracy, not correctness.
    pub fn mirror_session(&mut self, entry: &SessionEntry) {
        let key = entry.key();
        if let Err(err) = self.maps.upsert_session(&key, entry) {
            debug!(%err, "session mirror failed");
        }
    }

    pub fn remove_session(&mut self, key: &FlowKey) {
        if let Err(err) = self.maps.delete_session(key) {
            debug!(%err, "session delete failed");
        }
    }

    /// Install a rule in the shared ACL, visible to both planes.
    pub fn install_rule(&mut self, key: &FlowKey, rule: &AclRule) -> Result<(), EbpfError> {
        self.maps.insert_rule(key, rule, garm_ebpf_common::UPDATE_ANY)
    }

    pub fn maps(&self) -> &SharedMaps {
        &self.maps
    }
}

/// Try to enter dual-protection mode, logging the outcome once.
pub fn try_open(pin_root: &Path) -> Option<DualTables> {
    match DualTables::open(pin_root) {
        Ok(tables) => Some(tables),
        Err(err) => {
            warn!(%err, "shared maps unavailable; classifying with local state only");
            None
        }
    }
}
