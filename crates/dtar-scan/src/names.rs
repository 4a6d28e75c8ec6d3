//! Owner and group name resolution.

use compact_str::{CompactString, ToCompactString};
use dashmap::DashMap;
use dtar_core::Ownership;

/// Caches uid/gid to name lookups for the duration of a scan.
///
/// Unknown ids resolve to the id rendered as a decimal string; a failed
/// lookup never aborts the scan.
#[derive(Debug, Default)]
pub struct NameCache {
    users: DashMap<u32, CompactString>,
    groups: DashMap<u32, CompactString>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a user name.
    pub fn user(&self, uid: u32) -> CompactString {
        self.users
            .entry(uid)
            .or_insert_with(|| {
                uzers::get_user_by_uid(uid)
                    .map(|user| user.name().to_string_lossy().to_compact_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| uid.to_compact_string())
            })
            .value()
            .clone()
    }

    /// Resolve a group name.
    pub fn group(&self, gid: u32) -> CompactString {
        self.groups
            .entry(gid)
            .or_insert_with(|| {
                uzers::get_group_by_gid(gid)
                    .map(|group| group.name().to_string_lossy().to_compact_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| gid.to_compact_string())
            })
            .value()
            .clone()
    }

    /// Resolve both names for an entry.
    pub fn ownership(&self, uid: u32, gid: u32) -> Ownership {
        Ownership::new(uid, self.user(uid), gid, self.group(gid))
    }
}
