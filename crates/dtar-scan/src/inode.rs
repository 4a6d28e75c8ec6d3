//! Inode tracking for hardlink detection.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dtar_core::InodeInfo;

/// Tracks which catalog key first claimed each multiply-linked inode.
///
/// Keys must be offered in sorted order so the smallest key of every
/// inode becomes its leader (recorded as the regular file) no matter how
/// the tree was traversed.
#[derive(Debug, Default)]
pub struct HardlinkTracker {
    leaders: DashMap<InodeInfo, String>,
}

impl HardlinkTracker {
    /// Create a new tracker.
    pub fn new() -> Self {
        Self {
            leaders: DashMap::new(),
        }
    }

    /// Claim an inode for `key`. Returns `None` if `key` is the first to
    /// claim it, otherwise the key of the leader it links to.
    pub fn claim(&self, info: InodeInfo, key: &str) -> Option<String> {
        match self.leaders.entry(info) {
            Entry::Occupied(leader) => Some(leader.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(key.to_string());
                None
            }
        }
    }

    /// Leader key for an inode, if claimed.
    pub fn leader(&self, info: &InodeInfo) -> Option<String> {
        self.leaders.get(info).map(|leader| leader.value().clone())
    }

    /// Number of distinct inodes claimed.
    pub fn len(&self) -> usize {
        self.leaders.len()
    }

    /// Check if no inodes have been claimed.
    pub fn is_empty(&self) -> bool {
        self.leaders.is_empty()
    }
}
