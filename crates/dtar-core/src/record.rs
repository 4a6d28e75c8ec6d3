//! Fingerprint records: the per-path state stored in a catalog.

use std::fmt;

use compact_str::CompactString;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Serialized value of `size` for entries that carry no content.
pub const SIZE_SENTINEL: i64 = -1;

/// BLAKE3 content hash of a file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64 character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }

        let mut bytes = [0u8; 32];
        for (slot, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).ok()?;
            *slot = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Inode information for hardlink detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }
}

/// Kind of filesystem entry recorded in a catalog.
///
/// Serialized as the tar type flag of the equivalent archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum EntryType {
    /// Regular file (the first path of a multiply-linked inode included).
    RegularFile,
    /// Additional path of an inode already recorded as a regular file.
    HardLink,
    /// Symbolic link; never followed.
    SymbolicLink,
    /// Directory.
    Directory,
}

impl EntryType {
    /// Tar type flag for this entry type.
    pub fn type_flag(self) -> char {
        match self {
            Self::RegularFile => '0',
            Self::HardLink => '1',
            Self::SymbolicLink => '2',
            Self::Directory => '5',
        }
    }

    /// Parse a tar type flag.
    pub fn from_type_flag(flag: &str) -> Option<Self> {
        match flag {
            "0" => Some(Self::RegularFile),
            "1" => Some(Self::HardLink),
            "2" => Some(Self::SymbolicLink),
            "5" => Some(Self::Directory),
            _ => None,
        }
    }

    /// Whether entries of this type carry bytes (a size and a content hash).
    pub fn carries_content(self) -> bool {
        matches!(self, Self::RegularFile | Self::HardLink)
    }

    /// Whether entries of this type carry a link target.
    pub fn is_link(self) -> bool {
        matches!(self, Self::HardLink | Self::SymbolicLink)
    }

    /// Check if this is a directory.
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }
}

impl Serialize for EntryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = [0u8; 4];
        serializer.serialize_str(self.type_flag().encode_utf8(&mut buf))
    }
}

impl<'de> Deserialize<'de> for EntryType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flag = CompactString::deserialize(deserializer)?;
        Self::from_type_flag(&flag)
            .ok_or_else(|| de::Error::custom(format!("unsupported entry type flag '{flag}'")))
    }
}

/// Owner and group of an entry, resolved to names at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ownership {
    pub uid: u32,
    pub user: CompactString,
    pub gid: u32,
    pub group: CompactString,
}

impl Ownership {
    pub fn new(
        uid: u32,
        user: impl Into<CompactString>,
        gid: u32,
        group: impl Into<CompactString>,
    ) -> Self {
        Self {
            uid,
            user: user.into(),
            gid,
            group: group.into(),
        }
    }
}

/// State of a single filesystem entry: metadata plus content hash.
///
/// On disk this is a fixed 10 element array:
/// `[mode, uid, gid, size, mtime, type, linkname, uname, gname, hash]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordFields", try_from = "RecordFields")]
pub struct FingerprintRecord {
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: u32,
    pub owner_id: u32,
    pub group_id: u32,
    /// Size in bytes; `None` for directories and symbolic links.
    pub size: Option<u64>,
    /// Modification time in whole seconds.
    pub mtime: i64,
    pub entry_type: EntryType,
    /// Link target; empty unless `entry_type` is a link.
    pub link_target: CompactString,
    pub owner_name: CompactString,
    pub group_name: CompactString,
    /// Hash of the bytes; `None` for directories and symbolic links.
    pub content_hash: Option<ContentHash>,
}

impl FingerprintRecord {
    fn with_owner(mode: u32, mtime: i64, owner: &Ownership, entry_type: EntryType) -> Self {
        Self {
            mode: mode & 0o7777,
            owner_id: owner.uid,
            group_id: owner.gid,
            size: None,
            mtime,
            entry_type,
            link_target: CompactString::default(),
            owner_name: owner.user.clone(),
            group_name: owner.group.clone(),
            content_hash: None,
        }
    }

    /// Create a regular file record.
    pub fn file(mode: u32, mtime: i64, owner: &Ownership, size: u64, hash: ContentHash) -> Self {
        Self {
            size: Some(size),
            content_hash: Some(hash),
            ..Self::with_owner(mode, mtime, owner, EntryType::RegularFile)
        }
    }

    /// Create a hard link record pointing at `target`, the catalog key of
    /// the path recorded as the inode's regular file.
    pub fn hard_link(
        mode: u32,
        mtime: i64,
        owner: &Ownership,
        size: u64,
        hash: ContentHash,
        target: impl Into<CompactString>,
    ) -> Self {
        Self {
            size: Some(size),
            content_hash: Some(hash),
            link_target: target.into(),
            ..Self::with_owner(mode, mtime, owner, EntryType::HardLink)
        }
    }

    /// Create a symbolic link record. `target` is stored verbatim.
    pub fn symlink(mode: u32, mtime: i64, owner: &Ownership, target: impl Into<CompactString>) -> Self {
        Self {
            link_target: target.into(),
            ..Self::with_owner(mode, mtime, owner, EntryType::SymbolicLink)
        }
    }

    /// Create a directory record.
    pub fn directory(mode: u32, mtime: i64, owner: &Ownership) -> Self {
        Self::with_owner(mode, mtime, owner, EntryType::Directory)
    }

    /// The (id, name) pair of the owner.
    pub fn owner(&self) -> (u32, CompactString) {
        (self.owner_id, self.owner_name.clone())
    }

    /// The (id, name) pair of the group.
    pub fn group(&self) -> (u32, CompactString) {
        (self.group_id, self.group_name.clone())
    }

    /// Check the per-type invariants: content-bearing types have a size and
    /// a hash, other types have neither, and only link types have a target.
    pub fn is_well_formed(&self) -> bool {
        let content = self.entry_type.carries_content();
        let content_ok = content == self.size.is_some() && content == self.content_hash.is_some();
        let link_ok = self.entry_type.is_link() != self.link_target.is_empty();
        content_ok && link_ok
    }
}

/// Positional on-disk form of a [`FingerprintRecord`].
#[derive(Serialize, Deserialize)]
struct RecordFields(
    u32,
    u32,
    u32,
    i64,
    i64,
    EntryType,
    CompactString,
    CompactString,
    CompactString,
    String,
);

impl From<FingerprintRecord> for RecordFields {
    fn from(record: FingerprintRecord) -> Self {
        Self(
            record.mode,
            record.owner_id,
            record.group_id,
            record
                .size
                .map(|s| i64::try_from(s).unwrap_or(i64::MAX))
                .unwrap_or(SIZE_SENTINEL),
            record.mtime,
            record.entry_type,
            record.link_target,
            record.owner_name,
            record.group_name,
            record.content_hash.map(|h| h.to_hex()).unwrap_or_default(),
        )
    }
}

impl TryFrom<RecordFields> for FingerprintRecord {
    type Error = String;

    fn try_from(fields: RecordFields) -> Result<Self, Self::Error> {
        let RecordFields(mode, uid, gid, size, mtime, entry_type, link, uname, gname, hash) = fields;

        let size = match size {
            SIZE_SENTINEL => None,
            s if s >= 0 => Some(s as u64),
            s => return Err(format!("invalid size {s}")),
        };
        let content_hash = if hash.is_empty() {
            None
        } else {
            Some(ContentHash::from_hex(&hash).ok_or_else(|| format!("invalid content hash '{hash}'"))?)
        };

        Ok(Self {
            mode,
            owner_id: uid,
            group_id: gid,
            size,
            mtime,
            entry_type,
            link_target: link,
            owner_name: uname,
            group_name: gname,
            content_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Ownership {
        Ownership::new(1000, "alice", 100, "users")
    }

    #[test]
    fn test_content_hash_hex() {
        let hash = ContentHash::new([0xab; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_hex().starts_with("abab"));
        assert_eq!(ContentHash::from_hex(&hash.to_hex()), Some(hash));
    }

    #[test]
    fn test_content_hash_rejects_bad_hex() {
        assert!(ContentHash::from_hex("abc").is_none());
        assert!(ContentHash::from_hex(&"zz".repeat(32)).is_none());
        assert!(ContentHash::from_hex(&format!("+f{}", "00".repeat(31))).is_none());
    }

    #[test]
    fn test_entry_type_flags() {
        for ty in [
            EntryType::RegularFile,
            EntryType::HardLink,
            EntryType::SymbolicLink,
            EntryType::Directory,
        ] {
            let flag = ty.type_flag().to_string();
            assert_eq!(EntryType::from_type_flag(&flag), Some(ty));
        }
        assert_eq!(EntryType::from_type_flag("7"), None);
        assert_eq!(EntryType::RegularFile.to_string(), "regular-file");
    }

    #[test]
    fn test_constructors_are_well_formed() {
        let hash = ContentHash::new([1; 32]);
        assert!(FingerprintRecord::file(0o100644, 10, &owner(), 5, hash).is_well_formed());
        assert!(FingerprintRecord::hard_link(0o644, 10, &owner(), 5, hash, "a").is_well_formed());
        assert!(FingerprintRecord::symlink(0o777, 10, &owner(), "../x").is_well_formed());
        assert!(FingerprintRecord::directory(0o40755, 10, &owner()).is_well_formed());
    }

    #[test]
    fn test_mode_keeps_permission_bits_only() {
        let record = FingerprintRecord::directory(0o40755, 0, &owner());
        assert_eq!(record.mode, 0o755);
    }

    #[test]
    fn test_directory_with_hash_is_not_well_formed() {
        let mut record = FingerprintRecord::directory(0o755, 0, &owner());
        record.content_hash = Some(ContentHash::new([0; 32]));
        assert!(!record.is_well_formed());
    }

    #[test]
    fn test_record_serializes_as_ten_fields() {
        let record = FingerprintRecord::directory(0o755, 42, &owner());
        let value = serde_json::to_value(&record).unwrap();
        let fields = value.as_array().unwrap();
        assert_eq!(fields.len(), 10);
        assert_eq!(fields[3], serde_json::json!(SIZE_SENTINEL));
        assert_eq!(fields[5], serde_json::json!("5"));
        assert_eq!(fields[9], serde_json::json!(""));
    }

    #[test]
    fn test_record_rejects_wrong_arity() {
        let nine = serde_json::json!([420, 0, 0, 1, 0, "0", "", "root", "root"]);
        assert!(serde_json::from_value::<FingerprintRecord>(nine).is_err());
    }
}
