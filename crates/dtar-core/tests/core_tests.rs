use dtar_core::{
    Catalog, ContentHash, EntryType, FingerprintRecord, InodeInfo, Ownership, ScanConfig,
    SIZE_SENTINEL,
};
use std::collections::BTreeMap;

fn alice() -> Ownership {
    Ownership::new(1000, "alice", 1000, "alice")
}

fn bob() -> Ownership {
    Ownership::new(1001, "bob", 100, "users")
}

#[test]
fn test_content_hash_creation_and_hex() {
    let bytes = [0xab; 32];
    let hash = ContentHash::new(bytes);

    let hex = hash.to_hex();
    assert_eq!(hex.len(), 64);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(hex.starts_with("ab"));

    assert_eq!(hash, ContentHash::new(bytes));
    assert_ne!(hash, ContentHash::new([0xcd; 32]));
    assert_eq!(ContentHash::from_hex(&hex.to_uppercase()), Some(hash));
}

#[test]
fn test_inode_info() {
    let inode1 = InodeInfo::new(12345, 67890);
    assert_eq!(inode1.inode, 12345);
    assert_eq!(inode1.device, 67890);
    assert_eq!(inode1, InodeInfo::new(12345, 67890));
}

#[test]
fn test_entry_type_discrimination() {
    assert!(EntryType::RegularFile.carries_content());
    assert!(EntryType::HardLink.carries_content());
    assert!(!EntryType::SymbolicLink.carries_content());
    assert!(!EntryType::Directory.carries_content());

    assert!(EntryType::HardLink.is_link());
    assert!(EntryType::SymbolicLink.is_link());
    assert!(!EntryType::RegularFile.is_link());

    assert!(EntryType::Directory.is_dir());
    assert_eq!(EntryType::SymbolicLink.to_string(), "symbolic-link");
}

#[test]
fn test_record_json_layout() {
    let hash = ContentHash::new([0x11; 32]);
    let record = FingerprintRecord::file(0o100644, 1_600_000_000, &alice(), 5, hash);
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(
        value,
        serde_json::json!([
            0o644,
            1000,
            1000,
            5,
            1_600_000_000i64,
            "0",
            "",
            "alice",
            "alice",
            hash.to_hex()
        ])
    );

    let back: FingerprintRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back, record);
}

#[test]
fn test_symlink_record_uses_sentinel() {
    let record = FingerprintRecord::symlink(0o777, 0, &bob(), "../elsewhere");
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value[3], serde_json::json!(SIZE_SENTINEL));
    assert_eq!(value[5], serde_json::json!("2"));
    assert_eq!(value[6], serde_json::json!("../elsewhere"));
    assert_eq!(value[9], serde_json::json!(""));
}

#[test]
fn test_record_rejects_unknown_type_flag() {
    let value = serde_json::json!([420, 0, 0, -1, 0, "3", "", "root", "root", ""]);
    assert!(serde_json::from_value::<FingerprintRecord>(value).is_err());
}

#[test]
fn test_record_rejects_negative_size_other_than_sentinel() {
    let value = serde_json::json!([420, 0, 0, -7, 0, "5", "", "root", "root", ""]);
    assert!(serde_json::from_value::<FingerprintRecord>(value).is_err());
}

#[test]
fn test_catalog_roundtrip_through_json() {
    let hash = ContentHash::new([0x22; 32]);
    let mut files = BTreeMap::new();
    files.insert("docs".to_string(), FingerprintRecord::directory(0o755, 3, &alice()));
    files.insert(
        "docs/a.txt".to_string(),
        FingerprintRecord::file(0o644, 3, &bob(), 5, hash),
    );
    files.insert(
        "docs/b.txt".to_string(),
        FingerprintRecord::hard_link(0o644, 3, &bob(), 5, hash, "docs/a.txt"),
    );
    let catalog = Catalog::from_records("/srv/data", files);

    let text = serde_json::to_string(&catalog).unwrap();
    let back: Catalog = serde_json::from_str(&text).unwrap();

    assert_eq!(back, catalog);
    assert!(back.validate());
    assert_eq!(back.owners().len(), 2);
    assert_eq!(back.groups().len(), 2);
    assert_eq!(back.stats().hard_links, 1);
}

#[test]
fn test_catalog_with_bad_key_fails_validation() {
    let mut files = BTreeMap::new();
    files.insert("/abs".to_string(), FingerprintRecord::directory(0o755, 0, &alice()));
    let catalog = Catalog::from_records("/srv", files);
    assert!(!catalog.validate());
}

#[test]
fn test_catalog_accessors() {
    let mut files = BTreeMap::new();
    files.insert("x".to_string(), FingerprintRecord::directory(0o755, 0, &alice()));
    let catalog = Catalog::from_records("/srv", files);

    assert_eq!(catalog.len(), 1);
    assert!(catalog.contains("x"));
    assert!(catalog.get("y").is_none());
    assert_eq!(catalog.absolute("x"), std::path::PathBuf::from("/srv/x"));
    assert!(catalog.same_root(&Catalog::empty("/srv")));
    assert!(!catalog.same_root(&Catalog::empty("/other")));
}

#[test]
fn test_scan_config_builder() {
    let config = ScanConfig::builder()
        .root("/test/path")
        .include_hidden(false)
        .cross_filesystems(true)
        .exclude(vec!["*.tmp".to_string(), ".dtar".to_string()])
        .mmap_threshold(1024u64)
        .build()
        .unwrap();

    assert_eq!(config.root.to_str().unwrap(), "/test/path");
    assert!(!config.include_hidden);
    assert!(config.cross_filesystems);
    assert_eq!(config.exclude.len(), 2);
    assert_eq!(config.mmap_threshold, 1024);

    let default_config = ScanConfig::new("/default");
    assert!(default_config.include_hidden);
    assert!(!default_config.cross_filesystems);
    assert!(default_config.exclude.is_empty());
}
