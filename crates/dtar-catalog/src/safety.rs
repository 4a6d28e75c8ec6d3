//! Link safety: every link in a catalog must land on an entry inside the root.
//!
//! Resolution is purely lexical against the catalog, so it needs no access
//! to the filesystem and gives the same answer for a stored catalog as for
//! a freshly scanned one.

use std::collections::VecDeque;

use compact_str::CompactString;
use serde_json::json;
use tracing::warn;

use dtar_core::{Catalog, EntryType, Warning, WarningKind};

/// Symbolic link chains longer than this are treated as dangling (loops).
const MAX_LINK_HOPS: usize = 40;

/// Why a link is unsafe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkIssueKind {
    /// The target resolves to a location outside the root.
    Escapes,
    /// The target does not exist in the catalog (or loops).
    Dangling,
}

/// An unsafe link found in a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkIssue {
    /// Catalog key of the link.
    pub key: String,
    pub target: CompactString,
    pub kind: LinkIssueKind,
}

/// Result of checking every link in a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyReport {
    pub issues: Vec<LinkIssue>,
}

impl SafetyReport {
    /// A catalog with no unsafe links.
    pub fn is_safe(&self) -> bool {
        self.issues.is_empty()
    }

    /// Turn every issue into a warning, logging each one.
    pub fn to_warnings(&self, catalog: &Catalog) -> Vec<Warning> {
        self.issues
            .iter()
            .map(|issue| {
                let path = catalog.absolute(&issue.key);
                let warning = match issue.kind {
                    LinkIssueKind::Escapes => Warning::new(
                        &path,
                        format!("Link escapes root: {} -> {}", path.display(), issue.target),
                        WarningKind::UnsafeLink,
                    ),
                    LinkIssueKind::Dangling => Warning::broken_symlink(&path, &issue.target),
                };
                warn!(path = %path.display(), "{}", warning.message);
                warning
            })
            .collect()
    }

    /// Machine readable form for `--format json` output.
    pub fn to_json(&self) -> serde_json::Value {
        let issues: Vec<_> = self
            .issues
            .iter()
            .map(|issue| {
                json!({
                    "path": issue.key,
                    "target": issue.target.as_str(),
                    "kind": match issue.kind {
                        LinkIssueKind::Escapes => "escapes",
                        LinkIssueKind::Dangling => "dangling",
                    },
                })
            })
            .collect();
        json!({ "safe": self.is_safe(), "issues": issues })
    }
}

/// Check every symbolic and hard link in `catalog`.
///
/// A symbolic link is safe when its target, normalized relative to the
/// link's directory (and through any symbolic links along the way), ends
/// inside the root and names the root itself or an entry of the catalog.
/// A hard link is safe when its target is a regular file of the catalog.
pub fn check_links(catalog: &Catalog) -> SafetyReport {
    let mut issues = Vec::new();

    for (key, record) in catalog.files() {
        let kind = match record.entry_type {
            EntryType::SymbolicLink => match resolve(catalog, key, &record.link_target) {
                Resolution::Inside => None,
                Resolution::Escapes => Some(LinkIssueKind::Escapes),
                Resolution::Dangling => Some(LinkIssueKind::Dangling),
            },
            EntryType::HardLink => {
                let leader = catalog.get(&record.link_target);
                (!leader.is_some_and(|r| r.entry_type == EntryType::RegularFile))
                    .then_some(LinkIssueKind::Dangling)
            }
            EntryType::RegularFile | EntryType::Directory => None,
        };

        if let Some(kind) = kind {
            issues.push(LinkIssue {
                key: key.clone(),
                target: record.link_target.clone(),
                kind,
            });
        }
    }

    SafetyReport { issues }
}

/// Whether every link in the catalog is safe to diff and archive.
pub fn is_good_catalog(catalog: &Catalog) -> bool {
    check_links(catalog).is_safe()
}

enum Resolution {
    Inside,
    Escapes,
    Dangling,
}

/// Normal components of an absolute path.
fn absolute_components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Catalog key for an absolute position: `Some("")` for the root itself,
/// `None` outside the root.
fn key_of(root: &[String], position: &[String]) -> Option<String> {
    position
        .strip_prefix(root)
        .map(|rest| rest.join("/"))
}

/// Walk `target` from the link's directory. Positions are absolute, so a
/// walk may pass outside the root; only where it ends decides `Escapes`.
/// Inside the root every component must exist in the catalog.
fn resolve(catalog: &Catalog, key: &str, target: &str) -> Resolution {
    let Some(root) = catalog.root().to_str().map(absolute_components) else {
        return Resolution::Escapes;
    };

    let mut position = root.clone();
    position.extend(key.split('/').map(str::to_string));
    position.pop();
    if target.starts_with('/') {
        position.clear();
    }

    let mut pending: VecDeque<String> = target.split('/').map(str::to_string).collect();
    let mut hops = 0;

    while let Some(component) = pending.pop_front() {
        match component.as_str() {
            "" | "." => continue,
            ".." => {
                position.pop();
                continue;
            }
            _ => position.push(component),
        }

        let Some(current) = key_of(&root, &position) else {
            continue;
        };
        let Some(record) = catalog.get(&current) else {
            return Resolution::Dangling;
        };

        // The final component may itself be a link; it is checked on its own
        if record.entry_type != EntryType::SymbolicLink || pending.is_empty() {
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            return Resolution::Dangling;
        }
        position.pop();
        if record.link_target.starts_with('/') {
            position.clear();
        }
        for component in record.link_target.split('/').rev() {
            pending.push_front(component.to_string());
        }
    }

    match key_of(&root, &position) {
        Some(_) => Resolution::Inside,
        None => Resolution::Escapes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtar_core::{ContentHash, FingerprintRecord, Ownership};
    use std::collections::BTreeMap;

    fn catalog(entries: &[(&str, FingerprintRecord)]) -> Catalog {
        let files: BTreeMap<String, FingerprintRecord> = entries
            .iter()
            .map(|(k, r)| (k.to_string(), r.clone()))
            .collect();
        Catalog::from_records("/srv/data", files)
    }

    fn owner() -> Ownership {
        Ownership::new(0, "root", 0, "root")
    }

    fn dir() -> FingerprintRecord {
        FingerprintRecord::directory(0o755, 0, &owner())
    }

    fn file() -> FingerprintRecord {
        FingerprintRecord::file(0o644, 0, &owner(), 1, ContentHash::new([1; 32]))
    }

    fn link(target: &str) -> FingerprintRecord {
        FingerprintRecord::symlink(0o777, 0, &owner(), target)
    }

    #[test]
    fn test_relative_link_inside_root() {
        let c = catalog(&[("a", dir()), ("a/f", file()), ("b", link("a/f"))]);
        assert!(is_good_catalog(&c));
    }

    #[test]
    fn test_parent_relative_link() {
        let c = catalog(&[("a", dir()), ("a/l", link("../c")), ("c", file())]);
        assert!(is_good_catalog(&c));
    }

    #[test]
    fn test_link_to_root() {
        let c = catalog(&[("a", dir()), ("a/up", link(".."))]);
        assert!(is_good_catalog(&c));
    }

    #[test]
    fn test_link_escaping_root() {
        let c = catalog(&[("a", dir()), ("a/l", link("../../etc/passwd"))]);
        let report = check_links(&c);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, LinkIssueKind::Escapes);
        assert_eq!(report.issues[0].key, "a/l");
    }

    #[test]
    fn test_absolute_links() {
        let c = catalog(&[
            ("f", file()),
            ("inside", link("/srv/data/f")),
            ("outside", link("/etc/passwd")),
        ]);
        let report = check_links(&c);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].key, "outside");
        assert_eq!(report.issues[0].kind, LinkIssueKind::Escapes);
    }

    #[test]
    fn test_absolute_link_normalized_before_root_check() {
        let c = catalog(&[
            ("f", file()),
            ("back_in", link("/srv/other/../data/f")),
            ("dotted", link("/srv/./data//f")),
            ("out_again", link("/srv/data/../other")),
        ]);
        let report = check_links(&c);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].key, "out_again");
        assert_eq!(report.issues[0].kind, LinkIssueKind::Escapes);
    }

    #[test]
    fn test_dangling_link() {
        let c = catalog(&[("l", link("missing"))]);
        let report = check_links(&c);
        assert_eq!(report.issues[0].kind, LinkIssueKind::Dangling);
        assert_eq!(report.to_warnings(&c)[0].kind, WarningKind::BrokenSymlink);
    }

    #[test]
    fn test_link_through_linked_directory() {
        let c = catalog(&[
            ("real", dir()),
            ("real/f", file()),
            ("alias", link("real")),
            ("l", link("alias/f")),
        ]);
        assert!(is_good_catalog(&c));
    }

    #[test]
    fn test_link_loop_is_dangling() {
        let c = catalog(&[("a", link("b/x")), ("b", link("a/x"))]);
        let report = check_links(&c);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.kind == LinkIssueKind::Dangling));
    }

    #[test]
    fn test_hard_link_needs_regular_leader() {
        let hash = ContentHash::new([1; 32]);
        let good = catalog(&[
            ("a", file()),
            ("b", FingerprintRecord::hard_link(0o644, 0, &owner(), 1, hash, "a")),
        ]);
        assert!(is_good_catalog(&good));

        let bad = catalog(&[("b", FingerprintRecord::hard_link(0o644, 0, &owner(), 1, hash, "a"))]);
        assert!(!is_good_catalog(&bad));
    }

    #[test]
    fn test_report_json() {
        let c = catalog(&[("l", link("/etc"))]);
        let value = check_links(&c).to_json();
        assert_eq!(value["safe"], json!(false));
        assert_eq!(value["issues"][0]["kind"], json!("escapes"));
    }
}
