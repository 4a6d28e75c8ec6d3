//! Tar volumes holding the changed and added entries of a diff.
//!
//! Every volume is written to a temporary file next to its destination and
//! only renamed into place once the whole archive is complete, so a failed
//! run leaves no partial volume behind.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use tar::{Builder, EntryType as TarEntryType, Header};
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dtar_core::{EntryType, FingerprintRecord, Warning, WarningKind};
use dtar_diff::{DiffResult, RemovedEntry};

use crate::config::Compression;
use crate::error::ArchiveError;
use crate::progress::{ArchiveOutcome, ArchiveProgress};

/// Tar block size.
const BLOCK: u64 = 512;

/// Two zero blocks close every tar stream.
const TRAILER: u64 = 2 * BLOCK;

/// Names longer than this need a GNU long-name extension entry.
const MAX_HEADER_NAME: usize = 99;

/// One entry selected for the archive.
#[derive(Debug, Clone)]
pub struct PlannedEntry {
    /// Catalog key, used as the member name.
    pub key: String,
    /// Where the current bytes live.
    pub source: PathBuf,
    pub record: FingerprintRecord,
}

/// What a run writes, derived from a diff: the archive members in path
/// order and the removal list.
#[derive(Debug, Clone, Default)]
pub struct ArchivePlan {
    pub entries: Vec<PlannedEntry>,
    /// File bytes the archive will carry.
    pub total_bytes: u64,
    /// Paths to delete on the receiving side, deepest first.
    pub removals: Vec<RemovedEntry>,
}

impl ArchivePlan {
    /// Select the changed and added entries of `diff`. Unchanged paths are
    /// left out and removed paths are never read.
    pub fn from_diff(diff: &DiffResult) -> Self {
        let entries = diff
            .archive_entries()
            .map(|(key, record)| PlannedEntry {
                key: key.to_string(),
                source: diff.root.join(key),
                record: record.clone(),
            })
            .collect();

        Self {
            entries,
            total_bytes: diff.summary().bytes_to_archive,
            removals: diff.removed.clone(),
        }
    }

    /// Drop removals at or below any of `unreadable` (catalog keys of
    /// directories whose contents could not be listed). Their entries are
    /// missing from the new catalog without having been deleted. Returns
    /// how many removals were dropped.
    pub fn hold_back_removals(&mut self, unreadable: &[String]) -> usize {
        let before = self.removals.len();
        self.removals.retain(|entry| {
            !unreadable.iter().any(|dir| {
                entry.path == *dir
                    || entry
                        .path
                        .strip_prefix(dir.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        });
        before - self.removals.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where and how an archive is written.
#[derive(Debug, Clone)]
pub struct ArchiveTarget {
    pub dir: PathBuf,
    /// Base name; volumes are `<name>.tar` or `<name>.NNN.tar`.
    pub name: String,
    pub compression: Compression,
    /// Maximum volume size in bytes. A volume holding a single member may
    /// exceed it.
    pub chunk_size: Option<u64>,
}

impl ArchiveTarget {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            compression: Compression::None,
            chunk_size: None,
        }
    }

    /// Path of volume `index` (1-based) when chunking, or of the single
    /// archive otherwise.
    pub fn volume_path(&self, index: usize) -> PathBuf {
        let extension = self.compression.extension();
        let file_name = match self.chunk_size {
            Some(_) => format!("{}.{index:03}.{extension}", self.name),
            None => format!("{}.{extension}", self.name),
        };
        self.dir.join(file_name)
    }

    /// Whether `file_name` is a volume of this archive in any layout
    /// (single or numbered, plain or gzip).
    pub fn is_volume_name(&self, file_name: &str) -> bool {
        let Some(rest) = file_name
            .strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            return false;
        };
        let extension = match rest.split_once('.') {
            Some((index, extension)) if index.len() >= 3 && index.bytes().all(|b| b.is_ascii_digit()) => {
                extension
            }
            _ => rest,
        };
        [Compression::None, Compression::Gzip]
            .iter()
            .any(|compression| compression.extension() == extension)
    }
}

/// Destination of one volume: a temp file, optionally gzip compressed.
enum VolumeWriter {
    Plain(BufWriter<NamedTempFile>),
    Gzip(GzEncoder<BufWriter<NamedTempFile>>),
}

impl VolumeWriter {
    fn create(dir: &Path, compression: Compression) -> io::Result<Self> {
        let buffered = BufWriter::new(NamedTempFile::new_in(dir)?);
        Ok(match compression {
            Compression::None => Self::Plain(buffered),
            Compression::Gzip => Self::Gzip(GzEncoder::new(buffered, flate2::Compression::default())),
        })
    }

    /// Flush everything to disk and hand back the temp file.
    fn finish(self) -> io::Result<NamedTempFile> {
        let buffered = match self {
            Self::Plain(writer) => writer,
            Self::Gzip(encoder) => encoder.finish()?,
        };
        let temp = buffered.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        Ok(temp)
    }
}

impl Write for VolumeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(writer) => writer.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(writer) => writer.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// A volume being filled.
struct Volume {
    builder: Builder<VolumeWriter>,
    path: PathBuf,
    /// Uncompressed tar bytes so far, trailer excluded.
    used: u64,
    members: usize,
    /// Keys stored with their bytes, so later hard links can point at them.
    stored: HashSet<String>,
}

impl Volume {
    fn open(target: &ArchiveTarget, index: usize) -> Result<Self, ArchiveError> {
        let path = target.volume_path(index);
        let writer = VolumeWriter::create(&target.dir, target.compression)
            .map_err(|e| ArchiveError::write(&path, e))?;
        debug!(path = %path.display(), "Opened volume");
        Ok(Self {
            builder: Builder::new(writer),
            path,
            used: 0,
            members: 0,
            stored: HashSet::new(),
        })
    }

    fn finish(self) -> Result<(NamedTempFile, PathBuf), ArchiveError> {
        let path = self.path;
        let temp = self
            .builder
            .into_inner()
            .and_then(VolumeWriter::finish)
            .map_err(|e| ArchiveError::write(&path, e))?;
        Ok((temp, path))
    }

    fn fits(&self, cost: u64, limit: Option<u64>) -> bool {
        match limit {
            Some(limit) => self.members == 0 || self.used + cost + TRAILER <= limit,
            None => true,
        }
    }
}

/// How a planned entry goes into the tar stream.
enum Member {
    Directory,
    Symlink,
    /// Tar link to a member stored earlier in the same volume.
    Link,
    Content { file: File, len: u64 },
}

/// Reader that yields exactly `remaining` bytes or fails, so a file that
/// shrinks while it is archived cannot desynchronize the tar stream.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while it was archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Writes archive plans to tar volumes.
pub struct ArchiveDriver {
    progress_tx: broadcast::Sender<ArchiveProgress>,
}

impl ArchiveDriver {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self { progress_tx }
    }

    /// Subscribe to archive progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveProgress> {
        self.progress_tx.subscribe()
    }

    /// Write every entry of `plan` to the volumes described by `target`.
    ///
    /// An empty plan still produces one (empty) archive. Entries that
    /// vanished since the scan are skipped with a warning; any other
    /// failure aborts the write and leaves no volume behind. Volumes of an
    /// earlier write to the same target that this write did not replace
    /// are deleted.
    pub fn write(&self, plan: &ArchivePlan, target: &ArchiveTarget) -> Result<ArchiveOutcome, ArchiveError> {
        let mut progress = ArchiveProgress::new(plan.len(), plan.total_bytes);
        let planned: HashSet<&str> = plan.entries.iter().map(|e| e.key.as_str()).collect();
        let mut outcome = ArchiveOutcome::default();
        let mut finished = Vec::new();
        let mut volume = Volume::open(target, 1)?;

        for entry in &plan.entries {
            progress.current_path = Some(entry.source.clone());

            let Some(mut member) = self.member(entry, &volume, &mut outcome) else {
                continue;
            };

            let mut cost = member_cost(entry, &member);
            if !volume.fits(cost, target.chunk_size) {
                finished.push(volume.finish()?);
                volume = Volume::open(target, finished.len() + 1)?;
                progress.volume = finished.len() + 1;

                // The leader of a hard link stayed behind in the closed volume
                if matches!(member, Member::Link) {
                    let Some(reopened) = self.member(entry, &volume, &mut outcome) else {
                        continue;
                    };
                    member = reopened;
                    cost = member_cost(entry, &member);
                }
            }

            // The plan counted these bytes once, for a leader in the same volume
            if let Member::Content { len, .. } = &member {
                if entry.record.entry_type == EntryType::HardLink
                    && planned.contains(entry.record.link_target.as_str())
                {
                    progress.bytes_total += len;
                }
            }

            let bytes = append(&mut volume, entry, member)?;
            volume.used += cost;
            volume.members += 1;
            outcome.entries_written += 1;
            outcome.bytes_written += bytes;
            progress.complete_entry(bytes);
            let _ = self.progress_tx.send(progress.clone());
        }

        finished.push(volume.finish()?);
        outcome.volumes = persist_all(finished)?;
        remove_stale_volumes(target, &outcome.volumes)?;

        if !outcome.is_consistent() {
            warn!(
                skipped = outcome.skipped,
                "Tree changed while archiving; the archive is not a consistent snapshot"
            );
        }
        info!(
            volumes = outcome.volumes.len(),
            entries = outcome.entries_written,
            bytes = outcome.bytes_written,
            "Archive written"
        );
        Ok(outcome)
    }

    /// Decide how `entry` is stored, or `None` if it can no longer be read.
    fn member(&self, entry: &PlannedEntry, volume: &Volume, outcome: &mut ArchiveOutcome) -> Option<Member> {
        let metadata = match fs::symlink_metadata(&entry.source) {
            Ok(metadata) => metadata,
            Err(e) => {
                skip(outcome, Warning::vanished(&entry.source, &e));
                return None;
            }
        };

        let record = &entry.record;
        let file_type = metadata.file_type();
        let type_matches = match record.entry_type {
            EntryType::Directory => file_type.is_dir(),
            EntryType::SymbolicLink => file_type.is_symlink(),
            EntryType::RegularFile | EntryType::HardLink => file_type.is_file(),
        };
        if !type_matches {
            let message = format!("Skipped {}: changed type since the scan", entry.source.display());
            skip(outcome, Warning::new(&entry.source, message, WarningKind::Vanished));
            return None;
        }

        match record.entry_type {
            EntryType::Directory => Some(Member::Directory),
            EntryType::SymbolicLink => Some(Member::Symlink),
            EntryType::HardLink if volume.stored.contains(record.link_target.as_str()) => Some(Member::Link),
            EntryType::RegularFile | EntryType::HardLink => {
                let opened = File::open(&entry.source).and_then(|file| {
                    let len = file.metadata()?.len();
                    Ok((file, len))
                });
                match opened {
                    Ok((file, len)) => Some(Member::Content { file, len }),
                    Err(e) => {
                        skip(outcome, Warning::vanished(&entry.source, &e));
                        None
                    }
                }
            }
        }
    }
}

impl Default for ArchiveDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn skip(outcome: &mut ArchiveOutcome, warning: Warning) {
    warn!(path = %warning.path.display(), "{}", warning.message);
    outcome.skipped += 1;
    outcome.warnings.push(warning);
}

/// Header blocks for a name, including a GNU long-name entry if needed.
fn name_cost(name: &str) -> u64 {
    if name.len() <= MAX_HEADER_NAME {
        0
    } else {
        BLOCK + (name.len() as u64 + 1).div_ceil(BLOCK) * BLOCK
    }
}

/// Uncompressed tar bytes a member occupies.
fn member_cost(entry: &PlannedEntry, member: &Member) -> u64 {
    let header = BLOCK + name_cost(&entry.key);
    match member {
        Member::Directory => header,
        Member::Symlink | Member::Link => header + name_cost(&entry.record.link_target),
        Member::Content { len, .. } => header + len.div_ceil(BLOCK) * BLOCK,
    }
}

fn header_for(record: &FingerprintRecord, entry_type: TarEntryType) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(record.mode);
    header.set_uid(record.owner_id.into());
    header.set_gid(record.group_id.into());
    header.set_mtime(record.mtime.max(0) as u64);
    header.set_size(0);
    // Names that do not fit the header are dropped; the numeric ids remain
    if header.set_username(&record.owner_name).is_err() {
        debug!(name = %record.owner_name, "User name too long for tar header");
    }
    if header.set_groupname(&record.group_name).is_err() {
        debug!(name = %record.group_name, "Group name too long for tar header");
    }
    header
}

/// Append one member, returning the number of file bytes stored.
fn append(volume: &mut Volume, entry: &PlannedEntry, member: Member) -> Result<u64, ArchiveError> {
    let record = &entry.record;
    let key = entry.key.as_str();
    let write_error = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::read(&entry.source, e)
        } else {
            ArchiveError::write(&volume.path, e)
        }
    };

    let bytes = match member {
        Member::Directory => {
            let mut header = header_for(record, TarEntryType::Directory);
            volume
                .builder
                .append_data(&mut header, key, io::empty())
                .map_err(write_error)?;
            0
        }
        Member::Symlink => {
            let mut header = header_for(record, TarEntryType::Symlink);
            volume
                .builder
                .append_link(&mut header, key, record.link_target.as_str())
                .map_err(write_error)?;
            0
        }
        Member::Link => {
            let mut header = header_for(record, TarEntryType::Link);
            volume
                .builder
                .append_link(&mut header, key, record.link_target.as_str())
                .map_err(write_error)?;
            0
        }
        Member::Content { file, len } => {
            let mut header = header_for(record, TarEntryType::Regular);
            header.set_size(len);
            let reader = ExactReader {
                inner: file,
                remaining: len,
            };
            volume
                .builder
                .append_data(&mut header, key, reader)
                .map_err(write_error)?;
            volume.stored.insert(entry.key.clone());
            len
        }
    };

    debug!(path = key, bytes, "Archived entry");
    Ok(bytes)
}

/// Rename every finished volume into place. On failure the volumes already
/// moved are removed again and the rest are dropped with their temp files.
fn persist_all(volumes: Vec<(NamedTempFile, PathBuf)>) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut persisted: Vec<PathBuf> = Vec::with_capacity(volumes.len());

    for (temp, path) in volumes {
        if let Err(e) = temp.persist(&path) {
            for done in &persisted {
                let _ = fs::remove_file(done);
            }
            return Err(ArchiveError::write(&path, e.error));
        }
        persisted.push(path);
    }

    Ok(persisted)
}

/// Delete volumes of `target` left by an earlier write that `written`
/// did not replace.
fn remove_stale_volumes(target: &ArchiveTarget, written: &[PathBuf]) -> Result<(), ArchiveError> {
    let entries = fs::read_dir(&target.dir).map_err(|e| ArchiveError::read(&target.dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::read(&target.dir, e))?;
        let path = entry.path();
        let is_stale = entry.file_type().is_ok_and(|t| t.is_file())
            && entry.file_name().to_str().is_some_and(|name| target.is_volume_name(name))
            && !written.contains(&path);
        if is_stale {
            fs::remove_file(&path).map_err(|e| ArchiveError::write(&path, e))?;
            info!(path = %path.display(), "Removed stale volume");
        }
    }
    Ok(())
}
