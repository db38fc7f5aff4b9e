//! Stamps are fingerprints of a target's observable state, compared to
//! decide whether a target (or something it depends on) changed.
//!
//! Files are stamped by content.  Directories are stamped by the metadata of
//! every entry beneath them, sorted by path before hashing so the result
//! doesn't depend on the order the filesystem hands entries back.

use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::fs::Metadata;
use std::hash::Hasher;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Fingerprint of a target's state.  Also models "target is absent".
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Stamp {
    Missing,
    Hash(u64),
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stamp::Missing => write!(f, "missing"),
            Stamp::Hash(hash) => write!(f, "{:016x}", hash),
        }
    }
}

/// How a path's state is turned into a Stamp.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StampMode {
    /// Hash of the file's bytes.
    Content,
    /// Hash of the file's meaningful lines in sorted order, so that output
    /// that only differs in ordering, comments or blank lines stamps equal.
    Lines,
    /// Metadata of a whole directory tree.
    Tree,
}

impl std::str::FromStr for StampMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(StampMode::Content),
            "lines" => Ok(StampMode::Lines),
            "tree" => Ok(StampMode::Tree),
            _ => Err(format!(
                "unknown stamp mode {:?}, expected content, lines or tree",
                s
            )),
        }
    }
}

const UNIT_SEPARATOR: u8 = 0x1F;
const RECORD_SEPARATOR: u8 = 0x1E;

#[derive(Default)]
struct StampHasher(DefaultHasher);

impl StampHasher {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
        self.0.write_u8(UNIT_SEPARATOR);
    }

    fn write_u64(&mut self, n: u64) {
        self.0.write_u64(n);
        self.0.write_u8(UNIT_SEPARATOR);
    }

    fn end_record(&mut self) {
        self.0.write_u8(RECORD_SEPARATOR);
    }

    fn finish(&self) -> Stamp {
        Stamp::Hash(self.0.finish())
    }
}

/// Metadata gathered for one entry of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path relative to the stamped root; the root itself is ".".
    pub path: String,
    pub mtime: i64,
    pub mtime_nsec: i64,
    pub size: u64,
    pub ino: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Entry {
    pub fn from_metadata(path: String, meta: &Metadata) -> Self {
        Entry {
            path,
            mtime: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
            size: meta.size(),
            ino: meta.ino(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }
}

/// Combine tree entries into a Stamp.  Entries are sorted by path first,
/// so any traversal order gives the same result.
pub fn stamp_entries(mut entries: Vec<Entry>) -> Stamp {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let mut hasher = StampHasher::default();
    for entry in &entries {
        hasher.write_bytes(entry.path.as_bytes());
        hasher.write_u64(entry.mtime as u64);
        hasher.write_u64(entry.mtime_nsec as u64);
        hasher.write_u64(entry.size);
        hasher.write_u64(entry.ino);
        hasher.write_u64(entry.mode as u64);
        hasher.write_u64(entry.uid as u64);
        hasher.write_u64(entry.gid as u64);
        hasher.end_record();
    }
    hasher.finish()
}

/// Stamp raw bytes.
pub fn stamp_content(content: &[u8]) -> Stamp {
    let mut hasher = StampHasher::default();
    hasher.write_bytes(content);
    hasher.finish()
}

/// Stamp the canonical form of a line-oriented file: trailing whitespace
/// trimmed, blank and '#' comment lines dropped, remaining lines sorted.
pub fn stamp_lines(content: &[u8]) -> Stamp {
    let text = String::from_utf8_lossy(content);
    let mut lines: Vec<&str> = text
        .lines()
        .map(|line| line.trim_end())
        .filter(|line| !line.is_empty() && !line.trim_start().starts_with('#'))
        .collect();
    lines.sort_unstable();
    let mut hasher = StampHasher::default();
    for line in lines {
        hasher.write_bytes(line.as_bytes());
    }
    hasher.end_record();
    hasher.finish()
}

/// List the root-relative paths of everything under `root`, root included.
/// Symlinks are not followed.
fn list_tree(root: &Path) -> std::io::Result<Vec<String>> {
    let mut paths = vec![".".to_owned()];
    let mut pending = vec![String::new()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(root.join(&dir))? {
            let entry = entry?;
            let name = entry.file_name();
            let rel = if dir.is_empty() {
                name.to_string_lossy().into_owned()
            } else {
                format!("{}/{}", dir, name.to_string_lossy())
            };
            if entry.file_type()?.is_dir() {
                pending.push(rel.clone());
            }
            paths.push(rel);
        }
    }
    Ok(paths)
}

/// Stamp a directory tree by its metadata.
pub fn stamp_tree(root: &Path) -> std::io::Result<Stamp> {
    let paths = list_tree(root)?;
    let entries = paths
        .into_par_iter()
        .map(|rel| {
            let meta = std::fs::symlink_metadata(root.join(&rel))?;
            Ok(Entry::from_metadata(rel, &meta))
        })
        .collect::<std::io::Result<Vec<Entry>>>()?;
    Ok(stamp_entries(entries))
}

/// Pick a stamp mode for a path from what's on disk.
pub fn default_mode(meta: &Metadata) -> StampMode {
    if meta.is_dir() {
        StampMode::Tree
    } else {
        StampMode::Content
    }
}

/// Stamp an on-disk path.  An absent path is Stamp::Missing.
/// With no explicit mode, directories are stamped as trees and everything
/// else by content.
pub fn stamp_path(path: &Path, mode: Option<StampMode>) -> std::io::Result<Stamp> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                return Ok(Stamp::Missing);
            }
            return Err(err);
        }
    };
    match mode.unwrap_or_else(|| default_mode(&meta)) {
        StampMode::Content => Ok(stamp_content(&std::fs::read(path)?)),
        StampMode::Lines => Ok(stamp_lines(&std::fs::read(path)?)),
        StampMode::Tree => stamp_tree(path),
    }
}
