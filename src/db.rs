//! The restamp database stores information about previous builds for
//! determining which targets are up to date.
//!
//! The whole database is rewritten on every commit: it's written to a
//! temporary file next to the real one and then renamed over it, so a
//! reader only ever sees a complete database.

use crate::stamp::Stamp;
use crate::store::{Dep, MemoryStore, Record, Store};
use anyhow::{anyhow, bail};
use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"restamp\0";
const VERSION: u32 = 1;

const TAG_MISSING: u8 = 0;
const TAG_HASH: u8 = 1;

struct BWriter<W: Write> {
    w: W,
}

impl<W: Write> BWriter<W> {
    fn write_u8(&mut self, n: u8) -> std::io::Result<()> {
        self.w.write_all(&[n])
    }
    fn write_u16(&mut self, n: u16) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }
    fn write_u32(&mut self, n: u32) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }
    fn write_u64(&mut self, n: u64) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }

    fn write_str(&mut self, s: &str) -> std::io::Result<()> {
        if s.len() > u16::MAX as usize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "target name too long: {:?}...",
                    s.chars().take(32).collect::<String>()
                ),
            ));
        }
        self.write_u16(s.len() as u16)?;
        self.w.write_all(s.as_bytes())
    }

    fn write_stamp(&mut self, stamp: Stamp) -> std::io::Result<()> {
        match stamp {
            Stamp::Missing => self.write_u8(TAG_MISSING),
            Stamp::Hash(hash) => {
                self.write_u8(TAG_HASH)?;
                self.write_u64(hash)
            }
        }
    }

    fn write_len(&mut self, len: usize) -> std::io::Result<()> {
        let len = u32::try_from(len).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "too many entries")
        })?;
        self.write_u32(len)
    }
}

/// Write `store` with `staged`, if given, replacing any record of the same
/// target.
fn write_store<W: Write>(
    w: W,
    store: &MemoryStore,
    staged: Option<(&str, &Record)>,
) -> std::io::Result<()> {
    let mut w = BWriter { w };
    w.w.write_all(MAGIC)?;
    w.write_u32(VERSION)?;

    let mut records: Vec<(&str, &Record)> = store
        .iter()
        .map(|(target, record)| (target.as_str(), record))
        .filter(|(target, _)| staged.map_or(true, |(staged, _)| staged != *target))
        .collect();
    records.extend(staged);
    // Sorted so that identical stores produce identical files.
    records.sort_by(|a, b| a.0.cmp(b.0));

    w.write_len(records.len())?;
    for (target, record) in records {
        w.write_str(target)?;
        w.write_stamp(record.stamp)?;
        w.write_len(record.deps.len())?;
        for dep in &record.deps {
            w.write_str(&dep.target)?;
            w.write_stamp(dep.stamp)?;
        }
    }
    w.w.flush()
}

struct BReader<R: Read> {
    r: R,
}

impl<R: Read> BReader<R> {
    fn read_array<const N: usize>(&mut self) -> std::io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.r.read_exact(&mut buf)?;
        Ok(buf)
    }
    fn read_u8(&mut self) -> std::io::Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }
    fn read_u16(&mut self) -> std::io::Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }
    fn read_u32(&mut self) -> std::io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }
    fn read_u64(&mut self) -> std::io::Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_str(&mut self) -> anyhow::Result<String> {
        let len = self.read_u16()? as usize;
        let mut buf = vec![0u8; len];
        self.r.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|err| anyhow!("bad target name: {}", err))
    }

    fn read_stamp(&mut self) -> anyhow::Result<Stamp> {
        match self.read_u8()? {
            TAG_MISSING => Ok(Stamp::Missing),
            TAG_HASH => Ok(Stamp::Hash(self.read_u64()?)),
            tag => bail!("bad stamp tag {}", tag),
        }
    }
}

fn read_store<R: Read>(r: R) -> anyhow::Result<MemoryStore> {
    let mut r = BReader { r };
    let magic: [u8; 8] = r.read_array()?;
    if &magic != MAGIC {
        bail!("not a restamp database");
    }
    let version = r.read_u32()?;
    if version != VERSION {
        bail!("database version {} unsupported, expected {}", version, VERSION);
    }

    let mut store = MemoryStore::new();
    let count = r.read_u32()?;
    for _ in 0..count {
        let target = r.read_str()?;
        let stamp = r.read_stamp()?;
        let dep_count = r.read_u32()?;
        let mut deps = Vec::new();
        for _ in 0..dep_count {
            deps.push(Dep {
                target: r.read_str()?,
                stamp: r.read_stamp()?,
            });
        }
        store.insert(target, Record { stamp, deps });
    }

    let mut trailing = [0u8; 1];
    if r.r.read(&mut trailing)? != 0 {
        bail!("trailing data after {} records", count);
    }
    Ok(store)
}

/// A Store persisted to a file.
pub struct DiskStore {
    path: PathBuf,
    mem: MemoryStore,
}

impl DiskStore {
    /// Load the database at `path`.  A missing file is an empty database.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mem = match File::open(path) {
            Ok(f) => read_store(BufReader::new(f))
                .map_err(|err| anyhow!("load {}: {}", path.display(), err))?,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    bail!("open {}: {}", path.display(), err);
                }
                MemoryStore::new()
            }
        };
        Ok(DiskStore {
            path: path.to_owned(),
            mem,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the database plus `staged` out: temp file, sync, rename.
    fn flush(&self, staged: Option<(&str, &Record)>) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        write_store(BufWriter::new(tmp.as_file_mut()), &self.mem, staged)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl Store for DiskStore {
    fn record(&self, target: &str) -> Option<&Record> {
        self.mem.record(target)
    }

    fn begin(&mut self, target: &str) {
        self.mem.begin(target)
    }

    fn record_dependency(&mut self, from: &str, to: &str, stamp: Stamp) {
        self.mem.record_dependency(from, to, stamp)
    }

    fn commit(&mut self, target: &str, stamp: Stamp) -> std::io::Result<()> {
        let record = Record {
            stamp,
            deps: self.mem.take_pending(target),
        };
        // Memory only changes once the record is safely on disk.
        self.flush(Some((target, &record)))?;
        self.mem.insert(target.to_owned(), record);
        Ok(())
    }

    fn abandon(&mut self, target: &str) {
        self.mem.abandon(target)
    }
}
