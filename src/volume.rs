//! Archive volumes on disk
//!
//! An archive with base path `base` lives in three kinds of file:
//! `base.index` (temporal index), `base.meta` (metadata) and the data
//! volumes `base.0`, `base.1`, ... This module owns the open handles and
//! tracks the write offset of each so callers can seek and tell without
//! touching the filesystem.

use crate::codec::{IndexEntry, MetaRecord};
use crate::error::{LogFileError, Result};
use crate::label::{Label, VOL_INDEX, VOL_META};
use crate::types::{LogVersion, Timestamp};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Path of a volume: `base` with `.suffix` appended
pub fn volume_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the metadata volume
pub fn meta_path(base: &Path) -> PathBuf {
    volume_path(base, "meta")
}

/// Path of the temporal index
pub fn index_path(base: &Path) -> PathBuf {
    volume_path(base, "index")
}

/// Path of data volume `vol`
pub fn data_path(base: &Path, vol: i32) -> PathBuf {
    volume_path(base, &vol.to_string())
}

/// An existing archive found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Data volume numbers present, ascending
    pub volumes: Vec<i32>,
}

impl Located {
    /// Highest data volume number
    pub fn max_vol(&self) -> i32 {
        self.volumes.last().copied().unwrap_or(0)
    }
}

/// Outcome of looking for an archive by base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Located),
    NotFound,
}

/// Look for an archive at `base`.
///
/// An archive exists when its metadata volume, its index and at least one
/// data volume are all present.
pub fn locate(base: &Path) -> Lookup {
    if !meta_path(base).is_file() || !index_path(base).is_file() {
        return Lookup::NotFound;
    }

    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = match base.file_name().and_then(|s| s.to_str()) {
        Some(s) => format!("{}.", s),
        None => return Lookup::NotFound,
    };
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Lookup::NotFound,
    };

    let mut volumes: Vec<i32> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter_map(|name| {
            let suffix = name.strip_prefix(&stem)?;
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            suffix.parse::<i32>().ok()
        })
        .collect();
    volumes.sort_unstable();

    if volumes.is_empty() {
        Lookup::NotFound
    } else {
        Lookup::Found(Located { volumes })
    }
}

/// One open volume with a tracked write offset
#[derive(Debug)]
pub struct Volume {
    path: PathBuf,
    file: BufWriter<File>,
    offset: u64,
}

impl Volume {
    /// Create a new, empty volume; fails if the file exists
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LogFileError::create(&path, e))?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            offset: 0,
        })
    }

    /// Open an existing volume positioned at end-of-file
    pub fn open_append(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| LogFileError::open(&path, e))?;
        let mut file = BufWriter::new(file);
        let offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| LogFileError::seek(&path, e))?;
        Ok(Self { path, file, offset })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write offset
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Move the write offset
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| LogFileError::seek(&self.path, e))?;
        self.offset = offset;
        Ok(())
    }

    /// Write bytes at the current offset
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .map_err(|e| LogFileError::write(&self.path, e))?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Push buffered bytes to the file
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| LogFileError::write(&self.path, e))?;
        Ok(())
    }
}

/// The open volumes of one archive
#[derive(Debug)]
pub struct VolumeSet {
    base: PathBuf,
    version: LogVersion,
    pub(crate) index: Volume,
    pub(crate) meta: Volume,
    pub(crate) data: Volume,
    curvol: i32,
}

impl VolumeSet {
    /// Create the index, metadata and first data volume of a new archive.
    ///
    /// Files created before a failure are removed again.
    pub fn create(base: &Path, version: LogVersion) -> Result<Self> {
        let mut created: Vec<PathBuf> = Vec::with_capacity(3);
        let result: Result<Self> = (|| {
            let index = Volume::create(index_path(base))?;
            created.push(index.path().to_path_buf());
            let meta = Volume::create(meta_path(base))?;
            created.push(meta.path().to_path_buf());
            let data = Volume::create(data_path(base, 0))?;
            Ok(Self {
                base: base.to_path_buf(),
                version,
                index,
                meta,
                data,
                curvol: 0,
            })
        })();

        if result.is_err() {
            for path in &created {
                let _ = std::fs::remove_file(path);
            }
        }
        result
    }

    /// Open an existing archive with every volume positioned at end-of-file
    pub fn open(base: &Path, located: &Located, version: LogVersion) -> Result<Self> {
        let curvol = located.max_vol();
        Ok(Self {
            base: base.to_path_buf(),
            version,
            index: Volume::open_append(index_path(base))?,
            meta: Volume::open_append(meta_path(base))?,
            data: Volume::open_append(data_path(base, curvol))?,
            curvol,
        })
    }

    /// Current data volume number
    pub fn curvol(&self) -> i32 {
        self.curvol
    }

    pub fn version(&self) -> LogVersion {
        self.version
    }

    /// Write the three labels of a freshly created archive
    pub fn write_labels(&mut self, label: &Label) -> Result<()> {
        self.index.write_all(&label.for_volume(VOL_INDEX).to_bytes())?;
        self.meta.write_all(&label.for_volume(VOL_META).to_bytes())?;
        self.data.write_all(&label.for_volume(self.curvol).to_bytes())?;
        self.flush()
    }

    /// Switch to the next data volume, writing `label` into it.
    ///
    /// The previous volume is flushed and closed.
    pub fn new_volume(&mut self, label: &Label) -> Result<i32> {
        let nextvol = self.curvol + 1;
        let mut fresh = Volume::create(data_path(&self.base, nextvol))?;
        fresh.write_all(&label.for_volume(nextvol).to_bytes())?;
        fresh.flush()?;

        self.data.flush()?;
        self.data = fresh;
        self.curvol = nextvol;
        Ok(nextvol)
    }

    /// Append a metadata record, returning its encoded size
    pub fn put_meta(&mut self, record: &MetaRecord) -> Result<usize> {
        let bytes = record.encode(self.version);
        self.meta.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Append a temporal index entry for the current offsets
    pub fn put_index(&mut self, timestamp: Timestamp) -> Result<IndexEntry> {
        let entry = IndexEntry {
            timestamp,
            vol: self.curvol,
            meta_offset: self.meta.tell(),
            data_offset: self.data.tell(),
        };
        self.index.write_all(&entry.encode(self.version))?;
        self.index.flush()?;
        Ok(entry)
    }

    /// Append an encoded result to the current data volume
    pub fn put_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.data.write_all(bytes)
    }

    /// Flush every volume
    pub fn flush(&mut self) -> Result<()> {
        self.index.flush()?;
        self.meta.flush()?;
        self.data.flush()
    }

    /// Flush and close every volume
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}
