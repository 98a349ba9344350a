//! # Journal — append-only JSON record log
//!
//! The on-disk container underneath a HarborDB database file: a sequence of
//! length-prefixed, checksummed records whose payloads are JSON values.
//!
//! ## Record Format
//!
//! ```text
//! <MAGIC> <LEN> <SHA1>\n
//! <payload: LEN bytes of UTF-8 JSON>\n
//! ```
//!
//! `MAGIC` identifies the log flavor (it may contain spaces, so the header
//! line is parsed from the right: digest, then length, then the rest is the
//! magic). `SHA1` is the lowercase hex digest of the payload bytes, excluding
//! the trailing newline.
//!
//! ## Reading, writing, and the corrupt tail
//!
//! Records are read strictly sequentially. An integrity failure (bad header,
//! length, checksum, or magic) yields an I/O error naming the byte offset and
//! leaves the read position just before the bad record; [`Journal::unread`]
//! rewinds over the last good record for the same effect. The first
//! [`Journal::write`] after reading truncates the file at the read position,
//! which is how a corrupt or half-written tail is physically discarded.
//!
//! Writes go straight to the OS but are not durable until
//! [`Journal::commit`] runs `fsync`. [`Journal::replace_start`] /
//! [`Journal::replace_commit`] implement atomic whole-log replacement
//! (write a sibling temporary, fsync, rename over, fsync the directory),
//! which compaction builds on.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use model::{DbError, Result};
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Magic token of a standalone database log.
pub const DB_MAGIC: &str = "HARBOR JSON";

/// Magic token of a clustered database log. This crate only reads such logs;
/// writing them belongs to the consensus layer.
pub const CLUSTER_MAGIC: &str = "HARBOR CLUSTER";

/// Upper bound on a single record's payload, as a defense against a garbage
/// length field causing a huge allocation.
const MAX_PAYLOAD_SIZE: u64 = 1024 * 1024 * 1024;

/// Longest header line we will ever see: magic + length + hex digest.
const MAX_HEADER_SIZE: usize = 128;

/// How a journal is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Create the file, failing if it already exists.
    CreateExcl,
}

/// Whether to take the advisory lock that guards a journal against a second
/// opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locking {
    Yes,
    No,
    /// Lock iff the journal is opened for writing.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoState {
    Read,
    Write,
}

/// An open journal file.
///
/// Dropping a `Journal` closes the file and releases its lock.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    magic: String,
    read_only: bool,
    state: IoState,
    /// Byte position just past the last good record read or written.
    offset: u64,
    /// Start of the most recently read record, while `unread` is still
    /// possible.
    prev_offset: Option<u64>,
    /// Advisory lock on the sidecar lock file; released on drop.
    _lock: Option<File>,
}

impl Journal {
    /// Opens the journal at `path`.
    ///
    /// `magics` lists the acceptable magic tokens. An existing, non-empty
    /// file must carry one of them (the detected token is available through
    /// [`Journal::magic`]); an empty or freshly created file adopts the
    /// first.
    pub fn open<P: AsRef<Path>>(
        path: P,
        magics: &[&str],
        mode: OpenMode,
        locking: Locking,
    ) -> Result<Journal> {
        assert!(!magics.is_empty());
        let path = path.as_ref().to_path_buf();

        let lock = match locking {
            Locking::Yes => Some(acquire_lock(&path)?),
            Locking::Auto if mode != OpenMode::ReadOnly => Some(acquire_lock(&path)?),
            _ => None,
        };

        let mut options = OpenOptions::new();
        options.read(true);
        match mode {
            OpenMode::ReadOnly => {}
            OpenMode::ReadWrite => {
                options.write(true);
            }
            OpenMode::CreateExcl => {
                options.write(true).create_new(true);
            }
        }
        let mut file = options
            .open(&path)
            .map_err(|e| DbError::io_with(format!("{}: open failed", path.display()), e))?;

        let size = file
            .metadata()
            .map_err(|e| DbError::io_with(format!("{}: stat failed", path.display()), e))?
            .len();
        let magic = if size == 0 {
            magics[0].to_string()
        } else {
            let found = read_magic(&mut file, &path)?;
            if !magics.contains(&found.as_str()) {
                return Err(DbError::io(format!(
                    "{}: unexpected file format (magic {:?})",
                    path.display(),
                    found
                )));
            }
            found
        };

        Ok(Journal {
            path,
            file,
            magic,
            read_only: mode == OpenMode::ReadOnly,
            state: IoState::Read,
            offset: 0,
            prev_offset: None,
            _lock: lock,
        })
    }

    /// The magic token this journal carries (detected from the file when it
    /// was non-empty at open).
    pub fn magic(&self) -> &str {
        &self.magic
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte position just past the last successfully read or written record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next record's JSON payload, or `None` at end of file.
    ///
    /// On an integrity failure the error names the record's byte offset and
    /// the read position is left just before the bad record, so a subsequent
    /// write will truncate it away.
    pub fn read(&mut self) -> Result<Option<Value>> {
        if self.state != IoState::Read {
            return Err(DbError::io(format!(
                "{}: cannot read after writing",
                self.path.display()
            )));
        }
        let start = self.offset;

        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|e| self.io_at(start, "seek failed", Some(e)))?;

        let mut header = [0u8; MAX_HEADER_SIZE];
        let n = read_up_to(&mut self.file, &mut header)
            .map_err(|e| self.io_at(start, "read failed", Some(e)))?;
        if n == 0 {
            return Ok(None);
        }

        let newline = header[..n]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| self.io_at(start, "corrupt record header", None))?;
        let line = std::str::from_utf8(&header[..newline])
            .map_err(|_| self.io_at(start, "corrupt record header", None))?;

        // The magic may contain spaces; split off the digest and length from
        // the right and take whatever is left as the magic.
        let (rest, digest) = line
            .rsplit_once(' ')
            .ok_or_else(|| self.io_at(start, "corrupt record header", None))?;
        let (magic, len_str) = rest
            .rsplit_once(' ')
            .ok_or_else(|| self.io_at(start, "corrupt record header", None))?;
        if magic != self.magic {
            return Err(self.io_at(start, "magic mismatch", None));
        }
        let len: u64 = len_str
            .parse()
            .map_err(|_| self.io_at(start, "bad record length", None))?;
        if len > MAX_PAYLOAD_SIZE {
            return Err(self.io_at(start, "unreasonable record length", None));
        }

        let header_len = newline as u64 + 1;
        self.file
            .seek(SeekFrom::Start(start + header_len))
            .map_err(|e| self.io_at(start, "seek failed", Some(e)))?;
        let mut payload = vec![0u8; len as usize + 1];
        if let Err(e) = self.file.read_exact(&mut payload) {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    self.io_at(start, "truncated record payload", None)
                }
                _ => self.io_at(start, "read failed", Some(e)),
            });
        }
        if payload[len as usize] != b'\n' {
            return Err(self.io_at(start, "missing newline after record payload", None));
        }
        let payload = &payload[..len as usize];

        let actual = hex::encode(Sha1::digest(payload));
        if actual != digest {
            return Err(self.io_at(start, "checksum mismatch", None));
        }

        let json: Value = serde_json::from_slice(payload)
            .map_err(|_| self.io_at(start, "payload is not valid JSON", None))?;

        self.prev_offset = Some(start);
        self.offset = start + header_len + len + 1;
        Ok(Some(json))
    }

    /// Rewinds over the most recently read record, so that the next
    /// [`Journal::read`] returns it again and the next [`Journal::write`]
    /// overwrites it. Replay uses this to stop cleanly at the first
    /// undecodable record.
    pub fn unread(&mut self) {
        if let Some(prev) = self.prev_offset.take() {
            self.offset = prev;
        }
    }

    /// Appends a record carrying `json`. Buffered by the OS; not durable
    /// until [`Journal::commit`].
    pub fn write(&mut self, json: &Value) -> Result<()> {
        if self.read_only {
            return Err(DbError::io(format!(
                "{}: journal is open read-only",
                self.path.display()
            )));
        }
        if self.state == IoState::Read {
            // Transitioning to writing discards everything past the read
            // position, including any corrupt tail left by a crash.
            self.file
                .set_len(self.offset)
                .map_err(|e| self.io_at(self.offset, "truncate failed", Some(e)))?;
            self.state = IoState::Write;
            self.prev_offset = None;
        }

        let payload = serde_json::to_string(json)
            .map_err(|_| DbError::io("record payload cannot be serialized"))?;
        let digest = hex::encode(Sha1::digest(payload.as_bytes()));
        let header = format!("{} {} {}\n", self.magic, payload.len(), digest);

        let written = (|| {
            self.file.seek(SeekFrom::Start(self.offset))?;
            self.file.write_all(header.as_bytes())?;
            self.file.write_all(payload.as_bytes())?;
            self.file.write_all(b"\n")
        })();
        if let Err(e) = written {
            return Err(self.io_at(self.offset, "write failed", Some(e)));
        }

        self.offset += header.len() as u64 + payload.len() as u64 + 1;
        Ok(())
    }

    /// Forces everything written so far onto stable storage.
    pub fn commit(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| {
            DbError::io_with(format!("{}: fsync failed", self.path.display()), e)
        })
    }

    /// Starts an atomic replacement: creates a sibling temporary journal with
    /// the same magic, into which the caller writes the replacement contents
    /// before [`Journal::replace_commit`].
    pub fn replace_start(&self) -> Result<Journal> {
        let tmp = tmp_path(&self.path);
        // A stale temporary from an interrupted replacement is abandoned.
        let _ = fs::remove_file(&tmp);
        Journal::open(&tmp, &[&self.magic], OpenMode::CreateExcl, Locking::No)
    }

    /// Atomically swaps `new`'s file into this journal's path and re-points
    /// this journal at it. The original lock is retained. On failure the
    /// original file is untouched.
    pub fn replace_commit(&mut self, mut new: Journal) -> Result<()> {
        new.commit()?;
        fs::rename(&new.path, &self.path).map_err(|e| {
            DbError::io_with(
                format!(
                    "failed to rename {} to {}",
                    new.path.display(),
                    self.path.display()
                ),
                e,
            )
        })?;
        sync_parent_dir(&self.path)?;

        self.file = new.file;
        self.offset = new.offset;
        self.state = IoState::Write;
        self.prev_offset = None;
        Ok(())
    }

    /// Abandons a replacement started with [`Journal::replace_start`],
    /// deleting its temporary file.
    pub fn replace_abort(new: Journal) {
        let path = new.path.clone();
        drop(new);
        let _ = fs::remove_file(path);
    }

    fn io_at(&self, offset: u64, msg: &str, source: Option<std::io::Error>) -> DbError {
        let msg = format!("{}: {} in record at offset {}", self.path.display(), msg, offset);
        match source {
            Some(e) => DbError::io_with(msg, e),
            None => DbError::io(msg),
        }
    }
}

/// Reads the magic token from the first record header of a non-empty file.
fn read_magic(file: &mut File, path: &Path) -> Result<String> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| DbError::io_with(format!("{}: seek failed", path.display()), e))?;
    let mut header = [0u8; MAX_HEADER_SIZE];
    let n = read_up_to(file, &mut header)
        .map_err(|e| DbError::io_with(format!("{}: read failed", path.display()), e))?;
    let bad = || DbError::io(format!("{}: unexpected file format", path.display()));
    let newline = header[..n].iter().position(|&b| b == b'\n').ok_or_else(bad)?;
    let line = std::str::from_utf8(&header[..newline]).map_err(|_| bad())?;
    let (rest, _digest) = line.rsplit_once(' ').ok_or_else(bad)?;
    let (magic, _len) = rest.rsplit_once(' ').ok_or_else(bad)?;
    if magic.is_empty() {
        return Err(bad());
    }
    Ok(magic.to_string())
}

/// Like `read`, but loops until the buffer is full or EOF.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn acquire_lock(path: &Path) -> Result<File> {
    let lock_path = lock_path(path);
    let lock = File::create(&lock_path).map_err(|e| {
        DbError::io_with(format!("{}: failed to create lock file", lock_path.display()), e)
    })?;
    lock.try_lock_exclusive().map_err(|_| {
        DbError::io(format!(
            "{}: database is locked by another process",
            path.display()
        ))
    })?;
    Ok(lock)
}

/// Sidecar lock file: `<db>.lock` next to the journal. The lock is the flock
/// on it, not its existence, so a stale file left by a crash is harmless.
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Temporary file used while building a replacement journal.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Makes a rename in `path`'s directory durable.
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    // Directory fsync is a Unix notion; opening a directory for sync is not
    // portable to Windows, where the rename itself is the best we can do.
    #[cfg(unix)]
    {
        let dir = File::open(&parent).map_err(|e| {
            DbError::io_with(format!("{}: open failed", parent.display()), e)
        })?;
        dir.sync_all().map_err(|e| {
            DbError::io_with(format!("{}: fsync failed", parent.display()), e)
        })?;
    }
    #[cfg(not(unix))]
    let _ = parent;
    Ok(())
}

#[cfg(test)]
mod tests;
