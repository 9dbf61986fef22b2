//! # Raw File Primitives
//!
//! Seek-based access to the store file: header and ref-count maintenance,
//! index-slot reads and writes, record-header reads, selective in-place
//! field patches, payload reads into caller-owned buffers, record appends
//! at end-of-file, and tail truncation of freed records.
//!
//! ## I/O Model
//!
//! `RawFile` owns the file handle and a cached end-of-file offset. All reads
//! and writes seek to an absolute position first; multi-byte writes that
//! must not interleave (a full record append) are assembled in memory and
//! issued as a single `write_all`.
//!
//! ## Locking
//!
//! Opening takes an advisory exclusive `flock` on the file, so a second
//! process opening the same store fails immediately. The lock is released
//! when the handle is dropped. Thread-level exclusion is the caller's job
//! (the public store wraps this type in a mutex).
//!
//! ## Corruption Policy
//!
//! A short read at a supposedly live offset, a pointer landing inside the
//! header or index region, or a pointer past end-of-file is corruption and
//! fails the operation. No repair is attempted; reopening with `truncate`
//! starts clean.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bumpalo::Bump;
use eyre::{bail, ensure, Result, WrapErr};
use zerocopy::{FromBytes, IntoBytes};

use super::format::{
    FileHeader, RecordHeader, RecordKind, CHAIN_NEXT_POS, FILE_HEADER_SIZE, KIND_POS,
    LIST_END_POS, LIST_NEXT_POS, LIST_PREV_POS, MAX_KEY_LEN, NIL, RECORD_HEADER_SIZE, SLOT_SIZE,
};

/// Scratch buffer for key decoding, owned by the caller of a chain walk.
pub type KeyBuf = [u8; MAX_KEY_LEN];

/// Durability policy applied after every mutating store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// fsync after each mutation (default).
    #[default]
    Full,
    /// Leave flushing to the OS. Faster, loses the crash boundary.
    Off,
}

/// Three-valued update for one pointer field of a record header:
/// leave the stored bytes alone, set them to an offset, or zero them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldUpdate {
    #[default]
    Keep,
    Set(u32),
    Clear,
}

impl FieldUpdate {
    /// `Set` for a live offset, `Clear` for `NIL`. Used when copying a
    /// pointer from one record to another.
    pub fn pointer(offset: u32) -> Self {
        if offset == NIL {
            FieldUpdate::Clear
        } else {
            FieldUpdate::Set(offset)
        }
    }

    fn resolve(self) -> Option<u32> {
        match self {
            FieldUpdate::Keep => None,
            FieldUpdate::Set(offset) => Some(offset),
            FieldUpdate::Clear => Some(NIL),
        }
    }
}

/// Selective rewrite of record-header fields. Only fields named by the
/// patch have their bytes touched on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordPatch {
    pub kind: Option<RecordKind>,
    pub chain_next: FieldUpdate,
    pub list_next: FieldUpdate,
    pub list_prev: FieldUpdate,
    pub list_end: FieldUpdate,
}

#[derive(Debug)]
pub struct RawFile {
    file: File,
    path: PathBuf,
    header: FileHeader,
    eof: u64,
    sync_mode: SyncMode,
}

impl RawFile {
    /// Opens or creates the store file, takes the advisory exclusive lock,
    /// and initializes or validates the header and index region.
    pub fn open(path: &Path, index_size: u32, truncate: bool, sync_mode: SyncMode) -> Result<Self> {
        ensure!(
            index_size >= SLOT_SIZE as u32 && index_size % SLOT_SIZE as u32 == 0,
            "invalid address space size {}: must be a non-zero multiple of {}",
            index_size,
            SLOT_SIZE
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        lock_exclusive(&file, path)?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        let mut raw = Self {
            file,
            path: path.to_path_buf(),
            header: FileHeader::new(index_size),
            eof: file_size,
            sync_mode,
        };

        if truncate || file_size == 0 {
            raw.init()?;
        } else {
            raw.load_header()?;
        }

        Ok(raw)
    }

    /// Truncates the file and writes a fresh header plus zeroed index.
    fn init(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .wrap_err_with(|| format!("failed to truncate '{}'", self.path.display()))?;

        let index_size = self.header.index_size();
        self.header = FileHeader::new(index_size);
        self.eof = 0;

        let mut image = Vec::with_capacity(FILE_HEADER_SIZE + index_size as usize);
        image.extend_from_slice(self.header.as_bytes());
        image.resize(FILE_HEADER_SIZE + index_size as usize, 0);
        self.write_all_at(0, &image)?;
        self.eof = image.len() as u64;

        self.sync()
    }

    fn load_header(&mut self) -> Result<()> {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        self.read_exact_at(0, &mut bytes)
            .wrap_err("failed to read store header")?;

        let header = FileHeader::read_from_bytes(&bytes)
            .map_err(|e| eyre::eyre!("failed to parse store header: {:?}", e))?;

        ensure!(
            header.index_size() >= SLOT_SIZE as u32
                && header.index_size() % SLOT_SIZE as u32 == 0,
            "corrupted store '{}': index size {} is not a non-zero multiple of {}",
            self.path.display(),
            header.index_size(),
            SLOT_SIZE
        );
        ensure!(
            self.eof >= header.heap_start(),
            "corrupted store '{}': file size {} is smaller than header + index ({})",
            self.path.display(),
            self.eof,
            header.heap_start()
        );

        self.header = header;
        Ok(())
    }

    pub fn index_size(&self) -> u32 {
        self.header.index_size()
    }

    pub fn slot_count(&self) -> u32 {
        self.header.slot_count()
    }

    pub fn ref_count(&self) -> u32 {
        self.header.ref_count()
    }

    pub fn file_len(&self) -> u64 {
        self.eof
    }

    pub fn inc_ref_count(&mut self) -> Result<()> {
        let count = self.header.ref_count() + 1;
        self.header.set_ref_count(count);
        self.write_ref_count(count)
    }

    /// Decrements the live-record counter. Reaching zero truncates the file
    /// back to header + index and re-zeroes every slot.
    pub fn dec_ref_count(&mut self) -> Result<()> {
        let count = self.header.ref_count();
        debug_assert!(count > 0, "ref_count underflow");
        ensure!(count > 0, "store invariant violated: ref_count underflow");

        let count = count - 1;
        self.header.set_ref_count(count);
        self.write_ref_count(count)?;

        if count == 0 {
            let heap_start = self.header.heap_start();
            self.file
                .set_len(heap_start)
                .wrap_err("failed to truncate emptied store")?;
            self.eof = heap_start;

            let zeros = vec![0u8; self.header.index_size() as usize];
            self.write_all_at(FILE_HEADER_SIZE as u64, &zeros)?;
        }

        Ok(())
    }

    fn write_ref_count(&mut self, count: u32) -> Result<()> {
        // ref_count lives in the second u32 of the header.
        self.write_all_at(4, &count.to_le_bytes())
    }

    pub fn read_slot(&mut self, slot_off: u64) -> Result<Option<u32>> {
        let mut bytes = [0u8; SLOT_SIZE];
        self.read_exact_at(slot_off, &mut bytes)
            .wrap_err_with(|| format!("failed to read index slot at {}", slot_off))?;
        let offset = u32::from_le_bytes(bytes);
        Ok(if offset == NIL { None } else { Some(offset) })
    }

    pub fn write_slot(&mut self, slot_off: u64, offset: u32) -> Result<()> {
        self.write_all_at(slot_off, &offset.to_le_bytes())
            .wrap_err_with(|| format!("failed to write index slot at {}", slot_off))
    }

    /// Reads one record header. Returns `None` for a region of zeros or an
    /// offset past the current end-of-file (both mean "no record here");
    /// an offset inside the header or index region is corruption.
    pub fn read_record(&mut self, offset: u32) -> Result<Option<RecordHeader>> {
        ensure!(
            offset as u64 >= self.header.heap_start(),
            "corrupted store '{}': record pointer {} lands inside the index",
            self.path.display(),
            offset
        );
        if offset as u64 + RECORD_HEADER_SIZE as u64 > self.eof {
            return Ok(None);
        }

        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        self.read_exact_at(offset as u64, &mut bytes)
            .wrap_err_with(|| format!("failed to read record header at {}", offset))?;

        let header = RecordHeader::read_from_bytes(&bytes)
            .map_err(|e| eyre::eyre!("failed to parse record header at {}: {:?}", offset, e))?;

        Ok(if header.is_empty() { None } else { Some(header) })
    }

    /// Like [`read_record`](Self::read_record) but for pointers that must
    /// reference a live record.
    pub fn expect_record(&mut self, offset: u32) -> Result<RecordHeader> {
        match self.read_record(offset)? {
            Some(header) => Ok(header),
            None => bail!(
                "corrupted store '{}': dangling record pointer {}",
                self.path.display(),
                offset
            ),
        }
    }

    /// Rewrites only the fields named by the patch, seeking to each field's
    /// byte position inside the record.
    pub fn patch_record(&mut self, offset: u32, patch: &RecordPatch) -> Result<()> {
        if let Some(kind) = patch.kind {
            self.write_all_at(offset as u64 + KIND_POS, &[kind as u8])?;
        }
        for (pos, update) in [
            (CHAIN_NEXT_POS, patch.chain_next),
            (LIST_NEXT_POS, patch.list_next),
            (LIST_PREV_POS, patch.list_prev),
            (LIST_END_POS, patch.list_end),
        ] {
            if let Some(value) = update.resolve() {
                self.write_all_at(offset as u64 + pos, &value.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Full header rewrite, used by in-place value updates.
    pub fn write_record_header(&mut self, offset: u32, header: &RecordHeader) -> Result<()> {
        self.write_all_at(offset as u64, header.as_bytes())
    }

    /// Decodes the record's live key into the caller's scratch buffer and
    /// returns its length.
    pub fn read_key(
        &mut self,
        offset: u32,
        header: &RecordHeader,
        keybuf: &mut KeyBuf,
    ) -> Result<usize> {
        let key_len = header.key_len();
        ensure!(
            key_len <= MAX_KEY_LEN,
            "corrupted store '{}': record at {} declares key length {}",
            self.path.display(),
            offset,
            key_len
        );
        self.read_exact_at(header.key_pos(offset), &mut keybuf[..key_len])
            .wrap_err_with(|| format!("failed to read key of record at {}", offset))?;
        Ok(key_len)
    }

    /// Reads the record's live value into the caller's arena.
    pub fn read_value<'a>(
        &mut self,
        offset: u32,
        header: &RecordHeader,
        arena: &'a Bump,
    ) -> Result<&'a [u8]> {
        ensure!(
            header.value_len() <= header.max_value_len(),
            "corrupted store '{}': record at {} declares value length {} over capacity {}",
            self.path.display(),
            offset,
            header.value_len(),
            header.max_value_len()
        );
        let value = arena.alloc_slice_fill_copy(header.value_len() as usize, 0u8);
        self.read_exact_at(header.value_pos(offset), value)
            .wrap_err_with(|| format!("failed to read value of record at {}", offset))?;
        Ok(value)
    }

    /// Writes a complete record (header, key, value, zero slack) at
    /// end-of-file and returns its offset.
    pub fn append_record(
        &mut self,
        header: &RecordHeader,
        key: &[u8],
        value: &[u8],
    ) -> Result<u32> {
        debug_assert_eq!(header.key_len(), key.len());
        debug_assert_eq!(header.value_len() as usize, value.len());

        let offset = self.eof;
        let total = header.total_size();
        ensure!(
            offset + total <= u32::MAX as u64,
            "store file full: record at {} would exceed the 32-bit offset space",
            offset
        );

        let mut image = Vec::with_capacity(total as usize);
        image.extend_from_slice(header.as_bytes());
        image.extend_from_slice(key);
        image.resize(RECORD_HEADER_SIZE + header.max_key_len(), 0);
        image.extend_from_slice(value);
        image.resize(total as usize, 0);

        self.write_all_at(offset, &image)?;
        self.eof = offset + total;

        Ok(offset as u32)
    }

    /// In-place rewrite of a record whose capacity bands accommodate the
    /// new content. Slack past the new value length is left undisturbed.
    pub fn rewrite_record(
        &mut self,
        offset: u32,
        header: &RecordHeader,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        debug_assert!(key.len() <= header.max_key_len());
        debug_assert!(value.len() <= header.max_value_len() as usize);

        self.write_record_header(offset, header)?;
        self.write_all_at(header.key_pos(offset), key)?;
        self.write_all_at(header.value_pos(offset), value)?;
        Ok(())
    }

    /// Drops a freed record's bytes if they sit exactly at end-of-file.
    /// Records anywhere else stay as dead bytes until the store empties.
    pub fn truncate_record_at_eof(&mut self, offset: u32, header: &RecordHeader) -> Result<bool> {
        let end = offset as u64 + header.total_size();
        if offset as u64 >= self.eof || end != self.eof {
            return Ok(false);
        }
        self.file
            .set_len(offset as u64)
            .wrap_err_with(|| format!("failed to truncate freed record at {}", offset))?;
        self.eof = offset as u64;
        Ok(true)
    }

    pub fn sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Full => self
                .file
                .sync_all()
                .wrap_err_with(|| format!("failed to fsync '{}'", self.path.display())),
            SyncMode::Off => Ok(()),
        }
    }

    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .wrap_err_with(|| format!("failed to seek to {}", pos))?;
        self.file
            .read_exact(buf)
            .wrap_err_with(|| format!("short read at offset {}", pos))?;
        Ok(())
    }

    fn write_all_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .wrap_err_with(|| format!("failed to seek to {}", pos))?;
        self.file
            .write_all(buf)
            .wrap_err_with(|| format!("failed to write {} bytes at offset {}", buf.len(), pos))?;
        if pos + buf.len() as u64 > self.eof {
            self.eof = pos + buf.len() as u64;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: flock on a valid owned fd; the lock is advisory and released
    // by the kernel when the descriptor is closed.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        bail!(
            "failed to lock store file '{}' (already open in another process?): {}",
            path.display(),
            err
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _path: &Path) -> Result<()> {
    Ok(())
}
