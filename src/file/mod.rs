//! # Single-File Persistent Backend
//!
//! The core of MagpieKV: a self-contained on-disk hash table in one regular
//! file, storing byte-strings and ordered lists of byte-strings with O(1)
//! expected operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        FileStore (mutex + fsync policy)      │
//! ├──────────────────────┬──────────────────────┤
//! │    string engine     │     list engine      │
//! ├──────────────────────┴──────────────────────┤
//! │    collision-chain iterator / hash+slot      │
//! ├─────────────────────────────────────────────┤
//! │    raw file primitives (seek, patch, sync)   │
//! ├─────────────────────────────────────────────┤
//! │    on-disk format (header, index, records)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! One process-local mutex serializes every operation on an instance, so
//! observable order is mutex-acquisition order. The file itself carries an
//! advisory exclusive lock: a second process fails at open. Each mutating
//! operation ends with an fsync (see [`SyncMode`]); a crash between write
//! and fsync may leave the file in the pre-call state, which the design
//! accepts.
//!
//! ## Module Organization
//!
//! - `format`: header, index, and record layouts (zerocopy structs)
//! - `hash`: FNV-1a-32 and home-slot location
//! - `raw`: seek-based read/write/patch primitives and the flock
//! - `chain`: collision-chain iteration
//! - `strings`: the string engine
//! - `lists`: the list engine

mod chain;
mod format;
mod hash;
mod lists;
mod raw;
mod strings;

pub use format::MAX_KEY_LEN;
pub use raw::SyncMode;

use std::path::{Path, PathBuf};

use bumpalo::Bump;
use eyre::Result;
use parking_lot::Mutex;

use crate::store::{check_key, Store};
use raw::{KeyBuf, RawFile};

/// Default index-region size in bytes (1024 slots).
pub const DEFAULT_ADDRESS_SPACE_SIZE: u32 = 4096;

/// Builder for configuring and opening a [`FileStore`].
pub struct FileStoreBuilder {
    path: Option<PathBuf>,
    address_space_size: u32,
    truncate: bool,
    sync_mode: SyncMode,
}

impl Default for FileStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStoreBuilder {
    pub fn new() -> Self {
        Self {
            path: None,
            address_space_size: DEFAULT_ADDRESS_SPACE_SIZE,
            truncate: false,
            sync_mode: SyncMode::default(),
        }
    }

    /// Path of the store file. Required.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Size of the index region in bytes. Must be a non-zero multiple of 4;
    /// the slot count is `address_space_size / 4`. Ignored when opening an
    /// existing file without `truncate` (the on-file geometry wins).
    pub fn address_space_size(mut self, bytes: u32) -> Self {
        self.address_space_size = bytes;
        self
    }

    /// Start from an empty store even if the file already has contents.
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn open(self) -> Result<FileStore> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| eyre::eyre!("store path not specified: call .path() first"))?;

        let raw = RawFile::open(path, self.address_space_size, self.truncate, self.sync_mode)?;

        Ok(FileStore {
            inner: Mutex::new(FileInner {
                raw,
                keybuf: [0u8; MAX_KEY_LEN],
            }),
        })
    }
}

struct FileInner {
    raw: RawFile,
    // Scratch for key decoding during chain walks; one per in-flight call,
    // and the mutex admits exactly one.
    keybuf: KeyBuf,
}

/// The single-file persistent backend.
///
/// All eight operations take the instance mutex for their full duration and
/// fsync on mutating exit. Values are returned in the caller's arena.
pub struct FileStore {
    inner: Mutex<FileInner>,
}

impl FileStore {
    pub fn builder() -> FileStoreBuilder {
        FileStoreBuilder::new()
    }

    /// Creates a fresh store at `path`, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder().path(path).truncate(true).open()
    }

    /// Opens an existing store (or creates an empty one) at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder().path(path).open()
    }

    /// Current size of the store file in bytes.
    pub fn file_size(&self) -> u64 {
        self.inner.lock().raw.file_len()
    }

    /// Size of the index region in bytes, as stored in the file header.
    pub fn address_space_size(&self) -> u32 {
        self.inner.lock().raw.index_size()
    }

    /// Number of live value-bearing records.
    pub fn ref_count(&self) -> u32 {
        self.inner.lock().raw.ref_count()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        strings::put(&mut inner.raw, &mut inner.keybuf, key, value)?;
        inner.raw.sync()
    }

    pub fn get<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        strings::get(&mut inner.raw, &mut inner.keybuf, arena, key)
    }

    pub fn remove(&self, key: &[u8]) -> Result<()> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        strings::remove(&mut inner.raw, &mut inner.keybuf, key)?;
        inner.raw.sync()
    }

    pub fn fetch_remove<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        let value = strings::fetch_remove(&mut inner.raw, &mut inner.keybuf, arena, key)?;
        inner.raw.sync()?;
        Ok(value)
    }

    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        lists::append(&mut inner.raw, &mut inner.keybuf, key, value)?;
        inner.raw.sync()
    }

    pub fn prepend(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        lists::prepend(&mut inner.raw, &mut inner.keybuf, key, value)?;
        inner.raw.sync()
    }

    /// Pops the most recently appended element (the list tail).
    pub fn pop<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        let value = lists::pop_tail(&mut inner.raw, &mut inner.keybuf, arena, key)?;
        inner.raw.sync()?;
        Ok(value)
    }

    /// Pops the first element (the list head).
    pub fn pop_first<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let inner = &mut *self.inner.lock();
        let value = lists::pop_head(&mut inner.raw, &mut inner.keybuf, arena, key)?;
        inner.raw.sync()?;
        Ok(value)
    }
}

impl Store for FileStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        FileStore::put(self, key, value)
    }

    fn get<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        FileStore::get(self, arena, key)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        FileStore::remove(self, key)
    }

    fn fetch_remove<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        FileStore::fetch_remove(self, arena, key)
    }

    fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        FileStore::append(self, key, value)
    }

    fn prepend(&self, key: &[u8], value: &[u8]) -> Result<()> {
        FileStore::prepend(self, key, value)
    }

    fn pop<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        FileStore::pop(self, arena, key)
    }

    fn pop_first<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        FileStore::pop_first(self, arena, key)
    }
}
