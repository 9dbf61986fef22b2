//! The backend contract.
//!
//! Both backends expose the same eight operations over two value kinds:
//! byte-strings (`put`/`get`/`remove`/`fetch_remove`) and ordered lists of
//! byte-strings (`append`/`prepend`/`pop`/`pop_first`). The two kinds share
//! one key namespace; the cross-kind rules (a string `get` on a list key is
//! `None`, a `put` replaces a whole list, a list push on a string key
//! restarts the key as a one-element list) are part of the contract and
//! hold identically on every backend.
//!
//! Operations returning value bytes write them into a caller-provided
//! `Bump` arena, so a store never owns returned buffers.

use bumpalo::Bump;
use eyre::{ensure, Result};

use crate::file::MAX_KEY_LEN;

/// Rejects over-long keys before any backend work happens.
pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    ensure!(
        key.len() <= MAX_KEY_LEN,
        "key length {} exceeds the {}-byte limit",
        key.len(),
        MAX_KEY_LEN
    );
    Ok(())
}

pub trait Store {
    /// Stores a string value, overwriting whatever the key held.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Reads a string value. `None` for absent keys and for keys holding
    /// a list.
    fn get<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>>;

    /// Deletes the key and whatever it holds (string or entire list).
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// [`get`](Store::get) followed by [`remove`](Store::remove) under one
    /// lock acquisition.
    fn fetch_remove<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>>;

    /// Pushes a value onto the tail of the key's list.
    fn append(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Pushes a value onto the head of the key's list.
    fn prepend(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Pops from the tail. With `append`, LIFO.
    fn pop<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>>;

    /// Pops from the head. With `append`, FIFO.
    fn pop_first<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>>;
}
