//! # On-Disk Format Definitions
//!
//! This module defines the binary layout of a MagpieKV store file. The file
//! is a self-contained on-disk hash table: a fixed header, a dense index of
//! slot pointers, and a heap of variable-length records.
//!
//! ## File Layout
//!
//! ```text
//! offset 0:                 header (8 bytes)
//!                             u32 index_size     total bytes of the index
//!                             u32 ref_count      live value-bearing records
//! offset 8:                 index region (index_size bytes, u32[] slots)
//! offset 8 + index_size:    record heap (variable-length records)
//! ```
//!
//! Each index slot is either 0 (empty) or the absolute file offset of the
//! first record in that slot's collision chain.
//!
//! ## Record Layout
//!
//! Every record starts with a fixed 29-byte header followed by
//! `max_key_len + max_value_len` payload bytes:
//!
//! ```text
//! Offset  Size  Field          Description
//! 0       1     kind           0 = string, 1 = list node
//! 1       4     chain_next     next record in collision chain, 0 = end
//! 5       4     list_next      list successor (tail side), 0 = none
//! 9       4     list_prev      list predecessor (head side), 0 = none
//! 13      4     list_end       head only: offset of tail record, 0 = empty
//! 17      2     key_len        live key length
//! 19      4     value_len      live value length
//! 23      2     max_key_len    reserved key capacity
//! 25      4     max_value_len  reserved value capacity
//! 29      ...   key bytes, then value bytes, then zero slack
//! ```
//!
//! The field offsets are part of the format contract: in-place updates seek
//! to a field's byte position and rewrite only those bytes.
//!
//! ## Optional Pointers
//!
//! A pointer value of 0 means "none". This is sound because offsets below
//! `FILE_HEADER_SIZE` land inside the header and can never address a record.
//!
//! ## Size Banding
//!
//! New records reserve `value_band(value_len)` bytes of value capacity so
//! later rewrites of the same key can happen in place without growing the
//! file. Keys are not banded: `max_key_len` equals the key length at record
//! creation, so a longer key always forces a relocation.
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian, handled by the zerocopy
//! `U16<LittleEndian>` / `U32<LittleEndian>` field types. The format is not
//! portable to big-endian readers by design.

use eyre::{bail, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const FILE_HEADER_SIZE: usize = 8;
pub const RECORD_HEADER_SIZE: usize = 29;
pub const SLOT_SIZE: usize = 4;

/// Hard upper bound on key length; longer keys are rejected at the API.
pub const MAX_KEY_LEN: usize = 1024;

/// "No record" sentinel for the four linkage pointers and index slots.
pub const NIL: u32 = 0;

/// Value capacity classes for new records. Values larger than the last band
/// are stored exactly sized.
pub const VALUE_BANDS: [u32; 5] = [256, 512, 1024, 4096, 8192];

/// Smallest band that fits `len`, or `len` itself beyond the largest band.
pub fn value_band(len: u32) -> u32 {
    for band in VALUE_BANDS {
        if len <= band {
            return band;
        }
    }
    len
}

/// Value kind stored in a record's `kind` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    String = 0,
    List = 1,
}

impl RecordKind {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(RecordKind::String),
            1 => Ok(RecordKind::List),
            other => bail!("corrupted record: unknown kind tag {}", other),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    index_size: U32,
    ref_count: U32,
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new(index_size: u32) -> Self {
        Self {
            index_size: U32::new(index_size),
            ref_count: U32::new(0),
        }
    }

    pub fn index_size(&self) -> u32 {
        self.index_size.get()
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    pub fn set_ref_count(&mut self, count: u32) {
        self.ref_count = U32::new(count);
    }

    pub fn slot_count(&self) -> u32 {
        self.index_size.get() / SLOT_SIZE as u32
    }

    /// First byte past the index region; records start here.
    pub fn heap_start(&self) -> u64 {
        FILE_HEADER_SIZE as u64 + self.index_size.get() as u64
    }
}

// Byte positions of the patchable fields inside a record header.
pub const KIND_POS: u64 = 0;
pub const CHAIN_NEXT_POS: u64 = 1;
pub const LIST_NEXT_POS: u64 = 5;
pub const LIST_PREV_POS: u64 = 9;
pub const LIST_END_POS: u64 = 13;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordHeader {
    kind: u8,
    chain_next: U32,
    list_next: U32,
    list_prev: U32,
    list_end: U32,
    key_len: U16,
    value_len: U32,
    max_key_len: U16,
    max_value_len: U32,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

impl RecordHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: RecordKind,
        chain_next: u32,
        list_next: u32,
        list_prev: u32,
        list_end: u32,
        key_len: u16,
        value_len: u32,
        max_key_len: u16,
        max_value_len: u32,
    ) -> Self {
        Self {
            kind: kind as u8,
            chain_next: U32::new(chain_next),
            list_next: U32::new(list_next),
            list_prev: U32::new(list_prev),
            list_end: U32::new(list_end),
            key_len: U16::new(key_len),
            value_len: U32::new(value_len),
            max_key_len: U16::new(max_key_len),
            max_value_len: U32::new(max_value_len),
        }
    }

    /// A header whose 29 bytes are all zero marks a dead region, not a
    /// record (zero is not a valid offset and kind 0 with zero lengths is
    /// never written).
    pub fn is_empty(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    pub fn kind(&self) -> Result<RecordKind> {
        RecordKind::from_byte(self.kind)
    }

    pub fn chain_next(&self) -> u32 {
        self.chain_next.get()
    }

    pub fn list_next(&self) -> u32 {
        self.list_next.get()
    }

    pub fn list_prev(&self) -> u32 {
        self.list_prev.get()
    }

    pub fn list_end(&self) -> u32 {
        self.list_end.get()
    }

    pub fn key_len(&self) -> usize {
        self.key_len.get() as usize
    }

    pub fn value_len(&self) -> u32 {
        self.value_len.get()
    }

    pub fn max_key_len(&self) -> usize {
        self.max_key_len.get() as usize
    }

    pub fn max_value_len(&self) -> u32 {
        self.max_value_len.get()
    }

    pub fn set_lengths(&mut self, key_len: u16, value_len: u32) {
        self.key_len = U16::new(key_len);
        self.value_len = U32::new(value_len);
    }

    /// Total bytes the record occupies on disk, slack included.
    pub fn total_size(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.max_key_len() as u64 + self.max_value_len() as u64
    }

    pub fn key_pos(&self, record_off: u32) -> u64 {
        record_off as u64 + RECORD_HEADER_SIZE as u64
    }

    pub fn value_pos(&self, record_off: u32) -> u64 {
        record_off as u64 + RECORD_HEADER_SIZE as u64 + self.max_key_len() as u64
    }
}
