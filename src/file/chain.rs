//! Collision-chain traversal.
//!
//! Records whose keys hash to the same slot are threaded through their
//! `chain_next` pointers. The iterator reads each record's header and
//! decodes its key into the caller-owned scratch buffer; every step is one
//! seek + read. Iterators are not restartable and must not outlive any
//! mutation of the file (the store mutex guarantees this).

use eyre::Result;

use super::format::{RecordHeader, NIL};
use super::raw::{FieldUpdate, KeyBuf, RawFile, RecordPatch};

pub struct ChainIter {
    next: u32,
}

pub struct ChainEntry {
    pub offset: u32,
    pub header: RecordHeader,
    pub key_len: usize,
}

impl ChainIter {
    pub fn new(head: u32) -> Self {
        Self { next: head }
    }

    /// Advances one link. The yielded record's key occupies
    /// `keybuf[..key_len]` until the next call.
    pub fn next(&mut self, raw: &mut RawFile, keybuf: &mut KeyBuf) -> Result<Option<ChainEntry>> {
        if self.next == NIL {
            return Ok(None);
        }
        let offset = self.next;
        let header = raw.expect_record(offset)?;
        let key_len = raw.read_key(offset, &header, keybuf)?;
        self.next = header.chain_next();
        Ok(Some(ChainEntry {
            offset,
            header,
            key_len,
        }))
    }
}

/// Result of searching a chain for one key.
pub enum ChainHit {
    /// The key's record, plus the offset of the chain record pointing at it
    /// (`None` when the slot itself points at it).
    Found {
        offset: u32,
        header: RecordHeader,
        prev: Option<u32>,
    },
    /// No record carries the key; `tail` is the last chain record, the one
    /// a new record gets linked behind.
    Missing { tail: u32 },
}

/// Repoints whatever references a chain record: the predecessor's
/// `chain_next` when there is one, the index slot otherwise. A `NIL`
/// target unlinks.
pub fn reroute(
    raw: &mut RawFile,
    slot_off: u64,
    prev: Option<u32>,
    target: u32,
) -> Result<()> {
    match prev {
        Some(prev_off) => raw.patch_record(
            prev_off,
            &RecordPatch {
                chain_next: FieldUpdate::pointer(target),
                ..Default::default()
            },
        ),
        None => raw.write_slot(slot_off, target),
    }
}

/// Walks the chain rooted at `head` comparing keys.
pub fn find_key(
    raw: &mut RawFile,
    head: u32,
    key: &[u8],
    keybuf: &mut KeyBuf,
) -> Result<ChainHit> {
    let mut iter = ChainIter::new(head);
    let mut prev = None;
    let mut last = head;

    while let Some(entry) = iter.next(raw, keybuf)? {
        if &keybuf[..entry.key_len] == key {
            return Ok(ChainHit::Found {
                offset: entry.offset,
                header: entry.header,
                prev,
            });
        }
        prev = Some(entry.offset);
        last = entry.offset;
    }

    Ok(ChainHit::Missing { tail: last })
}
