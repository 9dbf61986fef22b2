//! # List Engine
//!
//! Append, prepend, and both pops for list values. A list is a doubly
//! linked sequence of records expressed as file offsets: the head is
//! reachable from the index slot (or a collision chain), `list_next` walks
//! head-to-tail, `list_prev` walks back, and only the head stores the tail
//! offset in `list_end`.
//!
//! ## Head States
//!
//! ```text
//! list_end == own offset   singleton (head is also the tail)
//! list_end == other offset two or more elements
//! list_end == 0            emptied head: no elements, kept only so its
//!                          chain_next stays reachable
//! ```
//!
//! An emptied head carries no value and does not count toward the store's
//! ref count; it is reclaimed when the store empties and truncates.
//!
//! ## Cross-Kind Rules
//!
//! A list operation on a key currently holding a string (or an emptied
//! head) reinitializes the record as a fresh single-element list head at
//! end-of-file, preserving its chain link. Replacing a string keeps the ref
//! count unchanged; replacing an emptied head increments it.
//!
//! ## Ordering
//!
//! append+pop is LIFO, append+pop_first is FIFO, prepend+pop_first is
//! LIFO, prepend+pop is FIFO. These pairings are contract, not accident.

use bumpalo::Bump;
use eyre::{ensure, Result};

use super::chain::{find_key, reroute, ChainHit};
use super::format::{value_band, RecordHeader, RecordKind, NIL};
use super::hash::slot_offset;
use super::raw::{FieldUpdate, KeyBuf, RawFile, RecordPatch};

/// Number of elements in the list rooted at `head_off`, by walking
/// `list_next` until the head's recorded tail.
pub(super) fn count_elements(
    raw: &mut RawFile,
    head_off: u32,
    head: &RecordHeader,
) -> Result<u32> {
    if head.list_end() == NIL {
        return Ok(0);
    }
    let mut count = 1u32;
    let mut offset = head_off;
    let mut header = *head;
    while offset != head.list_end() {
        let next = header.list_next();
        ensure!(
            next != NIL,
            "corrupted store: list at {} ends before its recorded tail {}",
            head_off,
            head.list_end()
        );
        offset = next;
        header = raw.expect_record(offset)?;
        count += 1;
    }
    Ok(count)
}

/// New singleton head at end-of-file: its `list_end` is its own offset.
fn append_head_record(raw: &mut RawFile, key: &[u8], value: &[u8], chain_next: u32) -> Result<u32> {
    let offset = raw.file_len();
    ensure!(
        offset <= u32::MAX as u64,
        "store file full: cannot address a record at {}",
        offset
    );
    let header = RecordHeader::new(
        RecordKind::List,
        chain_next,
        NIL,
        NIL,
        offset as u32,
        key.len() as u16,
        value.len() as u32,
        key.len() as u16,
        value_band(value.len() as u32),
    );
    raw.append_record(&header, key, value)
}

/// New tail node at end-of-file, linked back to the old tail.
fn append_tail_record(raw: &mut RawFile, key: &[u8], value: &[u8], list_prev: u32) -> Result<u32> {
    let header = RecordHeader::new(
        RecordKind::List,
        NIL,
        NIL,
        list_prev,
        NIL,
        key.len() as u16,
        value.len() as u32,
        key.len() as u16,
        value_band(value.len() as u32),
    );
    raw.append_record(&header, key, value)
}

/// New head at end-of-file in front of an existing head. Takes over the
/// old head's chain link and tail pointer.
fn prepend_head_record(
    raw: &mut RawFile,
    key: &[u8],
    value: &[u8],
    chain_next: u32,
    old_head: u32,
    list_end: u32,
) -> Result<u32> {
    let header = RecordHeader::new(
        RecordKind::List,
        chain_next,
        old_head,
        NIL,
        list_end,
        key.len() as u16,
        value.len() as u32,
        key.len() as u16,
        value_band(value.len() as u32),
    );
    raw.append_record(&header, key, value)
}

/// Replaces a string record or an emptied head with a fresh singleton
/// list head, keeping the chain link. Returns whether the replaced record
/// was value-bearing (a string).
fn reinit_as_head(
    raw: &mut RawFile,
    slot_off: u64,
    offset: u32,
    header: &RecordHeader,
    prev: Option<u32>,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    let was_string = header.kind()? == RecordKind::String;
    let new_off = append_head_record(raw, key, value, header.chain_next())?;
    reroute(raw, slot_off, prev, new_off)?;
    if !was_string {
        // An emptied head carried no value; the new singleton adds one.
        raw.inc_ref_count()?;
    }
    Ok(())
}

pub fn append(raw: &mut RawFile, keybuf: &mut KeyBuf, key: &[u8], value: &[u8]) -> Result<()> {
    let slot_off = slot_offset(key, raw.slot_count());

    let head = match raw.read_slot(slot_off)? {
        None => {
            let offset = append_head_record(raw, key, value, NIL)?;
            raw.write_slot(slot_off, offset)?;
            return raw.inc_ref_count();
        }
        Some(head) => head,
    };

    match find_key(raw, head, key, keybuf)? {
        ChainHit::Found {
            offset,
            header,
            prev,
        } => {
            if header.kind()? == RecordKind::List && header.list_end() != NIL {
                let old_tail = header.list_end();
                let new_off = append_tail_record(raw, key, value, old_tail)?;
                raw.patch_record(
                    old_tail,
                    &RecordPatch {
                        list_next: FieldUpdate::Set(new_off),
                        ..Default::default()
                    },
                )?;
                raw.patch_record(
                    offset,
                    &RecordPatch {
                        list_end: FieldUpdate::Set(new_off),
                        ..Default::default()
                    },
                )?;
                raw.inc_ref_count()
            } else {
                reinit_as_head(raw, slot_off, offset, &header, prev, key, value)
            }
        }
        ChainHit::Missing { tail } => {
            let new_off = append_head_record(raw, key, value, NIL)?;
            raw.patch_record(
                tail,
                &RecordPatch {
                    chain_next: FieldUpdate::Set(new_off),
                    ..Default::default()
                },
            )?;
            raw.inc_ref_count()
        }
    }
}

pub fn prepend(raw: &mut RawFile, keybuf: &mut KeyBuf, key: &[u8], value: &[u8]) -> Result<()> {
    let slot_off = slot_offset(key, raw.slot_count());

    let head = match raw.read_slot(slot_off)? {
        None => {
            let offset = append_head_record(raw, key, value, NIL)?;
            raw.write_slot(slot_off, offset)?;
            return raw.inc_ref_count();
        }
        Some(head) => head,
    };

    match find_key(raw, head, key, keybuf)? {
        ChainHit::Found {
            offset,
            header,
            prev,
        } => {
            if header.kind()? == RecordKind::List && header.list_end() != NIL {
                let new_off = prepend_head_record(
                    raw,
                    key,
                    value,
                    header.chain_next(),
                    offset,
                    header.list_end(),
                )?;
                // The old head becomes an interior node: it loses its tail
                // pointer and its chain link, and gains a predecessor.
                raw.patch_record(
                    offset,
                    &RecordPatch {
                        chain_next: FieldUpdate::Clear,
                        list_prev: FieldUpdate::Set(new_off),
                        list_end: FieldUpdate::Clear,
                        ..Default::default()
                    },
                )?;
                reroute(raw, slot_off, prev, new_off)?;
                raw.inc_ref_count()
            } else {
                reinit_as_head(raw, slot_off, offset, &header, prev, key, value)
            }
        }
        ChainHit::Missing { tail } => {
            let new_off = append_head_record(raw, key, value, NIL)?;
            raw.patch_record(
                tail,
                &RecordPatch {
                    chain_next: FieldUpdate::Set(new_off),
                    ..Default::default()
                },
            )?;
            raw.inc_ref_count()
        }
    }
}

/// Pops the element most recently appended (the tail).
pub fn pop_tail<'a>(
    raw: &mut RawFile,
    keybuf: &mut KeyBuf,
    arena: &'a Bump,
    key: &[u8],
) -> Result<Option<&'a [u8]>> {
    let slot_off = slot_offset(key, raw.slot_count());
    let head = match raw.read_slot(slot_off)? {
        None => return Ok(None),
        Some(head) => head,
    };

    let (head_off, header) = match find_key(raw, head, key, keybuf)? {
        ChainHit::Found { offset, header, .. } => (offset, header),
        ChainHit::Missing { .. } => return Ok(None),
    };

    if header.kind()? != RecordKind::List || header.list_end() == NIL {
        return Ok(None);
    }

    let tail_off = header.list_end();
    if tail_off == head_off {
        // Sole element: the head stays behind, emptied, so any chain link
        // through it survives.
        let value = raw.read_value(head_off, &header, arena)?;
        raw.patch_record(
            head_off,
            &RecordPatch {
                list_end: FieldUpdate::Clear,
                ..Default::default()
            },
        )?;
        raw.dec_ref_count()?;
        return Ok(Some(value));
    }

    let tail = raw.expect_record(tail_off)?;
    let value = raw.read_value(tail_off, &tail, arena)?;
    let before = tail.list_prev();
    ensure!(
        before != NIL,
        "corrupted store: tail record at {} has no predecessor",
        tail_off
    );
    raw.patch_record(
        before,
        &RecordPatch {
            list_next: FieldUpdate::Clear,
            ..Default::default()
        },
    )?;
    raw.patch_record(
        head_off,
        &RecordPatch {
            list_end: FieldUpdate::Set(before),
            ..Default::default()
        },
    )?;
    raw.dec_ref_count()?;
    raw.truncate_record_at_eof(tail_off, &tail)?;
    Ok(Some(value))
}

/// Pops the first element (the head).
pub fn pop_head<'a>(
    raw: &mut RawFile,
    keybuf: &mut KeyBuf,
    arena: &'a Bump,
    key: &[u8],
) -> Result<Option<&'a [u8]>> {
    let slot_off = slot_offset(key, raw.slot_count());
    let head = match raw.read_slot(slot_off)? {
        None => return Ok(None),
        Some(head) => head,
    };

    let (head_off, header, prev) = match find_key(raw, head, key, keybuf)? {
        ChainHit::Found {
            offset,
            header,
            prev,
        } => (offset, header, prev),
        ChainHit::Missing { .. } => return Ok(None),
    };

    if header.kind()? != RecordKind::List || header.list_end() == NIL {
        return Ok(None);
    }

    let value = raw.read_value(head_off, &header, arena)?;

    let successor = header.list_next();
    if successor != NIL {
        // Promote the successor: it takes over the tail pointer and the
        // chain link, and the slot (or chain predecessor) points at it.
        raw.patch_record(
            successor,
            &RecordPatch {
                chain_next: FieldUpdate::pointer(header.chain_next()),
                list_prev: FieldUpdate::Clear,
                list_end: FieldUpdate::Set(header.list_end()),
                ..Default::default()
            },
        )?;
        reroute(raw, slot_off, prev, successor)?;
    } else {
        // Sole element: unlink the record entirely.
        reroute(raw, slot_off, prev, header.chain_next())?;
    }

    raw.dec_ref_count()?;
    raw.truncate_record_at_eof(head_off, &header)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::format::MAX_KEY_LEN;
    use crate::file::raw::SyncMode;
    use crate::file::strings;
    use tempfile::tempdir;

    struct Harness {
        raw: RawFile,
        keybuf: KeyBuf,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(index_size: u32) -> Self {
            let dir = tempdir().unwrap();
            let raw = RawFile::open(&dir.path().join("s.db"), index_size, true, SyncMode::Off)
                .unwrap();
            Self {
                raw,
                keybuf: [0u8; MAX_KEY_LEN],
                _dir: dir,
            }
        }

        fn append(&mut self, key: &[u8], value: &[u8]) {
            append(&mut self.raw, &mut self.keybuf, key, value).unwrap();
        }

        fn prepend(&mut self, key: &[u8], value: &[u8]) {
            prepend(&mut self.raw, &mut self.keybuf, key, value).unwrap();
        }

        fn pop_tail(&mut self, key: &[u8]) -> Option<Vec<u8>> {
            let arena = Bump::new();
            pop_tail(&mut self.raw, &mut self.keybuf, &arena, key)
                .unwrap()
                .map(|v| v.to_vec())
        }

        fn pop_head(&mut self, key: &[u8]) -> Option<Vec<u8>> {
            let arena = Bump::new();
            pop_head(&mut self.raw, &mut self.keybuf, &arena, key)
                .unwrap()
                .map(|v| v.to_vec())
        }
    }

    #[test]
    fn append_then_pop_head_is_fifo() {
        let mut h = Harness::new(64);

        h.append(b"a", b"x");
        h.append(b"a", b"y");
        h.append(b"a", b"z");
        assert_eq!(h.raw.ref_count(), 3);

        assert_eq!(h.pop_head(b"a").as_deref(), Some(&b"x"[..]));
        assert_eq!(h.pop_head(b"a").as_deref(), Some(&b"y"[..]));
        assert_eq!(h.pop_head(b"a").as_deref(), Some(&b"z"[..]));
        assert_eq!(h.pop_head(b"a"), None);
    }

    #[test]
    fn append_then_pop_tail_is_lifo() {
        let mut h = Harness::new(64);

        h.append(b"a", b"x");
        h.append(b"a", b"y");
        h.append(b"a", b"z");

        assert_eq!(h.pop_tail(b"a").as_deref(), Some(&b"z"[..]));
        assert_eq!(h.pop_tail(b"a").as_deref(), Some(&b"y"[..]));
        assert_eq!(h.pop_tail(b"a").as_deref(), Some(&b"x"[..]));
        assert_eq!(h.pop_tail(b"a"), None);
    }

    #[test]
    fn prepend_then_pop_head_is_lifo() {
        let mut h = Harness::new(64);

        h.prepend(b"L", b"A");
        h.prepend(b"L", b"B");
        h.prepend(b"L", b"C");

        assert_eq!(h.pop_head(b"L").as_deref(), Some(&b"C"[..]));
        assert_eq!(h.pop_head(b"L").as_deref(), Some(&b"B"[..]));
        assert_eq!(h.pop_head(b"L").as_deref(), Some(&b"A"[..]));
        assert_eq!(h.pop_head(b"L"), None);
    }

    #[test]
    fn prepend_then_pop_tail_is_fifo() {
        let mut h = Harness::new(64);

        h.prepend(b"L", b"A");
        h.prepend(b"L", b"B");
        h.prepend(b"L", b"C");

        assert_eq!(h.pop_tail(b"L").as_deref(), Some(&b"A"[..]));
        assert_eq!(h.pop_tail(b"L").as_deref(), Some(&b"B"[..]));
        assert_eq!(h.pop_tail(b"L").as_deref(), Some(&b"C"[..]));
        assert_eq!(h.pop_tail(b"L"), None);
    }

    #[test]
    fn draining_a_list_truncates_the_file() {
        let mut h = Harness::new(64);

        for i in 0..8u8 {
            h.append(b"k", &[i]);
        }
        assert_eq!(h.raw.ref_count(), 8);

        for _ in 0..8 {
            assert!(h.pop_head(b"k").is_some());
        }
        assert_eq!(h.raw.ref_count(), 0);
        assert_eq!(h.raw.file_len(), 8 + 64);
    }

    #[test]
    fn pop_tail_leaves_an_emptied_head_that_append_reuses() {
        let mut h = Harness::new(64);

        h.append(b"other", b"keepalive");
        h.append(b"k", b"v");
        assert_eq!(h.raw.ref_count(), 2);

        assert_eq!(h.pop_tail(b"k").as_deref(), Some(&b"v"[..]));
        assert_eq!(h.raw.ref_count(), 1);
        assert_eq!(h.pop_tail(b"k"), None);
        assert_eq!(h.pop_head(b"k"), None);

        h.append(b"k", b"w");
        assert_eq!(h.raw.ref_count(), 2);
        assert_eq!(h.pop_head(b"k").as_deref(), Some(&b"w"[..]));
    }

    #[test]
    fn append_on_string_key_becomes_a_fresh_list() {
        let mut h = Harness::new(64);

        strings::put(&mut h.raw, &mut h.keybuf, b"k", b"old-string").unwrap();
        assert_eq!(h.raw.ref_count(), 1);

        h.append(b"k", b"v");
        assert_eq!(h.raw.ref_count(), 1);

        let arena = Bump::new();
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"k").unwrap(),
            None
        );
        assert_eq!(h.pop_tail(b"k").as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn pop_on_string_key_is_none() {
        let mut h = Harness::new(64);

        strings::put(&mut h.raw, &mut h.keybuf, b"k", b"v").unwrap();

        assert_eq!(h.pop_tail(b"k"), None);
        assert_eq!(h.pop_head(b"k"), None);
        assert_eq!(h.raw.ref_count(), 1);
    }

    #[test]
    fn lists_and_strings_share_a_collision_chain() {
        // One slot: the string and the list head thread the same chain.
        let mut h = Harness::new(4);

        strings::put(&mut h.raw, &mut h.keybuf, b"foo", b"baz").unwrap();
        strings::put(&mut h.raw, &mut h.keybuf, b"bar", b"qux").unwrap();
        h.append(b"bar", b"quux");

        let arena = Bump::new();
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"foo").unwrap(),
            Some(&b"baz"[..])
        );
        assert_eq!(h.pop_tail(b"bar").as_deref(), Some(&b"quux"[..]));
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"foo").unwrap(),
            Some(&b"baz"[..])
        );
    }

    #[test]
    fn pop_head_preserves_collision_chain_of_promoted_head() {
        // One slot. The list head carries a live chain_next to "foo"; after
        // pop_head the promoted successor must still reach it.
        let mut h = Harness::new(4);

        h.append(b"bar", b"1");
        h.append(b"bar", b"2");
        strings::put(&mut h.raw, &mut h.keybuf, b"foo", b"keep").unwrap();

        assert_eq!(h.pop_head(b"bar").as_deref(), Some(&b"1"[..]));

        let arena = Bump::new();
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"foo").unwrap(),
            Some(&b"keep"[..])
        );
        assert_eq!(h.pop_head(b"bar").as_deref(), Some(&b"2"[..]));
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"foo").unwrap(),
            Some(&b"keep"[..])
        );
    }

    #[test]
    fn pop_head_on_singleton_with_chain_reroutes_past_it() {
        let mut h = Harness::new(4);

        h.append(b"bar", b"only");
        strings::put(&mut h.raw, &mut h.keybuf, b"foo", b"keep").unwrap();

        assert_eq!(h.pop_head(b"bar").as_deref(), Some(&b"only"[..]));

        let arena = Bump::new();
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"foo").unwrap(),
            Some(&b"keep"[..])
        );
        assert_eq!(h.pop_head(b"bar"), None);
    }

    #[test]
    fn put_string_over_list_drops_every_node() {
        let mut h = Harness::new(64);

        h.append(b"k", b"1");
        h.append(b"k", b"2");
        h.append(b"k", b"3");
        assert_eq!(h.raw.ref_count(), 3);

        strings::put(&mut h.raw, &mut h.keybuf, b"k", b"s").unwrap();
        assert_eq!(h.raw.ref_count(), 1);

        let arena = Bump::new();
        assert_eq!(
            strings::get(&mut h.raw, &mut h.keybuf, &arena, b"k").unwrap(),
            Some(&b"s"[..])
        );
        assert_eq!(h.pop_tail(b"k"), None);

        strings::remove(&mut h.raw, &mut h.keybuf, b"k").unwrap();
        assert_eq!(h.raw.ref_count(), 0);
        assert_eq!(h.raw.file_len(), 8 + 64);
    }

    #[test]
    fn count_elements_tracks_list_length() {
        let mut h = Harness::new(64);

        h.append(b"other", b"keepalive");
        h.append(b"k", b"1");
        h.append(b"k", b"2");
        h.prepend(b"k", b"0");

        let slot_off = slot_offset(b"k", h.raw.slot_count());
        let head_off = h.raw.read_slot(slot_off).unwrap().unwrap();
        let header = h.raw.expect_record(head_off).unwrap();
        assert_eq!(count_elements(&mut h.raw, head_off, &header).unwrap(), 3);

        h.pop_tail(b"k");
        h.pop_tail(b"k");
        h.pop_tail(b"k");
        let head_off = h.raw.read_slot(slot_off).unwrap().unwrap();
        let header = h.raw.expect_record(head_off).unwrap();
        assert_eq!(count_elements(&mut h.raw, head_off, &header).unwrap(), 0);
    }
}
