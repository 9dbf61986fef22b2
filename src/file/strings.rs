//! # String Engine
//!
//! Put, get, remove, and fetch-remove for byte-string values. All functions
//! run under the store mutex; the public wrapper issues the trailing fsync.
//!
//! ## Update Strategy
//!
//! A put on an existing string rewrites the record in place when the
//! reserved capacities accommodate the new content (`key_len <= max_key_len
//! && value_len <= max_value_len`). Otherwise the record is re-homed: a
//! fresh record is written at end-of-file carrying the old record's
//! `chain_next`, and the slot or chain predecessor is repointed. Neither
//! path changes the ref count: one value-bearing record replaces another.
//!
//! ## Cross-Kind Rules
//!
//! The string contract is strict about lists sharing the namespace:
//! `get` on a key holding a list returns `None`; `put` on such a key
//! replaces the entire list with the new string (every node is
//! deallocated); `remove` deletes whatever the key holds.

use bumpalo::Bump;
use eyre::Result;

use super::chain::{find_key, reroute, ChainHit};
use super::format::{value_band, RecordHeader, RecordKind, NIL};
use super::hash::slot_offset;
use super::lists::count_elements;
use super::raw::{FieldUpdate, KeyBuf, RawFile, RecordPatch};

/// Writes a fresh string record at end-of-file.
fn append_string_record(
    raw: &mut RawFile,
    key: &[u8],
    value: &[u8],
    chain_next: u32,
) -> Result<u32> {
    let header = RecordHeader::new(
        RecordKind::String,
        chain_next,
        NIL,
        NIL,
        NIL,
        key.len() as u16,
        value.len() as u32,
        key.len() as u16,
        value_band(value.len() as u32),
    );
    raw.append_record(&header, key, value)
}

pub fn put(raw: &mut RawFile, keybuf: &mut KeyBuf, key: &[u8], value: &[u8]) -> Result<()> {
    let slot_off = slot_offset(key, raw.slot_count());

    let head = match raw.read_slot(slot_off)? {
        None => {
            let offset = append_string_record(raw, key, value, NIL)?;
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
        } => match header.kind()? {
            RecordKind::String => {
                if key.len() <= header.max_key_len()
                    && value.len() <= header.max_value_len() as usize
                {
                    let mut updated = header;
                    updated.set_lengths(key.len() as u16, value.len() as u32);
                    raw.rewrite_record(offset, &updated, key, value)
                } else {
                    let new_off = append_string_record(raw, key, value, header.chain_next())?;
                    reroute(raw, slot_off, prev, new_off)
                }
            }
            RecordKind::List => {
                // The string takes over the key: the whole list goes. The
                // replacement inherits the head's chain position.
                let elements = count_elements(raw, offset, &header)?;
                let new_off = append_string_record(raw, key, value, header.chain_next())?;
                reroute(raw, slot_off, prev, new_off)?;
                if elements == 0 {
                    raw.inc_ref_count()
                } else {
                    for _ in 1..elements {
                        raw.dec_ref_count()?;
                    }
                    Ok(())
                }
            }
        },
        ChainHit::Missing { tail } => {
            let new_off = append_string_record(raw, key, value, NIL)?;
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

pub fn get<'a>(
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

    match find_key(raw, head, key, keybuf)? {
        ChainHit::Found { offset, header, .. } => match header.kind()? {
            RecordKind::String => Ok(Some(raw.read_value(offset, &header, arena)?)),
            RecordKind::List => Ok(None),
        },
        ChainHit::Missing { .. } => Ok(None),
    }
}

pub fn remove(raw: &mut RawFile, keybuf: &mut KeyBuf, key: &[u8]) -> Result<()> {
    let slot_off = slot_offset(key, raw.slot_count());
    let head = match raw.read_slot(slot_off)? {
        None => return Ok(()),
        Some(head) => head,
    };

    match find_key(raw, head, key, keybuf)? {
        ChainHit::Found {
            offset,
            header,
            prev,
        } => match header.kind()? {
            RecordKind::String => {
                reroute(raw, slot_off, prev, header.chain_next())?;
                raw.dec_ref_count()?;
                raw.truncate_record_at_eof(offset, &header)?;
                Ok(())
            }
            RecordKind::List => {
                let elements = count_elements(raw, offset, &header)?;
                reroute(raw, slot_off, prev, header.chain_next())?;
                for _ in 0..elements {
                    raw.dec_ref_count()?;
                }
                Ok(())
            }
        },
        ChainHit::Missing { .. } => Ok(()),
    }
}

pub fn fetch_remove<'a>(
    raw: &mut RawFile,
    keybuf: &mut KeyBuf,
    arena: &'a Bump,
    key: &[u8],
) -> Result<Option<&'a [u8]>> {
    let value = get(raw, keybuf, arena, key)?;
    remove(raw, keybuf, key)?;
    Ok(value)
}
