//! # In-Memory Backend
//!
//! A mutex-guarded hash map of strings and deques. Functionally equivalent
//! to the file backend minus persistence, including the cross-kind
//! transition rules, which makes it the oracle for the randomized
//! differential suite.

use std::collections::VecDeque;

use bumpalo::Bump;
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::store::{check_key, Store};

#[derive(Debug)]
enum Entry {
    Str(Box<[u8]>),
    List(VecDeque<Box<[u8]>>),
}

/// The trivial backend: everything lives in one map behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<Box<[u8]>, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: &[u8], value: &[u8], front: bool) -> Result<()> {
        check_key(key)?;
        let mut map = self.map.lock();
        match map.get_mut(key) {
            Some(Entry::List(list)) if !list.is_empty() => {
                if front {
                    list.push_front(value.into());
                } else {
                    list.push_back(value.into());
                }
            }
            // Absent key, string, or emptied list: the key restarts as a
            // one-element list, matching the file backend's reinit rule.
            _ => {
                map.insert(key.into(), Entry::List(VecDeque::from([value.into()])));
            }
        }
        Ok(())
    }

    fn pop_end<'a>(&self, arena: &'a Bump, key: &[u8], front: bool) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let mut map = self.map.lock();
        let Some(Entry::List(list)) = map.get_mut(key) else {
            return Ok(None);
        };
        let value = if front {
            list.pop_front()
        } else {
            list.pop_back()
        };
        Ok(value.map(|v| &*arena.alloc_slice_copy(&v)))
    }
}

impl Store for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.map.lock().insert(key.into(), Entry::Str(value.into()));
        Ok(())
    }

    fn get<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let map = self.map.lock();
        Ok(match map.get(key) {
            Some(Entry::Str(value)) => Some(&*arena.alloc_slice_copy(value)),
            _ => None,
        })
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        check_key(key)?;
        self.map.lock().remove(key);
        Ok(())
    }

    fn fetch_remove<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        check_key(key)?;
        let mut map = self.map.lock();
        Ok(match map.remove(key) {
            Some(Entry::Str(value)) => Some(&*arena.alloc_slice_copy(&value)),
            _ => None,
        })
    }

    fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.push(key, value, false)
    }

    fn prepend(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.push(key, value, true)
    }

    fn pop<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        self.pop_end(arena, key, false)
    }

    fn pop_first<'a>(&self, arena: &'a Bump, key: &[u8]) -> Result<Option<&'a [u8]>> {
        self.pop_end(arena, key, true)
    }
}
