//! Differential fuzzing of the file backend against the in-memory oracle.
//!
//! Every operation runs on both backends and the results must match; at the
//! end the remaining lists are drained and compared, and an emptied store
//! must have collapsed to header + index.

#![no_main]

use arbitrary::Arbitrary;
use bumpalo::Bump;
use libfuzzer_sys::fuzz_target;

use magpiekv::{FileStore, MemoryStore, Store, SyncMode};

#[derive(Debug, Arbitrary)]
struct Input {
    slots: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Put { key: u8, value: Vec<u8> },
    Get { key: u8 },
    Remove { key: u8 },
    FetchRemove { key: u8 },
    Append { key: u8, value: Vec<u8> },
    Prepend { key: u8, value: Vec<u8> },
    Pop { key: u8 },
    PopFirst { key: u8 },
}

fn key_bytes(key: u8) -> Vec<u8> {
    format!("key-{}", key % 8).into_bytes()
}

fuzz_target!(|input: Input| {
    if input.ops.len() > 512 {
        return;
    }

    let index_size = (input.slots as u32 % 16 + 1) * 4;
    let dir = tempfile::tempdir().unwrap();
    let file = FileStore::builder()
        .path(dir.path().join("fuzz.db"))
        .address_space_size(index_size)
        .truncate(true)
        .sync_mode(SyncMode::Off)
        .open()
        .unwrap();
    let oracle = MemoryStore::new();

    for op in &input.ops {
        let arena = Bump::new();
        match op {
            Op::Put { key, value } => {
                let key = key_bytes(*key);
                file.put(&key, value).unwrap();
                oracle.put(&key, value).unwrap();
            }
            Op::Get { key } => {
                let key = key_bytes(*key);
                assert_eq!(
                    file.get(&arena, &key).unwrap(),
                    oracle.get(&arena, &key).unwrap()
                );
            }
            Op::Remove { key } => {
                let key = key_bytes(*key);
                file.remove(&key).unwrap();
                oracle.remove(&key).unwrap();
            }
            Op::FetchRemove { key } => {
                let key = key_bytes(*key);
                assert_eq!(
                    file.fetch_remove(&arena, &key).unwrap(),
                    oracle.fetch_remove(&arena, &key).unwrap()
                );
            }
            Op::Append { key, value } => {
                let key = key_bytes(*key);
                file.append(&key, value).unwrap();
                oracle.append(&key, value).unwrap();
            }
            Op::Prepend { key, value } => {
                let key = key_bytes(*key);
                file.prepend(&key, value).unwrap();
                oracle.prepend(&key, value).unwrap();
            }
            Op::Pop { key } => {
                let key = key_bytes(*key);
                assert_eq!(
                    file.pop(&arena, &key).unwrap(),
                    oracle.pop(&arena, &key).unwrap()
                );
            }
            Op::PopFirst { key } => {
                let key = key_bytes(*key);
                assert_eq!(
                    file.pop_first(&arena, &key).unwrap(),
                    oracle.pop_first(&arena, &key).unwrap()
                );
            }
        }
    }

    for key in 0..8u8 {
        let arena = Bump::new();
        let key = key_bytes(key);
        assert_eq!(
            file.get(&arena, &key).unwrap(),
            oracle.get(&arena, &key).unwrap()
        );
        loop {
            let got = file.pop_first(&arena, &key).unwrap();
            assert_eq!(got, oracle.pop_first(&arena, &key).unwrap());
            if got.is_none() {
                break;
            }
        }
        file.remove(&key).unwrap();
        oracle.remove(&key).unwrap();
    }

    assert_eq!(file.ref_count(), 0);
    assert_eq!(file.file_size(), 8 + index_size as u64);
});
