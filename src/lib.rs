//! # MagpieKV - Embeddable Key-Value Store
//!
//! MagpieKV stores two value kinds (byte-strings and ordered lists of
//! byte-strings) behind one backend contract, with a single-file
//! persistent backend as its core: a self-contained on-disk hash table
//! with O(1) expected operations, in-place updates through size banding,
//! and reference-counted truncation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bumpalo::Bump;
//! use magpiekv::{FileStore, Store};
//!
//! let store = FileStore::builder()
//!     .path("./magpie.db")
//!     .address_space_size(4096)
//!     .open()?;
//!
//! store.put(b"greeting", b"hello")?;
//! store.append(b"queue", b"first")?;
//! store.append(b"queue", b"second")?;
//!
//! let arena = Bump::new();
//! assert_eq!(store.get(&arena, b"greeting")?, Some(&b"hello"[..]));
//! assert_eq!(store.pop_first(&arena, b"queue")?, Some(&b"first"[..]));
//! ```
//!
//! ## Backends
//!
//! - [`FileStore`]: the persistent core. One file, one advisory exclusive
//!   lock, one process-local mutex, fsync after every mutation.
//! - [`MemoryStore`]: a trivial map-backed store with identical semantics,
//!   used as the oracle in the randomized differential tests.
//!
//! ## File Format
//!
//! ```text
//! offset 0:               header: u32 index_size, u32 ref_count
//! offset 8:               index region (u32 slot pointers, 0 = empty)
//! offset 8 + index_size:  record heap
//! ```
//!
//! Records are a fixed 29-byte address (kind tag, collision-chain link,
//! doubly-linked list pointers, lengths and capacities) followed by key and
//! value payload with zeroed slack. Strings and list nodes share the one
//! record layout; colliding keys thread their head records through a
//! per-slot chain. All integers are little-endian; a pointer value of 0
//! means "none". The hash is FNV-1a-32 and is part of the format contract.
//!
//! ## Concurrency Model
//!
//! Every operation holds the instance mutex for its full duration;
//! operations are linearizable in mutex-acquisition order. The file lock
//! rejects cross-process sharing at open. There is no journaling: a crash
//! between a write and its fsync may lose that operation, never the fsync'd
//! prefix.

pub mod file;
pub mod memory;
mod store;

pub use file::{FileStore, FileStoreBuilder, SyncMode, DEFAULT_ADDRESS_SPACE_SIZE, MAX_KEY_LEN};
pub use memory::MemoryStore;
pub use store::Store;
