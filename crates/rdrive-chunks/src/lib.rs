//! rdrive-chunks: content-defined chunking and chunk-identity hashing.
//!
//! - `cdc`: deterministic rolling-hash chunker
//! - `blake3`: chunk-identity hashing, distinct from the drive's SHA-1 dedup hash

pub mod blake3;
pub mod cdc;

pub use blake3::{hash_bytes, hash_file, hash_from_hex, hash_to_hex, Hash};
pub use cdc::{ChunkerParams, Chunker};
