//! Content-defined chunking via a BuzHash-style rolling hash.
//!
//! Deliberately hand-rolled rather than wrapping the `fastcdc` crate: that
//! crate's v2020 algorithm doesn't expose the specific 256-entry-table /
//! window / pre-shifted-eviction construction this component needs. This
//! targets exact determinism across platforms and runs, not compatibility
//! with any existing chunker's boundaries.
//!
//! The hash is a sliding-window BuzHash: each incoming byte rotates the
//! running hash left by one bit and XORs in a pseudo-random table entry;
//! once the window is full, the byte falling off the back is cancelled out
//! using a pre-rotated copy of its table entry (`GEAR[b].rotate_left(window)`),
//! which is what makes it a fixed-window rolling hash rather than an
//! unbounded gear hash. The table is generated from a literal seed, not a
//! runtime RNG, so two runs on two machines produce identical boundaries.

use std::collections::VecDeque;
use std::io::{Read, Result as IoResult, Seek, SeekFrom};

const TABLE_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// A deterministic 256-entry pseudo-random table, derived from `TABLE_SEED`.
fn gear_table() -> [u64; 256] {
    let mut state = TABLE_SEED;
    let mut table = [0u64; 256];
    for slot in &mut table {
        *slot = splitmix64(&mut state);
    }
    table
}

/// Chunker parameters. `avg_size` must be a power of two (caller contract):
/// `mask_bits = avg_size.trailing_zeros()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerParams {
    pub window: usize,
    pub min_size: usize,
    pub avg_size: usize,
    pub max_size: usize,
}

impl ChunkerParams {
    pub const DEFAULT: ChunkerParams = ChunkerParams {
        window: 48,
        min_size: 64 * 1024,
        avg_size: 1024 * 1024,
        max_size: 4 * 1024 * 1024,
    };

    fn mask(&self) -> u64 {
        debug_assert!(
            self.avg_size.is_power_of_two(),
            "avg_size must be a power of two"
        );
        let mask_bits = self.avg_size.trailing_zeros();
        (1u64 << mask_bits) - 1
    }
}

/// Rolling-hash content-defined chunker. Holds the (fixed, deterministic)
/// gear table so repeated calls to `split` don't regenerate it.
pub struct Chunker {
    params: ChunkerParams,
    gear: [u64; 256],
}

impl Chunker {
    pub fn new(params: ChunkerParams) -> Self {
        Self {
            params,
            gear: gear_table(),
        }
    }

    /// Streams `reader` to EOF, invoking `handler` with each cut chunk's
    /// bytes. The hash resets to its initial state between chunks, so each
    /// chunk's boundary is independent of prior chunks.
    pub fn split<R: Read>(&self, mut reader: R, mut handler: impl FnMut(&[u8])) -> IoResult<()> {
        let window = self.params.window.max(1);
        let min_size = self.params.min_size;
        let max_size = self.params.max_size.max(window);
        let mask = self.params.mask();

        let mut chunk = Vec::with_capacity(min_size.max(4096));
        let mut ring: VecDeque<u8> = VecDeque::with_capacity(window);
        let mut hash: u64 = 0;
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            for &byte in &buf[..n] {
                chunk.push(byte);

                if ring.len() == window {
                    let evicted = ring.pop_front().unwrap();
                    hash ^= self.gear[evicted as usize].rotate_left(window as u32);
                }
                hash = hash.rotate_left(1) ^ self.gear[byte as usize];
                ring.push_back(byte);

                let cut = chunk.len() >= max_size
                    || (chunk.len() >= min_size && (hash & mask) == 0);
                if cut {
                    handler(&chunk);
                    chunk.clear();
                    ring.clear();
                    hash = 0;
                }
            }
        }
        if !chunk.is_empty() {
            handler(&chunk);
        }
        Ok(())
    }

    /// Convenience wrapper over an in-memory byte slice.
    pub fn split_slice(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.split(data, |c| out.push(c.to_vec())).expect("in-memory reads never fail");
        out
    }

    /// Streams a seekable reader, restoring its original position once all
    /// chunks have been emitted.
    pub fn split_seekable<R: Read + Seek>(
        &self,
        mut reader: R,
        handler: impl FnMut(&[u8]),
    ) -> IoResult<()> {
        let start = reader.stream_position()?;
        let result = self.split(&mut reader, handler);
        reader.seek(SeekFrom::Start(start))?;
        result
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerParams::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_params() -> ChunkerParams {
        ChunkerParams {
            window: 16,
            min_size: 64,
            avg_size: 256,
            max_size: 1024,
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::new(small_params());
        let chunks = chunker.split_slice(&[]);
        assert!(chunks.is_empty());
    }

    #[test]
    fn input_smaller_than_window_is_one_chunk() {
        let chunker = Chunker::new(small_params());
        let data = vec![7u8; 8];
        let chunks = chunker.split_slice(&data);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], data);
    }

    #[test]
    fn chunks_cover_input_exactly() {
        let chunker = Chunker::new(small_params());
        let data: Vec<u8> = (0u8..=255).cycle().take(64 * 1024).collect();
        let chunks = chunker.split_slice(&data);
        let total: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(total, data.len());
        let rejoined: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(rejoined, data);
    }

    /// Testable property 4: bounds, except possibly the last chunk.
    #[test]
    fn every_chunk_but_the_last_obeys_bounds() {
        let params = small_params();
        let chunker = Chunker::new(params);
        let data: Vec<u8> = (0u8..=255).cycle().take(64 * 1024).collect();
        let chunks = chunker.split_slice(&data);
        for (i, c) in chunks.iter().enumerate() {
            assert!(c.len() <= params.max_size, "chunk {i} exceeds max_size");
            if i + 1 < chunks.len() {
                assert!(c.len() >= params.min_size, "non-final chunk {i} below min_size");
            }
        }
    }

    /// Testable property 3 / S4: deterministic across runs.
    #[test]
    fn chunking_is_deterministic_across_runs() {
        let chunker = Chunker::new(ChunkerParams::DEFAULT);
        let data: Vec<u8> = (0u32..8 * 1024 * 1024).map(|n| (n % 256) as u8).collect();
        let a = chunker.split_slice(&data);
        let b = chunker.split_slice(&data);
        let lens_a: Vec<usize> = a.iter().map(Vec::len).collect();
        let lens_b: Vec<usize> = b.iter().map(Vec::len).collect();
        assert_eq!(lens_a, lens_b);
    }

    #[test]
    fn split_seekable_restores_position() {
        use std::io::Cursor;
        let chunker = Chunker::new(small_params());
        let data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(10)).unwrap();
        chunker.split_seekable(&mut cursor, |_| {}).unwrap();
        assert_eq!(cursor.stream_position().unwrap(), 10);
    }

    proptest! {
        #[test]
        fn deterministic_for_arbitrary_input(data in proptest::collection::vec(any::<u8>(), 0..=8192)) {
            let chunker = Chunker::new(small_params());
            let a = chunker.split_slice(&data);
            let b = chunker.split_slice(&data);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn bounds_hold_for_arbitrary_input(data in proptest::collection::vec(any::<u8>(), 1..=16384)) {
            let params = small_params();
            let chunker = Chunker::new(params);
            let chunks = chunker.split_slice(&data);
            for (i, c) in chunks.iter().enumerate() {
                prop_assert!(c.len() <= params.max_size);
                if i + 1 < chunks.len() {
                    prop_assert!(c.len() >= params.min_size);
                }
            }
        }
    }
}
