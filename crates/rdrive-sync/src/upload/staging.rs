//! Per-part disk staging for arbitrary-offset writers (§4.9 "Write /
//! SetEndOfFile"), sharing the same naming convention and part-size
//! contract as the sequential upload engine in the parent module.
//!
//! `upload_file` streams a known local file sequentially and never needs
//! more than one part buffered at a time. The mount adapter's `WriteFile`
//! callback instead receives writes at arbitrary offsets before the final
//! size is known, so it needs a stateful plan that tracks how much of
//! each part has been written and reports a part complete only once its
//! full length has arrived.

use super::{last_part_len, staging_path, PART_SIZE};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Tracks per-part staging files for one in-progress upload, accepting
/// writes at arbitrary offsets and reporting which parts become complete.
pub struct PartPlan {
    key: String,
    staging_root: PathBuf,
    total_len: u64,
    /// Bytes written so far into each part, keyed by 0-based part index.
    filled: BTreeMap<u64, u64>,
}

impl PartPlan {
    pub fn new(staging_root: &Path, key: &str, total_len: u64) -> Self {
        Self {
            key: key.to_string(),
            staging_root: staging_root.to_path_buf(),
            total_len,
            filled: BTreeMap::new(),
        }
    }

    pub fn part_count(&self) -> u64 {
        super::ceil_div(self.total_len, PART_SIZE)
    }

    fn part_len(&self, part_index: u64) -> u64 {
        if part_index + 1 == self.part_count() {
            last_part_len(self.total_len, PART_SIZE)
        } else {
            PART_SIZE
        }
    }

    fn path_for(&self, part_index: u64) -> PathBuf {
        staging_path(&self.staging_root, &self.key, part_index)
    }

    /// Writes `buf` at global file offset `offset`, splitting across part
    /// boundaries as needed. Returns the 0-based indices of parts that
    /// reached their full length as a result of this write, in ascending
    /// order, ready to be read back and PUT.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<Vec<u64>> {
        let mut completed = Vec::new();
        let mut remaining = buf;
        let mut cursor = offset;

        while !remaining.is_empty() {
            let part_index = cursor / PART_SIZE;
            let part_offset = cursor % PART_SIZE;
            let part_len = self.part_len(part_index);
            let space_in_part = (part_len - part_offset).min(remaining.len() as u64) as usize;
            let (chunk, rest) = remaining.split_at(space_in_part);

            let path = self.path_for(part_index);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).write(true).open(&path)?;
            file.seek(SeekFrom::Start(part_offset))?;
            file.write_all(chunk)?;

            let entry = self.filled.entry(part_index).or_insert(0);
            *entry = (*entry).max(part_offset + chunk.len() as u64);
            if *entry >= part_len {
                completed.push(part_index);
            }

            cursor += chunk.len() as u64;
            remaining = rest;
        }

        completed.sort_unstable();
        completed.dedup();
        Ok(completed)
    }

    /// Reads a completed part's staged bytes back for the PUT call.
    pub fn read_part(&self, part_index: u64) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(part_index))
    }

    /// Removes a part's staging file once its PUT has succeeded.
    pub fn discard_part(&mut self, part_index: u64) {
        let _ = std::fs::remove_file(self.path_for(part_index));
        self.filled.remove(&part_index);
    }

    /// Removes every staging file belonging to this plan, e.g. after the
    /// upload is aborted or `complete` has succeeded for all parts.
    pub fn discard_all(&mut self) {
        for part_index in 0..self.part_count() {
            let _ = std::fs::remove_file(self.path_for(part_index));
        }
        self.filled.clear();
    }

    pub fn is_part_complete(&self, part_index: u64) -> bool {
        self.filled.get(&part_index).copied().unwrap_or(0) >= self.part_len(part_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_write_spanning_two_parts_completes_only_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = PartPlan::new(dir.path(), "a/b.bin", PART_SIZE + 10);

        let buf = vec![1u8; PART_SIZE as usize];
        let completed = plan.write_at(0, &buf).unwrap();
        assert_eq!(completed, vec![0]);
        assert!(plan.is_part_complete(0));
        assert!(!plan.is_part_complete(1));

        let tail = vec![2u8; 10];
        let completed = plan.write_at(PART_SIZE, &tail).unwrap();
        assert_eq!(completed, vec![1]);
        assert!(plan.is_part_complete(1));
    }

    #[test]
    fn out_of_order_writes_still_detect_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = PartPlan::new(dir.path(), "c.bin", 100);

        let second_half = vec![9u8; 50];
        assert!(plan.write_at(50, &second_half).unwrap().is_empty());
        let first_half = vec![8u8; 50];
        let completed = plan.write_at(0, &first_half).unwrap();
        assert_eq!(completed, vec![0]);

        let contents = plan.read_part(0).unwrap();
        assert_eq!(contents.len(), 100);
        assert_eq!(&contents[..50], &first_half[..]);
        assert_eq!(&contents[50..], &second_half[..]);
    }

    #[test]
    fn discard_all_removes_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = PartPlan::new(dir.path(), "d.bin", 10);
        plan.write_at(0, &[1u8; 10]).unwrap();
        assert!(plan.read_part(0).is_ok());
        plan.discard_all();
        assert!(plan.read_part(0).is_err());
    }
}
