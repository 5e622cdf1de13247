//! Binary heap of shard cursors for the k-way ORDER BY merge.
//!
//! The ordering lives outside the heap: callers pass an `is_prior_to(a, b)`
//! test over shard indexes, which can fail (e.g. a malformed numeric column)
//! and which must rank exhausted cursors after live ones.

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct MergeHeap {
    slots: Vec<usize>,
}

impl MergeHeap {
    pub fn new(shards: impl IntoIterator<Item = usize>) -> Self {
        Self {
            slots: shards.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Shard whose head row goes out next.
    pub fn top(&self) -> Option<usize> {
        self.slots.first().copied()
    }

    pub fn build<F>(&mut self, is_prior_to: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize) -> Result<bool>,
    {
        for i in (0..self.slots.len() / 2).rev() {
            self.sift_down(i, is_prior_to)?;
        }
        Ok(())
    }

    /// Restores the heap after the cursor at `i` moved to a later row.
    pub fn sift_down<F>(&mut self, mut i: usize, is_prior_to: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize) -> Result<bool>,
    {
        let n = self.slots.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                return Ok(());
            }
            let right = left + 1;
            let mut child = left;
            if right < n && is_prior_to(self.slots[right], self.slots[left])? {
                child = right;
            }
            if !is_prior_to(self.slots[child], self.slots[i])? {
                return Ok(());
            }
            self.slots.swap(i, child);
            i = child;
        }
    }
}
