// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Static partitioning of an index range into per-worker chunks.

use std::ops::Range;

/// A partition of a range into contiguous chunks of equal (ceiling-rounded)
/// size, one per worker thread, without any rebalancing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkedPartition {
    /// First index of the partitioned range.
    begin: usize,
    /// Number of indices in the partitioned range.
    len: usize,
    /// Number of indices per chunk (except possibly the last ones).
    chunk_size: usize,
    /// Number of chunks, i.e. of worker threads that receive work.
    num_chunks: usize,
}

// Here is a proof that the chunks are pairwise disjoint and that their union is
// the whole range.
//
// Chunk `t` is `begin + min(len, t * chunk_size)..begin + min(len, (t + 1) *
// chunk_size)`. The offsets `min(len, t * chunk_size)` are non-decreasing in
// `t`, so each chunk is well-formed (possibly empty) and ends where the next one
// starts. The first chunk starts at offset 0 and, because `chunk_size =
// ceil(len / num_chunks)`, we have `num_chunks * chunk_size >= len` so the last
// chunk ends at offset `len`.
impl ChunkedPartition {
    /// Partitions the given range among at most `num_threads` workers. No more
    /// chunks than items are created, but trailing chunks may still be empty
    /// due to the rounding (e.g. 5 items on 4 threads).
    pub fn new(range: Range<usize>, num_threads: usize) -> Self {
        assert!(
            range.start <= range.end,
            "cannot iterate over a backward range"
        );
        let len = range.end - range.start;
        let num_chunks = num_threads.min(len);
        let chunk_size = if num_chunks == 0 {
            0
        } else {
            len.div_ceil(num_chunks)
        };
        Self {
            begin: range.start,
            len,
            chunk_size,
            num_chunks,
        }
    }

    /// Returns the number of chunks in this partition.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Returns the number of indices per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the range of indices of the given chunk.
    pub fn chunk(&self, id: usize) -> Range<usize> {
        debug_assert!(id < self.num_chunks);
        let start = id.saturating_mul(self.chunk_size).min(self.len);
        let end = (id + 1).saturating_mul(self.chunk_size).min(self.len);
        self.begin + start..self.begin + end
    }

    /// Returns an iterator over all the chunks, in order.
    pub fn chunks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_chunks).map(|id| self.chunk(id))
    }
}

/// A chunk of a parallel for loop, assigned to one worker thread.
pub struct TaskDescriptor<'a, F> {
    /// Indices to process.
    range: Range<usize>,
    /// Function to call on each index.
    code: &'a F,
}

impl<'a, F: Fn(usize)> TaskDescriptor<'a, F> {
    /// Creates a descriptor to run the given function on the given range.
    pub fn new(range: Range<usize>, code: &'a F) -> Self {
        Self { range, code }
    }

    /// Calls the function on each index of the range, in increasing order.
    pub fn run(&self) {
        for i in self.range.clone() {
            (self.code)(i);
        }
    }
}
