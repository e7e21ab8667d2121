//! Multi-source time merge
//!
//! Interleaves N per-source record streams, each individually non-decreasing
//! in receive time, into one globally time-ordered stream. Ties are broken
//! by source index so the output is deterministic for identical inputs.

use async_stream::try_stream;
use bagdeck_common::Time;
use futures::StreamExt;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::source::{IteratorItem, MessageStream};

/// One pending head record in the merge heap
struct HeapEntry {
    time: Time,
    source_index: usize,
    item: IteratorItem,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.source_index == other.source_index
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.source_index.cmp(&other.source_index))
    }
}

/// Merge per-source streams into one globally time-ordered stream.
///
/// Min-heap over `(head time, source index)`: prime one head per source,
/// then repeatedly pop the minimum, yield it, and refill from the source it
/// came from. A source ending early never blocks the others; the first read
/// error ends the merged stream with that error.
pub fn merge_streams(mut sources: Vec<MessageStream>) -> MessageStream {
    Box::pin(try_stream! {
        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::with_capacity(sources.len());

        for (source_index, source) in sources.iter_mut().enumerate() {
            if let Some(item) = source.next().await {
                let item = item?;
                heap.push(Reverse(HeapEntry {
                    time: item.time(),
                    source_index,
                    item,
                }));
            }
        }

        while let Some(Reverse(entry)) = heap.pop() {
            let source_index = entry.source_index;
            yield entry.item;

            if let Some(item) = sources[source_index].next().await {
                let item = item?;
                heap.push(Reverse(HeapEntry {
                    time: item.time(),
                    source_index,
                    item,
                }));
            }
        }
    })
}
