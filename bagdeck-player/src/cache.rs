//! Block cache
//!
//! Partitions a source's time range into fixed-duration blocks and retains
//! decoded messages for subscribed topics per block, under a byte budget.
//! Random-access scrubbing stays fast because already-read regions answer
//! from memory; only the gaps go back to the source.
//!
//! Single-writer discipline: the playback loop is the only mutator. The
//! structure carries no internal locking.

use bagdeck_common::{MessageEvent, Time, TimeRange};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// One cached, time-bounded slice of messages
///
/// A block is *complete* for a topic only when the whole block span has
/// been read for it; partially-read topics are retained but never reported
/// as hits.
#[derive(Debug, Clone)]
pub struct Block {
    /// Span this block tiles, half-open
    pub range: TimeRange,

    /// Messages per topic, each vector sorted by receive time
    pub messages_by_topic: HashMap<String, Vec<MessageEvent>>,

    /// Sum of contained message sizes
    pub size_in_bytes: u64,
}

/// Cached block plus bookkeeping the cache keeps per slot
#[derive(Debug)]
struct CachedBlock {
    block: Arc<Block>,

    /// Topics whose full block span has been read
    complete_topics: BTreeSet<String>,

    /// Monotonic tick of the most recent query touching this block
    last_query_tick: u64,
}

/// Result of a cache query: cached blocks plus the gaps left to fetch
#[derive(Debug, Default)]
pub struct CacheQuery {
    /// Blocks complete for every requested topic, in time order
    pub hits: Vec<Arc<Block>>,

    /// Maximal block-aligned gaps the source must be read for, in time order
    pub misses: Vec<TimeRange>,
}

/// LRU block cache over one source's time range
#[derive(Debug)]
pub struct BlockCache {
    /// Half-open coverage: `[source start, source end + 1ns)`
    coverage: TimeRange,
    block_duration_nanos: u64,
    budget_bytes: u64,
    look_behind_nanos: u64,
    look_ahead_nanos: u64,

    /// Slot index → cached block. Slots tile `coverage` with no overlap,
    /// which makes per-topic stored ranges disjoint by construction.
    blocks: BTreeMap<u64, CachedBlock>,
    total_bytes: u64,
    query_tick: u64,
    playhead: Time,
}

impl BlockCache {
    /// Create a cache over the inclusive source range `[start, end]`
    pub fn new(
        start: Time,
        end: Time,
        block_duration_nanos: u64,
        budget_bytes: u64,
        look_behind_nanos: u64,
        look_ahead_nanos: u64,
    ) -> Self {
        debug_assert!(block_duration_nanos > 0);
        debug_assert!(budget_bytes > 0);
        BlockCache {
            coverage: TimeRange::new(start, end.add_nanos(1)),
            block_duration_nanos,
            budget_bytes,
            look_behind_nanos,
            look_ahead_nanos,
            blocks: BTreeMap::new(),
            total_bytes: 0,
            query_tick: 0,
            playhead: start,
        }
    }

    /// Move the pin window; blocks near the playhead are never evicted
    pub fn set_playhead(&mut self, playhead: Time) {
        self.playhead = playhead;
    }

    /// Bytes currently held
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn slot_of(&self, t: Time) -> u64 {
        t.duration_since(self.coverage.start) / self.block_duration_nanos
    }

    fn slot_range(&self, slot: u64) -> TimeRange {
        let start = self
            .coverage
            .start
            .add_nanos(slot * self.block_duration_nanos);
        let end = start.add_nanos(self.block_duration_nanos);
        TimeRange::new(start, end.min(self.coverage.end))
    }

    /// Slot indices overlapping `range` (clamped to coverage)
    fn slots_overlapping(&self, range: &TimeRange) -> Option<(u64, u64)> {
        let clamped = range.intersect(&self.coverage)?;
        let first = self.slot_of(clamped.start);
        // Last covered instant, not the exclusive bound
        let last = self.slot_of(Time::from_nanos(clamped.end.to_nanos() - 1));
        Some((first, last))
    }

    /// Answer "what is cached for `topics` in `range`".
    ///
    /// Hits are blocks complete for every requested topic; misses are the
    /// complementary gaps, expanded to block boundaries so a subsequent
    /// insert completes whole blocks. Querying refreshes recency.
    pub fn query(&mut self, range: TimeRange, topics: &[String]) -> CacheQuery {
        self.query_tick += 1;
        let mut result = CacheQuery::default();
        let Some((first, last)) = self.slots_overlapping(&range) else {
            return result;
        };

        let mut pending_miss: Option<TimeRange> = None;
        for slot in first..=last {
            let complete = match self.blocks.get_mut(&slot) {
                Some(cached)
                    if topics
                        .iter()
                        .all(|t| cached.complete_topics.contains(t)) =>
                {
                    cached.last_query_tick = self.query_tick;
                    result.hits.push(Arc::clone(&cached.block));
                    true
                }
                _ => false,
            };

            if !complete {
                let slot_range = self.slot_range(slot);
                pending_miss = match pending_miss.take() {
                    Some(open) => Some(TimeRange::new(open.start, slot_range.end)),
                    None => Some(slot_range),
                };
            } else if let Some(open) = pending_miss.take() {
                result.misses.push(open);
            }
        }
        if let Some(open) = pending_miss {
            result.misses.push(open);
        }

        trace!(
            hits = result.hits.len(),
            misses = result.misses.len(),
            "cache query {}",
            range
        );
        result
    }

    /// Merge a freshly-read region into the tiling.
    ///
    /// `range` is the span actually read and `topics_read` the topics the
    /// read covered. Slots fully inside `range` become complete for those
    /// topics with newest-read-wins semantics; edge slots only partially
    /// covered absorb the messages (deduplicated by
    /// `(topic, receive_time, size_in_bytes)`) but stay incomplete.
    pub fn insert(
        &mut self,
        range: TimeRange,
        topics_read: &[String],
        messages: Vec<MessageEvent>,
    ) {
        let Some((first, last)) = self.slots_overlapping(&range) else {
            return;
        };

        // Distribute messages into their slots
        let mut per_slot: HashMap<u64, Vec<MessageEvent>> = HashMap::new();
        for msg in messages {
            if !range.contains(msg.receive_time) || !self.coverage.contains(msg.receive_time) {
                continue;
            }
            per_slot
                .entry(self.slot_of(msg.receive_time))
                .or_default()
                .push(msg);
        }

        for slot in first..=last {
            let slot_range = self.slot_range(slot);
            let fully_covered =
                range.start <= slot_range.start && range.end >= slot_range.end;
            let mut incoming: HashMap<String, Vec<MessageEvent>> = HashMap::new();
            for topic in topics_read {
                incoming.insert(topic.clone(), Vec::new());
            }
            for msg in per_slot.remove(&slot).unwrap_or_default() {
                incoming.entry(msg.topic.clone()).or_default().push(msg);
            }
            for list in incoming.values_mut() {
                list.sort_by_key(|m| m.receive_time);
            }

            let cached = self.blocks.entry(slot).or_insert_with(|| CachedBlock {
                block: Arc::new(Block {
                    range: slot_range,
                    messages_by_topic: HashMap::new(),
                    size_in_bytes: 0,
                }),
                complete_topics: BTreeSet::new(),
                last_query_tick: 0,
            });

            self.total_bytes -= cached.block.size_in_bytes;
            let mut block = Block {
                range: slot_range,
                messages_by_topic: cached.block.messages_by_topic.clone(),
                size_in_bytes: 0,
            };

            for (topic, new_messages) in incoming {
                if fully_covered {
                    // Newest read wins outright for a fully re-read span
                    block.messages_by_topic.insert(topic.clone(), new_messages);
                    cached.complete_topics.insert(topic);
                } else {
                    let merged = merge_dedupe(
                        block.messages_by_topic.remove(&topic).unwrap_or_default(),
                        new_messages,
                    );
                    block.messages_by_topic.insert(topic, merged);
                }
            }

            block.size_in_bytes = block
                .messages_by_topic
                .values()
                .flatten()
                .map(|m| m.size_in_bytes)
                .sum();
            self.total_bytes += block.size_in_bytes;
            cached.block = Arc::new(block);
        }

        self.evict_over_budget();
    }

    /// Invariant check: for any topic, stored ranges are pairwise disjoint.
    /// Slots tile by construction, so verifying slot ranges suffices.
    #[cfg(debug_assertions)]
    fn assert_disjoint(&self) {
        let mut prev_end: Option<Time> = None;
        for cached in self.blocks.values() {
            if let Some(end) = prev_end {
                assert!(cached.block.range.start >= end, "overlapping cache blocks");
            }
            prev_end = Some(cached.block.range.end);
        }
    }

    fn pinned(&self, slot_range: &TimeRange) -> bool {
        let pin = TimeRange::new(
            self.playhead.saturating_sub_nanos(self.look_behind_nanos),
            self.playhead.add_nanos(self.look_ahead_nanos),
        );
        slot_range.intersect(&pin).is_some()
    }

    fn evict_over_budget(&mut self) {
        #[cfg(debug_assertions)]
        self.assert_disjoint();

        while self.total_bytes > self.budget_bytes {
            let victim = self
                .blocks
                .iter()
                .filter(|(_, cached)| !self.pinned(&cached.block.range))
                .min_by_key(|(_, cached)| cached.last_query_tick)
                .map(|(slot, _)| *slot);

            match victim {
                Some(slot) => {
                    if let Some(cached) = self.blocks.remove(&slot) {
                        self.total_bytes -= cached.block.size_in_bytes;
                        debug!(
                            slot,
                            freed = cached.block.size_in_bytes,
                            "evicted cache block {}",
                            cached.block.range
                        );
                    }
                }
                None => {
                    // Everything left is pinned around the playhead; allow a
                    // temporary overshoot rather than stall playback.
                    debug!(
                        total = self.total_bytes,
                        budget = self.budget_bytes,
                        "cache over budget but fully pinned"
                    );
                    break;
                }
            }
        }
    }

    /// Per-topic coalesced ranges whose blocks are complete for that topic
    pub fn progress(&self) -> BTreeMap<String, Vec<TimeRange>> {
        let mut topics: BTreeSet<&String> = BTreeSet::new();
        for cached in self.blocks.values() {
            topics.extend(cached.complete_topics.iter());
        }

        let mut progress = BTreeMap::new();
        for topic in topics {
            let mut ranges: Vec<TimeRange> = Vec::new();
            for cached in self.blocks.values() {
                if !cached.complete_topics.contains(topic) {
                    continue;
                }
                match ranges.last_mut() {
                    Some(open) if open.end == cached.block.range.start => {
                        open.end = cached.block.range.end;
                    }
                    _ => ranges.push(cached.block.range),
                }
            }
            progress.insert(topic.clone(), ranges);
        }
        progress
    }
}

/// Merge two per-topic sorted vectors, dropping boundary duplicates keyed by
/// `(receive_time, size_in_bytes)`
fn merge_dedupe(existing: Vec<MessageEvent>, incoming: Vec<MessageEvent>) -> Vec<MessageEvent> {
    let mut merged = existing;
    for msg in incoming {
        let duplicate = merged.iter().any(|m| {
            m.receive_time == msg.receive_time
                && m.size_in_bytes == msg.size_in_bytes
                && m.topic == msg.topic
        });
        if !duplicate {
            merged.push(msg);
        }
    }
    merged.sort_by_key(|m| m.receive_time);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    fn msg(topic: &str, sec: u32, nsec: u32, size: u64) -> MessageEvent {
        MessageEvent {
            topic: topic.to_string(),
            schema_name: "test/Schema".to_string(),
            receive_time: Time::new(sec, nsec),
            message: Vec::new(),
            size_in_bytes: size,
        }
    }

    fn cache(end_sec: u32, budget: u64) -> BlockCache {
        BlockCache::new(
            Time::ZERO,
            Time::from_secs(end_sec),
            SEC, // 1 s blocks
            budget,
            SEC,     // 1 s look-behind pin
            2 * SEC, // 2 s look-ahead pin
        )
    }

    fn range(a: u32, b: u32) -> TimeRange {
        TimeRange::new(Time::from_secs(a), Time::from_secs(b))
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cold_cache_reports_one_coalesced_miss() {
        let mut cache = cache(100, u64::MAX);
        let q = cache.query(range(10, 15), &topics(&["/a"]));
        assert!(q.hits.is_empty());
        assert_eq!(q.misses, vec![range(10, 15)]);
    }

    #[test]
    fn test_insert_then_query_hits_without_misses() {
        let mut cache = cache(100, u64::MAX);
        cache.insert(
            range(10, 15),
            &topics(&["/a"]),
            vec![msg("/a", 11, 0, 8), msg("/a", 13, 0, 8)],
        );

        let q = cache.query(range(10, 15), &topics(&["/a"]));
        assert!(q.misses.is_empty());
        assert_eq!(q.hits.len(), 5);
        let total: usize = q
            .hits
            .iter()
            .map(|b| b.messages_by_topic.get("/a").map_or(0, Vec::len))
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_partial_coverage_is_not_a_hit() {
        let mut cache = cache(100, u64::MAX);
        // Read stops halfway through block [10,11)
        cache.insert(
            TimeRange::new(Time::from_secs(10), Time::new(10, 500_000_000)),
            &topics(&["/a"]),
            vec![msg("/a", 10, 100, 8)],
        );

        let q = cache.query(range(10, 11), &topics(&["/a"]));
        assert!(q.hits.is_empty());
        assert_eq!(q.misses, vec![range(10, 11)]);
    }

    #[test]
    fn test_completeness_is_per_topic() {
        let mut cache = cache(100, u64::MAX);
        cache.insert(range(10, 12), &topics(&["/a"]), vec![msg("/a", 10, 0, 8)]);

        // Complete for /a but not for {/a, /b}
        assert!(cache.query(range(10, 12), &topics(&["/a"])).misses.is_empty());
        let q = cache.query(range(10, 12), &topics(&["/a", "/b"]));
        assert_eq!(q.misses, vec![range(10, 12)]);
    }

    #[test]
    fn test_interleaved_hits_and_misses() {
        let mut cache = cache(100, u64::MAX);
        cache.insert(range(10, 11), &topics(&["/a"]), vec![]);
        cache.insert(range(12, 13), &topics(&["/a"]), vec![]);

        let q = cache.query(range(10, 14), &topics(&["/a"]));
        assert_eq!(q.hits.len(), 2);
        assert_eq!(q.misses, vec![range(11, 12), range(13, 14)]);
    }

    #[test]
    fn test_reread_does_not_duplicate_messages() {
        let mut cache = cache(100, u64::MAX);
        let messages = vec![msg("/a", 10, 0, 8), msg("/a", 10, 500, 8)];
        cache.insert(range(10, 11), &topics(&["/a"]), messages.clone());
        cache.insert(range(10, 11), &topics(&["/a"]), messages);

        let q = cache.query(range(10, 11), &topics(&["/a"]));
        let total: usize = q
            .hits
            .iter()
            .map(|b| b.messages_by_topic.get("/a").map_or(0, Vec::len))
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_boundary_overlap_dedupes_in_partial_blocks() {
        let mut cache = cache(100, u64::MAX);
        let boundary = msg("/a", 10, 250, 8);
        // Two partial reads over the same block, overlapping at the boundary
        cache.insert(
            TimeRange::new(Time::from_secs(10), Time::new(10, 400_000_000)),
            &topics(&["/a"]),
            vec![boundary.clone()],
        );
        cache.insert(
            TimeRange::new(Time::new(10, 200_000_000), Time::new(10, 700_000_000)),
            &topics(&["/a"]),
            vec![boundary],
        );

        let cached = cache.blocks.get(&10).unwrap();
        assert_eq!(cached.block.messages_by_topic["/a"].len(), 1);
    }

    #[test]
    fn test_stored_blocks_are_disjoint_per_topic() {
        let mut cache = cache(100, u64::MAX);
        cache.insert(range(5, 20), &topics(&["/a"]), vec![msg("/a", 7, 0, 8)]);
        cache.insert(range(10, 30), &topics(&["/a"]), vec![msg("/a", 12, 0, 8)]);

        let mut prev_end: Option<Time> = None;
        for cached in cache.blocks.values() {
            if let Some(end) = prev_end {
                assert!(cached.block.range.start >= end);
            }
            prev_end = Some(cached.block.range.end);
        }
    }

    #[test]
    fn test_eviction_prefers_least_recently_queried() {
        let mut cache = cache(100, 100);
        cache.set_playhead(Time::from_secs(90));

        cache.insert(range(10, 11), &topics(&["/a"]), vec![msg("/a", 10, 0, 60)]);
        cache.insert(range(20, 21), &topics(&["/a"]), vec![msg("/a", 20, 0, 60)]);

        // Block at 10s was never queried after insert; it goes first
        assert!(cache.total_bytes() <= 100);
        let q = cache.query(range(10, 11), &topics(&["/a"]));
        assert!(!q.misses.is_empty());
        let q = cache.query(range(20, 21), &topics(&["/a"]));
        assert!(q.misses.is_empty());
    }

    #[test]
    fn test_recently_queried_block_survives() {
        let mut cache = cache(100, 100);
        cache.set_playhead(Time::from_secs(90));

        cache.insert(range(10, 11), &topics(&["/a"]), vec![msg("/a", 10, 0, 60)]);
        // Touch it so it is the most recently used
        cache.query(range(10, 11), &topics(&["/a"]));
        cache.insert(range(20, 21), &topics(&["/a"]), vec![msg("/a", 20, 0, 60)]);

        let q = cache.query(range(10, 11), &topics(&["/a"]));
        assert!(q.misses.is_empty());
    }

    #[test]
    fn test_pinned_blocks_never_evicted() {
        let mut cache = cache(100, 100);
        cache.set_playhead(Time::from_secs(10));

        // Inside the pin window around the playhead
        cache.insert(range(10, 11), &topics(&["/a"]), vec![msg("/a", 10, 0, 90)]);
        // Far away, large enough to blow the budget
        cache.insert(range(50, 51), &topics(&["/a"]), vec![msg("/a", 50, 0, 90)]);

        let q = cache.query(range(10, 11), &topics(&["/a"]));
        assert!(q.misses.is_empty(), "pinned block must survive eviction");
        let q = cache.query(range(50, 51), &topics(&["/a"]));
        assert!(!q.misses.is_empty());
    }

    #[test]
    fn test_progress_coalesces_adjacent_blocks() {
        let mut cache = cache(100, u64::MAX);
        cache.insert(range(10, 13), &topics(&["/a"]), vec![]);
        cache.insert(range(20, 22), &topics(&["/a"]), vec![]);

        let progress = cache.progress();
        assert_eq!(progress["/a"], vec![range(10, 13), range(20, 22)]);
    }

    #[test]
    fn test_query_outside_coverage_is_empty() {
        let mut cache = cache(100, u64::MAX);
        let q = cache.query(range(200, 300), &topics(&["/a"]));
        assert!(q.hits.is_empty());
        assert!(q.misses.is_empty());
    }
}
