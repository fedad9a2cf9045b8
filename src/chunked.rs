//! Cooperative chunked iteration.
//!
//! Extraction and analysis are synchronous passes, but a single-threaded
//! host must not be blocked for the whole dataset. Long loops report their
//! progress to a [`ChunkScheduler`], which yields to the runtime every
//! `chunk_size` items.

use itertools::Itertools;
use std::cmp::Ordering;
use tracing::trace;

/// Items processed between yield points unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Counts processed items and yields once per chunk.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    chunk_size: usize,
    pending: usize,
    processed: usize,
    yields: usize,
}

impl Default for ChunkScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkScheduler {
    /// A `chunk_size` of zero is treated as one.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pending: 0,
            processed: 0,
            yields: 0,
        }
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total items reported so far.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.processed
    }

    /// Number of times control was handed back to the runtime.
    #[must_use]
    pub const fn yields(&self) -> usize {
        self.yields
    }

    /// Report one processed item.
    pub async fn tick(&mut self) {
        self.advance(1).await;
    }

    /// Report `items` processed items, yielding if a chunk boundary was crossed.
    pub async fn advance(&mut self, items: usize) {
        self.processed += items;
        self.pending += items;
        if self.pending >= self.chunk_size {
            self.pending %= self.chunk_size;
            self.yields += 1;
            trace!(processed = self.processed, "Yielding between chunks");
            tokio::task::yield_now().await;
        }
    }
}

/// Sort `items` with a yield point between chunks.
///
/// Each chunk is sorted on its own, then the sorted runs are merged one
/// item at a time. Items that compare equal may come out in any order.
pub async fn sort_cooperative<T, F>(
    items: Vec<T>,
    scheduler: &mut ChunkScheduler,
    compare: F,
) -> Vec<T>
where
    F: Fn(&T, &T) -> Ordering,
{
    let total = items.len();
    let chunk_size = scheduler.chunk_size();

    let mut runs = Vec::with_capacity(total.div_ceil(chunk_size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        let mut run: Vec<T> = items.by_ref().take(chunk_size).collect();
        run.sort_by(&compare);
        scheduler.advance(run.len()).await;
        runs.push(run);
    }

    if runs.len() <= 1 {
        return runs.pop().unwrap_or_default();
    }

    let mut sorted = Vec::with_capacity(total);
    for item in runs
        .into_iter()
        .kmerge_by(|a, b| compare(a, b) == Ordering::Less)
    {
        sorted.push(item);
        scheduler.tick().await;
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sort_cooperative_matches_sort() {
        let items: Vec<u32> = (0..100).map(|i| (i * 37 + 11) % 101).collect();
        let mut expected = items.clone();
        expected.sort_unstable();

        let mut scheduler = ChunkScheduler::new(8);
        let sorted = sort_cooperative(items, &mut scheduler, u32::cmp).await;
        assert_eq!(sorted, expected);
        // One pass over the chunks, one over the merge.
        assert_eq!(scheduler.processed(), 200);
        assert!(scheduler.yields() >= 20);
    }

    #[tokio::test]
    async fn test_sort_cooperative_small_inputs() {
        let mut scheduler = ChunkScheduler::new(4);
        let empty: Vec<u8> = sort_cooperative(Vec::new(), &mut scheduler, u8::cmp).await;
        assert!(empty.is_empty());

        let single = sort_cooperative(vec![3, 1, 2], &mut scheduler, u8::cmp).await;
        assert_eq!(single, vec![1, 2, 3]);
        assert_eq!(scheduler.processed(), 3);
    }

    #[tokio::test]
    async fn test_yields_once_per_chunk() {
        let mut scheduler = ChunkScheduler::new(3);
        for _ in 0..7 {
            scheduler.tick().await;
        }
        assert_eq!(scheduler.processed(), 7);
        assert_eq!(scheduler.yields(), 2);
    }

    #[tokio::test]
    async fn test_large_advance_yields_once() {
        let mut scheduler = ChunkScheduler::new(10);
        scheduler.advance(25).await;
        assert_eq!(scheduler.yields(), 1);
        scheduler.advance(5).await;
        assert_eq!(scheduler.yields(), 2);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        assert_eq!(ChunkScheduler::new(0).chunk_size(), 1);
        assert_eq!(ChunkScheduler::default().chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_yield_lets_other_tasks_run() {
        use std::cell::Cell;
        use std::rc::Rc;

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let flag = Rc::new(Cell::new(false));
                let other = Rc::clone(&flag);
                tokio::task::spawn_local(async move { other.set(true) });

                let mut scheduler = ChunkScheduler::new(1);
                scheduler.tick().await;
                assert!(flag.get());
            })
            .await;
    }
}
