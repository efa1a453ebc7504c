//! Scoped-thread utilities for data-parallel kernels.
//!
//! Two shapes cover every hot loop in the workspace:
//! - `parallel_for_chunks`: workers mutate disjoint chunks of one slice
//!   (recurrence-tensor rows).
//! - `parallel_map_ranges`: workers scan disjoint index ranges and return
//!   private results that the caller merges after the join (count maps,
//!   density scans).
//!
//! Threads are joined before either function returns, so the shared data is
//! complete when the caller sees it again.

use std::ops::Range;
use std::thread;

/// Number of worker threads to use when the caller does not pin one.
pub fn available_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Run `f` over disjoint mutable chunks of `data`, one scoped thread per
/// chunk. `f` receives the chunk index and the chunk itself.
///
/// Chunks are `chunk_len` elements each (the last may be shorter). With a
/// `chunk_len` of zero or no data this degenerates to a no-op.
pub fn parallel_for_chunks<T, F>(data: &mut [T], chunk_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    if data.is_empty() || chunk_len == 0 {
        return;
    }
    if chunk_len >= data.len() {
        f(0, data);
        return;
    }
    thread::scope(|scope| {
        for (index, chunk) in data.chunks_mut(chunk_len).enumerate() {
            let f = &f;
            scope.spawn(move || f(index, chunk));
        }
    });
}

/// Split `0..len` into at most `threads` contiguous ranges, run `f` on each
/// in a scoped thread, and collect the results in range order.
///
/// `f` receives the worker index and its range. With `threads <= 1` (or a
/// range too small to split) the closure runs inline on the caller's thread.
pub fn parallel_map_ranges<R, F>(len: usize, threads: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize, Range<usize>) -> R + Sync,
{
    if len == 0 {
        return Vec::new();
    }
    let threads = threads.max(1).min(len);
    if threads == 1 {
        return vec![f(0, 0..len)];
    }

    // Spread the remainder over the leading workers so range lengths differ
    // by at most one.
    let base = len / threads;
    let rest = len % threads;
    let mut ranges = Vec::with_capacity(threads);
    let mut start = 0;
    for w in 0..threads {
        let span = base + usize::from(w < rest);
        ranges.push(start..start + span);
        start += span;
    }

    thread::scope(|scope| {
        let handles: Vec<_> = ranges
            .into_iter()
            .enumerate()
            .map(|(w, range)| {
                let f = &f;
                scope.spawn(move || f(w, range))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
