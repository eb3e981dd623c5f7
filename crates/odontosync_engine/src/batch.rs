//! Paginated batch processing.
//!
//! Walks a candidate set of unknown size in pages of bounded size, handing
//! each item to a handler. Item failures are counted and never stop the walk;
//! a page that cannot be fetched aborts it.

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{ErrorKind, SyncError, SyncResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, warn};

/// How a successfully handled item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item was sent and accepted.
    Synced,
    /// The ledger already held a success for the item; nothing was sent.
    AlreadySynced,
}

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Items handed to the handler.
    pub attempted: u64,
    /// Items that ended in success, including already synced ones.
    pub succeeded: u64,
    /// Items whose handler returned an error.
    pub failed: u64,
    /// Items skipped because the ledger already held a success.
    pub already_synced: u64,
    /// Non-empty pages fetched.
    pub pages: u64,
}

impl BatchResult {
    /// Adds another result into this one.
    pub fn absorb(&mut self, other: &BatchResult) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.already_synced += other.already_synced;
        self.pages += other.pages;
    }
}

/// A batch that stopped before its source ran dry.
///
/// Items handled before the stop were really sent and recorded, so their
/// counters travel with the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct BatchAbort {
    /// Why the batch stopped.
    pub error: SyncError,
    /// Counters of the items handled before the stop.
    pub partial: BatchResult,
}

impl From<SyncError> for BatchAbort {
    fn from(error: SyncError) -> Self {
        Self {
            error,
            partial: BatchResult::default(),
        }
    }
}

impl From<BatchAbort> for SyncError {
    fn from(abort: BatchAbort) -> Self {
        let p = abort.partial;
        abort
            .error
            .with_context("attempted", p.attempted.to_string())
            .with_context("succeeded", p.succeeded.to_string())
            .with_context("failed", p.failed.to_string())
            .with_context("already_synced", p.already_synced.to_string())
    }
}

#[derive(Debug, Default)]
struct Tally {
    result: BatchResult,
    auth_streak: u32,
    abort: Option<SyncError>,
}

impl Tally {
    fn record(
        &mut self,
        position: u64,
        outcome: SyncResult<ItemOutcome>,
        auth_limit: Option<u32>,
    ) {
        self.result.attempted += 1;
        match outcome {
            Ok(outcome) => {
                self.result.succeeded += 1;
                if outcome == ItemOutcome::AlreadySynced {
                    self.result.already_synced += 1;
                }
                self.auth_streak = 0;
            }
            Err(err) => {
                self.result.failed += 1;
                warn!(
                    position,
                    kind = %err.kind(),
                    error = err.message(),
                    "item failed"
                );
                if err.kind() != ErrorKind::Authentication {
                    self.auth_streak = 0;
                    return;
                }
                self.auth_streak += 1;
                if let Some(limit) = auth_limit {
                    if self.auth_streak >= limit && self.abort.is_none() {
                        self.abort = Some(
                            SyncError::authentication(format!(
                                "{limit} consecutive authentication failures, last: {}",
                                err.message()
                            ))
                            .with_context("position", position.to_string()),
                        );
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

fn run_item<I, H>(handle: &H, item: &I) -> SyncResult<ItemOutcome>
where
    H: Fn(&I) -> SyncResult<ItemOutcome>,
{
    panic::catch_unwind(AssertUnwindSafe(|| handle(item))).unwrap_or_else(|payload| {
        Err(SyncError::new(
            ErrorKind::Internal,
            format!("item handler panicked: {}", panic_message(payload.as_ref())),
        ))
    })
}

/// Drives a page source and an item handler to completion.
#[derive(Debug, Clone)]
pub struct PaginatedBatchProcessor {
    page_size: u32,
    workers: usize,
    auth_failure_limit: Option<u32>,
}

impl PaginatedBatchProcessor {
    /// Creates a sequential processor with the given page size.
    ///
    /// A page size of zero is treated as one.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            workers: 1,
            auth_failure_limit: None,
        }
    }

    /// Drains each page with up to `workers` threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Aborts after `limit` consecutive authentication failures.
    pub fn with_auth_failure_limit(mut self, limit: Option<u32>) -> Self {
        self.auth_failure_limit = limit;
        self
    }

    /// Returns the page size.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns the worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetches pages from offset 0 until one comes back empty, handing every
    /// item to `handle`.
    ///
    /// `fetch(offset, limit)` must return items in a stable order. With one
    /// worker items are handled strictly in that order.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchAbort`] holding a page fetch error (with the failing
    /// offset in its context) when `fetch` fails, or an authentication error
    /// when the consecutive authentication failure limit is reached, together
    /// with the counters gathered so far. Item errors are only counted.
    pub fn process<I, F, H>(&self, mut fetch: F, handle: H) -> Result<BatchResult, BatchAbort>
    where
        I: Sync,
        F: FnMut(u64, u32) -> SyncResult<Vec<I>>,
        H: Fn(&I) -> SyncResult<ItemOutcome> + Sync,
    {
        let tally = Mutex::new(Tally::default());
        let mut offset = 0u64;

        loop {
            let page = match fetch(offset, self.page_size) {
                Ok(page) => page,
                Err(err) => {
                    error!(offset, error = err.message(), "page fetch failed");
                    let error = SyncError::page_fetch(format!(
                        "page at offset {offset} failed: {}",
                        err.message()
                    ))
                    .with_context("offset", offset.to_string());
                    return Err(BatchAbort {
                        error,
                        partial: tally.into_inner().result,
                    });
                }
            };
            if page.is_empty() {
                break;
            }

            tally.lock().result.pages += 1;
            debug!(offset, items = page.len(), "page fetched");
            self.drain(&page, offset, &handle, &tally);

            let abort = tally.lock().abort.take();
            if let Some(error) = abort {
                error!(offset, error = error.message(), "batch aborted");
                return Err(BatchAbort {
                    error,
                    partial: tally.into_inner().result,
                });
            }
            offset += page.len() as u64;
        }

        let result = tally.into_inner().result;
        debug!(
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed,
            pages = result.pages,
            "batch finished"
        );
        Ok(result)
    }

    fn drain<I, H>(&self, page: &[I], offset: u64, handle: &H, tally: &Mutex<Tally>)
    where
        I: Sync,
        H: Fn(&I) -> SyncResult<ItemOutcome> + Sync,
    {
        let limit = self.auth_failure_limit;

        if self.workers <= 1 || page.len() <= 1 {
            for (i, item) in page.iter().enumerate() {
                if tally.lock().abort.is_some() {
                    break;
                }
                let outcome = run_item(handle, item);
                tally.lock().record(offset + i as u64, outcome, limit);
            }
            return;
        }

        let next = AtomicUsize::new(0);
        let next = &next;
        thread::scope(|scope| {
            for _ in 0..self.workers.min(page.len()) {
                scope.spawn(move || loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= page.len() || tally.lock().abort.is_some() {
                        break;
                    }
                    let outcome = run_item(handle, &page[i]);
                    tally.lock().record(offset + i as u64, outcome, limit);
                });
            }
        });
    }
}

impl Default for PaginatedBatchProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paged(items: &[u64]) -> impl FnMut(u64, u32) -> SyncResult<Vec<u64>> + '_ {
        move |offset, limit| {
            let start = (offset as usize).min(items.len());
            let end = (start + limit as usize).min(items.len());
            Ok(items[start..end].to_vec())
        }
    }

    #[test]
    fn hundred_twenty_items_in_pages_of_fifty() {
        let items: Vec<u64> = (1..=120).collect();
        let fetches = Mutex::new(Vec::new());
        let seen = Mutex::new(Vec::new());

        let mut source = paged(&items);
        let result = PaginatedBatchProcessor::new(50)
            .process(
                |offset, limit| {
                    let page = source(offset, limit)?;
                    fetches.lock().push(page.len());
                    Ok(page)
                },
                |item: &u64| {
                    seen.lock().push(*item);
                    if *item == 75 {
                        Err(SyncError::remote_status(500, "insurer down"))
                    } else {
                        Ok(ItemOutcome::Synced)
                    }
                },
            )
            .unwrap();

        assert_eq!(result.attempted, 120);
        assert_eq!(result.succeeded, 119);
        assert_eq!(result.failed, 1);
        assert_eq!(result.pages, 3);
        assert_eq!(*fetches.lock(), vec![50, 50, 20, 0]);
        assert_eq!(*seen.lock(), items);
    }

    #[test]
    fn empty_source_fetches_once() {
        let mut calls = 0;
        let result = PaginatedBatchProcessor::new(10)
            .process(
                |_, _| {
                    calls += 1;
                    Ok(Vec::<u64>::new())
                },
                |_| Ok(ItemOutcome::Synced),
            )
            .unwrap();
        assert_eq!(result, BatchResult::default());
        assert_eq!(calls, 1);
    }

    #[test]
    fn page_fetch_failure_aborts_with_offset() {
        let items: Vec<u64> = (0..30).collect();
        let mut source = paged(&items);
        let handled = AtomicUsize::new(0);

        let err = PaginatedBatchProcessor::new(10)
            .process(
                |offset, limit| {
                    if offset == 20 {
                        return Err(SyncError::remote("view unavailable"));
                    }
                    source(offset, limit)
                },
                |_| {
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok(ItemOutcome::Synced)
                },
            )
            .unwrap_err();

        assert_eq!(err.error.kind(), ErrorKind::PageFetch);
        assert_eq!(
            err.error.context().get("offset").map(String::as_str),
            Some("20")
        );
        assert_eq!(handled.load(Ordering::SeqCst), 20);
        assert_eq!(err.partial.attempted, 20);
        assert_eq!(err.partial.pages, 2);
    }

    #[test]
    fn already_synced_counts_as_success() {
        let items: Vec<u64> = (0..4).collect();
        let result = PaginatedBatchProcessor::new(3)
            .process(paged(&items), |item| {
                Ok(if item % 2 == 0 {
                    ItemOutcome::AlreadySynced
                } else {
                    ItemOutcome::Synced
                })
            })
            .unwrap();
        assert_eq!(result.succeeded, 4);
        assert_eq!(result.already_synced, 2);
        assert_eq!(result.pages, 2);
    }

    #[test]
    fn panicking_item_is_isolated() {
        let items: Vec<u64> = (0..5).collect();
        let result = PaginatedBatchProcessor::new(5)
            .process(paged(&items), |item| {
                if *item == 2 {
                    panic!("bad row");
                }
                Ok(ItemOutcome::Synced)
            })
            .unwrap();
        assert_eq!(result.attempted, 5);
        assert_eq!(result.failed, 1);
    }

    #[test]
    fn auth_streak_aborts_when_limited() {
        let items: Vec<u64> = (0..100).collect();
        let handled = AtomicUsize::new(0);

        let err = PaginatedBatchProcessor::new(10)
            .with_auth_failure_limit(Some(3))
            .process(paged(&items), |_| {
                handled.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::authentication("token endpoint down"))
            })
            .unwrap_err();

        assert_eq!(err.error.kind(), ErrorKind::Authentication);
        assert_eq!(handled.load(Ordering::SeqCst), 3);
        assert_eq!(err.partial.attempted, 3);
        assert_eq!(err.partial.failed, 3);
        assert_eq!(err.partial.pages, 1);
    }

    #[test]
    fn aborted_batch_keeps_counts_of_handled_items() {
        let items: Vec<u64> = (0..30).collect();
        let err = PaginatedBatchProcessor::new(10)
            .with_auth_failure_limit(Some(2))
            .process(paged(&items), |item| {
                if *item >= 12 {
                    Err(SyncError::authentication("token endpoint down"))
                } else {
                    Ok(ItemOutcome::Synced)
                }
            })
            .unwrap_err();

        assert_eq!(err.partial.attempted, 14);
        assert_eq!(err.partial.succeeded, 12);
        assert_eq!(err.partial.failed, 2);

        let err = SyncError::from(err);
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.context().get("succeeded").map(String::as_str), Some("12"));
    }

    #[test]
    fn interleaved_auth_failures_do_not_abort() {
        let items: Vec<u64> = (0..20).collect();
        let result = PaginatedBatchProcessor::new(10)
            .with_auth_failure_limit(Some(2))
            .process(paged(&items), |item| {
                if item % 2 == 0 {
                    Err(SyncError::authentication("flaky"))
                } else {
                    Ok(ItemOutcome::Synced)
                }
            })
            .unwrap();
        assert_eq!(result.failed, 10);
        assert_eq!(result.succeeded, 10);
    }

    #[test]
    fn auth_failures_without_limit_never_abort() {
        let items: Vec<u64> = (0..20).collect();
        let result = PaginatedBatchProcessor::new(7)
            .process(paged(&items), |_| Err(SyncError::authentication("down")))
            .unwrap();
        assert_eq!(result.attempted, 20);
        assert_eq!(result.failed, 20);
    }

    #[test]
    fn workers_handle_every_item_once() {
        let items: Vec<u64> = (0..97).collect();
        let counts: Vec<AtomicUsize> = (0..97).map(|_| AtomicUsize::new(0)).collect();

        let result = PaginatedBatchProcessor::new(20)
            .with_workers(4)
            .process(paged(&items), |item| {
                counts[*item as usize].fetch_add(1, Ordering::SeqCst);
                Ok(ItemOutcome::Synced)
            })
            .unwrap();

        assert_eq!(result.attempted, 97);
        assert_eq!(result.pages, 5);
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    proptest! {
        #[test]
        fn every_item_visited_once(n in 0u64..300, page_size in 1u32..60, workers in 1usize..4) {
            let items: Vec<u64> = (0..n).collect();
            let counts: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();

            let result = PaginatedBatchProcessor::new(page_size)
                .with_workers(workers)
                .process(paged(&items), |item| {
                    counts[*item as usize].fetch_add(1, Ordering::SeqCst);
                    if item % 7 == 3 {
                        Err(SyncError::remote("rejected"))
                    } else {
                        Ok(ItemOutcome::Synced)
                    }
                })
                .unwrap();

            prop_assert_eq!(result.attempted, n);
            prop_assert_eq!(result.succeeded + result.failed, n);
            prop_assert_eq!(result.pages, n.div_ceil(u64::from(page_size)));
            prop_assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        }
    }
}
