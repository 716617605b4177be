//! Paginated cursor over the events of one stream.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::store::EventStream;
use crate::{EventEnvelope, EventStoreError, Result, Version};

/// Read direction on `no`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Source of event pages for a [`StreamIterator`].
///
/// Implementations run one bounded range query: at most `limit` events with
/// `no >= from` (forward) or `no <= from` (backward), ordered accordingly,
/// with whatever predicate they were built with.
#[async_trait]
pub trait PageReader: Send + Sync + 'static {
    async fn read_page(
        &self,
        from: Version,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<EventEnvelope>>;
}

/// Lazy, single-pass cursor that re-queries page by page.
///
/// A new page is only requested when the previous one came back full-sized
/// and fewer than `count` events have been yielded; a short page means the
/// stream is exhausted.
pub struct StreamIterator<R> {
    reader: R,
    direction: Direction,
    batch_size: usize,
    remaining: usize,
    next_from: Version,
    buffer: VecDeque<EventEnvelope>,
    last_page_full: bool,
}

impl<R: PageReader> StreamIterator<R> {
    /// Opens the cursor and fetches the first page eagerly, so that a missing
    /// stream fails here rather than on first poll.
    pub async fn open(
        reader: R,
        from: Version,
        count: Option<usize>,
        batch_size: usize,
        direction: Direction,
    ) -> Result<Self> {
        let mut iterator = Self {
            reader,
            direction,
            batch_size: batch_size.max(1),
            remaining: count.unwrap_or(usize::MAX),
            next_from: from,
            buffer: VecDeque::new(),
            last_page_full: false,
        };
        iterator.fetch_page().await?;
        Ok(iterator)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let limit = self.batch_size.min(self.remaining);
        let page = self
            .reader
            .read_page(self.next_from, limit, self.direction)
            .await?;

        tracing::trace!(
            from = %self.next_from,
            limit,
            rows = page.len(),
            "fetched stream page"
        );

        self.last_page_full = limit > 0 && page.len() == limit;
        self.buffer.extend(page);
        Ok(())
    }

    fn has_more_pages(&self) -> bool {
        self.last_page_full && self.remaining > 0
    }

    /// Returns the next event, fetching another page when needed.
    pub async fn next_event(&mut self) -> Result<Option<EventEnvelope>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        if self.buffer.is_empty() {
            if !self.has_more_pages() {
                return Ok(None);
            }
            self.fetch_page().await?;
        }

        let Some(event) = self.buffer.pop_front() else {
            return Ok(None);
        };

        self.remaining -= 1;
        self.next_from = match self.direction {
            Direction::Forward => event.no.next(),
            Direction::Backward => event.no.prev(),
        };

        Ok(Some(event))
    }

    /// Converts the cursor into the store's boxed event stream.
    pub fn into_stream(self) -> EventStream {
        Box::pin(futures_util::stream::try_unfold(
            self,
            |mut iterator| async move {
                let next = iterator.next_event().await?;
                Ok::<_, EventStoreError>(next.map(|event| (event, iterator)))
            },
        ))
    }
}
