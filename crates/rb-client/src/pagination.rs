//! Cursor pagination as a lazy item sequence.

use std::collections::VecDeque;
use std::future::Future;

use futures::Stream;
use tracing::debug;

use crate::error::Result;

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

/// Turns a `fetch(cursor) -> Page` operation into a sequence of items.
///
/// Pages are requested strictly one after another, starting with no cursor,
/// and at most one page is buffered. The sequence ends when a page has no
/// next cursor or no items. A fetch error is yielded once and ends the
/// sequence; construct a new iterator to start over.
pub struct PaginationIterator<T, F> {
    fetch: F,
    buffer: VecDeque<T>,
    cursor: Option<String>,
    pages: usize,
    exhausted: bool,
}

impl<T, F, Fut> PaginationIterator<T, F>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            buffer: VecDeque::new(),
            cursor: None,
            pages: 0,
            exhausted: false,
        }
    }

    /// Number of pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub async fn next(&mut self) -> Option<Result<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }

            match (self.fetch)(self.cursor.take()).await {
                Ok(page) => {
                    self.pages += 1;
                    debug!(
                        page = self.pages,
                        items = page.items.len(),
                        has_next = page.next_cursor.is_some(),
                        "Fetched page"
                    );
                    if page.items.is_empty() || page.next_cursor.is_none() {
                        self.exhausted = true;
                    }
                    self.cursor = page.next_cursor;
                    self.buffer.extend(page.items);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::unfold(self, |mut pages| async move {
            let item = pages.next().await?;
            Some((item, pages))
        })
    }
}
