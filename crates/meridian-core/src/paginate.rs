//! Lazy cursor pagination over page-token listing APIs.
//!
//! [`pages`] turns a single-page fetch primitive into a lazy stream of item
//! batches; [`items`] flattens it. Termination is driven strictly by cursor
//! state: a page with an empty/absent continuation token ends the sequence,
//! while an empty item batch mid-range is skipped and pagination continues.
//! No fetch is ever issued after the terminal cursor state, and page N+1 is
//! only requested once page N has been yielded — its token is not known
//! earlier.
//!
//! Streams are restartable by construction: every call builds a fresh cursor
//! from the original request, so re-obtaining a stream re-enumerates from the
//! first page regardless of any previously exhausted stream's state.

use std::future::Future;

use futures_util::stream::{self, Stream, StreamExt};

use crate::error::MeridianError;

/// Advancing position within one pagination sequence.
///
/// Each live stream owns its own cursor; cursors are never shared between
/// concurrent sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Continuation token from the previous page; `None` before the first
    /// fetch.
    pub token: Option<String>,
    /// Requested page size, forwarded to every fetch.
    pub page_size: Option<u32>,
}

impl PageCursor {
    pub fn new(page_size: Option<u32>) -> Self {
        Self {
            token: None,
            page_size,
        }
    }
}

/// One fetched page: an ordered item batch plus the continuation token.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` or empty means this was the last page.
    pub next_token: Option<String>,
}

/// Lazy stream of non-empty item batches, one per fetched page.
///
/// `fetch` is invoked with the current cursor for every pull; an error is
/// yielded once and ends the sequence.
pub fn pages<T, F, Fut>(
    cursor: PageCursor,
    fetch: F,
) -> impl Stream<Item = Result<Vec<T>, MeridianError>> + Send
where
    T: Send + 'static,
    F: Fn(PageCursor) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Page<T>, MeridianError>> + Send,
{
    stream::unfold(
        (Some(cursor), fetch),
        |(state, fetch)| async move {
            let mut cursor = state?;
            loop {
                let page = match fetch(cursor.clone()).await {
                    Ok(page) => page,
                    Err(err) => return Some((Err(err), (None, fetch))),
                };

                let next = page
                    .next_token
                    .filter(|token| !token.is_empty())
                    .map(|token| PageCursor {
                        token: Some(token),
                        page_size: cursor.page_size,
                    });

                if page.items.is_empty() {
                    // An empty batch mid-range is legitimate; only the cursor
                    // decides termination.
                    match next {
                        Some(next_cursor) => {
                            cursor = next_cursor;
                            continue;
                        }
                        None => return None,
                    }
                }

                return Some((Ok(page.items), (next, fetch)));
            }
        },
    )
}

/// Lazy stream of individual items across all pages.
pub fn items<T, F, Fut>(
    cursor: PageCursor,
    fetch: F,
) -> impl Stream<Item = Result<T, MeridianError>> + Send
where
    T: Send + 'static,
    F: Fn(PageCursor) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Page<T>, MeridianError>> + Send,
{
    flatten_batches(pages(cursor, fetch))
}

/// Flatten a stream of item batches into a stream of items, passing batch
/// errors through in place.
pub fn flatten_batches<T, S>(batches: S) -> impl Stream<Item = Result<T, MeridianError>> + Send
where
    T: Send + 'static,
    S: Stream<Item = Result<Vec<T>, MeridianError>> + Send,
{
    batches.flat_map(|batch| match batch {
        Ok(items) => stream::iter(items.into_iter().map(Ok)).left_stream(),
        Err(err) => stream::once(std::future::ready(Err(err))).right_stream(),
    })
}

/// Generic wire envelope for paginated listing responses: one data field
/// (`"bars"`, `"orders"`, ...) alongside the continuation token. Decoding the
/// data field is deferred so every endpoint shares this one shape.
#[derive(Debug, serde::Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl PageEnvelope {
    /// Decode and remove the named data field. A missing or `null` field
    /// decodes to `T::default()` (an empty batch), not an error.
    pub fn take<T>(&mut self, field: &str) -> Result<T, MeridianError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.extra.remove(field) {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| MeridianError::Parse(format!("bad `{field}` payload: {e}"))),
        }
    }
}
