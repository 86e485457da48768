//! Streaming aggregate computations over historical sequences.
//!
//! Aggregates consume the lazy item streams incrementally — one page in
//! flight at a time, nothing materialized — so they are safe over windows of
//! any size.

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};

use meridian_core::error::MeridianError;

use crate::historical::{BarsRequest, HistoricalClient, Timeframe};

/// Incremental mean accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverage {
    sum: f64,
    count: u64,
}

impl RunningAverage {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observed values; `0.0` when nothing was observed.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Average-volume result for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    /// Number of bars that contributed.
    pub count: u64,
    pub average_volume: f64,
}

/// Fold a stream of values into a [`RunningAverage`], stopping after `cap`
/// values when one is given.
///
/// A `cap` of zero consumes nothing and returns the empty accumulator — an
/// empty window is a valid request, not an error. An empty source stream
/// likewise yields the empty accumulator.
pub async fn running_average<S>(values: S, cap: Option<u64>) -> Result<RunningAverage, MeridianError>
where
    S: Stream<Item = Result<f64, MeridianError>>,
{
    let mut acc = RunningAverage::default();
    if cap == Some(0) {
        return Ok(acc);
    }

    let mut values = std::pin::pin!(values);
    while let Some(value) = values.next().await {
        acc.push(value?);
        if Some(acc.count()) == cap {
            break;
        }
    }
    Ok(acc)
}

/// Average daily traded volume for `symbol` over the `window_days` ending at
/// `end`.
pub async fn average_daily_volume(
    client: &HistoricalClient,
    symbol: &str,
    window_days: u32,
    end: DateTime<Utc>,
) -> Result<VolumeStats, MeridianError> {
    if window_days == 0 {
        return Ok(VolumeStats {
            count: 0,
            average_volume: 0.0,
        });
    }

    let start = end - chrono::Duration::days(window_days as i64);
    let request = BarsRequest::new(symbol, Timeframe::Day, start, end);
    let volumes = client.bars(&request).map(|bar| bar.map(|b| b.volume as f64));

    let acc = running_average(volumes, Some(window_days as u64)).await?;
    Ok(VolumeStats {
        count: acc.count(),
        average_volume: acc.average(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;

    use meridian_core::paginate::{self, Page, PageCursor};

    use super::*;

    /// Volumes 1..=10 split across three pages behind a counting fetcher.
    fn paged_volumes() -> (
        impl Stream<Item = Result<f64, MeridianError>> + Send,
        Arc<AtomicUsize>,
    ) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetches_inner = Arc::clone(&fetches);

        let stream = paginate::items(PageCursor::default(), move |cursor: PageCursor| {
            let fetches = Arc::clone(&fetches_inner);
            async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                let page = match cursor.token.as_deref() {
                    None => Page {
                        items: vec![1.0, 2.0, 3.0, 4.0],
                        next_token: Some("p2".into()),
                    },
                    Some("p2") => Page {
                        items: vec![5.0, 6.0, 7.0],
                        next_token: Some("p3".into()),
                    },
                    _ => Page {
                        items: vec![8.0, 9.0, 10.0],
                        next_token: None,
                    },
                };
                Ok(page)
            }
        });
        (stream, fetches)
    }

    #[tokio::test]
    async fn ten_volumes_average_to_five_and_a_half() {
        let (volumes, fetches) = paged_volumes();
        let acc = running_average(volumes, Some(10)).await.unwrap();
        assert_eq!(acc.count(), 10);
        assert_eq!(acc.average(), 5.5);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cap_stops_consumption_early() {
        let (volumes, fetches) = paged_volumes();
        let acc = running_average(volumes, Some(4)).await.unwrap();
        assert_eq!(acc.count(), 4);
        assert_eq!(acc.average(), 2.5);
        // Only the first page was ever fetched.
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_window_consumes_nothing_and_is_not_an_error() {
        let (volumes, fetches) = paged_volumes();
        let acc = running_average(volumes, Some(0)).await.unwrap();
        assert!(acc.is_empty());
        assert_eq!(acc.average(), 0.0);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_source_yields_empty_accumulator() {
        let acc = running_average(stream::empty(), None).await.unwrap();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.average(), 0.0);
    }

    #[tokio::test]
    async fn mid_stream_error_propagates() {
        let source = stream::iter(vec![
            Ok(1.0),
            Err(MeridianError::Parse("bad bar".into())),
            Ok(3.0),
        ]);
        let result = running_average(source, None).await;
        assert!(matches!(result, Err(MeridianError::Parse(_))));
    }
}
