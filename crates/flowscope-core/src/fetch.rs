use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::FlowError;
use crate::models::{FlowQuery, FlowRecord};

pub const DEFAULT_THRESHOLD: usize = 90_000;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// The external flow data source. A single call returns at most
/// `query.max_records()` records for the query's window.
#[allow(async_fn_in_trait)]
pub trait FlowSource {
    async fn query(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>, FlowError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    /// Result count at or above which a window is treated as truncated.
    pub threshold: usize,
    /// Sub-window fetches in flight at once.
    pub concurrency: usize,
}

impl FetchSettings {
    /// A zero threshold would split even empty windows down to the clock
    /// resolution.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.threshold == 0 {
            return Err(FlowError::InvalidThreshold);
        }
        Ok(())
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// A window that still hit the threshold but could not be split further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationWarning {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub returned: usize,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<FlowRecord>,
    /// Leaf windows whose results were accepted.
    pub windows: usize,
    pub truncated: Vec<TruncationWarning>,
}

impl FetchOutcome {
    fn append(&mut self, other: FetchOutcome) {
        self.records.extend(other.records);
        self.windows += other.windows;
        self.truncated.extend(other.truncated);
    }

    pub fn total_connections(&self) -> u64 {
        self.records.iter().map(|r| r.connections).sum()
    }
}

pub struct Fetcher<'a, S> {
    source: &'a S,
    settings: FetchSettings,
}

impl<'a, S: FlowSource> Fetcher<'a, S> {
    pub fn new(source: &'a S, settings: FetchSettings) -> Self {
        Self { source, settings }
    }

    /// Fetch every record in the query's window, bisecting any window whose
    /// result count reaches the threshold.
    ///
    /// Leaves are concatenated in window order no matter which finished
    /// first. The first failing sub-fetch aborts the whole fetch and drops
    /// the requests still in flight.
    pub async fn fetch(&self, query: &FlowQuery) -> Result<FetchOutcome, FlowError> {
        self.settings.validate()?;
        let limit = self.settings.concurrency.max(1);
        let mut pending = VecDeque::from([query.clone()]);
        let mut in_flight = FuturesUnordered::new();
        let mut leaves: Vec<(DateTime<Utc>, Vec<FlowRecord>)> = Vec::new();
        let mut truncated = Vec::new();

        loop {
            while in_flight.len() < limit {
                match pending.pop_front() {
                    Some(window) => in_flight.push(self.fetch_window(window)),
                    None => break,
                }
            }

            let Some(result) = in_flight.next().await else {
                break;
            };
            let (window, records) = result?;

            if records.len() >= self.settings.threshold {
                if let Some((left, right)) = window.split() {
                    tracing::debug!(
                        start = %window.start(),
                        end = %window.end(),
                        returned = records.len(),
                        "window at threshold, bisecting"
                    );
                    pending.push_back(left);
                    pending.push_back(right);
                    continue;
                }
                tracing::warn!(
                    start = %window.start(),
                    end = %window.end(),
                    returned = records.len(),
                    "possible truncation: window cannot be split further"
                );
                truncated.push(TruncationWarning {
                    start: window.start(),
                    end: window.end(),
                    returned: records.len(),
                });
            }

            leaves.push((window.start(), records));
        }

        leaves.sort_by_key(|(start, _)| *start);
        let windows = leaves.len();
        let records: Vec<_> = leaves.into_iter().flat_map(|(_, r)| r).collect();
        tracing::info!(
            records = records.len(),
            windows,
            start = %query.start(),
            end = %query.end(),
            "fetch complete"
        );

        Ok(FetchOutcome { records, windows, truncated })
    }

    async fn fetch_window(&self, window: FlowQuery) -> Result<(FlowQuery, Vec<FlowRecord>), FlowError> {
        let records = self.source.query(&window).await?;
        Ok((window, records))
    }

    /// Run each query in turn and concatenate the results. Group-restricted
    /// queries come as a source-side and a destination-side pair, so a flow
    /// with the group on both ends appears once per side.
    pub async fn fetch_all(&self, queries: &[FlowQuery]) -> Result<FetchOutcome, FlowError> {
        let mut outcome = FetchOutcome::default();
        for query in queries {
            outcome.append(self.fetch(query).await?);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, PolicyVerdict};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Holds a fixed dataset and reports more than the threshold for any
    /// window wider than `max_width`.
    struct SyntheticSource {
        records: Vec<FlowRecord>,
        max_width: Duration,
        threshold: usize,
        seen: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl FlowSource for SyntheticSource {
        async fn query(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>, FlowError> {
            self.seen.lock().unwrap().push((query.start(), query.end()));
            let mut hits: Vec<_> = self
                .records
                .iter()
                .filter(|r| r.first_seen >= query.start() && r.first_seen < query.end())
                .cloned()
                .collect();
            if query.end() - query.start() > self.max_width {
                hits.truncate(self.threshold);
                while hits.len() < self.threshold {
                    hits.push(hits.first().cloned().unwrap_or_else(|| flow(query.start(), 1)));
                }
            }
            Ok(hits)
        }
    }

    struct FailingSource;

    impl FlowSource for FailingSource {
        async fn query(&self, _query: &FlowQuery) -> Result<Vec<FlowRecord>, FlowError> {
            Err(FlowError::TransportFailure("401 Unauthorized".into()))
        }
    }

    /// Answers wide windows with a full page and fails on any sub-window
    /// starting at or after `fail_from`.
    struct SubWindowFailure {
        fail_from: DateTime<Utc>,
        threshold: usize,
        calls: Mutex<usize>,
    }

    impl FlowSource for SubWindowFailure {
        async fn query(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>, FlowError> {
            *self.calls.lock().unwrap() += 1;
            if query.end() - query.start() > Duration::days(1) {
                return Ok(vec![flow(query.start(), 1); self.threshold]);
            }
            if query.start() >= self.fail_from {
                return Err(FlowError::TransportFailure("503 Service Unavailable".into()));
            }
            Ok(vec![flow(query.start(), 1)])
        }
    }

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    fn flow(at: DateTime<Utc>, n: u64) -> FlowRecord {
        FlowRecord {
            src: Endpoint::ip("10.0.0.1"),
            dst: Endpoint::ip("10.0.0.2"),
            port: 443,
            proto: 6,
            verdict: PolicyVerdict::Allowed,
            first_seen: at,
            last_seen: at,
            connections: n,
        }
    }

    fn query(start: DateTime<Utc>, end: DateTime<Utc>) -> FlowQuery {
        let verdicts: BTreeSet<_> = PolicyVerdict::ALL.into_iter().collect();
        FlowQuery::new(start, end, verdicts, 100).unwrap()
    }

    fn ground_truth() -> Vec<FlowRecord> {
        // Three flows every six hours over ten days.
        (0..40)
            .flat_map(|i| {
                let at = day(0) + Duration::hours(6 * i);
                (1..=3).map(move |n| flow(at + Duration::minutes(n), n as u64))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_bisects_until_leaves_fit() {
        let truth = ground_truth();
        let source = SyntheticSource {
            records: truth.clone(),
            max_width: Duration::days(1),
            threshold: 50,
            seen: Mutex::new(Vec::new()),
        };
        let settings = FetchSettings { threshold: 50, concurrency: 3 };
        let outcome = Fetcher::new(&source, settings)
            .fetch(&query(day(0), day(10)))
            .await
            .unwrap();

        assert!(outcome.truncated.is_empty());
        assert_eq!(outcome.records, truth);
        assert_eq!(outcome.total_connections(), truth.iter().map(|r| r.connections).sum::<u64>());

        // Every accepted leaf is at most one day wide, and leaves tile the
        // full range without gaps or overlap.
        let seen = source.seen.lock().unwrap();
        let mut leaves: Vec<_> = seen
            .iter()
            .filter(|(s, e)| *e - *s <= Duration::days(1))
            .copied()
            .collect();
        leaves.sort();
        assert_eq!(leaves.len(), outcome.windows);
        assert_eq!(leaves.first().unwrap().0, day(0));
        assert_eq!(leaves.last().unwrap().1, day(10));
        for pair in leaves.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[tokio::test]
    async fn test_below_threshold_is_single_request() {
        let source = SyntheticSource {
            records: vec![flow(day(1), 5)],
            max_width: Duration::days(365),
            threshold: 50,
            seen: Mutex::new(Vec::new()),
        };
        let outcome = Fetcher::new(&source, FetchSettings { threshold: 50, concurrency: 1 })
            .fetch(&query(day(0), day(10)))
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.windows, 1);
        assert_eq!(source.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsplittable_window_warns_and_keeps_records() {
        let start = day(0);
        let end = start + Duration::nanoseconds(1);
        let source = SyntheticSource {
            records: vec![flow(start, 1), flow(start, 2)],
            max_width: Duration::zero(),
            threshold: 2,
            seen: Mutex::new(Vec::new()),
        };
        let outcome = Fetcher::new(&source, FetchSettings { threshold: 2, concurrency: 2 })
            .fetch(&query(start, end))
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(
            outcome.truncated,
            vec![TruncationWarning { start, end, returned: 2 }]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let err = Fetcher::new(&FailingSource, FetchSettings::default())
            .fetch_all(&[query(day(0), day(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn test_failed_sub_window_discards_completed_leaves() {
        let source = SubWindowFailure {
            fail_from: day(1),
            threshold: 10,
            calls: Mutex::new(0),
        };
        let err = Fetcher::new(&source, FetchSettings { threshold: 10, concurrency: 1 })
            .fetch(&query(day(0), day(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::TransportFailure(_)));
        // The full window and both halves were requested before the failure surfaced.
        assert_eq!(*source.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_zero_threshold_rejected_before_any_request() {
        let source = SyntheticSource {
            records: Vec::new(),
            max_width: Duration::days(365),
            threshold: 0,
            seen: Mutex::new(Vec::new()),
        };
        let err = Fetcher::new(&source, FetchSettings { threshold: 0, concurrency: 4 })
            .fetch(&query(day(0), day(1) + Duration::microseconds(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidThreshold));
        assert!(source.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_settings_validate() {
        assert!(FetchSettings::default().validate().is_ok());
        assert!(FetchSettings { threshold: 1, concurrency: 1 }.validate().is_ok());
        assert!(matches!(
            FetchSettings { threshold: 0, concurrency: 1 }.validate(),
            Err(FlowError::InvalidThreshold)
        ));
    }

    #[tokio::test]
    async fn test_fetch_all_concatenates_queries() {
        let source = SyntheticSource {
            records: vec![flow(day(1), 2)],
            max_width: Duration::days(365),
            threshold: 50,
            seen: Mutex::new(Vec::new()),
        };
        let q = query(day(0), day(3));
        let outcome = Fetcher::new(&source, FetchSettings { threshold: 50, concurrency: 2 })
            .fetch_all(&[q.clone(), q])
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.windows, 2);
    }
}
