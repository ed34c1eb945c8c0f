//! A scrape pass: window, collect, cache update, render.

use crate::cache::SnapshotCache;
use crate::client::HomesApi;
use crate::emit::{Sample, render};
use crate::exposition::{ExpositionError, encode};
use crate::fetch::collect;
use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info};
use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Owns the vendor API handle and the snapshot cache.
///
/// The cache lock is held for a whole pass, so concurrent scrapes run one
/// after another and each sees the previous pass's watermark.
pub struct Exporter<A> {
    api: A,
    cache: Mutex<SnapshotCache>,
}

impl<A: HomesApi> Exporter<A> {
    pub fn new(api: A, initial_lookback: TimeDelta) -> Self {
        Exporter {
            api,
            cache: Mutex::new(SnapshotCache::new(initial_lookback)),
        }
    }

    /// Run one full pass at `now` and return the rendered samples.
    pub fn scrape(&self, now: DateTime<Utc>) -> Vec<Sample> {
        self.pass(self.cache.lock(), now)
    }

    /// Like [`Exporter::scrape`], but returns `None` when another pass still
    /// holds the cache after `wait`.
    pub fn try_scrape(&self, now: DateTime<Utc>, wait: Duration) -> Option<Vec<Sample>> {
        let cache = self.cache.try_lock_for(wait)?;
        Some(self.pass(cache, now))
    }

    /// [`Exporter::try_scrape`] encoded in the Prometheus text format.
    pub fn try_scrape_text(&self, now: DateTime<Utc>, wait: Duration) -> Option<Result<String, ExpositionError>> {
        self.try_scrape(now, wait).map(|samples| encode(&samples))
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.cache.lock().watermark()
    }

    fn pass(&self, mut cache: MutexGuard<'_, SnapshotCache>, now: DateTime<Utc>) -> Vec<Sample> {
        let started = Instant::now();
        let (since, until) = cache.window(now);

        match collect(&self.api, since, until) {
            Ok(homes) => {
                let home_count = homes.len();
                let module_count: usize = homes.iter().map(|h| h.modules.len()).sum();
                let measured = cache.update(homes, now);
                info!(
                    "Scrape complete: {} home(s), {} module(s), {} new measurement(s), window {}..{} in {}ms",
                    home_count,
                    module_count,
                    measured,
                    since.timestamp(),
                    until.timestamp(),
                    started.elapsed().as_millis()
                );
                render(&cache, true)
            }
            Err(e) => {
                error!("Scrape failed: {}", e);
                render(&cache, false)
            }
        }
    }
}
