//! State carried between scrapes.
//!
//! The cache is owned by the `Exporter` and mutated by one pass at a time (the
//! owner serializes access). Entries are created on first sight of a home or
//! module and live for the rest of the process.

use crate::fetch::{HomeRecord, MeasureOutcome, ModuleRecord};
use crate::models::netatmo::{Home, HomeId, MeasurePoint, Module, ModuleId};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;

pub const DEFAULT_INITIAL_LOOKBACK_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    pub module: Module,
    pub last_measure: Option<MeasurePoint>,
    /// Set when this cycle's measurement call failed; `last_measure` is then stale.
    pub measure_failed: bool,
}

impl ModuleEntry {
    /// The point to publish this cycle, if any.
    pub fn current_measure(&self) -> Option<&MeasurePoint> {
        if self.measure_failed {
            None
        } else {
            self.last_measure.as_ref()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomeEntry {
    pub home: Home,
    pub modules: BTreeMap<ModuleId, ModuleEntry>,
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    entries: BTreeMap<HomeId, HomeEntry>,
    /// End of the last window that produced at least one measurement.
    last_measure: Option<DateTime<Utc>>,
    initial_lookback: TimeDelta,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        SnapshotCache::new(TimeDelta::seconds(DEFAULT_INITIAL_LOOKBACK_SECS as i64))
    }
}

impl SnapshotCache {
    pub fn new(initial_lookback: TimeDelta) -> Self {
        SnapshotCache {
            entries: BTreeMap::new(),
            last_measure: None,
            initial_lookback,
        }
    }

    /// Measurement window `[since, until)` for a pass running at `now`.
    ///
    /// On first use the watermark is initialised to `now - initial_lookback`.
    pub fn window(&mut self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let lookback = self.initial_lookback;
        let since = *self
            .last_measure
            .get_or_insert_with(|| now.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC));
        (since.min(now), now)
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.last_measure
    }

    /// Apply one successful collection. Returns how many modules reported a new point.
    ///
    /// Home and module data are replaced by the fresh records. The watermark
    /// moves to `now` only when at least one new point arrived, and never backwards.
    pub fn update(&mut self, homes: Vec<HomeRecord>, now: DateTime<Utc>) -> usize {
        let mut measured = 0;
        for HomeRecord { home, modules } in homes {
            let home_entry = self.entries.entry(home.id.clone()).or_insert_with(|| HomeEntry {
                home: Home::default(),
                modules: BTreeMap::new(),
            });
            home_entry.home = home;

            for ModuleRecord { module, measure } in modules {
                let module_entry = home_entry
                    .modules
                    .entry(module.id.clone())
                    .or_insert_with(|| ModuleEntry {
                        module: Module::default(),
                        last_measure: None,
                        measure_failed: false,
                    });
                module_entry.module = module;

                match measure {
                    MeasureOutcome::Latest(point) => {
                        module_entry.last_measure = Some(point);
                        module_entry.measure_failed = false;
                        measured += 1;
                    }
                    MeasureOutcome::Empty => module_entry.measure_failed = false,
                    MeasureOutcome::Failed => module_entry.measure_failed = true,
                }
            }
        }

        if measured > 0 {
            self.last_measure = Some(self.last_measure.map_or(now, |prev| prev.max(now)));
        }
        measured
    }

    pub fn homes(&self) -> impl Iterator<Item = &HomeEntry> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
