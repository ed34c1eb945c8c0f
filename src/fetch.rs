//! One collection cycle against the vendor API.
//!
//! The home list supplies identity and naming, the per-home status fills in
//! live fields, and every module of the merged home gets its latest
//! measurement from the requested window.

use crate::client::{ClientError, HomesApi, MeasureQuery};
use crate::measure::decode_records;
use crate::merge::merge;
use crate::models::netatmo::{Home, MeasurePoint, Module};
use chrono::{DateTime, Utc};
use log::{debug, warn};

/// Result of the measurement lookup for one module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasureOutcome {
    /// Newest decoded point in the window.
    Latest(MeasurePoint),
    /// The call succeeded but the window held no points.
    Empty,
    /// The call failed; the error has been logged.
    Failed,
}

/// A merged home with every module's latest measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeRecord {
    pub home: Home,
    pub modules: Vec<ModuleRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub module: Module,
    pub measure: MeasureOutcome,
}

/// Fetch, merge and measure every module of every home.
///
/// Only a failure of the home list aborts the cycle; status and measurement
/// failures are logged and degrade the affected home or module. Homes without
/// modules are still returned so their rooms can be published.
pub fn collect<A: HomesApi + ?Sized>(
    api: &A,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<HomeRecord>, ClientError> {
    let homes = api.homes_data()?.homes;
    debug!("homesdata returned {} home(s)", homes.len());

    let mut records = Vec::with_capacity(homes.len());
    for listed in homes {
        let home = match api.home_status(&listed.id) {
            Ok(status) => merge(&listed, &status.home),
            Err(e) => {
                warn!("homestatus({}) failed, publishing home list data only: {}", listed.id.0, e);
                listed
            }
        };

        let modules = home
            .modules
            .iter()
            .map(|module| ModuleRecord {
                module: module.clone(),
                measure: latest_measure(api, module, since, until),
            })
            .collect();
        records.push(HomeRecord { home, modules });
    }
    Ok(records)
}

fn latest_measure<A: HomesApi + ?Sized>(
    api: &A,
    module: &Module,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> MeasureOutcome {
    // Relays are queried directly; bridged modules through their relay.
    let query = if module.bridge.is_empty() {
        MeasureQuery {
            device_id: &module.id.0,
            module_id: None,
            date_begin: since,
            date_end: until,
        }
    } else {
        MeasureQuery {
            device_id: &module.bridge,
            module_id: Some(&module.id),
            date_begin: since,
            date_end: until,
        }
    };

    match api.measure(&query) {
        Ok(records) => latest_in_window(&decode_records(&records), since, until),
        Err(e) => {
            warn!("getmeasure({}) failed: {}", module.id.0, e);
            MeasureOutcome::Failed
        }
    }
}

/// Newest point inside `[since, until)`. The vendor treats `date_end` as
/// inclusive, so a point at `until` belongs to the next window.
fn latest_in_window(points: &[MeasurePoint], since: DateTime<Utc>, until: DateTime<Utc>) -> MeasureOutcome {
    let window = since.timestamp()..until.timestamp();
    match points.iter().rev().find(|p| window.contains(&p.time)) {
        Some(point) => MeasureOutcome::Latest(*point),
        None => MeasureOutcome::Empty,
    }
}
