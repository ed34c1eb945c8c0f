//! Fill-gaps reconciliation of two partial views of the same entity.
//!
//! `primary` wins on every field unless that field holds its zero value (empty
//! string, `0`, `false`, empty collection), in which case `secondary` fills it.
//!
//! Known limitation: a zero value cannot be told apart from an absent one, so a
//! primary view that legitimately reports `battery_level = 0` or
//! `open_window = false` is overridden by a non-zero secondary value.

use crate::models::netatmo::{Home, Module, Room};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

pub trait Merge {
    /// Fill every zero-valued field of `self` from `secondary`.
    fn merge_from(&mut self, secondary: &Self);
}

/// Merge `secondary` into a copy of `primary`.
pub fn merge<T: Merge + Clone>(primary: &T, secondary: &T) -> T {
    let mut merged = primary.clone();
    merged.merge_from(secondary);
    merged
}

fn fill<T: Default + PartialEq + Clone>(field: &mut T, secondary: &T) {
    if *field == T::default() {
        *field = secondary.clone();
    }
}

/// Merge two id-keyed collections.
///
/// Entries in both are merged field-wise, entries only in `primary` are kept as
/// they are, and the first `secondary` entry of every unseen id is appended.
fn merge_by_id<T, K>(primary: &mut Vec<T>, secondary: &[T], key: impl Fn(&T) -> &K)
where
    T: Merge + Clone,
    K: Eq + Hash + Clone,
{
    let mut by_id: HashMap<&K, &T> = HashMap::with_capacity(secondary.len());
    for item in secondary {
        by_id.entry(key(item)).or_insert(item);
    }

    let mut seen: HashSet<K> = HashSet::with_capacity(primary.len() + secondary.len());
    for item in primary.iter_mut() {
        if let Some(other) = by_id.get(key(item)) {
            item.merge_from(other);
        }
        seen.insert(key(item).clone());
    }

    for item in secondary {
        if seen.insert(key(item).clone()) {
            primary.push(item.clone());
        }
    }
}

impl Merge for Room {
    fn merge_from(&mut self, secondary: &Self) {
        fill(&mut self.id, &secondary.id);
        fill(&mut self.name, &secondary.name);
        fill(&mut self.reachable, &secondary.reachable);
        fill(&mut self.anticipating, &secondary.anticipating);
        fill(&mut self.open_window, &secondary.open_window);
        fill(&mut self.measured_temperature, &secondary.measured_temperature);
        fill(&mut self.setpoint_temperature, &secondary.setpoint_temperature);
        fill(&mut self.setpoint_start_time, &secondary.setpoint_start_time);
        fill(&mut self.setpoint_end_time, &secondary.setpoint_end_time);
        fill(&mut self.setpoint_mode, &secondary.setpoint_mode);
    }
}

impl Merge for Module {
    fn merge_from(&mut self, secondary: &Self) {
        fill(&mut self.id, &secondary.id);
        fill(&mut self.reachable, &secondary.reachable);
        fill(&mut self.module_type, &secondary.module_type);
        fill(&mut self.bridge, &secondary.bridge);
        fill(&mut self.anticipating, &secondary.anticipating);
        fill(&mut self.firmware_revision, &secondary.firmware_revision);
        fill(&mut self.rf_strength, &secondary.rf_strength);
        fill(&mut self.wifi_strength, &secondary.wifi_strength);
        fill(&mut self.battery_level, &secondary.battery_level);
        fill(&mut self.battery_state, &secondary.battery_state);
        fill(&mut self.boiler_status, &secondary.boiler_status);
        fill(&mut self.room_id, &secondary.room_id);
    }
}

impl Merge for Home {
    fn merge_from(&mut self, secondary: &Self) {
        fill(&mut self.id, &secondary.id);
        fill(&mut self.name, &secondary.name);
        fill(&mut self.country, &secondary.country);
        fill(&mut self.altitude, &secondary.altitude);
        fill(&mut self.coordinates, &secondary.coordinates);
        merge_by_id(&mut self.rooms, &secondary.rooms, |r| &r.id);
        merge_by_id(&mut self.modules, &secondary.modules, |m| &m.id);
    }
}
