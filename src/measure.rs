//! Decoding of `getmeasure` columnar records into `MeasurePoint`s.
//!
//! A record carries `beg_time`, `step_time` and an array of rows; row `i` is the
//! sample taken at `beg_time + i * step_time`. Each row is a fixed-arity tuple
//! `[sum_boiler_on, sum_boiler_off, temperature, sp_temperature]`.
//!
//! Corruption is tolerated at the finest grain available: a record with an
//! unusable time base is dropped, a row that is not an array is skipped, and a
//! single bad cell only zeroes its own field.

use crate::models::netatmo::{MeasurePoint, MeasureRecord};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

/// Measurement types requested from `getmeasure`, in row order.
pub const MEASURE_TYPES: &str = "sum_boiler_on,sum_boiler_off,temperature,sp_temperature";
/// Aggregation scale requested from `getmeasure`.
pub const MEASURE_SCALE: &str = "5min";

const ROW_ARITY: usize = 4;
const SUM_BOILER_ON_SLOT: usize = 0;
const SUM_BOILER_OFF_SLOT: usize = 1;
const TEMPERATURE_SLOT: usize = 2;
// Setpoint has always been exported from the temperature column.
const SETPOINT_SLOT: usize = TEMPERATURE_SLOT;

/// Decode every record, concatenating their points in input order.
pub fn decode_records(records: &[MeasureRecord]) -> Vec<MeasurePoint> {
    let mut points = Vec::new();
    for (index, record) in records.iter().enumerate() {
        decode_record(index, record, &mut points);
    }
    points
}

fn decode_record(index: usize, record: &MeasureRecord, out: &mut Vec<MeasurePoint>) {
    let beg_time = match u64::deserialize(&record.beg_time).map(i64::try_from) {
        Ok(Ok(t)) => t,
        Ok(Err(e)) => {
            warn!("Measure record {} dropped: beg_time out of range: {}", index, e);
            return;
        }
        Err(e) => {
            warn!("Measure record {} dropped: invalid beg_time: {}", index, e);
            return;
        }
    };
    let step_time = match u32::deserialize(&record.step_time) {
        Ok(s) => i64::from(s),
        Err(e) => {
            warn!("Measure record {} dropped: invalid step_time: {}", index, e);
            return;
        }
    };
    let Some(rows) = record.value.as_array() else {
        warn!("Measure record {} dropped: `value` is not an array", index);
        return;
    };

    for (row_index, row) in rows.iter().enumerate() {
        let Some(time) = i64::try_from(row_index)
            .ok()
            .and_then(|i| i.checked_mul(step_time))
            .and_then(|offset| beg_time.checked_add(offset))
        else {
            warn!(
                "Measure record {} truncated at row {}: timestamp overflow",
                index, row_index
            );
            return;
        };
        let Some(cells) = row.as_array() else {
            debug!("Measure record {} row {} skipped: not an array", index, row_index);
            continue;
        };
        out.push(decode_row(time, cells));
    }
}

fn decode_row(time: i64, cells: &[Value]) -> MeasurePoint {
    if cells.len() != ROW_ARITY {
        debug!("Measure row at {} has {} cells, expected {}", time, cells.len(), ROW_ARITY);
    }
    MeasurePoint {
        time,
        sum_boiler_on: cell(cells, SUM_BOILER_ON_SLOT, time),
        sum_boiler_off: cell(cells, SUM_BOILER_OFF_SLOT, time),
        measured_temperature: cell(cells, TEMPERATURE_SLOT, time),
        setpoint_temperature: cell(cells, SETPOINT_SLOT, time),
    }
}

fn cell<'a, T>(cells: &'a [Value], slot: usize, time: i64) -> T
where
    T: Deserialize<'a> + Default,
{
    let Some(raw) = cells.get(slot) else {
        debug!("Measure row at {}: slot {} missing", time, slot);
        return T::default();
    };
    T::deserialize(raw).unwrap_or_else(|e| {
        debug!("Measure row at {}: slot {} unreadable ({}): {}", time, slot, raw, e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> MeasureRecord {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn row_timestamps_follow_begin_and_step() {
        let records = vec![record(json!({
            "beg_time": 1000,
            "step_time": 300,
            "value": [[1, 2, 20.0, 20.0], [3, 4, 20.5, 20.5], [5, 6, 21.0, 21.0]]
        }))];

        let points = decode_records(&records);
        let times: Vec<i64> = points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![1000, 1300, 1600]);
        assert_eq!(points[1].sum_boiler_on, 3);
        assert_eq!(points[1].sum_boiler_off, 4);
        assert_eq!(points[2].measured_temperature, 21.0);
    }

    #[test]
    fn records_are_concatenated_in_input_order() {
        let records = vec![
            record(json!({"beg_time": 5000, "step_time": 60, "value": [[0, 0, 18.0, 18.0]]})),
            record(json!({"beg_time": 100, "step_time": 60, "value": [[0, 0, 19.0, 19.0], [0, 0, 19.5, 19.5]]})),
        ];

        let points = decode_records(&records);
        let times: Vec<i64> = points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![5000, 100, 160]);
    }

    #[test]
    fn malformed_cell_zeroes_only_its_field() {
        let records = vec![record(json!({
            "beg_time": 0,
            "step_time": 300,
            "value": [[7, "n/a", 19.5, 19.5]]
        }))];

        let points = decode_records(&records);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].sum_boiler_on, 7);
        assert_eq!(points[0].sum_boiler_off, 0);
        assert_eq!(points[0].measured_temperature, 19.5);
        assert_eq!(points[0].setpoint_temperature, 19.5);
    }

    #[test]
    fn short_and_null_rows_decode_with_zero_fields() {
        let records = vec![record(json!({
            "beg_time": 0,
            "step_time": 300,
            "value": [[null, 12], [1]]
        }))];

        let points = decode_records(&records);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].sum_boiler_on, 0);
        assert_eq!(points[0].sum_boiler_off, 12);
        assert_eq!(points[0].measured_temperature, 0.0);
        assert_eq!(points[1].time, 300);
        assert_eq!(points[1].sum_boiler_on, 1);
    }

    #[test]
    fn records_with_bad_time_base_are_dropped() {
        let records = vec![
            record(json!({"beg_time": "yesterday", "step_time": 300, "value": [[1, 0, 20.0, 20.0]]})),
            record(json!({"beg_time": 1000, "step_time": -5, "value": [[1, 0, 20.0, 20.0]]})),
            record(json!({"step_time": 300, "value": [[1, 0, 20.0, 20.0]]})),
            record(json!({"beg_time": 2000, "step_time": 300, "value": [[2, 0, 21.0, 21.0]]})),
        ];

        let points = decode_records(&records);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].time, 2000);
        assert_eq!(points[0].sum_boiler_on, 2);
    }

    #[test]
    fn non_array_rows_are_skipped_but_keep_their_slot() {
        let records = vec![record(json!({
            "beg_time": 0,
            "step_time": 60,
            "value": [[1, 0, 20.0, 20.0], "garbage", [3, 0, 22.0, 22.0]]
        }))];

        let points = decode_records(&records);
        let times: Vec<i64> = points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0, 120]);
    }

    #[test]
    fn fixture_decodes_into_points() {
        let json = std::fs::read_to_string("tests/data/getmeasure.json").expect("fixture present");
        let response: Value = serde_json::from_str(&json).expect("parse measure fixture");
        let records: Vec<MeasureRecord> = serde_json::from_value(response["body"].clone()).expect("records");

        let points = decode_records(&records);
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].time, 1_700_000_000);
        assert_eq!(points[2].time, 1_700_000_600);
        assert_eq!(points[3].time, 1_700_001_200);
        assert_eq!(points[3].measured_temperature, 20.1);
    }
}
