//! Shared fixtures: record files shaped like an ensemble of pressure-level fields.

#![allow(dead_code)]

use msgcube::codec::{MessageRecord, RecordWriter};
use std::path::Path;

pub const NUMBERS: [i64; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
pub const DATES: [i64; 2] = [20170101, 20170102];
pub const TIMES: [i64; 2] = [0, 1200];
pub const LEVELS: [i64; 2] = [500, 850];

/// Parameters written by [`write_levels_members`]: (paramId, shortName, units, name).
pub const PARAMS: [(i64, &str, &str, &str); 2] = [
    (129, "z", "m**2 s**-2", "Geopotential"),
    (130, "t", "K", "Temperature"),
];

/// Value of point `i` of a field.
pub fn field_value(param: i64, number: i64, date: i64, time: i64, level: i64, i: usize) -> f64 {
    param as f64
        + number as f64 * 10.0
        + (date % 100) as f64
        + time as f64 / 100.0
        + level as f64 / 1000.0
        + i as f64 * 1e-4
}

/// One field on a regular `ni` x `nj` grid spanning the globe.
pub fn field_record(
    (param, short_name, units, name): (i64, &str, &str, &str),
    number: i64,
    date: i64,
    time: i64,
    level: i64,
    ni: i64,
    nj: i64,
) -> MessageRecord {
    let points = (ni * nj) as usize;
    let values = (0..points)
        .map(|i| field_value(param, number, date, time, level, i))
        .collect();
    MessageRecord::new()
        .long("edition", 1)
        .text("centre", "ecmf")
        .long("paramId", param)
        .text("shortName", short_name)
        .text("units", units)
        .text("name", name)
        .text("cfName", "unknown")
        .long("totalNumber", 10)
        .text("gridType", "regular_ll")
        .long("numberOfPoints", ni * nj)
        .text("stepType", "instant")
        .text("typeOfLevel", "isobaricInhPa")
        .long("number", number)
        .long("dataDate", date)
        .long("dataTime", time)
        .long("endStep", 0)
        .long("topLevel", level)
        .in_namespace("geography")
        .long("Ni", ni)
        .long("Nj", nj)
        .double("latitudeOfFirstGridPointInDegrees", 90.0)
        .double("latitudeOfLastGridPointInDegrees", -90.0)
        .double("longitudeOfFirstGridPointInDegrees", 0.0)
        .double("longitudeOfLastGridPointInDegrees", 360.0 - 360.0 / ni as f64)
        .double("iDirectionIncrementInDegrees", 360.0 / ni as f64)
        .double("jDirectionIncrementInDegrees", 180.0 / (nj - 1) as f64)
        .long("jPointsAreConsecutive", 0)
        .in_namespace("")
        .doubles("values", values)
}

/// Writes every combination of parameter, number, date, time and level.
///
/// The scan order is parameter, number, date, time, level, so each parameter
/// contributes 80 messages.
pub fn write_levels_members(path: &Path, ni: i64, nj: i64) {
    let mut writer = RecordWriter::create(path).unwrap();
    for param in PARAMS {
        for number in NUMBERS {
            for date in DATES {
                for time in TIMES {
                    for level in LEVELS {
                        writer
                            .write(&field_record(param, number, date, time, level, ni, nj))
                            .unwrap();
                    }
                }
            }
        }
    }
    writer.finish().unwrap();
}
