//! Semantic encodings: reference time, vertical levels and regular grids.

use super::{Attributes, Data, Variable};
use crate::error::{CubeError, Result};
use crate::message::KeyLookup;
use crate::value::Value;
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use tracing::debug;

/// Units of the `forecast_reference_time` coordinate.
pub const TIME_UNITS: &str = "seconds since 1970-01-01T00:00:00+00:00";

/// Calendar of the `forecast_reference_time` coordinate.
pub const TIME_CALENDAR: &str = "proleptic_gregorian";

/// Converts a `YYYYMMDD` date and an `HHMM` time to seconds since the Unix epoch.
///
/// Returns `None` when either value is not a valid calendar date or time of day.
pub fn date_time_to_epoch(date: i64, time: i64) -> Option<i64> {
    if date < 0 || time < 0 {
        return None;
    }
    let year = i32::try_from(date / 10_000).ok()?;
    let month = u32::try_from(date / 100 % 100).ok()?;
    let day = u32::try_from(date % 100).ok()?;
    let hour = u32::try_from(time / 100).ok()?;
    let minute = u32::try_from(time % 100).ok()?;

    let timestamp = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, 0)?
        .and_utc()
        .timestamp();
    Some(timestamp)
}

/// Inverse of [`date_time_to_epoch`], dropping seconds.
pub fn to_grib_date_time(seconds: i64) -> Option<(i64, i64)> {
    let instant = DateTime::from_timestamp(seconds, 0)?.naive_utc();
    let date = instant.year() as i64 * 10_000 + instant.month() as i64 * 100 + instant.day() as i64;
    let time = instant.hour() as i64 * 100 + instant.minute() as i64;
    Some((date, time))
}

/// Reads `dataDate` and `dataTime` and returns the reference time in seconds
/// since 1970-01-01T00:00:00 UTC.
pub fn from_grib_date_time(message: &dyn KeyLookup) -> Result<i64> {
    let date = integer_key(message, "dataDate")?;
    let time = integer_key(message, "dataTime")?;
    date_time_to_epoch(date, time).ok_or_else(|| {
        CubeError::DecodeFailure(format!(
            "invalid reference time: dataDate={} dataTime={}",
            date, time
        ))
    })
}

fn integer_key(message: &dyn KeyLookup, key: &str) -> Result<i64> {
    message
        .get_value(key)?
        .as_i64()
        .ok_or_else(|| CubeError::TypeMismatch {
            key: key.to_string(),
            expected: crate::value::NativeType::Long,
        })
}

/// CF attributes of the `forecast_reference_time` coordinate.
pub fn time_attributes() -> Attributes {
    attributes(&[
        ("units", TIME_UNITS),
        ("calendar", TIME_CALENDAR),
        ("standard_name", "forecast_reference_time"),
        ("long_name", "initial time of forecast"),
    ])
}

/// A level type and the coordinate it is encoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerticalLevel {
    /// Value of `typeOfLevel`.
    pub type_of_level: &'static str,
    /// Name of the vertical dimension.
    pub name: &'static str,
    /// Units of the level values.
    pub units: &'static str,
    /// Direction of increasing values, `up` or `down`.
    pub positive: &'static str,
    /// CF standard name.
    pub standard_name: &'static str,
}

/// Known level types.
pub const VERTICAL_LEVELS: &[VerticalLevel] = &[
    VerticalLevel {
        type_of_level: "isobaricInhPa",
        name: "air_pressure",
        units: "hPa",
        positive: "down",
        standard_name: "air_pressure",
    },
    VerticalLevel {
        type_of_level: "isobaricInPa",
        name: "air_pressure",
        units: "Pa",
        positive: "down",
        standard_name: "air_pressure",
    },
    VerticalLevel {
        type_of_level: "hybrid",
        name: "model_level",
        units: "1",
        positive: "down",
        standard_name: "atmosphere_hybrid_sigma_pressure_coordinate",
    },
    VerticalLevel {
        type_of_level: "heightAboveGround",
        name: "height",
        units: "m",
        positive: "up",
        standard_name: "height",
    },
    VerticalLevel {
        type_of_level: "heightAboveSea",
        name: "altitude",
        units: "m",
        positive: "up",
        standard_name: "altitude",
    },
    VerticalLevel {
        type_of_level: "depthBelowLandLayer",
        name: "depth",
        units: "m",
        positive: "down",
        standard_name: "depth",
    },
];

impl VerticalLevel {
    /// Looks up a level type by `typeOfLevel`.
    pub fn from_type_of_level(type_of_level: &str) -> Option<&'static VerticalLevel> {
        VERTICAL_LEVELS
            .iter()
            .find(|l| l.type_of_level == type_of_level)
    }

    /// Looks up a level type by coordinate name and units.
    pub fn from_coordinate(name: &str, units: Option<&str>) -> Option<&'static VerticalLevel> {
        let mut candidates = VERTICAL_LEVELS.iter().filter(|l| l.name == name);
        match units {
            Some(units) => candidates.find(|l| l.units == units),
            None => candidates.next(),
        }
    }

    /// CF attributes of the vertical coordinate.
    pub fn attributes(&self) -> Attributes {
        attributes(&[
            ("units", self.units),
            ("positive", self.positive),
            ("standard_name", self.standard_name),
            ("long_name", self.type_of_level),
        ])
    }
}

/// Horizontal layout of the grid points of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Grid {
    /// Row-major regular latitude/longitude grid.
    Regular {
        /// Number of points along a parallel.
        ni: usize,
        /// Number of points along a meridian.
        nj: usize,
        /// Latitudes, first to last.
        latitudes: Vec<f64>,
        /// Longitudes, first to last.
        longitudes: Vec<f64>,
    },
    /// Flat `i` dimension.
    Flat {
        /// Number of grid points.
        points: usize,
    },
}

impl Grid {
    /// Detects a regular grid from the keys of `message`.
    ///
    /// Falls back to [`Grid::Flat`] when the grid is not `regular_ll`, is
    /// column-major, or its `Ni * Nj` differs from `points`.
    pub fn detect(message: &dyn KeyLookup, points: usize) -> Grid {
        match regular_grid(message, points) {
            Some(grid) => grid,
            None => {
                debug!("Grid is not a row-major regular_ll grid, keeping flat i dimension");
                Grid::Flat { points }
            }
        }
    }

    /// Number of grid points.
    pub fn points(&self) -> usize {
        match self {
            Grid::Regular { ni, nj, .. } => ni * nj,
            Grid::Flat { points } => *points,
        }
    }

    /// Grid dimensions, in array order.
    pub fn dimensions(&self) -> Vec<(String, usize)> {
        match self {
            Grid::Regular { ni, nj, .. } => {
                vec![("latitude".to_string(), *nj), ("longitude".to_string(), *ni)]
            }
            Grid::Flat { points } => vec![("i".to_string(), *points)],
        }
    }

    /// Coordinate variables of the grid dimensions.
    pub fn coordinate_variables(&self) -> Vec<(String, Variable)> {
        match self {
            Grid::Regular {
                latitudes,
                longitudes,
                ..
            } => vec![
                (
                    "latitude".to_string(),
                    Variable::coordinate(
                        "latitude",
                        Data::from_f64(latitudes.clone()),
                        attributes(&[
                            ("units", "degrees_north"),
                            ("standard_name", "latitude"),
                            ("long_name", "latitude"),
                        ]),
                    ),
                ),
                (
                    "longitude".to_string(),
                    Variable::coordinate(
                        "longitude",
                        Data::from_f64(longitudes.clone()),
                        attributes(&[
                            ("units", "degrees_east"),
                            ("standard_name", "longitude"),
                            ("long_name", "longitude"),
                        ]),
                    ),
                ),
            ],
            Grid::Flat { .. } => Vec::new(),
        }
    }
}

fn regular_grid(message: &dyn KeyLookup, points: usize) -> Option<Grid> {
    let grid_type = message.get_value("gridType").ok()?;
    if grid_type.as_str() != Some("regular_ll") {
        return None;
    }
    let consecutive = match message.get_value("jPointsAreConsecutive") {
        Ok(value) => value.as_i64()?,
        Err(e) if e.is_not_found() => 0,
        Err(_) => return None,
    };
    if consecutive != 0 {
        return None;
    }

    let ni = usize::try_from(message.get_value("Ni").ok()?.as_i64()?).ok()?;
    let nj = usize::try_from(message.get_value("Nj").ok()?.as_i64()?).ok()?;
    if ni.checked_mul(nj)? != points {
        return None;
    }
    let degrees = |key: &str| message.get_value(key).ok()?.as_f64();
    let lat_first = degrees("latitudeOfFirstGridPointInDegrees")?;
    let lat_last = degrees("latitudeOfLastGridPointInDegrees")?;
    let lon_first = degrees("longitudeOfFirstGridPointInDegrees")?;
    let lon_last = degrees("longitudeOfLastGridPointInDegrees")?;

    Some(Grid::Regular {
        ni,
        nj,
        latitudes: linspace(lat_first, lat_last, nj),
        longitudes: linspace(lon_first, lon_last, ni),
    })
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

pub(crate) fn attributes(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}
