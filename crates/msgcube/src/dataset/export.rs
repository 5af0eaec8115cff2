//! Writing a dataset variable back to a record stream.

use super::{dict_merge, to_grib_date_time, Attributes, Data, Dataset, VerticalLevel};
use crate::codec::{MessageRecord, RecordWriter, VALUES_KEY};
use crate::config::ATTRIBUTE_PREFIX;
use crate::error::{CubeError, Result};
use crate::message::REFERENCE_TIME_KEY;
use crate::value::{RawValues, Value};
use tracing::debug;

/// Writes variable `name` of `dataset` as one record per 2-D field.
///
/// Grid keys are detected from the `latitude` and `longitude` coordinates and
/// `extra_keys` are merged into them; an extra key that contradicts a detected
/// one fails with `ConflictingAttribute` before anything is written.
///
/// Returns the number of records written.
pub fn export_variable(
    dataset: &Dataset,
    name: &str,
    extra_keys: &Attributes,
    writer: &mut RecordWriter,
) -> Result<u64> {
    let variable = dataset
        .variable(name)
        .ok_or_else(|| CubeError::KeyNotFound(name.to_string()))?;
    let dims = &variable.dimensions;
    let n = dims.len();
    if n < 2 || dims[n - 2] != "latitude" || dims[n - 1] != "longitude" {
        return Err(CubeError::UnsupportedLayout(format!(
            "{} must end with (latitude, longitude), has {:?}",
            name, dims
        )));
    }
    let data = variable.data.as_float().ok_or_else(|| {
        CubeError::UnsupportedLayout(format!("{} does not hold floating point data", name))
    })?;

    let latitudes = coordinate(dataset, "latitude")?;
    let longitudes = coordinate(dataset, "longitude")?;
    let mut grid_keys = detect_grid_keys(&latitudes, &longitudes);
    dict_merge(&mut grid_keys, extra_keys)?;

    let mut header = Attributes::new();
    for (key, value) in &variable.attributes {
        if let Some(key) = key.strip_prefix(ATTRIBUTE_PREFIX) {
            header.insert(key.to_string(), value.clone());
        }
    }
    for (coord_name, coord) in dataset.variables() {
        if coord.data.ndim() == 0 && coord.dimensions.is_empty() && coord_name != name {
            if let Some(value) = coord.data.value_at(&[]) {
                header_keys(dataset, coord_name, value, &mut header)?;
            }
        }
    }

    let leading = &dims[..n - 2];
    let field_size = latitudes.len() * longitudes.len();
    let values: Vec<f64> = data.iter().copied().collect();
    let mut count = 0u64;

    for (field, chunk) in values.chunks(field_size.max(1)).enumerate() {
        let mut keys = header.clone();
        let mut rest = field;
        let mut positions = vec![0usize; leading.len()];
        for (d, dim) in leading.iter().enumerate().rev() {
            let size = dataset.dimensions().get(dim).copied().unwrap_or(1).max(1);
            positions[d] = rest % size;
            rest /= size;
        }
        for (dim, &pos) in leading.iter().zip(&positions) {
            let value = dataset
                .variable(dim)
                .and_then(|c| c.data.value_at(&[pos]))
                .unwrap_or(Value::Long(pos as i64));
            header_keys(dataset, dim, value, &mut keys)?;
        }

        let mut record = MessageRecord::new();
        for (key, value) in keys.iter().chain(&grid_keys) {
            if let Some(raw) = raw_values(value) {
                record.push(key, raw);
            }
        }
        record.push(VALUES_KEY, RawValues::Double(chunk.to_vec()));
        writer.write(&record)?;
        count += 1;
    }

    debug!("Exported {} fields of {}", count, name);
    Ok(count)
}

/// Grid keys of a regular latitude/longitude grid.
fn detect_grid_keys(latitudes: &[f64], longitudes: &[f64]) -> Attributes {
    let mut keys = Attributes::new();
    keys.insert("gridType".to_string(), Value::from("regular_ll"));
    keys.insert("Ni".to_string(), Value::Long(longitudes.len() as i64));
    keys.insert("Nj".to_string(), Value::Long(latitudes.len() as i64));
    keys.insert(
        "numberOfPoints".to_string(),
        Value::Long((latitudes.len() * longitudes.len()) as i64),
    );
    let ends = [
        ("latitudeOfFirstGridPointInDegrees", latitudes.first()),
        ("latitudeOfLastGridPointInDegrees", latitudes.last()),
        ("longitudeOfFirstGridPointInDegrees", longitudes.first()),
        ("longitudeOfLastGridPointInDegrees", longitudes.last()),
    ];
    for (key, value) in ends {
        if let Some(v) = value {
            keys.insert(key.to_string(), Value::Double(*v));
        }
    }
    if let [a, b, ..] = longitudes {
        keys.insert(
            "iDirectionIncrementInDegrees".to_string(),
            Value::Double((b - a).abs()),
        );
    }
    if let [a, b, ..] = latitudes {
        keys.insert(
            "jDirectionIncrementInDegrees".to_string(),
            Value::Double((b - a).abs()),
        );
    }
    keys
}

/// Header keys encoding coordinate `name` at `value`.
fn header_keys(dataset: &Dataset, name: &str, value: Value, keys: &mut Attributes) -> Result<()> {
    if name == REFERENCE_TIME_KEY || name == "time" {
        let seconds = value.as_i64().ok_or_else(|| CubeError::TypeMismatch {
            key: name.to_string(),
            expected: crate::value::NativeType::Long,
        })?;
        let (date, time) = to_grib_date_time(seconds).ok_or_else(|| {
            CubeError::UnsupportedLayout(format!("{} value {} is out of range", name, seconds))
        })?;
        keys.insert("dataDate".to_string(), Value::Long(date));
        keys.insert("dataTime".to_string(), Value::Long(time));
        return Ok(());
    }

    let units = dataset
        .variable(name)
        .and_then(|v| v.attributes.get("units"))
        .and_then(Value::as_str);
    match VerticalLevel::from_coordinate(name, units) {
        Some(level) => {
            keys.insert("typeOfLevel".to_string(), Value::from(level.type_of_level));
            keys.insert("topLevel".to_string(), integral(value));
        }
        None => {
            keys.insert(name.to_string(), integral(value));
        }
    }
    Ok(())
}

/// Narrows integral doubles to integers.
fn integral(value: Value) -> Value {
    match value {
        Value::Double(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Value::Long(v as i64),
        other => other,
    }
}

fn coordinate(dataset: &Dataset, name: &str) -> Result<Vec<f64>> {
    match dataset.variable(name).map(|v| &v.data) {
        Some(Data::Float(a)) if a.ndim() == 1 => Ok(a.iter().copied().collect()),
        Some(Data::Int(a)) if a.ndim() == 1 => Ok(a.iter().map(|v| *v as f64).collect()),
        _ => Err(CubeError::UnsupportedLayout(format!(
            "missing one-dimensional {} coordinate",
            name
        ))),
    }
}

fn raw_values(value: &Value) -> Option<RawValues> {
    let raw = match value {
        Value::Long(v) => RawValues::Long(vec![*v]),
        Value::Double(v) => RawValues::Double(vec![*v]),
        Value::Text(v) => RawValues::Bytes(vec![v.as_bytes().to_vec()]),
        Value::LongArray(v) => RawValues::Long(v.clone()),
        Value::DoubleArray(v) => RawValues::Double(v.clone()),
        Value::TextArray(v) => RawValues::Bytes(v.iter().map(|s| s.as_bytes().to_vec()).collect()),
        Value::Undef => return None,
    };
    Some(raw)
}
