//! Integration tests for variable and dataset assembly.

mod common;

use common::{field_value, DATES, LEVELS, NUMBERS, TIMES};
use msgcube::codec::RecordWriter;
use msgcube::message::REFERENCE_TIME_KEY;
use msgcube::{build_data_var_components, AssemblyConfig, CubeError, Data, Dataset, Stream, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn levels_members(temp_dir: &TempDir) -> PathBuf {
    let path = temp_dir.path().join("era5-levels-members.mrec");
    common::write_levels_members(&path, 120, 61);
    path
}

fn dims(map: &indexmap::IndexMap<String, usize>) -> Vec<(&str, usize)> {
    map.iter().map(|(k, v)| (k.as_str(), *v)).collect()
}

fn dim_names(dataset: &Dataset) -> Vec<&str> {
    dataset.dimensions().keys().map(String::as_str).collect()
}

fn temperature_index(path: &Path) -> msgcube::Index {
    let config = AssemblyConfig::default();
    Stream::new(path)
        .index(config.all_keys().as_slice())
        .unwrap()
        .subindex([("paramId", 130)])
        .unwrap()
}

fn mean(data: &Data) -> f64 {
    let array = data.as_float().unwrap();
    array.sum() / array.len() as f64
}

// ============================================================================
// Single variable assembly
// ============================================================================

#[test]
fn test_build_data_var_components_no_encode() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let index = temperature_index(&path);
    let components = build_data_var_components(&index, &AssemblyConfig::no_encode()).unwrap();
    assert_eq!(
        dims(&components.dimensions),
        vec![
            ("number", 10),
            ("dataDate", 2),
            ("dataTime", 2),
            ("topLevel", 2),
            ("i", 7320)
        ]
    );
    assert_eq!(components.data_var.shape(), &[10, 2, 2, 2, 7320]);
    assert!(mean(&components.data_var.data) > 0.0);

    // Dimension sizes equal the distinct values of their source keys.
    for key in ["number", "dataDate", "dataTime", "topLevel"] {
        assert_eq!(
            components.dimensions[key],
            index.header_values(key).unwrap().len()
        );
    }
    assert_eq!(components.coord_vars["endStep"].data.ndim(), 0);
}

#[test]
fn test_build_data_var_components_encode_geography() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let index = temperature_index(&path);
    let config = AssemblyConfig::no_encode().with_encode_geography(true);
    let components = build_data_var_components(&index, &config).unwrap();
    assert_eq!(
        dims(&components.dimensions),
        vec![
            ("number", 10),
            ("dataDate", 2),
            ("dataTime", 2),
            ("topLevel", 2),
            ("latitude", 61),
            ("longitude", 120)
        ]
    );
    assert_eq!(components.data_var.shape(), &[10, 2, 2, 2, 61, 120]);

    let latitude = &components.coord_vars["latitude"];
    assert_eq!(latitude.data.value_at(&[0]), Some(Value::Double(90.0)));
    assert_eq!(latitude.data.value_at(&[60]), Some(Value::Double(-90.0)));
    assert_eq!(
        latitude.attributes["units"],
        Value::from("degrees_north")
    );

    // Every point lands at the position of its header values.
    let data = components.data_var.data.as_float().unwrap();
    for (n, number) in NUMBERS.iter().enumerate().step_by(3) {
        for (d, date) in DATES.iter().enumerate() {
            for (t, time) in TIMES.iter().enumerate() {
                for (l, level) in LEVELS.iter().enumerate() {
                    let expected = field_value(130, *number, *date, *time, *level, 2 * 120 + 7);
                    assert_eq!(data[[n, d, t, l, 2, 7].as_slice()], expected);
                }
            }
        }
    }
}

#[test]
fn test_variable_attributes() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let components =
        build_data_var_components(&temperature_index(&path), &AssemblyConfig::default()).unwrap();
    let attributes = &components.data_var.attributes;
    assert_eq!(attributes["GRIB_paramId"], Value::Long(130));
    assert_eq!(attributes["GRIB_gridType"], Value::from("regular_ll"));
    assert_eq!(attributes["GRIB_Ni"], Value::Long(120));
    assert_eq!(attributes["units"], Value::from("K"));
    assert_eq!(attributes["long_name"], Value::from("Temperature"));
    assert!(!attributes.contains_key("standard_name"));
}

/// Two messages of one variable disagreeing on gridType cannot be assembled.
#[test]
fn test_conflicting_grid_type() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mixed.mrec");
    let param = common::PARAMS[1];
    let mut writer = RecordWriter::create(&path).unwrap();
    writer
        .write(&common::field_record(param, 0, 20170101, 0, 500, 4, 3))
        .unwrap();
    writer
        .write(
            &common::field_record(param, 0, 20170101, 0, 850, 4, 3)
                .text("gridType", "reduced_ll"),
        )
        .unwrap();
    writer.finish().unwrap();

    let index = temperature_index(&path);
    let result = build_data_var_components(&index, &AssemblyConfig::default());
    match result {
        Err(CubeError::ConflictingAttribute { key, existing, new }) => {
            assert_eq!(key, "GRIB_gridType");
            assert_eq!(existing, Value::from("regular_ll"));
            assert_eq!(new, Value::from("reduced_ll"));
        }
        other => panic!("expected a conflicting attribute, got {:?}", other.map(|_| ())),
    }
}

/// An unknown level type keeps the raw topLevel dimension.
#[test]
fn test_unknown_level_type_skips_vertical_encoding() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("surface.mrec");
    let param = common::PARAMS[1];
    let mut writer = RecordWriter::create(&path).unwrap();
    for level in LEVELS {
        writer
            .write(
                &common::field_record(param, 0, 20170101, 0, level, 4, 3)
                    .text("typeOfLevel", "surface"),
            )
            .unwrap();
    }
    writer.finish().unwrap();

    let index = temperature_index(&path);
    assert_eq!(index.getone("typeOfLevel").unwrap(), &Value::from("surface"));
    let components = build_data_var_components(&index, &AssemblyConfig::default()).unwrap();
    assert_eq!(
        dims(&components.dimensions),
        vec![("topLevel", 2), ("latitude", 3), ("longitude", 4)]
    );
    assert!(!components.coord_vars.contains_key("air_pressure"));
    let top_level = &components.coord_vars["topLevel"];
    assert_eq!(top_level.dimensions, vec!["topLevel".to_string()]);
    assert!(!top_level.attributes.contains_key("positive"));
}

// ============================================================================
// Whole dataset assembly
// ============================================================================

#[test]
fn test_dataset() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let dataset = Dataset::open(&path, &AssemblyConfig::default()).unwrap();
    assert_eq!(dataset.attributes()["GRIB_edition"], Value::Long(1));
    assert_eq!(dataset.attributes()["GRIB_centre"], Value::from("ecmf"));
    assert_eq!(dataset.attributes()["Conventions"], Value::from("CF-1.7"));
    assert!(dataset.attributes().contains_key("msgcubeVersion"));
    assert_eq!(
        dim_names(&dataset),
        vec![
            "number",
            REFERENCE_TIME_KEY,
            "air_pressure",
            "latitude",
            "longitude"
        ]
    );
    assert_eq!(dataset.dimensions()[REFERENCE_TIME_KEY], 4);

    // Two data variables plus six coordinates, endStep as a scalar.
    assert_eq!(dataset.variables().len(), 8);
    let t = dataset.variable("t").unwrap();
    assert_eq!(t.shape(), &[10, 4, 2, 61, 120]);
    assert!(mean(&t.data) > 0.0);
    assert!(dataset.variable("z").is_some());
    assert_eq!(
        dataset.variable("air_pressure").unwrap().attributes["units"],
        Value::from("hPa")
    );
}

#[test]
fn test_dataset_no_encode() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let dataset = Dataset::open(&path, &AssemblyConfig::no_encode()).unwrap();
    assert_eq!(dataset.attributes()["GRIB_edition"], Value::Long(1));
    assert_eq!(
        dim_names(&dataset),
        vec!["number", "dataDate", "dataTime", "topLevel", "i"]
    );
    assert_eq!(dataset.variables().len(), 2 + 5);
}

#[test]
fn test_dataset_encode_time() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let config = AssemblyConfig::no_encode().with_encode_time(true);
    let dataset = Dataset::open(&path, &config).unwrap();
    assert_eq!(
        dim_names(&dataset),
        vec!["number", REFERENCE_TIME_KEY, "topLevel", "i"]
    );
    assert!(mean(&dataset.variable("t").unwrap().data) > 0.0);

    let time = dataset.variable(REFERENCE_TIME_KEY).unwrap();
    assert_eq!(time.data.value_at(&[0]), Some(Value::Long(1483228800)));
    assert_eq!(
        time.attributes["calendar"],
        Value::from("proleptic_gregorian")
    );
}

#[test]
fn test_dataset_encode_geography() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let config = AssemblyConfig::no_encode().with_encode_geography(true);
    let dataset = Dataset::open(&path, &config).unwrap();
    assert_eq!(
        dim_names(&dataset),
        vec!["number", "dataDate", "dataTime", "topLevel", "latitude", "longitude"]
    );
}

#[test]
fn test_dataset_encode_vertical() {
    let temp_dir = TempDir::new().unwrap();
    let path = levels_members(&temp_dir);

    let config = AssemblyConfig::no_encode().with_encode_vertical(true);
    let dataset = Dataset::open(&path, &config).unwrap();
    assert_eq!(
        dim_names(&dataset),
        vec!["number", "dataDate", "dataTime", "air_pressure", "i"]
    );
    assert_eq!(
        dataset.variable("air_pressure").unwrap().attributes["positive"],
        Value::from("down")
    );
}

/// Variables disagreeing on a coordinate cannot share a dataset.
#[test]
fn test_dataset_conflicting_coordinates() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("levels.mrec");
    let [z, t] = common::PARAMS;
    let mut writer = RecordWriter::create(&path).unwrap();
    for (param, levels) in [(z, [500, 850]), (t, [700, 850])] {
        for level in levels {
            writer
                .write(&common::field_record(param, 0, 20170101, 0, level, 2, 2))
                .unwrap();
        }
    }
    writer.finish().unwrap();

    let result = Dataset::open(&path, &AssemblyConfig::default());
    assert!(matches!(
        result,
        Err(CubeError::ConflictingCoordinate(name)) if name == "air_pressure"
    ));
}

/// A shortName equal to a coordinate name falls back to the parameter id.
#[test]
fn test_short_name_clashing_with_coordinate() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("clash.mrec");
    let param = common::PARAMS[1];
    let mut writer = RecordWriter::create(&path).unwrap();
    for number in [0, 1] {
        writer
            .write(
                &common::field_record(param, number, 20170101, 0, 500, 4, 3)
                    .text("shortName", "number"),
            )
            .unwrap();
    }
    writer.finish().unwrap();

    let dataset = Dataset::open(&path, &AssemblyConfig::default()).unwrap();
    let data = dataset.variable("param130").unwrap();
    assert_eq!(data.dimensions, vec!["number", "latitude", "longitude"]);
    assert_eq!(data.shape(), &[2, 3, 4]);

    let number = dataset.variable("number").unwrap();
    assert_eq!(number.dimensions, vec!["number"]);
    assert_eq!(number.data.value_at(&[1]), Some(Value::Long(1)));
}
