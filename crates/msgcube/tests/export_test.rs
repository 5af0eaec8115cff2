//! Integration tests for writing dataset variables back to record files.

mod common;

use msgcube::codec::RecordWriter;
use msgcube::dataset::export::export_variable;
use msgcube::{AssemblyConfig, Attributes, CubeError, Dataset, Stream, Value};
use tempfile::TempDir;

fn open_levels_members(temp_dir: &TempDir) -> Dataset {
    let path = temp_dir.path().join("levels.mrec");
    common::write_levels_members(&path, 8, 5);
    Dataset::open(&path, &AssemblyConfig::default()).unwrap()
}

/// An exported variable re-assembles to the same dimensions, coordinates and values.
#[test]
fn test_export_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let dataset = open_levels_members(&temp_dir);

    let out_path = temp_dir.path().join("t.mrec");
    let mut writer = RecordWriter::create(&out_path).unwrap();
    let count = export_variable(&dataset, "t", &Attributes::new(), &mut writer).unwrap();
    let file = writer.finish().unwrap();
    assert_eq!(count, 80);
    assert_eq!(file.message_count, 80);

    let reopened = Dataset::open(&out_path, &AssemblyConfig::default()).unwrap();
    assert_eq!(reopened.dimensions(), dataset.dimensions());

    let original = dataset.variable("t").unwrap();
    let restored = reopened.variable("t").unwrap();
    assert_eq!(restored.dimensions, original.dimensions);
    assert_eq!(restored.data, original.data);
    for name in ["number", "forecast_reference_time", "air_pressure", "latitude", "longitude"] {
        assert_eq!(
            reopened.variable(name).unwrap().data,
            dataset.variable(name).unwrap().data,
            "coordinate {}",
            name
        );
    }
    assert!(reopened.variable("z").is_none());
}

#[test]
fn test_export_writes_grid_keys() {
    let temp_dir = TempDir::new().unwrap();
    let dataset = open_levels_members(&temp_dir);

    let out_path = temp_dir.path().join("t.mrec");
    let mut writer = RecordWriter::create(&out_path).unwrap();
    let mut extra = Attributes::new();
    extra.insert("gridType".to_string(), Value::from("regular_ll"));
    extra.insert("centre".to_string(), Value::from("ecmf"));
    export_variable(&dataset, "t", &extra, &mut writer).unwrap();
    writer.finish().unwrap();

    let message = Stream::new(&out_path).first().unwrap().unwrap();
    assert_eq!(message.get("gridType").unwrap(), Value::from("regular_ll"));
    assert_eq!(message.get("Ni").unwrap(), Value::Long(8));
    assert_eq!(message.get("Nj").unwrap(), Value::Long(5));
    assert_eq!(message.get("iDirectionIncrementInDegrees").unwrap(), Value::Double(45.0));
    assert_eq!(message.get("centre").unwrap(), Value::from("ecmf"));
    assert_eq!(message.get("dataDate").unwrap(), Value::Long(20170101));
    assert_eq!(message.get("dataTime").unwrap(), Value::Long(0));
    assert_eq!(message.get("typeOfLevel").unwrap(), Value::from("isobaricInhPa"));
    assert_eq!(message.get("topLevel").unwrap(), Value::Long(500));
    assert_eq!(message.get("endStep").unwrap(), Value::Long(0));
    assert_eq!(message.values().unwrap().len(), 40);
}

/// Asking for a reduced grid on a regular variable fails before writing.
#[test]
fn test_export_conflicting_grid_keys() {
    let temp_dir = TempDir::new().unwrap();
    let dataset = open_levels_members(&temp_dir);

    let out_path = temp_dir.path().join("t.mrec");
    let mut writer = RecordWriter::create(&out_path).unwrap();
    let mut extra = Attributes::new();
    extra.insert("gridType".to_string(), Value::from("reduced_ll"));
    let result = export_variable(&dataset, "t", &extra, &mut writer);
    assert!(matches!(result, Err(CubeError::ConflictingAttribute { .. })));
    assert_eq!(writer.message_count(), 0);
}

#[test]
fn test_export_flat_grid_is_unsupported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("levels.mrec");
    common::write_levels_members(&path, 8, 5);
    let dataset = Dataset::open(&path, &AssemblyConfig::no_encode()).unwrap();

    let mut writer = RecordWriter::create(temp_dir.path().join("t.mrec")).unwrap();
    let result = export_variable(&dataset, "t", &Attributes::new(), &mut writer);
    assert!(matches!(result, Err(CubeError::UnsupportedLayout(_))));
}
