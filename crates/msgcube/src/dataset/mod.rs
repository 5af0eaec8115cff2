//! Dataset assembly.
//!
//! [`build_data_var_components`] turns an index filtered down to one physical
//! variable into an N-dimensional array plus its coordinate variables:
//!
//! 1. every header key with more than one distinct value becomes a dimension,
//!    sized by its distinct values in first-seen order;
//! 2. optional encodings replace raw dimensions: `dataDate` and `dataTime`
//!    become `forecast_reference_time`, `topLevel` is renamed after the level
//!    type, and the flat `i` dimension of a regular grid is split into
//!    `latitude` and `longitude`;
//! 3. each message's payload is written at the position of its header values
//!    within the coordinate lists.
//!
//! [`Dataset`] repeats this for every variable of a file and merges the
//! results, failing on any disagreement between variables.

mod attrs;
mod encode;
pub mod export;

pub use attrs::{dict_merge, Attributes};
pub use encode::{
    date_time_to_epoch, from_grib_date_time, linspace, time_attributes, to_grib_date_time, Grid,
    VerticalLevel, TIME_CALENDAR, TIME_UNITS, VERTICAL_LEVELS,
};

use crate::codec::{Decoder, MessageHandle};
use crate::config::{AssemblyConfig, ATTRIBUTE_PREFIX, REGULAR_LL_GRID_KEYS};
use crate::error::{CubeError, Result};
use crate::index::{HeaderTuple, Index};
use crate::message::{ComputedKeys, ComputedKeysMessage, REFERENCE_TIME_KEY};
use crate::stream::Stream;
use crate::value::Value;
use bitvec::prelude::*;
use indexmap::{IndexMap, IndexSet};
use ndarray::{Array1, ArrayD, Axis, IxDyn};
use std::path::Path;
use tracing::{debug, warn};

/// Value of the `Conventions` global attribute.
pub const CONVENTIONS: &str = "CF-1.7";

/// Array data of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Floating point values; missing points are NaN.
    Float(ArrayD<f64>),
    /// Integer values.
    Int(ArrayD<i64>),
    /// Text values.
    Text(ArrayD<String>),
}

impl Data {
    /// One-dimensional floating point data.
    pub fn from_f64(values: Vec<f64>) -> Self {
        Data::Float(Array1::from(values).into_dyn())
    }

    /// One-dimensional data from coordinate values.
    ///
    /// All integers give `Int`, all numbers give `Float`, anything else is
    /// rendered as text.
    pub fn from_values(values: &[Value]) -> Self {
        if values.iter().all(|v| matches!(v, Value::Long(_))) {
            Data::Int(Array1::from_iter(values.iter().filter_map(Value::as_i64)).into_dyn())
        } else if values.iter().all(Value::is_numeric) {
            Data::Float(Array1::from_iter(values.iter().filter_map(Value::as_f64)).into_dyn())
        } else {
            Data::Text(Array1::from_iter(values.iter().map(Value::to_string)).into_dyn())
        }
    }

    /// Zero-dimensional data holding one value.
    pub fn scalar(value: &Value) -> Self {
        match Self::from_values(std::slice::from_ref(value)) {
            Data::Float(a) => Data::Float(a.index_axis_move(Axis(0), 0)),
            Data::Int(a) => Data::Int(a.index_axis_move(Axis(0), 0)),
            Data::Text(a) => Data::Text(a.index_axis_move(Axis(0), 0)),
        }
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        match self {
            Data::Float(a) => a.shape(),
            Data::Int(a) => a.shape(),
            Data::Text(a) => a.shape(),
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Value at a multi-dimensional index.
    pub fn value_at(&self, index: &[usize]) -> Option<Value> {
        match self {
            Data::Float(a) => a.get(index).map(|v| Value::Double(*v)),
            Data::Int(a) => a.get(index).map(|v| Value::Long(*v)),
            Data::Text(a) => a.get(index).map(|v| Value::Text(v.clone())),
        }
    }

    /// Floating point array, if the data is floating point.
    pub fn as_float(&self) -> Option<&ArrayD<f64>> {
        match self {
            Data::Float(a) => Some(a),
            _ => None,
        }
    }

    /// All values in row-major order.
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Data::Float(a) => a.iter().map(|v| Value::Double(*v)).collect(),
            Data::Int(a) => a.iter().map(|v| Value::Long(*v)).collect(),
            Data::Text(a) => a.iter().map(|v| Value::Text(v.clone())).collect(),
        }
    }
}

/// A named array with its dimension names and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Dimension names, one per array axis.
    pub dimensions: Vec<String>,
    /// Array data.
    pub data: Data,
    /// Variable attributes.
    pub attributes: Attributes,
}

impl Variable {
    /// A one-dimensional coordinate variable along its own dimension.
    pub fn coordinate(name: &str, data: Data, attributes: Attributes) -> Self {
        Self {
            dimensions: vec![name.to_string()],
            data,
            attributes,
        }
    }

    /// Shape of the data.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// Output of [`build_data_var_components`].
#[derive(Debug, Clone)]
pub struct DataVarComponents {
    /// Dimension sizes, in array order.
    pub dimensions: IndexMap<String, usize>,
    /// The data variable.
    pub data_var: Variable,
    /// Coordinate variables, dimension coordinates first.
    pub coord_vars: IndexMap<String, Variable>,
}

/// Where the coordinate values of an axis come from in a header tuple.
#[derive(Debug, Clone, Copy)]
enum AxisSource {
    Key(usize),
    DateTime { date: usize, time: usize },
}

impl AxisSource {
    fn positions(&self) -> Vec<usize> {
        match *self {
            AxisSource::Key(pos) => vec![pos],
            AxisSource::DateTime { date, time } => vec![date, time],
        }
    }
}

/// One header-derived axis of a data variable.
#[derive(Debug)]
struct HeaderAxis {
    name: String,
    source: AxisSource,
    /// Distinct source values, one entry per coordinate position.
    keys: IndexSet<Vec<Value>>,
    coordinates: Vec<Value>,
    attributes: Attributes,
}

impl HeaderAxis {
    fn from_key(index: &Index<impl Decoder>, name: &str, pos: usize) -> Self {
        let keys: IndexSet<Vec<Value>> = index
            .offsets()
            .map(|(header, _)| vec![header[pos].clone()])
            .collect();
        let coordinates = keys.iter().map(|k| k[0].clone()).collect();
        Self {
            name: name.to_string(),
            source: AxisSource::Key(pos),
            keys,
            coordinates,
            attributes: Attributes::new(),
        }
    }

    /// The combined date/time axis, or `None` if any pair is not a valid
    /// date and time.
    fn reference_time(index: &Index<impl Decoder>, date: usize, time: usize) -> Option<Self> {
        let keys: IndexSet<Vec<Value>> = index
            .offsets()
            .map(|(header, _)| vec![header[date].clone(), header[time].clone()])
            .collect();
        let coordinates = keys
            .iter()
            .map(|k| date_time_to_epoch(k[0].as_i64()?, k[1].as_i64()?).map(Value::Long))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            name: REFERENCE_TIME_KEY.to_string(),
            source: AxisSource::DateTime { date, time },
            keys,
            coordinates,
            attributes: time_attributes(),
        })
    }

    fn len(&self) -> usize {
        self.coordinates.len()
    }

    fn is_undefined(&self) -> bool {
        self.coordinates.iter().all(Value::is_undef)
    }

    fn position(&self, header: &HeaderTuple) -> Result<usize> {
        let key: Vec<Value> = self
            .source
            .positions()
            .into_iter()
            .map(|pos| header[pos].clone())
            .collect();
        self.keys.get_index_of(&key).ok_or_else(|| {
            CubeError::ConflictingCoordinate(format!("{} has no value {:?}", self.name, key))
        })
    }
}

/// Assembles one data variable from an index filtered to that variable.
///
/// # Errors
///
/// - `EmptyIndex` if the index holds no messages.
/// - `ConflictingAttribute` if two messages disagree on an attribute.
/// - `ShapeMismatch` if a payload does not match the grid.
/// - `DuplicateField` if two messages address the same slice and
///   `config.strict_overlaps` is set.
pub fn build_data_var_components<D: Decoder>(
    index: &Index<D>,
    config: &AssemblyConfig,
) -> Result<DataVarComponents> {
    let first = index.first()?;
    let axes = header_axes(index, config, &first)?;

    let (dim_axes, scalar_axes): (Vec<HeaderAxis>, Vec<HeaderAxis>) = axes
        .into_iter()
        .filter(|axis| !axis.is_undefined())
        .partition(|axis| !(config.squeeze && axis.len() == 1));

    let points = match first.get_or("numberOfPoints", Value::Undef)?.as_i64() {
        Some(n) => usize::try_from(n)
            .map_err(|_| CubeError::DecodeFailure(format!("invalid numberOfPoints {}", n)))?,
        None => first.values()?.len(),
    };
    let grid = if config.encode_geography {
        Grid::detect(&first, points)
    } else {
        Grid::Flat { points }
    };
    let grid_keys: &[&str] = match grid {
        Grid::Regular { .. } => REGULAR_LL_GRID_KEYS,
        Grid::Flat { .. } => &[],
    };
    drop(first);

    let mut dimensions: IndexMap<String, usize> = dim_axes
        .iter()
        .map(|axis| (axis.name.clone(), axis.len()))
        .collect();
    dimensions.extend(grid.dimensions());

    let field_count: usize = dim_axes.iter().map(HeaderAxis::len).product();
    let field_size = grid.points();
    let mut data = vec![f64::NAN; field_count * field_size];
    let mut written = bitvec![0; field_count];
    let mut attributes = Attributes::new();

    let stream = index.stream();
    let mut reader = stream.open_file()?;
    for (header, offsets) in index.offsets() {
        let field = dim_axes.iter().try_fold(0usize, |acc, axis| {
            Ok::<_, CubeError>(acc * axis.len() + axis.position(header)?)
        })?;

        for &offset in offsets {
            let message = stream.read_at(&mut reader, offset)?;
            let message_attributes = read_attributes(
                &message,
                config.data_attribute_keys.iter().map(String::as_str),
                grid_keys,
            )?;
            dict_merge(&mut attributes, &message_attributes)?;

            let values = message.values()?;
            if values.len() != field_size {
                return Err(CubeError::ShapeMismatch {
                    expected: field_size,
                    actual: values.len(),
                });
            }
            if written[field] {
                if config.strict_overlaps {
                    return Err(CubeError::DuplicateField { offset });
                }
                warn!(
                    "Message at offset {} overwrites field {} of a previous message",
                    offset, field
                );
            }
            written.set(field, true);
            data[field * field_size..(field + 1) * field_size].copy_from_slice(&values);
        }
    }

    let missing = written.count_zeros();
    if missing > 0 {
        debug!("{} of {} fields have no message and stay NaN", missing, field_count);
    }

    add_cf_attributes(&mut attributes);
    let shape: Vec<usize> = dimensions.values().copied().collect();
    let data_var = Variable {
        dimensions: dimensions.keys().cloned().collect(),
        data: Data::Float(ArrayD::from_shape_vec(IxDyn(&shape), data)?),
        attributes,
    };

    let mut coord_vars = IndexMap::new();
    for axis in &dim_axes {
        coord_vars.insert(
            axis.name.clone(),
            Variable::coordinate(
                &axis.name,
                Data::from_values(&axis.coordinates),
                axis.attributes.clone(),
            ),
        );
    }
    coord_vars.extend(grid.coordinate_variables());
    for axis in &scalar_axes {
        coord_vars.insert(
            axis.name.clone(),
            Variable {
                dimensions: Vec::new(),
                data: Data::scalar(&axis.coordinates[0]),
                attributes: axis.attributes.clone(),
            },
        );
    }

    Ok(DataVarComponents {
        dimensions,
        data_var,
        coord_vars,
    })
}

/// Header axes in dimension order, after the time and vertical encodings.
fn header_axes<D: Decoder>(
    index: &Index<D>,
    config: &AssemblyConfig,
    first: &ComputedKeysMessage<D::Handle>,
) -> Result<Vec<HeaderAxis>> {
    let present: Vec<(&str, usize)> = config
        .header_keys
        .iter()
        .filter_map(|key| index.position(key).map(|pos| (key.as_str(), pos)))
        .collect();
    let position = |name: &str| present.iter().find(|(k, _)| *k == name).map(|(_, p)| *p);

    let reference_time = match (config.encode_time, position("dataDate"), position("dataTime")) {
        (true, Some(date), Some(time)) => {
            let axis = HeaderAxis::reference_time(index, date, time);
            if axis.is_none() {
                debug!("Invalid dataDate/dataTime values, time encoding skipped");
            }
            axis
        }
        _ => None,
    };
    let vertical = if config.encode_vertical {
        vertical_level(index, first)?
    } else {
        None
    };

    let time_encoded = reference_time.is_some();
    let mut reference_time = reference_time;
    let mut axes = Vec::with_capacity(present.len());
    for &(key, pos) in &present {
        match (key, vertical) {
            ("dataDate", _) if time_encoded => axes.extend(reference_time.take()),
            ("dataTime", _) if time_encoded => {}
            ("topLevel", Some(level)) => {
                let mut axis = HeaderAxis::from_key(index, key, pos);
                axis.name = level.name.to_string();
                axis.attributes = level.attributes();
                axes.push(axis);
            }
            _ => axes.push(HeaderAxis::from_key(index, key, pos)),
        }
    }
    Ok(axes)
}

/// The level type of an index, if it is single-valued and known.
fn vertical_level<D: Decoder>(
    index: &Index<D>,
    first: &ComputedKeysMessage<D::Handle>,
) -> Result<Option<&'static VerticalLevel>> {
    let type_of_level = if index.position("typeOfLevel").is_some() {
        match index.getone("typeOfLevel") {
            Ok(value) => value.clone(),
            Err(_) => {
                debug!("typeOfLevel is not single-valued, vertical encoding skipped");
                return Ok(None);
            }
        }
    } else {
        first.get_or("typeOfLevel", Value::Undef)?
    };
    let level = type_of_level
        .as_str()
        .and_then(VerticalLevel::from_type_of_level);
    if level.is_none() {
        debug!("Unknown level type {}, vertical encoding skipped", type_of_level);
    }
    Ok(level)
}

/// Reads the `GRIB_`-prefixed attributes of one message, skipping absent keys.
fn read_attributes<'a, H: MessageHandle>(
    message: &ComputedKeysMessage<H>,
    data_keys: impl Iterator<Item = &'a str>,
    grid_keys: &[&'a str],
) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    for key in data_keys.chain(grid_keys.iter().copied()) {
        match message.get(key) {
            Ok(value) => {
                attributes.insert(format!("{}{}", ATTRIBUTE_PREFIX, key), value);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(attributes)
}

/// Derives `units`, `long_name` and `standard_name` from the GRIB attributes.
fn add_cf_attributes(attributes: &mut Attributes) {
    let text = |key: &str| {
        attributes
            .get(&format!("{}{}", ATTRIBUTE_PREFIX, key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let units = text("units");
    let long_name = text("name");
    let standard_name = text("cfName").filter(|name| name != "unknown");

    if let Some(units) = units {
        attributes.insert("units".to_string(), Value::from(units));
    }
    if let Some(long_name) = long_name {
        attributes.insert("long_name".to_string(), Value::from(long_name));
    }
    if let Some(standard_name) = standard_name {
        attributes.insert("standard_name".to_string(), Value::from(standard_name));
    }
}

/// A labelled dataset assembled from every variable of a message file.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    dimensions: IndexMap<String, usize>,
    variables: IndexMap<String, Variable>,
    attributes: Attributes,
}

impl Dataset {
    /// Indexes the record file at `path` and assembles it.
    pub fn open(path: impl AsRef<Path>, config: &AssemblyConfig) -> Result<Self> {
        let stream = Stream::new(path).with_computed_keys(ComputedKeys::standard());
        let keys = config.all_keys();
        let index = stream.index(keys.as_slice())?;
        Self::from_index(&index, config)
    }

    /// Assembles one data variable per distinct value of `config.variable_key`.
    pub fn from_index<D: Decoder>(index: &Index<D>, config: &AssemblyConfig) -> Result<Self> {
        let mut dataset = Dataset {
            attributes: global_attributes(index, config)?,
            ..Dataset::default()
        };

        let mut coordinates: IndexMap<String, Variable> = IndexMap::new();
        for variable_id in index.header_values(&config.variable_key)?.to_vec() {
            let subindex = index.subindex([(config.variable_key.as_str(), variable_id.clone())])?;
            let components = build_data_var_components(&subindex, config)?;

            for (name, size) in components.dimensions {
                match dataset.dimensions.get(&name) {
                    Some(&existing) if existing != size => {
                        return Err(CubeError::ConflictingDimension {
                            name,
                            existing,
                            new: size,
                        });
                    }
                    Some(_) => {}
                    None => {
                        dataset.dimensions.insert(name, size);
                    }
                }
            }
            for (name, variable) in components.coord_vars {
                match coordinates.get(&name) {
                    Some(existing) if existing.data != variable.data => {
                        return Err(CubeError::ConflictingCoordinate(name));
                    }
                    Some(_) => {}
                    None => {
                        coordinates.insert(name, variable);
                    }
                }
            }

            let fallback = format!("param{}", variable_id);
            let name = match components
                .data_var
                .attributes
                .get(&format!("{}shortName", ATTRIBUTE_PREFIX))
                .and_then(Value::as_str)
            {
                Some(short_name)
                    if !dataset.variables.contains_key(short_name)
                        && !coordinates.contains_key(short_name)
                        && !dataset.dimensions.contains_key(short_name) =>
                {
                    short_name.to_string()
                }
                _ => fallback,
            };
            debug!(
                "Assembled variable {} with shape {:?}",
                name,
                components.data_var.shape()
            );
            dataset.variables.insert(name, components.data_var);
        }

        for (name, variable) in coordinates {
            if dataset.variables.contains_key(&name) {
                return Err(CubeError::DuplicateVariable(name));
            }
            dataset.variables.insert(name, variable);
        }
        Ok(dataset)
    }

    /// Dimension sizes, in first-seen order.
    pub fn dimensions(&self) -> &IndexMap<String, usize> {
        &self.dimensions
    }

    /// Data and coordinate variables.
    pub fn variables(&self) -> &IndexMap<String, Variable> {
        &self.variables
    }

    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Global attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

fn global_attributes<D: Decoder>(index: &Index<D>, config: &AssemblyConfig) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    if index.bucket_count() > 0 {
        let first = index.first()?;
        let keys = config.global_attribute_keys.iter().map(String::as_str);
        attributes = read_attributes(&first, keys, &[])?;
    }
    attributes.insert("Conventions".to_string(), Value::from(CONVENTIONS));
    attributes.insert(
        "msgcubeVersion".to_string(),
        Value::from(env!("CARGO_PKG_VERSION")),
    );
    Ok(attributes)
}
