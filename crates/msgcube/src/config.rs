//! Assembly configuration and the default key lists.

use indexmap::IndexSet;

/// Keys read once from the first message into the dataset's global attributes.
pub const GLOBAL_ATTRIBUTES_KEYS: &[&str] = &["edition", "centre", "centreDescription", "subCentre"];

/// Keys merged into every data variable's attributes.
pub const DATA_ATTRIBUTES_KEYS: &[&str] = &[
    "paramId",
    "shortName",
    "units",
    "name",
    "cfName",
    "missingValue",
    "totalNumber",
    "gridType",
    "gridDefinitionDescription",
    "numberOfPoints",
    "stepUnits",
    "stepType",
    "typeOfLevel",
];

/// Keys that become dimensions of a data variable.
pub const HEADER_KEYS: &[&str] = &["number", "dataDate", "dataTime", "endStep", "topLevel"];

/// Key that separates the data variables of a dataset.
pub const VARIABLE_KEY: &str = "paramId";

/// Grid keys of a `regular_ll` grid, read from the first message of a variable.
pub const REGULAR_LL_GRID_KEYS: &[&str] = &[
    "Ni",
    "Nj",
    "latitudeOfFirstGridPointInDegrees",
    "longitudeOfFirstGridPointInDegrees",
    "latitudeOfLastGridPointInDegrees",
    "longitudeOfLastGridPointInDegrees",
    "iDirectionIncrementInDegrees",
    "jDirectionIncrementInDegrees",
    "jPointsAreConsecutive",
];

/// Prefix of attributes copied verbatim from message keys.
pub const ATTRIBUTE_PREFIX: &str = "GRIB_";

/// Configuration for dataset assembly.
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// Combine `dataDate` and `dataTime` into `forecast_reference_time`.
    pub encode_time: bool,
    /// Rename `topLevel` after the variable's `typeOfLevel`.
    pub encode_vertical: bool,
    /// Reshape the flat `i` dimension of regular grids into latitude and longitude.
    pub encode_geography: bool,
    /// Turn single-valued header keys into scalar coordinates.
    pub squeeze: bool,
    /// Fail with `DuplicateField` when two messages address the same slice.
    pub strict_overlaps: bool,
    /// Key separating data variables.
    pub variable_key: String,
    /// Keys that may become dimensions, in dimension order.
    pub header_keys: Vec<String>,
    /// Keys merged into data variable attributes.
    pub data_attribute_keys: Vec<String>,
    /// Keys copied into global attributes.
    pub global_attribute_keys: Vec<String>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            encode_time: true,
            encode_vertical: true,
            encode_geography: true,
            squeeze: true,
            strict_overlaps: false,
            variable_key: VARIABLE_KEY.to_string(),
            header_keys: to_owned(HEADER_KEYS),
            data_attribute_keys: to_owned(DATA_ATTRIBUTES_KEYS),
            global_attribute_keys: to_owned(GLOBAL_ATTRIBUTES_KEYS),
        }
    }
}

impl AssemblyConfig {
    /// Default configuration with every semantic encoding disabled.
    pub fn no_encode() -> Self {
        Self {
            encode_time: false,
            encode_vertical: false,
            encode_geography: false,
            ..Self::default()
        }
    }

    /// Sets the time encoding.
    pub fn with_encode_time(mut self, enabled: bool) -> Self {
        self.encode_time = enabled;
        self
    }

    /// Sets the vertical encoding.
    pub fn with_encode_vertical(mut self, enabled: bool) -> Self {
        self.encode_vertical = enabled;
        self
    }

    /// Sets the geography encoding.
    pub fn with_encode_geography(mut self, enabled: bool) -> Self {
        self.encode_geography = enabled;
        self
    }

    /// Sets strict overlap checking.
    pub fn with_strict_overlaps(mut self, strict: bool) -> Self {
        self.strict_overlaps = strict;
        self
    }

    /// Every key an index needs for whole-file assembly, without duplicates:
    /// global attribute keys, data attribute keys, the variable key, then
    /// header keys.
    pub fn all_keys(&self) -> Vec<String> {
        let keys: IndexSet<&str> = self
            .global_attribute_keys
            .iter()
            .chain(&self.data_attribute_keys)
            .chain(std::iter::once(&self.variable_key))
            .chain(&self.header_keys)
            .map(String::as_str)
            .collect();
        keys.into_iter().map(str::to_string).collect()
    }
}

fn to_owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}
