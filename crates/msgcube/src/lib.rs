//! msgcube - record stream indexing and dataset assembly
//!
//! This crate indexes files made of self-describing binary records
//! ("messages") by the values of chosen header keys, and assembles the
//! grouped messages into labelled N-dimensional arrays.
//!
//! # Components
//!
//! - [`Stream`]: Restartable iteration over the messages of a file
//! - [`Index`]: Header tuple to byte offset mapping, with [`Index::subindex`] filtering
//! - [`build_data_var_components`]: Assembly of one variable into an N-d array
//! - [`Dataset`]: Every variable of a file with shared dimensions and coordinates
//! - [`RecordWriter`] / [`RecordDecoder`]: Reference record format I/O
//!
//! # Example
//!
//! ```rust,no_run
//! use msgcube::{build_data_var_components, AssemblyConfig, Stream};
//!
//! let config = AssemblyConfig::default();
//! let index = Stream::new("era5-levels.mrec").index(config.all_keys().as_slice())?;
//!
//! // Restrict to one physical variable and assemble it
//! let temperature = index.subindex([("paramId", 130)])?;
//! let components = build_data_var_components(&temperature, &config)?;
//! println!("{:?}", components.dimensions);
//! # Ok::<(), msgcube::CubeError>(())
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod index;
pub mod message;
pub mod schema;
pub mod stream;
pub mod value;

pub use codec::{Decoder, MessageHandle, MessageRecord, RecordDecoder, RecordWriter};
pub use config::AssemblyConfig;
pub use dataset::{
    build_data_var_components, dict_merge, Attributes, Data, DataVarComponents, Dataset, Variable,
};
pub use error::{CubeError, Result};
pub use index::{HeaderTuple, Index};
pub use message::{ComputedKey, ComputedKeys, ComputedKeysMessage, KeyLookup, Message};
pub use schema::{build_schema, KeySchema, KeySpec};
pub use stream::{OpenMode, Stream};
pub use value::{NativeType, TextEncoding, Value};
