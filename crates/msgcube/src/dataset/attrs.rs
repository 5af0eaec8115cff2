//! Attribute maps and conflict-checked merging.

use crate::error::{CubeError, Result};
use crate::value::Value;
use indexmap::IndexMap;

/// Ordered attribute mapping.
pub type Attributes = IndexMap<String, Value>;

/// Merges `update` into `master` key by key.
///
/// An existing key with an equal value is left alone. An existing key with a
/// different value fails with `ConflictingAttribute`, and `master` is not
/// modified at all.
pub fn dict_merge(master: &mut Attributes, update: &Attributes) -> Result<()> {
    for (key, new) in update {
        if let Some(existing) = master.get(key) {
            if existing != new {
                return Err(CubeError::ConflictingAttribute {
                    key: key.clone(),
                    existing: existing.clone(),
                    new: new.clone(),
                });
            }
        }
    }
    for (key, value) in update {
        if !master.contains_key(key) {
            master.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}
