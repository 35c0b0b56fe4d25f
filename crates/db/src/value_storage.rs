// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Per-row attribute storage.

use indexmap::IndexMap;
use std::sync::Arc;
use unicase::UniCase;
use vgdb_common::{TableError, Value};

static UNSET: Value = Value::Null;

/// Which storage a row uses. Chosen when the row is built and fixed until it is recycled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum StorageKind {
    /// Positional, one slot per field.
    #[default]
    Array,
    /// Name-keyed property bag, for code that only understands property containers.
    PropertySet,
}

/// A name-keyed bag of values, ordered by insertion. Names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    properties: IndexMap<UniCase<String>, Value>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(&UniCase::new(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.properties.insert(UniCase::new(name.to_string()), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.properties
            .shift_remove(&UniCase::new(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn clear(&mut self) {
        self.properties.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Attribute values of one row.
///
/// Both variants answer positional `get`/`set`; the property set variant translates the
/// position into a field name through the schema's name list. Absent properties read as
/// `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueStorage {
    Array(Vec<Value>),
    PropertySet {
        names: Arc<[String]>,
        bag: PropertySet,
    },
}

impl ValueStorage {
    pub fn new(kind: StorageKind, names: &Arc<[String]>) -> Self {
        match kind {
            StorageKind::Array => ValueStorage::Array(vec![Value::Null; names.len()]),
            StorageKind::PropertySet => ValueStorage::PropertySet {
                names: names.clone(),
                bag: PropertySet::new(),
            },
        }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            ValueStorage::Array(_) => StorageKind::Array,
            ValueStorage::PropertySet { .. } => StorageKind::PropertySet,
        }
    }

    pub fn field_count(&self) -> usize {
        match self {
            ValueStorage::Array(values) => values.len(),
            ValueStorage::PropertySet { names, .. } => names.len(),
        }
    }

    pub fn get(&self, index: usize) -> Result<&Value, TableError> {
        let count = self.field_count();
        match self {
            ValueStorage::Array(values) => values
                .get(index)
                .ok_or(TableError::FieldIndexOutOfRange { index, count }),
            ValueStorage::PropertySet { names, bag } => {
                let name = names
                    .get(index)
                    .ok_or(TableError::FieldIndexOutOfRange { index, count })?;
                Ok(bag.get(name).unwrap_or(&UNSET))
            }
        }
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<(), TableError> {
        let count = self.field_count();
        match self {
            ValueStorage::Array(values) => {
                let slot = values
                    .get_mut(index)
                    .ok_or(TableError::FieldIndexOutOfRange { index, count })?;
                *slot = value;
            }
            ValueStorage::PropertySet { names, bag } => {
                let name = names
                    .get(index)
                    .ok_or(TableError::FieldIndexOutOfRange { index, count })?;
                if value.is_null() {
                    bag.remove(name);
                } else {
                    bag.set(name, value);
                }
            }
        }
        Ok(())
    }

    /// Reset every value to `Value::Null`, keeping allocations.
    pub fn clear(&mut self) {
        match self {
            ValueStorage::Array(values) => values.fill(Value::Null),
            ValueStorage::PropertySet { bag, .. } => bag.clear(),
        }
    }

    /// The underlying property container, for interop with code that only speaks it.
    pub fn as_property_set(&self) -> Option<&PropertySet> {
        match self {
            ValueStorage::PropertySet { bag, .. } => Some(bag),
            ValueStorage::Array(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn names() -> Arc<[String]> {
        vec!["OBJECTID".to_string(), "NAME".to_string(), "LANES".to_string()].into()
    }

    #[test_case(StorageKind::Array; "array")]
    #[test_case(StorageKind::PropertySet; "property set")]
    fn test_get_set_roundtrip(kind: StorageKind) {
        let mut storage = ValueStorage::new(kind, &names());
        assert_eq!(storage.kind(), kind);
        assert_eq!(storage.field_count(), 3);
        assert_eq!(storage.get(1).unwrap(), &Value::Null);

        storage.set(1, Value::from("Seestrasse")).unwrap();
        storage.set(2, Value::SmallInteger(4)).unwrap();
        assert_eq!(storage.get(1).unwrap(), &Value::from("Seestrasse"));
        assert_eq!(storage.get(2).unwrap(), &Value::SmallInteger(4));

        storage.clear();
        assert_eq!(storage.get(1).unwrap(), &Value::Null);
        assert_eq!(storage.field_count(), 3);
    }

    #[test_case(StorageKind::Array; "array")]
    #[test_case(StorageKind::PropertySet; "property set")]
    fn test_out_of_range(kind: StorageKind) {
        let mut storage = ValueStorage::new(kind, &names());
        assert_eq!(
            storage.get(3),
            Err(TableError::FieldIndexOutOfRange { index: 3, count: 3 })
        );
        assert!(storage.set(7, Value::Integer(1)).is_err());
    }

    #[test]
    fn test_property_set_is_name_keyed() {
        let mut storage = ValueStorage::new(StorageKind::PropertySet, &names());
        storage.set(1, Value::from("Quai")).unwrap();
        let bag = storage.as_property_set().unwrap();
        assert_eq!(bag.get("name"), Some(&Value::from("Quai")));
        assert_eq!(bag.len(), 1);

        // Writing null drops the property rather than storing a placeholder.
        storage.set(1, Value::Null).unwrap();
        assert!(storage.as_property_set().unwrap().is_empty());
    }
}
