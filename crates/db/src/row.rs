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

use crate::schema::TableSchema;
use crate::value_storage::{StorageKind, ValueStorage};
use std::borrow::Cow;
use std::sync::Arc;
use vgdb_common::{Geometry, RowAccess, TableError, Value};

/// One row as handed from a backing store to its table: the object id plus one value per
/// schema field, in schema order. The shape, if any, sits at the shape field's position.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub oid: i64,
    pub values: Vec<Value>,
}

impl RowRecord {
    pub fn new(oid: i64, values: Vec<Value>) -> Self {
        Self { oid, values }
    }
}

/// A row, or a feature when its schema carries a shape field.
///
/// The object id is mirrored into the object id field's slot so positional reads see it.
/// Geometry is held as exactly one `Arc` reference: [`Row::shape`] hands out a new
/// reference the caller owns, [`Row::set_shape`] takes the caller's reference and drops the
/// one it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    oid: i64,
    schema: Arc<TableSchema>,
    storage: ValueStorage,
}

impl Row {
    pub fn new(schema: Arc<TableSchema>, oid: i64, kind: StorageKind) -> Self {
        let storage = ValueStorage::new(kind, schema.field_names());
        let mut row = Self {
            oid,
            schema,
            storage,
        };
        row.write_oid_slot();
        row
    }

    pub fn from_record(
        schema: Arc<TableSchema>,
        record: RowRecord,
        kind: StorageKind,
    ) -> Result<Self, TableError> {
        let mut row = Row::new(schema, record.oid, kind);
        row.fill(record)?;
        Ok(row)
    }

    fn write_oid_slot(&mut self) {
        if let Some(index) = self.schema.oid_index() {
            // The slot exists: storage is sized from the same schema.
            let _ = self.storage.set(index, Value::BigInteger(self.oid));
        }
    }

    /// Load a record into this row in place. The row is recycled to the record's id first,
    /// so nothing from the previous occupant survives.
    pub(crate) fn fill(&mut self, record: RowRecord) -> Result<(), TableError> {
        let count = self.storage.field_count();
        if record.values.len() != count {
            return Err(TableError::Backing(format!(
                "record for oid {} has {} values, table {} has {} fields",
                record.oid,
                record.values.len(),
                self.schema.name(),
                count
            )));
        }
        self.recycle(record.oid);
        let oid_index = self.schema.oid_index();
        for (index, value) in record.values.into_iter().enumerate() {
            if Some(index) == oid_index {
                continue;
            }
            self.storage.set(index, value)?;
        }
        Ok(())
    }

    pub fn oid(&self) -> i64 {
        self.oid
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        self.schema.name()
    }

    pub fn field_count(&self) -> usize {
        self.storage.field_count()
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    pub fn storage(&self) -> &ValueStorage {
        &self.storage
    }

    pub fn get(&self, index: usize) -> Result<&Value, TableError> {
        self.storage.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Value, TableError> {
        let index = self
            .schema
            .find_field(name)
            .ok_or_else(|| TableError::FieldNotFound(name.to_string()))?;
        self.storage.get(index)
    }

    /// Write a value. Writing an integer into the object id field changes the row's id; any
    /// other value there is rejected.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), TableError> {
        if Some(index) == self.schema.oid_index() {
            let oid = value
                .as_i64()
                .ok_or_else(|| TableError::InvalidObjectId(format!("{value:?}")))?;
            self.storage.set(index, Value::BigInteger(oid))?;
            self.oid = oid;
            return Ok(());
        }
        self.storage.set(index, value)
    }

    /// Give the row a new identity. Every value is reset to `Value::Null`.
    pub fn recycle(&mut self, oid: i64) {
        self.oid = oid;
        self.storage.clear();
        self.write_oid_slot();
    }

    /// Recycle, switching storage kind if it differs.
    pub fn recycle_as(&mut self, oid: i64, kind: StorageKind) {
        if self.storage.kind() != kind {
            self.storage = ValueStorage::new(kind, self.schema.field_names());
        }
        self.recycle(oid);
    }

    pub fn is_feature(&self) -> bool {
        self.schema.shape_index().is_some()
    }

    /// A new reference to the row's geometry. The row keeps its own.
    pub fn shape(&self) -> Option<Arc<Geometry>> {
        self.shape_ref().cloned()
    }

    fn shape_ref(&self) -> Option<&Arc<Geometry>> {
        let index = self.schema.shape_index()?;
        self.storage.get(index).ok()?.as_geometry()
    }

    /// Replace the geometry, releasing the one previously held.
    pub fn set_shape(&mut self, geometry: Option<Arc<Geometry>>) -> Result<(), TableError> {
        let index = self
            .schema
            .shape_index()
            .ok_or_else(|| TableError::NotAFeatureClass(self.schema.name().to_string()))?;
        self.storage
            .set(index, geometry.map(Value::Geometry).unwrap_or(Value::Null))
    }

    /// Copy the row out as a record, e.g. for handing to another backing store.
    pub fn to_record(&self) -> RowRecord {
        let values = (0..self.field_count())
            .map(|i| self.storage.get(i).cloned().unwrap_or_default())
            .collect();
        RowRecord::new(self.oid, values)
    }
}

impl RowAccess for Row {
    fn lookup(&self, field_name: &str) -> Option<Cow<'_, Value>> {
        let index = self.schema.find_field(field_name)?;
        self.storage.get(index).ok().map(Cow::Borrowed)
    }

    fn geometry(&self) -> Option<&Geometry> {
        self.shape_ref().map(|g| g.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DatasetKind;
    use test_case::test_case;
    use vgdb_common::{Field, FieldType, GeometryType, SpatialReference};

    fn schema() -> Arc<TableSchema> {
        let mut schema = TableSchema::new(
            "ROADS",
            3,
            DatasetKind::FeatureClass {
                geometry_type: GeometryType::Point,
                spatial_reference: SpatialReference::from_wkid(2056),
            },
        );
        schema.add_field(Field::object_id("OBJECTID")).unwrap();
        schema
            .add_field(Field::new("NAME", FieldType::String))
            .unwrap();
        schema
            .add_field(Field::shape(
                "SHAPE",
                GeometryType::Point,
                SpatialReference::from_wkid(2056),
            ))
            .unwrap();
        Arc::new(schema)
    }

    #[test_case(StorageKind::Array; "array")]
    #[test_case(StorageKind::PropertySet; "property set")]
    fn test_recycle_clears_values(kind: StorageKind) {
        let mut row = Row::new(schema(), 1, kind);
        row.set(1, Value::from("Limmatquai")).unwrap();
        row.set_shape(Some(Arc::new(Geometry::point(1.0, 2.0))))
            .unwrap();

        row.recycle(2);
        assert_eq!(row.oid(), 2);
        assert_eq!(row.get(0).unwrap(), &Value::BigInteger(2));
        assert_eq!(row.get(1).unwrap(), &Value::Null);
        assert_eq!(row.shape(), None);
        assert_eq!(row.storage_kind(), kind);
    }

    #[test]
    fn test_recycle_as_switches_storage() {
        let mut row = Row::new(schema(), 1, StorageKind::Array);
        row.recycle_as(5, StorageKind::PropertySet);
        assert_eq!(row.storage_kind(), StorageKind::PropertySet);
        assert_eq!(row.oid(), 5);
        assert_eq!(row.get_by_name("objectid").unwrap(), &Value::BigInteger(5));
    }

    #[test]
    fn test_shape_references_are_not_leaked() {
        let mut row = Row::new(schema(), 1, StorageKind::Array);
        let first = Arc::new(Geometry::point(1.0, 1.0));
        row.set_shape(Some(first.clone())).unwrap();
        assert_eq!(Arc::strong_count(&first), 2);

        let got = row.shape().unwrap();
        assert_eq!(Arc::strong_count(&first), 3);
        drop(got);
        assert_eq!(Arc::strong_count(&first), 2);

        let second = Arc::new(Geometry::point(2.0, 2.0));
        row.set_shape(Some(second.clone())).unwrap();
        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(Arc::strong_count(&second), 2);

        drop(row);
        assert_eq!(Arc::strong_count(&second), 1);
    }

    #[test]
    fn test_set_shape_on_table_fails() {
        let mut plain = TableSchema::new("T", 1, DatasetKind::Table);
        plain.add_field(Field::object_id("OID")).unwrap();
        let mut row = Row::new(Arc::new(plain), 1, StorageKind::Array);
        assert!(matches!(
            row.set_shape(Some(Arc::new(Geometry::point(0.0, 0.0)))),
            Err(TableError::NotAFeatureClass(_))
        ));
    }

    #[test]
    fn test_fill_rejects_wrong_width() {
        let mut row = Row::new(schema(), 1, StorageKind::Array);
        let result = row.fill(RowRecord::new(3, vec![Value::Null]));
        assert!(matches!(result, Err(TableError::Backing(_))));
    }

    #[test]
    fn test_setting_oid_field_changes_identity() {
        let mut row = Row::new(schema(), 1, StorageKind::Array);
        row.set(0, Value::Integer(42)).unwrap();
        assert_eq!(row.oid(), 42);
        assert_eq!(row.get(0).unwrap(), &Value::BigInteger(42));
    }

    #[test_case(Value::from("abc"); "string")]
    #[test_case(Value::Null; "null")]
    #[test_case(Value::Double(3.0); "double")]
    fn test_non_integer_oid_is_rejected(value: Value) {
        let mut row = Row::new(schema(), 7, StorageKind::Array);
        assert!(matches!(
            row.set(0, value),
            Err(TableError::InvalidObjectId(_))
        ));
        assert_eq!(row.oid(), 7);
        assert_eq!(row.get(0).unwrap(), &Value::BigInteger(7));
    }
}
