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

use crate::backing::{BackingStore, InMemoryBacking};
use crate::cursor::RowCursor;
use crate::row::Row;
use crate::schema::{DatasetKind, TableSchema};
use crate::value_storage::StorageKind;
use arc_swap::ArcSwap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};
use tracing::debug;
use vgdb_common::{Envelope, Field, FilterError, GeometryType, QueryFilter, TableError};

/// A table or feature class whose rows come from a [`BackingStore`].
///
/// A table starts out unbound and behaves as an empty in-memory table. Once a backing store
/// is attached it stays bound for the rest of its life, and its schema is frozen.
pub struct VirtualTable {
    schema: ArcSwap<TableSchema>,
    backing: OnceLock<Arc<dyn BackingStore>>,
    unbound: InMemoryBacking,
    storage_kind: StorageKind,
}

impl VirtualTable {
    pub fn new(name: impl Into<String>, class_handle: i64) -> Self {
        Self::with_schema(TableSchema::new(name, class_handle, DatasetKind::Table))
    }

    /// A feature class whose geometry type and spatial reference come from `shape`.
    pub fn new_feature_class(
        name: impl Into<String>,
        class_handle: i64,
        shape: Field,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let Some(geometry_def) = shape.geometry().filter(|_| shape.is_shape()) else {
            return Err(TableError::NotAFeatureClass(name));
        };
        let kind = DatasetKind::FeatureClass {
            geometry_type: geometry_def.geometry_type,
            spatial_reference: geometry_def.spatial_reference.clone(),
        };
        let mut schema = TableSchema::new(name, class_handle, kind);
        schema.add_field(shape)?;
        Ok(Self::with_schema(schema))
    }

    pub fn with_schema(schema: TableSchema) -> Self {
        Self {
            schema: ArcSwap::from_pointee(schema),
            backing: OnceLock::new(),
            unbound: InMemoryBacking::new(),
            storage_kind: StorageKind::Array,
        }
    }

    pub fn with_alias(self, alias: impl Into<String>) -> Self {
        let mut schema = (*self.schema.load_full()).clone();
        schema.set_alias(Some(alias.into()));
        self.schema.store(Arc::new(schema));
        self
    }

    pub fn with_kind(self, kind: DatasetKind) -> Self {
        let mut schema = (*self.schema.load_full()).clone();
        schema.set_kind(kind);
        self.schema.store(Arc::new(schema));
        self
    }

    /// Storage used for rows this table builds.
    pub fn with_storage_kind(mut self, storage_kind: StorageKind) -> Self {
        self.storage_kind = storage_kind;
        self
    }

    /// The current schema snapshot.
    pub fn schema(&self) -> Arc<TableSchema> {
        self.schema.load_full()
    }

    pub fn name(&self) -> String {
        self.schema.load().name().to_string()
    }

    pub fn alias(&self) -> String {
        self.schema.load().alias().to_string()
    }

    pub fn class_handle(&self) -> i64 {
        self.schema.load().class_handle()
    }

    pub fn kind(&self) -> DatasetKind {
        self.schema.load().kind().clone()
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage_kind
    }

    pub fn field_count(&self) -> usize {
        self.schema.load().fields().len()
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.schema.load().find_field(name)
    }

    pub fn oid_field_name(&self) -> Option<String> {
        self.schema.load().oid_field_name().map(str::to_string)
    }

    pub fn oid_index(&self) -> Option<usize> {
        self.schema.load().oid_index()
    }

    pub fn shape_field_name(&self) -> Option<String> {
        self.schema.load().shape_field_name().map(str::to_string)
    }

    pub fn shape_index(&self) -> Option<usize> {
        self.schema.load().shape_index()
    }

    pub fn has_oid(&self) -> bool {
        self.schema.load().has_oid()
    }

    pub fn is_feature_class(&self) -> bool {
        self.schema.load().is_feature_class()
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.schema.load().geometry_type()
    }

    pub fn is_bound(&self) -> bool {
        self.backing.get().is_some()
    }

    /// Append a field. Fails on duplicates, and once the table is bound.
    pub fn add_field(&self, field: Field) -> Result<usize, TableError> {
        if self.is_bound() {
            return Err(TableError::SchemaFrozen(self.name()));
        }
        loop {
            let current = self.schema.load_full();
            let mut next = (*current).clone();
            let index = next.add_field(field.clone())?;
            let previous = self.schema.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return Ok(index);
            }
        }
    }

    /// Attach the backing store. A table can be bound only once.
    pub fn bind(&self, backing: Arc<dyn BackingStore>) -> Result<(), TableError> {
        self.backing
            .set(backing)
            .map_err(|_| TableError::AlreadyBound(self.name()))?;
        debug!(table = %self.name(), "bound backing store");
        Ok(())
    }

    pub fn backing(&self) -> &dyn BackingStore {
        match self.backing.get() {
            Some(backing) => backing.as_ref(),
            None => &self.unbound,
        }
    }

    /// Fail early on projections and where clauses naming fields this table does not have,
    /// so an empty store does not mask a broken filter.
    fn check_filter(&self, filter: &QueryFilter) -> Result<(), TableError> {
        let compiled = filter.compile()?;
        let schema = self.schema.load();
        let projected = filter.sub_field_names().unwrap_or_default();
        let referenced = compiled.referenced_fields();
        let names = projected.iter().map(String::as_str).chain(referenced);
        for name in names {
            if schema.find_field(name).is_none() {
                return Err(FilterError::UnknownField(name.to_string()).into());
            }
        }
        Ok(())
    }

    pub fn row_count(&self, filter: &QueryFilter) -> Result<i64, TableError> {
        self.check_filter(filter)?;
        self.backing().row_count(filter)
    }

    pub fn search(
        &self,
        filter: &QueryFilter,
        recycling: bool,
    ) -> Result<RowCursor<'_>, TableError> {
        self.check_filter(filter)?;
        let records = self.backing().search(filter, recycling)?;
        Ok(RowCursor::new(
            self.schema(),
            records,
            recycling,
            self.storage_kind,
        ))
    }

    pub fn get_row(&self, oid: i64) -> Result<Row, TableError> {
        let record = self
            .backing()
            .get_row(oid)?
            .ok_or(TableError::NotFound(oid))?;
        Row::from_record(self.schema(), record, self.storage_kind)
    }

    /// Rows for each id that exists, in the order given. Missing ids are skipped.
    pub fn get_rows(&self, oids: &[i64], recycling: bool) -> RowCursor<'_> {
        let backing = self.backing();
        let records = oids
            .to_vec()
            .into_iter()
            .filter_map(move |oid| backing.get_row(oid).transpose());
        RowCursor::new(
            self.schema(),
            Box::new(records),
            recycling,
            self.storage_kind,
        )
    }

    pub fn extent(&self) -> Result<Option<Envelope>, TableError> {
        if !self.is_feature_class() {
            return Err(TableError::NotAFeatureClass(self.name()));
        }
        self.backing().extent()
    }

    /// A fresh row carrying this table's current schema, not stored anywhere.
    pub fn create_row(&self, oid: i64) -> Row {
        Row::new(self.schema(), oid, self.storage_kind)
    }
}

impl Debug for VirtualTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let schema = self.schema.load();
        f.debug_struct("VirtualTable")
            .field("name", &schema.name())
            .field("class_handle", &schema.class_handle())
            .field("fields", &schema.fields().len())
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowRecord;
    use pretty_assertions::assert_eq;
    use vgdb_common::{FieldType, Geometry, SpatialReference, Value};

    fn roads() -> VirtualTable {
        let table = VirtualTable::new_feature_class(
            "ROADS",
            12,
            Field::shape("SHAPE", GeometryType::Polyline, SpatialReference::from_wkid(2056)),
        )
        .unwrap();
        table.add_field(Field::object_id("OBJECTID")).unwrap();
        table.add_field(Field::new("NAME", FieldType::String)).unwrap();
        table
    }

    #[test]
    fn test_feature_class_metadata() {
        let table = roads().with_alias("Roads");
        assert!(table.is_feature_class());
        assert_eq!(table.geometry_type(), GeometryType::Polyline);
        assert_eq!(table.shape_index(), Some(0));
        assert_eq!(table.oid_index(), Some(1));
        assert_eq!(table.oid_field_name().as_deref(), Some("OBJECTID"));
        assert_eq!(table.alias(), "Roads");
        assert_eq!(table.find_field("name"), Some(2));
        assert_eq!(table.find_field("missing"), None);
    }

    #[test]
    fn test_non_shape_field_is_not_a_feature_class() {
        let result = VirtualTable::new_feature_class("X", 1, Field::new("A", FieldType::Integer));
        assert!(matches!(result, Err(TableError::NotAFeatureClass(_))));
    }

    #[test]
    fn test_unbound_table_is_empty() {
        let table = roads();
        assert!(!table.is_bound());
        assert_eq!(table.row_count(&QueryFilter::new()).unwrap(), 0);
        assert_eq!(table.search(&QueryFilter::new(), false).unwrap().count(), 0);
        assert_eq!(table.get_row(1), Err(TableError::NotFound(1)));
        assert_eq!(table.extent().unwrap(), None);
    }

    #[test]
    fn test_filter_on_unknown_field_fails_even_when_empty() {
        let table = roads();
        let filter = QueryFilter::new().with_where_clause("LENGTH > 3");
        assert_eq!(
            table.row_count(&filter),
            Err(TableError::InvalidFilter(FilterError::UnknownField(
                "LENGTH".into()
            )))
        );
    }

    #[test]
    fn test_projection_of_unknown_field_fails_even_when_empty() {
        let table = roads();
        let filter = QueryFilter::new().with_sub_fields("NAME, NOPE");
        assert_eq!(
            table.search(&filter, false).err(),
            Some(TableError::InvalidFilter(FilterError::UnknownField(
                "NOPE".into()
            )))
        );
        assert!(table.row_count(&filter).is_err());
        let known = QueryFilter::new().with_sub_fields("name, SHAPE");
        assert_eq!(table.row_count(&known).unwrap(), 0);
    }

    #[test]
    fn test_schema_frozen_after_bind() {
        let table = roads();
        table.bind(Arc::new(InMemoryBacking::new())).unwrap();
        assert_eq!(
            table.add_field(Field::new("LANES", FieldType::SmallInteger)),
            Err(TableError::SchemaFrozen("ROADS".into()))
        );
    }

    #[test]
    fn test_rows_keep_their_schema_snapshot() {
        let table = VirtualTable::new("T", 1);
        table.add_field(Field::object_id("OID")).unwrap();
        let early = table.create_row(1);
        table.add_field(Field::new("A", FieldType::Integer)).unwrap();
        let late = table.create_row(2);
        assert_eq!(early.field_count(), 1);
        assert_eq!(late.field_count(), 2);
    }

    #[test]
    fn test_recycling_cursor_reuses_row() {
        let table = roads();
        let backing = Arc::new(InMemoryBacking::new());
        for oid in 1..=3 {
            let mut row = table.create_row(oid);
            row.set(2, Value::from(format!("road {oid}"))).unwrap();
            row.set_shape(Some(Arc::new(Geometry::point(oid as f64, 0.0))))
                .unwrap();
            backing.insert(row);
        }
        table.bind(backing).unwrap();

        let mut cursor = table.search(&QueryFilter::new(), true).unwrap();
        let mut seen = vec![];
        while let Some(row) = cursor.advance() {
            let row = row.unwrap();
            seen.push((row.oid(), row.get(2).unwrap().clone()));
        }
        assert_eq!(
            seen,
            vec![
                (1, Value::from("road 1")),
                (2, Value::from("road 2")),
                (3, Value::from("road 3")),
            ]
        );
    }

    #[test]
    fn test_get_rows_skips_missing() {
        let table = VirtualTable::new("T", 1);
        table.add_field(Field::object_id("OID")).unwrap();
        let backing = Arc::new(InMemoryBacking::from_rows(
            [1, 2, 3].map(|oid| table.create_row(oid)),
        ));
        table.bind(backing).unwrap();
        let oids: Vec<i64> = table
            .get_rows(&[3, 9, 1], false)
            .map(|r| r.unwrap().oid())
            .collect();
        assert_eq!(oids, vec![3, 1]);
    }

    #[test]
    fn test_extent_on_plain_table_fails() {
        let table = VirtualTable::new("T", 1);
        assert!(matches!(
            table.extent(),
            Err(TableError::NotAFeatureClass(_))
        ));
    }

    #[test]
    fn test_record_width_mismatch_surfaces_on_read() {
        struct Narrow;
        impl BackingStore for Narrow {
            fn extent(&self) -> Result<Option<Envelope>, TableError> {
                Ok(None)
            }
            fn row_count(&self, _: &QueryFilter) -> Result<i64, TableError> {
                Ok(1)
            }
            fn get_row(&self, oid: i64) -> Result<Option<RowRecord>, TableError> {
                Ok(Some(RowRecord::new(oid, vec![])))
            }
            fn search(
                &self,
                _: &QueryFilter,
                _: bool,
            ) -> Result<crate::backing::RecordStream<'_>, TableError> {
                Ok(Box::new(std::iter::once(Ok(RowRecord::new(1, vec![])))))
            }
        }
        let table = roads();
        table.bind(Arc::new(Narrow)).unwrap();
        assert!(matches!(table.get_row(1), Err(TableError::Backing(_))));
    }
}
