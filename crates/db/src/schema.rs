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

use std::sync::Arc;
use vgdb_common::{Field, Fields, GeometryType, SpatialReference, TableError};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DatasetKind {
    #[default]
    Table,
    FeatureClass {
        geometry_type: GeometryType,
        spatial_reference: SpatialReference,
    },
    /// A joined or relationship-backed table.
    RelationshipTable,
}

/// An immutable snapshot of a table's schema.
///
/// Tables swap in a new snapshot on every field addition; rows keep the snapshot they were
/// built with.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    alias: Option<String>,
    class_handle: i64,
    kind: DatasetKind,
    fields: Fields,
    field_names: Arc<[String]>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, class_handle: i64, kind: DatasetKind) -> Self {
        Self {
            name: name.into(),
            alias: None,
            class_handle,
            kind,
            fields: Fields::new(),
            field_names: Arc::from(Vec::new()),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub(crate) fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    pub(crate) fn set_kind(&mut self, kind: DatasetKind) {
        self.kind = kind;
    }

    /// Append a field to this snapshot. Tables go through [`crate::VirtualTable::add_field`],
    /// which swaps in the result.
    pub fn add_field(&mut self, field: Field) -> Result<usize, TableError> {
        let index = self.fields.add(field)?;
        self.field_names = self.fields.iter().map(|f| f.name().to_string()).collect();
        Ok(index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn class_handle(&self) -> i64 {
        self.class_handle
    }

    pub fn kind(&self) -> &DatasetKind {
        &self.kind
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field_names(&self) -> &Arc<[String]> {
        &self.field_names
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.find_field(name)
    }

    pub fn oid_index(&self) -> Option<usize> {
        self.fields.oid_index()
    }

    pub fn oid_field_name(&self) -> Option<&str> {
        self.fields.oid_field().map(|f| f.name())
    }

    pub fn shape_index(&self) -> Option<usize> {
        self.fields.shape_index()
    }

    pub fn shape_field_name(&self) -> Option<&str> {
        self.fields.shape_field().map(|f| f.name())
    }

    pub fn has_oid(&self) -> bool {
        self.fields.oid_index().is_some()
    }

    pub fn is_feature_class(&self) -> bool {
        matches!(self.kind, DatasetKind::FeatureClass { .. })
    }

    pub fn geometry_type(&self) -> GeometryType {
        match &self.kind {
            DatasetKind::FeatureClass { geometry_type, .. } => *geometry_type,
            _ => GeometryType::Null,
        }
    }

    pub fn spatial_reference(&self) -> Option<&SpatialReference> {
        match &self.kind {
            DatasetKind::FeatureClass {
                spatial_reference, ..
            } => Some(spatial_reference),
            _ => None,
        }
    }
}
