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

use crate::error::TableError;
use crate::geometry::{GeometryType, SpatialReference};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicase::UniCase;

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum FieldType {
    SmallInteger,
    Integer,
    BigInteger,
    Single,
    Double,
    String,
    Date,
    ObjectId,
    Geometry,
    Blob,
    Guid,
    GlobalId,
    Xml,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryDef {
    pub geometry_type: GeometryType,
    pub spatial_reference: SpatialReference,
    pub has_z: bool,
    pub has_m: bool,
}

/// A column definition. Immutable once added to a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    alias: Option<String>,
    field_type: FieldType,
    length: Option<u32>,
    precision: Option<u32>,
    nullable: bool,
    domain: Option<String>,
    geometry_def: Option<GeometryDef>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            alias: None,
            field_type,
            length: None,
            precision: None,
            nullable: field_type != FieldType::ObjectId,
            domain: None,
            geometry_def: None,
        }
    }

    pub fn object_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::ObjectId)
    }

    pub fn shape(
        name: impl Into<String>,
        geometry_type: GeometryType,
        spatial_reference: SpatialReference,
    ) -> Self {
        Self::new(name, FieldType::Geometry).geometry_def(GeometryDef {
            geometry_type,
            spatial_reference,
            has_z: false,
            has_m: false,
        })
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn geometry_def(mut self, geometry_def: GeometryDef) -> Self {
        self.geometry_def = Some(geometry_def);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The alias, falling back to the name when none was set.
    pub fn alias_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn field_length(&self) -> Option<u32> {
        self.length
    }

    pub fn field_precision(&self) -> Option<u32> {
        self.precision
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn geometry(&self) -> Option<&GeometryDef> {
        self.geometry_def.as_ref()
    }

    pub fn is_object_id(&self) -> bool {
        self.field_type == FieldType::ObjectId
    }

    pub fn is_shape(&self) -> bool {
        self.field_type == FieldType::Geometry
    }
}

/// Ordered field list with case-insensitive lookup.
///
/// Positions never change once assigned; the object id and shape positions are cached so rows
/// can reach them without a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    fields: Vec<Field>,
    by_name: HashMap<UniCase<String>, usize>,
    oid_index: Option<usize>,
    shape_index: Option<usize>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field. Rejected without modifying the list if the name is taken, or if it
    /// would introduce a second object id or shape field.
    pub fn add(&mut self, field: Field) -> Result<usize, TableError> {
        let key = UniCase::new(field.name.clone());
        if self.by_name.contains_key(&key) {
            return Err(TableError::DuplicateField(field.name));
        }
        if field.is_object_id() && self.oid_index.is_some() {
            return Err(TableError::DuplicateObjectIdField(field.name));
        }
        if field.is_shape() && self.shape_index.is_some() {
            return Err(TableError::DuplicateShapeField(field.name));
        }

        let index = self.fields.len();
        if field.is_object_id() {
            self.oid_index = Some(index);
        }
        if field.is_shape() {
            self.shape_index = Some(index);
        }
        self.by_name.insert(key, index);
        self.fields.push(field);
        Ok(index)
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.by_name.get(&UniCase::new(name.to_string())).copied()
    }

    pub fn find_field_by_alias(&self, alias: &str) -> Option<usize> {
        let alias = UniCase::new(alias);
        self.fields
            .iter()
            .position(|f| UniCase::new(f.alias_name()) == alias)
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn oid_index(&self) -> Option<usize> {
        self.oid_index
    }

    pub fn shape_index(&self) -> Option<usize> {
        self.shape_index
    }

    pub fn oid_field(&self) -> Option<&Field> {
        self.oid_index.and_then(|i| self.fields.get(i))
    }

    pub fn shape_field(&self) -> Option<&Field> {
        self.shape_index.and_then(|i| self.fields.get(i))
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Fields {
        let mut fields = Fields::new();
        fields.add(Field::object_id("OBJECTID")).unwrap();
        fields
            .add(Field::new("NAME", FieldType::String).alias("Street name").length(64))
            .unwrap();
        fields
            .add(Field::shape(
                "SHAPE",
                GeometryType::Polyline,
                SpatialReference::from_wkid(2056),
            ))
            .unwrap();
        fields
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let fields = sample();
        assert_eq!(fields.find_field("objectid"), Some(0));
        assert_eq!(fields.find_field("Name"), Some(1));
        assert_eq!(fields.find_field("missing"), None);
        assert_eq!(fields.find_field_by_alias("STREET NAME"), Some(1));
        assert_eq!(fields.find_field_by_alias("shape"), Some(2));
    }

    #[test]
    fn test_duplicate_name_leaves_list_unchanged() {
        let mut fields = sample();
        let before: Vec<String> = fields.iter().map(|f| f.name().to_string()).collect();
        let result = fields.add(Field::new("name", FieldType::Integer));
        assert_eq!(result, Err(TableError::DuplicateField("name".into())));
        let after: Vec<String> = fields.iter().map(|f| f.name().to_string()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_second_oid_and_shape_rejected() {
        let mut fields = sample();
        assert!(matches!(
            fields.add(Field::object_id("FID")),
            Err(TableError::DuplicateObjectIdField(_))
        ));
        assert!(matches!(
            fields.add(Field::shape("GEOM", GeometryType::Point, SpatialReference::default())),
            Err(TableError::DuplicateShapeField(_))
        ));
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.oid_index(), Some(0));
        assert_eq!(fields.shape_index(), Some(2));
    }

    #[test]
    fn test_object_id_is_not_nullable() {
        let fields = sample();
        assert!(!fields.oid_field().unwrap().is_nullable());
        assert!(fields.get(1).unwrap().is_nullable());
    }
}
