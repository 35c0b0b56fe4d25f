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

//! Conversions between table-layer types and wire messages.

use crate::{
    DatasetKindMsg, FieldMsg, GdbObjectMsg, ObjectClassMsg, RpcError, ShapeMsg, ValueMsg,
    WorkspaceDbTypeMsg, WorkspaceMsg,
};
use chrono::{DateTime, NaiveDateTime};
use std::sync::Arc;
use uuid::Uuid;
use vgdb_common::{Envelope, Field, FieldType, Geometry, GeometryDef, TableError, Value};
use vgdb_db::{DatasetKind, RowRecord, TableSchema, WorkspaceDbType, WorkspaceIdentity};

pub fn field_to_msg(field: &Field) -> FieldMsg {
    let geometry = field.geometry();
    FieldMsg {
        name: field.name().to_string(),
        alias: field.alias_name().to_string(),
        field_type: field.field_type(),
        length: field.field_length(),
        precision: field.field_precision(),
        nullable: field.is_nullable(),
        domain_name: field.domain_name().map(str::to_string),
        geometry_type: geometry.map(|g| g.geometry_type).unwrap_or_default(),
        spatial_reference: geometry.map(|g| g.spatial_reference.clone()),
        has_z: geometry.is_some_and(|g| g.has_z),
        has_m: geometry.is_some_and(|g| g.has_m),
    }
}

pub fn field_from_msg(msg: &FieldMsg) -> Field {
    let mut field = Field::new(msg.name.clone(), msg.field_type).nullable(msg.nullable);
    if msg.alias != msg.name {
        field = field.alias(msg.alias.clone());
    }
    if let Some(length) = msg.length {
        field = field.length(length);
    }
    if let Some(precision) = msg.precision {
        field = field.precision(precision);
    }
    if let Some(domain) = &msg.domain_name {
        field = field.domain(domain.clone());
    }
    if msg.field_type == FieldType::Geometry {
        field = field.geometry_def(GeometryDef {
            geometry_type: msg.geometry_type,
            spatial_reference: msg.spatial_reference.clone().unwrap_or_default(),
            has_z: msg.has_z,
            has_m: msg.has_m,
        });
    }
    field
}

fn date_to_micros(date: &NaiveDateTime) -> i64 {
    date.and_utc().timestamp_micros()
}

fn date_from_micros(micros: i64) -> Result<NaiveDateTime, RpcError> {
    DateTime::from_timestamp_micros(micros)
        .map(|d| d.naive_utc())
        .ok_or_else(|| RpcError::CouldNotDecode(format!("date out of range: {micros}")))
}

pub fn value_to_msg(value: &Value) -> ValueMsg {
    match value {
        Value::Null => ValueMsg::Null,
        Value::SmallInteger(i) => ValueMsg::SmallInteger(*i),
        Value::Integer(i) => ValueMsg::Integer(*i),
        Value::BigInteger(i) => ValueMsg::BigInteger(*i),
        Value::Single(f) => ValueMsg::Single(*f),
        Value::Double(f) => ValueMsg::Double(*f),
        Value::String(s) => ValueMsg::String(s.clone()),
        Value::Date(d) => ValueMsg::Date(date_to_micros(d)),
        Value::Guid(g) => ValueMsg::Guid(g.into_bytes()),
        Value::Blob(b) => ValueMsg::Blob(b.clone()),
        Value::Geometry(g) => ValueMsg::Shape(shape_to_msg(g)),
    }
}

pub fn value_from_msg(msg: ValueMsg) -> Result<Value, RpcError> {
    Ok(match msg {
        ValueMsg::Null => Value::Null,
        ValueMsg::SmallInteger(i) => Value::SmallInteger(i),
        ValueMsg::Integer(i) => Value::Integer(i),
        ValueMsg::BigInteger(i) => Value::BigInteger(i),
        ValueMsg::Single(f) => Value::Single(f),
        ValueMsg::Double(f) => Value::Double(f),
        ValueMsg::String(s) => Value::String(s),
        ValueMsg::Date(micros) => Value::Date(date_from_micros(micros)?),
        ValueMsg::Guid(bytes) => Value::Guid(Uuid::from_bytes(bytes)),
        ValueMsg::Blob(b) => Value::Blob(b),
        ValueMsg::Shape(shape) => Value::Geometry(Arc::new(shape_from_msg(&shape)?)),
    })
}

fn span<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    values.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

/// The geometry codec.
pub fn shape_to_msg(geometry: &Geometry) -> ShapeMsg {
    let (part_offsets, coords) = geometry.to_parts();
    ShapeMsg {
        geometry_type: geometry.geometry_type(),
        is_envelope: matches!(geometry, Geometry::Envelope(_)),
        part_offsets,
        coords,
    }
}

pub fn shape_from_msg(msg: &ShapeMsg) -> Result<Geometry, RpcError> {
    if msg.is_envelope {
        if msg.coords.len() < 2 {
            return Err(RpcError::CouldNotDecode("envelope without corners".into()));
        }
        let (xmin, xmax) = span(msg.coords.iter().step_by(2));
        let (ymin, ymax) = span(msg.coords.iter().skip(1).step_by(2));
        return Ok(Geometry::Envelope(Envelope::new(xmin, ymin, xmax, ymax)));
    }
    Geometry::from_parts(msg.geometry_type, &msg.part_offsets, &msg.coords).ok_or_else(|| {
        RpcError::CouldNotDecode(format!(
            "malformed {} shape ({} parts, {} coordinates)",
            msg.geometry_type,
            msg.part_offsets.len(),
            msg.coords.len()
        ))
    })
}

fn kind_to_msg(kind: &DatasetKind) -> DatasetKindMsg {
    match kind {
        DatasetKind::Table => DatasetKindMsg::Table,
        DatasetKind::FeatureClass { .. } => DatasetKindMsg::FeatureClass,
        DatasetKind::RelationshipTable => DatasetKindMsg::RelationshipTable,
    }
}

pub fn schema_to_msg(schema: &TableSchema, workspace_handle: i64) -> ObjectClassMsg {
    ObjectClassMsg {
        name: schema.name().to_string(),
        alias: schema.alias().to_string(),
        class_handle: schema.class_handle(),
        workspace_handle,
        dataset_kind: kind_to_msg(schema.kind()),
        geometry_type: schema.geometry_type(),
        spatial_reference: schema.spatial_reference().cloned(),
        fields: schema.fields().iter().map(field_to_msg).collect(),
    }
}

/// Rebuild a schema snapshot from its description.
pub fn schema_from_msg(msg: &ObjectClassMsg) -> Result<TableSchema, TableError> {
    let kind = match msg.dataset_kind {
        DatasetKindMsg::Table => DatasetKind::Table,
        DatasetKindMsg::FeatureClass => DatasetKind::FeatureClass {
            geometry_type: msg.geometry_type,
            spatial_reference: msg.spatial_reference.clone().unwrap_or_default(),
        },
        DatasetKindMsg::RelationshipTable => DatasetKind::RelationshipTable,
    };
    let mut schema = TableSchema::new(msg.name.clone(), msg.class_handle, kind);
    if msg.alias != msg.name {
        schema = schema.with_alias(msg.alias.clone());
    }
    for field in &msg.fields {
        schema.add_field(field_from_msg(field))?;
    }
    Ok(schema)
}

pub fn workspace_to_msg(identity: &WorkspaceIdentity) -> WorkspaceMsg {
    WorkspaceMsg {
        workspace_handle: identity.workspace_handle,
        db_type: match identity.db_type {
            WorkspaceDbType::FileGeodatabase => WorkspaceDbTypeMsg::FileGeodatabase,
            WorkspaceDbType::MobileGeodatabase => WorkspaceDbTypeMsg::MobileGeodatabase,
            WorkspaceDbType::ArcSde => WorkspaceDbTypeMsg::ArcSde,
            WorkspaceDbType::PostgreSql => WorkspaceDbTypeMsg::PostgreSql,
            WorkspaceDbType::Oracle => WorkspaceDbTypeMsg::Oracle,
            WorkspaceDbType::SqlServer => WorkspaceDbTypeMsg::SqlServer,
            WorkspaceDbType::Other => WorkspaceDbTypeMsg::Other,
        },
        path: identity.path.clone(),
        version_name: identity.version_name.clone(),
        default_version_name: identity.default_version_name.clone(),
        default_version_description: identity.default_version_description.clone(),
        default_version_created: identity.default_version_created.as_ref().map(date_to_micros),
    }
}

pub fn workspace_from_msg(msg: &WorkspaceMsg) -> Result<WorkspaceIdentity, RpcError> {
    let db_type = match msg.db_type {
        WorkspaceDbTypeMsg::FileGeodatabase => WorkspaceDbType::FileGeodatabase,
        WorkspaceDbTypeMsg::MobileGeodatabase => WorkspaceDbType::MobileGeodatabase,
        WorkspaceDbTypeMsg::ArcSde => WorkspaceDbType::ArcSde,
        WorkspaceDbTypeMsg::PostgreSql => WorkspaceDbType::PostgreSql,
        WorkspaceDbTypeMsg::Oracle => WorkspaceDbType::Oracle,
        WorkspaceDbTypeMsg::SqlServer => WorkspaceDbType::SqlServer,
        WorkspaceDbTypeMsg::Other => WorkspaceDbType::Other,
    };
    Ok(WorkspaceIdentity {
        workspace_handle: msg.workspace_handle,
        db_type,
        path: msg.path.clone(),
        version_name: msg.version_name.clone(),
        default_version_name: msg.default_version_name.clone(),
        default_version_description: msg.default_version_description.clone(),
        default_version_created: msg
            .default_version_created
            .map(date_from_micros)
            .transpose()?,
    })
}

/// Maps the columns of a row batch onto a local schema.
///
/// Built once per batch. Projected-away fields stay `Value::Null` in the resulting records.
pub struct BatchLayout {
    field_count: usize,
    positions: Vec<usize>,
    oid_index: Option<usize>,
    shape_index: Option<usize>,
}

impl BatchLayout {
    pub fn new(schema: &TableSchema, field_names: &[String]) -> Result<Self, RpcError> {
        let positions = field_names
            .iter()
            .map(|name| {
                schema.find_field(name).ok_or_else(|| {
                    RpcError::UnexpectedReply(format!(
                        "field {name} is not part of table {}",
                        schema.name()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            field_count: schema.fields().len(),
            positions,
            oid_index: schema.oid_index(),
            shape_index: schema.shape_index(),
        })
    }

    pub fn record(&self, msg: GdbObjectMsg) -> Result<RowRecord, RpcError> {
        if msg.values.len() != self.positions.len() {
            return Err(RpcError::UnexpectedReply(format!(
                "row {} has {} values for {} fields",
                msg.object_id,
                msg.values.len(),
                self.positions.len()
            )));
        }
        let mut values = vec![Value::Null; self.field_count];
        for (position, value) in self.positions.iter().zip(msg.values) {
            values[*position] = value_from_msg(value)?;
        }
        if let Some(oid_index) = self.oid_index {
            values[oid_index] = Value::BigInteger(msg.object_id);
        }
        if let (Some(shape_index), Some(shape)) = (self.shape_index, msg.shape) {
            values[shape_index] = Value::Geometry(Arc::new(shape_from_msg(&shape)?));
        }
        Ok(RowRecord::new(msg.object_id, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use vgdb_common::{GeometryType, Point, SpatialReference};

    fn roads_schema() -> TableSchema {
        let mut schema = TableSchema::new(
            "TLM_STRASSE",
            17,
            DatasetKind::FeatureClass {
                geometry_type: GeometryType::Polyline,
                spatial_reference: SpatialReference::from_wkid(2056),
            },
        )
        .with_alias("Strassen");
        schema.add_field(Field::object_id("OBJECTID")).unwrap();
        schema
            .add_field(
                Field::new("NAME", FieldType::String)
                    .alias("Strassenname")
                    .length(80)
                    .domain("NAMES"),
            )
            .unwrap();
        schema
            .add_field(Field::new("ERSTELLT", FieldType::Date))
            .unwrap();
        schema
            .add_field(Field::shape(
                "SHAPE",
                GeometryType::Polyline,
                SpatialReference::from_wkid(2056),
            ))
            .unwrap();
        schema
    }

    #[test]
    fn test_schema_description_rebuilds_equal_schema() {
        let schema = roads_schema();
        let msg = schema_to_msg(&schema, 4);
        assert_eq!(msg.class_def(), vgdb_common::ClassDef::new(17, 4));
        assert_eq!(msg.dataset_kind, DatasetKindMsg::FeatureClass);
        let rebuilt = schema_from_msg(&msg).unwrap();
        assert_eq!(rebuilt, schema);
    }

    #[test]
    fn test_dates_keep_microseconds() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(13, 45, 1, 250)
            .unwrap();
        let back = value_from_msg(value_to_msg(&Value::Date(date))).unwrap();
        assert_eq!(back, Value::Date(date));
    }

    #[test]
    fn test_envelope_shape_stays_an_envelope() {
        let env = Geometry::Envelope(Envelope::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(shape_from_msg(&shape_to_msg(&env)).unwrap(), env);
    }

    #[test]
    fn test_batch_layout_places_projected_values() {
        let schema = roads_schema();
        let layout =
            BatchLayout::new(&schema, &["NAME".to_string(), "OBJECTID".to_string()]).unwrap();
        let line = Geometry::Polyline(vec![vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]]);
        let record = layout
            .record(GdbObjectMsg {
                class_handle: 17,
                object_id: 9,
                values: vec![ValueMsg::String("Aarestrasse".into()), ValueMsg::BigInteger(9)],
                shape: Some(shape_to_msg(&line)),
            })
            .unwrap();
        assert_eq!(record.oid, 9);
        assert_eq!(
            record.values,
            vec![
                Value::BigInteger(9),
                Value::from("Aarestrasse"),
                Value::Null,
                Value::Geometry(Arc::new(line)),
            ]
        );
    }

    #[test]
    fn test_batch_layout_rejects_foreign_fields() {
        let schema = roads_schema();
        assert!(matches!(
            BatchLayout::new(&schema, &["LAENGE".to_string()]),
            Err(RpcError::UnexpectedReply(_))
        ));
    }
}
