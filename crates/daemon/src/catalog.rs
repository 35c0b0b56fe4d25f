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

//! A dataset catalog held in memory, loaded from JSON.
//!
//! Row data is parsed once and shared read-only between threads; each thread's workspace
//! still opens its own table handles, which is what the provider's thread confinement
//! relies on.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering as CmpOrdering;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use uuid::Uuid;
use vgdb_common::{
    CompiledFilter, Envelope, Field, FieldType, FilterError, Geometry, GeometryType, QueryFilter,
    SpatialReference, Value,
};
use vgdb_db::{
    DatasetKind, Row, RowRecord, StorageKind, TableSchema, WorkspaceDbType, WorkspaceIdentity,
};
use vgdb_rpc_common::{JoinType, RelationshipClassQuery};

use crate::source::{
    Association, DatasetInfo, DatasetType, SchemaSource, SourceCursor, SourceError,
    SourceTable, SourceWorkspace,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogDef {
    #[serde(default)]
    pub workspace: WorkspaceDef,
    #[serde(default)]
    pub datasets: Vec<DatasetDef>,
    #[serde(default)]
    pub relationship_classes: Vec<RelationshipClassDef>,
    #[serde(default)]
    pub issue_datasets: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceDef {
    pub handle: i64,
    #[serde(default)]
    pub db_type: DbTypeDef,
    pub path: Option<String>,
    pub version: Option<String>,
}

impl Default for WorkspaceDef {
    fn default() -> Self {
        Self {
            handle: 1,
            db_type: DbTypeDef::default(),
            path: None,
            version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub enum DbTypeDef {
    FileGeodatabase,
    MobileGeodatabase,
    ArcSde,
    PostgreSql,
    Oracle,
    SqlServer,
    #[default]
    Other,
}

impl From<DbTypeDef> for WorkspaceDbType {
    fn from(value: DbTypeDef) -> Self {
        match value {
            DbTypeDef::FileGeodatabase => WorkspaceDbType::FileGeodatabase,
            DbTypeDef::MobileGeodatabase => WorkspaceDbType::MobileGeodatabase,
            DbTypeDef::ArcSde => WorkspaceDbType::ArcSde,
            DbTypeDef::PostgreSql => WorkspaceDbType::PostgreSql,
            DbTypeDef::Oracle => WorkspaceDbType::Oracle,
            DbTypeDef::SqlServer => WorkspaceDbType::SqlServer,
            DbTypeDef::Other => WorkspaceDbType::Other,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetDef {
    pub id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub geometry: Option<GeometryInfoDef>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub rows: Vec<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeometryInfoDef {
    pub geometry_type: GeometryType,
    pub wkid: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub alias: Option<String>,
    pub length: Option<u32>,
    pub nullable: Option<bool>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipClassDef {
    pub id: i64,
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub origin_primary_key: String,
    pub origin_foreign_key: String,
}

/// A table's schema together with its rows, parsed and validated.
#[derive(Debug)]
struct LoadedTable {
    schema: Arc<TableSchema>,
    rows: Arc<[Row]>,
}

#[derive(Debug)]
struct CatalogData {
    identity: WorkspaceIdentity,
    datasets: Vec<(DatasetDef, LoadedTable)>,
    relationship_classes: Vec<(RelationshipClassDef, LoadedTable)>,
    issue_datasets: Vec<i64>,
    workspaces_opened: AtomicUsize,
    tables_opened: AtomicUsize,
}

impl CatalogData {
    fn dataset_by_name(&self, name: &str) -> Option<&(DatasetDef, LoadedTable)> {
        self.datasets
            .iter()
            .find(|(def, _)| def.name.eq_ignore_ascii_case(name))
    }

    fn dataset_by_id(&self, id: i64) -> Option<&DatasetDef> {
        self.datasets
            .iter()
            .map(|(def, _)| def)
            .find(|def| def.id == id)
    }

    fn relationship_class(&self, name: &str) -> Option<&(RelationshipClassDef, LoadedTable)> {
        self.relationship_classes
            .iter()
            .find(|(def, _)| def.name.eq_ignore_ascii_case(name))
    }
}

/// In-memory [`SchemaSource`].
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    data: Arc<CatalogData>,
}

impl MemoryCatalog {
    pub fn new(def: CatalogDef) -> Result<Self, SourceError> {
        let mut datasets = Vec::with_capacity(def.datasets.len());
        for dataset in def.datasets {
            let table = load_dataset(&dataset)?;
            datasets.push((dataset, table));
        }
        let mut data = CatalogData {
            identity: workspace_identity(&def.workspace),
            datasets,
            relationship_classes: vec![],
            issue_datasets: def.issue_datasets,
            workspaces_opened: AtomicUsize::new(0),
            tables_opened: AtomicUsize::new(0),
        };
        for relationship in def.relationship_classes {
            let table = load_relationship_class(&data, &relationship)?;
            data.relationship_classes.push((relationship, table));
        }
        info!(
            datasets = data.datasets.len(),
            relationship_classes = data.relationship_classes.len(),
            "loaded catalog"
        );
        Ok(Self {
            data: Arc::new(data),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let def: CatalogDef =
            serde_json::from_str(json).map_err(|e| SourceError::Catalog(e.to_string()))?;
        Self::new(def)
    }

    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Catalog(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Workspaces opened so far, across all threads.
    pub fn workspaces_opened(&self) -> usize {
        self.data.workspaces_opened.load(Ordering::SeqCst)
    }

    /// Table handles opened so far, across all threads and workspaces.
    pub fn tables_opened(&self) -> usize {
        self.data.tables_opened.load(Ordering::SeqCst)
    }
}

impl SchemaSource for MemoryCatalog {
    fn dataset(&self, dataset_id: i64) -> Option<DatasetInfo> {
        if let Some(def) = self.data.dataset_by_id(dataset_id) {
            return Some(DatasetInfo {
                id: def.id,
                name: def.name.clone(),
                dataset_type: DatasetType::Table,
            });
        }
        self.data
            .relationship_classes
            .iter()
            .find(|(def, _)| def.id == dataset_id)
            .map(|(def, _)| DatasetInfo {
                id: def.id,
                name: def.name.clone(),
                dataset_type: DatasetType::RelationshipClass,
            })
    }

    fn associations(&self, dataset_ids: &[i64]) -> Vec<Association> {
        let id_of = |name: &str| self.data.dataset_by_name(name).map(|(def, _)| def.id);
        self.data
            .relationship_classes
            .iter()
            .filter_map(|(def, _)| {
                let association = Association {
                    dataset: DatasetInfo {
                        id: def.id,
                        name: def.name.clone(),
                        dataset_type: DatasetType::RelationshipClass,
                    },
                    origin_dataset_id: id_of(&def.origin)?,
                    destination_dataset_id: id_of(&def.destination)?,
                };
                association.touches(dataset_ids).then_some(association)
            })
            .collect()
    }

    fn issue_dataset_ids(&self) -> Vec<i64> {
        self.data.issue_datasets.clone()
    }

    fn open_workspace(&self) -> Result<Rc<dyn SourceWorkspace>, SourceError> {
        self.data.workspaces_opened.fetch_add(1, Ordering::SeqCst);
        debug!(workspace = self.data.identity.workspace_handle, "opening workspace");
        Ok(Rc::new(MemoryWorkspace {
            data: self.data.clone(),
        }))
    }
}

struct MemoryWorkspace {
    data: Arc<CatalogData>,
}

impl MemoryWorkspace {
    fn open(&self, table: &LoadedTable) -> Rc<dyn SourceTable> {
        self.data.tables_opened.fetch_add(1, Ordering::SeqCst);
        Rc::new(MemoryTable {
            schema: table.schema.clone(),
            rows: table.rows.clone(),
        })
    }
}

impl SourceWorkspace for MemoryWorkspace {
    fn identity(&self) -> WorkspaceIdentity {
        self.data.identity.clone()
    }

    fn open_table(&self, name: &str) -> Result<Rc<dyn SourceTable>, SourceError> {
        let (_, table) = self
            .data
            .dataset_by_name(name)
            .ok_or_else(|| SourceError::UnknownTable(name.to_string()))?;
        Ok(self.open(table))
    }

    fn open_relationship_class(&self, name: &str) -> Result<Rc<dyn SourceTable>, SourceError> {
        let (_, table) = self
            .data
            .relationship_class(name)
            .ok_or_else(|| SourceError::UnknownRelationshipClass(name.to_string()))?;
        Ok(self.open(table))
    }

    fn create_query_table(
        &self,
        query: &RelationshipClassQuery,
    ) -> Result<Rc<dyn SourceTable>, SourceError> {
        let table = join_tables(&self.data, query)?;
        self.data.tables_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Rc::new(MemoryTable {
            schema: table.schema,
            rows: table.rows,
        }))
    }
}

struct MemoryTable {
    schema: Arc<TableSchema>,
    rows: Arc<[Row]>,
}

impl MemoryTable {
    fn compile(&self, filter: &QueryFilter) -> Result<CompiledFilter, SourceError> {
        let compiled = filter.compile()?;
        for name in compiled.referenced_fields() {
            if self.schema.find_field(name).is_none() {
                return Err(FilterError::UnknownField(name.to_string()).into());
            }
        }
        Ok(compiled)
    }
}

impl SourceTable for MemoryTable {
    fn schema(&self) -> Arc<TableSchema> {
        self.schema.clone()
    }

    fn count(&self, filter: &QueryFilter) -> Result<i64, SourceError> {
        let compiled = self.compile(filter)?;
        let mut count = 0;
        for row in self.rows.iter() {
            if compiled.matches(row)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn search(&self, filter: &QueryFilter) -> Result<SourceCursor, SourceError> {
        let compiled = self.compile(filter)?;
        let rows = self.rows.clone();
        let mut position = 0;
        Ok(Box::new(std::iter::from_fn(move || {
            while let Some(row) = rows.get(position) {
                position += 1;
                match compiled.matches(row) {
                    Ok(true) => return Some(Ok(row.to_record())),
                    Ok(false) => continue,
                    Err(e) => return Some(Err(e.into())),
                }
            }
            None
        })))
    }

    fn extent(&self) -> Result<Option<Envelope>, SourceError> {
        Ok(self
            .rows
            .iter()
            .filter_map(|row| row.shape())
            .filter_map(|shape| shape.envelope())
            .reduce(|a, b| a.union(&b)))
    }
}

fn workspace_identity(def: &WorkspaceDef) -> WorkspaceIdentity {
    let mut identity = WorkspaceIdentity::new(def.handle, def.db_type.into());
    if let Some(path) = &def.path {
        identity = identity.with_path(path.clone());
    }
    if let Some(version) = &def.version {
        identity = identity.with_version(version.clone());
    }
    identity
}

fn build_field(def: &FieldDef, geometry: Option<&GeometryInfoDef>) -> Result<Field, SourceError> {
    let mut field = match (def.field_type, geometry) {
        (FieldType::Geometry, Some(info)) => Field::shape(
            def.name.clone(),
            info.geometry_type,
            SpatialReference::from_wkid(info.wkid),
        ),
        (FieldType::Geometry, None) => {
            return Err(SourceError::Catalog(format!(
                "geometry field {} on a dataset without geometry info",
                def.name
            )));
        }
        (field_type, _) => Field::new(def.name.clone(), field_type),
    };
    if let Some(alias) = &def.alias {
        field = field.alias(alias.clone());
    }
    if let Some(length) = def.length {
        field = field.length(length);
    }
    if let Some(nullable) = def.nullable {
        field = field.nullable(nullable);
    }
    if let Some(domain) = &def.domain {
        field = field.domain(domain.clone());
    }
    Ok(field)
}

fn load_dataset(def: &DatasetDef) -> Result<LoadedTable, SourceError> {
    let kind = match &def.geometry {
        Some(info) => DatasetKind::FeatureClass {
            geometry_type: info.geometry_type,
            spatial_reference: SpatialReference::from_wkid(info.wkid),
        },
        None => DatasetKind::Table,
    };
    let mut schema = TableSchema::new(def.name.clone(), def.id, kind);
    if let Some(alias) = &def.alias {
        schema = schema.with_alias(alias.clone());
    }
    for field in &def.fields {
        schema.add_field(build_field(field, def.geometry.as_ref())?)?;
    }
    let schema = Arc::new(schema);

    let mut rows = Vec::with_capacity(def.rows.len());
    for (position, json) in def.rows.iter().enumerate() {
        let mut values = Vec::with_capacity(schema.fields().len());
        for field in schema.fields().iter() {
            let value = match json.get(field.name()) {
                Some(v) => json_to_value(v, field)?,
                None => Value::Null,
            };
            values.push(value);
        }
        let oid = match schema.oid_index().map(|i| &values[i]) {
            Some(value) => value.as_i64().ok_or_else(|| {
                SourceError::Catalog(format!("row {position} of {} has no object id", def.name))
            })?,
            None => position as i64 + 1,
        };
        let record = RowRecord::new(oid, values);
        rows.push(Row::from_record(schema.clone(), record, StorageKind::Array)?);
    }
    Ok(LoadedTable {
        schema,
        rows: rows.into(),
    })
}

fn json_to_value(json: &JsonValue, field: &Field) -> Result<Value, SourceError> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || {
        SourceError::Catalog(format!(
            "value {json} does not fit field {} of type {:?}",
            field.name(),
            field.field_type()
        ))
    };
    let value = match field.field_type() {
        FieldType::SmallInteger => {
            let v = json.as_i64().ok_or_else(mismatch)?;
            Value::SmallInteger(i16::try_from(v).map_err(|_| mismatch())?)
        }
        FieldType::Integer => {
            let v = json.as_i64().ok_or_else(mismatch)?;
            Value::Integer(i32::try_from(v).map_err(|_| mismatch())?)
        }
        FieldType::BigInteger | FieldType::ObjectId => {
            Value::BigInteger(json.as_i64().ok_or_else(mismatch)?)
        }
        FieldType::Single => Value::Single(json.as_f64().ok_or_else(mismatch)? as f32),
        FieldType::Double => Value::Double(json.as_f64().ok_or_else(mismatch)?),
        FieldType::String | FieldType::Xml => {
            Value::String(json.as_str().ok_or_else(mismatch)?.to_string())
        }
        FieldType::Date => {
            let text = json.as_str().ok_or_else(mismatch)?;
            Value::Date(parse_date(text).ok_or_else(mismatch)?)
        }
        FieldType::Guid | FieldType::GlobalId => {
            let text = json.as_str().ok_or_else(mismatch)?;
            Value::Guid(Uuid::parse_str(text).map_err(|_| mismatch())?)
        }
        FieldType::Blob => {
            let bytes: Vec<u8> = serde_json::from_value(json.clone()).map_err(|_| mismatch())?;
            Value::Blob(bytes)
        }
        FieldType::Geometry => {
            let geometry: Geometry =
                serde_json::from_value(json.clone()).map_err(|_| mismatch())?;
            Value::Geometry(Arc::new(geometry))
        }
    };
    Ok(value)
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Field definition for a key or copied column in a derived table. Object ids become plain
/// integers there, since the derived table has its own.
fn derived_field(name: String, source: &Field) -> Field {
    let field_type = match source.field_type() {
        FieldType::ObjectId => FieldType::BigInteger,
        other => other,
    };
    let mut field = Field::new(name, field_type);
    if let Some(length) = source.field_length() {
        field = field.length(length);
    }
    field
}

fn renamed_shape(name: String, source: &Field) -> Field {
    let mut field = Field::new(name, FieldType::Geometry);
    if let Some(geometry) = source.geometry() {
        field = field.geometry_def(geometry.clone());
    }
    field
}

fn key_index(table: &LoadedTable, key: &str, relationship: &str) -> Result<usize, SourceError> {
    table.schema.find_field(key).ok_or_else(|| {
        SourceError::Catalog(format!(
            "relationship class {relationship}: {} has no field {key}",
            table.schema.name()
        ))
    })
}

fn keys_match(a: &Value, b: &Value) -> bool {
    a.compare(b) == Some(CmpOrdering::Equal)
}

/// The relationship class as a table of (origin key, foreign key) pairs.
fn load_relationship_class(
    data: &CatalogData,
    def: &RelationshipClassDef,
) -> Result<LoadedTable, SourceError> {
    let (_, origin) = data
        .dataset_by_name(&def.origin)
        .ok_or_else(|| SourceError::UnknownTable(def.origin.clone()))?;
    let (_, destination) = data
        .dataset_by_name(&def.destination)
        .ok_or_else(|| SourceError::UnknownTable(def.destination.clone()))?;
    let pk = key_index(origin, &def.origin_primary_key, &def.name)?;
    let fk = key_index(destination, &def.origin_foreign_key, &def.name)?;

    let mut schema = TableSchema::new(def.name.clone(), def.id, DatasetKind::RelationshipTable);
    schema.add_field(Field::object_id("RID"))?;
    let origin_fields = origin.schema.fields();
    let destination_fields = destination.schema.fields();
    if let Some(field) = origin_fields.get(pk) {
        schema.add_field(derived_field(def.origin_primary_key.clone(), field))?;
    }
    if let Some(field) = destination_fields.get(fk) {
        let name = if def.origin_foreign_key.eq_ignore_ascii_case(&def.origin_primary_key) {
            format!("{}.{}", def.destination, def.origin_foreign_key)
        } else {
            def.origin_foreign_key.clone()
        };
        schema.add_field(derived_field(name, field))?;
    }
    let schema = Arc::new(schema);

    let mut rows = vec![];
    for o in origin.rows.iter() {
        let key = o.get(pk)?;
        for d in destination.rows.iter() {
            let foreign = d.get(fk)?;
            if keys_match(key, foreign) {
                let oid = rows.len() as i64 + 1;
                let record = RowRecord::new(
                    oid,
                    vec![Value::BigInteger(oid), key.clone(), foreign.clone()],
                );
                rows.push(Row::from_record(schema.clone(), record, StorageKind::Array)?);
            }
        }
    }
    Ok(LoadedTable {
        schema,
        rows: rows.into(),
    })
}

/// Build the join table a relationship query describes: origin columns then destination
/// columns, qualified as `TABLE.FIELD`, with generated object ids. The first shape found
/// (origin before destination) becomes the join table's shape.
fn join_tables(
    data: &CatalogData,
    query: &RelationshipClassQuery,
) -> Result<LoadedTable, SourceError> {
    let (relationship, _) = data
        .relationship_class(&query.relationship_class_name)
        .ok_or_else(|| {
            SourceError::UnknownRelationshipClass(query.relationship_class_name.clone())
        })?;
    let (origin_name, destination_name) = match query.tables.as_slice() {
        [] => (&relationship.origin, &relationship.destination),
        [origin, destination] => (origin, destination),
        other => {
            return Err(SourceError::InvalidQuery(format!(
                "a join needs two tables, got {}",
                other.len()
            )));
        }
    };
    let (origin_def, origin) = data
        .dataset_by_name(origin_name)
        .ok_or_else(|| SourceError::UnknownTable(origin_name.clone()))?;
    let (destination_def, destination) = data
        .dataset_by_name(destination_name)
        .ok_or_else(|| SourceError::UnknownTable(destination_name.clone()))?;
    if !origin_def.name.eq_ignore_ascii_case(&relationship.origin)
        || !destination_def.name.eq_ignore_ascii_case(&relationship.destination)
    {
        return Err(SourceError::InvalidQuery(format!(
            "{} relates {} to {}",
            relationship.name, relationship.origin, relationship.destination
        )));
    }
    let pk = key_index(origin, &relationship.origin_primary_key, &relationship.name)?;
    let fk = key_index(destination, &relationship.origin_foreign_key, &relationship.name)?;

    let shape_source = match (origin.schema.shape_index(), destination.schema.shape_index()) {
        (Some(index), _) => Some((0, index, origin)),
        (None, Some(index)) => Some((1, index, destination)),
        (None, None) => None,
    };
    let kind = match shape_source {
        Some((_, _, table)) => DatasetKind::FeatureClass {
            geometry_type: table.schema.geometry_type(),
            spatial_reference: table.schema.spatial_reference().cloned().unwrap_or_default(),
        },
        None => DatasetKind::RelationshipTable,
    };

    let mut schema =
        TableSchema::new(query.relationship_class_name.clone(), relationship.id, kind);
    schema.add_field(Field::object_id("OBJECTID"))?;
    // (side, source index) for every column after the object id.
    let mut columns = vec![];
    for (side, table, def) in [(0, origin, origin_def), (1, destination, destination_def)] {
        for (index, field) in table.schema.fields().iter().enumerate() {
            let name = format!("{}.{}", def.name, field.name());
            let field = if field.is_shape() {
                if shape_source.map(|(s, i, _)| (s, i)) != Some((side, index)) {
                    continue;
                }
                renamed_shape(name, field)
            } else {
                derived_field(name, field)
            };
            schema.add_field(field)?;
            columns.push((side, index));
        }
    }
    let schema = Arc::new(schema);

    let mut rows = vec![];
    let mut emit = |o: &Row, d: Option<&Row>| -> Result<(), SourceError> {
        let oid = rows.len() as i64 + 1;
        let mut values = Vec::with_capacity(columns.len() + 1);
        values.push(Value::BigInteger(oid));
        for (side, index) in &columns {
            let value = match (side, d) {
                (0, _) => o.get(*index)?.clone(),
                (_, Some(d)) => d.get(*index)?.clone(),
                (_, None) => Value::Null,
            };
            values.push(value);
        }
        let record = RowRecord::new(oid, values);
        rows.push(Row::from_record(schema.clone(), record, StorageKind::Array)?);
        Ok(())
    };
    for o in origin.rows.iter() {
        let key = o.get(pk)?;
        let mut matched = false;
        for d in destination.rows.iter() {
            if keys_match(key, d.get(fk)?) {
                matched = true;
                emit(o, Some(d))?;
            }
        }
        if !matched && query.join_type == JoinType::LeftOuter {
            emit(o, None)?;
        }
    }

    if !query.where_clause.trim().is_empty() {
        let compiled = QueryFilter::new()
            .with_where_clause(query.where_clause.clone())
            .compile()?;
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if compiled.matches(&row)? {
                kept.push(row);
            }
        }
        rows = kept;
    }
    debug!(
        relationship = %query.relationship_class_name,
        rows = rows.len(),
        "created query table"
    );
    Ok(LoadedTable {
        schema,
        rows: rows.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"{
        "workspace": { "handle": 7, "db_type": "FileGeodatabase", "path": "/data/topo.gdb" },
        "datasets": [
            {
                "id": 3, "name": "ROADS", "alias": "Strassen",
                "geometry": { "geometry_type": "Polyline", "wkid": 2056 },
                "fields": [
                    { "name": "OBJECTID", "type": "ObjectId" },
                    { "name": "NAME", "type": "String", "length": 50 },
                    { "name": "SHAPE", "type": "Geometry" }
                ],
                "rows": [
                    { "OBJECTID": 1, "NAME": "Hauptstrasse",
                      "SHAPE": { "Polyline": [[{ "x": 0.0, "y": 0.0 }, { "x": 10.0, "y": 5.0 }]] } },
                    { "OBJECTID": 2, "NAME": "Feldweg",
                      "SHAPE": { "Polyline": [[{ "x": 20.0, "y": 20.0 }, { "x": 30.0, "y": 25.0 }]] } }
                ]
            },
            {
                "id": 4, "name": "SIGNS",
                "fields": [
                    { "name": "OBJECTID", "type": "ObjectId" },
                    { "name": "ROAD_ID", "type": "Integer" },
                    { "name": "KIND", "type": "String" }
                ],
                "rows": [
                    { "OBJECTID": 1, "ROAD_ID": 1, "KIND": "stop" },
                    { "OBJECTID": 2, "ROAD_ID": 1, "KIND": "yield" }
                ]
            }
        ],
        "relationship_classes": [
            { "id": 20, "name": "ROAD_SIGNS", "origin": "ROADS", "destination": "SIGNS",
              "origin_primary_key": "OBJECTID", "origin_foreign_key": "ROAD_ID" }
        ]
    }"#;

    fn query(join_type: JoinType, where_clause: &str) -> RelationshipClassQuery {
        RelationshipClassQuery {
            relationship_class_name: "ROAD_SIGNS".into(),
            workspace_handle: 7,
            tables: vec!["ROADS".into(), "SIGNS".into()],
            join_type,
            where_clause: where_clause.into(),
        }
    }

    #[test]
    fn test_catalog_loads_schema_and_rows() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let workspace = catalog.open_workspace().unwrap();
        assert_eq!(workspace.identity().workspace_handle, 7);
        let roads = workspace.open_table("roads").unwrap();
        let schema = roads.schema();
        assert_eq!(schema.alias(), "Strassen");
        assert_eq!(schema.shape_field_name(), Some("SHAPE"));
        assert_eq!(roads.count(&QueryFilter::new()).unwrap(), 2);
        let extent = roads.extent().unwrap().unwrap();
        assert_eq!((extent.xmax, extent.ymax), (30.0, 25.0));
        assert_eq!(catalog.tables_opened(), 1);
    }

    #[test]
    fn test_search_filters_lazily() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let workspace = catalog.open_workspace().unwrap();
        let signs = workspace.open_table("SIGNS").unwrap();
        let filter = QueryFilter::new().with_where_clause("KIND = 'yield'");
        let oids: Vec<i64> = signs
            .search(&filter)
            .unwrap()
            .map(|r| r.unwrap().oid)
            .collect();
        assert_eq!(oids, vec![2]);
        let bad = QueryFilter::new().with_where_clause("COLOUR = 'red'");
        assert!(matches!(
            signs.search(&bad),
            Err(SourceError::Filter(FilterError::UnknownField(_)))
        ));
    }

    #[test]
    fn test_associations_need_one_requested_end() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.associations(&[3]).len(), 1);
        assert_eq!(catalog.associations(&[4]).len(), 1);
        assert!(catalog.associations(&[99]).is_empty());
        let relationship = catalog.dataset(20).unwrap();
        assert_eq!(relationship.dataset_type, DatasetType::RelationshipClass);
    }

    #[test]
    fn test_relationship_class_pairs_keys() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let workspace = catalog.open_workspace().unwrap();
        let pairs = workspace.open_relationship_class("ROAD_SIGNS").unwrap();
        assert_eq!(pairs.count(&QueryFilter::new()).unwrap(), 2);
        assert_eq!(
            pairs.schema().field_names().to_vec(),
            vec!["RID".to_string(), "OBJECTID".into(), "ROAD_ID".into()]
        );
    }

    #[test]
    fn test_inner_and_left_outer_joins() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let workspace = catalog.open_workspace().unwrap();

        let inner = workspace
            .create_query_table(&query(JoinType::Inner, ""))
            .unwrap();
        assert_eq!(inner.count(&QueryFilter::new()).unwrap(), 2);
        let schema = inner.schema();
        assert!(schema.is_feature_class());
        assert_eq!(schema.shape_field_name(), Some("ROADS.SHAPE"));
        assert!(schema.find_field("signs.kind").is_some());

        let outer = workspace
            .create_query_table(&query(JoinType::LeftOuter, ""))
            .unwrap();
        let records: Vec<RowRecord> = outer
            .search(&QueryFilter::new())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        let kind = outer.schema().find_field("SIGNS.KIND").unwrap();
        assert_eq!(records[2].values[kind], Value::Null);
        assert_eq!(
            records.iter().map(|r| r.oid).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_join_where_clause_uses_qualified_names() {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let workspace = catalog.open_workspace().unwrap();
        let table = workspace
            .create_query_table(&query(JoinType::Inner, "SIGNS.KIND = 'stop'"))
            .unwrap();
        assert_eq!(table.count(&QueryFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_bad_catalog_values_are_rejected() {
        let json = r#"{ "datasets": [ { "id": 1, "name": "T",
            "fields": [ { "name": "N", "type": "SmallInteger" } ],
            "rows": [ { "N": 100000 } ] } ] }"#;
        assert!(matches!(
            MemoryCatalog::from_json(json),
            Err(SourceError::Catalog(_))
        ));
    }
}
