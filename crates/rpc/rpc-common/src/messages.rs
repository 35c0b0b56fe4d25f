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

//! Messages exchanged between a client and the data provider.

use crate::ProviderFault;
use bincode::{Decode, Encode};
use vgdb_common::{ClassDef, Envelope, FieldType, GeometryType, SpatialReference};

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FieldMsg {
    pub name: String,
    pub alias: String,
    pub field_type: FieldType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub nullable: bool,
    pub domain_name: Option<String>,
    pub geometry_type: GeometryType,
    pub spatial_reference: Option<SpatialReference>,
    pub has_z: bool,
    pub has_m: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Encode, Decode)]
pub enum DatasetKindMsg {
    Table,
    FeatureClass,
    RelationshipTable,
}

/// Description of one table or feature class, as returned by a schema request.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ObjectClassMsg {
    pub name: String,
    pub alias: String,
    pub class_handle: i64,
    pub workspace_handle: i64,
    pub dataset_kind: DatasetKindMsg,
    pub geometry_type: GeometryType,
    pub spatial_reference: Option<SpatialReference>,
    pub fields: Vec<FieldMsg>,
}

impl ObjectClassMsg {
    pub fn class_def(&self) -> ClassDef {
        ClassDef::new(self.class_handle, self.workspace_handle)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Encode, Decode)]
pub enum WorkspaceDbTypeMsg {
    FileGeodatabase,
    MobileGeodatabase,
    ArcSde,
    PostgreSql,
    Oracle,
    SqlServer,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct WorkspaceMsg {
    pub workspace_handle: i64,
    pub db_type: WorkspaceDbTypeMsg,
    pub path: Option<String>,
    pub version_name: Option<String>,
    pub default_version_name: Option<String>,
    pub default_version_description: Option<String>,
    /// Microseconds since the Unix epoch.
    pub default_version_created: Option<i64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub enum JoinType {
    Inner,
    LeftOuter,
}

/// A join over the two ends of a relationship class. Also the cache key for join tables on the
/// provider side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct RelationshipClassQuery {
    pub relationship_class_name: String,
    pub workspace_handle: i64,
    pub tables: Vec<String>,
    pub join_type: JoinType,
    pub where_clause: String,
}

#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct SchemaRequest {
    pub dataset_ids: Vec<i64>,
    pub relationship_queries: Vec<RelationshipClassQuery>,
}

/// A requested item the provider could not describe. Siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FailedItemMsg {
    pub dataset_id: Option<i64>,
    pub relationship_class_name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct SchemaResponse {
    pub workspaces: Vec<WorkspaceMsg>,
    pub class_definitions: Vec<ObjectClassMsg>,
    pub relclass_definitions: Vec<ObjectClassMsg>,
    pub failed_items: Vec<FailedItemMsg>,
}

/// Geometry as part boundaries plus interleaved x/y coordinates.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ShapeMsg {
    pub geometry_type: GeometryType,
    pub is_envelope: bool,
    pub part_offsets: Vec<u32>,
    pub coords: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ValueMsg {
    Null,
    SmallInteger(i16),
    Integer(i32),
    BigInteger(i64),
    Single(f32),
    Double(f64),
    String(String),
    /// Microseconds since the Unix epoch.
    Date(i64),
    Guid([u8; 16]),
    Blob(Vec<u8>),
    Shape(ShapeMsg),
}

/// One row on the wire. `values` line up with the batch's `field_names`; the shape travels
/// separately.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct GdbObjectMsg {
    pub class_handle: i64,
    pub object_id: i64,
    pub values: Vec<ValueMsg>,
    pub shape: Option<ShapeMsg>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum DataTarget {
    ClassDef(ClassDef),
    RelQuery(RelationshipClassQuery),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct DataRequest {
    pub target: DataTarget,
    pub sub_fields: String,
    pub where_clause: String,
    pub search_geometry: Option<ShapeMsg>,
    pub count_only: bool,
    pub extent_only: bool,
    /// Rows per batch the client would like; 0 leaves it to the provider.
    pub batch_size: u32,
}

impl DataRequest {
    pub fn new(target: DataTarget) -> Self {
        Self {
            target,
            sub_fields: String::new(),
            where_clause: String::new(),
            search_geometry: None,
            count_only: false,
            extent_only: false,
            batch_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct RowBatch {
    pub class_handle: i64,
    pub field_names: Vec<String>,
    pub rows: Vec<GdbObjectMsg>,
    pub has_more_data: bool,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum DataResponse {
    RowCount(i64),
    Extent(Option<Envelope>),
    Rows(RowBatch),
}

impl DataResponse {
    /// Whether another batch follows this one in the same exchange.
    pub fn has_more_data(&self) -> bool {
        matches!(self, DataResponse::Rows(batch) if batch.has_more_data)
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ClientMessage {
    Schema(SchemaRequest),
    Data(DataRequest),
    /// Ask for the next batch of the open data exchange.
    Next,
    /// Abandon the open data exchange.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ServerMessage {
    Schema(SchemaResponse),
    Data(DataResponse),
    Fault(ProviderFault),
}
