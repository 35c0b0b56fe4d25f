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

mod class_def;
mod error;
pub mod fields;
pub mod filter;
pub mod geometry;
pub mod tracing;
mod value;

pub use class_def::ClassDef;
pub use error::{FilterError, TableError};
pub use fields::{Field, FieldType, Fields, GeometryDef};
pub use filter::{CompiledFilter, QueryFilter, RowAccess, WhereClause};
pub use geometry::{Envelope, Geometry, GeometryType, Point, SpatialReference};
pub use value::Value;
