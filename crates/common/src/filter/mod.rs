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

//! Query filters: projection, attribute predicate and spatial constraint.

mod where_clause;

pub use where_clause::WhereClause;

use crate::error::FilterError;
use crate::geometry::{Envelope, Geometry};
use crate::value::Value;
use std::borrow::Cow;
use std::sync::Arc;

/// Read access to a row, as needed to evaluate a filter against it.
pub trait RowAccess {
    /// The value of the named field (case-insensitive), or None if the row has no such field.
    fn lookup(&self, field_name: &str) -> Option<Cow<'_, Value>>;

    fn geometry(&self) -> Option<&Geometry> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    /// Comma separated projection; empty or `*` selects every field.
    pub sub_fields: String,
    pub where_clause: String,
    pub search_geometry: Option<Arc<Geometry>>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sub_fields(mut self, sub_fields: impl Into<String>) -> Self {
        self.sub_fields = sub_fields.into();
        self
    }

    pub fn with_where_clause(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = where_clause.into();
        self
    }

    pub fn with_search_geometry(mut self, geometry: impl Into<Arc<Geometry>>) -> Self {
        self.search_geometry = Some(geometry.into());
        self
    }

    /// The projected field names, or None when all fields are selected.
    pub fn sub_field_names(&self) -> Option<Vec<String>> {
        let names: Vec<String> = self
            .sub_fields
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() || names.iter().any(|n| n == "*") {
            None
        } else {
            Some(names)
        }
    }

    /// Parse the where clause for one evaluation pass. Compiled filters are not kept across
    /// searches.
    pub fn compile(&self) -> Result<CompiledFilter, FilterError> {
        let where_clause = if self.where_clause.trim().is_empty() {
            None
        } else {
            Some(WhereClause::parse(&self.where_clause)?)
        };
        let search_envelope = self.search_geometry.as_ref().and_then(|g| g.envelope());
        Ok(CompiledFilter {
            where_clause,
            has_search_geometry: self.search_geometry.is_some(),
            search_envelope,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilter {
    where_clause: Option<WhereClause>,
    has_search_geometry: bool,
    search_envelope: Option<Envelope>,
}

impl CompiledFilter {
    /// Fields the where clause refers to, so callers can check them against a schema before
    /// there is a row to evaluate.
    pub fn referenced_fields(&self) -> Vec<&str> {
        self.where_clause
            .as_ref()
            .map(|w| w.referenced_fields())
            .unwrap_or_default()
    }

    pub fn matches<R: RowAccess + ?Sized>(&self, row: &R) -> Result<bool, FilterError> {
        if self.has_search_geometry {
            // An empty search geometry intersects nothing.
            let Some(search) = &self.search_envelope else {
                return Ok(false);
            };
            let hit = row
                .geometry()
                .and_then(|g| g.envelope())
                .is_some_and(|e| e.intersects(search));
            if !hit {
                return Ok(false);
            }
        }
        match &self.where_clause {
            None => Ok(true),
            Some(w) => w.matches(row),
        }
    }
}
