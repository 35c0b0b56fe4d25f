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

use crate::ClassDef;
use thiserror::Error;

/// Errors surfaced by the virtual table layer.
///
/// Callers must be able to tell "verified zero matches" apart from "could not verify"; see
/// [`TableError::is_unavailable`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("Row not found: {0}")]
    NotFound(i64),
    #[error("Field already exists: {0}")]
    DuplicateField(String),
    #[error("Table already has an object id field: {0}")]
    DuplicateObjectIdField(String),
    #[error("Feature class already has a shape field: {0}")]
    DuplicateShapeField(String),
    #[error("Table {0} is already bound to a backing store")]
    AlreadyBound(String),
    #[error("Schema of table {0} is frozen")]
    SchemaFrozen(String),
    #[error("Object id must be an integer, got {0}")]
    InvalidObjectId(String),
    #[error("Field not found: {0}")]
    FieldNotFound(String),
    #[error("Field index {index} out of range (field count {count})")]
    FieldIndexOutOfRange { index: usize, count: usize },
    #[error("Table {0} is not a feature class")]
    NotAFeatureClass(String),
    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
    #[error("Class {0} was never described by the data provider")]
    SchemaDesync(ClassDef),
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Timed out waiting for data provider")]
    Timeout,
    #[error("Backing store failure: {0}")]
    Backing(String),
}

impl TableError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TableError::NotFound(_))
    }

    /// True when the data could not be read at all, as opposed to having been read and found
    /// empty.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TableError::Transport(_)
                | TableError::Timeout
                | TableError::Backing(_)
                | TableError::SchemaDesync(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Where clause syntax error: {0}")]
    Syntax(String),
    #[error("Unsupported where clause construct: {0}")]
    Unsupported(String),
    #[error("Invalid number literal: {0}")]
    InvalidNumber(String),
    #[error("Invalid date literal: {0}")]
    InvalidDate(String),
    #[error("Unknown field in where clause: {0}")]
    UnknownField(String),
    #[error("Cannot compare {0} with {1}")]
    IncomparableTypes(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_distinct_from_not_found() {
        assert!(TableError::NotFound(3).is_not_found());
        assert!(!TableError::NotFound(3).is_unavailable());
        assert!(TableError::Timeout.is_unavailable());
        assert!(TableError::Transport("reset".into()).is_unavailable());
        assert!(TableError::SchemaDesync(ClassDef::new(1, 2)).is_unavailable());
        assert!(!TableError::DuplicateField("NAME".into()).is_unavailable());
    }

    #[test]
    fn test_filter_error_converts() {
        let e: TableError = FilterError::UnknownField("FOO".into()).into();
        assert_eq!(e, TableError::InvalidFilter(FilterError::UnknownField("FOO".into())));
    }
}
