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

use crate::geometry::Geometry;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// An attribute value held by a row.
///
/// `Null` doubles as the "unset" sentinel: a recycled row reads `Null` for every field until
/// it is populated again.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    SmallInteger(i16),
    Integer(i32),
    BigInteger(i64),
    Single(f32),
    Double(f64),
    String(String),
    Date(NaiveDateTime),
    Guid(Uuid),
    Blob(Vec<u8>),
    Geometry(Arc<Geometry>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::SmallInteger(_) => "smallint",
            Value::Integer(_) => "integer",
            Value::BigInteger(_) => "bigint",
            Value::Single(_) => "single",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Guid(_) => "guid",
            Value::Blob(_) => "blob",
            Value::Geometry(_) => "geometry",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInteger(i) => Some(*i as i64),
            Value::Integer(i) => Some(*i as i64),
            Value::BigInteger(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Single(f) => Some(*f as f64),
            Value::Double(f) => Some(*f),
            _ => self.as_i64().map(|i| i as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Arc<Geometry>> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::SmallInteger(_)
                | Value::Integer(_)
                | Value::BigInteger(_)
                | Value::Single(_)
                | Value::Double(_)
        )
    }

    /// Ordering between two values as a where-clause would see it. Integers and floats compare
    /// numerically across widths, strings lexically, dates chronologically, guids by their
    /// string form when compared with text. Returns None for incomparable pairs, including
    /// anything involving `Null`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::String(b)) => Some(compare_guid_text(a, b)),
            (Value::String(a), Value::Guid(b)) => Some(compare_guid_text(b, a).reverse()),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn compare_guid_text(guid: &Uuid, text: &str) -> Ordering {
    let text = text.trim_matches(|c| c == '{' || c == '}').to_ascii_lowercase();
    guid.hyphenated().to_string().cmp(&text)
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("<null>"),
            Value::SmallInteger(i) => write!(f, "{i}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::BigInteger(i) => write!(f, "{i}"),
            Value::Single(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Guid(g) => write!(f, "{{{g}}}"),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Value::Geometry(g) => write!(f, "<{}>", g.geometry_type()),
        }
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::SmallInteger(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInteger(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Date(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Guid(value)
    }
}

impl From<Geometry> for Value {
    fn from(value: Geometry) -> Self {
        Value::Geometry(Arc::new(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Value::SmallInteger(3), Value::BigInteger(3), Some(Ordering::Equal); "small vs big")]
    #[test_case(Value::Integer(2), Value::Double(2.5), Some(Ordering::Less); "int vs double")]
    #[test_case(Value::Single(1.5), Value::Integer(1), Some(Ordering::Greater); "single vs int")]
    #[test_case(Value::from("b"), Value::from("a"), Some(Ordering::Greater); "strings")]
    #[test_case(Value::Null, Value::Integer(1), None; "null is incomparable")]
    #[test_case(Value::from("1"), Value::Integer(1), None; "string vs int")]
    fn test_compare(a: Value, b: Value, expected: Option<Ordering>) {
        assert_eq!(a.compare(&b), expected);
    }

    #[test]
    fn test_guid_compares_with_braced_text() {
        let g = Uuid::parse_str("8e4c2f5a-1b2d-4c3e-9f00-112233445566").unwrap();
        let text = Value::from("{8E4C2F5A-1B2D-4C3E-9F00-112233445566}");
        assert_eq!(Value::Guid(g).compare(&text), Some(Ordering::Equal));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i32> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(4)), Value::Integer(4));
    }
}
