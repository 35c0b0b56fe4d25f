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

//! SQL where-clause evaluation.
//!
//! Clauses are parsed with `sqlparser` and lowered into a small predicate tree covering what
//! quality checks put into attribute filters: comparisons, `IS [NOT] NULL`, `[NOT] IN`,
//! `[NOT] LIKE`, `[NOT] BETWEEN`, boolean connectives and parentheses. Evaluation is
//! three-valued; a row matches only if the clause is definitely true.

use crate::error::FilterError;
use crate::filter::RowAccess;
use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, DataType, Expr as SqlExpr, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn from_operator(op: &BinaryOperator) -> Option<Self> {
        Some(match op {
            BinaryOperator::Eq => CompareOp::Eq,
            BinaryOperator::NotEq => CompareOp::Ne,
            BinaryOperator::Lt => CompareOp::Lt,
            BinaryOperator::LtEq => CompareOp::Le,
            BinaryOperator::Gt => CompareOp::Gt,
            BinaryOperator::GtEq => CompareOp::Ge,
            _ => return None,
        })
    }

    fn test(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Field(String),
    Literal(Value),
}

#[derive(Debug, Clone)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    In {
        operand: Operand,
        list: Vec<Operand>,
        negated: bool,
    },
    Like {
        operand: Operand,
        pattern: Regex,
        negated: bool,
    },
    Between {
        operand: Operand,
        low: Operand,
        high: Operand,
        negated: bool,
    },
}

fn syntax(e: ParserError) -> FilterError {
    FilterError::Syntax(e.to_string())
}

fn unsupported(expr: &SqlExpr) -> FilterError {
    FilterError::Unsupported(expr.to_string())
}

fn lower(expr: &SqlExpr) -> Result<Expr, FilterError> {
    Ok(match expr {
        SqlExpr::Nested(inner) => lower(inner)?,
        SqlExpr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Expr::And(Box::new(lower(left)?), Box::new(lower(right)?)),
            BinaryOperator::Or => Expr::Or(Box::new(lower(left)?), Box::new(lower(right)?)),
            _ => Expr::Compare {
                left: lower_operand(left)?,
                op: CompareOp::from_operator(op).ok_or_else(|| unsupported(expr))?,
                right: lower_operand(right)?,
            },
        },
        SqlExpr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => Expr::Not(Box::new(lower(inner)?)),
        SqlExpr::IsNull(inner) => Expr::IsNull {
            operand: lower_operand(inner)?,
            negated: false,
        },
        SqlExpr::IsNotNull(inner) => Expr::IsNull {
            operand: lower_operand(inner)?,
            negated: true,
        },
        SqlExpr::InList {
            expr: inner,
            list,
            negated,
        } => Expr::In {
            operand: lower_operand(inner)?,
            list: list.iter().map(lower_operand).collect::<Result<_, _>>()?,
            negated: *negated,
        },
        SqlExpr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => Expr::Between {
            operand: lower_operand(inner)?,
            low: lower_operand(low)?,
            high: lower_operand(high)?,
            negated: *negated,
        },
        SqlExpr::Like {
            negated,
            expr: inner,
            pattern,
            escape_char,
            ..
        } => {
            if escape_char.is_some() {
                return Err(unsupported(expr));
            }
            let Operand::Literal(Value::String(pattern)) = lower_operand(pattern)? else {
                return Err(unsupported(expr));
            };
            Expr::Like {
                operand: lower_operand(inner)?,
                pattern: like_pattern(&pattern)?,
                negated: *negated,
            }
        }
        _ => return Err(unsupported(expr)),
    })
}

fn lower_operand(expr: &SqlExpr) -> Result<Operand, FilterError> {
    Ok(match expr {
        SqlExpr::Nested(inner) => lower_operand(inner)?,
        SqlExpr::Identifier(ident) => Operand::Field(ident.value.clone()),
        SqlExpr::CompoundIdentifier(parts) => Operand::Field(
            parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join("."),
        ),
        SqlExpr::Value(v) => Operand::Literal(literal(&v.value)?),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Plus,
            expr: inner,
        } => lower_operand(inner)?,
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match lower_operand(inner)? {
            Operand::Literal(Value::BigInteger(n)) => Operand::Literal(Value::BigInteger(
                n.checked_neg()
                    .ok_or_else(|| FilterError::InvalidNumber(expr.to_string()))?,
            )),
            Operand::Literal(Value::Double(d)) => Operand::Literal(Value::Double(-d)),
            _ => return Err(unsupported(expr)),
        },
        SqlExpr::TypedString {
            data_type: DataType::Date | DataType::Timestamp(..) | DataType::Datetime(..),
            ..
        } => Operand::Literal(Value::Date(parse_date(&quoted_text(&expr.to_string()))?)),
        _ => return Err(unsupported(expr)),
    })
}

fn literal(value: &SqlValue) -> Result<Value, FilterError> {
    match value {
        SqlValue::Number(text, _) => parse_number(text),
        SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        SqlValue::Null => Ok(Value::Null),
        other => Err(FilterError::Unsupported(other.to_string())),
    }
}

/// The text between the outermost single quotes of a rendered literal, with `''` unescaped.
fn quoted_text(rendered: &str) -> String {
    match (rendered.find('\''), rendered.rfind('\'')) {
        (Some(open), Some(close)) if close > open => {
            rendered[open + 1..close].replace("''", "'")
        }
        _ => rendered.to_string(),
    }
}

fn parse_number(text: &str) -> Result<Value, FilterError> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Value::Double)
            .map_err(|_| FilterError::InvalidNumber(text.to_string()))
    } else {
        text.parse::<i64>()
            .map(Value::BigInteger)
            .map_err(|_| FilterError::InvalidNumber(text.to_string()))
    }
}

fn parse_date(text: &str) -> Result<NaiveDateTime, FilterError> {
    let text = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| FilterError::InvalidDate(text.to_string()))
}

/// SQL LIKE, `%` matching any run and `_` any single character, as an anchored regex.
fn like_pattern(pattern: &str) -> Result<Regex, FilterError> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| FilterError::Syntax(e.to_string()))
}

fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// A parsed where clause.
#[derive(Debug, Clone)]
pub struct WhereClause {
    expr: Expr,
}

impl WhereClause {
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let dialect = GenericDialect;
        let mut parser = Parser::new(&dialect).try_with_sql(text).map_err(syntax)?;
        let parsed = parser.parse_expr().map_err(syntax)?;
        parser.expect_token(&Token::EOF).map_err(syntax)?;
        Ok(Self {
            expr: lower(&parsed)?,
        })
    }

    /// Field names referenced anywhere in the clause, in order of appearance.
    pub fn referenced_fields(&self) -> Vec<&str> {
        fn operand<'a>(o: &'a Operand, out: &mut Vec<&'a str>) {
            if let Operand::Field(name) = o {
                out.push(name);
            }
        }
        fn walk<'a>(e: &'a Expr, out: &mut Vec<&'a str>) {
            match e {
                Expr::And(a, b) | Expr::Or(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
                Expr::Not(a) => walk(a, out),
                Expr::Compare { left, right, .. } => {
                    operand(left, out);
                    operand(right, out);
                }
                Expr::IsNull { operand: o, .. } | Expr::Like { operand: o, .. } => {
                    operand(o, out)
                }
                Expr::In {
                    operand: o, list, ..
                } => {
                    operand(o, out);
                    list.iter().for_each(|l| operand(l, out));
                }
                Expr::Between {
                    operand: o,
                    low,
                    high,
                    ..
                } => {
                    operand(o, out);
                    operand(low, out);
                    operand(high, out);
                }
            }
        }
        let mut out = vec![];
        walk(&self.expr, &mut out);
        out
    }

    pub fn matches<R: RowAccess + ?Sized>(&self, row: &R) -> Result<bool, FilterError> {
        Ok(eval(&self.expr, row)? == Some(true))
    }
}

impl FromStr for WhereClause {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WhereClause::parse(s)
    }
}

fn resolve<'a, R: RowAccess + ?Sized>(
    operand: &'a Operand,
    row: &'a R,
) -> Result<Cow<'a, Value>, FilterError> {
    match operand {
        Operand::Literal(v) => Ok(Cow::Borrowed(v)),
        Operand::Field(name) => row
            .lookup(name)
            .ok_or_else(|| FilterError::UnknownField(name.clone())),
    }
}

fn compare(a: &Value, b: &Value) -> Result<Option<Ordering>, FilterError> {
    if a.is_null() || b.is_null() {
        return Ok(None);
    }
    match a.compare(b) {
        Some(ordering) => Ok(Some(ordering)),
        None => Err(FilterError::IncomparableTypes(
            a.type_name().to_string(),
            b.type_name().to_string(),
        )),
    }
}

fn eval<R: RowAccess + ?Sized>(expr: &Expr, row: &R) -> Result<Option<bool>, FilterError> {
    Ok(match expr {
        Expr::And(a, b) => and3(eval(a, row)?, eval(b, row)?),
        Expr::Or(a, b) => or3(eval(a, row)?, eval(b, row)?),
        Expr::Not(a) => eval(a, row)?.map(|v| !v),
        Expr::Compare { left, op, right } => {
            let l = resolve(left, row)?;
            let r = resolve(right, row)?;
            compare(&l, &r)?.map(|o| op.test(o))
        }
        Expr::IsNull { operand, negated } => {
            let v = resolve(operand, row)?;
            Some(v.is_null() != *negated)
        }
        Expr::In {
            operand,
            list,
            negated,
        } => {
            let v = resolve(operand, row)?;
            let mut result = Some(false);
            for item in list {
                let item = resolve(item, row)?;
                let hit = compare(&v, &item)?.map(|o| o == Ordering::Equal);
                result = or3(result, hit);
            }
            result.map(|r| r != *negated)
        }
        Expr::Like {
            operand,
            pattern,
            negated,
        } => {
            let v = resolve(operand, row)?;
            match v.as_ref() {
                Value::Null => None,
                Value::String(s) => Some(pattern.is_match(s) != *negated),
                other => Some(pattern.is_match(&other.to_string()) != *negated),
            }
        }
        Expr::Between {
            operand,
            low,
            high,
            negated,
        } => {
            let v = resolve(operand, row)?;
            let lo = resolve(low, row)?;
            let hi = resolve(high, row)?;
            let above = compare(&v, &lo)?.map(|o| o != Ordering::Less);
            let below = compare(&v, &hi)?.map(|o| o != Ordering::Greater);
            and3(above, below).map(|r| r != *negated)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use test_case::test_case;

    struct TestRow(HashMap<String, Value>);

    impl RowAccess for TestRow {
        fn lookup(&self, field_name: &str) -> Option<Cow<'_, Value>> {
            self.0.get(&field_name.to_ascii_uppercase()).map(Cow::Borrowed)
        }
    }

    fn row() -> TestRow {
        TestRow(HashMap::from([
            ("OBJECTID".to_string(), Value::BigInteger(7)),
            ("NAME".to_string(), Value::from("Bahnhofstrasse")),
            ("LANES".to_string(), Value::SmallInteger(2)),
            ("WIDTH".to_string(), Value::Double(6.5)),
            ("REMARK".to_string(), Value::Null),
            (
                "BUILT".to_string(),
                Value::Date(
                    NaiveDate::from_ymd_opt(1999, 5, 1)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                ),
            ),
            ("ROADS.OWNER".to_string(), Value::from("canton")),
        ]))
    }

    #[test_case("OBJECTID = 7", true; "equality")]
    #[test_case("objectid <> 7", false; "inequality case insensitive")]
    #[test_case("OBJECTID != 8", true; "bang inequality")]
    #[test_case("OBJECTID > 0", true; "greater than zero")]
    #[test_case("OBJECTID < 0", false; "less than zero")]
    #[test_case("(OBJECTID) = 7", true; "parenthesised field")]
    #[test_case("OBJECTID = (7)", true; "parenthesised literal")]
    #[test_case("((LANES = 2))", true; "doubly nested predicate")]
    #[test_case("WIDTH >= 6.5 AND LANES <= 2", true; "and")]
    #[test_case("WIDTH > 10 OR LANES = 2", true; "or")]
    #[test_case("NOT (LANES = 2)", false; "not with parens")]
    #[test_case("REMARK IS NULL", true; "is null")]
    #[test_case("NAME IS NOT NULL", true; "is not null")]
    #[test_case("LANES IN (1, 2, 3)", true; "in list")]
    #[test_case("LANES NOT IN (1, 3)", true; "not in list")]
    #[test_case("NAME LIKE 'Bahn%'", true; "like prefix")]
    #[test_case("NAME LIKE '%hof_trasse'", true; "like underscore")]
    #[test_case("NAME NOT LIKE '%gasse'", true; "not like")]
    #[test_case("NAME LIKE 'Bahnhof.trasse'", false; "like dot is literal")]
    #[test_case("LANES BETWEEN 1 AND 3 AND OBJECTID = 7", true; "between then and")]
    #[test_case("WIDTH NOT BETWEEN 1 AND 3", true; "not between")]
    #[test_case("BUILT < date '2000-01-01'", true; "date literal")]
    #[test_case("BUILT = timestamp '1999-05-01 00:00:00'", true; "timestamp literal")]
    #[test_case("REMARK = 'x'", false; "null comparison is unknown")]
    #[test_case("NOT REMARK = 'x'", false; "negated unknown stays unknown")]
    #[test_case("REMARK = 'x' OR OBJECTID = 7", true; "unknown or true")]
    #[test_case("OBJECTID > -1", true; "negative literal")]
    #[test_case("WIDTH > -0.5", true; "negative float literal")]
    #[test_case("NAME = 'O''Brien'", false; "escaped quote")]
    #[test_case("\"NAME\" = 'Bahnhofstrasse'", true; "quoted identifier")]
    #[test_case("ROADS.OWNER = 'canton'", true; "qualified field")]
    fn test_evaluate(clause: &str, expected: bool) {
        let w = WhereClause::parse(clause).unwrap();
        assert_eq!(w.matches(&row()).unwrap(), expected, "{clause}");
    }

    #[test_case("OBJECTID ="; "missing operand")]
    #[test_case("OBJECTID = 'abc"; "unterminated string")]
    #[test_case("(OBJECTID = 1"; "unbalanced paren")]
    #[test_case("OBJECTID = 1 2"; "trailing garbage")]
    #[test_case("NAME LIKE 3"; "like needs a string")]
    #[test_case("BUILT = date '01/05/1999'"; "bad date")]
    #[test_case("LANES + 1 = 3"; "arithmetic is not supported")]
    fn test_parse_errors(clause: &str) {
        assert!(WhereClause::parse(clause).is_err(), "{clause}");
    }

    #[test]
    fn test_unknown_field_fails() {
        let w = WhereClause::parse("NOPE = 1").unwrap();
        assert_eq!(
            w.matches(&row()),
            Err(FilterError::UnknownField("NOPE".into()))
        );
    }

    #[test]
    fn test_incomparable_types_fail() {
        let w = WhereClause::parse("NAME > 3").unwrap();
        assert!(matches!(
            w.matches(&row()),
            Err(FilterError::IncomparableTypes(_, _))
        ));
    }

    #[test]
    fn test_referenced_fields() {
        let w = WhereClause::parse("A = 1 AND (B IN (C, 2) OR D LIKE 'x%')").unwrap();
        assert_eq!(w.referenced_fields(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_like_patterns() {
        let matches = |text: &str, pattern: &str| like_pattern(pattern).unwrap().is_match(text);
        assert!(matches("abc", "a%"));
        assert!(matches("abc", "%c"));
        assert!(matches("", "%"));
        assert!(!matches("abc", "a_"));
        assert!(matches("aXbXc", "a%b%c"));
        assert!(!matches("abd", "a%c"));
        assert!(matches("a+b", "a+b"));
    }
}
