//! Uniform query parameters and result shapes.
//!
//! Route handlers and migration scripts speak `$n` positional placeholders
//! regardless of the active backend. The pooled connectors bind parameters
//! through sqlx; the Data API connector rewrites `$n` to the named `:pn`
//! form that the managed API requires.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::types::Json;

/// A query parameter value, independent of the active backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
}

impl SqlParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Rows plus affected-count returned by the uniform query facade.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_pg_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        SqlParam::Json(v) => query.bind(Json(v)),
    }
}

/// Rewrite `$n` positional placeholders to the `:pn` named form.
///
/// Placeholders inside single-quoted string literals are left untouched.
pub(crate) fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            continue;
        }
        if c == '$' && !in_string {
            let mut digits = String::new();
            while let Some(d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                out.push(c);
            } else {
                out.push_str(":p");
                out.push_str(&digits);
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Does this statement return rows when executed?
///
/// DML with a `RETURNING` clause counts: its rows would otherwise be
/// silently discarded by the execute path.
pub(crate) fn is_row_returning(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    if matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "VALUES" | "EXPLAIN") {
        return true;
    }
    has_returning_clause(sql)
}

/// Look for a RETURNING keyword outside single-quoted literals.
fn has_returning_clause(sql: &str) -> bool {
    let mut in_string = false;
    let mut word = String::new();
    for c in sql.chars() {
        if c == '\'' {
            in_string = !in_string;
            word.clear();
            continue;
        }
        if in_string {
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c.to_ascii_uppercase());
        } else {
            if word == "RETURNING" {
                return true;
            }
            word.clear();
        }
    }
    word == "RETURNING"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_names() {
        assert!(SqlParam::Null.is_null());
        assert_eq!(SqlParam::Int(42).type_name(), "int");
        assert_eq!(SqlParam::from("hello").type_name(), "text");
        assert_eq!(SqlParam::from(true).type_name(), "bool");
    }

    #[test]
    fn test_rewrite_simple_placeholders() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM users WHERE id = $1 AND status = $2"),
            "SELECT * FROM users WHERE id = :p1 AND status = :p2"
        );
    }

    #[test]
    fn test_rewrite_multi_digit_placeholder() {
        assert_eq!(rewrite_placeholders("VALUES ($10, $11)"), "VALUES (:p10, :p11)");
    }

    #[test]
    fn test_rewrite_skips_string_literals() {
        assert_eq!(
            rewrite_placeholders("SELECT '$1 off' AS promo WHERE id = $1"),
            "SELECT '$1 off' AS promo WHERE id = :p1"
        );
    }

    #[test]
    fn test_rewrite_leaves_bare_dollar() {
        assert_eq!(rewrite_placeholders("SELECT 1 AS \"a$b\""), "SELECT 1 AS \"a$b\"");
    }

    #[test]
    fn test_is_row_returning() {
        assert!(is_row_returning("SELECT 1"));
        assert!(is_row_returning("  with t as (select 1) select * from t"));
        assert!(is_row_returning("EXPLAIN SELECT 1"));
        assert!(!is_row_returning("INSERT INTO users (name) VALUES ($1)"));
        assert!(!is_row_returning("CREATE TABLE IF NOT EXISTS t (id INT)"));
    }

    #[test]
    fn test_dml_with_returning_clause_yields_rows() {
        assert!(is_row_returning(
            "INSERT INTO users (email) VALUES ($1) RETURNING id"
        ));
        assert!(is_row_returning(
            "update contracts set status = $1 where id = $2 returning *"
        ));
        assert!(is_row_returning("DELETE FROM audit_log RETURNING id"));
    }

    #[test]
    fn test_returning_inside_literal_is_ignored() {
        assert!(!is_row_returning(
            "INSERT INTO audit_log (action) VALUES ('RETURNING soon')"
        ));
        // Substring of a longer identifier is not the keyword.
        assert!(!is_row_returning(
            "UPDATE users SET settings = returning_policy"
        ));
    }
}
