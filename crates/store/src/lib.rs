//! Typed persistence over Postgres.
//!
//! Free async functions per entity module, runtime-checked queries, and a
//! small bind-value abstraction for dynamically assembled patches. Unique
//! violations surface as `Conflict`, missing rows as `NotFound`, anything
//! else as `Database` (retriable).

pub mod builds;
pub mod deployables;
pub mod deploys;
pub mod environments;
pub mod global_config;
pub mod pull_requests;
pub mod query;
pub mod repositories;
pub mod summary;
pub mod webhook_invocations;

use domain::DomainError;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::Postgres;
use uuid::Uuid;

pub type PgPool = sqlx::PgPool;

/// Map a database error onto the domain taxonomy. `23505` is the Postgres
/// unique-violation class.
pub(crate) fn map_db_err(err: sqlx::Error) -> DomainError {
    if let sqlx::Error::RowNotFound = err {
        return DomainError::not_found("row", "");
    }
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            return DomainError::Conflict(db_err.message().to_string());
        }
    }
    DomainError::Database(err)
}

/// One bindable value for dynamically assembled UPDATEs.
pub(crate) enum BindValue {
    Text(Option<String>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Bool(bool),
    Uuid(Uuid),
    Jsonb(serde_json::Value),
}

/// Accumulates `column = $n` clauses plus their bind values in order.
pub(crate) struct PatchBuilder {
    sets: Vec<String>,
    binds: Vec<BindValue>,
    next_placeholder: usize,
}

impl PatchBuilder {
    /// `first_placeholder` leaves room for WHERE parameters bound before
    /// the SET values.
    pub(crate) fn new(first_placeholder: usize) -> Self {
        PatchBuilder {
            sets: vec!["updated_at = NOW()".to_string()],
            binds: Vec::new(),
            next_placeholder: first_placeholder,
        }
    }

    pub(crate) fn set(&mut self, column: &str, value: BindValue) {
        self.sets.push(format!("{column} = ${}", self.next_placeholder));
        self.next_placeholder += 1;
        self.binds.push(value);
    }

    pub(crate) fn set_json<T: serde::Serialize>(&mut self, column: &str, value: &T) {
        let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.set(column, BindValue::Jsonb(json));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }

    pub(crate) fn clause(&self) -> String {
        self.sets.join(", ")
    }

    pub(crate) fn bind_all<'q>(
        self,
        mut query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        for value in self.binds {
            query = match value {
                BindValue::Text(v) => query.bind(v),
                BindValue::Int(v) => query.bind(v),
                BindValue::BigInt(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
                BindValue::Uuid(v) => query.bind(v),
                BindValue::Jsonb(v) => query.bind(Json(v)),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_builder_numbers_placeholders_after_where_params() {
        let mut patch = PatchBuilder::new(2);
        patch.set("status", BindValue::Text(Some("queued".into())));
        patch.set("port", BindValue::Int(Some(8080)));
        assert_eq!(
            patch.clause(),
            "updated_at = NOW(), status = $2, port = $3"
        );
        assert!(!patch.is_empty());
    }
}
