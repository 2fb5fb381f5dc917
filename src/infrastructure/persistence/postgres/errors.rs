//! # sqlx Error Mapping
//!
//! The single place where driver errors become [`RepositoryError`]s.
//!
//! | Driver condition                       | Mapped to                         |
//! |----------------------------------------|-----------------------------------|
//! | SQLSTATE `23505` unique violation      | `AlreadyExists`                   |
//! | SQLSTATE `23503` on insert/update      | `ReferenceNotFound`               |
//! | SQLSTATE `23503` on delete             | `InUse`                           |
//! | SQLSTATE `23514` check violation       | `Domain(InvalidField)`            |
//! | `40001`, `40P01`, pool timeout         | `Transient`                       |
//! | `57014` query cancelled                | `Cancelled`                       |
//! | `RowNotFound`                          | `NotFound`                        |
//! | I/O, TLS, closed pool                  | `Connection`                      |
//! | decode failures                        | `Serialization`                   |
//!
//! Everything else propagates as `Query`.

use crate::domain::errors::DomainError;
use crate::infrastructure::persistence::traits::RepositoryError;
use std::fmt;

/// Which kind of statement failed; decides how a foreign-key violation
/// reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    /// SELECT.
    Read,
    /// INSERT or UPDATE.
    Write,
    /// DELETE or soft delete.
    Delete,
}

/// Builds a mapper for `entity` identified by `key`.
pub(crate) fn map_sqlx(
    op: Op,
    entity: &'static str,
    key: impl fmt::Display,
) -> impl FnOnce(sqlx::Error) -> RepositoryError {
    let key = key.to_string();
    move |err| classify(err, op, entity, key)
}

/// Mapper for statements with no natural key (listing, counting).
pub(crate) fn query_error(err: sqlx::Error) -> RepositoryError {
    classify(err, Op::Read, "Entity", String::new())
}

fn classify(err: sqlx::Error, op: Op, entity: &'static str, key: String) -> RepositoryError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let constraint = db.constraint().unwrap_or_default().to_string();
            match code.as_str() {
                "23505" => RepositoryError::already_exists(entity, key),
                "23503" if op == Op::Delete => RepositoryError::in_use(entity, key),
                "23503" => {
                    RepositoryError::reference_not_found(referenced_entity(&constraint), key)
                }
                "23514" => DomainError::invalid("row", format!("violates {constraint}")).into(),
                "40001" | "40P01" => RepositoryError::transient(db.message().to_string()),
                "57014" => RepositoryError::Cancelled,
                _ => RepositoryError::query(db.message().to_string()),
            }
        }
        sqlx::Error::RowNotFound => RepositoryError::not_found(entity, key),
        sqlx::Error::PoolTimedOut => RepositoryError::transient("connection pool timed out"),
        sqlx::Error::PoolClosed => RepositoryError::connection("connection pool closed"),
        sqlx::Error::Io(e) => RepositoryError::connection(e.to_string()),
        sqlx::Error::Tls(e) => RepositoryError::connection(e.to_string()),
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. }) => RepositoryError::serialization(e.to_string()),
        other => RepositoryError::query(other.to_string()),
    }
}

/// Guesses the referenced table from a Postgres-generated constraint name
/// such as `tradings_exchange_id_fkey`.
fn referenced_entity(constraint: &str) -> &'static str {
    const COLUMNS: &[(&str, &str)] = &[
        ("sub_account_id", "SubAccount"),
        ("transaction_id", "Transaction"),
        ("trading_id", "Trading"),
        ("exchange_id", "ExchangeBinding"),
        ("user_id", "User"),
    ];
    COLUMNS
        .iter()
        .find(|(column, _)| constraint.contains(column))
        .map_or("Entity", |(_, entity)| entity)
}
