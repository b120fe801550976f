use std::path::PathBuf;

use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read source file {path:?}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed row in {file} at line {line}: {reason}")]
    MalformedRow {
        file: String,
        line: u64,
        reason: String,
    },
    #[error("{table} rejected a row: {source}")]
    ConstraintViolation {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("transaction on {table} failed: {source}")]
    Transaction {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch {uri}: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to extract {archive:?}: {source}")]
    Extract {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

fn is_constraint_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ),
        _ => false,
    }
}

impl ImportError {
    /// Classifies a failed row write against `table`.
    pub(crate) fn from_write(table: &'static str, source: sqlx::Error) -> Self {
        if is_constraint_violation(&source) {
            ImportError::ConstraintViolation { table, source }
        } else {
            ImportError::Database(source)
        }
    }

    /// Classifies a failed begin/commit/rollback. Deferred foreign keys are only
    /// checked on commit, so a commit can still surface a constraint violation.
    pub(crate) fn from_transaction(table: &'static str, source: sqlx::Error) -> Self {
        if is_constraint_violation(&source) {
            ImportError::ConstraintViolation { table, source }
        } else {
            ImportError::Transaction { table, source }
        }
    }

    pub(crate) fn malformed(file: &str, line: u64, reason: impl Into<String>) -> Self {
        ImportError::MalformedRow {
            file: file.to_string(),
            line,
            reason: reason.into(),
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, ImportError::ConstraintViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_constraint_violations() {
        let err = ImportError::from_write("ROUTE", sqlx::Error::RowNotFound);
        assert!(matches!(err, ImportError::Database(_)));

        let err = ImportError::from_transaction("ROUTE", sqlx::Error::PoolClosed);
        assert!(matches!(err, ImportError::Transaction { table: "ROUTE", .. }));
    }

    #[test]
    fn malformed_row_message_names_file_and_line() {
        let err = ImportError::malformed("stops.txt", 12, "stop_lat is not a number");
        assert_eq!(
            err.to_string(),
            "malformed row in stops.txt at line 12: stop_lat is not a number"
        );
    }
}
