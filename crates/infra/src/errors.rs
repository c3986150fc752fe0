//! Conversions from external infrastructure errors into domain errors.

use calsync_domain::SyncEngineError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can
/// be converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub SyncEngineError);

impl From<InfraError> for SyncEngineError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<SyncEngineError> for InfraError {
    fn from(value: SyncEngineError) -> Self {
        InfraError(value)
    }
}

impl From<SqlError> for InfraError {
    fn from(error: SqlError) -> Self {
        use rusqlite::ffi::ErrorCode;

        let mapped = match error {
            SqlError::QueryReturnedNoRows => {
                SyncEngineError::NotFound("no rows returned by query".into())
            }
            SqlError::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => SyncEngineError::Database("database is busy".into()),
                    ErrorCode::DatabaseLocked => {
                        SyncEngineError::Database("database is locked".into())
                    }
                    ErrorCode::ConstraintViolation => SyncEngineError::Database(format!(
                        "constraint violation: {message}"
                    )),
                    _ => SyncEngineError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            SqlError::FromSqlConversionFailure(_, _, cause) => {
                SyncEngineError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            SqlError::InvalidColumnType(_, _, ty) => {
                SyncEngineError::Database(format!("invalid column type: {ty}"))
            }
            other => SyncEngineError::Database(other.to_string()),
        };
        InfraError(mapped)
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(error: r2d2::Error) -> Self {
        InfraError(SyncEngineError::Database(format!("connection pool error: {error}")))
    }
}

impl From<HttpError> for InfraError {
    fn from(error: HttpError) -> Self {
        InfraError(SyncEngineError::Network(error.to_string()))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(error: serde_json::Error) -> Self {
        InfraError(SyncEngineError::Database(format!("corrupt stored json: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_maps_to_not_found() {
        let err: SyncEngineError = InfraError::from(SqlError::QueryReturnedNoRows).into();
        assert!(matches!(err, SyncEngineError::NotFound(_)));
    }

    #[test]
    fn corrupt_json_maps_to_database() {
        let parse_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SyncEngineError = InfraError::from(parse_error).into();
        assert!(matches!(err, SyncEngineError::Database(_)));
    }
}
