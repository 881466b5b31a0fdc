use std::backtrace::Backtrace;
use std::fmt::Display;
use anyhow::anyhow;
use log::{error, warn};
use rocket::http::Status;
use rocket::response::status::Custom;
use crate::ledger::LedgerError;

pub(crate) fn sqlx_to_custom_error(err: sqlx::Error) -> Custom<String> {
    if let sqlx::Error::RowNotFound = err {
        return Custom(Status::NotFound, String::from("Record not found"))
    }
    error!("SQL Error: {err}\nbacktrace: {}", Backtrace::capture());
    Custom(Status::InternalServerError, format!("SQLx error: {}", err))
}
/// 404 naming the missing `what` for `RowNotFound`, any other failure as usual.
pub(crate) fn sqlx_to_not_found(err: sqlx::Error, what: impl Display) -> Custom<String> {
    match err {
        sqlx::Error::RowNotFound => Custom(Status::NotFound, format!("{what} not found")),
        err => sqlx_to_custom_error(err),
    }
}
pub(crate) fn ledger_to_custom_error(err: &LedgerError) -> Custom<String> {
    warn!("Ledger rejected operation: {err}");
    let status = match err {
        LedgerError::SessionNotFound(_) | LedgerError::PersonNotFound(_) => Status::NotFound,
        LedgerError::OccurrenceCancelled { .. } | LedgerError::CreditNotFound { .. } => Status::Conflict,
        LedgerError::NotEnrolled { .. } | LedgerError::OverlappingAttendance(_) => Status::UnprocessableEntity,
    };
    Custom(status, err.to_string())
}
pub(crate) fn anyhow_to_custom_error(err: anyhow::Error) -> Custom<String> {
    if let Some(ledger_err) = err.downcast_ref::<LedgerError>() {
        return ledger_to_custom_error(ledger_err)
    }
    match err.downcast::<sqlx::Error>() {
        Ok(sqlx_err) => sqlx_to_custom_error(sqlx_err),
        Err(err) => {
            error!("Error: {err}\nbacktrace: {}", Backtrace::capture());
            Custom(Status::InternalServerError, format!("Error: {}", err))
        }
    }
}
pub(crate) fn bad_request(err: impl Display) -> Custom<String> {
    Custom(Status::BadRequest, err.to_string())
}
pub(crate) fn sqlx_to_anyhow(err: sqlx::Error) -> anyhow::Error {
    if let sqlx::Error::RowNotFound = err {
        return err.into()
    }
    error!("SQL Error: {err}\nbacktrace: {}", Backtrace::capture());
    anyhow!(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studiotime::parse_date;

    #[test]
    fn test_error_statuses() {
        assert_eq!(anyhow_to_custom_error(sqlx::Error::RowNotFound.into()).0, Status::NotFound);
        assert_eq!(anyhow_to_custom_error(LedgerError::PersonNotFound(1).into()).0, Status::NotFound);
        let cancelled = LedgerError::OccurrenceCancelled { session_id: 1, date: parse_date("2025-03-03").unwrap() };
        assert_eq!(anyhow_to_custom_error(cancelled.into()).0, Status::Conflict);
        assert_eq!(anyhow_to_custom_error(LedgerError::OverlappingAttendance(1).into()).0, Status::UnprocessableEntity);
        assert_eq!(anyhow_to_custom_error(anyhow!("boom")).0, Status::InternalServerError);
        // RowNotFound survives the anyhow round trip
        assert_eq!(anyhow_to_custom_error(sqlx_to_anyhow(sqlx::Error::RowNotFound)).0, Status::NotFound);
    }

    #[test]
    fn test_not_found_only_for_missing_rows() {
        let missing = sqlx_to_not_found(sqlx::Error::RowNotFound, "Person id=7");
        assert_eq!(missing.0, Status::NotFound);
        assert_eq!(missing.1, "Person id=7 not found");
        assert_eq!(sqlx_to_not_found(sqlx::Error::PoolTimedOut, "Person id=7").0, Status::InternalServerError);
    }
}
