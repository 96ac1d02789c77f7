use thiserror::Error;

use crate::sheets::{SheetError, SheetTarget};

/// Failure of one sync pass. Everything except `Repository` leaves the
/// submission retriable; `Repository` means the local database itself failed
/// and is surfaced to the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{op} on {target} failed: {source:#}")]
    Store {
        op: &'static str,
        target: SheetTarget,
        #[source]
        source: anyhow::Error,
    },
    #[error("{op} on {target} returned an unexpected cell: {source}")]
    CellShape {
        op: &'static str,
        target: SheetTarget,
        #[source]
        source: SheetError,
    },
    #[error("header of {target} is full: {needed} columns needed, limit is {limit}")]
    HeaderFull {
        target: SheetTarget,
        needed: usize,
        limit: usize,
    },
    #[error("no free row left in {target}")]
    RowsExhausted { target: SheetTarget },
    #[error("answer payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("form {0} not found")]
    FormMissing(i64),
    #[error("database error: {0:#}")]
    Repository(#[source] anyhow::Error),
}

impl SyncError {
    /// Classify a store failure; cell conversion errors raised by the store
    /// adapter become `CellShape`.
    pub fn store(op: &'static str, target: &SheetTarget, err: anyhow::Error) -> Self {
        match err.downcast::<SheetError>() {
            Ok(source) => SyncError::CellShape {
                op,
                target: target.clone(),
                source,
            },
            Err(source) => SyncError::Store {
                op,
                target: target.clone(),
                source,
            },
        }
    }

    pub fn is_retriable(&self) -> bool {
        !matches!(self, SyncError::Repository(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn store_errors_are_classified() {
        let target = SheetTarget::new("s1", "Form");
        let err = SyncError::store("read header", &target, anyhow!("503 backend error"));
        assert!(matches!(err, SyncError::Store { .. }));
        assert!(err.to_string().contains("s1/Form"));
        assert!(err.to_string().contains("503 backend error"));

        let shape = SyncError::store(
            "read header",
            &target,
            anyhow::Error::new(SheetError::UnexpectedCell("true".into())),
        );
        assert!(matches!(shape, SyncError::CellShape { .. }));
        assert!(shape.is_retriable());

        assert!(!SyncError::Repository(anyhow!("disk full")).is_retriable());
    }
}
