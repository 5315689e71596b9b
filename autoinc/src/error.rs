use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("conditional check failed (table={0})")]
    ConditionalCheckFailed(String),
    #[error("transaction canceled by a failed condition (table={0})")]
    TransactionCanceled(String),
    #[error("item too large (table={table}, size={size}, limit={limit})")]
    ItemTooLarge {
        table: String,
        size: u64,
        limit: u64,
    },
    #[error("too many items in a transaction (n={n}, limit={limit})")]
    TooManyTransactItems { n: usize, limit: usize },
    #[error("transaction writes the same item twice (table={0})")]
    DuplicateTransactItem(String),
    #[error("table not found (table={0})")]
    TableNotFound(String),
    #[error("table already exists (table={0})")]
    TableExists(String),
    #[error("key attribute `{attribute}` is missing (table={table})")]
    MissingKeyAttribute { table: String, attribute: String },
    #[error("`{attribute}` is not a key attribute (table={table})")]
    NotKeyAttribute { table: String, attribute: String },
    #[error("attribute `{0}` is not a number")]
    NotANumber(String),
    #[error("sequence exhausted (last={0})")]
    SequenceExhausted(i64),
    #[error("gave up after {0} conflicting attempts")]
    RetriesExhausted(u32),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConditionalCheckFailed(_)
            | Error::TransactionCanceled(_)
            | Error::RetriesExhausted(_) => ErrorKind::Conflict,
            Error::ItemTooLarge { .. } | Error::TooManyTransactItems { .. } => {
                ErrorKind::Capacity
            }
            _ => ErrorKind::Infrastructure,
        }
    }
}

/// Coarse classification of a failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Another writer won the race.
    Conflict,
    /// The write can never succeed as it is.
    Capacity,
    /// Anything else the store reported.
    Infrastructure,
}
impl ErrorKind {
    /// Errors that don't originate from this crate are `Infrastructure`.
    pub fn of(e: &anyhow::Error) -> Self {
        match e.downcast_ref::<Error>() {
            Some(e) => e.kind(),
            None => ErrorKind::Infrastructure,
        }
    }
}

/// Only a failed precondition can be resolved by reading again.
pub(crate) fn is_retryable(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<Error>(),
        Some(Error::ConditionalCheckFailed(_) | Error::TransactionCanceled(_))
    )
}
