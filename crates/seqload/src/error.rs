//! Error types for sequence generation and table maintenance.
//!
//! Most variants are *transient*: a worker logs them and carries on with the
//! next iteration. Only [`Error::Rebuild`] escapes the reset supervisor, since
//! a table that was dropped but not recreated cannot be repaired in-process.

/// Crate-wide result alias.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `seqload` can produce.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A call into the durable store failed.
    #[error("Store error on table {table}: {context}")]
    Store { table: String, context: String },

    /// The table does not exist (e.g. it is between delete and create).
    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    /// A stored item could not be decoded into a sequence entry.
    #[error("Malformed entry in table {table}: {reason}")]
    MalformedEntry { table: String, reason: String },

    /// A generator could not produce the next term.
    #[error("Computation failed: {reason}")]
    Computation { reason: String },

    /// Configuration rejected during validation.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The store never confirmed the table was gone.
    #[error("Timed out waiting for table {table} to be deleted")]
    DeleteTimeout { table: String },

    /// A worker task panicked or was aborted.
    #[error("Worker task failed: {context}")]
    WorkerTask { context: String },

    /// Dropping and recreating the table failed part way.
    #[error("Rebuild of table {table} failed: {source}")]
    Rebuild {
        table: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn store(table: &str, context: impl Into<String>) -> Self {
        Self::Store {
            table: table.to_string(),
            context: context.into(),
        }
    }

    pub(crate) fn rebuild(table: &str, source: Self) -> Self {
        Self::Rebuild {
            table: table.to_string(),
            source: Box::new(source),
        }
    }
}
