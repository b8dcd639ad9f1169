//! Error types for rust-sqlops

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// SQL Server error number for "Cannot open database requested by the login".
pub const CANNOT_OPEN_DATABASE: u32 = 4060;

/// Errors that can occur while running database lifecycle operations
#[derive(Error, Debug)]
pub enum SqlOpsError {
    #[error("Not a valid backup file: {path} (RESTORE FILELISTONLY returned no rows)")]
    InvalidBackupFile { path: String },

    #[error("Metadata query returned no rows: {query}")]
    NoMetadataRows { query: String },

    #[error("Failed to connect to SQL Server: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{message}")]
    LocalInstanceConnectivity {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to execute statement: {source}")]
    Execution {
        statement: String,
        #[source]
        source: tiberius::error::Error,
    },

    #[error("Statement timed out after {timeout:?}")]
    Timeout { statement: String, timeout: Duration },

    #[error("Connection is unusable after a statement timed out; reopen it before running: {statement}")]
    ConnectionBroken { statement: String },

    #[error("Invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("A backup file set needs at least one file")]
    EmptyBackupFileSet,

    #[error("Failed to read SQL file: {path}")]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start the async runtime")]
    Runtime {
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SqlOpsError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        SqlOpsError::InvalidArgument {
            message: message.into(),
        }
    }

    /// SQL Server error number carried by a failed statement, if any.
    pub fn server_code(&self) -> Option<u32> {
        match self {
            SqlOpsError::Execution {
                source: tiberius::error::Error::Server(token),
                ..
            } => Some(token.code()),
            _ => None,
        }
    }

    /// True for the "Cannot open database" family of failures.
    ///
    /// Prefers the server error number and falls back to the message text for
    /// drivers or proxies that do not forward it.
    pub fn is_cannot_open_database(&self) -> bool {
        match self {
            SqlOpsError::Execution { source, .. } => {
                self.server_code() == Some(CANNOT_OPEN_DATABASE)
                    || crate::util::contains_ci(&source.to_string(), "cannot open database")
            }
            _ => false,
        }
    }

    /// The statement text associated with the failure, when there is one.
    pub fn statement(&self) -> Option<&str> {
        match self {
            SqlOpsError::Execution { statement, .. }
            | SqlOpsError::Timeout { statement, .. }
            | SqlOpsError::ConnectionBroken { statement } => Some(statement),
            _ => None,
        }
    }
}
