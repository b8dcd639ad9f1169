//! rust-sqlops: SQL Server database lifecycle operations
//!
//! This library creates, drops, backs up and restores SQL Server databases and
//! runs SQL scripts against them. Every operation works on anything that
//! implements [`SqlExecutor`]; [`TdsConnection`] is the implementation that
//! talks to a real server.

pub mod backup;
pub mod connection;
pub mod database;
pub mod error;
pub mod restore;
pub mod sql;
pub mod util;

pub use backup::{backup_database, BackupSettings};
pub use connection::{ExecutionContext, ResultRow, SqlExecutor, TdsConnection};
pub use database::{
    create_database, create_database_if_not_exists, drop_and_create_database, drop_database,
    execute_sql_command, execute_sql_file, CreateDatabaseSettings,
};
pub use error::SqlOpsError;
pub use restore::{restore_backup, BackupFileSet, RestoreSettings, UserMode};

/// Open a connection, run `op` on it and close it again.
///
/// The connection is released whether `op` succeeds or fails.
pub fn with_connection<T, F>(
    connection_string: &str,
    context: &ExecutionContext,
    op: F,
) -> Result<T, SqlOpsError>
where
    F: FnOnce(&mut TdsConnection) -> Result<T, SqlOpsError>,
{
    let mut conn = TdsConnection::open(connection_string, context)?;
    let result = op(&mut conn);
    match result {
        Ok(value) => {
            conn.close()?;
            Ok(value)
        }
        // Dropping the connection closes the socket
        Err(err) => Err(err),
    }
}

/// Restore one or more backup files over a fresh connection.
///
/// `differential_files` may be empty, in which case only the full backup is
/// restored.
pub fn restore_sql_backup(
    connection_string: &str,
    context: &ExecutionContext,
    backup_files: &[String],
    differential_files: &[String],
    settings: &RestoreSettings,
) -> Result<(), SqlOpsError> {
    let full = BackupFileSet::new(backup_files.iter().cloned())?;
    let differential = BackupFileSet::optional(differential_files.iter().cloned());
    with_connection(connection_string, context, |conn| {
        restore_backup(conn, &full, differential.as_ref(), settings)
    })
}
