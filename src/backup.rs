//! Full database backups

use std::path::{Path, PathBuf};

use log::info;

use crate::connection::SqlExecutor;
use crate::error::SqlOpsError;
use crate::sql::{escape_name_str, escape_quoted_literal, strip_brackets, Statement};

/// Options for backing up a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    /// Target folder or exact backup file. Defaults to the current directory.
    pub path: Option<PathBuf>,
    /// Ask the server for a compressed backup.
    pub compress: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            path: None,
            compress: true,
        }
    }
}

/// A path names a folder if it exists as one locally or ends with a separator.
fn is_folder(path: &Path) -> bool {
    if path.is_dir() {
        return true;
    }
    let text = path.to_string_lossy();
    text.ends_with('/') || text.ends_with('\\')
}

/// Work out which file a backup of `database_name` is written to.
pub fn backup_file_path(
    database_name: &str,
    path: Option<&Path>,
) -> Result<PathBuf, SqlOpsError> {
    let file_name = format!("{}.bak", strip_brackets(database_name));
    match path {
        Some(path) if is_folder(path) => Ok(path.join(file_name)),
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(std::env::current_dir()?.join(file_name)),
    }
}

/// The `BACKUP DATABASE` statement for a database and target file.
pub fn backup_statement(database_name: &str, backup_file: &str, compress: bool) -> Statement {
    let mut stmt = Statement::new(format!(
        "BACKUP DATABASE {} TO DISK = ",
        escape_name_str(database_name)
    ));
    stmt.push_param(backup_file).push_sql(&format!(
        " WITH FORMAT, INIT, COPY_ONLY, NAME = {}, SKIP, REWIND, NOUNLOAD, STATS = 10",
        escape_quoted_literal(&format!("{} Full Backup", database_name))
    ));
    if compress {
        stmt.push_sql(", COMPRESSION");
    }
    stmt
}

/// Back up a database to a single file and return the file used.
pub fn backup_database(
    conn: &mut impl SqlExecutor,
    database_name: &str,
    settings: &BackupSettings,
) -> Result<PathBuf, SqlOpsError> {
    if database_name.trim().is_empty() {
        return Err(SqlOpsError::invalid_argument("database name is empty"));
    }
    let backup_file = backup_file_path(database_name, settings.path.as_deref())?;
    info!(
        "Backing up database {} to {}",
        database_name,
        backup_file.display()
    );

    let statement = backup_statement(
        database_name,
        &backup_file.to_string_lossy(),
        settings.compress,
    );
    conn.execute(&statement)?;
    Ok(backup_file)
}
