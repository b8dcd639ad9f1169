//! Database create/drop and script execution

use std::path::Path;
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;

use crate::connection::SqlExecutor;
use crate::error::SqlOpsError;
use crate::sql::{escape_name_str, escape_quoted_literal, read_script_file, split_batches, Statement};

/// Collation names are bare words such as `Latin1_General_CI_AS`
static COLLATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("Invalid collation regex"));

/// Options for creating a database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateDatabaseSettings {
    /// Path of the primary data file on the server.
    pub primary_file: Option<String>,
    /// Path of the log file on the server.
    pub log_file: Option<String>,
    pub collation: Option<String>,
}

fn require_name(database_name: &str) -> Result<(), SqlOpsError> {
    if database_name.trim().is_empty() {
        return Err(SqlOpsError::invalid_argument("database name is empty"));
    }
    Ok(())
}

/// The `CREATE DATABASE` statement text.
///
/// `CREATE DATABASE` does not accept variables for file names, so they are
/// rendered as escaped literals.
pub fn create_database_sql(
    database_name: &str,
    settings: &CreateDatabaseSettings,
) -> Result<String, SqlOpsError> {
    let mut sql = format!("CREATE DATABASE {}", escape_name_str(database_name));

    if let Some(primary) = settings.primary_file.as_deref() {
        sql.push_str(&format!(
            " ON PRIMARY (NAME = {}, FILENAME = {})",
            escape_name_str(database_name),
            escape_quoted_literal(primary)
        ));
    }
    if let Some(log) = settings.log_file.as_deref() {
        sql.push_str(&format!(
            " LOG ON (NAME = {}, FILENAME = {})",
            escape_name_str(&format!("{}_log", database_name)),
            escape_quoted_literal(log)
        ));
    }
    if let Some(collation) = settings.collation.as_deref() {
        if !COLLATION_RE.is_match(collation) {
            return Err(SqlOpsError::invalid_argument(format!(
                "invalid collation name: {}",
                collation
            )));
        }
        sql.push_str(" COLLATE ");
        sql.push_str(collation);
    }
    Ok(sql)
}

pub fn create_database(
    conn: &mut impl SqlExecutor,
    database_name: &str,
    settings: &CreateDatabaseSettings,
) -> Result<(), SqlOpsError> {
    require_name(database_name)?;
    info!("Creating database {}", database_name);
    let sql = create_database_sql(database_name, settings)?;
    conn.execute(&Statement::new(sql))
}

/// Create a database unless one with that name already exists.
pub fn create_database_if_not_exists(
    conn: &mut impl SqlExecutor,
    database_name: &str,
    settings: &CreateDatabaseSettings,
) -> Result<(), SqlOpsError> {
    require_name(database_name)?;
    info!("Creating database {} if it does not exist", database_name);
    let sql = format!(
        "IF db_id({}) IS NULL {}",
        escape_quoted_literal(database_name),
        create_database_sql(database_name, settings)?
    );
    conn.execute(&Statement::new(sql))
}

pub fn drop_database_sql(database_name: &str) -> String {
    let escaped = escape_name_str(database_name);
    format!(
        "IF db_id({}) IS NOT NULL BEGIN ALTER DATABASE {} SET SINGLE_USER WITH ROLLBACK IMMEDIATE; DROP DATABASE {}; END",
        escape_quoted_literal(database_name),
        escaped,
        escaped
    )
}

/// Drop a database if it exists, disconnecting other sessions first.
///
/// A database the server cannot open is reported as already gone.
pub fn drop_database(conn: &mut impl SqlExecutor, database_name: &str) -> Result<(), SqlOpsError> {
    require_name(database_name)?;
    info!("Dropping database {}", database_name);
    match conn.execute(&Statement::new(drop_database_sql(database_name))) {
        Err(err) if err.is_cannot_open_database() => {
            warn!(
                "Database {} could not be opened, treating it as dropped: {}",
                database_name, err
            );
            Ok(())
        }
        other => other,
    }
}

pub fn drop_and_create_database(
    conn: &mut impl SqlExecutor,
    database_name: &str,
    settings: &CreateDatabaseSettings,
) -> Result<(), SqlOpsError> {
    drop_database(conn, database_name)?;
    create_database(conn, database_name, settings)
}

/// Execute a script, one `GO`-separated batch at a time.
pub fn execute_sql_command(conn: &mut impl SqlExecutor, sql: &str) -> Result<(), SqlOpsError> {
    if sql.trim().is_empty() {
        return Err(SqlOpsError::invalid_argument("SQL command is empty"));
    }
    for batch in split_batches(sql) {
        debug!("Running batch starting at line {}", batch.start_line);
        conn.execute(&Statement::new(batch.content))?;
    }
    Ok(())
}

/// Execute a script file, one `GO`-separated batch at a time.
pub fn execute_sql_file(conn: &mut impl SqlExecutor, path: &Path) -> Result<(), SqlOpsError> {
    info!("Executing SQL file {}", path.display());
    let sql = read_script_file(path)?;
    execute_sql_command(conn, &sql)
}
