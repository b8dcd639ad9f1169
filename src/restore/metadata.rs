//! Backup and server metadata queries

use log::debug;

use super::paths::ServerPlatform;
use crate::connection::{ResultRow, SqlExecutor};
use crate::error::SqlOpsError;
use crate::sql::Statement;

/// Kind of database file recorded in a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalFileType {
    Data,
    Log,
}

impl LogicalFileType {
    /// Parse the `Type` column of `RESTORE FILELISTONLY`. Only `L` is a log
    /// file; data, full-text and filestream files all live with the data.
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("L") {
            LogicalFileType::Log
        } else {
            LogicalFileType::Data
        }
    }
}

/// One database file recorded in a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFileDescriptor {
    pub logical_name: String,
    /// Path at backup time; only its file name is reused.
    pub physical_name: String,
    pub file_type: LogicalFileType,
}

/// The first backup set described by `RESTORE HEADERONLY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHeader {
    pub database_name: String,
    /// 1 = full, 2 = log, 5 = differential, ...
    pub backup_type: Option<i32>,
    /// Backup-set index within the media.
    pub position: Option<i32>,
    pub backup_start_date: Option<String>,
}

impl BackupHeader {
    pub fn is_differential(&self) -> bool {
        self.backup_type == Some(5)
    }

    fn from_row(row: &ResultRow) -> Option<Self> {
        Some(Self {
            database_name: row.get("DatabaseName")?.to_string(),
            backup_type: row.get("BackupType").and_then(|v| v.trim().parse().ok()),
            position: row.get("Position").and_then(|v| v.trim().parse().ok()),
            backup_start_date: row.get("BackupStartDate").map(str::to_string),
        })
    }
}

pub fn header_statement(backup_file: &str) -> Statement {
    Statement::new("RESTORE HEADERONLY FROM DISK = ").param(backup_file)
}

pub fn file_list_statement(backup_file: &str) -> Statement {
    Statement::new("RESTORE FILELISTONLY FROM DISK = ").param(backup_file)
}

pub fn version_statement() -> Statement {
    Statement::new("SELECT @@VERSION AS Version")
}

/// `SERVERPROPERTY` returns `sql_variant`, so the value is cast to text.
pub fn default_path_statement(property: &str) -> Statement {
    Statement::new(format!(
        "SELECT CAST(SERVERPROPERTY('{}') AS nvarchar(4000)) AS DefaultPath",
        property
    ))
}

/// Read the header of the first backup set in a backup file.
pub fn read_backup_header(
    conn: &mut impl SqlExecutor,
    backup_file: &str,
) -> Result<BackupHeader, SqlOpsError> {
    let statement = header_statement(backup_file);
    let rows = conn.query(&statement)?;
    rows.first()
        .and_then(BackupHeader::from_row)
        .ok_or_else(|| SqlOpsError::NoMetadataRows {
            query: statement.sql().to_string(),
        })
}

/// Read the logical files recorded in a backup, in backup order.
pub fn read_logical_files(
    conn: &mut impl SqlExecutor,
    backup_file: &str,
) -> Result<Vec<LogicalFileDescriptor>, SqlOpsError> {
    let rows = conn.query(&file_list_statement(backup_file))?;
    let descriptors: Vec<LogicalFileDescriptor> = rows
        .iter()
        .filter_map(|row| {
            Some(LogicalFileDescriptor {
                logical_name: row.get("LogicalName")?.to_string(),
                physical_name: row.get("PhysicalName").unwrap_or_default().to_string(),
                file_type: LogicalFileType::from_code(row.get("Type").unwrap_or_default()),
            })
        })
        .collect();

    if descriptors.is_empty() {
        return Err(SqlOpsError::InvalidBackupFile {
            path: backup_file.to_string(),
        });
    }
    debug!(
        "{} logical file(s) in {}",
        descriptors.len(),
        backup_file
    );
    Ok(descriptors)
}

/// Server facts needed while relocating files, each fetched at most once.
#[derive(Debug, Default)]
pub struct ServerDefaults {
    platform: Option<ServerPlatform>,
    data_path: Option<String>,
    log_path: Option<String>,
}

impl ServerDefaults {
    pub fn platform(&mut self, conn: &mut impl SqlExecutor) -> Result<ServerPlatform, SqlOpsError> {
        if let Some(platform) = self.platform {
            return Ok(platform);
        }
        let version = conn.query_value(&version_statement(), "Version")?;
        let platform = ServerPlatform::from_version(&version);
        debug!("Target server platform: {:?}", platform);
        self.platform = Some(platform);
        Ok(platform)
    }

    /// Default folder for files of the given type.
    pub fn default_folder(
        &mut self,
        conn: &mut impl SqlExecutor,
        file_type: LogicalFileType,
    ) -> Result<String, SqlOpsError> {
        let (slot, property) = match file_type {
            LogicalFileType::Data => (&mut self.data_path, "InstanceDefaultDataPath"),
            LogicalFileType::Log => (&mut self.log_path, "InstanceDefaultLogPath"),
        };
        if let Some(path) = slot.as_deref() {
            return Ok(path.to_string());
        }
        let path = conn.query_value(&default_path_statement(property), "DefaultPath")?;
        *slot = Some(path.clone());
        Ok(path)
    }
}
