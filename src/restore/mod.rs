//! Full and differential restore of SQL Server backups
//!
//! A restore runs as a fixed sequence on one connection:
//!
//! 1. read the backup header to learn the original database name
//! 2. optionally switch an existing target database out of multi-user mode
//! 3. read the logical files of the full backup and restore them, relocated
//! 4. do the same for the differential backup, if there is one
//! 5. switch the target back to multi-user mode
//!
//! Each statement commits on its own; nothing here wraps them in a transaction.

pub mod metadata;
pub mod paths;

use log::{info, warn};

pub use metadata::{
    read_backup_header, read_logical_files, BackupHeader, LogicalFileDescriptor, LogicalFileType,
    ServerDefaults,
};
pub use paths::{destination_path, file_name_portion, ServerPlatform};

use crate::connection::SqlExecutor;
use crate::error::SqlOpsError;
use crate::sql::{escape_name_str, escape_quoted_literal, Statement};

/// Access mode of the target database while the restore runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserMode {
    MultiUser,
    #[default]
    SingleUser,
    RestrictedUser,
}

impl UserMode {
    pub fn as_sql(self) -> &'static str {
        match self {
            UserMode::MultiUser => "MULTI_USER",
            UserMode::SingleUser => "SINGLE_USER",
            UserMode::RestrictedUser => "RESTRICTED_USER",
        }
    }
}

/// Options for restoring a backup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSettings {
    /// Name of the restored database. Defaults to the name stored in the backup.
    pub new_database_name: Option<String>,
    /// Folder for the restored files. Defaults to the server's data/log folders.
    pub new_storage_folder: Option<String>,
    /// Overwrite an existing database without a tail-log backup.
    pub with_replace: bool,
    pub user_mode: UserMode,
    /// Backup set to restore from the full backup media.
    pub backup_set_file: Option<i32>,
    /// Backup set to restore from the differential backup media.
    pub differential_backup_set_file: Option<i32>,
}

/// The disk files of one backup, in the order they were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFileSet {
    files: Vec<String>,
}

impl BackupFileSet {
    pub fn new<I, S>(files: I) -> Result<Self, SqlOpsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files: Vec<String> = files.into_iter().map(Into::into).collect();
        if files.is_empty() {
            return Err(SqlOpsError::EmptyBackupFileSet);
        }
        Ok(Self { files })
    }

    /// Like [`BackupFileSet::new`], but an empty list means "no backup".
    pub fn optional<I, S>(files: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(files).ok()
    }

    pub fn first(&self) -> &str {
        &self.files[0]
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A logical file and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMove {
    pub logical_name: String,
    pub destination: String,
}

/// Everything needed to emit one `RESTORE DATABASE` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan<'a> {
    pub database_name: &'a str,
    pub files: &'a BackupFileSet,
    pub backup_set_file: Option<i32>,
    pub moves: Vec<FileMove>,
    pub with_replace: bool,
    /// Leave the database restoring so a differential can follow.
    pub no_recovery: bool,
}

impl RestorePlan<'_> {
    pub fn to_statement(&self) -> Statement {
        let mut stmt = Statement::new(format!(
            "RESTORE DATABASE {} FROM ",
            escape_name_str(self.database_name)
        ));
        for (idx, file) in self.files.files().iter().enumerate() {
            if idx > 0 {
                stmt.push_sql(", ");
            }
            stmt.push_sql("DISK = ").push_param(file);
        }

        stmt.push_sql(" WITH ");
        if let Some(file_index) = self.backup_set_file {
            stmt.push_sql("FILE = ").push_param(file_index).push_sql(", ");
        }
        for file_move in &self.moves {
            stmt.push_sql("MOVE ")
                .push_param(&file_move.logical_name)
                .push_sql(" TO ")
                .push_param(&file_move.destination)
                .push_sql(", ");
        }
        if self.with_replace {
            stmt.push_sql("REPLACE, ");
        }
        stmt.push_sql(if self.no_recovery {
            "NORECOVERY"
        } else {
            "RECOVERY"
        });
        stmt
    }
}

/// Guarded user-mode switch; a no-op when the database does not exist yet.
pub fn user_mode_statement(database_name: &str, mode: UserMode) -> Statement {
    let termination = match mode {
        UserMode::MultiUser => "",
        UserMode::SingleUser | UserMode::RestrictedUser => " WITH ROLLBACK IMMEDIATE",
    };
    Statement::new(format!(
        "IF db_id({}) IS NOT NULL ALTER DATABASE {} SET {}{}",
        escape_quoted_literal(database_name),
        escape_name_str(database_name),
        mode.as_sql(),
        termination
    ))
}

/// Names and folders shared by both restore phases
struct Relocation<'a> {
    old_name: &'a str,
    new_name: &'a str,
    storage_folder: Option<&'a str>,
    server: ServerDefaults,
}

impl<'a> Relocation<'a> {
    fn plan<'p>(
        &mut self,
        conn: &mut impl SqlExecutor,
        files: &'p BackupFileSet,
        backup_set_file: Option<i32>,
        with_replace: bool,
        no_recovery: bool,
    ) -> Result<RestorePlan<'p>, SqlOpsError>
    where
        'a: 'p,
    {
        let descriptors = read_logical_files(conn, files.first())?;
        let platform = self.server.platform(conn)?;

        let mut moves = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let folder = match self.storage_folder {
                Some(folder) => folder.to_string(),
                None => self.server.default_folder(conn, descriptor.file_type)?,
            };
            moves.push(FileMove {
                logical_name: descriptor.logical_name.clone(),
                destination: destination_path(
                    descriptor,
                    self.old_name,
                    self.new_name,
                    &folder,
                    platform,
                ),
            });
        }

        Ok(RestorePlan {
            database_name: self.new_name,
            files,
            backup_set_file,
            moves,
            with_replace,
            no_recovery,
        })
    }
}

/// Restore a full backup, optionally followed by a differential backup.
pub fn restore_backup(
    conn: &mut impl SqlExecutor,
    full: &BackupFileSet,
    differential: Option<&BackupFileSet>,
    settings: &RestoreSettings,
) -> Result<(), SqlOpsError> {
    let header = read_backup_header(conn, full.first())?;
    let database_name = settings
        .new_database_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(&header.database_name)
        .to_string();

    info!(
        "Restoring database {} from {} file(s){}",
        database_name,
        full.len(),
        if differential.is_some() {
            " with a differential backup"
        } else {
            ""
        }
    );

    let mode_changed = settings.user_mode != UserMode::MultiUser;
    if mode_changed {
        conn.execute(&user_mode_statement(&database_name, settings.user_mode))?;
    }

    let mut relocation = Relocation {
        old_name: &header.database_name,
        new_name: &database_name,
        storage_folder: settings
            .new_storage_folder
            .as_deref()
            .filter(|folder| !folder.is_empty()),
        server: ServerDefaults::default(),
    };
    let outcome = run_phases(conn, &mut relocation, full, differential, settings);

    if mode_changed {
        // A timed out restore leaves the connection unusable; reopen it first
        let reset = conn
            .recover()
            .and_then(|()| conn.execute(&user_mode_statement(&database_name, UserMode::MultiUser)));
        match (&outcome, reset) {
            (Ok(()), reset) => reset?,
            (Err(_), Err(reset_err)) => {
                warn!(
                    "Could not return {} to MULTI_USER after a failed restore: {}",
                    database_name, reset_err
                );
            }
            (Err(_), Ok(())) => {}
        }
    }

    if outcome.is_ok() {
        info!("Restored database {}", database_name);
    }
    outcome
}

fn run_phases(
    conn: &mut impl SqlExecutor,
    relocation: &mut Relocation<'_>,
    full: &BackupFileSet,
    differential: Option<&BackupFileSet>,
    settings: &RestoreSettings,
) -> Result<(), SqlOpsError> {
    let full_plan = relocation.plan(
        conn,
        full,
        settings.backup_set_file,
        settings.with_replace,
        differential.is_some(),
    )?;
    conn.execute(&full_plan.to_statement())?;

    if let Some(differential) = differential {
        // Replace only ever applies to the first phase
        let diff_plan = relocation.plan(
            conn,
            differential,
            settings.differential_backup_set_file,
            false,
            false,
        )?;
        conn.execute(&diff_plan.to_statement())?;
    }
    Ok(())
}
