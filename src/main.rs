use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use rust_sqlops::restore::{read_backup_header, read_logical_files};
use rust_sqlops::{
    backup_database, create_database, create_database_if_not_exists, drop_and_create_database,
    drop_database, execute_sql_command, execute_sql_file, restore_sql_backup, with_connection,
    BackupSettings, CreateDatabaseSettings, ExecutionContext, RestoreSettings, UserMode,
};

#[derive(Parser)]
#[command(name = "rust-sqlops")]
#[command(author, version, about = "SQL Server database lifecycle operations")]
struct Cli {
    /// ADO.NET style connection string
    #[arg(short, long, env = "SQLOPS_CONNECTION_STRING", hide_env_values = true)]
    connection: String,

    /// Command timeout in seconds (no limit when omitted)
    #[arg(short, long, env = "SQLOPS_COMMAND_TIMEOUT")]
    timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Multi,
    Single,
    Restricted,
}

impl From<Mode> for UserMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Multi => UserMode::MultiUser,
            Mode::Single => UserMode::SingleUser,
            Mode::Restricted => UserMode::RestrictedUser,
        }
    }
}

#[derive(clap::Args)]
struct CreateArgs {
    /// Database name
    database: String,

    /// Primary data file path on the server
    #[arg(long)]
    primary_file: Option<String>,

    /// Log file path on the server
    #[arg(long)]
    log_file: Option<String>,

    /// Database collation, e.g. Latin1_General_CI_AS
    #[arg(long)]
    collation: Option<String>,
}

impl From<&CreateArgs> for CreateDatabaseSettings {
    fn from(args: &CreateArgs) -> Self {
        CreateDatabaseSettings {
            primary_file: args.primary_file.clone(),
            log_file: args.log_file.clone(),
            collation: args.collation.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database
    Create {
        #[command(flatten)]
        args: CreateArgs,

        /// Do nothing if the database already exists
        #[arg(long)]
        if_not_exists: bool,
    },
    /// Drop a database if it exists
    Drop {
        /// Database name
        database: String,
    },
    /// Drop and create a database
    Recreate {
        #[command(flatten)]
        args: CreateArgs,
    },
    /// Execute SQL text, split on GO batch separators
    Exec {
        /// SQL to run
        sql: String,
    },
    /// Execute one or more SQL files in order
    ExecFile {
        /// Script files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Back up a database to a single file
    Backup {
        /// Database name
        database: String,

        /// Target folder or file (defaults to <database>.bak in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not request backup compression
        #[arg(long)]
        no_compression: bool,
    },
    /// Restore a full backup, optionally followed by a differential backup
    Restore {
        /// Backup files of the full backup, in the order they were written
        #[arg(required = true)]
        files: Vec<String>,

        /// Backup files of the differential backup
        #[arg(short, long, num_args = 1..)]
        differential: Vec<String>,

        /// Name of the restored database (defaults to the name in the backup)
        #[arg(short = 'n', long)]
        new_name: Option<String>,

        /// Folder for the restored files (defaults to the server data/log folders)
        #[arg(short, long)]
        storage_folder: Option<String>,

        /// Overwrite an existing database
        #[arg(long)]
        replace: bool,

        /// Access mode while restoring
        #[arg(long, value_enum, default_value = "single")]
        user_mode: Mode,

        /// Backup set index within the full backup media
        #[arg(long)]
        backup_set_file: Option<i32>,

        /// Backup set index within the differential backup media
        #[arg(long)]
        differential_backup_set_file: Option<i32>,
    },
    /// Show the header and logical files of a backup
    Inspect {
        /// Backup file
        file: String,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let context = ExecutionContext {
        command_timeout: cli.timeout.map(Duration::from_secs),
    };
    let conn_str = cli.connection.as_str();

    match cli.command {
        Commands::Create {
            args,
            if_not_exists,
        } => {
            let settings = CreateDatabaseSettings::from(&args);
            with_connection(conn_str, &context, |conn| {
                if if_not_exists {
                    create_database_if_not_exists(conn, &args.database, &settings)
                } else {
                    create_database(conn, &args.database, &settings)
                }
            })?;
        }
        Commands::Drop { database } => {
            with_connection(conn_str, &context, |conn| drop_database(conn, &database))?;
        }
        Commands::Recreate { args } => {
            let settings = CreateDatabaseSettings::from(&args);
            with_connection(conn_str, &context, |conn| {
                drop_and_create_database(conn, &args.database, &settings)
            })?;
        }
        Commands::Exec { sql } => {
            with_connection(conn_str, &context, |conn| execute_sql_command(conn, &sql))?;
        }
        Commands::ExecFile { files } => {
            with_connection(conn_str, &context, |conn| {
                files
                    .iter()
                    .try_for_each(|file| execute_sql_file(conn, file))
            })?;
        }
        Commands::Backup {
            database,
            output,
            no_compression,
        } => {
            let settings = BackupSettings {
                path: output,
                compress: !no_compression,
            };
            let file = with_connection(conn_str, &context, |conn| {
                backup_database(conn, &database, &settings)
            })?;
            info!("Backup written to {}", file.display());
        }
        Commands::Restore {
            files,
            differential,
            new_name,
            storage_folder,
            replace,
            user_mode,
            backup_set_file,
            differential_backup_set_file,
        } => {
            let settings = RestoreSettings {
                new_database_name: new_name,
                new_storage_folder: storage_folder,
                with_replace: replace,
                user_mode: user_mode.into(),
                backup_set_file,
                differential_backup_set_file,
            };
            restore_sql_backup(conn_str, &context, &files, &differential, &settings)
                .with_context(|| format!("Failed to restore from {}", files.join(", ")))?;
        }
        Commands::Inspect { file } => {
            let (header, logical_files) = with_connection(conn_str, &context, |conn| {
                Ok((read_backup_header(conn, &file)?, read_logical_files(conn, &file)?))
            })?;
            println!("Database:    {}", header.database_name);
            if let Some(backup_type) = header.backup_type {
                println!(
                    "Backup type: {}{}",
                    backup_type,
                    if header.is_differential() {
                        " (differential)"
                    } else {
                        ""
                    }
                );
            }
            if let Some(position) = header.position {
                println!("Position:    {}", position);
            }
            if let Some(started) = &header.backup_start_date {
                println!("Started:     {}", started);
            }
            for descriptor in &logical_files {
                println!(
                    "  {:?}\t{}\t{}",
                    descriptor.file_type, descriptor.logical_name, descriptor.physical_name
                );
            }
        }
    }

    Ok(())
}
