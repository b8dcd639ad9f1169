//! Unit tests for backup restore orchestration

use pretty_assertions::assert_eq;

use rust_sqlops::{restore_backup, BackupFileSet, RestoreSettings, SqlOpsError, UserMode};

use crate::common::{data, log, text_params, FakeServer, LINUX_VERSION};

fn sales_server() -> FakeServer {
    FakeServer::with_backup(
        "C:\\backups\\Sales.bak",
        "Sales",
        vec![
            data("Sales", "C:\\Program Files\\MSSQL\\DATA\\Sales.mdf"),
            log("Sales_log", "C:\\Program Files\\MSSQL\\DATA\\Sales_log.ldf"),
        ],
    )
}

fn full_set() -> BackupFileSet {
    BackupFileSet::new(["C:\\backups\\Sales.bak"]).unwrap()
}

// ============================================================================
// Statement sequence
// ============================================================================

#[test]
fn test_full_restore_sequence() {
    let mut server = sales_server();
    restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap();

    assert_eq!(
        server.executed_sql(),
        vec![
            "IF db_id('Sales') IS NOT NULL ALTER DATABASE [Sales] SET SINGLE_USER WITH ROLLBACK IMMEDIATE",
            "RESTORE DATABASE [Sales] FROM DISK = @P1 WITH MOVE @P2 TO @P3, MOVE @P4 TO @P5, RECOVERY",
            "IF db_id('Sales') IS NOT NULL ALTER DATABASE [Sales] SET MULTI_USER",
        ]
    );
    assert_eq!(
        text_params(server.restores()[0]),
        vec![
            "C:\\backups\\Sales.bak",
            "Sales",
            "C:\\SQL\\DATA\\Sales.mdf",
            "Sales_log",
            "L:\\SQL\\LOG\\Sales_log.ldf",
        ]
    );
}

#[test]
fn test_full_only_uses_recovery() {
    let mut server = sales_server();
    restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap();

    let restores = server.restores();
    assert_eq!(restores.len(), 1);
    assert!(restores[0].sql().ends_with(", RECOVERY"));
    assert!(!restores[0].sql().contains("NORECOVERY"));
}

#[test]
fn test_full_and_differential_recovery_modes() {
    let mut server = sales_server();
    server.add_backup(
        "C:\\backups\\Sales_diff.bak",
        "Sales",
        vec![
            data("Sales", "C:\\Program Files\\MSSQL\\DATA\\Sales.mdf"),
            log("Sales_log", "C:\\Program Files\\MSSQL\\DATA\\Sales_log.ldf"),
        ],
    );
    let diff = BackupFileSet::new(["C:\\backups\\Sales_diff.bak"]).unwrap();

    restore_backup(&mut server, &full_set(), Some(&diff), &RestoreSettings::default()).unwrap();

    let restores = server.restores();
    assert_eq!(restores.len(), 2);
    assert!(restores[0].sql().ends_with(", NORECOVERY"));
    assert!(restores[1].sql().ends_with(", RECOVERY"));
    assert!(!restores[1].sql().contains("NORECOVERY"));
    assert_eq!(text_params(restores[1])[0], "C:\\backups\\Sales_diff.bak");

    // User mode is reset once, after both phases
    let last = server.executed_sql().last().copied().unwrap();
    assert!(last.ends_with("SET MULTI_USER"));
}

#[test]
fn test_replace_only_in_full_phase() {
    let mut server = sales_server();
    server.add_backup(
        "diff.bak",
        "Sales",
        vec![data("Sales", "C:\\DATA\\Sales.mdf")],
    );
    let diff = BackupFileSet::new(["diff.bak"]).unwrap();
    let settings = RestoreSettings {
        with_replace: true,
        ..Default::default()
    };

    restore_backup(&mut server, &full_set(), Some(&diff), &settings).unwrap();

    let restores = server.restores();
    assert!(restores[0].sql().contains(", REPLACE, NORECOVERY"));
    assert!(!restores[1].sql().contains("REPLACE"));
}

#[test]
fn test_backup_set_file_indexes_per_phase() {
    let mut server = sales_server();
    server.add_backup("diff.bak", "Sales", vec![data("Sales", "Sales.mdf")]);
    let diff = BackupFileSet::new(["diff.bak"]).unwrap();
    let settings = RestoreSettings {
        backup_set_file: Some(2),
        differential_backup_set_file: Some(4),
        ..Default::default()
    };

    restore_backup(&mut server, &full_set(), Some(&diff), &settings).unwrap();

    let restores = server.restores();
    assert!(restores[0].sql().contains(" WITH FILE = @P2, MOVE"));
    assert_eq!(text_params(restores[0])[1], "2");
    assert!(restores[1].sql().contains(" WITH FILE = @P2, MOVE"));
    assert_eq!(text_params(restores[1])[1], "4");
}

#[test]
fn test_no_backup_set_file_omits_clause() {
    let mut server = sales_server();
    restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap();
    assert!(!server.restores()[0].sql().contains("FILE ="));
}

// ============================================================================
// File relocation
// ============================================================================

#[test]
fn test_one_move_per_logical_file_in_order() {
    let mut server = FakeServer::with_backup(
        "big.bak",
        "Big",
        vec![
            data("Big", "D:\\Data\\Big.mdf"),
            data("Big_2", "D:\\Data\\Big_2.ndf"),
            log("Big_log", "E:\\Log\\Big_log.ldf"),
            data("Big_3", "D:\\Data\\Big_3.ndf"),
        ],
    );
    let full = BackupFileSet::new(["big.bak"]).unwrap();

    restore_backup(&mut server, &full, None, &RestoreSettings::default()).unwrap();

    let restore = server.restores()[0];
    assert_eq!(restore.sql().matches("MOVE ").count(), 4);
    let params = text_params(restore);
    let logical: Vec<&str> = params[1..].iter().step_by(2).map(String::as_str).collect();
    assert_eq!(logical, vec!["Big", "Big_2", "Big_log", "Big_3"]);
}

#[test]
fn test_multi_file_backup_set_keeps_order() {
    let mut server = sales_server();
    let full = BackupFileSet::new([
        "C:\\backups\\Sales.bak",
        "C:\\backups\\Sales_2.bak",
        "C:\\backups\\Sales_3.bak",
    ])
    .unwrap();

    restore_backup(&mut server, &full, None, &RestoreSettings::default()).unwrap();

    let restore = server.restores()[0];
    assert!(restore
        .sql()
        .starts_with("RESTORE DATABASE [Sales] FROM DISK = @P1, DISK = @P2, DISK = @P3 WITH"));
    assert_eq!(
        &text_params(restore)[..3],
        &[
            "C:\\backups\\Sales.bak".to_string(),
            "C:\\backups\\Sales_2.bak".to_string(),
            "C:\\backups\\Sales_3.bak".to_string(),
        ]
    );
    // Metadata is read from the first file only
    assert_eq!(server.query_count("RESTORE FILELISTONLY"), 1);
}

#[test]
fn test_new_name_and_storage_folder() {
    let mut server = sales_server();
    let settings = RestoreSettings {
        new_database_name: Some("SalesCopy".to_string()),
        new_storage_folder: Some("E:\\Restored".to_string()),
        ..Default::default()
    };

    restore_backup(&mut server, &full_set(), None, &settings).unwrap();

    let restore = server.restores()[0];
    assert!(restore.sql().starts_with("RESTORE DATABASE [SalesCopy] FROM"));
    let params = text_params(restore);
    assert_eq!(params[2], "E:\\Restored\\SalesCopy.mdf");
    assert_eq!(params[4], "E:\\Restored\\SalesCopy_log.ldf");
    // Logical names are never renamed
    assert_eq!(params[1], "Sales");
    assert_eq!(server.query_count("SERVERPROPERTY"), 0);
    assert!(server.executed_sql()[0].contains("db_id('SalesCopy')"));
}

#[test]
fn test_linux_server_gets_forward_slashes() {
    let mut server = sales_server();
    server.version = LINUX_VERSION.to_string();
    server.default_data_path = Some("/var/opt/mssql/data/".to_string());
    server.default_log_path = Some("/var/opt/mssql/log".to_string());

    restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap();

    let params = text_params(server.restores()[0]);
    assert_eq!(params[2], "/var/opt/mssql/data/Sales.mdf");
    assert_eq!(params[4], "/var/opt/mssql/log/Sales_log.ldf");
}

#[test]
fn test_linux_server_normalizes_caller_folder() {
    let mut server = sales_server();
    server.version = LINUX_VERSION.to_string();
    let settings = RestoreSettings {
        new_storage_folder: Some("\\restore\\here\\".to_string()),
        ..Default::default()
    };

    restore_backup(&mut server, &full_set(), None, &settings).unwrap();

    let params = text_params(server.restores()[0]);
    assert_eq!(params[2], "/restore/here/Sales.mdf");
}

#[test]
fn test_server_metadata_resolved_once() {
    let mut server = FakeServer::with_backup(
        "full.bak",
        "Sales",
        vec![
            data("Sales", "Sales.mdf"),
            data("Sales_2", "Sales_2.ndf"),
            log("Sales_log", "Sales_log.ldf"),
            log("Sales_log2", "Sales_log2.ldf"),
        ],
    );
    server.add_backup(
        "diff.bak",
        "Sales",
        vec![data("Sales", "Sales.mdf"), log("Sales_log", "Sales_log.ldf")],
    );
    let full = BackupFileSet::new(["full.bak"]).unwrap();
    let diff = BackupFileSet::new(["diff.bak"]).unwrap();

    restore_backup(&mut server, &full, Some(&diff), &RestoreSettings::default()).unwrap();

    assert_eq!(server.query_count("RESTORE HEADERONLY"), 1);
    assert_eq!(server.query_count("@@VERSION"), 1);
    assert_eq!(server.query_count("InstanceDefaultDataPath"), 1);
    assert_eq!(server.query_count("InstanceDefaultLogPath"), 1);
}

#[test]
fn test_differential_uses_name_from_full_backup() {
    let mut server = sales_server();
    // A differential whose header names another database still restores to
    // the name resolved from the full backup
    server.add_backup("diff.bak", "Other", vec![data("Sales", "C:\\X\\Sales.mdf")]);
    let diff = BackupFileSet::new(["diff.bak"]).unwrap();

    restore_backup(&mut server, &full_set(), Some(&diff), &RestoreSettings::default()).unwrap();

    let restores = server.restores();
    assert!(restores[1].sql().starts_with("RESTORE DATABASE [Sales] FROM"));
}

// ============================================================================
// User mode
// ============================================================================

#[test]
fn test_multi_user_mode_skips_alter() {
    let mut server = sales_server();
    let settings = RestoreSettings {
        user_mode: UserMode::MultiUser,
        ..Default::default()
    };

    restore_backup(&mut server, &full_set(), None, &settings).unwrap();

    assert_eq!(server.executed.len(), 1);
    assert!(server.executed_sql()[0].starts_with("RESTORE DATABASE"));
}

#[test]
fn test_restricted_user_mode() {
    let mut server = sales_server();
    let settings = RestoreSettings {
        user_mode: UserMode::RestrictedUser,
        ..Default::default()
    };

    restore_backup(&mut server, &full_set(), None, &settings).unwrap();

    let sql = server.executed_sql();
    assert!(sql[0].ends_with("SET RESTRICTED_USER WITH ROLLBACK IMMEDIATE"));
    assert!(sql[2].ends_with("SET MULTI_USER"));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_missing_header_fails_before_any_change() {
    let mut server = FakeServer::default();
    let full = BackupFileSet::new(["nothing.bak"]).unwrap();

    let err = restore_backup(&mut server, &full, None, &RestoreSettings::default()).unwrap_err();

    assert!(matches!(err, SqlOpsError::NoMetadataRows { .. }));
    assert!(server.executed.is_empty());
}

#[test]
fn test_empty_file_list_is_invalid_backup() {
    let mut server = FakeServer::with_backup("broken.bak", "Sales", vec![]);
    let full = BackupFileSet::new(["broken.bak"]).unwrap();

    let err = restore_backup(&mut server, &full, None, &RestoreSettings::default()).unwrap_err();

    match err {
        SqlOpsError::InvalidBackupFile { path } => assert_eq!(path, "broken.bak"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.restores().is_empty());
    // The mode switch already happened, so it is undone
    assert!(server.executed_sql().last().unwrap().ends_with("SET MULTI_USER"));
}

#[test]
fn test_failed_restore_propagates_original_error() {
    let mut server = sales_server();
    server.fail_when("RESTORE DATABASE", "The media family on device is incorrectly formed");

    let err = restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap_err();

    assert!(err.to_string().contains("incorrectly formed"));
    assert_eq!(err.statement().map(|s| s.starts_with("RESTORE DATABASE")), Some(true));
    assert!(server.executed_sql().last().unwrap().ends_with("SET MULTI_USER"));
}

#[test]
fn test_missing_default_path_is_no_metadata() {
    let mut server = sales_server();
    server.default_log_path = None;

    let err = restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap_err();

    assert!(matches!(err, SqlOpsError::NoMetadataRows { .. }));
    assert!(server.restores().is_empty());
}

#[test]
fn test_reset_failure_after_successful_restore_is_returned() {
    let mut server = sales_server();
    server.fail_when("SET MULTI_USER", "ALTER DATABASE failed because a lock could not be placed");

    let err = restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap_err();

    assert!(matches!(err, SqlOpsError::Execution { .. }));
    assert_eq!(err.statement().map(|s| s.ends_with("SET MULTI_USER")), Some(true));
    assert_eq!(server.restores().len(), 1);
}

#[test]
fn test_reset_failure_after_failed_restore_keeps_restore_error() {
    let mut server = sales_server();
    server.fail_when("RESTORE DATABASE", "The media family on device is incorrectly formed");
    server.fail_when("SET MULTI_USER", "ALTER DATABASE failed because a lock could not be placed");

    let err = restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap_err();

    assert!(err.to_string().contains("incorrectly formed"));
    assert_eq!(err.statement().map(|s| s.starts_with("RESTORE DATABASE")), Some(true));
    // The reset was still attempted
    assert!(server.executed_sql().last().unwrap().ends_with("SET MULTI_USER"));
}

#[test]
fn test_timed_out_restore_resets_user_mode_after_recovering_connection() {
    let mut server = sales_server();
    server.time_out_when("RESTORE DATABASE");

    let err = restore_backup(&mut server, &full_set(), None, &RestoreSettings::default()).unwrap_err();

    assert!(matches!(err, SqlOpsError::Timeout { .. }));
    assert_eq!(server.recoveries, 1);
    assert!(!server.broken);
    assert_eq!(
        server.executed_sql().last().copied(),
        Some("IF db_id('Sales') IS NOT NULL ALTER DATABASE [Sales] SET MULTI_USER")
    );
}

#[test]
fn test_timed_out_differential_stops_before_more_work() {
    let mut server = sales_server();
    server.add_backup(
        "C:\\backups\\Sales_diff.bak",
        "Sales",
        vec![
            data("Sales", "C:\\Program Files\\MSSQL\\DATA\\Sales.mdf"),
            log("Sales_log", "C:\\Program Files\\MSSQL\\DATA\\Sales_log.ldf"),
        ],
    );
    // Only the full phase restores WITH NORECOVERY
    server.time_out_when("NORECOVERY");
    let diff = BackupFileSet::new(["C:\\backups\\Sales_diff.bak"]).unwrap();

    let err = restore_backup(&mut server, &full_set(), Some(&diff), &RestoreSettings::default())
        .unwrap_err();

    assert!(matches!(err, SqlOpsError::Timeout { .. }));
    assert_eq!(server.restores().len(), 1);
    assert_eq!(server.query_count("FILELISTONLY"), 1);
    assert_eq!(server.recoveries, 1);
}
