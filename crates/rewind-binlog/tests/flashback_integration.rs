//! End-to-end flashback tests over generated binlog files
//!
//! Each test writes real binlog files into a temp dir, runs the pipeline with
//! the file reader and a static catalog, and inspects the produced script.
//!
//! Run with: cargo test -p rewind-binlog --test flashback_integration

mod harness;

use harness::*;
use rewind_binlog::mysql::BinlogFileOpener;
use rewind_binlog::{
    FlashbackConfig, FlashbackError, FlashbackPipeline, OutputTarget, RunSummary, StaticCatalog,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const F1: &str = "mysql-bin.000001";
const F2: &str = "mysql-bin.000002";

/// Offsets of interesting events in the generated files.
struct Layout {
    tx1_gtid: Span,
    tx1_rows: Span,
    tx1_xid: Span,
    tx2_gtid: Span,
    tx2_rows: Span,
    tx3_gtid: Span,
    f1_size: u64,
    f2_size: u64,
}

/// Two files:
/// - F1: insert (1, alice), (2, bob); update alice -> alicia; rotate
/// - F2: delete bob; ALTER TABLE
async fn write_files(dir: &Path, truncate_f2: usize) -> Layout {
    let mut f1 = BinlogBuilder::new();
    let tx1_gtid = f1.gtid(SERVER_UUID, 1);
    f1.begin("shop");
    f1.table_map(USERS_TABLE_ID, "shop", "users", &users_columns());
    let tx1_rows = f1.write_rows(USERS_TABLE_ID, &[user(1, "alice"), user(2, "bob")]);
    let tx1_xid = f1.xid(10);

    let tx2_gtid = f1.gtid(SERVER_UUID, 2);
    f1.begin("shop");
    f1.table_map(USERS_TABLE_ID, "shop", "users", &users_columns());
    let tx2_rows = f1.update_rows(USERS_TABLE_ID, &[(user(1, "alice"), user(1, "alicia"))]);
    f1.xid(11);
    f1.rotate(F2);
    let (_, f1_size) = f1.write_to(dir, F1).await;

    let mut f2 = BinlogBuilder::new().at_time(1_700_000_100);
    let tx3_gtid = f2.gtid(SERVER_UUID, 3);
    f2.begin("shop");
    f2.table_map(USERS_TABLE_ID, "shop", "users", &users_columns());
    f2.delete_rows(USERS_TABLE_ID, &[user(2, "bob")]);
    f2.xid(12);
    f2.gtid(SERVER_UUID, 4);
    f2.query("shop", "ALTER TABLE users\nADD COLUMN age INT");
    f2.truncate_tail(truncate_f2);
    let (_, f2_size) = f2.write_to(dir, F2).await;

    Layout {
        tx1_gtid,
        tx1_rows,
        tx1_xid,
        tx2_gtid,
        tx2_rows,
        tx3_gtid,
        f1_size,
        f2_size,
    }
}

fn catalog(dir: &Path, layout: &Layout) -> StaticCatalog {
    StaticCatalog::new(dir)
        .with_table("shop", "users", ["id", "name"])
        .with_file(F1, layout.f1_size)
        .with_file(F2, layout.f2_size)
        .with_gtid(true)
}

async fn run(
    config: FlashbackConfig,
    catalog: StaticCatalog,
) -> rewind_binlog::Result<RunSummary> {
    init_test_logging();
    FlashbackPipeline::new(config, Arc::new(catalog), Arc::new(BinlogFileOpener))
        .run()
        .await
}

fn row_sql(lines: &[String]) -> Vec<&str> {
    lines
        .iter()
        .filter(|l| !l.starts_with("/*"))
        .map(|l| sql_of(l))
        .collect()
}

#[tokio::test]
async fn test_forward_replay_across_rotated_files() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("forward.sql");

    let summary = run(
        FlashbackConfig::new(F1)
            .with_database("shop")
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_scanned, 2);
    assert!(!summary.stopped_early);
    assert_eq!(summary.reversed_lines, None);

    let lines = script_lines(&out).await;
    assert_eq!(
        row_sql(&lines),
        vec![
            "INSERT INTO `shop`.`users`(`id`, `name`) VALUES (1, 'alice');",
            "INSERT INTO `shop`.`users`(`id`, `name`) VALUES (2, 'bob');",
            "UPDATE `shop`.`users` SET `id`=1, `name`='alicia' WHERE `id`=1 AND `name`='alice' LIMIT 1;",
            "DELETE FROM `shop`.`users` WHERE `id`=2 AND `name`='bob' LIMIT 1;",
        ]
    );
    assert_eq!(summary.statements_emitted, lines.len() as u64);

    // Markers frame each transaction
    assert!(lines[0].starts_with(&format!("/* GTID -> {} | binlog: {}", gtid_text(1), F1)));
    assert!(lines[1].starts_with("/* BEGIN -> "));
    assert!(lines[4].starts_with("/* COMMIT -> Transaction COMMIT | xid: 10 |"));

    // Rows carry the transaction start and their own end offset
    let first_row = format!(
        "/* ROW -> binlog: {} | pos: ({}, {}) |",
        F1, layout.tx1_gtid.start, layout.tx1_rows.end
    );
    assert!(lines[2].contains(&first_row), "{}", lines[2]);
    let delete = lines.iter().find(|l| l.starts_with("DELETE")).unwrap();
    assert!(delete.contains(&format!("binlog: {} | pos: ({},", F2, layout.tx3_gtid.start)));
}

#[tokio::test]
async fn test_rollback_script_is_inverted_newest_first() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("flashback.sql");

    let summary = run(
        FlashbackConfig::new(F1)
            .with_database("shop")
            .with_rollback(true)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    let lines = script_lines(&out).await;
    // No transaction markers in rollback scripts
    assert!(lines.iter().all(|l| !l.starts_with("/*")));
    assert_eq!(
        lines.iter().map(|l| sql_of(l)).collect::<Vec<_>>(),
        vec![
            "INSERT INTO `shop`.`users`(`id`, `name`) VALUES (2, 'bob');",
            "UPDATE `shop`.`users` SET `id`=1, `name`='alice' WHERE `id`=1 AND `name`='alicia' LIMIT 1;",
            "DELETE FROM `shop`.`users` WHERE `id`=2 AND `name`='bob' LIMIT 1;",
            "DELETE FROM `shop`.`users` WHERE `id`=1 AND `name`='alice' LIMIT 1;",
        ]
    );
    assert_eq!(summary.reversed_lines, Some(4));
    assert_eq!(summary.output.as_deref(), Some(out.as_path()));
    assert!(!dir.path().join("flashback.sql.temp").exists());
    assert!(!dir.path().join("flashback.sql.staged").exists());
}

#[tokio::test]
async fn test_stop_position_is_exclusive() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("window.sql");

    let summary = run(
        FlashbackConfig::new(F1)
            .with_stop(F1, layout.tx1_xid.end)
            .with_no_transaction_markers(true)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    assert!(summary.stopped_early);
    assert_eq!(summary.files_scanned, 1);
    let lines = script_lines(&out).await;
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.starts_with("INSERT")));
}

#[tokio::test]
async fn test_start_position_skips_earlier_transactions() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("tail.sql");

    run(
        FlashbackConfig::new(F1)
            .with_start_position(layout.tx2_gtid.start)
            .with_no_transaction_markers(true)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    let lines = script_lines(&out).await;
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("UPDATE"));
    assert!(lines[0].contains(&format!(
        "pos: ({}, {})",
        layout.tx2_gtid.start, layout.tx2_rows.end
    )));
    assert!(lines[1].starts_with("DELETE"));
}

#[tokio::test]
async fn test_schema_changes_when_requested() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("ddl.sql");

    run(
        FlashbackConfig::new(F1)
            .with_only_dml(false)
            .with_no_transaction_markers(true)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    let lines = script_lines(&out).await;
    let ddl = lines.last().unwrap();
    assert!(
        ddl.starts_with("ALTER TABLE users ADD COLUMN age INT /* DDL -> binlog: mysql-bin.000002"),
        "{}",
        ddl
    );
}

#[tokio::test]
async fn test_table_allow_list() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("orders.sql");

    let summary = run(
        FlashbackConfig::new(F1)
            .include_table("shop.order*")
            .with_no_transaction_markers(true)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    assert_eq!(summary.statements_emitted, 0);
    assert!(summary.events_dropped >= 6);
    assert!(script_lines(&out).await.is_empty());
}

#[tokio::test]
async fn test_truncated_tail_of_active_file() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 7).await;
    let out = dir.path().join("active.sql");

    let summary = run(
        FlashbackConfig::new(F1)
            .with_only_dml(false)
            .with_no_transaction_markers(true)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap();

    assert!(!summary.stopped_early);
    let lines = script_lines(&out).await;
    assert!(lines.last().unwrap().starts_with("DELETE"));
    assert!(lines.iter().all(|l| !l.contains("ALTER TABLE")));
}

#[tokio::test]
async fn test_starting_mid_transaction_is_unresolved() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("broken.sql");

    let err = run(
        FlashbackConfig::new(F1)
            .with_start_position(layout.tx1_rows.start)
            .with_output(OutputTarget::file(&out)),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, FlashbackError::UnresolvedTableReference { table_id } if table_id == USERS_TABLE_ID),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_missing_table_is_schema_lookup_error() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;
    let out = dir.path().join("nocolumns.sql");

    let catalog = StaticCatalog::new(dir.path())
        .with_file(F1, layout.f1_size)
        .with_file(F2, layout.f2_size);
    let err = run(
        FlashbackConfig::new(F1).with_output(OutputTarget::file(&out)),
        catalog,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FlashbackError::SchemaLookup { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_start_position_beyond_file_is_rejected() {
    let dir = tempdir().unwrap();
    let layout = write_files(dir.path(), 0).await;

    let err = run(
        FlashbackConfig::new(F1)
            .with_start_position(layout.f1_size + 100)
            .with_output(OutputTarget::file(dir.path().join("never.sql"))),
        catalog(dir.path(), &layout),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FlashbackError::MalformedBoundary(_)), "{:?}", err);
    assert!(!dir.path().join("never.sql").exists());
}
