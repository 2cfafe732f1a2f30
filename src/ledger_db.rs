use log::info;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::errors::{DbContext, IoContext, LedgerError, LedgerResult};

pub const ADMIN_RESET_CONFIRM_PHRASE: &str = "RESET BUDGET";
pub(crate) const STATEMENT_SOURCE_TYPES: &[&str] = &["statement_pdf", "statement_xlsx"];
const ADMIN_TRANSACTION_RESET_SCOPES: &[&str] = &["transactions", "import_jobs:statement_sources"];
pub(crate) const REQUIRED_TABLES: &[&str] = &[
    "transactions",
    "accounts",
    "automatic_transactions",
    "budget_goals",
    "import_jobs",
    "app_settings",
];
// Child tables first so DELETE order respects foreign keys.
const ADMIN_DATA_TABLES: &[&str] = &[
    "transactions",
    "automatic_transactions",
    "budget_goals",
    "import_jobs",
    "accounts",
    "app_settings",
];

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!("../db/migrations/0001_init.sql"),
    ),
    (
        "0002_automatic_transactions.sql",
        include_str!("../db/migrations/0002_automatic_transactions.sql"),
    ),
    (
        "0003_budget_goals.sql",
        include_str!("../db/migrations/0003_budget_goals.sql"),
    ),
    (
        "0004_app_settings.sql",
        include_str!("../db/migrations/0004_app_settings.sql"),
    ),
];

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub migration_files: Vec<String>,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub schema_migrations_table_exists: bool,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbTableCountRow {
    pub table: String,
    pub row_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbStatsResult {
    pub db_path: String,
    pub confirm_phrase: String,
    pub table_count: usize,
    pub total_rows: i64,
    pub rows: Vec<LedgerAdminDbTableCountRow>,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminResetResult {
    pub db_path: String,
    pub scopes: Vec<String>,
    pub total_rows_before: i64,
    pub total_rows_after: i64,
    pub deleted_rows: i64,
    pub before_rows: Vec<LedgerAdminDbTableCountRow>,
    pub after_rows: Vec<LedgerAdminDbTableCountRow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LedgerAdminResetRequest {
    pub confirm_text: Option<String>,
}

pub fn open_ledger_connection(db_path: &Path) -> LedgerResult<Connection> {
    let conn = Connection::open(db_path).db_context("open database")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .db_context("enable foreign_keys")?;
    Ok(conn)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> LedgerResult<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|v| v != 0)
    .db_context(&format!("check table {table}"))
}

fn list_non_system_tables(conn: &Connection) -> LedgerResult<HashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
        .db_context("read sqlite_master")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .db_context("query sqlite_master")?;
    let mut names = HashSet::new();
    for row in rows {
        names.insert(row.db_context("read table name")?);
    }
    Ok(names)
}

/// Fails with a hint to run the migrations when a required table is missing.
pub fn ensure_schema_ready(conn: &Connection) -> LedgerResult<()> {
    let names = list_non_system_tables(conn)?;
    for required in REQUIRED_TABLES {
        if !names.contains(*required) {
            return Err(LedgerError::validation(format!(
                "database is missing table {required}; run `budget-tracker db migrate` first"
            )));
        }
    }
    Ok(())
}

/// Opens a ledger that `db migrate` has prepared. Never creates the database file.
pub fn open_migrated_connection(db_path: &Path) -> LedgerResult<Connection> {
    if !db_path.exists() {
        return Err(LedgerError::validation(format!(
            "database does not exist: {}; run `budget-tracker db migrate` first",
            db_path.display()
        )));
    }
    let conn = open_ledger_connection(db_path)?;
    ensure_schema_ready(&conn)?;
    Ok(conn)
}

pub(crate) fn count_rows(conn: &Connection, table: &str) -> LedgerResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
        .db_context(&format!("count rows of {table}"))
}

fn build_table_counts(
    conn: &Connection,
    tables: &[String],
) -> LedgerResult<Vec<LedgerAdminDbTableCountRow>> {
    tables
        .iter()
        .map(|table| {
            Ok(LedgerAdminDbTableCountRow {
                table: table.clone(),
                row_count: count_rows(conn, table)?,
            })
        })
        .collect()
}

fn existing_data_tables(conn: &Connection) -> LedgerResult<Vec<String>> {
    let existing = list_non_system_tables(conn)?;
    Ok(ADMIN_DATA_TABLES
        .iter()
        .filter(|name| existing.contains(**name))
        .map(|name| (*name).to_string())
        .collect())
}

fn check_confirm_phrase(confirm_text: &str) -> LedgerResult<()> {
    if confirm_text.trim() != ADMIN_RESET_CONFIRM_PHRASE {
        return Err(LedgerError::validation(format!(
            "confirm_text mismatch, type exactly: {ADMIN_RESET_CONFIRM_PHRASE}"
        )));
    }
    Ok(())
}

fn require_existing_db(db_path: &Path) -> LedgerResult<()> {
    if !db_path.exists() {
        return Err(LedgerError::not_found(format!(
            "database does not exist: {}",
            db_path.display()
        )));
    }
    Ok(())
}

pub fn query_admin_db_stats_at_path(db_path: &Path) -> LedgerResult<LedgerAdminDbStatsResult> {
    require_existing_db(db_path)?;
    let conn = open_ledger_connection(db_path)?;
    let tables = existing_data_tables(&conn)?;
    let rows = build_table_counts(&conn, &tables)?;
    Ok(LedgerAdminDbStatsResult {
        db_path: db_path.to_string_lossy().to_string(),
        confirm_phrase: ADMIN_RESET_CONFIRM_PHRASE.to_string(),
        table_count: rows.len(),
        total_rows: rows.iter().map(|r| r.row_count).sum(),
        rows,
    })
}

pub fn reset_admin_db_data_at_path(
    db_path: &Path,
    req: LedgerAdminResetRequest,
) -> LedgerResult<LedgerAdminResetResult> {
    check_confirm_phrase(req.confirm_text.as_deref().unwrap_or_default())?;
    require_existing_db(db_path)?;

    let mut conn = open_ledger_connection(db_path)?;
    let tables = existing_data_tables(&conn)?;
    let before_rows = build_table_counts(&conn, &tables)?;
    {
        let tx = conn.transaction().db_context("begin reset")?;
        for table in &tables {
            tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])
                .db_context(&format!("clear table {table}"))?;
        }
        tx.commit().db_context("commit reset")?;
    }
    let after_rows = build_table_counts(&conn, &tables)?;
    info!("reset all ledger tables in {}", db_path.display());
    Ok(reset_result(db_path, &tables, before_rows, after_rows))
}

fn build_transaction_scope_counts(conn: &Connection) -> LedgerResult<Vec<LedgerAdminDbTableCountRow>> {
    let statement_jobs = conn
        .query_row(
            "SELECT COUNT(*) FROM import_jobs WHERE source_type IN (?1, ?2)",
            [STATEMENT_SOURCE_TYPES[0], STATEMENT_SOURCE_TYPES[1]],
            |row| row.get::<_, i64>(0),
        )
        .db_context("count statement import jobs")?;
    Ok(vec![
        LedgerAdminDbTableCountRow {
            table: "transactions".to_string(),
            row_count: count_rows(conn, "transactions")?,
        },
        LedgerAdminDbTableCountRow {
            table: "import_jobs(statement_sources)".to_string(),
            row_count: statement_jobs,
        },
    ])
}

/// Removes every transaction plus the statement import jobs that produced them.
pub fn reset_admin_transaction_data_at_path(
    db_path: &Path,
    req: LedgerAdminResetRequest,
) -> LedgerResult<LedgerAdminResetResult> {
    check_confirm_phrase(req.confirm_text.as_deref().unwrap_or_default())?;
    require_existing_db(db_path)?;

    let mut conn = open_ledger_connection(db_path)?;
    ensure_schema_ready(&conn)?;
    let before_rows = build_transaction_scope_counts(&conn)?;
    {
        let tx = conn.transaction().db_context("begin transaction reset")?;
        tx.execute("DELETE FROM transactions", [])
            .db_context("clear transactions")?;
        tx.execute(
            "DELETE FROM import_jobs WHERE source_type IN (?1, ?2)",
            [STATEMENT_SOURCE_TYPES[0], STATEMENT_SOURCE_TYPES[1]],
        )
        .db_context("clear statement import jobs")?;
        tx.commit().db_context("commit transaction reset")?;
    }
    let after_rows = build_transaction_scope_counts(&conn)?;
    let scopes = ADMIN_TRANSACTION_RESET_SCOPES
        .iter()
        .map(|v| (*v).to_string())
        .collect::<Vec<_>>();
    Ok(reset_result(db_path, &scopes, before_rows, after_rows))
}

fn reset_result(
    db_path: &Path,
    scopes: &[String],
    before_rows: Vec<LedgerAdminDbTableCountRow>,
    after_rows: Vec<LedgerAdminDbTableCountRow>,
) -> LedgerAdminResetResult {
    let total_before = before_rows.iter().map(|r| r.row_count).sum::<i64>();
    let total_after = after_rows.iter().map(|r| r.row_count).sum::<i64>();
    LedgerAdminResetResult {
        db_path: db_path.to_string_lossy().to_string(),
        scopes: scopes.to_vec(),
        total_rows_before: total_before,
        total_rows_after: total_after,
        deleted_rows: total_before - total_after,
        before_rows,
        after_rows,
    }
}

pub fn inspect_status_at_path(db_path: &Path) -> LedgerResult<LedgerDbStatus> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            migration_files: migration_files.clone(),
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            schema_migrations_table_exists: false,
            ready: false,
        });
    }

    let conn = Connection::open(db_path).db_context("open database")?;
    let schema_table_exists = table_exists(&conn, "schema_migrations")?;
    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn).db_context("read schema_migrations")?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .iter()
        .filter(|v| !applied_set.contains(*v))
        .cloned()
        .collect::<Vec<_>>();

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        migration_files,
        applied_versions,
        ready: pending_versions.is_empty(),
        pending_versions,
        schema_migrations_table_exists: schema_table_exists,
    })
}

pub fn apply_embedded_migrations(db_path: &Path) -> LedgerResult<LedgerDbMigrateResult> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).io_context("create database directory")?;
    }

    let mut conn = open_ledger_connection(db_path)?;
    ensure_schema_migrations_table(&conn).db_context("init schema_migrations")?;
    let already = load_applied_versions(&conn)
        .db_context("read applied migrations")?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();
    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn
            .transaction()
            .db_context(&format!("begin migration {version}"))?;
        tx.execute_batch(sql)
            .db_context(&format!("apply migration {version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .db_context(&format!("record migration {version}"))?;
        tx.commit()
            .db_context(&format!("commit migration {version}"))?;
        info!("applied migration {version}");
        applied_now.push((*version).to_string());
    }

    let applied_total = load_applied_versions(&conn)
        .db_context("read migration result")?
        .len();
    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total,
        pending_total: MIGRATIONS.len().saturating_sub(applied_total),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{migrated_db, seed, temp_db_path};
    use super::*;

    #[test]
    fn migrations_are_idempotent_and_status_reports_ready() {
        let db_path = temp_db_path("ledger_db");
        let before = inspect_status_at_path(&db_path).expect("status before");
        assert!(!before.exists);
        assert_eq!(before.pending_versions.len(), MIGRATIONS.len());

        let first = apply_embedded_migrations(&db_path).expect("first migrate");
        assert!(first.created);
        assert_eq!(first.applied_now.len(), MIGRATIONS.len());
        let second = apply_embedded_migrations(&db_path).expect("second migrate");
        assert!(second.applied_now.is_empty());
        assert_eq!(second.skipped.len(), MIGRATIONS.len());

        let after = inspect_status_at_path(&db_path).expect("status after");
        assert!(after.ready);
        let conn = open_ledger_connection(&db_path).expect("open");
        ensure_schema_ready(&conn).expect("schema ready");
    }

    #[test]
    fn ensure_schema_ready_points_to_migrate_on_empty_db() {
        let db_path = temp_db_path("ledger_db_empty");
        let conn = open_ledger_connection(&db_path).expect("open");
        let err = ensure_schema_ready(&conn).expect_err("should be missing tables");
        assert!(err.to_string().contains("db migrate"));
    }

    #[test]
    fn migrated_connection_refuses_missing_and_unmigrated_files() {
        let missing = temp_db_path("ledger_db_missing");
        let err = open_migrated_connection(&missing).expect_err("missing db");
        assert_eq!(err.category(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("db migrate"));
        assert!(!missing.exists());

        let bare = temp_db_path("ledger_db_bare");
        seed(&bare, "CREATE TABLE notes(id INTEGER);");
        let err = open_migrated_connection(&bare).expect_err("unmigrated db");
        assert_eq!(err.category(), "VALIDATION_ERROR");
    }

    #[test]
    fn reset_requires_confirm_phrase_and_clears_tables() {
        let db_path = migrated_db("ledger_db_reset");
        seed(
            &db_path,
            r#"
            INSERT INTO accounts(account_id, account_name, bank_name, balance_cents)
            VALUES ('acct_1', 'Vadesiz', 'VakıfBank', 100000);
            INSERT INTO import_jobs(id, source_type, source_file, status, started_at)
            VALUES ('job_pdf', 'statement_pdf', '/tmp/a.pdf', 'success', '2026-01-01T00:00:00Z'),
                   ('job_other', 'backup_restore', '/tmp/b.json', 'success', '2026-01-01T00:00:00Z');
            INSERT INTO transactions(id, txn_date, month_key, description, amount_cents, bank_name, import_job_id)
            VALUES ('tx_1', '2026-01-05', '2026-01', 'MIGROS', -2500, 'VakıfBank', 'job_pdf');
            "#,
        );

        let err = reset_admin_transaction_data_at_path(
            &db_path,
            LedgerAdminResetRequest {
                confirm_text: Some("reset".to_string()),
            },
        )
        .expect_err("wrong phrase");
        assert_eq!(err.category(), "VALIDATION_ERROR");

        let tx_reset = reset_admin_transaction_data_at_path(
            &db_path,
            LedgerAdminResetRequest {
                confirm_text: Some(ADMIN_RESET_CONFIRM_PHRASE.to_string()),
            },
        )
        .expect("transaction reset");
        assert_eq!(tx_reset.deleted_rows, 2);
        let stats = query_admin_db_stats_at_path(&db_path).expect("stats");
        let count_of = |t: &str| {
            stats
                .rows
                .iter()
                .find(|r| r.table == t)
                .map(|r| r.row_count)
                .unwrap_or(-1)
        };
        assert_eq!(count_of("transactions"), 0);
        assert_eq!(count_of("import_jobs"), 1);
        assert_eq!(count_of("accounts"), 1);

        let all = reset_admin_db_data_at_path(
            &db_path,
            LedgerAdminResetRequest {
                confirm_text: Some(format!(" {ADMIN_RESET_CONFIRM_PHRASE} ")),
            },
        )
        .expect("full reset");
        assert_eq!(all.total_rows_after, 0);
    }
}
