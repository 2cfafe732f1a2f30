use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::analytics::{query_analytics_at_db_path, AnalyticsQueryRequest};
use crate::categories::TransactionCategory;
use crate::errors::{DbContext, LedgerResult};
use crate::ledger_db::{
    count_rows, inspect_status_at_path, open_ledger_connection, query_admin_db_stats_at_path, table_exists,
    REQUIRED_TABLES,
};

const STALE_IMPORT_JOB_MINUTES: i64 = 60;

fn count_rows_if_exists(conn: &Connection, table: &str) -> LedgerResult<Option<i64>> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }
    count_rows(conn, table).map(Some)
}

fn push_table_probe(
    checks: &mut Map<String, Value>,
    failures: &mut Vec<String>,
    conn: &Connection,
    check_name: &str,
    table: &str,
) {
    match count_rows_if_exists(conn, table) {
        Ok(Some(row_count)) => {
            checks.insert(check_name.to_string(), json!({ "ok": true, "rows": row_count }));
        }
        Ok(None) => failures.push(format!("{check_name} failed: missing table {table}")),
        Err(e) => failures.push(format!("{check_name} failed: {e}")),
    }
}

fn automatic_on_inactive_accounts(conn: &Connection) -> LedgerResult<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT at.id
            FROM automatic_transactions at
            LEFT JOIN accounts a ON a.account_id = at.account_id
            WHERE at.is_active = 1 AND (a.account_id IS NULL OR a.is_active = 0)
            ORDER BY at.id
            "#,
        )
        .db_context("query orphaned automatic transactions")?;
    let iter = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .db_context("query orphaned automatic transactions")?;
    let mut out = Vec::new();
    for id in iter {
        out.push(id.db_context("read automatic transaction id")?);
    }
    Ok(out)
}

fn unknown_category_codes(conn: &Connection) -> LedgerResult<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare("SELECT category, COUNT(*) FROM transactions GROUP BY category ORDER BY category")
        .db_context("query category codes")?;
    let iter = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .db_context("query category codes")?;
    let mut out = Vec::new();
    for row in iter {
        let (code, count) = row.db_context("read category code")?;
        let known = TransactionCategory::ALL.iter().any(|c| c.code() == code);
        if !known {
            out.push((code, count));
        }
    }
    Ok(out)
}

fn stale_running_jobs(conn: &Connection, now: DateTime<Utc>) -> LedgerResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT id, started_at FROM import_jobs WHERE status = 'running'")
        .db_context("query running import jobs")?;
    let iter = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .db_context("query running import jobs")?;
    let cutoff = now - Duration::minutes(STALE_IMPORT_JOB_MINUTES);
    let mut out = Vec::new();
    for row in iter {
        let (id, started_at) = row.db_context("read import job")?;
        let stale = DateTime::parse_from_rfc3339(&started_at)
            .map(|t| t.with_timezone(&Utc) < cutoff)
            .unwrap_or(true);
        if stale {
            out.push(id);
        }
    }
    Ok(out)
}

fn health_report(failures: Vec<String>, warnings: Vec<String>, checks: Map<String, Value>, now: DateTime<Utc>) -> Value {
    let status = if !failures.is_empty() {
        "fail"
    } else if !warnings.is_empty() {
        "warn"
    } else {
        "ok"
    };
    json!({
        "ok": failures.is_empty(),
        "status": status,
        "checked_at": now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "failures": failures,
        "warnings": warnings,
        "checks": Value::Object(checks),
    })
}

pub fn runtime_db_health_check_at_db_path(db_path: &Path, now: DateTime<Utc>) -> Value {
    let mut failures: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut checks = Map::<String, Value>::new();
    checks.insert("db_path".to_string(), json!(db_path.to_string_lossy().to_string()));

    match inspect_status_at_path(db_path) {
        Ok(status) => {
            if !status.pending_versions.is_empty() {
                failures.push(format!(
                    "migrations pending: {} (run `db migrate`)",
                    status.pending_versions.join(", ")
                ));
            }
            checks.insert(
                "migrations".to_string(),
                json!({
                    "ready": status.ready,
                    "applied": status.applied_versions,
                    "pending": status.pending_versions,
                }),
            );
            if !status.exists {
                return health_report(failures, warnings, checks, now);
            }
        }
        Err(e) => {
            failures.push(format!("db_status failed: {e}"));
            return health_report(failures, warnings, checks, now);
        }
    }

    let total_rows = match query_admin_db_stats_at_path(db_path) {
        Ok(stats) => {
            checks.insert(
                "db_stats".to_string(),
                json!({ "table_count": stats.table_count, "total_rows": stats.total_rows }),
            );
            stats.total_rows
        }
        Err(e) => {
            failures.push(format!("db_stats failed: {e}"));
            return health_report(failures, warnings, checks, now);
        }
    };

    let conn = match open_ledger_connection(db_path) {
        Ok(c) => c,
        Err(e) => {
            failures.push(format!("open_db failed: {e}"));
            return health_report(failures, warnings, checks, now);
        }
    };

    for table in REQUIRED_TABLES {
        push_table_probe(&mut checks, &mut failures, &conn, &format!("query_{table}"), table);
    }

    match automatic_on_inactive_accounts(&conn) {
        Ok(ids) => {
            if !ids.is_empty() {
                warnings.push(format!(
                    "{} active automatic transactions point at missing or inactive accounts",
                    ids.len()
                ));
            }
            checks.insert("automatic_account_links".to_string(), json!({ "ok": ids.is_empty(), "ids": ids }));
        }
        Err(e) => failures.push(format!("automatic_account_links failed: {e}")),
    }

    match unknown_category_codes(&conn) {
        Ok(unknown) => {
            if !unknown.is_empty() {
                warnings.push(format!(
                    "transactions with unknown category codes: {}",
                    unknown.iter().map(|(c, n)| format!("{c} ({n})")).collect::<Vec<_>>().join(", ")
                ));
            }
            checks.insert(
                "category_codes".to_string(),
                json!({
                    "ok": unknown.is_empty(),
                    "unknown": unknown.iter().map(|(c, n)| json!({ "category": c, "count": n })).collect::<Vec<_>>(),
                }),
            );
        }
        Err(e) => failures.push(format!("category_codes failed: {e}")),
    }

    match stale_running_jobs(&conn, now) {
        Ok(ids) => {
            if !ids.is_empty() {
                warnings.push(format!("{} import jobs stuck in running state", ids.len()));
            }
            checks.insert("import_jobs".to_string(), json!({ "ok": ids.is_empty(), "stale_running": ids }));
        }
        Err(e) => failures.push(format!("import_jobs failed: {e}")),
    }

    match query_analytics_at_db_path(db_path, AnalyticsQueryRequest::default()) {
        Ok(payload) => {
            checks.insert(
                "analytics".to_string(),
                json!({
                    "ok": true,
                    "transaction_count": payload["transaction_count"],
                    "balance": payload["balance"],
                }),
            );
        }
        Err(e) => failures.push(format!("analytics failed: {e}")),
    }

    if total_rows == 0 {
        warnings.push("ledger holds no data yet (total_rows = 0)".to_string());
    }

    health_report(failures, warnings, checks, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{migrated_db, seed, temp_db_path};

    #[test]
    fn empty_ledger_warns_and_missing_db_fails() {
        let db_path = migrated_db("health_empty");
        let report = runtime_db_health_check_at_db_path(&db_path, Utc::now());
        assert_eq!(report["status"].as_str(), Some("warn"));
        assert_eq!(report["ok"].as_bool(), Some(true));

        let missing = runtime_db_health_check_at_db_path(&temp_db_path("health_missing"), Utc::now());
        assert_eq!(missing["status"].as_str(), Some("fail"));
    }

    #[test]
    fn data_problems_surface_as_warnings() {
        let db_path = migrated_db("health_problems");
        seed(
            &db_path,
            r#"
            INSERT INTO accounts(account_id, account_name, bank_name, is_active) VALUES ('acct_old', 'Eski', 'Bankkart', 0);
            INSERT INTO automatic_transactions(amount_cents, description, payment_date, account_id, repeat_period)
              VALUES (-1000, 'Spotify', '2026-01-01 09:00:00', 'acct_old', 'MONTHLY');
            INSERT INTO transactions(id, txn_date, month_key, description, amount_cents, category)
              VALUES ('t1', '2026-01-01', '2026-01', 'Eski kayıt', -500, 'Yemek');
            INSERT INTO import_jobs(id, source_type, status, started_at)
              VALUES ('job1', 'statement_pdf', 'running', '2026-01-01T00:00:00Z');
            "#,
        );
        let now = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let report = runtime_db_health_check_at_db_path(&db_path, now);
        assert_eq!(report["status"].as_str(), Some("warn"));
        assert_eq!(report["checks"]["automatic_account_links"]["ids"][0].as_i64(), Some(1));
        assert_eq!(report["checks"]["category_codes"]["unknown"][0]["category"].as_str(), Some("Yemek"));
        assert_eq!(report["checks"]["import_jobs"]["stale_running"][0].as_str(), Some("job1"));
        assert_eq!(report["warnings"].as_array().map(|w| w.len()), Some(3));
    }

    #[test]
    fn every_required_table_is_probed() {
        let db_path = migrated_db("health_all_tables");
        let report = runtime_db_health_check_at_db_path(&db_path, Utc::now());
        for table in REQUIRED_TABLES {
            assert_eq!(report["checks"][format!("query_{table}")]["ok"].as_bool(), Some(true), "{table}");
        }

        seed(&db_path, "DROP TABLE app_settings;");
        let report = runtime_db_health_check_at_db_path(&db_path, Utc::now());
        assert_eq!(report["status"].as_str(), Some("fail"));
        let failures = report["failures"].as_array().cloned().unwrap_or_default();
        assert!(failures
            .iter()
            .any(|f| f.as_str().is_some_and(|f| f.contains("missing table app_settings"))));
    }
}
