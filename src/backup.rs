//! JSON snapshots of the transaction table.
//!
//! The file is a flat array with camelCase keys, Turkish `dd.MM.yyyy` dates and decimal
//! amounts, so a snapshot can be read without this tool. Manual snapshots are named
//! `budget_backup_<stamp>.json`, scheduled ones `auto_backup_<stamp>.json`.

use chrono::{NaiveDateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::categories::TransactionCategory;
use crate::config::{load_config, save_config, BackupSection};
use crate::errors::{DbContext, IoContext, LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{cents_from_f64, cents_to_value, format_tr_date, normalize_date_flexible};
use crate::transactions::{load_transactions, upsert_transaction_record, TransactionFilter, TransactionRecord, SOURCE_BACKUP_RESTORE};

pub const MANUAL_BACKUP_PREFIX: &str = "budget_backup_";
pub const AUTO_BACKUP_PREFIX: &str = "auto_backup_";
const BACKUP_EXTENSION: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const LAST_AUTO_BACKUP_KEY: &str = "last_auto_backup_at";
const SETTINGS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub transaction_id: String,
    pub date: String,
    pub time: String,
    pub description: String,
    pub amount: f64,
    pub balance: Option<f64>,
    pub bank_name: String,
    pub category: String,
    #[serde(default)]
    pub receipt_no: String,
    #[serde(default)]
    pub source_type: Option<String>,
}

impl BackupEntry {
    fn from_record(rec: &TransactionRecord) -> Self {
        Self {
            transaction_id: rec.id.clone(),
            date: format_tr_date(&rec.date),
            time: rec.time.clone(),
            description: rec.description.clone(),
            amount: cents_to_value(rec.amount_cents),
            balance: rec.balance_cents.map(cents_to_value),
            bank_name: rec.bank_name.clone(),
            category: rec.category.code().to_uppercase(),
            receipt_no: rec.receipt_no.clone(),
            source_type: Some(rec.source_type.clone()),
        }
    }

    fn into_record(self) -> LedgerResult<TransactionRecord> {
        if self.transaction_id.trim().is_empty() {
            return Err(LedgerError::validation("backup entry without transactionId"));
        }
        Ok(TransactionRecord {
            date: normalize_date_flexible(&self.date)?,
            amount_cents: cents_from_f64(self.amount)?,
            balance_cents: self.balance.map(cents_from_f64).transpose()?,
            category: TransactionCategory::parse(&self.category).unwrap_or(TransactionCategory::Other),
            source_type: self
                .source_type
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| SOURCE_BACKUP_RESTORE.to_string()),
            id: self.transaction_id,
            receipt_no: self.receipt_no,
            time: self.time,
            description: self.description,
            bank_name: self.bank_name,
            import_job_id: None,
            automatic_id: None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BackupCreateRequest {
    pub output_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackupRestoreRequest {
    pub source_path: Option<String>,
}

pub fn backup_file_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{prefix}{}{BACKUP_EXTENSION}", at.format(STAMP_FORMAT))
}

fn write_snapshot(conn: &Connection, path: &Path) -> LedgerResult<usize> {
    let entries = load_transactions(conn, &TransactionFilter::default())?
        .iter()
        .map(BackupEntry::from_record)
        .collect::<Vec<_>>();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).io_context(&format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(&entries)?;
    fs::write(path, text).io_context(&format!("write {}", path.display()))?;
    Ok(entries.len())
}

pub fn create_backup_at_db_path(
    db_path: &Path,
    backup_dir: &Path,
    req: BackupCreateRequest,
    now: NaiveDateTime,
) -> LedgerResult<Value> {
    let path = match req.output_path.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        Some(p) => PathBuf::from(p),
        None => backup_dir.join(backup_file_name(MANUAL_BACKUP_PREFIX, now)),
    };
    let conn = open_migrated_connection(db_path)?;
    let count = write_snapshot(&conn, &path)?;
    info!("backup of {count} transactions written to {}", path.display());
    Ok(json!({
        "path": path.to_string_lossy().to_string(),
        "transaction_count": count,
    }))
}

/// Upserts every entry by id inside one SQL transaction. Rows not in the file are kept.
pub fn restore_backup_at_db_path(db_path: &Path, req: BackupRestoreRequest) -> LedgerResult<Value> {
    let source = req.source_path.unwrap_or_default().trim().to_string();
    if source.is_empty() {
        return Err(LedgerError::validation("source_path is required"));
    }
    let text = fs::read_to_string(&source).io_context(&format!("read {source}"))?;
    let entries: Vec<BackupEntry> = serde_json::from_str(&text)?;

    let mut conn = open_migrated_connection(db_path)?;
    let tx = conn.transaction().db_context("begin restore")?;
    let mut restored = 0_usize;
    for entry in entries {
        let record = entry.into_record()?;
        upsert_transaction_record(&tx, &record)?;
        restored += 1;
    }
    tx.commit().db_context("commit restore")?;
    info!("restored {restored} transactions from {source}");
    Ok(json!({
        "source_path": source,
        "restored_count": restored,
    }))
}

fn read_setting(conn: &Connection, key: &str) -> LedgerResult<Option<String>> {
    conn.query_row("SELECT value FROM app_settings WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .db_context("read app setting")
}

fn write_setting(conn: &Connection, key: &str, value: &str) -> LedgerResult<()> {
    conn.execute(
        r#"
        INSERT INTO app_settings(key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=datetime('now')
        "#,
        params![key, value],
    )
    .db_context("write app setting")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct BackupFile {
    path: PathBuf,
    kind: &'static str,
    stamp: String,
    size_bytes: u64,
}

fn scan_backups(backup_dir: &Path) -> Vec<BackupFile> {
    if !backup_dir.is_dir() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(backup_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable backup entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_suffix(BACKUP_EXTENSION) else {
            continue;
        };
        let (kind, stamp) = if let Some(stamp) = stem.strip_prefix(AUTO_BACKUP_PREFIX) {
            ("auto", stamp)
        } else if let Some(stamp) = stem.strip_prefix(MANUAL_BACKUP_PREFIX) {
            ("manual", stamp)
        } else {
            continue;
        };
        if NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_err() {
            continue;
        }
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        out.push(BackupFile {
            path: entry.into_path(),
            kind,
            stamp: stamp.to_string(),
            size_bytes,
        });
    }
    out.sort_by(|a, b| b.stamp.cmp(&a.stamp).then_with(|| a.kind.cmp(b.kind)));
    out
}

pub fn list_backups(backup_dir: &Path) -> LedgerResult<Value> {
    let files = scan_backups(backup_dir);
    Ok(json!({
        "backup_dir": backup_dir.to_string_lossy().to_string(),
        "count": files.len(),
        "rows": files.iter().map(|f| json!({
            "path": f.path.to_string_lossy().to_string(),
            "file_name": f.path.file_name().map(|n| n.to_string_lossy().to_string()),
            "kind": f.kind,
            "created_at": NaiveDateTime::parse_from_str(&f.stamp, STAMP_FORMAT)
                .map(|t| t.format(SETTINGS_TIME_FORMAT).to_string())
                .ok(),
            "size_bytes": f.size_bytes,
        })).collect::<Vec<_>>(),
    }))
}

/// Oldest automatic snapshots beyond `keep_count` are deleted. Manual ones are never touched.
fn prune_auto_backups(backup_dir: &Path, keep_count: usize) -> LedgerResult<Vec<String>> {
    let mut removed = Vec::new();
    let autos = scan_backups(backup_dir)
        .into_iter()
        .filter(|f| f.kind == "auto")
        .collect::<Vec<_>>();
    for stale in autos.iter().skip(keep_count.max(1)) {
        fs::remove_file(&stale.path).io_context(&format!("remove {}", stale.path.display()))?;
        debug!("pruned {}", stale.path.display());
        removed.push(stale.path.to_string_lossy().to_string());
    }
    Ok(removed)
}

pub fn run_auto_backup_at_db_path(
    db_path: &Path,
    backup_dir: &Path,
    settings: &BackupSection,
    now: NaiveDateTime,
    force: bool,
) -> LedgerResult<Value> {
    if !settings.auto_enabled && !force {
        return Ok(json!({ "ran": false, "reason": "disabled" }));
    }
    let conn = open_migrated_connection(db_path)?;
    let last = read_setting(&conn, LAST_AUTO_BACKUP_KEY)?
        .and_then(|s| NaiveDateTime::parse_from_str(&s, SETTINGS_TIME_FORMAT).ok());
    if let Some(last) = last {
        let due_at = chrono::Duration::try_days(settings.interval_days.max(1))
            .and_then(|interval| last.checked_add_signed(interval))
            .ok_or_else(|| {
                LedgerError::validation(format!(
                    "backup.interval_days out of range: {}",
                    settings.interval_days
                ))
            })?;
        if now < due_at && !force {
            return Ok(json!({
                "ran": false,
                "reason": "not_due",
                "last_backup_at": last.format(SETTINGS_TIME_FORMAT).to_string(),
                "next_due_at": due_at.format(SETTINGS_TIME_FORMAT).to_string(),
            }));
        }
    }

    let path = backup_dir.join(backup_file_name(AUTO_BACKUP_PREFIX, now));
    let count = write_snapshot(&conn, &path)?;
    write_setting(&conn, LAST_AUTO_BACKUP_KEY, &now.format(SETTINGS_TIME_FORMAT).to_string())?;
    let removed = prune_auto_backups(backup_dir, settings.keep_count)?;
    info!("automatic backup of {count} transactions written to {}", path.display());
    Ok(json!({
        "ran": true,
        "path": path.to_string_lossy().to_string(),
        "transaction_count": count,
        "removed": removed,
        "finished_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

pub fn set_auto_backup_enabled(home: &Path, enabled: bool) -> LedgerResult<Value> {
    let mut cfg = load_config(home)?;
    cfg.backup.auto_enabled = enabled;
    let path = save_config(home, &cfg)?;
    Ok(json!({
        "auto_enabled": enabled,
        "config_file": path.to_string_lossy().to_string(),
    }))
}
