//! Row pipeline shared by the PDF and spreadsheet importers: preview summary, stable ids,
//! import job bookkeeping and the per-row upsert loop.

use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use uuid::Uuid;

use crate::errors::{DbContext, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::cents_to_text;
use crate::rules::{categorize, load_category_rules, CategoryRule};
use crate::transactions::{upsert_transaction_record, TransactionRecord};

const MAX_ERROR_SAMPLES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRow {
    pub date: String,
    pub time: String,
    pub receipt_no: String,
    pub description: String,
    pub amount_cents: i64,
    pub balance_cents: Option<i64>,
}

/// Rows parsed out of one statement file, plus the lines that could not be parsed.
#[derive(Debug, Clone)]
pub struct StatementBatch {
    pub source_type: &'static str,
    pub source_file: String,
    pub bank_name: String,
    pub rows: Vec<StatementRow>,
    pub errors: Vec<String>,
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn identity_base(batch: &StatementBatch, row: &StatementRow) -> String {
    [
        batch.bank_name.as_str(),
        row.receipt_no.as_str(),
        row.date.as_str(),
        row.time.as_str(),
        &row.amount_cents.to_string(),
        row.description.as_str(),
    ]
    .join("|")
}

fn statement_transaction_id(source_type: &str, identity: &str, occurrence: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{source_type}|{identity}|{occurrence}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ids for every row; identical rows in one file get increasing occurrence numbers.
fn assign_transaction_ids(batch: &StatementBatch) -> Vec<String> {
    let mut occurrence_counters: HashMap<String, usize> = HashMap::new();
    batch
        .rows
        .iter()
        .map(|row| {
            let identity = identity_base(batch, row);
            let occurrence = occurrence_counters.entry(identity.clone()).or_insert(0);
            *occurrence += 1;
            statement_transaction_id(batch.source_type, &identity, *occurrence)
        })
        .collect()
}

pub fn build_preview(batch: &StatementBatch, rules: &[CategoryRule]) -> Value {
    let mut income_cents = 0_i64;
    let mut expense_cents = 0_i64;
    let mut category_counts: BTreeMap<&'static str, i64> = BTreeMap::new();
    let mut rows = Vec::with_capacity(batch.rows.len());
    for row in &batch.rows {
        if row.amount_cents > 0 {
            income_cents += row.amount_cents;
        } else {
            expense_cents -= row.amount_cents;
        }
        let categorized = categorize(&row.description, rules);
        *category_counts.entry(categorized.category.code()).or_insert(0) += 1;
        rows.push(json!({
            "date": row.date,
            "time": row.time,
            "receipt_no": row.receipt_no,
            "description": row.description,
            "amount_cents": row.amount_cents,
            "amount": cents_to_text(row.amount_cents),
            "balance_cents": row.balance_cents,
            "category": categorized.category.code(),
            "category_name": categorized.category.display_name(),
            "category_source": categorized.source,
            "rule_pattern": categorized.rule_pattern,
        }));
    }
    let date_from = batch.rows.iter().map(|r| r.date.as_str()).min();
    let date_to = batch.rows.iter().map(|r| r.date.as_str()).max();

    json!({
        "kind": "transactions",
        "source_type": batch.source_type,
        "source_file": batch.source_file,
        "bank_name": batch.bank_name,
        "summary": {
            "row_count": batch.rows.len(),
            "parse_error_count": batch.errors.len(),
            "income_cents": income_cents,
            "income": cents_to_text(income_cents),
            "expense_cents": expense_cents,
            "expense": cents_to_text(expense_cents),
            "date_from": date_from,
            "date_to": date_to,
            "category_counts": category_counts,
        },
        "rows": rows,
        "errors": batch.errors.iter().take(MAX_ERROR_SAMPLES).collect::<Vec<_>>(),
    })
}

pub(crate) fn begin_import_job(
    conn: &Connection,
    source_type: &str,
    source_file: &str,
    metadata: &Value,
) -> LedgerResult<String> {
    let job_id = Uuid::new_v4().to_string();
    let metadata_json = serde_json::to_string(metadata)?;
    conn.execute(
        r#"
        INSERT INTO import_jobs(id, source_type, source_file, status, started_at, total_count, imported_count, error_count, metadata_json)
        VALUES (?1, ?2, ?3, 'running', ?4, 0, 0, 0, ?5)
        "#,
        params![job_id, source_type, source_file, now_rfc3339(), metadata_json],
    )
    .db_context("create import job")?;
    Ok(job_id)
}

pub(crate) fn finish_import_job(
    conn: &Connection,
    job_id: &str,
    total_count: i64,
    imported_count: i64,
    error_samples: &[String],
    error_count: i64,
) -> LedgerResult<()> {
    conn.execute(
        r#"
        UPDATE import_jobs
        SET status='success', finished_at=?1, total_count=?2, imported_count=?3, error_count=?4, error_message=?5
        WHERE id=?6
        "#,
        params![
            now_rfc3339(),
            total_count,
            imported_count,
            error_count,
            if error_samples.is_empty() { None::<String> } else { Some(error_samples.join("\n")) },
            job_id,
        ],
    )
    .db_context("finish import job")?;
    Ok(())
}

pub fn import_statement_batch(
    db_path: &Path,
    rules_dir: &Path,
    batch: &StatementBatch,
) -> LedgerResult<Value> {
    let rules = load_category_rules(rules_dir)?;
    let preview = build_preview(batch, &rules);

    let conn = open_migrated_connection(db_path)?;

    let job_id = begin_import_job(
        &conn,
        batch.source_type,
        &batch.source_file,
        &json!({
            "source_path": batch.source_file,
            "source_type": batch.source_type,
            "bank_name": batch.bank_name,
            "parse_error_count": batch.errors.len(),
        }),
    )?;

    let total_count = i64::try_from(batch.rows.len() + batch.errors.len()).unwrap_or(i64::MAX);
    let mut imported_count = 0_i64;
    let mut error_count = i64::try_from(batch.errors.len()).unwrap_or(i64::MAX);
    let mut error_samples = batch
        .errors
        .iter()
        .take(MAX_ERROR_SAMPLES)
        .cloned()
        .collect::<Vec<_>>();

    let ids = assign_transaction_ids(batch);
    for (row, tx_id) in batch.rows.iter().zip(ids) {
        let record = TransactionRecord {
            id: tx_id,
            receipt_no: row.receipt_no.clone(),
            date: row.date.clone(),
            time: row.time.clone(),
            description: row.description.clone(),
            amount_cents: row.amount_cents,
            balance_cents: row.balance_cents,
            bank_name: batch.bank_name.clone(),
            category: categorize(&row.description, &rules).category,
            source_type: batch.source_type.to_string(),
            import_job_id: Some(job_id.clone()),
            automatic_id: None,
        };
        let step: LedgerResult<()> = (|| {
            let tx = conn.unchecked_transaction().db_context("begin import row")?;
            upsert_transaction_record(&tx, &record)?;
            tx.commit().db_context("commit import row")?;
            Ok(())
        })();
        match step {
            Ok(()) => imported_count += 1,
            Err(err) => {
                warn!("import row {} failed: {err}", record.id);
                error_count += 1;
                if error_samples.len() < MAX_ERROR_SAMPLES {
                    error_samples.push(err.to_string());
                }
            }
        }
    }

    finish_import_job(&conn, &job_id, total_count, imported_count, &error_samples, error_count)?;
    info!(
        "imported {imported_count}/{total_count} rows from {} ({})",
        batch.source_file, batch.bank_name
    );

    Ok(json!({
        "db_path": db_path.to_string_lossy().to_string(),
        "source_path": batch.source_file,
        "source_type": batch.source_type,
        "bank_name": batch.bank_name,
        "imported_count": imported_count,
        "import_error_count": error_count,
        "import_job_id": job_id,
        "preview": preview,
        "error_samples": error_samples,
    }))
}
