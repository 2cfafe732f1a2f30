use chrono::{Local, NaiveTime};
use log::{debug, info};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::categories::TransactionCategory;
use crate::errors::{DbContext, LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{
    cents_to_text, format_tr_date, month_key, normalize_date_flexible, parse_flexible_amount_to_cents,
};
use crate::rules::{categorize, load_category_rules};

pub const MANUAL_BANK_NAME: &str = "Manuel Giriş";
pub const SOURCE_MANUAL: &str = "manual";
pub const SOURCE_AUTOMATIC: &str = "automatic";
pub const SOURCE_BACKUP_RESTORE: &str = "backup_restore";

const TRANSACTION_COLUMNS: &str = "id, receipt_no, txn_date, txn_time, description, amount_cents, \
     balance_cents, bank_name, category, source_type, import_job_id, automatic_id";

/// One ledger row. `date` is ISO `YYYY-MM-DD`, amounts are signed cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub receipt_no: String,
    pub date: String,
    pub time: String,
    pub description: String,
    pub amount_cents: i64,
    pub balance_cents: Option<i64>,
    pub bank_name: String,
    pub category: TransactionCategory,
    pub source_type: String,
    pub import_job_id: Option<String>,
    pub automatic_id: Option<i64>,
}

impl TransactionRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let category_text = row.get::<_, String>(8)?;
        Ok(Self {
            id: row.get(0)?,
            receipt_no: row.get(1)?,
            date: row.get(2)?,
            time: row.get(3)?,
            description: row.get(4)?,
            amount_cents: row.get(5)?,
            balance_cents: row.get(6)?,
            bank_name: row.get(7)?,
            category: TransactionCategory::parse(&category_text).unwrap_or(TransactionCategory::Other),
            source_type: row.get(9)?,
            import_job_id: row.get(10)?,
            automatic_id: row.get(11)?,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "receipt_no": self.receipt_no,
            "date": self.date,
            "date_tr": format_tr_date(&self.date),
            "time": self.time,
            "description": self.description,
            "amount_cents": self.amount_cents,
            "amount": cents_to_text(self.amount_cents),
            "balance_cents": self.balance_cents,
            "balance": self.balance_cents.map(cents_to_text),
            "bank_name": self.bank_name,
            "category": self.category.code(),
            "category_name": self.category.display_name(),
            "category_color": self.category.color(),
            "source_type": self.source_type,
            "import_job_id": self.import_job_id,
            "automatic_id": self.automatic_id,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct TransactionFilter {
    pub keyword: Option<String>,
    pub category: Option<TransactionCategory>,
    pub bank_name: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub month: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsQueryRequest {
    pub keyword: Option<String>,
    pub category: Option<String>,
    pub bank_name: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub month: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManualTransactionRequest {
    pub description: Option<String>,
    pub amount: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionCategoryUpdateRequest {
    pub id: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionDeleteRequest {
    pub id: Option<String>,
}

fn parse_optional_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_optional_date(raw: Option<String>) -> LedgerResult<Option<String>> {
    parse_optional_text(raw)
        .map(|s| normalize_date_flexible(&s))
        .transpose()
}

fn parse_category_param(raw: Option<String>) -> LedgerResult<Option<TransactionCategory>> {
    match parse_optional_text(raw) {
        None => Ok(None),
        Some(text) => TransactionCategory::parse(&text)
            .map(Some)
            .ok_or_else(|| LedgerError::validation(format!("unknown category: {text}"))),
    }
}

impl TransactionFilter {
    pub fn from_request(req: TransactionsQueryRequest) -> LedgerResult<Self> {
        let filter = Self {
            keyword: parse_optional_text(req.keyword),
            category: parse_category_param(req.category)?,
            bank_name: parse_optional_text(req.bank_name),
            date_from: parse_optional_date(req.date_from)?,
            date_to: parse_optional_date(req.date_to)?,
            month: parse_optional_text(req.month)
                .map(|m| crate::money::validate_month_key(&m))
                .transpose()?,
            limit: req.limit.map(|v| v.clamp(1, 100_000) as usize),
        };
        if let (Some(from), Some(to)) = (&filter.date_from, &filter.date_to) {
            if from > to {
                return Err(LedgerError::validation("date_from is after date_to"));
            }
        }
        Ok(filter)
    }

    /// Description contains the keyword (case-insensitive) or the amount text contains it.
    fn keyword_matches(&self, rec: &TransactionRecord) -> bool {
        let Some(keyword) = &self.keyword else {
            return true;
        };
        let needle = keyword.to_lowercase();
        rec.description.to_lowercase().contains(&needle)
            || cents_to_text(rec.amount_cents).contains(&needle)
    }
}

/// Newest first: date DESC, time DESC.
pub fn load_transactions(
    conn: &Connection,
    filter: &TransactionFilter,
) -> LedgerResult<Vec<TransactionRecord>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(category) = filter.category {
        conditions.push("category = ?");
        params.push(SqlValue::Text(category.code().to_string()));
    }
    if let Some(bank) = &filter.bank_name {
        conditions.push("bank_name = ?");
        params.push(SqlValue::Text(bank.clone()));
    }
    if let Some(from) = &filter.date_from {
        conditions.push("txn_date >= ?");
        params.push(SqlValue::Text(from.clone()));
    }
    if let Some(to) = &filter.date_to {
        conditions.push("txn_date <= ?");
        params.push(SqlValue::Text(to.clone()));
    }
    if let Some(month) = &filter.month {
        conditions.push("month_key = ?");
        params.push(SqlValue::Text(month.clone()));
    }
    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions {where_sql} ORDER BY txn_date DESC, txn_time DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql).db_context("query transactions")?;
    let iter = stmt
        .query_map(params_from_iter(params.iter()), TransactionRecord::from_row)
        .db_context("query transactions")?;

    let mut out = Vec::new();
    for row in iter {
        let rec = row.db_context("read transaction")?;
        if !filter.keyword_matches(&rec) {
            continue;
        }
        out.push(rec);
        if filter.limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
    }
    Ok(out)
}

pub(crate) fn load_transaction(conn: &Connection, id: &str) -> LedgerResult<Option<TransactionRecord>> {
    let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1");
    match conn.query_row(&sql, [id], TransactionRecord::from_row) {
        Ok(rec) => Ok(Some(rec)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).db_context("load transaction"),
    }
}

/// Insert or fully replace by id; `created_at` survives a replace.
pub(crate) fn upsert_transaction_record(conn: &Connection, rec: &TransactionRecord) -> LedgerResult<()> {
    conn.execute(
        r#"
        INSERT INTO transactions(
            id, receipt_no, txn_date, txn_time, month_key, description, amount_cents,
            balance_cents, bank_name, category, source_type, import_job_id, automatic_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(id) DO UPDATE SET
            receipt_no=excluded.receipt_no,
            txn_date=excluded.txn_date,
            txn_time=excluded.txn_time,
            month_key=excluded.month_key,
            description=excluded.description,
            amount_cents=excluded.amount_cents,
            balance_cents=excluded.balance_cents,
            bank_name=excluded.bank_name,
            category=excluded.category,
            source_type=excluded.source_type,
            import_job_id=excluded.import_job_id,
            automatic_id=excluded.automatic_id,
            updated_at=datetime('now')
        "#,
        params![
            rec.id,
            rec.receipt_no,
            rec.date,
            rec.time,
            month_key(&rec.date),
            rec.description,
            rec.amount_cents,
            rec.balance_cents,
            rec.bank_name,
            rec.category.code(),
            rec.source_type,
            rec.import_job_id,
            rec.automatic_id,
        ],
    )
    .db_context("write transaction")?;
    Ok(())
}

pub fn query_transactions_at_db_path(db_path: &Path, req: TransactionsQueryRequest) -> LedgerResult<Value> {
    let filter = TransactionFilter::from_request(req)?;
    let conn = open_migrated_connection(db_path)?;
    let rows = load_transactions(&conn, &filter)?;
    let income_cents = rows
        .iter()
        .filter(|r| r.amount_cents > 0)
        .map(|r| r.amount_cents)
        .sum::<i64>();
    let expense_cents = -rows
        .iter()
        .filter(|r| r.amount_cents < 0)
        .map(|r| r.amount_cents)
        .sum::<i64>();
    Ok(json!({
        "summary": {
            "count": rows.len(),
            "income_cents": income_cents,
            "income": cents_to_text(income_cents),
            "expense_cents": expense_cents,
            "expense": cents_to_text(expense_cents),
            "keyword": filter.keyword,
            "category": filter.category.map(|c| c.code()),
            "bank_name": filter.bank_name,
            "date_from": filter.date_from,
            "date_to": filter.date_to,
            "month": filter.month,
        },
        "rows": rows.iter().map(TransactionRecord::to_json).collect::<Vec<_>>(),
    }))
}

fn resolve_manual_time(raw: Option<String>) -> LedgerResult<String> {
    match parse_optional_text(raw) {
        None => Ok(Local::now().format("%H:%M:%S").to_string()),
        Some(text) => NaiveTime::parse_from_str(&text, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M"))
            .map(|t| t.format("%H:%M:%S").to_string())
            .map_err(|_| LedgerError::validation(format!("time must be HH:MM or HH:MM:SS: {text}"))),
    }
}

pub fn add_manual_transaction_at_db_path(
    db_path: &Path,
    rules_dir: &Path,
    req: ManualTransactionRequest,
) -> LedgerResult<Value> {
    let description = req.description.unwrap_or_default().trim().to_string();
    if description.is_empty() {
        return Err(LedgerError::validation("description is required"));
    }
    let amount_cents = parse_flexible_amount_to_cents(req.amount.as_deref().unwrap_or_default())?;
    if amount_cents == 0 {
        return Err(LedgerError::validation("amount must not be zero"));
    }
    let date = parse_optional_date(req.date)?
        .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string());
    let time = resolve_manual_time(req.time)?;
    let category = match parse_category_param(req.category)? {
        Some(c) => c,
        None => categorize(&description, &load_category_rules(rules_dir)?).category,
    };

    let rec = TransactionRecord {
        id: Uuid::new_v4().to_string(),
        receipt_no: String::new(),
        date,
        time,
        description,
        amount_cents,
        balance_cents: None,
        bank_name: MANUAL_BANK_NAME.to_string(),
        category,
        source_type: SOURCE_MANUAL.to_string(),
        import_job_id: None,
        automatic_id: None,
    };
    let conn = open_migrated_connection(db_path)?;
    upsert_transaction_record(&conn, &rec)?;
    info!("saved manual transaction {} ({})", rec.id, cents_to_text(rec.amount_cents));
    Ok(rec.to_json())
}

pub fn update_transaction_category_at_db_path(
    db_path: &Path,
    req: TransactionCategoryUpdateRequest,
) -> LedgerResult<Value> {
    let id = parse_optional_text(req.id).ok_or_else(|| LedgerError::validation("id is required"))?;
    let category = parse_category_param(req.category)?
        .ok_or_else(|| LedgerError::validation("category is required"))?;
    let conn = open_migrated_connection(db_path)?;
    let changed = conn
        .execute(
            "UPDATE transactions SET category = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![category.code(), id],
        )
        .db_context("update transaction category")?;
    if changed == 0 {
        return Err(LedgerError::not_found(format!("transaction not found: {id}")));
    }
    let rec = load_transaction(&conn, &id)?
        .ok_or_else(|| LedgerError::not_found(format!("transaction not found: {id}")))?;
    Ok(rec.to_json())
}

/// Re-runs rules and keyword heuristics over imported rows. Manual rows keep their category.
pub fn recategorize_transactions_at_db_path(db_path: &Path, rules_dir: &Path) -> LedgerResult<Value> {
    let rules = load_category_rules(rules_dir)?;
    let mut conn = open_migrated_connection(db_path)?;
    let rows = load_transactions(&conn, &TransactionFilter::default())?;
    let tx = conn.transaction().db_context("begin recategorize")?;
    let mut scanned = 0_i64;
    let mut changed = 0_i64;
    for rec in rows.iter().filter(|r| r.source_type != SOURCE_MANUAL) {
        scanned += 1;
        let next = categorize(&rec.description, &rules).category;
        if next == rec.category {
            continue;
        }
        debug!("recategorize {}: {} -> {}", rec.id, rec.category.code(), next.code());
        tx.execute(
            "UPDATE transactions SET category = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![next.code(), rec.id],
        )
        .db_context("update transaction category")?;
        changed += 1;
    }
    tx.commit().db_context("commit recategorize")?;
    info!("recategorized {changed} of {scanned} transactions");
    Ok(json!({
        "scanned_count": scanned,
        "changed_count": changed,
        "rule_count": rules.len(),
    }))
}

pub fn delete_transaction_at_db_path(db_path: &Path, req: TransactionDeleteRequest) -> LedgerResult<Value> {
    let id = parse_optional_text(req.id).ok_or_else(|| LedgerError::validation("id is required"))?;
    let conn = open_migrated_connection(db_path)?;
    let rec = load_transaction(&conn, &id)?
        .ok_or_else(|| LedgerError::not_found(format!("transaction not found: {id}")))?;
    conn.execute("DELETE FROM transactions WHERE id = ?1", [id.as_str()])
        .db_context("delete transaction")?;
    Ok(json!({ "deleted": true, "row": rec.to_json() }))
}

pub fn delete_all_transactions_at_db_path(db_path: &Path) -> LedgerResult<Value> {
    let conn = open_migrated_connection(db_path)?;
    let deleted = conn
        .execute("DELETE FROM transactions", [])
        .db_context("delete all transactions")?;
    info!("deleted {deleted} transactions");
    Ok(json!({ "deleted_count": deleted }))
}

pub fn query_bank_names_at_db_path(db_path: &Path) -> LedgerResult<Value> {
    let conn = open_migrated_connection(db_path)?;
    let mut stmt = conn
        .prepare(
            r#"
            SELECT bank_name, COUNT(*) FROM transactions
            WHERE TRIM(bank_name) <> ''
            GROUP BY bank_name
            ORDER BY bank_name ASC
            "#,
        )
        .db_context("query bank names")?;
    let iter = stmt
        .query_map([], |row| {
            Ok(json!({
                "bank_name": row.get::<_, String>(0)?,
                "tx_count": row.get::<_, i64>(1)?,
            }))
        })
        .db_context("query bank names")?;
    let mut rows = Vec::new();
    for row in iter {
        rows.push(row.db_context("read bank name")?);
    }
    Ok(json!({ "rows": rows }))
}
