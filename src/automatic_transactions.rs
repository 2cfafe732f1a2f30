//! Scheduled income and expenses. Due entries are materialized into `transactions` and
//! booked against their account balance; recurring entries then move to the next date.

use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::accounts::{apply_balance_delta, load_account, require_account};
use crate::errors::{DbContext, LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{cents_to_text, parse_flexible_amount_to_cents, parse_tr_date};
use crate::rules::{categorize, load_category_rules};
use crate::transactions::{upsert_transaction_record, TransactionRecord, SOURCE_AUTOMATIC};

pub(crate) const PAYMENT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    OneTime,
}

impl RepeatPeriod {
    pub fn code(self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
            Self::OneTime => "ONE_TIME",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Daily => "Günlük",
            Self::Weekly => "Haftalık",
            Self::Monthly => "Aylık",
            Self::Yearly => "Yıllık",
            Self::OneTime => "Tek Seferlik",
        }
    }

    /// Unknown values fall back to monthly.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "DAILY" => Self::Daily,
            "WEEKLY" => Self::Weekly,
            "YEARLY" => Self::Yearly,
            "ONE_TIME" | "ONETIME" | "ONCE" => Self::OneTime,
            _ => Self::Monthly,
        }
    }

    /// Next occurrence after `at`. Month and year steps clamp to the last day of the month.
    pub fn advance(self, at: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Self::Daily => at.checked_add_signed(Duration::days(1)),
            Self::Weekly => at.checked_add_signed(Duration::days(7)),
            Self::Monthly => at.checked_add_months(Months::new(1)),
            Self::Yearly => at.checked_add_months(Months::new(12)),
            Self::OneTime => None,
        }
    }
}

impl fmt::Display for RepeatPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomaticTransaction {
    pub id: i64,
    pub amount_cents: i64,
    pub description: String,
    pub payment_date: NaiveDateTime,
    pub account_id: String,
    pub repeat_period: RepeatPeriod,
    pub is_active: bool,
    pub last_processed_at: Option<String>,
}

const AUTOMATIC_COLUMNS: &str =
    "id, amount_cents, description, payment_date, account_id, repeat_period, is_active, last_processed_at";

impl AutomaticTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payment_text = row.get::<_, String>(3)?;
        let payment_date = NaiveDateTime::parse_from_str(&payment_text, PAYMENT_DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get(0)?,
            amount_cents: row.get(1)?,
            description: row.get(2)?,
            payment_date,
            account_id: row.get(4)?,
            repeat_period: RepeatPeriod::parse_lenient(&row.get::<_, String>(5)?),
            is_active: row.get::<_, i64>(6)? != 0,
            last_processed_at: row.get(7)?,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "amount_cents": self.amount_cents,
            "amount": cents_to_text(self.amount_cents),
            "description": self.description,
            "payment_date": self.payment_date.format(PAYMENT_DATE_FORMAT).to_string(),
            "account_id": self.account_id,
            "repeat_period": self.repeat_period.code(),
            "repeat_period_name": self.repeat_period.display_name(),
            "is_active": self.is_active,
            "last_processed_at": self.last_processed_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AutomaticTransactionsQueryRequest {
    pub active_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AutomaticTransactionUpsertRequest {
    pub id: Option<i64>,
    pub amount: Option<String>,
    pub description: Option<String>,
    pub payment_date: Option<String>,
    pub account_id: Option<String>,
    pub repeat_period: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AutomaticTransactionActiveRequest {
    pub id: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AutomaticTransactionDeleteRequest {
    pub id: Option<i64>,
}

/// Accepts ISO or Turkish dates, with an optional `HH:MM[:SS]` part. A bare date means midnight.
pub fn parse_payment_date(raw: &str) -> LedgerResult<NaiveDateTime> {
    let text = raw.trim().replace('T', " ");
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d.%m.%Y %H:%M:%S", "%d.%m.%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_tr_date(&text))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| LedgerError::validation(format!("unsupported payment date: {raw}")))
}

fn required_id(raw: Option<i64>) -> LedgerResult<i64> {
    raw.filter(|id| *id > 0)
        .ok_or_else(|| LedgerError::validation("id is required"))
}

fn load_automatic_transaction(conn: &Connection, id: i64) -> LedgerResult<Option<AutomaticTransaction>> {
    conn.query_row(
        &format!("SELECT {AUTOMATIC_COLUMNS} FROM automatic_transactions WHERE id = ?1"),
        [id],
        AutomaticTransaction::from_row,
    )
    .optional()
    .db_context("load automatic transaction")
}

fn load_automatic_transactions(conn: &Connection, active_only: bool) -> LedgerResult<Vec<AutomaticTransaction>> {
    let sql = if active_only {
        format!("SELECT {AUTOMATIC_COLUMNS} FROM automatic_transactions WHERE is_active = 1 ORDER BY payment_date ASC, id ASC")
    } else {
        format!("SELECT {AUTOMATIC_COLUMNS} FROM automatic_transactions ORDER BY payment_date ASC, id ASC")
    };
    let mut stmt = conn.prepare(&sql).db_context("query automatic transactions")?;
    let iter = stmt
        .query_map([], AutomaticTransaction::from_row)
        .db_context("query automatic transactions")?;
    let mut out = Vec::new();
    for row in iter {
        out.push(row.db_context("read automatic transaction")?);
    }
    Ok(out)
}

pub fn query_automatic_transactions_at_db_path(
    db_path: &Path,
    req: AutomaticTransactionsQueryRequest,
) -> LedgerResult<Value> {
    let active_only = req.active_only.unwrap_or(false);
    let conn = open_migrated_connection(db_path)?;
    let rows = load_automatic_transactions(&conn, active_only)?;
    let monthly_total_cents = rows
        .iter()
        .filter(|r| r.is_active && r.repeat_period == RepeatPeriod::Monthly)
        .map(|r| r.amount_cents)
        .sum::<i64>();
    Ok(json!({
        "summary": {
            "count": rows.len(),
            "active_only": active_only,
            "active_count": rows.iter().filter(|r| r.is_active).count(),
            "monthly_total_cents": monthly_total_cents,
            "monthly_total": cents_to_text(monthly_total_cents),
        },
        "rows": rows.iter().map(AutomaticTransaction::to_json).collect::<Vec<_>>(),
    }))
}

pub fn upsert_automatic_transaction_at_db_path(
    db_path: &Path,
    req: AutomaticTransactionUpsertRequest,
) -> LedgerResult<Value> {
    let description = req.description.unwrap_or_default().trim().to_string();
    if description.is_empty() {
        return Err(LedgerError::validation("description is required"));
    }
    let amount_cents = parse_flexible_amount_to_cents(req.amount.as_deref().unwrap_or_default())?;
    if amount_cents == 0 {
        return Err(LedgerError::validation("amount must not be zero"));
    }
    let payment_date = parse_payment_date(req.payment_date.as_deref().unwrap_or_default())?;
    let account_id = req.account_id.unwrap_or_default().trim().to_string();
    if account_id.is_empty() {
        return Err(LedgerError::validation("account_id is required"));
    }
    let repeat_period = RepeatPeriod::parse_lenient(req.repeat_period.as_deref().unwrap_or_default());
    let is_active = req.is_active.unwrap_or(true);

    let conn = open_migrated_connection(db_path)?;
    require_account(&conn, &account_id)?;
    let payment_text = payment_date.format(PAYMENT_DATE_FORMAT).to_string();

    let id = match req.id {
        Some(id) => {
            let changed = conn
                .execute(
                    r#"
                    UPDATE automatic_transactions
                    SET amount_cents=?1, description=?2, payment_date=?3, account_id=?4,
                        repeat_period=?5, is_active=?6, updated_at=datetime('now')
                    WHERE id=?7
                    "#,
                    params![
                        amount_cents,
                        description,
                        payment_text,
                        account_id,
                        repeat_period.code(),
                        i64::from(is_active),
                        id
                    ],
                )
                .db_context("update automatic transaction")?;
            if changed == 0 {
                return Err(LedgerError::not_found(format!("automatic transaction not found: {id}")));
            }
            id
        }
        None => {
            conn.execute(
                r#"
                INSERT INTO automatic_transactions(amount_cents, description, payment_date, account_id, repeat_period, is_active)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    amount_cents,
                    description,
                    payment_text,
                    account_id,
                    repeat_period.code(),
                    i64::from(is_active)
                ],
            )
            .db_context("insert automatic transaction")?;
            conn.last_insert_rowid()
        }
    };
    let row = load_automatic_transaction(&conn, id)?
        .ok_or_else(|| LedgerError::not_found(format!("automatic transaction not found: {id}")))?;
    Ok(row.to_json())
}

pub fn set_automatic_transaction_active_at_db_path(
    db_path: &Path,
    req: AutomaticTransactionActiveRequest,
) -> LedgerResult<Value> {
    let id = required_id(req.id)?;
    let conn = open_migrated_connection(db_path)?;
    let current = load_automatic_transaction(&conn, id)?
        .ok_or_else(|| LedgerError::not_found(format!("automatic transaction not found: {id}")))?;
    let is_active = req.is_active.unwrap_or(!current.is_active);
    conn.execute(
        "UPDATE automatic_transactions SET is_active = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![i64::from(is_active), id],
    )
    .db_context("toggle automatic transaction")?;
    Ok(json!({ "id": id, "is_active": is_active }))
}

pub fn delete_automatic_transaction_at_db_path(
    db_path: &Path,
    req: AutomaticTransactionDeleteRequest,
) -> LedgerResult<Value> {
    let id = required_id(req.id)?;
    let conn = open_migrated_connection(db_path)?;
    let deleted = conn
        .execute("DELETE FROM automatic_transactions WHERE id = ?1", [id])
        .db_context("delete automatic transaction")?;
    if deleted == 0 {
        return Err(LedgerError::not_found(format!("automatic transaction not found: {id}")));
    }
    Ok(json!({ "deleted": true, "id": id }))
}

/// Books every due occurrence up to `now`. Each occurrence commits on its own.
pub fn process_due_automatic_transactions_at_db_path(
    db_path: &Path,
    rules_dir: &Path,
    now: NaiveDateTime,
    max_catch_up: usize,
) -> LedgerResult<Value> {
    let rules = load_category_rules(rules_dir)?;
    let mut conn = open_migrated_connection(db_path)?;
    let now_text = now.format(PAYMENT_DATE_FORMAT).to_string();
    let max_catch_up = max_catch_up.max(1);

    let mut created_ids = Vec::<String>::new();
    let mut processed_entries = 0_i64;
    let mut skipped = Vec::<Value>::new();

    for entry in load_automatic_transactions(&conn, true)? {
        if entry.payment_date > now {
            continue;
        }
        let account = match load_account(&conn, &entry.account_id)? {
            Some(account) if account.is_active => account,
            Some(_) => {
                warn!("automatic transaction {} skipped: account {} is inactive", entry.id, entry.account_id);
                skipped.push(json!({ "id": entry.id, "reason": "account_inactive" }));
                continue;
            }
            None => {
                warn!("automatic transaction {} skipped: account {} is missing", entry.id, entry.account_id);
                skipped.push(json!({ "id": entry.id, "reason": "account_missing" }));
                continue;
            }
        };
        let category = categorize(&entry.description, &rules).category;

        let mut scheduled = entry.payment_date;
        let mut occurrences = 0_usize;
        loop {
            let next = entry.repeat_period.advance(scheduled);
            let record = TransactionRecord {
                id: Uuid::new_v4().to_string(),
                receipt_no: String::new(),
                date: scheduled.format("%Y-%m-%d").to_string(),
                time: scheduled.format("%H:%M").to_string(),
                description: entry.description.clone(),
                amount_cents: entry.amount_cents,
                balance_cents: None,
                bank_name: account.bank_name.clone(),
                category,
                source_type: SOURCE_AUTOMATIC.to_string(),
                import_job_id: None,
                automatic_id: Some(entry.id),
            };

            let tx = conn.transaction().db_context("begin automatic occurrence")?;
            upsert_transaction_record(&tx, &record)?;
            let balance_cents = apply_balance_delta(&tx, &entry.account_id, entry.amount_cents)?;
            let advanced = match next {
                Some(next_date) => tx.execute(
                    r#"
                    UPDATE automatic_transactions
                    SET payment_date = ?1, last_processed_at = ?2, updated_at = datetime('now')
                    WHERE id = ?3
                    "#,
                    params![next_date.format(PAYMENT_DATE_FORMAT).to_string(), now_text, entry.id],
                ),
                None => tx.execute(
                    r#"
                    UPDATE automatic_transactions
                    SET is_active = 0, last_processed_at = ?1, updated_at = datetime('now')
                    WHERE id = ?2
                    "#,
                    params![now_text, entry.id],
                ),
            };
            advanced.db_context("advance automatic transaction")?;
            tx.commit().db_context("commit automatic occurrence")?;

            debug!(
                "automatic transaction {} booked for {} (balance {})",
                entry.id,
                record.date,
                cents_to_text(balance_cents)
            );
            created_ids.push(record.id);
            occurrences += 1;

            match next {
                Some(next_date) if next_date <= now && occurrences < max_catch_up => scheduled = next_date,
                Some(next_date) if next_date <= now => {
                    warn!(
                        "automatic transaction {} still due after {max_catch_up} occurrences; rest deferred",
                        entry.id
                    );
                    break;
                }
                _ => break,
            }
        }
        processed_entries += 1;
    }

    info!(
        "automatic transactions: {} entries processed, {} occurrences booked, {} skipped",
        processed_entries,
        created_ids.len(),
        skipped.len()
    );
    Ok(json!({
        "now": now_text,
        "processed_count": processed_entries,
        "created_count": created_ids.len(),
        "skipped_count": skipped.len(),
        "created_ids": created_ids,
        "skipped": skipped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::open_ledger_connection;
    use crate::ledger_db::test_support::{migrated_db, seed};

    fn at(text: &str) -> NaiveDateTime {
        parse_payment_date(text).expect("valid test date")
    }

    fn seeded_db(name: &str) -> std::path::PathBuf {
        let db_path = migrated_db(name);
        seed(
            &db_path,
            r#"
            INSERT INTO accounts(account_id, account_name, bank_name, balance_cents, is_active) VALUES
              ('acct_main', 'Vadesiz', 'VakıfBank', 1000000, 1),
              ('acct_old', 'Kapalı', 'Bankkart', 0, 0);
            "#,
        );
        db_path
    }

    fn add(db_path: &Path, amount: &str, desc: &str, date: &str, account: &str, period: &str) -> i64 {
        let row = upsert_automatic_transaction_at_db_path(
            db_path,
            AutomaticTransactionUpsertRequest {
                id: None,
                amount: Some(amount.to_string()),
                description: Some(desc.to_string()),
                payment_date: Some(date.to_string()),
                account_id: Some(account.to_string()),
                repeat_period: Some(period.to_string()),
                is_active: None,
            },
        )
        .expect("add automatic transaction");
        row["id"].as_i64().unwrap_or_default()
    }

    #[test]
    fn periods_advance_and_unknown_values_default_to_monthly() {
        assert_eq!(RepeatPeriod::parse_lenient("weekly"), RepeatPeriod::Weekly);
        assert_eq!(RepeatPeriod::parse_lenient("one-time"), RepeatPeriod::OneTime);
        assert_eq!(RepeatPeriod::parse_lenient("fortnightly"), RepeatPeriod::Monthly);
        assert_eq!(
            RepeatPeriod::Monthly.advance(at("2026-01-31 09:00")),
            Some(at("2026-02-28 09:00"))
        );
        assert_eq!(
            RepeatPeriod::Yearly.advance(at("2028-02-29 00:00")),
            Some(at("2029-02-28 00:00"))
        );
        assert_eq!(RepeatPeriod::Weekly.advance(at("05.01.2026 10:00")), Some(at("2026-01-12 10:00")));
        assert_eq!(RepeatPeriod::OneTime.advance(at("2026-01-05")), None);
    }

    #[test]
    fn upsert_requires_an_existing_account() {
        let db_path = seeded_db("automatic_upsert");
        let err = upsert_automatic_transaction_at_db_path(
            &db_path,
            AutomaticTransactionUpsertRequest {
                amount: Some("-100".to_string()),
                description: Some("Kira".to_string()),
                payment_date: Some("2026-01-01".to_string()),
                account_id: Some("acct_nope".to_string()),
                ..Default::default()
            },
        )
        .expect_err("missing account");
        assert_eq!(err.category(), "NOT_FOUND_ERROR");
    }

    #[test]
    fn due_entries_catch_up_and_one_time_entries_deactivate() {
        let db_path = seeded_db("automatic_process");
        let rules_dir = db_path.with_extension("rules");
        let rent = add(&db_path, "-5.000,00", "Kira", "2026-01-01 09:00", "acct_main", "MONTHLY");
        let card = add(&db_path, "-1500.25", "VakıfBank Kredi Kartı Ödemesi", "2026-02-20 09:00", "acct_main", "ONE_TIME");
        let future = add(&db_path, "100", "Faiz geliri", "2026-12-01 09:00", "acct_main", "YEARLY");
        add(&db_path, "-10", "Eski abonelik", "2026-01-01", "acct_old", "DAILY");

        let result = process_due_automatic_transactions_at_db_path(&db_path, &rules_dir, at("2026-03-15 12:00"), 60)
            .expect("process");
        // Rent for Jan, Feb, Mar plus the card payment.
        assert_eq!(result["created_count"].as_u64(), Some(4));
        assert_eq!(result["skipped_count"].as_u64(), Some(1));

        let conn = open_ledger_connection(&db_path).expect("open");
        let balance: i64 = conn
            .query_row("SELECT balance_cents FROM accounts WHERE account_id = 'acct_main'", [], |r| r.get(0))
            .expect("balance");
        assert_eq!(balance, 1_000_000 - 3 * 500_000 - 150_025);

        let rent_row = load_automatic_transaction(&conn, rent).expect("load").expect("rent");
        assert_eq!(rent_row.payment_date, at("2026-04-01 09:00"));
        let card_row = load_automatic_transaction(&conn, card).expect("load").expect("card");
        assert!(!card_row.is_active);
        let future_row = load_automatic_transaction(&conn, future).expect("load").expect("future");
        assert!(future_row.last_processed_at.is_none());

        let mut stmt = conn
            .prepare("SELECT txn_date FROM transactions WHERE automatic_id = ?1 ORDER BY txn_date")
            .expect("prepare");
        let dates = stmt
            .query_map([rent], |r| r.get::<_, String>(0))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect");
        assert_eq!(dates, vec!["2026-01-01", "2026-02-01", "2026-03-01"]);

        let again = process_due_automatic_transactions_at_db_path(&db_path, &rules_dir, at("2026-03-15 12:00"), 60)
            .expect("second run");
        assert_eq!(again["created_count"].as_u64(), Some(0));
        let _ = std::fs::remove_dir_all(&rules_dir);
    }

    #[test]
    fn catch_up_is_capped() {
        let db_path = seeded_db("automatic_cap");
        let rules_dir = db_path.with_extension("rules");
        let daily = add(&db_path, "-1", "Otopark", "2026-01-01 08:00", "acct_main", "DAILY");
        let result = process_due_automatic_transactions_at_db_path(&db_path, &rules_dir, at("2026-01-31 12:00"), 5)
            .expect("process");
        assert_eq!(result["created_count"].as_u64(), Some(5));
        let conn = open_ledger_connection(&db_path).expect("open");
        let row = load_automatic_transaction(&conn, daily).expect("load").expect("daily");
        assert_eq!(row.payment_date, at("2026-01-06 08:00"));
        let _ = std::fs::remove_dir_all(&rules_dir);
    }
}
