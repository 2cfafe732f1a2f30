use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::errors::{DbContext, LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{cents_to_text, format_tr_money, parse_flexible_amount_to_cents};

pub const DEFAULT_CURRENCY: &str = "TRY";
const ACCOUNT_TYPE_CHOICES: &[&str] = &["checking", "savings", "credit_card", "cash", "other"];

#[derive(Debug, Default, Deserialize)]
pub struct AccountsQueryRequest {
    pub include_inactive: Option<bool>,
    pub keyword: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountUpsertRequest {
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub bank_name: Option<String>,
    pub balance: Option<String>,
    pub account_type: Option<String>,
    pub currency: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountIdRequest {
    pub account_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountBalanceAdjustRequest {
    pub account_id: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub account_id: String,
    pub account_name: String,
    pub bank_name: String,
    pub balance_cents: i64,
    pub account_type: String,
    pub currency: String,
    pub is_active: bool,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account_id: row.get(0)?,
            account_name: row.get(1)?,
            bank_name: row.get(2)?,
            balance_cents: row.get(3)?,
            account_type: row.get(4)?,
            currency: row.get(5)?,
            is_active: row.get::<_, i64>(6)? != 0,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "account_id": self.account_id,
            "account_name": self.account_name,
            "bank_name": self.bank_name,
            "balance_cents": self.balance_cents,
            "balance": cents_to_text(self.balance_cents),
            "balance_tr": format_tr_money(self.balance_cents),
            "account_type": self.account_type,
            "currency": self.currency,
            "is_active": self.is_active,
        })
    }
}

const ACCOUNT_COLUMNS: &str =
    "account_id, account_name, bank_name, balance_cents, account_type, currency, is_active";

fn account_id_from_name(bank_name: &str, account_name: &str) -> String {
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("budget-tracker:account:{bank_name}:{account_name}").as_bytes(),
    );
    format!("acct_{}", &id.simple().to_string()[..12])
}

fn normalize_account_type(raw: Option<String>) -> LedgerResult<String> {
    let kind = raw.unwrap_or_default().trim().to_lowercase();
    if kind.is_empty() {
        return Ok("checking".to_string());
    }
    if ACCOUNT_TYPE_CHOICES.contains(&kind.as_str()) {
        Ok(kind)
    } else {
        Err(LedgerError::validation(format!(
            "account_type must be one of: {}",
            ACCOUNT_TYPE_CHOICES.join(", ")
        )))
    }
}

fn required_account_id(raw: Option<String>) -> LedgerResult<String> {
    let account_id = raw.unwrap_or_default().trim().to_string();
    if account_id.is_empty() {
        return Err(LedgerError::validation("account_id is required"));
    }
    Ok(account_id)
}

pub(crate) fn load_account(conn: &Connection, account_id: &str) -> LedgerResult<Option<AccountRow>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?1"),
        [account_id],
        AccountRow::from_row,
    )
    .optional()
    .db_context("load account")
}

pub(crate) fn require_account(conn: &Connection, account_id: &str) -> LedgerResult<AccountRow> {
    load_account(conn, account_id)?
        .ok_or_else(|| LedgerError::not_found(format!("account not found: {account_id}")))
}

/// Adds `delta_cents` to the stored balance. Callers own the surrounding transaction.
pub(crate) fn apply_balance_delta(conn: &Connection, account_id: &str, delta_cents: i64) -> LedgerResult<i64> {
    let changed = conn
        .execute(
            "UPDATE accounts SET balance_cents = balance_cents + ?1, updated_at = datetime('now') WHERE account_id = ?2",
            params![delta_cents, account_id],
        )
        .db_context("update account balance")?;
    if changed == 0 {
        return Err(LedgerError::not_found(format!("account not found: {account_id}")));
    }
    conn.query_row(
        "SELECT balance_cents FROM accounts WHERE account_id = ?1",
        [account_id],
        |row| row.get::<_, i64>(0),
    )
    .db_context("read account balance")
}

pub fn query_accounts_at_db_path(db_path: &Path, req: AccountsQueryRequest) -> LedgerResult<Value> {
    let include_inactive = req.include_inactive.unwrap_or(false);
    let keyword = req.keyword.unwrap_or_default().trim().to_lowercase();
    let conn = open_migrated_connection(db_path)?;
    let sql = if include_inactive {
        format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY account_name ASC")
    } else {
        format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_active = 1 ORDER BY account_name ASC")
    };
    let mut stmt = conn.prepare(&sql).db_context("query accounts")?;
    let iter = stmt
        .query_map([], AccountRow::from_row)
        .db_context("query accounts")?;

    let mut rows = Vec::new();
    let mut balance_cents = 0_i64;
    for row in iter {
        let account = row.db_context("read account")?;
        if !keyword.is_empty() {
            let hay = format!("{} {} {}", account.account_id, account.account_name, account.bank_name)
                .to_lowercase();
            if !hay.contains(&keyword) {
                continue;
            }
        }
        if account.is_active {
            balance_cents += account.balance_cents;
        }
        rows.push(account.to_json());
    }
    Ok(json!({
        "summary": {
            "count": rows.len(),
            "include_inactive": include_inactive,
            "active_balance_cents": balance_cents,
            "active_balance": cents_to_text(balance_cents),
        },
        "rows": rows,
    }))
}

pub fn get_account_at_db_path(db_path: &Path, req: AccountIdRequest) -> LedgerResult<Value> {
    let account_id = required_account_id(req.account_id)?;
    let conn = open_migrated_connection(db_path)?;
    Ok(require_account(&conn, &account_id)?.to_json())
}

pub fn upsert_account_at_db_path(db_path: &Path, req: AccountUpsertRequest) -> LedgerResult<Value> {
    let account_name = req.account_name.unwrap_or_default().trim().to_string();
    if account_name.is_empty() {
        return Err(LedgerError::validation("account_name is required"));
    }
    let bank_name = req.bank_name.unwrap_or_default().trim().to_string();
    let account_type = normalize_account_type(req.account_type)?;
    let currency = req
        .currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let balance_cents = req
        .balance
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_flexible_amount_to_cents)
        .transpose()?;
    let account_id_raw = req.account_id.unwrap_or_default().trim().to_string();
    let account_id = if account_id_raw.is_empty() {
        account_id_from_name(&bank_name, &account_name)
    } else {
        account_id_raw
    };

    let conn = open_migrated_connection(db_path)?;
    let existed = load_account(&conn, &account_id)?.is_some();
    conn.execute(
        r#"
        INSERT INTO accounts(account_id, account_name, bank_name, balance_cents, account_type, currency, is_active)
        VALUES (?1, ?2, ?3, COALESCE(?4, 0), ?5, ?6, ?7)
        ON CONFLICT(account_id) DO UPDATE SET
            account_name=excluded.account_name,
            bank_name=excluded.bank_name,
            balance_cents=COALESCE(?4, accounts.balance_cents),
            account_type=excluded.account_type,
            currency=excluded.currency,
            is_active=excluded.is_active,
            updated_at=datetime('now')
        "#,
        params![
            account_id,
            account_name,
            bank_name,
            balance_cents,
            account_type,
            currency,
            i64::from(req.is_active.unwrap_or(true)),
        ],
    )
    .db_context("write account")?;
    info!("{} account {account_id}", if existed { "updated" } else { "created" });

    Ok(json!({
        "created": !existed,
        "updated": existed,
        "row": require_account(&conn, &account_id)?.to_json(),
    }))
}

pub fn delete_account_at_db_path(db_path: &Path, req: AccountIdRequest) -> LedgerResult<Value> {
    let account_id = required_account_id(req.account_id)?;
    let conn = open_migrated_connection(db_path)?;
    let account = require_account(&conn, &account_id)?;
    let automatic_count = conn
        .query_row(
            "SELECT COUNT(*) FROM automatic_transactions WHERE account_id = ?1",
            [account_id.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .db_context("count automatic transactions")?;
    conn.execute("DELETE FROM accounts WHERE account_id = ?1", [account_id.as_str()])
        .db_context("delete account")?;
    Ok(json!({
        "deleted": true,
        "account_id": account_id,
        "account_name": account.account_name,
        "removed_automatic_count": automatic_count,
    }))
}

pub fn adjust_account_balance_at_db_path(db_path: &Path, req: AccountBalanceAdjustRequest) -> LedgerResult<Value> {
    let account_id = required_account_id(req.account_id)?;
    let delta_cents = parse_flexible_amount_to_cents(req.amount.as_deref().unwrap_or_default())?;
    let conn = open_migrated_connection(db_path)?;
    let balance_cents = apply_balance_delta(&conn, &account_id, delta_cents)?;
    Ok(json!({
        "account_id": account_id,
        "delta_cents": delta_cents,
        "balance_cents": balance_cents,
        "balance": cents_to_text(balance_cents),
    }))
}

pub fn query_total_balance_at_db_path(db_path: &Path) -> LedgerResult<Value> {
    let conn = open_migrated_connection(db_path)?;
    let (total_cents, account_count) = conn
        .query_row(
            "SELECT COALESCE(SUM(balance_cents), 0), COUNT(*) FROM accounts WHERE is_active = 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .db_context("sum account balances")?;
    Ok(json!({
        "account_count": account_count,
        "total_balance_cents": total_cents,
        "total_balance": cents_to_text(total_cents),
        "total_balance_tr": format_tr_money(total_cents),
    }))
}

pub fn delete_all_accounts_at_db_path(db_path: &Path) -> LedgerResult<Value> {
    let conn = open_migrated_connection(db_path)?;
    let deleted = conn
        .execute("DELETE FROM accounts", [])
        .db_context("delete all accounts")?;
    info!("deleted {deleted} accounts");
    Ok(json!({ "deleted_count": deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{migrated_db, seed, temp_db_path};

    fn add(db_path: &Path, name: &str, bank: &str, balance: &str) -> Value {
        upsert_account_at_db_path(
            db_path,
            AccountUpsertRequest {
                account_name: Some(name.to_string()),
                bank_name: Some(bank.to_string()),
                balance: Some(balance.to_string()),
                ..Default::default()
            },
        )
        .expect("upsert account")
    }

    #[test]
    fn derived_ids_are_stable_and_upsert_keeps_balance() {
        let db_path = migrated_db("accounts_upsert");
        let first = add(&db_path, "Maaş Hesabı", "VakıfBank", "1.500,00");
        let account_id = first["row"]["account_id"].as_str().unwrap_or_default().to_string();
        assert!(account_id.starts_with("acct_"));
        assert_eq!(first["created"].as_bool(), Some(true));
        assert_eq!(first["row"]["currency"].as_str(), Some(DEFAULT_CURRENCY));

        let renamed = upsert_account_at_db_path(
            &db_path,
            AccountUpsertRequest {
                account_id: Some(account_id.clone()),
                account_name: Some("Ana Hesap".to_string()),
                bank_name: Some("VakıfBank".to_string()),
                ..Default::default()
            },
        )
        .expect("rename");
        assert_eq!(renamed["updated"].as_bool(), Some(true));
        assert_eq!(renamed["row"]["balance_cents"].as_i64(), Some(150_000));

        let again = add(&db_path, "Maaş Hesabı", "VakıfBank", "10");
        assert_eq!(again["row"]["account_id"].as_str(), Some(account_id.as_str()));
    }

    #[test]
    fn balances_adjust_and_total_ignores_inactive_accounts() {
        let db_path = migrated_db("accounts_balance");
        seed(
            &db_path,
            r#"
            INSERT INTO accounts(account_id, account_name, bank_name, balance_cents, is_active) VALUES
              ('acct_a', 'Vadesiz', 'VakıfBank', 100000, 1),
              ('acct_b', 'Kart', 'Bankkart', 50000, 1),
              ('acct_c', 'Eski', 'Bankkart', 999999, 0);
            "#,
        );
        let adjusted = adjust_account_balance_at_db_path(
            &db_path,
            AccountBalanceAdjustRequest {
                account_id: Some("acct_b".to_string()),
                amount: Some("-125,50".to_string()),
            },
        )
        .expect("adjust");
        assert_eq!(adjusted["balance_cents"].as_i64(), Some(37_450));

        let total = query_total_balance_at_db_path(&db_path).expect("total");
        assert_eq!(total["total_balance_cents"].as_i64(), Some(137_450));
        assert_eq!(total["account_count"].as_i64(), Some(2));

        let active = query_accounts_at_db_path(&db_path, AccountsQueryRequest::default()).expect("active");
        assert_eq!(active["summary"]["count"].as_u64(), Some(2));
        let all = query_accounts_at_db_path(
            &db_path,
            AccountsQueryRequest {
                include_inactive: Some(true),
                keyword: None,
            },
        )
        .expect("all");
        assert_eq!(all["summary"]["count"].as_u64(), Some(3));

        let missing = adjust_account_balance_at_db_path(
            &db_path,
            AccountBalanceAdjustRequest {
                account_id: Some("acct_missing".to_string()),
                amount: Some("1".to_string()),
            },
        );
        assert_eq!(missing.expect_err("missing").category(), "NOT_FOUND_ERROR");

        let deleted = delete_all_accounts_at_db_path(&db_path).expect("clear");
        assert_eq!(deleted["deleted_count"].as_u64(), Some(3));
    }

    #[test]
    fn unmigrated_ledger_is_a_validation_error_and_stays_absent() {
        let db_path = temp_db_path("accounts_unmigrated");
        let err = query_accounts_at_db_path(&db_path, AccountsQueryRequest::default()).expect_err("no schema");
        assert_eq!(err.category(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("db migrate"));
        assert!(!db_path.exists());

        let err = query_total_balance_at_db_path(&db_path).expect_err("no schema");
        assert_eq!(err.category(), "VALIDATION_ERROR");
        assert!(!db_path.exists());
    }
}
