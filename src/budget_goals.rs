use chrono::Local;
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, Row};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::categories::TransactionCategory;
use crate::errors::{DbContext, LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{cents_to_text, parse_flexible_amount_to_cents, validate_month_key};

#[derive(Debug, Default, Deserialize)]
pub struct BudgetGoalUpsertRequest {
    pub category: Option<String>,
    pub month_year: Option<String>,
    pub target_amount: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetGoalDeleteRequest {
    pub id: Option<i64>,
    pub category: Option<String>,
    pub month_year: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetGoalsQueryRequest {
    pub month_year: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetProgressQueryRequest {
    pub month_year: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct BudgetGoalRow {
    id: i64,
    category: TransactionCategory,
    month_year: String,
    target_amount_cents: i64,
    created_at: String,
}

impl BudgetGoalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let category_text = row.get::<_, String>(1)?;
        Ok(Self {
            id: row.get(0)?,
            category: TransactionCategory::parse(&category_text).unwrap_or(TransactionCategory::Other),
            month_year: row.get(2)?,
            target_amount_cents: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "category": self.category.code(),
            "category_name": self.category.display_name(),
            "category_color": self.category.color(),
            "month_year": self.month_year,
            "target_amount_cents": self.target_amount_cents,
            "target_amount": cents_to_text(self.target_amount_cents),
            "created_at": self.created_at,
        })
    }
}

fn current_month_key() -> String {
    Local::now().format("%Y-%m").to_string()
}

fn resolve_month(raw: Option<String>) -> LedgerResult<String> {
    match raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        Some(month) => validate_month_key(&month),
        None => Ok(current_month_key()),
    }
}

fn required_category(raw: Option<String>) -> LedgerResult<TransactionCategory> {
    let text = raw.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(LedgerError::validation("category is required"));
    }
    TransactionCategory::parse(&text)
        .ok_or_else(|| LedgerError::validation(format!("unknown category: {}", text.trim())))
}

fn load_goals(conn: &Connection, month: Option<&str>, category: Option<TransactionCategory>) -> LedgerResult<Vec<BudgetGoalRow>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(month) = month {
        conditions.push("month_year = ?");
        params.push(SqlValue::Text(month.to_string()));
    }
    if let Some(category) = category {
        conditions.push("category = ?");
        params.push(SqlValue::Text(category.code().to_string()));
    }
    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let sql = format!(
        "SELECT id, category, month_year, target_amount_cents, created_at FROM budget_goals {where_sql} ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql).db_context("query budget goals")?;
    let iter = stmt
        .query_map(params_from_iter(params.iter()), BudgetGoalRow::from_row)
        .db_context("query budget goals")?;
    let mut out = Vec::new();
    for row in iter {
        out.push(row.db_context("read budget goal")?);
    }
    Ok(out)
}

pub fn upsert_budget_goal_at_db_path(db_path: &Path, req: BudgetGoalUpsertRequest) -> LedgerResult<Value> {
    let category = required_category(req.category)?;
    let month_year = resolve_month(req.month_year)?;
    let target_amount_cents = parse_flexible_amount_to_cents(req.target_amount.as_deref().unwrap_or_default())?;
    if target_amount_cents <= 0 {
        return Err(LedgerError::validation("target_amount must be greater than zero"));
    }

    let conn = open_migrated_connection(db_path)?;
    conn.execute(
        r#"
        INSERT INTO budget_goals(category, month_year, target_amount_cents)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(category, month_year) DO UPDATE SET
            target_amount_cents=excluded.target_amount_cents,
            updated_at=datetime('now')
        "#,
        params![category.code(), month_year, target_amount_cents],
    )
    .db_context("write budget goal")?;

    let row = load_goals(&conn, Some(&month_year), Some(category))?
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::not_found("budget goal vanished after write"))?;
    Ok(row.to_json())
}

/// Deletes by id, or by (category, month) when no id is given.
pub fn delete_budget_goal_at_db_path(db_path: &Path, req: BudgetGoalDeleteRequest) -> LedgerResult<Value> {
    let conn = open_migrated_connection(db_path)?;
    let deleted = match req.id {
        Some(id) => conn
            .execute("DELETE FROM budget_goals WHERE id = ?1", [id])
            .db_context("delete budget goal")?,
        None => {
            let category = required_category(req.category)?;
            let month_year = resolve_month(req.month_year)?;
            conn.execute(
                "DELETE FROM budget_goals WHERE category = ?1 AND month_year = ?2",
                params![category.code(), month_year],
            )
            .db_context("delete budget goal")?
        }
    };
    if deleted == 0 {
        return Err(LedgerError::not_found("budget goal not found"));
    }
    Ok(json!({ "deleted": true, "deleted_count": deleted }))
}

pub fn query_budget_goals_at_db_path(db_path: &Path, req: BudgetGoalsQueryRequest) -> LedgerResult<Value> {
    let month = req
        .month_year
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| validate_month_key(&s))
        .transpose()?;
    let category = req
        .category
        .filter(|s| !s.trim().is_empty())
        .map(|s| required_category(Some(s)))
        .transpose()?;
    let conn = open_migrated_connection(db_path)?;
    let rows = load_goals(&conn, month.as_deref(), category)?;
    Ok(json!({
        "summary": {
            "count": rows.len(),
            "month_year": month,
            "category": category.map(|c| c.code()),
        },
        "rows": rows.iter().map(BudgetGoalRow::to_json).collect::<Vec<_>>(),
    }))
}

fn progress_status(spent_cents: i64, target_cents: i64) -> &'static str {
    match spent_cents.cmp(&target_cents) {
        std::cmp::Ordering::Greater => "over",
        std::cmp::Ordering::Equal => "reached",
        std::cmp::Ordering::Less => "under",
    }
}

pub fn query_budget_progress_at_db_path(db_path: &Path, req: BudgetProgressQueryRequest) -> LedgerResult<Value> {
    let month_year = resolve_month(req.month_year)?;
    let conn = open_migrated_connection(db_path)?;
    let goals = load_goals(&conn, Some(&month_year), None)?;

    let mut spent_stmt = conn
        .prepare(
            r#"
            SELECT COALESCE(SUM(-amount_cents), 0)
            FROM transactions
            WHERE month_key = ?1 AND category = ?2 AND amount_cents < 0
            "#,
        )
        .db_context("prepare budget spend query")?;

    let mut rows = Vec::with_capacity(goals.len());
    let mut total_target_cents = 0_i64;
    let mut total_spent_cents = 0_i64;
    let mut over_budget_count = 0_i64;
    for goal in &goals {
        let spent_cents = spent_stmt
            .query_row(params![month_year, goal.category.code()], |row| row.get::<_, i64>(0))
            .db_context("sum budget spend")?;
        let progress_pct = spent_cents.saturating_mul(100) / goal.target_amount_cents;
        let status = progress_status(spent_cents, goal.target_amount_cents);
        if status == "over" {
            over_budget_count += 1;
        }
        total_target_cents += goal.target_amount_cents;
        total_spent_cents += spent_cents;
        let remaining_cents = goal.target_amount_cents - spent_cents;
        rows.push(json!({
            "goal": goal.to_json(),
            "category": goal.category.code(),
            "category_name": goal.category.display_name(),
            "target_amount_cents": goal.target_amount_cents,
            "spent_cents": spent_cents,
            "spent": cents_to_text(spent_cents),
            "remaining_cents": remaining_cents,
            "remaining": cents_to_text(remaining_cents),
            "progress_pct": progress_pct,
            "status": status,
        }));
    }

    Ok(json!({
        "month_year": month_year,
        "summary": {
            "goal_count": goals.len(),
            "total_target_cents": total_target_cents,
            "total_target": cents_to_text(total_target_cents),
            "total_spent_cents": total_spent_cents,
            "total_spent": cents_to_text(total_spent_cents),
            "over_budget_count": over_budget_count,
        },
        "rows": rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{migrated_db, seed};

    fn goal(db_path: &Path, category: &str, month: &str, target: &str) -> Value {
        upsert_budget_goal_at_db_path(
            db_path,
            BudgetGoalUpsertRequest {
                category: Some(category.to_string()),
                month_year: Some(month.to_string()),
                target_amount: Some(target.to_string()),
            },
        )
        .expect("upsert goal")
    }

    #[test]
    fn goals_upsert_by_category_and_month() {
        let db_path = migrated_db("budget_goals_upsert");
        let first = goal(&db_path, "Yemek", "2026-01", "1000");
        let second = goal(&db_path, "food", "2026-01", "1.500,00");
        assert_eq!(first["id"], second["id"]);
        assert_eq!(second["target_amount_cents"].as_i64(), Some(150_000));

        let zero = upsert_budget_goal_at_db_path(
            &db_path,
            BudgetGoalUpsertRequest {
                category: Some("food".to_string()),
                month_year: Some("2026-01".to_string()),
                target_amount: Some("0".to_string()),
            },
        );
        assert!(zero.is_err());
        let bad_month = upsert_budget_goal_at_db_path(
            &db_path,
            BudgetGoalUpsertRequest {
                category: Some("food".to_string()),
                month_year: Some("2026-1".to_string()),
                target_amount: Some("10".to_string()),
            },
        );
        assert!(bad_month.is_err());

        let listed = query_budget_goals_at_db_path(&db_path, BudgetGoalsQueryRequest::default()).expect("list");
        assert_eq!(listed["summary"]["count"].as_u64(), Some(1));

        let deleted = delete_budget_goal_at_db_path(
            &db_path,
            BudgetGoalDeleteRequest {
                id: None,
                category: Some("food".to_string()),
                month_year: Some("2026-01".to_string()),
            },
        )
        .expect("delete");
        assert_eq!(deleted["deleted_count"].as_u64(), Some(1));
    }

    #[test]
    fn progress_sums_expenses_of_the_month_only() {
        let db_path = migrated_db("budget_goals_progress");
        seed(
            &db_path,
            r#"
            INSERT INTO transactions(id, txn_date, month_key, description, amount_cents, category) VALUES
              ('a', '2026-01-03', '2026-01', 'Restoran', -60000, 'food'),
              ('b', '2026-01-20', '2026-01', 'Yemeksepeti', -60000, 'food'),
              ('c', '2026-01-21', '2026-01', 'İade', 5000, 'food'),
              ('d', '2026-02-01', '2026-02', 'Restoran', -99900, 'food'),
              ('e', '2026-01-05', '2026-01', 'Migros', -30000, 'shopping'),
              ('f', '2026-01-06', '2026-01', 'Taksi', -10000, 'transportation');
            "#,
        );
        goal(&db_path, "food", "2026-01", "1000");
        goal(&db_path, "shopping", "2026-01", "300");
        goal(&db_path, "transportation", "2026-01", "400");

        let progress = query_budget_progress_at_db_path(
            &db_path,
            BudgetProgressQueryRequest {
                month_year: Some("2026-01".to_string()),
            },
        )
        .expect("progress");
        let rows = progress["rows"].as_array().expect("rows");
        let find = |code: &str| {
            rows.iter()
                .find(|r| r["category"].as_str() == Some(code))
                .cloned()
                .expect("category row")
        };
        let food = find("food");
        assert_eq!(food["spent_cents"].as_i64(), Some(120_000));
        assert_eq!(food["progress_pct"].as_i64(), Some(120));
        assert_eq!(food["remaining_cents"].as_i64(), Some(-20_000));
        assert_eq!(food["status"].as_str(), Some("over"));
        assert_eq!(find("shopping")["status"].as_str(), Some("reached"));
        let transport = find("transportation");
        assert_eq!(transport["progress_pct"].as_i64(), Some(25));
        assert_eq!(transport["status"].as_str(), Some("under"));
        assert_eq!(progress["summary"]["over_budget_count"].as_i64(), Some(1));
        assert_eq!(progress["summary"]["total_spent_cents"].as_i64(), Some(160_000));
    }
}
