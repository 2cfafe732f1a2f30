use serde::Deserialize;
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::Path;

use crate::categories::TransactionCategory;
use crate::errors::LedgerResult;
use crate::ledger_db::open_migrated_connection;
use crate::money::{cents_to_text, cents_to_value, format_tr_money};
use crate::transactions::{load_transactions, TransactionFilter, TransactionRecord, TransactionsQueryRequest, MANUAL_BANK_NAME};

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQueryRequest {
    pub bank_name: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyticsSummary {
    pub total_income_cents: i64,
    pub total_expense_cents: i64,
    pub balance_cents: i64,
    /// `yyyy.MM` -> net, newest month first.
    pub monthly: Vec<(String, i64)>,
    /// Expense totals as positive numbers, largest first.
    pub categories: Vec<(TransactionCategory, i64)>,
    pub banks: BTreeMap<String, i64>,
}

/// Manual entries are summed; a bank contributes the balance printed on its latest row.
fn bank_breakdown(rows: &[TransactionRecord]) -> BTreeMap<String, i64> {
    let mut manual_sums: BTreeMap<String, i64> = BTreeMap::new();
    let mut latest: BTreeMap<String, &TransactionRecord> = BTreeMap::new();
    for rec in rows {
        if rec.bank_name == MANUAL_BANK_NAME {
            *manual_sums.entry(rec.bank_name.clone()).or_insert(0) += rec.amount_cents;
            continue;
        }
        let replace = latest
            .get(&rec.bank_name)
            .map(|cur| (rec.date.as_str(), rec.time.as_str()) >= (cur.date.as_str(), cur.time.as_str()))
            .unwrap_or(true);
        if replace {
            latest.insert(rec.bank_name.clone(), rec);
        }
    }
    let mut out = manual_sums;
    for (bank, rec) in latest {
        out.insert(bank, rec.balance_cents.unwrap_or(0));
    }
    out
}

pub fn analyze_transactions(rows: &[TransactionRecord]) -> AnalyticsSummary {
    let total_income_cents = rows.iter().filter(|r| r.amount_cents > 0).map(|r| r.amount_cents).sum();
    let total_expense_cents = -rows.iter().filter(|r| r.amount_cents < 0).map(|r| r.amount_cents).sum::<i64>();

    let mut monthly_map: BTreeMap<String, i64> = BTreeMap::new();
    let mut category_map: BTreeMap<TransactionCategory, i64> = BTreeMap::new();
    for rec in rows {
        let key = rec.date.get(..7).unwrap_or(&rec.date).replace('-', ".");
        *monthly_map.entry(key).or_insert(0) += rec.amount_cents;
        if rec.amount_cents < 0 {
            *category_map.entry(rec.category).or_insert(0) -= rec.amount_cents;
        }
    }
    let mut monthly = monthly_map.into_iter().collect::<Vec<_>>();
    monthly.reverse();
    let mut categories = category_map
        .into_iter()
        .filter(|(_, cents)| *cents > 0)
        .collect::<Vec<_>>();
    categories.sort_by_key(|(category, cents)| (Reverse(*cents), *category));

    let banks = bank_breakdown(rows);
    AnalyticsSummary {
        total_income_cents,
        total_expense_cents,
        balance_cents: banks.values().sum(),
        monthly,
        categories,
        banks,
    }
}

impl AnalyticsSummary {
    pub fn to_json(&self) -> Value {
        let category_total: i64 = self.categories.iter().map(|(_, c)| c).sum();
        json!({
            "total_income_cents": self.total_income_cents,
            "total_income": cents_to_text(self.total_income_cents),
            "total_expense_cents": self.total_expense_cents,
            "total_expense": cents_to_text(self.total_expense_cents),
            "net_cents": self.total_income_cents - self.total_expense_cents,
            "net": cents_to_text(self.total_income_cents - self.total_expense_cents),
            "balance_cents": self.balance_cents,
            "balance": cents_to_text(self.balance_cents),
            "balance_tr": format_tr_money(self.balance_cents),
            "monthly_breakdown": self.monthly.iter().map(|(month, cents)| json!({
                "month": month,
                "net_cents": cents,
                "net": cents_to_text(*cents),
            })).collect::<Vec<_>>(),
            "category_breakdown": self.categories.iter().map(|(category, cents)| json!({
                "category": category.code(),
                "category_name": category.display_name(),
                "color": category.color(),
                "expense_cents": cents,
                "expense": cents_to_text(*cents),
                "share_pct": if category_total > 0 {
                    cents_to_value(cents * 10_000 / category_total)
                } else {
                    0.0
                },
            })).collect::<Vec<_>>(),
            "bank_breakdown": self.banks.iter().map(|(bank, cents)| json!({
                "bank_name": bank,
                "balance_cents": cents,
                "balance": cents_to_text(*cents),
            })).collect::<Vec<_>>(),
        })
    }
}

pub fn query_analytics_at_db_path(db_path: &Path, req: AnalyticsQueryRequest) -> LedgerResult<Value> {
    let filter = TransactionFilter::from_request(TransactionsQueryRequest {
        bank_name: req.bank_name,
        date_from: req.date_from,
        date_to: req.date_to,
        ..Default::default()
    })?;
    let conn = open_migrated_connection(db_path)?;
    let rows = load_transactions(&conn, &filter)?;
    let summary = analyze_transactions(&rows);
    let mut out = summary.to_json();
    out["filters"] = json!({
        "bank_name": filter.bank_name,
        "date_from": filter.date_from,
        "date_to": filter.date_to,
    });
    out["transaction_count"] = json!(rows.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, date: &str, time: &str, amount: i64, balance: Option<i64>, bank: &str, category: TransactionCategory) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            receipt_no: String::new(),
            date: date.to_string(),
            time: time.to_string(),
            description: id.to_string(),
            amount_cents: amount,
            balance_cents: balance,
            bank_name: bank.to_string(),
            category,
            source_type: "statement_pdf".to_string(),
            import_job_id: None,
            automatic_id: None,
        }
    }

    #[test]
    fn breakdowns_follow_bank_and_month_rules() {
        let rows = vec![
            rec("v1", "2026-01-05", "09:15", -12_550, Some(487_450), "VakıfBank", TransactionCategory::Shopping),
            rec("v2", "2026-01-31", "08:00", 4_500_000, Some(4_987_450), "VakıfBank", TransactionCategory::Income),
            rec("v3", "2026-01-10", "12:00", -40_000, Some(447_450), "VakıfBank", TransactionCategory::Food),
            rec("b1", "2026-02-02", "", -20_000, None, "Bankkart", TransactionCategory::Food),
            rec("m1", "2026-02-03", "10:00:00", -1_500_000, None, MANUAL_BANK_NAME, TransactionCategory::Bills),
            rec("m2", "2026-02-04", "10:00:00", 200_000, None, MANUAL_BANK_NAME, TransactionCategory::Income),
        ];
        let summary = analyze_transactions(&rows);
        assert_eq!(summary.total_income_cents, 4_700_000);
        assert_eq!(summary.total_expense_cents, 1_572_550);
        assert_eq!(summary.banks.get("VakıfBank"), Some(&4_987_450));
        assert_eq!(summary.banks.get("Bankkart"), Some(&0));
        assert_eq!(summary.banks.get(MANUAL_BANK_NAME), Some(&-1_300_000));
        assert_eq!(summary.balance_cents, 4_987_450 - 1_300_000);
        assert_eq!(
            summary.monthly,
            vec![("2026.02".to_string(), -1_320_000), ("2026.01".to_string(), 4_447_450)]
        );
        assert_eq!(summary.categories[0], (TransactionCategory::Bills, 1_500_000));
        assert_eq!(summary.categories[1], (TransactionCategory::Food, 60_000));
        assert!(summary.categories.iter().all(|(c, _)| *c != TransactionCategory::Income));
    }

    #[test]
    fn empty_ledger_yields_zeroes() {
        let summary = analyze_transactions(&[]);
        assert_eq!(summary, AnalyticsSummary::default());
        let out = summary.to_json();
        assert_eq!(out["balance_cents"].as_i64(), Some(0));
        assert_eq!(out["category_breakdown"].as_array().map(|a| a.len()), Some(0));
    }
}
