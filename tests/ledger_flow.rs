use budget_tracker_lib::*;
use chrono::{NaiveDateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

fn temp_home() -> PathBuf {
    std::env::temp_dir().join(format!(
        "budget_tracker_flow_test_{}_{}",
        std::process::id(),
        Uuid::new_v4()
    ))
}

fn at(text: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").expect("test timestamp")
}

fn v_i64(v: &Value, path: &[&str]) -> i64 {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing key: {}", key));
    }
    cur.as_i64()
        .unwrap_or_else(|| panic!("expected i64 at path {:?}", path))
}

fn v_str<'a>(v: &'a Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing key: {}", key));
    }
    cur.as_str()
        .unwrap_or_else(|| panic!("expected str at path {:?}", path))
}

#[test]
fn statement_to_budget_backup_and_export_flow() {
    let home = temp_home();
    let cfg = AppConfig::default();
    let paths = AppPaths::from_config(&home, &cfg);
    let db = paths.db_path.as_path();
    let rules_dir = paths.rules_dir.as_path();

    let migrated = apply_embedded_migrations(db).expect("migrate");
    assert!(migrated.created);

    fs::create_dir_all(&home).expect("create home");
    let sheet = home.join("bankkart.csv");
    fs::write(
        &sheet,
        "Tarih,Fiş No,Açıklama,Tutar,Bakiye\n\
         05.01.2026,A1,MIGROS KADIKOY,\"-250,00\",\"4.750,00\"\n\
         31.01.2026,A2,Maaş ödemesi,\"45.000,00\",\"49.750,00\"\n",
    )
    .expect("write statement");
    let imported = import_statement_sheet_at_db_path(
        db,
        rules_dir,
        StatementFileRequest { source_path: Some(sheet.to_string_lossy().to_string()) },
    )
    .expect("import sheet");
    assert_eq!(v_i64(&imported, &["imported_count"]), 2);
    assert_eq!(v_str(&imported, &["bank_name"]), "Bankkart");

    let account = upsert_account_at_db_path(
        db,
        AccountUpsertRequest {
            account_name: Some("Vadesiz".to_string()),
            bank_name: Some("VakıfBank".to_string()),
            balance: Some("10000".to_string()),
            ..Default::default()
        },
    )
    .expect("create account");
    let account_id = v_str(&account, &["row", "account_id"]).to_string();

    upsert_automatic_transaction_at_db_path(
        db,
        AutomaticTransactionUpsertRequest {
            amount: Some("-100".to_string()),
            description: Some("Netflix".to_string()),
            payment_date: Some("2026-01-10 09:00:00".to_string()),
            account_id: Some(account_id.clone()),
            repeat_period: Some("MONTHLY".to_string()),
            ..Default::default()
        },
    )
    .expect("schedule netflix");
    let processed =
        process_due_automatic_transactions_at_db_path(db, rules_dir, at("2026-03-15 12:00:00"), cfg.automation.max_catch_up)
            .expect("process due");
    assert_eq!(v_i64(&processed, &["created_count"]), 3);

    let total = query_total_balance_at_db_path(db).expect("total balance");
    assert_eq!(v_i64(&total, &["total_balance_cents"]), 1_000_000 - 30_000);

    upsert_budget_goal_at_db_path(
        db,
        BudgetGoalUpsertRequest {
            category: Some("entertainment".to_string()),
            month_year: Some("2026-01".to_string()),
            target_amount: Some("50".to_string()),
        },
    )
    .expect("set goal");
    let progress = query_budget_progress_at_db_path(
        db,
        BudgetProgressQueryRequest { month_year: Some("2026-01".to_string()) },
    )
    .expect("progress");
    assert_eq!(v_i64(&progress, &["summary", "over_budget_count"]), 1);
    assert_eq!(v_str(&progress["rows"][0], &["status"]), "over");

    let analytics = query_analytics_at_db_path(db, AnalyticsQueryRequest::default()).expect("analytics");
    assert_eq!(v_i64(&analytics, &["transaction_count"]), 5);
    assert_eq!(v_i64(&analytics, &["total_income_cents"]), 4_500_000);

    let backup = create_backup_at_db_path(
        db,
        &paths.backup_dir,
        BackupCreateRequest::default(),
        at("2026-03-15 12:00:00"),
    )
    .expect("backup");
    assert_eq!(v_i64(&backup, &["transaction_count"]), 5);
    delete_all_transactions_at_db_path(db).expect("clear");
    let restored = restore_backup_at_db_path(
        db,
        BackupRestoreRequest { source_path: Some(v_str(&backup, &["path"]).to_string()) },
    )
    .expect("restore");
    assert_eq!(v_i64(&restored, &["restored_count"]), 5);

    let listed = query_transactions_at_db_path(
        db,
        TransactionsQueryRequest { category: Some("Alışveriş".to_string()), ..Default::default() },
    )
    .expect("list shopping");
    assert_eq!(v_i64(&listed, &["summary", "count"]), 1);
    assert_eq!(v_str(&listed["rows"][0], &["description"]), "MIGROS KADIKOY");

    let exported = export_transactions_csv_at_db_path(
        db,
        ExportRequest {
            output_path: Some(home.join("out/islemler.csv").to_string_lossy().to_string()),
            bank_name: None,
        },
    )
    .expect("export");
    assert_eq!(v_i64(&exported, &["row_count"]), 5);

    let health = runtime_db_health_check_at_db_path(db, Utc::now());
    assert_eq!(v_str(&health, &["status"]), "ok");

    let _ = fs::remove_dir_all(&home);
}

#[test]
fn ledger_operations_require_a_migrated_database() {
    let home = temp_home();
    let db_buf = home.join("ledger/budget.db");
    let db = db_buf.as_path();
    let rules_dir = home.join("rules");

    let outcomes: Vec<(&str, LedgerResult<Value>)> = vec![
        ("accounts", query_accounts_at_db_path(db, AccountsQueryRequest::default())),
        ("transactions", query_transactions_at_db_path(db, TransactionsQueryRequest::default())),
        (
            "update category",
            update_transaction_category_at_db_path(
                db,
                TransactionCategoryUpdateRequest {
                    id: Some("tx_1".to_string()),
                    category: Some("shopping".to_string()),
                },
            ),
        ),
        (
            "delete transaction",
            delete_transaction_at_db_path(db, TransactionDeleteRequest { id: Some("tx_1".to_string()) }),
        ),
        ("delete all transactions", delete_all_transactions_at_db_path(db)),
        ("bank names", query_bank_names_at_db_path(db)),
        ("budget goals", query_budget_goals_at_db_path(db, BudgetGoalsQueryRequest::default())),
        (
            "budget progress",
            query_budget_progress_at_db_path(
                db,
                BudgetProgressQueryRequest { month_year: Some("2026-01".to_string()) },
            ),
        ),
        ("analytics", query_analytics_at_db_path(db, AnalyticsQueryRequest::default())),
        (
            "automatic transactions",
            query_automatic_transactions_at_db_path(db, AutomaticTransactionsQueryRequest::default()),
        ),
        (
            "toggle automatic transaction",
            set_automatic_transaction_active_at_db_path(
                db,
                AutomaticTransactionActiveRequest { id: Some(1), is_active: Some(false) },
            ),
        ),
        (
            "delete automatic transaction",
            delete_automatic_transaction_at_db_path(db, AutomaticTransactionDeleteRequest { id: Some(1) }),
        ),
        (
            "process due",
            process_due_automatic_transactions_at_db_path(db, &rules_dir, at("2026-03-15 12:00:00"), 60),
        ),
    ];

    for (name, outcome) in outcomes {
        let err = outcome.expect_err(name);
        assert_eq!(err.category(), "VALIDATION_ERROR", "{name}: {err}");
    }
    assert!(!db.exists(), "read paths must not create the database file");
    let _ = fs::remove_dir_all(&home);
}
