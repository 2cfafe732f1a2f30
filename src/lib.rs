pub mod accounts;
pub mod admin_health;
pub mod analytics;
pub mod automatic_transactions;
pub mod backup;
pub mod budget_goals;
pub mod categories;
pub mod config;
pub mod errors;
pub mod export;
pub mod ledger_db;
pub mod money;
pub mod rules;
mod statement_import;
pub mod statement_pdf;
pub mod statement_xlsx;
pub mod transactions;

pub use accounts::{
    adjust_account_balance_at_db_path, delete_account_at_db_path, delete_all_accounts_at_db_path,
    get_account_at_db_path, query_accounts_at_db_path, query_total_balance_at_db_path,
    upsert_account_at_db_path, AccountBalanceAdjustRequest, AccountIdRequest, AccountUpsertRequest,
    AccountsQueryRequest,
};
pub use admin_health::runtime_db_health_check_at_db_path;
pub use analytics::{analyze_transactions, query_analytics_at_db_path, AnalyticsQueryRequest, AnalyticsSummary};
pub use automatic_transactions::{
    delete_automatic_transaction_at_db_path, process_due_automatic_transactions_at_db_path,
    query_automatic_transactions_at_db_path, set_automatic_transaction_active_at_db_path,
    upsert_automatic_transaction_at_db_path, AutomaticTransactionActiveRequest,
    AutomaticTransactionDeleteRequest, AutomaticTransactionUpsertRequest, AutomaticTransactionsQueryRequest,
    RepeatPeriod,
};
pub use backup::{
    create_backup_at_db_path, list_backups, restore_backup_at_db_path, run_auto_backup_at_db_path,
    set_auto_backup_enabled, BackupCreateRequest, BackupRestoreRequest,
};
pub use budget_goals::{
    delete_budget_goal_at_db_path, query_budget_goals_at_db_path, query_budget_progress_at_db_path,
    upsert_budget_goal_at_db_path, BudgetGoalDeleteRequest, BudgetGoalUpsertRequest, BudgetGoalsQueryRequest,
    BudgetProgressQueryRequest,
};
pub use categories::TransactionCategory;
pub use config::{init_config, load_config, resolve_home, save_config, AppConfig, AppPaths};
pub use errors::{LedgerError, LedgerResult};
pub use export::{export_transactions_csv_at_db_path, export_transactions_pdf_at_db_path, ExportRequest};
pub use ledger_db::{
    apply_embedded_migrations, inspect_status_at_path, query_admin_db_stats_at_path, reset_admin_db_data_at_path,
    reset_admin_transaction_data_at_path, LedgerAdminResetRequest, ADMIN_RESET_CONFIRM_PHRASE,
};
pub use rules::{
    delete_category_rule, query_category_rules, upsert_category_rule, CategoryRuleDeleteRequest,
    CategoryRuleUpsertRequest, RulesListQueryRequest,
};
pub use statement_import::{StatementBatch, StatementRow};
pub use statement_pdf::{
    import_statement_pdf_at_db_path, preview_statement_pdf, schedule_card_payment_at_db_path,
    CardPaymentScheduleRequest, StatementFileRequest,
};
pub use statement_xlsx::{
    import_directory_at_db_path, import_statement_sheet_at_db_path, preview_statement_sheet,
    DirectoryImportRequest,
};
pub use transactions::{
    add_manual_transaction_at_db_path, delete_all_transactions_at_db_path, delete_transaction_at_db_path,
    query_bank_names_at_db_path, query_transactions_at_db_path, recategorize_transactions_at_db_path,
    update_transaction_category_at_db_path, ManualTransactionRequest, TransactionCategoryUpdateRequest,
    TransactionDeleteRequest, TransactionsQueryRequest,
};
