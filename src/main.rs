use anyhow::{bail, Context, Result};
use budget_tracker_lib::*;
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use log::{info, warn, LevelFilter};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "budget-tracker", version, about = "Personal budget ledger for Turkish bank statements")]
struct Cli {
    /// Application home (config, database, rules, backups)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Single-line JSON output
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Database status, migrations and resets
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Import bank statements
    Import {
        #[command(subcommand)]
        command: ImportCommand,
    },
    /// Credit-card statement actions
    Card {
        #[command(subcommand)]
        command: CardCommand,
    },
    /// Transaction list and edits
    Tx {
        #[command(subcommand)]
        command: TxCommand,
    },
    /// Accounts and balances
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Recurring and scheduled payments
    Auto {
        #[command(subcommand)]
        command: AutoCommand,
    },
    /// Monthly budget goals
    Budget {
        #[command(subcommand)]
        command: BudgetCommand,
    },
    /// Income, expense and balance breakdowns
    Analytics {
        #[arg(long)]
        bank: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Export transactions
    Export {
        #[command(subcommand)]
        command: ExportCommand,
    },
    /// JSON backups of the transaction list
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Categorization rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Runtime health check of the ledger database
    Health,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config and resolved paths
    Show,
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    Status,
    Migrate,
    Stats,
    /// Delete every row (requires the confirm phrase)
    ResetAll {
        #[arg(long)]
        confirm: String,
    },
    /// Delete transactions and import jobs (requires the confirm phrase)
    ResetTransactions {
        #[arg(long)]
        confirm: String,
    },
}

#[derive(Args, Debug)]
struct ImportFileArgs {
    path: PathBuf,
    /// Parse and summarize without writing
    #[arg(long)]
    preview: bool,
}

#[derive(Subcommand, Debug)]
enum ImportCommand {
    /// VakıfBank or Bankkart PDF statement
    Pdf(ImportFileArgs),
    /// Bankkart spreadsheet export (.xlsx or .csv)
    Xlsx(ImportFileArgs),
    /// Every .pdf/.xlsx/.csv statement in a directory
    Dir {
        path: PathBuf,
        #[arg(long)]
        recursive: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CardCommand {
    /// Schedule a one-time payment for a card statement total
    Schedule {
        path: PathBuf,
        #[arg(long)]
        account: String,
    },
}

#[derive(Subcommand, Debug)]
enum TxCommand {
    List {
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        bank: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        /// yyyy-MM
        #[arg(long)]
        month: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Add {
        #[arg(long)]
        description: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Delete {
        id: String,
    },
    /// Delete every transaction
    Clear,
    SetCategory {
        id: String,
        category: String,
    },
    /// Re-run the categorization rules over stored transactions
    Recategorize,
    Banks,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    List {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        keyword: Option<String>,
    },
    /// Create or update an account
    Add {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        bank: String,
        #[arg(long, allow_hyphen_values = true)]
        balance: Option<String>,
        #[arg(long = "type")]
        account_type: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        inactive: bool,
    },
    Delete {
        id: String,
    },
    Adjust {
        id: String,
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },
    Total,
    /// Delete every account
    Clear,
}

#[derive(Subcommand, Debug)]
enum AutoCommand {
    List {
        #[arg(long)]
        active: bool,
    },
    /// Create or update a scheduled payment
    Add {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        description: String,
        /// yyyy-MM-dd [HH:MM[:SS]] or dd.MM.yyyy
        #[arg(long)]
        date: String,
        #[arg(long)]
        account: String,
        /// ONE_TIME, DAILY, WEEKLY, MONTHLY or YEARLY
        #[arg(long)]
        period: Option<String>,
    },
    /// Flip or set the active flag
    Toggle {
        id: i64,
        #[arg(long)]
        active: Option<bool>,
    },
    Delete {
        id: i64,
    },
    /// Materialize every due occurrence now
    Process,
    /// Process due payments and run automatic backups on an interval
    Watch {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    Set {
        category: String,
        /// yyyy-MM
        month: String,
        amount: String,
    },
    Delete {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        month: Option<String>,
    },
    List {
        #[arg(long)]
        month: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Progress {
        #[arg(long)]
        month: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    output: PathBuf,
    #[arg(long)]
    bank: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ExportCommand {
    Csv(ExportArgs),
    Pdf(ExportArgs),
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Write a manual backup (defaults to the backup directory)
    Create {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Merge a backup file into the ledger; rows are upserted by id, others are kept
    Restore {
        path: PathBuf,
    },
    /// Run the automatic backup if it is due
    Auto {
        #[arg(long)]
        force: bool,
    },
    List,
    Enable,
    Disable,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    List {
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Set {
        pattern: String,
        category: String,
        #[arg(long = "match", default_value = "contains")]
        match_type: String,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    Delete {
        pattern: String,
        #[arg(long = "match", default_value = "contains")]
        match_type: String,
    },
}

struct Session {
    home: PathBuf,
    cfg: AppConfig,
    paths: AppPaths,
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

fn path_text(p: &Path) -> Option<String> {
    Some(p.to_string_lossy().to_string())
}

fn to_json<T: Serialize>(v: T) -> Result<Value> {
    serde_json::to_value(v).context("serialize result")
}

fn watch(ctx: &Session, cycles: Option<u64>) -> Result<Value> {
    let interval = Duration::from_secs(ctx.cfg.automation.watch_interval_secs.max(1));
    info!(
        "watching {} every {}s",
        ctx.paths.db_path.display(),
        interval.as_secs()
    );
    let mut runs = 0_u64;
    loop {
        let now = Local::now().naive_local();
        match process_due_automatic_transactions_at_db_path(
            &ctx.paths.db_path,
            &ctx.paths.rules_dir,
            now,
            ctx.cfg.automation.max_catch_up,
        ) {
            Ok(out) => info!("processed {} automatic transactions", out["processed_count"]),
            Err(e) => warn!("automatic transaction run failed: {e}"),
        }
        if let Err(e) = run_auto_backup_at_db_path(
            &ctx.paths.db_path,
            &ctx.paths.backup_dir,
            &ctx.cfg.backup,
            now,
            false,
        ) {
            warn!("automatic backup failed: {e}");
        }
        runs += 1;
        if cycles.is_some_and(|n| runs >= n) {
            return Ok(json!({ "cycles": runs }));
        }
        thread::sleep(interval);
    }
}

fn run(cli: Cli) -> Result<Value> {
    let home = resolve_home(cli.home.as_deref()).context("resolve application home")?;
    let cfg = load_config(&home)?;
    let paths = AppPaths::from_config(&home, &cfg);
    let ctx = Session { home, cfg, paths };
    let db = ctx.paths.db_path.as_path();
    let rules_dir = ctx.paths.rules_dir.as_path();

    let out = match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init { force } => {
                let written = init_config(&ctx.home, force)?;
                json!({ "written": written, "config_file": ctx.paths.config_file })
            }
            ConfigCommand::Show => json!({ "config": to_json(&ctx.cfg)?, "paths": to_json(&ctx.paths)? }),
        },

        Command::Db { command } => match command {
            DbCommand::Status => to_json(inspect_status_at_path(db)?)?,
            DbCommand::Migrate => to_json(apply_embedded_migrations(db)?)?,
            DbCommand::Stats => to_json(query_admin_db_stats_at_path(db)?)?,
            DbCommand::ResetAll { confirm } => to_json(reset_admin_db_data_at_path(
                db,
                LedgerAdminResetRequest { confirm_text: Some(confirm) },
            )?)?,
            DbCommand::ResetTransactions { confirm } => to_json(reset_admin_transaction_data_at_path(
                db,
                LedgerAdminResetRequest { confirm_text: Some(confirm) },
            )?)?,
        },

        Command::Import { command } => match command {
            ImportCommand::Pdf(args) => {
                let req = StatementFileRequest { source_path: path_text(&args.path) };
                if args.preview {
                    preview_statement_pdf(rules_dir, req)?
                } else {
                    import_statement_pdf_at_db_path(db, rules_dir, req)?
                }
            }
            ImportCommand::Xlsx(args) => {
                let req = StatementFileRequest { source_path: path_text(&args.path) };
                if args.preview {
                    preview_statement_sheet(rules_dir, req)?
                } else {
                    import_statement_sheet_at_db_path(db, rules_dir, req)?
                }
            }
            ImportCommand::Dir { path, recursive } => import_directory_at_db_path(
                db,
                rules_dir,
                DirectoryImportRequest { source_dir: path_text(&path), recursive: Some(recursive) },
            )?,
        },

        Command::Card { command } => match command {
            CardCommand::Schedule { path, account } => schedule_card_payment_at_db_path(
                db,
                CardPaymentScheduleRequest { source_path: path_text(&path), account_id: Some(account) },
            )?,
        },

        Command::Tx { command } => match command {
            TxCommand::List { keyword, category, bank, from, to, month, limit } => query_transactions_at_db_path(
                db,
                TransactionsQueryRequest {
                    keyword,
                    category,
                    bank_name: bank,
                    date_from: from,
                    date_to: to,
                    month,
                    limit,
                },
            )?,
            TxCommand::Add { description, amount, date, time, category } => add_manual_transaction_at_db_path(
                db,
                rules_dir,
                ManualTransactionRequest {
                    description: Some(description),
                    amount: Some(amount),
                    date,
                    time,
                    category,
                },
            )?,
            TxCommand::Delete { id } => delete_transaction_at_db_path(db, TransactionDeleteRequest { id: Some(id) })?,
            TxCommand::Clear => delete_all_transactions_at_db_path(db)?,
            TxCommand::SetCategory { id, category } => update_transaction_category_at_db_path(
                db,
                TransactionCategoryUpdateRequest { id: Some(id), category: Some(category) },
            )?,
            TxCommand::Recategorize => recategorize_transactions_at_db_path(db, rules_dir)?,
            TxCommand::Banks => query_bank_names_at_db_path(db)?,
        },

        Command::Account { command } => match command {
            AccountCommand::List { all, keyword } => query_accounts_at_db_path(
                db,
                AccountsQueryRequest { include_inactive: Some(all), keyword },
            )?,
            AccountCommand::Add { id, name, bank, balance, account_type, currency, inactive } => {
                upsert_account_at_db_path(
                    db,
                    AccountUpsertRequest {
                        account_id: id,
                        account_name: Some(name),
                        bank_name: Some(bank),
                        balance,
                        account_type,
                        currency: currency.or_else(|| Some(ctx.cfg.ledger.currency.clone())),
                        is_active: Some(!inactive),
                    },
                )?
            }
            AccountCommand::Delete { id } => delete_account_at_db_path(db, AccountIdRequest { account_id: Some(id) })?,
            AccountCommand::Adjust { id, amount } => adjust_account_balance_at_db_path(
                db,
                AccountBalanceAdjustRequest { account_id: Some(id), amount: Some(amount) },
            )?,
            AccountCommand::Total => query_total_balance_at_db_path(db)?,
            AccountCommand::Clear => delete_all_accounts_at_db_path(db)?,
        },

        Command::Auto { command } => match command {
            AutoCommand::List { active } => query_automatic_transactions_at_db_path(
                db,
                AutomaticTransactionsQueryRequest { active_only: Some(active) },
            )?,
            AutoCommand::Add { id, amount, description, date, account, period } => {
                upsert_automatic_transaction_at_db_path(
                    db,
                    AutomaticTransactionUpsertRequest {
                        id,
                        amount: Some(amount),
                        description: Some(description),
                        payment_date: Some(date),
                        account_id: Some(account),
                        repeat_period: period,
                        is_active: Some(true),
                    },
                )?
            }
            AutoCommand::Toggle { id, active } => set_automatic_transaction_active_at_db_path(
                db,
                AutomaticTransactionActiveRequest { id: Some(id), is_active: active },
            )?,
            AutoCommand::Delete { id } => {
                delete_automatic_transaction_at_db_path(db, AutomaticTransactionDeleteRequest { id: Some(id) })?
            }
            AutoCommand::Process => process_due_automatic_transactions_at_db_path(
                db,
                rules_dir,
                Local::now().naive_local(),
                ctx.cfg.automation.max_catch_up,
            )?,
            AutoCommand::Watch { cycles } => watch(&ctx, cycles)?,
        },

        Command::Budget { command } => match command {
            BudgetCommand::Set { category, month, amount } => upsert_budget_goal_at_db_path(
                db,
                BudgetGoalUpsertRequest {
                    category: Some(category),
                    month_year: Some(month),
                    target_amount: Some(amount),
                },
            )?,
            BudgetCommand::Delete { id, category, month } => {
                if id.is_none() && (category.is_none() || month.is_none()) {
                    bail!("pass --id, or both --category and --month");
                }
                delete_budget_goal_at_db_path(db, BudgetGoalDeleteRequest { id, category, month_year: month })?
            }
            BudgetCommand::List { month, category } => {
                query_budget_goals_at_db_path(db, BudgetGoalsQueryRequest { month_year: month, category })?
            }
            BudgetCommand::Progress { month } => {
                query_budget_progress_at_db_path(db, BudgetProgressQueryRequest { month_year: month })?
            }
        },

        Command::Analytics { bank, from, to } => query_analytics_at_db_path(
            db,
            AnalyticsQueryRequest { bank_name: bank, date_from: from, date_to: to },
        )?,

        Command::Export { command } => match command {
            ExportCommand::Csv(args) => export_transactions_csv_at_db_path(
                db,
                ExportRequest { output_path: path_text(&args.output), bank_name: args.bank },
            )?,
            ExportCommand::Pdf(args) => export_transactions_pdf_at_db_path(
                db,
                ExportRequest { output_path: path_text(&args.output), bank_name: args.bank },
                Local::now().naive_local(),
            )?,
        },

        Command::Backup { command } => match command {
            BackupCommand::Create { output } => create_backup_at_db_path(
                db,
                &ctx.paths.backup_dir,
                BackupCreateRequest { output_path: output.as_deref().and_then(path_text) },
                Local::now().naive_local(),
            )?,
            BackupCommand::Restore { path } => {
                restore_backup_at_db_path(db, BackupRestoreRequest { source_path: path_text(&path) })?
            }
            BackupCommand::Auto { force } => run_auto_backup_at_db_path(
                db,
                &ctx.paths.backup_dir,
                &ctx.cfg.backup,
                Local::now().naive_local(),
                force,
            )?,
            BackupCommand::List => list_backups(&ctx.paths.backup_dir)?,
            BackupCommand::Enable => set_auto_backup_enabled(&ctx.home, true)?,
            BackupCommand::Disable => set_auto_backup_enabled(&ctx.home, false)?,
        },

        Command::Rules { command } => match command {
            RulesCommand::List { keyword, limit } => {
                query_category_rules(rules_dir, RulesListQueryRequest { keyword, limit })?
            }
            RulesCommand::Set { pattern, category, match_type, priority, note } => upsert_category_rule(
                rules_dir,
                CategoryRuleUpsertRequest {
                    priority,
                    match_type: Some(match_type),
                    pattern: Some(pattern),
                    category: Some(category),
                    note,
                },
            )?,
            RulesCommand::Delete { pattern, match_type } => delete_category_rule(
                rules_dir,
                CategoryRuleDeleteRequest { match_type: Some(match_type), pattern: Some(pattern) },
            )?,
        },

        Command::Health => runtime_db_health_check_at_db_path(db, Utc::now()),
    };
    Ok(out)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let compact = cli.compact;

    let out = run(cli)?;
    let text = if compact {
        serde_json::to_string(&out)
    } else {
        serde_json::to_string_pretty(&out)
    }
    .context("render JSON output")?;
    println!("{text}");
    Ok(())
}
