use chrono::Local;
use log::{debug, info};
use pdf_extract::extract_text;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

use crate::automatic_transactions::{upsert_automatic_transaction_at_db_path, AutomaticTransactionUpsertRequest};
use crate::errors::{LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{
    cents_to_text, format_tr_money, normalize_date_flexible, parse_amount_to_cents, parse_tr_amount_to_cents,
    parse_tr_date,
};
use crate::rules::load_category_rules;
use crate::statement_import::{
    begin_import_job, build_preview, finish_import_job, import_statement_batch, StatementBatch, StatementRow,
};

pub const SOURCE_STATEMENT_PDF: &str = "statement_pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupportedBank {
    VakifBank,
    Bankkart,
}

impl SupportedBank {
    const ALL: [SupportedBank; 2] = [SupportedBank::VakifBank, SupportedBank::Bankkart];

    fn display_name(self) -> &'static str {
        match self {
            Self::VakifBank => "VakıfBank",
            Self::Bankkart => "Bankkart",
        }
    }

    /// Lowercased spellings that identify the bank in extracted text.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::VakifBank => &["vakıfbank", "vakifbank"],
            Self::Bankkart => &["bankkart"],
        }
    }

    /// Present only on credit-card statements.
    fn card_keyword(self) -> &'static str {
        match self {
            Self::VakifBank => "Dönem Borcunuz",
            Self::Bankkart => "Dönem Borcu TL",
        }
    }

    fn detect(text: &str) -> Option<Self> {
        let lowered = text.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|bank| bank.aliases().iter().any(|alias| lowered.contains(alias)))
    }
}

fn supported_bank_names() -> String {
    SupportedBank::ALL
        .iter()
        .map(|b| b.display_name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn transaction_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{2}\.\d{2}\.\d{4}) (\d{2}:\d{2})\s+(\d+)\s+([\-\d.,]+)\s+([\-\d.,]+)\s+(.*)")
            .expect("statement transaction regex")
    })
}

fn vakif_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Dönem Borcunuz\s*:\s*([0-9,]+\.[0-9]+)").expect("vakif total regex"))
}

fn vakif_due_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Son Ödeme Tarihi\s*[:\-]?\s*(\d{2}\.\d{2}\.\d{4})").expect("vakif due date regex")
    })
}

fn bankkart_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Dönem Borcu TL\s*:\s*([0-9,.]+) TL").expect("bankkart total regex"))
}

fn bankkart_due_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Son Ödeme Tarihi\s*:\s*(\d{2}/\d{2}/\d{4})").expect("bankkart due date regex")
    })
}

/// Period total and due date read off a credit-card statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardStatementSummary {
    pub bank_name: String,
    pub total_due_text: Option<String>,
    pub total_due_cents: Option<i64>,
    pub due_date: Option<String>,
}

impl CardStatementSummary {
    fn to_json(&self) -> Value {
        json!({
            "kind": "card_summary",
            "bank_name": self.bank_name,
            "total_due_text": self.total_due_text,
            "total_due_cents": self.total_due_cents,
            "total_due": self.total_due_cents.map(cents_to_text),
            "total_due_tr": self.total_due_cents.map(format_tr_money),
            "due_date": self.due_date,
        })
    }
}

#[derive(Debug, Clone)]
pub enum ParsedStatement {
    Transactions(StatementBatch),
    CardSummary(CardStatementSummary),
}

fn parse_card_summary(bank: SupportedBank, text: &str) -> CardStatementSummary {
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    let (total_text, due_text) = match bank {
        SupportedBank::VakifBank => (capture(vakif_total_re()), capture(vakif_due_date_re())),
        SupportedBank::Bankkart => (capture(bankkart_total_re()), capture(bankkart_due_date_re())),
    };
    let total_due_cents = total_text.as_deref().and_then(|raw| {
        let parsed = match bank {
            SupportedBank::VakifBank => parse_amount_to_cents(&raw.replace(',', "")),
            SupportedBank::Bankkart => parse_tr_amount_to_cents(raw),
        };
        parsed.ok()
    });
    let due_date = due_text
        .as_deref()
        .and_then(parse_tr_date)
        .map(|d| d.format("%Y-%m-%d").to_string());
    CardStatementSummary {
        bank_name: bank.display_name().to_string(),
        total_due_text: total_text,
        total_due_cents,
        due_date,
    }
}

fn parse_transaction_lines(text: &str) -> (Vec<StatementRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for caps in transaction_line_re().captures_iter(text) {
        let line = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let parsed: LedgerResult<StatementRow> = (|| {
            Ok(StatementRow {
                date: normalize_date_flexible(&caps[1])?,
                time: caps[2].to_string(),
                receipt_no: caps[3].to_string(),
                amount_cents: parse_tr_amount_to_cents(&caps[4])?,
                balance_cents: Some(parse_tr_amount_to_cents(&caps[5])?),
                description: caps[6].trim().to_string(),
            })
        })();
        match parsed {
            Ok(row) => rows.push(row),
            Err(e) => errors.push(format!("{}: {e}", line.trim())),
        }
    }
    (rows, errors)
}

/// Classifies extracted statement text and parses it. Touches no storage.
pub fn parse_statement_text(text: &str, source_file: &str) -> LedgerResult<ParsedStatement> {
    let bank = SupportedBank::detect(text)
        .ok_or_else(|| LedgerError::UnsupportedBank(supported_bank_names()))?;
    debug!("statement {source_file} detected as {}", bank.display_name());

    if text.contains(bank.card_keyword()) {
        return Ok(ParsedStatement::CardSummary(parse_card_summary(bank, text)));
    }

    let (rows, errors) = parse_transaction_lines(text);
    if rows.is_empty() {
        return Err(LedgerError::NoData(format!(
            "no transactions found in {} statement {source_file}",
            bank.display_name()
        )));
    }
    Ok(ParsedStatement::Transactions(StatementBatch {
        source_type: SOURCE_STATEMENT_PDF,
        source_file: source_file.to_string(),
        bank_name: bank.display_name().to_string(),
        rows,
        errors,
    }))
}

pub fn read_statement_pdf(pdf_path: &Path) -> LedgerResult<ParsedStatement> {
    if !pdf_path.is_file() {
        return Err(LedgerError::not_found(format!(
            "PDF file not found: {}",
            pdf_path.display()
        )));
    }
    let text = extract_text(pdf_path)
        .map_err(|e| LedgerError::Statement(format!("{}: {e}", pdf_path.display())))?;
    parse_statement_text(&text, &pdf_path.to_string_lossy())
}

#[derive(Debug, Default, Deserialize)]
pub struct StatementFileRequest {
    pub source_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CardPaymentScheduleRequest {
    pub source_path: Option<String>,
    pub account_id: Option<String>,
}

pub(crate) fn resolve_source_path(raw: Option<String>) -> LedgerResult<String> {
    let text = raw.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err(LedgerError::validation("source_path is required"));
    }
    Ok(text)
}

pub fn preview_parsed_statement(parsed: &ParsedStatement, rules_dir: &Path) -> LedgerResult<Value> {
    match parsed {
        ParsedStatement::Transactions(batch) => Ok(build_preview(batch, &load_category_rules(rules_dir)?)),
        ParsedStatement::CardSummary(summary) => Ok(summary.to_json()),
    }
}

pub fn import_parsed_statement(
    db_path: &Path,
    rules_dir: &Path,
    parsed: &ParsedStatement,
    source_file: &str,
) -> LedgerResult<Value> {
    match parsed {
        ParsedStatement::Transactions(batch) => import_statement_batch(db_path, rules_dir, batch),
        ParsedStatement::CardSummary(summary) => {
            let conn = open_migrated_connection(db_path)?;
            let metadata = json!({
                "source_path": source_file,
                "source_type": SOURCE_STATEMENT_PDF,
                "card_summary": summary.to_json(),
            });
            let job_id = begin_import_job(&conn, SOURCE_STATEMENT_PDF, source_file, &metadata)?;
            finish_import_job(&conn, &job_id, 0, 0, &[], 0)?;
            info!("recorded {} card statement summary from {source_file}", summary.bank_name);
            Ok(json!({
                "db_path": db_path.to_string_lossy().to_string(),
                "source_path": source_file,
                "source_type": SOURCE_STATEMENT_PDF,
                "bank_name": summary.bank_name,
                "imported_count": 0,
                "import_error_count": 0,
                "import_job_id": job_id,
                "preview": summary.to_json(),
                "error_samples": Vec::<String>::new(),
            }))
        }
    }
}

pub fn preview_statement_pdf(rules_dir: &Path, req: StatementFileRequest) -> LedgerResult<Value> {
    let source_path = resolve_source_path(req.source_path)?;
    let parsed = read_statement_pdf(Path::new(&source_path))?;
    preview_parsed_statement(&parsed, rules_dir)
}

pub fn import_statement_pdf_at_db_path(
    db_path: &Path,
    rules_dir: &Path,
    req: StatementFileRequest,
) -> LedgerResult<Value> {
    let source_path = resolve_source_path(req.source_path)?;
    let parsed = read_statement_pdf(Path::new(&source_path))?;
    import_parsed_statement(db_path, rules_dir, &parsed, &source_path)
}

/// ONE_TIME automatic payment for the card total, due at 09:00 on the statement's due date.
pub fn schedule_card_payment_from_summary(
    db_path: &Path,
    summary: &CardStatementSummary,
    account_id: &str,
) -> LedgerResult<Value> {
    let total_cents = summary.total_due_cents.ok_or_else(|| {
        LedgerError::Statement(format!("{} statement has no readable period total", summary.bank_name))
    })?;
    if total_cents <= 0 {
        return Err(LedgerError::validation("card statement total is zero, nothing to schedule"));
    }
    let payment_date = match &summary.due_date {
        Some(date) => format!("{date} 09:00:00"),
        None => Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    };
    upsert_automatic_transaction_at_db_path(
        db_path,
        AutomaticTransactionUpsertRequest {
            id: None,
            amount: Some(cents_to_text(-total_cents)),
            description: Some(format!("{} Kredi Kartı Ödemesi", summary.bank_name)),
            payment_date: Some(payment_date),
            account_id: Some(account_id.to_string()),
            repeat_period: Some("ONE_TIME".to_string()),
            is_active: Some(true),
        },
    )
}

pub fn schedule_card_payment_at_db_path(db_path: &Path, req: CardPaymentScheduleRequest) -> LedgerResult<Value> {
    let source_path = resolve_source_path(req.source_path)?;
    let account_id = req.account_id.unwrap_or_default().trim().to_string();
    if account_id.is_empty() {
        return Err(LedgerError::validation("account_id is required"));
    }
    match read_statement_pdf(Path::new(&source_path))? {
        ParsedStatement::CardSummary(summary) => schedule_card_payment_from_summary(db_path, &summary, &account_id),
        ParsedStatement::Transactions(_) => Err(LedgerError::validation(format!(
            "{source_path} is an account statement, not a credit-card statement"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_db::test_support::{migrated_db, seed};

    const VAKIF_ACCOUNT_TEXT: &str = "VAKIFBANK HESAP HAREKETLERİ\n\
        Tarih Fiş No Tutar Bakiye Açıklama\n\
        05.01.2026 09:15 100234 -125,50 4.874,50 MIGROS MARKET KADIKOY\n\
        05.01.2026 18:40 100235 -340,00 4.534,50 Restoran Çiya\n\
        31.01.2026 08:00 100301 45.000,00 49.534,50 Maaş Ödemesi   \n\
        Sayfa 1 / 1\n";

    #[test]
    fn account_statement_lines_become_rows() {
        let parsed = parse_statement_text(VAKIF_ACCOUNT_TEXT, "ocak.pdf").expect("parse");
        let ParsedStatement::Transactions(batch) = parsed else {
            panic!("expected transaction statement");
        };
        assert_eq!(batch.bank_name, "VakıfBank");
        assert_eq!(batch.rows.len(), 3);
        assert!(batch.errors.is_empty());
        let first = &batch.rows[0];
        assert_eq!(first.date, "2026-01-05");
        assert_eq!(first.time, "09:15");
        assert_eq!(first.receipt_no, "100234");
        assert_eq!(first.amount_cents, -12_550);
        assert_eq!(first.balance_cents, Some(487_450));
        assert_eq!(first.description, "MIGROS MARKET KADIKOY");
        assert_eq!(batch.rows[2].amount_cents, 4_500_000);
        assert_eq!(batch.rows[2].description, "Maaş Ödemesi");
    }

    #[test]
    fn dash_in_amount_column_is_reported_not_zeroed() {
        let text = "VAKIFBANK HESAP HAREKETLERİ\n\
            05.01.2026 09:15 100234 - 4.874,50 DEVIR\n\
            06.01.2026 10:00 100235 -125,50 4.749,00 MIGROS\n";
        let ParsedStatement::Transactions(batch) = parse_statement_text(text, "ocak.pdf").expect("parse") else {
            panic!("expected transaction statement");
        };
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].amount_cents, -12_550);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors[0].contains("100234"));
    }

    #[test]
    fn card_statements_yield_total_and_due_date() {
        let vakif = "VakıfBank Kredi Kartı Hesap Özeti\nDönem Borcunuz : 12,345.67\nSon Ödeme Tarihi: 20.02.2026\n";
        let ParsedStatement::CardSummary(summary) = parse_statement_text(vakif, "kart.pdf").expect("vakif") else {
            panic!("expected card summary");
        };
        assert_eq!(summary.total_due_cents, Some(1_234_567));
        assert_eq!(summary.due_date.as_deref(), Some("2026-02-20"));

        let bankkart = "Bankkart Ekstre\nDönem Borcu TL : 2.450,90 TL\nSon Ödeme Tarihi : 03/03/2026\n";
        let ParsedStatement::CardSummary(summary) = parse_statement_text(bankkart, "bk.pdf").expect("bankkart") else {
            panic!("expected card summary");
        };
        assert_eq!(summary.bank_name, "Bankkart");
        assert_eq!(summary.total_due_cents, Some(245_090));
        assert_eq!(summary.due_date.as_deref(), Some("2026-03-03"));
    }

    #[test]
    fn unknown_bank_and_empty_statement_are_errors() {
        let unsupported = parse_statement_text("Garanti BBVA hesap özeti", "x.pdf").expect_err("unsupported");
        assert_eq!(unsupported.category(), "UNSUPPORTED_BANK_ERROR");
        let empty = parse_statement_text("Bankkart hesap dökümü\nhareket yok", "y.pdf").expect_err("empty");
        assert_eq!(empty.category(), "NO_DATA_ERROR");
    }

    #[test]
    fn card_summary_import_records_job_and_schedules_payment() {
        let db_path = migrated_db("statement_pdf_card");
        let rules_dir = db_path.with_extension("rules");
        seed(
            &db_path,
            "INSERT INTO accounts(account_id, account_name, bank_name, balance_cents) VALUES ('acct_main', 'Maaş Hesabı', 'VakıfBank', 1000000);",
        );
        let text = "VakıfBank\nDönem Borcunuz : 1,500.25\nSon Ödeme Tarihi - 20.02.2026\n";
        let parsed = parse_statement_text(text, "kart.pdf").expect("parse");
        let imported = import_parsed_statement(&db_path, &rules_dir, &parsed, "kart.pdf").expect("import");
        assert_eq!(imported["imported_count"].as_i64(), Some(0));
        assert_eq!(imported["preview"]["kind"].as_str(), Some("card_summary"));

        let ParsedStatement::CardSummary(summary) = parsed else {
            panic!("expected card summary");
        };
        let scheduled = schedule_card_payment_from_summary(&db_path, &summary, "acct_main").expect("schedule");
        assert_eq!(scheduled["description"].as_str(), Some("VakıfBank Kredi Kartı Ödemesi"));
        assert_eq!(scheduled["amount_cents"].as_i64(), Some(-150_025));
        assert_eq!(scheduled["payment_date"].as_str(), Some("2026-02-20 09:00:00"));
        assert_eq!(scheduled["repeat_period"].as_str(), Some("ONE_TIME"));

        let missing_account = schedule_card_payment_from_summary(&db_path, &summary, "acct_nope");
        assert_eq!(missing_account.expect_err("missing account").category(), "NOT_FOUND_ERROR");
        let _ = std::fs::remove_dir_all(&rules_dir);
    }
}
