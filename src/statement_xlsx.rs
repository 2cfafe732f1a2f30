use calamine::{open_workbook_auto, Reader};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use walkdir::WalkDir;

use crate::errors::{LedgerError, LedgerResult};
use crate::money::{normalize_date_flexible, parse_flexible_amount_to_cents};
use crate::rules::load_category_rules;
use crate::statement_import::{build_preview, import_statement_batch, StatementBatch, StatementRow};
use crate::statement_pdf::{import_parsed_statement, read_statement_pdf, resolve_source_path, StatementFileRequest};

pub const SOURCE_STATEMENT_XLSX: &str = "statement_xlsx";
pub const SPREADSHEET_BANK_NAME: &str = "Bankkart";

const HEADER_DATE: &str = "tarih";
const HEADER_RECEIPT: &str = "fiş no";
const HEADER_DESCRIPTION: &str = "açıklama";

fn trim_cell(value: &str) -> String {
    value.replace('\u{a0}', " ").trim().to_string()
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn read_csv_rows(path: &Path) -> LedgerResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec?;
        rows.push(rec.iter().map(trim_cell).collect());
    }
    Ok(rows)
}

fn read_xlsx_rows(path: &Path) -> LedgerResult<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| LedgerError::Spreadsheet(format!("open {}: {e}", path.display())))?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LedgerError::Spreadsheet(format!("{} has no worksheet", path.display())))?;
    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| LedgerError::Spreadsheet(format!("read sheet {first_sheet}: {e}")))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|c| trim_cell(&c.to_string())).collect::<Vec<_>>())
        .collect())
}

fn is_header_row(date: &str, receipt: &str, description: &str) -> bool {
    date.to_lowercase() == HEADER_DATE
        && receipt.to_lowercase() == HEADER_RECEIPT
        && description.to_lowercase() == HEADER_DESCRIPTION
}

/// Columns are date, receipt no, description, amount, balance. The first row is a header;
/// repeated headers and rows missing a date, amount or description are skipped.
pub fn parse_statement_rows(rows: &[Vec<String>], source_file: &str) -> StatementBatch {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for (idx, row) in rows.iter().enumerate().skip(1) {
        let line_no = idx + 1;
        let date_raw = cell(row, 0);
        let receipt_no = cell(row, 1);
        let description = cell(row, 2);
        let amount_raw = cell(row, 3);
        let balance_raw = cell(row, 4);
        if date_raw.is_empty() || amount_raw.is_empty() || description.is_empty() {
            continue;
        }
        if is_header_row(date_raw, receipt_no, description) {
            continue;
        }

        let date = match normalize_date_flexible(date_raw) {
            Ok(d) => d,
            Err(e) => {
                errors.push(format!("row {line_no}: {e}"));
                continue;
            }
        };
        let amount_cents = match parse_flexible_amount_to_cents(amount_raw) {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("row {line_no}: {e}"));
                continue;
            }
        };
        let balance_cents = if balance_raw.is_empty() {
            None
        } else {
            match parse_flexible_amount_to_cents(balance_raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    errors.push(format!("row {line_no}: balance {e}"));
                    continue;
                }
            }
        };
        parsed.push(StatementRow {
            date,
            time: String::new(),
            receipt_no: receipt_no.to_string(),
            description: description.to_string(),
            amount_cents,
            balance_cents,
        });
    }
    StatementBatch {
        source_type: SOURCE_STATEMENT_XLSX,
        source_file: source_file.to_string(),
        bank_name: SPREADSHEET_BANK_NAME.to_string(),
        rows: parsed,
        errors,
    }
}

fn file_suffix(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn read_statement_sheet(path: &Path) -> LedgerResult<StatementBatch> {
    if !path.is_file() {
        return Err(LedgerError::validation(format!("statement file not found: {}", path.display())));
    }
    let rows = match file_suffix(path).as_str() {
        "csv" => read_csv_rows(path)?,
        "xlsx" | "xls" | "ods" => read_xlsx_rows(path)?,
        other => {
            return Err(LedgerError::validation(format!(
                "unsupported spreadsheet format: .{other} (expected .xlsx or .csv)"
            )))
        }
    };
    let batch = parse_statement_rows(&rows, &path.to_string_lossy());
    if batch.rows.is_empty() && batch.errors.is_empty() {
        return Err(LedgerError::NoData(format!("no transaction rows in {}", path.display())));
    }
    Ok(batch)
}

pub fn preview_statement_sheet(rules_dir: &Path, req: StatementFileRequest) -> LedgerResult<Value> {
    let source_path = resolve_source_path(req.source_path)?;
    let batch = read_statement_sheet(Path::new(&source_path))?;
    Ok(build_preview(&batch, &load_category_rules(rules_dir)?))
}

pub fn import_statement_sheet_at_db_path(
    db_path: &Path,
    rules_dir: &Path,
    req: StatementFileRequest,
) -> LedgerResult<Value> {
    let source_path = resolve_source_path(req.source_path)?;
    let batch = read_statement_sheet(Path::new(&source_path))?;
    import_statement_batch(db_path, rules_dir, &batch)
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryImportRequest {
    pub source_dir: Option<String>,
    pub recursive: Option<bool>,
}

fn import_one_file(db_path: &Path, rules_dir: &Path, path: &Path) -> LedgerResult<Value> {
    let source = path.to_string_lossy().to_string();
    match file_suffix(path).as_str() {
        "pdf" => {
            let parsed = read_statement_pdf(path)?;
            import_parsed_statement(db_path, rules_dir, &parsed, &source)
        }
        _ => {
            let batch = read_statement_sheet(path)?;
            import_statement_batch(db_path, rules_dir, &batch)
        }
    }
}

/// Imports every .pdf/.xlsx/.csv statement under `source_dir`. A failing file is reported
/// and the walk moves on.
pub fn import_directory_at_db_path(
    db_path: &Path,
    rules_dir: &Path,
    req: DirectoryImportRequest,
) -> LedgerResult<Value> {
    let source_dir = req.source_dir.unwrap_or_default().trim().to_string();
    if source_dir.is_empty() {
        return Err(LedgerError::validation("source_dir is required"));
    }
    let root = Path::new(&source_dir);
    if !root.is_dir() {
        return Err(LedgerError::validation(format!("not a directory: {source_dir}")));
    }
    let max_depth = if req.recursive.unwrap_or(false) { usize::MAX } else { 1 };

    let mut files = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches!(file_suffix(p).as_str(), "pdf" | "xlsx" | "csv"))
        .collect::<Vec<_>>();
    files.sort();

    let mut results = Vec::new();
    let mut imported_total = 0_i64;
    let mut failed_files = 0_usize;
    for path in &files {
        match import_one_file(db_path, rules_dir, path) {
            Ok(out) => {
                imported_total += out["imported_count"].as_i64().unwrap_or(0);
                results.push(json!({
                    "path": path.to_string_lossy().to_string(),
                    "ok": true,
                    "bank_name": out["bank_name"],
                    "imported_count": out["imported_count"],
                    "import_error_count": out["import_error_count"],
                    "import_job_id": out["import_job_id"],
                }));
            }
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                failed_files += 1;
                results.push(json!({
                    "path": path.to_string_lossy().to_string(),
                    "ok": false,
                    "error": { "category": err.category(), "message": err.to_string() },
                }));
            }
        }
    }
    info!(
        "directory import {source_dir}: {} files, {imported_total} rows, {failed_files} failed",
        files.len()
    );
    Ok(json!({
        "source_dir": source_dir,
        "file_count": files.len(),
        "failed_file_count": failed_files,
        "imported_count": imported_total,
        "files": results,
    }))
}
