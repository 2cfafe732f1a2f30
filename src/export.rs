use chrono::NaiveDateTime;
use csv::WriterBuilder;
use log::info;
use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Point,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::errors::{IoContext, LedgerError, LedgerResult};
use crate::ledger_db::open_migrated_connection;
use crate::money::{format_tr_date, format_tr_money};
use crate::transactions::{load_transactions, TransactionFilter, TransactionRecord};

pub const EXPORT_HEADERS: [&str; 8] = ["Tarih", "Saat", "İşlem No", "Tutar", "Bakiye", "Açıklama", "Banka", "Kategori"];

const PAGE_WIDTH_MM: f32 = 297.0;
const PAGE_HEIGHT_MM: f32 = 210.0;
const MARGIN_MM: f32 = 12.0;
const ROW_HEIGHT_MM: f32 = 5.5;
const COLUMN_X_MM: [f32; 8] = [12.0, 34.0, 50.0, 84.0, 112.0, 140.0, 222.0, 256.0];
const DESCRIPTION_MAX_CHARS: usize = 48;

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    pub output_path: Option<String>,
    pub bank_name: Option<String>,
}

fn resolve_output_path(raw: Option<String>) -> LedgerResult<PathBuf> {
    let text = raw.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err(LedgerError::validation("output_path is required"));
    }
    let path = PathBuf::from(text);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).io_context(&format!("create {}", parent.display()))?;
    }
    Ok(path)
}

fn load_export_rows(db_path: &Path, bank_name: Option<String>) -> LedgerResult<Vec<TransactionRecord>> {
    let filter = TransactionFilter {
        bank_name: bank_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        ..Default::default()
    };
    let conn = open_migrated_connection(db_path)?;
    let rows = load_transactions(&conn, &filter)?;
    if rows.is_empty() {
        return Err(LedgerError::NoData(match &filter.bank_name {
            Some(bank) => format!("no transactions to export for {bank}"),
            None => "no transactions to export".to_string(),
        }));
    }
    Ok(rows)
}

fn export_cells(rec: &TransactionRecord) -> [String; 8] {
    let reference = if rec.receipt_no.is_empty() {
        rec.id.clone()
    } else {
        rec.receipt_no.clone()
    };
    [
        format_tr_date(&rec.date),
        rec.time.clone(),
        reference,
        format_tr_money(rec.amount_cents),
        rec.balance_cents.map(format_tr_money).unwrap_or_default(),
        rec.description.clone(),
        rec.bank_name.clone(),
        rec.category.display_name().to_string(),
    ]
}

pub fn export_transactions_csv_at_db_path(db_path: &Path, req: ExportRequest) -> LedgerResult<Value> {
    let path = resolve_output_path(req.output_path)?;
    let rows = load_export_rows(db_path, req.bank_name)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_path(&path)?;
    writer.write_record(EXPORT_HEADERS)?;
    for rec in &rows {
        writer.write_record(export_cells(rec))?;
    }
    writer.flush().io_context(&format!("flush {}", path.display()))?;
    info!("exported {} transactions to {}", rows.len(), path.display());
    Ok(json!({
        "path": path.to_string_lossy().to_string(),
        "format": "csv",
        "row_count": rows.len(),
    }))
}

/// Builtin PDF fonts only cover Latin-1; Turkish letters are mapped to their ASCII base.
pub fn transliterate_for_pdf(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ç' => 'c',
            'Ç' => 'C',
            'ğ' => 'g',
            'Ğ' => 'G',
            'ı' => 'i',
            'İ' => 'I',
            'ö' => 'o',
            'Ö' => 'O',
            'ş' => 's',
            'Ş' => 'S',
            'ü' => 'u',
            'Ü' => 'U',
            '₺' => 'L',
            c if c.is_ascii() => c,
            _ => '?',
        })
        .collect()
}

fn clip_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out = text.chars().take(max.saturating_sub(3)).collect::<String>();
    out.push_str("...");
    out
}

fn pdf_error(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Export(e.to_string())
}

struct PdfFonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

fn add_text(layer: &PdfLayerReference, font: &IndirectFontRef, x: f32, y: f32, size: f32, text: &str) {
    layer.use_text(transliterate_for_pdf(text), size, Mm(x), Mm(y), font);
}

fn draw_rule(layer: &PdfLayerReference, y: f32) {
    layer.add_line(Line {
        points: vec![
            (Point::new(Mm(MARGIN_MM), Mm(y)), false),
            (Point::new(Mm(PAGE_WIDTH_MM - MARGIN_MM), Mm(y)), false),
        ],
        is_closed: false,
    });
}

fn draw_table_header(layer: &PdfLayerReference, fonts: &PdfFonts, y: f32) -> f32 {
    for (x, header) in COLUMN_X_MM.iter().zip(EXPORT_HEADERS) {
        add_text(layer, &fonts.bold, *x, y, 9.0, header);
    }
    draw_rule(layer, y - 2.0);
    y - ROW_HEIGHT_MM - 1.0
}

fn new_page(doc: &PdfDocumentReference, page_no: usize) -> PdfLayerReference {
    let (page, layer) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), format!("Sayfa {page_no}"));
    doc.get_page(page).get_layer(layer)
}

pub fn export_transactions_pdf_at_db_path(
    db_path: &Path,
    req: ExportRequest,
    generated_at: NaiveDateTime,
) -> LedgerResult<Value> {
    let path = resolve_output_path(req.output_path)?;
    let rows = load_export_rows(db_path, req.bank_name)?;

    let title = "İşlem Geçmişi";
    let (doc, first_page, first_layer) =
        PdfDocument::new(transliterate_for_pdf(title), Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Sayfa 1");
    let fonts = PdfFonts {
        regular: doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?,
        bold: doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?,
    };

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut page_count = 1_usize;
    let top = PAGE_HEIGHT_MM - MARGIN_MM;
    add_text(&layer, &fonts.bold, MARGIN_MM, top, 16.0, title);
    add_text(
        &layer,
        &fonts.regular,
        MARGIN_MM,
        top - 7.0,
        9.0,
        &format!("Oluşturulma Tarihi: {}", generated_at.format("%d.%m.%Y %H:%M:%S")),
    );
    let mut y = draw_table_header(&layer, &fonts, top - 16.0);

    for rec in &rows {
        if y < MARGIN_MM + ROW_HEIGHT_MM {
            page_count += 1;
            layer = new_page(&doc, page_count);
            y = draw_table_header(&layer, &fonts, top);
        }
        let mut cells = export_cells(rec);
        cells[2] = clip_chars(&cells[2], 14);
        cells[5] = clip_chars(&cells[5], DESCRIPTION_MAX_CHARS);
        cells[6] = clip_chars(&cells[6], 16);
        for (x, cell) in COLUMN_X_MM.iter().zip(cells.iter()) {
            add_text(&layer, &fonts.regular, *x, y, 8.0, cell);
        }
        y -= ROW_HEIGHT_MM;
    }

    let file = File::create(&path).io_context(&format!("create {}", path.display()))?;
    doc.save(&mut BufWriter::new(file)).map_err(pdf_error)?;
    info!("exported {} transactions to {} ({page_count} pages)", rows.len(), path.display());
    Ok(json!({
        "path": path.to_string_lossy().to_string(),
        "format": "pdf",
        "row_count": rows.len(),
        "pages": page_count,
    }))
}
