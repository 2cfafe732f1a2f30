//! Amount and date helpers shared by importers, reports and exports.
//!
//! Amounts are integer cents everywhere inside the crate. Statements use the Turkish
//! notation (`1.234,56`, `05.01.2026`), storage uses ISO dates.

use chrono::{Duration, NaiveDate};

use crate::errors::{LedgerError, LedgerResult};

fn invalid_amount(raw: &str) -> LedgerError {
    LedgerError::validation(format!("invalid amount format: {raw}"))
}

fn strip_currency_marks(raw: &str) -> String {
    raw.trim()
        .replace("TL", "")
        .replace("TRY", "")
        .replace('₺', "")
        .replace(' ', "")
        .replace('\u{00a0}', "")
}

/// Dot decimal separator, optional comma grouping, at most two fraction digits.
pub fn parse_amount_to_cents(raw: &str) -> LedgerResult<i64> {
    let mut s = strip_currency_marks(raw).replace(',', "");
    if s.is_empty() {
        return Err(invalid_amount(raw));
    }
    let negative = s.starts_with('-');
    if s.starts_with('-') || s.starts_with('+') {
        s = s[1..].to_string();
    }
    if s.is_empty() {
        return Err(invalid_amount(raw));
    }
    let parts = s.split('.').collect::<Vec<_>>();
    if parts.len() > 2 || parts.iter().all(|p| p.is_empty()) {
        return Err(invalid_amount(raw));
    }
    let int_part = if parts[0].is_empty() { "0" } else { parts[0] };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid_amount(raw));
    }
    let frac_part = if parts.len() == 2 { parts[1] } else { "" };
    if !frac_part.chars().all(|c| c.is_ascii_digit()) || frac_part.len() > 2 {
        return Err(invalid_amount(raw));
    }
    let int_val = int_part
        .parse::<i64>()
        .map_err(|_| LedgerError::validation(format!("amount out of range: {raw}")))?;
    let frac_val = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().map_err(|_| invalid_amount(raw))? * 10,
        _ => frac_part.parse::<i64>().map_err(|_| invalid_amount(raw))?,
    };
    let cents = int_val
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| LedgerError::validation(format!("amount out of range: {raw}")))?;
    Ok(if negative { -cents } else { cents })
}

/// Turkish notation: `.` groups thousands, `,` separates decimals.
pub fn parse_tr_amount_to_cents(raw: &str) -> LedgerResult<i64> {
    let s = strip_currency_marks(raw).replace('.', "").replace(',', ".");
    parse_amount_to_cents(&s).map_err(|_| invalid_amount(raw))
}

/// Picks the notation from whichever separator comes last.
///
/// `1.234,56` is Turkish, `1,234.56` and `-42.5` are dot-decimal. Spreadsheet floats with
/// representation noise (`12.340000000000002`) are rounded to the nearest cent.
pub fn parse_flexible_amount_to_cents(raw: &str) -> LedgerResult<i64> {
    let s = strip_currency_marks(raw);
    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');
    let turkish = match (last_comma, last_dot) {
        (Some(c), Some(d)) => c > d,
        (Some(c), None) => s.len() - c - 1 <= 2,
        _ => false,
    };
    if turkish {
        return parse_tr_amount_to_cents(&s);
    }
    match parse_amount_to_cents(&s) {
        Ok(v) => Ok(v),
        Err(err) => match s.replace(',', "").parse::<f64>() {
            Ok(v) => cents_from_f64(v).map_err(|_| err),
            Err(_) => Err(err),
        },
    }
}

pub fn cents_from_f64(value: f64) -> LedgerResult<i64> {
    if !value.is_finite() || value.abs() > (i64::MAX / 100) as f64 {
        return Err(LedgerError::validation(format!("amount out of range: {value}")));
    }
    Ok((value * 100.0).round() as i64)
}

/// `-1234.56`
pub fn cents_to_text(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

pub fn cents_to_value(cents: i64) -> f64 {
    round_to(cents as f64 / 100.0, 2)
}

/// `-1.234,56`
pub fn format_tr_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let int_text = (abs / 100).to_string();
    let mut grouped = String::with_capacity(int_text.len() + int_text.len() / 3);
    for (i, ch) in int_text.chars().enumerate() {
        if i > 0 && (int_text.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped},{:02}", abs % 100)
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round() / factor
}

/// `dd.MM.yyyy` or `dd/MM/yyyy`.
pub fn parse_tr_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    NaiveDate::parse_from_str(text, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .ok()
}

pub fn format_tr_date(iso: &str) -> String {
    NaiveDate::parse_from_str(iso, "%Y-%m-%d")
        .map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|_| iso.to_string())
}

/// Accepts ISO (optionally with a time part), Turkish dotted/slashed dates and Excel
/// serial day numbers. Returns `YYYY-MM-DD`.
pub fn normalize_date_flexible(raw: &str) -> LedgerResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(LedgerError::validation("date is required"));
    }
    let head = text.get(..10).unwrap_or(text);
    if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        return Ok(date.format("%Y-%m-%d").to_string());
    }
    if let Some(date) = parse_tr_date(head) {
        return Ok(date.format("%Y-%m-%d").to_string());
    }

    let unsupported = || LedgerError::validation(format!("unsupported date format: {raw}"));
    let number = text.parse::<f64>().map_err(|_| unsupported())?;
    if !number.is_finite() || number <= 0.0 || number > 2_958_465.0 {
        return Err(unsupported());
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30).ok_or_else(unsupported)?;
    let date = base
        .checked_add_signed(Duration::days(number.floor() as i64))
        .ok_or_else(unsupported)?;
    Ok(date.format("%Y-%m-%d").to_string())
}

pub fn month_key(iso_date: &str) -> String {
    iso_date.get(..7).unwrap_or(iso_date).to_string()
}

/// `YYYY-MM` with a real month number.
pub fn validate_month_key(raw: &str) -> LedgerResult<String> {
    let text = raw.trim();
    NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d")
        .map(|_| text.to_string())
        .map_err(|_| LedgerError::validation(format!("month must be YYYY-MM: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turkish_and_dot_amounts_parse_to_the_same_cents() {
        assert_eq!(parse_tr_amount_to_cents("-1.234,56").expect("tr"), -123_456);
        assert_eq!(parse_tr_amount_to_cents("250,00 TL").expect("tr tl"), 25_000);
        assert_eq!(parse_amount_to_cents("1,234.56").expect("dot"), 123_456);
        assert_eq!(parse_amount_to_cents("+7.5").expect("plus"), 750);
        assert!(parse_amount_to_cents("12.345").is_err());
        assert!(parse_amount_to_cents("abc").is_err());
    }

    #[test]
    fn bare_sign_or_separator_is_not_an_amount() {
        for raw in ["-", "+", ".", "-.", " - TL"] {
            assert!(parse_amount_to_cents(raw).is_err(), "dot parser accepted {raw:?}");
        }
        for raw in ["-", "+", ",", "-,"] {
            assert!(parse_tr_amount_to_cents(raw).is_err(), "tr parser accepted {raw:?}");
            assert!(parse_flexible_amount_to_cents(raw).is_err(), "flexible parser accepted {raw:?}");
        }
        assert!(parse_flexible_amount_to_cents(".").is_err());
        assert_eq!(parse_amount_to_cents(".5").expect("leading dot"), 50);
        assert_eq!(parse_amount_to_cents("-5.").expect("trailing dot"), -500);
    }

    #[test]
    fn flexible_parser_picks_notation_from_last_separator() {
        assert_eq!(parse_flexible_amount_to_cents("1.234,56").expect("tr"), 123_456);
        assert_eq!(parse_flexible_amount_to_cents("-45,5").expect("tr short"), -4_550);
        assert_eq!(parse_flexible_amount_to_cents("1,234.56").expect("dot"), 123_456);
        assert_eq!(parse_flexible_amount_to_cents("-42.5").expect("float"), -4_250);
        assert_eq!(
            parse_flexible_amount_to_cents("12.340000000000002").expect("noise"),
            1_234
        );
        assert_eq!(parse_flexible_amount_to_cents("1500").expect("int"), 150_000);
    }

    #[test]
    fn money_formatting_handles_sign_and_grouping() {
        assert_eq!(cents_to_text(-5), "-0.05");
        assert_eq!(cents_to_text(123_456), "1234.56");
        assert_eq!(format_tr_money(-123_456_789), "-1.234.567,89");
        assert_eq!(format_tr_money(99), "0,99");
        assert_eq!(format_tr_money(100_000), "1.000,00");
    }

    #[test]
    fn dates_normalize_from_statement_formats() {
        assert_eq!(normalize_date_flexible("05.01.2026").expect("dotted"), "2026-01-05");
        assert_eq!(normalize_date_flexible("05/01/2026").expect("slashed"), "2026-01-05");
        assert_eq!(
            normalize_date_flexible("2026-01-05T00:00:00").expect("iso time"),
            "2026-01-05"
        );
        assert_eq!(normalize_date_flexible("46027").expect("serial"), "2026-01-05");
        assert!(normalize_date_flexible("Tarih").is_err());
        assert_eq!(format_tr_date("2026-01-05"), "05.01.2026");
        assert_eq!(month_key("2026-01-05"), "2026-01");
        assert!(validate_month_key("2026-13").is_err());
        assert_eq!(validate_month_key("2026-02").expect("month"), "2026-02");
    }
}
