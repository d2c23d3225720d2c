//! Masking and number formatting helpers shared by the report and the portal flows.

use once_cell::sync::Lazy;
use regex::Regex;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit regex"));

/// Formats a CPF (11 digits) or CNPJ (14 digits) with its canonical punctuation.
///
/// Empty input yields `None`; any other digit count is returned unchanged.
pub fn mask_tax_id(value: Option<&str>) -> Option<String> {
    let value = value?;
    if value.trim().is_empty() {
        return None;
    }

    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        11 => Some(format!(
            "{}.{}.{}-{}",
            &digits[..3],
            &digits[3..6],
            &digits[6..9],
            &digits[9..]
        )),
        14 => Some(format!(
            "{}.{}.{}/{}-{}",
            &digits[..2],
            &digits[2..5],
            &digits[5..8],
            &digits[8..12],
            &digits[12..]
        )),
        _ => Some(value.to_string()),
    }
}

/// First run of digits in a free-text observation, read as an invoice number.
pub fn extract_invoice_number(text: &str) -> Option<i64> {
    DIGIT_RUN
        .find(text)
        .and_then(|found| found.as_str().parse().ok())
}

/// Weight as typed into the portal's measured-weight input: 5 decimals, comma separator.
pub fn format_portal_weight(tons: f64) -> String {
    format!("{tons:.5}").replace('.', ",")
}

/// Reads the portal's computed weight cell, e.g. `"2,400 (Ton)"`.
pub fn parse_portal_weight(text: &str) -> Option<f64> {
    text.replace("(Ton)", "")
        .trim()
        .replace(',', ".")
        .parse()
        .ok()
}
