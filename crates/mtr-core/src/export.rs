use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, warn};

use crate::records::ManifestExportRecord;

/// Header names of the portal's export report.
pub mod columns {
    pub const MANIFEST: &str = "MTR Nº";
    pub const SITUATION: &str = "Situação";
    pub const OBSERVATIONS: &str = "Observações";
    pub const GENERATOR_NAME: &str = "Gerador Nome";
    pub const GENERATOR_TAX_ID: &str = "Gerador CPF/CNPJ";
    pub const TRANSPORTER_NAME: &str = "Transportador Nome";
    pub const TRANSPORTER_TAX_ID: &str = "Transportador CPF/CNPJ";
    pub const DRIVER: &str = "Motorista";
    pub const PLATE: &str = "Placa";
    pub const RESIDUE: &str = "Residuo código/descrição";
    pub const CLASS: &str = "Classe";
    pub const ISSUED_ON: &str = "Data de Emissão";
    pub const DECLARED_TONS: &str = "Qt. tonelada";
    pub const TECHNOLOGY: &str = "Tecnologia";
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("workbook could not be opened: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook has no sheets")]
    NoSheets,
    #[error("required column '{0}' is missing")]
    MissingColumn(&'static str),
}

/// Parses the downloaded export (xls or xlsx) into manifest records.
///
/// Only the manifest number, situation and observation columns are required;
/// other missing columns are logged and read as empty.
pub fn parse_manifest_export(bytes: &[u8]) -> Result<Vec<ManifestExportRecord>, ExportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Err(ExportError::NoSheets),
    };
    records_from_range(&range)
}

fn records_from_range(range: &Range<Data>) -> Result<Vec<ManifestExportRecord>, ExportError> {
    let headers = HeaderIndex::from_range(range);

    let manifest_idx = headers.require(columns::MANIFEST)?;
    let situation_idx = headers.require(columns::SITUATION)?;
    let observations_idx = headers.require(columns::OBSERVATIONS)?;
    let optional = |name: &'static str| {
        let idx = headers.get(name);
        if idx.is_none() {
            warn!(column = name, "export column missing; values will be empty");
        }
        idx
    };
    let generator_name_idx = optional(columns::GENERATOR_NAME);
    let generator_tax_idx = optional(columns::GENERATOR_TAX_ID);
    let transporter_name_idx = optional(columns::TRANSPORTER_NAME);
    let transporter_tax_idx = optional(columns::TRANSPORTER_TAX_ID);
    let driver_idx = optional(columns::DRIVER);
    let plate_idx = optional(columns::PLATE);
    let residue_idx = optional(columns::RESIDUE);
    let class_idx = optional(columns::CLASS);
    let issued_idx = optional(columns::ISSUED_ON);
    let declared_idx = optional(columns::DECLARED_TONS);
    let technology_idx = optional(columns::TECHNOLOGY);

    let mut records = Vec::new();
    for row in range.rows().skip(1) {
        let text = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(cell_text);

        let Some(manifest) = text(Some(manifest_idx)) else {
            continue;
        };

        records.push(ManifestExportRecord {
            manifest,
            situation: text(Some(situation_idx)),
            observations: text(Some(observations_idx)),
            generator_name: text(generator_name_idx),
            generator_tax_id: text(generator_tax_idx),
            transporter_name: text(transporter_name_idx),
            transporter_tax_id: text(transporter_tax_idx),
            driver: text(driver_idx),
            plate: text(plate_idx),
            residue: text(residue_idx),
            waste_class: text(class_idx),
            issued_on: issued_idx.and_then(|i| row.get(i)).and_then(cell_date),
            declared_tons: declared_idx.and_then(|i| row.get(i)).and_then(cell_f64),
            technology: text(technology_idx),
        });
    }

    debug!(rows = records.len(), "parsed manifest export");
    Ok(records)
}

/// Column positions keyed by trimmed header text (first row of a sheet).
pub(crate) struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    pub(crate) fn from_range(range: &Range<Data>) -> Self {
        let map = range
            .rows()
            .next()
            .map(|header| {
                header
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, cell)| cell_text(cell).map(|name| (name, idx)))
                    .collect()
            })
            .unwrap_or_default();
        Self(map)
    }

    pub(crate) fn get(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    fn require(&self, name: &'static str) -> Result<usize, ExportError> {
        self.get(name).ok_or(ExportError::MissingColumn(name))
    }
}

pub(crate) fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => {
            value.trim().to_string()
        }
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => value.as_datetime()?.to_string(),
        Data::Error(_) | Data::Empty => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub(crate) fn cell_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(value) => Some(*value),
        Data::Int(value) => Some(*value as f64),
        Data::String(value) => value.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

pub(crate) fn cell_i64(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(value) => Some(*value),
        Data::Float(value) if value.fract() == 0.0 => Some(*value as i64),
        Data::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn cell_datetime(cell: &Data) -> Option<NaiveDateTime> {
    match cell {
        Data::DateTime(value) => value.as_datetime().filter(in_workbook_range),
        Data::DateTimeIso(value) | Data::String(value) => parse_datetime_text(value),
        _ => None,
    }
}

pub(crate) fn cell_date(cell: &Data) -> Option<NaiveDate> {
    cell_datetime(cell).map(|value| value.date())
}

const DATETIME_FORMATS: [&str; 6] = [
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DATE_FORMATS: [&str; 2] = ["%d/%m/%Y", "%Y-%m-%d"];

/// Years a spreadsheet date cell can hold.
const WORKBOOK_YEARS: std::ops::RangeInclusive<i32> = 1900..=9999;

fn in_workbook_range(value: &NaiveDateTime) -> bool {
    WORKBOOK_YEARS.contains(&value.year())
}

/// Day-first (portal) and ISO forms; anything else is treated as missing.
/// `%Y` also takes years like `224` or `20244`, so those are dropped too.
pub fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .filter(in_workbook_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_and_iso_dates_parse() {
        let expected = NaiveDate::from_ymd_opt(2024, 4, 28)
            .and_then(|date| date.and_hms_opt(0, 0, 0));
        assert_eq!(parse_datetime_text("28/04/2024"), expected);
        assert_eq!(parse_datetime_text(" 2024-04-28 "), expected);
        assert!(parse_datetime_text("01/05/2024 10:30").is_some());
    }

    #[test]
    fn years_outside_workbook_range_are_missing() {
        assert_eq!(parse_datetime_text("28/04/224"), None);
        assert_eq!(parse_datetime_text("28/04/20244"), None);
        assert_eq!(parse_datetime_text("0224-04-28 10:00:00"), None);
        assert_eq!(parse_datetime_text("31/12/1899"), None);
    }
}
