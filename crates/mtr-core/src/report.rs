//! The reconciliation report: one xlsx file that is written after
//! reconciliation and rewritten after every received manifest.
//!
//! The file is a pure sink. Highlighting is derived from the rows (status and
//! [`CorrectionAssessment`]) every time the workbook is written, and reading a
//! report back re-runs the same assessment.

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rust_xlsxwriter::{
    Color, ExcelDateTime, Format, Table, TableColumn, TableStyle, Workbook, XlsxError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::correction::{CorrectionAssessment, WasteDefaults};
use crate::export::{cell_date, cell_datetime, cell_f64, cell_i64, cell_text, HeaderIndex};
use crate::records::{ReconciledRow, RowStatus};

pub const SHEET_NAME: &str = "MTR";
pub const TABLE_NAME: &str = "TabelaMTR";

const FLAGGED_FILL: u32 = 0xFFFF00;
const SENT_FILL: u32 = 0xC6EFCE;
const ERROR_FILL: u32 = 0xFFC7CE;

const DATE_FORMAT: &str = "dd/mm/yyyy";
const TIMESTAMP_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Report headers, in column order.
pub mod columns {
    pub const STATUS: &str = "Status";
    pub const WEIGHED_AT: &str = "Balança Data e Hora Pesagem";
    pub const INVOICE: &str = "Nota fiscal";
    pub const MANIFEST: &str = "MTR Nº";
    pub const SCALE_PLATE: &str = "Balança Placa";
    pub const CORRECTION: &str = "Correção MTR";
    pub const RESIDUE_CODE: &str = "MTR Residuo Código";
    pub const CLASS: &str = "MTR Classe";
    pub const WEIGHT_TONS: &str = "Balança Qt. Tonelada";
    pub const GENERATOR_NAME: &str = "MTR Gerador Nome";
    pub const GENERATOR_TAX_ID: &str = "MTR Gerador CPF/CNPJ";
    pub const TRANSPORTER_NAME: &str = "MTR Transportador Nome";
    pub const TRANSPORTER_TAX_ID: &str = "MTR Transportador CPF/CNPJ";
    pub const DRIVER: &str = "MTR Motorista";
    pub const MANIFEST_PLATE: &str = "MTR Placa";
    pub const ISSUED_ON: &str = "MTR Data de Emissão";
    pub const DECLARED_TONS: &str = "MTR Qt. Tonelada";
    pub const OBSERVATIONS: &str = "MTR Observações";
    pub const TECHNOLOGY: &str = "MTR Tecnologia";
    pub const TICKET: &str = "Balança Ticket";
    pub const ISSUER: &str = "Balança Emissor";
    pub const PRODUCT: &str = "Balança Produto";
    pub const SCALE_NOTE: &str = "Balança Observação";

    pub const ALL: [&str; 23] = [
        STATUS,
        WEIGHED_AT,
        INVOICE,
        MANIFEST,
        SCALE_PLATE,
        CORRECTION,
        RESIDUE_CODE,
        CLASS,
        WEIGHT_TONS,
        GENERATOR_NAME,
        GENERATOR_TAX_ID,
        TRANSPORTER_NAME,
        TRANSPORTER_TAX_ID,
        DRIVER,
        MANIFEST_PLATE,
        ISSUED_ON,
        DECLARED_TONS,
        OBSERVATIONS,
        TECHNOLOGY,
        TICKET,
        ISSUER,
        PRODUCT,
        SCALE_NOTE,
    ];

    /// Kept in the file for reference but hidden from the operator.
    pub const HIDDEN: [&str; 13] = [
        GENERATOR_TAX_ID,
        TRANSPORTER_NAME,
        TRANSPORTER_TAX_ID,
        DRIVER,
        MANIFEST_PLATE,
        ISSUED_ON,
        DECLARED_TONS,
        OBSERVATIONS,
        TECHNOLOGY,
        TICKET,
        ISSUER,
        PRODUCT,
        SCALE_NOTE,
    ];
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report could not be read: {0}")]
    Calamine(#[from] calamine::Error),
    #[error("report could not be written: {0}")]
    Xlsx(#[from] XlsxError),
    #[error("report I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("report column '{0}' is missing")]
    MissingColumn(&'static str),
    #[error("report has no sheets")]
    NoSheets,
}

/// Identifies one report row: its position in the sheet and the manifest
/// expected there. One manifest can span several rows when invoices fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    pub position: usize,
    pub manifest: String,
}

impl RowKey {
    pub fn new(position: usize, manifest: impl Into<String>) -> Self {
        Self {
            position,
            manifest: manifest.into(),
        }
    }
}

/// Owns the report file and the rows it holds.
#[derive(Debug, Clone)]
pub struct ReportStore {
    path: PathBuf,
    defaults: WasteDefaults,
    rows: Vec<ReconciledRow>,
}

impl ReportStore {
    pub fn new(path: impl Into<PathBuf>, defaults: WasteDefaults, rows: Vec<ReconciledRow>) -> Self {
        Self {
            path: path.into(),
            defaults,
            rows,
        }
    }

    /// Reads an existing report. `MTR Nº` is the only column that must exist.
    pub fn load(path: impl Into<PathBuf>, defaults: WasteDefaults) -> Result<Self, ReportError> {
        let path = path.into();
        let range = read_sheet(&path)?;
        let headers = HeaderIndex::from_range(&range);
        if headers.get(columns::MANIFEST).is_none() {
            return Err(ReportError::MissingColumn(columns::MANIFEST));
        }
        if headers.get(columns::STATUS).is_none() {
            warn!(path = %path.display(), "report has no Status column; status derived from weighing");
        }

        let rows = rows_from_range(&range, &headers, &defaults);
        debug!(path = %path.display(), rows = rows.len(), "report loaded");
        Ok(Self {
            path,
            defaults,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &WasteDefaults {
        &self.defaults
    }

    pub fn rows(&self) -> &[ReconciledRow] {
        &self.rows
    }

    /// Rows still waiting to be received on the portal.
    pub fn open_rows(&self) -> Vec<ReconciledRow> {
        self.rows
            .iter()
            .filter(|row| row.status == RowStatus::Open)
            .cloned()
            .collect()
    }

    /// Open rows together with the key that addresses each of them.
    pub fn open_entries(&self) -> Vec<(RowKey, ReconciledRow)> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.status == RowStatus::Open)
            .map(|(position, row)| (RowKey::new(position, row.manifest.clone()), row.clone()))
            .collect()
    }

    pub fn save(&self) -> Result<(), ReportError> {
        write_report(&self.path, &self.rows, &self.defaults)?;
        info!(path = %self.path.display(), rows = self.rows.len(), "report saved");
        Ok(())
    }

    /// Re-reads the file, sets the status of the row at `key` and writes it
    /// back. Returns `Ok(false)` when nothing could be updated.
    pub fn update_row_status(&mut self, key: &RowKey, status: RowStatus) -> Result<bool, ReportError> {
        let manifest = key.manifest.as_str();
        let position = key.position;
        let range = read_sheet(&self.path)?;
        let headers = HeaderIndex::from_range(&range);
        for required in [columns::MANIFEST, columns::STATUS] {
            if headers.get(required).is_none() {
                warn!(
                    path = %self.path.display(),
                    column = required,
                    manifest,
                    "report column missing; status not updated"
                );
                return Ok(false);
            }
        }

        let mut rows = rows_from_range(&range, &headers, &self.defaults);
        let Some(row) = rows
            .get_mut(position)
            .filter(|row| row.manifest == manifest)
        else {
            warn!(manifest, position, "manifest not found at report row; status not updated");
            return Ok(false);
        };
        row.status = status;

        write_report(&self.path, &rows, &self.defaults)?;
        self.rows = rows;
        info!(manifest, position, %status, "report row updated");
        Ok(true)
    }
}

fn read_sheet(path: &Path) -> Result<Range<Data>, ReportError> {
    let mut workbook = open_workbook_auto(path)?;
    match workbook.worksheet_range_at(0) {
        Some(range) => Ok(range?),
        None => Err(ReportError::NoSheets),
    }
}

fn rows_from_range(
    range: &Range<Data>,
    headers: &HeaderIndex,
    defaults: &WasteDefaults,
) -> Vec<ReconciledRow> {
    let mut rows = Vec::new();
    for row in range.rows().skip(1) {
        let cell = |name: &str| headers.get(name).and_then(|idx| row.get(idx));
        let text = |name: &str| cell(name).and_then(cell_text);

        let Some(manifest) = text(columns::MANIFEST) else {
            continue;
        };

        let weighed_at = cell(columns::WEIGHED_AT).and_then(cell_datetime);
        let status = text(columns::STATUS)
            .and_then(|label| RowStatus::from_label(&label))
            .unwrap_or_else(|| RowStatus::from_weighing(weighed_at));
        let residue_code = text(columns::RESIDUE_CODE);
        let waste_class = text(columns::CLASS);
        let assessment =
            CorrectionAssessment::assess(residue_code.as_deref(), waste_class.as_deref(), defaults);

        rows.push(ReconciledRow {
            status,
            weighed_at,
            invoice: cell(columns::INVOICE).and_then(cell_i64),
            manifest,
            scale_plate: text(columns::SCALE_PLATE),
            correction_note: text(columns::CORRECTION),
            residue_code,
            waste_class,
            weight_tons: cell(columns::WEIGHT_TONS).and_then(cell_f64),
            generator_name: text(columns::GENERATOR_NAME),
            generator_tax_id: text(columns::GENERATOR_TAX_ID),
            transporter_name: text(columns::TRANSPORTER_NAME),
            transporter_tax_id: text(columns::TRANSPORTER_TAX_ID),
            driver: text(columns::DRIVER),
            manifest_plate: text(columns::MANIFEST_PLATE),
            issued_on: cell(columns::ISSUED_ON).and_then(cell_date),
            declared_tons: cell(columns::DECLARED_TONS).and_then(cell_f64),
            observations: text(columns::OBSERVATIONS),
            technology: text(columns::TECHNOLOGY),
            ticket: text(columns::TICKET),
            issuer: text(columns::ISSUER),
            product: text(columns::PRODUCT),
            scale_note: text(columns::SCALE_NOTE),
            assessment,
        });
    }
    rows
}

enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Date(ExcelDateTime),
    Timestamp(ExcelDateTime),
}

impl CellValue {
    fn text(value: &Option<String>) -> Self {
        value
            .as_ref()
            .map_or(CellValue::Empty, |text| CellValue::Text(text.clone()))
    }

    fn number(value: Option<f64>) -> Self {
        value.map_or(CellValue::Empty, CellValue::Number)
    }

    /// A date the workbook cannot represent is left blank.
    fn datetime(
        manifest: &str,
        column: &'static str,
        value: Option<Result<ExcelDateTime, XlsxError>>,
        wrap: fn(ExcelDateTime) -> Self,
    ) -> Self {
        match value {
            None => CellValue::Empty,
            Some(Ok(datetime)) => wrap(datetime),
            Some(Err(err)) => {
                warn!(manifest, column, error = %err, "date outside workbook range; cell left blank");
                CellValue::Empty
            }
        }
    }

    fn rendered_width(&self) -> usize {
        match self {
            CellValue::Empty => 0,
            CellValue::Text(text) => text.chars().count(),
            CellValue::Number(value) => value.to_string().len(),
            CellValue::Date(_) => DATE_FORMAT.len(),
            CellValue::Timestamp(_) => TIMESTAMP_FORMAT.len(),
        }
    }
}

fn row_cells(row: &ReconciledRow) -> [CellValue; 23] {
    [
        CellValue::Text(row.status.label().to_string()),
        CellValue::datetime(
            &row.manifest,
            columns::WEIGHED_AT,
            row.weighed_at.map(excel_timestamp),
            CellValue::Timestamp,
        ),
        CellValue::number(row.invoice.map(|invoice| invoice as f64)),
        CellValue::Text(row.manifest.clone()),
        CellValue::text(&row.scale_plate),
        CellValue::text(&row.correction_note),
        CellValue::text(&row.residue_code),
        CellValue::text(&row.waste_class),
        CellValue::number(row.weight_tons),
        CellValue::text(&row.generator_name),
        CellValue::text(&row.generator_tax_id),
        CellValue::text(&row.transporter_name),
        CellValue::text(&row.transporter_tax_id),
        CellValue::text(&row.driver),
        CellValue::text(&row.manifest_plate),
        CellValue::datetime(
            &row.manifest,
            columns::ISSUED_ON,
            row.issued_on.map(excel_date),
            CellValue::Date,
        ),
        CellValue::number(row.declared_tons),
        CellValue::text(&row.observations),
        CellValue::text(&row.technology),
        CellValue::text(&row.ticket),
        CellValue::text(&row.issuer),
        CellValue::text(&row.product),
        CellValue::text(&row.scale_note),
    ]
}

fn column_index(name: &str) -> u16 {
    columns::ALL
        .iter()
        .position(|header| *header == name)
        .unwrap_or_default() as u16
}

fn row_fill(status: RowStatus) -> Option<u32> {
    match status {
        RowStatus::Sent => Some(SENT_FILL),
        RowStatus::Error => Some(ERROR_FILL),
        RowStatus::Pending | RowStatus::Open => None,
    }
}

fn cell_format(fill: Option<u32>, num_format: Option<&str>) -> Format {
    let mut format = Format::new();
    if let Some(rgb) = fill {
        format = format.set_background_color(Color::RGB(rgb));
    }
    if let Some(num_format) = num_format {
        format = format.set_num_format(num_format);
    }
    format
}

fn excel_date(date: NaiveDate) -> Result<ExcelDateTime, XlsxError> {
    ExcelDateTime::from_ymd(date.year() as u16, date.month() as u8, date.day() as u8)
}

fn excel_timestamp(ts: NaiveDateTime) -> Result<ExcelDateTime, XlsxError> {
    excel_date(ts.date())?.and_hms(ts.hour() as u16, ts.minute() as u8, f64::from(ts.second()))
}

/// Writes the whole workbook from `rows`. Row fills (Sent/Error) take
/// precedence over the per-cell highlight of out-of-policy values.
pub fn write_report(
    path: &Path,
    rows: &[ReconciledRow],
    defaults: &WasteDefaults,
) -> Result<(), ReportError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let residue_col = column_index(columns::RESIDUE_CODE);
    let class_col = column_index(columns::CLASS);
    let issued_col = column_index(columns::ISSUED_ON);
    let weighed_col = column_index(columns::WEIGHED_AT);

    let mut widths: Vec<usize> = columns::ALL
        .iter()
        .map(|header| header.chars().count())
        .collect();

    for (idx, row) in rows.iter().enumerate() {
        let excel_row = idx as u32 + 1;
        let fill = row_fill(row.status);
        let assessment =
            CorrectionAssessment::assess(row.residue_code.as_deref(), row.waste_class.as_deref(), defaults);

        for (col, value) in row_cells(row).into_iter().enumerate() {
            let col = col as u16;
            let flagged = (col == residue_col && assessment.residue_code_changed)
                || (col == class_col && assessment.class_changed);
            let fill = fill.or(flagged.then_some(FLAGGED_FILL));
            let num_format = if col == issued_col {
                Some(DATE_FORMAT)
            } else if col == weighed_col {
                Some(TIMESTAMP_FORMAT)
            } else {
                None
            };
            let format = cell_format(fill, num_format);

            widths[col as usize] = widths[col as usize].max(value.rendered_width());
            match value {
                CellValue::Empty => {
                    worksheet.write_blank(excel_row, col, &format)?;
                }
                CellValue::Text(text) => {
                    worksheet.write_string_with_format(excel_row, col, &text, &format)?;
                }
                CellValue::Number(number) => {
                    worksheet.write_number_with_format(excel_row, col, number, &format)?;
                }
                CellValue::Date(datetime) | CellValue::Timestamp(datetime) => {
                    worksheet.write_datetime_with_format(excel_row, col, &datetime, &format)?;
                }
            }
        }
    }

    let table_columns: Vec<TableColumn> = columns::ALL
        .iter()
        .map(|header| TableColumn::new().set_header(*header))
        .collect();
    let table = Table::new()
        .set_name(TABLE_NAME)
        .set_style(TableStyle::Medium3)
        .set_banded_rows(true)
        .set_columns(&table_columns);
    // A table needs at least one data row, even an empty one.
    let last_row = rows.len().max(1) as u32;
    worksheet.add_table(0, 0, last_row, columns::ALL.len() as u16 - 1, &table)?;

    for (col, header) in columns::ALL.iter().enumerate() {
        let col = col as u16;
        if columns::HIDDEN.contains(header) {
            worksheet.set_column_hidden(col)?;
        } else {
            worksheet.set_column_width(col, (widths[col as usize] + 2) as f64)?;
        }
    }

    workbook.save(path)?;
    Ok(())
}
