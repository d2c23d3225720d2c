use sqlx::FromRow;
use tracing::{info, warn};

use crate::db::DbPool;
use crate::error::Result;
use crate::export::parse_datetime_text;
use crate::records::ScaleRecord;

#[derive(Debug, FromRow)]
struct ScaleRow {
    ticket: Option<String>,
    vehicle: Option<String>,
    issuer: Option<String>,
    product: Option<String>,
    invoice: Option<String>,
    exited_at: Option<String>,
    net_weight_kg: Option<String>,
    note: Option<String>,
}

/// Read-only weighing query. Every column is cast to text so decoding does not
/// depend on how the scale software typed its table, and one malformed value
/// cannot fail the whole query.
pub fn scale_query(table: &str) -> String {
    format!(
        r#"
        SELECT
            CAST("Ticket" AS TEXT) AS ticket,
            CAST("Veículo" AS TEXT) AS vehicle,
            CAST("Emissor" AS TEXT) AS issuer,
            CAST("Produto" AS TEXT) AS product,
            CAST("Nota fiscal" AS TEXT) AS invoice,
            CAST("Data e Hora de saída" AS TEXT) AS exited_at,
            CAST("Peso liquido (kg)" AS TEXT) AS net_weight_kg,
            CAST("Observação" AS TEXT) AS note
        FROM {}
        "#,
        quote_table(table)
    )
}

fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

pub async fn fetch_scale_records(pool: &DbPool, table: &str) -> Result<Vec<ScaleRecord>> {
    let sql = scale_query(table);
    let rows: Vec<ScaleRow> = sqlx::query_as(&sql).fetch_all(pool).await?;
    info!(rows = rows.len(), table, "scale records fetched");

    Ok(rows.into_iter().map(scale_record).collect())
}

fn scale_record(row: ScaleRow) -> ScaleRecord {
    let exited_at = row.exited_at.as_deref().and_then(parse_datetime_text);
    if exited_at.is_none() && row.exited_at.is_some() {
        warn!(ticket = ?row.ticket, value = ?row.exited_at, "unreadable exit time treated as missing");
    }
    let net_weight_kg = row.net_weight_kg.as_deref().and_then(parse_weight_text);
    if net_weight_kg.is_none() && row.net_weight_kg.is_some() {
        warn!(ticket = ?row.ticket, value = ?row.net_weight_kg, "non-numeric net weight treated as missing");
    }

    ScaleRecord {
        invoice: row.invoice.as_deref().and_then(parse_invoice_text),
        exited_at,
        net_weight_kg,
        ticket: row.ticket,
        vehicle: row.vehicle,
        issuer: row.issuer,
        product: row.product,
        note: row.note,
    }
}

/// Net weight in kg as text ("2500", "2500.5", "2500,5"); anything else is null.
pub fn parse_weight_text(text: &str) -> Option<f64> {
    text.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Invoice numbers stored as text or decimals ("4521", "4521.00"); anything else is null.
pub fn parse_invoice_text(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|value| value.fract() == 0.0 && value.abs() < 9.0e15)
            .map(|value| value as i64)
    })
}
