use std::collections::{HashMap, HashSet};

use chrono::Datelike;
use polars::prelude::*;
use tracing::{info, warn};

use crate::correction::{truncate_residue_code, CorrectionAssessment, WasteDefaults};
use crate::records::{ManifestExportRecord, ReconciledRow, RowStatus, ScaleRecord};
use crate::tax_id::{extract_invoice_number, mask_tax_id};

/// Situation of manifests that are still waiting to be received.
pub const SAVED_SITUATION: &str = "Salvo";

/// Left-joins saved manifests to scale weighings by invoice number.
///
/// Every saved manifest appears at least once; a manifest whose invoice is
/// shared by several weighings appears once per weighing. Output is ordered by
/// weighing time then issue date, nulls first, so pending rows lead. Ties keep
/// export order.
pub fn reconcile(
    manifests: &[ManifestExportRecord],
    scale: &[ScaleRecord],
    defaults: &WasteDefaults,
) -> Result<Vec<ReconciledRow>, PolarsError> {
    let saved: Vec<&ManifestExportRecord> = manifests
        .iter()
        .filter(|record| record.situation.as_deref().map(str::trim) == Some(SAVED_SITUATION))
        .collect();
    if saved.is_empty() {
        info!(exported = manifests.len(), "no saved manifests to reconcile");
        return Ok(Vec::new());
    }

    let invoices: Vec<Option<i64>> = saved
        .iter()
        .map(|record| record.observations.as_deref().and_then(extract_invoice_number))
        .collect();
    warn_on_shared_invoices(&invoices, scale);

    let manifest_df = DataFrame::new(vec![
        Series::new(
            "manifest_idx".into(),
            (0..saved.len() as u32).collect::<Vec<u32>>(),
        )
        .into(),
        Series::new("invoice".into(), invoices.clone()).into(),
        Series::new(
            "issued_on_days".into(),
            saved
                .iter()
                .map(|record| record.issued_on.map(|date| date.num_days_from_ce()))
                .collect::<Vec<Option<i32>>>(),
        )
        .into(),
    ])?;

    let scale_df = DataFrame::new(vec![
        Series::new(
            "scale_invoice".into(),
            scale.iter().map(|record| record.invoice).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "scale_idx".into(),
            (0..scale.len() as u32).collect::<Vec<u32>>(),
        )
        .into(),
        Series::new(
            "weighed_at_us".into(),
            scale
                .iter()
                .map(|record| record.exited_at.map(|ts| ts.and_utc().timestamp_micros()))
                .collect::<Vec<Option<i64>>>(),
        )
        .into(),
    ])?;

    let joined = manifest_df
        .lazy()
        .join(
            scale_df.lazy(),
            [col("invoice")],
            [col("scale_invoice")],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col("weighed_at_us").is_null())
                .then(lit(RowStatus::Pending.label()))
                .otherwise(lit(RowStatus::Open.label()))
                .alias("status"),
        )
        .sort(
            ["weighed_at_us", "issued_on_days", "manifest_idx", "scale_idx"],
            SortMultipleOptions::default()
                .with_nulls_last(false)
                .with_maintain_order(true),
        )
        .collect()?;

    let manifest_idx = joined
        .column("manifest_idx")?
        .as_materialized_series()
        .u32()?;
    let scale_idx = joined.column("scale_idx")?.as_materialized_series().u32()?;
    let status_labels = joined.column("status")?.as_materialized_series().str()?;

    let mut rows = Vec::with_capacity(joined.height());
    for idx in 0..joined.height() {
        let Some(m_idx) = manifest_idx.get(idx) else {
            continue;
        };
        let manifest = saved[m_idx as usize];
        let weighing = scale_idx.get(idx).map(|s_idx| &scale[s_idx as usize]);
        let weighed_at = weighing.and_then(|record| record.exited_at);
        let status = status_labels
            .get(idx)
            .and_then(RowStatus::from_label)
            .unwrap_or_else(|| RowStatus::from_weighing(weighed_at));

        rows.push(build_row(
            manifest,
            invoices[m_idx as usize],
            weighing,
            status,
            defaults,
        ));
    }

    let pending = rows
        .iter()
        .filter(|row| row.status == RowStatus::Pending)
        .count();
    info!(
        saved = saved.len(),
        rows = rows.len(),
        pending,
        open = rows.len() - pending,
        "reconciliation complete"
    );
    Ok(rows)
}

fn build_row(
    manifest: &ManifestExportRecord,
    invoice: Option<i64>,
    weighing: Option<&ScaleRecord>,
    status: RowStatus,
    defaults: &WasteDefaults,
) -> ReconciledRow {
    let assessment = CorrectionAssessment::assess(
        manifest.residue.as_deref(),
        manifest.waste_class.as_deref(),
        defaults,
    );

    ReconciledRow {
        status,
        weighed_at: weighing.and_then(|record| record.exited_at),
        invoice,
        manifest: manifest.manifest.clone(),
        scale_plate: weighing.and_then(|record| record.vehicle.clone()),
        correction_note: assessment.note(defaults),
        residue_code: manifest.residue.as_deref().map(truncate_residue_code),
        waste_class: manifest.waste_class.clone(),
        weight_tons: weighing
            .and_then(|record| record.net_weight_kg)
            .map(|kg| kg / 1000.0),
        generator_name: manifest.generator_name.clone(),
        generator_tax_id: mask_tax_id(manifest.generator_tax_id.as_deref()),
        transporter_name: manifest.transporter_name.clone(),
        transporter_tax_id: manifest.transporter_tax_id.clone(),
        driver: manifest.driver.clone(),
        manifest_plate: manifest.plate.clone(),
        issued_on: manifest.issued_on,
        declared_tons: manifest.declared_tons,
        observations: manifest.observations.clone(),
        technology: manifest.technology.clone(),
        ticket: weighing.and_then(|record| record.ticket.clone()),
        issuer: weighing.and_then(|record| record.issuer.clone()),
        product: weighing.and_then(|record| record.product.clone()),
        scale_note: weighing.and_then(|record| record.note.clone()),
        assessment,
    }
}

// Fan-out on shared invoices is kept (plain left join); surface it so the
// operator can check the source data.
fn warn_on_shared_invoices(invoices: &[Option<i64>], scale: &[ScaleRecord]) {
    let wanted: HashSet<i64> = invoices.iter().flatten().copied().collect();
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for invoice in scale.iter().filter_map(|record| record.invoice) {
        if wanted.contains(&invoice) {
            *counts.entry(invoice).or_insert(0) += 1;
        }
    }

    let mut shared: Vec<(i64, usize)> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
    shared.sort_unstable();
    for (invoice, matches) in shared {
        warn!(invoice, matches, "invoice matched more than one weighing");
    }
}

