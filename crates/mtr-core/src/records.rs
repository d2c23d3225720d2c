use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::correction::CorrectionAssessment;

/// One row of the portal's "manifests by receiver" export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestExportRecord {
    pub manifest: String,
    pub situation: Option<String>,
    pub observations: Option<String>,
    pub generator_name: Option<String>,
    pub generator_tax_id: Option<String>,
    pub transporter_name: Option<String>,
    pub transporter_tax_id: Option<String>,
    pub driver: Option<String>,
    pub plate: Option<String>,
    pub residue: Option<String>,
    pub waste_class: Option<String>,
    pub issued_on: Option<NaiveDate>,
    pub declared_tons: Option<f64>,
    pub technology: Option<String>,
}

/// One weighing from the scale database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleRecord {
    pub ticket: Option<String>,
    pub vehicle: Option<String>,
    pub issuer: Option<String>,
    pub product: Option<String>,
    pub invoice: Option<i64>,
    pub exited_at: Option<NaiveDateTime>,
    pub net_weight_kg: Option<f64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RowStatus {
    /// No weighing matched the manifest yet.
    Pending,
    /// Weighed, waiting to be received on the portal.
    Open,
    Sent,
    Error,
}

impl RowStatus {
    pub fn label(self) -> &'static str {
        match self {
            RowStatus::Pending => "Pendente",
            RowStatus::Open => "Aberto",
            RowStatus::Sent => "Enviado",
            RowStatus::Error => "Erro",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        [
            RowStatus::Pending,
            RowStatus::Open,
            RowStatus::Sent,
            RowStatus::Error,
        ]
        .into_iter()
        .find(|status| status.label().to_lowercase() == label)
    }

    pub fn from_weighing(weighed_at: Option<NaiveDateTime>) -> Self {
        if weighed_at.is_some() {
            RowStatus::Open
        } else {
            RowStatus::Pending
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A saved manifest joined with its weighing, as persisted in the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRow {
    pub status: RowStatus,
    pub weighed_at: Option<NaiveDateTime>,
    pub invoice: Option<i64>,
    pub manifest: String,
    pub scale_plate: Option<String>,
    pub correction_note: Option<String>,
    pub residue_code: Option<String>,
    pub waste_class: Option<String>,
    pub weight_tons: Option<f64>,
    pub generator_name: Option<String>,
    pub generator_tax_id: Option<String>,
    pub transporter_name: Option<String>,
    pub transporter_tax_id: Option<String>,
    pub driver: Option<String>,
    pub manifest_plate: Option<String>,
    pub issued_on: Option<NaiveDate>,
    pub declared_tons: Option<f64>,
    pub observations: Option<String>,
    pub technology: Option<String>,
    pub ticket: Option<String>,
    pub issuer: Option<String>,
    pub product: Option<String>,
    pub scale_note: Option<String>,
    pub assessment: CorrectionAssessment,
}
