//! Out-of-policy detection for declared residue code and class.
//!
//! Reconciliation computes the note once; the report store reuses
//! [`CorrectionAssessment::assess`] when it reads a report back, so the
//! highlight flags and the note text never diverge.

use serde::Serialize;

/// Residue code and class every received manifest must end up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasteDefaults {
    pub residue_code: String,
    pub waste_class: String,
}

pub const RESIDUE_CODE_LEN: usize = 6;

pub const QUANTITY_CORRECTED: &str =
    "Quantidade corrigida de acordo com o peso líquido de entrada";

const NOTE_SEPARATOR: &str = ",\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrectionAssessment {
    pub residue_code_changed: bool,
    pub class_changed: bool,
}

impl CorrectionAssessment {
    /// `residue_code` is compared after truncation to [`RESIDUE_CODE_LEN`] characters;
    /// a missing value always counts as different.
    pub fn assess(
        residue_code: Option<&str>,
        waste_class: Option<&str>,
        defaults: &WasteDefaults,
    ) -> Self {
        let code = residue_code.map(truncate_residue_code);
        Self {
            residue_code_changed: code.as_deref() != Some(defaults.residue_code.as_str()),
            class_changed: waste_class != Some(defaults.waste_class.as_str()),
        }
    }

    pub fn needs_correction(&self) -> bool {
        self.residue_code_changed || self.class_changed
    }

    pub fn note(&self, defaults: &WasteDefaults) -> Option<String> {
        let mut notes = Vec::new();
        if self.residue_code_changed {
            notes.push(format!(
                "Alterado para {} (IN 13/2012-IBAMA)",
                defaults.residue_code
            ));
        }
        if self.class_changed {
            notes.push(format!(
                "Alterado para classe {} (NBR 10.004)",
                defaults.waste_class
            ));
        }
        if notes.is_empty() {
            return None;
        }

        notes.insert(0, QUANTITY_CORRECTED.to_string());
        Some(format!("{}.", notes.join(NOTE_SEPARATOR)))
    }
}

pub fn truncate_residue_code(raw: &str) -> String {
    raw.chars().take(RESIDUE_CODE_LEN).collect()
}

/// What the receiving flow has to do beyond entering the weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionRequest {
    WeightOnly,
    JustifyAndReplace { justification: String },
}

impl CorrectionRequest {
    pub fn from_note(note: Option<&str>) -> Self {
        match note.map(str::trim) {
            Some(text) if !text.is_empty() => CorrectionRequest::JustifyAndReplace {
                justification: text.to_string(),
            },
            _ => CorrectionRequest::WeightOnly,
        }
    }
}
