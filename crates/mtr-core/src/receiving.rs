//! Receiving one manifest on the portal.
//!
//! The flow is a fixed sequence of [`ReceiveStep`]s played against the
//! receive dialog. Every failure carries the step it happened in so the
//! orchestrator can report it without inspecting the page.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use mtr_portal::{PortalDriver, PortalError};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::PortalConfig;
use crate::correction::{CorrectionRequest, WasteDefaults};
use crate::portal::{calendar_day, open_url, receiver_cell, selectors, tracking_url};
use crate::records::ReconciledRow;
use crate::tax_id::{format_portal_weight, parse_portal_weight};

pub const DEFAULT_CALENDAR_STEP_CAP: usize = 240;
pub const DEFAULT_CALENDAR_DEADLINE: Duration = Duration::from_secs(60);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

/// Justification used when only the weight differs from the declared one.
pub const WEIGHT_JUSTIFICATION: &str =
    "Quantidade corrigida de acordo com o peso líquido de entrada.";

const WEIGHT_TOLERANCE: f64 = 1e-9;

const MONTHS: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

pub mod labels {
    pub const UNIT: &str = "Tonelada";
    pub const PHYSICAL_STATE: &str = "Sólido";
    pub const PACKAGING: &str = "E03 - Caçamba Fechada";
    pub const TECHNOLOGY: &str = "Recuperação energética";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStep {
    Navigate,
    OpenDialog,
    SelectDate,
    SelectReceiver,
    EnterWeight,
    Justify,
    ReplaceResidue,
    Finalize,
}

impl fmt::Display for ReceiveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiveStep::Navigate => "navigate",
            ReceiveStep::OpenDialog => "open dialog",
            ReceiveStep::SelectDate => "select date",
            ReceiveStep::SelectReceiver => "select receiver",
            ReceiveStep::EnterWeight => "enter weight",
            ReceiveStep::Justify => "justify",
            ReceiveStep::ReplaceResidue => "replace residue",
            ReceiveStep::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("{step} failed: {source}")]
    Portal {
        step: ReceiveStep,
        #[source]
        source: PortalError,
    },
    #[error("calendar did not reach {target} within {steps} steps")]
    CalendarUnreachable { target: String, steps: usize },
    #[error("calendar did not reach {target} within {deadline:?}")]
    CalendarTimeout { target: String, deadline: Duration },
    #[error("calendar header not recognised: {0}")]
    CalendarHeader(String),
    #[error("portal weight is not a number: {0:?}")]
    PortalWeight(String),
    #[error("manifest {manifest} has no weight to receive")]
    MissingWeight { manifest: String },
    #[error("manifest {manifest} has no weighing date")]
    MissingDate { manifest: String },
}

impl ReceiveError {
    /// Tags a driver failure with the step it happened in.
    fn at(step: ReceiveStep) -> impl FnOnce(PortalError) -> ReceiveError {
        move |source| ReceiveError::Portal { step, source }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveRequest {
    pub manifest: String,
    pub received_on: NaiveDate,
    pub weight_tons: f64,
    pub correction: CorrectionRequest,
}

impl ReceiveRequest {
    pub fn from_row(row: &ReconciledRow) -> Result<Self, ReceiveError> {
        let weight_tons = row
            .weight_tons
            .filter(|weight| weight.is_finite())
            .ok_or_else(|| ReceiveError::MissingWeight {
                manifest: row.manifest.clone(),
            })?;
        let received_on = row
            .weighed_at
            .map(|ts| ts.date())
            .ok_or_else(|| ReceiveError::MissingDate {
                manifest: row.manifest.clone(),
            })?;

        Ok(Self {
            manifest: row.manifest.clone(),
            received_on,
            weight_tons,
            correction: CorrectionRequest::from_note(row.correction_note.as_deref()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    pub tracking_url: String,
    pub receiver_name: String,
    pub defaults: WasteDefaults,
    pub production: bool,
    pub screenshot_dir: PathBuf,
    pub calendar_step_cap: usize,
    pub calendar_deadline: Duration,
    /// Pause between dependent selects of the residue dialog.
    pub settle: Duration,
}

impl ReceiveSettings {
    pub fn new(portal: &PortalConfig, defaults: &WasteDefaults) -> Self {
        Self {
            tracking_url: tracking_url(portal),
            receiver_name: portal.receiver_name.clone(),
            defaults: defaults.clone(),
            production: portal.production,
            screenshot_dir: portal.screenshot_dir.clone(),
            calendar_step_cap: DEFAULT_CALENDAR_STEP_CAP,
            calendar_deadline: DEFAULT_CALENDAR_DEADLINE,
            settle: DEFAULT_SETTLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Receipt confirmed on the portal.
    Confirmed,
    /// Dialog filled and captured, then closed without confirming.
    DryRun { screenshot: PathBuf },
}

pub struct ManifestReceiver<'a, D: PortalDriver + ?Sized> {
    driver: &'a mut D,
    settings: &'a ReceiveSettings,
}

impl<'a, D: PortalDriver + ?Sized> ManifestReceiver<'a, D> {
    pub fn new(driver: &'a mut D, settings: &'a ReceiveSettings) -> Self {
        Self { driver, settings }
    }

    #[instrument(skip_all, fields(manifest = %request.manifest))]
    pub async fn receive(&mut self, request: &ReceiveRequest) -> Result<ReceiveOutcome, ReceiveError> {
        info!(
            weight = request.weight_tons,
            date = %request.received_on,
            corrected = matches!(request.correction, CorrectionRequest::JustifyAndReplace { .. }),
            "receiving manifest"
        );

        open_url(&mut *self.driver, &self.settings.tracking_url)
            .await
            .map_err(ReceiveError::at(ReceiveStep::Navigate))?;
        self.open_dialog(&request.manifest).await?;
        self.select_date(request.received_on).await?;
        self.select_receiver().await?;

        match &request.correction {
            CorrectionRequest::WeightOnly => self.enter_weight(request.weight_tons).await?,
            CorrectionRequest::JustifyAndReplace { justification } => {
                self.justify(justification).await?;
                self.replace_residue(request.weight_tons).await?;
            }
        }

        self.finalize(&request.manifest).await
    }

    async fn open_dialog(&mut self, manifest: &str) -> Result<(), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::OpenDialog);
        self.driver.fill(selectors::RECEIVE_CODE, manifest).await.map_err(at())?;
        self.driver.click(selectors::RECEIVE_BUTTON).await.map_err(at())?;
        self.driver.wait_for(selectors::RECEIVE_DIALOG).await.map_err(at())?;
        Ok(())
    }

    async fn select_date(&mut self, date: NaiveDate) -> Result<(), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::SelectDate);
        self.driver.click(selectors::DATE_PICKER).await.map_err(at())?;
        self.driver.wait_for(selectors::CALENDAR_PREV).await.map_err(at())?;

        let target = (date.year(), date.month());
        let target_label = format!("{} {}", MONTHS[date.month0() as usize], date.year());
        let started = Instant::now();
        let mut steps = 0;

        loop {
            let shown = self.displayed_month().await?;
            if shown == target {
                break;
            }
            if steps >= self.settings.calendar_step_cap {
                return Err(ReceiveError::CalendarUnreachable {
                    target: target_label,
                    steps,
                });
            }
            if started.elapsed() >= self.settings.calendar_deadline {
                return Err(ReceiveError::CalendarTimeout {
                    target: target_label,
                    deadline: self.settings.calendar_deadline,
                });
            }

            let arrow = if shown > target {
                selectors::CALENDAR_PREV
            } else {
                selectors::CALENDAR_NEXT
            };
            self.driver.click(arrow).await.map_err(at())?;
            steps += 1;
        }
        debug!(steps, target = %target_label, "calendar positioned");

        self.driver.wait_for(selectors::CALENDAR_TABLE).await.map_err(at())?;
        self.driver.click(&calendar_day(date.day())).await.map_err(at())?;
        Ok(())
    }

    async fn displayed_month(&mut self) -> Result<(i32, u32), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::SelectDate);
        let month_text = self.driver.text(selectors::CALENDAR_MONTH).await.map_err(at())?;
        let year_text = self.driver.text(selectors::CALENDAR_YEAR).await.map_err(at())?;

        let month = month_number(&month_text)
            .ok_or_else(|| ReceiveError::CalendarHeader(month_text.clone()))?;
        let year = year_text
            .trim()
            .parse::<i32>()
            .map_err(|_| ReceiveError::CalendarHeader(year_text.clone()))?;
        Ok((year, month))
    }

    async fn select_receiver(&mut self) -> Result<(), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::SelectReceiver);
        self.driver
            .run_script("pesquisaResponsavelRecebimento()")
            .await
            .map_err(at())?;
        self.driver.wait_for(selectors::RECEIVER_TABLE).await.map_err(at())?;
        self.driver
            .click(&receiver_cell(&self.settings.receiver_name))
            .await
            .map_err(at())?;
        Ok(())
    }

    async fn enter_weight(&mut self, weight_tons: f64) -> Result<(), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::EnterWeight);
        self.driver
            .fill(selectors::ROW_WEIGHT_INPUT, &format_portal_weight(weight_tons))
            .await
            .map_err(at())?;

        let text = self.driver.text(selectors::ROW_WEIGHT_TEXT).await.map_err(at())?;
        let portal_weight =
            parse_portal_weight(&text).ok_or_else(|| ReceiveError::PortalWeight(text.clone()))?;

        if (portal_weight - weight_tons).abs() > WEIGHT_TOLERANCE {
            info!(portal_weight, weight_tons, "declared weight differs; justifying");
            self.justify(WEIGHT_JUSTIFICATION).await?;
        }
        Ok(())
    }

    async fn justify(&mut self, text: &str) -> Result<(), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::Justify);
        self.driver.click(selectors::ROW_JUSTIFY_ICON).await.map_err(at())?;
        self.driver.fill(selectors::JUSTIFICATION_TEXT, text).await.map_err(at())?;
        self.driver.click(selectors::JUSTIFICATION_SAVE).await.map_err(at())?;
        Ok(())
    }

    async fn replace_residue(&mut self, weight_tons: f64) -> Result<(), ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::ReplaceResidue);
        let defaults = &self.settings.defaults;

        self.driver.click(selectors::ROW_RESIDUE_EDITOR).await.map_err(at())?;
        self.driver.click(selectors::RESIDUE_LINK).await.map_err(at())?;
        self.driver
            .fill(selectors::RESIDUE_CODE, &defaults.residue_code)
            .await
            .map_err(at())?;
        self.driver
            .fill(selectors::RESIDUE_QUANTITY, &format!("{weight_tons:.2}"))
            .await
            .map_err(at())?;

        let selects = [
            (selectors::RESIDUE_UNIT, labels::UNIT),
            (selectors::RESIDUE_STATE, labels::PHYSICAL_STATE),
            (selectors::RESIDUE_CLASS, defaults.waste_class.as_str()),
            (selectors::RESIDUE_PACKAGING, labels::PACKAGING),
            (selectors::RESIDUE_TECHNOLOGY, labels::TECHNOLOGY),
        ];
        for (selector, label) in selects {
            if !self.settings.settle.is_zero() {
                sleep(self.settings.settle).await;
            }
            self.driver.select_by_label(selector, label).await.map_err(at())?;
        }

        self.driver.click(selectors::RESIDUE_CONFIRM).await.map_err(at())?;
        self.driver.click(selectors::RESIDUE_SUCCESS_CLOSE).await.map_err(at())?;
        Ok(())
    }

    async fn finalize(&mut self, manifest: &str) -> Result<ReceiveOutcome, ReceiveError> {
        let at = || ReceiveError::at(ReceiveStep::Finalize);
        if self.settings.production {
            self.driver.run_script("salvaReceber()").await.map_err(at())?;
            self.driver.click(selectors::MESSAGE_CLOSE).await.map_err(at())?;
            info!(manifest, "receipt confirmed");
            return Ok(ReceiveOutcome::Confirmed);
        }

        let screenshot = self
            .settings
            .screenshot_dir
            .join(format!("sucesso_mtr_{manifest}.png"));
        let png = self.driver.screenshot().await.map_err(at())?;
        if let Err(err) = tokio::fs::write(&screenshot, png).await {
            warn!(manifest, path = %screenshot.display(), error = %err, "dry-run screenshot not saved");
        }
        self.driver
            .click(selectors::RECEIVE_DIALOG_CLOSE)
            .await
            .map_err(at())?;
        info!(manifest, "dry run; receipt not confirmed");
        Ok(ReceiveOutcome::DryRun { screenshot })
    }
}

/// Month number (1-12) for a Portuguese month name as shown by the date picker.
pub fn month_number(name: &str) -> Option<u32> {
    let name = name.trim().to_lowercase();
    MONTHS
        .iter()
        .position(|month| month.to_lowercase() == name)
        .map(|idx| idx as u32 + 1)
}
