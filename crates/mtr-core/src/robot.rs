//! Orchestration of a robot run: login, reconcile, write the report, then
//! receive every open manifest in order.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use mtr_portal::PortalDriver;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::DbPool;
use crate::error::Result;
use crate::export::parse_manifest_export;
use crate::portal::{fetch_manifest_export, login, open_url};
use crate::receiving::{ManifestReceiver, ReceiveOutcome, ReceiveRequest, ReceiveSettings};
use crate::reconcile::reconcile;
use crate::records::RowStatus;
use crate::report::ReportStore;
use crate::scale::fetch_scale_records;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestOutcome {
    pub manifest: String,
    pub status: RowStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub report: PathBuf,
    pub rows: usize,
    pub pending: usize,
    pub outcomes: Vec<ManifestOutcome>,
}

impl RunSummary {
    pub fn sent(&self) -> usize {
        self.count(RowStatus::Sent)
    }

    pub fn failed(&self) -> usize {
        self.count(RowStatus::Error)
    }

    fn count(&self, status: RowStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }
}

/// Full run: reconcile the portal export with the scale database into
/// `output`, then receive the open manifests.
pub async fn run<D>(
    config: &Config,
    driver: &mut D,
    pool: &DbPool,
    output: &Path,
    today: NaiveDate,
) -> Result<RunSummary>
where
    D: PortalDriver + ?Sized,
{
    login(driver, &config.portal).await?;

    let export = fetch_manifest_export(driver, &config.portal, today).await?;
    let manifests = parse_manifest_export(&export)?;
    let scale = fetch_scale_records(pool, &config.database.scale_table).await?;
    let rows = reconcile(&manifests, &scale, &config.waste)?;

    let mut store = ReportStore::new(output, config.waste.clone(), rows);
    store.save()?;

    let settings = ReceiveSettings::new(&config.portal, &config.waste);
    receive_all(driver, &mut store, &settings).await
}

/// Receiving only, on a report written by an earlier run.
pub async fn resume<D>(config: &Config, driver: &mut D, report: &Path) -> Result<RunSummary>
where
    D: PortalDriver + ?Sized,
{
    login(driver, &config.portal).await?;

    let mut store = ReportStore::load(report, config.waste.clone())?;
    let settings = ReceiveSettings::new(&config.portal, &config.waste);
    receive_all(driver, &mut store, &settings).await
}

async fn receive_all<D>(
    driver: &mut D,
    store: &mut ReportStore,
    settings: &ReceiveSettings,
) -> Result<RunSummary>
where
    D: PortalDriver + ?Sized,
{
    let rows = store.rows().len();
    let pending = store
        .rows()
        .iter()
        .filter(|row| row.status == RowStatus::Pending)
        .count();
    let outcomes = receive_open_rows(driver, store, settings).await?;

    Ok(RunSummary {
        report: store.path().to_path_buf(),
        rows,
        pending,
        outcomes,
    })
}

/// Receives every `Open` row of the report, one at a time. Each outcome is
/// written to the row it came from.
///
/// A failing manifest is captured, marked `Error` in the report and skipped;
/// only report I/O failures abort the loop.
pub async fn receive_open_rows<D>(
    driver: &mut D,
    store: &mut ReportStore,
    settings: &ReceiveSettings,
) -> Result<Vec<ManifestOutcome>>
where
    D: PortalDriver + ?Sized,
{
    let open = store.open_entries();
    info!(open = open.len(), "receiving open manifests");

    let mut outcomes = Vec::with_capacity(open.len());
    for (key, row) in open {
        let manifest = row.manifest.clone();
        let result = match ReceiveRequest::from_row(&row) {
            Ok(request) => {
                ManifestReceiver::new(&mut *driver, settings)
                    .receive(&request)
                    .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(outcome) => {
                store.update_row_status(&key, RowStatus::Sent)?;
                let detail = match outcome {
                    ReceiveOutcome::Confirmed => "confirmed".to_string(),
                    ReceiveOutcome::DryRun { screenshot } => {
                        format!("dry run, {}", screenshot.display())
                    }
                };
                outcomes.push(ManifestOutcome {
                    manifest,
                    status: RowStatus::Sent,
                    detail,
                });
            }
            Err(err) => {
                error!(manifest = %manifest, error = %err, "manifest could not be received");
                save_error_screenshot(&mut *driver, settings, &manifest).await;
                store.update_row_status(&key, RowStatus::Error)?;
                if let Err(nav_err) = open_url(&mut *driver, &settings.tracking_url).await {
                    warn!(manifest = %manifest, error = %nav_err, "could not return to the tracking screen");
                }
                outcomes.push(ManifestOutcome {
                    manifest,
                    status: RowStatus::Error,
                    detail: err.to_string(),
                });
            }
        }
    }

    Ok(outcomes)
}

async fn save_error_screenshot<D>(driver: &mut D, settings: &ReceiveSettings, manifest: &str)
where
    D: PortalDriver + ?Sized,
{
    let path = settings
        .screenshot_dir
        .join(format!("erro_mtr_{manifest}.png"));
    let png = match driver.screenshot().await {
        Ok(png) => png,
        Err(err) => {
            warn!(manifest, error = %err, "error screenshot could not be taken");
            return;
        }
    };
    match tokio::fs::write(&path, png).await {
        Ok(()) => info!(manifest, path = %path.display(), "error screenshot saved"),
        Err(err) => warn!(manifest, path = %path.display(), error = %err, "error screenshot not saved"),
    }
}
