use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use mtr_core::config::Config;
use mtr_core::db;
use mtr_core::portal::sao_paulo_today;
use mtr_core::robot::{self, RunSummary};
use mtr_portal::{PortalDriver, WebDriverConfig, WebDriverPortal, DEFAULT_WAIT};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_REPORT_NAME: &str = "relatorio_mtr_balanca.xlsx";

/// Reconciles MTR manifests with the scale database and receives them on the portal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Report file to write (skips the save dialog)
    #[arg(short, long, conflicts_with = "resume")]
    output: Option<PathBuf>,

    /// Only receive the open manifests of an existing report
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Environment file to load instead of the .env next to the executable
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

enum Mode {
    Run(PathBuf),
    Resume(PathBuf),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_file = load_env(cli.env_file.as_deref())?;
    init_tracing(cli.json_logs);
    if let Some(path) = &env_file {
        info!(path = %path.display(), "environment file loaded");
    }

    let mode = match (cli.resume, cli.output) {
        (Some(report), _) => Mode::Resume(report),
        (None, Some(output)) => Mode::Run(output),
        (None, None) => match choose_output() {
            Some(output) => Mode::Run(output),
            None => {
                info!("no report location chosen; nothing to do");
                return Ok(());
            }
        },
    };

    let config = Config::from_env().context("invalid configuration")?;

    let mut driver = WebDriverPortal::connect(&WebDriverConfig {
        webdriver_url: config.browser.webdriver_url.clone(),
        headless: config.browser.headless,
        wait_timeout: DEFAULT_WAIT,
    })
    .await
    .with_context(|| format!("failed to open a browser via {}", config.browser.webdriver_url))?;

    let result = match &mode {
        Mode::Run(output) => {
            info!(report = %output.display(), "starting reconciliation run");
            run_with_database(&config, &mut driver, output).await
        }
        Mode::Resume(report) => {
            info!(report = %report.display(), "resuming receiving");
            robot::resume(&config, &mut driver, report).await
        }
    };

    if let Err(err) = driver.close().await {
        warn!(error = %err, "browser session did not close cleanly");
    }

    let summary = result.context("robot run failed")?;
    print_summary(&summary);
    Ok(())
}

async fn run_with_database(
    config: &Config,
    driver: &mut WebDriverPortal,
    output: &Path,
) -> mtr_core::error::Result<RunSummary> {
    let pool = db::connect(&config.database).await?;
    let summary = robot::run(config, driver, &pool, output, sao_paulo_today()).await;
    pool.close().await;
    summary
}

/// Loads `explicit`, else the `.env` beside the executable, else one in the working directory.
fn load_env(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load environment file {}", path.display()))?;
        return Ok(Some(path.to_path_buf()));
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.is_file());
    if let Some(path) = beside_exe {
        dotenvy::from_path(&path)
            .with_context(|| format!("failed to load environment file {}", path.display()))?;
        return Ok(Some(path));
    }

    Ok(dotenvy::dotenv().ok())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn choose_output() -> Option<PathBuf> {
    let mut path = rfd::FileDialog::new()
        .set_title("Salvar Relatório MTR")
        .add_filter("Excel", &["xlsx"])
        .set_file_name(DEFAULT_REPORT_NAME)
        .save_file()?;
    if path.extension().is_none() {
        path.set_extension("xlsx");
    }
    Some(path)
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["MTR Nº", "Status", "Detalhe"]);
    for outcome in &summary.outcomes {
        table.add_row(vec![
            outcome.manifest.clone(),
            outcome.status.to_string(),
            outcome.detail.clone(),
        ]);
    }
    println!("{table}");

    info!(
        report = %summary.report.display(),
        rows = summary.rows,
        pending = summary.pending,
        sent = summary.sent(),
        failed = summary.failed(),
        "run finished"
    );
}
