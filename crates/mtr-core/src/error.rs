// crates/mtr-core/src/error.rs

use thiserror::Error;

use crate::config::ConfigError;
use crate::export::ExportError;
use crate::receiving::ReceiveError;
use crate::report::ReportError;

#[derive(Error, Debug)]
pub enum RobotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Portal automation failed: {0}")]
    Portal(#[from] mtr_portal::PortalError),

    #[error("Manifest export could not be read: {0}")]
    Export(#[from] ExportError),

    #[error("Report spreadsheet error: {0}")]
    Report(#[from] ReportError),

    #[error("Receiving failed: {0}")]
    Receive(#[from] ReceiveError),

    #[error("Login to the MTR portal failed: {0}")]
    Login(String),
}

pub type Result<T> = std::result::Result<T, RobotError>;
