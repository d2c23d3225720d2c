pub mod config;
pub mod correction;
pub mod db;
pub mod error;
pub mod export;
pub mod portal;
pub mod receiving;
pub mod reconcile;
pub mod records;
pub mod report;
pub mod robot;
pub mod scale;
pub mod tax_id;
