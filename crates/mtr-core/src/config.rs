//! Runtime configuration, read once from the environment at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

use crate::correction::WasteDefaults;

pub const DEFAULT_BASE_URL: &str = "https://mtr.ima.sc.gov.br/";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
pub const DEFAULT_SCALE_TABLE: &str = "MeioAmbiente";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(String),
    #[error("database driver '{0}' is not supported (expected postgres)")]
    UnsupportedDriver(String),
    #[error("DATABASE_URL is invalid: {0}")]
    InvalidDatabaseUrl(#[source] sqlx::Error),
    #[error("{key} has an invalid port: {value}")]
    InvalidPort { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub portal: PortalConfig,
    pub waste: WasteDefaults,
    pub browser: BrowserConfig,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub driver: String,
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub scale_table: String,
}

#[derive(Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub login_cnpj: String,
    pub login_cpf: String,
    pub password: String,
    pub receiver_code: String,
    pub receiver_name: String,
    pub production: bool,
    pub screenshot_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));
        let flag = |key: &str| get(key).as_deref() == Some("1");

        let url = get("DATABASE_URL");
        let database = if url.is_some() {
            DatabaseConfig {
                url,
                driver: get("DB_DRIVER").unwrap_or_else(|| "postgres".to_string()),
                host: get("DB_HOST").unwrap_or_default(),
                name: get("DB_NOME").unwrap_or_default(),
                user: get("DB_USUARIO").unwrap_or_default(),
                password: get("DB_SENHA").unwrap_or_default(),
                scale_table: get("SCALE_TABLE").unwrap_or_else(|| DEFAULT_SCALE_TABLE.to_string()),
            }
        } else {
            DatabaseConfig {
                url: None,
                driver: get("DB_DRIVER").unwrap_or_else(|| "postgres".to_string()),
                host: required("DB_HOST")?,
                name: required("DB_NOME")?,
                user: required("DB_USUARIO")?,
                password: required("DB_SENHA")?,
                scale_table: get("SCALE_TABLE").unwrap_or_else(|| DEFAULT_SCALE_TABLE.to_string()),
            }
        };

        let mut base_url = get("MTR_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let portal = PortalConfig {
            base_url,
            login_cnpj: required("MTR_LOGIN_CNPJ")?,
            login_cpf: required("MTR_LOGIN_CPF")?,
            password: required("MTR_LOGIN_SENHA")?,
            receiver_code: required("CODIGO_RECEBEDOR_IMA")?,
            receiver_name: required("RECEBEDOR")?,
            production: flag("PRODUCAO"),
            screenshot_dir: get("SCREENSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let waste = WasteDefaults {
            residue_code: required("CODIGO_RESIDUO_PADRAO")?,
            waste_class: required("CLASSE_PADRAO")?,
        };

        let browser = BrowserConfig {
            webdriver_url: get("WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            headless: flag("HEADLESS"),
        };

        Ok(Self {
            database,
            portal,
            waste,
            browser,
        })
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url).map_err(ConfigError::InvalidDatabaseUrl);
        }

        match self.driver.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => {}
            other => return Err(ConfigError::UnsupportedDriver(other.to_string())),
        }

        let mut options = PgConnectOptions::new()
            .username(&self.user)
            .password(&self.password)
            .database(&self.name);

        // Accept both "host:port" and the "host,port" form used by ODBC strings.
        match self.host.split_once([':', ',']) {
            Some((host, port)) => {
                let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidPort {
                    key: "DB_HOST".to_string(),
                    value: self.host.clone(),
                })?;
                options = options.host(host.trim()).port(port);
            }
            None => options = options.host(&self.host),
        }

        Ok(options)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("scale_table", &self.scale_table)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_url", &self.base_url)
            .field("login_cnpj", &self.login_cnpj)
            .field("receiver_code", &self.receiver_code)
            .field("receiver_name", &self.receiver_name)
            .field("production", &self.production)
            .field("screenshot_dir", &self.screenshot_dir)
            .finish_non_exhaustive()
    }
}
