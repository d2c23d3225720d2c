mod support;

use std::collections::HashMap;

use mtr_core::config::{Config, ConfigError, DEFAULT_BASE_URL, DEFAULT_SCALE_TABLE, DEFAULT_WEBDRIVER_URL};

fn from(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
    Config::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn defaults_apply_when_optional_values_are_absent() {
    let mut vars = support::env(".");
    vars.remove("MTR_BASE_URL");
    vars.remove("SCREENSHOT_DIR");

    let config = from(&vars).expect("config");

    assert_eq!(config.portal.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.database.scale_table, DEFAULT_SCALE_TABLE);
    assert_eq!(config.browser.webdriver_url, DEFAULT_WEBDRIVER_URL);
    assert!(!config.portal.production);
    assert!(!config.browser.headless);
    assert_eq!(config.portal.screenshot_dir, std::path::PathBuf::from("."));
    assert_eq!(config.waste.residue_code, "999999");
    assert_eq!(config.waste.waste_class, "II A");
}

#[test]
fn flags_and_trailing_slash() {
    let mut vars = support::env(".");
    vars.insert("MTR_BASE_URL", "https://mtr.example".to_string());
    vars.insert("PRODUCAO", "1".to_string());
    vars.insert("HEADLESS", " 1 ".to_string());

    let config = from(&vars).expect("config");

    assert_eq!(config.portal.base_url, "https://mtr.example/");
    assert!(config.portal.production);
    assert!(config.browser.headless);
}

#[test]
fn missing_required_value_is_named() {
    let mut vars = support::env(".");
    vars.insert("RECEBEDOR", "   ".to_string());

    let err = from(&vars).expect_err("missing receiver");
    assert!(matches!(err, ConfigError::Missing(ref key) if key == "RECEBEDOR"));
}

#[test]
fn database_parts_are_required_without_url() {
    let mut vars = support::env(".");
    vars.remove("DATABASE_URL");
    assert!(matches!(from(&vars), Err(ConfigError::Missing(ref key)) if key == "DB_HOST"));

    vars.insert("DB_HOST", "scale.local,1433".to_string());
    vars.insert("DB_NOME", "Supervisor".to_string());
    vars.insert("DB_USUARIO", "robot".to_string());
    vars.insert("DB_SENHA", "secret".to_string());
    let config = from(&vars).expect("config");

    let options = config.database.connect_options().expect("options");
    assert_eq!(options.get_host(), "scale.local");
    assert_eq!(options.get_port(), 1433);
    assert_eq!(options.get_database(), Some("Supervisor"));
}

#[test]
fn unsupported_driver_is_rejected() {
    let mut vars = support::env(".");
    vars.remove("DATABASE_URL");
    vars.insert("DB_DRIVER", "ODBC Driver 17 for SQL Server".to_string());
    vars.insert("DB_HOST", "scale.local".to_string());
    vars.insert("DB_NOME", "Supervisor".to_string());
    vars.insert("DB_USUARIO", "robot".to_string());
    vars.insert("DB_SENHA", "secret".to_string());

    let config = from(&vars).expect("config");
    assert!(matches!(
        config.database.connect_options(),
        Err(ConfigError::UnsupportedDriver(_))
    ));
}

#[test]
fn debug_output_hides_secrets() {
    let config = from(&support::env(".")).expect("config");
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("senha"));
    assert!(!rendered.contains("secret"));
}
