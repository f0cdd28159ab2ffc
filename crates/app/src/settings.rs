//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml` and `EXPENSES_` environment variables, e.g.
//! `EXPENSES_APP__LEVEL=debug`.
//!
//! ```toml
//! database = { sqlite = "expenses.db" }
//!
//! [app]
//! level = "info"
//! timezone = "Europe/Rome"
//! ```
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_SQLITE_PATH: &str = "expenses.db";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
    pub timezone: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    database: Option<Database>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("app.timezone", "UTC")?
            .add_source(File::with_name("settings").required(false))
            .add_source(Environment::with_prefix("EXPENSES").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn database(&self) -> Database {
        self.database
            .clone()
            .unwrap_or_else(|| Database::Sqlite(DEFAULT_SQLITE_PATH.to_string()))
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz, String> {
        self.app
            .timezone
            .parse()
            .map_err(|_| format!("unknown time zone: {}", self.app.timezone))
    }
}
