use anyhow::{anyhow, Result};
use config::{Config, Environment, FileFormat};
use std::fs;
use std::path::{Path, PathBuf};

use crate::database::{DbLocation, SchemaPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct SqlgateConfig {
    /// Path of the INI file this configuration was loaded from
    pub config_path: PathBuf,

    /// Directory holding the current database file
    pub db_folder: PathBuf,

    /// Directory for archived databases
    pub archive_folder: PathBuf,

    /// File name of the current database inside `db_folder`
    pub db_name: String,

    /// DDL script run when the database is created
    pub schema_script: PathBuf,

    /// When the schema script runs
    pub schema_policy: SchemaPolicy,
}

const DEFAULT_DB_NAME: &str = "database.db3";

const CONFIG_TEMPLATE: &str = r#"### sqlgate configuration file
###
### every key can be overridden from the environment,
### e.g. SQLGATE_DB__DB_NAME=other.db3

[db]
### directory holding the current database
db_folder = {db_folder}

### directory for archived databases
archive_folder = {archive_folder}

### current database file name inside db_folder
db_name = {db_name}

### DDL script run when the database is created
schema_script = {schema_script}

### create-if-missing: run the script only when the database file is absent
### recreate: delete the database and run the script on every open
schema_policy = {schema_policy}
"#;

impl SqlgateConfig {
    /// Load the configuration, writing a default file first if none exists
    ///
    /// Without an explicit path, `$HOME/.sqlgate/sqlgate.ini` is used.
    pub fn new(path: &Option<String>) -> Result<SqlgateConfig> {
        let home_dir = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => home_dir.join(".sqlgate").join("sqlgate.ini"),
        };
        Self::load(&config_path, &home_dir)
    }

    /// Load the configuration at `config_path`, resolving `~` against `home_dir`
    pub fn load(config_path: &Path, home_dir: &Path) -> Result<SqlgateConfig> {
        Self::load_with_env(config_path, home_dir, env_overrides())
    }

    fn load_with_env(
        config_path: &Path,
        home_dir: &Path,
        env: Environment,
    ) -> Result<SqlgateConfig> {
        if !config_path.exists() {
            let default = Self::defaults(config_path, home_dir);
            default.save()?;
            tracing::info!("created default configuration {}", config_path.display());
        }

        let path_str = config_path
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert config path to string"))?;

        let settings = Config::builder()
            .add_source(config::File::new(path_str, FileFormat::Ini))
            .add_source(env)
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let defaults = Self::defaults(config_path, home_dir);
        let get_path = |key: &str, default: PathBuf| -> PathBuf {
            settings
                .get_string(&format!("db.{}", key))
                .map(|s| expand_home(&s, home_dir))
                .unwrap_or(default)
        };

        let schema_policy = match settings.get_string("db.schema_policy") {
            Ok(s) => s.parse::<SchemaPolicy>().map_err(|e| anyhow!(e))?,
            Err(_) => defaults.schema_policy,
        };

        Ok(SqlgateConfig {
            config_path: config_path.to_path_buf(),
            db_folder: get_path("db_folder", defaults.db_folder),
            archive_folder: get_path("archive_folder", defaults.archive_folder),
            db_name: settings
                .get_string("db.db_name")
                .unwrap_or(defaults.db_name),
            schema_script: get_path("schema_script", defaults.schema_script),
            schema_policy,
        })
    }

    fn defaults(config_path: &Path, home_dir: &Path) -> SqlgateConfig {
        let base = home_dir.join(".sqlgate");
        SqlgateConfig {
            config_path: config_path.to_path_buf(),
            archive_folder: base.join("archives"),
            schema_script: base.join("sql_request").join("database_creator.sql"),
            db_folder: base,
            db_name: DEFAULT_DB_NAME.to_string(),
            schema_policy: SchemaPolicy::default(),
        }
    }

    /// Render the configuration as INI text
    pub fn render(&self) -> String {
        CONFIG_TEMPLATE
            .replace("{db_folder}", &self.db_folder.to_string_lossy())
            .replace("{archive_folder}", &self.archive_folder.to_string_lossy())
            .replace("{db_name}", &self.db_name)
            .replace("{schema_script}", &self.schema_script.to_string_lossy())
            .replace("{schema_policy}", &self.schema_policy.to_string())
    }

    /// Write the configuration back to its file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Unable to create config directory: {}", e))?;
        }
        fs::write(&self.config_path, self.render()).map_err(|e| {
            anyhow!(
                "Unable to write config file {}: {}",
                self.config_path.display(),
                e
            )
        })
    }

    /// Point the configuration at another database folder
    pub fn set_db_folder(&mut self, folder: impl Into<PathBuf>) -> Result<()> {
        let folder = folder.into();
        fs::create_dir_all(&folder)
            .map_err(|e| anyhow!("Unable to create database folder: {}", e))?;
        self.db_folder = folder;
        self.save()
    }

    pub fn set_archives_folder(&mut self, folder: impl Into<PathBuf>) -> Result<()> {
        let folder = folder.into();
        fs::create_dir_all(&folder)
            .map_err(|e| anyhow!("Unable to create archives folder: {}", e))?;
        self.archive_folder = folder;
        self.save()
    }

    /// Switch the current database file name
    pub fn set_db_current(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(anyhow!("Invalid database file name: '{}'", name));
        }
        fs::create_dir_all(&self.db_folder)
            .map_err(|e| anyhow!("Unable to create database folder: {}", e))?;
        self.db_name = name.to_string();
        self.save()
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let db_path = self.full_path();
        let mut lines = vec![
            format!("Config File:        {}", self.config_path.display()),
            format!("Database Folder:    {}", self.db_folder.display()),
            format!("Database:           {}", self.db_name),
            format!("Archives Folder:    {}", self.archive_folder.display()),
            format!("Schema Script:      {}", self.schema_script.display()),
            format!("Schema Policy:      {}", self.schema_policy),
        ];

        match fs::metadata(&db_path) {
            Ok(meta) => lines.push(format!("Database Size:      {} bytes", meta.len())),
            Err(_) => lines.push("Database Size:      (not created)".to_string()),
        }

        lines.join("\n")
    }
}

impl DbLocation for SqlgateConfig {
    fn db_folder(&self) -> PathBuf {
        self.db_folder.clone()
    }

    fn db_current(&self) -> String {
        self.db_name.clone()
    }

    fn archives_folder(&self) -> PathBuf {
        self.archive_folder.clone()
    }
}

/// Settings from the environment override the file, with a prefix of SQLGATE,
/// e.g. `SQLGATE_DB__DB_NAME=other.db3 sqlgate tables`
fn env_overrides() -> Environment {
    Environment::with_prefix("SQLGATE")
        .prefix_separator("_")
        .separator("__")
}

fn expand_home(value: &str, home_dir: &Path) -> PathBuf {
    let value = value.trim();
    match value.strip_prefix('~') {
        Some(rest) => home_dir.join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(value),
    }
}
