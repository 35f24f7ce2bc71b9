use anyhow::Result;
use clap::Args;
use serde_json::json;
use sqlgate::database::DbLocation;
use sqlgate::SqlgateConfig;
use std::path::PathBuf;

use super::output::OutputFormat;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Move the database folder
    #[clap(long)]
    pub set_folder: Option<PathBuf>,

    /// Move the archives folder
    #[clap(long)]
    pub set_archives: Option<PathBuf>,

    /// Switch the current database file name
    #[clap(long)]
    pub set_db: Option<String>,
}

pub fn run(config: &mut SqlgateConfig, args: ConfigArgs, output_format: OutputFormat) -> Result<()> {
    let ConfigArgs {
        set_folder,
        set_archives,
        set_db,
    } = args;

    if let Some(folder) = set_folder {
        config.set_db_folder(folder)?;
    }
    if let Some(folder) = set_archives {
        config.set_archives_folder(folder)?;
    }
    if let Some(name) = set_db {
        config.set_db_current(&name)?;
    }

    match output_format {
        OutputFormat::Table | OutputFormat::Markdown => println!("{}", config.summary()),
        _ => {
            let info = json!({
                "config_file": config.config_path,
                "db_folder": config.db_folder(),
                "db_name": config.db_current(),
                "database": config.full_path(),
                "exists": config.full_path().exists(),
                "archive_folder": config.archives_folder(),
                "schema_script": config.schema_script,
                "schema_policy": config.schema_policy.to_string(),
            });
            if output_format == OutputFormat::JsonPretty {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{}", info);
            }
        }
    }
    Ok(())
}
