use clap::{Parser, Subcommand};
use sqlgate::boundary::{ErrorBoundary, StderrSink, TracingSink};
use sqlgate::database::Database;
use sqlgate::SqlgateConfig;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::output::OutputFormat;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.sqlgate/sqlgate.ini is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output format: table, markdown, json, json-pretty, json-line
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the configuration
    Config(ConfigArgs),

    /// List tables and views
    Tables,

    /// List the columns of a table
    Columns {
        /// Table name
        table: String,
    },

    /// Show the row with the given id
    Get {
        /// Table name
        table: String,
        /// Row id
        id: i64,
    },

    /// Show the first row whose key column equals a value
    Find {
        /// Table name
        table: String,
        /// Value to look for
        value: String,
        /// Column to match against
        #[clap(short, long, default_value = "name")]
        key: String,
    },

    /// Show rows matching column=value filters
    Select {
        /// Table name
        table: String,
        /// Match any filter instead of all of them
        #[clap(long)]
        any: bool,
        /// Filters as column=value
        #[clap(required = true)]
        filters: Vec<String>,
    },

    /// Insert a row, or update it when an id is given
    Upsert {
        /// Table name
        table: String,
        /// Fields as column=value; an empty value is left out
        #[clap(required = true)]
        fields: Vec<String>,
        /// Show the result without committing it
        #[clap(long)]
        no_commit: bool,
    },

    /// Delete the row with the given id
    Delete {
        /// Table name
        table: String,
        /// Row id
        id: i64,
    },

    /// List links whose child rows carry one of the given tags
    Links {
        /// Child table name
        table: String,
        /// Link ids, comma separated
        #[clap(long, value_delimiter = ',', required = true)]
        link_ids: Vec<i64>,
        /// Tag ids, comma separated
        #[clap(long, value_delimiter = ',')]
        tags: Vec<i64>,
    },
}

fn boundary<'a>(debug: bool) -> ErrorBoundary<'a> {
    let boundary = ErrorBoundary::new().with_sink(StderrSink);
    if debug {
        boundary.with_sink(TracingSink)
    } else {
        boundary
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .init();
    }

    let Ok(mut config) = boundary(cli.debug).run(|| SqlgateConfig::new(&cli.config)) else {
        std::process::exit(1);
    };

    let format = cli.format;
    let command = match cli.command {
        Commands::Config(args) => {
            if boundary(cli.debug)
                .run(|| commands::config::run(&mut config, args, format))
                .is_err()
            {
                std::process::exit(1);
            }
            return;
        }
        command => command,
    };

    let Ok(db) = boundary(cli.debug).run(|| Ok(Database::open(&config)?)) else {
        std::process::exit(1);
    };

    let result = boundary(cli.debug).closing(&db).run(|| match command {
        Commands::Config(_) => Ok(()),
        Commands::Tables => commands::records::tables(&db, format),
        Commands::Columns { table } => commands::records::columns(&db, &table, format),
        Commands::Get { table, id } => commands::records::get(&db, &table, id, format),
        Commands::Find { table, value, key } => {
            commands::records::find(&db, &table, &key, &value, format)
        }
        Commands::Select {
            table,
            any,
            filters,
        } => commands::records::select(&db, &table, any, &filters, format),
        Commands::Upsert {
            table,
            fields,
            no_commit,
        } => commands::records::upsert(&db, &table, &fields, !no_commit, format),
        Commands::Delete { table, id } => commands::records::delete(&db, &table, id),
        Commands::Links {
            table,
            link_ids,
            tags,
        } => commands::records::links(&db, &table, &link_ids, &tags, format),
    });

    if result.is_err() {
        std::process::exit(1);
    }
}
