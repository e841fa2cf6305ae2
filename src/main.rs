use anyhow::{bail, Context, Result};
use appsheet_client::config::{Config, OutputFormat};
use appsheet_client::table_display::display_response;
use appsheet_client::{logging, Connector, Properties, Row};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "appsheet", version, about = "Call the AppSheet REST API from the command line")]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log requests and responses to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured output format
    #[arg(long, value_enum, global = true)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add rows to a table
    Add(TableArgs),
    /// Delete rows identified by their key columns
    Delete(TableArgs),
    /// Update rows identified by their key columns
    Edit(TableArgs),
    /// Read rows by key or with --selector
    Find(TableArgs),
    /// Invoke a named app action on rows
    Action {
        #[command(flatten)]
        table: TableArgs,
        /// Action name, sent as-is
        #[arg(long = "name", short = 'n')]
        name: String,
    },
    /// Write a commented default config file
    GenerateConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct TableArgs {
    /// Table name
    table: String,

    /// Rows as a JSON array of objects (a single object is also accepted)
    #[arg(long, conflicts_with = "rows_file")]
    rows: Option<String>,

    /// Read rows from a JSON file
    #[arg(long)]
    rows_file: Option<PathBuf>,

    /// Selector expression, e.g. "Filter(People, [Age] >= 21)"
    #[arg(long)]
    selector: Option<String>,

    #[arg(long)]
    locale: Option<String>,

    #[arg(long)]
    timezone: Option<String>,

    #[arg(long)]
    user_id: Option<String>,

    /// Extra property as KEY=VALUE (repeatable)
    #[arg(long = "property", short = 'p', value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

impl TableArgs {
    fn rows(&self) -> Result<Vec<Row>> {
        let text = match (&self.rows, &self.rows_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read rows from {}", path.display()))?,
            (None, None) => return Ok(Vec::new()),
        };
        parse_rows(&text)
    }

    fn properties(&self) -> Result<Properties> {
        let mut props = Properties::new();
        if let Some(selector) = &self.selector {
            props = props.selector(selector);
        }
        if let Some(locale) = &self.locale {
            props = props.locale(locale);
        }
        if let Some(timezone) = &self.timezone {
            props = props.timezone(timezone);
        }
        if let Some(user_id) = &self.user_id {
            props = props.user_id(user_id);
        }
        for pair in &self.properties {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Property '{}' is not KEY=VALUE", pair))?;
            props = props.insert(key.trim(), value);
        }
        Ok(props)
    }
}

fn parse_rows(text: &str) -> Result<Vec<Row>> {
    let value: Value = serde_json::from_str(text).context("Rows are not valid JSON")?;
    match value {
        Value::Object(row) => Ok(vec![row]),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(row) => Ok(row),
                other => bail!("Row {} is not an object: {}", i, other),
            })
            .collect(),
        other => bail!("Rows must be a JSON object or array, got {}", other),
    }
}

fn generate_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Error creating config directory {}", parent.display()))?;
    }
    fs::write(&path, Config::create_default_with_comments())?;
    println!("Configuration file created at: {:?}", path);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let load = || -> Result<(Connector, OutputFormat)> {
        let config = match &cli.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        Ok((config.connector()?, cli.format.unwrap_or(config.output.format)))
    };

    let (response, format) = match &cli.command {
        Command::GenerateConfig { force } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => Config::get_config_path()?,
            };
            return generate_config(path, *force);
        }
        Command::Add(args) => {
            let (connector, format) = load()?;
            let response = connector.add(&args.table, &args.rows()?, Some(&args.properties()?))?;
            (response, format)
        }
        Command::Delete(args) => {
            let (connector, format) = load()?;
            let response =
                connector.delete(&args.table, &args.rows()?, Some(&args.properties()?))?;
            (response, format)
        }
        Command::Edit(args) => {
            let (connector, format) = load()?;
            let response = connector.edit(&args.table, &args.rows()?, Some(&args.properties()?))?;
            (response, format)
        }
        Command::Find(args) => {
            let (connector, format) = load()?;
            let response = connector.find(&args.table, &args.rows()?, Some(&args.properties()?))?;
            (response, format)
        }
        Command::Action { table, name } => {
            let (connector, format) = load()?;
            let response =
                connector.invoke(&table.table, &table.rows()?, name, Some(&table.properties()?))?;
            (response, format)
        }
    };

    display_response(&response, format)
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
