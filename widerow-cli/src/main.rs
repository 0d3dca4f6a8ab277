use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use widerow_client::{
    Client, ClientConfig, ClientError, MutationEntry, ReadRowsOptions, Row, RowData, Table,
};

mod table;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Table format (default)
    Table,
    /// Pretty JSON
    Json,
    /// JSON Lines (one row per line)
    Jsonl,
}

#[derive(Parser)]
#[command(name = "widerow")]
#[command(about = "Wide-column table CLI", long_about = None)]
struct Cli {
    /// Server address
    #[arg(long, global = true, default_value = "http://127.0.0.1:8086")]
    endpoint: String,

    /// Project id
    #[arg(long, global = true, default_value = "")]
    project: String,

    /// Instance id
    #[arg(long, global = true, default_value = "")]
    instance: String,

    /// Application profile
    #[arg(long, global = true)]
    app_profile: Option<String>,

    /// Per-attempt deadline in milliseconds
    #[arg(long, global = true)]
    attempt_timeout_ms: Option<u64>,

    /// Overall deadline of each read or write, retries included, in milliseconds
    #[arg(long, global = true)]
    total_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read rows
    Read {
        /// Table id
        table: String,
        /// Row key to read (repeatable)
        #[arg(short, long = "key")]
        keys: Vec<String>,
        /// First row key, inclusive
        #[arg(long)]
        start: Option<String>,
        /// Last row key, inclusive
        #[arg(long)]
        end: Option<String>,
        /// Row key prefix (repeatable)
        #[arg(short, long = "prefix")]
        prefixes: Vec<String>,
        /// Maximum number of rows to return
        #[arg(short, long)]
        limit: Option<u64>,
        /// Output format (table, json, jsonl)
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Write cells to one row
    Set {
        /// Table id
        table: String,
        /// Row key
        key: String,
        /// Cells as family:qualifier=value
        #[arg(required = true)]
        cells: Vec<String>,
        /// Cell timestamp in microseconds (defaults to server time)
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Delete a whole row
    DeleteRow {
        /// Table id
        table: String,
        /// Row key
        key: String,
    },
    /// Import rows from a JSON Lines file
    Import {
        /// Table id
        table: String,
        /// File with one {"key": ..., "cells": [...]} object per line
        file: PathBuf,
        /// Rows per mutation batch
        #[arg(long, default_value = "500")]
        batch_size: usize,
    },
}

/// One line of an import file.
#[derive(Debug, Deserialize)]
struct ImportRow {
    key: String,
    cells: Vec<ImportCell>,
}

#[derive(Debug, Deserialize)]
struct ImportCell {
    family: String,
    qualifier: String,
    value: String,
    #[serde(default)]
    timestamp_micros: Option<i64>,
}

impl From<ImportRow> for RowData {
    fn from(row: ImportRow) -> Self {
        row.cells.into_iter().fold(RowData::new(row.key), |data, cell| {
            match cell.timestamp_micros {
                Some(ts) => data.cell_at(cell.family, cell.qualifier, ts, cell.value),
                None => data.cell(cell.family, cell.qualifier, cell.value),
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Default to info level, can override with RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.project, cli.instance).with_endpoint(cli.endpoint);
    if let Some(profile) = cli.app_profile {
        config = config.with_app_profile(profile);
    }
    if let Some(ms) = cli.attempt_timeout_ms {
        config = config.with_attempt_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.total_timeout_ms {
        config = config.with_total_timeout(Duration::from_millis(ms));
    }

    info!("Connecting to {}", config.endpoint);
    let client = Client::connect(config).await.context("Failed to connect")?;

    match cli.command {
        Commands::Read {
            table,
            keys,
            start,
            end,
            prefixes,
            limit,
            output,
        } => {
            let mut options = ReadRowsOptions::new().keys(keys).prefixes(prefixes);
            if let Some(start) = start {
                options = options.start(start);
            }
            if let Some(end) = end {
                options = options.end(end);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }

            let table = client.table(&table);
            match output {
                OutputFormat::Table => {
                    let rows = table.get_rows(options).await.context("Failed to read rows")?;
                    println!("{}", table::format_rows_table(&rows));
                    println!();
                    println!("Rows: {}", rows.len());
                }
                OutputFormat::Json => {
                    let rows = table.get_rows(options).await.context("Failed to read rows")?;
                    let json: Vec<_> = rows.iter().map(row_to_json).collect();
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                OutputFormat::Jsonl => {
                    // Stream rows out as they arrive
                    let mut scan = table.read_rows(options)?;
                    while let Some(row) = scan.next_row().await.context("Failed to read rows")? {
                        println!("{}", serde_json::to_string(&row_to_json(&row))?);
                    }
                }
            }
        }

        Commands::Set {
            table,
            key,
            cells,
            timestamp,
        } => {
            let mut entry = MutationEntry::new(key);
            for arg in &cells {
                let (family, qualifier, value) = parse_cell_arg(arg)?;
                entry = match timestamp {
                    Some(ts) => entry.set_cell_at(family, qualifier, ts, value),
                    None => entry.set_cell(family, qualifier, value),
                };
            }
            client
                .table(&table)
                .mutate_row(entry)
                .await
                .context("Failed to write cells")?;
            println!("✓ {} cell(s) written", cells.len());
        }

        Commands::DeleteRow { table, key } => {
            client
                .table(&table)
                .mutate_row(MutationEntry::new(key).delete_row())
                .await
                .context("Failed to delete row")?;
            println!("✓ Row deleted");
        }

        Commands::Import {
            table,
            file,
            batch_size,
        } => {
            let table = client.table(&table);
            let (written, failed) = import_file(&table, &file, batch_size.max(1)).await?;
            println!("Imported {} row(s), {} failed", written, failed);
            if failed > 0 {
                bail!("{} row(s) could not be written", failed);
            }
        }
    }

    Ok(())
}

/// Apply a JSON Lines file in batches. Returns (written, failed) row counts.
async fn import_file(table: &Table, file: &Path, batch_size: usize) -> Result<(usize, usize)> {
    let reader = BufReader::new(
        std::fs::File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );

    let mut batch: Vec<RowData> = Vec::with_capacity(batch_size);
    let mut first_line = 1;
    let (mut written, mut failed) = (0, 0);

    for (i, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read import file")?;
        if line.trim().is_empty() {
            continue;
        }
        let row: ImportRow = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on line {}", i + 1))?;
        if batch.is_empty() {
            first_line = i + 1;
        }
        batch.push(row.into());

        if batch.len() >= batch_size {
            let n = apply_batch(table, std::mem::take(&mut batch), first_line).await?;
            written += n.0;
            failed += n.1;
        }
    }
    if !batch.is_empty() {
        let n = apply_batch(table, batch, first_line).await?;
        written += n.0;
        failed += n.1;
    }

    Ok((written, failed))
}

async fn apply_batch(table: &Table, rows: Vec<RowData>, first_line: usize) -> Result<(usize, usize)> {
    let total = rows.len();
    match table.insert(rows).await {
        Ok(()) => Ok((total, 0)),
        Err(ClientError::PartialFailure(partial)) => {
            for failure in &partial.failures {
                warn!("Batch starting at line {}: {}", first_line, failure);
            }
            Ok((total - partial.len(), partial.len()))
        }
        Err(e) => Err(e).context("Failed to apply import batch"),
    }
}

/// Split `family:qualifier=value`
fn parse_cell_arg(arg: &str) -> Result<(String, String, String)> {
    let Some((column, value)) = arg.split_once('=') else {
        bail!("Cell '{}' must look like family:qualifier=value", arg);
    };
    let Some((family, qualifier)) = column.split_once(':') else {
        bail!("Column '{}' must look like family:qualifier", column);
    };
    if family.is_empty() {
        bail!("Cell '{}' has an empty family", arg);
    }
    Ok((family.to_string(), qualifier.to_string(), value.to_string()))
}

fn row_to_json(row: &Row) -> serde_json::Value {
    let mut families = serde_json::Map::new();
    for family in &row.families {
        let mut columns = serde_json::Map::new();
        for column in &family.columns {
            let cells: Vec<_> = column
                .cells
                .iter()
                .map(|cell| {
                    let mut obj = serde_json::Map::new();
                    obj.insert("value".to_string(), bytes_to_json(&cell.value));
                    obj.insert(
                        "timestamp_micros".to_string(),
                        serde_json::Value::Number(cell.timestamp_micros.into()),
                    );
                    if !cell.labels.is_empty() {
                        obj.insert("labels".to_string(), serde_json::json!(cell.labels));
                    }
                    serde_json::Value::Object(obj)
                })
                .collect();
            columns.insert(
                String::from_utf8_lossy(&column.qualifier).into_owned(),
                serde_json::Value::Array(cells),
            );
        }
        families.insert(family.name.clone(), serde_json::Value::Object(columns));
    }

    serde_json::json!({
        "key": bytes_to_json(&row.key),
        "families": families,
    })
}

/// UTF-8 as a string, anything else as `{"base64": ...}`
fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => serde_json::Value::String(s.to_string()),
        Err(_) => serde_json::json!({
            "base64": base64::engine::general_purpose::STANDARD.encode(bytes)
        }),
    }
}
