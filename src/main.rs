//! xbase CLI
//!
//! Command-line front end for xBase tables:
//! - Create tables and show their structure
//! - Append, replace, delete and recall records
//! - Build index tags, list in index order and seek
//! - Pack and zap

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xbase_engine::config::{generate_default_config, Config, LoggingConfig};
use xbase_engine::schema::parse_field_list;
use xbase_engine::storage::{FieldDescriptor, Record};
use xbase_engine::Area;

#[derive(Parser)]
#[command(name = "xbase")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "xBase tables with persistent B-tree indexes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a table, replacing any existing one
    Create {
        table: String,
        /// Field list, e.g. "NAME C 10, AGE N 3 0, DOB D"
        #[arg(short = 'F', long)]
        fields: String,
    },

    /// Show header and field directory
    Structure { table: String },

    /// Append a record from FIELD=VALUE pairs
    Append {
        table: String,
        values: Vec<String>,
    },

    /// Change fields of one record
    Replace {
        table: String,
        recno: u32,
        values: Vec<String>,
    },

    /// List records, physically or in index order
    List {
        table: String,
        /// Tag to order by
        #[arg(short, long)]
        order: Option<String>,
        /// Walk the order backwards
        #[arg(short, long)]
        descending: bool,
        /// Include deleted records
        #[arg(short, long)]
        all: bool,
    },

    /// Create an index tag (no-op if it exists)
    Index {
        table: String,
        /// Tag name
        name: String,
        /// Key expression, e.g. "LAST+FIRST" (default: the tag name)
        expr: Option<String>,
        #[arg(short, long)]
        descending: bool,
        #[arg(short, long)]
        unique: bool,
        #[arg(long)]
        case_sensitive: bool,
    },

    /// List index tags
    Tags { table: String },

    /// Rebuild every index tag
    Reindex { table: String },

    /// Remove an index tag
    DropTag { table: String, name: String },

    /// Find the first record at or after a key
    Seek {
        table: String,
        /// Tag to search
        tag: String,
        /// One value per key field
        key: Vec<String>,
        #[arg(short, long)]
        descending: bool,
    },

    /// Mark a record deleted
    Delete { table: String, recno: u32 },

    /// Clear a record's delete mark
    Recall { table: String, recno: u32 },

    /// Remove deleted records and renumber
    Pack { table: String },

    /// Mark every record deleted and drop all tags
    Zap { table: String },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    let json = match cli.format.as_str() {
        "json" => true,
        "table" => false,
        other => bail!("Unknown output format: {}", other),
    };

    match cli.command {
        Commands::Create { table, fields } => {
            let fields = parse_field_list(&fields)?;
            let mut area = Area::with_config(&config);
            area.create(config.table_path(&table), &fields)?;
            println!("Created {} with {} fields", table, fields.len());
            area.close()?;
        }

        Commands::Structure { table } => {
            let area = open(&config, &table)?;
            let t = area.table()?;
            let header = t.header();
            if json {
                let fields: Vec<_> = t
                    .fields()
                    .iter()
                    .map(|f| {
                        serde_json::json!({
                            "name": f.name,
                            "type": (f.field_type.code() as char).to_string(),
                            "length": f.length,
                            "decimals": f.decimals,
                        })
                    })
                    .collect();
                let body = serde_json::json!({
                    "path": t.path(),
                    "records": header.record_count,
                    "record_length": header.record_length,
                    "last_update": header.last_updated_date().map(|d| d.to_string()),
                    "fields": fields,
                    "tags": area.indexes().tag_names(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("Table:       {}", t.path().display());
                println!("Records:     {}", header.record_count);
                println!("Record size: {}", header.record_length);
                if let Some(date) = header.last_updated_date() {
                    println!("Last update: {}", date);
                }
                println!();
                println!("{:<3} {:<10} {:<4} {:>5} {:>3}", "#", "Field", "Type", "Width", "Dec");
                for (i, f) in t.fields().iter().enumerate() {
                    println!(
                        "{:<3} {:<10} {:<4} {:>5} {:>3}",
                        i + 1,
                        f.name,
                        f.field_type.code() as char,
                        f.length,
                        f.decimals
                    );
                }
                println!("{:<19} {:>5}", "** Total **", header.record_length);
            }
        }

        Commands::Append { table, values } => {
            let mut area = open(&config, &table)?;
            let pairs = parse_assignments(&values)?;
            let recno = area.append_blank()?;
            for (name, value) in &pairs {
                area.set_by_name(name, value)?;
            }
            area.write_current()?;
            println!("Appended record {}", recno);
            area.close()?;
        }

        Commands::Replace { table, recno, values } => {
            let mut area = open(&config, &table)?;
            let pairs = parse_assignments(&values)?;
            area.goto_record(recno)?;
            for (name, value) in &pairs {
                area.set_by_name(name, value)?;
            }
            area.write_current()?;
            println!("Replaced {} field(s) in record {}", pairs.len(), recno);
            area.close()?;
        }

        Commands::List {
            table,
            order,
            descending,
            all,
        } => {
            let mut area = open(&config, &table)?;
            if let Some(tag) = &order {
                area.set_active(tag)?;
                if descending {
                    area.set_direction(false);
                }
            }

            let mut records = Vec::new();
            for recno in area.ordered_recnos()? {
                let record = area.read_record(recno)?;
                if all || !record.deleted {
                    records.push(record);
                }
            }
            let t = area.table()?;
            print_records(t.fields(), &records, json)?;
        }

        Commands::Index {
            table,
            name,
            expr,
            descending,
            unique,
            case_sensitive,
        } => {
            let mut area = open(&config, &table)?;
            let expr = expr.unwrap_or_else(|| name.clone());
            let mut spec = area.index_on(&name, &expr, !descending)?.unique(unique);
            if case_sensitive {
                spec = spec.case_insensitive(false);
            }
            let tag = area.ensure_tag(spec)?;
            println!("Tag {}: {} entries", tag.spec(), tag.len());
            area.close()?;
        }

        Commands::Tags { table } => {
            let area = open(&config, &table)?;
            let indexes = area.indexes();
            if json {
                let tags: Vec<_> = indexes
                    .tags()
                    .map(|tag| {
                        let spec = tag.spec();
                        serde_json::json!({
                            "name": spec.name,
                            "expression": spec.expression(),
                            "ascending": spec.ascending,
                            "unique": spec.unique,
                            "case_insensitive": spec.case_insensitive,
                            "entries": tag.len(),
                            "height": tag.tree().height(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&tags)?);
            } else {
                for tag in indexes.tags() {
                    println!(
                        "{:<10} {:>8} entries  height {}  {}",
                        tag.name(),
                        tag.len(),
                        tag.tree().height(),
                        tag.spec()
                    );
                }
                println!("{}", indexes.stats());
            }
        }

        Commands::Reindex { table } => {
            let mut area = open(&config, &table)?;
            area.reindex()?;
            println!("Rebuilt {} tag(s)", area.indexes().tag_names().len());
            area.close()?;
        }

        Commands::DropTag { table, name } => {
            let mut area = open(&config, &table)?;
            if !area.drop_tag(&name)? {
                bail!("No tag named {}", name);
            }
            println!("Dropped tag {}", name.to_ascii_uppercase());
            area.close()?;
        }

        Commands::Seek {
            table,
            tag,
            key,
            descending,
        } => {
            let mut area = open(&config, &table)?;
            area.set_active(&tag)?;
            if descending {
                area.set_direction(false);
            }
            let recno = area
                .seek(key.as_slice())
                .with_context(|| format!("seek {} in tag {}", key.join(" "), tag))?;
            let record = area.read_record(recno)?;
            let t = area.table()?;
            print_records(t.fields(), &[record], json)?;
        }

        Commands::Delete { table, recno } => {
            let mut area = open(&config, &table)?;
            area.goto_record(recno)?;
            area.delete_current()?;
            println!("Deleted record {}", recno);
            area.close()?;
        }

        Commands::Recall { table, recno } => {
            let mut area = open(&config, &table)?;
            area.goto_record(recno)?;
            area.recall_current()?;
            println!("Recalled record {}", recno);
            area.close()?;
        }

        Commands::Pack { table } => {
            let mut area = open(&config, &table)?;
            let outcome = area.pack()?;
            println!(
                "Packed {}: {} kept, {} removed",
                table, outcome.kept, outcome.removed
            );
            area.close()?;
        }

        Commands::Zap { table } => {
            let mut area = open(&config, &table)?;
            let flagged = area.zap()?;
            println!("Zapped {}: {} record(s) marked deleted", table, flagged);
            area.close()?;
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Wrote config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "xbase_engine={0},xbase={0}",
            config.level
        ))
    });

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
    }
    Ok(())
}

fn open(config: &Config, table: &str) -> anyhow::Result<Area> {
    let path = config.table_path(table);
    if !path.exists() {
        bail!("Table {} does not exist (looked for {:?})", table, path);
    }
    let mut area = Area::with_config(config);
    area.open(&path)
        .with_context(|| format!("opening {:?}", path))?;
    Ok(area)
}

/// Split `FIELD=VALUE` arguments
fn parse_assignments(values: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    values
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => Ok((name.trim().to_string(), value.to_string())),
            None => bail!("Expected FIELD=VALUE, got '{}'", pair),
        })
        .collect()
}

fn print_records(fields: &[FieldDescriptor], records: &[Record], json: bool) -> anyhow::Result<()> {
    if json {
        let rows: Vec<_> = records
            .iter()
            .map(|record| {
                let mut row = serde_json::Map::new();
                row.insert("recno".into(), record.recno.into());
                row.insert("deleted".into(), record.deleted.into());
                for (field, value) in fields.iter().zip(&record.values) {
                    row.insert(field.name.clone(), value.clone().into());
                }
                serde_json::Value::Object(row)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let widths: Vec<usize> = fields
        .iter()
        .map(|f| (f.length as usize).max(f.name.len()))
        .collect();

    let mut line = format!("{:>7}  ", "Record#");
    for (f, w) in fields.iter().zip(&widths) {
        line.push_str(&format!("{:<w$} ", f.name, w = *w));
    }
    println!("{}", line.trim_end());

    for record in records {
        let flag = if record.deleted { '*' } else { ' ' };
        let mut line = format!("{:>7}{} ", record.recno, flag);
        for (value, w) in record.values.iter().zip(&widths) {
            line.push_str(&format!("{:<w$} ", value, w = *w));
        }
        println!("{}", line.trim_end());
    }
    Ok(())
}
