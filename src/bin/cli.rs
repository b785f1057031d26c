//! AtlasCol CLI
//!
//! Write, inspect and dump flat column files.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use atlascol::column::{parse_zone, Primitive, NULL_NANOS};
use atlascol::{AtlasError, ColumnFileReader, ColumnFileWriter, Config, Result, ValueKind};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// Token accepted in place of a value to write the kind's null sentinel
const NULL_TOKEN: &str = "null";

/// AtlasCol CLI
#[derive(Parser, Debug)]
#[command(name = "atlascol-cli")]
#[command(about = "CLI for AtlasCol column files")]
#[command(version)]
struct Args {
    /// Accept a reopened file even if it is a different physical file
    /// (overrides ATLASCOL_FILE_KEY_SAFETY_CHECK)
    #[arg(long)]
    no_safety_check: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write values to a new column file
    Write {
        /// Output file
        path: PathBuf,

        /// Column kind: byte, char, short, int, long, float, double,
        /// instant, or zoned:<IANA zone>
        #[arg(short, long, value_parser = parse_kind)]
        kind: ValueKind,

        /// log2 of the values per block
        #[arg(short, long, default_value = "16")]
        block_shift: u32,

        /// Values to write ("null" for an absent value). Temporal values are
        /// RFC 3339 timestamps or integer nanos since the epoch.
        #[arg(allow_hyphen_values = true)]
        values: Vec<String>,
    },

    /// Print a column file's metadata
    Inspect {
        path: PathBuf,
    },

    /// Print rows of a column file
    Dump {
        path: PathBuf,

        /// First row key
        #[arg(long, default_value = "0")]
        start: u64,

        /// Row key to stop before (defaults to the row count)
        #[arg(long)]
        end: Option<u64>,

        /// Present temporal columns in this zone
        #[arg(long)]
        zone: Option<String>,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,atlascol=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("Command failed: {}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::from_env()?;
    if args.no_safety_check {
        config.file_key_safety_check = false;
    }

    match args.command {
        Commands::Write {
            path,
            kind,
            block_shift,
            values,
        } => write(&path, kind, block_shift, &values),
        Commands::Inspect { path } => inspect(&path, &config),
        Commands::Dump {
            path,
            start,
            end,
            zone,
        } => dump(&path, &config, start, end, zone.as_deref()),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn write(path: &Path, kind: ValueKind, block_shift: u32, values: &[String]) -> Result<()> {
    let mut writer = ColumnFileWriter::create(path, kind, block_shift)?;

    match kind {
        ValueKind::Byte => append_parsed::<i8>(&mut writer, values)?,
        ValueKind::Char => {
            for raw in values {
                writer.append(parse_char(raw)?)?;
            }
        }
        ValueKind::Short => append_parsed::<i16>(&mut writer, values)?,
        ValueKind::Int => append_parsed::<i32>(&mut writer, values)?,
        ValueKind::Long => append_parsed::<i64>(&mut writer, values)?,
        ValueKind::Float => append_parsed::<f32>(&mut writer, values)?,
        ValueKind::Double => append_parsed::<f64>(&mut writer, values)?,
        ValueKind::Instant | ValueKind::ZonedDateTime(_) => {
            for raw in values {
                writer.append(parse_nanos(raw)?)?;
            }
        }
    }

    let meta = writer.finish()?;
    println!("wrote {} rows of {} to {}", meta.row_count, kind, path.display());
    Ok(())
}

fn inspect(path: &Path, config: &Config) -> Result<()> {
    let reader = ColumnFileReader::open(path, config)?;
    let meta = reader.meta();
    let layout = reader.layout();

    println!("path:        {}", reader.accessor());
    println!("file key:    {}", reader.accessor().current().key());
    println!("kind:        {}", reader.kind());
    println!("rows:        {}", meta.row_count);
    println!("block size:  {}", layout.block_size());
    println!("blocks:      {}", reader.block_count());
    println!("two-level:   {}", layout.is_two_level());
    println!("data crc:    {:08x}", meta.data_crc);
    Ok(())
}

fn dump(
    path: &Path,
    config: &Config,
    start: u64,
    end: Option<u64>,
    zone: Option<&str>,
) -> Result<()> {
    let reader = ColumnFileReader::open(path, config)?;
    let mut column = reader.load_column()?;
    if let Some(zone) = zone {
        column = column.to_zone(parse_zone(zone)?)?;
    }

    let end = end.unwrap_or(reader.row_count()).min(reader.row_count());
    for row_key in start..end {
        println!("{}\t{}", row_key, column.get_value(row_key));
    }
    Ok(())
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_kind(raw: &str) -> std::result::Result<ValueKind, String> {
    let lower = raw.to_ascii_lowercase();
    match lower.as_str() {
        "byte" => Ok(ValueKind::Byte),
        "char" => Ok(ValueKind::Char),
        "short" => Ok(ValueKind::Short),
        "int" => Ok(ValueKind::Int),
        "long" => Ok(ValueKind::Long),
        "float" => Ok(ValueKind::Float),
        "double" => Ok(ValueKind::Double),
        "instant" => Ok(ValueKind::Instant),
        _ => match lower.strip_prefix("zoned:") {
            // zone names are case-sensitive, so slice the original input
            Some(_) => parse_zone(&raw["zoned:".len()..])
                .map(ValueKind::ZonedDateTime)
                .map_err(|e| e.to_string()),
            None => Err(format!("unknown column kind '{}'", raw)),
        },
    }
}

fn append_parsed<T>(writer: &mut ColumnFileWriter, values: &[String]) -> Result<()>
where
    T: Primitive + FromStr,
    T::Err: std::fmt::Display,
{
    for raw in values {
        let value = if raw == NULL_TOKEN {
            T::NULL
        } else {
            raw.parse::<T>()
                .map_err(|e| AtlasError::Config(format!("bad {} value '{}': {}", T::KIND, raw, e)))?
        };
        writer.append(value)?;
    }
    Ok(())
}

fn parse_char(raw: &str) -> Result<u16> {
    if raw == NULL_TOKEN {
        return Ok(u16::NULL);
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => u16::try_from(u32::from(c))
            .map_err(|_| AtlasError::Config(format!("'{}' is outside the BMP", c))),
        _ => Err(AtlasError::Config(format!(
            "char values must be a single character, got '{}'",
            raw
        ))),
    }
}

fn parse_nanos(raw: &str) -> Result<i64> {
    if raw == NULL_TOKEN {
        return Ok(NULL_NANOS);
    }
    if let Ok(nanos) = raw.parse::<i64>() {
        return Ok(nanos);
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| AtlasError::Config(format!("bad timestamp '{}': {}", raw, e)))?;
    atlascol::column::epoch_nanos(&parsed)
}
