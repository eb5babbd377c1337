//! Output formatting module
//!
//! Table and JSON rendering for command results, plus coloured status lines.

use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {}. Use 'table' or 'json'", s)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render rows as a table, or as a JSON array (`[]` when empty)
pub fn render_rows<T>(rows: &[T], format: OutputFormat) -> anyhow::Result<String>
where
    T: Serialize + Tabled,
{
    Ok(match format {
        OutputFormat::Table if rows.is_empty() => "Nothing tracked yet.".to_string(),
        OutputFormat::Table => Table::new(rows).to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(rows)?,
    })
}

/// Print rows in the specified format
pub fn print_output<T>(rows: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    println!("{}", render_rows(rows, format)?);
    Ok(())
}

/// Print a single row in the specified format; JSON is an object, not an array
pub fn print_single<T>(row: &T, format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => println!("{}", Table::new([row])),
        OutputFormat::Json => print_json(row)?,
    }
    Ok(())
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", colored::Colorize::green(message));
    }
}

/// Print a warning to stderr; shown even in quiet mode
pub fn print_warning(message: &str) {
    eprintln!("{}", colored::Colorize::yellow(message));
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}
