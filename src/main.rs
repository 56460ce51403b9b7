//! Purpose: `wtbrowse` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, renders human or JSON output.
//! Invariants: Command results go to stdout; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `to_exit_code`.
//! Invariants: The backup directory is only ever opened read-only.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use wtbrowse::core::error::{Error, ErrorKind, to_exit_code};
use wtbrowse::core::format::{FieldSchema, TableLayout};
use wtbrowse::export::{BatchSummary, ExportFormat, ExportOptions, ExportResult, TableInfo};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.verbose);
    let color_mode = cli.color;
    let output = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    command_dispatch::dispatch_command(cli.command, output)
        .map_err(add_connection_hint)
        .map_err(add_not_found_hint)
        .map_err(add_format_hint)
        .map_err(add_sink_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(
    name = "wtbrowse",
    version,
    about = "Browse and export tables from WiredTiger backups",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Reads a backup directory (engine metadata plus `wt dump` snapshots) without modifying it.
"#,
    after_help = r#"EXAMPLES
  $ wtbrowse list-tables ./backup
  $ wtbrowse info ./backup collection-0-123
  $ wtbrowse export ./backup collection-0-123 out/orders.csv --format csv --limit 100
  $ wtbrowse export-all ./backup out/

LEARN MORE
  $ wtbrowse <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[arg(long, global = true, help = "Emit machine-readable JSON on stdout")]
    json: bool,

    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Raise log verbosity (-v info, -vv debug); RUST_LOG overrides"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ExportArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "json",
        help = "Output format"
    )]
    format: FormatArg,
    #[arg(short = 'l', long, help = "Export at most N records per table")]
    limit: Option<u64>,
}

impl From<ExportArgs> for ExportOptions {
    fn from(value: ExportArgs) -> Self {
        ExportOptions {
            format: value.format.into(),
            limit: value.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "List user tables in catalog order",
        after_help = r#"EXAMPLES
  $ wtbrowse list-tables ./backup
  $ wtbrowse --json list-tables ./backup"#
    )]
    ListTables {
        #[arg(help = "Backup directory", value_hint = ValueHint::DirPath)]
        db_path: PathBuf,
    },
    #[command(
        about = "Show a table's configuration, schemas and record count",
        after_help = r#"EXAMPLES
  $ wtbrowse info ./backup collection-0-123"#
    )]
    Info {
        #[arg(help = "Backup directory", value_hint = ValueHint::DirPath)]
        db_path: PathBuf,
        #[arg(help = "Table name (without the `table:` prefix)")]
        table: String,
    },
    #[command(
        about = "Export one table to a JSON or CSV file",
        after_help = r#"EXAMPLES
  $ wtbrowse export ./backup sizeStorer out/size.json
  $ wtbrowse export ./backup collection-0-123 out/c.csv -f csv -l 10"#
    )]
    Export {
        #[arg(help = "Backup directory", value_hint = ValueHint::DirPath)]
        db_path: PathBuf,
        #[arg(help = "Table name (without the `table:` prefix)")]
        table: String,
        #[arg(help = "Output file", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[command(flatten)]
        options: ExportArgs,
    },
    #[command(
        about = "Export every table into a directory",
        long_about = r#"Export every table into <OUTPUT_DIR>/<table>.<ext>.

A table that fails to export is reported and skipped; the run still exits 0."#,
        after_help = r#"EXAMPLES
  $ wtbrowse export-all ./backup out/
  $ wtbrowse export-all ./backup out/ --format csv --limit 1000"#
    )]
    ExportAll {
        #[arg(help = "Backup directory", value_hint = ValueHint::DirPath)]
        db_path: PathBuf,
        #[arg(help = "Output directory", value_hint = ValueHint::DirPath)]
        output_dir: PathBuf,
        #[command(flatten)]
        options: ExportArgs,
    },
}

fn add_connection_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Connection || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Point at a backup directory containing `WiredTiger`, `WiredTiger.wt` and `wt dump` snapshots (*.dump). Close other processes holding WiredTiger.lock.",
    )
}

fn add_not_found_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::TableNotFound {
        return err;
    }
    let listing = "Run `wtbrowse list-tables <db_path>` for the full catalog.";
    let hint = match err.hint() {
        Some(tables) => format!("{tables} {listing}"),
        None => listing.to_string(),
    };
    err.with_hint(hint)
}

fn add_format_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Format || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "The table schema or stored bytes could not be decoded. Inspect it with `wtbrowse info`.",
    )
}

fn add_sink_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Sink || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check that the output location is writable and the disk has space.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and -vv, and share the command if it persists.",
    )
}

fn export_result_json(result: &ExportResult) -> Value {
    json!({
        "table": result.table,
        "record_count": result.record_count,
        "hex_fallback_rows": result.hex_fallback_rows,
        "format": result.format.extension(),
        "output": result.output.as_ref().map(|path| path.display().to_string()),
    })
}

fn batch_summary_json(summary: &BatchSummary) -> Value {
    let exported = summary
        .exported
        .iter()
        .map(export_result_json)
        .collect::<Vec<_>>();
    let failures = summary
        .failures
        .iter()
        .map(|failure| {
            json!({
                "table": failure.table,
                "kind": format!("{:?}", failure.error.kind()),
                "message": error_message(&failure.error),
            })
        })
        .collect::<Vec<_>>();
    json!({
        "exported": exported,
        "failures": failures,
        "total_records": summary.total_records(),
    })
}

fn schema_json(schema: &FieldSchema) -> Value {
    let fields = schema
        .value_fields()
        .map(|field| {
            json!({
                "name": field.name,
                "code": field.code.as_char().to_string(),
                "width": field.width,
            })
        })
        .collect::<Vec<_>>();
    json!({
        "format": schema.to_format_string(),
        "opaque": schema.is_opaque(),
        "fields": fields,
    })
}

fn table_info_json(info: &TableInfo) -> Value {
    let mut table = Map::new();
    let descriptor = &info.descriptor;
    table.insert("name".to_string(), json!(descriptor.name()));
    table.insert("type".to_string(), json!(descriptor.table_type()));
    table.insert("key_format".to_string(), json!(descriptor.key_format()));
    table.insert("value_format".to_string(), json!(descriptor.value_format()));
    table.insert("config".to_string(), json!(descriptor.config()));
    match &info.layout {
        Ok(layout) => {
            table.insert("key_schema".to_string(), schema_json(&layout.key));
            table.insert("value_schema".to_string(), schema_json(&layout.value));
        }
        Err(err) => {
            table.insert("schema_error".to_string(), json!(error_message(err)));
        }
    }
    match &info.record_count {
        Ok(count) => {
            table.insert("record_count".to_string(), json!(count));
        }
        Err(err) => {
            table.insert("count_error".to_string(), json!(error_message(err)));
        }
    }
    json!({ "table": Value::Object(table) })
}

fn describe_schema(schema: &FieldSchema) -> String {
    schema
        .value_fields()
        .map(|field| match field.width {
            Some(width) if field.code.as_char() == 's' => {
                format!("{}:{width}s", field.name)
            }
            _ => format!("{}:{}", field.name, field.code.as_char()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn emit_table_info_human(info: &TableInfo) {
    let descriptor = &info.descriptor;
    let mut rows = vec![
        vec!["name".to_string(), descriptor.name().to_string()],
        vec!["type".to_string(), descriptor.table_type().to_string()],
        vec!["key_format".to_string(), descriptor.key_format().to_string()],
        vec!["value_format".to_string(), descriptor.value_format().to_string()],
    ];
    match &info.layout {
        Ok(TableLayout { key, value }) => {
            rows.push(vec!["key fields".to_string(), describe_schema(key)]);
            rows.push(vec!["value fields".to_string(), describe_schema(value)]);
        }
        Err(err) => rows.push(vec!["schema error".to_string(), error_message(err)]),
    }
    match &info.record_count {
        Ok(count) => rows.push(vec!["records".to_string(), count.to_string()]),
        Err(err) => rows.push(vec!["count error".to_string(), error_message(err)]),
    }
    rows.push(vec!["config".to_string(), descriptor.config().to_string()]);
    emit_table(&["PROPERTY", "VALUE"], &rows);
}

fn emit_export_human(result: &ExportResult) {
    let output = result
        .output
        .as_deref()
        .map(display_path)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "Exported {} records from {} to {output}",
        result.record_count, result.table
    );
    if result.hex_fallback_rows > 0 {
        println!(
            "{} records carry hex-encoded fields (binary data shown as hex)",
            result.hex_fallback_rows
        );
    }
}

fn emit_batch_human(summary: &BatchSummary) {
    let mut rows = Vec::with_capacity(summary.exported.len() + summary.failures.len());
    for result in &summary.exported {
        rows.push(vec![
            result.table.clone(),
            "ok".to_string(),
            result.record_count.to_string(),
            result
                .output
                .as_deref()
                .map(display_path)
                .unwrap_or_default(),
        ]);
    }
    for failure in &summary.failures {
        rows.push(vec![
            failure.table.clone(),
            "failed".to_string(),
            "-".to_string(),
            error_message(&failure.error),
        ]);
    }
    if !rows.is_empty() {
        emit_table(&["TABLE", "STATUS", "RECORDS", "OUTPUT"], &rows);
    }
    println!(
        "{} tables exported ({} records), {} failed",
        summary.exported.len(),
        summary.total_records(),
        summary.failures.len()
    );
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn emit_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", render_table(headers, rows));
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();
    let cleaned_rows = rows
        .iter()
        .map(|row| {
            widths
                .iter_mut()
                .enumerate()
                .map(|(idx, width)| {
                    let cell = sanitize_table_cell(row.get(idx).map(String::as_str).unwrap_or(""));
                    *width = (*width).max(cell.chars().count());
                    cell
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    std::iter::once(&header_cells)
        .chain(cleaned_rows.iter())
        .map(|cells| format_table_line(cells, &widths))
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize_table_cell(value: &str) -> String {
    value.replace('\n', "\\n").replace('\r', "\\r")
}

fn format_table_line(cells: &[String], widths: &[usize]) -> String {
    let line = widths
        .iter()
        .enumerate()
        .map(|(idx, &width)| {
            let cell = cells.get(idx).map(String::as_str).unwrap_or("");
            format!("{cell:<width$}")
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

/// Line prefixes of the human error report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ErrorLabel {
    Error,
    Hint,
    Table,
    Path,
    Cause,
}

impl ErrorLabel {
    fn text(self) -> &'static str {
        match self {
            ErrorLabel::Error => "error:",
            ErrorLabel::Hint => "hint:",
            ErrorLabel::Table => "table:",
            ErrorLabel::Path => "path:",
            ErrorLabel::Cause => "caused by:",
        }
    }

    fn paint(self, use_color: bool) -> String {
        if !use_color {
            return self.text().to_string();
        }
        // red for the headline, yellow for details
        let code = if self == ErrorLabel::Error { 31 } else { 33 };
        format!("\u{1b}[{code}m{}\u{1b}[0m", self.text())
    }
}

/// Terminals get the labelled text report; pipes get the JSON envelope.
fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    let rendered = if is_tty {
        error_text(err, color_mode.use_color(is_tty))
    } else {
        serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
            let table = err.table().unwrap_or_default();
            format!(
                "{{\"error\":{{\"kind\":\"{:?}\",\"table\":{table:?},\"message\":\"json encode failed\"}}}}",
                err.kind()
            )
        })
    };
    eprintln!("{rendered}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::TableNotFound => "table not found".to_string(),
        ErrorKind::Connection => "cannot open database".to_string(),
        ErrorKind::Format => "malformed data".to_string(),
        ErrorKind::Sink => "cannot write output".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    std::iter::successors(err.source(), |&source| source.source())
        .map(ToString::to_string)
        .collect()
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let details = [
        Some((ErrorLabel::Error, error_message(err))),
        err.hint().map(|hint| (ErrorLabel::Hint, hint.to_string())),
        err.table().map(|table| (ErrorLabel::Table, table.to_string())),
        err.path().map(|path| (ErrorLabel::Path, display_path(path))),
        error_causes(err)
            .into_iter()
            .next()
            .map(|cause| (ErrorLabel::Cause, cause)),
    ];
    details
        .into_iter()
        .flatten()
        .map(|(label, text)| format!("{} {text}", label.paint(use_color)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First non-blank line of clap's report, without its `error:` prefix.
fn clap_error_summary(err: &clap::Error) -> String {
    err.to_string()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("error:").unwrap_or(line).trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let subcommand = usage.and_then(|usage| {
        let mut tokens = usage.split_whitespace();
        tokens.find(|token| *token == "wtbrowse")?;
        tokens.next().filter(|token| {
            !token.starts_with('-') && !token.starts_with('<') && !token.starts_with('[')
        })
    });
    match subcommand {
        Some(subcommand) => format!("Try `wtbrowse {subcommand} --help`."),
        None => "Try `wtbrowse --help`.".to_string(),
    }
}
