//! Purpose: Drive table cursors through the record decoder into JSON or CSV sinks.
//! Exports: `ExportFormat`, `ExportOptions`, `Row`, `RecordSink`, `JsonSink`, `CsvSink`,
//! `ExportSession`, `ExportResult`, `BatchSummary`, `TableFailure`, `TableInfo`.
//! Role: Record-export engine behind the `export`, `export-all` and `info` commands.
//! Invariants: Cursors close on every exit path, including mid-table decode failures.
//! Invariants: JSON and CSV artifacts are staged and renamed into place; partial output never lands.
//! Invariants: One table's failure in a batch never aborts the remaining tables.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::catalog::{get_table_descriptor, list_tables};
use crate::core::connection::Database;
use crate::core::cursor::CursorGuard;
use crate::core::descriptor::TableDescriptor;
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{FieldSchema, TableLayout};
use crate::core::record::{DecodedRecord, decode};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Maximum rows per table; `Some(0)` produces an empty export.
    pub limit: Option<u64>,
}

/// One exported row: decoded key and value side by side.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Row {
    pub key: DecodedRecord,
    pub value: DecodedRecord,
}

pub trait RecordSink {
    fn format(&self) -> ExportFormat;
    fn location(&self) -> Option<&Path>;
    fn begin(&mut self, table: &str, layout: &TableLayout) -> Result<(), Error>;
    fn write(&mut self, row: &Row) -> Result<(), Error>;
    fn finish(&mut self, record_count: u64) -> Result<(), Error>;
    /// Discards partial output after a failed export.
    fn abort(&mut self) {}
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportResult {
    pub table: String,
    pub record_count: u64,
    /// Rows with at least one field rendered through the hex fallback.
    pub hex_fallback_rows: u64,
    pub format: ExportFormat,
    pub output: Option<PathBuf>,
}

#[derive(Debug)]
pub struct TableFailure {
    pub table: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub exported: Vec<ExportResult>,
    pub failures: Vec<TableFailure>,
}

impl BatchSummary {
    pub fn total_records(&self) -> u64 {
        self.exported.iter().map(|result| result.record_count).sum()
    }
}

#[derive(Debug)]
pub struct TableInfo {
    pub descriptor: TableDescriptor,
    pub layout: Result<TableLayout, Error>,
    pub record_count: Result<u64, Error>,
}

/// Accumulates rows and writes one JSON document on `finish`.
#[derive(Debug)]
pub struct JsonSink {
    path: PathBuf,
    table: String,
    records: Vec<Row>,
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    table: &'a str,
    record_count: u64,
    records: &'a [Row],
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: String::new(),
            records: Vec::new(),
        }
    }
}

impl RecordSink for JsonSink {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn begin(&mut self, table: &str, _layout: &TableLayout) -> Result<(), Error> {
        self.table = table.to_string();
        self.records.clear();
        Ok(())
    }

    fn write(&mut self, row: &Row) -> Result<(), Error> {
        self.records.push(row.clone());
        Ok(())
    }

    fn finish(&mut self, record_count: u64) -> Result<(), Error> {
        let document = JsonDocument {
            table: &self.table,
            record_count,
            records: &self.records,
        };
        let mut bytes = serde_json::to_vec_pretty(&document).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode JSON export")
                .with_source(err)
        })?;
        bytes.push(b'\n');
        write_atomic(&self.path, &bytes)?;
        self.records.clear();
        Ok(())
    }

    fn abort(&mut self) {
        self.records.clear();
    }
}

/// Sibling path that receives output until it is complete.
fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.partial"))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let staging = staging_path(path);
    let result = File::create(&staging)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&staging, path));
    result.map_err(|err| {
        let _ = fs::remove_file(&staging);
        sink_error("failed to write export", path, err)
    })
}

/// Streams rows as RFC 4180 CSV into a staging file that is renamed into place on `finish`.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    staging: PathBuf,
    writer: Option<BufWriter<File>>,
    expand_key: bool,
    expand_value: bool,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            staging: staging_path(&path),
            path,
            writer: None,
            expand_key: false,
            expand_value: false,
        }
    }

    fn write_line(&mut self, cells: &[String]) -> Result<(), Error> {
        let line = cells
            .iter()
            .map(|cell| escape_csv(cell))
            .collect::<Vec<_>>()
            .join(",");
        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("CSV sink used before begin")
        })?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\r\n"))
            .map_err(|err| sink_error("failed to write CSV row", &self.path, err))
    }
}

impl RecordSink for CsvSink {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn begin(&mut self, _table: &str, layout: &TableLayout) -> Result<(), Error> {
        let file = File::create(&self.staging)
            .map_err(|err| sink_error("failed to create CSV file", &self.staging, err))?;
        self.writer = Some(BufWriter::new(file));
        self.expand_key = layout.key.value_field_count() != 1;
        self.expand_value = layout.value.value_field_count() != 1;

        let mut header = header_cells("key", &layout.key, self.expand_key);
        header.extend(header_cells("value", &layout.value, self.expand_value));
        self.write_line(&header)
    }

    fn write(&mut self, row: &Row) -> Result<(), Error> {
        let mut cells = row_cells(&row.key, self.expand_key);
        cells.extend(row_cells(&row.value, self.expand_value));
        self.write_line(&cells)
    }

    fn finish(&mut self, _record_count: u64) -> Result<(), Error> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let result = writer
            .into_inner()
            .map_err(|err| err.into_error())
            .and_then(|file| file.sync_all())
            .and_then(|_| fs::rename(&self.staging, &self.path));
        result.map_err(|err| {
            let _ = fs::remove_file(&self.staging);
            sink_error("failed to write CSV file", &self.path, err)
        })
    }

    fn abort(&mut self) {
        if self.writer.take().is_some() {
            if let Err(err) = fs::remove_file(&self.staging) {
                warn!(path = %self.staging.display(), error = %err, "failed to remove partial CSV");
            }
        }
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        self.abort();
    }
}

fn header_cells(side: &str, schema: &FieldSchema, expand: bool) -> Vec<String> {
    if !expand {
        return vec![side.to_string()];
    }
    schema
        .names()
        .into_iter()
        .map(|name| format!("{side}.{name}"))
        .collect()
}

fn row_cells(record: &DecodedRecord, expand: bool) -> Vec<String> {
    if !expand {
        return record
            .fields()
            .first()
            .map(|(_, value)| vec![value.to_text()])
            .unwrap_or_else(|| vec![String::new()]);
    }
    record
        .fields()
        .iter()
        .map(|(_, value)| value.to_text())
        .collect()
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn sink_error(message: &str, path: &Path, err: std::io::Error) -> Error {
    Error::new(ErrorKind::Sink)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

/// Export state shared across tables; parsed layouts are cached per table name.
pub struct ExportSession<'db> {
    db: &'db Database,
    layouts: HashMap<String, Arc<TableLayout>>,
}

impl<'db> ExportSession<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self {
            db,
            layouts: HashMap::new(),
        }
    }

    fn layout(&mut self, descriptor: &TableDescriptor) -> Result<Arc<TableLayout>, Error> {
        if let Some(layout) = self.layouts.get(descriptor.name()) {
            return Ok(Arc::clone(layout));
        }
        let layout = Arc::new(layout_for(descriptor)?);
        self.layouts
            .insert(descriptor.name().to_string(), Arc::clone(&layout));
        Ok(layout)
    }

    pub fn export(
        &mut self,
        table: &str,
        sink: &mut dyn RecordSink,
        limit: Option<u64>,
    ) -> Result<ExportResult, Error> {
        let result = self.export_inner(table, sink, limit);
        if result.is_err() {
            sink.abort();
        }
        result.map_err(|err| err.with_table(table))
    }

    fn export_inner(
        &mut self,
        table: &str,
        sink: &mut dyn RecordSink,
        limit: Option<u64>,
    ) -> Result<ExportResult, Error> {
        let descriptor = require_descriptor(self.db, table)?;
        let layout = self.layout(&descriptor)?;

        let mut cursor = CursorGuard::table(self.db, table)?;
        sink.begin(table, &layout)?;

        let mut count = 0u64;
        let mut hex_rows = 0u64;
        while limit.map_or(true, |limit| count < limit) {
            let Some((raw_key, raw_value)) = cursor.next_row()? else {
                break;
            };
            let key = decode(&layout.key, &raw_key).map_err(|err| row_error(err, count, "key"))?;
            let value =
                decode(&layout.value, &raw_value).map_err(|err| row_error(err, count, "value"))?;
            if key.has_hex_fallback() || value.has_hex_fallback() {
                hex_rows += 1;
            }
            sink.write(&Row { key, value })?;
            count += 1;
        }
        cursor.close()?;
        sink.finish(count)?;

        info!(
            table,
            records = count,
            hex_rows,
            format = sink.format().extension(),
            "exported table"
        );
        Ok(ExportResult {
            table: table.to_string(),
            record_count: count,
            hex_fallback_rows: hex_rows,
            format: sink.format(),
            output: sink.location().map(Path::to_path_buf),
        })
    }

    pub fn export_to_path(
        &mut self,
        table: &str,
        path: &Path,
        options: ExportOptions,
    ) -> Result<ExportResult, Error> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| sink_error("failed to create output directory", parent, err))?;
        }
        match options.format {
            ExportFormat::Json => self.export(table, &mut JsonSink::new(path), options.limit),
            ExportFormat::Csv => self.export(table, &mut CsvSink::new(path), options.limit),
        }
    }

    pub fn export_all(
        &mut self,
        output_dir: &Path,
        options: ExportOptions,
    ) -> Result<BatchSummary, Error> {
        fs::create_dir_all(output_dir)
            .map_err(|err| sink_error("failed to create output directory", output_dir, err))?;

        let tables = list_tables(self.db)?;
        debug!(tables = tables.len(), dir = %output_dir.display(), "exporting all tables");

        let mut summary = BatchSummary::default();
        for table in tables {
            let path = output_dir.join(output_file_name(&table, options.format));
            match self.export_to_path(&table, &path, options) {
                Ok(result) => summary.exported.push(result),
                Err(error) => {
                    warn!(table = %table, error = %error, "table export failed; continuing");
                    summary.failures.push(TableFailure { table, error });
                }
            }
        }
        Ok(summary)
    }
}

pub fn export(
    db: &Database,
    table: &str,
    sink: &mut dyn RecordSink,
    limit: Option<u64>,
) -> Result<ExportResult, Error> {
    ExportSession::new(db).export(table, sink, limit)
}

pub fn export_to_path(
    db: &Database,
    table: &str,
    path: &Path,
    options: ExportOptions,
) -> Result<ExportResult, Error> {
    ExportSession::new(db).export_to_path(table, path, options)
}

pub fn export_all(
    db: &Database,
    output_dir: &Path,
    options: ExportOptions,
) -> Result<BatchSummary, Error> {
    ExportSession::new(db).export_all(output_dir, options)
}

/// Descriptor, schemas and a full-scan record count for one table.
pub fn table_info(db: &Database, table: &str) -> Result<TableInfo, Error> {
    let descriptor = require_descriptor(db, table)?;
    let layout = layout_for(&descriptor);
    let record_count = count_rows(db, table);
    Ok(TableInfo {
        descriptor,
        layout,
        record_count,
    })
}

fn count_rows(db: &Database, table: &str) -> Result<u64, Error> {
    let mut cursor = CursorGuard::table(db, table)?;
    let mut count = 0u64;
    while cursor.next_row()?.is_some() {
        count += 1;
    }
    cursor.close()?;
    Ok(count)
}

/// `<table>.<ext>` with path separators replaced.
pub fn output_file_name(table: &str, format: ExportFormat) -> String {
    let stem = table.replace(['/', '\\'], "_");
    format!("{stem}.{}", format.extension())
}

fn require_descriptor(db: &Database, table: &str) -> Result<TableDescriptor, Error> {
    if let Some(descriptor) = get_table_descriptor(db, table)? {
        return Ok(descriptor);
    }
    let available = list_tables(db)?;
    Err(Error::new(ErrorKind::TableNotFound)
        .with_message(format!("table '{table}' not found"))
        .with_table(table)
        .with_hint(available_tables_hint(&available)))
}

fn available_tables_hint(tables: &[String]) -> String {
    const SHOWN: usize = 10;
    if tables.is_empty() {
        return "The catalog holds no tables.".to_string();
    }
    let mut listed = tables
        .iter()
        .take(SHOWN)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if tables.len() > SHOWN {
        listed.push_str(&format!(" and {} more", tables.len() - SHOWN));
    }
    format!("Available tables: {listed}.")
}

fn layout_for(descriptor: &TableDescriptor) -> Result<TableLayout, Error> {
    let columns = descriptor.columns();
    TableLayout::parse(
        descriptor.key_format(),
        descriptor.value_format(),
        columns.as_deref(),
    )
    .map_err(|err| err.with_table(descriptor.name()))
}

fn row_error(err: Error, row: u64, side: &str) -> Error {
    let message = format!("row {row} {side}: {}", err.message().unwrap_or("decode failed"));
    err.with_message(message)
}

#[cfg(test)]
mod tests {
    use super::{
        ExportFormat, ExportOptions, ExportSession, RecordSink, Row, available_tables_hint,
        escape_csv, export, export_all, export_to_path, output_file_name, table_info,
    };
    use crate::core::connection::Database;
    use crate::core::engine::{MemoryBackend, RawRow};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::format::TableLayout;
    use serde_json::{Value, json};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn q_s_rows() -> Vec<RawRow> {
        [(1i64, "a"), (2, "b"), (3, "c")]
            .into_iter()
            .map(|(key, value)| {
                let mut raw = value.as_bytes().to_vec();
                raw.push(0);
                (key.to_le_bytes().to_vec(), raw)
            })
            .collect()
    }

    fn letters() -> MemoryBackend {
        MemoryBackend::new().with_table("letters", "key_format=q,value_format=S", q_s_rows())
    }

    #[derive(Default)]
    struct CollectSink {
        began: Option<String>,
        rows: Vec<Row>,
        finished: Option<u64>,
    }

    impl RecordSink for CollectSink {
        fn format(&self) -> ExportFormat {
            ExportFormat::Json
        }

        fn location(&self) -> Option<&Path> {
            None
        }

        fn begin(&mut self, table: &str, _layout: &TableLayout) -> Result<(), Error> {
            self.began = Some(table.to_string());
            Ok(())
        }

        fn write(&mut self, row: &Row) -> Result<(), Error> {
            self.rows.push(row.clone());
            Ok(())
        }

        fn finish(&mut self, record_count: u64) -> Result<(), Error> {
            self.finished = Some(record_count);
            Ok(())
        }
    }

    #[test]
    fn json_export_matches_documented_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::with_backend("/mem", letters());
        let path = dir.path().join("out").join("letters.json");
        let result =
            export_to_path(&db, "letters", &path, ExportOptions::default()).expect("export");
        assert_eq!(result.record_count, 3);
        assert_eq!(result.format, ExportFormat::Json);
        assert_eq!(result.output.as_deref(), Some(path.as_path()));

        let text = fs::read_to_string(&path).expect("read");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(
            value,
            json!({
                "table": "letters",
                "record_count": 3,
                "records": [
                    {"key": 1, "value": "a"},
                    {"key": 2, "value": "b"},
                    {"key": 3, "value": "c"}
                ]
            })
        );
        let staged = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(staged, 1);
    }

    #[test]
    fn limit_caps_rows_in_cursor_order() {
        let db = Database::with_backend("/mem", letters());
        for (limit, expected) in [(Some(0), 0usize), (Some(2), 2), (Some(10), 3), (None, 3)] {
            let mut sink = CollectSink::default();
            let result = export(&db, "letters", &mut sink, limit).expect("export");
            assert_eq!(result.record_count as usize, expected);
            assert_eq!(sink.rows.len(), expected);
            assert_eq!(sink.finished, Some(expected as u64));
            assert_eq!(sink.began.as_deref(), Some("letters"));
            let keys = sink
                .rows
                .iter()
                .map(|row| serde_json::to_value(&row.key).expect("key"))
                .collect::<Vec<_>>();
            let want = (1..=expected as i64).map(|k| json!(k)).collect::<Vec<_>>();
            assert_eq!(keys, want);
        }
    }

    #[test]
    fn zero_limit_still_writes_wellformed_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::with_backend("/mem", letters());
        let path = dir.path().join("empty.json");
        let options = ExportOptions {
            format: ExportFormat::Json,
            limit: Some(0),
        };
        export_to_path(&db, "letters", &path, options).expect("export");
        let value: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["record_count"], 0);
        assert_eq!(value["records"], json!([]));
    }

    #[test]
    fn missing_table_is_table_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::with_backend("/mem", letters());
        let path = dir.path().join("ghost.csv");
        let options = ExportOptions {
            format: ExportFormat::Csv,
            limit: None,
        };
        let err = export_to_path(&db, "ghost", &path, options).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::TableNotFound);
        assert_eq!(err.table(), Some("ghost"));
        assert_eq!(err.hint(), Some("Available tables: letters."));
        assert!(!path.exists());
    }

    #[test]
    fn decode_failure_closes_cursor_and_skips_json() {
        let mut rows = q_s_rows();
        rows.insert(1, (vec![1, 2, 3], b"x\0".to_vec()));
        let backend =
            MemoryBackend::new().with_table("broken", "key_format=q,value_format=S", rows);
        let live = backend.live_cursors();
        let db = Database::with_backend("/mem", backend);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");

        let err = export_to_path(&db, "broken", &path, ExportOptions::default())
            .expect_err("decode failure");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().expect("message").starts_with("row 1 key:"));
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!path.exists());
    }

    #[test]
    fn failed_csv_export_leaves_no_file() {
        let mut rows = q_s_rows();
        rows.insert(2, (vec![1, 2, 3], b"x\0".to_vec()));
        let backend = MemoryBackend::new()
            .with_table("broken", "key_format=q,value_format=S", rows)
            .with_table("letters", "key_format=q,value_format=S", q_s_rows());
        let db = Database::with_backend("/mem", backend);
        let dir = tempfile::tempdir().expect("tempdir");
        let options = ExportOptions {
            format: ExportFormat::Csv,
            limit: None,
        };

        let summary = export_all(&db, dir.path(), options).expect("batch");
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].table, "broken");
        assert_eq!(summary.exported.len(), 1);

        let mut files = fs::read_dir(dir.path())
            .expect("list")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        files.sort();
        assert_eq!(files, vec!["letters.csv"]);
    }

    #[test]
    fn csv_export_quotes_and_hex_falls_back() {
        let rows = vec![
            (b"plain".to_vec(), b"has,comma".to_vec()),
            (b"quote\"d".to_vec(), b"multi\nline".to_vec()),
            (vec![0xff, 0xfe], vec![0xbe, 0xef]),
        ];
        let backend = MemoryBackend::new().with_table("blobs", "key_format=u,value_format=u", rows);
        let db = Database::with_backend("/mem", backend);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blobs.csv");
        let options = ExportOptions {
            format: ExportFormat::Csv,
            limit: None,
        };
        let result = export_to_path(&db, "blobs", &path, options).expect("export");
        assert_eq!(result.record_count, 3);
        assert_eq!(result.hex_fallback_rows, 1);

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(
            text,
            "key,value\r\nplain,\"has,comma\"\r\n\"quote\"\"d\",\"multi\nline\"\r\nfffe,beef\r\n"
        );
    }

    #[test]
    fn csv_expands_structured_schemas() {
        let mut value = b"ann\0".to_vec();
        value.extend_from_slice(&41u32.to_le_bytes());
        let backend = MemoryBackend::new().with_table(
            "people",
            "key_format=r,value_format=SI,columns=(id,name,age)",
            vec![(7u64.to_le_bytes().to_vec(), value)],
        );
        let db = Database::with_backend("/mem", backend);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.csv");
        let options = ExportOptions {
            format: ExportFormat::Csv,
            limit: None,
        };
        export_to_path(&db, "people", &path, options).expect("export");
        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text, "key,value.name,value.age\r\n7,ann,41\r\n");

        let json_path = dir.path().join("people.json");
        export_to_path(&db, "people", &json_path, ExportOptions::default()).expect("json");
        let value: Value =
            serde_json::from_str(&fs::read_to_string(&json_path).expect("read")).expect("json");
        assert_eq!(value["records"][0], json!({"key": 7, "value": {"name": "ann", "age": 41}}));
    }

    #[test]
    fn batch_isolates_corrupt_tables() {
        let backend = MemoryBackend::new()
            .with_table("one", "key_format=q,value_format=S", q_s_rows())
            .with_table("two", "key_format=q,value_format=3Z", q_s_rows())
            .with_table("three", "key_format=u,value_format=u", vec![(b"k".to_vec(), b"v".to_vec())])
            .with_table("four", "", Vec::new());
        let db = Database::with_backend("/mem", backend);
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("dump");

        let summary = export_all(&db, &out, ExportOptions::default()).expect("batch");
        let exported = summary
            .exported
            .iter()
            .map(|result| result.table.as_str())
            .collect::<Vec<_>>();
        assert_eq!(exported, vec!["one", "three", "four"]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].table, "two");
        assert_eq!(summary.failures[0].error.kind(), ErrorKind::Format);
        assert_eq!(summary.total_records(), 4);

        assert!(out.join("one.json").is_file());
        assert!(!out.join("two.json").exists());
        assert!(out.join("three.json").is_file());
        assert!(out.join("four.json").is_file());
    }

    #[test]
    fn session_caches_layouts_per_table() {
        let db = Database::with_backend("/mem", letters());
        let mut session = ExportSession::new(&db);
        let mut sink = CollectSink::default();
        session.export("letters", &mut sink, Some(1)).expect("first");
        session.export("letters", &mut sink, Some(1)).expect("second");
        assert_eq!(session.layouts.len(), 1);
    }

    #[test]
    fn info_counts_rows_and_reports_schema_errors() {
        let backend = letters().with_table("odd", "value_format=t", vec![(vec![], vec![])]);
        let db = Database::with_backend("/mem", backend);

        let info = table_info(&db, "letters").expect("info");
        assert_eq!(info.record_count.expect("count"), 3);
        let layout = info.layout.expect("layout");
        assert_eq!(layout.key.to_format_string(), "q");

        let odd = table_info(&db, "odd").expect("info");
        assert_eq!(odd.layout.expect_err("bad format").kind(), ErrorKind::Format);
        assert_eq!(odd.record_count.expect("count"), 1);

        let err = table_info(&db, "nope").expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::TableNotFound);
    }

    #[test]
    fn not_found_hint_caps_listed_tables() {
        let tables = (0..12).map(|idx| format!("t{idx}")).collect::<Vec<_>>();
        let hint = available_tables_hint(&tables);
        assert!(hint.starts_with("Available tables: t0, t1,"));
        assert!(hint.ends_with("t9 and 2 more."));
        assert_eq!(available_tables_hint(&[]), "The catalog holds no tables.");
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(output_file_name("a/b\\c", ExportFormat::Csv), "a_b_c.csv");
        assert_eq!(output_file_name("collection-0", ExportFormat::Json), "collection-0.json");
    }

    #[test]
    fn escape_follows_rfc4180() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a\"b"), "\"a\"\"b\"");
        assert_eq!(escape_csv("cr\r"), "\"cr\r\"");
    }
}
