//! Purpose: Hold top-level CLI command dispatch for `wtbrowse`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and rendering; delegate command execution.
//! Invariants: Every command opens the backup through `Database::with_open`, so the
//! session and its lock are released before rendering and on every error path.
//! Invariants: `export-all` exits 0 even when individual tables fail.

use super::*;

use wtbrowse::core::catalog::list_tables;
use wtbrowse::core::connection::Database;
use wtbrowse::export::{export_all, export_to_path, table_info};

pub(super) fn dispatch_command(command: Command, output: OutputMode) -> Result<RunOutcome, Error> {
    match command {
        Command::ListTables { db_path } => {
            let tables = Database::with_open(&db_path, list_tables)?;
            match output {
                OutputMode::Json => emit_json(json!({ "tables": tables })),
                OutputMode::Human => {
                    for table in &tables {
                        println!("{table}");
                    }
                }
            }
            Ok(RunOutcome::ok())
        }
        Command::Info { db_path, table } => {
            let info = Database::with_open(&db_path, |db| table_info(db, &table))?;
            match output {
                OutputMode::Json => emit_json(table_info_json(&info)),
                OutputMode::Human => emit_table_info_human(&info),
            }
            Ok(RunOutcome::ok())
        }
        Command::Export {
            db_path,
            table,
            output: path,
            options,
        } => {
            let options = ExportOptions::from(options);
            let result =
                Database::with_open(&db_path, |db| export_to_path(db, &table, &path, options))?;
            match output {
                OutputMode::Json => emit_json(json!({ "export": export_result_json(&result) })),
                OutputMode::Human => emit_export_human(&result),
            }
            Ok(RunOutcome::ok())
        }
        Command::ExportAll {
            db_path,
            output_dir,
            options,
        } => {
            let options = ExportOptions::from(options);
            let summary =
                Database::with_open(&db_path, |db| export_all(db, &output_dir, options))?;
            match output {
                OutputMode::Json => emit_json(batch_summary_json(&summary)),
                OutputMode::Human => emit_batch_human(&summary),
            }
            Ok(RunOutcome::ok())
        }
    }
}
