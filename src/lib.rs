//! Purpose: Library crate behind the `wtbrowse` CLI and its integration tests.
//! Exports: `core` (engine seam, catalog, schema parsing, record decoding, errors), `export`.
//! Role: Read-only access to WiredTiger backups; nothing here writes to the source database.
//! Invariants: Every cursor and session handle is released on all exit paths.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod core;
pub mod export;
