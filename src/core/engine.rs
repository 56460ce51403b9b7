//! Purpose: Define the storage-engine collaborator seam used by the browser.
//! Exports: `Backend`, `RawCursor`, `RawRow`, `VecCursor`, `MemoryBackend`.
//! Role: The only path to engine data; catalog and exporter never touch files directly.
//! Invariants: Backends are read-only; no trait method can mutate engine state.
//! Invariants: `RawCursor::close` is idempotent and `next_row` after close yields `None`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::error::{Error, ErrorKind};

/// Catalog key prefix for user-addressable tables.
pub const TABLE_PREFIX: &str = "table:";

pub type RawRow = (Vec<u8>, Vec<u8>);

pub trait RawCursor {
    fn next_row(&mut self) -> Result<Option<RawRow>, Error>;
    fn close(&mut self) -> Result<(), Error>;
}

pub trait Backend {
    /// Cursor over `(catalog_key, catalog_config)` pairs in catalog order.
    fn open_metadata(&self) -> Result<Box<dyn RawCursor + '_>, Error>;
    /// Cursor over raw key/value tuples of `uri` (e.g. `table:users`).
    fn open_table(&self, uri: &str) -> Result<Box<dyn RawCursor + '_>, Error>;
}

/// Cursor over rows already materialized in memory.
#[derive(Debug)]
pub struct VecCursor {
    rows: std::vec::IntoIter<RawRow>,
    closed: bool,
    live: Option<Arc<AtomicUsize>>,
}

impl VecCursor {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows: rows.into_iter(),
            closed: false,
            live: None,
        }
    }

    fn tracked(rows: Vec<RawRow>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            rows: rows.into_iter(),
            closed: false,
            live: Some(live),
        }
    }
}

impl RawCursor for VecCursor {
    fn next_row(&mut self) -> Result<Option<RawRow>, Error> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.rows.next())
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// In-memory engine with an ordered catalog; cursors are counted until closed.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    catalog: Vec<(String, String)>,
    tables: HashMap<String, Vec<RawRow>>,
    live: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a raw catalog entry (e.g. `file:users.wt`) without table data.
    pub fn with_entry(mut self, key: impl Into<String>, config: impl Into<String>) -> Self {
        self.catalog.push((key.into(), config.into()));
        self
    }

    pub fn with_table(
        mut self,
        name: &str,
        config: impl Into<String>,
        rows: Vec<RawRow>,
    ) -> Self {
        let uri = format!("{TABLE_PREFIX}{name}");
        self.catalog.push((uri.clone(), config.into()));
        self.tables.insert(uri, rows);
        self
    }

    /// Shared count of cursors opened but not yet closed.
    pub fn live_cursors(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }
}

impl Backend for MemoryBackend {
    fn open_metadata(&self) -> Result<Box<dyn RawCursor + '_>, Error> {
        let rows = self
            .catalog
            .iter()
            .map(|(key, config)| (key.clone().into_bytes(), config.clone().into_bytes()))
            .collect();
        Ok(Box::new(VecCursor::tracked(rows, Arc::clone(&self.live))))
    }

    fn open_table(&self, uri: &str) -> Result<Box<dyn RawCursor + '_>, Error> {
        let rows = self.tables.get(uri).cloned().ok_or_else(|| {
            Error::new(ErrorKind::TableNotFound).with_message(format!("no data for {uri}"))
        })?;
        Ok(Box::new(VecCursor::tracked(rows, Arc::clone(&self.live))))
    }
}
