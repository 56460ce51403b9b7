// Scoped engine cursors: every cursor opened here is closed when the guard goes away.
use tracing::{debug, warn};

use crate::core::connection::Database;
use crate::core::engine::{RawCursor, RawRow, TABLE_PREFIX};
use crate::core::error::Error;

pub struct CursorGuard<'a> {
    cursor: Box<dyn RawCursor + 'a>,
    uri: String,
    closed: bool,
}

impl<'a> CursorGuard<'a> {
    pub fn metadata(db: &'a Database) -> Result<Self, Error> {
        let cursor = db.backend()?.open_metadata()?;
        Ok(Self::new(cursor, "metadata:"))
    }

    pub fn table(db: &'a Database, table: &str) -> Result<Self, Error> {
        let uri = format!("{TABLE_PREFIX}{table}");
        let cursor = db
            .backend()?
            .open_table(&uri)
            .map_err(|err| err.with_table(table))?;
        Ok(Self::new(cursor, uri))
    }

    fn new(cursor: Box<dyn RawCursor + 'a>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        debug!(uri = %uri, "cursor opened");
        Self {
            cursor,
            uri,
            closed: false,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn next_row(&mut self) -> Result<Option<RawRow>, Error> {
        if self.closed {
            return Ok(None);
        }
        self.cursor.next_row()
    }

    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(uri = %self.uri, "cursor closed");
        self.cursor.close()
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(uri = %self.uri, error = %err, "cursor close failed");
        }
    }
}
