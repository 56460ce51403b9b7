// Read-only session lifecycle: open, idempotent close, and scoped acquisition.
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::dump::DumpBackend;
use crate::core::engine::Backend;
use crate::core::error::{Error, ErrorKind};

pub struct Database {
    path: PathBuf,
    backend: Option<Box<dyn Backend>>,
}

impl Database {
    /// Opens the backup directory at `path` through the dump-snapshot backend.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::new(ErrorKind::Connection)
                .with_message("database path does not exist")
                .with_path(&path));
        }
        if !path.is_dir() {
            return Err(Error::new(ErrorKind::Connection)
                .with_message("database path must be a directory")
                .with_path(&path));
        }
        let backend = DumpBackend::open(&path)?;
        Ok(Self::with_backend(path, backend))
    }

    pub fn with_backend(path: impl Into<PathBuf>, backend: impl Backend + 'static) -> Self {
        Self {
            path: path.into(),
            backend: Some(Box::new(backend)),
        }
    }

    /// Runs `f` against a freshly opened handle and closes it on every exit path.
    pub fn with_open<T>(
        path: impl AsRef<Path>,
        f: impl FnOnce(&Database) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut db = Self::open(path)?;
        let result = f(&db);
        db.close();
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Releases the session. Closing a closed handle is a no-op.
    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            debug!(path = %self.path.display(), "closed database");
        }
    }

    pub(crate) fn backend(&self) -> Result<&dyn Backend, Error> {
        self.backend.as_deref().ok_or_else(|| {
            Error::new(ErrorKind::Connection)
                .with_message("database handle is closed")
                .with_path(&self.path)
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}
