// Read-only backend over a WiredTiger backup directory and its `wt dump` snapshots.
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use tracing::{debug, warn};

use crate::core::descriptor::parse_config;
use crate::core::engine::{Backend, RawCursor, RawRow, VecCursor};
use crate::core::error::{Error, ErrorKind};

pub const VERSION_FILE: &str = "WiredTiger";
pub const METADATA_FILE: &str = "WiredTiger.wt";
pub const LOCK_FILE: &str = "WiredTiger.lock";
pub const SNAPSHOT_EXTENSION: &str = "dump";

const BANNER: &str = "WiredTiger Dump";
const HEADER_MARK: &str = "Header";
const DATA_MARK: &str = "Data";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Encoding {
    Print,
    Hex,
}

#[derive(Debug)]
pub struct DumpBackend {
    root: PathBuf,
    lock: Option<File>,
}

impl DumpBackend {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        for required in [VERSION_FILE, METADATA_FILE] {
            if !root.join(required).is_file() {
                return Err(Error::new(ErrorKind::Connection)
                    .with_message(format!("not a WiredTiger database: missing {required}"))
                    .with_path(&root));
            }
        }

        let version_path = root.join(VERSION_FILE);
        let banner = fs::read_to_string(&version_path).map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("failed to read version file")
                .with_path(&version_path)
                .with_source(err)
        })?;
        if !banner.starts_with(VERSION_FILE) {
            return Err(Error::new(ErrorKind::Connection)
                .with_message("version file does not carry a WiredTiger banner")
                .with_path(&version_path));
        }

        let lock_path = root.join(LOCK_FILE);
        let lock = if lock_path.is_file() {
            let file = File::open(&lock_path).map_err(|err| {
                Error::new(ErrorKind::Connection)
                    .with_message("failed to open lock file")
                    .with_path(&lock_path)
                    .with_source(err)
            })?;
            FileExt::try_lock_shared(&file)
                .map_err(|err| lock_error(err).with_path(&lock_path))?;
            Some(file)
        } else {
            None
        };

        debug!(path = %root.display(), locked = lock.is_some(), "opened backup directory");
        Ok(Self { root, lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot files in file-name order.
    fn snapshots(&self) -> Result<Vec<PathBuf>, Error> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("failed to read database directory")
                .with_path(&self.root)
                .with_source(err)
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Connection)
                    .with_message("failed to read database directory entry")
                    .with_path(&self.root)
                    .with_source(err)
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXTENSION)
                && path.is_file()
            {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl Drop for DumpBackend {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let _ = FileExt::unlock(&lock);
        }
    }
}

impl Backend for DumpBackend {
    /// Catalog keys are unique; the first snapshot declaring a key wins, as in `open_table`.
    fn open_metadata(&self) -> Result<Box<dyn RawCursor + '_>, Error> {
        let mut rows: Vec<RawRow> = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        for path in self.snapshots()? {
            let mut reader = SnapshotReader::open(&path)?;
            while let Some(section) = reader.next_section()? {
                for (key, config) in section.entries {
                    if let Some(first) = seen.get(&key) {
                        warn!(
                            key = %key,
                            kept = %first.display(),
                            ignored = %path.display(),
                            "duplicate catalog entry"
                        );
                        continue;
                    }
                    seen.insert(key.clone(), path.clone());
                    rows.push((key.into_bytes(), config.into_bytes()));
                }
                reader.skip_data()?;
            }
        }
        debug!(entries = rows.len(), "read snapshot catalog");
        Ok(Box::new(VecCursor::new(rows)))
    }

    fn open_table(&self, uri: &str) -> Result<Box<dyn RawCursor + '_>, Error> {
        for path in self.snapshots()? {
            let mut reader = SnapshotReader::open(&path)?;
            while let Some(section) = reader.next_section()? {
                let Some((_, config)) = section.entries.iter().find(|(key, _)| key == uri) else {
                    reader.skip_data()?;
                    continue;
                };
                let recno_keys = parse_config(config)?
                    .iter()
                    .rev()
                    .find(|(key, _)| key == "key_format")
                    .is_some_and(|(_, format)| format == "r");
                debug!(uri, path = %path.display(), "opened snapshot cursor");
                return Ok(Box::new(DumpCursor {
                    reader: Some(reader),
                    encoding: section.encoding,
                    recno_keys,
                }));
            }
        }
        Err(Error::new(ErrorKind::TableNotFound)
            .with_message(format!("no snapshot holds {uri}"))
            .with_path(&self.root))
    }
}

fn lock_error(err: io::Error) -> Error {
    let errno = err.raw_os_error().unwrap_or_default();
    let contended = err.kind() == io::ErrorKind::WouldBlock
        || errno == fs2::lock_contended_error().raw_os_error().unwrap_or_default();
    let message = if contended {
        "lock held by another process"
    } else if errno == EACCES || errno == EPERM {
        "permission denied while locking database"
    } else {
        "failed to lock database"
    };
    Error::new(ErrorKind::Connection)
        .with_message(message)
        .with_source(err)
}

struct SectionHeader {
    encoding: Encoding,
    entries: Vec<(String, String)>,
}

struct SnapshotReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    pending: Option<String>,
}

impl SnapshotReader {
    fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("failed to open snapshot")
                .with_path(path)
                .with_source(err)
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            pending: None,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>, Error> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        match self.lines.next() {
            None => Ok(None),
            Some(Ok(line)) => {
                self.line_no += 1;
                Ok(Some(line))
            }
            Some(Err(err)) => Err(Error::new(ErrorKind::Connection)
                .with_message(format!("failed to read snapshot after line {}", self.line_no))
                .with_path(&self.path)
                .with_source(err)),
        }
    }

    fn require_line(&mut self, context: &str) -> Result<String, Error> {
        self.next_line()?
            .ok_or_else(|| self.malformed(&format!("unexpected end of file {context}")))
    }

    fn malformed(&self, what: &str) -> Error {
        Error::new(ErrorKind::Format)
            .with_message(format!("malformed snapshot at line {}: {what}", self.line_no))
            .with_path(&self.path)
    }

    fn next_section(&mut self) -> Result<Option<SectionHeader>, Error> {
        let Some(banner) = self.next_line()? else {
            return Ok(None);
        };
        if !banner.starts_with(BANNER) {
            return Err(self.malformed("expected dump banner"));
        }

        let mut encoding = None;
        loop {
            let line = self.require_line("before Header")?;
            if line == HEADER_MARK {
                break;
            }
            if let Some(format) = line.strip_prefix("Format=") {
                encoding = match format {
                    "print" => Some(Encoding::Print),
                    "hex" => Some(Encoding::Hex),
                    other => return Err(self.malformed(&format!("unknown dump format {other:?}"))),
                };
            }
        }
        let encoding = encoding.ok_or_else(|| self.malformed("missing Format= line"))?;

        let mut entries = Vec::new();
        loop {
            let uri = self.require_line("in Header")?;
            if uri == DATA_MARK {
                break;
            }
            let config = self.require_line("after header entry")?;
            entries.push((uri, config));
        }
        Ok(Some(SectionHeader { encoding, entries }))
    }

    fn next_pair(&mut self) -> Result<Option<(String, String)>, Error> {
        let key = match self.next_line()? {
            None => return Ok(None),
            Some(line) if line.starts_with(BANNER) => {
                self.pending = Some(line);
                return Ok(None);
            }
            Some(line) => line,
        };
        let value = self.require_line("after key line")?;
        Ok(Some((key, value)))
    }

    fn skip_data(&mut self) -> Result<(), Error> {
        while self.next_pair()?.is_some() {}
        Ok(())
    }
}

struct DumpCursor {
    reader: Option<SnapshotReader>,
    encoding: Encoding,
    recno_keys: bool,
}

impl RawCursor for DumpCursor {
    fn next_row(&mut self) -> Result<Option<RawRow>, Error> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let Some((key, value)) = reader.next_pair()? else {
            return Ok(None);
        };
        let key = if self.recno_keys {
            key.trim()
                .parse::<u64>()
                .map(|recno| recno.to_le_bytes().to_vec())
                .map_err(|_| reader.malformed("record number key is not an integer"))?
        } else {
            decode_line(self.encoding, &key).map_err(|what| reader.malformed(&what))?
        };
        let value = decode_line(self.encoding, &value).map_err(|what| reader.malformed(&what))?;
        Ok(Some((key, value)))
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(reader) = self.reader.take() {
            debug!(path = %reader.path.display(), line = reader.line_no, "closed snapshot cursor");
        }
        Ok(())
    }
}

fn decode_line(encoding: Encoding, line: &str) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Hex => hex::decode(line.trim()).map_err(|err| format!("bad hex item: {err}")),
        Encoding::Print => unescape_print(line),
    }
}

/// `print` items escape `\` as `\\` and other bytes as `\xx`.
fn unescape_print(line: &str) -> Result<Vec<u8>, String> {
    let bytes = line.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b'\\' {
            out.push(bytes[idx]);
            idx += 1;
            continue;
        }
        if bytes.get(idx + 1) == Some(&b'\\') {
            out.push(b'\\');
            idx += 2;
            continue;
        }
        let escape = bytes
            .get(idx + 1..idx + 3)
            .ok_or_else(|| format!("truncated escape at column {}", idx + 1))?;
        let mut byte = [0u8; 1];
        hex::decode_to_slice(escape, &mut byte)
            .map_err(|_| format!("bad escape at column {}", idx + 1))?;
        out.push(byte[0]);
        idx += 3;
    }
    Ok(out)
}
