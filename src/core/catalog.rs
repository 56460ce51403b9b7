// Catalog queries over the engine metadata cursor; re-read on every call.
use crate::core::connection::Database;
use crate::core::cursor::CursorGuard;
use crate::core::descriptor::TableDescriptor;
use crate::core::engine::TABLE_PREFIX;
use crate::core::error::{Error, ErrorKind};

/// User-addressable table names in catalog order.
pub fn list_tables(db: &Database) -> Result<Vec<String>, Error> {
    let mut tables = Vec::new();
    scan(db, |key, _| {
        if let Some(name) = key.strip_prefix(TABLE_PREFIX) {
            tables.push(name.to_string());
        }
        false
    })?;
    Ok(tables)
}

/// `Ok(None)` when the catalog has no `table:<name>` entry.
pub fn get_table_descriptor(db: &Database, name: &str) -> Result<Option<TableDescriptor>, Error> {
    let wanted = format!("{TABLE_PREFIX}{name}");
    let mut found = None;
    scan(db, |key, config| {
        if key == wanted {
            found = Some(config.to_string());
            return true;
        }
        false
    })?;
    found
        .map(|config| TableDescriptor::new(name, config))
        .transpose()
}

/// Visits catalog entries until `visit` returns true.
fn scan(db: &Database, mut visit: impl FnMut(&str, &str) -> bool) -> Result<(), Error> {
    let mut cursor = CursorGuard::metadata(db)?;
    while let Some((key, config)) = cursor.next_row()? {
        let key = catalog_text(key, "key")?;
        let config = catalog_text(config, "configuration")?;
        if visit(&key, &config) {
            break;
        }
    }
    cursor.close()
}

fn catalog_text(bytes: Vec<u8>, what: &str) -> Result<String, Error> {
    String::from_utf8(bytes).map_err(|err| {
        Error::new(ErrorKind::Format)
            .with_message(format!("catalog {what} is not valid UTF-8"))
            .with_source(err)
    })
}
