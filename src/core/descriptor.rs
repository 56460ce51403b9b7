// Table descriptors and the engine's `key=value,...` configuration-string grammar.
use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_KEY_FORMAT: &str = "u";
pub const DEFAULT_VALUE_FORMAT: &str = "u";
pub const DEFAULT_TABLE_TYPE: &str = "file";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableDescriptor {
    name: String,
    config: String,
    entries: Vec<(String, String)>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, config: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let config = config.into();
        let entries = parse_config(&config).map_err(|err| err.with_table(name.clone()))?;
        Ok(Self {
            name,
            config,
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw configuration string as stored in the catalog.
    pub fn config(&self) -> &str {
        &self.config
    }

    /// Top-level value for `key`; later duplicates override earlier ones.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(entry, _)| entry == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn key_format(&self) -> &str {
        self.non_empty("key_format").unwrap_or(DEFAULT_KEY_FORMAT)
    }

    pub fn value_format(&self) -> &str {
        self.non_empty("value_format").unwrap_or(DEFAULT_VALUE_FORMAT)
    }

    pub fn table_type(&self) -> &str {
        self.non_empty("type").unwrap_or(DEFAULT_TABLE_TYPE)
    }

    /// Column names from `columns=(a,b,...)`, key columns first.
    pub fn columns(&self) -> Option<Vec<String>> {
        let raw = self.non_empty("columns")?;
        let inner = raw
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(raw);
        let names = split_top_level(inner)
            .into_iter()
            .map(|name| unquote(name.trim()).to_string())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();
        if names.is_empty() { None } else { Some(names) }
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }
}

/// Splits a configuration string into top-level `(key, value)` pairs.
/// Bare keys read as `true`; nested `(...)`/`[...]` values stay verbatim.
pub fn parse_config(config: &str) -> Result<Vec<(String, String)>, Error> {
    check_balanced(config)?;
    let mut entries = Vec::new();
    for item in split_top_level(config) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = match split_once_top_level(item, '=') {
            Some((key, value)) => (key.trim(), unquote(value.trim())),
            None => (item, "true"),
        };
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("configuration entry {item:?} has an empty key")));
        }
        entries.push((unquote(key).to_string(), value.to_string()));
    }
    Ok(entries)
}

fn check_balanced(config: &str) -> Result<(), Error> {
    let mut stack = Vec::new();
    let mut in_quote = false;
    for ch in config.chars() {
        if in_quote {
            in_quote = ch != '"';
            continue;
        }
        match ch {
            '"' => in_quote = true,
            '(' | '[' => stack.push(ch),
            ')' | ']' => {
                let open = if ch == ')' { '(' } else { '[' };
                if stack.pop() != Some(open) {
                    return Err(unbalanced(config));
                }
            }
            _ => {}
        }
    }
    if in_quote || !stack.is_empty() {
        return Err(unbalanced(config));
    }
    Ok(())
}

fn unbalanced(config: &str) -> Error {
    Error::new(ErrorKind::Format)
        .with_message(format!("unbalanced quotes or brackets in configuration {config:?}"))
}

fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quote = !in_quote,
            '(' | '[' if !in_quote => depth += 1,
            ')' | ']' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn split_once_top_level(input: &str, sep: char) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quote = !in_quote,
            '(' | '[' if !in_quote => depth += 1,
            ')' | ']' if !in_quote => depth = depth.saturating_sub(1),
            c if c == sep && !in_quote && depth == 0 => {
                return Some((&input[..idx], &input[idx + c.len_utf8()..]));
            }
            _ => {}
        }
    }
    None
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}
