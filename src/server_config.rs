//! Register or remove this tool's query server in a shared JSON tool registry
//! (the `mcpServers` map of a desktop assistant's config file).
//!
//! The file is owned by another application, so edits are read-modify-write
//! against the parsed document: only `mcpServers.<name>` changes, every other
//! key keeps its value and position. A file that cannot be parsed is backed up
//! to `<file>.bak` before `register` starts from an empty document; `unregister`
//! refuses to touch it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ServerConfigError;
use crate::utils::atomic_write;

pub const SERVERS_KEY: &str = "mcpServers";

/// One server entry: how the registry launches the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerEntry {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    Replaced,
    /// The existing file was unparseable and was moved aside first.
    AddedAfterBackup { backup: PathBuf },
}

fn io_err(path: &Path, source: std::io::Error) -> ServerConfigError {
    ServerConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn backup_path(config_path: &Path) -> PathBuf {
    let mut name = config_path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

enum Loaded {
    Missing,
    Parsed(Map<String, Value>),
    Corrupt(serde_json::Error),
}

fn load(config_path: &Path) -> Result<Loaded, ServerConfigError> {
    let content = match fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(io_err(config_path, e)),
    };
    if content.trim().is_empty() {
        return Ok(Loaded::Missing);
    }
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(Loaded::Parsed(map)),
        Ok(other) => Ok(Loaded::Corrupt(serde::de::Error::custom(format!(
            "expected a JSON object at the top level, found {}",
            kind_of(&other)
        )))),
        Err(e) => Ok(Loaded::Corrupt(e)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn save(config_path: &Path, root: &Map<String, Value>) -> Result<(), ServerConfigError> {
    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut formatted = serde_json::to_string_pretty(root)?;
    formatted.push('\n');
    atomic_write(config_path, &formatted).map_err(|e| io_err(config_path, e))
}

/// Add or replace `mcpServers.<name>`.
pub fn register(
    config_path: &Path,
    name: &str,
    entry: &ServerEntry,
) -> Result<RegisterOutcome, ServerConfigError> {
    let (mut root, backup) = match load(config_path)? {
        Loaded::Missing => (Map::new(), None),
        Loaded::Parsed(map) => (map, None),
        Loaded::Corrupt(e) => {
            let backup = backup_path(config_path);
            log::warn!(
                "{} is not valid JSON ({}); backing it up to {}",
                config_path.display(),
                e,
                backup.display()
            );
            fs::copy(config_path, &backup).map_err(|e| io_err(&backup, e))?;
            (Map::new(), Some(backup))
        }
    };

    let servers = root
        .entry(SERVERS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !servers.is_object() {
        log::warn!("`{SERVERS_KEY}` was not an object; replacing it");
        *servers = Value::Object(Map::new());
    }
    let Value::Object(servers) = servers else {
        unreachable!("servers was just made an object");
    };

    let previous = servers.insert(name.to_string(), serde_json::to_value(entry)?);
    save(config_path, &root)?;

    Ok(match (backup, previous) {
        (Some(backup), _) => RegisterOutcome::AddedAfterBackup { backup },
        (None, Some(_)) => RegisterOutcome::Replaced,
        (None, None) => RegisterOutcome::Added,
    })
}

/// Remove `mcpServers.<name>`. Returns whether an entry was removed; the file
/// is only rewritten when it was.
pub fn unregister(config_path: &Path, name: &str) -> Result<bool, ServerConfigError> {
    let mut root = match load(config_path)? {
        Loaded::Missing => return Ok(false),
        Loaded::Parsed(map) => map,
        Loaded::Corrupt(source) => {
            return Err(ServerConfigError::Corrupt {
                path: config_path.to_path_buf(),
                source,
            });
        }
    };

    let removed = root
        .get_mut(SERVERS_KEY)
        .and_then(Value::as_object_mut)
        .and_then(|servers| servers.shift_remove(name))
        .is_some();
    if removed {
        save(config_path, &root)?;
    }
    Ok(removed)
}
